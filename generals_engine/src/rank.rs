// Piece ranks and combat resolution.
//
// `Rank` is a closed enumeration: a rank that does not exist cannot be
// submitted, deserialized, or compared. Declaration order is the default
// strength order (Flag weakest, Five-Star General strongest); `Ord` is
// derived from it.
//
// Combat goes through a `CombatTable`: an ordered list of special-case rules
// that is consulted first, and the strength order as the fallback (higher
// rank wins, equal ranks eliminate each other). The default table encodes
// the Game of the Generals specials: the Spy takes officers, the Private
// takes the Spy, and anything takes the Flag. The table is plain data and
// can be replaced through `GameRules` (see `config.rs`).
//
// Everything here is pure and non-suspending; `session.rs` calls it while
// holding a session lock.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strength class of a piece.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Flag,
    Spy,
    Private,
    Sergeant,
    SecondLieutenant,
    FirstLieutenant,
    Captain,
    Major,
    LieutenantColonel,
    Colonel,
    OneStarGeneral,
    TwoStarGeneral,
    ThreeStarGeneral,
    FourStarGeneral,
    FiveStarGeneral,
}

impl Rank {
    pub const ALL: [Rank; 15] = [
        Rank::Flag,
        Rank::Spy,
        Rank::Private,
        Rank::Sergeant,
        Rank::SecondLieutenant,
        Rank::FirstLieutenant,
        Rank::Captain,
        Rank::Major,
        Rank::LieutenantColonel,
        Rank::Colonel,
        Rank::OneStarGeneral,
        Rank::TwoStarGeneral,
        Rank::ThreeStarGeneral,
        Rank::FourStarGeneral,
        Rank::FiveStarGeneral,
    ];

    /// Position in the default strength order.
    pub fn strength(self) -> u8 {
        self as u8
    }

    /// Losing a piece of this rank loses the game.
    pub fn is_terminal(self) -> bool {
        self == Rank::Flag
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rank::Flag => "Flag",
            Rank::Spy => "Spy",
            Rank::Private => "Private",
            Rank::Sergeant => "Sergeant",
            Rank::SecondLieutenant => "2nd Lieutenant",
            Rank::FirstLieutenant => "1st Lieutenant",
            Rank::Captain => "Captain",
            Rank::Major => "Major",
            Rank::LieutenantColonel => "Lt. Colonel",
            Rank::Colonel => "Colonel",
            Rank::OneStarGeneral => "1-Star General",
            Rank::TwoStarGeneral => "2-Star General",
            Rank::ThreeStarGeneral => "3-Star General",
            Rank::FourStarGeneral => "4-Star General",
            Rank::FiveStarGeneral => "5-Star General",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Combat
// ---------------------------------------------------------------------------

/// Result of a challenge, from the attacker's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatOutcome {
    AttackerWins,
    DefenderWins,
    /// Both pieces are eliminated.
    Draw,
}

impl CombatOutcome {
    /// The same fight described from the other side.
    pub fn mirrored(self) -> Self {
        match self {
            CombatOutcome::AttackerWins => CombatOutcome::DefenderWins,
            CombatOutcome::DefenderWins => CombatOutcome::AttackerWins,
            CombatOutcome::Draw => CombatOutcome::Draw,
        }
    }
}

/// Which ranks a combat rule applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankMatch {
    Exactly(Rank),
    /// This rank or any stronger one in the default order.
    AtLeast(Rank),
    Any,
}

impl RankMatch {
    pub fn matches(self, rank: Rank) -> bool {
        match self {
            RankMatch::Exactly(r) => rank == r,
            RankMatch::AtLeast(r) => rank >= r,
            RankMatch::Any => true,
        }
    }
}

/// A special case overriding the strength order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatRule {
    pub attacker: RankMatch,
    pub defender: RankMatch,
    pub outcome: CombatOutcome,
}

impl CombatRule {
    const fn new(attacker: RankMatch, defender: RankMatch, outcome: CombatOutcome) -> Self {
        Self {
            attacker,
            defender,
            outcome,
        }
    }
}

/// Ordered special rules; the first matching rule decides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatTable {
    pub rules: Vec<CombatRule>,
}

impl CombatTable {
    /// Game of the Generals specials.
    ///
    /// Flag vs Flag is the one rule that is not mirror-symmetric: whichever
    /// flag attacks wins.
    pub fn generals() -> Self {
        use CombatOutcome::*;
        use RankMatch::*;
        Self {
            rules: vec![
                CombatRule::new(Exactly(Rank::Flag), Exactly(Rank::Flag), AttackerWins),
                CombatRule::new(Any, Exactly(Rank::Flag), AttackerWins),
                CombatRule::new(Exactly(Rank::Flag), Any, DefenderWins),
                CombatRule::new(Exactly(Rank::Spy), AtLeast(Rank::Sergeant), AttackerWins),
                CombatRule::new(AtLeast(Rank::Sergeant), Exactly(Rank::Spy), DefenderWins),
                CombatRule::new(Exactly(Rank::Private), Exactly(Rank::Spy), AttackerWins),
                CombatRule::new(Exactly(Rank::Spy), Exactly(Rank::Private), DefenderWins),
            ],
        }
    }

    /// Plain strength comparison with no special cases.
    pub fn ordered_only() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn resolve(&self, attacker: Rank, defender: Rank) -> CombatOutcome {
        if let Some(rule) = self
            .rules
            .iter()
            .find(|rule| rule.attacker.matches(attacker) && rule.defender.matches(defender))
        {
            return rule.outcome;
        }
        match attacker.cmp(&defender) {
            std::cmp::Ordering::Greater => CombatOutcome::AttackerWins,
            std::cmp::Ordering::Less => CombatOutcome::DefenderWins,
            std::cmp::Ordering::Equal => CombatOutcome::Draw,
        }
    }
}

impl Default for CombatTable {
    fn default() -> Self {
        Self::generals()
    }
}

/// Resolve a challenge with the default Game of the Generals table.
pub fn resolve_combat(attacker: Rank, defender: Rank) -> CombatOutcome {
    CombatTable::generals().resolve(attacker, defender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_rank_wins_by_default() {
        assert_eq!(
            resolve_combat(Rank::Colonel, Rank::Major),
            CombatOutcome::AttackerWins
        );
        assert_eq!(
            resolve_combat(Rank::Captain, Rank::FiveStarGeneral),
            CombatOutcome::DefenderWins
        );
    }

    #[test]
    fn equal_ranks_draw() {
        for rank in Rank::ALL {
            if rank == Rank::Flag {
                continue;
            }
            assert_eq!(resolve_combat(rank, rank), CombatOutcome::Draw, "{rank}");
        }
    }

    #[test]
    fn spy_takes_officers_but_not_privates() {
        assert_eq!(
            resolve_combat(Rank::Spy, Rank::FiveStarGeneral),
            CombatOutcome::AttackerWins
        );
        assert_eq!(
            resolve_combat(Rank::Sergeant, Rank::Spy),
            CombatOutcome::DefenderWins
        );
        assert_eq!(
            resolve_combat(Rank::Spy, Rank::Private),
            CombatOutcome::DefenderWins
        );
        assert_eq!(
            resolve_combat(Rank::Private, Rank::Spy),
            CombatOutcome::AttackerWins
        );
    }

    #[test]
    fn anything_captures_the_flag() {
        for rank in Rank::ALL {
            assert_eq!(
                resolve_combat(rank, Rank::Flag),
                CombatOutcome::AttackerWins,
                "{rank} attacking a flag"
            );
        }
        assert_eq!(
            resolve_combat(Rank::Flag, Rank::Private),
            CombatOutcome::DefenderWins
        );
    }

    #[test]
    fn combat_is_mirror_symmetric_except_flag_on_flag() {
        for a in Rank::ALL {
            for d in Rank::ALL {
                if a == Rank::Flag && d == Rank::Flag {
                    continue;
                }
                assert_eq!(
                    resolve_combat(a, d),
                    resolve_combat(d, a).mirrored(),
                    "{a} vs {d}"
                );
            }
        }
        assert_eq!(
            resolve_combat(Rank::Flag, Rank::Flag),
            CombatOutcome::AttackerWins
        );
    }

    #[test]
    fn ordered_only_table_ignores_specials() {
        let table = CombatTable::ordered_only();
        assert_eq!(
            table.resolve(Rank::Spy, Rank::FiveStarGeneral),
            CombatOutcome::DefenderWins
        );
    }

    #[test]
    fn table_loads_from_json() {
        let json = r#"{"rules":[{"attacker":{"Exactly":"Captain"},"defender":"Any","outcome":"AttackerWins"}]}"#;
        let table: CombatTable = serde_json::from_str(json).unwrap();
        assert_eq!(
            table.resolve(Rank::Captain, Rank::FiveStarGeneral),
            CombatOutcome::AttackerWins
        );
    }
}
