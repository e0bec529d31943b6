// Data-driven ruleset.
//
// Everything that distinguishes one Stratego-family variant from another
// lives in `GameRules`: board geometry, the army each side fields, the
// special combat table, which ranks are immobile or move in straight lines,
// the inactivity-draw threshold, and whether a flag can win by reaching the
// far side. The engine reads these values and never hard-codes them.
//
// `GameRules::default()` is the Game of the Generals: a 9×8 board with three
// territory rows per side and a 21-piece army. Rules can also be loaded from
// JSON (`GameRules::from_json`); loaded rules must pass `validate()` before a
// registry will accept them, so the session code can assume a consistent
// ruleset (army fits the territory, obstacles are symmetric, exactly one
// terminal piece per side, and so on).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::board::Board;
use crate::rank::{CombatTable, Rank};
use crate::types::{CellIndex, PlayerSlot, Placement};

/// How many pieces of one rank each side fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyEntry {
    pub rank: Rank,
    pub count: u8,
}

/// Movement exceptions. Every rank not listed moves one cell orthogonally.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRules {
    /// Ranks that can never leave their cell.
    #[serde(default)]
    pub immobile: Vec<Rank>,
    /// Ranks that may travel any distance along a row or column through
    /// empty cells.
    #[serde(default)]
    pub long_range: Vec<Rank>,
}

/// Complete ruleset for a match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRules {
    pub board: Board,
    pub army: Vec<ArmyEntry>,
    #[serde(default)]
    pub combat: CombatTable,
    #[serde(default)]
    pub movement: MovementRules,
    /// Consecutive challenge-free moves (both players counted) after which
    /// the game is drawn.
    pub inactivity_draw_limit: u32,
    /// A flag on the opponent's back rank wins once no enemy piece stands
    /// next to it, or after it survives one reply move.
    #[serde(default)]
    pub flag_home_run: bool,
}

impl Default for GameRules {
    fn default() -> Self {
        let army = [
            (Rank::FiveStarGeneral, 1),
            (Rank::FourStarGeneral, 1),
            (Rank::ThreeStarGeneral, 1),
            (Rank::TwoStarGeneral, 1),
            (Rank::OneStarGeneral, 1),
            (Rank::Colonel, 1),
            (Rank::LieutenantColonel, 1),
            (Rank::Major, 1),
            (Rank::Captain, 1),
            (Rank::FirstLieutenant, 1),
            (Rank::SecondLieutenant, 1),
            (Rank::Sergeant, 1),
            (Rank::Private, 6),
            (Rank::Spy, 2),
            (Rank::Flag, 1),
        ]
        .into_iter()
        .map(|(rank, count)| ArmyEntry { rank, count })
        .collect();

        Self {
            board: Board::default(),
            army,
            combat: CombatTable::generals(),
            movement: MovementRules::default(),
            inactivity_draw_limit: 30,
            flag_home_run: true,
        }
    }
}

/// Reasons a ruleset is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed rules: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("board must be at least 1x1 and at most 65535 cells, got {width}x{height}")]
    BoardSize { width: u16, height: u16 },
    #[error("territory rows ({territory_rows}) must be between 1 and half the board height ({height})")]
    TerritoryRows { territory_rows: u16, height: u16 },
    #[error("obstacle {0} is outside the board")]
    ObstacleOutOfRange(CellIndex),
    #[error("obstacle {0} lies inside a player's territory")]
    ObstacleInTerritory(CellIndex),
    #[error("obstacle layout is not symmetric: {0} has no rotated counterpart")]
    AsymmetricObstacles(CellIndex),
    #[error("army is empty")]
    EmptyArmy,
    #[error("rank {0} is listed more than once in the army")]
    DuplicateArmyRank(Rank),
    #[error("army must contain exactly one flag, found {0}")]
    FlagCount(u32),
    #[error("army of {army} pieces does not fit a territory of {territory} cells")]
    ArmyTooLarge { army: usize, territory: usize },
    #[error("inactivity draw limit must be positive")]
    ZeroInactivityLimit,
}

impl GameRules {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let rules: GameRules = serde_json::from_str(json)?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let board = &self.board;
        if board.width == 0 || board.height == 0 || board.cell_count() > usize::from(u16::MAX) {
            return Err(ConfigError::BoardSize {
                width: board.width,
                height: board.height,
            });
        }
        if board.territory_rows == 0 || u32::from(board.territory_rows) * 2 > u32::from(board.height) {
            return Err(ConfigError::TerritoryRows {
                territory_rows: board.territory_rows,
                height: board.height,
            });
        }
        for &cell in &board.obstacles {
            let (Some((row, _)), Some(rotated)) = (board.row_col(cell), board.rotate(cell)) else {
                return Err(ConfigError::ObstacleOutOfRange(cell));
            };
            // `territory_of` reports obstacles as neutral, so check the row.
            if row < board.territory_rows || row >= board.height - board.territory_rows {
                return Err(ConfigError::ObstacleInTerritory(cell));
            }
            if !board.is_obstacle(rotated) {
                return Err(ConfigError::AsymmetricObstacles(cell));
            }
        }

        if self.army.is_empty() {
            return Err(ConfigError::EmptyArmy);
        }
        let mut seen = BTreeMap::new();
        for entry in &self.army {
            if seen.insert(entry.rank, entry.count).is_some() {
                return Err(ConfigError::DuplicateArmyRank(entry.rank));
            }
        }
        let flags = seen.get(&Rank::Flag).copied().map_or(0, u32::from);
        if flags != 1 {
            return Err(ConfigError::FlagCount(flags));
        }
        let territory = board.territory_cells(PlayerSlot::A).len();
        if self.army_size() > territory {
            return Err(ConfigError::ArmyTooLarge {
                army: self.army_size(),
                territory,
            });
        }
        if self.inactivity_draw_limit == 0 {
            return Err(ConfigError::ZeroInactivityLimit);
        }
        Ok(())
    }

    /// Total pieces per side.
    pub fn army_size(&self) -> usize {
        self.army.iter().map(|e| usize::from(e.count)).sum()
    }

    /// Expected count per rank, for multiset comparison.
    pub fn army_counts(&self) -> BTreeMap<Rank, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.army {
            *counts.entry(entry.rank).or_insert(0) += usize::from(entry.count);
        }
        counts
    }

    pub fn is_immobile(&self, rank: Rank) -> bool {
        self.movement.immobile.contains(&rank)
    }

    pub fn is_long_range(&self, rank: Rank) -> bool {
        self.movement.long_range.contains(&rank)
    }

    /// A legal arrangement that fills `slot`'s territory front to back,
    /// strongest pieces first. Used by automated players and tests.
    pub fn sequential_placement(&self, slot: PlayerSlot) -> Vec<Placement> {
        let mut ranks: Vec<Rank> = self
            .army
            .iter()
            .flat_map(|e| std::iter::repeat_n(e.rank, usize::from(e.count)))
            .collect();
        ranks.sort_by(|a, b| b.cmp(a));

        let mut cells = self.board.territory_cells(slot);
        // Player-A's front line is its highest row; Player-B's is its lowest.
        if slot == PlayerSlot::A {
            cells.reverse();
        }
        ranks
            .into_iter()
            .zip(cells)
            .map(|(rank, cell)| Placement { rank, cell })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Territory;

    #[test]
    fn default_rules_are_valid() {
        let rules = GameRules::default();
        rules.validate().unwrap();
        assert_eq!(rules.army_size(), 21);
        assert_eq!(rules.army_counts()[&Rank::Private], 6);
        assert_eq!(rules.army_counts()[&Rank::Spy], 2);
    }

    #[test]
    fn default_rules_roundtrip_through_json() {
        let rules = GameRules::default();
        let json = serde_json::to_string_pretty(&rules).unwrap();
        let loaded = GameRules::from_json(&json).unwrap();
        assert_eq!(loaded, rules);
    }

    #[test]
    fn rules_load_with_defaults_for_optional_sections() {
        let json = r#"{
            "board": {"width": 4, "height": 4, "territory_rows": 1},
            "army": [{"rank": "Flag", "count": 1}, {"rank": "Private", "count": 2}],
            "inactivity_draw_limit": 10
        }"#;
        let rules = GameRules::from_json(json).unwrap();
        assert_eq!(rules.army_size(), 3);
        assert!(!rules.flag_home_run);
        assert!(rules.movement.immobile.is_empty());
        assert!(!rules.combat.rules.is_empty());
    }

    #[test]
    fn rejects_duplicate_rank_and_oversized_army() {
        let mut rules = GameRules::default();
        rules.army.push(ArmyEntry {
            rank: Rank::Sergeant,
            count: 0,
        });
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::DuplicateArmyRank(Rank::Sergeant))
        ));

        let mut rules = GameRules::default();
        rules.army[12].count = 20;
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::ArmyTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_missing_flag() {
        let mut rules = GameRules::default();
        rules.army.retain(|e| e.rank != Rank::Flag);
        assert!(matches!(rules.validate(), Err(ConfigError::FlagCount(0))));
    }

    #[test]
    fn rejects_bad_territory_rows() {
        let mut rules = GameRules::default();
        rules.board.territory_rows = 5;
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::TerritoryRows { .. })
        ));
    }

    #[test]
    fn rejects_asymmetric_or_misplaced_obstacles() {
        let mut rules = GameRules::default();
        rules.board.obstacles.insert(CellIndex(31));
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::AsymmetricObstacles(CellIndex(31)))
        ));
        rules.board.obstacles.insert(CellIndex(40));
        rules.validate().unwrap();

        let mut rules = GameRules::default();
        rules.board.obstacles.insert(CellIndex(4));
        rules.board.obstacles.insert(CellIndex(67));
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::ObstacleInTerritory(CellIndex(4)))
        ));

        let mut rules = GameRules::default();
        rules.board.obstacles.insert(CellIndex(200));
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::ObstacleOutOfRange(CellIndex(200)))
        ));
    }

    #[test]
    fn sequential_placement_fills_own_territory() {
        let rules = GameRules::default();
        for slot in [PlayerSlot::A, PlayerSlot::B] {
            let placement = rules.sequential_placement(slot);
            assert_eq!(placement.len(), 21);
            for p in &placement {
                assert_eq!(rules.board.territory_of(p.cell), Territory::Home(slot));
            }
        }
        let a = rules.sequential_placement(PlayerSlot::A);
        assert_eq!(a[0].rank, Rank::FiveStarGeneral);
        assert_eq!(a[0].cell, CellIndex(26));
        let b = rules.sequential_placement(PlayerSlot::B);
        assert_eq!(b[0].cell, CellIndex(45));
    }
}
