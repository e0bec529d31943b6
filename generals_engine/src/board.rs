// Board geometry: grid addressing, territories, obstacles, adjacency.
//
// Cells are numbered `row * width + col`. Row 0 is Player-A's back rank and
// the last row is Player-B's, so the 180° rotation `cell -> count - 1 - cell`
// swaps the two sides. Each player owns the first / last `territory_rows`
// rows for piece placement; the rows in between are neutral. Obstacles are
// optional non-traversable cells; `GameRules::validate` (see `config.rs`)
// guarantees they are neutral and rotation-symmetric.
//
// All queries are total: out-of-range cells are never adjacent, never
// obstacles, and belong to no player's territory. Callers that need to
// reject out-of-range input check `contains` first.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{CellIndex, PlayerSlot};

/// Ownership of a cell for placement purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Territory {
    Home(PlayerSlot),
    Neutral,
}

/// Static board layout. Part of `GameRules`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub width: u16,
    pub height: u16,
    /// Rows on each side that belong to that side's territory.
    pub territory_rows: u16,
    #[serde(default)]
    pub obstacles: BTreeSet<CellIndex>,
}

impl Default for Board {
    /// The 9×8 Game of the Generals board.
    fn default() -> Self {
        Self {
            width: 9,
            height: 8,
            territory_rows: 3,
            obstacles: BTreeSet::new(),
        }
    }
}

impl Board {
    pub fn cell_count(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }

    pub fn contains(&self, cell: CellIndex) -> bool {
        usize::from(cell.0) < self.cell_count()
    }

    pub fn row_col(&self, cell: CellIndex) -> Option<(u16, u16)> {
        if !self.contains(cell) {
            return None;
        }
        Some((cell.0 / self.width, cell.0 % self.width))
    }

    pub fn cell_at(&self, row: u16, col: u16) -> Option<CellIndex> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(CellIndex(row * self.width + col))
    }

    /// Orthogonal neighbours only; no diagonals, no wrap across rows.
    pub fn is_adjacent(&self, a: CellIndex, b: CellIndex) -> bool {
        match (self.row_col(a), self.row_col(b)) {
            (Some((ra, ca)), Some((rb, cb))) => ra.abs_diff(rb) + ca.abs_diff(cb) == 1,
            _ => false,
        }
    }

    pub fn neighbors(&self, cell: CellIndex) -> Vec<CellIndex> {
        let Some((row, col)) = self.row_col(cell) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(4);
        if row > 0 {
            out.extend(self.cell_at(row - 1, col));
        }
        out.extend(self.cell_at(row + 1, col));
        if col > 0 {
            out.extend(self.cell_at(row, col - 1));
        }
        out.extend(self.cell_at(row, col + 1));
        out
    }

    pub fn is_obstacle(&self, cell: CellIndex) -> bool {
        self.obstacles.contains(&cell)
    }

    pub fn territory_of(&self, cell: CellIndex) -> Territory {
        let Some((row, _)) = self.row_col(cell) else {
            return Territory::Neutral;
        };
        if self.is_obstacle(cell) {
            Territory::Neutral
        } else if row < self.territory_rows {
            Territory::Home(PlayerSlot::A)
        } else if row >= self.height.saturating_sub(self.territory_rows) {
            Territory::Home(PlayerSlot::B)
        } else {
            Territory::Neutral
        }
    }

    /// Every cell a player may place a piece on, in ascending order.
    pub fn territory_cells(&self, slot: PlayerSlot) -> Vec<CellIndex> {
        (0..self.cell_count())
            .filter_map(|i| u16::try_from(i).ok().map(CellIndex))
            .filter(|&cell| self.territory_of(cell) == Territory::Home(slot))
            .collect()
    }

    /// The same cell seen from the other side of the table.
    pub fn rotate(&self, cell: CellIndex) -> Option<CellIndex> {
        if !self.contains(cell) {
            return None;
        }
        let last = u16::try_from(self.cell_count() - 1).ok()?;
        Some(CellIndex(last - cell.0))
    }

    /// The row farthest from `slot`'s own side: where its flag must reach.
    pub fn back_rank_of_opponent(&self, slot: PlayerSlot) -> u16 {
        match slot {
            PlayerSlot::A => self.height.saturating_sub(1),
            PlayerSlot::B => 0,
        }
    }

    pub fn is_on_opponent_back_rank(&self, slot: PlayerSlot, cell: CellIndex) -> bool {
        self.row_col(cell)
            .is_some_and(|(row, _)| row == self.back_rank_of_opponent(slot))
    }

    /// Cells strictly between `from` and `to` when both lie on one row or
    /// one column. `None` if they don't, or if they are the same cell.
    pub fn straight_path(&self, from: CellIndex, to: CellIndex) -> Option<Vec<CellIndex>> {
        let (fr, fc) = self.row_col(from)?;
        let (tr, tc) = self.row_col(to)?;
        if from == to {
            return None;
        }
        if fr == tr {
            let (lo, hi) = (fc.min(tc), fc.max(tc));
            return Some(((lo + 1)..hi).filter_map(|c| self.cell_at(fr, c)).collect());
        }
        if fc == tc {
            let (lo, hi) = (fr.min(tr), fr.max(tr));
            return Some(((lo + 1)..hi).filter_map(|r| self.cell_at(r, fc)).collect());
        }
        None
    }
}
