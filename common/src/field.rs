//! The minefield: a decided mine layout plus the visible reveal/flag state.
//!
//! The layout is the only authority. Numbers are derived from it once at
//! construction and kept alongside as a cache; `is_consistent` re-derives them
//! to check that nothing drifted.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, MoveError, Result};
use crate::topology::{Coord, Topology};

/// The shape of a board request, validated once and reused for every trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldParams {
    width: usize,
    height: usize,
    mine_count: usize,
    topology: Topology,
    start: Coord,
}

impl FieldParams {
    pub fn new(
        width: usize,
        height: usize,
        mine_count: usize,
        topology: Topology,
        start: Coord,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameters(format!(
                "field dimensions must be positive, got {width}x{height}"
            )));
        }
        if start.row >= height || start.col >= width {
            return Err(Error::InvalidParameters(format!(
                "start {start} lies outside a {width}x{height} field"
            )));
        }
        let area = width.checked_mul(height).ok_or_else(|| {
            Error::InvalidParameters(format!("{width}x{height} overflows the cell count"))
        })?;
        let clearance = topology.closed_neighborhood(start, width, height).count();
        let capacity = area - clearance;
        if mine_count > capacity {
            return Err(Error::InvalidParameters(format!(
                "{mine_count} mines do not fit in the {capacity} cells outside the start area"
            )));
        }
        Ok(Self {
            width,
            height,
            mine_count,
            topology,
            start,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn mine_count(&self) -> usize {
        self.mine_count
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn start(&self) -> Coord {
        self.start
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.row < self.height && coord.col < self.width
    }

    pub(crate) fn index(&self, coord: Coord) -> usize {
        coord.row * self.width + coord.col
    }

    pub(crate) fn coord(&self, index: usize) -> Coord {
        Coord::new(index / self.width, index % self.width)
    }

    /// Indices of the start cell and its neighbours, which never hold a mine.
    pub(crate) fn start_area(&self) -> Vec<usize> {
        self.topology
            .closed_neighborhood(self.start, self.width, self.height)
            .map(|coord| self.index(coord))
            .collect()
    }
}

/// Whether a cell has been touched by the player (or the solver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    Hidden,
    Flagged,
    Revealed,
}

/// What a cell shows from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cell {
    Hidden,
    Flagged,
    Number(u8),
    Mine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    Safe(u8),
    Mine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    params: FieldParams,
    mines: Vec<bool>,
    states: Vec<CellState>,
    #[serde(skip)]
    numbers: Vec<u8>,
    revealed: usize,
    flagged: usize,
    exploded: bool,
}

impl Field {
    /// Builds a field from a decided layout and opens the start cell.
    ///
    /// The layout must hold exactly `params.mine_count()` distinct in-bounds
    /// cells, none of them in the start neighbourhood.
    pub fn new(params: FieldParams, mines: &[Coord]) -> Result<Self> {
        if mines.len() != params.mine_count {
            return Err(Error::InvalidParameters(format!(
                "layout holds {} mines, expected {}",
                mines.len(),
                params.mine_count
            )));
        }
        let mut layout = vec![false; params.area()];
        for &mine in mines {
            if !params.contains(mine) {
                return Err(Error::InvalidParameters(format!(
                    "mine at {mine} lies outside the field"
                )));
            }
            let slot = &mut layout[params.index(mine)];
            if *slot {
                return Err(Error::InvalidParameters(format!("mine at {mine} is listed twice")));
            }
            *slot = true;
        }
        if let Some(index) = params.start_area().into_iter().find(|&index| layout[index]) {
            return Err(Error::InvalidParameters(format!(
                "mine at {} touches the start cell",
                params.coord(index)
            )));
        }
        Ok(Self::from_layout(params, layout))
    }

    /// Trusted constructor for the generator, which already upholds every
    /// layout invariant.
    pub(crate) fn from_layout(params: FieldParams, mines: Vec<bool>) -> Self {
        let area = params.area();
        let mut field = Self {
            params,
            mines,
            states: vec![CellState::Hidden; area],
            numbers: Vec::new(),
            revealed: 0,
            flagged: 0,
            exploded: false,
        };
        field.numbers = field.count_numbers();
        let start = params.index(params.start);
        field.open(start);
        field
    }

    fn count_numbers(&self) -> Vec<u8> {
        (0..self.params.area())
            .map(|index| {
                self.neighbor_indices(index)
                    .filter(|&neighbor| self.mines[neighbor])
                    .count() as u8
            })
            .collect()
    }

    pub fn params(&self) -> &FieldParams {
        &self.params
    }

    pub fn width(&self) -> usize {
        self.params.width
    }

    pub fn height(&self) -> usize {
        self.params.height
    }

    pub fn mine_count(&self) -> usize {
        self.params.mine_count
    }

    pub fn topology(&self) -> Topology {
        self.params.topology
    }

    pub fn start(&self) -> Coord {
        self.params.start
    }

    /// Every coordinate in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = Coord> + '_ {
        (0..self.params.area()).map(|index| self.params.coord(index))
    }

    pub fn neighbors_of(&self, coord: Coord) -> impl Iterator<Item = Coord> {
        self.params
            .topology
            .neighbors(coord, self.params.width, self.params.height)
    }

    pub(crate) fn neighbor_indices(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.neighbors_of(self.params.coord(index))
            .map(|coord| self.params.index(coord))
    }

    pub(crate) fn area(&self) -> usize {
        self.params.area()
    }

    pub(crate) fn coord_of(&self, index: usize) -> Coord {
        self.params.coord(index)
    }

    fn checked_index(&self, coord: Coord) -> std::result::Result<usize, MoveError> {
        if self.params.contains(coord) {
            Ok(self.params.index(coord))
        } else {
            Err(MoveError::OutOfBounds(coord))
        }
    }

    /// The true mine positions, in row-major order.
    pub fn mines(&self) -> impl Iterator<Item = Coord> + '_ {
        self.mines
            .iter()
            .enumerate()
            .filter(|&(_, &mine)| mine)
            .map(|(index, _)| self.params.coord(index))
    }

    /// Whether `coord` holds a mine. Out-of-bounds cells hold none.
    pub fn is_mine(&self, coord: Coord) -> bool {
        self.params.contains(coord) && self.mines[self.params.index(coord)]
    }

    pub(crate) fn is_mine_at(&self, index: usize) -> bool {
        self.mines[index]
    }

    /// Mines among the neighbours of `coord`, whatever its visible state.
    pub fn adjacent_mines(&self, coord: Coord) -> u8 {
        if self.params.contains(coord) {
            self.numbers[self.params.index(coord)]
        } else {
            0
        }
    }

    pub(crate) fn number_at(&self, index: usize) -> u8 {
        self.numbers[index]
    }

    pub fn state(&self, coord: Coord) -> Option<CellState> {
        self.params
            .contains(coord)
            .then(|| self.states[self.params.index(coord)])
    }

    pub(crate) fn state_at(&self, index: usize) -> CellState {
        self.states[index]
    }

    /// The visible view of a cell, or `None` outside the field.
    pub fn cell(&self, coord: Coord) -> Option<Cell> {
        if !self.params.contains(coord) {
            return None;
        }
        let index = self.params.index(coord);
        Some(match self.states[index] {
            CellState::Hidden => Cell::Hidden,
            CellState::Flagged => Cell::Flagged,
            CellState::Revealed if self.mines[index] => Cell::Mine,
            CellState::Revealed => Cell::Number(self.numbers[index]),
        })
    }

    /// Reveals a hidden cell. A zero cascades through its neighbourhood,
    /// stopping at flags.
    pub fn reveal(&mut self, coord: Coord) -> std::result::Result<RevealOutcome, MoveError> {
        let index = self.checked_index(coord)?;
        match self.states[index] {
            CellState::Revealed => Err(MoveError::AlreadyRevealed(coord)),
            CellState::Flagged => Err(MoveError::Flagged(coord)),
            CellState::Hidden => Ok(self.open(index)),
        }
    }

    /// Reveals a cell known to be hidden.
    pub(crate) fn open(&mut self, index: usize) -> RevealOutcome {
        self.states[index] = CellState::Revealed;
        self.revealed += 1;
        if self.mines[index] {
            self.exploded = true;
            return RevealOutcome::Mine;
        }
        let number = self.numbers[index];
        if number == 0 {
            self.cascade(index);
        }
        RevealOutcome::Safe(number)
    }

    fn cascade(&mut self, origin: usize) {
        let mut queue = VecDeque::from([origin]);
        while let Some(index) = queue.pop_front() {
            let hidden: Vec<usize> = self
                .neighbor_indices(index)
                .filter(|&neighbor| self.states[neighbor] == CellState::Hidden)
                .collect();
            for neighbor in hidden {
                // Neighbours of a zero are never mines.
                self.states[neighbor] = CellState::Revealed;
                self.revealed += 1;
                if self.numbers[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }
    }

    pub fn flag(&mut self, coord: Coord) -> std::result::Result<(), MoveError> {
        let index = self.checked_index(coord)?;
        match self.states[index] {
            CellState::Revealed => Err(MoveError::AlreadyRevealed(coord)),
            CellState::Flagged => Ok(()),
            CellState::Hidden => {
                self.mark(index);
                Ok(())
            }
        }
    }

    pub(crate) fn mark(&mut self, index: usize) {
        self.states[index] = CellState::Flagged;
        self.flagged += 1;
    }

    pub fn unflag(&mut self, coord: Coord) -> std::result::Result<(), MoveError> {
        let index = self.checked_index(coord)?;
        match self.states[index] {
            CellState::Flagged => {
                self.states[index] = CellState::Hidden;
                self.flagged -= 1;
                Ok(())
            }
            _ => Err(MoveError::NotFlagged(coord)),
        }
    }

    /// Flags a hidden cell or unflags a flagged one. Returns whether the cell
    /// ends up flagged.
    pub fn toggle_flag(&mut self, coord: Coord) -> std::result::Result<bool, MoveError> {
        match self.state(coord) {
            None => Err(MoveError::OutOfBounds(coord)),
            Some(CellState::Flagged) => self.unflag(coord).map(|()| false),
            Some(_) => self.flag(coord).map(|()| true),
        }
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed
    }

    pub fn flagged_count(&self) -> usize {
        self.flagged
    }

    pub fn hidden_count(&self) -> usize {
        self.params.area() - self.revealed - self.flagged
    }

    /// Mines minus flags. Negative when the player over-flags.
    pub fn flags_left(&self) -> isize {
        self.params.mine_count as isize - self.flagged as isize
    }

    /// Every safe cell is revealed.
    pub fn is_solved(&self) -> bool {
        !self.exploded && self.revealed == self.params.area() - self.params.mine_count
    }

    pub fn is_exploded(&self) -> bool {
        self.exploded
    }

    /// Re-derives everything the visible numbers depend on and compares it
    /// with what the field carries.
    pub fn is_consistent(&self) -> bool {
        let area = self.params.area();
        if self.mines.len() != area || self.states.len() != area || self.numbers.len() != area {
            return false;
        }
        if self.mines.iter().filter(|&&mine| mine).count() != self.params.mine_count {
            return false;
        }
        if self.params.start_area().into_iter().any(|index| self.mines[index]) {
            return false;
        }
        let count = |wanted| self.states.iter().filter(|&&state| state == wanted).count();
        if count(CellState::Revealed) != self.revealed
            || count(CellState::Flagged) != self.flagged
        {
            return false;
        }
        let exploded = (0..area).any(|index| {
            self.mines[index] && self.states[index] == CellState::Revealed
        });
        if exploded != self.exploded {
            return false;
        }
        (0..area)
            .filter(|&index| self.states[index] == CellState::Revealed && !self.mines[index])
            .all(|index| {
                let actual = self
                    .neighbor_indices(index)
                    .filter(|&neighbor| self.mines[neighbor])
                    .count();
                actual == usize::from(self.numbers[index])
            })
    }

    /// Serializes the field for handoff to a game session.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bcs::to_bytes(self)?)
    }

    /// Restores a field handed off by [`Field::to_bytes`] and checks it.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut field: Field = bcs::from_bytes(bytes)?;
        let params = field.params;
        // Re-run the request validation; the serialized params bypassed it.
        FieldParams::new(
            params.width,
            params.height,
            params.mine_count,
            params.topology,
            params.start,
        )?;
        if field.mines.len() != params.area() {
            anyhow::bail!(
                "layout covers {} cells, expected {}",
                field.mines.len(),
                params.area()
            );
        }
        field.numbers = field.count_numbers();
        if !field.is_consistent() {
            anyhow::bail!("field bytes violate the field invariants");
        }
        Ok(field)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.params.height {
            if self.params.topology == Topology::Hexagonal && row % 2 == 1 {
                f.write_str(" ")?;
            }
            for col in 0..self.params.width {
                let index = self.params.index(Coord::new(row, col));
                let glyph = match self.states[index] {
                    CellState::Hidden => '#',
                    CellState::Flagged => 'F',
                    CellState::Revealed if self.mines[index] => '*',
                    CellState::Revealed if self.numbers[index] == 0 => '.',
                    CellState::Revealed => char::from(b'0' + self.numbers[index]),
                };
                if col > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{glyph}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(width: usize, height: usize, mines: usize, start: Coord) -> FieldParams {
        FieldParams::new(width, height, mines, Topology::Moore, start).unwrap()
    }

    #[test]
    fn test_params_validation() {
        // Zero dimensions.
        assert!(matches!(
            FieldParams::new(0, 5, 1, Topology::Moore, Coord::new(0, 0)),
            Err(Error::InvalidParameters(_))
        ));

        // Start outside the board.
        assert!(matches!(
            FieldParams::new(5, 5, 1, Topology::Moore, Coord::new(5, 0)),
            Err(Error::InvalidParameters(_))
        ));

        // A 3x3 Moore board started in the middle has no room for a single mine.
        assert!(matches!(
            FieldParams::new(3, 3, 1, Topology::Moore, Coord::new(1, 1)),
            Err(Error::InvalidParameters(_))
        ));

        // Started in a corner, five cells remain.
        assert!(FieldParams::new(3, 3, 5, Topology::Moore, Coord::new(0, 0)).is_ok());
        assert!(FieldParams::new(3, 3, 6, Topology::Moore, Coord::new(0, 0)).is_err());
    }

    #[test]
    fn test_new_rejects_bad_layouts() {
        let p = params(4, 4, 2, Coord::new(0, 0));

        // Wrong count.
        assert!(Field::new(p, &[Coord::new(3, 3)]).is_err());
        // Duplicate.
        assert!(Field::new(p, &[Coord::new(3, 3), Coord::new(3, 3)]).is_err());
        // Out of bounds.
        assert!(Field::new(p, &[Coord::new(3, 3), Coord::new(4, 0)]).is_err());
        // Touches the start.
        assert!(Field::new(p, &[Coord::new(3, 3), Coord::new(1, 1)]).is_err());

        assert!(Field::new(p, &[Coord::new(3, 3), Coord::new(3, 2)]).is_ok());
    }

    #[test]
    fn test_start_reveal_cascades() {
        // A single mine in the far corner: the zero region opens everything else.
        let p = params(4, 4, 1, Coord::new(0, 0));
        let field = Field::new(p, &[Coord::new(3, 3)]).unwrap();

        assert_eq!(field.revealed_count(), 15);
        assert_eq!(field.cell(Coord::new(3, 3)), Some(Cell::Hidden));
        assert_eq!(field.cell(Coord::new(2, 2)), Some(Cell::Number(1)));
        assert_eq!(field.cell(Coord::new(0, 0)), Some(Cell::Number(0)));
        assert!(field.is_solved());
        assert!(field.is_consistent());
    }

    #[test]
    fn test_cascade_stops_at_flags() {
        // One row: the mine at column 3 splits the row into two zero regions.
        let p = FieldParams::new(7, 1, 1, Topology::Moore, Coord::new(0, 0)).unwrap();
        let mut field = Field::new(p, &[Coord::new(0, 3)]).unwrap();
        assert_eq!(field.revealed_count(), 3);

        field.flag(Coord::new(0, 5)).unwrap();
        assert_eq!(field.reveal(Coord::new(0, 6)), Ok(RevealOutcome::Safe(0)));

        // The flag blocks the cascade towards the mine.
        assert_eq!(field.revealed_count(), 4);
        assert_eq!(field.cell(Coord::new(0, 4)), Some(Cell::Hidden));

        field.unflag(Coord::new(0, 5)).unwrap();
        assert_eq!(field.reveal(Coord::new(0, 5)), Ok(RevealOutcome::Safe(0)));
        assert_eq!(field.cell(Coord::new(0, 4)), Some(Cell::Number(1)));
        assert!(field.is_solved());
    }

    #[test]
    fn test_reveal_contract_violations() {
        let p = params(4, 4, 1, Coord::new(0, 0));
        let mut field = Field::new(p, &[Coord::new(3, 3)]).unwrap();

        assert_eq!(
            field.reveal(Coord::new(0, 0)),
            Err(MoveError::AlreadyRevealed(Coord::new(0, 0)))
        );
        assert_eq!(
            field.reveal(Coord::new(9, 9)),
            Err(MoveError::OutOfBounds(Coord::new(9, 9)))
        );

        field.flag(Coord::new(3, 3)).unwrap();
        assert_eq!(
            field.reveal(Coord::new(3, 3)),
            Err(MoveError::Flagged(Coord::new(3, 3)))
        );
        assert_eq!(
            field.flag(Coord::new(1, 1)),
            Err(MoveError::AlreadyRevealed(Coord::new(1, 1)))
        );
    }

    #[test]
    fn test_reveal_mine_explodes() {
        let p = params(4, 1, 1, Coord::new(0, 0));
        let mut field = Field::new(p, &[Coord::new(0, 3)]).unwrap();

        assert_eq!(field.reveal(Coord::new(0, 3)), Ok(RevealOutcome::Mine));
        assert!(field.is_exploded());
        assert!(!field.is_solved());
        assert_eq!(field.cell(Coord::new(0, 3)), Some(Cell::Mine));
        // A lost game is still a consistent field.
        assert!(field.is_consistent());
    }

    #[test]
    fn test_flag_bookkeeping() {
        let p = params(5, 5, 2, Coord::new(0, 0));
        let mut field = Field::new(p, &[Coord::new(4, 4), Coord::new(4, 3)]).unwrap();
        let hidden = field.hidden_count();

        assert_eq!(field.toggle_flag(Coord::new(4, 4)), Ok(true));
        assert_eq!(field.toggle_flag(Coord::new(4, 3)), Ok(true));
        assert_eq!(field.flags_left(), 0);
        assert_eq!(field.hidden_count(), hidden - 2);

        assert_eq!(field.toggle_flag(Coord::new(4, 4)), Ok(false));
        assert_eq!(field.flags_left(), 1);
        assert_eq!(
            field.unflag(Coord::new(4, 4)),
            Err(MoveError::NotFlagged(Coord::new(4, 4)))
        );
        assert!(field.is_consistent());
    }

    #[test]
    fn test_numbers_follow_topology() {
        let mines = [Coord::new(2, 2)];
        for (topology, touching) in [
            (Topology::VonNeumann, 4),
            (Topology::Hexagonal, 6),
            (Topology::Moore, 8),
        ] {
            let p = FieldParams::new(5, 5, 1, topology, Coord::new(0, 4)).unwrap();
            let field = Field::new(p, &mines).unwrap();
            let numbered = field
                .coords()
                .filter(|&coord| field.adjacent_mines(coord) == 1)
                .count();
            assert_eq!(numbered, touching, "{topology}");
        }
    }

    #[test]
    fn test_bytes_handoff_revalidates() {
        let p = params(6, 6, 3, Coord::new(0, 0));
        let field = Field::new(p, &[Coord::new(5, 5), Coord::new(4, 5), Coord::new(5, 3)]).unwrap();

        let bytes = field.to_bytes().unwrap();
        let restored = Field::from_bytes(&bytes).unwrap();
        assert_eq!(restored, field);

        // Corrupt the layout so the mine count no longer matches.
        let mut tampered = field.clone();
        tampered.mines[35] = false;
        let bytes = bcs::to_bytes(&tampered).unwrap();
        assert!(Field::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_display_marks_cells() {
        let p = params(3, 2, 1, Coord::new(0, 0));
        let field = Field::new(p, &[Coord::new(1, 2)]).unwrap();
        assert_eq!(field.to_string(), ". 1 #\n. 1 #\n");
    }
}
