//! The deductive solver.
//!
//! Works only from what a player could see: revealed numbers, flags, and the
//! total mine count. Each sweep rebuilds the frontier constraints and tries
//! the cheapest deduction kind first:
//!
//! 1. single-cell: a number whose hidden neighbours are all safe or all mines
//! 2. subset: differences of nested constraints, closed over what they derive
//! 3. enumeration: every assignment of each connected component up to
//!    [`SolverConfig::enumeration_ceiling`] cells
//! 4. mine count: enumeration tallies combined with the mines left
//!
//! Findings are applied to the solver's own copy of the field, which opens new
//! numbers, and the next sweep starts again from tier 1. The field is guessless
//! iff the sweeps end with every safe cell revealed.

mod constraint;
mod difficulty;
mod enumerate;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::field::{CellState, Field};
use crate::topology::Coord;

pub use difficulty::{Difficulty, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SolverConfig {
    /// Largest component, in cells, that tier 3 will enumerate. Bigger
    /// components are left unresolved.
    pub enumeration_ceiling: usize,
    /// Cap on constraints derived by subset reasoning in one sweep.
    pub subset_limit: usize,
    /// Use the number of mines left (tier 4).
    pub use_mine_count: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            enumeration_ceiling: 20,
            subset_limit: 2048,
            use_mine_count: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Solvability {
    Guessless,
    RequiresGuess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub solvability: Solvability,
    pub difficulty: Difficulty,
}

impl Verdict {
    pub fn is_guessless(&self) -> bool {
        self.solvability == Solvability::Guessless
    }
}

/// Hidden cells of a snapshot that the solver proves safe or mined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deductions {
    pub safe: BTreeSet<Coord>,
    pub mines: BTreeSet<Coord>,
}

impl Deductions {
    pub fn len(&self) -> usize {
        self.safe.len() + self.mines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.safe.is_empty() && self.mines.is_empty()
    }
}

/// Cells resolved during one sweep, keyed by field index.
#[derive(Debug, Default)]
pub(crate) struct Findings {
    cells: BTreeMap<usize, (bool, Tier)>,
}

impl Findings {
    /// Keeps the first tier that resolved a cell.
    pub fn insert(&mut self, cell: usize, mine: bool, tier: Tier) -> Result<()> {
        match self.cells.get(&cell) {
            Some(&(known, _)) if known != mine => Err(Error::InternalInconsistency(format!(
                "cell #{cell} was deduced both safe and mined"
            ))),
            Some(_) => Ok(()),
            None => {
                self.cells.insert(cell, (mine, tier));
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, cell: usize) -> Option<(bool, Tier)> {
        self.cells.get(&cell).copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (usize, bool, Tier)> + '_ {
        self.cells.iter().map(|(&cell, &(mine, tier))| (cell, mine, tier))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Solver {
    config: SolverConfig,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solves a copy of `field`; the snapshot itself is untouched.
    pub fn solve(&self, field: &Field) -> Result<Verdict> {
        let mut scratch = field.clone();
        self.solve_in_place(&mut scratch)
    }

    /// Like [`Solver::solve`], but gives up with `Ok(None)` once `stop`
    /// returns true. `stop` is polled between sweeps and during enumeration.
    pub fn solve_until(&self, field: &Field, stop: &dyn Fn() -> bool) -> Result<Option<Verdict>> {
        let mut scratch = field.clone();
        self.run(&mut scratch, stop)
    }

    /// Solves `field` itself, leaving every deduction applied to it.
    pub fn solve_in_place(&self, field: &mut Field) -> Result<Verdict> {
        self.run(field, &|| false)?.ok_or_else(|| {
            Error::InternalInconsistency("solver stopped without being asked to".to_string())
        })
    }

    pub fn deductions(&self, field: &Field) -> Result<Deductions> {
        let mut scratch = field.clone();
        self.solve_in_place(&mut scratch)?;
        let solved = scratch.is_solved();

        let mut deductions = Deductions::default();
        for index in 0..field.area() {
            if field.state_at(index) != CellState::Hidden {
                continue;
            }
            let coord = field.coord_of(index);
            match scratch.state_at(index) {
                CellState::Revealed => {
                    deductions.safe.insert(coord);
                }
                CellState::Flagged => {
                    deductions.mines.insert(coord);
                }
                // Every safe cell is open, so whatever is left is a mine.
                CellState::Hidden if solved => {
                    deductions.mines.insert(coord);
                }
                CellState::Hidden => {}
            }
        }
        Ok(deductions)
    }

    fn run(&self, field: &mut Field, stop: &dyn Fn() -> bool) -> Result<Option<Verdict>> {
        if field.is_exploded() {
            return Err(Error::InternalInconsistency(
                "snapshot shows a revealed mine".to_string(),
            ));
        }
        if !field.is_consistent() {
            return Err(Error::InternalInconsistency(
                "snapshot fails its own consistency check".to_string(),
            ));
        }

        let mut difficulty = Difficulty::default();
        while !field.is_solved() {
            if stop() {
                return Ok(None);
            }
            let Some(findings) = self.sweep(field, stop)? else {
                return Ok(None);
            };
            if findings.is_empty() {
                trace!(hidden = field.hidden_count(), "solver stalled");
                break;
            }
            difficulty.sweeps += 1;
            for (index, mine, tier) in findings.iter() {
                // A cascade earlier in this batch may already have opened it.
                if field.state_at(index) != CellState::Hidden {
                    continue;
                }
                if mine != field.is_mine_at(index) {
                    return Err(Error::InternalInconsistency(format!(
                        "deduced {} at {}, but the layout disagrees",
                        if mine { "a mine" } else { "a safe cell" },
                        field.coord_of(index)
                    )));
                }
                if mine {
                    field.mark(index);
                } else {
                    field.open(index);
                }
                difficulty.record(tier, self.config.enumeration_ceiling);
            }
        }

        let solvability = if field.is_solved() {
            Solvability::Guessless
        } else {
            Solvability::RequiresGuess
        };
        Ok(Some(Verdict {
            solvability,
            difficulty,
        }))
    }

    /// One pass over the current frontier. Stops at the first tier that
    /// resolves anything.
    fn sweep(&self, field: &Field, stop: &dyn Fn() -> bool) -> Result<Option<Findings>> {
        let constraints = constraint::frontier(field)?;
        let mut findings = Findings::default();

        constraint::single(&constraints, &mut findings)?;
        if !findings.is_empty() {
            return Ok(Some(findings));
        }

        constraint::subset(&constraints, self.config.subset_limit, &mut findings)?;
        if !findings.is_empty() {
            return Ok(Some(findings));
        }

        let mut parts = Vec::new();
        let mut complete = true;
        for component in enumerate::components(&constraints) {
            if component.len() > self.config.enumeration_ceiling {
                trace!(cells = component.len(), "component exceeds the enumeration ceiling");
                complete = false;
                continue;
            }
            let Some(tally) = enumerate::enumerate(&component, stop) else {
                return Ok(None);
            };
            enumerate::local(&component, &tally, &mut findings)?;
            parts.push((component, tally));
        }
        if !findings.is_empty() || !self.config.use_mine_count || !complete {
            return Ok(Some(findings));
        }

        let mines_left = field
            .mine_count()
            .checked_sub(field.flagged_count())
            .ok_or_else(|| {
                Error::InternalInconsistency(format!(
                    "{} flags on a field with {} mines",
                    field.flagged_count(),
                    field.mine_count()
                ))
            })?;
        let deserted: Vec<usize> = (0..field.area())
            .filter(|&index| field.state_at(index) == CellState::Hidden)
            .filter(|index| {
                !parts
                    .iter()
                    .any(|(component, _)| component.cells.binary_search(index).is_ok())
            })
            .collect();
        enumerate::mine_count(&parts, &deserted, mines_left, &mut findings)?;
        Ok(Some(findings))
    }
}

/// Solves `field` with the default configuration.
pub fn solve(field: &Field) -> Result<Verdict> {
    Solver::default().solve(field)
}
