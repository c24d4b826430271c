use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use super::Findings;
use super::difficulty::Tier;
use crate::error::{Error, Result};
use crate::field::{CellState, Field};

/// Where a constraint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Origin {
    /// The number shown on this revealed cell.
    Cell(usize),
    /// The difference of two constraints in a subset relation.
    Derived,
}

/// Exactly `mines` of `cells` are mines.
///
/// `cells` holds field indices of hidden, unflagged cells, sorted and never
/// empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Constraint {
    pub cells: Vec<usize>,
    pub mines: usize,
    pub origin: Origin,
}

impl Constraint {
    /// `Some(true)` when every cell must be a mine, `Some(false)` when every
    /// cell must be safe.
    pub fn resolution(&self) -> Option<bool> {
        if self.mines == 0 {
            Some(false)
        } else if self.mines == self.cells.len() {
            Some(true)
        } else {
            None
        }
    }

    /// Proper-or-equal subset test on the sorted cell lists.
    pub fn is_subset_of(&self, other: &Constraint) -> bool {
        self.cells.len() <= other.cells.len()
            && self
                .cells
                .iter()
                .all(|cell| other.cells.binary_search(cell).is_ok())
    }

    /// `self - other`, for `other` a subset of `self`.
    fn without(&self, other: &Constraint) -> Result<Constraint> {
        let mines = self.mines.checked_sub(other.mines).ok_or_else(|| {
            Error::InternalInconsistency(format!(
                "nested constraints need {} mines inside {} but only {} around them",
                other.mines, other.cells.len(), self.mines
            ))
        })?;
        let cells: Vec<usize> = self
            .cells
            .iter()
            .copied()
            .filter(|cell| other.cells.binary_search(cell).is_err())
            .collect();
        if mines > cells.len() {
            return Err(Error::InternalInconsistency(format!(
                "derived constraint needs {mines} mines among {} cells",
                cells.len()
            )));
        }
        Ok(Constraint {
            cells,
            mines,
            origin: Origin::Derived,
        })
    }
}

/// One constraint per revealed number that still touches a hidden cell.
///
/// Flagged neighbours count as known mines. Constraints with identical cell
/// sets are merged; the result is sorted by cell list.
pub(crate) fn frontier(field: &Field) -> Result<Vec<Constraint>> {
    let mut constraints = Vec::new();
    for index in 0..field.area() {
        if field.state_at(index) != CellState::Revealed || field.is_mine_at(index) {
            continue;
        }
        let number = usize::from(field.number_at(index));
        let mut flagged = 0;
        let mut cells = Vec::new();
        for neighbor in field.neighbor_indices(index) {
            match field.state_at(neighbor) {
                CellState::Hidden => cells.push(neighbor),
                CellState::Flagged => flagged += 1,
                CellState::Revealed => {}
            }
        }
        let at = field.coord_of(index);
        let mines = number.checked_sub(flagged).ok_or_else(|| {
            Error::InternalInconsistency(format!("{at} shows {number} but has {flagged} flags"))
        })?;
        if mines > cells.len() {
            return Err(Error::InternalInconsistency(format!(
                "{at} needs {mines} more mines but only {} hidden neighbours remain",
                cells.len()
            )));
        }
        if cells.is_empty() {
            continue;
        }
        cells.sort_unstable();
        constraints.push(Constraint {
            cells,
            mines,
            origin: Origin::Cell(index),
        });
    }

    constraints.sort_by(|a, b| a.cells.cmp(&b.cells).then(a.origin.cmp(&b.origin)));
    let mut merged: Vec<Constraint> = Vec::with_capacity(constraints.len());
    for constraint in constraints {
        match merged.last() {
            Some(last) if last.cells == constraint.cells => {
                if last.mines != constraint.mines {
                    let shown_by = |origin| match origin {
                        Origin::Cell(index) => field.coord_of(index).to_string(),
                        Origin::Derived => "a derived constraint".to_string(),
                    };
                    return Err(Error::InternalInconsistency(format!(
                        "{} and {} disagree about the same {} cells",
                        shown_by(last.origin),
                        shown_by(constraint.origin),
                        constraint.cells.len()
                    )));
                }
            }
            _ => merged.push(constraint),
        }
    }
    Ok(merged)
}

/// Single-cell deduction: constraints that are all-safe or all-mine.
pub(crate) fn single(constraints: &[Constraint], findings: &mut Findings) -> Result<()> {
    for constraint in constraints {
        if let Some(mine) = constraint.resolution() {
            for &cell in &constraint.cells {
                findings.insert(cell, mine, Tier::Single)?;
            }
        }
    }
    Ok(())
}

/// Subset deduction closed over its own derived constraints.
///
/// Whenever one constraint's cells sit inside another's, the difference is a
/// new constraint. Derived constraints join the pool and are compared against
/// everything else until the pool stops growing, a derived constraint
/// resolves, or `limit` constraints have been derived. Returns as soon as a
/// pass over one constraint yields findings.
///
/// Returns how many new differences were dropped because `limit` was
/// reached. Past that point the closure is incomplete.
pub(crate) fn subset(
    constraints: &[Constraint],
    limit: usize,
    findings: &mut Findings,
) -> Result<usize> {
    let mut pool: Vec<Constraint> = constraints.to_vec();
    let mut known: BTreeMap<Vec<usize>, usize> = pool
        .iter()
        .map(|constraint| (constraint.cells.clone(), constraint.mines))
        .collect();
    let mut by_cell: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (id, constraint) in pool.iter().enumerate() {
        for &cell in &constraint.cells {
            by_cell.entry(cell).or_default().push(id);
        }
    }

    let mut derived = 0;
    let mut dropped = 0;
    let mut next = 0;
    while next < pool.len() {
        let overlapping: BTreeSet<usize> = pool[next]
            .cells
            .iter()
            .filter_map(|cell| by_cell.get(cell))
            .flatten()
            .copied()
            .filter(|&other| other != next)
            .collect();

        for other in overlapping {
            let (big, small) = if pool[next].is_subset_of(&pool[other]) {
                (&pool[other], &pool[next])
            } else if pool[other].is_subset_of(&pool[next]) {
                (&pool[next], &pool[other])
            } else {
                continue;
            };
            let difference = big.without(small)?;
            if difference.cells.is_empty() {
                continue;
            }
            if let Some(mine) = difference.resolution() {
                for &cell in &difference.cells {
                    findings.insert(cell, mine, Tier::Subset)?;
                }
                continue;
            }
            match known.get(&difference.cells) {
                Some(&mines) if mines != difference.mines => {
                    return Err(Error::InternalInconsistency(format!(
                        "subset reasoning gives {} cells both {mines} and {} mines",
                        difference.cells.len(),
                        difference.mines
                    )));
                }
                Some(_) => {}
                None if derived < limit => {
                    derived += 1;
                    let id = pool.len();
                    for &cell in &difference.cells {
                        by_cell.entry(cell).or_default().push(id);
                    }
                    known.insert(difference.cells.clone(), difference.mines);
                    pool.push(difference);
                }
                None => dropped += 1,
            }
        }

        if !findings.is_empty() {
            trace!(derived, dropped, "subset pass resolved cells");
            return Ok(dropped);
        }
        next += 1;
    }
    if dropped > 0 {
        trace!(limit, dropped, "subset limit reached, closure incomplete");
    }
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldParams;
    use crate::topology::{Coord, Topology};

    fn constraint(cells: &[usize], mines: usize) -> Constraint {
        Constraint {
            cells: cells.to_vec(),
            mines,
            origin: Origin::Derived,
        }
    }

    #[test]
    fn test_resolution() {
        assert_eq!(constraint(&[1, 2], 0).resolution(), Some(false));
        assert_eq!(constraint(&[1, 2], 2).resolution(), Some(true));
        assert_eq!(constraint(&[1, 2], 1).resolution(), None);
    }

    #[test]
    fn test_frontier_of_a_simple_row() {
        // One row, mine at column 3: numbers 1 at columns 2 and 4 after revealing.
        let params = FieldParams::new(5, 1, 1, Topology::Moore, Coord::new(0, 0)).unwrap();
        let field = Field::new(params, &[Coord::new(0, 3)]).unwrap();
        let constraints = frontier(&field).unwrap();

        // Only column 2 is revealed next to the mine; it sees one hidden cell.
        assert_eq!(constraints, vec![Constraint {
            cells: vec![3],
            mines: 1,
            origin: Origin::Cell(2),
        }]);
    }

    #[test]
    fn test_frontier_counts_flags_as_mines() {
        let params = FieldParams::new(5, 1, 1, Topology::Moore, Coord::new(0, 0)).unwrap();
        let mut field = Field::new(params, &[Coord::new(0, 3)]).unwrap();
        field.flag(Coord::new(0, 3)).unwrap();
        assert!(frontier(&field).unwrap().is_empty());

        // Two flags around a 1.
        let params = FieldParams::new(5, 2, 1, Topology::Moore, Coord::new(0, 0)).unwrap();
        let mut field = Field::new(params, &[Coord::new(0, 4)]).unwrap();
        field.flag(Coord::new(0, 4)).unwrap();
        field.flag(Coord::new(1, 4)).unwrap();
        assert!(matches!(
            frontier(&field),
            Err(Error::InternalInconsistency(_))
        ));
    }

    #[test]
    fn test_subset_difference_resolves() {
        // {1, 2} holds one mine and {1, 2, 3} holds one mine: 3 is safe.
        let constraints = vec![constraint(&[1, 2], 1), constraint(&[1, 2, 3], 1)];
        let mut findings = Findings::default();
        subset(&constraints, 16, &mut findings).unwrap();
        assert_eq!(findings.get(3), Some((false, Tier::Subset)));
        assert_eq!(findings.len(), 1);

        // {1, 2} holds one mine and {1, 2, 3, 4} holds three: 3 and 4 are mines.
        let constraints = vec![constraint(&[1, 2], 1), constraint(&[1, 2, 3, 4], 3)];
        let mut findings = Findings::default();
        subset(&constraints, 16, &mut findings).unwrap();
        assert_eq!(findings.get(3), Some((true, Tier::Subset)));
        assert_eq!(findings.get(4), Some((true, Tier::Subset)));
    }

    #[test]
    fn test_subset_chains_through_derived_constraints() {
        // {1,2,3,4}=2 minus {1,2}=1 derives {3,4}=1, which nests in {3,4,5}=1.
        let constraints = vec![
            constraint(&[1, 2], 1),
            constraint(&[1, 2, 3, 4], 2),
            constraint(&[3, 4, 5], 1),
        ];
        let mut findings = Findings::default();
        assert_eq!(subset(&constraints, 16, &mut findings).unwrap(), 0);
        assert_eq!(findings.get(5), Some((false, Tier::Subset)));

        // With derivation disabled the chain never forms, and the cut is counted.
        let mut findings = Findings::default();
        let dropped = subset(&constraints, 0, &mut findings).unwrap();
        assert!(findings.is_empty());
        assert!(dropped > 0);
    }

    #[test]
    fn test_subset_detects_contradictions() {
        let constraints = vec![constraint(&[1, 2], 2), constraint(&[1, 2, 3], 1)];
        let mut findings = Findings::default();
        assert!(matches!(
            subset(&constraints, 16, &mut findings),
            Err(Error::InternalInconsistency(_))
        ));
    }
}
