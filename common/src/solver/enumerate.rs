//! Bounded exhaustive reasoning over connected groups of frontier cells.
//!
//! Two hidden cells are connected when some constraint mentions both. Each
//! component is enumerated on its own, and the per-mine-count tallies it
//! produces feed both the per-component verdict and the global mine-count
//! reasoning.

use std::collections::BTreeMap;

use super::Findings;
use super::constraint::Constraint;
use super::difficulty::Tier;
use crate::error::{Error, Result};

/// How many search nodes are expanded between polls of the stop signal.
const STOP_POLL_INTERVAL: u64 = 4096;

/// A connected group of hidden cells and the constraints over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Component {
    /// Field indices, sorted. A cell's variable id is its position here.
    pub cells: Vec<usize>,
    /// Constraints rewritten over variable ids.
    constraints: Vec<(Vec<usize>, usize)>,
}

impl Component {
    pub fn len(&self) -> usize {
        self.cells.len()
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[a.max(b)] = a.min(b);
        }
    }
}

/// Splits the frontier into independent components, ordered by their
/// smallest cell.
pub(crate) fn components(constraints: &[Constraint]) -> Vec<Component> {
    let cells: Vec<usize> = {
        let mut all: Vec<usize> = constraints
            .iter()
            .flat_map(|constraint| constraint.cells.iter().copied())
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    };
    let slot = |cell: usize| cells.binary_search(&cell).unwrap_or_default();

    let mut sets = DisjointSet::new(cells.len());
    for constraint in constraints {
        let first = slot(constraint.cells[0]);
        for &cell in &constraint.cells[1..] {
            sets.union(first, slot(cell));
        }
    }

    // Roots are the smallest slot of their set, so the map iterates in order
    // of each component's smallest cell.
    let mut grouped: BTreeMap<usize, (Vec<usize>, Vec<&Constraint>)> = BTreeMap::new();
    for (position, &cell) in cells.iter().enumerate() {
        let root = sets.find(position);
        grouped.entry(root).or_default().0.push(cell);
    }
    for constraint in constraints {
        let root = sets.find(slot(constraint.cells[0]));
        grouped.entry(root).or_default().1.push(constraint);
    }

    grouped
        .into_values()
        .map(|(cells, members)| {
            let constraints = members
                .into_iter()
                .map(|constraint| {
                    let vars = constraint
                        .cells
                        .iter()
                        .map(|cell| cells.binary_search(cell).unwrap_or_default())
                        .collect();
                    (vars, constraint.mines)
                })
                .collect();
            Component { cells, constraints }
        })
        .collect()
}

/// Consistent assignments of one component, bucketed by mine count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tally {
    /// `solutions[k]`: assignments placing exactly `k` mines.
    pub solutions: Vec<u64>,
    /// `hits[k][var]`: how many of those put a mine on `var`.
    pub hits: Vec<Vec<u64>>,
}

impl Tally {
    fn new(vars: usize) -> Self {
        Self {
            solutions: vec![0; vars + 1],
            hits: vec![vec![0; vars]; vars + 1],
        }
    }

    #[cfg(test)]
    pub fn total(&self) -> u64 {
        self.solutions.iter().sum()
    }

    /// Mine totals this component can take on its own.
    pub fn feasible_counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.solutions
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(mines, _)| mines)
    }

    /// Records cells that take the same value in every assignment whose mine
    /// count passes `allowed`.
    fn forced(
        &self,
        component: &Component,
        allowed: impl Fn(usize) -> bool,
        tier: Tier,
        findings: &mut Findings,
    ) -> Result<()> {
        let counts: Vec<usize> = (0..self.solutions.len())
            .filter(|&mines| self.solutions[mines] > 0 && allowed(mines))
            .collect();
        let total: u64 = counts.iter().map(|&mines| self.solutions[mines]).sum();
        if total == 0 {
            return Err(Error::InternalInconsistency(format!(
                "no assignment of {} connected cells satisfies the visible numbers",
                component.len()
            )));
        }
        for (var, &cell) in component.cells.iter().enumerate() {
            let hits: u64 = counts.iter().map(|&mines| self.hits[mines][var]).sum();
            if hits == 0 {
                findings.insert(cell, false, tier)?;
            } else if hits == total {
                findings.insert(cell, true, tier)?;
            }
        }
        Ok(())
    }
}

struct Search<'a> {
    order: Vec<usize>,
    var_constraints: Vec<Vec<usize>>,
    required: Vec<usize>,
    placed: Vec<usize>,
    open: Vec<usize>,
    assignment: Vec<bool>,
    mines: usize,
    tally: Tally,
    nodes: u64,
    stop: &'a dyn Fn() -> bool,
    stopped: bool,
}

impl<'a> Search<'a> {
    fn new(component: &Component, stop: &'a dyn Fn() -> bool) -> Self {
        let vars = component.len();
        let mut var_constraints = vec![Vec::new(); vars];
        let mut order = Vec::with_capacity(vars);
        let mut seen = vec![false; vars];
        for (id, (members, _)) in component.constraints.iter().enumerate() {
            for &var in members {
                var_constraints[var].push(id);
                // Visit variables constraint by constraint so that each
                // constraint closes as early as possible.
                if !seen[var] {
                    seen[var] = true;
                    order.push(var);
                }
            }
        }
        Self {
            order,
            var_constraints,
            required: component.constraints.iter().map(|&(_, mines)| mines).collect(),
            placed: vec![0; component.constraints.len()],
            open: component
                .constraints
                .iter()
                .map(|(members, _)| members.len())
                .collect(),
            assignment: vec![false; vars],
            mines: 0,
            tally: Tally::new(vars),
            nodes: 0,
            stop,
            stopped: false,
        }
    }

    fn feasible(&self, constraint: usize) -> bool {
        self.placed[constraint] <= self.required[constraint]
            && self.placed[constraint] + self.open[constraint] >= self.required[constraint]
    }

    fn set(&mut self, var: usize, mine: bool) -> bool {
        self.assignment[var] = mine;
        self.mines += usize::from(mine);
        let mut ok = true;
        for &id in &self.var_constraints[var] {
            self.open[id] -= 1;
            self.placed[id] += usize::from(mine);
            ok &= self.placed[id] <= self.required[id]
                && self.placed[id] + self.open[id] >= self.required[id];
        }
        ok
    }

    fn unset(&mut self, var: usize, mine: bool) {
        self.assignment[var] = false;
        self.mines -= usize::from(mine);
        for &id in &self.var_constraints[var] {
            self.open[id] += 1;
            self.placed[id] -= usize::from(mine);
        }
    }

    fn descend(&mut self, depth: usize) {
        self.nodes += 1;
        if self.nodes % STOP_POLL_INTERVAL == 0 && (self.stop)() {
            self.stopped = true;
        }
        if self.stopped {
            return;
        }
        let Some(&var) = self.order.get(depth) else {
            debug_assert!((0..self.required.len()).all(|id| self.feasible(id)));
            self.tally.solutions[self.mines] += 1;
            for (var, &mine) in self.assignment.iter().enumerate() {
                if mine {
                    self.tally.hits[self.mines][var] += 1;
                }
            }
            return;
        };
        for mine in [false, true] {
            if self.set(var, mine) {
                self.descend(depth + 1);
            }
            self.unset(var, mine);
        }
    }
}

/// Enumerates every consistent assignment of `component`.
///
/// Returns `None` if `stop` fired mid-search.
pub(crate) fn enumerate(component: &Component, stop: &dyn Fn() -> bool) -> Option<Tally> {
    let mut search = Search::new(component, stop);
    search.descend(0);
    (!search.stopped).then_some(search.tally)
}

/// Component-local deduction: cells fixed across all of its assignments.
pub(crate) fn local(component: &Component, tally: &Tally, findings: &mut Findings) -> Result<()> {
    let tier = Tier::Enumerated {
        component_size: component.len(),
    };
    tally.forced(component, |_| true, tier, findings)
}

/// Sums reachable by picking one feasible count from each tally.
fn reachable<'t>(tallies: impl Iterator<Item = &'t Tally>, ceiling: usize) -> Vec<bool> {
    let mut sums = vec![false; ceiling + 1];
    sums[0] = true;
    for tally in tallies {
        let mut next = vec![false; ceiling + 1];
        for (sum, _) in sums.iter().enumerate().filter(|&(_, &reached)| reached) {
            for mines in tally.feasible_counts() {
                if sum + mines <= ceiling {
                    next[sum + mines] = true;
                }
            }
        }
        sums = next;
    }
    sums
}

/// Global deduction from the number of mines left.
///
/// `deserted` counts the hidden cells no constraint mentions. A component
/// count `k` stays possible only if the other components can reach some total
/// `s` with `0 <= mines_left - k - s <= deserted`.
pub(crate) fn mine_count(
    parts: &[(Component, Tally)],
    deserted: &[usize],
    mines_left: usize,
    findings: &mut Findings,
) -> Result<()> {
    let ceiling: usize = parts.iter().map(|(component, _)| component.len()).sum();
    let fits = |sum: usize| sum <= mines_left && mines_left - sum <= deserted.len();

    let everything = reachable(parts.iter().map(|(_, tally)| tally), ceiling);
    let leftovers: Vec<usize> = (0..=ceiling)
        .filter(|&sum| everything[sum] && fits(sum))
        .map(|sum| mines_left - sum)
        .collect();
    if leftovers.is_empty() {
        return Err(Error::InternalInconsistency(format!(
            "no arrangement of the frontier leaves room for {mines_left} remaining mines"
        )));
    }
    if !deserted.is_empty() {
        if leftovers.iter().all(|&left| left == 0) {
            for &cell in deserted {
                findings.insert(cell, false, Tier::MineCount)?;
            }
        } else if leftovers.iter().all(|&left| left == deserted.len()) {
            for &cell in deserted {
                findings.insert(cell, true, Tier::MineCount)?;
            }
        }
    }

    for (position, (component, tally)) in parts.iter().enumerate() {
        let others = reachable(
            parts
                .iter()
                .enumerate()
                .filter(|&(other, _)| other != position)
                .map(|(_, (_, tally))| tally),
            ceiling,
        );
        let allowed =
            |mines: usize| (0..=ceiling).any(|sum| others[sum] && fits(sum + mines));
        tally.forced(component, allowed, Tier::MineCount, findings)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::constraint::Origin;

    fn constraint(cells: &[usize], mines: usize) -> Constraint {
        Constraint {
            cells: cells.to_vec(),
            mines,
            origin: Origin::Derived,
        }
    }

    fn never() -> bool {
        false
    }

    #[test]
    fn test_components_split_on_shared_cells() {
        let constraints = vec![
            constraint(&[1, 2], 1),
            constraint(&[2, 3], 1),
            constraint(&[7, 8], 1),
            constraint(&[3, 4], 1),
        ];
        let parts = components(&constraints);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].cells, vec![1, 2, 3, 4]);
        assert_eq!(parts[1].cells, vec![7, 8]);
    }

    #[test]
    fn test_enumeration_counts_assignments() {
        // {1,2}=1 and {2,3}=1: either 2 alone, or 1 and 3.
        let parts = components(&[constraint(&[1, 2], 1), constraint(&[2, 3], 1)]);
        let tally = enumerate(&parts[0], &never).unwrap();
        assert_eq!(tally.solutions, vec![0, 1, 1, 0]);
        assert_eq!(tally.hits[1], vec![0, 1, 0]);
        assert_eq!(tally.hits[2], vec![1, 0, 1]);
        assert_eq!(tally.total(), 2);
    }

    #[test]
    fn test_enumeration_finds_forced_cells() {
        // {1,2,3}=2 and {2,3,4}=1. No subset relation, yet 4 must be safe
        // and 1 must be a mine.
        let parts = components(&[constraint(&[1, 2, 3], 2), constraint(&[2, 3, 4], 1)]);
        let tally = enumerate(&parts[0], &never).unwrap();
        let mut findings = Findings::default();
        local(&parts[0], &tally, &mut findings).unwrap();

        let tier = Tier::Enumerated { component_size: 4 };
        assert_eq!(findings.get(1), Some((true, tier)));
        assert_eq!(findings.get(4), Some((false, tier)));
        assert_eq!(findings.get(2), None);
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_enumeration_rejects_contradictions() {
        let parts = components(&[constraint(&[1, 2], 2), constraint(&[2, 3], 0)]);
        let tally = enumerate(&parts[0], &never).unwrap();
        assert_eq!(tally.total(), 0);
        let mut findings = Findings::default();
        assert!(local(&parts[0], &tally, &mut findings).is_err());
    }

    #[test]
    fn test_enumeration_honours_stop() {
        // Twenty independent-ish cells under one loose constraint.
        let cells: Vec<usize> = (0..20).collect();
        let parts = components(&[constraint(&cells, 10)]);
        assert!(enumerate(&parts[0], &|| true).is_none());
    }

    #[test]
    fn test_mine_count_fixes_a_component() {
        // {1,2}=1 and {2,3}=1 with a single mine left and nothing else hidden.
        let parts = components(&[constraint(&[1, 2], 1), constraint(&[2, 3], 1)]);
        let tally = enumerate(&parts[0], &never).unwrap();
        let parts = vec![(parts[0].clone(), tally)];

        let mut findings = Findings::default();
        mine_count(&parts, &[], 1, &mut findings).unwrap();
        assert_eq!(findings.get(2), Some((true, Tier::MineCount)));
        assert_eq!(findings.get(1), Some((false, Tier::MineCount)));
        assert_eq!(findings.get(3), Some((false, Tier::MineCount)));
    }

    #[test]
    fn test_mine_count_clears_or_fills_deserted_cells() {
        let parts = components(&[constraint(&[1, 2], 1)]);
        let tally = enumerate(&parts[0], &never).unwrap();
        let parts = vec![(parts[0].clone(), tally)];

        // One mine left, and the frontier needs it.
        let mut findings = Findings::default();
        mine_count(&parts, &[5, 6], 1, &mut findings).unwrap();
        assert_eq!(findings.get(5), Some((false, Tier::MineCount)));
        assert_eq!(findings.get(6), Some((false, Tier::MineCount)));

        // Three left: the deserted pair must hold the other two.
        let mut findings = Findings::default();
        mine_count(&parts, &[5, 6], 3, &mut findings).unwrap();
        assert_eq!(findings.get(5), Some((true, Tier::MineCount)));
        assert_eq!(findings.get(6), Some((true, Tier::MineCount)));

        // Two left: undecided.
        let mut findings = Findings::default();
        mine_count(&parts, &[5, 6], 2, &mut findings).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_mine_count_without_frontier() {
        let mut findings = Findings::default();
        mine_count(&[], &[4, 9], 0, &mut findings).unwrap();
        assert_eq!(findings.get(4), Some((false, Tier::MineCount)));

        let mut findings = Findings::default();
        mine_count(&[], &[4, 9], 2, &mut findings).unwrap();
        assert_eq!(findings.get(9), Some((true, Tier::MineCount)));

        let mut findings = Findings::default();
        assert!(mine_count(&[], &[4, 9], 3, &mut findings).is_err());
    }
}
