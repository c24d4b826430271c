//! Exact inference over the visible state of a field, using a SAT solver.
//!
//! The deductive solver is bounded; this is not. It is too slow to run per
//! trial, but it is the reference the bounded solver is measured against.

use std::collections::HashMap;

use itertools::Itertools;
use varisat::{CnfFormula, ExtendFormula, Lit, Solver, Var};

use crate::field::{CellState, Field};
use crate::topology::Coord;

/// Constraints over this many literals or fewer are encoded by listing
/// combinations; larger ones use a sequential counter.
const NAIVE_ENCODING_LIMIT: usize = 10;

/// The possible outcomes of the analysis for a single hidden cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeducedState {
    /// All consistent layouts put a mine here.
    ForcedMine,
    /// No consistent layout puts a mine here.
    ForcedSafe,
    /// Consistent layouts disagree.
    Undetermined,
}

/// The result of a full analysis: a verdict per hidden cell and one concrete
/// layout that agrees with everything visible.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub deductions: HashMap<Coord, DeducedState>,
    pub sample_assignment: HashMap<Coord, bool>,
}

impl Analysis {
    /// Hidden cells in the given state, sorted.
    pub fn cells(&self, state: DeducedState) -> Vec<Coord> {
        self.deductions
            .iter()
            .filter(|&(_, &deduced)| deduced == state)
            .map(|(&coord, _)| coord)
            .sorted()
            .collect()
    }
}

/// "Exactly `required` of `cells` are mines."
struct Requirement {
    cells: Vec<usize>,
    required: usize,
}

/// Turns the visible board into requirements over its hidden cells.
///
/// Flags count as known mines, as in the deductive solver. With
/// `use_mine_count`, one extra requirement spans every hidden cell.
fn requirements(
    field: &Field,
    use_mine_count: bool,
) -> anyhow::Result<(Vec<usize>, Vec<Requirement>)> {
    let hidden: Vec<usize> = (0..field.area())
        .filter(|&index| field.state_at(index) == CellState::Hidden)
        .collect();

    let mut requirements = Vec::new();
    for index in 0..field.area() {
        if field.state_at(index) != CellState::Revealed || field.is_mine_at(index) {
            continue;
        }
        let mut cells = Vec::new();
        let mut flagged = 0;
        for neighbor in field.neighbor_indices(index) {
            match field.state_at(neighbor) {
                CellState::Hidden => cells.push(neighbor),
                CellState::Flagged => flagged += 1,
                CellState::Revealed => {}
            }
        }
        let Some(required) = usize::from(field.number_at(index)).checked_sub(flagged) else {
            anyhow::bail!("{} carries more flags than its number", field.coord_of(index));
        };
        if !cells.is_empty() || required > 0 {
            requirements.push(Requirement { cells, required });
        }
    }

    if use_mine_count {
        let Some(required) = field.mine_count().checked_sub(field.flagged_count()) else {
            anyhow::bail!("more flags than mines");
        };
        requirements.push(Requirement {
            cells: hidden.clone(),
            required,
        });
    }
    Ok((hidden, requirements))
}

/// Classifies every hidden cell of `field` from its visible state alone.
///
/// Fails if the visible state admits no layout at all.
pub fn analyze(field: &Field, use_mine_count: bool) -> anyhow::Result<Analysis> {
    let (hidden, requirements) = requirements(field, use_mine_count)?;

    let mut solver = Solver::new();
    let vars: HashMap<usize, Var> = hidden.iter().map(|&index| (index, solver.new_var())).collect();

    let mut formula = CnfFormula::new();
    for requirement in &requirements {
        let lits: Vec<Lit> = requirement
            .cells
            .iter()
            .filter_map(|index| vars.get(index).map(|&var| Lit::from_var(var, true)))
            .collect();
        encode_exactly_k(&mut formula, &mut solver, &lits, requirement.required);
    }
    solver.add_formula(&formula);

    if !solver.solve()? {
        anyhow::bail!("no layout agrees with the visible board");
    }
    let model = solver
        .model()
        .ok_or_else(|| anyhow::anyhow!("solver reported a layout but returned no model"))?;

    let mut sample_assignment = HashMap::new();
    for &index in &hidden {
        let is_mine = model.contains(&Lit::from_var(vars[&index], true));
        sample_assignment.insert(field.coord_of(index), is_mine);
    }

    // The sample already proves one value possible; only the other needs a
    // solver call.
    let mut deductions = HashMap::new();
    for &index in &hidden {
        let coord = field.coord_of(index);
        let mine = Lit::from_var(vars[&index], true);
        let sampled_mine = sample_assignment[&coord];
        let opposite = if sampled_mine { !mine } else { mine };

        solver.assume(&[opposite]);
        let flexible = solver.solve()?;
        solver.assume(&[]);

        let state = match (flexible, sampled_mine) {
            (true, _) => DeducedState::Undetermined,
            (false, true) => DeducedState::ForcedMine,
            (false, false) => DeducedState::ForcedSafe,
        };
        deductions.insert(coord, state);
    }

    Ok(Analysis {
        deductions,
        sample_assignment,
    })
}

fn encode_exactly_k(formula: &mut CnfFormula, solver: &mut Solver, lits: &[Lit], k: usize) {
    encode_at_most_k(formula, solver, lits, k);
    encode_at_least_k(formula, solver, lits, k);
}

fn encode_at_most_k(formula: &mut CnfFormula, solver: &mut Solver, lits: &[Lit], k: usize) {
    if k >= lits.len() {
        return;
    }
    if k == 0 {
        for &lit in lits {
            formula.add_clause(&[!lit]);
        }
        return;
    }
    if lits.len() <= NAIVE_ENCODING_LIMIT {
        // No k + 1 of them may hold together.
        for combo in lits.iter().copied().combinations(k + 1) {
            let clause: Vec<Lit> = combo.iter().map(|&lit| !lit).collect();
            formula.add_clause(&clause);
        }
    } else {
        encode_sequential_counter(formula, solver, lits, k);
    }
}

fn encode_at_least_k(formula: &mut CnfFormula, solver: &mut Solver, lits: &[Lit], k: usize) {
    if k == 0 {
        return;
    }
    if k > lits.len() {
        formula.add_clause(&[]);
        return;
    }
    // At least k true is at most n - k false.
    let negated: Vec<Lit> = lits.iter().map(|&lit| !lit).collect();
    encode_at_most_k(formula, solver, &negated, lits.len() - k);
}

/// Sinz's sequential counter for "at most `k` of `lits`", `1 <= k < lits.len()`.
///
/// `s[i][j]` is forced true whenever at least `j + 1` of `lits[..=i]` hold.
fn encode_sequential_counter(
    formula: &mut CnfFormula,
    solver: &mut Solver,
    lits: &[Lit],
    k: usize,
) {
    let n = lits.len();
    let s: Vec<Vec<Lit>> = (0..n - 1)
        .map(|_| (0..k).map(|_| Lit::from_var(solver.new_var(), true)).collect())
        .collect();

    formula.add_clause(&[!lits[0], s[0][0]]);
    for j in 1..k {
        formula.add_clause(&[!s[0][j]]);
    }
    for i in 1..n - 1 {
        formula.add_clause(&[!lits[i], s[i][0]]);
        formula.add_clause(&[!s[i - 1][0], s[i][0]]);
        for j in 1..k {
            formula.add_clause(&[!lits[i], !s[i - 1][j - 1], s[i][j]]);
            formula.add_clause(&[!s[i - 1][j], s[i][j]]);
        }
        formula.add_clause(&[!lits[i], !s[i - 1][k - 1]]);
    }
    formula.add_clause(&[!lits[n - 1], !s[n - 2][k - 1]]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldParams;
    use crate::topology::Topology;

    fn far_side_field() -> Field {
        // 7x1, mine at column 3; columns 0-2 open from the start.
        let params = FieldParams::new(7, 1, 1, Topology::Moore, Coord::new(0, 0)).unwrap();
        Field::new(params, &[Coord::new(0, 3)]).unwrap()
    }

    #[test]
    fn test_symmetric_pair_is_undetermined() {
        // Two cells behind the same 1 can't be told apart.
        let params = FieldParams::new(4, 2, 1, Topology::Moore, Coord::new(0, 0)).unwrap();
        let field = Field::new(params, &[Coord::new(0, 3)]).unwrap();
        let analysis = analyze(&field, true).unwrap();

        assert_eq!(
            analysis.deductions.get(&Coord::new(0, 3)),
            Some(&DeducedState::Undetermined)
        );
        assert_eq!(
            analysis.deductions.get(&Coord::new(1, 3)),
            Some(&DeducedState::Undetermined)
        );

        // The sample assignment must satisfy the constraint (exactly 1 mine).
        let mines = analysis.sample_assignment.values().filter(|&&mine| mine).count();
        assert_eq!(mines, 1);
    }

    #[test]
    fn test_mine_count_decides_the_far_side() {
        let field = far_side_field();

        // Without the global count, only the mine next to the 1 is known.
        let analysis = analyze(&field, false).unwrap();
        assert_eq!(analysis.cells(DeducedState::ForcedMine), vec![Coord::new(0, 3)]);
        assert_eq!(analysis.cells(DeducedState::Undetermined).len(), 3);

        // With it, the one mine is spoken for and the rest is safe.
        let analysis = analyze(&field, true).unwrap();
        assert_eq!(analysis.cells(DeducedState::ForcedMine), vec![Coord::new(0, 3)]);
        assert_eq!(
            analysis.cells(DeducedState::ForcedSafe),
            vec![Coord::new(0, 4), Coord::new(0, 5), Coord::new(0, 6)]
        );
    }

    #[test]
    fn test_large_global_constraint() {
        // Seventeen hidden cells push the global constraint onto the
        // sequential counter.
        let params = FieldParams::new(20, 1, 2, Topology::Moore, Coord::new(0, 0)).unwrap();
        let field = Field::new(params, &[Coord::new(0, 3), Coord::new(0, 15)]).unwrap();
        let analysis = analyze(&field, true).unwrap();

        assert_eq!(analysis.deductions.len(), 17);
        assert_eq!(analysis.cells(DeducedState::ForcedMine), vec![Coord::new(0, 3)]);
        assert!(analysis.cells(DeducedState::ForcedSafe).is_empty());

        let sampled = analysis.sample_assignment.values().filter(|&&mine| mine).count();
        assert_eq!(sampled, 2);
        assert_eq!(analysis.sample_assignment.get(&Coord::new(0, 3)), Some(&true));
    }

    #[test]
    fn test_sequential_counter_bounds() {
        // Exactly 3 of 12 through the counter path.
        let mut solver = Solver::new();
        let lits: Vec<Lit> = (0..12).map(|_| Lit::from_var(solver.new_var(), true)).collect();
        let mut formula = CnfFormula::new();
        encode_exactly_k(&mut formula, &mut solver, &lits, 3);
        solver.add_formula(&formula);

        // Four true is too many.
        solver.assume(&lits[..4]);
        assert!(!solver.solve().unwrap());

        // Three true is fine.
        solver.assume(&lits[..3]);
        assert!(solver.solve().unwrap());

        // Ten false leaves only two candidates.
        let falses: Vec<Lit> = lits[..10].iter().map(|&lit| !lit).collect();
        solver.assume(&falses);
        assert!(!solver.solve().unwrap());

        // Nine false leaves exactly three.
        solver.assume(&falses[..9]);
        assert!(solver.solve().unwrap());
    }

    #[test]
    fn test_contradictory_flags_fail() {
        let params = FieldParams::new(5, 2, 1, Topology::Moore, Coord::new(0, 0)).unwrap();
        let mut field = Field::new(params, &[Coord::new(0, 4)]).unwrap();
        field.flag(Coord::new(0, 4)).unwrap();
        field.flag(Coord::new(1, 4)).unwrap();
        assert!(analyze(&field, false).is_err());
    }
}
