use std::sync::atomic::{AtomicU64, Ordering};

use guessless::{Cell, Coord, Field, FieldParams, RevealOutcome, Solver, Topology};
use rand::SeedableRng;
use rand::rngs::StdRng;
use wasm_bindgen::prelude::*;

fn load(bts: &[u8]) -> Result<Field, String> {
    Field::from_bytes(bts).map_err(|e| e.to_string())
}

fn store(field: &Field) -> Result<Vec<u8>, String> {
    field.to_bytes().map_err(|e| e.to_string())
}

/// Searches at most `max_trials` placements for a guessless field. Browsers
/// have no threads or clock to spare, so the budget is counted in trials.
#[wasm_bindgen]
pub fn create_field(
    width: usize,
    height: usize,
    mines: usize,
    topology: &str,
    start_row: usize,
    start_col: usize,
    max_trials: u32,
) -> Result<Vec<u8>, String> {
    console_error_panic_hook::set_once();

    let topology: Topology = topology.parse().map_err(|e: guessless::Error| e.to_string())?;
    let params = FieldParams::new(width, height, mines, topology, Coord::new(start_row, start_col))
        .map_err(|e| e.to_string())?;

    let trials = AtomicU64::new(0);
    let limit = u64::from(max_trials);
    let stop = || trials.load(Ordering::Relaxed) >= limit;
    let mut rng = StdRng::from_os_rng();
    let found = guessless::search(&params, &Solver::default(), &mut rng, &trials, &stop)
        .map_err(|e| e.to_string())?;

    match found {
        Some((field, _)) => store(&field),
        None => Err(format!("no guessless field in {max_trials} trials")),
    }
}

#[wasm_bindgen]
pub fn validate(bts: Vec<u8>) -> bool {
    console_error_panic_hook::set_once();

    load(&bts).is_ok_and(|field| field.is_solved())
}

/// Reveals a cell. The last byte of the result is 0 for a safe cell and 1 for
/// a mine.
#[wasm_bindgen]
pub fn choose_cell(bts: Vec<u8>, row: usize, col: usize) -> Result<Vec<u8>, String> {
    console_error_panic_hook::set_once();

    let mut field = load(&bts)?;
    let outcome = field
        .reveal(Coord::new(row, col))
        .map_err(|e| e.to_string())?;
    let mut xs = store(&field)?;
    xs.push(match outcome {
        RevealOutcome::Safe(_) => 0,
        RevealOutcome::Mine => 1,
    });
    Ok(xs)
}

#[wasm_bindgen]
pub fn toggle_flag(bts: Vec<u8>, row: usize, col: usize) -> Result<Vec<u8>, String> {
    console_error_panic_hook::set_once();

    let mut field = load(&bts)?;
    field
        .toggle_flag(Coord::new(row, col))
        .map_err(|e| e.to_string())?;
    store(&field)
}

/// Row-major visible cells: the count for revealed cells, -1 hidden,
/// -2 flagged, -3 a revealed mine.
#[wasm_bindgen]
pub fn get_cells(bts: Vec<u8>) -> Result<Vec<i8>, String> {
    console_error_panic_hook::set_once();

    let field = load(&bts)?;
    Ok(field
        .coords()
        .filter_map(|coord| field.cell(coord))
        .map(|cell| match cell {
            Cell::Hidden => -1,
            Cell::Flagged => -2,
            Cell::Mine => -3,
            Cell::Number(n) => n as i8,
        })
        .collect())
}

/// Difficulty score of the field as it stands.
#[wasm_bindgen]
pub fn measure(bts: Vec<u8>) -> Result<u64, String> {
    console_error_panic_hook::set_once();

    let field = load(&bts)?;
    let verdict = Solver::default().solve(&field).map_err(|e| e.to_string())?;
    Ok(verdict.difficulty.score)
}
