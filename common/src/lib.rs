//! Minefields that can be cleared without guessing.
//!
//! A [`Coordinator`] draws random layouts that keep the first click clear,
//! replays each one with a bounded deductive [`Solver`], and hands out the
//! first layout the solver clears from the start cell alone.

pub mod analysis;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod field;
pub mod generator;
pub mod guard;
pub mod pool;
pub mod solver;
pub mod topology;

pub use analysis::{Analysis, DeducedState, analyze};
pub use config::EngineConfig;
pub use coordinator::{
    BoardRequest, Coordinator, CoordinatorState, CoordinatorStats, InitReport, Initialized,
    SearchMode, search,
};
pub use error::{Error, MoveError, Result};
pub use field::{Cell, CellState, Field, FieldParams, RevealOutcome};
pub use generator::{generate, generate_seeded};
pub use guard::ResourceLimits;
pub use solver::{Deductions, Difficulty, Solvability, Solver, SolverConfig, Tier, Verdict};
pub use topology::{Coord, Topology};
