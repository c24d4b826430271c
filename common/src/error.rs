use std::fmt;
use std::time::Duration;

use crate::topology::Coord;

/// Failures that cross the core boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed board request: zero dimensions, a start outside the board,
    /// or more mines than fit outside the start neighbourhood.
    InvalidParameters(String),
    /// The requested area exceeds the configured ceiling. No worker is spawned.
    AreaTooLarge { area: usize, limit: usize },
    /// No guessless candidate was found within the time budget.
    TimeExceeded { budget: Duration, trials: u64 },
    /// The worker pool could not produce anything at all.
    NoViableField(String),
    /// A field violated its own invariants while being solved.
    InternalInconsistency(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParameters(reason) => write!(f, "invalid parameters: {reason}"),
            Error::AreaTooLarge { area, limit } => {
                write!(f, "area {area} exceeds the limit of {limit} cells")
            }
            Error::TimeExceeded { budget, trials } => write!(
                f,
                "no guessless field found within {:.2}s ({trials} trials)",
                budget.as_secs_f64()
            ),
            Error::NoViableField(reason) => write!(f, "no viable field: {reason}"),
            Error::InternalInconsistency(reason) => write!(f, "internal inconsistency: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

/// A game-session move that breaks the caller contract of a [`crate::Field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveError {
    OutOfBounds(Coord),
    AlreadyRevealed(Coord),
    Flagged(Coord),
    NotFlagged(Coord),
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveError::OutOfBounds(at) => write!(f, "{at} is outside the field"),
            MoveError::AlreadyRevealed(at) => write!(f, "{at} is already revealed"),
            MoveError::Flagged(at) => write!(f, "{at} is flagged"),
            MoveError::NotFlagged(at) => write!(f, "{at} is not flagged"),
        }
    }
}

impl std::error::Error for MoveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_limits() {
        let err = Error::AreaTooLarge {
            area: 20_000,
            limit: 10_000,
        };
        assert_eq!(err.to_string(), "area 20000 exceeds the limit of 10000 cells");

        let err = Error::TimeExceeded {
            budget: Duration::from_millis(1500),
            trials: 42,
        };
        assert_eq!(
            err.to_string(),
            "no guessless field found within 1.50s (42 trials)"
        );
    }

    #[test]
    fn test_move_error_mentions_the_cell() {
        let err = MoveError::AlreadyRevealed(Coord::new(3, 4));
        assert_eq!(err.to_string(), "(3, 4) is already revealed");
    }
}
