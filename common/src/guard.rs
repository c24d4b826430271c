//! Limits that bound how much work a single initialization may do.

use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// Resource limits for one coordinator, validated by
/// [`EngineConfig::limits`](crate::config::EngineConfig::limits).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    /// Worker threads per initialization. One or fewer searches serially.
    pub procs: usize,
    /// The budget of a board of `reference_area` cells, and the floor for
    /// every board.
    pub time_limit_base: Duration,
    /// Ceiling on any budget, however large the board.
    pub time_limit_max: Duration,
    pub reference_area: usize,
    /// Boards larger than this are refused before any work starts.
    pub area_limit: usize,
    /// How long cancelled workers get to exit before they are detached.
    pub grace_period: Duration,
    pub serial_fallback: bool,
}

impl ResourceLimits {
    pub fn check_area(&self, area: usize) -> Result<()> {
        if area > self.area_limit {
            return Err(Error::AreaTooLarge {
                area,
                limit: self.area_limit,
            });
        }
        Ok(())
    }

    /// Time allowed for a board of `area` cells.
    ///
    /// Grows linearly with the area, one `time_limit_base` per
    /// `reference_area` cells, and is clamped to
    /// `[time_limit_base, time_limit_max]`.
    pub fn time_budget(&self, area: usize) -> Duration {
        let ceiling = self.time_limit_max.max(self.time_limit_base);
        let scale = area as f64 / self.reference_area.max(1) as f64;
        let scaled = Duration::try_from_secs_f64(self.time_limit_base.as_secs_f64() * scale)
            .unwrap_or(ceiling);
        let budget = scaled.clamp(self.time_limit_base, ceiling);
        debug!(area, budget_ms = budget.as_millis() as u64, "time budget");
        budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            procs: 4,
            time_limit_base: Duration::from_secs(5),
            time_limit_max: Duration::from_secs(60),
            reference_area: 100,
            area_limit: 10_000,
            grace_period: Duration::from_millis(250),
            serial_fallback: true,
        }
    }

    #[test]
    fn test_area_limit() {
        let limits = limits();
        assert!(limits.check_area(10_000).is_ok());
        assert_eq!(
            limits.check_area(10_001),
            Err(Error::AreaTooLarge {
                area: 10_001,
                limit: 10_000
            })
        );
    }

    #[test]
    fn test_budget_scales_with_area() {
        let limits = limits();
        assert_eq!(limits.time_budget(100), Duration::from_secs(5));
        assert_eq!(limits.time_budget(400), Duration::from_secs(20));

        // Small boards get the base, huge boards the ceiling.
        assert_eq!(limits.time_budget(9), Duration::from_secs(5));
        assert_eq!(limits.time_budget(0), Duration::from_secs(5));
        assert_eq!(limits.time_budget(9_000), Duration::from_secs(60));
    }

    #[test]
    fn test_budget_with_inverted_limits() {
        // A ceiling below the base never undercuts the base.
        let limits = ResourceLimits {
            time_limit_max: Duration::from_secs(1),
            ..limits()
        };
        assert_eq!(limits.time_budget(10), Duration::from_secs(5));
        assert_eq!(limits.time_budget(1_000), Duration::from_secs(5));
    }
}
