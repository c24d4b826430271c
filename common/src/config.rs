use std::env;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::guard::ResourceLimits;
use crate::solver::SolverConfig;

/// Tunables for a [`Coordinator`](crate::coordinator::Coordinator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Worker threads per initialization.
    pub procs: usize,
    /// Seconds allowed for a board of `reference_area` cells.
    pub time_limit_base: f64,
    /// Seconds allowed for any board.
    pub time_limit_max: f64,
    pub reference_area: usize,
    pub area_limit: usize,
    pub grace_period_ms: u64,
    /// Search on the calling thread when no worker can be started.
    pub serial_fallback: bool,
    /// Seeds the master random stream. Unset means OS entropy.
    pub seed: Option<u64>,
    pub solver: SolverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            procs: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            time_limit_base: 5.0,
            time_limit_max: 60.0,
            reference_area: 100,
            area_limit: 10_000,
            grace_period_ms: 250,
            serial_fallback: true,
            seed: None,
            solver: SolverConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `GUESSLESS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each
    /// `GUESSLESS_*` name. Unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            procs: overlay(&lookup, "GUESSLESS_PROCS", defaults.procs),
            time_limit_base: overlay(
                &lookup,
                "GUESSLESS_TIME_LIMIT_BASE",
                defaults.time_limit_base,
            ),
            time_limit_max: overlay(&lookup, "GUESSLESS_TIME_LIMIT_MAX", defaults.time_limit_max),
            reference_area: overlay(&lookup, "GUESSLESS_REFERENCE_AREA", defaults.reference_area),
            area_limit: overlay(&lookup, "GUESSLESS_AREA_LIMIT", defaults.area_limit),
            grace_period_ms: overlay(
                &lookup,
                "GUESSLESS_GRACE_PERIOD_MS",
                defaults.grace_period_ms,
            ),
            serial_fallback: overlay(
                &lookup,
                "GUESSLESS_SERIAL_FALLBACK",
                defaults.serial_fallback,
            ),
            seed: lookup("GUESSLESS_SEED")
                .and_then(|value| parse_or_warn("GUESSLESS_SEED", &value)),
            solver: SolverConfig {
                enumeration_ceiling: overlay(
                    &lookup,
                    "GUESSLESS_ENUMERATION_CEILING",
                    defaults.solver.enumeration_ceiling,
                ),
                subset_limit: overlay(
                    &lookup,
                    "GUESSLESS_SUBSET_LIMIT",
                    defaults.solver.subset_limit,
                ),
                use_mine_count: overlay(
                    &lookup,
                    "GUESSLESS_FLAGCOUNT",
                    defaults.solver.use_mine_count,
                ),
            },
        }
    }

    /// Checks the values and converts them into [`ResourceLimits`].
    pub fn limits(&self) -> Result<ResourceLimits> {
        if self.procs == 0 {
            return Err(Error::InvalidParameters("procs must be at least 1".into()));
        }
        if self.area_limit == 0 {
            return Err(Error::InvalidParameters("area limit must be positive".into()));
        }
        if self.reference_area == 0 {
            return Err(Error::InvalidParameters(
                "reference area must be positive".into(),
            ));
        }
        Ok(ResourceLimits {
            procs: self.procs,
            time_limit_base: seconds("time-limit-base", self.time_limit_base)?,
            time_limit_max: seconds("time-limit-max", self.time_limit_max)?,
            reference_area: self.reference_area,
            area_limit: self.area_limit,
            grace_period: Duration::from_millis(self.grace_period_ms),
            serial_fallback: self.serial_fallback,
        })
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::InvalidParameters(format!(
            "{name} must be a positive number of seconds, got {value}"
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|err| Error::InvalidParameters(format!("{name}: {err}")))
}

fn overlay<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|value| parse_or_warn(name, &value))
        .unwrap_or(default)
}

fn parse_or_warn<T: FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(name, value, "ignoring unparsable setting");
            None
        }
    }
}
