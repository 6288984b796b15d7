use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use verifier_engine::{SettleUnit, VerifierConfig};

/// Unit of the settle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum SettleUnitArg {
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl From<SettleUnitArg> for SettleUnit {
    fn from(unit: SettleUnitArg) -> Self {
        match unit {
            SettleUnitArg::Microseconds => SettleUnit::Microseconds,
            SettleUnitArg::Milliseconds => SettleUnit::Milliseconds,
            SettleUnitArg::Seconds => SettleUnit::Seconds,
            SettleUnitArg::Minutes => SettleUnit::Minutes,
            SettleUnitArg::Hours => SettleUnit::Hours,
            SettleUnitArg::Days => SettleUnit::Days,
            SettleUnitArg::Weeks => SettleUnit::Weeks,
        }
    }
}

/// Verify exists billing snapshots against their launch and delete records.
#[derive(Parser)]
#[command(
    name = "verifier",
    version,
    about = "Verify exists billing snapshots against their launch and delete records"
)]
pub(crate) struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON file seeding the in-memory store (exists, launches, deletes, reconciles)
    #[arg(long)]
    pub fixtures: Option<PathBuf>,

    /// Seconds to sleep between cycles
    #[arg(long)]
    pub tick_time: Option<u64>,

    /// Run one pass and exit
    #[arg(long)]
    pub run_once: bool,

    /// How long a snapshot must age past its audit period before it is verified
    #[arg(long)]
    pub settle_time: Option<u32>,

    /// Unit of --settle-time
    #[arg(long, value_enum)]
    pub settle_units: Option<SettleUnitArg>,

    /// Number of verifications run concurrently
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Escalate failed snapshots to the reconciler
    #[arg(long)]
    pub reconcile: bool,

    /// Reconciler configuration file (JSON)
    #[arg(long)]
    pub reconciler_config: Option<PathBuf>,

    /// Print the final status of every snapshot as JSON lines
    #[arg(long)]
    pub report: bool,
}

impl Cli {
    /// Layer the flags that were given over `config`.
    pub fn apply(&self, config: &mut VerifierConfig) {
        if let Some(tick) = self.tick_time {
            config.tick_time = tick;
        }
        if self.run_once {
            config.run_once = true;
        }
        if let Some(amount) = self.settle_time {
            config.settle_time = amount;
        }
        if let Some(unit) = self.settle_units {
            config.settle_units = unit.into();
        }
        if let Some(size) = self.pool_size {
            config.pool_size = size;
        }
        if self.reconcile {
            config.reconcile = true;
        }
        if let Some(path) = &self.reconciler_config {
            config.reconciler_config = path.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifier_engine::SettleWindow;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "verifier",
            "--tick-time",
            "5",
            "--settle-time",
            "3",
            "--settle-units",
            "hours",
            "--pool-size",
            "2",
            "--reconcile",
        ]);
        let mut config = VerifierConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.tick_time, 5);
        assert_eq!(
            config.settle_window(),
            SettleWindow {
                amount: 3,
                unit: SettleUnit::Hours,
            }
        );
        assert_eq!(config.pool_size, 2);
        assert!(config.reconcile);
        assert!(!config.run_once);
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::parse_from(["verifier"]);
        let mut config = VerifierConfig {
            tick_time: 60,
            run_once: true,
            ..VerifierConfig::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.tick_time, 60);
        assert!(config.run_once);
        assert_eq!(config.settle_units, SettleUnit::Minutes);
    }
}
