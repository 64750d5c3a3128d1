//! Periodic reloading of the rules file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ratelimit::{AdmissionGuard, RulesConfig};

/// Load the rules for `environment` from `path` and install them in `guard`.
///
/// On error the guard keeps its current rules. Returns the number of rules installed.
pub fn reload_rules(guard: &AdmissionGuard, path: &Path, environment: &str) -> Result<usize> {
    let rules = RulesConfig::from_file(path)?.compile_for(environment)?;
    let count = rules.len();
    guard.replace_rules(rules);
    Ok(count)
}

/// Reload the rules every `every`, keeping the previous rules on failure.
pub fn spawn_rule_reloader(
    guard: Arc<AdmissionGuard>,
    path: PathBuf,
    environment: String,
    every: Duration,
) -> JoinHandle<()> {
    info!(
        path = %path.display(),
        interval_secs = every.as_secs(),
        "Starting rules reloader"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately; rules were loaded at startup
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match reload_rules(&guard, &path, &environment) {
                Ok(count) => debug!(rules = count, "Reloaded rules"),
                Err(e) => warn!(error = %e, "Failed to reload rules, keeping previous set"),
            }
        }
    })
}
