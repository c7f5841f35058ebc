//! Log output to stderr
//!
//! Filter precedence: `--verbose` > `RUST_LOG` > `[logging] filter` in the
//! global config > warnings only.

use anyhow::{anyhow, Result};
use std::env;
use tracing_subscriber::EnvFilter;

const VERBOSE_FILTER: &str = "nativebind_runtime=trace,nativebind_cli=debug";
const DEFAULT_FILTER: &str = "warn";

/// Choose the filter directive for this run
pub fn filter_directive(verbose: bool, configured: Option<&str>) -> String {
    if verbose {
        return VERBOSE_FILTER.to_string();
    }
    if let Ok(from_env) = env::var("RUST_LOG") {
        if !from_env.trim().is_empty() {
            return from_env;
        }
    }
    configured.unwrap_or(DEFAULT_FILTER).to_string()
}

/// Install the global subscriber
pub fn init(verbose: bool, configured: Option<&str>) -> Result<()> {
    let directive = filter_directive(verbose, configured);
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| anyhow!("invalid log filter '{}': {}", directive, e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {}", e))
}
