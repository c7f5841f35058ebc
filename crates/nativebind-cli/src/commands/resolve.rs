//! Resolve command - check that a function can be bound

use super::{parse_signature, runtime_for};
use anyhow::{Context, Result};
use nativebind_config::Config;
use nativebind_runtime::NativeDelegateDefinition;

/// Resolve the function and print the bound definition
pub fn run(library: &str, function: &str, signature: &str, config: &Config) -> Result<()> {
    println!("{}", resolve(library, function, signature, config)?);
    Ok(())
}

/// Resolve and release; returns a one-line report
pub fn resolve(library: &str, function: &str, signature: &str, config: &Config) -> Result<String> {
    let signature = parse_signature(signature)?;
    let definition = NativeDelegateDefinition::new(library, function, signature);

    let runtime = runtime_for(config)?;
    let handle = runtime
        .resolver()
        .resolve(&definition)
        .with_context(|| format!("Failed to resolve {}", definition))?;
    let report = format!("resolved {} as delegate {}", definition, handle.id());

    runtime
        .resolver()
        .release(&handle)
        .context("Failed to release delegate")?;
    Ok(report)
}
