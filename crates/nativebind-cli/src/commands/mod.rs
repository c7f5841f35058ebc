pub mod call;
pub mod resolve;

use anyhow::{Context, Result};
use nativebind_config::{Config, ConfigLoader};
use nativebind_runtime::{DelegateSignature, NativeRuntime};
use std::path::Path;

/// Load configuration from an explicit file or by searching upwards
///
/// Outside a project the defaults apply.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    match explicit {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            loader
                .load_from_directory(&cwd)
                .context("Failed to load configuration")
        }
    }
}

fn parse_signature(text: &str) -> Result<DelegateSignature> {
    text.parse()
        .with_context(|| format!("Invalid signature: {}", text))
}

fn runtime_for(config: &Config) -> Result<NativeRuntime> {
    NativeRuntime::from_config(config).context("Invalid runtime configuration")
}
