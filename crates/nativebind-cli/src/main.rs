use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

mod commands;
mod logging;

/// Call functions in native libraries from a type signature.
///
/// Loads a shared library, looks up an exported symbol and invokes it with
/// arguments parsed according to the signature. No bindings are generated.
///
/// EXAMPLES:
///     nativebind call m cos --sig "(double) -> double" 0
///     nativebind call c strlen --sig "(text) -> long" hello
///     nativebind resolve m pow --sig "(double, double) -> double"
///
/// SIGNATURES:
///     [convention] (type, ...) -> type
///     types: void bool int long float double pointer text record(size[, align])
///     conventions: cdecl stdcall fastcall thiscall winapi
///
/// ENVIRONMENT VARIABLES:
///     NATIVEBIND_CONFIG              Path to a nativebind.toml
///     NATIVEBIND_SEARCH_PATH         Extra library search paths
///     NATIVEBIND_CALLING_CONVENTION  Default calling convention
///     NATIVEBIND_TEXT_ENCODING       utf8 or utf16
///     RUST_LOG                       Log filter
#[derive(Parser)]
#[command(name = "nativebind")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a nativebind.toml (default: search upwards from the current directory)
    #[arg(long, short = 'c', global = true, env = "NATIVEBIND_CONFIG")]
    config: Option<PathBuf>,

    /// Log resolution and memory activity to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and invoke a native function
    ///
    /// Arguments are parsed according to the signature's input types.
    /// Text arguments are copied to native memory for the duration of the
    /// call; record arguments are given as hex bytes.
    ///
    /// EXAMPLES:
    ///     nativebind call m cos --sig "(double) -> double" 0
    ///     nativebind call libc.so.6 abs --sig "(int) -> int" -- -42
    ///     nativebind call ./libgeo.so area --sig "(record(8, 4)) -> float" 0000803f00000040
    #[command(visible_alias = "x")]
    Call {
        /// Library name, alias or path
        library: String,
        /// Exported function name
        function: String,
        /// Function signature, e.g. "(int, int) -> int"
        #[arg(long, short = 's')]
        sig: String,
        /// Arguments, one per input type
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Resolve a native function without calling it
    ///
    /// Loads the library, looks up the symbol and prepares the call
    /// interface, reporting any failure.
    ///
    /// EXAMPLES:
    ///     nativebind resolve m cos --sig "(double) -> double"
    #[command(visible_alias = "r")]
    Resolve {
        /// Library name, alias or path
        library: String,
        /// Exported function name
        function: String,
        /// Function signature, e.g. "(int, int) -> int"
        #[arg(long, short = 's')]
        sig: String,
    },

    /// Generate shell completion scripts
    ///
    /// EXAMPLES:
    ///     nativebind completions bash > ~/.bash_completions/nativebind.bash
    ///     nativebind completions zsh > ~/.zfunc/_nativebind
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return Ok(());
    }

    let config = commands::load_config(cli.config.as_deref())?;
    logging::init(cli.verbose, config.log_filter())?;

    match cli.command {
        Commands::Call {
            library,
            function,
            sig,
            args,
        } => {
            let args = commands::call::CallArgs {
                library,
                function,
                signature: sig,
                args,
            };
            commands::call::run(args, &config)?;
        }
        Commands::Resolve {
            library,
            function,
            sig,
        } => {
            commands::resolve::run(&library, &function, &sig, &config)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
