//! Call command - resolve and invoke a native function

use super::{parse_signature, runtime_for};
use anyhow::{anyhow, bail, Context, Result};
use nativebind_config::Config;
use nativebind_runtime::{
    Address, ArgumentOverride, CallSite, CallSiteOverrides, PointerManagementMode, Record,
    RecordLayout, SemanticType, Value,
};
use tracing::debug;

/// Arguments for the call command
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub library: String,
    pub function: String,
    pub signature: String,
    pub args: Vec<String>,
}

/// Invoke the function and print its result
pub fn run(args: CallArgs, config: &Config) -> Result<()> {
    if let Some(output) = invoke(&args, config)? {
        println!("{}", output);
    }
    Ok(())
}

/// Invoke the function; returns the printable result, `None` for void
pub fn invoke(args: &CallArgs, config: &Config) -> Result<Option<String>> {
    let signature = parse_signature(&args.signature)?;
    if args.args.len() != signature.arity() {
        bail!(
            "{} expects {} argument(s), got {}",
            args.function,
            signature.arity(),
            args.args.len()
        );
    }

    let values = args
        .args
        .iter()
        .zip(signature.inputs())
        .enumerate()
        .map(|(index, (raw, ty))| {
            parse_argument(raw, ty).with_context(|| format!("Invalid argument {}", index + 1))
        })
        .collect::<Result<Vec<Value>>>()?;

    // Text copies live only for the duration of the call
    let mut overrides = CallSiteOverrides::default().signature(signature.clone());
    for (index, ty) in signature.inputs().iter().enumerate() {
        if *ty == SemanticType::Text {
            overrides = overrides.argument(
                index,
                ArgumentOverride::with_mode(PointerManagementMode::DestroyAfterCall),
            );
        }
    }
    let site = CallSite::new(
        args.function.clone(),
        signature.inputs().to_vec(),
        signature.output(),
    )
    .with_overrides(overrides);

    let runtime = runtime_for(config)?;
    let router = runtime.router(args.library.clone());
    debug!(definition = %router.definition_for(&site), "calling");

    let result = router
        .call(&site, values)
        .with_context(|| format!("Call to {}!{} failed", args.library, args.function))?;

    // Deferred buffers would never be collected after exit
    runtime.memory().garbage_collect_all();

    Ok(format_value(&result))
}

/// Parse one command-line argument as `ty`
pub fn parse_argument(raw: &str, ty: &SemanticType) -> Result<Value> {
    let value = match ty {
        SemanticType::Void => bail!("void is not a valid parameter type"),
        SemanticType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => bail!("expected a bool, got '{}'", raw),
        },
        SemanticType::Int => Value::Int(
            raw.parse()
                .with_context(|| format!("expected an int, got '{}'", raw))?,
        ),
        SemanticType::Long => Value::Long(
            raw.parse()
                .with_context(|| format!("expected a long, got '{}'", raw))?,
        ),
        SemanticType::Float => Value::Float(
            raw.parse()
                .with_context(|| format!("expected a float, got '{}'", raw))?,
        ),
        SemanticType::Double => Value::Double(
            raw.parse()
                .with_context(|| format!("expected a double, got '{}'", raw))?,
        ),
        SemanticType::Pointer => Value::Pointer(parse_address(raw)?),
        SemanticType::Text => Value::Text(raw.to_string()),
        SemanticType::Record(layout) => Value::Record(parse_record(raw, *layout)?),
    };
    Ok(value)
}

fn parse_address(raw: &str) -> Result<Address> {
    if raw.eq_ignore_ascii_case("null") {
        return Ok(Address::NULL);
    }
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed
        .map(Address::new)
        .with_context(|| format!("expected an address, got '{}'", raw))
}

fn parse_record(raw: &str, layout: RecordLayout) -> Result<Record> {
    let hex: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '_').collect();
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("expected hex bytes, got '{}'", raw);
    }
    if hex.len() % 2 != 0 {
        bail!("record bytes must be an even number of hex digits");
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .with_context(|| format!("expected hex bytes, got '{}'", raw))?;
    let got = bytes.len();
    Record::from_bytes(layout, bytes)
        .ok_or_else(|| anyhow!("record needs {} bytes, got {}", layout.size, got))
}

/// Render a result for the terminal
pub fn format_value(value: &Value) -> Option<String> {
    match value {
        Value::Void => None,
        Value::Text(text) => Some(text.clone()),
        Value::Record(record) => Some(
            record
                .bytes()
                .iter()
                .map(|byte| format!("{:02x}", byte))
                .collect(),
        ),
        other => Some(other.to_string()),
    }
}
