//! Delegate type system - semantic types and signatures at the native boundary
//!
//! Defines:
//! - `SemanticType`: the type of one parameter or return slot
//! - `CallingConvention`: the convention tag a signature is realized under
//! - `DelegateSignature`: inputs, output and convention of a native function
//! - `NativeDelegateDefinition`: library + symbol + signature, the resolver's cache key
//!
//! Type mapping at the C boundary:
//! - SemanticType::Int → c_int (i32)
//! - SemanticType::Long → i64
//! - SemanticType::Float / Double → f32 / f64
//! - SemanticType::Bool → u8 (0 or 1)
//! - SemanticType::Pointer / Text / Record → pointer-sized address
//! - SemanticType::Void → no value

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Size and alignment of a fixed-layout aggregate
///
/// Layouts are supplied by the caller; nothing here computes field offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordLayout {
    pub size: usize,
    pub align: usize,
}

impl RecordLayout {
    /// Create a layout, rejecting zero sizes and non power-of-two alignments
    pub fn new(size: usize, align: usize) -> Result<Self, SignatureParseError> {
        if size == 0 {
            return Err(SignatureParseError::InvalidLayout(
                "record size must be non-zero".to_string(),
            ));
        }
        if !align.is_power_of_two() {
            return Err(SignatureParseError::InvalidLayout(format!(
                "record alignment {} is not a power of two",
                align
            )));
        }
        Ok(Self { size, align })
    }

    /// Layout of a Rust type
    pub fn of<T>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }
}

/// Semantic type of a parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    /// No value (return position only)
    Void,
    /// C bool (u8: 0 or 1)
    Bool,
    /// C int (i32)
    Int,
    /// 64-bit integer
    Long,
    /// C float (f32)
    Float,
    /// C double (f64)
    Double,
    /// Opaque address
    Pointer,
    /// Text passed or returned as a pointer to an encoded, NUL-terminated string
    Text,
    /// Fixed-layout aggregate passed or returned by address
    Record(RecordLayout),
}

impl SemanticType {
    /// Whether values of this type cross the boundary as an address
    pub fn is_address_shaped(&self) -> bool {
        matches!(
            self,
            SemanticType::Pointer | SemanticType::Text | SemanticType::Record(_)
        )
    }

    /// Get a display name for this type
    pub fn display_name(&self) -> String {
        match self {
            SemanticType::Void => "void".to_string(),
            SemanticType::Bool => "bool".to_string(),
            SemanticType::Int => "int".to_string(),
            SemanticType::Long => "long".to_string(),
            SemanticType::Float => "float".to_string(),
            SemanticType::Double => "double".to_string(),
            SemanticType::Pointer => "pointer".to_string(),
            SemanticType::Text => "text".to_string(),
            SemanticType::Record(layout) => format!("record({}, {})", layout.size, layout.align),
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl FromStr for SemanticType {
    type Err = SignatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(body) = s
            .strip_prefix("record")
            .map(str::trim)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return parse_record_layout(body).map(SemanticType::Record);
        }

        match s {
            "void" => Ok(SemanticType::Void),
            "bool" => Ok(SemanticType::Bool),
            "int" | "i32" => Ok(SemanticType::Int),
            "long" | "i64" => Ok(SemanticType::Long),
            "float" | "f32" => Ok(SemanticType::Float),
            "double" | "f64" => Ok(SemanticType::Double),
            "pointer" | "ptr" => Ok(SemanticType::Pointer),
            "text" | "string" | "str" => Ok(SemanticType::Text),
            other => Err(SignatureParseError::UnknownType(other.to_string())),
        }
    }
}

fn parse_record_layout(body: &str) -> Result<RecordLayout, SignatureParseError> {
    let mut parts = body.split(',').map(str::trim);
    let parse_usize = |part: Option<&str>| -> Result<Option<usize>, SignatureParseError> {
        match part {
            None => Ok(None),
            Some(text) => text.parse::<usize>().map(Some).map_err(|_| {
                SignatureParseError::InvalidLayout(format!("'{}' is not a size", text))
            }),
        }
    };

    let size = parse_usize(parts.next())?.ok_or_else(|| {
        SignatureParseError::InvalidLayout("record needs a size".to_string())
    })?;
    let align = parse_usize(parts.next())?.unwrap_or(8);
    if parts.next().is_some() {
        return Err(SignatureParseError::InvalidLayout(
            "record takes at most (size, align)".to_string(),
        ));
    }
    RecordLayout::new(size, align)
}

/// Calling convention tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    /// C declaration convention (platform default on every target)
    #[default]
    Cdecl,
    /// Win32 standard call
    StdCall,
    /// Register-based fast call
    FastCall,
    /// C++ member call
    ThisCall,
    /// Platform API default (stdcall on 32-bit Windows, C elsewhere)
    Winapi,
}

impl CallingConvention {
    /// Get the configuration name for this convention
    pub fn name(&self) -> &'static str {
        match self {
            CallingConvention::Cdecl => "cdecl",
            CallingConvention::StdCall => "stdcall",
            CallingConvention::FastCall => "fastcall",
            CallingConvention::ThisCall => "thiscall",
            CallingConvention::Winapi => "winapi",
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CallingConvention {
    type Err = SignatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cdecl" => Ok(CallingConvention::Cdecl),
            "stdcall" => Ok(CallingConvention::StdCall),
            "fastcall" => Ok(CallingConvention::FastCall),
            "thiscall" => Ok(CallingConvention::ThisCall),
            "winapi" => Ok(CallingConvention::Winapi),
            other => Err(SignatureParseError::UnknownConvention(other.to_string())),
        }
    }
}

/// Signature parsing errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignatureParseError {
    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("unknown calling convention '{0}'")]
    UnknownConvention(String),

    #[error("invalid record layout: {0}")]
    InvalidLayout(String),

    #[error("malformed signature: {0}")]
    Malformed(String),
}

/// Ordered input types, one output type and a calling convention
///
/// Two signatures are equal iff the convention and both type sequences are
/// element-wise equal.
///
/// # Examples
///
/// ```
/// # use nativebind_runtime::types::{CallingConvention, DelegateSignature, SemanticType};
/// let sig: DelegateSignature = "(int, int) -> int".parse().unwrap();
/// assert_eq!(sig.inputs(), &[SemanticType::Int, SemanticType::Int]);
/// assert_eq!(sig.output(), SemanticType::Int);
/// assert_eq!(sig.convention(), CallingConvention::Cdecl);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DelegateSignature {
    inputs: Vec<SemanticType>,
    output: SemanticType,
    convention: CallingConvention,
}

impl DelegateSignature {
    pub fn new(
        inputs: impl Into<Vec<SemanticType>>,
        output: SemanticType,
        convention: CallingConvention,
    ) -> Self {
        Self {
            inputs: inputs.into(),
            output,
            convention,
        }
    }

    pub fn inputs(&self) -> &[SemanticType] {
        &self.inputs
    }

    pub fn output(&self) -> SemanticType {
        self.output
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    pub fn arity(&self) -> usize {
        self.inputs.len()
    }
}

impl fmt::Display for DelegateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.inputs.iter().map(|t| t.display_name()).collect();
        write!(
            f,
            "{} ({}) -> {}",
            self.convention,
            params.join(", "),
            self.output
        )
    }
}

impl FromStr for DelegateSignature {
    type Err = SignatureParseError;

    /// Parse `[convention] (type, ...) -> type`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let open = s
            .find('(')
            .ok_or_else(|| SignatureParseError::Malformed("missing '('".to_string()))?;

        let prefix = s[..open].trim();
        let convention = if prefix.is_empty() {
            CallingConvention::default()
        } else {
            prefix.parse()?
        };

        let close = matching_paren(s, open)?;
        let params = s[open + 1..close].trim();
        let output = s[close + 1..]
            .trim()
            .strip_prefix("->")
            .ok_or_else(|| SignatureParseError::Malformed("missing '->'".to_string()))?
            .parse()?;

        let inputs = if params.is_empty() {
            Vec::new()
        } else {
            split_top_level(params)
                .into_iter()
                .map(str::parse)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self::new(inputs, output, convention))
    }
}

fn matching_paren(s: &str, open: usize) -> Result<usize, SignatureParseError> {
    let mut depth = 0usize;
    for (idx, ch) in s.char_indices().skip_while(|(i, _)| *i < open) {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(idx);
                }
            }
            _ => {}
        }
    }
    Err(SignatureParseError::Malformed("unbalanced parentheses".to_string()))
}

fn split_top_level(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in params.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(params[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(params[start..].trim());
    parts
}

/// One resolvable native function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeDelegateDefinition {
    pub library_name: String,
    pub function_name: String,
    pub signature: DelegateSignature,
}

impl NativeDelegateDefinition {
    pub fn new(
        library_name: impl Into<String>,
        function_name: impl Into<String>,
        signature: DelegateSignature,
    ) -> Self {
        Self {
            library_name: library_name.into(),
            function_name: function_name.into(),
            signature,
        }
    }
}

impl fmt::Display for NativeDelegateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{} {}",
            self.library_name, self.function_name, self.signature
        )
    }
}
