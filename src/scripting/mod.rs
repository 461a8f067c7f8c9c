//! Rhai Frame Parser Scripts
//!
//! A project may ship a frame parser written in Rhai. The script turns one
//! decoded frame into the ordered list of field values that the
//! [`FrameBuilder`](crate::builder::FrameBuilder) maps onto datasets.
//!
//! ## Calling Conventions
//!
//! - `fn parse(frame)` - current convention
//! - `fn parse(frame, separator)` - legacy convention; the project separator
//!   is passed as the second argument and a migration notice is logged
//!
//! `frame` is a string for plain-text projects and a `Blob` for hexadecimal
//! and Base64 projects. The function must return an array; ints, floats,
//! bools, chars and strings are converted to field text.
//!
//! ## Host Functions
//!
//! - `hex_to_bytes(text)` / `bytes_to_hex(blob)`
//! - `bytes_to_string(blob)` - lossy UTF-8 conversion
//! - `parse_number(text)` - float, `NaN` when the text is not a number
//! - `checksum_xor(blob)`
//! - `u16_be(blob, offset)`, `u16_le`, `i16_be`, `i16_le`, `u32_be`, `u32_le`,
//!   `f32_be`, `f32_le` - fixed-width reads at a byte offset
//!
//! ## Example Scripts
//!
//! Comma separated text:
//! ```rhai
//! fn parse(frame) {
//!     frame.split(",")
//! }
//! ```
//!
//! Binary frame with two big-endian readings:
//! ```rhai
//! fn parse(frame) {
//!     [u16_be(frame, 0) / 100.0, i16_be(frame, 2)]
//! }
//! ```
//!
//! Each call runs with a fresh scope. Module-level constants are the only
//! state a script can share between frames.

mod engine;

pub use engine::ScriptEngine;

use crate::error::ScriptError;
use rhai::{Engine, AST};

/// Name of the entry point every parser script must define
pub const PARSE_FN: &str = "parse";

/// How the `parse` function expects to be called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// `parse(frame)`
    Current,
    /// `parse(frame, separator)`
    Legacy,
}

/// A compiled parser script
#[derive(Clone)]
pub struct ParseScript {
    ast: AST,
    source: String,
    convention: CallingConvention,
}

impl ParseScript {
    /// Compile a script and locate its `parse` function
    pub fn compile(engine: &Engine, source: &str) -> Result<Self, ScriptError> {
        let ast = engine
            .compile(source)
            .map_err(|e| ScriptError::Validation(format!("Compilation error: {}", e)))?;

        let arities: Vec<usize> = ast
            .iter_functions()
            .filter(|f| f.name == PARSE_FN)
            .map(|f| f.params.len())
            .collect();

        let convention = match arities.as_slice() {
            [] => {
                return Err(ScriptError::Validation(
                    "Script does not define a parse(frame) function".to_string(),
                ))
            }
            [1] => CallingConvention::Current,
            [2] => CallingConvention::Legacy,
            [n] => {
                return Err(ScriptError::Validation(format!(
                    "parse() must take 1 argument (frame), found {}",
                    n
                )))
            }
            _ => {
                return Err(ScriptError::Validation(format!(
                    "Script defines parse() {} times, expected exactly one",
                    arities.len()
                )))
            }
        };

        Ok(Self {
            ast,
            source: source.to_string(),
            convention,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    pub fn is_legacy(&self) -> bool {
        self.convention == CallingConvention::Legacy
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }
}

impl std::fmt::Debug for ParseScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseScript")
            .field("convention", &self.convention)
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_current() {
        let engine = Engine::new();
        let script = ParseScript::compile(&engine, "fn parse(frame) { frame.split(\",\") }")
            .unwrap();
        assert_eq!(script.convention(), CallingConvention::Current);
        assert!(!script.is_legacy());
    }

    #[test]
    fn test_detect_legacy() {
        let engine = Engine::new();
        let script =
            ParseScript::compile(&engine, "fn parse(frame, separator) { frame.split(separator) }")
                .unwrap();
        assert!(script.is_legacy());
    }

    #[test]
    fn test_missing_parse() {
        let engine = Engine::new();
        let err = ParseScript::compile(&engine, "fn decode(frame) { [] }").unwrap_err();
        assert!(matches!(err, ScriptError::Validation(_)));
    }

    #[test]
    fn test_duplicate_parse() {
        let engine = Engine::new();
        let source = "fn parse(frame) { [] }\nfn parse(frame, separator) { [] }";
        assert!(matches!(
            ParseScript::compile(&engine, source),
            Err(ScriptError::Validation(_))
        ));
    }

    #[test]
    fn test_wrong_arity() {
        let engine = Engine::new();
        assert!(ParseScript::compile(&engine, "fn parse() { [] }").is_err());
        assert!(ParseScript::compile(&engine, "fn parse(a, b, c) { [] }").is_err());
    }

    #[test]
    fn test_syntax_error() {
        let engine = Engine::new();
        assert!(matches!(
            ParseScript::compile(&engine, "fn parse(frame) { frame.split(\",\" }"),
            Err(ScriptError::Validation(_))
        ));
    }
}
