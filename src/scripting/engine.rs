//! Rhai Script Engine Implementation
//!
//! Runs the project's `parse` function against decoded payloads inside a
//! sandboxed Rhai engine. Without a script, fields are obtained by splitting
//! the payload text on the project separator.

use crate::error::ScriptError;
use crate::frame::{DecoderMethod, Payload};
use crate::scripting::{CallingConvention, ParseScript, PARSE_FN};
use rhai::{Blob, Dynamic, Engine, EvalAltResult, Scope, FLOAT, INT};

/// Text input used to check a script before a session starts
const DRY_RUN_TEXT: &[u8] = b"0,0,0";

/// Length of the zeroed frame used to check binary parsers
const DRY_RUN_BLOB_LEN: usize = 256;

/// The frame parser executor
pub struct ScriptEngine {
    /// The Rhai engine instance
    engine: Engine,
    /// Compiled parser, `None` when fields are split on the separator
    script: Option<ParseScript>,
    separator: String,
    decoder: DecoderMethod,
}

impl ScriptEngine {
    /// Field splitter used when the project has no parser script
    pub fn split_only(separator: impl Into<String>) -> Self {
        Self {
            engine: Self::sandboxed_engine(),
            script: None,
            separator: separator.into(),
            decoder: DecoderMethod::PlainText,
        }
    }

    /// Compile a parser script and dry-run it once
    pub fn load(
        source: &str,
        separator: impl Into<String>,
        decoder: DecoderMethod,
    ) -> Result<Self, ScriptError> {
        let engine = Self::sandboxed_engine();
        let script = ParseScript::compile(&engine, source)?;

        if script.is_legacy() {
            tracing::warn!(
                "Frame parser uses the legacy parse(frame, separator) signature; \
                 consider migrating to parse(frame)"
            );
        }

        let this = Self {
            engine,
            script: Some(script),
            separator: separator.into(),
            decoder,
        };

        let sample = if decoder.is_textual() {
            Payload::new(DRY_RUN_TEXT.to_vec(), decoder)
        } else {
            Payload::new(vec![0; DRY_RUN_BLOB_LEN], decoder)
        };
        this.parse(&sample).map_err(|e| match e {
            ScriptError::Runtime(msg) => {
                ScriptError::Validation(format!("Dry run failed: {}", msg))
            }
            other => other,
        })?;

        tracing::debug!("Frame parser script validated");
        Ok(this)
    }

    /// Build a Rhai engine with safety limits and the host API
    fn sandboxed_engine() -> Engine {
        let mut engine = Engine::new();

        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(200_000);
        engine.set_max_string_size(1 << 20);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(1_000);
        engine.disable_symbol("eval");
        engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());

        engine.on_print(|text| tracing::debug!(target: "framevis_rs::script", "{}", text));
        engine.on_debug(|text, _, pos| {
            tracing::debug!(target: "framevis_rs::script", "{:?} {}", pos, text)
        });

        // ===== Conversion Functions =====

        engine.register_fn(
            "hex_to_bytes",
            |text: &str| -> Result<Blob, Box<EvalAltResult>> {
                let digits: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                hex::decode(digits).map_err(|e| format!("hex_to_bytes: {}", e).into())
            },
        );
        engine.register_fn("bytes_to_hex", |bytes: Blob| hex::encode_upper(bytes));
        engine.register_fn("bytes_to_string", |bytes: Blob| {
            String::from_utf8_lossy(&bytes).into_owned()
        });
        engine.register_fn("parse_number", |text: &str| -> FLOAT {
            text.trim().parse::<FLOAT>().unwrap_or(FLOAT::NAN)
        });
        engine.register_fn("checksum_xor", |bytes: Blob| -> INT {
            bytes.iter().fold(0u8, |acc, b| acc ^ b) as INT
        });

        // ===== Fixed-width Reads =====

        engine.register_fn("u16_be", |b: Blob, at: INT| {
            read::<2>(&b, at).map(|v| u16::from_be_bytes(v) as INT)
        });
        engine.register_fn("u16_le", |b: Blob, at: INT| {
            read::<2>(&b, at).map(|v| u16::from_le_bytes(v) as INT)
        });
        engine.register_fn("i16_be", |b: Blob, at: INT| {
            read::<2>(&b, at).map(|v| i16::from_be_bytes(v) as INT)
        });
        engine.register_fn("i16_le", |b: Blob, at: INT| {
            read::<2>(&b, at).map(|v| i16::from_le_bytes(v) as INT)
        });
        engine.register_fn("u32_be", |b: Blob, at: INT| {
            read::<4>(&b, at).map(|v| u32::from_be_bytes(v) as INT)
        });
        engine.register_fn("u32_le", |b: Blob, at: INT| {
            read::<4>(&b, at).map(|v| u32::from_le_bytes(v) as INT)
        });
        engine.register_fn("f32_be", |b: Blob, at: INT| {
            read::<4>(&b, at).map(|v| f32::from_be_bytes(v) as FLOAT)
        });
        engine.register_fn("f32_le", |b: Blob, at: INT| {
            read::<4>(&b, at).map(|v| f32::from_le_bytes(v) as FLOAT)
        });

        engine
    }

    /// Extract the field list from one payload
    pub fn parse(&self, payload: &Payload) -> Result<Vec<String>, ScriptError> {
        let Some(script) = &self.script else {
            return self.split(payload);
        };

        let frame = if self.decoder.is_textual() {
            let text = payload
                .as_text()
                .map_err(|e| ScriptError::Runtime(e.to_string()))?;
            Dynamic::from(text.to_string())
        } else {
            Dynamic::from_blob(payload.bytes().to_vec())
        };

        let mut scope = Scope::new();
        let result = match script.convention() {
            CallingConvention::Current => {
                self.engine
                    .call_fn::<Dynamic>(&mut scope, script.ast(), PARSE_FN, (frame,))
            }
            CallingConvention::Legacy => self.engine.call_fn::<Dynamic>(
                &mut scope,
                script.ast(),
                PARSE_FN,
                (frame, self.separator.clone()),
            ),
        }
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        to_fields(result)
    }

    fn split(&self, payload: &Payload) -> Result<Vec<String>, ScriptError> {
        let text = payload
            .as_text()
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        Ok(text
            .split(self.separator.as_str())
            .map(|field| field.trim().to_string())
            .collect())
    }

    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }

    pub fn is_legacy(&self) -> bool {
        self.script.as_ref().is_some_and(ParseScript::is_legacy)
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn script(&self) -> Option<&ParseScript> {
        self.script.as_ref()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("script", &self.script.as_ref().map(ParseScript::convention))
            .field("separator", &self.separator)
            .field("decoder", &self.decoder)
            .finish()
    }
}

fn read<const N: usize>(bytes: &[u8], at: INT) -> Result<[u8; N], Box<EvalAltResult>> {
    usize::try_from(at)
        .ok()
        .and_then(|start| bytes.get(start..start.checked_add(N)?))
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| {
            format!(
                "read of {} bytes at offset {} is out of bounds (length {})",
                N,
                at,
                bytes.len()
            )
            .into()
        })
}

/// Convert the value returned by `parse` into field strings
fn to_fields(value: Dynamic) -> Result<Vec<String>, ScriptError> {
    let type_name = value.type_name();
    let array = value.into_array().map_err(|_| {
        ScriptError::Runtime(format!("parse() must return an array, got {}", type_name))
    })?;

    array
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            if item.is_string() || item.is_int() || item.is_float() || item.is_bool() || item.is_char()
            {
                Ok(item.to_string())
            } else {
                Err(ScriptError::Runtime(format!(
                    "parse() element {} has unsupported type {}",
                    i,
                    item.type_name()
                )))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Payload {
        Payload::new(s.as_bytes().to_vec(), DecoderMethod::PlainText)
    }

    #[test]
    fn test_split_only() {
        let engine = ScriptEngine::split_only(";");
        assert!(!engine.has_script());
        assert_eq!(engine.parse(&text(" 1; 2 ;3")).unwrap(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_current_convention() {
        let engine = ScriptEngine::load(
            "fn parse(frame) { frame.split(\",\") }",
            ",",
            DecoderMethod::PlainText,
        )
        .unwrap();
        assert_eq!(engine.parse(&text("4,5,6")).unwrap(), vec!["4", "5", "6"]);
    }

    #[test]
    fn test_legacy_convention_gets_separator() {
        let engine = ScriptEngine::load(
            "fn parse(frame, separator) { let parts = frame.split(separator); parts.push(separator); parts }",
            ";",
            DecoderMethod::PlainText,
        )
        .unwrap();
        assert!(engine.is_legacy());
        assert_eq!(engine.parse(&text("1;2")).unwrap(), vec!["1", "2", ";"]);
    }

    #[test]
    fn test_numeric_results_become_text() {
        let engine = ScriptEngine::load(
            "fn parse(frame) { [1, 2.5, true, \"x\"] }",
            ",",
            DecoderMethod::PlainText,
        )
        .unwrap();
        assert_eq!(engine.parse(&text("ignored")).unwrap(), vec!["1", "2.5", "true", "x"]);
    }

    #[test]
    fn test_idempotent() {
        let source = r#"
fn parse(frame) {
    let out = [];
    for part in frame.split(",") {
        out.push(parse_number(part) * 2.0);
    }
    out
}
"#;
        let engine = ScriptEngine::load(source, ",", DecoderMethod::PlainText).unwrap();
        let payload = text("1,2,3");
        let first = engine.parse(&payload).unwrap();
        let second = engine.parse(&payload).unwrap();
        assert_eq!(first, second);
        let values: Vec<f64> = first.iter().map(|v| v.parse().unwrap()).collect();
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_binary_payload() {
        let source = "fn parse(frame) { [u16_be(frame, 0), i16_le(frame, 2), bytes_to_hex(frame)] }";
        let engine = ScriptEngine::load(source, ",", DecoderMethod::Hexadecimal).unwrap();
        let payload = Payload::new(vec![0x01, 0x02, 0xFE, 0xFF], DecoderMethod::Hexadecimal);
        assert_eq!(engine.parse(&payload).unwrap(), vec!["258", "-2", "0102FEFF"]);
    }

    #[test]
    fn test_binary_parser_reading_past_text_sample() {
        let source = "fn parse(frame) { [f32_be(frame, 4), u16_le(frame, 8)] }";
        for decoder in [DecoderMethod::Hexadecimal, DecoderMethod::Base64] {
            let engine = ScriptEngine::load(source, ",", decoder).unwrap();
            let mut bytes = vec![0u8; 10];
            bytes[4..8].copy_from_slice(&1.5f32.to_be_bytes());
            bytes[8..10].copy_from_slice(&513u16.to_le_bytes());
            assert_eq!(
                engine.parse(&Payload::new(bytes, decoder)).unwrap(),
                vec!["1.5", "513"]
            );
        }
    }

    #[test]
    fn test_runtime_error_is_per_frame() {
        let source = "fn parse(frame) { let p = frame.split(\",\"); if p.len() < 3 { throw \"short\"; } p }";
        let engine = ScriptEngine::load(source, ",", DecoderMethod::PlainText).unwrap();
        assert!(matches!(engine.parse(&text("1,2")), Err(ScriptError::Runtime(_))));
        assert_eq!(engine.parse(&text("1,2,3")).unwrap().len(), 3);
    }

    #[test]
    fn test_dry_run_failure_is_validation_error() {
        let err = ScriptEngine::load(
            "fn parse(frame) { throw \"always\"; }",
            ",",
            DecoderMethod::PlainText,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::Validation(_)));

        let err = ScriptEngine::load("fn parse(frame) { 42 }", ",", DecoderMethod::PlainText)
            .unwrap_err();
        assert!(matches!(err, ScriptError::Validation(_)));
    }

    #[test]
    fn test_eval_disabled() {
        let result = ScriptEngine::load(
            "fn parse(frame) { eval(\"[1]\") }",
            ",",
            DecoderMethod::PlainText,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_runaway_script_is_stopped() {
        let result = ScriptEngine::load(
            "fn parse(frame) { loop { } }",
            ",",
            DecoderMethod::PlainText,
        );
        assert!(matches!(result, Err(ScriptError::Validation(_))));
    }

    #[test]
    fn test_out_of_bounds_read() {
        let engine = ScriptEngine::load(
            "fn parse(frame) { [frame.len()] }",
            ",",
            DecoderMethod::Base64,
        )
        .unwrap();
        assert_eq!(engine.parse(&Payload::new(vec![1, 2], DecoderMethod::Base64)).unwrap(), vec!["2"]);

        let engine = ScriptEngine::split_only(",");
        assert!(engine.parse(&Payload::new(vec![0xFF], DecoderMethod::Hexadecimal)).is_err());
        assert!(read::<4>(&[1, 2, 3], 0).is_err());
        assert!(read::<2>(&[1, 2, 3], -1).is_err());
        assert_eq!(read::<2>(&[1, 2, 3], 1).unwrap(), [2, 3]);
    }
}
