use serde_json::Value;

use crate::error::CodecError;

/// An encode/decode pair plus a stable name, selected once at worker
/// construction (§4.1). All four codecs round-trip the same value set —
/// null, booleans, 64-bit integers and floats, strings, sequences, and
/// string-keyed maps of the same — so callers can switch codecs without
/// touching handler code.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Plain `serde_json`, the library-agnostic canonical encoding.
pub struct JsonStdlibCodec;

impl Codec for JsonStdlibCodec {
    fn name(&self) -> &'static str {
        "json-stdlib"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Same wire format as [`JsonStdlibCodec`], decoded through `simd-json`'s
/// SIMD-accelerated parser. `simd-json` requires a mutable, padded input
/// buffer, so decode copies the frame body once before parsing in place.
pub struct JsonFastCodec;

impl Codec for JsonFastCodec {
    fn name(&self) -> &'static str {
        "json-fast"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut owned = bytes.to_vec();
        simd_json::serde::from_slice(&mut owned).map_err(|err| CodecError::SimdJson(err.to_string()))
    }
}

/// Same wire format as JSON, but encoded/decoded through `serde_json`'s
/// `Serializer`/`Deserializer` directly against a writer/slice rather than
/// the one-shot `to_vec`/`from_slice` helpers — the "typed" path a caller
/// reaches for once it already holds (or wants) the structured form instead
/// of routing everything through an intermediate `Value` allocation.
pub struct StructuredJsonCodec;

impl Codec for StructuredJsonCodec {
    fn name(&self) -> &'static str {
        "structured-json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut buf);
        serde::Serialize::serialize(value, &mut serializer)?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut deserializer = serde_json::Deserializer::from_slice(bytes);
        Ok(serde::Deserialize::deserialize(&mut deserializer)?)
    }
}

/// MessagePack binary form via `rmp-serde`.
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Resolves a codec by name, applying the `auto` selection policy from §4.1:
/// prefer `structured-json`, else `json-fast`, else `json-stdlib`. All three
/// are always compiled into this crate, so `auto` always resolves to
/// `structured-json`.
pub fn resolve_codec(name: &str) -> Result<Box<dyn Codec>, String> {
    match name {
        "auto" => Ok(Box::new(StructuredJsonCodec)),
        "json" | "json-stdlib" => Ok(Box::new(JsonStdlibCodec)),
        "json-fast" => Ok(Box::new(JsonFastCodec)),
        "structured-json" => Ok(Box::new(StructuredJsonCodec)),
        "msgpack" => Ok(Box::new(MsgpackCodec)),
        other => Err(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_values() -> Vec<Value> {
        vec![
            Value::Null,
            json!(true),
            json!(false),
            json!(0u64),
            json!(-17i64),
            json!(u64::MAX),
            json!(3.5),
            json!("hello \u{1F600} world"),
            json!([1, "two", 3.0, null]),
            json!({"id": 1, "method": "health", "body": {"nested": [1,2,3]}}),
        ]
    }

    fn assert_round_trips(codec: &dyn Codec) {
        for value in sample_values() {
            let encoded = codec.encode(&value).unwrap_or_else(|err| {
                panic!("{} failed to encode {value:?}: {err}", codec.name())
            });
            let decoded = codec.decode(&encoded).unwrap_or_else(|err| {
                panic!("{} failed to decode {value:?}: {err}", codec.name())
            });
            assert_eq!(decoded, value, "{} round-trip mismatch", codec.name());
        }
    }

    #[test]
    fn json_stdlib_round_trips() {
        assert_round_trips(&JsonStdlibCodec);
    }

    #[test]
    fn json_fast_round_trips() {
        assert_round_trips(&JsonFastCodec);
    }

    #[test]
    fn structured_json_round_trips() {
        assert_round_trips(&StructuredJsonCodec);
    }

    #[test]
    fn msgpack_round_trips() {
        assert_round_trips(&MsgpackCodec);
    }

    #[test]
    fn auto_resolves_to_structured_json() {
        assert_eq!(resolve_codec("auto").unwrap().name(), "structured-json");
    }

    #[test]
    fn unknown_codec_name_is_rejected() {
        assert!(resolve_codec("not-a-codec").is_err());
    }

    #[test]
    fn json_alias_resolves_to_stdlib() {
        assert_eq!(resolve_codec("json").unwrap().name(), "json-stdlib");
    }
}
