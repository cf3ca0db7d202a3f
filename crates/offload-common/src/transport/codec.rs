use serde_json::Value;

use crate::protocol::envelope::{CallEnvelope, CallError, CallResult, ERROR_RETURN_TYPE};
use crate::protocol::error::{OffloadError, Result};

/// Number of frames in an encoded [`CallEnvelope`].
pub const ENVELOPE_FIELDS: usize = 5;

/// Number of frames in an encoded [`CallResult`].
pub const RESULT_FIELDS: usize = 2;

/// JSON codec for the call envelope and call result fields.
///
/// An envelope travels as five frames in a fixed order:
///
/// ```text
/// [target type (UTF-8)] [receiver state (JSON)] [method (UTF-8)]
/// [param type names (JSON array)] [param values (JSON array)]
/// ```
///
/// A result travels as two frames: the return type name (UTF-8) and the
/// return value (JSON). Errors use the reserved [`ERROR_RETURN_TYPE`] marker.
///
/// # Example
///
/// ```
/// use offload_common::transport::JsonCodec;
/// use offload_common::protocol::CallEnvelope;
/// use serde_json::json;
///
/// let envelope = CallEnvelope::new("Calc", "add")
///     .param("int", json!(2))
///     .param("int", json!(3));
///
/// let fields = JsonCodec::encode_envelope(&envelope).unwrap();
/// let decoded = JsonCodec::decode_envelope(fields).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    /// Encode an envelope into its five wire fields
    pub fn encode_envelope(envelope: &CallEnvelope) -> Result<[Vec<u8>; ENVELOPE_FIELDS]> {
        Ok([
            envelope.target_type.as_bytes().to_vec(),
            serde_json::to_vec(&envelope.receiver)?,
            envelope.method.as_bytes().to_vec(),
            serde_json::to_vec(&envelope.param_types)?,
            serde_json::to_vec(&envelope.params)?,
        ])
    }

    /// Decode an envelope from its five wire fields
    pub fn decode_envelope(fields: [Vec<u8>; ENVELOPE_FIELDS]) -> Result<CallEnvelope> {
        let [target_type, receiver, method, param_types, params] = fields;
        Ok(CallEnvelope {
            target_type: String::from_utf8(target_type)?,
            receiver: serde_json::from_slice(&receiver)?,
            method: String::from_utf8(method)?,
            param_types: serde_json::from_slice(&param_types)?,
            params: serde_json::from_slice(&params)?,
        })
    }

    /// Encode a result into its two wire fields
    pub fn encode_result(result: &CallResult) -> Result<[Vec<u8>; RESULT_FIELDS]> {
        match result {
            CallResult::Value { return_type, value } => Ok([
                return_type.as_bytes().to_vec(),
                serde_json::to_vec(value)?,
            ]),
            CallResult::Error(err) => Ok([
                ERROR_RETURN_TYPE.as_bytes().to_vec(),
                serde_json::to_vec(err)?,
            ]),
        }
    }

    /// Decode a result from its two wire fields
    pub fn decode_result(fields: [Vec<u8>; RESULT_FIELDS]) -> Result<CallResult> {
        let [return_type, value] = fields;
        let return_type = String::from_utf8(return_type)?;

        if return_type == ERROR_RETURN_TYPE {
            let err: CallError = serde_json::from_slice(&value).map_err(|e| {
                OffloadError::Protocol(format!("malformed error result: {}", e))
            })?;
            return Ok(CallResult::Error(err));
        }

        let value: Value = serde_json::from_slice(&value)?;
        Ok(CallResult::Value { return_type, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_envelope_field_order() {
        let envelope = CallEnvelope::new("Calc", "add")
            .with_receiver(json!({"offset": 1}))
            .param("int", json!(2));

        let fields = JsonCodec::encode_envelope(&envelope).unwrap();

        assert_eq!(fields[0], b"Calc");
        assert_eq!(serde_json::from_slice::<Value>(&fields[1]).unwrap(), json!({"offset": 1}));
        assert_eq!(fields[2], b"add");
        assert_eq!(serde_json::from_slice::<Value>(&fields[3]).unwrap(), json!(["int"]));
        assert_eq!(serde_json::from_slice::<Value>(&fields[4]).unwrap(), json!([2]));
    }

    #[test]
    fn test_error_result_uses_reserved_marker() {
        let result = CallResult::Error(CallError::type_resolution("unknown type Foo"));
        let fields = JsonCodec::encode_result(&result).unwrap();
        assert_eq!(fields[0], ERROR_RETURN_TYPE.as_bytes());

        let decoded = JsonCodec::decode_result(fields).unwrap();
        match decoded {
            CallResult::Error(err) => {
                assert_eq!(err.kind, ErrorKind::TypeResolution);
                assert_eq!(err.message, "unknown type Foo");
            }
            other => panic!("expected error result, got {:?}", other),
        }
    }

    #[test]
    fn test_value_result_decodes() {
        let fields = [b"int".to_vec(), b"5".to_vec()];
        let decoded = JsonCodec::decode_result(fields).unwrap();
        assert_eq!(decoded, CallResult::value("int", json!(5)));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8_type_name() {
        let fields = [
            vec![0xff, 0xfe],
            b"{}".to_vec(),
            b"add".to_vec(),
            b"[]".to_vec(),
            b"[]".to_vec(),
        ];
        assert!(matches!(
            JsonCodec::decode_envelope(fields),
            Err(OffloadError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_params() {
        let fields = [
            b"Calc".to_vec(),
            b"{}".to_vec(),
            b"add".to_vec(),
            b"[\"int\"]".to_vec(),
            b"[2,".to_vec(),
        ];
        assert!(matches!(
            JsonCodec::decode_envelope(fields),
            Err(OffloadError::JsonSerialization(_))
        ));
    }
}
