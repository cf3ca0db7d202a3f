use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Return type name reserved for error results. Not a legal type identifier,
/// so it can never collide with an application type.
pub const ERROR_RETURN_TYPE: &str = "!error";

/// A single marshaled method invocation.
///
/// `receiver` and `params` are opaque to the gateway; only the execution host
/// materializes them against the declared types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEnvelope {
    pub target_type: String,
    pub receiver: Value,
    pub method: String,
    pub param_types: Vec<String>,
    pub params: Vec<Value>,
}

impl CallEnvelope {
    /// Creates an envelope with a null receiver state and no parameters.
    /// Hosts materialize a null receiver as the type's default value.
    pub fn new(target_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            receiver: Value::Null,
            method: method.into(),
            param_types: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn with_receiver(mut self, receiver: Value) -> Self {
        self.receiver = receiver;
        self
    }

    /// Appends one positional parameter with its declared type name.
    pub fn param(mut self, type_name: impl Into<String>, value: Value) -> Self {
        self.param_types.push(type_name.into());
        self.params.push(value);
        self
    }
}

/// Category of a failed call, reported back on the normal return channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    #[serde(rename = "TypeResolutionError")]
    TypeResolution,
    #[serde(rename = "MethodResolutionError")]
    MethodResolution,
    #[serde(rename = "MaterializationError")]
    Materialization,
    #[serde(rename = "InvocationError")]
    Invocation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TypeResolution => "TypeResolutionError",
            ErrorKind::MethodResolution => "MethodResolutionError",
            ErrorKind::Materialization => "MaterializationError",
            ErrorKind::Invocation => "InvocationError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeResolution, message)
    }

    pub fn method_resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MethodResolution, message)
    }

    pub fn materialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Materialization, message)
    }

    pub fn invocation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invocation, message)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CallError {}

/// Outcome of a dispatched call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Value { return_type: String, value: Value },
    Error(CallError),
}

impl CallResult {
    pub fn value(return_type: impl Into<String>, value: Value) -> Self {
        CallResult::Value {
            return_type: return_type.into(),
            value,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CallResult::Error(_))
    }

    /// Converts into a plain `Result`, dropping the return type name.
    pub fn into_result(self) -> std::result::Result<Value, CallError> {
        match self {
            CallResult::Value { value, .. } => Ok(value),
            CallResult::Error(err) => Err(err),
        }
    }
}

impl From<CallError> for CallResult {
    fn from(err: CallError) -> Self {
        CallResult::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_builder() {
        let envelope = CallEnvelope::new("Calc", "add")
            .param("int", json!(2))
            .param("int", json!(3));

        assert_eq!(envelope.target_type, "Calc");
        assert_eq!(envelope.method, "add");
        assert_eq!(envelope.param_types, vec!["int", "int"]);
        assert_eq!(envelope.params, vec![json!(2), json!(3)]);
        assert_eq!(envelope.receiver, Value::Null);
    }

    #[test]
    fn test_error_kind_serializes_with_error_suffix() {
        let err = CallError::method_resolution("no such method");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value, json!({"kind": "MethodResolutionError", "message": "no such method"}));
    }

    #[test]
    fn test_call_result_into_result() {
        let ok = CallResult::value("int", json!(5));
        assert_eq!(ok.into_result().unwrap(), json!(5));

        let err: CallResult = CallError::invocation("boom").into();
        assert!(err.is_error());
        assert_eq!(err.into_result().unwrap_err().kind, ErrorKind::Invocation);
    }
}
