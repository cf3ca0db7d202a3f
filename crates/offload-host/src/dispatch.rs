//! Generic call dispatch against a loaded [`CodeModule`].
//!
//! [`dispatch`] is the whole host-side contract for one call and does not
//! touch the network, so the same function serves remote execution (behind
//! the host's command loop) and local execution on the caller's side.

use serde_json::Value;
use tracing::debug;

use offload_common::protocol::envelope::{CallEnvelope, CallError, CallResult};
use offload_common::protocol::types::PrimitiveType;

use crate::module::{CodeModule, Invocation};

/// Resolves and runs one call.
///
/// Steps, in order: resolve the target type, resolve every parameter type
/// (primitive or module-defined), materialize primitive arguments, find the
/// method whose parameter list matches exactly, invoke it with the receiver,
/// and package the declared return type with the returned value.
pub fn dispatch(module: &mut dyn CodeModule, envelope: &CallEnvelope) -> CallResult {
    match try_dispatch(module, envelope) {
        Ok(result) => result,
        Err(err) => {
            debug!(
                "{}.{} failed: {}",
                envelope.target_type, envelope.method, err
            );
            CallResult::Error(err)
        }
    }
}

fn try_dispatch(module: &mut dyn CodeModule, envelope: &CallEnvelope) -> Result<CallResult, CallError> {
    if !module.has_type(&envelope.target_type) {
        return Err(CallError::type_resolution(format!(
            "type '{}' not found in artifact {}",
            envelope.target_type,
            module.artifact()
        )));
    }

    let mut declared = Vec::with_capacity(envelope.param_types.len());
    for name in &envelope.param_types {
        match PrimitiveType::parse(name) {
            Some(PrimitiveType::Void) => {
                return Err(CallError::type_resolution("'void' is not a parameter type"));
            }
            Some(primitive) => declared.push(Some(primitive)),
            None if module.has_type(name) => declared.push(None),
            None => {
                return Err(CallError::type_resolution(format!(
                    "parameter type '{}' not found",
                    name
                )));
            }
        }
    }

    if envelope.params.len() != declared.len() {
        return Err(CallError::materialization(format!(
            "{} parameter type(s) declared but {} value(s) given",
            declared.len(),
            envelope.params.len()
        )));
    }

    let args = declared
        .iter()
        .zip(&envelope.params)
        .enumerate()
        .map(|(index, (primitive, value))| match primitive {
            Some(primitive) => primitive
                .materialize(value)
                .map_err(|e| CallError::materialization(format!("argument {}: {}", index, e))),
            None => Ok(value.clone()),
        })
        .collect::<Result<Vec<Value>, CallError>>()?;

    let return_type = module
        .return_type(&envelope.target_type, &envelope.method, &envelope.param_types)
        .ok_or_else(|| {
            CallError::method_resolution(format!(
                "{}.{}({})",
                envelope.target_type,
                envelope.method,
                envelope.param_types.join(", ")
            ))
        })?;

    let value = module.invoke(Invocation {
        type_name: &envelope.target_type,
        method: &envelope.method,
        param_types: &envelope.param_types,
        receiver: &envelope.receiver,
        args,
    })?;

    let value = match PrimitiveType::parse(&return_type) {
        Some(primitive) => primitive.materialize(&value).map_err(|e| {
            CallError::invocation(format!("return value does not match '{}': {}", return_type, e))
        })?,
        None => value,
    };

    Ok(CallResult::value(return_type, value))
}
