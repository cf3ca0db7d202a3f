use std::cell::RefCell;

use boa_engine::{js_string, Context, JsString, JsValue, Source};
use serde_json::Value;
use tracing::debug;

use offload_common::protocol::envelope::CallError;
use offload_common::protocol::error::{OffloadError, Result};

use crate::module::{CodeModule, Invocation};

const PRELUDE: &str = include_str!("prelude.js");

/// Code module backed by a JavaScript artifact evaluated in Boa.
///
/// The artifact runs once at load time against a fresh context that already
/// holds the `offload` prelude; every `offload.define` call it makes adds one
/// method. Values cross the engine boundary as JSON text, so the receiver
/// and arguments a script sees are exactly what the caller serialized.
///
/// Boa's `Context` is single-threaded, so a `ScriptModule` stays on the
/// thread that loaded it.
pub struct ScriptModule {
    artifact: String,
    ctx: RefCell<Context>,
}

impl ScriptModule {
    pub fn load(artifact: impl Into<String>, source: &[u8]) -> Result<Self> {
        let artifact = artifact.into();
        let mut ctx = Context::default();

        ctx.eval(Source::from_bytes(PRELUDE))
            .map_err(|e| OffloadError::Script(format!("prelude evaluation error: {}", e)))?;
        ctx.eval(Source::from_bytes(source)).map_err(|e| {
            OffloadError::Script(format!("artifact {} evaluation error: {}", artifact, e))
        })?;

        debug!("Script artifact {} evaluated", artifact);
        Ok(Self {
            artifact,
            ctx: RefCell::new(ctx),
        })
    }

    /// Calls `offload.<hook>` with string arguments.
    fn call_hook(&self, hook: &str, args: &[&str]) -> std::result::Result<JsValue, String> {
        let mut ctx = self.ctx.borrow_mut();
        let ctx = &mut *ctx;

        let offload = ctx
            .global_object()
            .get(js_string!("offload"), ctx)
            .map_err(|e| e.to_string())?;
        let Some(offload) = offload.as_object() else {
            return Err("global 'offload' is not an object".to_string());
        };

        let function = offload
            .get(JsString::from(hook), ctx)
            .map_err(|e| e.to_string())?;
        let Some(function) = function.as_object() else {
            return Err(format!("offload.{} is not defined", hook));
        };

        let args: Vec<JsValue> = args
            .iter()
            .map(|arg| JsValue::from(JsString::from(*arg)))
            .collect();

        function
            .call(&JsValue::undefined(), &args, ctx)
            .map_err(|e| e.to_string())
    }
}

impl CodeModule for ScriptModule {
    fn artifact(&self) -> &str {
        &self.artifact
    }

    fn has_type(&self, type_name: &str) -> bool {
        match self.call_hook("__hasType", &[type_name]) {
            Ok(found) => found.as_boolean().unwrap_or(false),
            Err(e) => {
                debug!("Type lookup for {} failed: {}", type_name, e);
                false
            }
        }
    }

    fn return_type(&self, type_name: &str, method: &str, param_types: &[String]) -> Option<String> {
        let param_types = serde_json::to_string(param_types).ok()?;
        let found = self
            .call_hook("__returnType", &[type_name, method, &param_types])
            .ok()?;
        found.as_string().map(|s| s.to_std_string_escaped())
    }

    fn invoke(&mut self, call: Invocation<'_>) -> std::result::Result<Value, CallError> {
        let param_types = serde_json::to_string(call.param_types)
            .map_err(|e| CallError::materialization(e.to_string()))?;
        let receiver = serde_json::to_string(call.receiver)
            .map_err(|e| CallError::materialization(format!("receiver: {}", e)))?;
        let args = serde_json::to_string(&call.args)
            .map_err(|e| CallError::materialization(e.to_string()))?;

        let output = self
            .call_hook(
                "__invoke",
                &[call.type_name, call.method, &param_types, &receiver, &args],
            )
            .map_err(CallError::invocation)?;

        let text = output
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .ok_or_else(|| CallError::invocation("script returned a non-serializable value"))?;
        serde_json::from_str(&text).map_err(|e| CallError::invocation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_common::ErrorKind;
    use serde_json::json;

    const CALC: &str = r#"
        offload.define("Calc", "add", ["int", "int"], "int", function (self, a, b) {
            return a + b;
        });
        offload.define("Calc", "scaled", ["int"], "int", function (self, a) {
            return a * self.factor;
        });
        offload.define("Calc", "divide", ["int", "int"], "int", function (self, a, b) {
            if (b === 0) { throw new Error("division by zero"); }
            return Math.trunc(a / b);
        });
    "#;

    fn invoke(module: &mut ScriptModule, method: &str, types: &[&str], receiver: Value, args: Vec<Value>) -> std::result::Result<Value, CallError> {
        let param_types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
        module.invoke(Invocation {
            type_name: "Calc",
            method,
            param_types: &param_types,
            receiver: &receiver,
            args,
        })
    }

    #[test]
    fn test_defined_methods_are_resolvable() {
        let module = ScriptModule::load("App", CALC.as_bytes()).unwrap();
        assert!(module.has_type("Calc"));
        assert!(!module.has_type("Missing"));
        assert_eq!(
            module.return_type("Calc", "add", &["int".to_string(), "int".to_string()]),
            Some("int".to_string())
        );
        assert_eq!(module.return_type("Calc", "add", &["int".to_string()]), None);
    }

    #[test]
    fn test_invoke_uses_receiver_state() {
        let mut module = ScriptModule::load("App", CALC.as_bytes()).unwrap();
        let sum = invoke(&mut module, "add", &["int", "int"], Value::Null, vec![json!(2), json!(3)]);
        assert_eq!(sum.unwrap(), json!(5));

        let scaled = invoke(&mut module, "scaled", &["int"], json!({"factor": 4}), vec![json!(3)]);
        assert_eq!(scaled.unwrap(), json!(12));
    }

    #[test]
    fn test_thrown_error_is_invocation_error() {
        let mut module = ScriptModule::load("App", CALC.as_bytes()).unwrap();
        let err = invoke(&mut module, "divide", &["int", "int"], Value::Null, vec![json!(1), json!(0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invocation);
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn test_syntax_error_fails_load() {
        let result = ScriptModule::load("Broken", b"offload.define(");
        assert!(matches!(result, Err(OffloadError::Script(_))));
    }
}
