use serde_json::Value;

use offload_common::protocol::envelope::CallError;

/// One resolved call handed to a [`CodeModule`].
///
/// Parameter values are already in canonical form for primitive types;
/// values of module-defined types are passed through as received.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub type_name: &'a str,
    pub method: &'a str,
    pub param_types: &'a [String],
    pub receiver: &'a Value,
    pub args: Vec<Value>,
}

/// Type-erased registry of callable methods loaded from one code artifact.
///
/// Methods are keyed by `(type name, method name, parameter type names)`;
/// lookups match the parameter list exactly.
pub trait CodeModule {
    /// Short name of the artifact this module was loaded from.
    fn artifact(&self) -> &str;

    fn has_type(&self, type_name: &str) -> bool;

    /// Declared return type name of the method with this exact signature.
    fn return_type(&self, type_name: &str, method: &str, param_types: &[String]) -> Option<String>;

    /// Materializes the receiver and runs the method.
    ///
    /// Failures inside the called code come back as
    /// [`ErrorKind::Invocation`](offload_common::ErrorKind::Invocation), a
    /// receiver or argument that does not decode as
    /// [`ErrorKind::Materialization`](offload_common::ErrorKind::Materialization).
    fn invoke(&mut self, call: Invocation<'_>) -> Result<Value, CallError>;
}
