//! Native method tables.
//!
//! A [`MethodTable`] maps `(type, method, parameter types)` to Rust closures.
//! Receivers and arguments are materialized through serde, so any
//! `Deserialize` type can act as a remote receiver.
//!
//! ```
//! use offload_host::MethodTable;
//! use serde::Deserialize;
//!
//! #[derive(Default, Deserialize)]
//! struct Calc;
//!
//! let mut table = MethodTable::new("App");
//! table
//!     .register_type::<Calc>("Calc")
//!     .method("add", |_: &mut Calc, a: i32, b: i32| Ok::<_, String>(a + b));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use offload_common::protocol::envelope::CallError;

use crate::module::{CodeModule, Invocation};

/// Wire name of a parameter or return type.
pub trait RemoteType {
    const TYPE_NAME: &'static str;
}

impl RemoteType for i32 {
    const TYPE_NAME: &'static str = "int";
}

impl RemoteType for i64 {
    const TYPE_NAME: &'static str = "long";
}

impl RemoteType for bool {
    const TYPE_NAME: &'static str = "boolean";
}

impl RemoteType for f64 {
    const TYPE_NAME: &'static str = "double";
}

impl RemoteType for String {
    const TYPE_NAME: &'static str = "String";
}

impl RemoteType for () {
    const TYPE_NAME: &'static str = "void";
}

/// A closure callable as a remote method on receiver type `T`.
///
/// Implemented for `Fn(&mut T, A1, .., An) -> Result<R, E>` with up to four
/// arguments, where every argument and `R` implement [`RemoteType`].
pub trait RemoteMethod<T, Args>: 'static {
    fn param_types() -> Vec<String>;
    fn return_type() -> &'static str;
    fn call(&self, receiver: &mut T, args: Vec<Value>) -> Result<Value, CallError>;
}

macro_rules! impl_remote_method {
    ($($ty:ident $var:ident),*) => {
        impl<T, F, R, E, $($ty,)*> RemoteMethod<T, ($($ty,)*)> for F
        where
            F: Fn(&mut T, $($ty),*) -> Result<R, E> + 'static,
            R: RemoteType + Serialize,
            E: fmt::Display,
            $($ty: RemoteType + DeserializeOwned,)*
        {
            fn param_types() -> Vec<String> {
                vec![$(<$ty as RemoteType>::TYPE_NAME.to_string()),*]
            }

            fn return_type() -> &'static str {
                R::TYPE_NAME
            }

            #[allow(unused_mut, unused_variables)]
            fn call(&self, receiver: &mut T, args: Vec<Value>) -> Result<Value, CallError> {
                let mut args = args.into_iter();
                $(let $var: $ty = argument(args.next())?;)*
                let output = (self)(receiver, $($var),*)
                    .map_err(|e| CallError::invocation(e.to_string()))?;
                serde_json::to_value(output)
                    .map_err(|e| CallError::invocation(format!("cannot serialize return value: {}", e)))
            }
        }
    };
}

impl_remote_method!();
impl_remote_method!(A1 a1);
impl_remote_method!(A1 a1, A2 a2);
impl_remote_method!(A1 a1, A2 a2, A3 a3);
impl_remote_method!(A1 a1, A2 a2, A3 a3, A4 a4);

fn argument<A: DeserializeOwned>(value: Option<Value>) -> Result<A, CallError> {
    let value = value.ok_or_else(|| CallError::materialization("missing argument"))?;
    serde_json::from_value(value).map_err(|e| CallError::materialization(e.to_string()))
}

type Thunk = Box<dyn Fn(&Value, Vec<Value>) -> Result<Value, CallError>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Signature {
    method: String,
    params: Vec<String>,
}

struct MethodEntry {
    return_type: &'static str,
    thunk: Thunk,
}

/// Native [`CodeModule`] built from Rust closures.
pub struct MethodTable {
    artifact: String,
    types: HashMap<String, HashMap<Signature, MethodEntry>>,
}

impl MethodTable {
    pub fn new(artifact: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            types: HashMap::new(),
        }
    }

    /// Declares a receiver type. A `null` receiver state materializes as
    /// `T::default()`.
    pub fn register_type<T>(&mut self, type_name: impl Into<String>) -> TypeBuilder<'_, T>
    where
        T: DeserializeOwned + Default + 'static,
    {
        let type_name = type_name.into();
        self.types.entry(type_name.clone()).or_default();
        TypeBuilder {
            table: self,
            type_name,
            _receiver: PhantomData,
        }
    }

    pub fn method_count(&self) -> usize {
        self.types.values().map(HashMap::len).sum()
    }

    fn entry(&self, type_name: &str, method: &str, param_types: &[String]) -> Option<&MethodEntry> {
        let signature = Signature {
            method: method.to_string(),
            params: param_types.to_vec(),
        };
        self.types.get(type_name)?.get(&signature)
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("artifact", &self.artifact)
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Adds methods to one receiver type of a [`MethodTable`].
pub struct TypeBuilder<'a, T> {
    table: &'a mut MethodTable,
    type_name: String,
    _receiver: PhantomData<fn() -> T>,
}

impl<'a, T> TypeBuilder<'a, T>
where
    T: DeserializeOwned + Default + 'static,
{
    /// Registers `f` under `name`; its parameter and return type names come
    /// from the closure signature. A later registration with the same
    /// signature replaces the earlier one.
    pub fn method<Args, M>(self, name: impl Into<String>, f: M) -> Self
    where
        M: RemoteMethod<T, Args>,
    {
        let signature = Signature {
            method: name.into(),
            params: M::param_types(),
        };

        let thunk: Thunk = Box::new(move |receiver, args| {
            let mut target = receiver_of::<T>(receiver)?;
            f.call(&mut target, args)
        });

        self.table
            .types
            .entry(self.type_name.clone())
            .or_default()
            .insert(
                signature,
                MethodEntry {
                    return_type: M::return_type(),
                    thunk,
                },
            );
        self
    }
}

/// Null, or an empty object the type cannot take as a map (unit structs),
/// means "no state": the receiver is `T::default()`.
fn receiver_of<T: DeserializeOwned + Default>(state: &Value) -> Result<T, CallError> {
    if state.is_null() {
        return Ok(T::default());
    }
    match serde_json::from_value(state.clone()) {
        Ok(receiver) => Ok(receiver),
        Err(_) if state.as_object().is_some_and(|map| map.is_empty()) => Ok(T::default()),
        Err(e) => Err(CallError::materialization(format!("receiver: {}", e))),
    }
}

impl CodeModule for MethodTable {
    fn artifact(&self) -> &str {
        &self.artifact
    }

    fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    fn return_type(&self, type_name: &str, method: &str, param_types: &[String]) -> Option<String> {
        self.entry(type_name, method, param_types)
            .map(|entry| entry.return_type.to_string())
    }

    fn invoke(&mut self, call: Invocation<'_>) -> Result<Value, CallError> {
        let entry = self
            .entry(call.type_name, call.method, call.param_types)
            .ok_or_else(|| {
                CallError::method_resolution(format!("{}.{}", call.type_name, call.method))
            })?;

        let receiver = call.receiver;
        let args = call.args;
        match catch_unwind(AssertUnwindSafe(|| (entry.thunk)(receiver, args))) {
            Ok(outcome) => outcome,
            Err(panic) => Err(CallError::invocation(panic_message(&*panic))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
