//! Offload Execution Host
//!
//! Runs on each compute node: caches code artifacts, loads them into a
//! type-erased method registry and dispatches marshaled calls.
//!
//! Artifacts are either JavaScript evaluated by the embedded Boa engine
//! ([`ScriptLoader`]) or method tables linked into the host binary
//! ([`StaticLoader`]).

pub mod cache;
pub mod dispatch;
pub mod host;
pub mod loader;
pub mod module;
pub mod registry;
pub mod runtime;

pub use cache::ArtifactCache;
pub use dispatch::dispatch;
pub use host::ExecutionHost;
pub use loader::{ArtifactLoader, ScriptLoader, StaticLoader};
pub use module::{CodeModule, Invocation};
pub use registry::{MethodTable, RemoteMethod, RemoteType, TypeBuilder};
pub use runtime::ScriptModule;
