pub mod envelope;
pub mod error;
pub mod names;
pub mod tags;
pub mod types;

pub use envelope::{CallEnvelope, CallError, CallResult, ErrorKind, ERROR_RETURN_TYPE};
pub use error::{OffloadError, Result};
pub use names::{bare_file_name, is_safe_name, short_artifact_name};
pub use tags::Tag;
pub use types::PrimitiveType;
