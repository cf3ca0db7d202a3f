use std::collections::HashMap;

use tracing::info;

use offload_common::protocol::error::{OffloadError, Result};

use crate::module::CodeModule;
use crate::registry::MethodTable;
use crate::runtime::ScriptModule;

/// Turns cached artifact bytes into a [`CodeModule`].
pub trait ArtifactLoader: Send {
    fn load(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn CodeModule>>;
}

/// Evaluates artifacts as JavaScript.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptLoader;

impl ArtifactLoader for ScriptLoader {
    fn load(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn CodeModule>> {
        let module = ScriptModule::load(name, bytes)?;
        info!("Loaded script artifact {} ({} bytes)", name, bytes.len());
        Ok(Box::new(module))
    }
}

type TableFactory = Box<dyn Fn() -> MethodTable + Send + Sync>;

/// Serves method tables compiled into the host binary, looked up by
/// artifact name. The transferred bytes only mark the artifact as present.
#[derive(Default)]
pub struct StaticLoader {
    tables: HashMap<String, TableFactory>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> MethodTable + Send + Sync + 'static,
    {
        self.tables.insert(name.into(), Box::new(factory));
        self
    }
}

impl ArtifactLoader for StaticLoader {
    fn load(&self, name: &str, _bytes: &[u8]) -> Result<Box<dyn CodeModule>> {
        let factory = self.tables.get(name).ok_or_else(|| {
            OffloadError::InvalidRequest(format!("no linked method table for artifact '{}'", name))
        })?;
        let table = factory();
        info!("Loaded linked artifact {} ({} methods)", name, table.method_count());
        Ok(Box::new(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, serde::Deserialize)]
    struct Echo;

    fn echo_table() -> MethodTable {
        let mut table = MethodTable::new("Echo");
        table
            .register_type::<Echo>("Echo")
            .method("echo", |_: &mut Echo, s: String| Ok::<_, String>(s));
        table
    }

    #[test]
    fn test_static_loader_by_name() {
        let loader = StaticLoader::new().with_table("Echo", echo_table);
        let module = loader.load("Echo", b"").unwrap();
        assert_eq!(module.artifact(), "Echo");
        assert!(module.has_type("Echo"));

        assert!(loader.load("Other", b"").is_err());
    }

    #[test]
    fn test_script_loader_evaluates_bytes() {
        let source = br#"offload.define("Echo", "echo", ["String"], "String", function (self, s) { return s; });"#;
        let module = ScriptLoader.load("Echo", source).unwrap();
        assert!(module.has_type("Echo"));
    }
}
