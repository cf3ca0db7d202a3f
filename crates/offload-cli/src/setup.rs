// Copyright 2025 Offload Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use offload_common::{CallEnvelope, CallResult};
use offload_gateway::{
    CommandProvisioner, ComputeNode, ConnectRetryConfig, JsonFileStore, MemoryStore, NodePool,
    NodeStore, NoopProvisioner, Provisioner,
};

/// Builds the node pool for `offload gateway`.
///
/// With an inventory file the pool persists node status there; `--node`
/// specs seed the file when it does not exist yet. Without one the pool is
/// in-memory and built from the specs alone.
pub fn build_pool(
    specs: &[String],
    inventory: Option<&Path>,
    power_on_cmd: Option<&str>,
    power_off_cmd: Option<&str>,
) -> Result<NodePool> {
    let nodes = specs
        .iter()
        .map(|spec| ComputeNode::parse_spec(spec))
        .collect::<offload_common::Result<Vec<_>>>()?;

    let store: Box<dyn NodeStore> = match inventory {
        Some(path) => {
            let mut store = JsonFileStore::new(path);
            if !path.exists() {
                if nodes.is_empty() {
                    bail!("inventory {} does not exist and no --node given", path.display());
                }
                store
                    .save(&nodes)
                    .with_context(|| format!("seeding inventory {}", path.display()))?;
            } else if !nodes.is_empty() {
                tracing::warn!(
                    "Ignoring --node options: inventory {} already exists",
                    path.display()
                );
            }
            Box::new(store)
        }
        None => {
            if nodes.is_empty() {
                bail!("no compute nodes configured; use --node or --inventory");
            }
            Box::new(MemoryStore::new(nodes))
        }
    };

    let provisioner: Arc<dyn Provisioner> = if power_on_cmd.is_some() || power_off_cmd.is_some() {
        Arc::new(CommandProvisioner::new(power_on_cmd, power_off_cmd))
    } else {
        Arc::new(NoopProvisioner)
    };

    Ok(NodePool::open(store, provisioner)?)
}

/// Retry policy with the given total deadline; `0` retries without limit.
pub fn retry_config(deadline_secs: u64) -> ConnectRetryConfig {
    ConnectRetryConfig {
        deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
        ..ConnectRetryConfig::default()
    }
}

/// Splits `int,int` into canonical type names.
pub fn parse_param_types(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds the call envelope for `offload call`.
pub fn build_envelope(
    target_type: &str,
    method: &str,
    param_types: &str,
    params: &str,
    receiver: &str,
) -> Result<CallEnvelope> {
    let param_types = parse_param_types(param_types);

    let params: Value = serde_json::from_str(params).map_err(|e| anyhow!("Invalid JSON in params: {}", e))?;
    let Value::Array(params) = params else {
        bail!("params must be a JSON array");
    };
    if params.len() != param_types.len() {
        bail!(
            "{} parameter type(s) but {} parameter value(s)",
            param_types.len(),
            params.len()
        );
    }

    let receiver: Value =
        serde_json::from_str(receiver).map_err(|e| anyhow!("Invalid JSON in receiver: {}", e))?;

    let mut envelope = CallEnvelope::new(target_type, method).with_receiver(receiver);
    for (type_name, value) in param_types.into_iter().zip(params) {
        envelope = envelope.param(type_name, value);
    }
    Ok(envelope)
}

/// JSON printed by `offload call`.
pub fn render_result(result: &CallResult) -> Value {
    match result {
        CallResult::Value { return_type, value } => json!({
            "returnType": return_type,
            "returnValue": value,
        }),
        CallResult::Error(err) => json!({
            "error": { "kind": err.kind.to_string(), "message": err.message },
        }),
    }
}
