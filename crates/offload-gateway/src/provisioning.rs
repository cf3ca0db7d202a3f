//! Powering compute nodes on and off.
//!
//! The actual mechanism (wake-on-LAN, a cloud API, a hypervisor CLI) is
//! external; the gateway only needs the two calls below.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use offload_common::protocol::error::{OffloadError, Result};

use crate::node::ComputeNode;

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn power_on(&self, node: &ComputeNode) -> Result<()>;
    async fn power_off(&self, node: &ComputeNode) -> Result<()>;
}

/// Provisioner for nodes that are always on.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn power_on(&self, node: &ComputeNode) -> Result<()> {
        debug!("power on {} (no-op)", node.id);
        Ok(())
    }

    async fn power_off(&self, node: &ComputeNode) -> Result<()> {
        debug!("power off {} (no-op)", node.id);
        Ok(())
    }
}

/// Runs an external command for each power transition.
///
/// Templates are split on whitespace; `{id}`, `{address}` and `{port}` in any
/// argument are replaced with the node's values. A missing template makes
/// that transition a no-op.
///
/// # Example
///
/// ```
/// use offload_gateway::CommandProvisioner;
///
/// let provisioner = CommandProvisioner::new(
///     Some("virsh start {id}"),
///     Some("virsh shutdown {id}"),
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommandProvisioner {
    power_on: Option<Vec<String>>,
    power_off: Option<Vec<String>>,
}

impl CommandProvisioner {
    pub fn new(power_on: Option<&str>, power_off: Option<&str>) -> Self {
        Self {
            power_on: power_on.map(split_template),
            power_off: power_off.map(split_template),
        }
    }

    async fn run(&self, template: Option<&Vec<String>>, node: &ComputeNode, action: &str) -> Result<()> {
        let Some(template) = template else {
            return Ok(());
        };
        let args = render(template, node);
        let Some((program, rest)) = args.split_first() else {
            return Ok(());
        };

        info!("{} {}: running {}", action, node.id, args.join(" "));
        let status = Command::new(program)
            .args(rest)
            .status()
            .await
            .map_err(|e| OffloadError::Provisioning(format!("{} {}: {}", action, node.id, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(OffloadError::Provisioning(format!(
                "{} {}: command exited with {}",
                action, node.id, status
            )))
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn power_on(&self, node: &ComputeNode) -> Result<()> {
        self.run(self.power_on.as_ref(), node, "power on").await
    }

    async fn power_off(&self, node: &ComputeNode) -> Result<()> {
        self.run(self.power_off.as_ref(), node, "power off").await
    }
}

fn split_template(template: &str) -> Vec<String> {
    template.split_whitespace().map(str::to_string).collect()
}

fn render(template: &[String], node: &ComputeNode) -> Vec<String> {
    let port = node.port.to_string();
    template
        .iter()
        .map(|arg| {
            arg.replace("{id}", &node.id)
                .replace("{address}", &node.address)
                .replace("{port}", &port)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_placeholders() {
        let node = ComputeNode::new("vm-3", "10.1.1.3", 6000);
        let args = render(&split_template("wake --host {address}:{port} --name {id}"), &node);
        assert_eq!(args, vec!["wake", "--host", "10.1.1.3:6000", "--name", "vm-3"]);
    }

    #[tokio::test]
    async fn test_missing_template_is_noop() {
        let provisioner = CommandProvisioner::new(None, None);
        let node = ComputeNode::new("n", "h", 1);
        assert!(provisioner.power_on(&node).await.is_ok());
        assert!(provisioner.power_off(&node).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_error() {
        let provisioner = CommandProvisioner::new(Some("false"), Some("true"));
        let node = ComputeNode::new("n", "h", 1);
        assert!(matches!(
            provisioner.power_on(&node).await,
            Err(OffloadError::Provisioning(_))
        ));
        assert!(provisioner.power_off(&node).await.is_ok());
    }
}
