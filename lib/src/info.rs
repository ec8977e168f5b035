use log::debug;

use crate::error::Result;
use crate::provider::CloudProvider;
use crate::types::{NodeRole, ObservedInstance};

/// Instances carrying the cluster tag, masters first and then by id.
pub async fn cluster_instances(
    provider: &dyn CloudProvider,
    cluster_name: &str,
) -> Result<Vec<ObservedInstance>> {
    let mut instances = provider.describe_cluster_instances(cluster_name).await?;
    debug!("found {} instances in {}", instances.len(), cluster_name);
    instances.sort_by(|a, b| {
        role_rank(a.role)
            .cmp(&role_rank(b.role))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(instances)
}

fn role_rank(role: Option<NodeRole>) -> u8 {
    match role {
        Some(NodeRole::Master) => 0,
        Some(NodeRole::Worker) => 1,
        None => 2,
    }
}
