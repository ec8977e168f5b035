use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, info, warn};
use tokio::time::{self, Instant};

use crate::bootstrap::partition_positional;
use crate::error::{Error, Result};
use crate::provider::{CloudProvider, INSTANCE_NOT_FOUND, INVALID_PARAMETER_VALUE};
use crate::types::{
    ClusterSpec, InstanceRecord, InstanceStatus, LaunchRequest, NodeRole, ObservedInstance,
    Settings,
};

/// Script every instance runs on first boot.
pub const NODE_INIT_SCRIPT: &str = include_str!("node-init.sh");

/// How often a launch is retried while a new instance profile propagates.
pub const PROFILE_PROPAGATION_ATTEMPTS: usize = 10;

pub fn user_data() -> String {
    STANDARD.encode(NODE_INIT_SCRIPT)
}

/// Launches all instances in a single request, then tags each with its role:
/// the first `spec.masters` ids of the launch response are masters.
pub async fn launch_instances(
    provider: &dyn CloudProvider,
    spec: &ClusterSpec,
    settings: &Settings,
    security_group_id: &str,
    instance_profile_arn: &str,
) -> Result<Vec<String>> {
    let request = LaunchRequest {
        cluster_name: settings.cluster_name.clone(),
        image_id: settings.image_id.clone(),
        instance_type: settings.instance_type.clone(),
        count: spec.total,
        key_name: spec.key_name.clone(),
        security_group_id: security_group_id.to_string(),
        instance_profile_arn: instance_profile_arn.to_string(),
        user_data: user_data(),
    };

    let ids = run_instances(provider, &request, settings.poll_interval).await?;
    info!("launched {} instances: {}", ids.len(), ids.join(", "));

    let (masters, workers) = partition_positional(&ids, spec.masters as usize);
    if !masters.is_empty() {
        provider
            .tag_instances(masters, NodeRole::TAG, NodeRole::Master.as_str())
            .await?;
    }
    if !workers.is_empty() {
        provider
            .tag_instances(workers, NodeRole::TAG, NodeRole::Worker.as_str())
            .await?;
    }

    Ok(ids)
}

async fn run_instances(
    provider: &dyn CloudProvider,
    request: &LaunchRequest,
    delay: Duration,
) -> Result<Vec<String>> {
    let mut attempt = 1;
    loop {
        match provider.run_instances(request).await {
            Ok(ids) => return Ok(ids),
            Err(err)
                if err.is_code(INVALID_PARAMETER_VALUE)
                    && err.message.contains("iamInstanceProfile")
                    && attempt < PROFILE_PROPAGATION_ATTEMPTS =>
            {
                warn!(
                    "instance profile not visible yet (attempt {}/{}): {}",
                    attempt, PROFILE_PROPAGATION_ATTEMPTS, err.message
                );
                attempt += 1;
                time::sleep(delay).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Polls until every instance in `ids` is running and returns them in the
/// same order as `ids`.
pub async fn wait_for_running(
    provider: &dyn CloudProvider,
    ids: &[String],
    interval: Duration,
    timeout: Duration,
) -> Result<Vec<ObservedInstance>> {
    let started = Instant::now();
    let mut ticker = time::interval(interval);

    loop {
        ticker.tick().await;

        let pending: Vec<String> = match provider.describe_instances(ids).await {
            Ok(observed) => {
                if let Some(lost) = observed.iter().find(|o| {
                    matches!(
                        o.status,
                        InstanceStatus::ShuttingDown
                            | InstanceStatus::Terminated
                            | InstanceStatus::Stopping
                            | InstanceStatus::Stopped
                    )
                }) {
                    return Err(Error::InstanceLost {
                        id: lost.id.clone(),
                        status: lost.status.to_string(),
                    });
                }

                let pending: Vec<String> = ids
                    .iter()
                    .filter(|id| {
                        !observed
                            .iter()
                            .any(|o| &o.id == *id && o.status == InstanceStatus::Running)
                    })
                    .cloned()
                    .collect();

                if pending.is_empty() {
                    return Ok(in_launch_order(ids, observed));
                }
                pending
            }
            Err(err) if err.is_code(INSTANCE_NOT_FOUND) => {
                debug!("instances not visible yet: {}", err.message);
                ids.to_vec()
            }
            Err(err) => return Err(err.into()),
        };

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(Error::Timeout {
                what: format!("instances {} to reach running", pending.join(", ")),
                elapsed,
            });
        }
        info!("waiting for {} of {} instances to run", pending.len(), ids.len());
    }
}

fn in_launch_order(ids: &[String], mut observed: Vec<ObservedInstance>) -> Vec<ObservedInstance> {
    observed.sort_by_key(|o| ids.iter().position(|id| id == &o.id).unwrap_or(usize::MAX));
    observed
}

/// Turns running instances into records. Roles come from the role tag; an
/// untagged instance falls back to its launch position.
pub fn instance_records(
    observed: Vec<ObservedInstance>,
    masters: usize,
) -> Result<Vec<InstanceRecord>> {
    observed
        .into_iter()
        .enumerate()
        .map(|(index, instance)| {
            let public_ip = instance
                .public_ip
                .ok_or_else(|| Error::MissingPublicAddress(instance.id.clone()))?;
            let role = instance.role.unwrap_or_else(|| {
                let role = NodeRole::for_index(index, masters);
                warn!("{} has no role tag, assuming {}", instance.id, role);
                role
            });
            Ok(InstanceRecord {
                id: instance.id,
                public_ip,
                role,
            })
        })
        .collect()
}
