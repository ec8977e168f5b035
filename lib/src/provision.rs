use std::path::PathBuf;

use log::info;
use serde::Serialize;

use crate::acquire::{acquire_key_pair, acquire_node_role, acquire_security_group};
use crate::bootstrap::{bootstrap_cluster, partition_by_role};
use crate::error::Result;
use crate::launch::{instance_records, launch_instances, wait_for_running};
use crate::provider::CloudProvider;
use crate::ssh::key_path;
use crate::types::{Acquisition, BootstrapReport, ClusterSpec, InstanceRecord, Settings};

/// Everything a provisioning run acquired or launched.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub key_pair: Acquisition,
    pub role: Acquisition,
    pub security_group: Acquisition,
    pub instances: Vec<InstanceRecord>,
    pub bootstrap: BootstrapReport,
    pub key_path: PathBuf,
}

#[derive(Serialize)]
struct Summary<'a> {
    key_pair: &'a str,
    role: &'a str,
    security_group: &'a str,
    instances: &'a [InstanceRecord],
    bootstrap: &'a BootstrapReport,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        self.bootstrap.is_success()
    }

    /// The master workers were joined to.
    pub fn primary_master(&self) -> Option<&InstanceRecord> {
        partition_by_role(&self.instances).0.first().copied()
    }

    /// Machine-readable summary. Command output is not included.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&Summary {
            key_pair: self.key_pair.id(),
            role: self.role.id(),
            security_group: self.security_group.id(),
            instances: &self.instances,
            bootstrap: &self.bootstrap,
        })?)
    }
}

/// Runs the whole workflow: key pair, node role, security group, launch,
/// readiness wait and bootstrap. Any provider error ends the run; nothing
/// created up to that point is removed.
pub async fn provision(
    provider: &dyn CloudProvider,
    spec: &ClusterSpec,
    settings: &Settings,
) -> Result<ProvisionReport> {
    settings.validate()?;
    info!("provisioning {:?} as {}", spec, settings.cluster_name);

    let key_pair = acquire_key_pair(provider, spec, &settings.key_dir).await?;
    let identity = acquire_node_role(provider, settings).await?;
    let security_group = acquire_security_group(provider, settings).await?;

    let ids = launch_instances(
        provider,
        spec,
        settings,
        security_group.id(),
        &identity.instance_profile_arn,
    )
    .await?;

    let observed = wait_for_running(
        provider,
        &ids,
        settings.poll_interval,
        settings.wait_timeout,
    )
    .await?;
    let instances = instance_records(observed, spec.masters as usize)?;

    let bootstrap = bootstrap_cluster(provider, &instances, settings).await?;

    Ok(ProvisionReport {
        key_pair,
        role: identity.role,
        security_group,
        instances,
        bootstrap,
        key_path: key_path(&settings.key_dir, &spec.key_name),
    })
}
