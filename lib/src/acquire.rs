//! Create-or-reuse for the account-level resources a cluster needs.
//!
//! Each step tries to create its resource first. The provider's duplicate
//! error code for that resource means "somebody already made it", and is
//! answered with a lookup of the existing identifier. Every other error is
//! returned as-is.

use std::path::Path;

use log::{info, warn};
use serde_json::json;

use crate::error::{Error, Result};
use crate::network::CLUSTER_INGRESS;
use crate::provider::{
    CloudProvider, ENTITY_ALREADY_EXISTS, KEY_PAIR_DUPLICATE, SECURITY_GROUP_DUPLICATE,
};
use crate::ssh::{key_path, save_private_key};
use crate::types::{Acquisition, ClusterSpec, ProvisionedResource, ResourceKind, Settings};

/// Managed policies attached to the node role.
pub const NODE_POLICIES: [&str; 3] = [
    "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
    // needed by the agent that runs bootstrap commands
    "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore",
];

pub const SECURITY_GROUP_DESCRIPTION: &str = "Kubernetes cluster security group";

/// The role plus the instance profile that carries it onto instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub role: Acquisition,
    pub instance_profile_arn: String,
}

fn created(kind: ResourceKind, id: String) -> Acquisition {
    info!("created {} {}", kind, id);
    Acquisition::Created(ProvisionedResource { kind, id })
}

fn reused(kind: ResourceKind, id: String) -> Acquisition {
    info!("{} already exists, using existing {}", kind, id);
    Acquisition::Reused(ProvisionedResource { kind, id })
}

/// Only a freshly created key pair comes with private key material, so the
/// key file is written on that path alone.
pub async fn acquire_key_pair(
    provider: &dyn CloudProvider,
    spec: &ClusterSpec,
    key_dir: &Path,
) -> Result<Acquisition> {
    let path = key_path(key_dir, &spec.key_name);

    match provider.create_key_pair(&spec.key_name).await {
        Ok(key) => {
            if key.material.is_empty() {
                return Err(Error::KeyMaterialMissing(spec.key_name.clone()));
            }
            save_private_key(&path, &key.material, spec.passphrase.as_deref())?;
            Ok(created(ResourceKind::KeyPair, key.key_pair_id))
        }
        Err(err) if err.is_code(KEY_PAIR_DUPLICATE) => {
            let id = provider.describe_key_pair(&spec.key_name).await?;
            if !path.is_file() {
                warn!(
                    "key pair {} already exists but {} is missing; \
                     the private key can't be downloaded again",
                    spec.key_name,
                    path.display()
                );
            }
            Ok(reused(ResourceKind::KeyPair, id))
        }
        Err(err) => Err(err.into()),
    }
}

pub fn trust_policy() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

pub async fn acquire_node_role(
    provider: &dyn CloudProvider,
    settings: &Settings,
) -> Result<NodeIdentity> {
    let role = match provider
        .create_role(&settings.role_name, &trust_policy())
        .await
    {
        Ok(arn) => created(ResourceKind::IamRole, arn),
        Err(err) if err.is_code(ENTITY_ALREADY_EXISTS) => {
            reused(ResourceKind::IamRole, provider.get_role(&settings.role_name).await?)
        }
        Err(err) => return Err(err.into()),
    };

    // attaching an already attached policy is a no-op, so reused roles get
    // any policy they are missing
    for policy in NODE_POLICIES.iter() {
        provider
            .attach_role_policy(&settings.role_name, policy)
            .await?;
    }

    let instance_profile_arn = acquire_instance_profile(provider, settings).await?;

    Ok(NodeIdentity {
        role,
        instance_profile_arn,
    })
}

async fn acquire_instance_profile(
    provider: &dyn CloudProvider,
    settings: &Settings,
) -> Result<String> {
    let name = &settings.instance_profile_name;

    match provider.create_instance_profile(name).await {
        Ok(arn) => {
            info!("created instance profile {}", arn);
            provider
                .add_role_to_instance_profile(name, &settings.role_name)
                .await?;
            Ok(arn)
        }
        Err(err) if err.is_code(ENTITY_ALREADY_EXISTS) => {
            let profile = provider.get_instance_profile(name).await?;
            if !profile.roles.iter().any(|r| r == &settings.role_name) {
                provider
                    .add_role_to_instance_profile(name, &settings.role_name)
                    .await?;
            }
            Ok(profile.arn)
        }
        Err(err) => Err(err.into()),
    }
}

/// Ingress rules are installed only when the group is new.
pub async fn acquire_security_group(
    provider: &dyn CloudProvider,
    settings: &Settings,
) -> Result<Acquisition> {
    let vpc_id = provider.default_vpc().await?;
    let name = &settings.security_group_name;

    match provider
        .create_security_group(name, SECURITY_GROUP_DESCRIPTION, &vpc_id)
        .await
    {
        Ok(group_id) => {
            for rule in CLUSTER_INGRESS.iter() {
                info!("allow {} on {}", rule, group_id);
            }
            provider
                .authorize_ingress(&group_id, &CLUSTER_INGRESS)
                .await?;
            Ok(created(ResourceKind::SecurityGroup, group_id))
        }
        Err(err) if err.is_code(SECURITY_GROUP_DUPLICATE) => {
            let group_id = provider.describe_security_group(name, &vpc_id).await?;
            Ok(reused(ResourceKind::SecurityGroup, group_id))
        }
        Err(err) => Err(err.into()),
    }
}
