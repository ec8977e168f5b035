//! The cloud API surface the provisioning workflow depends on.
//!
//! [`crate::aws::AwsProvider`] implements it against EC2, IAM and SSM. Every
//! method maps to exactly one provider call so that the workflow decides
//! ordering and recovery, not the provider.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::network::IngressRule;
use crate::types::{
    CommandInvocation, InstanceProfile, LaunchRequest, NewKeyPair, ObservedInstance,
};

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error code for a key pair name that is already taken.
pub const KEY_PAIR_DUPLICATE: &str = "InvalidKeyPair.Duplicate";
/// Error code for an IAM role or instance profile that already exists.
pub const ENTITY_ALREADY_EXISTS: &str = "EntityAlreadyExists";
/// Error code for a security group name that is already taken in the VPC.
pub const SECURITY_GROUP_DUPLICATE: &str = "InvalidGroup.Duplicate";
/// Instances that were just launched may not be describable yet.
pub const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";
/// The command service doesn't know the instance (agent not registered yet).
pub const COMMAND_TARGET_UNKNOWN: &str = "InvalidInstanceId";
/// The command was accepted but has no invocation record yet.
pub const INVOCATION_NOT_FOUND: &str = "InvocationDoesNotExist";
/// Generic validation failure, returned while a new instance profile propagates.
pub const INVALID_PARAMETER_VALUE: &str = "InvalidParameterValue";

#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_key_pair(&self, name: &str) -> ProviderResult<NewKeyPair>;

    /// Returns the id of an existing key pair.
    async fn describe_key_pair(&self, name: &str) -> ProviderResult<String>;

    /// Creates a role and returns its ARN.
    async fn create_role(&self, name: &str, trust_policy: &str) -> ProviderResult<String>;

    async fn get_role(&self, name: &str) -> ProviderResult<String>;

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()>;

    /// Creates an instance profile and returns its ARN.
    async fn create_instance_profile(&self, name: &str) -> ProviderResult<String>;

    async fn get_instance_profile(&self, name: &str) -> ProviderResult<InstanceProfile>;

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str)
        -> ProviderResult<()>;

    /// The VPC new security groups are placed in.
    async fn default_vpc(&self) -> ProviderResult<String>;

    /// Creates a security group and returns its id.
    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> ProviderResult<String>;

    async fn describe_security_group(&self, name: &str, vpc_id: &str) -> ProviderResult<String>;

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> ProviderResult<()>;

    /// Launches `request.count` instances in one call and returns their ids in
    /// launch order.
    async fn run_instances(&self, request: &LaunchRequest) -> ProviderResult<Vec<String>>;

    async fn tag_instances(&self, ids: &[String], key: &str, value: &str) -> ProviderResult<()>;

    async fn describe_instances(&self, ids: &[String]) -> ProviderResult<Vec<ObservedInstance>>;

    /// All non-terminated instances tagged with the given cluster name.
    async fn describe_cluster_instances(
        &self,
        cluster_name: &str,
    ) -> ProviderResult<Vec<ObservedInstance>>;

    /// Looks up an instance id by its public address.
    async fn find_instance_by_address(&self, address: IpAddr) -> ProviderResult<Option<String>>;

    /// Submits a shell script to an instance and returns the command id.
    async fn send_command(&self, instance_id: &str, commands: &[String])
        -> ProviderResult<String>;

    async fn command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> ProviderResult<CommandInvocation>;
}
