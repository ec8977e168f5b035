//! [`CloudProvider`] backed by the AWS SDK: EC2 for compute and networking,
//! IAM for the node role and SSM for running bootstrap commands.

use std::net::IpAddr;

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region, SdkConfig};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{
    Filter, IamInstanceProfileSpecification, Instance, InstanceStateName, InstanceType,
    IpPermission, IpRange, KeyFormat, KeyType, ResourceType, Tag, TagSpecification,
};
use aws_sdk_ssm::types::CommandInvocationStatus;
use log::debug;

use crate::error::ProviderError;
use crate::network::IngressRule;
use crate::provider::{CloudProvider, ProviderResult};
use crate::types::{
    CommandInvocation, CommandStatus, InstanceProfile, InstanceStatus, LaunchRequest,
    NewKeyPair, NodeRole, ObservedInstance,
};

pub const FALLBACK_REGION: &str = "us-east-1";
pub const RUN_SHELL_SCRIPT: &str = "AWS-RunShellScript";
pub const CLUSTER_TAG: &str = "Cluster";

#[derive(Clone, Debug)]
pub struct AwsProvider {
    ec2: aws_sdk_ec2::Client,
    iam: aws_sdk_iam::Client,
    ssm: aws_sdk_ssm::Client,
}

impl AwsProvider {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            ec2: aws_sdk_ec2::Client::new(config),
            iam: aws_sdk_iam::Client::new(config),
            ssm: aws_sdk_ssm::Client::new(config),
        }
    }

    /// Loads credentials from the default provider chain. An explicit region
    /// wins over the environment and profile.
    pub async fn from_env(region: Option<String>) -> Self {
        let region = RegionProviderChain::first_try(region.map(Region::new))
            .or_default_provider()
            .or_else(Region::new(FALLBACK_REGION));
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;
        debug!("using AWS region {:?}", config.region());
        Self::new(&config)
    }

    async fn instances_matching(&self, filters: Vec<Filter>) -> ProviderResult<Vec<Instance>> {
        let out = self
            .ec2
            .describe_instances()
            .set_filters(Some(filters))
            .send()
            .await
            .map_err(provider_error)?;
        Ok(out
            .reservations()
            .iter()
            .flat_map(|r| r.instances().iter().cloned())
            .collect())
    }
}

fn provider_error<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    ProviderError { code, message }
}

fn not_found(code: &str, what: String) -> ProviderError {
    ProviderError::new(code, format!("{} not found", what))
}

fn filter(name: &str, values: &[&str]) -> Filter {
    values
        .iter()
        .fold(Filter::builder().name(name), |f, v| f.values(*v))
        .build()
}

fn tag(key: &str, value: &str) -> Tag {
    Tag::builder().key(key).value(value).build()
}

fn instance_status(name: Option<&InstanceStateName>) -> InstanceStatus {
    match name {
        Some(InstanceStateName::Pending) => InstanceStatus::Pending,
        Some(InstanceStateName::Running) => InstanceStatus::Running,
        Some(InstanceStateName::Stopping) => InstanceStatus::Stopping,
        Some(InstanceStateName::Stopped) => InstanceStatus::Stopped,
        Some(InstanceStateName::ShuttingDown) => InstanceStatus::ShuttingDown,
        Some(InstanceStateName::Terminated) => InstanceStatus::Terminated,
        _ => InstanceStatus::Unknown,
    }
}

fn command_status(status: Option<&CommandInvocationStatus>) -> CommandStatus {
    match status {
        Some(CommandInvocationStatus::Success) => CommandStatus::Success,
        Some(CommandInvocationStatus::Failed) => CommandStatus::Failed,
        Some(CommandInvocationStatus::Cancelled) => CommandStatus::Cancelled,
        Some(CommandInvocationStatus::TimedOut) => CommandStatus::TimedOut,
        Some(CommandInvocationStatus::Pending) | Some(CommandInvocationStatus::Delayed) => {
            CommandStatus::Pending
        }
        _ => CommandStatus::InProgress,
    }
}

fn observe(instance: &Instance) -> Option<ObservedInstance> {
    let id = instance.instance_id()?.to_string();
    let role = instance
        .tags()
        .iter()
        .find(|t| t.key() == Some(NodeRole::TAG))
        .and_then(|t| t.value())
        .and_then(|v| v.parse().ok());

    Some(ObservedInstance {
        id,
        status: instance_status(instance.state().and_then(|s| s.name())),
        public_ip: instance.public_ip_address().and_then(|ip| ip.parse().ok()),
        private_ip: instance.private_ip_address().and_then(|ip| ip.parse().ok()),
        role,
    })
}

#[async_trait]
impl CloudProvider for AwsProvider {
    async fn create_key_pair(&self, name: &str) -> ProviderResult<NewKeyPair> {
        let out = self
            .ec2
            .create_key_pair()
            .key_name(name)
            .key_type(KeyType::Rsa)
            .key_format(KeyFormat::Pem)
            .send()
            .await
            .map_err(provider_error)?;

        Ok(NewKeyPair {
            key_pair_id: out.key_pair_id().unwrap_or(name).to_string(),
            material: out.key_material().unwrap_or_default().to_string(),
        })
    }

    async fn describe_key_pair(&self, name: &str) -> ProviderResult<String> {
        let out = self
            .ec2
            .describe_key_pairs()
            .key_names(name)
            .send()
            .await
            .map_err(provider_error)?;

        out.key_pairs()
            .first()
            .and_then(|k| k.key_pair_id())
            .map(str::to_string)
            .ok_or_else(|| not_found("InvalidKeyPair.NotFound", format!("key pair {}", name)))
    }

    async fn create_role(&self, name: &str, trust_policy: &str) -> ProviderResult<String> {
        let out = self
            .iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
            .map_err(provider_error)?;

        out.role()
            .map(|r| r.arn().to_string())
            .ok_or_else(|| not_found("NoSuchEntity", format!("role {}", name)))
    }

    async fn get_role(&self, name: &str) -> ProviderResult<String> {
        let out = self
            .iam
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(provider_error)?;

        out.role()
            .map(|r| r.arn().to_string())
            .ok_or_else(|| not_found("NoSuchEntity", format!("role {}", name)))
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()> {
        self.iam
            .attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn create_instance_profile(&self, name: &str) -> ProviderResult<String> {
        let out = self
            .iam
            .create_instance_profile()
            .instance_profile_name(name)
            .send()
            .await
            .map_err(provider_error)?;

        out.instance_profile()
            .map(|p| p.arn().to_string())
            .ok_or_else(|| not_found("NoSuchEntity", format!("instance profile {}", name)))
    }

    async fn get_instance_profile(&self, name: &str) -> ProviderResult<InstanceProfile> {
        let out = self
            .iam
            .get_instance_profile()
            .instance_profile_name(name)
            .send()
            .await
            .map_err(provider_error)?;

        out.instance_profile()
            .map(|p| InstanceProfile {
                arn: p.arn().to_string(),
                roles: p.roles().iter().map(|r| r.role_name().to_string()).collect(),
            })
            .ok_or_else(|| not_found("NoSuchEntity", format!("instance profile {}", name)))
    }

    async fn add_role_to_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> ProviderResult<()> {
        self.iam
            .add_role_to_instance_profile()
            .instance_profile_name(profile)
            .role_name(role)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn default_vpc(&self) -> ProviderResult<String> {
        let out = self
            .ec2
            .describe_vpcs()
            .filters(filter("is-default", &["true"]))
            .send()
            .await
            .map_err(provider_error)?;

        if let Some(id) = out.vpcs().first().and_then(|v| v.vpc_id()) {
            return Ok(id.to_string());
        }

        let out = self
            .ec2
            .describe_vpcs()
            .send()
            .await
            .map_err(provider_error)?;
        out.vpcs()
            .first()
            .and_then(|v| v.vpc_id())
            .map(str::to_string)
            .ok_or_else(|| not_found("InvalidVpcID.NotFound", "any VPC".into()))
    }

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> ProviderResult<String> {
        let out = self
            .ec2
            .create_security_group()
            .group_name(name)
            .description(description)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(provider_error)?;

        out.group_id()
            .map(str::to_string)
            .ok_or_else(|| not_found("InvalidGroup.NotFound", format!("security group {}", name)))
    }

    async fn describe_security_group(&self, name: &str, vpc_id: &str) -> ProviderResult<String> {
        let out = self
            .ec2
            .describe_security_groups()
            .filters(filter("group-name", &[name]))
            .filters(filter("vpc-id", &[vpc_id]))
            .send()
            .await
            .map_err(provider_error)?;

        out.security_groups()
            .first()
            .and_then(|g| g.group_id())
            .map(str::to_string)
            .ok_or_else(|| not_found("InvalidGroup.NotFound", format!("security group {}", name)))
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> ProviderResult<()> {
        let permissions = rules
            .iter()
            .map(|rule| {
                IpPermission::builder()
                    .ip_protocol(rule.protocol.as_str())
                    .from_port(i32::from(rule.from_port))
                    .to_port(i32::from(rule.to_port))
                    .ip_ranges(IpRange::builder().cidr_ip(rule.cidr).build())
                    .build()
            })
            .collect();

        self.ec2
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions))
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn run_instances(&self, request: &LaunchRequest) -> ProviderResult<Vec<String>> {
        let count = i32::try_from(request.count).unwrap_or(i32::MAX);
        let out = self
            .ec2
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .min_count(count)
            .max_count(count)
            .key_name(&request.key_name)
            .security_group_ids(&request.security_group_id)
            .iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .arn(&request.instance_profile_arn)
                    .build(),
            )
            .user_data(&request.user_data)
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(tag("Name", &format!("{}-node", request.cluster_name)))
                    .tags(tag(CLUSTER_TAG, &request.cluster_name))
                    .build(),
            )
            .send()
            .await
            .map_err(provider_error)?;

        Ok(out
            .instances()
            .iter()
            .filter_map(|i| i.instance_id())
            .map(str::to_string)
            .collect())
    }

    async fn tag_instances(&self, ids: &[String], key: &str, value: &str) -> ProviderResult<()> {
        self.ec2
            .create_tags()
            .set_resources(Some(ids.to_vec()))
            .tags(tag(key, value))
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn describe_instances(&self, ids: &[String]) -> ProviderResult<Vec<ObservedInstance>> {
        let out = self
            .ec2
            .describe_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(provider_error)?;

        Ok(out
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .filter_map(observe)
            .collect())
    }

    async fn describe_cluster_instances(
        &self,
        cluster_name: &str,
    ) -> ProviderResult<Vec<ObservedInstance>> {
        let instances = self
            .instances_matching(vec![
                filter(&format!("tag:{}", CLUSTER_TAG), &[cluster_name]),
                filter(
                    "instance-state-name",
                    &["pending", "running", "stopping", "stopped"],
                ),
            ])
            .await?;
        Ok(instances.iter().filter_map(observe).collect())
    }

    async fn find_instance_by_address(&self, address: IpAddr) -> ProviderResult<Option<String>> {
        let address = address.to_string();
        let instances = self
            .instances_matching(vec![filter("ip-address", &[address.as_str()])])
            .await?;
        Ok(instances
            .first()
            .and_then(|i| i.instance_id())
            .map(str::to_string))
    }

    async fn send_command(
        &self,
        instance_id: &str,
        commands: &[String],
    ) -> ProviderResult<String> {
        let out = self
            .ssm
            .send_command()
            .instance_ids(instance_id)
            .document_name(RUN_SHELL_SCRIPT)
            .parameters("commands", commands.to_vec())
            .send()
            .await
            .map_err(provider_error)?;

        out.command()
            .and_then(|c| c.command_id())
            .map(str::to_string)
            .ok_or_else(|| not_found("InvalidCommandId", format!("command for {}", instance_id)))
    }

    async fn command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> ProviderResult<CommandInvocation> {
        let out = self
            .ssm
            .get_command_invocation()
            .command_id(command_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(provider_error)?;

        Ok(CommandInvocation {
            status: command_status(out.status()),
            stdout: out.standard_output_content().unwrap_or_default().to_string(),
            stderr: out.standard_error_content().unwrap_or_default().to_string(),
        })
    }
}
