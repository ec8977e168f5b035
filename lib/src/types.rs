use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_IMAGE_ID: &str = "ami-0c55b159cbfafe1f0";
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.medium";
pub const DEFAULT_POD_CIDR: &str = "10.244.0.0/16";
pub const DEFAULT_KEY_NAME: &str = "k8s-cluster-key";
pub const DEFAULT_CLUSTER_NAME: &str = "k8s-cluster";

/// How many machines to launch and how they are split between roles.
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub total: u32,
    pub masters: u32,
    pub workers: u32,
    pub key_name: String,
    pub passphrase: Option<String>,
}

impl ClusterSpec {
    /// Validates the counts. `workers` may be omitted, in which case it is
    /// derived as `total - masters`; when given it must agree.
    pub fn new(
        total: u32,
        masters: u32,
        workers: Option<u32>,
        key_name: impl Into<String>,
        passphrase: Option<String>,
    ) -> Result<Self> {
        if total == 0 {
            return Err(Error::InvalidSpec("at least one instance is required".into()));
        }
        if masters == 0 {
            return Err(Error::InvalidSpec("at least one master is required".into()));
        }
        let derived = total.checked_sub(masters).ok_or_else(|| {
            Error::InvalidSpec(format!(
                "master count {} exceeds total instance count {}",
                masters, total
            ))
        })?;

        if let Some(workers) = workers {
            if workers != derived {
                return Err(Error::InvalidSpec(format!(
                    "{} masters + {} workers does not add up to {} instances",
                    masters, workers, total
                )));
            }
        }

        let key_name = key_name.into();
        if key_name.is_empty() {
            return Err(Error::InvalidSpec("key name must not be empty".into()));
        }

        Ok(Self {
            total,
            masters,
            workers: derived,
            key_name,
            passphrase: passphrase.filter(|p| !p.is_empty()),
        })
    }
}

impl fmt::Debug for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClusterSpec")
            .field("total", &self.total)
            .field("masters", &self.masters)
            .field("workers", &self.workers)
            .field("key_name", &self.key_name)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything about a run that isn't the node count.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cluster_name: String,
    pub role_name: String,
    pub instance_profile_name: String,
    pub security_group_name: String,
    pub image_id: String,
    pub instance_type: String,
    pub pod_cidr: String,
    pub key_dir: PathBuf,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.into(),
            role_name: "K8sNodeRole".into(),
            instance_profile_name: "K8sNodeRole".into(),
            security_group_name: "k8s-cluster-sg".into(),
            image_id: DEFAULT_IMAGE_ID.into(),
            instance_type: DEFAULT_INSTANCE_TYPE.into(),
            pod_cidr: DEFAULT_POD_CIDR.into(),
            key_dir: PathBuf::from("."),
            poll_interval: Duration::from_secs(15),
            wait_timeout: Duration::from_secs(600),
            command_timeout: Duration::from_secs(900),
        }
    }
}

impl Settings {
    /// Rejects zero durations; a zero poll interval can't drive a timer.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("poll interval", self.poll_interval),
            ("readiness timeout", self.wait_timeout),
            ("command timeout", self.command_timeout),
        ];
        for (name, value) in durations.iter() {
            if value.is_zero() {
                return Err(Error::InvalidSpec(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
}

impl NodeRole {
    /// The tag key used to record the role on the instance itself.
    pub const TAG: &'static str = "Role";

    /// Positional assignment: the first `masters` indices are masters.
    pub fn for_index(index: usize, masters: usize) -> Self {
        if index < masters {
            NodeRole::Master
        } else {
            NodeRole::Worker
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "master" => Ok(NodeRole::Master),
            "worker" => Ok(NodeRole::Worker),
            other => Err(Error::InvalidSpec(format!("unknown node role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    KeyPair,
    IamRole,
    SecurityGroup,
    Instance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ResourceKind::KeyPair => "key pair",
            ResourceKind::IamRole => "IAM role",
            ResourceKind::SecurityGroup => "security group",
            ResourceKind::Instance => "instance",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub kind: ResourceKind,
    pub id: String,
}

/// Outcome of a create-or-reuse step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Created(ProvisionedResource),
    Reused(ProvisionedResource),
}

impl Acquisition {
    pub fn resource(&self) -> &ProvisionedResource {
        match self {
            Acquisition::Created(resource) | Acquisition::Reused(resource) => resource,
        }
    }

    pub fn id(&self) -> &str {
        &self.resource().id
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Acquisition::Created(_))
    }
}

/// A freshly created key pair, including the private half.
#[derive(Clone, PartialEq, Eq)]
pub struct NewKeyPair {
    pub key_pair_id: String,
    pub material: String,
}

impl fmt::Debug for NewKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NewKeyPair")
            .field("key_pair_id", &self.key_pair_id)
            .field("material", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProfile {
    pub arn: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Unknown,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::ShuttingDown => "shutting-down",
            InstanceStatus::Terminated => "terminated",
            InstanceStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// What the provider currently reports about one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedInstance {
    pub id: String,
    pub status: InstanceStatus,
    pub public_ip: Option<IpAddr>,
    pub private_ip: Option<IpAddr>,
    pub role: Option<NodeRole>,
}

/// A running instance with a known address and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub public_ip: IpAddr,
    pub role: NodeRole,
}

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub cluster_name: String,
    pub image_id: String,
    pub instance_type: String,
    pub count: u32,
    pub key_name: String,
    pub security_group_id: String,
    pub instance_profile_arn: String,
    pub user_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
    TimedOut,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Success
                | CommandStatus::Failed
                | CommandStatus::Cancelled
                | CommandStatus::TimedOut
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::InProgress => "in progress",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::Cancelled => "cancelled",
            CommandStatus::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Result of running one bootstrap command on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub address: IpAddr,
    pub instance_id: String,
    pub role: NodeRole,
    pub command_id: String,
    pub status: CommandStatus,
    /// Left out of serialized reports: `kubeadm init` prints the bootstrap
    /// token and CA hash here.
    #[serde(skip_serializing)]
    pub stdout: String,
    pub stderr: String,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl BootstrapReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(DispatchOutcome::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn with_role(&self, role: NodeRole) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(move |o| o.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spec_derives_workers() {
        let spec = ClusterSpec::new(3, 1, None, "key", None).unwrap();
        assert_eq!(spec.workers, 2);

        let spec = ClusterSpec::new(3, 3, Some(0), "key", None).unwrap();
        assert_eq!(spec.workers, 0);
    }

    #[test]
    fn test_spec_rejects_masters_above_total() {
        let err = ClusterSpec::new(2, 3, None, "key", None).unwrap_err();
        assert!(err.to_string().contains("exceeds total"));
    }

    #[test]
    fn test_spec_rejects_inconsistent_workers() {
        assert!(ClusterSpec::new(3, 1, Some(1), "key", None).is_err());
        assert!(ClusterSpec::new(0, 0, None, "key", None).is_err());
        assert!(ClusterSpec::new(3, 0, None, "key", None).is_err());
        assert!(ClusterSpec::new(3, 1, None, "", None).is_err());
    }

    #[test]
    fn test_spec_hides_passphrase() {
        let spec = ClusterSpec::new(1, 1, None, "key", Some("hunter2".into())).unwrap();
        assert!(!format!("{:?}", spec).contains("hunter2"));

        let spec = ClusterSpec::new(1, 1, None, "key", Some(String::new())).unwrap();
        assert_eq!(spec.passphrase, None);
    }

    #[test]
    fn test_settings_reject_zero_durations() {
        assert!(Settings::default().validate().is_ok());

        let settings = Settings {
            poll_interval: Duration::ZERO,
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("poll interval must be greater than zero"));

        let settings = Settings {
            command_timeout: Duration::ZERO,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_role_for_index() {
        let roles: Vec<NodeRole> = (0..3).map(|i| NodeRole::for_index(i, 1)).collect();
        assert_eq!(roles, vec![NodeRole::Master, NodeRole::Worker, NodeRole::Worker]);
        assert_eq!("worker".parse::<NodeRole>().unwrap(), NodeRole::Worker);
        assert!("etcd".parse::<NodeRole>().is_err());
    }
}
