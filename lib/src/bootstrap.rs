//! Turning running instances into a cluster: `kubeadm init` on masters,
//! `kubeadm join` on workers, both executed through the provider's
//! run-command service.

use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use tokio::time::{self, Instant};

use crate::error::{Error, Result};
use crate::provider::{CloudProvider, COMMAND_TARGET_UNKNOWN, INVOCATION_NOT_FOUND};
use crate::types::{
    BootstrapReport, CommandInvocation, CommandStatus, DispatchOutcome, InstanceRecord, NodeRole,
    Settings,
};

pub const JOIN_TEMPLATE: &str =
    "kubeadm join <master-ip>:<api-port> --token <token> --discovery-token-ca-cert-hash <hash>";

pub const PLACEHOLDERS: [&str; 4] = ["<master-ip>", "<api-port>", "<token>", "<hash>"];

pub const PRINT_JOIN_COMMAND: &str = "kubeadm token create --print-join-command";

pub const FLANNEL_MANIFEST: &str =
    "https://github.com/flannel-io/flannel/releases/latest/download/kube-flannel.yml";

const WAIT_FOR_CLOUD_INIT: &str = "cloud-init status --wait >/dev/null || true";

/// Splits `items` so the first `masters` entries are masters. Asking for more
/// masters than there are items yields no workers.
pub fn partition_positional<T>(items: &[T], masters: usize) -> (&[T], &[T]) {
    items.split_at(masters.min(items.len()))
}

pub fn partition_by_role(
    records: &[InstanceRecord],
) -> (Vec<&InstanceRecord>, Vec<&InstanceRecord>) {
    records.iter().partition(|r| r.role == NodeRole::Master)
}

pub fn init_command(pod_cidr: &str) -> String {
    format!("kubeadm init --pod-network-cidr={}", pod_cidr)
}

/// Script run on every master.
pub fn master_script(pod_cidr: &str) -> Vec<String> {
    vec![
        "set -e".into(),
        WAIT_FOR_CLOUD_INIT.into(),
        init_command(pod_cidr),
        "mkdir -p /home/ubuntu/.kube".into(),
        "cp -f /etc/kubernetes/admin.conf /home/ubuntu/.kube/config".into(),
        "chown -R ubuntu:ubuntu /home/ubuntu/.kube".into(),
        format!(
            "kubectl --kubeconfig /etc/kubernetes/admin.conf apply -f {} >/dev/null",
            FLANNEL_MANIFEST
        ),
    ]
}

pub fn worker_script(join_command: String) -> Vec<String> {
    vec!["set -e".into(), WAIT_FOR_CLOUD_INIT.into(), join_command]
}

/// Values a worker needs to join, as printed by `kubeadm init` or
/// `kubeadm token create --print-join-command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCredentials {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub ca_cert_hash: String,
}

fn join_line() -> &'static Regex {
    static JOIN_LINE: OnceLock<Regex> = OnceLock::new();
    JOIN_LINE.get_or_init(|| {
        Regex::new(concat!(
            r"kubeadm join\s+(\S+):(\d+)\s+",
            r"--token\s+([a-z0-9]{6}\.[a-z0-9]{16})\s+(?:\\\s+)?",
            r"--discovery-token-ca-cert-hash\s+(sha256:[a-f0-9]{64})",
        ))
        .expect("join line pattern is valid")
    })
}

impl JoinCredentials {
    /// Finds the first join command in `output`. kubeadm wraps it over
    /// several lines with `\` continuations.
    pub fn parse(output: &str) -> Option<Self> {
        let caps = join_line().captures(output)?;
        Some(Self {
            host: caps[1].to_string(),
            port: caps[2].parse().ok()?,
            token: caps[3].to_string(),
            ca_cert_hash: caps[4].to_string(),
        })
    }

    pub fn render(&self, template: &str) -> Result<String> {
        let command = template
            .replace("<master-ip>", &self.host)
            .replace("<api-port>", &self.port.to_string())
            .replace("<token>", &self.token)
            .replace("<hash>", &self.ca_cert_hash);

        match PLACEHOLDERS.iter().find(|p| command.contains(*p)) {
            Some(placeholder) => Err(Error::UnresolvedPlaceholder(placeholder)),
            None => Ok(command),
        }
    }
}

/// Runs `commands` on the instance behind `address` and waits for the result.
///
/// The address is resolved to an instance id first. Command failures end up
/// in the returned outcome; only provider errors are returned as `Err`.
pub async fn run_remote(
    provider: &dyn CloudProvider,
    address: IpAddr,
    role: NodeRole,
    commands: &[String],
    settings: &Settings,
) -> Result<DispatchOutcome> {
    let instance_id = provider
        .find_instance_by_address(address)
        .await?
        .ok_or(Error::InstanceNotFound(address))?;

    let deadline = Instant::now() + settings.command_timeout;
    let command_id = send_command(provider, &instance_id, commands, settings.poll_interval, deadline)
        .await?;
    info!("sent command {} to {} ({})", command_id, address, instance_id);

    let invocation = await_invocation(
        provider,
        &command_id,
        &instance_id,
        settings.poll_interval,
        deadline,
    )
    .await?;

    Ok(DispatchOutcome {
        address,
        instance_id,
        role,
        command_id,
        status: invocation.status,
        stdout: invocation.stdout,
        stderr: invocation.stderr,
    })
}

async fn send_command(
    provider: &dyn CloudProvider,
    instance_id: &str,
    commands: &[String],
    interval: Duration,
    deadline: Instant,
) -> Result<String> {
    let started = Instant::now();
    loop {
        match provider.send_command(instance_id, commands).await {
            Ok(command_id) => return Ok(command_id),
            Err(err) if err.is_code(COMMAND_TARGET_UNKNOWN) && Instant::now() < deadline => {
                debug!("{} is not registered for commands yet", instance_id);
                time::sleep(interval).await;
            }
            Err(err) if err.is_code(COMMAND_TARGET_UNKNOWN) => {
                return Err(Error::Timeout {
                    what: format!("{} to accept commands", instance_id),
                    elapsed: started.elapsed(),
                })
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn await_invocation(
    provider: &dyn CloudProvider,
    command_id: &str,
    instance_id: &str,
    interval: Duration,
    deadline: Instant,
) -> Result<CommandInvocation> {
    loop {
        time::sleep(interval).await;

        match provider.command_invocation(command_id, instance_id).await {
            Ok(invocation) if invocation.status.is_terminal() => return Ok(invocation),
            Ok(invocation) => debug!("command {} is {}", command_id, invocation.status),
            Err(err) if err.is_code(INVOCATION_NOT_FOUND) => {
                debug!("command {} has no invocation yet", command_id)
            }
            Err(err) => return Err(err.into()),
        }

        if Instant::now() >= deadline {
            warn!("gave up waiting for command {} on {}", command_id, instance_id);
            return Ok(CommandInvocation {
                status: CommandStatus::TimedOut,
                stdout: String::new(),
                stderr: "no result before the command timeout".into(),
            });
        }
    }
}

/// Initializes every master, then joins every worker using the credentials
/// of the first master.
///
/// Fails if the first master can't be initialized, because nothing could join
/// it. All other command failures are collected into the report.
pub async fn bootstrap_cluster(
    provider: &dyn CloudProvider,
    records: &[InstanceRecord],
    settings: &Settings,
) -> Result<BootstrapReport> {
    let (masters, workers) = partition_by_role(records);
    let primary = masters
        .first()
        .ok_or_else(|| Error::InvalidSpec("no master among the launched instances".into()))?;

    if masters.len() > 1 {
        warn!(
            "{} masters requested; each runs its own kubeadm init and workers join {}",
            masters.len(),
            primary.public_ip
        );
    }

    let mut report = BootstrapReport::default();
    let script = master_script(&settings.pod_cidr);

    for master in masters.iter() {
        info!("initializing master {}", master.public_ip);
        let outcome =
            run_remote(provider, master.public_ip, NodeRole::Master, &script, settings).await?;
        if master.id == primary.id && !outcome.succeeded() {
            return Err(Error::PrimaryInitFailed {
                address: outcome.address,
                stderr: outcome.stderr,
            });
        }
        report.outcomes.push(outcome);
    }

    if workers.is_empty() {
        return Ok(report);
    }

    let credentials = match JoinCredentials::parse(&report.outcomes[0].stdout) {
        Some(credentials) => credentials,
        None => fetch_join_credentials(provider, primary.public_ip, settings).await?,
    };
    let join = credentials.render(JOIN_TEMPLATE)?;
    let script = worker_script(join);

    for worker in workers.iter() {
        info!("joining worker {} to {}", worker.public_ip, credentials.host);
        let outcome =
            run_remote(provider, worker.public_ip, NodeRole::Worker, &script, settings).await?;
        report.outcomes.push(outcome);
    }

    Ok(report)
}

/// Asks a master for a fresh join command, for when the init output didn't
/// contain one.
pub async fn fetch_join_credentials(
    provider: &dyn CloudProvider,
    master: IpAddr,
    settings: &Settings,
) -> Result<JoinCredentials> {
    info!("asking {} for a join command", master);
    let outcome = run_remote(
        provider,
        master,
        NodeRole::Master,
        &[PRINT_JOIN_COMMAND.to_string()],
        settings,
    )
    .await?;

    if !outcome.succeeded() {
        return Err(Error::JoinCommandUnavailable(format!(
            "'{}' on {}: {}",
            PRINT_JOIN_COMMAND, master, outcome.stderr
        )));
    }

    JoinCredentials::parse(&outcome.stdout)
        .ok_or_else(|| Error::JoinCommandUnavailable(format!("'{}' on {}", PRINT_JOIN_COMMAND, master)))
}
