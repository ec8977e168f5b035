use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use clusterup_lib::types::{
    Settings, DEFAULT_CLUSTER_NAME, DEFAULT_IMAGE_ID, DEFAULT_INSTANCE_TYPE, DEFAULT_KEY_NAME,
    DEFAULT_POD_CIDR,
};

#[derive(Subcommand)]
pub enum SubCommands {
    Up(Up),
    Info(Info),
    Completions(Completions),
}

#[derive(Parser)]
#[command(about = "Provision instances and bootstrap a Kubernetes cluster on them")]
pub struct Up {
    #[arg(
        long,
        help = "total number of instances; prompted for when omitted",
        env = "CLUSTERUP_INSTANCES",
        value_name = "COUNT"
    )]
    pub instances: Option<u32>,
    #[arg(
        long,
        help = "how many of the instances are masters; prompted for when omitted",
        env = "CLUSTERUP_MASTERS",
        value_name = "COUNT"
    )]
    pub masters: Option<u32>,
    #[arg(
        long,
        help = "number of workers, must equal <INSTANCES> - <MASTERS> when given",
        env = "CLUSTERUP_WORKERS",
        value_name = "COUNT"
    )]
    pub workers: Option<u32>,
    #[arg(
        long,
        help = "cluster name, used to tag instances",
        env = "CLUSTERUP_CLUSTER",
        default_value = DEFAULT_CLUSTER_NAME,
        value_name = "NAME"
    )]
    pub cluster: String,
    #[arg(
        long,
        help = "name of the EC2 key pair to create or reuse",
        env = "CLUSTERUP_KEY_NAME",
        default_value = DEFAULT_KEY_NAME,
        value_name = "NAME"
    )]
    pub key_name: String,
    #[arg(
        long,
        help = "directory the private key is written to",
        env = "CLUSTERUP_KEY_DIR",
        default_value = ".",
        value_name = "DIR"
    )]
    pub key_dir: PathBuf,
    #[arg(
        long,
        help = "prompt for a passphrase to encrypt the private key with",
        conflicts_with = "passphrase"
    )]
    pub ask_passphrase: bool,
    #[arg(
        long,
        help = "passphrase to encrypt the private key with",
        env = "CLUSTERUP_PASSPHRASE",
        hide_env_values = true,
        value_name = "PASSPHRASE"
    )]
    pub passphrase: Option<String>,
    #[arg(
        long,
        help = "machine image for every instance",
        env = "CLUSTERUP_IMAGE",
        default_value = DEFAULT_IMAGE_ID,
        value_name = "AMI"
    )]
    pub image: String,
    #[arg(
        long,
        env = "CLUSTERUP_INSTANCE_TYPE",
        default_value = DEFAULT_INSTANCE_TYPE,
        value_name = "TYPE"
    )]
    pub instance_type: String,
    #[arg(
        long,
        help = "pod network CIDR passed to kubeadm init",
        env = "CLUSTERUP_POD_CIDR",
        default_value = DEFAULT_POD_CIDR,
        value_name = "CIDR"
    )]
    pub pod_cidr: String,
    #[arg(
        long,
        help = "seconds between status polls",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value_t = 15,
        value_name = "SECONDS"
    )]
    pub poll_interval: u64,
    #[arg(
        long,
        help = "seconds to wait for instances to reach running",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value_t = 600,
        value_name = "SECONDS"
    )]
    pub wait_timeout: u64,
    #[arg(
        long,
        help = "seconds to wait for each bootstrap command",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value_t = 900,
        value_name = "SECONDS"
    )]
    pub command_timeout: u64,
    #[arg(short, long, help = "print the result as JSON instead of tables")]
    pub json: bool,
}

impl Up {
    pub fn settings(&self) -> Settings {
        Settings {
            cluster_name: self.cluster.clone(),
            image_id: self.image.clone(),
            instance_type: self.instance_type.clone(),
            pod_cidr: self.pod_cidr.clone(),
            key_dir: self.key_dir.clone(),
            poll_interval: Duration::from_secs(self.poll_interval),
            wait_timeout: Duration::from_secs(self.wait_timeout),
            command_timeout: Duration::from_secs(self.command_timeout),
            ..Settings::default()
        }
    }
}

#[derive(Parser)]
#[command(about = "Show the instances of a cluster")]
pub struct Info {
    #[arg(
        long,
        env = "CLUSTERUP_CLUSTER",
        default_value = DEFAULT_CLUSTER_NAME,
        value_name = "NAME"
    )]
    pub cluster: String,
    #[arg(short, long, help = "output as JSON")]
    pub json: bool,
}

#[derive(Parser)]
#[command(about = "Generate shell completions")]
pub struct Completions {
    #[arg(value_enum)]
    pub shell: Shell,
}
