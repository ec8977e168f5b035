pub mod opts;
pub mod subs;

use std::io;

use anyhow::{bail, Context, Result};
use clap::CommandFactory;
use clusterup_lib::{
    aws::AwsProvider,
    info::cluster_instances,
    provision::{provision, ProvisionReport},
    ssh::ssh_command,
    types::{ClusterSpec, ObservedInstance},
};
use colored::Colorize;
use dialoguer::Input;
use log::*;
use prettytable::{cell, row, Table};

use opts::Clusterup;
use subs::{Completions, Info, Up};

fn prompt_count(value: Option<u32>, prompt: &str) -> Result<u32> {
    match value {
        Some(value) => Ok(value),
        None => Input::<u32>::new()
            .with_prompt(prompt)
            .interact_text()
            .with_context(|| format!("failed to read '{}'", prompt)),
    }
}

fn cluster_spec(sub: &Up) -> Result<ClusterSpec> {
    let total = prompt_count(sub.instances, "Total number of instances")?;
    let masters = prompt_count(sub.masters, "Number of master nodes")?;

    let passphrase = if sub.ask_passphrase {
        let passphrase = rpassword::prompt_password("Passphrase for the private key: ")
            .context("failed to read passphrase")?;
        Some(passphrase)
    } else {
        sub.passphrase.clone()
    };

    Ok(ClusterSpec::new(
        total,
        masters,
        sub.workers,
        sub.key_name.as_str(),
        passphrase,
    )?)
}

pub(crate) async fn up(sub: Up, aws_region: Option<String>) -> Result<()> {
    let spec = cluster_spec(&sub)?;
    let settings = sub.settings();
    info!(
        "{} masters and {} workers for cluster {}",
        spec.masters, spec.workers, settings.cluster_name
    );

    let provider = AwsProvider::from_env(aws_region).await;
    let report = provision(&provider, &spec, &settings)
        .await
        .with_context(|| format!("failed to provision cluster {}", settings.cluster_name))?;

    if sub.json {
        println!("{}", report.to_json()?);
    } else {
        print_report(&report);
    }

    if !report.is_success() {
        bail!(
            "{} of {} bootstrap commands failed",
            report.bootstrap.failures().count(),
            report.bootstrap.outcomes.len()
        );
    }
    if sub.json {
        return Ok(());
    }

    let primary = report
        .primary_master()
        .context("no master among the provisioned instances")?;

    println!("\n{}", "Cluster is up.".green().bold());
    println!("Connect to the primary master with:");
    println!("  {}", ssh_command(&report.key_path, &primary.public_ip));
    if spec.passphrase.is_some() {
        println!("The private key is protected by the passphrase you chose.");
    }
    println!("Then check the nodes with: {}", "kubectl get nodes".bold());
    Ok(())
}

fn print_report(report: &ProvisionReport) {
    for acquisition in [&report.key_pair, &report.role, &report.security_group] {
        let resource = acquisition.resource();
        let verb = if acquisition.was_created() {
            "created".green()
        } else {
            "reused".yellow()
        };
        println!("{} {} {}", verb, resource.kind, resource.id);
    }

    let mut table = Table::new();
    table.add_row(row!["Instance", "Role", "Public IP", "Bootstrap"]);
    for instance in report.instances.iter() {
        let status = report
            .bootstrap
            .outcomes
            .iter()
            .find(|o| o.instance_id == instance.id)
            .map(|o| o.status.to_string())
            .unwrap_or_else(|| "-".into());
        table.add_row(row![instance.id, instance.role, instance.public_ip, status]);
    }
    table.printstd();

    for failure in report.bootstrap.failures() {
        eprintln!(
            "{} {} ({}) {}: {}",
            "failed".red().bold(),
            failure.address,
            failure.role,
            failure.status,
            failure.stderr.trim()
        );
    }
}

pub(crate) async fn info(sub: Info, aws_region: Option<String>) -> Result<()> {
    let provider = AwsProvider::from_env(aws_region).await;
    let instances = cluster_instances(&provider, &sub.cluster)
        .await
        .with_context(|| format!("failed to list instances of {}", sub.cluster))?;

    if sub.json {
        let stdout = io::stdout();
        let handle = stdout.lock();
        serde_json::to_writer_pretty(handle, &instances)?;
        println!();
    } else {
        instance_table(&instances).printstd();
    }

    Ok(())
}

fn instance_table(instances: &[ObservedInstance]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Instance", "Role", "State", "Public IP", "Private IP"]);

    for instance in instances.iter() {
        let role = instance
            .role
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".into());
        let public_ip = instance
            .public_ip
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let private_ip = instance
            .private_ip
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        table.add_row(row![instance.id, role, instance.status, public_ip, private_ip]);
    }

    table
}

pub(crate) fn completions(sub: Completions) -> Result<()> {
    let mut cmd = Clusterup::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(sub.shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}
