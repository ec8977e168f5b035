mod cli;

use std::env;

use anyhow::Result;
use clap::Parser;
use cli::{opts::Clusterup, subs::SubCommands};
use log::LevelFilter;

fn init_log() {
    let mut builder = pretty_env_logger::formatted_builder();
    match env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) => builder
            .filter_level(LevelFilter::Warn)
            .filter_module("clusterup", LevelFilter::Info)
            .filter_module("clusterup_lib", LevelFilter::Info),
    };
    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Clusterup::parse();

    match opts.commands {
        SubCommands::Up(sub) => {
            init_log();
            cli::up(sub, opts.aws_region).await
        }
        SubCommands::Info(sub) => {
            init_log();
            cli::info(sub, opts.aws_region).await
        }
        SubCommands::Completions(sub) => cli::completions(sub),
    }
}
