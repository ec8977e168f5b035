use super::subs::SubCommands;
use clap::Parser;

#[derive(Parser)]
#[command(name = "clusterup", version, author, about)]
pub struct Clusterup {
    #[arg(
        long,
        global = true,
        help = "The default AWS region",
        env = "AWS_DEFAULT_REGION",
        value_name = "REGION"
    )]
    pub aws_region: Option<String>,
    #[command(subcommand)]
    pub commands: SubCommands,
}
