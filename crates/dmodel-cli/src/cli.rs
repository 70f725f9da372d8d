use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use dmodel_types::{PathAddress, StepKind};

#[derive(Parser)]
#[command(
    name = "dmodel",
    about = "dmodel — browse a debugger's object model through a lazy proxy tree",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Loader configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the mirrored hierarchy
    Tree(TreeArgs),
    /// List the attributes of a node
    Attrs(AttrsArgs),
    /// Interrupt a process or thread
    Interrupt(TargetArgs),
    /// Step a thread
    Step(StepArgs),
    /// Run a scripted refresh showing identity preservation and invalidation
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct TreeArgs {
    /// Node to start from (default: the root)
    pub path: Option<PathAddress>,
    /// Levels to expand below the starting node
    #[arg(short, long)]
    pub depth: Option<usize>,
}

#[derive(Args)]
pub struct AttrsArgs {
    pub path: PathAddress,
    /// Include hidden bookkeeping attributes
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Args)]
pub struct TargetArgs {
    pub path: PathAddress,
}

#[derive(Args)]
pub struct StepArgs {
    pub path: PathAddress,
    #[arg(short, long, default_value = "into")]
    pub kind: StepKind,
}

#[derive(Args)]
pub struct DemoArgs {}
