use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::ffi::OsString;

use crate::engine::DEFAULT_REGION;

#[derive(Parser)]
#[command(name = "convey")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy a tree of Lambda functions by convention", long_about = None)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Deploy directory [default: $CONVEY_DEPLOY_DIR or the current directory]
    #[arg(long, global = true, value_name = "DIR")]
    pub deploy_dir: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Deploy options when no subcommand is given
    #[command(flatten)]
    pub deploy: DeployArgs,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy every unit, one feature or one unit (the default)
    Deploy(DeployArgs),

    /// List units and the names they deploy as
    List(ListArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Deploy only the units of this feature
    #[arg(long, conflicts_with = "function")]
    pub feature: Option<String>,

    /// Deploy a single unit, given as <feature>-<action> or its deployed name
    #[arg(long)]
    pub function: Option<String>,

    /// Deploy to staging (shared role, prefixed buckets, no policies)
    #[arg(long)]
    pub test: bool,

    /// Region to deploy to
    #[arg(long, env = "CONVEY_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Named profile of the aws CLI
    #[arg(long, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// Role every unit runs under in staging [default: <project>-staging-role]
    #[arg(long, value_name = "NAME")]
    pub staging_role: Option<String>,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only list the units of this feature
    #[arg(long)]
    pub feature: Option<String>,
}

/// Flags also accepted in their old single-dash form (`-feature=checkout`).
const LEGACY_FLAGS: &[&str] = &["feature", "function", "region", "test"];

/// Rewrite old single-dash long flags to their `--` form.
pub fn normalize_legacy_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(|arg| {
            let arg = arg.into();
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = text.strip_prefix('-').filter(|r| !r.starts_with('-')) else {
                return arg;
            };
            let name = rest.split_once('=').map_or(rest, |(name, _)| name);
            if LEGACY_FLAGS.contains(&name) {
                OsString::from(format!("--{rest}"))
            } else {
                arg
            }
        })
        .collect()
}
