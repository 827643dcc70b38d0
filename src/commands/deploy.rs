use anyhow::{Context as _, Result};
use cloudkit::{AwsCliBackend, Backend};
use colored::Colorize;
use dialoguer::Confirm;

use crate::Context;
use crate::cli::DeployArgs;
use crate::config::{Environment, ProjectConfig};
use crate::convention::UnitName;
use crate::engine::{DeployContext, DeploySummary, Deployer};
use crate::paths::{self, ProjectLayout};
use crate::progress;
use crate::ui;

/// What one invocation deploys.
#[derive(Debug, PartialEq, Eq)]
enum Target {
    All,
    Feature(String),
    Unit(UnitName),
}

impl Target {
    fn from_args(project: &str, args: &DeployArgs) -> Result<Self> {
        if let Some(function) = &args.function {
            return Ok(Self::Unit(UnitName::from_function_arg(project, function)?));
        }
        Ok(args.feature.clone().map_or(Self::All, Self::Feature))
    }

    fn describe(&self) -> String {
        match self {
            Self::All => "all features".to_string(),
            Self::Feature(feature) => format!("feature {feature}"),
            Self::Unit(unit) => unit.name(),
        }
    }
}

pub fn run(ctx: &Context, deploy_dir: Option<&str>, args: &DeployArgs) -> Result<()> {
    let dir = paths::deploy_dir(deploy_dir)?;
    let layout = ProjectLayout::discover(&dir)?;
    let project = ProjectConfig::load(layout.deploy_dir())?;
    let env = Environment::from_test_flag(args.test);
    let target = Target::from_args(layout.project(), args)?;

    let mut backend = AwsCliBackend::new(args.region.as_str())?;
    if let Some(profile) = &args.profile {
        backend = backend.with_profile(profile.as_str());
    }

    let account = resolve_account(&backend, env, ctx.quiet)?;

    if !ctx.quiet {
        ui::header(&format!("Deploying {}", layout.project()));
        ui::kv("Target", &target.describe());
        ui::kv("Environment", &env.to_string());
        ui::kv("Region", backend.region());
        if let Some(account) = &account {
            ui::kv("Account", account);
        }
        ui::kv("Deploy dir", &layout.deploy_dir().display().to_string());
        println!();
    }

    if env == Environment::Production
        && target == Target::All
        && !args.yes
        && console::Term::stdout().is_term()
        && !confirm_production()?
    {
        ui::info("Aborted");
        return Ok(());
    }

    let mut deploy_ctx = DeployContext::new(&backend, &layout, &project, env);
    if let Some(role) = &args.staging_role {
        deploy_ctx = deploy_ctx.with_staging_role(role.as_str());
    }

    let bar = progress::units_bar(ctx.quiet);
    let deployer = Deployer::new(deploy_ctx).with_progress(bar.clone());
    let result = match &target {
        Target::All => deployer.deploy_all(),
        Target::Feature(feature) => deployer.deploy_feature(feature),
        Target::Unit(unit) => deployer.deploy_units(std::slice::from_ref(unit)),
    };
    bar.finish_and_clear();

    let summary = result?;
    if !ctx.quiet {
        report(&summary);
    }
    Ok(())
}

/// Check credentials up front for production, where policy ARNs need the account.
///
/// Staging never composes policies, so it is not resolved there.
fn resolve_account(backend: &dyn Backend, env: Environment, quiet: bool) -> Result<Option<String>> {
    if env.is_staging() {
        return Ok(None);
    }

    let spinner = (!quiet).then(|| progress::spinner("Resolving account..."));
    let account = backend.account_id();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let account = account.context("Could not reach the provider; check credentials")?;
    Ok(Some(account))
}

fn report(summary: &DeploySummary) {
    for unit in &summary.deployed {
        ui::success(&unit.name());
    }
    println!();
    ui::success(&format!(
        "Deployed {} unit(s)",
        summary.deployed.len().to_string().bold()
    ));
}

fn confirm_production() -> Result<bool> {
    let confirmed = Confirm::new()
        .with_prompt("Deploy every feature to production?")
        .default(false)
        .interact()?;

    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit::MemoryBackend;

    fn args(feature: Option<&str>, function: Option<&str>) -> DeployArgs {
        DeployArgs {
            feature: feature.map(str::to_string),
            function: function.map(str::to_string),
            test: false,
            region: "ap-northeast-2".to_string(),
            profile: None,
            staging_role: None,
            yes: false,
        }
    }

    #[test]
    fn test_target_from_args() {
        assert_eq!(Target::from_args("shop", &args(None, None)).unwrap(), Target::All);
        assert_eq!(
            Target::from_args("shop", &args(Some("checkout"), None)).unwrap(),
            Target::Feature("checkout".to_string())
        );

        let target = Target::from_args("shop", &args(None, Some("checkout-charge"))).unwrap();
        assert_eq!(target.describe(), "shop-checkout-charge");
    }

    #[test]
    fn test_account_is_resolved_for_production_only() {
        let backend = MemoryBackend::new("ap-northeast-2");

        assert_eq!(resolve_account(&backend, Environment::Staging, true).unwrap(), None);
        assert_eq!(backend.calls("account_id"), 0);

        assert_eq!(
            resolve_account(&backend, Environment::Production, true).unwrap(),
            Some("123456789012".to_string())
        );
        assert_eq!(backend.calls("account_id"), 1);
    }

    #[test]
    fn test_account_failure_aborts_production() {
        let backend = MemoryBackend::new("ap-northeast-2");
        backend.fail_on("account_id", "ExpiredToken");

        let err = resolve_account(&backend, Environment::Production, true).unwrap_err();
        assert!(format!("{err:#}").contains("check credentials"));
    }

    #[test]
    fn test_malformed_function_arg() {
        assert!(Target::from_args("shop", &args(None, Some("checkout"))).is_err());
    }
}
