//! Attach phase: compose the unit's managed policy and attach policies

use anyhow::{Context, Result};
use cloudkit::Role;

use super::DeployContext;
use crate::config::UnitConfig;
use crate::convention::UnitName;
use crate::policy::{self, PolicyDocument, PolicyStatement, VPC_ACCESS_POLICY_ARN};

/// Attach the common policies, the unit's own policy and VPC access to its role.
///
/// Staging roles are shared and managed by hand, so nothing is attached there.
pub fn attach(
    ctx: &DeployContext,
    unit: &UnitName,
    config: &UnitConfig,
    role: &Role,
    statements: Vec<PolicyStatement>,
) -> Result<()> {
    if ctx.is_staging() {
        log::debug!("{unit}: staging role, skipping policy attachment");
        return Ok(());
    }

    for arn in &ctx.project.common_policies {
        attach_to(ctx, role, arn)?;
    }

    if !statements.is_empty() {
        let document = PolicyDocument::new(statements);
        let arn = upsert_policy(ctx, &unit.name(), &document.to_json())?;
        attach_to(ctx, role, &arn)?;
    }

    if config.has_vpc() {
        attach_to(ctx, role, VPC_ACCESS_POLICY_ARN)?;
    }
    Ok(())
}

fn attach_to(ctx: &DeployContext, role: &Role, policy_arn: &str) -> Result<()> {
    ctx.backend
        .attach_role_policy(&role.name, policy_arn)
        .with_context(|| format!("Failed to attach {policy_arn} to {}", role.name))?;
    log::info!("Attached {policy_arn} to {}", role.name);
    Ok(())
}

/// Make `document` the default version of the managed policy `name`.
///
/// An existing policy is pruned to its default version first so the new
/// version always fits under the provider's version limit.
fn upsert_policy(ctx: &DeployContext, name: &str, document: &str) -> Result<String> {
    let account = ctx
        .backend
        .account_id()
        .context("Failed to resolve the account id")?;
    let arn = policy::managed_policy_arn(&account, name);

    match ctx.backend.get_policy(&arn) {
        Ok(existing) => {
            let versions = ctx
                .backend
                .list_policy_versions(&existing.arn)
                .with_context(|| format!("Failed to list versions of {arn}"))?;
            for version in versions.iter().filter(|v| !v.is_default) {
                ctx.backend
                    .delete_policy_version(&existing.arn, &version.version_id)
                    .with_context(|| {
                        format!("Failed to delete version {} of {arn}", version.version_id)
                    })?;
            }
            let version = ctx
                .backend
                .create_policy_version(&existing.arn, document, true)
                .with_context(|| format!("Failed to update {arn}"))?;
            log::info!("Updated policy {arn} to {}", version.version_id);
            Ok(existing.arn)
        }
        Err(e) if e.is_not_found() => {
            let created = ctx
                .backend
                .create_policy(name, document)
                .with_context(|| format!("Failed to create policy {name}"))?;
            log::info!("Created policy {}", created.arn);
            Ok(created.arn)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to look up policy {arn}")),
    }
}
