//! Function phase: create or update one unit's function

use anyhow::{Context, Result};
use cloudkit::{CreateFunction, FunctionConfiguration, Role, UpdateFunctionConfiguration};

use super::DeployContext;
use crate::config::UnitConfig;
use crate::convention::UnitName;
use crate::package::{Artifact, StagedUnit};

/// Entry point every unit exposes.
pub const HANDLER: &str = "lambda_function.lambda_handler";

/// Runtime every unit is deployed with.
pub const RUNTIME: &str = "python3.12";

/// Bring the unit's function in line with its directory.
///
/// A missing function is created; an existing one gets its code and then
/// its configuration replaced. Network placement is only applied on
/// creation. The description doubles as the carrier of the environment's
/// database settings for units that ship the database marker.
pub fn reconcile(
    ctx: &DeployContext,
    unit: &UnitName,
    config: &UnitConfig,
    role: &Role,
) -> Result<FunctionConfiguration> {
    let mut staged = StagedUnit::stage(ctx.layout, unit, config, ctx.env)?;
    let description = if staged.has_database_marker() {
        ctx.project.database_record(ctx.env)
    } else {
        unit.name()
    };
    let artifact = staged.build_artifact()?;

    let name = unit.name();
    let function = match ctx.backend.get_function(&name) {
        Ok(_) => update(ctx, &name, config, role, description, &artifact)?,
        Err(e) if e.is_not_found() => create(ctx, &name, config, role, &artifact)?,
        Err(e) => return Err(e).with_context(|| format!("Failed to look up function {name}")),
    };

    staged.finish()?;
    Ok(function)
}

fn create(
    ctx: &DeployContext,
    name: &str,
    config: &UnitConfig,
    role: &Role,
    artifact: &Artifact,
) -> Result<FunctionConfiguration> {
    let vpc = (!ctx.is_staging() && config.has_vpc()).then(|| config.vpc.clone());
    let request = CreateFunction {
        name: name.to_string(),
        role_arn: role.arn.clone(),
        handler: HANDLER.to_string(),
        runtime: RUNTIME.to_string(),
        // New functions always start out carrying the database record
        description: ctx.project.database_record(ctx.env),
        timeout: config.lambda.timeout(),
        memory_size: config.lambda.memory_size(),
        environment: config.lambda.env.clone(),
        code: artifact.path.clone(),
        vpc,
    };

    let function = ctx
        .backend
        .create_function(&request)
        .with_context(|| format!("Failed to create function {name}"))?;
    log::info!("Created function {} ({})", function.arn, artifact.digest);
    Ok(function)
}

fn update(
    ctx: &DeployContext,
    name: &str,
    config: &UnitConfig,
    role: &Role,
    description: String,
    artifact: &Artifact,
) -> Result<FunctionConfiguration> {
    ctx.backend
        .update_function_code(name, &artifact.path)
        .with_context(|| format!("Failed to upload code for {name}"))?;
    log::debug!("{name}: uploaded code {}", artifact.digest);

    let request = UpdateFunctionConfiguration {
        name: name.to_string(),
        role_arn: role.arn.clone(),
        description,
        timeout: config.lambda.timeout(),
        memory_size: config.lambda.memory_size(),
        environment: config.lambda.env.clone(),
    };
    let function = ctx
        .backend
        .update_function_configuration(&request)
        .with_context(|| format!("Failed to update configuration of {name}"))?;
    log::info!("Updated function {}", function.arn);
    Ok(function)
}
