//! Execution role phase

use anyhow::{Context, Result};
use cloudkit::Role;

use super::DeployContext;
use crate::convention::UnitName;
use crate::policy;

/// Role the unit's function runs under.
///
/// Production units get a role of their own name, created with the Lambda
/// trust policy when missing. Staging units all share one pre-existing role
/// which is only ever looked up.
pub fn ensure_role(ctx: &DeployContext, unit: &UnitName) -> Result<Role> {
    if ctx.is_staging() {
        let role = ctx
            .backend
            .get_role(&ctx.staging_role)
            .with_context(|| format!("Staging role '{}' is not available", ctx.staging_role))?;
        log::debug!("{unit}: using staging role {}", role.arn);
        return Ok(role);
    }

    let name = unit.name();
    match ctx.backend.get_role(&name) {
        Ok(role) => {
            log::debug!("{unit}: reusing role {}", role.arn);
            Ok(role)
        }
        Err(e) if e.is_not_found() => create_role(ctx, &name),
        Err(e) => Err(e).with_context(|| format!("Failed to look up role {name}")),
    }
}

fn create_role(ctx: &DeployContext, name: &str) -> Result<Role> {
    match ctx
        .backend
        .create_role(name, &policy::assume_role_document())
    {
        Ok(role) => {
            log::info!("Created role {}", role.arn);
            Ok(role)
        }
        // Someone else created it between our lookup and create
        Err(e) if e.is_ignorable() => ctx
            .backend
            .get_role(name)
            .with_context(|| format!("Role {name} exists but cannot be read")),
        Err(e) => Err(e).with_context(|| format!("Failed to create role {name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::engine::testing::TestProject;
    use cloudkit::MemoryBackend;

    #[test]
    fn test_role_is_created_once() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[]);
        let backend = MemoryBackend::new("ap-northeast-2");
        let ctx = project.context(&backend, Environment::Production);

        let first = ensure_role(&ctx, &unit).unwrap();
        let second = ensure_role(&ctx, &unit).unwrap();

        assert_eq!(first.arn, second.arn);
        assert_eq!(first.name, "myproj-checkout-charge");
        assert_eq!(backend.calls("create_role"), 1);

        let trust: serde_json::Value =
            serde_json::from_str(&backend.trust_policy(&first.name).unwrap()).unwrap();
        assert_eq!(
            trust["Statement"][0]["Principal"]["Service"],
            "lambda.amazonaws.com"
        );
    }

    #[test]
    fn test_existing_role_is_reused() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[]);
        let backend = MemoryBackend::new("ap-northeast-2").with_role("myproj-checkout-charge");
        let ctx = project.context(&backend, Environment::Production);

        ensure_role(&ctx, &unit).unwrap();
        assert_eq!(backend.calls("create_role"), 0);
    }

    #[test]
    fn test_staging_uses_shared_role_without_creating() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[]);
        let backend = MemoryBackend::new("ap-northeast-2").with_role("myproj-staging-role");
        let ctx = project.context(&backend, Environment::Staging);

        let role = ensure_role(&ctx, &unit).unwrap();
        assert_eq!(role.name, "myproj-staging-role");
        assert_eq!(backend.calls("create_role"), 0);
        assert!(backend.role("myproj-checkout-charge").is_none());
    }

    #[test]
    fn test_missing_staging_role_is_an_error() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[]);
        let backend = MemoryBackend::new("ap-northeast-2");
        let ctx = project.context(&backend, Environment::Staging).with_staging_role("shared");

        let err = ensure_role(&ctx, &unit).unwrap_err();
        assert!(err.to_string().contains("shared"));
        assert_eq!(backend.calls("create_role"), 0);
    }

    #[test]
    fn test_lookup_failure_propagates() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[]);
        let backend = MemoryBackend::new("ap-northeast-2");
        backend.fail_on("get_role", "throttled");
        let ctx = project.context(&backend, Environment::Production);

        assert!(ensure_role(&ctx, &unit).is_err());
        assert_eq!(backend.calls("create_role"), 0);
    }
}
