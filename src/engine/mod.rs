//! Deployment engine for convey
//!
//! Each unit goes through four phases, in order:
//! 1. Role - look up or create the execution role
//! 2. Function - create or update code and configuration
//! 3. Link - provision declared resources and collect policy statements
//! 4. Attach - compose the unit's managed policy and attach policies to the role

pub mod attach;
pub mod function;
pub mod linker;
pub mod orchestrator;
pub mod role;

pub use orchestrator::{DeploySummary, Deployer};

use cloudkit::Backend;
use std::fmt;

use crate::config::{Environment, ProjectConfig};
use crate::paths::ProjectLayout;

/// Region used when none is given.
pub const DEFAULT_REGION: &str = "ap-northeast-2";

/// Last phase a unit completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitState {
    Unconfigured,
    RoleReady,
    FunctionReady,
    ResourcesLinked,
    PolicyAttached,
    Deployed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unconfigured => "unconfigured",
            Self::RoleReady => "role ready",
            Self::FunctionReady => "function ready",
            Self::ResourcesLinked => "resources linked",
            Self::PolicyAttached => "policy attached",
            Self::Deployed => "deployed",
        };
        f.write_str(label)
    }
}

/// Shared role every unit runs under in staging.
pub fn default_staging_role(project: &str) -> String {
    format!("{project}-staging-role")
}

/// Everything a phase needs besides the unit itself.
pub struct DeployContext<'a> {
    pub backend: &'a dyn Backend,
    pub layout: &'a ProjectLayout,
    pub project: &'a ProjectConfig,
    pub env: Environment,
    pub staging_role: String,
}

impl<'a> DeployContext<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        layout: &'a ProjectLayout,
        project: &'a ProjectConfig,
        env: Environment,
    ) -> Self {
        Self {
            backend,
            layout,
            project,
            env,
            staging_role: default_staging_role(layout.project()),
        }
    }

    #[must_use]
    pub fn with_staging_role(mut self, name: impl Into<String>) -> Self {
        self.staging_role = name.into();
        self
    }

    pub fn is_staging(&self) -> bool {
        self.env.is_staging()
    }
}
