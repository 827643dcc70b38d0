//! Unit enumeration and phase sequencing

use anyhow::Result;
use indicatif::ProgressBar;

use super::{DeployContext, UnitState, attach, function, linker, role};
use crate::config::UnitConfig;
use crate::convention::UnitName;
use crate::error::DeployError;

/// Units deployed by one run, in order.
#[derive(Debug, Default)]
pub struct DeploySummary {
    pub deployed: Vec<UnitName>,
}

/// Deploys units one at a time, stopping at the first failure.
pub struct Deployer<'a> {
    ctx: DeployContext<'a>,
    progress: Option<ProgressBar>,
}

impl<'a> Deployer<'a> {
    pub fn new(ctx: DeployContext<'a>) -> Self {
        Self {
            ctx,
            progress: None,
        }
    }

    /// Report each unit on `bar` (its length is set per run).
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Every unit of every feature not on the ignore list.
    pub fn deploy_all(&self) -> Result<DeploySummary> {
        let units = self.ctx.layout.units(&self.ctx.project.ignore)?;
        self.deploy_units(&units)
    }

    /// Every unit of one feature.
    pub fn deploy_feature(&self, feature: &str) -> Result<DeploySummary> {
        let units = self.ctx.layout.feature_units(feature)?;
        self.deploy_units(&units)
    }

    pub fn deploy_units(&self, units: &[UnitName]) -> Result<DeploySummary> {
        if let Some(bar) = &self.progress {
            bar.set_length(units.len() as u64);
        }

        let mut summary = DeploySummary::default();
        for unit in units {
            if let Some(bar) = &self.progress {
                bar.set_message(unit.name());
            }
            self.deploy_unit(unit)?;
            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
            summary.deployed.push(unit.clone());
        }
        Ok(summary)
    }

    /// Run all four phases for one unit.
    ///
    /// A failure is reported together with the last phase the unit completed.
    pub fn deploy_unit(&self, unit: &UnitName) -> Result<()> {
        let mut state = UnitState::Unconfigured;
        match self.run_phases(unit, &mut state) {
            Ok(()) => Ok(()),
            Err(e) => Err(e.context(DeployError::UnitFailed {
                unit: unit.name(),
                state,
            })),
        }
    }

    fn run_phases(&self, unit: &UnitName, state: &mut UnitState) -> Result<()> {
        let ctx = &self.ctx;
        let dir = ctx.layout.require_unit(unit)?;
        let config = UnitConfig::load(&dir)?;
        log::info!("Deploying {unit} ({})", ctx.env);

        let role = role::ensure_role(ctx, unit)?;
        advance(unit, state, UnitState::RoleReady);

        function::reconcile(ctx, unit, &config, &role)?;
        advance(unit, state, UnitState::FunctionReady);

        let statements = linker::link(ctx, unit, &config)?;
        advance(unit, state, UnitState::ResourcesLinked);

        attach::attach(ctx, unit, &config, &role, statements)?;
        advance(unit, state, UnitState::PolicyAttached);

        advance(unit, state, UnitState::Deployed);
        Ok(())
    }
}

fn advance(unit: &UnitName, state: &mut UnitState, next: UnitState) {
    log::debug!("{unit}: {state} -> {next}");
    *state = next;
}
