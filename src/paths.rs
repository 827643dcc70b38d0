//! Project layout resolution for convey
//!
//! A project is laid out as:
//!
//! ```text
//! <project>/
//!   <deploy>/            deploy directory (project-wide config, deliver/)
//!     deliver/<lib>/     shared libraries units may import
//!   <feature>/
//!     <action>/          one deployable unit
//! ```
//!
//! The project name is the name of the directory holding the deploy
//! directory.
//!
//! # Environment Variables
//!
//! - `CONVEY_DEPLOY_DIR` - Override the deploy directory (e.g., `~/work/shop/deploy`)
//!
//! # Path Resolution Priority
//!
//! For the deploy directory:
//! 1. `--deploy-dir` flag
//! 2. `CONVEY_DEPLOY_DIR` environment variable
//! 3. The current directory

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::convention::{UnitName, validate_segment};
use crate::error::DeployError;

/// Environment variable for deploy directory override
pub const ENV_DEPLOY_DIR: &str = "CONVEY_DEPLOY_DIR";

/// Folder inside the deploy directory holding shared libraries
pub const DELIVER_DIR: &str = "deliver";

/// Resolve the deploy directory from the flag, the environment and the cwd.
pub fn deploy_dir(flag: Option<&str>) -> Result<PathBuf> {
    resolve_deploy_dir(flag, std::env::var(ENV_DEPLOY_DIR).ok())
}

fn resolve_deploy_dir(flag: Option<&str>, env: Option<String>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        let path = expand(dir);
        log::debug!("Using deploy dir from --deploy-dir: {}", path.display());
        return Ok(path);
    }

    if let Some(dir) = env {
        let path = expand(&dir);
        log::debug!("Using deploy dir from {}: {}", ENV_DEPLOY_DIR, path.display());
        return Ok(path);
    }

    let cwd = std::env::current_dir().context("Could not determine current directory")?;
    log::debug!("Using current directory as deploy dir: {}", cwd.display());
    Ok(cwd)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Where a project lives on disk and how its units are enumerated.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    deploy_dir: PathBuf,
    project_root: PathBuf,
    project: String,
}

impl ProjectLayout {
    /// Derive the layout from a deploy directory.
    pub fn discover(deploy_dir: &Path) -> Result<Self> {
        let deploy_dir = deploy_dir
            .canonicalize()
            .with_context(|| format!("Deploy directory not found: {}", deploy_dir.display()))?;
        let project_root = deploy_dir
            .parent()
            .with_context(|| format!("{} has no parent directory", deploy_dir.display()))?
            .to_path_buf();
        let project = project_root
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Cannot derive a project name from {}", project_root.display()))?
            .to_string();

        Self::new(deploy_dir, project_root, project)
    }

    /// Build a layout from explicit parts.
    pub fn new(deploy_dir: PathBuf, project_root: PathBuf, project: String) -> Result<Self> {
        validate_segment("project", &project)?;
        Ok(Self {
            deploy_dir,
            project_root,
            project,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn deploy_dir(&self) -> &Path {
        &self.deploy_dir
    }

    /// Folder of one shared library.
    pub fn library_dir(&self, library: &str) -> PathBuf {
        self.deploy_dir.join(DELIVER_DIR).join(library)
    }

    pub fn feature_dir(&self, feature: &str) -> PathBuf {
        self.project_root.join(feature)
    }

    pub fn unit_dir(&self, unit: &UnitName) -> PathBuf {
        self.project_root.join(unit.path())
    }

    /// Feature directories of the project, minus the ignore list.
    pub fn features(&self, ignore: &[String]) -> Result<Vec<String>> {
        let deploy_name = self.deploy_dir.file_name().and_then(|n| n.to_str());
        let features = child_dirs(&self.project_root)?
            .into_iter()
            .filter(|name| Some(name.as_str()) != deploy_name)
            .filter(|name| {
                let ignored = ignore.contains(name);
                if ignored {
                    log::debug!("Ignoring feature {name}");
                }
                !ignored
            })
            .collect();
        Ok(features)
    }

    /// Action directories of one feature.
    pub fn actions(&self, feature: &str) -> Result<Vec<String>> {
        let dir = self.feature_dir(feature);
        if !dir.is_dir() {
            return Err(DeployError::FeatureNotFound(dir).into());
        }
        child_dirs(&dir)
    }

    /// Every unit of one feature, in name order.
    pub fn feature_units(&self, feature: &str) -> Result<Vec<UnitName>> {
        self.actions(feature)?
            .iter()
            .map(|action| UnitName::new(&self.project, feature, action))
            .collect()
    }

    /// Every unit of the project, minus ignored features.
    pub fn units(&self, ignore: &[String]) -> Result<Vec<UnitName>> {
        let mut units = Vec::new();
        for feature in self.features(ignore)? {
            units.extend(self.feature_units(&feature)?);
        }
        Ok(units)
    }

    /// Fail unless the unit's directory exists.
    pub fn require_unit(&self, unit: &UnitName) -> Result<PathBuf> {
        let dir = self.unit_dir(unit);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(DeployError::UnitNotFound(dir).into())
        }
    }
}

/// Names of real child directories, skipping hidden ones, sorted.
fn child_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Could not read {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

// ============================================================================
// Tests
// ============================================================================
