//! Naming convention between the project tree and deployed resources
//!
//! A unit living at `<project>/<feature>/<action>` is deployed as the
//! function `<project>-<feature>-<action>`, runs under a role of the same
//! name and gets a managed policy of the same name. The flat name is only
//! reversible when no segment contains the separator, so every segment is
//! validated up front and the structured [`UnitName`] is what gets passed
//! around.

use anyhow::Result;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::error::DeployError;

/// Separator between segments of a deployed name.
pub const SEPARATOR: char = '-';

/// Allowed characters for a single segment.
static SEGMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("segment regex is valid"));

/// Identity of one deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitName {
    pub project: String,
    pub feature: String,
    pub action: String,
}

impl UnitName {
    /// Build a unit identity, validating every segment.
    pub fn new(project: &str, feature: &str, action: &str) -> Result<Self> {
        validate_segment("project", project)?;
        validate_segment("feature", feature)?;
        validate_segment("action", action)?;
        Ok(Self {
            project: project.to_string(),
            feature: feature.to_string(),
            action: action.to_string(),
        })
    }

    /// Split a deployed name back into its three segments.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split(SEPARATOR).collect();
        match parts.as_slice() {
            [project, feature, action] => Self::new(project, feature, action),
            _ => Err(DeployError::MalformedName {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Parse the unit given to `--function`.
    ///
    /// Accepts `<feature>-<action>` or the full deployed name, which must
    /// belong to `project`.
    pub fn from_function_arg(project: &str, arg: &str) -> Result<Self> {
        let malformed = || DeployError::MalformedFunctionArg {
            arg: arg.to_string(),
        };
        match arg.split(SEPARATOR).collect::<Vec<_>>().as_slice() {
            [feature, action] => Self::new(project, feature, action),
            [_, _, _] => {
                let unit = Self::parse(arg)?;
                if unit.project == project {
                    Ok(unit)
                } else {
                    Err(malformed().into())
                }
            }
            _ => Err(malformed().into()),
        }
    }

    /// Deployed name of another unit of the same feature, e.g. the receiver
    /// behind a topic.
    pub fn sibling_name(&self, action: &str) -> Result<String> {
        build_name(&self.project, &self.feature, action)
    }

    /// The flat deployed name.
    pub fn name(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.project, self.feature, self.action
        )
    }

    /// Directory of the unit relative to the project root (`feature/action`).
    ///
    /// Together with [`UnitName::parse`] this maps a deployed name back to
    /// its directory.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.feature).join(&self.action)
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Compose the deployed name of `feature/action` in `project`.
pub fn build_name(project: &str, feature: &str, action: &str) -> Result<String> {
    Ok(UnitName::new(project, feature, action)?.name())
}

/// Reject segments that would make the flat name ambiguous.
pub fn validate_segment(kind: &'static str, value: &str) -> Result<(), DeployError> {
    if SEGMENT_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(DeployError::InvalidSegment {
            kind,
            value: value.to_string(),
        })
    }
}
