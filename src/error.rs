//! Domain errors raised by the deployer itself (provider faults stay `cloudkit::Error`).

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::UnitState;

#[derive(Debug, Error)]
pub enum DeployError {
    /// A project, feature or action name that cannot round-trip through a flat name
    #[error("invalid {kind} name '{value}': only letters, digits and '_' are allowed")]
    InvalidSegment { kind: &'static str, value: String },

    #[error("'{name}' is not a <project>-<feature>-<action> name")]
    MalformedName { name: String },

    #[error("'{arg}' is not a <feature>-<action> function name")]
    MalformedFunctionArg { arg: String },

    #[error("unit directory not found: {}", .0.display())]
    UnitNotFound(PathBuf),

    #[error("feature directory not found: {}", .0.display())]
    FeatureNotFound(PathBuf),

    #[error("unsupported resource kind '{kind}' declared by {unit}")]
    UnsupportedKind { unit: String, kind: String },

    #[error("invalid '{kind}' declaration in {unit}: {message}")]
    InvalidDeclaration {
        unit: String,
        kind: String,
        message: String,
    },

    /// Wraps the failure of one unit with the last state it completed
    #[error("deploying {unit} failed after reaching {state}")]
    UnitFailed { unit: String, state: UnitState },
}
