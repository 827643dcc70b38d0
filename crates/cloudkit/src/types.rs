//! Core types exchanged with a provider backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// An IAM role used to run functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Role ARN
    pub arn: String,
}

/// A customer-managed IAM policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedPolicy {
    /// Policy name
    pub name: String,
    /// Policy ARN
    pub arn: String,
}

/// One version of a managed policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVersion {
    /// Version id (`v1`, `v2`, ...)
    pub version_id: String,
    /// Whether this version is the one in effect
    pub is_default: bool,
}

/// Network placement of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcConfig {
    /// Subnets the function's network interfaces live in
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    /// Security groups applied to the interfaces
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

impl VpcConfig {
    /// Whether any placement is declared at all.
    pub fn is_empty(&self) -> bool {
        self.subnet_ids.is_empty() && self.security_group_ids.is_empty()
    }
}

/// Configuration of a deployed function as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfiguration {
    /// Function name
    pub name: String,
    /// Function ARN
    pub arn: String,
    /// Execution role ARN
    pub role_arn: String,
    /// Entry point
    pub handler: String,
    /// Runtime identifier
    pub runtime: String,
    /// Free-form description
    pub description: String,
    /// Timeout in seconds
    pub timeout: u32,
    /// Memory in MB
    pub memory_size: u32,
    /// Environment variables
    pub environment: BTreeMap<String, String>,
    /// Network placement, if any
    pub vpc: Option<VpcConfig>,
}

/// Request to create a new function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFunction {
    /// Function name
    pub name: String,
    /// Execution role ARN
    pub role_arn: String,
    /// Entry point
    pub handler: String,
    /// Runtime identifier
    pub runtime: String,
    /// Free-form description
    pub description: String,
    /// Timeout in seconds
    pub timeout: u32,
    /// Memory in MB
    pub memory_size: u32,
    /// Environment variables
    pub environment: BTreeMap<String, String>,
    /// Path to the zip artifact
    pub code: PathBuf,
    /// Network placement, if any
    pub vpc: Option<VpcConfig>,
}

/// Request to update the configuration of an existing function.
///
/// Entry point and network placement are deliberately absent: they are
/// only ever set at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFunctionConfiguration {
    /// Function name
    pub name: String,
    /// Execution role ARN
    pub role_arn: String,
    /// Free-form description
    pub description: String,
    /// Timeout in seconds
    pub timeout: u32,
    /// Memory in MB
    pub memory_size: u32,
    /// Environment variables
    pub environment: BTreeMap<String, String>,
}

/// A resource-based permission allowing a service to invoke a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokePermission {
    /// Function the permission is attached to
    pub function_name: String,
    /// Statement id, unique within the function policy
    pub statement_id: String,
    /// Granted action (`lambda:InvokeFunction`)
    pub action: String,
    /// Service principal (e.g. `s3.amazonaws.com`)
    pub principal: String,
    /// Source resource the grant is scoped to
    pub source_arn: String,
}

/// Queue attributes keyed by attribute name (`DelaySeconds`, ...).
pub type QueueAttributes = BTreeMap<String, String>;
