//! Backend abstraction for provider operations.
//!
//! The [`Backend`] trait defines the interface for talking to the cloud
//! provider, allowing for different implementations (the real `aws` CLI,
//! an in-memory provider for testing).
//!
//! Every method maps to one provider call. Create-style calls report
//! duplicates as [`Error::AlreadyExists`](crate::Error::AlreadyExists) and
//! lookups report missing resources as
//! [`Error::NotFound`](crate::Error::NotFound); deciding whether either is
//! fatal is left to the caller.

pub mod aws;
pub mod memory;

use crate::error::Result;
use crate::types::{
    CreateFunction, FunctionConfiguration, InvokePermission, ManagedPolicy, PolicyVersion,
    QueueAttributes, Role, UpdateFunctionConfiguration,
};
use std::path::Path;

/// Backend trait for provider operations.
pub trait Backend: Send + Sync {
    /// Region every call is made against.
    fn region(&self) -> &str;

    // =========================================================================
    // Identity
    // =========================================================================

    /// Account id of the calling identity.
    fn account_id(&self) -> Result<String>;

    // =========================================================================
    // IAM
    // =========================================================================

    /// Look up a role by name.
    fn get_role(&self, name: &str) -> Result<Role>;

    /// Create a role with the given trust policy document.
    fn create_role(&self, name: &str, trust_policy: &str) -> Result<Role>;

    /// Attach a managed policy to a role. Attaching twice is a no-op.
    fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;

    /// Look up a managed policy by ARN.
    fn get_policy(&self, policy_arn: &str) -> Result<ManagedPolicy>;

    /// Create a managed policy from a document.
    fn create_policy(&self, name: &str, document: &str) -> Result<ManagedPolicy>;

    /// List every version of a managed policy.
    fn list_policy_versions(&self, policy_arn: &str) -> Result<Vec<PolicyVersion>>;

    /// Delete one non-default policy version.
    fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<()>;

    /// Push a new policy version.
    fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<PolicyVersion>;

    // =========================================================================
    // Lambda
    // =========================================================================

    /// Look up a function by name.
    fn get_function(&self, name: &str) -> Result<FunctionConfiguration>;

    /// Create a function.
    fn create_function(&self, request: &CreateFunction) -> Result<FunctionConfiguration>;

    /// Replace the code of a function with a zip artifact.
    fn update_function_code(&self, name: &str, code: &Path) -> Result<FunctionConfiguration>;

    /// Update the runtime configuration of a function.
    fn update_function_configuration(
        &self,
        request: &UpdateFunctionConfiguration,
    ) -> Result<FunctionConfiguration>;

    /// Statement ids of the function's resource policy.
    ///
    /// A function that never had a permission added has no policy; that is
    /// reported as `NotFound`.
    fn list_permissions(&self, function_name: &str) -> Result<Vec<String>>;

    /// Remove one statement from the function's resource policy.
    fn remove_permission(&self, function_name: &str, statement_id: &str) -> Result<()>;

    /// Add a statement to the function's resource policy.
    fn add_permission(&self, permission: &InvokePermission) -> Result<()>;

    // =========================================================================
    // S3
    // =========================================================================

    /// Create a bucket in the backend's region.
    fn create_bucket(&self, name: &str) -> Result<()>;

    // =========================================================================
    // SNS
    // =========================================================================

    /// Create a topic, returning its ARN. Creating an existing topic returns
    /// the existing ARN.
    fn create_topic(&self, name: &str) -> Result<String>;

    /// Subscribe an endpoint to a topic, returning the subscription ARN.
    fn subscribe(&self, topic_arn: &str, protocol: &str, endpoint: &str) -> Result<String>;

    // =========================================================================
    // DynamoDB
    // =========================================================================

    /// ARN of an existing table.
    fn describe_table(&self, name: &str) -> Result<String>;

    // =========================================================================
    // SQS
    // =========================================================================

    /// Create a queue, returning its URL.
    fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> Result<String>;

    /// URL of an existing queue.
    fn get_queue_url(&self, name: &str) -> Result<String>;

    /// Overwrite attributes of an existing queue.
    fn set_queue_attributes(&self, queue_url: &str, attributes: &QueueAttributes) -> Result<()>;

    /// ARN of a queue by URL.
    fn get_queue_arn(&self, queue_url: &str) -> Result<String>;
}
