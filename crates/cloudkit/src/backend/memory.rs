//! In-memory provider backend.
//!
//! Behaves like the real provider for every call the deployer makes:
//! duplicates are reported as `AlreadyExists`, missing resources as
//! `NotFound`, and a managed policy refuses a sixth version. Every call is
//! recorded so tests can assert on which provider operations ran.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{
    CreateFunction, FunctionConfiguration, InvokePermission, ManagedPolicy, PolicyVersion,
    QueueAttributes, Role, UpdateFunctionConfiguration,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maximum number of versions a managed policy may hold.
const MAX_POLICY_VERSIONS: usize = 5;

/// A stored policy version, including its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    /// Version id (`v1`, `v2`, ...)
    pub version_id: String,
    /// Policy document JSON
    pub document: String,
    /// Whether this version is the one in effect
    pub is_default: bool,
}

/// A topic subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Topic ARN
    pub topic_arn: String,
    /// Delivery protocol (`lambda`)
    pub protocol: String,
    /// Receiving endpoint ARN
    pub endpoint: String,
}

#[derive(Debug)]
struct StoredRole {
    role: Role,
    trust_policy: String,
    attached: BTreeSet<String>,
}

#[derive(Debug)]
struct StoredPolicy {
    policy: ManagedPolicy,
    versions: Vec<StoredVersion>,
    next_version: u32,
}

#[derive(Debug)]
struct StoredFunction {
    config: FunctionConfiguration,
    code_uploads: u32,
}

#[derive(Debug)]
struct StoredQueue {
    url: String,
    arn: String,
    attributes: QueueAttributes,
}

#[derive(Debug, Default)]
struct State {
    roles: BTreeMap<String, StoredRole>,
    policies: BTreeMap<String, StoredPolicy>,
    functions: BTreeMap<String, StoredFunction>,
    permissions: BTreeMap<String, Vec<InvokePermission>>,
    buckets: BTreeSet<String>,
    topics: BTreeMap<String, String>,
    subscriptions: Vec<Subscription>,
    tables: BTreeMap<String, String>,
    queues: BTreeMap<String, StoredQueue>,
    calls: Vec<String>,
    failures: BTreeMap<String, String>,
}

impl State {
    /// Record a call, failing it if a fault was injected for the operation.
    fn record(&mut self, op: &str) -> Result<()> {
        self.calls.push(op.to_string());
        match self.failures.get(op) {
            Some(message) => Err(Error::Other(message.clone())),
            None => Ok(()),
        }
    }

    fn queue_by_url(&mut self, url: &str) -> Result<&mut StoredQueue> {
        self.queues
            .values_mut()
            .find(|q| q.url == url)
            .ok_or_else(|| not_found(url))
    }
}

/// Provider backend held entirely in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    region: String,
    account: String,
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Create an empty provider for a region.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: "123456789012".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Use a specific account id in generated ARNs.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Seed an existing table.
    pub fn with_table(self, name: &str) -> Self {
        let arn = self.table_arn(name);
        self.state().tables.insert(name.to_string(), arn);
        self
    }

    /// Seed an existing role.
    pub fn with_role(self, name: &str) -> Self {
        let role = Role {
            name: name.to_string(),
            arn: self.role_arn(name),
        };
        self.state().roles.insert(
            name.to_string(),
            StoredRole {
                role,
                trust_policy: String::new(),
                attached: BTreeSet::new(),
            },
        );
        self
    }

    /// Seed an existing function with default settings.
    pub fn with_function(self, name: &str) -> Self {
        let config = FunctionConfiguration {
            name: name.to_string(),
            arn: self.function_arn(name),
            role_arn: self.role_arn(name),
            handler: "lambda_function.lambda_handler".to_string(),
            runtime: "python3.12".to_string(),
            description: name.to_string(),
            timeout: 3,
            memory_size: 128,
            environment: BTreeMap::new(),
            vpc: None,
        };
        self.state().functions.insert(
            name.to_string(),
            StoredFunction {
                config,
                code_uploads: 1,
            },
        );
        self
    }

    /// Seed a permission on an existing function's resource policy.
    pub fn with_permission(self, permission: InvokePermission) -> Self {
        self.state()
            .permissions
            .entry(permission.function_name.clone())
            .or_default()
            .push(permission);
        self
    }

    /// Seed a managed policy with the given `(document, is_default)` versions.
    pub fn with_policy(self, name: &str, versions: &[(&str, bool)]) -> Self {
        let arn = self.policy_arn(name);
        let stored = StoredPolicy {
            policy: ManagedPolicy {
                name: name.to_string(),
                arn: arn.clone(),
            },
            versions: versions
                .iter()
                .enumerate()
                .map(|(i, (document, is_default))| StoredVersion {
                    version_id: format!("v{}", i + 1),
                    document: (*document).to_string(),
                    is_default: *is_default,
                })
                .collect(),
            next_version: versions.len() as u32 + 1,
        };
        self.state().policies.insert(arn, stored);
        self
    }

    /// Make every future call to `op` fail with `message`.
    pub fn fail_on(&self, op: &str, message: &str) {
        self.state()
            .failures
            .insert(op.to_string(), message.to_string());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Number of times an operation was called.
    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == op).count()
    }

    /// Every recorded call, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// A role by name.
    pub fn role(&self, name: &str) -> Option<Role> {
        self.state().roles.get(name).map(|r| r.role.clone())
    }

    /// Trust policy a role was created with.
    pub fn trust_policy(&self, name: &str) -> Option<String> {
        self.state().roles.get(name).map(|r| r.trust_policy.clone())
    }

    /// Policy ARNs attached to a role.
    pub fn attached_policies(&self, role_name: &str) -> Vec<String> {
        self.state()
            .roles
            .get(role_name)
            .map(|r| r.attached.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Versions of a managed policy by name.
    pub fn policy_versions(&self, name: &str) -> Vec<StoredVersion> {
        let arn = self.policy_arn(name);
        self.state()
            .policies
            .get(&arn)
            .map(|p| p.versions.clone())
            .unwrap_or_default()
    }

    /// A function's configuration by name.
    pub fn function(&self, name: &str) -> Option<FunctionConfiguration> {
        self.state().functions.get(name).map(|f| f.config.clone())
    }

    /// How many times code was uploaded for a function (create counts once).
    pub fn code_uploads(&self, name: &str) -> u32 {
        self.state()
            .functions
            .get(name)
            .map_or(0, |f| f.code_uploads)
    }

    /// Resource-policy permissions on a function.
    pub fn permissions(&self, function_name: &str) -> Vec<InvokePermission> {
        self.state()
            .permissions
            .get(function_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Every bucket name.
    pub fn buckets(&self) -> Vec<String> {
        self.state().buckets.iter().cloned().collect()
    }

    /// Every topic name.
    pub fn topics(&self) -> Vec<String> {
        self.state().topics.keys().cloned().collect()
    }

    /// Every subscription.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state().subscriptions.clone()
    }

    /// Attributes of a queue by name.
    pub fn queue_attributes(&self, name: &str) -> Option<QueueAttributes> {
        self.state().queues.get(name).map(|q| q.attributes.clone())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn role_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:role/{name}", self.account)
    }

    fn policy_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:policy/{name}", self.account)
    }

    fn function_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{name}",
            self.region, self.account
        )
    }

    fn table_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:dynamodb:{}:{}:table/{name}",
            self.region, self.account
        )
    }
}

fn not_found(resource: &str) -> Error {
    Error::NotFound {
        resource: resource.to_string(),
    }
}

fn already_exists(resource: &str) -> Error {
    Error::AlreadyExists {
        resource: resource.to_string(),
    }
}

fn check_artifact(code: &Path) -> Result<()> {
    if code.is_file() {
        Ok(())
    } else {
        Err(Error::Artifact(code.to_path_buf()))
    }
}

impl Backend for MemoryBackend {
    fn region(&self) -> &str {
        &self.region
    }

    fn account_id(&self) -> Result<String> {
        self.state().record("account_id")?;
        Ok(self.account.clone())
    }

    fn get_role(&self, name: &str) -> Result<Role> {
        let mut state = self.state();
        state.record("get_role")?;
        state
            .roles
            .get(name)
            .map(|r| r.role.clone())
            .ok_or_else(|| not_found(name))
    }

    fn create_role(&self, name: &str, trust_policy: &str) -> Result<Role> {
        let arn = self.role_arn(name);
        let mut state = self.state();
        state.record("create_role")?;
        if state.roles.contains_key(name) {
            return Err(already_exists(name));
        }
        let role = Role {
            name: name.to_string(),
            arn,
        };
        state.roles.insert(
            name.to_string(),
            StoredRole {
                role: role.clone(),
                trust_policy: trust_policy.to_string(),
                attached: BTreeSet::new(),
            },
        );
        Ok(role)
    }

    fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        let mut state = self.state();
        state.record("attach_role_policy")?;
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| not_found(role_name))?;
        role.attached.insert(policy_arn.to_string());
        Ok(())
    }

    fn get_policy(&self, policy_arn: &str) -> Result<ManagedPolicy> {
        let mut state = self.state();
        state.record("get_policy")?;
        state
            .policies
            .get(policy_arn)
            .map(|p| p.policy.clone())
            .ok_or_else(|| not_found(policy_arn))
    }

    fn create_policy(&self, name: &str, document: &str) -> Result<ManagedPolicy> {
        let arn = self.policy_arn(name);
        let mut state = self.state();
        state.record("create_policy")?;
        if state.policies.contains_key(&arn) {
            return Err(already_exists(name));
        }
        let policy = ManagedPolicy {
            name: name.to_string(),
            arn: arn.clone(),
        };
        state.policies.insert(
            arn,
            StoredPolicy {
                policy: policy.clone(),
                versions: vec![StoredVersion {
                    version_id: "v1".to_string(),
                    document: document.to_string(),
                    is_default: true,
                }],
                next_version: 2,
            },
        );
        Ok(policy)
    }

    fn list_policy_versions(&self, policy_arn: &str) -> Result<Vec<PolicyVersion>> {
        let mut state = self.state();
        state.record("list_policy_versions")?;
        let policy = state
            .policies
            .get(policy_arn)
            .ok_or_else(|| not_found(policy_arn))?;
        Ok(policy
            .versions
            .iter()
            .map(|v| PolicyVersion {
                version_id: v.version_id.clone(),
                is_default: v.is_default,
            })
            .collect())
    }

    fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<()> {
        let mut state = self.state();
        state.record("delete_policy_version")?;
        let policy = state
            .policies
            .get_mut(policy_arn)
            .ok_or_else(|| not_found(policy_arn))?;
        let index = policy
            .versions
            .iter()
            .position(|v| v.version_id == version_id)
            .ok_or_else(|| not_found(version_id))?;
        if policy.versions[index].is_default {
            return Err(Error::Service {
                code: "DeleteConflict".to_string(),
                message: "Cannot delete the default version of a policy.".to_string(),
            });
        }
        policy.versions.remove(index);
        Ok(())
    }

    fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<PolicyVersion> {
        let mut state = self.state();
        state.record("create_policy_version")?;
        let policy = state
            .policies
            .get_mut(policy_arn)
            .ok_or_else(|| not_found(policy_arn))?;
        if policy.versions.len() >= MAX_POLICY_VERSIONS {
            return Err(Error::Quota {
                message: format!("A managed policy can have up to {MAX_POLICY_VERSIONS} versions."),
            });
        }
        if set_as_default {
            for version in &mut policy.versions {
                version.is_default = false;
            }
        }
        let version_id = format!("v{}", policy.next_version);
        policy.next_version += 1;
        policy.versions.push(StoredVersion {
            version_id: version_id.clone(),
            document: document.to_string(),
            is_default: set_as_default,
        });
        Ok(PolicyVersion {
            version_id,
            is_default: set_as_default,
        })
    }

    fn get_function(&self, name: &str) -> Result<FunctionConfiguration> {
        let mut state = self.state();
        state.record("get_function")?;
        state
            .functions
            .get(name)
            .map(|f| f.config.clone())
            .ok_or_else(|| not_found(name))
    }

    fn create_function(&self, request: &CreateFunction) -> Result<FunctionConfiguration> {
        let arn = self.function_arn(&request.name);
        let mut state = self.state();
        state.record("create_function")?;
        if state.functions.contains_key(&request.name) {
            return Err(already_exists(&request.name));
        }
        check_artifact(&request.code)?;
        let config = FunctionConfiguration {
            name: request.name.clone(),
            arn,
            role_arn: request.role_arn.clone(),
            handler: request.handler.clone(),
            runtime: request.runtime.clone(),
            description: request.description.clone(),
            timeout: request.timeout,
            memory_size: request.memory_size,
            environment: request.environment.clone(),
            vpc: request.vpc.clone(),
        };
        state.functions.insert(
            request.name.clone(),
            StoredFunction {
                config: config.clone(),
                code_uploads: 1,
            },
        );
        Ok(config)
    }

    fn update_function_code(&self, name: &str, code: &Path) -> Result<FunctionConfiguration> {
        let mut state = self.state();
        state.record("update_function_code")?;
        let function = state
            .functions
            .get_mut(name)
            .ok_or_else(|| not_found(name))?;
        check_artifact(code)?;
        function.code_uploads += 1;
        Ok(function.config.clone())
    }

    fn update_function_configuration(
        &self,
        request: &UpdateFunctionConfiguration,
    ) -> Result<FunctionConfiguration> {
        let mut state = self.state();
        state.record("update_function_configuration")?;
        let function = state
            .functions
            .get_mut(&request.name)
            .ok_or_else(|| not_found(&request.name))?;
        let config = &mut function.config;
        config.role_arn.clone_from(&request.role_arn);
        config.description.clone_from(&request.description);
        config.timeout = request.timeout;
        config.memory_size = request.memory_size;
        config.environment.clone_from(&request.environment);
        Ok(config.clone())
    }

    fn list_permissions(&self, function_name: &str) -> Result<Vec<String>> {
        let mut state = self.state();
        state.record("list_permissions")?;
        if !state.functions.contains_key(function_name) {
            return Err(not_found(function_name));
        }
        match state.permissions.get(function_name) {
            Some(permissions) if !permissions.is_empty() => Ok(permissions
                .iter()
                .map(|p| p.statement_id.clone())
                .collect()),
            // No statements means no resource policy at all
            _ => Err(not_found(function_name)),
        }
    }

    fn remove_permission(&self, function_name: &str, statement_id: &str) -> Result<()> {
        let mut state = self.state();
        state.record("remove_permission")?;
        let permissions = state
            .permissions
            .get_mut(function_name)
            .ok_or_else(|| not_found(function_name))?;
        let index = permissions
            .iter()
            .position(|p| p.statement_id == statement_id)
            .ok_or_else(|| not_found(statement_id))?;
        permissions.remove(index);
        Ok(())
    }

    fn add_permission(&self, permission: &InvokePermission) -> Result<()> {
        let mut state = self.state();
        state.record("add_permission")?;
        if !state.functions.contains_key(&permission.function_name) {
            return Err(not_found(&permission.function_name));
        }
        let permissions = state
            .permissions
            .entry(permission.function_name.clone())
            .or_default();
        if permissions
            .iter()
            .any(|p| p.statement_id == permission.statement_id)
        {
            return Err(already_exists(&permission.statement_id));
        }
        permissions.push(permission.clone());
        Ok(())
    }

    fn create_bucket(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.record("create_bucket")?;
        if !state.buckets.insert(name.to_string()) {
            return Err(already_exists(name));
        }
        Ok(())
    }

    fn create_topic(&self, name: &str) -> Result<String> {
        let arn = format!("arn:aws:sns:{}:{}:{name}", self.region, self.account);
        let mut state = self.state();
        state.record("create_topic")?;
        Ok(state
            .topics
            .entry(name.to_string())
            .or_insert(arn)
            .clone())
    }

    fn subscribe(&self, topic_arn: &str, protocol: &str, endpoint: &str) -> Result<String> {
        let mut state = self.state();
        state.record("subscribe")?;
        if !state.topics.values().any(|arn| arn == topic_arn) {
            return Err(not_found(topic_arn));
        }
        let subscription = Subscription {
            topic_arn: topic_arn.to_string(),
            protocol: protocol.to_string(),
            endpoint: endpoint.to_string(),
        };
        let index = match state.subscriptions.iter().position(|s| *s == subscription) {
            Some(index) => index,
            None => {
                state.subscriptions.push(subscription);
                state.subscriptions.len() - 1
            }
        };
        Ok(format!("{topic_arn}:{index}"))
    }

    fn describe_table(&self, name: &str) -> Result<String> {
        let mut state = self.state();
        state.record("describe_table")?;
        state
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> Result<String> {
        let url = format!(
            "https://sqs.{}.amazonaws.com/{}/{name}",
            self.region, self.account
        );
        let arn = format!("arn:aws:sqs:{}:{}:{name}", self.region, self.account);
        let mut state = self.state();
        state.record("create_queue")?;
        if let Some(existing) = state.queues.get(name) {
            // Same attributes is a no-op; different ones are a conflict
            let conflicting = attributes
                .iter()
                .any(|(k, v)| existing.attributes.get(k) != Some(v));
            if conflicting {
                return Err(already_exists(name));
            }
            return Ok(existing.url.clone());
        }
        state.queues.insert(
            name.to_string(),
            StoredQueue {
                url: url.clone(),
                arn,
                attributes: attributes.clone(),
            },
        );
        Ok(url)
    }

    fn get_queue_url(&self, name: &str) -> Result<String> {
        let mut state = self.state();
        state.record("get_queue_url")?;
        state
            .queues
            .get(name)
            .map(|q| q.url.clone())
            .ok_or_else(|| not_found(name))
    }

    fn set_queue_attributes(&self, queue_url: &str, attributes: &QueueAttributes) -> Result<()> {
        let mut state = self.state();
        state.record("set_queue_attributes")?;
        let queue = state.queue_by_url(queue_url)?;
        queue
            .attributes
            .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn get_queue_arn(&self, queue_url: &str) -> Result<String> {
        let mut state = self.state();
        state.record("get_queue_arn")?;
        Ok(state.queue_by_url(queue_url)?.arn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_role_twice_reports_duplicate() {
        let backend = MemoryBackend::new("ap-northeast-2");
        let role = backend.create_role("r", "{}").unwrap();
        assert_eq!(role.arn, "arn:aws:iam::123456789012:role/r");

        let err = backend.create_role("r", "{}").unwrap_err();
        assert!(err.is_ignorable());
        assert_eq!(backend.calls("create_role"), 2);
    }

    #[test]
    fn test_policy_version_limit() {
        let backend = MemoryBackend::new("ap-northeast-2").with_policy(
            "p",
            &[("{}", true), ("{}", false), ("{}", false), ("{}", false), ("{}", false)],
        );
        let arn = "arn:aws:iam::123456789012:policy/p";
        let err = backend.create_policy_version(arn, "{}", true).unwrap_err();
        assert!(matches!(err, Error::Quota { .. }));

        backend.delete_policy_version(arn, "v5").unwrap();
        let version = backend.create_policy_version(arn, "{}", true).unwrap();
        assert_eq!(version.version_id, "v6");
        let defaults: Vec<_> = backend
            .policy_versions("p")
            .into_iter()
            .filter(|v| v.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].version_id, "v6");
    }

    #[test]
    fn test_default_policy_version_cannot_be_deleted() {
        let backend = MemoryBackend::new("ap-northeast-2").with_policy("p", &[("{}", true)]);
        let err = backend
            .delete_policy_version("arn:aws:iam::123456789012:policy/p", "v1")
            .unwrap_err();
        assert!(matches!(err, Error::Service { ref code, .. } if code == "DeleteConflict"));
    }

    #[test]
    fn test_function_without_permissions_has_no_policy() {
        let backend = MemoryBackend::new("ap-northeast-2").with_function("f");
        assert!(backend.list_permissions("f").unwrap_err().is_not_found());
    }

    #[test]
    fn test_create_topic_is_idempotent() {
        let backend = MemoryBackend::new("ap-northeast-2");
        let first = backend.create_topic("t").unwrap();
        let second = backend.create_topic("t").unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.topics(), vec!["t"]);
    }

    #[test]
    fn test_create_queue_conflicting_attributes() {
        let backend = MemoryBackend::new("ap-northeast-2");
        let mut attributes = QueueAttributes::new();
        attributes.insert("DelaySeconds".to_string(), "30".to_string());
        backend.create_queue("q", &attributes).unwrap();

        assert!(backend.create_queue("q", &attributes).is_ok());
        attributes.insert("DelaySeconds".to_string(), "0".to_string());
        assert!(backend.create_queue("q", &attributes).unwrap_err().is_ignorable());
    }

    #[test]
    fn test_injected_failure() {
        let backend = MemoryBackend::new("ap-northeast-2");
        backend.fail_on("create_bucket", "boom");
        let err = backend.create_bucket("b").unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(backend.buckets().is_empty());
    }
}
