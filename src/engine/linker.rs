//! Link phase: provision declared resources and collect policy statements
//!
//! A unit's `.policy.json` maps a resource kind to the identifiers it uses.
//! Each kind is provisioned (or just resolved, for tables) and turned into
//! exactly one statement covering all of its identifiers. Kinds are
//! processed in name order, so the statement order is stable.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::DeployContext;
use crate::config::{BucketDeclaration, UnitConfig};
use crate::convention::UnitName;
use crate::error::DeployError;
use crate::policy::{self, PolicyStatement, ServicePrincipal};

/// Kinds of resource a unit can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    S3,
    Sns,
    Dynamodb,
    Sqs,
}

#[derive(Debug, Error)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(Self::S3),
            "sns" => Ok(Self::Sns),
            "dynamodb" => Ok(Self::Dynamodb),
            "sqs" => Ok(Self::Sqs),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Sns => "sns",
            Self::Dynamodb => "dynamodb",
            Self::Sqs => "sqs",
        }
    }

    fn statement(self, arns: Vec<String>) -> PolicyStatement {
        match self {
            Self::S3 => policy::s3_statement(arns),
            Self::Sns => policy::sns_statement(arns),
            Self::Dynamodb => policy::dynamodb_statement(arns),
            Self::Sqs => policy::sqs_statement(arns),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One kind's identifiers, parsed and validated.
enum Declaration {
    Buckets(Vec<BucketDeclaration>),
    /// Deployed names of the receiving units, which also name the topics
    Topics(Vec<String>),
    Tables(Vec<String>),
    Queues(Vec<String>),
}

impl Declaration {
    fn parse(unit: &UnitName, kind: ResourceKind, value: &Value) -> Result<Self> {
        Ok(match kind {
            ResourceKind::S3 => Self::Buckets(parse(unit, kind, value)?),
            ResourceKind::Sns => Self::Topics(
                parse::<String>(unit, kind, value)?
                    .iter()
                    .map(|topic| unit.sibling_name(topic))
                    .collect::<Result<_>>()?,
            ),
            ResourceKind::Dynamodb => Self::Tables(parse(unit, kind, value)?),
            ResourceKind::Sqs => Self::Queues(parse(unit, kind, value)?),
        })
    }
}

/// Provision every declared resource of the unit.
///
/// Every declaration is parsed and validated before anything is
/// provisioned, so an unsupported kind or a malformed entry fails the unit
/// without side effects.
pub fn link(
    ctx: &DeployContext,
    unit: &UnitName,
    config: &UnitConfig,
) -> Result<Vec<PolicyStatement>> {
    let declared = config
        .declarations
        .iter()
        .map(|(kind, value)| {
            let kind = kind
                .parse::<ResourceKind>()
                .map_err(|e| DeployError::UnsupportedKind {
                    unit: unit.name(),
                    kind: e.0,
                })?;
            Ok((kind, Declaration::parse(unit, kind, value)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut statements = Vec::new();
    for (kind, declaration) in declared {
        let arns = match declaration {
            Declaration::Buckets(buckets) => link_buckets(ctx, unit, buckets)?,
            Declaration::Topics(receivers) => link_topics(ctx, receivers)?,
            Declaration::Tables(tables) => link_tables(ctx, &tables)?,
            Declaration::Queues(queues) => link_queues(ctx, queues)?,
        };
        if arns.is_empty() {
            log::debug!("{unit}: no {kind} identifiers declared");
            continue;
        }
        log::debug!("{unit}: linked {kind} {arns:?}");
        statements.push(kind.statement(arns));
    }
    Ok(statements)
}

fn parse<T: DeserializeOwned>(
    unit: &UnitName,
    kind: ResourceKind,
    value: &Value,
) -> Result<Vec<T>, DeployError> {
    Vec::<T>::deserialize(value).map_err(|e| DeployError::InvalidDeclaration {
        unit: unit.name(),
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

fn link_buckets(
    ctx: &DeployContext,
    unit: &UnitName,
    buckets: Vec<BucketDeclaration>,
) -> Result<Vec<String>> {
    let function = unit.name();
    let mut reset = false;
    let mut arns = Vec::new();

    for bucket in buckets {
        let name = ctx.env.bucket_name(&bucket.name);
        match ctx.backend.create_bucket(&name) {
            Ok(()) => log::info!("Created bucket {name}"),
            Err(e) if e.is_ignorable() => log::debug!("Bucket {name} already exists"),
            Err(e) => return Err(e).with_context(|| format!("Failed to create bucket {name}")),
        }

        let arn = policy::bucket_arn(&name);
        if bucket.is_event_source {
            if !reset {
                reset_permissions(ctx, &function)?;
                reset = true;
            }
            grant(ctx, &policy::invoke_permission(&function, ServicePrincipal::S3, &arn))?;
            log::info!("{name} now triggers {function}");
        }
        let objects = format!("{arn}/*");
        arns.push(arn);
        arns.push(objects);
    }
    Ok(arns)
}

fn link_topics(ctx: &DeployContext, receivers: Vec<String>) -> Result<Vec<String>> {
    let mut arns = Vec::new();

    for receiver in receivers {
        let topic_arn = ctx
            .backend
            .create_topic(&receiver)
            .with_context(|| format!("Failed to create topic {receiver}"))?;

        match ctx.backend.get_function(&receiver) {
            Ok(function) => {
                ctx.backend
                    .subscribe(&topic_arn, "lambda", &function.arn)
                    .with_context(|| format!("Failed to subscribe {receiver} to its topic"))?;
                grant(
                    ctx,
                    &policy::invoke_permission(&receiver, ServicePrincipal::Sns, &topic_arn),
                )?;
                log::info!("{topic_arn} now triggers {receiver}");
            }
            Err(e) if e.is_not_found() => {
                log::warn!("{receiver} is not deployed yet; not subscribing it to {topic_arn}");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to look up function {receiver}"));
            }
        }
        arns.push(topic_arn);
    }
    Ok(arns)
}

fn link_tables(ctx: &DeployContext, tables: &[String]) -> Result<Vec<String>> {
    tables
        .iter()
        .map(|table| {
            ctx.backend
                .describe_table(table)
                .with_context(|| format!("Table {table} cannot be resolved"))
        })
        .collect()
}

fn link_queues(ctx: &DeployContext, queues: Vec<String>) -> Result<Vec<String>> {
    let mut arns = Vec::new();

    for queue in queues {
        let attributes = ctx.project.queue_attributes(&queue);
        let url = match ctx.backend.create_queue(&queue, &attributes) {
            Ok(url) => url,
            Err(e) if e.is_ignorable() => {
                let url = ctx
                    .backend
                    .get_queue_url(&queue)
                    .with_context(|| format!("Queue {queue} exists but cannot be resolved"))?;
                if !attributes.is_empty() {
                    ctx.backend
                        .set_queue_attributes(&url, &attributes)
                        .with_context(|| format!("Failed to update attributes of {queue}"))?;
                }
                url
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to create queue {queue}")),
        };

        let arn = ctx
            .backend
            .get_queue_arn(&url)
            .with_context(|| format!("Failed to resolve the ARN of {queue}"))?;
        arns.push(arn);
    }
    Ok(arns)
}

/// Drop every statement of the function's resource policy.
fn reset_permissions(ctx: &DeployContext, function: &str) -> Result<()> {
    let statement_ids = match ctx.backend.list_permissions(function) {
        Ok(ids) => ids,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to list permissions of {function}"));
        }
    };
    for statement_id in &statement_ids {
        ctx.backend
            .remove_permission(function, statement_id)
            .with_context(|| format!("Failed to remove permission {statement_id} from {function}"))?;
    }
    if !statement_ids.is_empty() {
        log::debug!("{function}: removed {} permission(s)", statement_ids.len());
    }
    Ok(())
}

fn grant(ctx: &DeployContext, permission: &cloudkit::InvokePermission) -> Result<()> {
    match ctx.backend.add_permission(permission) {
        Ok(()) => Ok(()),
        Err(e) if e.is_ignorable() => Ok(()),
        Err(e) => Err(e).with_context(|| {
            format!(
                "Failed to let {} invoke {}",
                permission.principal, permission.function_name
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, POLICY_FILE, RESOURCE_FILE};
    use crate::engine::testing::TestProject;
    use crate::policy::{S3_ACTIONS, SQS_ACTIONS};
    use cloudkit::{InvokePermission, MemoryBackend};

    const REGION: &str = "ap-northeast-2";

    fn load(project: &TestProject, unit: &UnitName) -> UnitConfig {
        UnitConfig::load(&project.layout.unit_dir(unit)).unwrap()
    }

    fn unrelated_permission(function: &str, n: u32) -> InvokePermission {
        InvokePermission {
            function_name: function.to_string(),
            statement_id: format!("old-{n}"),
            action: "lambda:InvokeFunction".to_string(),
            principal: "events.amazonaws.com".to_string(),
            source_arn: format!("arn:aws:events:{REGION}:123456789012:rule/r{n}"),
        }
    }

    #[test]
    fn test_resource_kind_from_str() {
        assert_eq!("s3".parse::<ResourceKind>().unwrap(), ResourceKind::S3);
        assert_eq!("dynamodb".parse::<ResourceKind>().unwrap(), ResourceKind::Dynamodb);
        assert_eq!(ResourceKind::Sqs.to_string(), "sqs");
        assert!("kinesis".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_checkout_charge_queue() {
        let mut project = TestProject::new();
        project.deploy_file(RESOURCE_FILE, r#"{"sqs": {"OrdersQueue": {"delay": "30"}}}"#);
        let unit = project.unit("checkout", "charge", &[(POLICY_FILE, r#"{"sqs": ["OrdersQueue"]}"#)]);
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);

        let statements = link(&ctx, &unit, &load(&project, &unit)).unwrap();

        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].action, SQS_ACTIONS);
        assert_eq!(
            statements[0].resource,
            vec!["arn:aws:sqs:ap-northeast-2:123456789012:OrdersQueue"]
        );
        assert_eq!(
            backend.queue_attributes("OrdersQueue").unwrap()["DelaySeconds"],
            "30"
        );
    }

    #[test]
    fn test_one_statement_per_kind() {
        let project = TestProject::new();
        let unit = project.unit(
            "checkout",
            "charge",
            &[(POLICY_FILE, r#"{"sqs": ["OrdersQueue"], "s3": [{"name": "receipts"}]}"#)],
        );
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);

        let statements = link(&ctx, &unit, &load(&project, &unit)).unwrap();

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].action, S3_ACTIONS);
        assert_eq!(
            statements[0].resource,
            vec!["arn:aws:s3:::receipts", "arn:aws:s3:::receipts/*"]
        );
        assert_eq!(statements[1].action, SQS_ACTIONS);
        assert_ne!(statements[0].sid, statements[1].sid);
        // Not an event source: the function policy is left alone
        assert_eq!(backend.calls("list_permissions"), 0);
    }

    #[test]
    fn test_event_source_resets_permissions() {
        let project = TestProject::new();
        let unit = project.unit(
            "uploads",
            "resize",
            &[(POLICY_FILE, r#"{"s3": [{"name": "photos", "is_event_source": true}]}"#)],
        );
        let function = unit.name();
        let backend = MemoryBackend::new(REGION)
            .with_function(&function)
            .with_permission(unrelated_permission(&function, 1))
            .with_permission(unrelated_permission(&function, 2))
            .with_permission(unrelated_permission(&function, 3));
        let ctx = project.context(&backend, Environment::Production);

        link(&ctx, &unit, &load(&project, &unit)).unwrap();

        let permissions = backend.permissions(&function);
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].principal, "s3.amazonaws.com");
        assert_eq!(permissions[0].source_arn, "arn:aws:s3:::photos");

        // Re-running converges on the same single grant
        link(&ctx, &unit, &load(&project, &unit)).unwrap();
        assert_eq!(backend.permissions(&function).len(), 1);
    }

    #[test]
    fn test_staging_prefixes_buckets() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[(POLICY_FILE, r#"{"s3": [{"name": "receipts"}]}"#)]);
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Staging);

        let statements = link(&ctx, &unit, &load(&project, &unit)).unwrap();

        assert_eq!(backend.buckets(), vec!["staging-receipts"]);
        assert_eq!(statements[0].resource[0], "arn:aws:s3:::staging-receipts");
    }

    #[test]
    fn test_existing_bucket_is_success() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[(POLICY_FILE, r#"{"s3": [{"name": "receipts"}]}"#)]);
        let backend = MemoryBackend::new(REGION);
        cloudkit::Backend::create_bucket(&backend, "receipts").unwrap();
        let ctx = project.context(&backend, Environment::Production);

        assert!(link(&ctx, &unit, &load(&project, &unit)).is_ok());
    }

    #[test]
    fn test_topic_subscribes_deployed_receiver() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[(POLICY_FILE, r#"{"sns": ["paid"]}"#)]);
        let backend = MemoryBackend::new(REGION).with_function("myproj-checkout-paid");
        let ctx = project.context(&backend, Environment::Production);

        let statements = link(&ctx, &unit, &load(&project, &unit)).unwrap();
        link(&ctx, &unit, &load(&project, &unit)).unwrap();

        let topic_arn = "arn:aws:sns:ap-northeast-2:123456789012:myproj-checkout-paid";
        assert_eq!(statements[0].resource, vec![topic_arn]);
        let subscriptions = backend.subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].topic_arn, topic_arn);
        assert_eq!(subscriptions[0].protocol, "lambda");

        let permissions = backend.permissions("myproj-checkout-paid");
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].principal, "sns.amazonaws.com");
        assert_eq!(permissions[0].source_arn, topic_arn);
    }

    #[test]
    fn test_topic_without_receiver_is_skipped() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[(POLICY_FILE, r#"{"sns": ["paid"]}"#)]);
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);

        let statements = link(&ctx, &unit, &load(&project, &unit)).unwrap();

        assert_eq!(statements.len(), 1);
        assert_eq!(backend.topics(), vec!["myproj-checkout-paid"]);
        assert!(backend.subscriptions().is_empty());
        assert_eq!(backend.calls("add_permission"), 0);
    }

    #[test]
    fn test_missing_table_fails() {
        let project = TestProject::new();
        let unit = project.unit("orders", "log", &[(POLICY_FILE, r#"{"dynamodb": ["audit"]}"#)]);

        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);
        assert!(link(&ctx, &unit, &load(&project, &unit)).is_err());

        let backend = MemoryBackend::new(REGION).with_table("audit");
        let ctx = project.context(&backend, Environment::Production);
        let statements = link(&ctx, &unit, &load(&project, &unit)).unwrap();
        assert_eq!(
            statements[0].resource,
            vec!["arn:aws:dynamodb:ap-northeast-2:123456789012:table/audit"]
        );
        assert!(statements[0].action.contains(&"dynamodb:GetItem".to_string()));
    }

    #[test]
    fn test_existing_queue_gets_new_delay() {
        let mut project = TestProject::new();
        project.deploy_file(RESOURCE_FILE, r#"{"sqs": {"OrdersQueue": {"delay": 45}}}"#);
        let unit = project.unit("checkout", "charge", &[(POLICY_FILE, r#"{"sqs": ["OrdersQueue"]}"#)]);
        let backend = MemoryBackend::new(REGION);
        let mut old = cloudkit::QueueAttributes::new();
        old.insert("DelaySeconds".to_string(), "0".to_string());
        cloudkit::Backend::create_queue(&backend, "OrdersQueue", &old).unwrap();
        let ctx = project.context(&backend, Environment::Production);

        link(&ctx, &unit, &load(&project, &unit)).unwrap();

        assert_eq!(backend.calls("set_queue_attributes"), 1);
        assert_eq!(
            backend.queue_attributes("OrdersQueue").unwrap()["DelaySeconds"],
            "45"
        );
    }

    #[test]
    fn test_unsupported_kind_fails_before_provisioning() {
        let project = TestProject::new();
        let unit = project.unit(
            "checkout",
            "charge",
            &[(POLICY_FILE, r#"{"sqs": ["OrdersQueue"], "kinesis": ["clicks"]}"#)],
        );
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);

        let err = link(&ctx, &unit, &load(&project, &unit)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::UnsupportedKind { kind, .. }) if kind == "kinesis"
        ));
        assert!(backend.call_log().is_empty());
    }

    #[test]
    fn test_malformed_declaration() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[(POLICY_FILE, r#"{"s3": ["receipts"]}"#)]);
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);

        let err = link(&ctx, &unit, &load(&project, &unit)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::InvalidDeclaration { .. })
        ));
    }

    #[test]
    fn test_malformed_entry_fails_before_provisioning() {
        let project = TestProject::new();
        let unit = project.unit(
            "checkout",
            "charge",
            &[(POLICY_FILE, r#"{"s3": [{"name": "receipts"}], "sqs": [{"name": "OrdersQueue"}]}"#)],
        );
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);

        let err = link(&ctx, &unit, &load(&project, &unit)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::InvalidDeclaration { kind, .. }) if kind == "sqs"
        ));
        assert!(backend.call_log().is_empty());
        assert!(backend.buckets().is_empty());
    }

    #[test]
    fn test_invalid_topic_name_fails_before_provisioning() {
        let project = TestProject::new();
        let unit = project.unit(
            "checkout",
            "charge",
            &[(POLICY_FILE, r#"{"s3": [{"name": "receipts"}], "sns": ["on-paid"]}"#)],
        );
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);

        let err = link(&ctx, &unit, &load(&project, &unit)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::InvalidSegment { .. })
        ));
        assert!(backend.call_log().is_empty());
    }

    #[test]
    fn test_empty_kind_produces_no_statement() {
        let project = TestProject::new();
        let unit = project.unit("checkout", "charge", &[(POLICY_FILE, r#"{"sqs": []}"#)]);
        let backend = MemoryBackend::new(REGION);
        let ctx = project.context(&backend, Environment::Production);

        assert!(link(&ctx, &unit, &load(&project, &unit)).unwrap().is_empty());
    }
}
