//! Access policy documents and invoke permissions
//!
//! Pure builders only: nothing here talks to the provider. One statement
//! builder per linked resource kind, each with a fixed action set, plus the
//! composite document, the role trust document and the resource-based
//! invoke permissions used for event-source wiring.

use cloudkit::InvokePermission;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Policy language version used in every document.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Managed policy granting network-interface management to functions in a VPC.
pub const VPC_ACCESS_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaVPCAccessExecutionRole";

pub const S3_ACTIONS: &[&str] = &["s3:ListBucket", "s3:GetObject"];
pub const SNS_ACTIONS: &[&str] = &["sns:CreateTopic", "sns:Publish"];
pub const DYNAMODB_ACTIONS: &[&str] = &[
    "dynamodb:GetItem",
    "dynamodb:DeleteItem",
    "dynamodb:Query",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
];
pub const SQS_ACTIONS: &[&str] = &[
    "sqs:GetQueueAttributes",
    "sqs:GetQueueUrl",
    "sqs:SendMessage",
    "sqs:DeleteMessage",
    "sqs:ReceiveMessage",
];

const INVOKE_ACTION: &str = "lambda:InvokeFunction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
}

/// One statement of an identity policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub sid: String,
    pub effect: Effect,
    pub action: Vec<String>,
    pub resource: Vec<String>,
}

/// A complete identity policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: statements,
        }
    }


    pub fn to_json(&self) -> String {
        // Only strings and a unit enum inside; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Service allowed to invoke a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePrincipal {
    S3,
    Sns,
}

impl ServicePrincipal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServicePrincipal::S3 => "s3.amazonaws.com",
            ServicePrincipal::Sns => "sns.amazonaws.com",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            ServicePrincipal::S3 => "s3",
            ServicePrincipal::Sns => "sns",
        }
    }
}

/// A fresh, unique statement id (32 hex characters).
pub fn statement_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn statement(actions: &[&str], resources: Vec<String>) -> PolicyStatement {
    PolicyStatement {
        sid: statement_id(),
        effect: Effect::Allow,
        action: actions.iter().map(|a| (*a).to_string()).collect(),
        resource: resources,
    }
}

/// List/get access to buckets and the objects inside them.
pub fn s3_statement(bucket_arns: Vec<String>) -> PolicyStatement {
    statement(S3_ACTIONS, bucket_arns)
}

/// Create/publish access to topics.
pub fn sns_statement(topic_arns: Vec<String>) -> PolicyStatement {
    statement(SNS_ACTIONS, topic_arns)
}

/// Item read/write access to tables.
pub fn dynamodb_statement(table_arns: Vec<String>) -> PolicyStatement {
    statement(DYNAMODB_ACTIONS, table_arns)
}

/// Send/receive/delete access to queues.
pub fn sqs_statement(queue_arns: Vec<String>) -> PolicyStatement {
    statement(SQS_ACTIONS, queue_arns)
}

/// Trust policy letting the Lambda service assume a role.
pub fn assume_role_document() -> String {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "lambda.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }],
    })
    .to_string()
}

/// Permission for `principal` to invoke `function_name`, scoped to `source_arn`.
///
/// The statement id is derived from the source so a repeated grant collides
/// with the existing one instead of stacking up duplicates.
pub fn invoke_permission(
    function_name: &str,
    principal: ServicePrincipal,
    source_arn: &str,
) -> InvokePermission {
    let digest = blake3::hash(source_arn.as_bytes());
    InvokePermission {
        function_name: function_name.to_string(),
        statement_id: format!("{}-{}", principal.prefix(), &digest.to_hex().as_str()[..16]),
        action: INVOKE_ACTION.to_string(),
        principal: principal.as_str().to_string(),
        source_arn: source_arn.to_string(),
    }
}

pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

pub fn managed_policy_arn(account: &str, name: &str) -> String {
    format!("arn:aws:iam::{account}:policy/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_ids_are_unique_hex() {
        let a = statement_id();
        let b = statement_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sqs_statement() {
        let arn = "arn:aws:sqs:ap-northeast-2:123456789012:OrdersQueue".to_string();
        let statement = sqs_statement(vec![arn.clone()]);
        assert_eq!(statement.effect, Effect::Allow);
        assert_eq!(statement.resource, vec![arn]);
        assert_eq!(
            statement.action,
            vec![
                "sqs:GetQueueAttributes",
                "sqs:GetQueueUrl",
                "sqs:SendMessage",
                "sqs:DeleteMessage",
                "sqs:ReceiveMessage",
            ]
        );
    }

    #[test]
    fn test_document_serializes_with_provider_field_names() {
        let document = PolicyDocument::new(vec![s3_statement(vec![
            "arn:aws:s3:::assets".to_string(),
            "arn:aws:s3:::assets/*".to_string(),
        ])]);
        let json: serde_json::Value = serde_json::from_str(&document.to_json()).unwrap();

        assert_eq!(json["Version"], "2012-10-17");
        let statement = &json["Statement"][0];
        assert_eq!(statement["Effect"], "Allow");
        assert_eq!(statement["Action"][0], "s3:ListBucket");
        assert_eq!(statement["Resource"][1], "arn:aws:s3:::assets/*");
        assert!(statement["Sid"].is_string());
    }

    #[test]
    fn test_document_parses_back() {
        let document = PolicyDocument::new(vec![sns_statement(vec!["arn:t".to_string()])]);
        let parsed: PolicyDocument = serde_json::from_str(&document.to_json()).unwrap();
        assert_eq!(parsed, document);
    }

    #[test]
    fn test_assume_role_document() {
        let json: serde_json::Value = serde_json::from_str(&assume_role_document()).unwrap();
        assert_eq!(
            json["Statement"][0]["Principal"]["Service"],
            "lambda.amazonaws.com"
        );
        assert_eq!(json["Statement"][0]["Action"], "sts:AssumeRole");
    }

    #[test]
    fn test_invoke_permission_is_stable_per_source() {
        let first = invoke_permission("f", ServicePrincipal::S3, "arn:aws:s3:::assets");
        let second = invoke_permission("f", ServicePrincipal::S3, "arn:aws:s3:::assets");
        let other = invoke_permission("f", ServicePrincipal::S3, "arn:aws:s3:::uploads");

        assert_eq!(first.statement_id, second.statement_id);
        assert_ne!(first.statement_id, other.statement_id);
        assert!(first.statement_id.starts_with("s3-"));
        assert_eq!(first.principal, "s3.amazonaws.com");
        assert_eq!(first.action, "lambda:InvokeFunction");
    }
}
