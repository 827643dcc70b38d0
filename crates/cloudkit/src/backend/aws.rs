//! Real provider backend using `aws` CLI commands.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{
    CreateFunction, FunctionConfiguration, InvokePermission, ManagedPolicy, PolicyVersion,
    QueueAttributes, Role, UpdateFunctionConfiguration, VpcConfig,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Waiter for a newly created function to become active.
const FUNCTION_ACTIVE: &str = "function-active-v2";

/// Waiter for a code or configuration update to finish.
const FUNCTION_UPDATED: &str = "function-updated-v2";

/// Backend that executes real `aws` commands.
pub struct AwsCliBackend {
    /// Path to the aws executable
    aws_path: PathBuf,
    /// Region passed to every call
    region: String,
    /// Named profile, if any
    profile: Option<String>,
}

impl AwsCliBackend {
    /// Create a new backend bound to a region.
    ///
    /// Returns an error if the `aws` CLI is not installed.
    pub fn new(region: impl Into<String>) -> Result<Self> {
        let aws_path = which::which("aws").map_err(|_| Error::CliNotFound)?;
        Ok(Self {
            aws_path,
            region: region.into(),
            profile: None,
        })
    }

    /// Use a named profile from the CLI configuration.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Run an aws command and return output.
    fn run_aws(&self, args: &[&str]) -> Result<std::process::Output> {
        let mut command = Command::new(&self.aws_path);
        command
            .args(args)
            .args(["--region", self.region.as_str(), "--output", "json"]);
        if let Some(profile) = &self.profile {
            command.args(["--profile", profile.as_str()]);
        }

        log::debug!("aws {}", args.iter().take(2).copied().collect::<Vec<_>>().join(" "));

        command.output().map_err(|e| Error::CommandFailed {
            message: format!("failed to execute aws: {e}"),
            stderr: String::new(),
        })
    }

    /// Run an aws command, check for success and parse its JSON output.
    ///
    /// Commands with no output yield `Value::Null`.
    fn run_json(&self, args: &[&str], resource: Option<&str>) -> Result<Value> {
        let output = self.run_aws(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_aws_output(&stderr, resource));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Block until the function has settled.
    ///
    /// Lambda rejects further changes to a function while a previous
    /// update is still in progress.
    fn wait_for_function(&self, waiter: &str, name: &str) -> Result<()> {
        log::debug!("Waiting for {name} ({waiter})");
        self.run_json(&wait_args(waiter, name), Some(name))?;
        Ok(())
    }
}

impl Backend for AwsCliBackend {
    fn region(&self) -> &str {
        &self.region
    }

    fn account_id(&self) -> Result<String> {
        let json = self.run_json(&["sts", "get-caller-identity"], None)?;
        string_at(&json, "/Account")
    }

    fn get_role(&self, name: &str) -> Result<Role> {
        let json = self.run_json(&["iam", "get-role", "--role-name", name], Some(name))?;
        parse_role(&json)
    }

    fn create_role(&self, name: &str, trust_policy: &str) -> Result<Role> {
        let json = self.run_json(
            &[
                "iam",
                "create-role",
                "--role-name",
                name,
                "--assume-role-policy-document",
                trust_policy,
            ],
            Some(name),
        )?;
        parse_role(&json)
    }

    fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.run_json(
            &[
                "iam",
                "attach-role-policy",
                "--role-name",
                role_name,
                "--policy-arn",
                policy_arn,
            ],
            Some(policy_arn),
        )?;
        Ok(())
    }

    fn get_policy(&self, policy_arn: &str) -> Result<ManagedPolicy> {
        let json = self.run_json(
            &["iam", "get-policy", "--policy-arn", policy_arn],
            Some(policy_arn),
        )?;
        parse_policy(&json)
    }

    fn create_policy(&self, name: &str, document: &str) -> Result<ManagedPolicy> {
        let json = self.run_json(
            &[
                "iam",
                "create-policy",
                "--policy-name",
                name,
                "--policy-document",
                document,
            ],
            Some(name),
        )?;
        parse_policy(&json)
    }

    fn list_policy_versions(&self, policy_arn: &str) -> Result<Vec<PolicyVersion>> {
        let json = self.run_json(
            &["iam", "list-policy-versions", "--policy-arn", policy_arn],
            Some(policy_arn),
        )?;
        json.pointer("/Versions")
            .and_then(Value::as_array)
            .ok_or_else(|| missing("/Versions"))?
            .iter()
            .map(parse_policy_version)
            .collect()
    }

    fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<()> {
        self.run_json(
            &[
                "iam",
                "delete-policy-version",
                "--policy-arn",
                policy_arn,
                "--version-id",
                version_id,
            ],
            Some(policy_arn),
        )?;
        Ok(())
    }

    fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<PolicyVersion> {
        let mut args = vec![
            "iam",
            "create-policy-version",
            "--policy-arn",
            policy_arn,
            "--policy-document",
            document,
        ];
        if set_as_default {
            args.push("--set-as-default");
        }
        let json = self.run_json(&args, Some(policy_arn))?;
        let version = json
            .pointer("/PolicyVersion")
            .ok_or_else(|| missing("/PolicyVersion"))?;
        parse_policy_version(version)
    }

    fn get_function(&self, name: &str) -> Result<FunctionConfiguration> {
        let json = self.run_json(
            &["lambda", "get-function", "--function-name", name],
            Some(name),
        )?;
        let config = json
            .pointer("/Configuration")
            .ok_or_else(|| missing("/Configuration"))?;
        parse_function(config)
    }

    fn create_function(&self, request: &CreateFunction) -> Result<FunctionConfiguration> {
        let timeout = request.timeout.to_string();
        let memory = request.memory_size.to_string();
        let environment = json!({ "Variables": request.environment }).to_string();
        let zip_file = fileb(&request.code)?;

        let mut args = vec![
            "lambda",
            "create-function",
            "--function-name",
            request.name.as_str(),
            "--runtime",
            request.runtime.as_str(),
            "--role",
            request.role_arn.as_str(),
            "--handler",
            request.handler.as_str(),
            "--description",
            request.description.as_str(),
            "--timeout",
            timeout.as_str(),
            "--memory-size",
            memory.as_str(),
            "--environment",
            environment.as_str(),
            "--zip-file",
            zip_file.as_str(),
        ];

        let vpc = request.vpc.as_ref().map(|vpc| {
            json!({
                "SubnetIds": vpc.subnet_ids,
                "SecurityGroupIds": vpc.security_group_ids,
            })
            .to_string()
        });
        if let Some(vpc) = &vpc {
            args.extend(["--vpc-config", vpc.as_str()]);
        }

        let json = self.run_json(&args, Some(&request.name))?;
        self.wait_for_function(FUNCTION_ACTIVE, &request.name)?;
        parse_function(&json)
    }

    fn update_function_code(&self, name: &str, code: &Path) -> Result<FunctionConfiguration> {
        let zip_file = fileb(code)?;
        let json = self.run_json(
            &[
                "lambda",
                "update-function-code",
                "--function-name",
                name,
                "--zip-file",
                &zip_file,
            ],
            Some(name),
        )?;
        self.wait_for_function(FUNCTION_UPDATED, name)?;
        parse_function(&json)
    }

    fn update_function_configuration(
        &self,
        request: &UpdateFunctionConfiguration,
    ) -> Result<FunctionConfiguration> {
        let timeout = request.timeout.to_string();
        let memory = request.memory_size.to_string();
        let environment = json!({ "Variables": request.environment }).to_string();

        let json = self.run_json(
            &[
                "lambda",
                "update-function-configuration",
                "--function-name",
                &request.name,
                "--role",
                &request.role_arn,
                "--description",
                &request.description,
                "--timeout",
                &timeout,
                "--memory-size",
                &memory,
                "--environment",
                &environment,
            ],
            Some(&request.name),
        )?;
        self.wait_for_function(FUNCTION_UPDATED, &request.name)?;
        parse_function(&json)
    }

    fn list_permissions(&self, function_name: &str) -> Result<Vec<String>> {
        let json = self.run_json(
            &["lambda", "get-policy", "--function-name", function_name],
            Some(function_name),
        )?;
        // The resource policy comes back as a JSON document inside a string.
        let policy: Value = serde_json::from_str(&string_at(&json, "/Policy")?)?;
        Ok(policy
            .pointer("/Statement")
            .and_then(Value::as_array)
            .map(|statements| {
                statements
                    .iter()
                    .filter_map(|s| s["Sid"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn remove_permission(&self, function_name: &str, statement_id: &str) -> Result<()> {
        self.run_json(
            &[
                "lambda",
                "remove-permission",
                "--function-name",
                function_name,
                "--statement-id",
                statement_id,
            ],
            Some(statement_id),
        )?;
        Ok(())
    }

    fn add_permission(&self, permission: &InvokePermission) -> Result<()> {
        self.run_json(
            &[
                "lambda",
                "add-permission",
                "--function-name",
                &permission.function_name,
                "--statement-id",
                &permission.statement_id,
                "--action",
                &permission.action,
                "--principal",
                &permission.principal,
                "--source-arn",
                &permission.source_arn,
            ],
            Some(&permission.statement_id),
        )?;
        Ok(())
    }

    fn create_bucket(&self, name: &str) -> Result<()> {
        let constraint = format!("LocationConstraint={}", self.region);
        let mut args = vec!["s3api", "create-bucket", "--bucket", name];
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            args.extend(["--create-bucket-configuration", constraint.as_str()]);
        }
        self.run_json(&args, Some(name))?;
        Ok(())
    }

    fn create_topic(&self, name: &str) -> Result<String> {
        let json = self.run_json(&["sns", "create-topic", "--name", name], Some(name))?;
        string_at(&json, "/TopicArn")
    }

    fn subscribe(&self, topic_arn: &str, protocol: &str, endpoint: &str) -> Result<String> {
        let json = self.run_json(
            &[
                "sns",
                "subscribe",
                "--topic-arn",
                topic_arn,
                "--protocol",
                protocol,
                "--notification-endpoint",
                endpoint,
            ],
            Some(topic_arn),
        )?;
        string_at(&json, "/SubscriptionArn")
    }

    fn describe_table(&self, name: &str) -> Result<String> {
        let json = self.run_json(
            &["dynamodb", "describe-table", "--table-name", name],
            Some(name),
        )?;
        string_at(&json, "/Table/TableArn")
    }

    fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> Result<String> {
        let encoded = serde_json::to_string(attributes)?;
        let mut args = vec!["sqs", "create-queue", "--queue-name", name];
        if !attributes.is_empty() {
            args.extend(["--attributes", encoded.as_str()]);
        }
        let json = self.run_json(&args, Some(name))?;
        string_at(&json, "/QueueUrl")
    }

    fn get_queue_url(&self, name: &str) -> Result<String> {
        let json = self.run_json(&["sqs", "get-queue-url", "--queue-name", name], Some(name))?;
        string_at(&json, "/QueueUrl")
    }

    fn set_queue_attributes(&self, queue_url: &str, attributes: &QueueAttributes) -> Result<()> {
        let encoded = serde_json::to_string(attributes)?;
        self.run_json(
            &[
                "sqs",
                "set-queue-attributes",
                "--queue-url",
                queue_url,
                "--attributes",
                &encoded,
            ],
            Some(queue_url),
        )?;
        Ok(())
    }

    fn get_queue_arn(&self, queue_url: &str) -> Result<String> {
        let json = self.run_json(
            &[
                "sqs",
                "get-queue-attributes",
                "--queue-url",
                queue_url,
                "--attribute-names",
                "QueueArn",
            ],
            Some(queue_url),
        )?;
        string_at(&json, "/Attributes/QueueArn")
    }
}

// ============================================================================
// Response parsing
// ============================================================================

fn missing(field: &str) -> Error {
    Error::MissingField {
        field: field.to_string(),
    }
}

fn string_at(json: &Value, pointer: &str) -> Result<String> {
    json.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(pointer))
}

fn fileb(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(Error::Artifact(path.to_path_buf()));
    }
    Ok(format!("fileb://{}", path.display()))
}

fn parse_role(json: &Value) -> Result<Role> {
    Ok(Role {
        name: string_at(json, "/Role/RoleName")?,
        arn: string_at(json, "/Role/Arn")?,
    })
}

fn parse_policy(json: &Value) -> Result<ManagedPolicy> {
    Ok(ManagedPolicy {
        name: string_at(json, "/Policy/PolicyName")?,
        arn: string_at(json, "/Policy/Arn")?,
    })
}

fn parse_policy_version(json: &Value) -> Result<PolicyVersion> {
    Ok(PolicyVersion {
        version_id: string_at(json, "/VersionId")?,
        is_default: json["IsDefaultVersion"].as_bool().unwrap_or(false),
    })
}

fn parse_function(json: &Value) -> Result<FunctionConfiguration> {
    let environment: BTreeMap<String, String> = json
        .pointer("/Environment/Variables")
        .and_then(Value::as_object)
        .map(|vars| {
            vars.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let strings = |pointer: &str| -> Vec<String> {
        json.pointer(pointer)
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    let vpc = VpcConfig {
        subnet_ids: strings("/VpcConfig/SubnetIds"),
        security_group_ids: strings("/VpcConfig/SecurityGroupIds"),
    };

    Ok(FunctionConfiguration {
        name: string_at(json, "/FunctionName")?,
        arn: string_at(json, "/FunctionArn")?,
        role_arn: string_at(json, "/Role")?,
        handler: json["Handler"].as_str().unwrap_or_default().to_string(),
        runtime: json["Runtime"].as_str().unwrap_or_default().to_string(),
        description: json["Description"].as_str().unwrap_or_default().to_string(),
        timeout: json["Timeout"].as_u64().unwrap_or(3) as u32,
        memory_size: json["MemorySize"].as_u64().unwrap_or(128) as u32,
        environment,
        vpc: (!vpc.is_empty()).then_some(vpc),
    })
}

fn wait_args<'a>(waiter: &'a str, name: &'a str) -> [&'a str; 5] {
    ["lambda", "wait", waiter, "--function-name", name]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_from_get_function_configuration() {
        let json: Value = serde_json::from_str(
            r#"{
                "FunctionName": "myproj-checkout-charge",
                "FunctionArn": "arn:aws:lambda:ap-northeast-2:123456789012:function:myproj-checkout-charge",
                "Runtime": "python3.12",
                "Role": "arn:aws:iam::123456789012:role/myproj-checkout-charge",
                "Handler": "lambda_function.lambda_handler",
                "Description": "myproj-checkout-charge",
                "Timeout": 90,
                "MemorySize": 256,
                "Environment": { "Variables": { "STAGE": "release" } },
                "VpcConfig": { "SubnetIds": [], "SecurityGroupIds": [], "VpcId": "" }
            }"#,
        )
        .unwrap();

        let config = parse_function(&json).unwrap();
        assert_eq!(config.name, "myproj-checkout-charge");
        assert_eq!(config.timeout, 90);
        assert_eq!(config.memory_size, 256);
        assert_eq!(config.environment["STAGE"], "release");
        assert!(config.vpc.is_none());
    }

    #[test]
    fn test_parse_function_with_vpc() {
        let json: Value = serde_json::from_str(
            r#"{
                "FunctionName": "f",
                "FunctionArn": "arn:f",
                "Role": "arn:r",
                "VpcConfig": { "SubnetIds": ["subnet-1"], "SecurityGroupIds": ["sg-1"] }
            }"#,
        )
        .unwrap();

        let config = parse_function(&json).unwrap();
        let vpc = config.vpc.unwrap();
        assert_eq!(vpc.subnet_ids, vec!["subnet-1"]);
        assert_eq!(vpc.security_group_ids, vec!["sg-1"]);
        assert_eq!(config.timeout, 3);
        assert_eq!(config.memory_size, 128);
    }

    #[test]
    fn test_parse_role_missing_field() {
        let json: Value = serde_json::from_str(r#"{ "Role": { "RoleName": "r" } }"#).unwrap();
        let err = parse_role(&json).unwrap_err();
        assert!(matches!(err, Error::MissingField { ref field } if field == "/Role/Arn"));
    }

    #[test]
    fn test_wait_args() {
        assert_eq!(
            wait_args(FUNCTION_UPDATED, "myproj-checkout-charge"),
            ["lambda", "wait", "function-updated-v2", "--function-name", "myproj-checkout-charge"]
        );
        assert_eq!(wait_args(FUNCTION_ACTIVE, "f")[2], "function-active-v2");
    }

    #[test]
    fn test_fileb_requires_existing_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let zip = dir.path().join("app.zip");
        assert!(matches!(fileb(&zip), Err(Error::Artifact(_))));

        std::fs::write(&zip, b"PK").unwrap();
        assert!(fileb(&zip).unwrap().starts_with("fileb://"));
    }
}
