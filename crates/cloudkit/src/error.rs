//! Error types for provider operations.
//!
//! Errors are categorized so callers can tell an expected duplicate
//! (already exists) or a best-effort miss (not found) apart from a real
//! provider failure. Each error keeps the provider's own message.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The resource already exists
    AlreadyExists,
    /// The resource does not exist
    NotFound,
    /// Access denied by the provider
    Permission,
    /// A service quota or rate limit was hit
    Quota,
    /// Network-related failure talking to the provider
    Network,
    /// No usable credentials were found
    Credentials,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error can be safely treated as success for create-style calls.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }
}

/// Errors that can occur during provider operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The resource already exists
    #[error("already exists: {resource}")]
    AlreadyExists {
        /// Name or ARN of the resource
        resource: String,
    },

    /// The resource does not exist
    #[error("not found: {resource}")]
    NotFound {
        /// Name or ARN of the resource
        resource: String,
    },

    /// Access denied
    #[error("permission denied: {message}")]
    Permission {
        /// Provider message
        message: String,
    },

    /// Quota or throttling
    #[error("quota exceeded: {message}")]
    Quota {
        /// Provider message
        message: String,
    },

    /// Network-related error (connection, timeout, DNS, etc.)
    #[error("network error: {message}")]
    Network {
        /// Provider message
        message: String,
    },

    /// No credentials available to the provider client
    #[error("credentials error: {message}")]
    Credentials {
        /// Provider message
        message: String,
    },

    /// A provider error code with no specific category
    #[error("{code}: {message}")]
    Service {
        /// Provider error code (e.g. `ValidationException`)
        code: String,
        /// Provider message
        message: String,
    },

    /// The `aws` executable could not be found
    #[error("aws CLI not found. Install it from https://aws.amazon.com/cli/")]
    CliNotFound,

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// A response did not contain a field we rely on
    #[error("unexpected response: missing {field}")]
    MissingField {
        /// Dotted path of the missing field
        field: String,
    },

    /// Code artifact could not be read
    #[error("artifact not readable: {}", .0.display())]
    Artifact(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::Quota { .. } => ErrorCategory::Quota,
            Error::Network { .. } => ErrorCategory::Network,
            Error::Credentials { .. } | Error::CliNotFound => ErrorCategory::Credentials,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error can be safely ignored by a create-style call.
    pub fn is_ignorable(&self) -> bool {
        self.category().is_ignorable()
    }

    /// Whether the error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Create an error from `aws` CLI output.
    ///
    /// The CLI reports service faults as
    /// `An error occurred (Code) when calling the Op operation: message`;
    /// the code decides the category. Client-side faults (no credentials,
    /// connection failures) carry no code and are matched on the text.
    pub fn from_aws_output(stderr: &str, resource: Option<&str>) -> Self {
        let stderr = stderr.trim();
        let resource = resource.unwrap_or("unknown").to_string();

        if let Some(code) = error_code(stderr) {
            let message = stderr
                .split_once("operation: ")
                .map_or(stderr, |(_, m)| m)
                .to_string();

            return match code {
                // Lambda also reports an update still in progress as a conflict
                "ResourceConflictException"
                    if !message.to_lowercase().contains("already exist") =>
                {
                    Error::Service {
                        code: code.to_string(),
                        message,
                    }
                }
                "EntityAlreadyExists"
                | "BucketAlreadyOwnedByYou"
                | "ResourceConflictException"
                | "QueueAlreadyExists"
                | "QueueNameExists" => Error::AlreadyExists { resource },
                "NoSuchEntity"
                | "ResourceNotFoundException"
                | "NotFound"
                | "NoSuchBucket"
                | "AWS.SimpleQueueService.NonExistentQueue"
                | "NonExistentQueue" => Error::NotFound { resource },
                "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" => {
                    Error::Permission { message }
                }
                "LimitExceeded"
                | "LimitExceededException"
                | "TooManyRequestsException"
                | "Throttling"
                | "ThrottlingException" => Error::Quota { message },
                "ExpiredToken" | "ExpiredTokenException" | "InvalidClientTokenId" => {
                    Error::Credentials { message }
                }
                _ => Error::Service {
                    code: code.to_string(),
                    message,
                },
            };
        }

        let lower = stderr.to_lowercase();

        if lower.contains("unable to locate credentials")
            || lower.contains("token has expired")
            || lower.contains("the config profile")
        {
            return Error::Credentials {
                message: stderr.to_string(),
            };
        }

        if lower.contains("could not connect")
            || lower.contains("connection was closed")
            || lower.contains("read timeout")
            || lower.contains("connect timeout")
            || lower.contains("name or service not known")
        {
            return Error::Network {
                message: stderr.to_string(),
            };
        }

        Error::CommandFailed {
            message: format!("aws command failed for {resource}"),
            stderr: stderr.to_string(),
        }
    }
}

/// Extract `Code` from `An error occurred (Code) when calling ...`.
fn error_code(stderr: &str) -> Option<&str> {
    let rest = stderr.split_once("An error occurred (")?.1;
    let (code, _) = rest.split_once(')')?;
    if code.is_empty() { None } else { Some(code) }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_ignorable() {
        assert!(ErrorCategory::AlreadyExists.is_ignorable());
        assert!(!ErrorCategory::NotFound.is_ignorable());
        assert!(!ErrorCategory::Permission.is_ignorable());
    }

    #[test]
    fn test_from_aws_output_already_exists() {
        let err = Error::from_aws_output(
            "An error occurred (EntityAlreadyExists) when calling the CreateRole operation: \
             Role with name myproj-checkout-charge already exists.",
            Some("myproj-checkout-charge"),
        );
        assert_eq!(err.category(), ErrorCategory::AlreadyExists);
        assert!(err.is_ignorable());
        assert_eq!(err.to_string(), "already exists: myproj-checkout-charge");
    }

    #[test]
    fn test_from_aws_output_lambda_conflicts() {
        let err = Error::from_aws_output(
            "An error occurred (ResourceConflictException) when calling the AddPermission \
             operation: The statement id (s3-0123456789abcdef) provided already exists. Please \
             provide a new statement id, or remove the existing statement.",
            Some("s3-0123456789abcdef"),
        );
        assert!(err.is_ignorable());

        let err = Error::from_aws_output(
            "An error occurred (ResourceConflictException) when calling the AddPermission \
             operation: The operation cannot be performed at this time. An update is in \
             progress for resource: arn:aws:lambda:ap-northeast-2:1:function:f",
            Some("f"),
        );
        assert!(!err.is_ignorable());
        assert!(
            matches!(err, Error::Service { ref code, .. } if code == "ResourceConflictException")
        );
    }

    #[test]
    fn test_from_aws_output_bucket_owned_by_you() {
        let err = Error::from_aws_output(
            "An error occurred (BucketAlreadyOwnedByYou) when calling the CreateBucket operation: \
             Your previous request to create the named bucket succeeded and you already own it.",
            Some("web.example.com"),
        );
        assert!(err.is_ignorable());
    }

    #[test]
    fn test_from_aws_output_bucket_taken_by_someone_else() {
        let err = Error::from_aws_output(
            "An error occurred (BucketAlreadyExists) when calling the CreateBucket operation: \
             The requested bucket name is not available.",
            Some("assets"),
        );
        assert!(!err.is_ignorable());
        assert!(matches!(err, Error::Service { ref code, .. } if code == "BucketAlreadyExists"));
    }

    #[test]
    fn test_from_aws_output_not_found() {
        let err = Error::from_aws_output(
            "An error occurred (ResourceNotFoundException) when calling the GetFunction \
             operation: Function not found: arn:aws:lambda:ap-northeast-2:1:function:x",
            Some("x"),
        );
        assert!(err.is_not_found());

        let err = Error::from_aws_output(
            "An error occurred (NoSuchEntity) when calling the GetRole operation: \
             The role with name x cannot be found.",
            Some("x"),
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_aws_output_permission() {
        let err = Error::from_aws_output(
            "An error occurred (AccessDenied) when calling the CreatePolicy operation: \
             User is not authorized",
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Permission);
        assert_eq!(err.to_string(), "permission denied: User is not authorized");
    }

    #[test]
    fn test_from_aws_output_quota() {
        let err = Error::from_aws_output(
            "An error occurred (LimitExceeded) when calling the CreatePolicyVersion operation: \
             A managed policy can have up to 5 versions.",
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Quota);
    }

    #[test]
    fn test_from_aws_output_client_side() {
        let err = Error::from_aws_output("Unable to locate credentials. You can configure...", None);
        assert_eq!(err.category(), ErrorCategory::Credentials);

        let err = Error::from_aws_output(
            "Could not connect to the endpoint URL: \"https://lambda.xx.amazonaws.com/\"",
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_from_aws_output_unknown() {
        let err = Error::from_aws_output("something odd happened", Some("thing"));
        assert_eq!(err.category(), ErrorCategory::Other);
        assert!(matches!(err, Error::CommandFailed { .. }));
    }
}
