//! # cloudkit
//!
//! Provider client for deploying Lambda functions and the resources they
//! depend on.
//!
//! This crate provides:
//! - A [`Backend`] trait with one method per provider call (IAM, STS,
//!   Lambda, S3, SNS, DynamoDB, SQS)
//! - [`AwsCliBackend`], which drives the `aws` CLI
//! - [`MemoryBackend`], an in-memory provider for tests
//! - A categorized [`Error`] so callers can treat duplicates and misses
//!   as outcomes rather than failures
//!
//! ## Example
//!
//! ```no_run
//! use cloudkit::{AwsCliBackend, Backend};
//!
//! let backend = AwsCliBackend::new("ap-northeast-2").expect("aws CLI not available");
//!
//! match backend.get_role("myproj-checkout-charge") {
//!     Ok(role) => println!("reusing {}", role.arn),
//!     Err(e) if e.is_not_found() => println!("role must be created"),
//!     Err(e) => panic!("{e}"),
//! }
//! ```
//!
//! ## Duplicates
//!
//! Create-style calls never swallow duplicates themselves. Check
//! [`Error::is_ignorable`] at the call site:
//!
//! ```no_run
//! use cloudkit::{Backend, MemoryBackend};
//!
//! let backend = MemoryBackend::new("ap-northeast-2");
//! backend.create_bucket("assets").unwrap();
//!
//! match backend.create_bucket("assets") {
//!     Err(e) if e.is_ignorable() => {} // already there
//!     other => other.unwrap(),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod types;

pub use backend::Backend;
pub use backend::aws::AwsCliBackend;
pub use backend::memory::MemoryBackend;
pub use error::{Error, ErrorCategory, Result};
pub use types::{
    CreateFunction, FunctionConfiguration, InvokePermission, ManagedPolicy, PolicyVersion,
    QueueAttributes, Role, UpdateFunctionConfiguration, VpcConfig,
};
