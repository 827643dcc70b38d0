//! Project-wide and per-unit configuration files
//!
//! Every file is optional; a missing file means defaults. Malformed JSON is
//! an error naming the file.

use anyhow::{Context, Result};
use cloudkit::{QueueAttributes, VpcConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

// Deploy directory
pub const IGNORE_FILE: &str = ".ignore.json";
pub const COMMON_POLICY_FILE: &str = ".policy.json";
pub const RESOURCE_FILE: &str = ".resource.json";
pub const DATABASE_FILE: &str = ".database.json";

// Unit directory
pub const IMPORT_FILE: &str = ".import.json";
pub const POLICY_FILE: &str = ".policy.json";
pub const LAMBDA_FILE: &str = ".lambda.json";
pub const VPC_FILE: &str = ".vpc.json";

/// Convention files living in a unit directory.
pub const UNIT_FILES: &[&str] = &[IMPORT_FILE, POLICY_FILE, LAMBDA_FILE, VPC_FILE];

pub const DEFAULT_TIMEOUT: u32 = 3;
pub const DEFAULT_MEMORY: u32 = 128;

const STAGING_PREFIX: &str = "staging-";

// ============================================================================
// Environment
// ============================================================================

/// Target environment of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    pub fn from_test_flag(test: bool) -> Self {
        if test { Self::Staging } else { Self::Production }
    }

    pub fn is_staging(self) -> bool {
        self == Self::Staging
    }

    /// Key of this environment's record in `.database.json`.
    pub fn database_key(self) -> &'static str {
        match self {
            Self::Production => "release",
            Self::Staging => "test",
        }
    }

    /// Deployed name of a declared bucket.
    pub fn bucket_name(self, declared: &str) -> String {
        match self {
            Self::Production => declared.to_string(),
            Self::Staging => format!("{STAGING_PREFIX}{declared}"),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Staging => write!(f, "staging"),
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// A number that may also be written as a numeric string (`90` or `"90"`).
///
/// Any other value still parses, so one bad field never rejects the file;
/// [`Numeric::as_u32`] then yields `None` and the caller falls back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(serde_json::Number),
    Text(String),
    Other(Value),
}

impl Numeric {
    /// The value as a non-negative whole number, if it is one (`90.0` counts).
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Number(n) => n.as_u64().map_or_else(
                || n.as_f64().and_then(whole_u32),
                |n| u32::try_from(n).ok(),
            ),
            Self::Text(s) => s.trim().parse::<f64>().ok().and_then(whole_u32),
            Self::Other(_) => None,
        }
    }
}

fn whole_u32(value: f64) -> Option<u32> {
    (value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&value))
        .then(|| value as u32)
}

// ============================================================================
// Project config
// ============================================================================

/// Settings for resources that are not owned by a single unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub sqs: BTreeMap<String, QueueSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub delay: Option<Numeric>,
}

/// Everything read from the deploy directory.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    /// Feature directories never deployed
    pub ignore: Vec<String>,
    /// Managed policy ARNs attached to every production role
    pub common_policies: Vec<String>,
    pub resources: ResourceConfig,
    /// Raw `.database.json`, `None` when the file is absent
    pub database: Option<Value>,
}

impl ProjectConfig {
    pub fn load(deploy_dir: &Path) -> Result<Self> {
        Ok(Self {
            ignore: load_optional(&deploy_dir.join(IGNORE_FILE))?.unwrap_or_default(),
            common_policies: load_optional(&deploy_dir.join(COMMON_POLICY_FILE))?
                .unwrap_or_default(),
            resources: load_optional(&deploy_dir.join(RESOURCE_FILE))?.unwrap_or_default(),
            database: load_optional(&deploy_dir.join(DATABASE_FILE))?,
        })
    }

    /// Database record for `env`, serialized as compact JSON.
    ///
    /// An absent file yields an empty string, an absent key yields `null`.
    pub fn database_record(&self, env: Environment) -> String {
        match &self.database {
            None => String::new(),
            Some(records) => records
                .get(env.database_key())
                .unwrap_or(&Value::Null)
                .to_string(),
        }
    }

    /// Creation attributes for a queue (`DelaySeconds` when configured).
    pub fn queue_attributes(&self, queue: &str) -> QueueAttributes {
        let mut attributes = QueueAttributes::new();
        if let Some(delay) = self.resources.sqs.get(queue).and_then(|q| q.delay.as_ref()) {
            match delay.as_u32() {
                Some(seconds) => {
                    attributes.insert("DelaySeconds".to_string(), seconds.to_string());
                }
                None => log::warn!("Ignoring delay {delay:?} of queue {queue}: not a whole number"),
            }
        }
        attributes
    }
}

// ============================================================================
// Unit config
// ============================================================================

/// Contents of `.lambda.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LambdaSettings {
    #[serde(default)]
    pub timeout: Option<Numeric>,
    #[serde(default)]
    pub memory: Option<Numeric>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl LambdaSettings {
    pub fn timeout(&self) -> u32 {
        self.timeout
            .as_ref()
            .and_then(Numeric::as_u32)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn memory_size(&self) -> u32 {
        self.memory
            .as_ref()
            .and_then(Numeric::as_u32)
            .unwrap_or(DEFAULT_MEMORY)
    }
}

/// One entry of an `s3` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDeclaration {
    pub name: String,
    #[serde(default)]
    pub is_event_source: bool,
}

/// Everything read from one unit directory.
#[derive(Debug, Clone, Default)]
pub struct UnitConfig {
    /// Shared libraries to copy in before packaging, in order
    pub imports: Vec<String>,
    /// Raw resource declarations keyed by kind
    pub declarations: BTreeMap<String, Value>,
    pub lambda: LambdaSettings,
    pub vpc: VpcConfig,
}

impl UnitConfig {
    pub fn load(unit_dir: &Path) -> Result<Self> {
        Ok(Self {
            imports: load_optional(&unit_dir.join(IMPORT_FILE))?.unwrap_or_default(),
            declarations: load_optional(&unit_dir.join(POLICY_FILE))?.unwrap_or_default(),
            lambda: load_optional(&unit_dir.join(LAMBDA_FILE))?.unwrap_or_default(),
            vpc: load_optional(&unit_dir.join(VPC_FILE))?.unwrap_or_default(),
        })
    }

    pub fn has_vpc(&self) -> bool {
        !self.vpc.is_empty()
    }

    /// Typed identifiers declared for `kind`, `None` when the kind is absent.
    pub fn declared<T: DeserializeOwned>(
        &self,
        kind: &str,
    ) -> serde_json::Result<Option<Vec<T>>> {
        self.declarations
            .get(kind)
            .map(|value| Vec::<T>::deserialize(value))
            .transpose()
    }
}

/// Parse a JSON file, or `None` when it does not exist.
fn load_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(Some(value))
}
