//! Staging a unit directory for upload
//!
//! Declared shared libraries are copied into the unit directory, glue
//! libraries get the unit's resource names written into them, and the
//! directory is zipped into `app.zip`. Everything staged is removed again
//! when the [`StagedUnit`] is finished or dropped.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::config::{BucketDeclaration, Environment, UNIT_FILES, UnitConfig};
use crate::convention::UnitName;
use crate::paths::ProjectLayout;

/// Name of the artifact written into the unit directory.
pub const ARTIFACT_NAME: &str = "app.zip";

/// File whose presence marks a unit as needing database settings.
pub const DATABASE_MARKER: &str = "dbconf.py";

const SNS_GLUE: &str = "sns_glue";
const S3_GLUE: &str = "s3_glue";

const TOPIC_CONSTANTS_PLACEHOLDER: &str = "\"<<replaced>> topic_names_constants\"";
const TOPIC_PUBLISHERS_PLACEHOLDER: &str = "\"<<replaced>> publish_to_specified_topic\"";
const BUCKET_CONSTANTS_PLACEHOLDER: &str = "\"<<replaced>> publish_to_specified_bucket\"";

/// A built artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    /// blake3 hex digest of the zip
    pub digest: String,
    pub size: u64,
}

/// A unit directory with imports copied in.
#[derive(Debug)]
pub struct StagedUnit {
    dir: PathBuf,
    /// Files and directories staging created, in creation order
    created: Vec<PathBuf>,
    artifact: Option<PathBuf>,
}

impl StagedUnit {
    /// Copy the unit's imports into its directory and customize glue libraries.
    pub fn stage(
        layout: &ProjectLayout,
        unit: &UnitName,
        config: &UnitConfig,
        env: Environment,
    ) -> Result<Self> {
        let dir = layout.require_unit(unit)?;
        let mut staged = Self {
            dir,
            created: Vec::new(),
            artifact: None,
        };

        for library in &config.imports {
            let source = layout.library_dir(library);
            if !source.is_dir() {
                bail!(
                    "Shared library '{library}' imported by {unit} not found at {}",
                    source.display()
                );
            }
            staged.copy_library(&source)?;

            match library.as_str() {
                SNS_GLUE => customize_sns_glue(&staged.dir, unit, config)?,
                S3_GLUE => customize_s3_glue(&staged.dir, config, env)?,
                _ => {}
            }
            log::debug!("{unit}: imported {library}");
        }

        Ok(staged)
    }

    /// Whether the unit (after imports) carries the database marker.
    pub fn has_database_marker(&self) -> bool {
        self.dir.join(DATABASE_MARKER).exists()
    }

    /// Zip the unit directory into `app.zip`.
    pub fn build_artifact(&mut self) -> Result<Artifact> {
        let path = self.dir.join(ARTIFACT_NAME);
        self.artifact = Some(path.clone());

        let file = File::create(&path)
            .with_context(|| format!("Could not create {}", path.display()))?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.context("Failed to read directory entry")?;
            let rel_path = entry.path().strip_prefix(&self.dir)?;
            if is_excluded(rel_path) {
                continue;
            }
            let name = archive_name(rel_path);

            if entry.file_type().is_dir() {
                zip.add_directory(name, options)?;
            } else {
                zip.start_file(name, options)?;
                let mut source = File::open(entry.path())
                    .with_context(|| format!("Could not read {}", entry.path().display()))?;
                io::copy(&mut source, &mut zip)?;
            }
        }
        zip.finish()?;

        let mut hasher = blake3::Hasher::new();
        io::copy(&mut File::open(&path)?, &mut hasher)?;
        let artifact = Artifact {
            size: fs::metadata(&path)?.len(),
            digest: hasher.finalize().to_hex().to_string(),
            path,
        };
        log::debug!(
            "Built {} ({} bytes, blake3 {})",
            artifact.path.display(),
            artifact.size,
            artifact.digest
        );
        Ok(artifact)
    }

    /// Remove the artifact and copied library files.
    pub fn finish(mut self) -> Result<()> {
        self.cleanup()
    }

    /// Copy one library into the unit directory.
    ///
    /// Existing unit directories are merged into; an existing unit file is
    /// never overwritten. Only what this copy creates is recorded for cleanup.
    fn copy_library(&mut self, source: &Path) -> Result<()> {
        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.context("Failed to read directory entry")?;
            let rel_path = entry.path().strip_prefix(source)?;
            let dest = self.dir.join(rel_path);

            if entry.file_type().is_dir() {
                if !dest.exists() {
                    fs::create_dir(&dest)
                        .with_context(|| format!("Could not create {}", dest.display()))?;
                    self.created.push(dest);
                }
                continue;
            }

            let owned = self.created.contains(&dest);
            if dest.exists() && !owned {
                bail!(
                    "Importing {} would overwrite {} of the unit",
                    source.display(),
                    rel_path.display()
                );
            }
            fs::copy(entry.path(), &dest).with_context(|| {
                format!("Could not copy {} to {}", entry.path().display(), dest.display())
            })?;
            if !owned {
                self.created.push(dest);
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        if let Some(artifact) = self.artifact.take()
            && artifact.exists()
        {
            fs::remove_file(&artifact)
                .with_context(|| format!("Could not remove {}", artifact.display()))?;
        }
        while let Some(path) = self.created.pop() {
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else if path.exists() {
                fs::remove_file(&path)
            } else {
                Ok(())
            };
            removed.with_context(|| format!("Could not remove {}", path.display()))?;
        }
        log::debug!("Cleaned {}", self.dir.display());
        Ok(())
    }
}

impl Drop for StagedUnit {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!("Leaving staged files behind in {}: {e:#}", self.dir.display());
        }
    }
}

fn is_excluded(rel_path: &Path) -> bool {
    rel_path
        .to_str()
        .is_some_and(|p| p == ARTIFACT_NAME || UNIT_FILES.contains(&p))
}

fn archive_name(rel_path: &Path) -> String {
    rel_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write the unit's topic names and publishers into `sns_glue.py`.
fn customize_sns_glue(dir: &Path, unit: &UnitName, config: &UnitConfig) -> Result<()> {
    let file = dir.join(format!("{SNS_GLUE}.py"));
    let Some(topics) = config.declared::<String>("sns")? else {
        return Ok(());
    };
    if !file.exists() {
        return Ok(());
    }

    let mut linked = BTreeMap::new();
    let mut publishers = String::new();
    for topic in &topics {
        let name = unit.sibling_name(topic)?;
        publishers.push_str(&format!(
            "def publish_to_{topic}(message):\n    publish(\"{name}\", message)\n"
        ));
        linked.insert(topic.as_str(), name);
    }

    let code = fs::read_to_string(&file)?
        .replace(TOPIC_PUBLISHERS_PLACEHOLDER, &publishers)
        .replace(
            TOPIC_CONSTANTS_PLACEHOLDER,
            &format!("TOPIC_NAMES={}", serde_json::to_string(&linked)?),
        );
    fs::write(&file, code)?;
    Ok(())
}

/// Write the unit's deployed bucket names into `s3_glue.py`.
fn customize_s3_glue(dir: &Path, config: &UnitConfig, env: Environment) -> Result<()> {
    let file = dir.join(format!("{S3_GLUE}.py"));
    let Some(buckets) = config.declared::<BucketDeclaration>("s3")? else {
        return Ok(());
    };
    if !file.exists() {
        return Ok(());
    }

    let deployed: BTreeMap<&str, String> = buckets
        .iter()
        .map(|b| (b.name.as_str(), env.bucket_name(&b.name)))
        .collect();

    let code = fs::read_to_string(&file)?.replace(
        BUCKET_CONSTANTS_PLACEHOLDER,
        &format!("BUCKET_NAMES = {}", serde_json::to_string(&deployed)?),
    );
    fs::write(&file, code)?;
    Ok(())
}
