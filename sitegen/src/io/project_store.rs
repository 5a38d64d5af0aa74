//! Project record load/save with schema + invariant validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::invariants::validate_tree;
use crate::core::reconciler;
use crate::core::types::{Step, StepId, StepKind};
use crate::io::config::write_atomic;
use crate::io::generator::ChatMessage;
use crate::tree::FileTree;

const RECORD_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/project_record.schema.json"
));

/// Persisted state of one generated project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub prompt: String,
    pub files: RecordFiles,
    #[serde(default)]
    pub llm_messages: Vec<ChatMessage>,
    /// Id of the most recent step.
    #[serde(default)]
    pub current_step: Option<StepId>,
}

/// Files as stored: the full tree, or a flat `path -> content` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordFiles {
    Tree(FileTree),
    Flat(BTreeMap<String, String>),
}

impl RecordFiles {
    /// Materialize the stored files as a tree.
    ///
    /// A flat map is rebuilt through the reconciler, so its paths get the same
    /// canonicalization and conflict checks as generated files.
    pub fn into_tree(self) -> Result<FileTree> {
        match self {
            RecordFiles::Tree(tree) => {
                let errors = validate_tree(&tree);
                if !errors.is_empty() {
                    return Err(anyhow!("tree invariants failed: {}", errors.join("; ")));
                }
                Ok(tree)
            }
            RecordFiles::Flat(files) => {
                let steps: Vec<Step> = files
                    .iter()
                    .zip(1..)
                    .map(|((path, content), id)| {
                        Step::new(
                            id,
                            StepKind::CreateFile,
                            Some(path.as_str()),
                            Some(content.as_str()),
                        )
                    })
                    .collect();
                let reconciliation = reconciler::apply(&FileTree::new(), &steps);
                let failures: Vec<String> = reconciliation
                    .transitions
                    .iter()
                    .filter_map(|t| t.reason.clone())
                    .collect();
                if !failures.is_empty() {
                    return Err(anyhow!("flat file map rejected: {}", failures.join("; ")));
                }
                Ok(reconciliation.tree)
            }
        }
    }
}

/// Load and validate a project record from disk (schema + invariants).
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_record(path: &Path) -> Result<ProjectRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read project {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse project {}", path.display()))?;
    validate_schema(&value)?;
    let record: ProjectRecord = serde_json::from_value(value)
        .with_context(|| format!("deserialize project {}", path.display()))?;
    if let RecordFiles::Tree(tree) = &record.files {
        let errors = validate_tree(tree);
        if !errors.is_empty() {
            return Err(anyhow!("tree invariants failed: {}", errors.join("; ")));
        }
    }
    debug!(messages = record.llm_messages.len(), "loaded project record");
    Ok(record)
}

/// Atomically write a project record (temp file + rename).
pub fn write_record(path: &Path, record: &ProjectRecord) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize project record")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(record: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(RECORD_SCHEMA).context("parse project record schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(record) {
        let messages = compiled
            .iter_errors(record)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "project schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
