use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratum_core::{CodeMatch, FileStore, MatchKind, Result, StratumError};
use tracing::{info, warn};

/// Matches below this confidence are flagged as uncertain in the plan.
const UNCERTAIN_THRESHOLD: f64 = 0.5;
/// At or above this confidence a match is a direct impact; between this and
/// the uncertain threshold it is merely related.
const DIRECT_THRESHOLD: f64 = 0.8;

pub const RISK_UNCERTAIN_CHANGES: &str = "uncertain-changes";
pub const RISK_DOCUMENTATION_DRIFT: &str = "documentation-drift";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedChange {
    pub uri: String,
    pub line: u32,
    pub character: u32,
    pub excerpt: String,
    pub kind: MatchKind,
    pub confidence: f64,
}

/// Impact classes, most to least actionable. Documentation hits are listed
/// for review but never edited automatically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactSet {
    pub direct: Vec<CodeMatch>,
    pub related: Vec<CodeMatch>,
    pub potential: Vec<CodeMatch>,
    pub documentation: Vec<CodeMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenamePlan {
    pub old: String,
    pub new: String,
    pub changes: Vec<PlannedChange>,
    pub impacts: ImpactSet,
    pub risks: Vec<String>,
    pub summary: String,
}

impl RenamePlan {
    /// Classify the orchestrator's matches into a previewable plan. No file
    /// is touched here.
    pub fn build(old: impl Into<String>, new: impl Into<String>, matches: &[CodeMatch]) -> Self {
        let old = old.into();
        let new = new.into();
        let mut impacts = ImpactSet::default();
        let mut changes = Vec::new();
        let mut uncertain = 0usize;

        for m in matches {
            if is_documentation(m) {
                impacts.documentation.push(m.clone());
                continue;
            }
            if m.kind == MatchKind::Fuzzy || m.confidence < UNCERTAIN_THRESHOLD {
                uncertain += 1;
                impacts.potential.push(m.clone());
            } else if m.confidence >= DIRECT_THRESHOLD {
                impacts.direct.push(m.clone());
            } else {
                impacts.related.push(m.clone());
            }
            changes.push(PlannedChange {
                uri: m.uri.clone(),
                line: m.line,
                character: m.character,
                excerpt: m.excerpt.clone(),
                kind: m.kind,
                confidence: m.confidence,
            });
        }

        let mut risks = Vec::new();
        if uncertain > 0 {
            risks.push(RISK_UNCERTAIN_CHANGES.to_string());
        }
        if !impacts.documentation.is_empty() {
            risks.push(RISK_DOCUMENTATION_DRIFT.to_string());
        }

        let files: std::collections::HashSet<&str> =
            changes.iter().map(|c| c.uri.as_str()).collect();
        let summary = format!(
            "rename '{}' -> '{}': {} change(s) across {} file(s), {} documentation mention(s), {} risk(s)",
            old,
            new,
            changes.len(),
            files.len(),
            impacts.documentation.len(),
            risks.len()
        );

        Self {
            old,
            new,
            changes,
            impacts,
            risks,
            summary,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

fn is_documentation(m: &CodeMatch) -> bool {
    let trimmed = m.excerpt.trim_start();
    m.uri.ends_with(".md")
        || trimmed.starts_with("//")
        || trimmed.starts_with('*')
        || trimmed.starts_with("/*")
        || trimmed.starts_with('#') && !trimmed.starts_with("#[")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    Failed,
    /// Not attempted because an earlier file failed.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileApplyResult {
    pub uri: String,
    pub status: ApplyStatus,
    pub replacements: usize,
    pub error: Option<String>,
}

/// Original contents of every file the apply pass was going to touch,
/// captured before the first write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub snapshots: Vec<FileSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub uri: String,
    pub contents: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub results: Vec<FileApplyResult>,
    pub rollback_plan: RollbackPlan,
    pub completed: bool,
}

/// Executes a previewed plan against the file store, file by file, with a
/// rollback plan captured up front.
pub struct RenameExecutor {
    files: Arc<dyn FileStore>,
}

impl RenameExecutor {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }

    /// Apply a plan. Snapshots of every target file are read before any
    /// write; a mid-apply write failure stops the pass and marks the
    /// remaining files skipped, so the returned rollback plan reverts
    /// exactly what was written.
    pub async fn apply(&self, plan: &RenamePlan) -> Result<ApplyReport> {
        let word = Regex::new(&format!(r"\b{}\b", regex::escape(&plan.old)))
            .map_err(|e| StratumError::Validation(format!("invalid identifier: {e}")))?;

        // Group target lines per file, deterministically ordered.
        let mut per_file: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for change in &plan.changes {
            per_file.entry(&change.uri).or_default().push(change.line);
        }

        let mut snapshots = Vec::with_capacity(per_file.len());
        for uri in per_file.keys() {
            let contents = self.files.read(uri).await?;
            snapshots.push(FileSnapshot {
                uri: (*uri).to_string(),
                contents,
            });
        }
        let rollback_plan = RollbackPlan {
            snapshots: snapshots.clone(),
        };

        let mut results = Vec::with_capacity(per_file.len());
        let mut failed = false;
        for (snapshot, (uri, lines)) in snapshots.iter().zip(per_file.iter()) {
            if failed {
                results.push(FileApplyResult {
                    uri: (*uri).to_string(),
                    status: ApplyStatus::Skipped,
                    replacements: 0,
                    error: None,
                });
                continue;
            }
            let (updated, replacements) =
                rewrite_lines(&snapshot.contents, lines, &word, &plan.new);
            match self.files.write(uri, &updated).await {
                Ok(()) => results.push(FileApplyResult {
                    uri: (*uri).to_string(),
                    status: ApplyStatus::Applied,
                    replacements,
                    error: None,
                }),
                Err(err) => {
                    warn!(uri, error = %err, "rename write failed, stopping apply");
                    failed = true;
                    results.push(FileApplyResult {
                        uri: (*uri).to_string(),
                        status: ApplyStatus::Failed,
                        replacements: 0,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let completed = !failed;
        info!(
            old = %plan.old,
            new = %plan.new,
            files = results.len(),
            completed,
            "rename apply finished"
        );
        Ok(ApplyReport {
            results,
            rollback_plan,
            completed,
        })
    }

    /// Write every snapshot back. Best effort in reverse is unnecessary
    /// since snapshots are whole-file originals.
    pub async fn rollback(&self, plan: &RollbackPlan) -> Result<()> {
        for snapshot in &plan.snapshots {
            self.files.write(&snapshot.uri, &snapshot.contents).await?;
        }
        info!(files = plan.snapshots.len(), "rollback completed");
        Ok(())
    }
}

/// Replace whole-word occurrences of the old identifier on the listed
/// 1-based lines only; the rest of the file is untouched.
fn rewrite_lines(contents: &str, lines: &[u32], word: &Regex, replacement: &str) -> (String, usize) {
    let mut replacements = 0usize;
    let had_trailing_newline = contents.ends_with('\n');
    let mut out: Vec<String> = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if lines.contains(&line_no) {
            let rewritten = word.replace_all(line, replacement);
            if rewritten != line {
                replacements += word.find_iter(line).count();
            }
            out.push(rewritten.into_owned());
        } else {
            out.push(line.to_string());
        }
    }
    let mut joined = out.join("\n");
    if had_trailing_newline {
        joined.push('\n');
    }
    (joined, replacements)
}

/// Workspace-backed [`FileStore`] using tokio's async filesystem API.
pub struct FsFileStore;

#[async_trait]
impl FileStore for FsFileStore {
    async fn read(&self, uri: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(uri).await?)
    }

    async fn write(&self, uri: &str, contents: &str) -> Result<()> {
        Ok(tokio::fs::write(uri, contents).await?)
    }
}
