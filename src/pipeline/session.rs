use crate::error::FixError;
use crate::patch;
use crate::task::{RemediationTask, TaskStatus, hash_source};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Coarse progress of one file's remediation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Analyzing,
    Remediating,
    Ready,
    Failed,
}

/// One uploaded file's remediation state: the aggregator the review
/// interface talks to
///
/// Holds the source snapshot the tasks were extracted against. The only
/// on-disk mutation this type ever performs is the atomic write in
/// [`SessionState::apply`] / [`SessionState::apply_all`].
pub struct SessionState {
    pub id: Uuid,
    /// Display name of the submitted file
    pub file_name: String,
    /// On-disk location patches are applied to
    pub path: PathBuf,
    /// Content snapshot taken at extraction
    pub source: String,
    pub snapshot_hash: String,
    pub phase: SessionPhase,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<RemediationTask>,
    /// Session-level failure (analyzer never ran, etc.)
    pub error: Option<String>,
}

pub type SharedSession = Arc<Mutex<SessionState>>;

/// Task fields exposed to the review interface
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: Uuid,
    pub rule_id: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub failure: Option<String>,
    pub has_patch: bool,
}

/// Session fields exposed to the review interface
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub file: String,
    pub phase: SessionPhase,
    pub created_at: DateTime<Utc>,
    pub tasks: usize,
    pub error: Option<String>,
}

impl SessionState {
    pub fn new(file_name: String, path: PathBuf, source: String) -> Self {
        let snapshot_hash = hash_source(&source);
        Self {
            id: Uuid::new_v4(),
            file_name,
            path,
            source,
            snapshot_hash,
            phase: SessionPhase::Analyzing,
            created_at: Utc::now(),
            tasks: Vec::new(),
            error: None,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn task(&self, task_id: Uuid) -> Option<&RemediationTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: Uuid) -> Option<&mut RemediationTask> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            file: self.file_name.clone(),
            phase: self.phase,
            created_at: self.created_at,
            tasks: self.tasks.len(),
            error: self.error.clone(),
        }
    }

    pub fn task_views(&self) -> Vec<TaskView> {
        self.tasks
            .iter()
            .map(|t| TaskView {
                id: t.id,
                rule_id: t.violation.rule_id.clone(),
                line: t.violation.line,
                column: t.violation.column,
                message: t.violation.message.clone(),
                status: t.status(),
                attempts: t.attempts,
                failure: t.failure().map(|e| e.to_string()),
                has_patch: t.patch().is_some(),
            })
            .collect()
    }

    /// Rendered unified diff for a task, if it has a live patch
    pub fn patch_text(&self, task_id: Uuid) -> Option<String> {
        self.task(task_id)
            .and_then(|t| t.patch())
            .map(|p| p.render())
    }

    /// Reject a validated patch without writing anything
    pub fn reject(&mut self, task_id: Uuid) -> anyhow::Result<()> {
        let task = self
            .task_mut(task_id)
            .ok_or_else(|| anyhow::anyhow!("no task {}", task_id))?;
        task.advance(TaskStatus::Rejected)?;
        info!("Rejected patch for task {}", task_id);
        Ok(())
    }

    /// Apply one validated patch to the file on disk
    ///
    /// Re-checks the snapshot hash against the live file first: a stale
    /// task fails with `StaleContext`, it is never silently re-based.
    /// Applying invalidates every other live task of this session.
    pub fn apply(&mut self, task_id: Uuid) -> anyhow::Result<()> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| anyhow::anyhow!("no task {}", task_id))?;
        if self.tasks[idx].status() != TaskStatus::Validated {
            anyhow::bail!(
                "task {} is {:?}, only validated tasks can be applied",
                task_id,
                self.tasks[idx].status()
            );
        }

        let live = std::fs::read_to_string(&self.path)?;
        if hash_source(&live) != self.tasks[idx].snapshot_hash {
            warn!("File {} changed since extraction", self.path.display());
            self.tasks[idx].fail(FixError::StaleContext);
            return Err(FixError::StaleContext.into());
        }

        let patch = self.tasks[idx]
            .patch()
            .ok_or_else(|| anyhow::anyhow!("validated task {} has no patch", task_id))?;
        let patched = patch.apply(&self.source)?;
        atomic_write(&self.path, &patched)?;

        self.tasks[idx].advance(TaskStatus::Applied)?;
        info!(
            "Applied patch for {} at {}:{}",
            self.tasks[idx].violation.rule_id, self.file_name, self.tasks[idx].violation.line
        );
        self.invalidate_live_tasks(Some(task_id));
        Ok(())
    }

    /// Apply every validated patch in one sweep, merged in ascending
    /// line order against the original snapshot
    pub fn apply_all(&mut self) -> anyhow::Result<usize> {
        let chosen: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Validated && t.patch().is_some())
            .map(|t| t.id)
            .collect();
        if chosen.is_empty() {
            return Ok(0);
        }

        let live = std::fs::read_to_string(&self.path)?;
        if hash_source(&live) != self.snapshot_hash {
            warn!("File {} changed since extraction", self.path.display());
            for id in &chosen {
                if let Some(task) = self.task_mut(*id) {
                    task.fail(FixError::StaleContext);
                }
            }
            return Err(FixError::StaleContext.into());
        }

        let patches: Vec<&patch::Patch> = self
            .tasks
            .iter()
            .filter(|t| chosen.contains(&t.id))
            .filter_map(|t| t.patch())
            .collect();
        let patched = patch::apply_all(&patches, &self.source)?;
        atomic_write(&self.path, &patched)?;

        for id in &chosen {
            if let Some(task) = self.task_mut(*id) {
                task.advance(TaskStatus::Applied)?;
            }
        }
        info!(
            "Applied {} patches to {}",
            chosen.len(),
            self.path.display()
        );
        self.invalidate_live_tasks(None);
        Ok(chosen.len())
    }

    /// Fail every non-terminal task with `StaleContext`; applied patches
    /// moved the file away from the snapshot the rest were built against
    fn invalidate_live_tasks(&mut self, except: Option<Uuid>) {
        for task in &mut self.tasks {
            if Some(task.id) == except || task.status().is_terminal() {
                continue;
            }
            task.fail(FixError::StaleContext);
        }
    }
}

/// Write-to-temp then rename, so a failure never leaves a partial file
fn atomic_write(path: &Path, content: &str) -> anyhow::Result<()> {
    // a bare file name has an empty parent
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Patch;
    use crate::types::{Severity, Violation};

    const SOURCE: &str = "int a;\nint b;\nint c;\nint d;\nint e;\n";

    fn violation(line: u32) -> Violation {
        Violation {
            file: "x.c".into(),
            line,
            column: 1,
            rule_id: "misra-c2012-8.4".into(),
            severity: Severity::Style,
            message: "msg".into(),
        }
    }

    /// Session over a real temp file, with one validated task per diff
    fn session_with_patches(diffs: &[(u32, &str)]) -> (SessionState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.c");
        std::fs::write(&path, SOURCE).unwrap();
        let mut session = SessionState::new("x.c".into(), path, SOURCE.to_string());
        for (line, diff) in diffs {
            let mut task =
                RemediationTask::new(violation(*line), session.snapshot_hash.clone());
            task.advance(TaskStatus::ContextBuilt).unwrap();
            task.advance(TaskStatus::Prompted).unwrap();
            task.advance(TaskStatus::Generated).unwrap();
            let patch = Patch::parse(task.id, "x.c", diff).unwrap();
            task.set_patch(patch);
            task.advance(TaskStatus::Validated).unwrap();
            session.tasks.push(task);
        }
        session.phase = SessionPhase::Ready;
        (session, dir)
    }

    const DIFF_LINE2: &str = "@@ -2,1 +2,1 @@\n-int b;\n+int b = 0;\n";
    const DIFF_LINE4: &str = "@@ -4,1 +4,1 @@\n-int d;\n+int d = 0;\n";

    #[test]
    fn test_apply_writes_file_and_invalidates_others() {
        let (mut session, _dir) = session_with_patches(&[(2, DIFF_LINE2), (4, DIFF_LINE4)]);
        let first = session.tasks[0].id;
        session.apply(first).unwrap();

        let on_disk = std::fs::read_to_string(&session.path).unwrap();
        assert_eq!(on_disk, "int a;\nint b = 0;\nint c;\nint d;\nint e;\n");
        assert_eq!(session.tasks[0].status(), TaskStatus::Applied);
        assert_eq!(session.tasks[1].status(), TaskStatus::Failed);
        assert_eq!(
            session.tasks[1].failure(),
            Some(&FixError::StaleContext)
        );
    }

    #[test]
    fn test_apply_stale_file_fails_without_writing() {
        let (mut session, _dir) = session_with_patches(&[(2, DIFF_LINE2)]);
        std::fs::write(&session.path, "int a; // edited elsewhere\n").unwrap();
        let first = session.tasks[0].id;
        assert!(session.apply(first).is_err());
        assert_eq!(session.tasks[0].status(), TaskStatus::Failed);
        assert_eq!(
            session.tasks[0].failure(),
            Some(&FixError::StaleContext)
        );
        // never silently re-based
        let on_disk = std::fs::read_to_string(&session.path).unwrap();
        assert_eq!(on_disk, "int a; // edited elsewhere\n");
    }

    #[test]
    fn test_apply_rejects_non_validated_task() {
        let (mut session, _dir) = session_with_patches(&[(2, DIFF_LINE2)]);
        let id = session.tasks[0].id;
        session.reject(id).unwrap();
        assert!(session.apply(id).is_err());
    }

    #[test]
    fn test_apply_all_commits_in_ascending_order() {
        // insertion order deliberately reversed
        let (mut session, _dir) = session_with_patches(&[(4, DIFF_LINE4), (2, DIFF_LINE2)]);
        let applied = session.apply_all().unwrap();
        assert_eq!(applied, 2);
        let on_disk = std::fs::read_to_string(&session.path).unwrap();
        assert_eq!(on_disk, "int a;\nint b = 0;\nint c;\nint d = 0;\nint e;\n");
        assert!(session.tasks.iter().all(|t| t.status() == TaskStatus::Applied));
    }

    #[test]
    fn test_reject_leaves_file_untouched() {
        let (mut session, _dir) = session_with_patches(&[(2, DIFF_LINE2)]);
        let id = session.tasks[0].id;
        session.reject(id).unwrap();
        assert_eq!(session.tasks[0].status(), TaskStatus::Rejected);
        assert_eq!(std::fs::read_to_string(&session.path).unwrap(), SOURCE);
    }

    #[test]
    fn test_patch_text_renders_diff() {
        let (session, _dir) = session_with_patches(&[(2, DIFF_LINE2)]);
        let text = session.patch_text(session.tasks[0].id).unwrap();
        assert!(text.contains("--- a/x.c"));
        assert!(text.contains("+int b = 0;"));
    }

    #[test]
    fn test_views_carry_failure_text() {
        let (mut session, _dir) = session_with_patches(&[(2, DIFF_LINE2)]);
        session.tasks[0].fail(FixError::RetriesExhausted {
            attempts: 3,
            last: "no usable patch".into(),
        });
        let views = session.task_views();
        assert_eq!(views[0].status, TaskStatus::Failed);
        assert!(views[0].failure.as_ref().unwrap().contains("no usable patch"));
    }
}
