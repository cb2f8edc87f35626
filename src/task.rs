use crate::error::FixError;
use crate::patch::Patch;
use crate::types::{ContextWindow, Violation};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lifecycle stage of a remediation task
///
/// Legal transitions:
/// - `Pending -> ContextBuilt -> Prompted -> Generated -> Validated`
/// - `Prompted | Generated -> ContextBuilt` (retry with a fresh window)
/// - `Validated -> Applied | Rejected`
/// - any non-terminal stage `-> Failed`
///
/// `Validated` means validation passed; a failed validation re-enters
/// `ContextBuilt` through the retry path. `Applied`, `Rejected`, and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    ContextBuilt,
    Prompted,
    Generated,
    Validated,
    Applied,
    Rejected,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Rejected | Self::Failed)
    }

    fn can_transition(self, next: Self) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, ContextBuilt) => true,
            (ContextBuilt, Prompted) => true,
            (Prompted, Generated) => true,
            (Generated, Validated) => true,
            (Prompted | Generated, ContextBuilt) => true,
            (Validated, Applied | Rejected) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One violation's journey from diagnostic to (maybe) applied patch
///
/// Owned by the coordinator; every state change goes through
/// [`RemediationTask::advance`] or [`RemediationTask::fail`] so illegal
/// transitions are caught at the call site.
#[derive(Debug, Clone)]
pub struct RemediationTask {
    pub id: Uuid,
    pub violation: Violation,
    status: TaskStatus,
    /// Attempts consumed so far (0 while the first is in flight)
    pub attempts: u32,
    /// SHA-256 of the file content the task was created against
    pub snapshot_hash: String,
    /// Latest context window, kept for display
    pub context: Option<ContextWindow>,
    patch: Option<Patch>,
    failure: Option<FixError>,
}

impl RemediationTask {
    pub fn new(violation: Violation, snapshot_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            violation,
            status: TaskStatus::Pending,
            attempts: 0,
            snapshot_hash,
            context: None,
            patch: None,
            failure: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn patch(&self) -> Option<&Patch> {
        self.patch.as_ref()
    }

    pub fn failure(&self) -> Option<&FixError> {
        self.failure.as_ref()
    }

    /// Move to `next`, rejecting transitions outside the legal set
    pub fn advance(&mut self, next: TaskStatus) -> anyhow::Result<()> {
        if !self.status.can_transition(next) {
            anyhow::bail!(
                "illegal task transition {:?} -> {:?} for task {}",
                self.status,
                next,
                self.id
            );
        }
        self.status = next;
        Ok(())
    }

    /// Terminal failure from any non-terminal stage
    pub fn fail(&mut self, error: FixError) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.failure = Some(error);
    }

    /// Install a freshly generated patch, discarding any previous one;
    /// a task never holds more than one live patch
    pub fn set_patch(&mut self, patch: Patch) {
        self.patch = Some(patch);
    }

    pub fn clear_patch(&mut self) {
        self.patch = None;
    }
}

/// Snapshot hash used to detect files changing underneath a task
pub fn hash_source(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
