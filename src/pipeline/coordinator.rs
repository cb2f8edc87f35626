use crate::analyzer;
use crate::config::Config;
use crate::context::{self, ContextOptions};
use crate::error::FixError;
use crate::inference::InferenceLane;
use crate::patch::Patch;
use crate::pipeline::session::{SessionPhase, SharedSession};
use crate::prompt;
use crate::task::{RemediationTask, TaskStatus};
use crate::types::{ValidationResult, Violation};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why one attempt did not produce a validated patch
enum AttemptFailure {
    /// A pipeline error (inference, parsing, structure, analyzer)
    Error(FixError),
    /// The patch applied but validation rejected it
    Rejected(String),
    /// The task was invalidated while the attempt was in flight
    TaskGone,
}

impl AttemptFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Error(e) => e.is_retryable(),
            Self::Rejected(_) => true,
            Self::TaskGone => false,
        }
    }

    fn reason(&self) -> String {
        match self {
            Self::Error(e) => e.to_string(),
            Self::Rejected(reason) => reason.clone(),
            Self::TaskGone => "task invalidated".to_string(),
        }
    }
}

/// Drive one file's session from extraction to ready
///
/// Extraction and re-analysis run freely; prompting and inference go
/// through the shared lane. Tasks run concurrently under the configured
/// cap, and a failure in one never aborts the others.
pub async fn run(session: SharedSession, config: Arc<Config>, lane: InferenceLane) {
    let start = std::time::Instant::now();
    let (path, source, snapshot_hash, file_name) = {
        let s = session.lock().await;
        (
            s.path.clone(),
            s.source.clone(),
            s.snapshot_hash.clone(),
            s.file_name.clone(),
        )
    };

    // analyzer failures share the task retry bound before surfacing
    let mut violations = None;
    let mut last_err = None;
    for attempt in 0..=config.pipeline.max_retries {
        match analyzer::extract(&path, &config.analyzer).await {
            Ok(found) => {
                violations = Some(found);
                break;
            }
            Err(e) => {
                warn!("Extraction attempt {} for {} failed: {}", attempt, file_name, e);
                last_err = Some(e);
            }
        }
    }
    let Some(violations) = violations else {
        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "analysis failed".into());
        let mut s = session.lock().await;
        s.phase = SessionPhase::Failed;
        s.error = Some(reason);
        return;
    };

    if violations.is_empty() {
        info!("No MISRA violations found in {}", file_name);
        let mut s = session.lock().await;
        s.phase = SessionPhase::Ready;
        return;
    }
    info!("Found {} violations in {}", violations.len(), file_name);

    let baseline = Arc::new(rule_counts(&violations));
    let task_ids: Vec<(Uuid, Violation)> = {
        let mut s = session.lock().await;
        s.tasks = violations
            .iter()
            .map(|v| RemediationTask::new(v.clone(), snapshot_hash.clone()))
            .collect();
        s.phase = SessionPhase::Remediating;
        s.tasks.iter().map(|t| (t.id, t.violation.clone())).collect()
    };

    // worker pool: fill to the cap, refill as tasks finish
    let source = Arc::new(source);
    let max_parallel = config.pipeline.max_parallel_tasks.max(1);
    let mut stream = FuturesUnordered::new();
    let mut pending = task_ids.into_iter();
    for _ in 0..max_parallel {
        if let Some((id, violation)) = pending.next() {
            stream.push(process_task(
                session.clone(),
                id,
                violation,
                source.clone(),
                baseline.clone(),
                config.clone(),
                lane.clone(),
            ));
        }
    }
    while stream.next().await.is_some() {
        if let Some((id, violation)) = pending.next() {
            stream.push(process_task(
                session.clone(),
                id,
                violation,
                source.clone(),
                baseline.clone(),
                config.clone(),
                lane.clone(),
            ));
        }
    }

    let mut s = session.lock().await;
    s.phase = SessionPhase::Ready;
    let validated = s
        .tasks
        .iter()
        .filter(|t| t.status() == TaskStatus::Validated)
        .count();
    let failed = s
        .tasks
        .iter()
        .filter(|t| t.status() == TaskStatus::Failed)
        .count();
    info!(
        "Session for {} ready: {} validated, {} failed ({:.2}s)",
        file_name,
        validated,
        failed,
        start.elapsed().as_secs_f64()
    );
}

/// Run one task to a terminal-or-validated state, retrying under the bound
async fn process_task(
    session: SharedSession,
    task_id: Uuid,
    violation: Violation,
    source: Arc<String>,
    baseline: Arc<HashMap<String, usize>>,
    config: Arc<Config>,
    lane: InferenceLane,
) {
    let max_retries = config.pipeline.max_retries;
    let file_line_count = source.lines().count() as u32;
    let mut attempt: u32 = 0;

    loop {
        let outcome = attempt_once(
            &session,
            task_id,
            &violation,
            &source,
            &baseline,
            &config,
            &lane,
            attempt,
            file_line_count,
        )
        .await;

        match outcome {
            Ok(patch) => {
                let mut s = session.lock().await;
                if let Some(task) = s.task_mut(task_id) {
                    task.set_patch(patch);
                    if let Err(e) = task.advance(TaskStatus::Validated) {
                        warn!("{}", e);
                    }
                }
                debug!("Task {} validated on attempt {}", task_id, attempt + 1);
                return;
            }
            Err(failure) => {
                warn!(
                    "Task {} attempt {} failed: {}",
                    task_id,
                    attempt + 1,
                    failure.reason()
                );
                if matches!(failure, AttemptFailure::TaskGone) {
                    // invalidated elsewhere; its terminal state is already set
                    return;
                }
                let exhausted = attempt >= max_retries;
                if !failure.is_retryable() || exhausted {
                    let mut s = session.lock().await;
                    if let Some(task) = s.task_mut(task_id) {
                        let error = match failure {
                            AttemptFailure::Error(e) if !e.is_retryable() => e,
                            other => FixError::RetriesExhausted {
                                attempts: attempt + 1,
                                last: other.reason(),
                            },
                        };
                        task.fail(error);
                    }
                    return;
                }
                attempt += 1;
                let mut s = session.lock().await;
                if let Some(task) = s.task_mut(task_id) {
                    task.attempts = attempt;
                    // a new attempt discards the previous patch
                    task.clear_patch();
                }
            }
        }
    }
}

/// One full context -> prompt -> inference -> parse -> validate attempt
#[allow(clippy::too_many_arguments)]
async fn attempt_once(
    session: &SharedSession,
    task_id: Uuid,
    violation: &Violation,
    source: &Arc<String>,
    baseline: &HashMap<String, usize>,
    config: &Config,
    lane: &InferenceLane,
    attempt: u32,
    file_line_count: u32,
) -> Result<Patch, AttemptFailure> {
    let opts = ContextOptions::from_config(&config.pipeline);
    let window = context::build(violation, source, &opts.widened(attempt));
    if !advance(session, task_id, TaskStatus::ContextBuilt, Some(&window)).await {
        return Err(AttemptFailure::TaskGone);
    }

    let prompt_text = prompt::compose(violation, &window, attempt);
    if !advance(session, task_id, TaskStatus::Prompted, None).await {
        return Err(AttemptFailure::TaskGone);
    }

    // the lane serializes this stage across all tasks and sessions
    let raw = lane
        .complete(&prompt_text)
        .await
        .map_err(AttemptFailure::Error)?;
    if !advance(session, task_id, TaskStatus::Generated, None).await {
        return Err(AttemptFailure::TaskGone);
    }

    let patch =
        Patch::parse(task_id, &violation.file, &raw).map_err(AttemptFailure::Error)?;
    patch
        .validate_structure(file_line_count)
        .map_err(AttemptFailure::Error)?;
    let patched = patch.apply(source).map_err(AttemptFailure::Error)?;

    let result = validate_semantics(&patched, violation, &patch, baseline, config, &[])
        .await
        .map_err(AttemptFailure::Error)?;
    if !result.violation_resolved {
        return Err(AttemptFailure::Rejected(format!(
            "patch leaves {} at line {} unresolved",
            violation.rule_id, violation.line
        )));
    }
    if !result.new_violations.is_empty() {
        let first = &result.new_violations[0];
        return Err(AttemptFailure::Rejected(format!(
            "patch introduces {} new violation(s), first: {} at line {}",
            result.new_violations.len(),
            first.rule_id,
            first.line
        )));
    }
    Ok(patch)
}

/// Status transition through the session lock; `false` when the task no
/// longer accepts transitions (invalidated or gone)
async fn advance(
    session: &SharedSession,
    task_id: Uuid,
    status: TaskStatus,
    window: Option<&crate::types::ContextWindow>,
) -> bool {
    let mut s = session.lock().await;
    let Some(task) = s.task_mut(task_id) else {
        return false;
    };
    if task.status().is_terminal() {
        return false;
    }
    if let Some(window) = window {
        task.context = Some(window.clone());
    }
    match task.advance(status) {
        Ok(()) => true,
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// Re-analyze the patched text in a scratch file and judge the result
///
/// `accepted_ranges` are post-patch line ranges already covered by
/// accepted patches this session; diagnostics inside them do not count
/// as new.
pub async fn validate_semantics(
    patched: &str,
    violation: &Violation,
    patch: &Patch,
    baseline: &HashMap<String, usize>,
    config: &Config,
    accepted_ranges: &[(u32, u32)],
) -> Result<ValidationResult, FixError> {
    // same extension so the analyzer picks the same language profile
    let ext = Path::new(&violation.file)
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "c".into());
    let mut scratch = tempfile::Builder::new()
        .prefix("misramend-")
        .suffix(&format!(".{}", ext))
        .tempfile()
        .map_err(|e| FixError::AnalysisUnavailable(format!("scratch file: {}", e)))?;
    scratch
        .write_all(patched.as_bytes())
        .map_err(|e| FixError::AnalysisUnavailable(format!("scratch file: {}", e)))?;
    scratch
        .flush()
        .map_err(|e| FixError::AnalysisUnavailable(format!("scratch file: {}", e)))?;

    let diagnostics = analyzer::extract(scratch.path(), &config.analyzer).await?;

    let mapped_line = patch.map_old_line(violation.line);
    let rewritten = patch.new_ranges();
    let still_present = diagnostics.iter().any(|d| {
        d.rule_id == violation.rule_id
            && (Some(d.line) == mapped_line || in_ranges(d.line, &rewritten))
    });

    // lines shift under a patch, so new-violation detection compares
    // per-rule counts against the pre-patch baseline
    let mut new_violations = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for d in &diagnostics {
        let count = seen.entry(d.rule_id.as_str()).or_insert(0);
        *count += 1;
        let allowed = baseline.get(d.rule_id.as_str()).copied().unwrap_or(0);
        if *count > allowed && !in_ranges(d.line, accepted_ranges) {
            new_violations.push(d.clone());
        }
    }

    Ok(ValidationResult {
        patch_applied: true,
        violation_resolved: !still_present,
        new_violations,
    })
}

/// Diagnostic counts per rule for the baseline comparison
pub fn rule_counts(violations: &[Violation]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for v in violations {
        *counts.entry(v.rule_id.clone()).or_insert(0) += 1;
    }
    counts
}

fn in_ranges(line: u32, ranges: &[(u32, u32)]) -> bool {
    ranges.iter().any(|(start, end)| *start <= line && line <= *end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn violation(line: u32, rule: &str) -> Violation {
        Violation {
            file: "x.c".into(),
            line,
            column: 1,
            rule_id: rule.into(),
            severity: Severity::Style,
            message: "msg".into(),
        }
    }

    #[test]
    fn test_rule_counts() {
        let counts = rule_counts(&[
            violation(1, "misra-c2012-8.4"),
            violation(5, "misra-c2012-8.4"),
            violation(9, "misra-c2012-2.7"),
        ]);
        assert_eq!(counts["misra-c2012-8.4"], 2);
        assert_eq!(counts["misra-c2012-2.7"], 1);
    }

    #[test]
    fn test_in_ranges() {
        assert!(in_ranges(5, &[(2, 6)]));
        assert!(!in_ranges(7, &[(2, 6)]));
        assert!(!in_ranges(1, &[]));
    }

    #[test]
    fn test_attempt_failure_classification() {
        assert!(AttemptFailure::Rejected("still present".into()).is_retryable());
        assert!(AttemptFailure::Error(FixError::MalformedPatch("x".into())).is_retryable());
        assert!(!AttemptFailure::Error(FixError::StaleContext).is_retryable());
        assert!(!AttemptFailure::TaskGone.is_retryable());
    }
}
