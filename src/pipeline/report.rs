use crate::pipeline::session::SessionState;
use crate::rule;
use crate::task::TaskStatus;
use tracing::info;

/// Format a finished session as Markdown
pub fn format_markdown(session: &SessionState) -> String {
    if session.tasks.is_empty() {
        return format!("No MISRA violations found in {}", session.file_name);
    }

    let mut output = String::new();
    output.push_str(&format!("# Remediation results for {}\n\n", session.file_name));
    for task in &session.tasks {
        let v = &task.violation;
        output.push_str(&format!(
            "## {} at line {}\n\n{}\n\n",
            rule::display_name(&v.rule_id),
            v.line,
            v.message
        ));
        output.push_str(&format!(
            "Status: {:?} (attempt {})\n\n",
            task.status(),
            task.attempts + 1
        ));
        if let Some(window) = &task.context {
            output.push_str(&format!(
                "Context: lines {}-{}\n\n",
                window.start_line, window.end_line
            ));
        }
        if let Some(failure) = task.failure() {
            output.push_str(&format!("**Failure:** {}\n\n", failure));
        }
        if let Some(patch) = task.patch() {
            output.push_str(&format!("```diff\n{}```\n\n", patch.render()));
        }
    }
    output.trim_end().to_string()
}

/// Session results as a JSON value
pub fn to_json(session: &SessionState) -> serde_json::Value {
    let tasks: Vec<serde_json::Value> = session
        .tasks
        .iter()
        .map(|task| {
            serde_json::json!({
                "id": task.id,
                "rule_id": task.violation.rule_id,
                "line": task.violation.line,
                "column": task.violation.column,
                "message": task.violation.message,
                "status": task.status(),
                "attempts": task.attempts,
                "failure": task.failure().map(|e| e.to_string()),
                "patch": task.patch().map(|p| p.render()),
            })
        })
        .collect();
    serde_json::json!({
        "file": session.file_name,
        "phase": session.phase,
        "tasks": tasks,
    })
}

/// Write session results to a .md or .json file
pub fn write_output(path: &str, session: &SessionState) -> anyhow::Result<()> {
    let content = if path.ends_with(".json") {
        serde_json::to_string_pretty(&to_json(session))?
    } else if path.ends_with(".md") {
        format_markdown(session)
    } else {
        anyhow::bail!("Output file must end with .md or .json");
    };

    std::fs::write(path, content)?;
    info!("Results written to {}", path);
    Ok(())
}

/// One-line console summary per task
pub fn print_summary(session: &SessionState) {
    if session.tasks.is_empty() {
        info!("No MISRA violations found in {}", session.file_name);
        return;
    }
    for task in &session.tasks {
        let v = &task.violation;
        match task.failure() {
            Some(failure) => info!(
                "{}:{} {} -> {:?}: {}",
                session.file_name,
                v.line,
                v.rule_id,
                task.status(),
                failure
            ),
            None => info!(
                "{}:{} {} -> {:?}",
                session.file_name,
                v.line,
                v.rule_id,
                task.status()
            ),
        }
    }
    let validated = session
        .tasks
        .iter()
        .filter(|t| t.status() == TaskStatus::Validated)
        .count();
    let applied = session
        .tasks
        .iter()
        .filter(|t| t.status() == TaskStatus::Applied)
        .count();
    info!(
        "{}: {} task(s), {} validated, {} applied",
        session.file_name,
        session.tasks.len(),
        validated,
        applied
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FixError;
    use crate::pipeline::session::SessionPhase;
    use crate::task::RemediationTask;
    use crate::task::hash_source;
    use crate::types::{Severity, Violation};
    use std::path::PathBuf;

    fn session() -> SessionState {
        let source = "int a;\n".to_string();
        let mut s = SessionState::new("x.c".into(), PathBuf::from("x.c"), source.clone());
        let mut task = RemediationTask::new(
            Violation {
                file: "x.c".into(),
                line: 1,
                column: 1,
                rule_id: "misra-c2012-8.4".into(),
                severity: Severity::Style,
                message: "missing declaration".into(),
            },
            hash_source(&source),
        );
        task.fail(FixError::RetriesExhausted {
            attempts: 3,
            last: "no usable patch in model output: no hunks".into(),
        });
        s.tasks.push(task);
        s.phase = SessionPhase::Ready;
        s
    }

    #[test]
    fn test_markdown_includes_failure_reason() {
        let md = format_markdown(&session());
        assert!(md.contains("MISRA C:2012 Rule 8.4"));
        assert!(md.contains("no usable patch"));
    }

    #[test]
    fn test_markdown_empty_session() {
        let mut s = session();
        s.tasks.clear();
        assert!(format_markdown(&s).contains("No MISRA violations"));
    }

    #[test]
    fn test_json_shape() {
        let value = to_json(&session());
        assert_eq!(value["file"], "x.c");
        assert_eq!(value["tasks"][0]["rule_id"], "misra-c2012-8.4");
        assert!(value["tasks"][0]["failure"].as_str().unwrap().contains("3 attempts"));
    }

    #[test]
    fn test_write_output_rejects_unknown_extension() {
        assert!(write_output("results.txt", &session()).is_err());
    }
}
