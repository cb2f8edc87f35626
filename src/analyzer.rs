use crate::config::AnalyzerConfig;
use crate::error::FixError;
use crate::types::{Severity, Violation};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Pipe-separated template keeps diagnostic parsing line-based
const TEMPLATE: &str = "{file}|{line}|{column}|{severity}|{id}|{message}";

/// Run the analyzer on one file and parse its diagnostics
///
/// Stateless: one external process per call, no mutation of the source
/// file. Exit code 0 or 1 is success with or without findings; any other
/// code means the tool itself failed.
pub async fn extract(path: &Path, cfg: &AnalyzerConfig) -> Result<Vec<Violation>, FixError> {
    let mut cmd = Command::new(&cfg.command);
    cmd.arg("--enable=all")
        .arg("--quiet")
        .arg(format!("--template={}", TEMPLATE))
        .args(language_args(path))
        .args(&cfg.extra_args)
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running analyzer on {}", path.display());
    let child = cmd.spawn().map_err(|e| {
        FixError::AnalysisUnavailable(format!("failed to spawn '{}': {}", cfg.command, e))
    })?;

    let timeout = tokio::time::Duration::from_secs(cfg.timeout_secs);
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(FixError::AnalysisUnavailable(format!(
                "failed to wait for '{}': {}",
                cfg.command, e
            )));
        }
        // kill_on_drop reaps the child when the future is dropped
        Err(_) => return Err(FixError::AnalysisTimeout(cfg.timeout_secs)),
    };

    match output.status.code() {
        Some(0) | Some(1) => {}
        code => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FixError::AnalysisUnavailable(format!(
                "'{}' exited with {:?}: {}",
                cfg.command,
                code,
                stderr.lines().next().unwrap_or("")
            )));
        }
    }

    // cppcheck writes diagnostics to stderr
    let stderr = String::from_utf8_lossy(&output.stderr);
    let target_name = path.file_name().map(|n| n.to_string_lossy().to_string());
    let mut violations = Vec::new();
    for line in stderr.lines() {
        let Some(violation) = parse_diagnostic(line) else {
            trace!("Skipping non-diagnostic analyzer line: {}", line);
            continue;
        };
        // headers pulled in via #include can report under other paths
        if let Some(name) = &target_name {
            if Path::new(&violation.file).file_name().map(|n| n.to_string_lossy().to_string())
                != Some(name.clone())
            {
                trace!("Skipping diagnostic for foreign file {}", violation.file);
                continue;
            }
        }
        if cfg.misra_only && !is_misra_rule(&violation.rule_id) {
            continue;
        }
        violations.push(violation);
    }

    Ok(dedupe_and_sort(violations))
}

/// Standard and language flags by extension, MISRA addon always on
fn language_args(path: &Path) -> Vec<&'static str> {
    let is_c = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("c"))
        .unwrap_or(false);
    if is_c {
        vec!["--std=c99", "--language=c", "--addon=misra"]
    } else {
        vec!["--std=c++17", "--language=c++", "--addon=misra"]
    }
}

/// Parse one templated diagnostic line; `None` for anything else
fn parse_diagnostic(line: &str) -> Option<Violation> {
    let mut parts = line.splitn(6, '|');
    let file = parts.next()?.trim();
    let line_no = parts.next()?.trim().parse::<u32>().ok()?;
    let column = parts.next()?.trim().parse::<u32>().unwrap_or(0);
    let severity = parts.next()?.trim();
    let rule_id = parts.next()?.trim();
    let message = parts.next()?.trim();
    if file.is_empty() || rule_id.is_empty() || line_no == 0 {
        return None;
    }
    Some(Violation {
        file: file.to_string(),
        line: line_no,
        column,
        rule_id: rule_id.to_string(),
        severity: Severity::parse(severity),
        message: message.to_string(),
    })
}

pub fn is_misra_rule(rule_id: &str) -> bool {
    rule_id.contains("misra")
}

/// Collapse duplicates on `(file, line, rule_id)` and sort by position
fn dedupe_and_sort(mut violations: Vec<Violation>) -> Vec<Violation> {
    violations.sort_by(|a, b| {
        (a.line, a.column, a.rule_id.as_str()).cmp(&(b.line, b.column, b.rule_id.as_str()))
    });
    let before = violations.len();
    let mut seen = std::collections::HashSet::new();
    violations.retain(|v| {
        seen.insert((v.file.clone(), v.line, v.rule_id.clone()))
    });
    if violations.len() < before {
        warn!(
            "Collapsed {} duplicate diagnostics",
            before - violations.len()
        );
    }
    violations
}

/// Extensions accepted for analysis and upload
pub fn is_supported_source(name: &str) -> bool {
    let lower = name.to_lowercase();
    [".c", ".cpp", ".cc", ".cxx", ".h", ".hpp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}
