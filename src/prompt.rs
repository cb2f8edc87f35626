use crate::rule;
use crate::types::{ContextWindow, Violation};

/// Template revision; bump when the wording or contract changes so that
/// completions generated under an older template are never reused.
pub const PROMPT_VERSION: &str = "v3";

/// Render the instruction prompt for one remediation attempt
///
/// Pure function of its inputs: same violation, window, and attempt
/// always produce the same text.
pub fn compose(violation: &Violation, window: &ContextWindow, attempt: u32) -> String {
    let is_c = violation.file.to_lowercase().ends_with(".c");
    let (expert, standard) = if is_c {
        ("C expert", "MISRA C:2012")
    } else {
        ("C++ expert", "MISRA C++")
    };

    let rule_name = rule::display_name(&violation.rule_id);
    let rule_section = match rule::describe(&violation.rule_id) {
        Some(text) => format!("Rule: {}\n{}\n", rule_name, text),
        None => format!("Rule: {}\n", rule_name),
    };

    let retry_section = if attempt > 0 {
        "A previous patch for this diagnostic was rejected by validation. \
         Produce a corrected patch.\n\n"
    } else {
        ""
    };

    format!(
        "You are a {expert} specializing in {standard} compliance. [template {version}]\n\n\
         {rule_section}\n\
         Diagnostic at {file}:{line}:{column}:\n{message}\n\n\
         {retry_section}\
         Source excerpt, lines {start}-{end} of {file}:\n\
         ```\n{text}\n```\n\n\
         Respond with exactly one unified diff patch that fixes this single \
         diagnostic. Requirements:\n\
         - Patch only {file}; never reference another file.\n\
         - Keep every change inside lines {start}-{end}.\n\
         - Use `@@ -a,b +c,d @@` hunk headers with line numbers of the \
         original file.\n\
         - Output the diff and nothing else: no prose, no rationale.\n",
        expert = expert,
        standard = standard,
        version = PROMPT_VERSION,
        rule_section = rule_section,
        file = violation.file,
        line = violation.line,
        column = violation.column,
        message = violation.message,
        retry_section = retry_section,
        start = window.start_line,
        end = window.end_line,
        text = window.text,
    )
}
