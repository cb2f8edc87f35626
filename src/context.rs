use crate::config::PipelineConfig;
use crate::types::{ContextWindow, Violation};

/// Sizing knobs for one context window build
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Line radius used when no enclosing block is found
    pub radius: u32,
    /// Character budget for the window text
    pub max_chars: usize,
    /// Extra lines added on both sides (grows with retries)
    pub pad: u32,
}

impl ContextOptions {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            radius: cfg.context_radius,
            max_chars: cfg.max_context_chars,
            pad: 0,
        }
    }

    /// Widen the window for a retry attempt (attempt 0 = first try)
    pub fn widened(&self, attempt: u32) -> Self {
        Self {
            pad: self.radius * attempt,
            ..self.clone()
        }
    }
}

/// Build the repair context for a violation
///
/// Prefers the enclosing top-level block (found by brace scanning; string
/// literals can fool the scan, in which case the radius fallback still
/// yields a usable window). Clips at file boundaries and trims to the
/// character budget by shedding the edge farther from the violation line.
/// Deterministic for identical inputs.
pub fn build(violation: &Violation, source: &str, opts: &ContextOptions) -> ContextWindow {
    let lines: Vec<&str> = source.lines().collect();
    let total = lines.len() as u32;
    if total == 0 {
        return ContextWindow {
            file: violation.file.clone(),
            start_line: 1,
            end_line: 1,
            text: String::new(),
        };
    }

    let vline = violation.line.clamp(1, total);
    let (mut start, mut end) = match enclosing_block(&lines, vline) {
        Some(range) => range,
        None => (vline.saturating_sub(opts.radius), vline + opts.radius),
    };
    start = start.saturating_sub(opts.pad).max(1);
    end = (end + opts.pad).min(total);

    // shrink the edge farther from the violation until under budget
    let char_count = |line: u32| lines[(line - 1) as usize].chars().count() + 1;
    let mut chars: usize = (start..=end).map(char_count).sum();
    while chars > opts.max_chars && start < end {
        if vline - start >= end - vline {
            chars -= char_count(start);
            start += 1;
        } else {
            chars -= char_count(end);
            end -= 1;
        }
    }

    let text = lines[(start - 1) as usize..end as usize].join("\n");
    ContextWindow {
        file: violation.file.clone(),
        start_line: start,
        end_line: end,
        text,
    }
}

/// Find the top-level `{...}` block containing `target`, by brace depth
fn enclosing_block(lines: &[&str], target: u32) -> Option<(u32, u32)> {
    let mut depth: i32 = 0;
    let mut open_line: Option<u32> = None;
    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx as u32 + 1;
        for ch in line.chars() {
            match ch {
                '{' => {
                    if depth == 0 {
                        open_line = Some(line_no);
                    }
                    depth += 1;
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(open) = open_line {
                            if open <= target && target <= line_no {
                                // include the signature line above the brace
                                let start = open.saturating_sub(1).max(1);
                                return Some((start, line_no));
                            }
                        }
                        open_line = None;
                    }
                }
                _ => {}
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn violation(line: u32) -> Violation {
        Violation {
            file: "a.c".into(),
            line,
            column: 1,
            rule_id: "misra-c2012-8.4".into(),
            severity: Severity::Style,
            message: "msg".into(),
        }
    }

    fn opts() -> ContextOptions {
        ContextOptions {
            radius: 3,
            max_chars: 4000,
            pad: 0,
        }
    }

    const SRC: &str = "#include <stdio.h>\n\
                       \n\
                       static int helper(int x)\n\
                       {\n\
                           int y = x * 2;\n\
                           return y;\n\
                       }\n\
                       \n\
                       int main(void)\n\
                       {\n\
                           printf(\"%d\", helper(3));\n\
                           return 0;\n\
                       }\n";

    #[test]
    fn test_enclosing_function_is_preferred() {
        let w = build(&violation(5), SRC, &opts());
        assert_eq!(w.start_line, 3);
        assert_eq!(w.end_line, 7);
        assert!(w.text.contains("static int helper"));
        assert!(!w.text.contains("int main"));
    }

    #[test]
    fn test_fallback_radius_outside_any_block() {
        let w = build(&violation(1), SRC, &opts());
        assert_eq!(w.start_line, 1);
        assert_eq!(w.end_line, 4);
    }

    #[test]
    fn test_clips_at_file_end() {
        let w = build(&violation(13), SRC, &opts());
        assert_eq!(w.end_line, 13);
    }

    #[test]
    fn test_deterministic() {
        let a = build(&violation(5), SRC, &opts());
        let b = build(&violation(5), SRC, &opts());
        assert_eq!(a, b);
    }

    #[test]
    fn test_budget_sheds_far_edge_first() {
        let mut tight = opts();
        tight.max_chars = 40;
        let w = build(&violation(5), SRC, &tight);
        assert!(w.start_line <= 5 && 5 <= w.end_line);
        assert!(w.text.chars().count() <= 40 + 1);
        assert!(w.end_line - w.start_line < 4);
    }

    #[test]
    fn test_widened_grows_window() {
        let base = build(&violation(5), SRC, &opts());
        let wide = build(&violation(5), SRC, &opts().widened(2));
        assert!(wide.start_line <= base.start_line);
        assert!(wide.end_line >= base.end_line);
        assert!(wide.end_line - wide.start_line > base.end_line - base.start_line);
    }

    #[test]
    fn test_empty_file() {
        let w = build(&violation(10), "", &opts());
        assert_eq!(w.start_line, 1);
        assert_eq!(w.end_line, 1);
        assert!(w.text.is_empty());
    }
}
