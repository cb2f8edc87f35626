use crate::error::FixError;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::trace;
use uuid::Uuid;

/// One contiguous block of replaced lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// First affected line in the original file (1-indexed; for a pure
    /// insertion this is the line the new text goes after, 0 = top)
    pub old_start: u32,
    /// Lines removed from the original
    pub old_lines: u32,
    /// First affected line in the patched file
    pub new_start: u32,
    /// Lines present after the patch
    pub new_lines: u32,
    /// Body with the ` `/`-`/`+` prefix retained on every line
    pub lines: Vec<String>,
}

impl Hunk {
    /// One past the last original line this hunk touches
    pub fn old_end_exclusive(&self) -> u32 {
        self.old_start + self.old_lines.max(1)
    }
}

/// A model-generated patch bound to one task and one file
#[derive(Debug, Clone)]
pub struct Patch {
    pub task_id: Uuid,
    pub file: String,
    pub hunks: Vec<Hunk>,
    /// Unmodified model output the hunks were read from
    pub raw: String,
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk regex")
    })
}

impl Patch {
    /// Extract hunks from raw model output
    ///
    /// Tolerates code fences and prose around the diff. Any file header
    /// naming a path other than `expected_file` is fatal: a
    /// single-violation prompt never justifies cross-file edits.
    pub fn parse(task_id: Uuid, expected_file: &str, raw: &str) -> Result<Self, FixError> {
        let lines: Vec<&str> = raw.lines().collect();
        let mut hunks: Vec<Hunk> = Vec::new();

        // in-progress hunk plus its remaining declared line counts
        let mut current: Option<(Hunk, u32, u32)> = None;

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            i += 1;

            if let Some((hunk, need_old, need_new)) = current.as_mut() {
                let (prefix, rest) = split_prefix(line);
                let consumes = match prefix {
                    ' ' => *need_old > 0 && *need_new > 0,
                    '-' => *need_old > 0,
                    '+' => *need_new > 0,
                    '\\' => {
                        // "\ No newline at end of file"
                        continue;
                    }
                    _ => false,
                };
                if consumes {
                    match prefix {
                        ' ' => {
                            *need_old -= 1;
                            *need_new -= 1;
                        }
                        '-' => *need_old -= 1,
                        '+' => *need_new -= 1,
                        _ => unreachable!(),
                    }
                    hunk.lines.push(format!("{}{}", prefix, rest));
                    if *need_old == 0 && *need_new == 0 {
                        let (done, _, _) = current.take().expect("current hunk present");
                        hunks.push(done);
                    }
                    continue;
                }
                // body ended before the declared counts were satisfied
                return Err(FixError::MalformedPatch(format!(
                    "hunk truncated before line counts were satisfied (at {:?})",
                    line
                )));
            }

            let trimmed = line.trim();
            if trimmed.starts_with("```") {
                continue;
            }
            if let Some(captures) = hunk_header_re().captures(line) {
                let old_start: u32 = captures[1].parse().unwrap_or(0);
                let old_lines: u32 = captures
                    .get(2)
                    .map(|m| m.as_str().parse().unwrap_or(1))
                    .unwrap_or(1);
                let new_start: u32 = captures[3].parse().unwrap_or(0);
                let new_lines: u32 = captures
                    .get(4)
                    .map(|m| m.as_str().parse().unwrap_or(1))
                    .unwrap_or(1);
                if old_lines == 0 && new_lines == 0 {
                    return Err(FixError::MalformedPatch("empty hunk".into()));
                }
                current = Some((
                    Hunk {
                        old_start,
                        old_lines,
                        new_start,
                        new_lines,
                        lines: Vec::new(),
                    },
                    old_lines,
                    new_lines,
                ));
                continue;
            }
            for path in header_paths(line) {
                check_same_file(expected_file, path)?;
            }
            trace!("Skipping non-diff line: {}", line);
        }

        if current.is_some() {
            return Err(FixError::MalformedPatch("truncated final hunk".into()));
        }
        if hunks.is_empty() {
            return Err(FixError::MalformedPatch(
                "no unified-diff hunks found in model output".into(),
            ));
        }

        hunks.sort_by_key(|h| h.old_start);
        Ok(Self {
            task_id,
            file: expected_file.to_string(),
            hunks,
            raw: raw.to_string(),
        })
    }

    /// Render back to unified-diff text; `parse` of this text yields the
    /// same hunk sequence (round-trip law)
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("--- a/{}\n", self.file));
        out.push_str(&format!("+++ b/{}\n", self.file));
        for hunk in &self.hunks {
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
            ));
            for line in &hunk.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    /// Check bounds and ordering against the current file size
    pub fn validate_structure(&self, file_lines: u32) -> Result<(), FixError> {
        for (i, hunk) in self.hunks.iter().enumerate() {
            let (start, end) = if hunk.old_lines == 0 {
                (hunk.old_start, hunk.old_start)
            } else {
                (hunk.old_start, hunk.old_start + hunk.old_lines - 1)
            };
            let in_bounds = if hunk.old_lines == 0 {
                hunk.old_start <= file_lines
            } else {
                hunk.old_start >= 1 && end <= file_lines
            };
            if !in_bounds {
                return Err(FixError::PatchOutOfBounds {
                    hunk: i,
                    start,
                    end,
                    file_lines,
                });
            }
        }
        check_disjoint(&self.hunks)?;
        Ok(())
    }

    /// Apply in memory against the snapshot text; never touches disk
    pub fn apply(&self, source: &str) -> Result<String, FixError> {
        apply_hunks(&self.hunks, source)
    }

    /// Map a line of the original file to its post-patch line number;
    /// `None` when the patch removed or replaced it
    pub fn map_old_line(&self, old_line: u32) -> Option<u32> {
        let mut offset: i64 = 0;
        for hunk in &self.hunks {
            if hunk.old_lines > 0 && old_line >= hunk.old_start {
                let end = hunk.old_start + hunk.old_lines;
                if old_line < end {
                    // inside the hunk: walk the body for an exact answer
                    let mut o = hunk.old_start;
                    let mut n = hunk.new_start;
                    for body in &hunk.lines {
                        match body.chars().next() {
                            Some(' ') => {
                                if o == old_line {
                                    return Some(n);
                                }
                                o += 1;
                                n += 1;
                            }
                            Some('-') => {
                                if o == old_line {
                                    return None;
                                }
                                o += 1;
                            }
                            Some('+') => n += 1,
                            _ => {}
                        }
                    }
                    return None;
                }
            }
            if old_line >= hunk.old_end_exclusive() {
                offset += hunk.new_lines as i64 - hunk.old_lines as i64;
            }
        }
        u32::try_from(old_line as i64 + offset).ok()
    }

    /// Post-patch line ranges this patch rewrote (inclusive)
    pub fn new_ranges(&self) -> Vec<(u32, u32)> {
        self.hunks
            .iter()
            .filter(|h| h.new_lines > 0)
            .map(|h| (h.new_start, h.new_start + h.new_lines - 1))
            .collect()
    }
}

/// Apply several validated patches against one snapshot in a single
/// ascending sweep, so every hunk's line numbers stay valid
pub fn apply_all(patches: &[&Patch], source: &str) -> Result<String, FixError> {
    let mut hunks: Vec<Hunk> = patches
        .iter()
        .flat_map(|p| p.hunks.iter().cloned())
        .collect();
    hunks.sort_by_key(|h| h.old_start);
    check_disjoint(&hunks)?;
    apply_hunks(&hunks, source)
}

fn check_disjoint(hunks: &[Hunk]) -> Result<(), FixError> {
    for (i, pair) in hunks.windows(2).enumerate() {
        if pair[1].old_start < pair[0].old_end_exclusive() {
            return Err(FixError::PatchOverlap {
                first: i,
                second: i + 1,
            });
        }
    }
    Ok(())
}

fn apply_hunks(hunks: &[Hunk], source: &str) -> Result<String, FixError> {
    let had_trailing_newline = source.ends_with('\n');
    let lines: Vec<&str> = source.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut cursor: usize = 0;

    for hunk in hunks {
        let target = if hunk.old_lines == 0 {
            hunk.old_start as usize
        } else {
            (hunk.old_start - 1) as usize
        };
        if target < cursor || target > lines.len() {
            return Err(FixError::MalformedPatch(format!(
                "hunk at line {} cannot be placed",
                hunk.old_start
            )));
        }
        out.extend(lines[cursor..target].iter().map(|s| s.to_string()));
        cursor = target;

        for body in &hunk.lines {
            let (prefix, rest) = split_prefix(body);
            match prefix {
                ' ' | '-' => {
                    let Some(original) = lines.get(cursor) else {
                        return Err(FixError::MalformedPatch(format!(
                            "hunk runs past end of file at line {}",
                            cursor + 1
                        )));
                    };
                    if *original != rest {
                        return Err(FixError::MalformedPatch(format!(
                            "context mismatch at line {}: expected {:?}, found {:?}",
                            cursor + 1,
                            rest,
                            original
                        )));
                    }
                    if prefix == ' ' {
                        out.push(rest.to_string());
                    }
                    cursor += 1;
                }
                '+' => out.push(rest.to_string()),
                _ => {}
            }
        }
    }
    out.extend(lines[cursor..].iter().map(|s| s.to_string()));

    let mut result = out.join("\n");
    // match the snapshot's trailing-newline convention
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

/// Split a diff body line into its marker and payload; a bare empty
/// line inside a hunk is an empty context line
fn split_prefix(line: &str) -> (char, &str) {
    if line.is_empty() {
        return (' ', "");
    }
    let prefix = line.chars().next().unwrap_or(' ');
    match prefix {
        ' ' | '-' | '+' | '\\' => (prefix, &line[1..]),
        _ => ('?', line),
    }
}

/// Paths named by a diff header line, if it is one
fn header_paths(line: &str) -> Vec<&str> {
    if let Some(rest) = line.strip_prefix("diff --git ") {
        return rest.split_whitespace().collect();
    }
    for marker in ["--- ", "+++ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            // drop a trailing timestamp column
            let path = rest.split('\t').next().unwrap_or(rest).trim();
            if path == "/dev/null" {
                return Vec::new();
            }
            return vec![path];
        }
    }
    if let Some(rest) = line.strip_prefix("Index: ") {
        return vec![rest.trim()];
    }
    Vec::new()
}

fn check_same_file(expected: &str, found: &str) -> Result<(), FixError> {
    let stripped = found
        .strip_prefix("a/")
        .or_else(|| found.strip_prefix("b/"))
        .unwrap_or(found);
    if stripped == expected {
        return Ok(());
    }
    let expected_name = Path::new(expected).file_name();
    let found_name = Path::new(stripped).file_name();
    if expected_name.is_some() && expected_name == found_name {
        return Ok(());
    }
    Err(FixError::MultiFileDiff(found.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "int a;\nint b;\nint c;\nint d;\nint e;\n";

    fn one_hunk_diff() -> String {
        "--- a/x.c\n\
         +++ b/x.c\n\
         @@ -2,2 +2,2 @@\n\
         -int b;\n\
         +int b = 0;\n\
         \u{20}int c;\n"
            .to_string()
    }

    #[test]
    fn test_parse_single_hunk() {
        let patch = Patch::parse(Uuid::nil(), "x.c", &one_hunk_diff()).unwrap();
        assert_eq!(patch.hunks.len(), 1);
        let h = &patch.hunks[0];
        assert_eq!((h.old_start, h.old_lines, h.new_start, h.new_lines), (2, 2, 2, 2));
        assert_eq!(h.lines, vec!["-int b;", "+int b = 0;", " int c;"]);
    }

    #[test]
    fn test_parse_tolerates_fences_and_prose() {
        let raw = format!(
            "Here is the patch you asked for:\n```diff\n{}```\nHope this helps!",
            one_hunk_diff()
        );
        let patch = Patch::parse(Uuid::nil(), "x.c", &raw).unwrap();
        assert_eq!(patch.hunks.len(), 1);
    }

    #[test]
    fn test_parse_prose_only_is_malformed() {
        let err = Patch::parse(Uuid::nil(), "x.c", "I cannot produce a patch.").unwrap_err();
        assert!(matches!(err, FixError::MalformedPatch(_)));
    }

    #[test]
    fn test_parse_truncated_hunk_is_malformed() {
        let raw = "@@ -2,2 +2,2 @@\n-int b;\n";
        let err = Patch::parse(Uuid::nil(), "x.c", raw).unwrap_err();
        assert!(matches!(err, FixError::MalformedPatch(_)));
    }

    #[test]
    fn test_parse_foreign_file_is_multi_file() {
        let raw = "--- a/other.c\n+++ b/other.c\n@@ -1,1 +1,1 @@\n-x\n+y\n";
        let err = Patch::parse(Uuid::nil(), "x.c", raw).unwrap_err();
        assert_eq!(err, FixError::MultiFileDiff("a/other.c".to_string()));
    }

    #[test]
    fn test_parse_accepts_absolute_path_to_same_name() {
        let raw = "--- /tmp/work/x.c\n+++ /tmp/work/x.c\n@@ -1,1 +1,1 @@\n-int a;\n+int a2;\n";
        assert!(Patch::parse(Uuid::nil(), "x.c", raw).is_ok());
    }

    #[test]
    fn test_round_trip() {
        let patch = Patch::parse(Uuid::nil(), "x.c", &one_hunk_diff()).unwrap();
        let reparsed = Patch::parse(Uuid::nil(), "x.c", &patch.render()).unwrap();
        assert_eq!(patch.hunks, reparsed.hunks);
        assert_eq!(patch.file, reparsed.file);
    }

    #[test]
    fn test_validate_in_bounds() {
        let patch = Patch::parse(Uuid::nil(), "x.c", &one_hunk_diff()).unwrap();
        assert!(patch.validate_structure(5).is_ok());
    }

    #[test]
    fn test_validate_out_of_bounds() {
        let raw = "@@ -9,2 +9,2 @@\n-int b;\n+int b = 0;\n int c;\n";
        let patch = Patch::parse(Uuid::nil(), "x.c", raw).unwrap();
        let err = patch.validate_structure(5).unwrap_err();
        assert!(matches!(err, FixError::PatchOutOfBounds { .. }));
    }

    #[test]
    fn test_validate_overlap() {
        let raw = "@@ -1,3 +1,3 @@\n-int a;\n+int a1;\n int b;\n int c;\n\
                   @@ -2,2 +2,2 @@\n-int b;\n+int b1;\n int c;\n";
        let patch = Patch::parse(Uuid::nil(), "x.c", raw).unwrap();
        let err = patch.validate_structure(5).unwrap_err();
        assert!(matches!(err, FixError::PatchOverlap { .. }));
    }

    #[test]
    fn test_apply_replacement() {
        let patch = Patch::parse(Uuid::nil(), "x.c", &one_hunk_diff()).unwrap();
        let patched = patch.apply(SOURCE).unwrap();
        assert_eq!(patched, "int a;\nint b = 0;\nint c;\nint d;\nint e;\n");
    }

    #[test]
    fn test_apply_context_mismatch() {
        let patch = Patch::parse(Uuid::nil(), "x.c", &one_hunk_diff()).unwrap();
        let drifted = "int a;\nint CHANGED;\nint c;\nint d;\nint e;\n";
        let err = patch.apply(drifted).unwrap_err();
        assert!(matches!(err, FixError::MalformedPatch(_)));
    }

    #[test]
    fn test_apply_preserves_missing_trailing_newline() {
        let patch = Patch::parse(Uuid::nil(), "x.c", &one_hunk_diff()).unwrap();
        let no_newline = "int a;\nint b;\nint c;\nint d;\nint e;";
        let patched = patch.apply(no_newline).unwrap();
        assert!(!patched.ends_with('\n'));
    }

    #[test]
    fn test_apply_insertion_hunk() {
        let raw = "@@ -0,0 +1,1 @@\n+#include <stdint.h>\n";
        let patch = Patch::parse(Uuid::nil(), "x.c", raw).unwrap();
        assert!(patch.validate_structure(5).is_ok());
        let patched = patch.apply(SOURCE).unwrap();
        assert!(patched.starts_with("#include <stdint.h>\nint a;\n"));
    }

    #[test]
    fn test_apply_all_merges_ascending() {
        let p1 = Patch::parse(
            Uuid::nil(),
            "x.c",
            "@@ -4,1 +4,1 @@\n-int d;\n+int d = 4;\n",
        )
        .unwrap();
        let p2 = Patch::parse(
            Uuid::nil(),
            "x.c",
            "@@ -1,1 +1,1 @@\n-int a;\n+int a = 1;\n",
        )
        .unwrap();
        // deliberately passed out of order
        let merged = apply_all(&[&p1, &p2], SOURCE).unwrap();
        assert_eq!(merged, "int a = 1;\nint b;\nint c;\nint d = 4;\nint e;\n");
    }

    #[test]
    fn test_apply_all_rejects_overlapping_patches() {
        let p1 = Patch::parse(Uuid::nil(), "x.c", "@@ -2,2 +2,2 @@\n-int b;\n+int B;\n int c;\n")
            .unwrap();
        let p2 = Patch::parse(Uuid::nil(), "x.c", "@@ -3,1 +3,1 @@\n-int c;\n+int C;\n").unwrap();
        let err = apply_all(&[&p1, &p2], SOURCE).unwrap_err();
        assert!(matches!(err, FixError::PatchOverlap { .. }));
    }

    #[test]
    fn test_map_old_line() {
        // replaces line 2 with two lines
        let raw = "@@ -2,1 +2,2 @@\n-int b;\n+int b0;\n+int b1;\n";
        let patch = Patch::parse(Uuid::nil(), "x.c", raw).unwrap();
        assert_eq!(patch.map_old_line(1), Some(1));
        assert_eq!(patch.map_old_line(2), None);
        assert_eq!(patch.map_old_line(3), Some(4));
    }

    #[test]
    fn test_new_ranges() {
        let patch = Patch::parse(Uuid::nil(), "x.c", &one_hunk_diff()).unwrap();
        assert_eq!(patch.new_ranges(), vec![(2, 3)]);
    }
}
