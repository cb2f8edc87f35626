/// Rule text for the MISRA diagnostics cppcheck's addon emits most often.
///
/// The analyzer message alone is often a terse paraphrase; prompts read
/// better when the actual rule wording is available. Unknown ids fall
/// back to the diagnostic message.
const MISRA_C2012: &[(&str, &str)] = &[
    ("2.2", "There shall be no dead code"),
    ("2.7", "There should be no unused parameters in functions"),
    (
        "8.4",
        "A compatible declaration shall be visible when an object or function with external linkage is defined",
    ),
    (
        "8.7",
        "Functions and objects should not be defined with external linkage if they are referenced in only one translation unit",
    ),
    (
        "10.1",
        "Operands shall not be of an inappropriate essential type",
    ),
    (
        "10.3",
        "The value of an expression shall not be assigned to an object with a narrower essential type or of a different essential type category",
    ),
    (
        "10.4",
        "Both operands of an operator in which the usual arithmetic conversions are performed shall have the same essential type category",
    ),
    (
        "11.9",
        "The macro NULL shall be the only permitted form of integer null pointer constant",
    ),
    (
        "12.1",
        "The precedence of operators within expressions should be made explicit",
    ),
    (
        "13.4",
        "The result of an assignment operator should not be used",
    ),
    (
        "14.4",
        "The controlling expression of an if statement and the controlling expression of an iteration-statement shall have essentially Boolean type",
    ),
    (
        "15.5",
        "A function should have a single point of exit at the end",
    ),
    (
        "15.6",
        "The body of an iteration-statement or a selection-statement shall be a compound-statement",
    ),
    (
        "16.4",
        "Every switch statement shall have a default label",
    ),
    (
        "17.7",
        "The value returned by a function having non-void return type shall be used",
    ),
    (
        "21.6",
        "The Standard Library input/output functions shall not be used",
    ),
];

/// Human-readable display name, e.g. `MISRA C:2012 Rule 8.4`
pub fn display_name(rule_id: &str) -> String {
    if let Some(number) = rule_number(rule_id) {
        if rule_id.contains("c2012") {
            return format!("MISRA C:2012 Rule {}", number);
        }
        if rule_id.contains("cpp") {
            return format!("MISRA C++ Rule {}", number);
        }
    }
    rule_id.to_string()
}

/// Catalog rule text for a cppcheck MISRA id, if known
pub fn describe(rule_id: &str) -> Option<&'static str> {
    let number = rule_number(rule_id)?;
    if !rule_id.contains("c2012") {
        return None;
    }
    MISRA_C2012
        .iter()
        .find(|(id, _)| *id == number)
        .map(|(_, text)| *text)
}

/// Trailing `<major>.<minor>` of ids like `misra-c2012-8.4`
fn rule_number(rule_id: &str) -> Option<&str> {
    let tail = rule_id.rsplit('-').next()?;
    let mut parts = tail.split('.');
    let major = parts.next()?;
    let minor = parts.next()?;
    if parts.next().is_none()
        && !major.is_empty()
        && !minor.is_empty()
        && major.chars().all(|c| c.is_ascii_digit())
        && minor.chars().all(|c| c.is_ascii_digit())
    {
        Some(tail)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_known_profile() {
        assert_eq!(
            display_name("misra-c2012-8.4"),
            "MISRA C:2012 Rule 8.4"
        );
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        assert_eq!(display_name("nullPointer"), "nullPointer");
    }

    #[test]
    fn test_describe_known_rule() {
        assert!(describe("misra-c2012-16.4").unwrap().contains("default label"));
    }

    #[test]
    fn test_describe_unknown_rule() {
        assert!(describe("misra-c2012-99.9").is_none());
        assert!(describe("uninitvar").is_none());
    }

    #[test]
    fn test_rule_number_extraction() {
        assert_eq!(rule_number("misra-c2012-10.4"), Some("10.4"));
        assert_eq!(rule_number("misra-c2012-10"), None);
        assert_eq!(rule_number("style"), None);
    }
}
