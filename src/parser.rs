//! Line-level scanning for the dispatcher: tokens, the trailing background
//! marker, and the structural pipeline / redirection forms that take priority
//! over built-in name matching.

/// Returns the dispatch key: the first whitespace-delimited token.
pub fn first_token(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

/// Splits a line into a trimmed argument vector.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// A trailing `&` (possibly followed by whitespace) requests background
/// execution.
pub fn is_background(line: &str) -> bool {
    line.trim_end().ends_with('&')
}

/// Removes the trailing background marker: `"sleep 5 &"` and `"sleep 5&"`
/// both become `"sleep 5"`.
pub fn strip_background(line: &str) -> String {
    let trimmed = line.trim();
    match trimmed.strip_suffix('&') {
        Some(rest) => rest.trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

/// Exactly one `|` away from either end makes the line a two-stage pipeline.
/// `|&` pipes the left side's stderr instead of its stdout.
pub fn split_pipeline(line: &str) -> Option<(String, String, bool)> {
    let line = line.trim();
    if line.matches('|').count() != 1 || line.starts_with('|') || line.ends_with('|') {
        return None;
    }
    let idx = line.find('|')?;
    let left = line[..idx].trim().to_string();
    let rest = &line[idx + 1..];
    let (right, to_stderr) = match rest.strip_prefix('&') {
        Some(r) => (r, true),
        None => (rest, false),
    };
    Some((left, right.trim().to_string(), to_stderr))
}

/// One or two `>` away from either end make the line a redirection: `>>`
/// appends, a single `>` truncates.
pub fn split_redirect(line: &str) -> Option<(String, String, bool)> {
    let line = line.trim();
    let count = line.matches('>').count();
    if !(count == 1 || count == 2) || line.starts_with('>') || line.ends_with('>') {
        return None;
    }
    if let Some(idx) = line.find(">>") {
        let left = line[..idx].trim().to_string();
        let dest = line[idx + 2..].trim().to_string();
        return Some((left, dest, true));
    }
    let idx = line.find('>')?;
    Some((line[..idx].trim().to_string(), line[idx + 1..].trim().to_string(), false))
}

/// Lines containing wildcards are handed to the system shell interpreter.
pub fn has_wildcard(line: &str) -> bool {
    line.contains('*') || line.contains('?')
}

/// A non-empty string made only of decimal digits.
pub fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple() {
        assert_eq!(tokenize("ls -l"), vec!["ls", "-l"]);
        assert_eq!(tokenize("   kill    -9   1   "), vec!["kill", "-9", "1"]);
    }

    #[test]
    fn test_background_marker() {
        assert!(is_background("sleep 50 &"));
        assert!(is_background("sleep 5&"));
        assert!(is_background("  sleep 5 &   "));
        assert!(!is_background("sleep 50"));
        assert_eq!(strip_background("sleep 50 &"), "sleep 50");
        assert_eq!(strip_background("sleep 5&"), "sleep 5");
        assert_eq!(strip_background("sleep 50"), "sleep 50");
    }

    #[test]
    fn test_split_pipeline() {
        let (left, right, to_stderr) = split_pipeline("cat f | grep x").unwrap();
        assert_eq!(left, "cat f");
        assert_eq!(right, "grep x");
        assert!(!to_stderr);

        let (left, right, to_stderr) = split_pipeline("cat f |& grep x").unwrap();
        assert_eq!(left, "cat f");
        assert_eq!(right, "grep x");
        assert!(to_stderr);
    }

    #[test]
    fn test_split_pipeline_rejects_edges() {
        assert!(split_pipeline("| grep x").is_none());
        assert!(split_pipeline("cat f |").is_none());
        assert!(split_pipeline("a | b | c").is_none());
        assert!(split_pipeline("ls -l").is_none());
    }

    #[test]
    fn test_split_redirect() {
        let (left, dest, append) = split_redirect("echo hi > f.txt").unwrap();
        assert_eq!(left, "echo hi");
        assert_eq!(dest, "f.txt");
        assert!(!append);

        let (left, dest, append) = split_redirect("echo bye >> f.txt").unwrap();
        assert_eq!(left, "echo bye");
        assert_eq!(dest, "f.txt");
        assert!(append);
    }

    #[test]
    fn test_split_redirect_rejects_edges() {
        assert!(split_redirect("> f.txt").is_none());
        assert!(split_redirect("echo hi >").is_none());
        assert!(split_redirect("echo hi").is_none());
    }

    #[test]
    fn test_wildcards_and_digits() {
        assert!(has_wildcard("ls *.rs"));
        assert!(has_wildcard("ls ?.rs"));
        assert!(!has_wildcard("ls -l"));
        assert!(is_all_digits("42"));
        assert!(!is_all_digits(""));
        assert!(!is_all_digits("4x2"));
        assert!(!is_all_digits("-9"));
    }
}
