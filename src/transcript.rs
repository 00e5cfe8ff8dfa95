//! Parsing of captured batch output.
//!
//! Scripts built with labels print `=== <LABEL> ===` before each timed command.
//! Everything up to the next marker belongs to that command: its result rows
//! (CSV mode, no header) and, with the timer enabled, one
//! `Run Time (s): real <secs> ...` line.

use crate::fallback::FallbackMatcher;

const RUN_TIME_PREFIX: &str = "Run Time (s):";

/// Output attributed to one labelled command.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub label: String,
    pub rows: u64,
    /// Sum of engine-reported `real` seconds within the section.
    pub reported_secs: Option<f64>,
    pub fallbacks: usize,
}

/// Split stdout into labelled sections. Output before the first marker is ignored.
pub fn parse_sections(stdout: &str, matcher: &dyn FallbackMatcher) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();

    for line in stdout.lines() {
        let trimmed = line.trim();
        if let Some(label) = marker_label(trimmed) {
            sections.push(Section {
                label: label.to_string(),
                rows: 0,
                reported_secs: None,
                fallbacks: 0,
            });
            continue;
        }
        let Some(current) = sections.last_mut() else {
            continue;
        };
        if trimmed.is_empty() {
            continue;
        }
        if let Some(secs) = parse_run_time(trimmed) {
            current.reported_secs = Some(current.reported_secs.unwrap_or(0.0) + secs);
            continue;
        }
        if matcher.is_marker_line(trimmed) {
            current.fallbacks += matcher.count(trimmed);
            continue;
        }
        current.rows += 1;
    }

    sections
}

/// Find a section by label.
pub fn section<'a>(sections: &'a [Section], label: &str) -> Option<&'a Section> {
    sections.iter().find(|s| s.label == label)
}

fn marker_label(line: &str) -> Option<&str> {
    line.strip_prefix("=== ")
        .and_then(|rest| rest.strip_suffix(" ==="))
        .map(str::trim)
}

/// `Run Time (s): real 0.123 user 0.100000 sys 0.020000` -> `0.123`
pub fn parse_run_time(line: &str) -> Option<f64> {
    let rest = line.strip_prefix(RUN_TIME_PREFIX)?;
    let mut tokens = rest.split_whitespace();
    while let Some(tok) = tokens.next() {
        if tok == "real" {
            return tokens.next().and_then(|v| v.parse::<f64>().ok());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::SubstringMatcher;

    fn matcher() -> SubstringMatcher {
        SubstringMatcher::new(["Error in GPUExecuteQuery"])
    }

    #[test]
    fn run_time_line() {
        assert_eq!(parse_run_time("Run Time (s): real 0.250 user 0.1 sys 0.0"), Some(0.25));
        assert_eq!(parse_run_time("Run Time (s): user 0.1"), None);
        assert_eq!(parse_run_time("1,2"), None);
    }

    #[test]
    fn sections_count_rows_and_times() {
        let out = "\
noise before any marker
=== WARMUP ===
1,a
2,b
Run Time (s): real 0.500 user 0.4 sys 0.0
=== QUERY 1 ===
1,a
2,b
3,c
Run Time (s): real 0.100 user 0.1 sys 0.0
=== QUERY 2 ===
Error in GPUExecuteQuery: unsupported
1,a
Run Time (s): real 0.900 user 0.1 sys 0.0
";
        let s = parse_sections(out, &matcher());
        assert_eq!(s.len(), 3);
        assert_eq!(s[0].label, "WARMUP");
        assert_eq!(s[0].rows, 2);
        assert_eq!(s[1].rows, 3);
        assert_eq!(s[1].reported_secs, Some(0.1));
        assert_eq!(s[2].rows, 1);
        assert_eq!(s[2].fallbacks, 1);
        assert_eq!(section(&s, "QUERY 2").unwrap().reported_secs, Some(0.9));
        assert!(section(&s, "QUERY 3").is_none());
    }

    #[test]
    fn no_markers_no_sections() {
        assert!(parse_sections("1\n2\n", &matcher()).is_empty());
    }
}
