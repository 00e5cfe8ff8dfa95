//! Detection of silent fallback from the accelerated path.
//!
//! The engine signals a fallback only through free-form log text, which is not
//! a stable contract. Matching is therefore pluggable: callers supply whatever
//! matcher fits the engine build they are measuring.

/// Counts fallback occurrences in captured engine output.
pub trait FallbackMatcher: Send + Sync {
    fn count(&self, output: &str) -> usize;

    fn detected(&self, output: &str) -> bool {
        self.count(output) > 0
    }

    /// True when a single output line is a fallback message rather than data.
    fn is_marker_line(&self, line: &str) -> bool {
        self.count(line) > 0
    }
}

/// Counts non-overlapping occurrences of any configured substring.
#[derive(Debug, Clone, Default)]
pub struct SubstringMatcher {
    markers: Vec<String>,
}

impl SubstringMatcher {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|m: &String| !m.is_empty())
                .collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl FallbackMatcher for SubstringMatcher {
    fn count(&self, output: &str) -> usize {
        self.markers.iter().map(|m| output.matches(m.as_str()).count()).sum()
    }
}
