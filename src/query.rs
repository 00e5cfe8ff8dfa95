//! Named query definitions loaded from `<query_dir>/<dialect>/<name>.sql`.

use std::path::{Path, PathBuf};

use crate::error::{BenchError, Result};
use crate::schema::EngineKind;

/// Lines starting with this marker (after leading whitespace) are dropped.
pub const COMMENT_MARKER: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDef {
    pub name: String,
    /// Query body with comments, blank lines and the trailing `;` removed.
    pub body: String,
}

impl QueryDef {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            body: strip_comments(text),
        }
    }

    pub fn path(query_dir: &Path, engine: EngineKind, name: &str) -> PathBuf {
        query_dir
            .join(engine.query_dialect())
            .join(format!("{}.sql", name))
    }

    /// Load the named query for an engine.
    pub fn load(query_dir: &Path, engine: EngineKind, name: &str) -> Result<Self> {
        let path = Self::path(query_dir, engine, name);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            BenchError::Config(format!("failed to read query {}: {}", path.display(), e))
        })?;
        let def = Self::new(name, &text);
        if def.body.is_empty() {
            return Err(BenchError::Config(format!(
                "query {} is empty after stripping comments",
                path.display()
            )));
        }
        Ok(def)
    }
}

/// Drop comment and blank lines, trim, and remove one trailing `;`.
pub fn strip_comments(text: &str) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with(COMMENT_MARKER)
        })
        .collect();
    let joined = kept.join("\n");
    let trimmed = joined.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end().to_string()
}
