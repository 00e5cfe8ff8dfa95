//! Command vocabulary of the external engine.
//!
//! The engine's parser is the contract here: every command is emitted
//! byte-for-byte in the form the engine expects. String literals use SQL
//! single quotes with embedded quotes doubled, and nothing else is rewritten.

use std::fmt::Write as _;
use std::path::Path;

use crate::config::{BufferBounds, TableSchema};
use crate::schema::EngineKind;

pub const NODES_TABLE: &str = "nodes";
pub const EDGES_TABLE: &str = "edges";

/// Column name every exported frontier artifact carries.
pub const NODE_ID_COLUMN: &str = "node_id";

/// Double embedded single quotes.
pub fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Wrap as a quoted SQL string literal.
pub fn quote(s: &str) -> String {
    format!("'{}'", escape_literal(s))
}

/// `CREATE TABLE <table> AS SELECT * FROM read_csv_auto('<path>');`
pub fn create_table_from_file(table: &str, path: &Path) -> String {
    format!(
        "CREATE TABLE {} AS SELECT * FROM read_csv_auto({});",
        table,
        quote(&path.to_string_lossy())
    )
}

/// `call gpu_buffer_init('<min>', '<max>');`
pub fn buffer_init(bounds: &BufferBounds) -> String {
    format!(
        "call gpu_buffer_init({}, {});",
        quote(&bounds.min),
        quote(&bounds.max)
    )
}

/// `call gpu_processing('<query>');`
pub fn accelerated(query: &str) -> String {
    format!("call gpu_processing({});", quote(query))
}

/// `COPY (<query>) TO '<path>' (HEADER, DELIMITER ',');`
pub fn export(query: &str, path: &Path) -> String {
    format!(
        "COPY ({}) TO {} (HEADER, DELIMITER ',');",
        query,
        quote(&path.to_string_lossy())
    )
}

pub fn quit() -> &'static str {
    ".quit"
}

pub fn timer_on() -> &'static str {
    ".timer on"
}

/// `.print '=== <label> ==='`
pub fn print_label(label: &str) -> String {
    format!(".print {}", quote(&section_marker(label)))
}

/// The text a `.print` label produces on stdout.
pub fn section_marker(label: &str) -> String {
    format!("=== {} ===", label)
}

/// Result rows as bare CSV lines, one per row, no header.
pub fn csv_output_mode() -> [&'static str; 2] {
    [".mode csv", ".headers off"]
}

/// The timed statement for one query on the given engine.
pub fn run_query(engine: EngineKind, query: &str) -> String {
    if engine.accelerated() {
        accelerated(query)
    } else {
        format!("{};", query)
    }
}

/// Ids of every node whose label equals `label`, ascending.
pub fn seed_query(schema: &TableSchema, label: &str) -> String {
    format!(
        "SELECT {id} AS {out} FROM {nodes} WHERE {label_col} = {label} ORDER BY {id}",
        id = schema.node_id,
        out = NODE_ID_COLUMN,
        nodes = NODES_TABLE,
        label_col = schema.node_label,
        label = quote(label),
    )
}

/// Distinct one-edge successors of the given frontier.
pub fn neighbor_query(schema: &TableSchema, frontier: &[u64]) -> String {
    let mut in_list = String::with_capacity(frontier.len() * 8);
    for (i, id) in frontier.iter().enumerate() {
        if i > 0 {
            in_list.push(',');
        }
        let _ = write!(in_list, "{}", id);
    }
    format!(
        "SELECT DISTINCT {dst} AS {out} FROM {edges} WHERE {src} IN ({list})",
        dst = schema.edge_dst,
        out = NODE_ID_COLUMN,
        edges = EDGES_TABLE,
        src = schema.edge_src,
        list = in_list,
    )
}

/// Script fragment that loads both tables and, for the accelerated engine,
/// allocates the accelerator buffer.
#[derive(Debug, Clone)]
pub struct InitScript {
    lines: Vec<String>,
}

impl InitScript {
    pub fn new(engine: EngineKind, nodes: &Path, edges: &Path, buffer: &BufferBounds) -> Self {
        let mut lines = vec![
            create_table_from_file(NODES_TABLE, nodes),
            create_table_from_file(EDGES_TABLE, edges),
        ];
        if engine.accelerated() {
            lines.push(buffer_init(buffer));
        }
        Self { lines }
    }

    /// Arbitrary pre-built lines, mostly for tests and custom engines.
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}
