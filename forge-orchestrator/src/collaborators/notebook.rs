//! Minimal nbformat model
//!
//! Only the parts the validator and executor read: cell type, tags, source
//! and outputs.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::CellLog;

/// Code cells reported in the execute phase log
pub const MAX_LOGGED_CELLS: usize = 20;
/// Characters kept per cell output
pub const MAX_CELL_OUTPUT: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub cell_type: String,
    #[serde(default)]
    pub metadata: CellMetadata,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub outputs: Vec<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CellMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Cell source, stored either as one string or as a list of lines
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Text(String),
    Lines(Vec<String>),
}

impl Default for Source {
    fn default() -> Self {
        Source::Text(String::new())
    }
}

impl Source {
    pub fn text(&self) -> String {
        match self {
            Source::Text(text) => text.clone(),
            Source::Lines(lines) => lines.concat(),
        }
    }
}

impl Notebook {
    pub fn parse(raw: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(raw).map_err(|e| anyhow::anyhow!("Notebook is not valid JSON: {}", e))
    }

    pub fn cells_tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Cell> + 'a {
        self.cells
            .iter()
            .filter(move |cell| cell.metadata.tags.iter().any(|t| t == tag))
    }

    /// Text outputs of the first code cells, truncated
    pub fn cell_logs(&self) -> Vec<CellLog> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.cell_type == "code")
            .take(MAX_LOGGED_CELLS)
            .map(|(i, cell)| CellLog {
                cell: i,
                output: truncate_chars(&cell.output_text(), MAX_CELL_OUTPUT),
            })
            .collect()
    }
}

impl Cell {
    /// Concatenated `text` / `text/plain` outputs
    pub fn output_text(&self) -> String {
        let mut text = String::new();
        for output in &self.outputs {
            if let Some(chunk) = output.get("text") {
                push_multiline(&mut text, chunk);
            } else if let Some(chunk) = output.get("data").and_then(|d| d.get("text/plain")) {
                push_multiline(&mut text, chunk);
            }
        }
        text
    }
}

fn push_multiline(buf: &mut String, value: &JsonValue) {
    match value {
        JsonValue::String(s) => buf.push_str(s),
        JsonValue::Array(lines) => {
            for line in lines.iter().filter_map(JsonValue::as_str) {
                buf.push_str(line);
            }
        }
        _ => {}
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_forms() {
        let nb: Notebook = serde_json::from_value(json!({
            "cells": [
                { "cell_type": "code", "source": "a = 1" },
                { "cell_type": "code", "source": ["b = 1\n", "c = 2"] }
            ]
        }))
        .unwrap();
        assert_eq!(nb.cells[0].source.text(), "a = 1");
        assert_eq!(nb.cells[1].source.text(), "b = 1\nc = 2");
    }

    #[test]
    fn test_cell_logs_skip_markdown_and_cap() {
        let mut cells = vec![json!({ "cell_type": "markdown", "source": "# Title" })];
        for i in 0..25 {
            cells.push(json!({
                "cell_type": "code",
                "source": "print(x)",
                "outputs": [
                    { "output_type": "stream", "text": ["line ", i.to_string()] },
                    { "output_type": "execute_result", "data": { "text/plain": "x".repeat(3000) } }
                ]
            }));
        }
        let nb: Notebook = serde_json::from_value(json!({ "cells": cells })).unwrap();

        let logs = nb.cell_logs();
        assert_eq!(logs.len(), MAX_LOGGED_CELLS);
        assert_eq!(logs[0].cell, 1);
        assert!(logs[0].output.starts_with("line 0x"));
        assert_eq!(logs[0].output.chars().count(), MAX_CELL_OUTPUT);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 5), "hi");
    }
}
