//! Tag-based notebook validation

use anyhow::Result;

use super::notebook::Notebook;
use super::{NotebookConfig, NotebookValidator};

/// Tags a pipeline notebook must carry, in the order they are reported
pub const REQUIRED_TAGS: [&str; 4] = [
    "mlops:config",
    "mlops:preprocessing",
    "mlops:training",
    "mlops:export",
];

const CONFIG_TAG: &str = "mlops:config";
const DEFAULT_MODEL_NAME: &str = "default-model";
const DEFAULT_VERSION: &str = "1";

/// Checks required cell tags and reads `MODEL_NAME` / `VERSION` from the
/// config cell
#[derive(Debug, Clone, Default)]
pub struct TagValidator;

impl NotebookValidator for TagValidator {
    fn validate(&self, raw: &[u8]) -> Result<NotebookConfig> {
        let notebook = Notebook::parse(raw)?;

        let missing: Vec<&str> = REQUIRED_TAGS
            .iter()
            .copied()
            .filter(|tag| notebook.cells_tagged(tag).next().is_none())
            .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "Notebook is missing required tags: {}. Required tags: {}",
                missing.join(", "),
                REQUIRED_TAGS.join(", ")
            );
        }

        let source = notebook
            .cells_tagged(CONFIG_TAG)
            .next()
            .map(|cell| cell.source.text())
            .unwrap_or_default();

        Ok(NotebookConfig {
            model_name: string_assignment(&source, "MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            version: string_assignment(&source, "VERSION")
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        })
    }
}

/// Value of the first `NAME = "value"` (or single-quoted) assignment in `source`
fn string_assignment(source: &str, name: &str) -> Option<String> {
    source.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(name)?;
        let rest = rest.trim_start().strip_prefix('=')?.trim_start();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let body = &rest[1..];
        let end = body.find(['"', '\''])?;
        let value = &body[..end];
        if value.is_empty() || body[end..].chars().next() != Some(quote) {
            return None;
        }
        Some(value.to_string())
    })
}
