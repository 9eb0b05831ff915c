//! Common types used across CLI modules

use uuid::Uuid;

/// A pipeline run given on the command line: full id or unambiguous prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRef {
    Full(Uuid),
    /// Lowercased, dash-insensitive prefix
    Prefix(String),
}

impl RunRef {
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input) {
            Ok(uuid) => RunRef::Full(uuid),
            Err(_) => RunRef::Prefix(input.trim().to_lowercase().replace('-', "")),
        }
    }

    /// Whether `id` is the run this reference points at
    pub fn matches(&self, id: Uuid) -> bool {
        match self {
            RunRef::Full(uuid) => *uuid == id,
            RunRef::Prefix(prefix) => id.simple().to_string().starts_with(prefix.as_str()),
        }
    }
}

impl std::fmt::Display for RunRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunRef::Full(uuid) => write!(f, "{}", uuid),
            RunRef::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

/// Parse prediction input: a JSON array of feature rows
pub fn parse_rows(raw: &str) -> anyhow::Result<Vec<Vec<f64>>> {
    let rows: Vec<Vec<f64>> = serde_json::from_str(raw).map_err(|e| {
        anyhow::anyhow!("data must be a JSON array of numeric rows, e.g. [[1.0, 2.0]]: {}", e)
    })?;
    if rows.is_empty() {
        anyhow::bail!("data must contain at least one row");
    }
    Ok(rows)
}
