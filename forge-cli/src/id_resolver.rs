//! ID resolver module
//!
//! Turns a run prefix into a full id by scanning the most recent runs, so
//! users can type the first few characters shown by `forge pipeline list`.

use anyhow::{Context, Result, anyhow};
use forge_client::OrchestratorClient;
use forge_core::dto::pipeline::{MAX_PAGE_SIZE, PageQuery};
use uuid::Uuid;

use crate::types::RunRef;

/// Pages of runs searched before giving up on a prefix
const MAX_SCAN_PAGES: u32 = 10;

/// Resolve a run reference to a full UUID
///
/// Full ids are returned as-is without a request. Prefixes are matched against
/// the newest runs; more than one match is an error.
pub async fn resolve_run_id(client: &OrchestratorClient, run: &RunRef) -> Result<Uuid> {
    let prefix = match run {
        RunRef::Full(uuid) => return Ok(*uuid),
        RunRef::Prefix(prefix) if prefix.is_empty() => {
            return Err(anyhow!("Pipeline id cannot be empty"));
        }
        RunRef::Prefix(prefix) => prefix,
    };

    let mut matches = Vec::new();
    for page in 1..=MAX_SCAN_PAGES {
        let listing = client
            .list_pipelines(PageQuery {
                page,
                size: MAX_PAGE_SIZE,
            })
            .await
            .context("Failed to fetch pipelines for ID resolution")?;

        matches.extend(
            listing
                .items
                .iter()
                .map(|view| view.run.id)
                .filter(|id| run.matches(*id)),
        );

        let seen = u64::from(page) * u64::from(MAX_PAGE_SIZE);
        if seen >= listing.total {
            break;
        }
    }

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No pipeline found with ID starting with '{}'",
            prefix
        )),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple pipelines: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
