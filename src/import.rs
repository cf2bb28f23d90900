//! Bulk registration import from a JSON array of drafts.

use std::{fs, path::Path};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    registration::RegistrationDraft,
    runtime::handle::{RegistryHandle, RuntimeError},
    types::RegistrationId,
};

/// Import file could not be read or parsed.
#[derive(Debug, Error)]
pub enum ImportError {
    /// File read failed.
    #[error("reading {path}: {source}")]
    Io {
        /// File that was being read.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Contents are not a JSON array of drafts.
    #[error("parsing registrations: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of an import run.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Ids of newly created registrations, in input order.
    pub inserted: Vec<RegistrationId>,
    /// Rows that were not imported, with the reason.
    pub skipped: Vec<(String, RuntimeError)>,
}

/// Reads drafts from the JSON file at `path`.
pub fn read_drafts(path: &Path) -> Result<Vec<RegistrationDraft>, ImportError> {
    let raw = fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_drafts(&raw)
}

/// Parses a JSON array of drafts.
pub fn parse_drafts(raw: &str) -> Result<Vec<RegistrationDraft>, ImportError> {
    Ok(serde_json::from_str(raw)?)
}

/// Registers every draft; invalid rows and duplicate emails are skipped.
///
/// Stops early only when the runtime itself is gone.
pub async fn import_all(
    registry: &RegistryHandle,
    drafts: Vec<RegistrationDraft>,
) -> Result<ImportReport, RuntimeError> {
    let total = drafts.len();
    let mut report = ImportReport::default();

    for (idx, draft) in drafts.into_iter().enumerate() {
        let email = draft.email.clone();
        match registry.register(draft).await {
            Ok(id) => {
                info!(id, %email, "registered {}/{total}", idx + 1);
                report.inserted.push(id);
            }
            Err(RuntimeError::ChannelClosed) => return Err(RuntimeError::ChannelClosed),
            Err(err) => {
                warn!(%email, error = %err, "skipping registration");
                report.skipped.push((email, err));
            }
        }
    }

    Ok(report)
}
