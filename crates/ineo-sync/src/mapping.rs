//! Fetches the INEO mapping document from a URL or a local file.

use std::fmt;
use std::path::PathBuf;

use ineo_core::{MappingError, MappingTable, parse_mapping};
use thiserror::Error;
use tracing::info;

use crate::SyncError;
use crate::error::check_status;

#[derive(Debug, Error)]
pub enum MappingLoadError {
    #[error("fetching mapping from {location}")]
    Fetch {
        location: String,
        #[source]
        source: SyncError,
    },
    #[error("parsing mapping from {location}")]
    Parse {
        location: String,
        #[source]
        source: MappingError,
    },
}

/// Where the mapping document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSource {
    Url(String),
    File(PathBuf),
}

impl MappingSource {
    /// `http(s)://` locations are URLs, `file://` and everything else are paths.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Url(location.to_string())
        } else if let Some(path) = location.strip_prefix("file://") {
            Self::File(PathBuf::from(path))
        } else {
            Self::File(PathBuf::from(location))
        }
    }
}

impl fmt::Display for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

async fn fetch_document(
    client: &reqwest::Client,
    source: &MappingSource,
) -> Result<String, SyncError> {
    match source {
        MappingSource::Url(url) => {
            let resp = check_status(client.get(url).send().await?).await?;
            Ok(resp.text().await?)
        }
        MappingSource::File(path) => {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| SyncError::Io {
                    path: path.clone(),
                    source,
                })
        }
    }
}

/// Fetch and parse the mapping document.
///
/// Called once per run; the returned table is passed to everything that
/// needs it.
pub async fn load_mapping(
    client: &reqwest::Client,
    source: &MappingSource,
) -> Result<MappingTable, MappingLoadError> {
    info!(source = %source, "fetching mapping");
    let xml = fetch_document(client, source)
        .await
        .map_err(|e| MappingLoadError::Fetch {
            location: source.to_string(),
            source: e,
        })?;
    let table = parse_mapping(&xml).map_err(|e| MappingLoadError::Parse {
        location: source.to_string(),
        source: e,
    })?;
    info!(
        entries = table.len(),
        global_default = table.global_default(),
        "mapping loaded"
    );
    Ok(table)
}
