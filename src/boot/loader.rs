//! Sequential boot-configuration loading pipeline.
//!
//! Fetches the descriptor, parses it, then walks the file-reference slots in
//! fixed order fetching each referenced blob. Fetches are strictly
//! sequential, never more than one in flight, so the number of open
//! resources stays bounded at one no matter how many files the descriptor
//! names.
//!
//! The pipeline is a plain `async fn`: its suspension points are exactly the
//! fetch completions, it resolves exactly once, and it behaves identically
//! whether the fetcher completes immediately (a blocking host wrapping the
//! call in `pollster::block_on`) or after a real suspension (an event-loop
//! host awaiting it).

use std::io;

use thiserror::Error;
use tracing::{debug, info};

use super::descriptor::{ConfigError, parse_descriptor};
use super::{BootConfig, FileSlot};

/// The byte-loading primitive the pipeline is parameterised over.
#[allow(async_fn_in_trait)]
pub trait FileFetcher {
    /// Load the full contents of `locator`.
    async fn fetch(&self, locator: &str) -> io::Result<Vec<u8>>;
}

/// Fetches locators as paths on the local filesystem.
pub struct LocalFetcher;

impl FileFetcher for LocalFetcher {
    async fn fetch(&self, locator: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(locator).await
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("loading '{locator}': {source}")]
    Fetch {
        locator: String,
        source: io::Error,
    },
}

/// Resolve `filename` against the directory of `base`. Absolute paths and
/// scheme-qualified locators are used verbatim.
pub fn resolve_locator(base: &str, filename: &str) -> String {
    if filename.contains(':') || filename.starts_with('/') {
        return filename.to_string();
    }
    match base.rfind('/') {
        Some(pos) => format!("{}{}", &base[..pos + 1], filename),
        None => filename.to_string(),
    }
}

/// Fetch, parse and fully populate a boot configuration.
///
/// On success the returned [`BootConfig`] carries a blob for every slot the
/// descriptor referenced. Any parse or fetch failure aborts the sequence;
/// a partially-populated config is never handed out.
pub async fn load_boot_config<F: FileFetcher>(
    fetcher: &F,
    locator: &str,
) -> Result<BootConfig, LoadError> {
    debug!(locator, "fetching boot descriptor");
    let descriptor = fetcher.fetch(locator).await.map_err(|source| LoadError::Fetch {
        locator: locator.to_string(),
        source,
    })?;

    let mut config = parse_descriptor(&descriptor)?;

    for slot in FileSlot::ALL {
        let slot_ref = config.file(slot);
        if slot_ref.blob.is_some() {
            continue;
        }
        let Some(filename) = slot_ref.filename.clone() else {
            continue;
        };

        let resolved = resolve_locator(locator, &filename);
        debug!(slot = slot.name(), locator = %resolved, "fetching referenced file");
        let bytes = fetcher
            .fetch(&resolved)
            .await
            .map_err(|source| LoadError::Fetch {
                locator: resolved.clone(),
                source,
            })?;
        config.file_mut(slot).blob = Some(bytes);
    }

    info!(
        machine = %config.machine,
        memory_bytes = config.memory_bytes,
        drives = config.drives.len(),
        "boot configuration loaded"
    );
    Ok(config)
}
