//! Dynamic registry of variant handlers (spec.md §9): a tagged-variant enum
//! plus a constructor table populated once at `validator` startup, not
//! runtime class metaprogramming (SPEC_FULL.md §4-add).

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Semaphore;

use crate::download::{downloader_for, VolumeDownloader};
use crate::models::{InputVolume, OutputUpload, VolumeKind};
use crate::upload::{global_upload_semaphore, uploader_for, OutputUploader};

/// Constructs a `VolumeDownloader` for any `InputVolume`, sharing one HTTP
/// client across every download (cheap clone: `reqwest::Client` is an
/// `Arc` internally).
pub struct VolumeDownloaderRegistry {
    client: Client,
    max_size_bytes: u64,
}

impl VolumeDownloaderRegistry {
    pub fn new(client: Client, max_size_bytes: u64) -> Self {
        Self { client, max_size_bytes }
    }

    pub fn for_volume(&self, volume: InputVolume) -> Box<dyn VolumeDownloader> {
        downloader_for(volume, self.client.clone(), self.max_size_bytes)
    }

    pub fn handles(&self, kind: VolumeKind) -> bool {
        matches!(
            kind,
            VolumeKind::Inline | VolumeKind::SingleFile | VolumeKind::ZipUrl | VolumeKind::Multi | VolumeKind::Huggingface
        )
    }
}

/// Constructs an `OutputUploader` for any `OutputUpload`, sharing one HTTP
/// client and one process-wide upload semaphore (spec.md §4.7:
/// `MAX_CONCURRENT_UPLOADS = 3`).
pub struct OutputUploaderRegistry {
    client: Client,
    semaphore: Arc<Semaphore>,
}

impl OutputUploaderRegistry {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            semaphore: global_upload_semaphore(),
        }
    }

    pub fn with_semaphore(client: Client, semaphore: Arc<Semaphore>) -> Self {
        Self { client, semaphore }
    }

    pub fn for_upload(&self, upload: OutputUpload) -> Box<dyn OutputUploader> {
        uploader_for(upload, self.client.clone(), self.semaphore.clone())
    }
}
