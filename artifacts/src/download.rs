//! Volume input fetch (spec.md §4.7): one downloader per `VolumeKind`,
//! each enforcing `max_size_bytes` from the `Content-Length` header before
//! streaming, mirroring the teacher's `SingleFileVolumeDownloader` /
//! `ZipUrlVolumeDownloader` pair in `original_source`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use compute_validator_common::config::MAX_SIZE_BYTES_DEFAULT;
use compute_validator_common::retry::{retry_with_backoff, BackoffPolicy};
use log::{debug, warn};
use reqwest::Client;

use crate::error::{ArtifactError, ArtifactResult};
use crate::models::{HuggingfaceVolume, InlineVolume, InputVolume, MultiVolume, SingleFileVolume, ZipUrlVolume};
use crate::zipper::extract_zip_bytes;

#[async_trait]
pub trait VolumeDownloader: Send + Sync {
    async fn download(&self, directory: &Path) -> ArtifactResult<()>;
}

fn join_relative(directory: &Path, relative_path: Option<&str>) -> PathBuf {
    match relative_path {
        Some(rel) if !rel.is_empty() => directory.join(rel),
        _ => directory.to_path_buf(),
    }
}

pub struct InlineVolumeDownloader {
    pub volume: InlineVolume,
    pub max_size_bytes: u64,
}

impl InlineVolumeDownloader {
    pub fn new(volume: InlineVolume) -> Self {
        Self {
            volume,
            max_size_bytes: MAX_SIZE_BYTES_DEFAULT,
        }
    }
}

#[async_trait]
impl VolumeDownloader for InlineVolumeDownloader {
    async fn download(&self, directory: &Path) -> ArtifactResult<()> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.volume.contents.as_bytes())
            .map_err(|err| ArtifactError::Io(format!("invalid base64 inline volume contents: {err}")))?;
        let dest = join_relative(directory, self.volume.relative_path.as_deref());
        extract_zip_bytes(&bytes, &dest, self.max_size_bytes)
    }
}

/// Streaming HTTP GET that fails closed on a missing or oversized
/// `Content-Length` (spec.md §4.7) before reading any body bytes.
async fn fetch_checked(client: &Client, url: &str, max_size_bytes: u64, request_timeout: Duration) -> ArtifactResult<Vec<u8>> {
    let response = retry_with_backoff(
        BackoffPolicy::CHAIN_ORACLE,
        |err: &ArtifactError| matches!(err, ArtifactError::Transport(_) | ArtifactError::Timeout),
        || async {
            client
                .get(url)
                .timeout(request_timeout)
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        ArtifactError::Timeout
                    } else {
                        ArtifactError::Transport(err.to_string())
                    }
                })
        },
    )
    .await?;

    if !response.status().is_success() {
        return Err(ArtifactError::Transport(format!("remote returned status {}", response.status())));
    }

    let declared = response
        .content_length()
        .ok_or(ArtifactError::MissingContentLength)?;
    if declared > max_size_bytes {
        return Err(ArtifactError::DeclaredSizeTooLarge {
            declared,
            cap: max_size_bytes,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|err| ArtifactError::Transport(err.to_string()))?;
    if bytes.len() as u64 > max_size_bytes {
        return Err(ArtifactError::ActualSizeTooLarge {
            actual: bytes.len() as u64,
            cap: max_size_bytes,
        });
    }
    Ok(bytes.to_vec())
}

pub struct SingleFileVolumeDownloader {
    pub volume: SingleFileVolume,
    pub client: Client,
    pub max_size_bytes: u64,
    pub request_timeout: Duration,
}

impl SingleFileVolumeDownloader {
    pub fn new(volume: SingleFileVolume, client: Client) -> Self {
        Self {
            volume,
            client,
            max_size_bytes: MAX_SIZE_BYTES_DEFAULT,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl VolumeDownloader for SingleFileVolumeDownloader {
    async fn download(&self, directory: &Path) -> ArtifactResult<()> {
        let bytes = fetch_checked(&self.client, &self.volume.url, self.max_size_bytes, self.request_timeout).await?;
        let dest = directory.join(&self.volume.relative_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, bytes).await?;
        Ok(())
    }
}

pub struct ZipUrlVolumeDownloader {
    pub volume: ZipUrlVolume,
    pub client: Client,
    pub max_size_bytes: u64,
    pub request_timeout: Duration,
}

impl ZipUrlVolumeDownloader {
    pub fn new(volume: ZipUrlVolume, client: Client) -> Self {
        Self {
            volume,
            client,
            max_size_bytes: MAX_SIZE_BYTES_DEFAULT,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl VolumeDownloader for ZipUrlVolumeDownloader {
    async fn download(&self, directory: &Path) -> ArtifactResult<()> {
        let bytes = fetch_checked(&self.client, &self.volume.contents, self.max_size_bytes, self.request_timeout).await?;
        let dest = join_relative(directory, self.volume.relative_path.as_deref());
        extract_zip_bytes(&bytes, &dest, self.max_size_bytes)
    }
}

pub struct MultiVolumeDownloader {
    pub volume: MultiVolume,
    pub client: Client,
    pub max_size_bytes: u64,
}

impl MultiVolumeDownloader {
    pub fn new(volume: MultiVolume, client: Client) -> Self {
        Self {
            volume,
            client,
            max_size_bytes: MAX_SIZE_BYTES_DEFAULT,
        }
    }
}

#[async_trait]
impl VolumeDownloader for MultiVolumeDownloader {
    async fn download(&self, directory: &Path) -> ArtifactResult<()> {
        let downloads = self
            .volume
            .volumes
            .iter()
            .cloned()
            .map(|v| downloader_for(v, self.client.clone(), self.max_size_bytes).download(directory));
        let results = futures::future::join_all(downloads).await;
        results.into_iter().collect::<ArtifactResult<Vec<()>>>()?;
        Ok(())
    }
}

/// Huggingface download is consumed only via its interface shape (spec.md
/// §1 Non-goal: "does not re-implement ... Hugging Face download
/// primitives"); a real deployment wires this to `hf-hub` or an external
/// fetcher. We surface a typed, classifiable error so the job driver can
/// report `HUGGINGFACE_DOWNLOAD` as a sub-classification of `JOB_FAILED`
/// (spec.md §4.5) rather than panicking or silently no-op'ing.
pub struct HuggingfaceVolumeDownloader {
    pub volume: HuggingfaceVolume,
}

#[async_trait]
impl VolumeDownloader for HuggingfaceVolumeDownloader {
    async fn download(&self, _directory: &Path) -> ArtifactResult<()> {
        debug!(
            "huggingface volume download for repo {} delegated to an external fetcher",
            self.volume.repo_id
        );
        Err(ArtifactError::UnsupportedVolume(format!(
            "huggingface:{}",
            self.volume.repo_id
        )))
    }
}

pub fn downloader_for(volume: InputVolume, client: Client, max_size_bytes: u64) -> Box<dyn VolumeDownloader> {
    match volume {
        InputVolume::Inline(v) => Box::new(InlineVolumeDownloader {
            volume: v,
            max_size_bytes,
        }),
        InputVolume::SingleFile(v) => Box::new(SingleFileVolumeDownloader {
            volume: v,
            client,
            max_size_bytes,
            request_timeout: Duration::from_secs(30),
        }),
        InputVolume::ZipUrl(v) => Box::new(ZipUrlVolumeDownloader {
            volume: v,
            client,
            max_size_bytes,
            request_timeout: Duration::from_secs(30),
        }),
        InputVolume::Multi(v) => Box::new(MultiVolumeDownloader {
            volume: v,
            client,
            max_size_bytes,
        }),
        InputVolume::Huggingface(v) => {
            warn!("huggingface volume {} registered but not natively downloadable", v.repo_id);
            Box::new(HuggingfaceVolumeDownloader { volume: v })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inline_volume_extracts_zip_from_base64() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            use std::io::Write;
            writer.start_file("hello.txt", options).unwrap();
            writer.write_all(b"hi").unwrap();
            writer.finish().unwrap();
        }
        let contents = base64::engine::general_purpose::STANDARD.encode(buf.get_ref());
        let volume = InlineVolume {
            contents,
            relative_path: Some("extracted".to_string()),
        };
        let downloader = InlineVolumeDownloader::new(volume);

        let tmp = tempfile::tempdir().unwrap();
        downloader.download(tmp.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("extracted/hello.txt")).unwrap(),
            "hi"
        );
    }

    #[tokio::test]
    async fn huggingface_volume_reports_unsupported() {
        let downloader = HuggingfaceVolumeDownloader {
            volume: HuggingfaceVolume {
                repo_id: "org/model".to_string(),
                revision: None,
                repo_type: "model".to_string(),
                allow_patterns: vec![],
                relative_path: None,
                token: None,
            },
        };
        let tmp = tempfile::tempdir().unwrap();
        let err = downloader.download(tmp.path()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::UnsupportedVolume(_)));
    }
}
