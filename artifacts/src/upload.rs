//! Output upload (spec.md §4.7): zip creation happens in a scoped temp
//! file released on every exit path; uploads run under a process-wide
//! `MAX_CONCURRENT_UPLOADS` semaphore and retry on upload failure only.
//! Grounded on the teacher's `_uploader.py` retry/semaphore/zip shape.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use compute_validator_common::config::{MAX_CONCURRENT_UPLOADS, MAX_SIZE_BYTES_DEFAULT, OUTPUT_UPLOAD_TIMEOUT_SECONDS};
use compute_validator_common::retry::{retry_with_backoff, BackoffPolicy};
use log::debug;
use reqwest::Client;
use tokio::sync::Semaphore;

use crate::error::{ArtifactError, ArtifactResult};
use crate::models::{
    MultiUpload, OutputUpload, SingleFileUpload, SingleFileUploadMethod, ZipAndPostUpload, ZipAndPutUpload,
};
use crate::zipper::zip_directory;

#[async_trait]
pub trait OutputUploader: Send + Sync {
    async fn upload(&self, directory: &Path) -> ArtifactResult<()>;
}

/// Shared across every uploader instance in the `validator` process,
/// matching the teacher's class-level semaphore (spec.md §4.7:
/// "process-wide semaphore of MAX_CONCURRENT_UPLOADS").
pub fn global_upload_semaphore() -> Arc<Semaphore> {
    Arc::new(Semaphore::new(MAX_CONCURRENT_UPLOADS))
}

async fn upload_bytes(client: &Client, mut file: std::fs::File, url: &str, put: bool, headers: HashMap<String, String>) -> ArtifactResult<()> {
    let mut body = Vec::new();
    file.read_to_end(&mut body)
        .map_err(|err| ArtifactError::Io(err.to_string()))?;
    let len = body.len();

    retry_with_backoff(
        BackoffPolicy::ARTIFACT_UPLOAD,
        |_: &ArtifactError| true,
        || {
            let client = client.clone();
            let url = url.to_string();
            let body = body.clone();
            let headers = headers.clone();
            async move {
                let mut request = if put { client.put(&url) } else { client.post(&url) };
                request = request.timeout(Duration::from_secs(OUTPUT_UPLOAD_TIMEOUT_SECONDS));
                for (k, v) in &headers {
                    request = request.header(k, v);
                }
                let response = request
                    .header("Content-Length", len.to_string())
                    .body(body)
                    .send()
                    .await
                    .map_err(|err| {
                        if err.is_timeout() {
                            ArtifactError::Timeout
                        } else {
                            ArtifactError::Transport(err.to_string())
                        }
                    })?;
                if !response.status().is_success() {
                    return Err(ArtifactError::Transport(format!(
                        "upload returned status {}",
                        response.status()
                    )));
                }
                Ok(())
            }
        },
    )
    .await
    .map_err(|err| ArtifactError::UploadFailed(err.to_string()))
}

async fn upload_multipart(
    client: &Client,
    mut file: std::fs::File,
    file_name: &str,
    url: &str,
    form_fields: HashMap<String, String>,
) -> ArtifactResult<()> {
    let mut body = Vec::new();
    file.read_to_end(&mut body)
        .map_err(|err| ArtifactError::Io(err.to_string()))?;

    retry_with_backoff(
        BackoffPolicy::ARTIFACT_UPLOAD,
        |_: &ArtifactError| true,
        || {
            let client = client.clone();
            let url = url.to_string();
            let body = body.clone();
            let form_fields = form_fields.clone();
            let file_name = file_name.to_string();
            async move {
                let part = reqwest::multipart::Part::bytes(body).file_name(file_name.clone());
                let mut form = reqwest::multipart::Form::new().part("file", part);
                for (k, v) in form_fields {
                    form = form.text(k, v);
                }
                let response = client
                    .post(&url)
                    .timeout(Duration::from_secs(OUTPUT_UPLOAD_TIMEOUT_SECONDS))
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|err| {
                        if err.is_timeout() {
                            ArtifactError::Timeout
                        } else {
                            ArtifactError::Transport(err.to_string())
                        }
                    })?;
                if !response.status().is_success() {
                    return Err(ArtifactError::Transport(format!(
                        "upload returned status {}",
                        response.status()
                    )));
                }
                Ok(())
            }
        },
    )
    .await
    .map_err(|err| ArtifactError::UploadFailed(err.to_string()))
}

pub struct ZipAndPostOutputUploader {
    pub upload: ZipAndPostUpload,
    pub client: Client,
    pub semaphore: Arc<Semaphore>,
    pub max_size_bytes: u64,
}

impl ZipAndPostOutputUploader {
    pub fn new(upload: ZipAndPostUpload, client: Client, semaphore: Arc<Semaphore>) -> Self {
        Self {
            upload,
            client,
            semaphore,
            max_size_bytes: MAX_SIZE_BYTES_DEFAULT,
        }
    }
}

#[async_trait]
impl OutputUploader for ZipAndPostOutputUploader {
    async fn upload(&self, directory: &Path) -> ArtifactResult<()> {
        let (_, file) = zip_directory(directory, &[], self.max_size_bytes)?;
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        upload_multipart(&self.client, file, "output.zip", &self.upload.url, self.upload.form_fields.clone()).await
    }
}

pub struct ZipAndPutOutputUploader {
    pub upload: ZipAndPutUpload,
    pub client: Client,
    pub semaphore: Arc<Semaphore>,
    pub max_size_bytes: u64,
}

impl ZipAndPutOutputUploader {
    pub fn new(upload: ZipAndPutUpload, client: Client, semaphore: Arc<Semaphore>) -> Self {
        Self {
            upload,
            client,
            semaphore,
            max_size_bytes: MAX_SIZE_BYTES_DEFAULT,
        }
    }
}

#[async_trait]
impl OutputUploader for ZipAndPutOutputUploader {
    async fn upload(&self, directory: &Path) -> ArtifactResult<()> {
        let (_, file) = zip_directory(directory, &[], self.max_size_bytes)?;
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        upload_bytes(&self.client, file, &self.upload.url, true, HashMap::new()).await
    }
}

pub struct MultiOutputUploader {
    pub upload: MultiUpload,
    pub client: Client,
    pub semaphore: Arc<Semaphore>,
    pub max_size_bytes: u64,
}

impl MultiOutputUploader {
    pub fn new(upload: MultiUpload, client: Client, semaphore: Arc<Semaphore>) -> Self {
        Self {
            upload,
            client,
            semaphore,
            max_size_bytes: MAX_SIZE_BYTES_DEFAULT,
        }
    }

    async fn upload_single(client: Client, semaphore: Arc<Semaphore>, directory: std::path::PathBuf, entry: SingleFileUpload) -> ArtifactResult<()> {
        let path = directory.join(&entry.relative_path);
        if !path.exists() {
            return Err(ArtifactError::FileNotFound(entry.relative_path.clone()));
        }
        let file = std::fs::File::open(&path)?;
        let _permit = semaphore.acquire().await.expect("semaphore never closed");
        match entry.method {
            SingleFileUploadMethod::Post => {
                upload_multipart(&client, file, &entry.relative_path, &entry.url, entry.form_fields.clone()).await
            }
            SingleFileUploadMethod::Put => upload_bytes(&client, file, &entry.url, true, entry.headers.clone()).await,
        }
    }

    async fn upload_system_output(
        client: Client,
        semaphore: Arc<Semaphore>,
        file: std::fs::File,
        system_output: OutputUpload,
    ) -> ArtifactResult<()> {
        let _permit = semaphore.acquire().await.expect("semaphore never closed");
        match system_output {
            OutputUpload::ZipAndPost(zip_upload) => {
                upload_multipart(&client, file, "output.zip", &zip_upload.url, zip_upload.form_fields).await
            }
            OutputUpload::ZipAndPut(zip_upload) => upload_bytes(&client, file, &zip_upload.url, true, HashMap::new()).await,
            OutputUpload::Multi(_) => Err(ArtifactError::UnsupportedUpload(
                "multi upload cannot nest another multi upload as its system output".to_string(),
            )),
        }
    }
}

/// Every included file (whichever succeeds or fails) is uploaded
/// concurrently on its own task; per spec.md §9's open question, a partial
/// failure here does not roll back uploads that already landed
/// (at-least-once, best-effort semantics).
#[async_trait]
impl OutputUploader for MultiOutputUploader {
    async fn upload(&self, directory: &Path) -> ArtifactResult<()> {
        let single_file_paths: Vec<String> = self.upload.uploads.iter().map(|u| u.relative_path.clone()).collect();
        let directory = directory.to_path_buf();

        let mut handles = Vec::new();
        for entry in self.upload.uploads.iter().cloned() {
            handles.push(tokio::spawn(Self::upload_single(
                self.client.clone(),
                self.semaphore.clone(),
                directory.clone(),
                entry,
            )));
        }

        if let Some(system_output) = &self.upload.system_output {
            let (_, file) = zip_directory(&directory, &single_file_paths, self.max_size_bytes)?;
            handles.push(tokio::spawn(Self::upload_system_output(
                self.client.clone(),
                self.semaphore.clone(),
                file,
                (**system_output).clone(),
            )));
        }

        for handle in handles {
            handle
                .await
                .map_err(|err| ArtifactError::Io(format!("upload task panicked: {err}")))??;
        }
        debug!("multi upload of {} file(s) completed", self.upload.uploads.len());
        Ok(())
    }
}

pub fn uploader_for(upload: OutputUpload, client: Client, semaphore: Arc<Semaphore>) -> Box<dyn OutputUploader> {
    match upload {
        OutputUpload::ZipAndPost(u) => Box::new(ZipAndPostOutputUploader::new(u, client, semaphore)),
        OutputUpload::ZipAndPut(u) => Box::new(ZipAndPutOutputUploader::new(u, client, semaphore)),
        OutputUpload::Multi(u) => Box::new(MultiOutputUploader::new(u, client, semaphore)),
    }
}
