//! Volume/output-upload variant types (spec.md §4.7, §6). These mirror the
//! shapes carried on `OrganicJobRequest.volume` / `.output_upload`; the
//! validator only needs to know the declared shape to fetch inputs and
//! ship outputs, not to execute the job itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    Inline,
    SingleFile,
    ZipUrl,
    Multi,
    Huggingface,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InlineVolume {
    /// Base64-encoded zip contents.
    pub contents: String,
    pub relative_path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SingleFileVolume {
    pub url: String,
    pub relative_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZipUrlVolume {
    pub contents: String,
    pub relative_path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HuggingfaceVolume {
    pub repo_id: String,
    pub revision: Option<String>,
    pub repo_type: String,
    pub allow_patterns: Vec<String>,
    pub relative_path: Option<String>,
    pub token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiVolume {
    pub volumes: Vec<InputVolume>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "volume_type")]
pub enum InputVolume {
    Inline(InlineVolume),
    SingleFile(SingleFileVolume),
    ZipUrl(ZipUrlVolume),
    Multi(MultiVolume),
    Huggingface(HuggingfaceVolume),
}

impl InputVolume {
    pub fn kind(&self) -> VolumeKind {
        match self {
            InputVolume::Inline(_) => VolumeKind::Inline,
            InputVolume::SingleFile(_) => VolumeKind::SingleFile,
            InputVolume::ZipUrl(_) => VolumeKind::ZipUrl,
            InputVolume::Multi(_) => VolumeKind::Multi,
            InputVolume::Huggingface(_) => VolumeKind::Huggingface,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    ZipAndPost,
    ZipAndPut,
    Multi,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZipAndPostUpload {
    pub url: String,
    #[serde(default)]
    pub form_fields: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZipAndPutUpload {
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleFileUploadMethod {
    Post,
    Put,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SingleFileUpload {
    pub relative_path: String,
    pub url: String,
    pub method: SingleFileUploadMethod,
    #[serde(default)]
    pub form_fields: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiUpload {
    pub uploads: Vec<SingleFileUpload>,
    pub system_output: Option<Box<OutputUpload>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_upload_type")]
pub enum OutputUpload {
    ZipAndPost(ZipAndPostUpload),
    ZipAndPut(ZipAndPutUpload),
    Multi(MultiUpload),
}

impl OutputUpload {
    pub fn kind(&self) -> UploadKind {
        match self {
            OutputUpload::ZipAndPost(_) => UploadKind::ZipAndPost,
            OutputUpload::ZipAndPut(_) => UploadKind::ZipAndPut,
            OutputUpload::Multi(_) => UploadKind::Multi,
        }
    }
}
