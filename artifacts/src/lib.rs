pub mod download;
pub mod error;
pub mod models;
pub mod registry;
pub mod upload;
pub mod zipper;

pub use download::VolumeDownloader;
pub use error::{ArtifactError, ArtifactResult};
pub use models::{InputVolume, OutputUpload, UploadKind, VolumeKind};
pub use registry::{OutputUploaderRegistry, VolumeDownloaderRegistry};
pub use upload::OutputUploader;
