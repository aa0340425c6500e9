//! Zip creation and extraction, both bounded by `MAX_NUMBER_OF_FILES` and a
//! size cap (spec.md §4.7; grounded on the teacher's
//! `output_upload::_uploader::zipped_directory` scoped-tempfile pattern).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use compute_validator_common::config::MAX_NUMBER_OF_FILES;

use crate::error::{ArtifactError, ArtifactResult};

/// Walks `directory` recursively, zips every entry not in `exclude`
/// (relative paths) into a scoped anonymous temp file, and returns it
/// rewound to the start along with its size. The temp file is released by
/// the OS as soon as it (or any clone of the returned handle) is dropped,
/// on every exit path including early returns from the size checks below
/// (spec.md §4.7: "guaranteed release on all exit paths").
pub fn zip_directory(directory: &Path, exclude: &[String], max_size_bytes: u64) -> ArtifactResult<(u64, File)> {
    let mut entries = Vec::new();
    collect_files(directory, directory, &mut entries)?;
    entries.retain(|(_, rel)| !exclude.iter().any(|e| e == rel));

    if entries.len() > MAX_NUMBER_OF_FILES {
        return Err(ArtifactError::TooManyFiles {
            count: entries.len(),
            cap: MAX_NUMBER_OF_FILES,
        });
    }

    let file = tempfile::tempfile()?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (path, rel) in &entries {
        writer.start_file(rel, options)?;
        let mut contents = Vec::new();
        File::open(path)?.read_to_end(&mut contents)?;
        writer.write_all(&contents)?;
    }
    let mut file = writer.finish()?;

    let size = file.stream_position()?;
    if size > max_size_bytes {
        return Err(ArtifactError::ActualSizeTooLarge {
            actual: size,
            cap: max_size_bytes,
        });
    }
    file.seek(SeekFrom::Start(0))?;
    Ok((size, file))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(std::path::PathBuf, String)>) -> ArtifactResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("walked entry is always under root")
                .to_string_lossy()
                .replace('\\', "/");
            out.push((path, rel));
        }
    }
    Ok(())
}

/// Extracts a zip archive's bytes into `dest`, refusing archives with more
/// than `MAX_NUMBER_OF_FILES` entries or whose uncompressed total exceeds
/// `max_size_bytes` (spec.md §4.7).
pub fn extract_zip_bytes(bytes: &[u8], dest: &Path, max_size_bytes: u64) -> ArtifactResult<()> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)?;

    if archive.len() > MAX_NUMBER_OF_FILES {
        return Err(ArtifactError::TooManyFiles {
            count: archive.len(),
            cap: MAX_NUMBER_OF_FILES,
        });
    }

    let total_size: u64 = (0..archive.len())
        .map(|i| archive.by_index(i).map(|f| f.size()).unwrap_or(0))
        .sum();
    if total_size > max_size_bytes {
        return Err(ArtifactError::ActualSizeTooLarge {
            actual: total_size,
            cap: max_size_bytes,
        });
    }

    std::fs::create_dir_all(dest)?;
    archive.extract(dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn zip_directory_refuses_too_many_files() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..(MAX_NUMBER_OF_FILES + 1) {
            std::fs::write(tmp.path().join(format!("f{i}.txt")), b"x").unwrap();
        }
        let err = zip_directory(tmp.path(), &[], u64::MAX);
        assert!(matches!(err, Err(ArtifactError::TooManyFiles { .. })));
    }

    #[test]
    fn zip_directory_refuses_oversized_output() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("big.bin"), vec![0u8; 4096]).unwrap();
        let err = zip_directory(tmp.path(), &[], 10);
        assert!(matches!(err, Err(ArtifactError::ActualSizeTooLarge { .. })));
    }

    #[test]
    fn zip_round_trips_content_excluding_single_file_uploads() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("included.txt"), b"keep").unwrap();
        std::fs::write(tmp.path().join("excluded.txt"), b"drop").unwrap();

        let (_, mut file) = zip_directory(tmp.path(), &["excluded.txt".to_string()], u64::MAX).unwrap();
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).unwrap();

        let out = tempfile::tempdir().unwrap();
        extract_zip_bytes(&bytes, out.path(), u64::MAX).unwrap();
        assert!(out.path().join("included.txt").exists());
        assert!(!out.path().join("excluded.txt").exists());
    }

    #[test]
    fn extract_refuses_archive_with_too_many_entries() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for i in 0..(MAX_NUMBER_OF_FILES + 1) {
                writer.start_file(format!("f{i}.txt"), options).unwrap();
                writer.write_all(b"x").unwrap();
            }
            writer.finish().unwrap();
        }

        let out = tempfile::tempdir().unwrap();
        let err = extract_zip_bytes(buf.get_ref(), out.path(), u64::MAX);
        assert!(matches!(err, Err(ArtifactError::TooManyFiles { .. })));
    }
}
