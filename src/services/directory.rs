//! Directory walking and key naming for the `auto-upload` command.

use crate::{
    errors::UploadError,
    models::directory::{
        DirectoryListing, DirectoryUploadMetadata, DirectoryUploadSummary, FileUploadRecord,
    },
    services::transfer::{TransferStrategy, UploadBody},
    utils::size::{format_bytes, format_size},
};
use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// `"{user}_{camera}/{task}_{date}_{dir_name}"`
pub fn target_prefix(metadata: &DirectoryUploadMetadata, dir_name: &str) -> String {
    format!(
        "{}_{}/{}_{}_{}",
        metadata.user, metadata.camera, metadata.task, metadata.date, dir_name
    )
}

/// Remote key for `file` found under the top-level directory `root`.
///
/// The relative part always uses `/`, whatever the local separator is.
pub fn build_remote_key(
    metadata: &DirectoryUploadMetadata,
    root: &Path,
    file: &Path,
) -> io::Result<String> {
    let relative = file.strip_prefix(root).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not under {}", file.display(), root.display()),
        )
    })?;

    let segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    Ok(format!(
        "{}/{}",
        target_prefix(metadata, &dir_name(root)),
        segments.join("/")
    ))
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Every non-hidden file under `root`, in walk order (sorted by name), with
/// its remote key and size.
///
/// Only an unreadable `root` is an error. Entries below it that cannot be
/// read or stat'ed (dangling links, permission errors) are logged and counted
/// in [`DirectoryListing::unreadable`].
pub fn collect_files(
    root: &Path,
    metadata: &DirectoryUploadMetadata,
) -> io::Result<DirectoryListing> {
    let mut listing = DirectoryListing::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(err) => {
                let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!(path = %path, error = %err, "Skipping unreadable entry");
                listing.unreadable += 1;
                continue;
            }
        };
        if entry.file_type().is_dir() || is_hidden(entry.file_name()) {
            continue;
        }

        let local_path = entry.into_path();
        let record = fs::metadata(&local_path).and_then(|meta| {
            Ok(FileUploadRecord {
                remote_key: build_remote_key(metadata, root, &local_path)?,
                local_path: local_path.clone(),
                size_bytes: meta.len(),
            })
        });
        match record {
            Ok(record) => listing.files.push(record),
            Err(err) => {
                warn!(path = %local_path.display(), error = %err, "Skipping unreadable file");
                listing.unreadable += 1;
            }
        }
    }

    Ok(listing)
}

/// Resolve which top-level directories to upload.
///
/// Named directories are taken relative to `base`; names that are not
/// directories are skipped. With no names, every visible subdirectory of
/// `base` is used.
pub fn select_directories(base: &Path, names: &[String]) -> io::Result<Vec<PathBuf>> {
    if !names.is_empty() {
        let mut selected = Vec::new();
        for name in names {
            let path = base.join(name);
            if path.is_dir() {
                selected.push(path);
            } else {
                warn!(directory = %name, "Skipping - not a directory");
            }
        }
        return Ok(selected);
    }

    let mut selected = Vec::new();
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && !is_hidden(&entry.file_name()) {
            selected.push(entry.path());
        }
    }
    selected.sort();
    Ok(selected)
}

/// Upload one top-level directory file by file. A failed file is logged and
/// counted; the walk carries on.
pub async fn upload_directory(
    strategy: &TransferStrategy,
    root: &Path,
    metadata: &DirectoryUploadMetadata,
) -> Result<DirectoryUploadSummary, UploadError> {
    let directory = dir_name(root);
    info!(directory = %root.display(), "Uploading directory");
    info!(prefix = %target_prefix(metadata, &directory), "Target S3 path");

    let DirectoryListing { files, unreadable } = collect_files(root, metadata)?;
    let mut summary = DirectoryUploadSummary {
        directory,
        total_files: files.len() + unreadable,
        failed_files: unreadable,
        total_bytes: files.iter().map(|f| f.size_bytes).sum(),
        ..DirectoryUploadSummary::default()
    };
    info!(
        files = summary.total_files,
        unreadable,
        total = %format_bytes(summary.total_bytes),
        "Found files to upload"
    );

    for (index, file) in files.iter().enumerate() {
        info!(
            "[{}/{}] Uploading: {}",
            index + 1,
            files.len(),
            file.local_path.display()
        );

        match strategy
            .upload(
                &file.remote_key,
                UploadBody::File(file.local_path.clone()),
                Some(file.size_bytes),
            )
            .await
        {
            Ok(receipt) => {
                summary.uploaded_files += 1;
                summary.uploaded_bytes += receipt.bytes;
                let secs = receipt.elapsed.as_secs_f64();
                let rate = (secs > 0.0).then(|| receipt.bytes as f64 / secs);
                info!(
                    key = %file.remote_key,
                    elapsed_secs = secs,
                    "Upload completed ({}/s)",
                    format_size(rate)
                );
                info!(
                    "Progress: {}/{} files ({}/{})",
                    summary.uploaded_files,
                    summary.total_files,
                    format_bytes(summary.uploaded_bytes),
                    format_bytes(summary.total_bytes)
                );
            }
            Err(err) => {
                summary.failed_files += 1;
                error!(path = %file.local_path.display(), error = %err, "Failed to upload");
            }
        }
    }

    info!(directory = %root.display(), "Directory upload complete");
    info!("Uploaded: {}/{} files", summary.uploaded_files, summary.total_files);
    info!("Failed: {} files", summary.failed_files);
    info!(
        "Total size: {}/{}",
        format_bytes(summary.uploaded_bytes),
        format_bytes(summary.total_bytes)
    );
    Ok(summary)
}

/// Log the per-directory summary and fail when any file failed.
pub fn report(summaries: &[DirectoryUploadSummary]) -> Result<(), UploadError> {
    info!("===== UPLOAD SUMMARY =====");
    for summary in summaries {
        let status = if summary.is_success() { "SUCCESS" } else { "FAILED" };
        info!(
            "{}: {} - {}/{} files uploaded",
            summary.directory, status, summary.uploaded_files, summary.total_files
        );
    }

    let uploaded: usize = summaries.iter().map(|s| s.uploaded_files).sum();
    let failed: usize = summaries.iter().map(|s| s.failed_files).sum();
    let total: usize = summaries.iter().map(|s| s.total_files).sum();
    info!("Total files uploaded: {uploaded}");
    info!("Total files failed: {failed}");

    if failed > 0 {
        warn!("Some files failed to upload. Check the log for details.");
        return Err(UploadError::PartialDirectoryFailure { failed, total });
    }
    info!("All files uploaded successfully!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::transfer::TransferPolicy,
        services::{
            memory_store::{MemoryStore, Op},
            object_store::StorageError,
        },
    };
    use std::sync::Arc;

    fn metadata() -> DirectoryUploadMetadata {
        DirectoryUploadMetadata {
            user: "alice".into(),
            camera: "cam1".into(),
            task: "capture".into(),
            date: "2024-01-15".into(),
        }
    }

    fn write(path: &Path, data: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn key_uses_metadata_and_relative_path() {
        let root = Path::new("/data/session01");
        let key = build_remote_key(&metadata(), root, &root.join("sub").join("img.png")).unwrap();
        assert_eq!(key, "alice_cam1/capture_2024-01-15_session01/sub/img.png");
    }

    #[test]
    fn key_outside_root_is_rejected() {
        let err = build_remote_key(
            &metadata(),
            Path::new("/data/session01"),
            Path::new("/elsewhere/img.png"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn walk_skips_hidden_files_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("session01");
        write(&root.join("b.txt"), b"bb");
        write(&root.join("a.txt"), b"a");
        write(&root.join(".DS_Store"), b"junk");
        write(&root.join("sub").join("img.png"), b"png!");
        write(&root.join(".cache").join("kept.bin"), b"x");

        let listing = collect_files(&root, &metadata()).unwrap();
        assert_eq!(listing.unreadable, 0);
        let keys: Vec<(String, u64)> = listing
            .files
            .into_iter()
            .map(|r| (r.remote_key, r.size_bytes))
            .collect();

        let prefix = "alice_cam1/capture_2024-01-15_session01";
        assert_eq!(
            keys,
            vec![
                (format!("{prefix}/.cache/kept.bin"), 1),
                (format!("{prefix}/a.txt"), 1),
                (format!("{prefix}/b.txt"), 2),
                (format!("{prefix}/sub/img.png"), 4),
            ]
        );
    }

    #[test]
    fn selection_by_name_skips_non_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("day1")).unwrap();
        write(&dir.path().join("notes.txt"), b"n");

        let picked = select_directories(
            dir.path(),
            &["day1".into(), "notes.txt".into(), "missing".into()],
        )
        .unwrap();
        assert_eq!(picked, vec![dir.path().join("day1")]);
    }

    #[test]
    fn default_selection_lists_visible_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta", "alpha", ".git"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        write(&dir.path().join("upload_log.txt"), b"");

        let picked = select_directories(dir.path(), &[]).unwrap();
        assert_eq!(
            picked,
            vec![dir.path().join("alpha"), dir.path().join("zeta")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_file_is_counted_and_walk_continues() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("session01");
        write(&root.join("a.txt"), b"first");
        write(&root.join("b.txt"), b"second");
        write(&root.join("c.txt"), b"third");

        let memory = Arc::new(MemoryStore::new());
        memory.fail(Op::Put, 1, || StorageError::service("AccessDenied", "no"));
        let strategy = TransferStrategy::new(memory.clone(), "bucket", TransferPolicy::cli());

        let summary = upload_directory(&strategy, &root, &metadata()).await.unwrap();

        assert_eq!(summary.directory, "session01");
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.uploaded_files, 2);
        assert_eq!(summary.failed_files, 1);
        assert_eq!(summary.total_bytes, 16);
        assert_eq!(summary.uploaded_bytes, 11);
        assert!(!summary.is_success());

        let prefix = "alice_cam1/capture_2024-01-15_session01";
        assert!(memory.object(&format!("{prefix}/a.txt")).is_none());
        assert_eq!(
            memory.object(&format!("{prefix}/c.txt")).unwrap().as_ref(),
            b"third"
        );

        let err = report(&[summary]).unwrap_err();
        assert!(matches!(
            err,
            UploadError::PartialDirectoryFailure { failed: 1, total: 3 }
        ));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn dangling_link_is_counted_and_siblings_still_upload() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("session01");
        write(&root.join("a.txt"), b"first");
        write(&root.join("c.txt"), b"third");
        std::os::unix::fs::symlink(root.join("gone.txt"), root.join("b.link")).unwrap();

        let listing = collect_files(&root, &metadata()).unwrap();
        assert_eq!(listing.files.len(), 2);
        assert_eq!(listing.unreadable, 1);

        let memory = Arc::new(MemoryStore::new());
        let strategy = TransferStrategy::new(memory.clone(), "bucket", TransferPolicy::cli());
        let summary = upload_directory(&strategy, &root, &metadata()).await.unwrap();

        assert_eq!(memory.calls("put"), 2);
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.uploaded_files, 2);
        assert_eq!(summary.failed_files, 1);
        assert_eq!(summary.uploaded_bytes, 10);
        assert_eq!(
            memory.object("alice_cam1/capture_2024-01-15_session01/a.txt").unwrap().as_ref(),
            b"first"
        );
        assert!(matches!(
            report(&[summary]).unwrap_err(),
            UploadError::PartialDirectoryFailure { failed: 1, total: 3 }
        ));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_files(&dir.path().join("nope"), &metadata()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn clean_run_reports_success() {
        let summary = DirectoryUploadSummary {
            directory: "d".into(),
            uploaded_files: 2,
            total_files: 2,
            ..DirectoryUploadSummary::default()
        };
        assert!(report(&[summary]).is_ok());
    }
}
