//! End to end copies between two in-memory endpoints.

use std::path::Path;
use std::sync::{Arc, Mutex};

use engine::{CopyReport, Error, FailureKind, Options, ProgressSettings, ProgressState};
use fsclient::{ClientError, FileChecksum, FilesystemClient, MemoryClient, PathEntry};

fn source_tree() -> Arc<MemoryClient> {
    // src
    // |- a.txt (10 bytes)
    // |- sub
    //    |- b.txt (0 bytes)
    let source = MemoryClient::new();
    source.add_file("/src/a.txt", "0123456789");
    source.add_file("/src/sub/b.txt", "");
    Arc::new(source)
}

fn scenario_options() -> Options {
    Options {
        chunk_size: 4,
        concurrency: 1,
        overwrite: false,
        checksum: true,
        ..Default::default()
    }
}

async fn run(
    source: &Arc<MemoryClient>,
    destination: &Arc<MemoryClient>,
    options: &Options,
) -> Result<CopyReport, Error> {
    engine::copy(
        source.clone(),
        destination.clone(),
        Path::new("/src"),
        Path::new("/dst"),
        options,
    )
    .await
}

#[tokio::test]
async fn test_fresh_copy() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    let options = scenario_options();
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 2);
    assert_eq!(report.skipped, 0);
    assert!(report.failed.is_empty());
    assert_eq!(report.bytes_transferred, 10);
    assert_eq!(report.directories_created, 2);
    assert!(destination.is_dir("/dst/sub"));
    assert_eq!(destination.read("/dst/a.txt").unwrap(), b"0123456789");
    assert_eq!(destination.read("/dst/sub/b.txt").unwrap(), b"");
    let writes = destination.writes();
    let a_writes: Vec<_> = writes
        .iter()
        .filter(|write| write.path == Path::new("/dst/a.txt"))
        .map(|write| (write.offset, write.length, write.create))
        .collect();
    assert_eq!(a_writes, vec![(0, 4, true), (4, 4, false), (8, 2, false)]);
    let b_writes: Vec<_> = writes
        .iter()
        .filter(|write| write.path == Path::new("/dst/sub/b.txt"))
        .map(|write| (write.offset, write.length, write.create))
        .collect();
    assert_eq!(b_writes, vec![(0, 0, true)]);
}

#[tokio::test]
async fn test_rerun_skips_everything() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    let options = scenario_options();
    run(&source, &destination, &options).await.unwrap();
    destination.clear_writes();
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 0);
    assert_eq!(report.skipped, 2);
    assert!(report.failed.is_empty());
    assert_eq!(report.bytes_transferred, 0);
    assert_eq!(report.directories_created, 0);
    assert!(destination.writes().is_empty());
}

#[tokio::test]
async fn test_files_only_name_collision() {
    let source = MemoryClient::new();
    source.add_file("/src/x/data.csv", "1");
    source.add_file("/src/y/data.csv", "2");
    let source = Arc::new(source);
    let destination = Arc::new(MemoryClient::new());
    let options = Options {
        files_only: true,
        ..scenario_options()
    };
    let result = run(&source, &destination, &options).await;
    assert!(matches!(result, Err(Error::DestinationConflict { .. })));
    assert!(destination.writes().is_empty());
    assert!(!destination.is_dir("/dst"));
}

#[tokio::test]
async fn test_files_only_flattens() {
    let source = MemoryClient::new();
    source.add_file("/src/x/one.csv", "1");
    source.add_file("/src/y/z/two.csv", "22");
    let source = Arc::new(source);
    let destination = Arc::new(MemoryClient::new());
    let options = Options {
        files_only: true,
        ..scenario_options()
    };
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 2);
    assert_eq!(destination.read("/dst/one.csv").unwrap(), b"1");
    assert_eq!(destination.read("/dst/two.csv").unwrap(), b"22");
    assert!(!destination.is_dir("/dst/x"));
}

#[tokio::test]
async fn test_differing_destination_without_overwrite() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    destination.add_file("/dst/a.txt", "stale");
    let options = scenario_options();
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, Path::new("/src/a.txt"));
    assert_eq!(report.failed[0].kind, FailureKind::OverwriteConflict);
    assert_eq!(destination.read("/dst/a.txt").unwrap(), b"stale");
}

#[tokio::test]
async fn test_existing_destination_without_checksum() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    destination.add_file("/dst/a.txt", "0123456789");
    let options = Options {
        checksum: false,
        ..scenario_options()
    };
    let report = run(&source, &destination, &options).await.unwrap();
    // identical content is still a conflict when checksums are not compared
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, FailureKind::OverwriteConflict);
    let options = Options {
        checksum: false,
        overwrite: true,
        ..scenario_options()
    };
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 2);
    assert_eq!(report.bytes_transferred, 10);
}

#[tokio::test]
async fn test_overwrite_replaces_differing_content() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    destination.add_file("/dst/a.txt", "a much longer stale file");
    let options = Options {
        overwrite: true,
        ..scenario_options()
    };
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 2);
    assert!(report.is_success());
    assert_eq!(destination.read("/dst/a.txt").unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_checksum_algorithm_mismatch_needs_overwrite() {
    let source = MemoryClient::new().with_checksum_algorithm("MD5-of-0MD5-of-512CRC32C");
    source.add_file("/src/a.txt", "same");
    let source = Arc::new(source);
    let destination = Arc::new(MemoryClient::new());
    destination.add_file("/dst/a.txt", "same");
    let options = scenario_options();
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, FailureKind::OverwriteConflict);
    let options = Options {
        overwrite: true,
        ..scenario_options()
    };
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 1);
}

#[tokio::test]
async fn test_every_file_is_accounted_for_at_any_concurrency() {
    let source = MemoryClient::new();
    for dir in 0..5 {
        for file in 0..7 {
            source.add_file(
                format!("/src/d{dir}/f{file}"),
                vec![b'x'; dir * 13 + file * 5],
            );
        }
    }
    source.fail_reads("/src/d1/f3");
    source.fail_reads("/src/d4/f6");
    let source = Arc::new(source);
    for concurrency in [0, 1, 2, 3, 8, 64] {
        let destination = Arc::new(MemoryClient::new());
        destination.add_file("/dst/d2/f2", "conflict");
        let options = Options {
            concurrency,
            chunk_size: 8,
            ..Default::default()
        };
        let report = run(&source, &destination, &options).await.unwrap();
        assert_eq!(report.files(), 35, "concurrency {concurrency}");
        assert_eq!(report.copied, 32, "concurrency {concurrency}");
        assert_eq!(report.failed.len(), 3, "concurrency {concurrency}");
    }
}

#[tokio::test]
async fn test_filters() {
    let source = MemoryClient::new();
    source.add_file("/src/keep.csv", vec![0u8; 100]);
    source.add_file("/src/small.csv", vec![0u8; 10]);
    source.add_file("/src/skip.txt", vec![0u8; 100]);
    source.add_file("/src/nested/keep2.csv", vec![0u8; 50]);
    source.add_dir("/src/empty");
    let source = Arc::new(source);
    let destination = Arc::new(MemoryClient::new());
    let options = Options {
        include_pattern: "*.csv".to_string(),
        min_size: 50,
        ..Default::default()
    };
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 2);
    assert!(destination.read("/dst/keep.csv").is_some());
    assert!(destination.read("/dst/nested/keep2.csv").is_some());
    assert!(destination.read("/dst/small.csv").is_none());
    assert!(destination.read("/dst/skip.txt").is_none());
    // directories are mirrored even when nothing in them matches
    assert!(destination.is_dir("/dst/empty"));
}

#[tokio::test]
async fn test_missing_source_root() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    let result = engine::copy(
        source,
        destination.clone(),
        Path::new("/nope"),
        Path::new("/dst"),
        &Options::default(),
    )
    .await;
    assert!(matches!(result, Err(Error::PathNotFound(_))));
    assert!(!destination.is_dir("/dst"));
}

#[tokio::test]
async fn test_invalid_chunk_size_fails_before_listing() {
    let source = Arc::new(MemoryClient::new());
    let destination = Arc::new(MemoryClient::new());
    let options = Options {
        chunk_size: 100,
        ..Default::default()
    };
    // the source root does not exist, validation must win
    let result = run(&source, &destination, &options).await;
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
}

#[tokio::test]
async fn test_destination_root_cannot_be_created() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    destination.add_file("/dst", "not a directory");
    let result = run(&source, &destination, &scenario_options()).await;
    assert!(matches!(result, Err(Error::DestinationRoot { .. })));
    assert!(destination.writes().is_empty());
}

#[tokio::test]
async fn test_failed_subdirectory_fails_its_files() {
    let source = MemoryClient::new();
    source.add_file("/src/ok/a", "a");
    source.add_file("/src/blocked/b", "b");
    source.add_file("/src/blocked/deeper/c", "c");
    let source = Arc::new(source);
    let destination = Arc::new(MemoryClient::new());
    destination.add_file("/dst/blocked", "a file in the way");
    let options = scenario_options();
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.copied, 1);
    assert_eq!(report.failed.len(), 2);
    assert!(
        report
            .failed
            .iter()
            .all(|failure| failure.kind == FailureKind::ParentDirectory)
    );
}

#[tokio::test]
async fn test_single_file_root() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    let report = engine::copy(
        source,
        destination.clone(),
        Path::new("/src/a.txt"),
        Path::new("/dst"),
        &scenario_options(),
    )
    .await
    .unwrap();
    assert_eq!(report.copied, 1);
    assert_eq!(destination.read("/dst/a.txt").unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_preserve_attributes() {
    let modification_time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
    let source = MemoryClient::new();
    source.add_file_with_metadata(
        "/src/sub/a",
        "a",
        fsclient::Metadata {
            owner: "alice".to_string(),
            group: "staff".to_string(),
            permission: 0o600,
            modification_time,
        },
    );
    let source = Arc::new(source);
    let destination = Arc::new(MemoryClient::new());
    let options = Options {
        preserve_attributes: true,
        ..Default::default()
    };
    let report = run(&source, &destination, &options).await.unwrap();
    assert!(report.is_success());
    let metadata = destination.metadata("/dst/sub/a").unwrap();
    assert_eq!(metadata.owner, "alice");
    assert_eq!(metadata.permission, 0o600);
    assert_eq!(metadata.modification_time, modification_time);
    assert_eq!(
        destination.metadata("/dst/sub").unwrap(),
        source.metadata("/src/sub").unwrap()
    );
}

#[tokio::test]
async fn test_unsupported_attributes_are_not_failures() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new().without_attributes());
    let options = Options {
        preserve_attributes: true,
        ..Default::default()
    };
    let report = run(&source, &destination, &options).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.copied, 2);
    assert_eq!(destination.read("/dst/a.txt").unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_cancelled_run_reports_every_file() {
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    let options = scenario_options();
    options.cancel.cancel();
    let report = run(&source, &destination, &options).await.unwrap();
    assert_eq!(report.files(), 2);
    assert!(
        report
            .failed
            .iter()
            .all(|failure| failure.kind == FailureKind::Cancelled)
    );
    assert!(destination.writes().is_empty());
}

/// Endpoint whose ranged reads take `delay` each.
#[derive(Debug)]
struct SlowReads {
    inner: MemoryClient,
    delay: std::time::Duration,
}

#[async_trait::async_trait]
impl FilesystemClient for SlowReads {
    async fn status(&self, path: &Path) -> Result<PathEntry, ClientError> {
        self.inner.status(path).await
    }

    async fn list(&self, path: &Path) -> Result<Vec<PathEntry>, ClientError> {
        self.inner.list(path).await
    }

    async fn checksum(&self, path: &Path) -> Result<FileChecksum, ClientError> {
        self.inner.checksum(path).await
    }

    async fn read_range(
        &self,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> Result<bytes::Bytes, ClientError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_range(path, offset, length).await
    }

    async fn write_range(
        &self,
        path: &Path,
        offset: u64,
        data: bytes::Bytes,
        create: bool,
    ) -> Result<(), ClientError> {
        self.inner.write_range(path, offset, data, create).await
    }

    async fn mkdirs(&self, path: &Path) -> Result<(), ClientError> {
        self.inner.mkdirs(path).await
    }
}

#[tokio::test]
async fn test_cancel_while_files_are_in_flight() {
    let inner = MemoryClient::new();
    for index in 0..10 {
        inner.add_file(format!("/src/f{index}"), vec![b'x'; 32]);
    }
    let source = Arc::new(SlowReads {
        inner,
        delay: std::time::Duration::from_millis(50),
    });
    let destination = Arc::new(MemoryClient::new());
    // 8 chunks of 4 bytes per file, two workers
    let options = Options {
        concurrency: 2,
        ..scenario_options()
    };
    let cancel = options.cancel.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(220)).await;
        cancel.cancel();
    });
    let start = std::time::Instant::now();
    let report = engine::copy(
        source,
        destination.clone(),
        Path::new("/src"),
        Path::new("/dst"),
        &options,
    )
    .await
    .unwrap();
    let elapsed = start.elapsed();
    canceller.await.unwrap();
    assert_eq!(report.files(), 10);
    assert_eq!(report.copied, 0);
    assert_eq!(report.failed.len(), 10);
    assert!(
        report
            .failed
            .iter()
            .all(|failure| failure.kind == FailureKind::Cancelled),
        "{report}"
    );
    // an uncancelled run needs about two seconds
    assert!(elapsed < std::time::Duration::from_secs(1), "{elapsed:?}");
    // the two in-flight files got their first chunks written before being abandoned
    assert!(!destination.writes().is_empty());
    assert!(destination.writes().len() < 80);
}

#[tokio::test]
async fn test_progress_reaches_completion() {
    let snapshots = Arc::new(Mutex::new(Vec::<ProgressState>::new()));
    let sink = {
        let snapshots = snapshots.clone();
        move |state: &ProgressState| snapshots.lock().unwrap().push(*state)
    };
    let options = Options {
        progress: Some(ProgressSettings {
            sink: Arc::new(sink),
            delay: std::time::Duration::from_millis(1),
        }),
        ..scenario_options()
    };
    let source = source_tree();
    let destination = Arc::new(MemoryClient::new());
    run(&source, &destination, &options).await.unwrap();
    let snapshots = snapshots.lock().unwrap();
    for state in snapshots.iter() {
        assert!(state.transferred_bytes <= state.total_bytes);
        assert!(state.completed_files <= state.total_files);
    }
    assert_eq!(
        snapshots.last().copied(),
        Some(ProgressState {
            total_bytes: 10,
            transferred_bytes: 10,
            total_files: 2,
            completed_files: 2,
        })
    );
}

#[tokio::test]
async fn test_progress_is_finished_on_fatal_error() {
    let finished = Arc::new(Mutex::new(false));
    struct Flag(Arc<Mutex<bool>>);
    impl engine::ProgressSink for Flag {
        fn update(&self, _state: &ProgressState) {}
        fn finish(&self, _state: &ProgressState) {
            *self.0.lock().unwrap() = true;
        }
    }
    let options = Options {
        progress: Some(ProgressSettings::new(Arc::new(Flag(finished.clone())))),
        ..Default::default()
    };
    let source = Arc::new(MemoryClient::new());
    let destination = Arc::new(MemoryClient::new());
    let result = run(&source, &destination, &options).await;
    assert!(matches!(result, Err(Error::PathNotFound(_))));
    assert!(*finished.lock().unwrap());
}
