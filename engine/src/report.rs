use std::path::PathBuf;

use crate::error::FailureKind;
use crate::task::{TaskState, TransferTask};

/// A file that was not copied.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FailedTransfer {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

fn serialize_elapsed<S: serde::Serializer>(
    elapsed: &std::time::Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*elapsed))
}

/// Outcome of one run.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct CopyReport {
    pub copied: usize,
    pub skipped: usize,
    pub failed: Vec<FailedTransfer>,
    pub bytes_transferred: u64,
    pub directories_created: usize,
    #[serde(serialize_with = "serialize_elapsed")]
    pub elapsed: std::time::Duration,
}

impl CopyReport {
    /// Total number of file tasks accounted for.
    pub fn files(&self) -> usize {
        self.copied + self.skipped + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for CopyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            files skipped: {}\n\
            files failed: {}\n\
            directories created: {}\n\
            elapsed: {}",
            bytesize::ByteSize(self.bytes_transferred),
            self.copied,
            self.skipped,
            self.failed.len(),
            self.directories_created,
            humantime::format_duration(self.elapsed),
        )?;
        for failure in &self.failed {
            write!(f, "\n  {:?}: {}", failure.path, failure.reason)?;
        }
        Ok(())
    }
}

/// Builds the report from terminal task states; performs no I/O.
///
/// A task left in a non-terminal state is reported as failed.
pub fn finalize(
    tasks: &[TransferTask],
    directories_created: usize,
    elapsed: std::time::Duration,
) -> CopyReport {
    let mut report = CopyReport {
        directories_created,
        elapsed,
        ..Default::default()
    };
    for task in tasks {
        report.bytes_transferred += task.bytes_transferred();
        match task.state() {
            TaskState::Done => report.copied += 1,
            TaskState::Skipped => report.skipped += 1,
            TaskState::Failed(error) => report.failed.push(FailedTransfer {
                path: task.source.path.clone(),
                kind: error.kind(),
                reason: error.to_string(),
            }),
            state @ (TaskState::Planned | TaskState::Running) => {
                tracing::error!(
                    "task for {:?} finished in state {}",
                    task.source.path,
                    state.name()
                );
                report.failed.push(FailedTransfer {
                    path: task.source.path.clone(),
                    kind: FailureKind::Incomplete,
                    reason: format!("task did not complete (state: {})", state.name()),
                })
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkRange;
    use crate::error::TaskError;

    fn task(path: &str) -> TransferTask {
        TransferTask::new(
            fsclient::PathEntry {
                path: PathBuf::from(path),
                is_dir: false,
                size: 3,
                checksum: None,
                metadata: Default::default(),
            },
            PathBuf::from("/dst").join(path.trim_start_matches('/')),
            vec![ChunkRange {
                offset: 0,
                length: 3,
            }],
        )
    }

    fn tasks() -> Vec<TransferTask> {
        let mut done = task("/a");
        done.start();
        done.add_bytes(3);
        done.complete();
        let mut skipped = task("/b");
        skipped.skip();
        let mut failed = task("/c");
        failed.fail(TaskError::OverwriteConflict(PathBuf::from("/dst/c")));
        let stuck = task("/d");
        vec![done, skipped, failed, stuck]
    }

    #[test]
    fn counts_every_task() {
        let report = finalize(&tasks(), 2, std::time::Duration::from_secs(3));
        assert_eq!(report.copied, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.files(), 4);
        assert_eq!(report.bytes_transferred, 3);
        assert_eq!(report.directories_created, 2);
        assert!(!report.is_success());
        assert_eq!(report.failed[0].kind, FailureKind::OverwriteConflict);
        assert_eq!(report.failed[1].kind, FailureKind::Incomplete);
        assert_eq!(report.failed[1].path, PathBuf::from("/d"));
    }

    #[test]
    fn json_and_text() {
        let report = finalize(&tasks(), 0, std::time::Duration::from_millis(1500));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["copied"], 1);
        assert_eq!(json["skipped"], 1);
        assert_eq!(json["failed"][0]["kind"], "overwrite_conflict");
        assert_eq!(json["failed"][0]["path"], "/c");
        assert_eq!(json["elapsed"], "1s 500ms");
        let text = report.to_string();
        assert!(text.contains("files copied: 1"), "{text}");
        assert!(text.contains("files failed: 2"), "{text}");
        assert!(text.contains("\"/c\": destination"), "{text}");
    }

    #[test]
    fn empty_run_is_success() {
        let report = finalize(&[], 0, Default::default());
        assert!(report.is_success());
        assert_eq!(report.files(), 0);
    }
}
