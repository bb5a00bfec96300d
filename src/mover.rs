/// File relocation with collision avoidance and bounded retry.
///
/// This module moves one file to its resolved destination. It never
/// overwrites an existing destination, retries permission-class failures
/// (files locked by another process) a bounded number of times, and falls
/// back to copy-then-delete when the destination is on another volume.
use crate::logging::EventKind;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Total attempts made for a move that keeps hitting permission errors.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Pause between two attempts of the same move.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Terminal result of processing one source entry.
///
/// The mover itself only produces `Moved`, `SkippedExists` and `Failed`;
/// the remaining variants are recorded by the sort run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// The file now lives at its destination.
    Moved,
    /// A file with the same name already exists at the destination.
    SkippedExists,
    /// The entry is a directory, vanished, or is not a regular file.
    SkippedNotFile,
    /// No category rule matched the file name.
    Unclassified,
    /// The file could not be sorted.
    Failed(String),
}

impl MoveOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, MoveOutcome::Failed(_))
    }
}

/// How often and how patiently a locked file is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF)
    }
}

/// Returns true for errors that may clear up if the move is retried later,
/// such as a file held open by another process.
pub fn is_permission_class(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
    ) || is_sharing_violation(err)
}

// ERROR_SHARING_VIOLATION and ERROR_LOCK_VIOLATION.
#[cfg(windows)]
fn is_sharing_violation(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_sharing_violation(_err: &io::Error) -> bool {
    false
}

/// Moves files into place, one at a time.
#[derive(Debug, Clone, Default)]
pub struct Mover {
    policy: RetryPolicy,
}

impl Mover {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Moves `source` to `destination`.
    ///
    /// Returns `SkippedExists` without touching the source when the
    /// destination already exists. Permission-class failures are retried
    /// according to the [`RetryPolicy`]; any other failure is returned as
    /// `Failed` immediately. This never panics or returns an error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use file_sorter::mover::{MoveOutcome, Mover};
    /// use std::path::Path;
    ///
    /// let outcome = Mover::default().move_file(
    ///     Path::new("/downloads/photo.png"),
    ///     Path::new("/sorted/Images/photo.png"),
    /// );
    /// assert_eq!(outcome, MoveOutcome::Moved);
    /// ```
    pub fn move_file(&self, source: &Path, destination: &Path) -> MoveOutcome {
        self.move_with(source, destination, relocate)
    }

    /// The retry state machine, with the relocation step injected.
    fn move_with<F>(&self, source: &Path, destination: &Path, mut relocate: F) -> MoveOutcome
    where
        F: FnMut(&Path, &Path) -> io::Result<()>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1;

        loop {
            // Checked right before each attempt; relocation itself refuses to
            // replace a destination that appears after this check.
            let result = match destination_exists(destination) {
                Ok(true) => {
                    tracing::warn!(
                        event = EventKind::SkipExists.as_str(),
                        source = %source.display(),
                        destination = %destination.display(),
                        "destination already exists, skipping"
                    );
                    return MoveOutcome::SkippedExists;
                }
                Ok(false) => relocate(source, destination),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        event = EventKind::Moved.as_str(),
                        source = %source.display(),
                        destination = %destination.display(),
                        attempt,
                        "moved file"
                    );
                    return MoveOutcome::Moved;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::warn!(
                        event = EventKind::SkipExists.as_str(),
                        source = %source.display(),
                        destination = %destination.display(),
                        "destination appeared during the move, skipping"
                    );
                    return MoveOutcome::SkippedExists;
                }
                Err(e) if is_permission_class(&e) && attempt < max_attempts => {
                    tracing::warn!(
                        event = EventKind::PermissionRetry.as_str(),
                        source = %source.display(),
                        destination = %destination.display(),
                        attempt,
                        max_attempts,
                        backoff_secs = self.policy.backoff.as_secs_f64(),
                        error = %e,
                        "permission error, retrying after backoff"
                    );
                    if !self.policy.backoff.is_zero() {
                        thread::sleep(self.policy.backoff);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    let reason = if is_permission_class(&e) {
                        format!("permission error after {} attempts: {}", attempt, e)
                    } else {
                        e.to_string()
                    };
                    tracing::error!(
                        event = EventKind::Failed.as_str(),
                        source = %source.display(),
                        destination = %destination.display(),
                        attempt,
                        error = %e,
                        "failed to move file"
                    );
                    return MoveOutcome::Failed(reason);
                }
            }
        }
    }
}

fn destination_exists(destination: &Path) -> io::Result<bool> {
    // symlink_metadata also catches dangling symlinks sitting at the destination.
    match fs::symlink_metadata(destination) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Links the file into place, then drops the source name.
///
/// `hard_link` fails with `AlreadyExists` instead of replacing a destination
/// that appeared after the existence check. Across volumes the file is
/// copied; on filesystems without hard links it is renamed.
fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::hard_link(source, destination) {
        Ok(()) => release_source(source, destination, |path| fs::remove_file(path)),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                source = %source.display(),
                destination = %destination.display(),
                "destination is on another device, falling back to copy and remove"
            );
            copy_then_remove(source, destination)
        }
        Err(e) if links_unsupported(&e) => {
            tracing::debug!(
                source = %source.display(),
                destination = %destination.display(),
                error = %e,
                "hard link refused, falling back to rename"
            );
            fs::rename(source, destination)
        }
        Err(e) => Err(e),
    }
}

// FAT and some network filesystems answer EPERM or ENOTSUP for links.
fn links_unsupported(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
    )
}

/// Copies into a freshly created destination, then removes the source.
fn copy_then_remove(source: &Path, destination: &Path) -> io::Result<()> {
    copy_then_remove_with(source, destination, |path| fs::remove_file(path))
}

/// The copy fallback with the source removal step injected.
///
/// The destination is deleted again if any step fails, so a failed move
/// never leaves a partial or duplicate file behind.
fn copy_then_remove_with<F>(source: &Path, destination: &Path, remove_source: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let mut reader = File::open(source)?;
    let permissions = reader.metadata()?.permissions();

    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;

    let copied = io::copy(&mut reader, &mut writer)
        .and_then(|_| writer.sync_all())
        .and_then(|_| fs::set_permissions(destination, permissions));
    drop(writer);
    drop(reader);

    if let Err(e) = copied {
        discard_destination(destination);
        return Err(e);
    }

    release_source(source, destination, remove_source)
}

/// Removes the source once the destination holds the file. If that fails
/// the destination is removed again and the source stays authoritative.
fn release_source<F>(source: &Path, destination: &Path, remove_source: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    if let Err(e) = remove_source(source) {
        discard_destination(destination);
        return Err(e);
    }
    Ok(())
}

fn discard_destination(destination: &Path) {
    if let Err(cleanup) = fs::remove_file(destination) {
        tracing::error!(
            destination = %destination.display(),
            error = %cleanup,
            "could not remove partial copy"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn fast_mover(max_attempts: u32) -> Mover {
        Mover::new(RetryPolicy::new(max_attempts, Duration::ZERO))
    }

    fn denied() -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, "file is locked")
    }

    #[test]
    fn test_move_file_moves_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("photo.png");
        let destination = temp_dir.path().join("photo-moved.png");
        fs::write(&source, b"pixels").unwrap();

        let outcome = fast_mover(3).move_file(&source, &destination);

        assert_eq!(outcome, MoveOutcome::Moved);
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"pixels");
    }

    #[test]
    fn test_existing_destination_is_never_overwritten() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.txt");
        let destination = temp_dir.path().join("b.txt");
        fs::write(&source, "new").unwrap();
        fs::write(&destination, "old").unwrap();

        let outcome = fast_mover(3).move_file(&source, &destination);

        assert_eq!(outcome, MoveOutcome::SkippedExists);
        assert_eq!(fs::read_to_string(&source).unwrap(), "new");
        assert_eq!(fs::read_to_string(&destination).unwrap(), "old");
    }

    #[test]
    fn test_missing_source_fails_without_retry() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("gone.txt");
        let destination = temp_dir.path().join("dest.txt");

        let outcome = fast_mover(3).move_file(&source, &destination);

        assert!(outcome.is_failed());
        assert!(!destination.exists());
    }

    #[test]
    fn test_permission_error_retries_then_succeeds() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let destination = temp_dir.path().join("dest.txt");
        let calls = Cell::new(0);

        let outcome = fast_mover(3).move_with(Path::new("src.txt"), &destination, |_, _| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(denied()) } else { Ok(()) }
        });

        assert_eq!(outcome, MoveOutcome::Moved);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permission_error_exhausts_attempts() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let destination = temp_dir.path().join("dest.txt");
        let calls = Cell::new(0);

        let outcome = fast_mover(3).move_with(Path::new("src.txt"), &destination, |_, _| {
            calls.set(calls.get() + 1);
            Err(denied())
        });

        assert_eq!(calls.get(), 3);
        match outcome {
            MoveOutcome::Failed(reason) => assert!(reason.contains("after 3 attempts")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let destination = temp_dir.path().join("dest.txt");
        let calls = Cell::new(0);

        let outcome = fast_mover(3).move_with(Path::new("src.txt"), &destination, |_, _| {
            calls.set(calls.get() + 1);
            Err(io::Error::new(io::ErrorKind::NotFound, "source vanished"))
        });

        assert_eq!(calls.get(), 1);
        assert_eq!(outcome, MoveOutcome::Failed("source vanished".to_string()));
    }

    #[test]
    fn test_destination_appearing_between_attempts_is_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let destination = temp_dir.path().join("dest.txt");
        let calls = Cell::new(0);

        let outcome = fast_mover(3).move_with(Path::new("src.txt"), &destination, |_, dest| {
            calls.set(calls.get() + 1);
            fs::write(dest, "someone else").unwrap();
            Err(denied())
        });

        assert_eq!(outcome, MoveOutcome::SkippedExists);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_already_exists_error_maps_to_skip() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let destination = temp_dir.path().join("dest.txt");

        let outcome = fast_mover(3).move_with(Path::new("src.txt"), &destination, |_, _| {
            Err(io::Error::new(io::ErrorKind::AlreadyExists, "exists"))
        });

        assert_eq!(outcome, MoveOutcome::SkippedExists);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(RetryPolicy::no_retry(), policy);
    }

    #[test]
    fn test_copy_then_remove_moves_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("big.iso");
        let destination = temp_dir.path().join("copied.iso");
        fs::write(&source, vec![7u8; 4096]).unwrap();

        copy_then_remove(&source, &destination).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&destination).unwrap(), vec![7u8; 4096]);
    }

    #[test]
    fn test_copy_then_remove_refuses_existing_destination() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.bin");
        let destination = temp_dir.path().join("b.bin");
        fs::write(&source, "a").unwrap();
        fs::write(&destination, "b").unwrap();

        let err = copy_then_remove(&source, &destination).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&destination).unwrap(), "b");
        assert!(source.exists());
    }

    #[test]
    fn test_relocate_never_replaces_existing_destination() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.txt");
        let destination = temp_dir.path().join("b.txt");
        fs::write(&source, "new").unwrap();
        fs::write(&destination, "someone else's file").unwrap();

        let err = relocate(&source, &destination).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&destination).unwrap(), "someone else's file");
        assert_eq!(fs::read_to_string(&source).unwrap(), "new");
    }

    #[test]
    fn test_destination_created_during_relocation_survives() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("report.pdf");
        let destination = temp_dir.path().join("sorted-report.pdf");
        fs::write(&source, "ours").unwrap();

        // Another process claims the name after the existence check passed.
        let outcome = fast_mover(3).move_with(&source, &destination, |src, dest| {
            fs::write(dest, "theirs").unwrap();
            relocate(src, dest)
        });

        assert_eq!(outcome, MoveOutcome::SkippedExists);
        assert_eq!(fs::read_to_string(&destination).unwrap(), "theirs");
        assert_eq!(fs::read_to_string(&source).unwrap(), "ours");
    }

    #[test]
    fn test_copy_is_discarded_when_source_cannot_be_removed() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("video.mp4");
        let destination = temp_dir.path().join("copied.mp4");
        fs::write(&source, "frames").unwrap();

        let err = copy_then_remove_with(&source, &destination, |_| Err(denied())).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(!destination.exists());
        assert_eq!(fs::read_to_string(&source).unwrap(), "frames");
    }

    #[test]
    fn test_link_is_discarded_when_source_cannot_be_removed() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("notes.txt");
        let destination = temp_dir.path().join("linked.txt");
        fs::write(&source, "notes").unwrap();
        fs::hard_link(&source, &destination).unwrap();

        let result = release_source(&source, &destination, |_| Err(denied()));

        assert!(result.is_err());
        assert!(!destination.exists());
        assert_eq!(fs::read_to_string(&source).unwrap(), "notes");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_existence_check_does_not_move() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blocker = temp_dir.path().join("Images");
        fs::write(&blocker, "a file, not a directory").unwrap();
        let calls = Cell::new(0);

        let outcome = fast_mover(3).move_with(
            Path::new("photo.png"),
            &blocker.join("photo.png"),
            |_, _| {
                calls.set(calls.get() + 1);
                Ok(())
            },
        );

        assert!(outcome.is_failed());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_retry_and_move_events_use_documented_levels() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let destination = temp_dir.path().join("dest.txt");
        let calls = Cell::new(0);

        let events = capture::events(|| {
            let outcome = fast_mover(2).move_with(Path::new("src.txt"), &destination, |_, _| {
                calls.set(calls.get() + 1);
                if calls.get() == 1 { Err(denied()) } else { Ok(()) }
            });
            assert_eq!(outcome, MoveOutcome::Moved);
        });

        let kinds: Vec<&str> = events.iter().map(|(_, kind)| kind.as_str()).collect();
        assert_eq!(kinds, ["permission_retry", "moved"]);
        for (level, kind) in &events {
            assert_eq!(*level, capture::documented_level(kind), "{} logged at {}", kind, level);
        }
    }

    #[test]
    fn test_permission_class_detection() {
        assert!(is_permission_class(&denied()));
        assert!(is_permission_class(&io::Error::from(
            io::ErrorKind::ResourceBusy
        )));
        assert!(!is_permission_class(&io::Error::from(
            io::ErrorKind::NotFound
        )));
    }
}
