//! Tests for protected sessions.

use super::*;
use crate::locks::{LockRecord, lock_path_for};
use crate::test_support::{create_target, fast_options, plant_foreign_lock, side_files};
use serial_test::serial;
use std::time::Duration;

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[test]
#[serial]
fn test_read_write_commits_staged_changes() {
    let (temp, target) = create_target(Some(b"41"));

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
    assert!(file.is_staged());
    assert_ne!(file.path(), target.as_path());
    assert!(lock_path_for(&target).exists());

    let n: u32 = String::from_utf8(file.read_all().unwrap()).unwrap().parse().unwrap();
    file.replace_contents((n + 1).to_string().as_bytes()).unwrap();

    // Nothing reaches the target before commit
    assert_eq!(read(&target), b"41");

    let staging = file.path().to_path_buf();
    file.finish().unwrap();

    assert_eq!(read(&target), b"42");
    assert!(!staging.exists());
    assert!(!lock_path_for(&target).exists());
    assert!(side_files(temp.path()).is_empty());
}

#[test]
#[serial]
fn test_read_mode_uses_target_directly() {
    let (_temp, target) = create_target(Some(b"hello"));

    let mut file = ProtectedFile::open(&target, Mode::Read, &fast_options()).unwrap();
    assert!(!file.is_staged());
    assert_eq!(file.path(), target.as_path());
    assert_eq!(file.read_all().unwrap(), b"hello");
    file.finish().unwrap();

    assert!(!lock_path_for(&target).exists());
}

#[test]
#[serial]
fn test_mode_existence_errors() {
    let (temp, missing) = create_target(None);

    let err = ProtectedFile::open(&missing, Mode::Read, &fast_options()).unwrap_err();
    assert!(matches!(err, SidelockError::NotFound(_)));
    let err = ProtectedFile::open(&missing, Mode::ReadWrite, &fast_options()).unwrap_err();
    assert!(matches!(err, SidelockError::NotFound(_)));

    std::fs::write(&missing, b"now here").unwrap();
    let err = ProtectedFile::open(&missing, Mode::CreateNew, &fast_options()).unwrap_err();
    assert!(matches!(err, SidelockError::AlreadyExists(_)));

    let err = ProtectedFile::open(temp.path(), Mode::Read, &fast_options()).unwrap_err();
    assert!(matches!(err, SidelockError::UnsupportedTarget { .. }));

    // Failed opens leave no lock behind
    assert!(!lock_path_for(&missing).exists());
}

#[cfg(unix)]
#[test]
#[serial]
fn test_symlink_target_is_unsupported() {
    let (temp, target) = create_target(Some(b"x"));
    let link = temp.path().join("link.txt");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let err = ProtectedFile::open(&link, Mode::Read, &fast_options()).unwrap_err();
    assert!(matches!(err, SidelockError::UnsupportedTarget { .. }));
    assert!(err.to_string().contains("symbolic"));
}

#[test]
#[serial]
fn test_create_new_and_write_modes() {
    let (_temp, target) = create_target(None);

    let mut file = ProtectedFile::open(&target, Mode::CreateNew, &fast_options()).unwrap();
    file.write_all(b"fresh").unwrap();
    file.finish().unwrap();
    assert_eq!(read(&target), b"fresh");

    let mut file = ProtectedFile::open(&target, Mode::Write, &fast_options()).unwrap();
    assert_eq!(file.read_all().unwrap(), b"");
    file.write_all(b"replaced").unwrap();
    file.finish().unwrap();
    assert_eq!(read(&target), b"replaced");
}

#[test]
#[serial]
fn test_append_mode_keeps_existing_content() {
    let (_temp, target) = create_target(Some(b"one\n"));

    let mut file = ProtectedFile::open(&target, Mode::Append, &fast_options()).unwrap();
    file.write_all(b"two\n").unwrap();
    assert!(file.replace_contents(b"x").is_err());
    file.finish().unwrap();

    assert_eq!(read(&target), b"one\ntwo\n");
}

#[test]
#[serial]
fn test_unstaged_session_writes_target() {
    let (_temp, target) = create_target(Some(b"before"));
    let options = fast_options().with_staging(false);

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &options).unwrap();
    assert!(!file.is_staged());
    file.replace_contents(b"after").unwrap();
    assert_eq!(read(&target), b"after");
    file.finish().unwrap();

    assert!(!lock_path_for(&target).exists());
}

#[test]
#[serial]
fn test_tampered_target_is_not_overwritten() {
    let (temp, target) = create_target(Some(b"original"));

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
    file.replace_contents(b"session output").unwrap();

    // Someone bypasses the lock
    std::fs::write(&target, b"tampered").unwrap();

    let err = file.finish().unwrap_err();
    assert!(matches!(err, SidelockError::CorruptionDetected { .. }));
    assert_eq!(err.exit_code(), crate::exit_codes::CORRUPTION);

    assert_eq!(read(&target), b"tampered");
    let side = err.saved_result().unwrap().to_path_buf();
    assert_eq!(read(&side), b"session output");
    assert_eq!(side_files(temp.path()), vec![side.clone()]);
    assert!(err.to_string().contains(&side.display().to_string()));
    assert!(!lock_path_for(&target).exists());
}

#[test]
#[serial]
fn test_deleted_target_counts_as_corruption() {
    let (_temp, target) = create_target(Some(b"original"));

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
    file.replace_contents(b"new").unwrap();
    std::fs::remove_file(&target).unwrap();

    let err = file.finish().unwrap_err();
    assert!(matches!(err, SidelockError::CorruptionDetected { .. }));
    assert!(!target.exists());
}

#[test]
#[serial]
fn test_verification_can_be_disabled() {
    let (_temp, target) = create_target(Some(b"original"));
    let options = fast_options().with_verify_integrity(false);

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &options).unwrap();
    file.replace_contents(b"session output").unwrap();
    std::fs::write(&target, b"tampered").unwrap();
    file.finish().unwrap();

    assert_eq!(read(&target), b"session output");
}

#[test]
#[serial]
fn test_foreign_record_means_lock_lost() {
    let (temp, target) = create_target(Some(b"original"));

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
    file.replace_contents(b"work").unwrap();
    let foreign = plant_foreign_lock(&target, None);

    let err = file.finish().unwrap_err();
    assert!(matches!(err, SidelockError::LockLost { .. }));
    assert_eq!(err.exit_code(), crate::exit_codes::LOCK_LOST);
    assert!(err.to_string().contains("elsewhere"));

    // Target untouched, output saved, other holder's record kept
    assert_eq!(read(&target), b"original");
    assert_eq!(read(err.saved_result().unwrap()), b"work");
    assert_eq!(side_files(temp.path()).len(), 1);
    let on_disk = LockRecord::decode(&read(&lock_path_for(&target))).unwrap();
    assert!(on_disk.same_owner(&foreign));
}

#[test]
#[serial]
fn test_removed_lock_means_lock_lost() {
    let (_temp, target) = create_target(Some(b"original"));

    let mut file = ProtectedFile::open(&target, Mode::Write, &fast_options()).unwrap();
    file.write_all(b"work").unwrap();
    std::fs::remove_file(lock_path_for(&target)).unwrap();

    let err = file.finish().unwrap_err();
    assert!(matches!(err, SidelockError::LockLost { ref reason, .. } if reason.contains("removed")));
    assert_eq!(read(&target), b"original");
}

#[test]
#[serial]
fn test_lost_lock_in_read_mode_is_reported() {
    let (temp, target) = create_target(Some(b"data"));

    let file = ProtectedFile::open(&target, Mode::Read, &fast_options()).unwrap();
    let foreign = plant_foreign_lock(&target, None);

    let err = file.finish().unwrap_err();
    assert!(matches!(err, SidelockError::LockLost { saved: None, .. }));
    assert!(err.to_string().contains("elsewhere"));

    // Nothing to save aside, and the other holder keeps its lock
    assert!(side_files(temp.path()).is_empty());
    let on_disk = LockRecord::decode(&read(&lock_path_for(&target))).unwrap();
    assert!(on_disk.same_owner(&foreign));
}

#[test]
#[serial]
fn test_elapsed_own_lease_in_read_mode_is_lock_lost() {
    let (_temp, target) = create_target(Some(b"data"));
    let options = fast_options().with_lease(Duration::from_secs(2));

    let mut file = ProtectedFile::open(&target, Mode::Read, &options).unwrap();
    assert_eq!(file.read_all().unwrap(), b"data");
    std::thread::sleep(Duration::from_millis(3200));

    let err = file.finish().unwrap_err();
    assert!(matches!(err, SidelockError::LockLost { ref reason, saved: None, .. } if reason.contains("lease")));
    assert!(!lock_path_for(&target).exists());
}

#[test]
#[serial]
fn test_elapsed_own_lease_means_lock_lost() {
    let (temp, target) = create_target(Some(b"original"));
    let options = fast_options().with_lease(Duration::from_secs(2));

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &options).unwrap();
    file.replace_contents(b"late work").unwrap();
    std::thread::sleep(Duration::from_millis(3200));

    let err = file.finish().unwrap_err();
    assert!(matches!(err, SidelockError::LockLost { ref reason, .. } if reason.contains("lease")));
    assert_eq!(read(&target), b"original");
    assert_eq!(side_files(temp.path()).len(), 1);
    // The record was still ours, so it is removed
    assert!(!lock_path_for(&target).exists());
}

#[test]
#[serial]
fn test_release_is_idempotent() {
    let (_temp, target) = create_target(Some(b"original"));

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
    file.replace_contents(b"discard me").unwrap();
    let staging = file.path().to_path_buf();
    let handle = file.cleanup_handle();

    handle.release().unwrap();
    handle.release().unwrap();
    assert!(handle.is_released());
    assert!(!staging.exists());
    assert!(!lock_path_for(&target).exists());

    file.abandon().unwrap();
    assert_eq!(read(&target), b"original");
}

#[test]
#[serial]
fn test_finish_after_external_release_is_lock_lost() {
    let (_temp, target) = create_target(Some(b"original"));

    let file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
    file.cleanup_handle().release().unwrap();

    let err = file.finish().unwrap_err();
    assert!(matches!(err, SidelockError::LockLost { saved: None, .. }));
}

#[test]
#[serial]
fn test_drop_discards_changes() {
    let (_temp, target) = create_target(Some(b"original"));

    let staging = {
        let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
        file.replace_contents(b"dropped").unwrap();
        file.path().to_path_buf()
    };

    assert_eq!(read(&target), b"original");
    assert!(!staging.exists());
    assert!(!lock_path_for(&target).exists());
}

#[test]
#[serial]
fn test_protect_commits_on_ok() {
    let (_temp, target) = create_target(Some(b"1"));

    let value = protect(&target, Mode::ReadWrite, &fast_options(), |file| {
        file.replace_contents(b"2")?;
        Ok::<_, SidelockError>(7)
    })
    .unwrap();

    assert_eq!(value, 7);
    assert_eq!(read(&target), b"2");
}

#[derive(Debug)]
enum BodyError {
    Lock(SidelockError),
    Gave(&'static str),
}

impl From<SidelockError> for BodyError {
    fn from(e: SidelockError) -> Self {
        BodyError::Lock(e)
    }
}

#[test]
#[serial]
fn test_protect_returns_body_error_unchanged() {
    let (temp, target) = create_target(Some(b"1"));

    let result: std::result::Result<(), BodyError> =
        protect(&target, Mode::ReadWrite, &fast_options(), |file| {
            file.replace_contents(b"half done").map_err(BodyError::Lock)?;
            Err(BodyError::Gave("calculation failed"))
        });

    assert!(matches!(result, Err(BodyError::Gave("calculation failed"))));
    assert_eq!(read(&target), b"1");
    assert!(!lock_path_for(&target).exists());
    assert!(side_files(temp.path()).is_empty());
}

#[test]
#[serial]
fn test_backup_policies() {
    let (_temp, target) = create_target(Some(b"v1"));
    let backup = backup_path(&target);

    let options = fast_options().with_backup(BackupPolicy::DuringLock);
    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &options).unwrap();
    assert_eq!(read(&backup), b"v1");
    file.replace_contents(b"v2").unwrap();
    file.finish().unwrap();
    assert!(!backup.exists());

    let options = fast_options().with_backup(BackupPolicy::Keep);
    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &options).unwrap();
    file.replace_contents(b"v3").unwrap();
    file.finish().unwrap();
    assert_eq!(read(&backup), b"v2");
    assert_eq!(read(&target), b"v3");
}

#[test]
#[serial]
fn test_custom_scratch_dir() {
    let (temp, target) = create_target(Some(b"x"));
    let scratch = temp.path().join("scratch");
    std::fs::create_dir(&scratch).unwrap();

    let file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options().with_scratch_dir(&scratch))
        .unwrap();
    assert_eq!(file.path().parent().unwrap(), scratch.as_path());
    file.finish().unwrap();

    assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
}

#[test]
#[serial]
fn test_registry_tracks_open_sessions() {
    let (_temp, target) = create_target(Some(b"x"));
    let before = cleanup::open_sessions();

    let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
    file.replace_contents(b"never committed").unwrap();
    let staging = file.path().to_path_buf();
    assert_eq!(cleanup::open_sessions(), before + 1);

    assert_eq!(cleanup::release_all(), before + 1);
    assert_eq!(cleanup::open_sessions(), 0);
    assert!(!staging.exists());
    assert!(!lock_path_for(&target).exists());

    assert!(file.finish().is_err());
    assert_eq!(read(&target), b"x");
}

#[test]
#[serial]
fn test_waits_for_other_holder() {
    let (_temp, target) = create_target(Some(b"0"));

    let first = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
    let waiter = {
        let target = target.clone();
        std::thread::spawn(move || {
            let mut file = ProtectedFile::open(&target, Mode::ReadWrite, &fast_options()).unwrap();
            let content = file.read_all().unwrap();
            file.finish().unwrap();
            content
        })
    };

    std::thread::sleep(Duration::from_millis(150));
    let mut first = first;
    first.replace_contents(b"1").unwrap();
    first.finish().unwrap();

    assert_eq!(waiter.join().unwrap(), b"1");
}
