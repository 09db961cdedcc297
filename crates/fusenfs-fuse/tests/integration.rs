//! End-to-end tests for the verb adapter over a loopback connection.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use fusenfs_core::{
    CredentialOverride, Identity, IdentityMapper, OverrideIds, RemoteSession, Timespec,
};
use fusenfs_config::FuseConfig;
use fusenfs_fuse::{Dispatcher, FileKind, NfsFsCore};
use fusenfs_remote::{LoopbackHandle, LoopbackServer, MemExport};

#[cfg(unix)]
use fusenfs_fuse::UnixFuse;

const MOUNT: Identity = Identity::new(1000, 1000);
const OVERRIDE: Identity = Identity::new(65534, 65534);
const OTHER: Identity = Identity::new(2000, 2000);

fn setup(credentials: CredentialOverride) -> (NfsFsCore, LoopbackHandle) {
    let (client, handle) = LoopbackServer::spawn(MemExport::new(MOUNT)).unwrap();
    let session = RemoteSession::new(
        "mem://test/export",
        Box::new(client),
        IdentityMapper::new(credentials, MOUNT),
        Duration::from_millis(20),
    );
    (NfsFsCore::new(Arc::new(session)), handle)
}

// ============== Identity Tests ==============

#[test]
fn test_passthrough_override_write_then_stat() {
    let (fs, handle) = setup(CredentialOverride::FixedWithPassthroughForOthers(OVERRIDE.into()));

    let fh = fs.open(MOUNT, "/a", libc::O_CREAT | libc::O_WRONLY).unwrap();
    assert_eq!(fs.write(MOUNT, fh, 0, &[7u8; 100]).unwrap(), 100);
    fs.release(MOUNT, fh).unwrap();

    let st = fs.getattr(MOUNT, "/a").unwrap();
    assert_eq!(st.size, 100);
    assert_eq!(st.kind, FileKind::RegularFile);
    assert_eq!((st.uid, st.gid), (MOUNT.uid, MOUNT.gid));

    let remote = handle.export().lock().lstat("/a").unwrap();
    assert_eq!((remote.uid, remote.gid), (OVERRIDE.uid, OVERRIDE.gid));
}

#[test]
fn test_passthrough_forwards_other_callers() {
    let (fs, handle) = setup(CredentialOverride::FixedWithPassthroughForOthers(OVERRIDE.into()));

    let fh = fs.create(OTHER, "/theirs", 0o600).unwrap();
    fs.release(OTHER, fh).unwrap();

    let remote = handle.export().lock().lstat("/theirs").unwrap();
    assert_eq!((remote.uid, remote.gid), (OTHER.uid, OTHER.gid));
    let st = fs.getattr(OTHER, "/theirs").unwrap();
    assert_eq!((st.uid, st.gid), (OTHER.uid, OTHER.gid));
}

#[test]
fn test_uid_only_override_leaves_gid_alone() {
    let (fs, handle) = setup(CredentialOverride::Fixed(OverrideIds::new(
        Some(OVERRIDE.uid),
        None,
    )));

    fs.mkdir(OTHER, "/d", 0o755).unwrap();
    let remote = handle.export().lock().lstat("/d").unwrap();
    assert_eq!((remote.uid, remote.gid), (OVERRIDE.uid, OTHER.gid));

    let st = fs.getattr(OTHER, "/d").unwrap();
    assert_eq!((st.uid, st.gid), (OTHER.uid, OTHER.gid));

    // A file owned by the mount gid is not shown as the caller's group.
    fs.chown(MOUNT, "/d", None, Some(MOUNT.gid)).unwrap();
    assert_eq!(handle.export().lock().lstat("/d").unwrap().gid, MOUNT.gid);
    assert_eq!(fs.getattr(OTHER, "/d").unwrap().gid, MOUNT.gid);
}

#[test]
fn test_no_override_forwards_caller() {
    let (fs, handle) = setup(CredentialOverride::None);

    fs.mkdir(OTHER, "/d", 0o750).unwrap();
    let remote = handle.export().lock().lstat("/d").unwrap();
    assert_eq!((remote.uid, remote.gid), (OTHER.uid, OTHER.gid));
    assert_eq!(remote.mode & 0o7777, 0o750);
}

#[test]
fn test_chown_to_mount_identity_sends_override() {
    let (fs, handle) = setup(CredentialOverride::Fixed(OVERRIDE.into()));

    let fh = fs.create(MOUNT, "/f", 0o644).unwrap();
    fs.release(MOUNT, fh).unwrap();
    fs.chown(MOUNT, "/f", Some(MOUNT.uid), Some(OTHER.gid)).unwrap();

    let remote = handle.export().lock().lstat("/f").unwrap();
    assert_eq!((remote.uid, remote.gid), (OVERRIDE.uid, OTHER.gid));
}

// ============== Verb Tests ==============

#[test]
fn test_directory_lifecycle() {
    let (fs, _handle) = setup(CredentialOverride::None);

    fs.mkdir(MOUNT, "/docs", 0o755).unwrap();
    let fh = fs.create(MOUNT, "/docs/readme", 0o644).unwrap();
    fs.write(MOUNT, fh, 0, b"hello").unwrap();
    fs.release(MOUNT, fh).unwrap();
    fs.symlink(MOUNT, "readme", "/docs/link").unwrap();

    let mut names = Vec::new();
    fs.readdir(MOUNT, "/docs", |entry| {
        names.push((entry.name, entry.kind));
        false
    })
    .unwrap();
    names.sort();
    assert_eq!(
        names,
        vec![
            ("link".to_string(), Some(FileKind::Symlink)),
            ("readme".to_string(), Some(FileKind::RegularFile)),
        ]
    );

    assert_eq!(fs.readlink(MOUNT, "/docs/link", 4096).unwrap(), b"readme");
    assert_eq!(fs.rmdir(MOUNT, "/docs").unwrap_err().to_errno(), libc::ENOTEMPTY);

    fs.rename(MOUNT, "/docs/readme", "/readme").unwrap();
    fs.unlink(MOUNT, "/docs/link").unwrap();
    fs.rmdir(MOUNT, "/docs").unwrap();
    assert_eq!(fs.getattr(MOUNT, "/docs").unwrap_err().to_errno(), libc::ENOENT);
    assert_eq!(fs.getattr(MOUNT, "/readme").unwrap().size, 5);
}

#[test]
fn test_read_write_truncate_and_times() {
    let (fs, _handle) = setup(CredentialOverride::None);

    let fh = fs.create(MOUNT, "/data", 0o644).unwrap();
    fs.write(MOUNT, fh, 0, b"0123456789").unwrap();
    fs.fsync(MOUNT, fh).unwrap();
    assert_eq!(fs.read(MOUNT, fh, 2, 4).unwrap(), b"2345");
    assert_eq!(fs.read(MOUNT, fh, 8, 100).unwrap(), b"89");
    fs.release(MOUNT, fh).unwrap();

    fs.truncate(MOUNT, "/data", 3).unwrap();
    fs.chmod(MOUNT, "/data", 0o600).unwrap();
    fs.utime(MOUNT, "/data", Timespec::new(10, 0), Timespec::new(20, 0))
        .unwrap();

    let st = fs.getattr(MOUNT, "/data").unwrap();
    assert_eq!(st.size, 3);
    assert_eq!(st.perm, 0o600);
    assert_eq!(
        st.mtime,
        std::time::UNIX_EPOCH + Duration::from_secs(20)
    );

    let fh = fs.open(MOUNT, "/data", libc::O_RDONLY).unwrap();
    assert_eq!(fs.read(MOUNT, fh, 0, 10).unwrap(), b"012");
    fs.release(MOUNT, fh).unwrap();
    assert_eq!(fs.open_handles(), 0);
}

#[test]
fn test_oversized_truncate_is_efbig() {
    let (fs, _handle) = setup(CredentialOverride::None);
    let fh = fs.open(MOUNT, "/big", libc::O_CREAT | libc::O_RDWR).unwrap();

    let err = fs.truncate(MOUNT, "/big", u64::MAX).unwrap_err();
    assert_eq!(err.to_errno(), libc::EFBIG);
    let err = fs.write(MOUNT, fh, u64::MAX - 1, b"xyz").unwrap_err();
    assert_eq!(err.to_errno(), libc::EFBIG);

    // The connection survives and later calls still work.
    assert_eq!(fs.write(MOUNT, fh, 0, b"ok").unwrap(), 2);
    fs.release(MOUNT, fh).unwrap();
    assert_eq!(fs.getattr(MOUNT, "/big").unwrap().size, 2);
    assert!(fs.session().is_connected());
}

#[test]
fn test_hard_link_and_special_files() {
    let (fs, _handle) = setup(CredentialOverride::None);

    let fh = fs.create(MOUNT, "/orig", 0o644).unwrap();
    fs.release(MOUNT, fh).unwrap();
    fs.link(MOUNT, "/orig", "/alias").unwrap();
    assert_eq!(fs.getattr(MOUNT, "/orig").unwrap().nlink, 2);

    fs.mknod(MOUNT, "/fifo", libc::S_IFIFO | 0o644, 0).unwrap();
    assert_eq!(fs.getattr(MOUNT, "/fifo").unwrap().kind, FileKind::NamedPipe);

    let stats = fs.statfs(MOUNT, "/").unwrap();
    assert!(stats.bsize > 0);
}

// ============== Concurrency Tests ==============

#[test]
fn test_concurrent_getattr_and_write() {
    let (fs, _handle) = setup(CredentialOverride::None);
    let fs = Arc::new(fs);

    for name in ["/x", "/y"] {
        let fh = fs.create(MOUNT, name, 0o644).unwrap();
        fs.release(MOUNT, fh).unwrap();
    }

    let readers: Vec<_> = ["/x", "/y"]
        .into_iter()
        .map(|path| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                for _ in 0..50 {
                    fs.getattr(MOUNT, path).unwrap();
                }
            })
        })
        .collect();

    let writer = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            let fh = fs.open(MOUNT, "/y", libc::O_WRONLY).unwrap();
            for i in 0..50u64 {
                assert_eq!(fs.write(MOUNT, fh, i * 4, b"abcd").unwrap(), 4);
            }
            fs.release(MOUNT, fh).unwrap();
        })
    };

    for reader in readers {
        reader.join().unwrap();
    }
    writer.join().unwrap();

    assert_eq!(fs.getattr(MOUNT, "/y").unwrap().size, 200);
    let stats = fs.session().stats();
    assert_eq!(stats.issued, stats.completed);
    assert_eq!(stats.connection_failures, 0);
}

#[test]
fn test_worker_pool_shares_one_session() {
    let (fs, _handle) = setup(CredentialOverride::None);
    let fs = Arc::new(fs);
    fs.mkdir(MOUNT, "/pool", 0o755).unwrap();

    let (tx, rx) = mpsc::channel();
    {
        let pool = Dispatcher::pool(4);
        for i in 0..32 {
            let fs = Arc::clone(&fs);
            let tx = tx.clone();
            pool.run(move || {
                let path = format!("/pool/f{i}");
                let result = fs.create(OTHER, &path, 0o600).and_then(|fh| {
                    fs.write(OTHER, fh, 0, path.as_bytes())?;
                    fs.release(OTHER, fh)?;
                    fs.getattr(OTHER, &path)
                });
                tx.send((path, result)).unwrap();
            });
        }
    }

    for _ in 0..32 {
        let (path, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.unwrap().size, path.len() as u64);
    }
    let mut names = Vec::new();
    fs.readdir(OTHER, "/pool", |entry| {
        names.push(entry.name);
        false
    })
    .unwrap();
    assert_eq!(names.iter().filter(|n| n.starts_with('f')).count(), 32);
    assert_eq!(fs.open_handles(), 0);
}

#[cfg(unix)]
#[test]
fn test_multithread_option_starts_workers() {
    let (fs, _handle) = setup(CredentialOverride::None);
    let config = FuseConfig {
        multithread: true,
        worker_threads: 3,
        ..FuseConfig::default()
    };
    assert_eq!(UnixFuse::new(fs, &config).workers(), 3);

    let (fs, _handle) = setup(CredentialOverride::None);
    assert_eq!(UnixFuse::new(fs, &FuseConfig::default()).workers(), 0);
}

// ============== Connection Tests ==============

#[test]
fn test_disconnect_fails_with_eio() {
    let (fs, mut handle) = setup(CredentialOverride::None);
    let fh = fs.create(MOUNT, "/held", 0o644).unwrap();

    handle.disconnect();

    assert_eq!(fs.getattr(MOUNT, "/held").unwrap_err().to_errno(), libc::EIO);
    // Once failed, later calls fail fast the same way.
    assert_eq!(fs.mkdir(MOUNT, "/new", 0o755).unwrap_err().to_errno(), libc::EIO);
    assert!(!fs.session().is_connected());

    // The handle is still released locally.
    assert_eq!(fs.release(MOUNT, fh).unwrap_err().to_errno(), libc::EIO);
    assert_eq!(fs.open_handles(), 0);
}
