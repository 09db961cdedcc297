//! Concurrency properties of the drive loop, exercised from many threads.

use std::collections::VecDeque;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use fusenfs_core::{
    Callback, CredentialOverride, Identity, IdentityMapper, Interest, Readiness, RemoteClient,
    RemoteError, RemoteReply, RemoteRequest, RemoteSession, RemoteStat,
};

#[derive(Default)]
struct ServiceCounters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    services: AtomicUsize,
}

/// Client that records overlapping `service` calls and answers queued
/// requests in LIFO order, so threads routinely complete each other's calls.
struct InstrumentedClient {
    sock: UnixStream,
    _peer: UnixStream,
    queue: VecDeque<(u32, RemoteRequest, Callback)>,
    uid: u32,
    counters: Arc<ServiceCounters>,
    /// Service calls after which the connection dies.
    fail_after: Option<usize>,
}

impl InstrumentedClient {
    fn new(counters: Arc<ServiceCounters>, fail_after: Option<usize>) -> Self {
        let (sock, peer) = UnixStream::pair().unwrap();
        InstrumentedClient {
            sock,
            _peer: peer,
            queue: VecDeque::new(),
            uid: 0,
            counters,
            fail_after,
        }
    }
}

impl RemoteClient for InstrumentedClient {
    fn submit(&mut self, request: RemoteRequest, callback: Callback) -> Result<(), RemoteError> {
        self.queue.push_back((self.uid, request, callback));
        Ok(())
    }

    fn which_events(&self) -> Interest {
        Interest::READ_WRITE
    }

    fn as_raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    fn service(&mut self, _readiness: Readiness) -> Result<(), RemoteError> {
        let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(now, Ordering::SeqCst);
        let count = self.counters.services.fetch_add(1, Ordering::SeqCst) + 1;
        thread::sleep(Duration::from_micros(200));

        let result = match self.fail_after {
            Some(limit) if count > limit => {
                Err(RemoteError::Connection("connection reset".to_string()))
            }
            _ => {
                if let Some((uid, request, callback)) = self.queue.pop_back() {
                    let reply = match request {
                        RemoteRequest::Lstat { path } => RemoteReply::Stat(RemoteStat {
                            uid,
                            size: path.len() as u64,
                            ..Default::default()
                        }),
                        _ => RemoteReply::Done,
                    };
                    callback(Ok(reply));
                }
                Ok(())
            }
        };

        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn set_uid(&mut self, uid: u32) {
        self.uid = uid;
    }

    fn set_gid(&mut self, _gid: u32) {}
}

fn session(client: InstrumentedClient) -> Arc<RemoteSession> {
    let mapper = IdentityMapper::new(CredentialOverride::None, Identity::new(1000, 1000));
    Arc::new(RemoteSession::new(
        "mem://test/",
        Box::new(client),
        mapper,
        Duration::from_millis(5),
    ))
}

#[test]
fn test_at_most_one_driver() {
    let counters = Arc::new(ServiceCounters::default());
    let session = session(InstrumentedClient::new(Arc::clone(&counters), None));
    let threads = 8;
    let calls_per_thread = 25;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..calls_per_thread {
                    let path = format!("/t{t}/{}", "x".repeat(i));
                    let caller = Identity::new(2000 + t as u32, 2000);
                    match session.call(caller, RemoteRequest::Lstat { path: path.clone() }, None) {
                        Ok(RemoteReply::Stat(st)) => {
                            // Each caller sees its own answer with its own credentials.
                            assert_eq!(st.size, path.len() as u64);
                            assert_eq!(st.uid, caller.uid);
                        }
                        other => panic!("unexpected result: {:?}", other),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counters.max_active.load(Ordering::SeqCst), 1);
    let stats = session.stats();
    assert_eq!(stats.issued, (threads * calls_per_thread) as u64);
    assert_eq!(stats.completed, stats.issued);
}

#[test]
fn test_completion_liveness_on_connection_failure() {
    let counters = Arc::new(ServiceCounters::default());
    let session = session(InstrumentedClient::new(Arc::clone(&counters), Some(10)));
    let threads = 6;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut outcomes = Vec::new();
                for i in 0..10 {
                    let request = RemoteRequest::Lstat {
                        path: format!("/{t}/{i}"),
                    };
                    outcomes.push(session.call(Identity::new(1, 1), request, None));
                }
                outcomes
            })
        })
        .collect();

    let mut failures = 0;
    for handle in handles {
        for outcome in handle.join().unwrap() {
            if let Err(e) = outcome {
                assert_eq!(e.errno(), libc::EIO);
                failures += 1;
            }
        }
    }

    // 60 calls but the connection dies after 10 service steps.
    assert!(failures >= 50);
    assert!(!session.is_connected());
    assert_eq!(session.stats().connection_failures, 1);
}

#[test]
fn test_issue_then_wait_from_another_thread() {
    let counters = Arc::new(ServiceCounters::default());
    let session = session(InstrumentedClient::new(counters, None));

    let calls: Vec<_> = (0..4)
        .map(|i| {
            session
                .issue(
                    Identity::new(i, i),
                    RemoteRequest::Lstat {
                        path: format!("/{i}"),
                    },
                    None,
                )
                .unwrap()
        })
        .collect();

    let waiter = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            calls
                .into_iter()
                .map(|call| session.wait(call))
                .collect::<Vec<_>>()
        })
    };

    let results = waiter.join().unwrap();
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(RemoteReply::Stat(st)) => assert_eq!(st.uid, i as u32),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
