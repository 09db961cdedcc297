use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::RemoteError;
use crate::types::RemoteReply;

/// Result recorded in a completion slot.
pub type CallResult = Result<RemoteReply, RemoteError>;

#[derive(Debug)]
enum SlotState {
    Issued,
    Completed(CallResult),
    /// Result handed to the owner.
    Taken,
}

/// Per-call record of completion status and result payload.
///
/// Moves `Issued -> Completed` exactly once; the first completion wins and
/// later ones are dropped. Variable-length payloads are cut to `limit`
/// before they are stored.
#[derive(Debug)]
pub struct CompletionSlot {
    done: AtomicBool,
    state: Mutex<SlotState>,
    limit: Option<usize>,
}

impl CompletionSlot {
    pub fn new(limit: Option<usize>) -> Self {
        CompletionSlot {
            done: AtomicBool::new(false),
            state: Mutex::new(SlotState::Issued),
            limit,
        }
    }

    /// Record the result. Returns false if the slot was already completed.
    pub fn complete(&self, mut result: CallResult) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Issued) {
            warn!("Ignoring duplicate completion");
            return false;
        }
        if let (Some(limit), Ok(reply)) = (self.limit, result.as_mut()) {
            reply.truncate_to(limit);
        }
        *state = SlotState::Completed(result);
        self.done.store(true, Ordering::Release);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Byte bound applied to `Data`/`Link` payloads.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Hand out the stored result. `None` while still issued or once taken.
    pub fn take(&self) -> Option<CallResult> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Completed(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }
}

/// Owner-side handle to an issued call.
#[derive(Debug)]
pub struct PendingCall {
    pub(crate) id: u64,
    pub(crate) slot: Arc<CompletionSlot>,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_complete(&self) -> bool {
        self.slot.is_complete()
    }
}
