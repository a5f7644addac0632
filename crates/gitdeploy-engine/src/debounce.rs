//! Per-`RefId` one-shot timer that collapses a burst of pushes into a
//! single fire.

use std::collections::HashMap;
use std::time::Duration;

use gitdeploy_types::RefId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Debouncer {
    delay: Duration,
    timers: HashMap<RefId, JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timers: HashMap::new(),
        }
    }

    /// Install a new timer for `ref_id`, replacing (aborting) any existing one.
    /// On fire, `ref_id` is sent on `tx`. The caller is responsible for not
    /// calling this while the slot is active (§4.3).
    pub fn arm(&mut self, ref_id: RefId, tx: mpsc::Sender<RefId>) {
        if let Some(previous) = self.timers.remove(&ref_id) {
            previous.abort();
        }

        let delay = self.delay;
        let fired_id = ref_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired_id).await;
        });

        self.timers.insert(ref_id, handle);
    }

    /// Forget a timer that has already fired (called by the event loop
    /// when it receives the debounced message).
    pub fn forget(&mut self, ref_id: &RefId) {
        self.timers.remove(ref_id);
    }

    /// Stop and remove a timer without it firing, e.g. when a job starts
    /// for this `RefId` or when it is killed while pending.
    pub fn cancel(&mut self, ref_id: &RefId) {
        if let Some(handle) = self.timers.remove(ref_id) {
            handle.abort();
        }
    }

    pub fn is_armed(&self, ref_id: &RefId) -> bool {
        self.timers.contains_key(ref_id)
    }
}
