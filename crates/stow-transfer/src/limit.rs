//! Resizable weighted transfer limits
//!
//! tokio's `Semaphore` cannot shrink, and these limits must resize at
//! runtime — new acquisitions observe the new width, in-flight work is
//! unaffected — so this is a small hand-rolled async semaphore: a
//! mutex-guarded width/in-flight pair plus a `Notify` for waiters.
//!
//! Weights are in 1-MiB units: a transfer acquires one unit per MiB of
//! chunk, keeping total in-flight bytes roughly constant as the configured
//! chunk size changes. A weight larger than the whole width is admitted when
//! the limit is otherwise idle, so oversized chunks cannot deadlock.

use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const MIB: u64 = 1024 * 1024;

/// Weight of a chunk of `len` bytes, in 1-MiB units.
pub fn weight_for(len: u64) -> u64 {
    len.div_ceil(MIB).max(1)
}

struct State {
    width: u64,
    in_flight: u64,
}

pub struct TransferLimit {
    state: Mutex<State>,
    notify: Notify,
}

impl TransferLimit {
    pub fn new(width: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                width: width.max(1),
                in_flight: 0,
            }),
            notify: Notify::new(),
        })
    }

    /// Reconfigure the width. In-flight permits are unaffected; waiters are
    /// re-polled against the new width.
    pub fn set_width(&self, width: u64) {
        let mut state = self.state.lock().expect("limit lock poisoned");
        state.width = width.max(1);
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn width(&self) -> u64 {
        self.state.lock().expect("limit lock poisoned").width
    }

    pub fn in_flight(&self) -> u64 {
        self.state.lock().expect("limit lock poisoned").in_flight
    }

    /// Wait until `weight` units fit under the width, then take them. The
    /// returned permit releases on drop — including when the acquiring
    /// future is cancelled mid-wait, which takes nothing.
    pub async fn acquire(self: &Arc<Self>, weight: u64) -> LimitPermit {
        let weight = weight.max(1);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await cannot be missed.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().expect("limit lock poisoned");
                if state.in_flight + weight <= state.width
                    || (state.in_flight == 0 && weight > state.width)
                {
                    state.in_flight += weight;
                    return LimitPermit {
                        limit: self.clone(),
                        weight,
                    };
                }
            }

            notified.await;
        }
    }
}

pub struct LimitPermit {
    limit: Arc<TransferLimit>,
    weight: u64,
}

impl Drop for LimitPermit {
    fn drop(&mut self) {
        let mut state = self.limit.state.lock().expect("limit lock poisoned");
        state.in_flight = state.in_flight.saturating_sub(self.weight);
        drop(state);
        self.limit.notify.notify_waiters();
    }
}
