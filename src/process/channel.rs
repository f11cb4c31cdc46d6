//! Single-producer, multi-consumer fan-out over `std::sync::mpsc`.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct BroadcastState<T> {
    next_id: u64,
    senders: Vec<(u64, Sender<T>)>,
    closed: bool,
}

/// Delivers every sent value to each live subscriber.
///
/// Closing drops all senders, which ends every subscription. Subscribing after
/// close yields a subscription that is already finished.
pub struct Broadcast<T> {
    state: Arc<Mutex<BroadcastState<T>>>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone> Broadcast<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BroadcastState {
                next_id: 0,
                senders: Vec::new(),
                closed: false,
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = state.next_id;
        state.next_id += 1;
        if !state.closed {
            state.senders.push((id, tx));
        }
        Subscription { id, rx }
    }

    /// Ends one subscription without affecting the others.
    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.senders.retain(|(sender_id, _)| *sender_id != id);
        }
    }

    /// Sends `value` to every subscriber, pruning the ones that hung up.
    pub fn send(&self, value: T) {
        if let Ok(mut state) = self.state.lock() {
            state
                .senders
                .retain(|(_, tx)| tx.send(value.clone()).is_ok());
        }
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.senders.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|state| state.closed).unwrap_or(true)
    }
}

impl<T: Clone> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving end of a [`Broadcast`].
pub struct Subscription<T> {
    id: u64,
    rx: Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

impl<T> Iterator for Subscription<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rx.recv().ok()
    }
}
