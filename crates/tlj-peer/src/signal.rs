//! Blocking notification primitives shared by the client and server.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

use tlj_frame::ConnectionId;

/// Whether a connection is still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// One-shot signal carrying the error that ended something.
///
/// The first call to [`CloseSignal::close`] wins; later calls are ignored.
/// Any number of observers can wait on it.
pub struct CloseSignal<E> {
    slot: Mutex<Option<Arc<E>>>,
    fired: Condvar,
}

impl<E> CloseSignal<E> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            fired: Condvar::new(),
        }
    }

    /// Record `err` as the reason. Returns `false` if already closed.
    pub fn close(&self, err: E) -> bool {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::new(err));
        self.fired.notify_all();
        true
    }

    /// The recorded reason, if the signal has fired.
    pub fn get(&self) -> Option<Arc<E>> {
        lock(&self.slot).clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Block until the signal fires or `timeout` elapses (`None` waits forever).
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Arc<E>> {
        let slot = lock(&self.slot);
        match timeout {
            None => {
                let slot = self
                    .fired
                    .wait_while(slot, |slot| slot.is_none())
                    .unwrap_or_else(PoisonError::into_inner);
                slot.clone()
            }
            Some(timeout) => {
                let (slot, _) = self
                    .fired
                    .wait_timeout_while(slot, timeout, |slot| slot.is_none())
                    .unwrap_or_else(PoisonError::into_inner);
                slot.clone()
            }
        }
    }
}

impl<E> Default for CloseSignal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Debug> fmt::Debug for CloseSignal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseSignal")
            .field("reason", &self.get())
            .finish()
    }
}

/// Bounded FIFO of connections whose read loop or responder failed.
///
/// Pushing never blocks: when the queue is full the oldest entry is dropped.
#[derive(Debug)]
pub struct FailedQueue {
    entries: Mutex<VecDeque<ConnectionId>>,
    ready: Condvar,
    capacity: usize,
}

impl FailedQueue {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
        }
    }

    pub fn push(&self, id: ConnectionId) {
        let mut entries = lock(&self.entries);
        if entries.len() >= self.capacity {
            if let Some(dropped) = entries.pop_front() {
                warn!(
                    connection = %dropped,
                    capacity = self.capacity,
                    "failed-connection queue full; dropped oldest entry"
                );
            }
        }
        entries.push_back(id);
        self.ready.notify_one();
    }

    pub fn try_pop(&self) -> Option<ConnectionId> {
        lock(&self.entries).pop_front()
    }

    /// Block until an entry is available or `timeout` elapses (`None` waits forever).
    pub fn pop(&self, timeout: Option<Duration>) -> Option<ConnectionId> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut entries = lock(&self.entries);
        loop {
            if let Some(id) = entries.pop_front() {
                return Some(id);
            }
            entries = match deadline {
                None => self
                    .ready
                    .wait(entries)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.checked_duration_since(Instant::now())?;
                    self.ready
                        .wait_timeout(entries, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn first_close_wins() {
        let signal = CloseSignal::new();
        assert!(!signal.is_closed());
        assert!(signal.close("first"));
        assert!(!signal.close("second"));
        assert_eq!(*signal.get().unwrap(), "first");
    }

    #[test]
    fn wait_times_out_when_open() {
        let signal: CloseSignal<&str> = CloseSignal::new();
        assert!(signal.wait(Some(Duration::from_millis(20))).is_none());
    }

    #[test]
    fn wait_wakes_on_close() {
        let signal = Arc::new(CloseSignal::new());
        let closer = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close(7u32);
        });

        assert_eq!(signal.wait(Some(Duration::from_secs(5))).as_deref(), Some(&7));
        handle.join().unwrap();
    }

    #[test]
    fn queue_is_fifo() {
        let queue = FailedQueue::new(4);
        queue.push(ConnectionId::new(1));
        queue.push(ConnectionId::new(2));
        assert_eq!(queue.try_pop(), Some(ConnectionId::new(1)));
        assert_eq!(queue.try_pop(), Some(ConnectionId::new(2)));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = FailedQueue::new(2);
        for raw in 1..=3 {
            queue.push(ConnectionId::new(raw));
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(ConnectionId::new(2)));
        assert_eq!(queue.try_pop(), Some(ConnectionId::new(3)));
    }

    #[test]
    fn pop_waits_for_push() {
        let queue = Arc::new(FailedQueue::new(8));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(ConnectionId::new(42));
        });

        assert_eq!(
            queue.pop(Some(Duration::from_secs(5))),
            Some(ConnectionId::new(42))
        );
        handle.join().unwrap();
    }

    #[test]
    fn pop_times_out_when_empty() {
        let queue = FailedQueue::new(8);
        assert_eq!(queue.pop(Some(Duration::from_millis(20))), None);
    }

    #[test]
    fn zero_capacity_is_raised() {
        assert_eq!(FailedQueue::new(0).capacity(), 1);
    }
}
