use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Result of attempting to enqueue.
///
/// # Example
/// ```rust
/// use lumix_core::prelude::{bounded, SendOutcome};
///
/// let (tx, _rx) = bounded::<u8>(1);
/// assert_eq!(tx.send(1), SendOutcome::Ok);
/// assert_eq!(tx.send(2), SendOutcome::Full);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Value was accepted.
    Ok,
    /// Queue is full; the value was dropped.
    Full,
    /// Queue is closed; the value was dropped.
    Closed,
}

/// Result of attempting to dequeue.
#[derive(Debug)]
pub enum RecvOutcome<T> {
    /// Received value.
    Data(T),
    /// Queue has been closed and drained.
    Closed,
    /// Queue currently empty.
    Empty,
}

/// Producer side of the hand-off queue. Never blocks.
///
/// Cloning is cheap; any number of producer contexts may push concurrently
/// and the consumer observes a single FIFO order.
pub struct BoundedTx<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for BoundedTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> BoundedTx<T> {
    /// Attempt to send without blocking.
    pub fn send(&self, value: T) -> SendOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return SendOutcome::Closed;
        }
        match self.inner.queue.push(value) {
            Ok(()) => {
                self.inner.notify();
                SendOutcome::Ok
            }
            Err(_) => SendOutcome::Full,
        }
    }

    /// Close the queue to further sends and wake the consumer.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }
}

/// Consumer side of the hand-off queue.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use lumix_core::prelude::{bounded, RecvOutcome};
///
/// let (tx, rx) = bounded::<u8>(2);
/// tx.send(7);
/// tx.close();
/// assert!(matches!(rx.recv_timeout(Duration::from_millis(5)), RecvOutcome::Data(7)));
/// assert!(matches!(rx.recv_timeout(Duration::from_millis(5)), RecvOutcome::Closed));
/// ```
pub struct BoundedRx<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> BoundedRx<T> {
    /// Attempt to receive without blocking.
    pub fn recv(&self) -> RecvOutcome<T> {
        match self.inner.queue.pop() {
            Some(value) => RecvOutcome::Data(value),
            None => {
                if self.inner.closed.load(Ordering::Acquire) {
                    RecvOutcome::Closed
                } else {
                    RecvOutcome::Empty
                }
            }
        }
    }

    /// Wait up to `timeout` for a value. Only the consumer waits; producers never do.
    pub fn recv_timeout(&self, timeout: Duration) -> RecvOutcome<T> {
        match self.recv() {
            RecvOutcome::Empty => {}
            other => return other,
        }
        let mut signalled = self.inner.signal.lock();
        if !*signalled {
            let _ = self.inner.wake.wait_for(&mut signalled, timeout);
        }
        *signalled = false;
        drop(signalled);
        self.recv()
    }

    /// Mark the queue as closed; senders will see `Closed`.
    pub fn close(&self) {
        self.inner.close();
    }
}

struct QueueInner<T> {
    queue: ArrayQueue<T>,
    closed: AtomicBool,
    signal: Mutex<bool>,
    wake: Condvar,
}

impl<T> QueueInner<T> {
    fn notify(&self) {
        *self.signal.lock() = true;
        self.wake.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify();
    }
}

/// Create a bounded queue with the given capacity (at least one slot).
pub fn bounded<T>(capacity: usize) -> (BoundedTx<T>, BoundedRx<T>) {
    let inner = Arc::new(QueueInner {
        queue: ArrayQueue::new(capacity.max(1)),
        closed: AtomicBool::new(false),
        signal: Mutex::new(false),
        wake: Condvar::new(),
    });
    (
        BoundedTx {
            inner: inner.clone(),
        },
        BoundedRx { inner },
    )
}
