//! Bounded multi-producer/multi-consumer work queue.
//!
//! The single shared queue is the pool's backpressure point: once it is
//! full, producers block on `push`, and the time they spend blocked shows
//! up downstream as queueing time.

use crate::util::error::{PoolError, ProtocolError};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

pub struct WorkQueue<T> {
    inner: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> WorkQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Blocks while the queue is full. On success returns the queue depth
    /// observed at enqueue, including the pushed item.
    pub fn push(&self, item: T) -> Result<usize, PoolError> {
        let mut state = self.lock()?;
        while state.items.len() >= self.capacity && !state.closed {
            state = self
                .not_full
                .wait(state)
                .map_err(|_| ProtocolError::Poisoned { context: "work queue" })?;
        }
        if state.closed {
            return Err(PoolError::QueueClosed);
        }
        state.items.push_back(item);
        let depth = state.items.len();
        self.not_empty.notify_one();
        Ok(depth)
    }

    /// Blocks while the queue is empty and open. Returns `None` once the
    /// queue is closed and drained, which ends a consumer's loop.
    pub fn pop(&self) -> Result<Option<T>, PoolError> {
        let mut state = self.lock()?;
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if state.closed {
                return Ok(None);
            }
            state = self
                .not_empty
                .wait(state)
                .map_err(|_| ProtocolError::Poisoned { context: "work queue" })?;
        }
    }

    /// Closes the queue: pending items are still drained, blocked producers
    /// fail with `QueueClosed`, and idle consumers wake up to observe the
    /// end of work.
    pub fn close(&self) -> Result<(), PoolError> {
        let mut state = self.lock()?;
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|state| state.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState<T>>, PoolError> {
        self.inner
            .lock()
            .map_err(|_| ProtocolError::Poisoned { context: "work queue" }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_reports_depth_including_item() {
        let queue = WorkQueue::with_capacity(4);
        assert_eq!(queue.push(1).unwrap(), 1);
        assert_eq!(queue.push(2).unwrap(), 2);
        assert_eq!(queue.pop().unwrap(), Some(1));
    }

    #[test]
    fn full_queue_blocks_until_a_pop() {
        let queue = Arc::new(WorkQueue::with_capacity(1));
        queue.push(1u32).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap(), Some(1));
        producer.join().unwrap();
        assert_eq!(queue.pop().unwrap(), Some(2));
    }

    #[test]
    fn close_drains_then_ends_consumers() {
        let queue = WorkQueue::with_capacity(2);
        queue.push(1).unwrap();
        queue.close().unwrap();
        assert!(matches!(queue.push(2), Err(PoolError::QueueClosed)));
        assert_eq!(queue.pop().unwrap(), Some(1));
        assert_eq!(queue.pop().unwrap(), None);
    }
}
