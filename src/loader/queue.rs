//! Cross-thread job queue.
//!
//! A lock-free stack: `push` splices a node in right after the head slot
//! and `try_pop` detaches the node found there, so values come back in
//! last-in-first-out order. Consumers that want to sleep while the queue is
//! empty use [`CrossThreadQueue::wait_pop`], which parks on a condition
//! variable until a value arrives or the queue is closed.

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::epoch::{self, Atomic, Owned};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned by `push` on a closed queue, handing the value back
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("queue is closed")]
pub struct QueueClosed<T>(pub T);

struct Node<T> {
    value: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

/// Multi-producer job queue shared between the main and loader threads
pub struct CrossThreadQueue<T> {
    head: Atomic<Node<T>>,
    closed: AtomicBool,
    lock: Mutex<()>,
    available: Condvar,
}

// SAFETY: values are moved in and out whole, never shared by reference.
unsafe impl<T: Send> Send for CrossThreadQueue<T> {}
unsafe impl<T: Send> Sync for CrossThreadQueue<T> {}

impl<T> Default for CrossThreadQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CrossThreadQueue<T> {
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
            closed: AtomicBool::new(false),
            lock: Mutex::new(()),
            available: Condvar::new(),
        }
    }

    /// Push a value, failing once the queue is closed
    pub fn push(&self, value: T) -> Result<(), QueueClosed<T>> {
        if self.is_closed() {
            return Err(QueueClosed(value));
        }

        let mut node = Owned::new(Node {
            value: ManuallyDrop::new(value),
            next: Atomic::null(),
        });
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Relaxed, &guard);
            node.next.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed, &guard)
            {
                Ok(_) => break,
                Err(err) => node = err.new,
            }
        }

        // Taking the lock orders this notify after a waiter's emptiness check.
        let _lock = self.lock.lock();
        self.available.notify_one();
        Ok(())
    }

    /// Pop the most recently pushed value
    pub fn try_pop(&self) -> Option<T> {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            // SAFETY: the node is protected by the pinned guard and only
            // destroyed through `defer_destroy` after it has been unlinked.
            let node = unsafe { head.as_ref() }?;
            let next = node.next.load(Ordering::Relaxed, &guard);
            if self
                .head
                .compare_exchange(head, next, Ordering::Relaxed, Ordering::Relaxed, &guard)
                .is_ok()
            {
                // SAFETY: the successful exchange unlinked the node, so this
                // thread is the only one to read its value.
                unsafe {
                    guard.defer_destroy(head);
                    return Some(ManuallyDrop::into_inner(ptr::read(&node.value)));
                }
            }
        }
    }

    /// Block until a value is available; `None` once closed and empty
    pub fn wait_pop(&self) -> Option<T> {
        loop {
            if let Some(value) = self.try_pop() {
                return Some(value);
            }
            let mut lock = self.lock.lock();
            if let Some(value) = self.try_pop() {
                return Some(value);
            }
            if self.is_closed() {
                return None;
            }
            self.available.wait(&mut lock);
        }
    }

    /// Reject further pushes and wake every waiter
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _lock = self.lock.lock();
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Ordering::Acquire, &guard).is_null()
    }
}

impl<T> Drop for CrossThreadQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pop_order_is_lifo() {
        let queue = CrossThreadQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();

        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_push_after_close_returns_value() {
        let queue = CrossThreadQueue::new();
        queue.close();
        assert_eq!(queue.push("job"), Err(QueueClosed("job")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_pop_wakes_on_push() {
        let queue = Arc::new(CrossThreadQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(7u32).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(7));
    }

    #[test]
    fn test_close_wakes_waiter() {
        let queue: Arc<CrossThreadQueue<u32>> = Arc::new(CrossThreadQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_values_pushed_before_close_still_pop() {
        let queue = CrossThreadQueue::new();
        queue.push(1).unwrap();
        queue.close();
        assert_eq!(queue.wait_pop(), Some(1));
        assert_eq!(queue.wait_pop(), None);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(CrossThreadQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(t * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut seen = Vec::new();
        while let Some(value) = queue.try_pop() {
            seen.push(value);
        }
        seen.sort_unstable();
        let mut expected: Vec<_> = (0..4)
            .flat_map(|t| (0..250).map(move |i| t * 1000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_drop_releases_pending_values() {
        let value = Arc::new(());
        let queue = CrossThreadQueue::new();
        queue.push(Arc::clone(&value)).unwrap();
        queue.push(Arc::clone(&value)).unwrap();
        drop(queue);
        assert_eq!(Arc::strong_count(&value), 1);
    }
}
