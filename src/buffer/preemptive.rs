//! Lossy ring buffer for byte chunks
//!
//! `put` never blocks and never fails; overflow policy depends on the mode.
//! While unstarted the buffer keeps a sliding window of the most recent
//! chunks (oldest dropped). Once started it overwrites the newest slot
//! instead, so consumption keeps proceeding from a stable head once the
//! stream is primed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

/// Bounded overwrite-based chunk buffer
///
/// Producer and consumer run on different tasks; all operations serialize
/// through a single internal lock.
#[derive(Debug)]
pub struct PreemptiveBuffer {
    queue: Mutex<VecDeque<Bytes>>,
    max: usize,
    started: AtomicBool,
}

impl PreemptiveBuffer {
    /// Create a buffer holding at most `max` chunks
    pub fn new(max: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(max)),
            max,
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Switch to started mode (overwrite-newest on overflow)
    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// Switch back to unstarted mode (sliding window on overflow)
    pub fn suspend(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }

    /// Remove and return the oldest chunk, `None` when empty
    pub fn next(&self) -> Option<Bytes> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Append a chunk, applying the mode's overflow policy
    pub fn put(&self, data: Bytes) {
        let mut queue = self.queue.lock().unwrap();
        let full = queue.len() == self.max;
        if self.started.load(Ordering::Acquire) {
            match queue.back_mut() {
                Some(last) if full => *last = data,
                _ => queue.push_back(data),
            }
        } else {
            if full {
                queue.pop_front();
            }
            queue.push_back(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: u8) -> Bytes {
        Bytes::copy_from_slice(&[n])
    }

    #[test]
    fn test_fifo_order() {
        let buffer = PreemptiveBuffer::new(4);
        buffer.put(chunk(1));
        buffer.put(chunk(2));
        buffer.put(chunk(3));

        assert_eq!(buffer.next(), Some(chunk(1)));
        assert_eq!(buffer.next(), Some(chunk(2)));
        assert_eq!(buffer.next(), Some(chunk(3)));
        assert_eq!(buffer.next(), None);
    }

    #[test]
    fn test_unstarted_keeps_most_recent_window() {
        let buffer = PreemptiveBuffer::new(3);
        for n in 1..=7 {
            buffer.put(chunk(n));
        }

        // Last 3 of 7 pushes, in push order.
        assert_eq!(buffer.next(), Some(chunk(5)));
        assert_eq!(buffer.next(), Some(chunk(6)));
        assert_eq!(buffer.next(), Some(chunk(7)));
        assert_eq!(buffer.next(), None);
    }

    #[test]
    fn test_started_overwrites_newest_slot() {
        let buffer = PreemptiveBuffer::new(3);
        buffer.start();
        for n in 1..=5 {
            buffer.put(chunk(n));
        }

        // Head stays stable, last slot holds the latest chunk.
        assert_eq!(buffer.next(), Some(chunk(1)));
        assert_eq!(buffer.next(), Some(chunk(2)));
        assert_eq!(buffer.next(), Some(chunk(5)));
        assert_eq!(buffer.next(), None);
    }

    #[test]
    fn test_start_suspend_clear() {
        let buffer = PreemptiveBuffer::new(2);
        assert!(!buffer.is_started());

        buffer.start();
        assert!(buffer.is_started());

        buffer.suspend();
        assert!(!buffer.is_started());

        buffer.put(chunk(1));
        buffer.put(chunk(2));
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.next(), None);
    }
}
