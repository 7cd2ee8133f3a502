//! Fixed-capacity, thread-safe byte ring used for both the send and receive
//! buffers of a connection.
//!
//! Backed by `parking_lot::Mutex` + `Condvar`: writers block until enough
//! space frees up, readers block until at least one byte is available,
//! and closing the ring wakes every waiter so blocked callers observe
//! end-of-stream instead of hanging forever.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Inner {
    buffer: Vec<u8>,
    head: usize,
    tail: usize,
    used: usize,
    closed: bool,
}

pub struct RingBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            capacity,
            inner: Mutex::new(Inner {
                buffer: vec![0u8; capacity],
                head: 0,
                tail: 0,
                used: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.inner.lock().used
    }

    pub fn available(&self) -> usize {
        self.capacity - self.used()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Non-blocking write: fails with `Error::Full` when `space < bytes.len()`.
    pub fn try_write(&self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        if self.capacity - inner.used < bytes.len() {
            return Err(Error::Full);
        }
        self.write_locked(&mut inner, bytes);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Blocking write: suspends until enough space is free or the ring closes.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(Error::Closed);
            }
            if self.capacity - inner.used >= bytes.len() {
                break;
            }
            self.not_full.wait(&mut inner);
        }
        self.write_locked(&mut inner, bytes);
        self.not_empty.notify_all();
        Ok(())
    }

    fn write_locked(&self, inner: &mut Inner, bytes: &[u8]) {
        for &byte in bytes {
            inner.buffer[inner.tail] = byte;
            inner.tail = (inner.tail + 1) % self.capacity;
        }
        inner.used += bytes.len();
    }

    /// Blocking read of up to `n` bytes; suspends until at least one byte is
    /// available or the ring is closed (in which case the residual bytes,
    /// possibly empty, are returned once and then further reads return empty).
    pub fn read(&self, n: usize) -> Vec<u8> {
        let mut inner = self.inner.lock();
        loop {
            if inner.used > 0 || inner.closed {
                break;
            }
            self.not_empty.wait(&mut inner);
        }
        let take = n.min(inner.used);
        let out = self.copy_out(&inner, take);
        inner.head = (inner.head + take) % self.capacity;
        inner.used -= take;
        drop(inner);
        self.not_full.notify_all();
        out
    }

    /// Like `read`, but gives up and returns `None` once `timeout` elapses
    /// without data becoming available.
    pub fn read_timeout(&self, n: usize, timeout: Duration) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if inner.used > 0 || inner.closed {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let timed_out = self.not_empty.wait_for(&mut inner, remaining).timed_out();
            if timed_out && inner.used == 0 && !inner.closed {
                return None;
            }
        }
        let take = n.min(inner.used);
        let out = self.copy_out(&inner, take);
        inner.head = (inner.head + take) % self.capacity;
        inner.used -= take;
        drop(inner);
        self.not_full.notify_all();
        Some(out)
    }

    /// Read up to `n` bytes without advancing `head`.
    pub fn peek(&self, n: usize) -> Vec<u8> {
        let inner = self.inner.lock();
        let take = n.min(inner.used);
        self.copy_out(&inner, take)
    }

    fn copy_out(&self, inner: &Inner, take: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(take);
        let mut pos = inner.head;
        for _ in 0..take {
            out.push(inner.buffer[pos]);
            pos = (pos + 1) % self.capacity;
        }
        out
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.head = 0;
        inner.tail = 0;
        inner.used = 0;
        self.not_full.notify_all();
    }

    /// Marks the ring closed: further writes fail, readers drain any
    /// residual bytes and then observe end-of-stream.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn overflow_refusal_then_succeeds_after_drain() {
        let ring = RingBuffer::new(10);
        ring.try_write(&[0u8; 10]).unwrap();
        assert!(matches!(ring.try_write(&[0u8]), Err(Error::Full)));

        let drained = ring.read(5);
        assert_eq!(drained.len(), 5);
        ring.try_write(&[1u8; 5]).unwrap();
    }

    #[test]
    fn round_trip_preserves_order() {
        let ring = RingBuffer::new(64);
        ring.try_write(b"hello ").unwrap();
        ring.try_write(b"fillp").unwrap();
        let read = ring.read(64);
        assert_eq!(&read, b"hello fillp");
    }

    #[test]
    fn peek_does_not_advance() {
        let ring = RingBuffer::new(16);
        ring.try_write(b"abc").unwrap();
        assert_eq!(ring.peek(3), b"abc");
        assert_eq!(ring.used(), 3);
        assert_eq!(ring.read(3), b"abc");
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn read_timeout_gives_up_when_ring_stays_empty() {
        let ring = RingBuffer::new(8);
        assert_eq!(ring.read_timeout(4, Duration::from_millis(20)), None);
    }

    #[test]
    fn read_timeout_returns_data_that_arrives_in_time() {
        let ring = Arc::new(RingBuffer::new(8));
        let writer_ring = ring.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            writer_ring.try_write(b"hi").unwrap();
        });
        let read = ring.read_timeout(8, Duration::from_millis(500));
        writer.join().unwrap();
        assert_eq!(read, Some(b"hi".to_vec()));
    }

    #[test]
    fn blocking_write_unblocks_on_drain() {
        let ring = Arc::new(RingBuffer::new(4));
        ring.try_write(&[0u8; 4]).unwrap();

        let writer_ring = ring.clone();
        let writer = thread::spawn(move || {
            writer_ring.write(&[9u8; 2]).unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        ring.read(2);
        writer.join().unwrap();
        assert_eq!(ring.used(), 4);
    }

    #[test]
    fn closed_ring_rejects_writes_and_drains_residual() {
        let ring = RingBuffer::new(8);
        ring.try_write(b"ab").unwrap();
        ring.close();
        assert!(matches!(ring.try_write(b"c"), Err(Error::Closed)));
        assert_eq!(ring.read(8), b"ab");
        assert_eq!(ring.read(8), Vec::<u8>::new());
    }
}
