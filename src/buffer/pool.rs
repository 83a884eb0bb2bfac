//! Connection buffer pool.
//!
//! Every session borrows one read and one write buffer for its lifetime.
//! Buffers go back to the pool when the [`PooledBuffer`] is dropped, so a
//! session releases them on every exit path, including panics.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam::queue::SegQueue;
use thiserror::Error;

use crate::config::BufferConfig;

/// Buffers that grew past this multiple of the nominal size are not reused.
const TRIM_FACTOR: usize = 4;

#[derive(Debug, Error)]
pub enum PoolError {
    /// All allowed buffers are checked out.
    #[error("buffer pool exhausted ({outstanding} buffers outstanding)")]
    Exhausted { outstanding: usize },
}

/// A shared pool of connection buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    free: SegQueue<BytesMut>,
    /// Buffers currently sitting in `free`.
    free_count: AtomicUsize,
    /// Buffers currently checked out.
    outstanding: AtomicUsize,
    buffer_size: usize,
    max_pooled: usize,
    /// 0 means unbounded.
    max_outstanding: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize, max_outstanding: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: SegQueue::new(),
                free_count: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                buffer_size,
                max_pooled,
                max_outstanding,
            }),
        }
    }

    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.buffer_size, config.max_pooled, config.max_outstanding)
    }

    /// Check out an empty buffer with at least the nominal capacity.
    pub fn acquire(&self) -> Result<PooledBuffer, PoolError> {
        let inner = &self.inner;
        let mut current = inner.outstanding.load(Ordering::Relaxed);
        loop {
            if inner.max_outstanding != 0 && current >= inner.max_outstanding {
                return Err(PoolError::Exhausted {
                    outstanding: current,
                });
            }
            match inner.outstanding.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let buf = match inner.free.pop() {
            Some(buf) => {
                inner.free_count.fetch_sub(1, Ordering::Relaxed);
                buf
            }
            None => BytesMut::with_capacity(inner.buffer_size),
        };

        Ok(PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers ready for reuse.
    pub fn pooled(&self) -> usize {
        self.inner.free_count.load(Ordering::Acquire)
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }
}

/// A buffer borrowed from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let pool = &self.pool;
        pool.outstanding.fetch_sub(1, Ordering::AcqRel);

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        if buf.capacity() > pool.buffer_size * TRIM_FACTOR {
            return;
        }
        // Frames split off the front shrink the visible capacity.
        buf.reserve(pool.buffer_size);
        if pool.free_count.fetch_add(1, Ordering::AcqRel) < pool.max_pooled {
            pool.free.push(buf);
        } else {
            pool.free_count.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
