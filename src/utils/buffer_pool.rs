//! Thread-local reusable buffer pool so per-frame reads/writes avoid a
//! fresh heap allocation on the hot path (spec §9 "buffer strategy").

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

use bytes::BytesMut;

const POOL_CAPACITY: usize = 16;
const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

thread_local! {
    static POOL: RefCell<Vec<BytesMut>> = RefCell::new(Vec::with_capacity(POOL_CAPACITY));
}

/// An owned [`BytesMut`] borrowed from the thread-local pool. Cleared and
/// returned to the pool on drop, instead of being deallocated, as long as
/// the pool has room.
pub struct PooledBuffer {
    buf: Option<BytesMut>,
}

impl PooledBuffer {
    pub fn acquire() -> Self {
        let buf = POOL.with(|pool| pool.borrow_mut().pop());
        PooledBuffer {
            buf: Some(buf.unwrap_or_else(|| BytesMut::with_capacity(DEFAULT_BUFFER_SIZE))),
        }
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer taken")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer taken")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            POOL.with(|pool| {
                let mut pool = pool.borrow_mut();
                if pool.len() < POOL_CAPACITY {
                    pool.push(buf);
                }
            });
        }
    }
}
