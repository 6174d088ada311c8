//! Per-connection buffer cache (spec.md §5 "Memory pools"), grounded on the
//! original adaptive used/avail cache: buffers return to the pool after a
//! bounded number of uses, and the idle pool is trimmed against the current
//! number of live connections rather than kept unbounded.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

const MAX_USES_BEFORE_RETIRE: u32 = 100;
const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// A buffer handed out by [`BufferPool`], tracking how many times it has
/// been checked out so it can be retired instead of recycled forever.
pub struct PooledBuffer {
    pub data: Vec<u8>,
    uses: u32,
}

impl PooledBuffer {
    fn fresh() -> Self {
        PooledBuffer {
            data: Vec::with_capacity(DEFAULT_BUFFER_CAPACITY),
            uses: 0,
        }
    }
}

/// Cache of idle connection buffers. Sized relative to
/// `live_connections` so a burst of short-lived connections doesn't leave
/// the process holding one buffer per connection forever.
pub struct BufferPool {
    idle: Mutex<Vec<PooledBuffer>>,
    live_connections: AtomicUsize,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            idle: Mutex::new(Vec::new()),
            live_connections: AtomicUsize::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.live_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.live_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn acquire(&self) -> PooledBuffer {
        if let Some(mut buf) = self.idle.lock().pop() {
            buf.data.clear();
            return buf;
        }
        PooledBuffer::fresh()
    }

    /// Return a buffer after use. Retired (over-used) buffers and buffers
    /// beyond the 2x-live-connections cap are dropped instead of recycled.
    pub fn release(&self, mut buf: PooledBuffer) {
        buf.uses += 1;
        if buf.uses >= MAX_USES_BEFORE_RETIRE {
            return;
        }

        let cap = 2 * self.live_connections.load(Ordering::Relaxed).max(1);
        let mut idle = self.idle.lock();
        if idle.len() < cap {
            idle.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
