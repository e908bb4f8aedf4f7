//! Per-thread lock-free log: every `scope`/`meta_update`/`label`/
//! `counter_*` call from user code ends up as one packed `u64` pushed
//! into the calling thread's ring (§4.12 "Per-thread SPSC ring").

use crate::token::{self, ProfileToken};
use crate::{PROFILE_LABEL_MAX_LEN, PROFILE_MAX_THREADS, PROFILE_PER_THREAD_BUFFER_SIZE};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Log-entry tag, packed into the top 3 bits of each ring slot (§4.12
/// "3-bit type / 13-bit index / 48-bit tick").
pub(crate) const ENTRY_LEAVE: u64 = 0;
pub(crate) const ENTRY_ENTER: u64 = 1;
pub(crate) const ENTRY_META: u64 = 2;
pub(crate) const ENTRY_LABEL: u64 = 3;
#[allow(dead_code)]
pub(crate) const ENTRY_GPU_EXTRA: u64 = 4;
pub(crate) const ENTRY_LABEL_LITERAL: u64 = 5;

const TICK_BITS: u32 = 48;
const INDEX_BITS: u32 = 13;
const TICK_MASK: u64 = (1 << TICK_BITS) - 1;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

pub(crate) fn pack(ty: u64, index: u16, tick: u64) -> u64 {
    (ty << (TICK_BITS + INDEX_BITS)) | ((index as u64 & INDEX_MASK) << TICK_BITS) | (tick & TICK_MASK)
}

pub(crate) fn unpack(entry: u64) -> (u64, u16, u64) {
    let ty = entry >> (TICK_BITS + INDEX_BITS);
    let index = (entry >> TICK_BITS) & INDEX_MASK;
    let tick = entry & TICK_MASK;
    (ty, index as u16, tick)
}

static EPOCH: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

/// Monotonic tick counter truncated to 48 bits; wraps roughly every 78
/// hours of nanosecond uptime, which `frame::tick_delta` accounts for
/// (§4.12 "wrap-safe tick arithmetic").
pub(crate) fn now_ticks() -> u64 {
    EPOCH.elapsed().as_nanos() as u64 & TICK_MASK
}

/// A single thread's ring buffer plus its free-running labels pool.
/// `put` only the owning thread advances; `get` only [`crate::frame::flip`]
/// advances, making each log a single-producer/single-consumer queue.
pub(crate) struct ThreadLog {
    pub(crate) id: u64,
    pub(crate) name: Mutex<String>,
    buffer: Box<[AtomicU64]>,
    mask: usize,
    put: AtomicUsize,
    get: AtomicUsize,
    overflow: AtomicU64,
    labels: Mutex<Vec<String>>,
}

impl ThreadLog {
    fn new(id: u64) -> Self {
        let len = PROFILE_PER_THREAD_BUFFER_SIZE / std::mem::size_of::<u64>();
        assert!(len.is_power_of_two());
        let buffer = (0..len).map(|_| AtomicU64::new(0)).collect::<Vec<_>>().into_boxed_slice();
        Self {
            id,
            name: Mutex::new(format!("thread-{id}")),
            buffer,
            mask: len - 1,
            put: AtomicUsize::new(0),
            get: AtomicUsize::new(0),
            overflow: AtomicU64::new(0),
            labels: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, entry: u64) {
        let put = self.put.load(Ordering::Relaxed);
        let get = self.get.load(Ordering::Acquire);
        if put.wrapping_sub(get) > self.mask {
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
        self.buffer[put & self.mask].store(entry, Ordering::Relaxed);
        self.put.store(put.wrapping_add(1), Ordering::Release);
    }

    /// Reader side, used only from [`crate::frame::flip`]: drains every
    /// entry the producer has published since the last drain.
    pub(crate) fn drain(&self, mut f: impl FnMut(u64)) {
        let put = self.put.load(Ordering::Acquire);
        let mut get = self.get.load(Ordering::Relaxed);
        while get != put {
            f(self.buffer[get & self.mask].load(Ordering::Relaxed));
            get = get.wrapping_add(1);
        }
        self.get.store(get, Ordering::Release);
    }

    pub(crate) fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    fn intern_label(&self, text: &str) -> u16 {
        let mut labels = self.labels.lock();
        let truncated: String = text.chars().take(PROFILE_LABEL_MAX_LEN).collect();
        labels.push(truncated);
        let index = labels.len() - 1;
        ((index as u64) & INDEX_MASK) as u16
    }

    pub(crate) fn label_text(&self, index: u16) -> Option<String> {
        self.labels.lock().get(index as usize).cloned()
    }
}

static REGISTRY: once_cell::sync::Lazy<Mutex<Vec<Arc<ThreadLog>>>> =
    once_cell::sync::Lazy::new(|| Mutex::new(Vec::new()));
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadLog>>> = const { RefCell::new(None) };
}

/// Registers the calling thread's log if it hasn't been already.
pub fn ensure_registered() {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let mut registry = REGISTRY.lock();
            assert!(registry.len() < PROFILE_MAX_THREADS, "profiler thread table full");
            let log = Arc::new(ThreadLog::new(NEXT_ID.fetch_add(1, Ordering::Relaxed)));
            registry.push(log.clone());
            *slot = Some(log);
        }
    });
}

/// Drops the calling thread's log from the registry; other threads are
/// unaffected.
pub fn unregister_current() {
    CURRENT.with(|cell| {
        if let Some(log) = cell.borrow_mut().take() {
            REGISTRY.lock().retain(|l| !Arc::ptr_eq(l, &log));
        }
    });
}

fn current() -> Arc<ThreadLog> {
    ensure_registered();
    CURRENT.with(|cell| cell.borrow().clone().expect("ensure_registered just ran"))
}

/// Snapshot of every currently-registered thread log, used by
/// [`crate::frame::flip`] to drain them in turn.
pub(crate) fn registry_snapshot() -> Vec<Arc<ThreadLog>> {
    REGISTRY.lock().clone()
}

fn push_entry(entry: u64) {
    current().push(entry);
}

/// RAII scope marker: writes ENTER on construction, LEAVE on drop,
/// mirroring the original's `ProfileScopeHandlerCpu` (§4.12 added
/// "Scoped CPU timers"). Not `Send`: a scope must open and close on the
/// same thread it was created on.
pub struct ScopeGuard {
    token: ProfileToken,
    _not_send: PhantomData<std::cell::Cell<()>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        push_entry(pack(ENTRY_LEAVE, token::timer_index(self.token), now_ticks()));
    }
}

/// Opens a scoped CPU timer for `token`. Intended to be bound to a
/// local that lives for the scope being measured: `let _s =
/// forge_profile::scope(token);`.
pub fn scope(token: ProfileToken) -> ScopeGuard {
    push_entry(pack(ENTRY_ENTER, token::timer_index(token), now_ticks()));
    ScopeGuard { token, _not_send: PhantomData }
}

/// Updates the meta-counter identified by `meta_token` (from
/// [`crate::get_meta_token`]) by `delta`, attributed to whichever scope
/// is open on this thread when [`crate::flip`] walks the log.
pub fn meta_update(meta_token: ProfileToken, delta: i64) {
    let index = (meta_token & INDEX_MASK) as u16;
    push_entry(pack(ENTRY_META, index, delta as u64 & TICK_MASK));
}

/// Records a literal label string, attached to whichever scope is open
/// on this thread. Truncated to [`crate::PROFILE_LABEL_MAX_LEN`].
pub fn label(text: &str) {
    let log = current();
    let index = log.intern_label(text);
    log.push(pack(ENTRY_LABEL_LITERAL, index, now_ticks()));
}

/// Like [`label`] but takes an owned, already-formatted `String` to
/// avoid an extra allocation at call sites that build the text with
/// `format!` (§4.12 added "Formatted labels").
pub fn label_format(text: String) {
    let log = current();
    let index = log.intern_label(&text);
    log.push(pack(ENTRY_LABEL, index, now_ticks()));
}

pub fn counter_add(token: ProfileToken, delta: i64) {
    token::with_counter(token, |c| {
        c.value.fetch_add(delta, Ordering::Relaxed);
    });
}

pub fn counter_set(token: ProfileToken, value: i64) {
    token::with_counter(token, |c| {
        c.value.store(value, Ordering::Relaxed);
    });
}

pub fn counter_set_limit(token: ProfileToken, limit: i64) {
    token::with_counter(token, |c| {
        c.limit.store(limit, Ordering::Relaxed);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let packed = pack(ENTRY_ENTER, 1234, 0xABCDEF);
        assert_eq!(unpack(packed), (ENTRY_ENTER, 1234, 0xABCDEF));
    }

    #[test]
    fn index_above_mask_is_truncated_not_panicking() {
        let packed = pack(ENTRY_META, 0xFFFF, 0);
        let (_, index, _) = unpack(packed);
        assert_eq!(index as u64, 0xFFFF & INDEX_MASK);
    }

    #[test]
    fn scope_guard_emits_enter_then_leave() {
        ensure_registered();
        let log = current();
        let before = log.put.load(Ordering::Relaxed);
        {
            let _guard = scope(0);
        }
        let after = log.put.load(Ordering::Relaxed);
        assert_eq!(after - before, 2);
    }
}
