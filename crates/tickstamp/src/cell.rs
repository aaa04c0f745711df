//! Single-slot shared cache of the latest encoded timestamp
//!
//! One writer (the active refresher), any number of readers. The eight
//! encoded bytes fit in one word, so a publish is a single atomic store and a
//! read can never observe a torn value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::encoder::{Alphabet, EncodedTimestamp};

pub struct CacheCell {
    packed: AtomicU64,
}

impl CacheCell {
    /// Create a cell already holding `initial`; a cell is never empty
    pub fn new(initial: EncodedTimestamp) -> Self {
        Self {
            packed: AtomicU64::new(initial.to_packed()),
        }
    }

    #[inline]
    pub fn load(&self) -> EncodedTimestamp {
        EncodedTimestamp::from_packed(self.packed.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store(&self, value: EncodedTimestamp) {
        self.packed.store(value.to_packed(), Ordering::Release);
    }

    /// Timestamp the cached value was derived from
    pub fn millis(&self, alphabet: &Alphabet) -> Option<u64> {
        alphabet.decode(self.load().as_str())
    }
}

/// Admission gate for cache writes.
///
/// The writer holds the lock across each publish, and `close` takes the same
/// lock, so once `close` returns no write through this gate can land.
pub struct WriteGate {
    open: Mutex<bool>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
        }
    }

    /// Store `value` if the gate is still open. Returns false once closed.
    pub fn publish(&self, cell: &CacheCell, value: EncodedTimestamp) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            cell.store(value);
        }
        *open
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idempotent
    pub fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new()
    }
}
