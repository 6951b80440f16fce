//! Opaque handle arena
//!
//! Native values cannot be handed to the host directly: the host only stores
//! a `void*`. Laundering registers the value in a process-wide table and
//! hands out a pointer to a one-word heap buffer holding the table id.
//!
//! A [`Token`] owns one such registration. Dropping it (or calling
//! [`Token::release`]) removes the table entry and frees the buffer;
//! [`Token::into_raw`] transfers that duty to whoever receives the pointer,
//! who later reclaims it with [`Token::from_raw`].

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

type Entry = Arc<dyn Any + Send + Sync>;

struct HandleTable {
    next_id: usize,
    entries: HashMap<usize, Entry>,
}

impl HandleTable {
    fn insert(&mut self, value: Entry) -> usize {
        // Zero is never handed out so a zeroed buffer is always invalid.
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(id, value);
        id
    }
}

static HANDLES: Lazy<Mutex<HandleTable>> = Lazy::new(|| {
    Mutex::new(HandleTable {
        next_id: 0,
        entries: HashMap::new(),
    })
});

/// Number of live table entries.
pub fn live_handles() -> usize {
    HANDLES.lock().entries.len()
}

/// Owned ABI-crossing token for a laundered value.
#[derive(Debug)]
pub struct Token {
    buf: NonNull<usize>,
}

// The buffer only holds an integer id; the table behind it is locked.
unsafe impl Send for Token {}
unsafe impl Sync for Token {}

impl Token {
    /// Register `value` and return the token that names it.
    pub fn launder<T: Any + Send + Sync>(value: Arc<T>) -> Token {
        let id = HANDLES.lock().insert(value);
        let buf = NonNull::from(Box::leak(Box::new(id)));
        tracing::trace!(id, "laundered handle");
        Token { buf }
    }

    /// Pointer to hand to the host. The token keeps ownership.
    pub fn as_ptr(&self) -> *mut c_void {
        self.buf.as_ptr().cast()
    }

    /// Give up ownership; the receiver must eventually call [`Token::from_raw`].
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// Reclaim ownership of a pointer produced by [`Token::into_raw`].
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` and must not have been reclaimed yet.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Token {
        Token {
            buf: NonNull::new_unchecked(ptr.cast()),
        }
    }

    pub fn id(&self) -> usize {
        unsafe { *self.buf.as_ptr() }
    }

    /// Look the value up again without consuming the registration.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        lookup(self.id())
    }

    /// Remove the table entry and free the buffer.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        let id = self.id();
        let removed = HANDLES.lock().entries.remove(&id);
        // Free the buffer before the value: the value's own drop may re-enter
        // the table.
        drop(unsafe { Box::from_raw(self.buf.as_ptr()) });
        if removed.is_none() {
            tracing::warn!(id, "released handle that was not registered");
        } else {
            tracing::trace!(id, "released handle");
        }
        drop(removed);
    }
}

fn lookup<T: Any + Send + Sync>(id: usize) -> Option<Arc<T>> {
    let entry = HANDLES.lock().entries.get(&id).cloned()?;
    entry.downcast::<T>().ok()
}

/// Recover the value behind a raw token pointer without taking ownership.
///
/// # Safety
/// `ptr` must be a live token pointer (from `as_ptr` or `into_raw`).
pub unsafe fn unlaunder<T: Any + Send + Sync>(ptr: *mut c_void) -> Option<Arc<T>> {
    if ptr.is_null() {
        return None;
    }
    lookup(*ptr.cast::<usize>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launder_roundtrip() {
        let token = Token::launder(Arc::new(String::from("payload")));
        let ptr = token.as_ptr();
        let value = unsafe { unlaunder::<String>(ptr) }.expect("registered");
        assert_eq!(value.as_str(), "payload");
        // Lookup leaves the entry in place.
        assert!(token.get::<String>().is_some());
        token.release();
    }

    #[test]
    fn wrong_type_is_none() {
        let token = Token::launder(Arc::new(7u32));
        assert!(token.get::<String>().is_none());
        assert_eq!(token.get::<u32>().as_deref(), Some(&7));
    }

    #[test]
    fn ownership_survives_into_raw() {
        let token = Token::launder(Arc::new(1u64));
        let id = token.id();
        let ptr = token.into_raw();
        assert!(lookup::<u64>(id).is_some());

        let reclaimed = unsafe { Token::from_raw(ptr) };
        assert_eq!(reclaimed.id(), id);
        reclaimed.release();
        assert!(lookup::<u64>(id).is_none());
    }

    #[test]
    fn release_drops_value() {
        let value = Arc::new(42i32);
        let token = Token::launder(value.clone());
        assert_eq!(Arc::strong_count(&value), 2);
        drop(token);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn null_pointer_unlaunders_to_none() {
        assert!(unsafe { unlaunder::<u8>(std::ptr::null_mut()) }.is_none());
    }
}
