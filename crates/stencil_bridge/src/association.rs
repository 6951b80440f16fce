//! Shared, manually refcounted state for linked wrapped objects.
//!
//! Several host objects can stand for the same logical domain entity (a
//! template and the templates looked up from it share one function table).
//! They point at one [`Association`], which owns the persistent references
//! to host functions registered through any of them. The references are
//! released when the last wrapper detaches, never earlier.

use crate::env::{Env, Reference, Value};
use crate::error::{BridgeError, Result};
use indexmap::IndexMap;
use parking_lot::Mutex;
use stencil_abi::Status;
use std::sync::Arc;

#[derive(Debug, Default)]
struct AssociationState {
    functions: IndexMap<String, Reference>,
    refcount: usize,
}

#[derive(Debug, Default)]
pub struct Association {
    state: Mutex<AssociationState>,
}

/// The association link held by one wrapped payload.
#[derive(Debug, Default)]
pub struct AssociationSlot {
    current: Mutex<Option<Arc<Association>>>,
}

impl AssociationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<Association>> {
        self.current.lock().clone()
    }
}

impl Association {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Link `slot` to this association.
    ///
    /// # Panics
    /// If `slot` is already associated.
    pub fn attach(self: &Arc<Self>, slot: &AssociationSlot) {
        let mut current = slot.current.lock();
        if current.is_some() {
            drop(current);
            panic!("wrapper is already associated");
        }
        *current = Some(Arc::clone(self));
        self.state.lock().refcount += 1;
    }

    /// Unlink `slot`, which must currently point at this association.
    /// Follow with [`Association::maybe_finalize`].
    ///
    /// # Panics
    /// If `slot` is unassociated or linked to a different association.
    pub fn detach(self: &Arc<Self>, slot: &AssociationSlot) {
        let mut current = slot.current.lock();
        match current.as_ref() {
            Some(linked) if Arc::ptr_eq(linked, self) => {
                *current = None;
            }
            Some(_) => {
                drop(current);
                panic!("wrapper is associated with a different association");
            }
            None => {
                drop(current);
                panic!("wrapper is not associated");
            }
        }
        let mut state = self.state.lock();
        state.refcount = match state.refcount.checked_sub(1) {
            Some(count) => count,
            None => {
                drop(state);
                panic!("association refcount underflow");
            }
        };
    }

    pub fn refcount(&self) -> usize {
        self.state.lock().refcount
    }

    /// Register `reference` under `name`, returning the reference it
    /// replaced. The caller releases the old one only once the domain call
    /// consuming the new mapping has succeeded.
    pub fn add_function_ref(&self, name: &str, reference: Reference) -> Option<Reference> {
        self.state
            .lock()
            .functions
            .insert(name.to_string(), reference)
    }

    /// Forget `name`, handing its reference back for release.
    pub fn remove_function_ref(&self, name: &str) -> Option<Reference> {
        self.state.lock().functions.shift_remove(name)
    }

    pub fn contains_function(&self, name: &str) -> bool {
        self.state.lock().functions.contains_key(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        self.state.lock().functions.keys().cloned().collect()
    }

    pub fn function_count(&self) -> usize {
        self.state.lock().functions.len()
    }

    /// Resolve the host function registered under `name`.
    pub fn function_value(&self, env: Env, name: &str) -> Result<Value> {
        let state = self.state.lock();
        let reference = state.functions.get(name).ok_or_else(|| {
            BridgeError::status(
                Status::GENERIC_FAILURE,
                format!("function {name:?} is no longer registered"),
            )
        })?;
        env.get_reference_value(reference)?.ok_or_else(|| {
            BridgeError::status(
                Status::GENERIC_FAILURE,
                format!("function {name:?} has been collected"),
            )
        })
    }

    /// New association (refcount 0) holding its own reference to every
    /// function registered here. On failure, references already taken for
    /// the copy are released.
    pub fn clone_refs(&self, env: Env) -> Result<Arc<Association>> {
        let values = {
            let state = self.state.lock();
            let mut values = Vec::with_capacity(state.functions.len());
            for (name, reference) in &state.functions {
                let value = env.get_reference_value(reference)?.ok_or_else(|| {
                    BridgeError::status(
                        Status::GENERIC_FAILURE,
                        format!("function {name:?} has been collected"),
                    )
                })?;
                values.push((name.clone(), value));
            }
            values
        };

        let mut functions = IndexMap::with_capacity(values.len());
        for (name, value) in values {
            match env.create_reference(value, 1) {
                Ok(reference) => {
                    functions.insert(name, reference);
                }
                Err(err) => {
                    release_references(env, functions.into_values());
                    return Err(err);
                }
            }
        }

        Ok(Arc::new(Association {
            state: Mutex::new(AssociationState {
                functions,
                refcount: 0,
            }),
        }))
    }

    /// Release every registered reference if no wrapper is attached any
    /// more. Returns whether the references were released.
    pub fn maybe_finalize(&self, env: Env) -> bool {
        let released = {
            let mut state = self.state.lock();
            if state.refcount != 0 {
                return false;
            }
            std::mem::take(&mut state.functions)
        };
        tracing::debug!(count = released.len(), "releasing association references");
        release_references(env, released.into_values());
        true
    }
}

impl Drop for Association {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.functions.is_empty() {
            tracing::warn!(
                count = state.functions.len(),
                "association dropped with live host references"
            );
        }
    }
}

/// Delete each reference, logging failures without stopping.
pub fn release_references(env: Env, references: impl IntoIterator<Item = Reference>) {
    for reference in references {
        if let Err(err) = env.delete_reference(reference) {
            tracing::error!(error = %err, "failed to release host reference");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_abi as sys;

    fn fake_ref(n: usize) -> Reference {
        Reference::from_raw(n as sys::Ref)
    }

    #[test]
    fn refcount_tracks_attached_slots() {
        let assoc = Association::new();
        let (a, b) = (AssociationSlot::new(), AssociationSlot::new());
        assoc.attach(&a);
        assoc.attach(&b);
        assert_eq!(assoc.refcount(), 2);
        assert!(Arc::ptr_eq(&a.get().unwrap(), &assoc));

        assoc.detach(&a);
        assert_eq!(assoc.refcount(), 1);
        assert!(a.get().is_none());
        assoc.detach(&b);
        assert_eq!(assoc.refcount(), 0);
    }

    #[test]
    #[should_panic(expected = "already associated")]
    fn double_attach_is_fatal() {
        let assoc = Association::new();
        let slot = AssociationSlot::new();
        assoc.attach(&slot);
        Association::new().attach(&slot);
    }

    #[test]
    #[should_panic(expected = "different association")]
    fn detach_from_wrong_association_is_fatal() {
        let (first, second) = (Association::new(), Association::new());
        let slot = AssociationSlot::new();
        first.attach(&slot);
        second.detach(&slot);
    }

    #[test]
    #[should_panic(expected = "not associated")]
    fn detach_unassociated_is_fatal() {
        Association::new().detach(&AssociationSlot::new());
    }

    #[test]
    fn replacing_a_function_returns_the_old_reference() {
        let assoc = Association::new();
        assert!(assoc.add_function_ref("f", fake_ref(0x100)).is_none());
        let old = assoc.add_function_ref("f", fake_ref(0x200));
        assert_eq!(old, Some(fake_ref(0x100)));
        assert_eq!(assoc.function_names(), vec!["f".to_string()]);

        let current = assoc.remove_function_ref("f");
        assert_eq!(current, Some(fake_ref(0x200)));
        assert_eq!(assoc.function_count(), 0);
    }
}
