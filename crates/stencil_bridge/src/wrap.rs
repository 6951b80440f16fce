//! Type-tagged object wrapping
//!
//! A [`Wrapper<T>`] attaches an `Arc<T>` to a host object and stamps the
//! object with the wrapper's [`TypeTag`]. Unwrapping checks the tag before
//! looking at the attached pointer, so two wrapper types living in the same
//! module can never be confused for each other.

use crate::arena::{unlaunder, Token};
use crate::env::{Env, Value};
use crate::error::{BridgeError, Result};
use crate::trampoline::make_finalize;
use stencil_abi::TypeTag;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct Wrapper<T> {
    tag: TypeTag,
    type_name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Wrapper<T> {
    /// `lower`/`upper` must be unique among the module's wrapper types.
    pub const fn new(type_name: &'static str, lower: u64, upper: u64) -> Self {
        Self {
            tag: TypeTag { lower, upper },
            type_name,
            _marker: PhantomData,
        }
    }

    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }

    /// Attach `payload` to `object`. `finalize` runs once, when the host
    /// collects the object, with the payload that was attached.
    pub fn wrap<F>(&self, env: Env, object: Value, payload: Arc<T>, finalize: F) -> Result<()>
    where
        F: Fn(Env, Arc<T>) -> Result<()> + Send + Sync + 'static,
    {
        let type_name = self.type_name;
        let payload_token = Token::launder(payload);
        let (finalize_cb, hint) = make_finalize(move |env, data| {
            let token = unsafe { Token::from_raw(data) };
            let payload = token.get::<T>();
            token.release();
            match payload {
                Some(payload) => {
                    tracing::debug!(type_name, "finalizing wrapped object");
                    finalize(env, payload)
                }
                None => Err(BridgeError::TypeMismatch(format!(
                    "finalized {type_name} payload was not registered"
                ))),
            }
        });

        // On failure both tokens drop here and release their entries.
        env.wrap(object, payload_token.as_ptr(), finalize_cb, hint.as_ptr())?;

        // The host now owns both registrations; the finalizer returns them.
        payload_token.into_raw();
        hint.into_raw();

        env.type_tag_object(object, &self.tag)
    }

    /// Recover the payload attached by [`Wrapper::wrap`].
    pub fn unwrap(&self, env: Env, object: Value) -> Result<Arc<T>> {
        if !env.check_object_type_tag(object, &self.tag)? {
            return Err(BridgeError::TypeMismatch(format!(
                "missing or invalid type tag (expected {})",
                self.type_name
            )));
        }
        let ptr = env.unwrap(object)?;
        unsafe { unlaunder::<T>(ptr) }.ok_or_else(|| {
            BridgeError::TypeMismatch(format!("wrapped payload is not a {}", self.type_name))
        })
    }
}
