//! Generic callback trampoline
//!
//! One `extern "C"` entry point serves every native-backed callable and one
//! serves every finalizer. The real handler travels as callback data (or
//! finalizer hint) in a laundered [`Token`].

use crate::arena::{unlaunder, Token};
use crate::args::CallArgs;
use crate::env::{Env, Value};
use crate::error::{BridgeError, Result};
use stencil_abi as sys;
use stencil_abi::Status;
use std::any::Any;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

pub type CallHandler = dyn Fn(&CallArgs) -> Result<Value> + Send + Sync;
pub type FinalizeHandler = dyn Fn(Env, *mut c_void) -> Result<()> + Send + Sync;

/// Every shape of closure the trampolines know how to dispatch.
pub enum Thunk {
    Call(Box<CallHandler>),
    Finalize(Box<FinalizeHandler>),
}

/// Launder `handler` for use as callback data with [`generic_callback`].
pub fn make_callback<F>(handler: F) -> (sys::Callback, Token)
where
    F: Fn(&CallArgs) -> Result<Value> + Send + Sync + 'static,
{
    let token = Token::launder(std::sync::Arc::new(Thunk::Call(Box::new(handler))));
    (generic_callback as sys::Callback, token)
}

/// Launder `handler` for use as a finalizer hint with [`generic_finalize`].
///
/// The hint token is reclaimed by the trampoline after the finalizer runs,
/// so callers hand it over with [`Token::into_raw`] once the host has
/// accepted the registration.
pub fn make_finalize<F>(handler: F) -> (sys::Finalize, Token)
where
    F: Fn(Env, *mut c_void) -> Result<()> + Send + Sync + 'static,
{
    let token = Token::launder(std::sync::Arc::new(Thunk::Finalize(Box::new(handler))));
    (generic_finalize as sys::Finalize, token)
}

/// Registered with the host for every native-backed callable.
///
/// # Safety
/// Only the host calls this, with a live environment and callback info whose
/// data pointer was produced by [`make_callback`].
pub unsafe extern "C" fn generic_callback(
    raw_env: sys::Env,
    info: sys::CallbackInfo,
) -> sys::Value {
    let env = Env::from_raw(raw_env);
    match dispatch(env, info) {
        Ok(value) => value.raw(),
        Err(err) => {
            throw_error(env, &err);
            ptr::null_mut()
        }
    }
}

fn dispatch(env: Env, info: sys::CallbackInfo) -> Result<Value> {
    let args = CallArgs::fetch(env, info)?;
    let thunk = unsafe { unlaunder::<Thunk>(args.data()) }.ok_or_else(|| {
        BridgeError::status(
            Status::INVALID_ARG,
            "callback data does not name a registered handler",
        )
    })?;
    match &*thunk {
        Thunk::Call(handler) => handler(&args),
        Thunk::Finalize(_) => Err(BridgeError::status(
            Status::INVALID_ARG,
            "finalizer handle dispatched as a callback",
        )),
    }
}

/// Registered with the host for every finalizer.
///
/// The host has no channel for failures here, so errors are logged.
///
/// # Safety
/// Only the host calls this, exactly once per registration, with a hint
/// produced by [`make_finalize`] and handed over via [`Token::into_raw`].
pub unsafe extern "C" fn generic_finalize(
    raw_env: sys::Env,
    data: *mut c_void,
    hint: *mut c_void,
) {
    if hint.is_null() {
        tracing::error!("finalizer invoked without a handler");
        return;
    }
    let env = Env::from_raw(raw_env);
    let token = Token::from_raw(hint);
    match token.get::<Thunk>().as_deref() {
        Some(Thunk::Finalize(handler)) => {
            if let Err(err) = handler(env, data) {
                tracing::error!(error = %err, "finalizer failed");
            }
        }
        Some(Thunk::Call(_)) => tracing::error!("callback handle dispatched as a finalizer"),
        None => tracing::error!(id = token.id(), "finalizer hint is not registered"),
    }
    token.release();
}

/// Raise `err` in the host unless an exception is already in flight.
pub fn throw_error(env: Env, err: &BridgeError) {
    match env.is_exception_pending() {
        Ok(true) => return,
        Ok(false) => {}
        Err(check_err) => {
            tracing::error!(error = %check_err, original = %err, "could not check for pending exception");
            return;
        }
    }

    let message = err.to_string();
    let thrown = if err.is_type_error() {
        env.throw_type_error(err.code(), &message)
    } else {
        env.throw_error(err.code(), &message)
    };
    if let Err(throw_err) = thrown {
        tracing::error!(error = %throw_err, original = %err, "could not raise host exception");
    }
}

/// Run a domain call that may panic, turning the panic into an error.
pub fn recover<T>(f: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| BridgeError::Panic(panic_message(&*payload)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
