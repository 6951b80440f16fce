//! Stencil Host
//!
//! Embeds QuickJS (through `rquickjs`) and loads plugins through the
//! `stencil_abi` function table, so a plugin can be driven by real script.
//!
//! ## Architecture
//!
//! - **env:** per-context state behind the `env` pointer: the handle stack,
//!   the pending exception, persistent references and wrapped objects
//! - **api:** the static [`HOST_API`] table of `extern "C"` primitives
//!
//! Handles are only valid while the host is running script or a plugin
//! entry point. Wrapped objects freed by the engine have their finalizers
//! queued and run at the next [`Host::gc`] or at teardown, never from
//! inside the engine's collector.

mod api;
mod env;

pub use api::HOST_API;

use env::{HostEnv, JsValue};
use rquickjs::{qjs, Context, Ctx, Function, Object, Runtime};
use serde::{Deserialize, Serialize};
use stencil_abi as sys;
use stencil_abi::Status;
use thiserror::Error;

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    /// Script (or a plugin) threw and nothing caught it.
    #[error("uncaught {name}: {message}")]
    Exception {
        name: String,
        message: String,
        code: Option<String>,
    },

    /// A primitive failed without throwing.
    #[error("{message} (status {})", .status.0)]
    Api { status: Status, message: String },

    #[error("script engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("module initialization returned no exports")]
    NoExports,
}

impl HostError {
    /// Message of a thrown error, if this is one.
    pub fn exception_message(&self) -> Option<&str> {
        match self {
            HostError::Exception { message, .. } => Some(message),
            _ => None,
        }
    }

    /// `code` property of a thrown error, if it had one.
    pub fn exception_code(&self) -> Option<&str> {
        match self {
            HostError::Exception { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Runtime knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Run the finalizer of every still-wrapped object at teardown, before
    /// the module instance data is finalized.
    pub gc_on_teardown: bool,
    /// Engine heap limit in bytes. Zero leaves it unlimited.
    pub memory_limit: usize,
    /// Engine stack limit in bytes. Zero keeps the engine default.
    pub max_stack_size: usize,
    /// Install a global `gc()` that runs the collector from script.
    pub expose_gc: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            gc_on_teardown: true,
            memory_limit: 0,
            max_stack_size: 0,
            expose_gc: false,
        }
    }
}

/// Result of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub finalized: usize,
}

/// One runtime with one context. Dropping the host tears the plugin
/// environment down before the engine goes away.
pub struct Host {
    // Field order is drop order: the environment must go before the engine.
    env: Box<HostEnv>,
    context: Context,
    runtime: Runtime,
    config: HostConfig,
}

/// An engine failure, with a thrown exception caught and described.
fn caught(env: &HostEnv, ctx: &Ctx<'static>, err: rquickjs::Error) -> HostError {
    match err {
        rquickjs::Error::Exception => env.describe(ctx.catch()),
        other => HostError::Engine(other),
    }
}

impl Host {
    pub fn new(config: HostConfig) -> HostResult<Self> {
        let runtime = Runtime::new()?;
        if config.memory_limit > 0 {
            runtime.set_memory_limit(config.memory_limit);
        }
        if config.max_stack_size > 0 {
            runtime.set_max_stack_size(config.max_stack_size);
        }
        let context = Context::full(&runtime)?;
        let host = Self {
            env: Box::new(HostEnv::new()),
            context,
            runtime,
            config,
        };

        let expose_gc = host.config.expose_gc;
        host.enter(|env, ctx| -> HostResult<()> {
            env.install(&ctx).map_err(|err| caught(env, &ctx, err))?;
            if expose_gc {
                let gc = Function::new(ctx.clone(), |ctx: Ctx<'static>| unsafe {
                    qjs::JS_RunGC(qjs::JS_GetRuntime(ctx.as_raw().as_ptr()));
                })?;
                ctx.globals().set("gc", gc)?;
            }
            Ok(())
        })?;
        tracing::debug!(?host.config, "host created");
        Ok(host)
    }

    /// Run `f` with the context entered and the environment active. Every
    /// handle pushed inside is released when `f` returns.
    fn enter<R>(&self, f: impl FnOnce(&HostEnv, Ctx<'static>) -> R) -> R {
        self.context.with(|ctx| {
            // SAFETY: the environment drops every `'static` value it holds
            // when `_active` goes out of scope, before `with` returns, and
            // `R` never carries engine values out of this closure.
            let ctx: Ctx<'static> = unsafe { std::mem::transmute(ctx) };
            let _active = self.env.activate(ctx.clone());
            f(&self.env, ctx)
        })
    }

    /// Run a plugin entry point against a fresh exports object and publish
    /// what it returns as the global `name`.
    pub fn load_module(&self, name: &str, init: sys::ModuleInit) -> HostResult<()> {
        self.enter(|env, ctx| {
            let exports: JsValue = Object::new(ctx.clone())?.into_value();
            let returned = env.run_init(init, &HOST_API, exports);
            if let Some(exception) = env.take_pending() {
                return Err(env.describe(exception));
            }
            let returned = returned.ok_or(HostError::NoExports)?;
            ctx.globals().set(name, returned)?;
            tracing::debug!(module = name, "module loaded");
            Ok(())
        })
    }

    /// Evaluate a script and return its completion value as `String(v)`.
    pub fn eval(&self, source: &str) -> HostResult<String> {
        self.enter(|env, ctx| {
            let value: JsValue = ctx.eval(source).map_err(|err| caught(env, &ctx, err))?;
            env.call::<_, String>("show", (value,))
                .map_err(|err| env.host_error(err))
        })
    }

    /// Collect garbage and run the finalizers of freed wrapped objects,
    /// repeating while finalizers free more of them.
    pub fn gc(&self) -> GcStats {
        let mut stats = GcStats::default();
        loop {
            self.runtime.run_gc();
            let finalized = self.enter(|env, _| env.drain_finalizers());
            if finalized == 0 {
                break;
            }
            stats.finalized += finalized;
        }
        tracing::trace!(finalized = stats.finalized, "gc");
        stats
    }

    pub fn live_references(&self) -> usize {
        self.env.live_references()
    }

    pub fn live_wraps(&self) -> usize {
        self.env.live_wraps()
    }

    pub fn has_instance_data(&self) -> bool {
        self.env.has_instance_data()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        let finalize_wraps = self.config.gc_on_teardown;
        self.enter(|env, _| env.teardown(finalize_wraps));
        self.runtime.run_gc();
        tracing::debug!("host torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_char;
    use std::ptr;

    fn text(bytes: &'static [u8]) -> *const c_char {
        bytes.as_ptr().cast()
    }

    unsafe extern "C" fn greet_init(
        api: *const sys::HostApi,
        env: sys::Env,
        exports: sys::Value,
    ) -> sys::Value {
        let api = &*api;
        let mut greeting = ptr::null_mut();
        assert!((api.create_string_utf8)(env, text(b"hello\0"), usize::MAX, &mut greeting).is_ok());
        assert!((api.set_named_property)(env, exports, text(b"greeting\0"), greeting).is_ok());
        exports
    }

    unsafe extern "C" fn refusing_init(
        api: *const sys::HostApi,
        env: sys::Env,
        _exports: sys::Value,
    ) -> sys::Value {
        let api = &*api;
        (api.throw_error)(env, text(b"E_NOPE\0"), text(b"not today\0"));
        ptr::null_mut()
    }

    unsafe extern "C" fn empty_init(
        _api: *const sys::HostApi,
        _env: sys::Env,
        _exports: sys::Value,
    ) -> sys::Value {
        ptr::null_mut()
    }

    #[test]
    fn config_defaults() {
        let config = HostConfig::default();
        assert!(config.gc_on_teardown);
        assert_eq!(config.memory_limit, 0);
        assert!(!config.expose_gc);
    }

    #[test]
    fn eval_shows_completion_value() {
        let host = Host::new(HostConfig::default()).unwrap();
        assert_eq!(host.eval("1 + 2").unwrap(), "3");
        assert_eq!(host.eval("[1, 'a']").unwrap(), "1,a");
        assert_eq!(host.eval("typeof gc").unwrap(), "undefined");
    }

    #[test]
    fn uncaught_errors_are_described() {
        let host = Host::new(HostConfig::default()).unwrap();
        let err = host
            .eval("const e = new RangeError('too far'); e.code = 'E_FAR'; throw e")
            .unwrap_err();
        match err {
            HostError::Exception {
                name,
                message,
                code,
            } => {
                assert_eq!(name, "RangeError");
                assert_eq!(message, "too far");
                assert_eq!(code.as_deref(), Some("E_FAR"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gc_can_be_exposed_to_script() {
        let host = Host::new(HostConfig {
            expose_gc: true,
            ..HostConfig::default()
        })
        .unwrap();
        assert_eq!(host.eval("gc(); typeof gc").unwrap(), "function");
        assert_eq!(host.gc(), GcStats::default());
    }

    #[test]
    fn modules_are_published_as_globals() {
        let host = Host::new(HostConfig::default()).unwrap();
        host.load_module("greeter", greet_init).unwrap();
        assert_eq!(host.eval("greeter.greeting").unwrap(), "hello");
    }

    #[test]
    fn init_exceptions_fail_the_load() {
        let host = Host::new(HostConfig::default()).unwrap();
        let err = host.load_module("refusing", refusing_init).unwrap_err();
        assert_eq!(err.exception_message(), Some("not today"));
        assert_eq!(err.exception_code(), Some("E_NOPE"));
        assert_eq!(host.eval("typeof refusing").unwrap(), "undefined");

        let err = host.load_module("empty", empty_init).unwrap_err();
        assert!(matches!(err, HostError::NoExports));
    }
}
