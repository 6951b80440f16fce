//! Per-context state reached through the `env` pointer plugins receive.
//!
//! Plugins address script values through handles: indices into a stack of
//! values that lives for one native call. Everything here is only touched
//! while [`crate::Host`] holds the runtime lock, and every `'static` value
//! is dropped before that lock is released.

use rquickjs::function::IntoArgs;
use rquickjs::{Array, Ctx, FromJs, Function, IntoJs, Object, Persistent, Value};
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::ptr;
use std::rc::Rc;
use stencil_abi as sys;
use stencil_abi::Status;

use crate::HostError;

pub(crate) type JsValue = Value<'static>;

/// Helpers evaluated once per context. The hidden slots live under symbols
/// that never leave this closure.
const PRELUDE: &str = r#"(() => {
  "use strict";
  const wrapSlot = Symbol("stencil.wrap");
  const tagSlot = Symbol("stencil.tag");
  const own = (o, k) => Object.prototype.hasOwnProperty.call(o, k);
  const index = /^(0|[1-9][0-9]*)$/;
  return {
    attach(o, guard) {
      if (own(o, wrapSlot)) return false;
      Object.defineProperty(o, wrapSlot, { value: guard });
      return true;
    },
    wrapped(o) { return own(o, wrapSlot) ? o[wrapSlot]() : -1; },
    stamp(o, tag) {
      if (own(o, tagSlot)) return false;
      Object.defineProperty(o, tagSlot, { value: tag });
      return true;
    },
    tagOf(o) { return own(o, tagSlot) ? o[tagSlot] : ""; },
    keys(o, ownOnly, filter, numbersToStrings) {
      const out = [];
      const seen = new Set();
      for (let cur = o; cur !== null; cur = ownOnly ? null : Object.getPrototypeOf(cur)) {
        for (const k of Reflect.ownKeys(cur)) {
          if (k === wrapSlot || k === tagSlot || seen.has(k)) continue;
          if (typeof k === "symbol" ? filter & 16 : filter & 8) continue;
          const d = Object.getOwnPropertyDescriptor(cur, k);
          if ((filter & 1 && !d.writable) || (filter & 2 && !d.enumerable) || (filter & 4 && !d.configurable)) continue;
          seen.add(k);
          out.push(!numbersToStrings && typeof k === "string" && index.test(k) ? Number(k) : k);
        }
      }
      return out;
    },
    get(o, k) { return o[k]; },
    set(o, k, v) { o[k] = v; },
    define(o, k, value, get, set, writable, enumerable, configurable) {
      const d = { enumerable, configurable };
      if (get !== undefined || set !== undefined) {
        d.get = get;
        d.set = set;
      } else {
        d.value = value;
        d.writable = writable;
      }
      Object.defineProperty(o, k, d);
    },
    array(n) { return new Array(n); },
    error(type, message, code) {
      const e = type ? new TypeError(message) : new Error(message);
      if (code !== undefined) e.code = code;
      return e;
    },
    bigintHex(x) { return x < 0n ? "-" + (-x).toString(16) : x.toString(16); },
    bigint(negative, hex) {
      const x = BigInt("0x" + hex);
      return negative ? -x : x;
    },
    func(name, native) {
      return { [name](...args) { return native(this, args); } }[name];
    },
    klass(name, native) {
      return {
        [name]: function (...args) {
          if (new.target === undefined) {
            throw new TypeError(`Class constructor ${name} cannot be invoked without 'new'`);
          }
          return native(this, args);
        },
      }[name];
    },
    apply(f, recv, args) { return Reflect.apply(f, recv, args); },
    construct(c, args) { return Reflect.construct(c, args); },
    describe(e) {
      if (e instanceof Error) {
        return { name: e.name, message: e.message, code: typeof e.code === "string" ? e.code : undefined };
      }
      return { name: "", message: String(e) };
    },
    show(v) { return String(v); },
  };
})()"#;

#[derive(Debug)]
pub(crate) struct ApiError {
    pub status: Status,
    pub message: Cow<'static, str>,
}

impl ApiError {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            message: Cow::Borrowed(status.message()),
        }
    }

    pub fn with_message(status: Status, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

struct LastError {
    message: CString,
    info: sys::ExtendedErrorInfo,
}

impl LastError {
    fn ok() -> Self {
        Self {
            message: CString::default(),
            info: sys::ExtendedErrorInfo {
                error_message: ptr::null(),
                engine_reserved: ptr::null_mut(),
                engine_error_code: 0,
                error_code: Status::OK,
            },
        }
    }
}

/// What a native callback sees through `get_cb_info`.
pub(crate) struct CallFrame {
    pub this: sys::Value,
    pub args: Vec<sys::Value>,
    pub data: *mut c_void,
}

pub(crate) struct InstanceData {
    pub data: *mut c_void,
    pub finalize: Option<sys::Finalize>,
    pub hint: *mut c_void,
}

struct WrapRecord {
    native: *mut c_void,
    finalize: Option<sys::Finalize>,
    hint: *mut c_void,
}

/// Lives in a hidden slot of a wrapped object; dropping it (when the
/// object is freed) queues the wrap for finalization.
struct WrapGuard {
    id: u64,
    collected: Rc<RefCell<Vec<u64>>>,
}

impl Drop for WrapGuard {
    fn drop(&mut self) {
        self.collected.borrow_mut().push(self.id);
    }
}

struct RefEntry {
    value: Persistent<JsValue>,
    count: u32,
}

pub(crate) struct HostEnv {
    ctx: RefCell<Option<Ctx<'static>>>,
    helpers: RefCell<Option<Persistent<Object<'static>>>>,
    handles: RefCell<Vec<JsValue>>,
    pending: RefCell<Option<JsValue>>,
    last_error: RefCell<Box<LastError>>,
    refs: RefCell<HashMap<usize, RefEntry>>,
    next_ref: Cell<usize>,
    wraps: RefCell<HashMap<u64, WrapRecord>>,
    next_wrap: Cell<u64>,
    collected: Rc<RefCell<Vec<u64>>>,
    instance: RefCell<Option<InstanceData>>,
}

/// Clears the active context when [`crate::Host::enter`] returns.
pub(crate) struct Active<'a>(&'a HostEnv);

impl Drop for Active<'_> {
    fn drop(&mut self) {
        let handles = std::mem::take(&mut *self.0.handles.borrow_mut());
        drop(handles);
        self.0.ctx.borrow_mut().take();
    }
}

impl HostEnv {
    pub(crate) fn new() -> Self {
        Self {
            ctx: RefCell::new(None),
            helpers: RefCell::new(None),
            handles: RefCell::new(Vec::new()),
            pending: RefCell::new(None),
            last_error: RefCell::new(Box::new(LastError::ok())),
            refs: RefCell::new(HashMap::new()),
            next_ref: Cell::new(1),
            wraps: RefCell::new(HashMap::new()),
            next_wrap: Cell::new(1),
            collected: Rc::new(RefCell::new(Vec::new())),
            instance: RefCell::new(None),
        }
    }

    pub(crate) fn activate(&self, ctx: Ctx<'static>) -> Active<'_> {
        *self.ctx.borrow_mut() = Some(ctx);
        Active(self)
    }

    /// The environment handle plugins receive.
    pub(crate) fn raw(&self) -> sys::Env {
        self as *const HostEnv as sys::Env
    }

    /// # Safety
    /// `env` must be null or a handle returned by [`HostEnv::raw`] for an
    /// environment that is still alive.
    pub(crate) unsafe fn from_raw<'a>(env: sys::Env) -> Option<&'a HostEnv> {
        (env as *const HostEnv).as_ref()
    }

    pub(crate) fn ctx(&self) -> ApiResult<Ctx<'static>> {
        self.ctx.borrow().clone().ok_or_else(|| {
            ApiError::with_message(Status::GENERIC_FAILURE, "environment is not active")
        })
    }

    /// Evaluate the helper table and remember it for the life of the context.
    pub(crate) fn install(&self, ctx: &Ctx<'static>) -> rquickjs::Result<()> {
        let helpers: Object<'static> = ctx.eval(PRELUDE)?;
        *self.helpers.borrow_mut() = Some(Persistent::save(ctx, helpers));
        Ok(())
    }

    // ========================================================================
    // Status plumbing
    // ========================================================================

    pub(crate) fn set_last_error(&self, err: &ApiError) {
        let mut last = self.last_error.borrow_mut();
        last.message = CString::new(err.message.replace('\0', "\\0")).unwrap_or_default();
        let message = last.message.as_ptr();
        last.info.error_code = err.status;
        last.info.engine_error_code = 0;
        last.info.error_message = message;
    }

    pub(crate) fn clear_last_error(&self) {
        let mut last = self.last_error.borrow_mut();
        last.info.error_code = Status::OK;
        last.info.engine_error_code = 0;
        last.info.error_message = ptr::null();
    }

    /// Valid until the next primitive runs on this environment.
    pub(crate) fn last_error_info(&self) -> *const sys::ExtendedErrorInfo {
        let last = self.last_error.borrow();
        &last.info as *const sys::ExtendedErrorInfo
    }

    /// Map an engine failure to a status. A thrown exception is caught and
    /// becomes the pending exception.
    pub(crate) fn lift(&self, err: rquickjs::Error) -> ApiError {
        match (err, self.ctx()) {
            (rquickjs::Error::Exception, Ok(ctx)) => {
                let exception = ctx.catch();
                let mut pending = self.pending.borrow_mut();
                if pending.is_none() {
                    *pending = Some(exception);
                }
                ApiError::new(Status::PENDING_EXCEPTION)
            }
            (err, _) => ApiError::with_message(Status::GENERIC_FAILURE, err.to_string()),
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }

    pub(crate) fn set_pending(&self, exception: JsValue) -> ApiResult<()> {
        let mut pending = self.pending.borrow_mut();
        if pending.is_some() {
            return Err(ApiError::new(Status::PENDING_EXCEPTION));
        }
        *pending = Some(exception);
        Ok(())
    }

    pub(crate) fn take_pending(&self) -> Option<JsValue> {
        self.pending.borrow_mut().take()
    }

    // ========================================================================
    // Handles
    // ========================================================================

    pub(crate) fn push(&self, value: JsValue) -> sys::Value {
        let mut handles = self.handles.borrow_mut();
        handles.push(value);
        handles.len() as sys::Value
    }

    pub(crate) fn value(&self, raw: sys::Value) -> ApiResult<JsValue> {
        let index = (raw as usize).wrapping_sub(1);
        self.handles.borrow().get(index).cloned().ok_or_else(|| {
            ApiError::with_message(Status::INVALID_ARG, "value handle is not live")
        })
    }

    /// Convert `value` and hand it out as a handle.
    pub(crate) fn js<T: IntoJs<'static>>(&self, value: T) -> ApiResult<sys::Value> {
        let ctx = self.ctx()?;
        let value = value.into_js(&ctx).map_err(|err| self.lift(err))?;
        Ok(self.push(value))
    }

    fn mark(&self) -> usize {
        self.handles.borrow().len()
    }

    /// Drop every handle pushed since `mark`.
    fn release(&self, mark: usize) {
        let released = {
            let mut handles = self.handles.borrow_mut();
            let keep = mark.min(handles.len());
            handles.split_off(keep)
        };
        drop(released);
    }

    // ========================================================================
    // Helper table
    // ========================================================================

    pub(crate) fn call<A, R>(&self, name: &str, args: A) -> ApiResult<R>
    where
        A: IntoArgs<'static>,
        R: FromJs<'static>,
    {
        let ctx = self.ctx()?;
        let helpers = self.helpers.borrow().clone().ok_or_else(|| {
            ApiError::with_message(Status::GENERIC_FAILURE, "helpers are not installed")
        })?;
        let helpers = helpers.restore(&ctx).map_err(|err| self.lift(err))?;
        let function: Function<'static> = helpers.get(name).map_err(|err| self.lift(err))?;
        function.call(args).map_err(|err| self.lift(err))
    }

    pub(crate) fn array(&self, values: Vec<JsValue>) -> ApiResult<Array<'static>> {
        let array = Array::new(self.ctx()?).map_err(|err| self.lift(err))?;
        for (index, value) in values.into_iter().enumerate() {
            array.set(index, value).map_err(|err| self.lift(err))?;
        }
        Ok(array)
    }

    /// Name, message and code of a thrown value.
    pub(crate) fn describe(&self, exception: JsValue) -> HostError {
        let described = self
            .call::<_, Object<'static>>("describe", (exception,))
            .and_then(|info| {
                let read = |key: &str| -> ApiResult<Option<String>> {
                    info.get(key).map_err(|err| self.lift(err))
                };
                Ok(HostError::Exception {
                    name: read("name")?.unwrap_or_default(),
                    message: read("message")?.unwrap_or_default(),
                    code: read("code")?,
                })
            });
        self.take_pending();
        described.unwrap_or_else(|err| HostError::Exception {
            name: String::new(),
            message: format!("<unprintable exception: {}>", err.message),
            code: None,
        })
    }

    /// Turn a failed primitive into a host error, preferring the exception
    /// it left pending.
    pub(crate) fn host_error(&self, err: ApiError) -> HostError {
        match self.take_pending() {
            Some(exception) if err.status == Status::PENDING_EXCEPTION => self.describe(exception),
            _ => HostError::Api {
                status: err.status,
                message: err.message.into_owned(),
            },
        }
    }

    // ========================================================================
    // Native functions
    // ========================================================================

    /// A script function that forwards `(this, args)` to `cb`.
    pub(crate) fn native(&self, cb: sys::Callback, data: *mut c_void) -> ApiResult<Function<'static>> {
        let ctx = self.ctx()?;
        let env = self as *const HostEnv;
        Function::new(ctx, move |this: JsValue, args: Array<'static>| {
            // SAFETY: script only runs inside `Host::enter`, which keeps the
            // environment boxed and alive.
            let env = unsafe { &*env };
            env.invoke(cb, data, this, args)
        })
        .map_err(|err| self.lift(err))
    }

    fn invoke(
        &self,
        cb: sys::Callback,
        data: *mut c_void,
        this: JsValue,
        args: Array<'static>,
    ) -> rquickjs::Result<JsValue> {
        let ctx = this.ctx().clone();
        let mark = self.mark();
        let mut raw_args = Vec::with_capacity(args.len());
        for index in 0..args.len() {
            raw_args.push(self.push(args.get::<JsValue>(index)?));
        }
        let frame = CallFrame {
            this: self.push(this),
            args: raw_args,
            data,
        };
        let raw = unsafe { cb(self.raw(), &frame as *const CallFrame as sys::CallbackInfo) };
        let result = if raw.is_null() {
            None
        } else {
            self.value(raw).ok()
        };
        self.release(mark);

        if let Some(exception) = self.take_pending() {
            return Err(ctx.throw(exception));
        }
        Ok(result.unwrap_or_else(|| Value::new_undefined(ctx)))
    }

    /// Run a plugin entry point against `exports`.
    pub(crate) fn run_init(&self, init: sys::ModuleInit, api: &sys::HostApi, exports: JsValue) -> Option<JsValue> {
        let mark = self.mark();
        let raw = unsafe { init(api, self.raw(), self.push(exports)) };
        let returned = if raw.is_null() {
            None
        } else {
            self.value(raw).ok()
        };
        self.release(mark);
        returned
    }

    // ========================================================================
    // Wraps
    // ========================================================================

    pub(crate) fn wrap(
        &self,
        object: JsValue,
        native: *mut c_void,
        finalize: Option<sys::Finalize>,
        hint: *mut c_void,
    ) -> ApiResult<()> {
        let id = self.next_wrap.get();
        self.next_wrap.set(id + 1);
        let guard = WrapGuard {
            id,
            collected: Rc::clone(&self.collected),
        };
        let slot = Function::new(self.ctx()?, move || guard.id as f64).map_err(|err| self.lift(err))?;
        if !self.call::<_, bool>("attach", (object, slot))? {
            return Err(ApiError::with_message(Status::INVALID_ARG, "object is already wrapped"));
        }
        self.wraps.borrow_mut().insert(
            id,
            WrapRecord {
                native,
                finalize,
                hint,
            },
        );
        Ok(())
    }

    pub(crate) fn unwrap(&self, object: JsValue) -> ApiResult<*mut c_void> {
        let id = self.call::<_, f64>("wrapped", (object,))?;
        if id < 0.0 {
            return Err(ApiError::with_message(Status::INVALID_ARG, "object is not wrapped"));
        }
        self.wraps
            .borrow()
            .get(&(id as u64))
            .map(|record| record.native)
            .ok_or_else(|| ApiError::with_message(Status::INVALID_ARG, "wrapped object was finalized"))
    }

    /// Run the finalizers of wrapped objects the engine has freed.
    pub(crate) fn drain_finalizers(&self) -> usize {
        let mut finalized = 0;
        loop {
            let next = self.collected.borrow_mut().pop();
            let Some(id) = next else { break };
            let record = self.wraps.borrow_mut().remove(&id);
            if let Some(record) = record {
                self.finalize(record.finalize, record.native, record.hint);
                finalized += 1;
            }
        }
        finalized
    }

    fn finalize(&self, finalize: Option<sys::Finalize>, data: *mut c_void, hint: *mut c_void) {
        if let Some(finalize) = finalize {
            let mark = self.mark();
            unsafe { finalize(self.raw(), data, hint) };
            self.release(mark);
        }
    }

    pub(crate) fn live_wraps(&self) -> usize {
        self.wraps.borrow().len()
    }

    // ========================================================================
    // References
    // ========================================================================

    pub(crate) fn create_ref(&self, value: JsValue, count: u32) -> ApiResult<sys::Ref> {
        let ctx = self.ctx()?;
        let id = self.next_ref.get();
        self.next_ref.set(id + 1);
        self.refs.borrow_mut().insert(
            id,
            RefEntry {
                value: Persistent::save(&ctx, value),
                count,
            },
        );
        Ok(id as sys::Ref)
    }

    pub(crate) fn delete_ref(&self, reference: sys::Ref) -> ApiResult<()> {
        let removed = self.refs.borrow_mut().remove(&(reference as usize));
        match removed {
            Some(entry) => {
                drop(entry);
                Ok(())
            }
            None => Err(unknown_ref()),
        }
    }

    /// Apply `f` to the count of `reference` and return the new count.
    pub(crate) fn adjust_ref(
        &self,
        reference: sys::Ref,
        f: impl FnOnce(u32) -> ApiResult<u32>,
    ) -> ApiResult<u32> {
        let mut refs = self.refs.borrow_mut();
        let entry = refs.get_mut(&(reference as usize)).ok_or_else(unknown_ref)?;
        entry.count = f(entry.count)?;
        Ok(entry.count)
    }

    pub(crate) fn ref_value(&self, reference: sys::Ref) -> ApiResult<JsValue> {
        let ctx = self.ctx()?;
        let saved = self
            .refs
            .borrow()
            .get(&(reference as usize))
            .map(|entry| entry.value.clone())
            .ok_or_else(unknown_ref)?;
        saved.restore(&ctx).map_err(|err| self.lift(err))
    }

    pub(crate) fn live_references(&self) -> usize {
        self.refs.borrow().len()
    }

    // ========================================================================
    // Instance data and teardown
    // ========================================================================

    pub(crate) fn set_instance_data(&self, data: InstanceData) {
        *self.instance.borrow_mut() = Some(data);
    }

    pub(crate) fn instance_data(&self) -> *mut c_void {
        self.instance
            .borrow()
            .as_ref()
            .map_or(ptr::null_mut(), |instance| instance.data)
    }

    pub(crate) fn has_instance_data(&self) -> bool {
        self.instance.borrow().is_some()
    }

    /// Finalize what is still wrapped, then the module instance data, then
    /// drop every value this environment holds.
    pub(crate) fn teardown(&self, finalize_wraps: bool) {
        self.drain_finalizers();
        if finalize_wraps {
            let records: Vec<WrapRecord> = self.wraps.borrow_mut().drain().map(|(_, r)| r).collect();
            tracing::debug!(count = records.len(), "finalizing wrapped objects at teardown");
            for record in records {
                self.finalize(record.finalize, record.native, record.hint);
            }
        }
        let instance = self.instance.borrow_mut().take();
        if let Some(instance) = instance {
            self.finalize(instance.finalize, instance.data, instance.hint);
        }

        let leaked = std::mem::take(&mut *self.refs.borrow_mut());
        if !leaked.is_empty() {
            tracing::warn!(count = leaked.len(), "references still live at teardown");
        }
        drop(leaked);
        self.take_pending();
        self.helpers.borrow_mut().take();
    }
}

fn unknown_ref() -> ApiError {
    ApiError::with_message(Status::INVALID_ARG, "reference is not live")
}
