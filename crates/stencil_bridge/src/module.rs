//! Module registration glue
//!
//! Builds property descriptors for classes and exports, keeps the callback
//! tokens they reference, and attaches per-module instance data.

use crate::arena::{unlaunder, Token};
use crate::args::CallArgs;
use crate::env::{install_api, Env, Value};
use crate::error::{BridgeError, Result};
use crate::trampoline::{make_callback, make_finalize, recover, throw_error};
use stencil_abi as sys;
use stencil_abi::{PropertyAttributes, PropertyDescriptor, Status};
use std::any::Any;
use std::ffi::CString;
use std::ptr;
use std::sync::Arc;

/// A native-backed callable member waiting to be defined.
pub struct PropertyDef {
    name: CString,
    callback: sys::Callback,
    data: Token,
    attributes: PropertyAttributes,
}

impl PropertyDef {
    fn new<F>(name: &str, attributes: PropertyAttributes, handler: F) -> Result<Self>
    where
        F: Fn(&CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        let name = CString::new(name).map_err(|_| {
            BridgeError::status(Status::NAME_EXPECTED, format!("invalid member name {name:?}"))
        })?;
        let (callback, data) = make_callback(handler);
        Ok(Self {
            name,
            callback,
            data,
            attributes,
        })
    }

    /// Prototype method.
    pub fn method<F>(name: &str, handler: F) -> Result<Self>
    where
        F: Fn(&CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, PropertyAttributes::DEFAULT_METHOD, handler)
    }

    /// Method on the constructor itself.
    pub fn static_method<F>(name: &str, handler: F) -> Result<Self>
    where
        F: Fn(&CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(
            name,
            PropertyAttributes::DEFAULT_METHOD | PropertyAttributes::STATIC,
            handler,
        )
    }

    /// Enumerable module-level function.
    pub fn function<F>(name: &str, handler: F) -> Result<Self>
    where
        F: Fn(&CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, PropertyAttributes::DEFAULT_JSPROPERTY, handler)
    }

    fn descriptor(&self) -> PropertyDescriptor {
        PropertyDescriptor {
            utf8name: self.name.as_ptr(),
            name: ptr::null_mut(),
            method: Some(self.callback),
            getter: None,
            setter: None,
            value: ptr::null_mut(),
            attributes: self.attributes,
            data: self.data.as_ptr(),
        }
    }
}

fn into_tokens(defs: Vec<PropertyDef>) -> impl Iterator<Item = Token> {
    defs.into_iter().map(|def| def.data)
}

/// Define a class. Returns the constructor and the tokens backing the
/// constructor and every member; they must outlive the class.
pub fn define_class<F>(
    env: Env,
    name: &str,
    constructor: F,
    members: Vec<PropertyDef>,
) -> Result<(Value, Vec<Token>)>
where
    F: Fn(&CallArgs) -> Result<Value> + Send + Sync + 'static,
{
    let (ctor_cb, ctor_data) = make_callback(constructor);
    let descriptors: Vec<_> = members.iter().map(PropertyDef::descriptor).collect();
    let class = env.define_class(name, ctor_cb, ctor_data.as_ptr(), &descriptors)?;
    tracing::debug!(class = name, members = members.len(), "defined class");

    let mut tokens = vec![ctor_data];
    tokens.extend(into_tokens(members));
    Ok((class, tokens))
}

/// Define functions on `object` (usually the exports). Returns their tokens.
pub fn define_functions(env: Env, object: Value, functions: Vec<PropertyDef>) -> Result<Vec<Token>> {
    let descriptors: Vec<_> = functions.iter().map(PropertyDef::descriptor).collect();
    env.define_properties(object, &descriptors)?;
    Ok(into_tokens(functions).collect())
}

/// Attach `data` to the environment; `teardown` runs when the host unloads
/// the module.
pub fn set_instance_data<T, F>(env: Env, data: Arc<T>, teardown: F) -> Result<()>
where
    T: Any + Send + Sync,
    F: Fn(Env, Arc<T>) -> Result<()> + Send + Sync + 'static,
{
    let data_token = Token::launder(data);
    let (finalize_cb, hint) = make_finalize(move |env, raw| {
        let token = unsafe { Token::from_raw(raw) };
        let data = token.get::<T>();
        token.release();
        match data {
            Some(data) => teardown(env, data),
            None => Err(BridgeError::status(
                Status::GENERIC_FAILURE,
                "module instance data was not registered",
            )),
        }
    });
    env.set_instance_data(data_token.as_ptr(), finalize_cb, hint.as_ptr())?;
    data_token.into_raw();
    hint.into_raw();
    Ok(())
}

/// Data previously attached with [`set_instance_data`].
pub fn instance_data<T: Any + Send + Sync>(env: Env) -> Result<Arc<T>> {
    let raw = env.get_instance_data()?;
    unsafe { unlaunder::<T>(raw) }.ok_or_else(|| {
        BridgeError::status(Status::GENERIC_FAILURE, "module instance data is missing")
    })
}

/// Body of a module entry point: installs the host table, runs `init`, and
/// converts a failure (or a panic inside `init`) into a host exception.
///
/// # Safety
/// Arguments must be exactly those the host passed to the entry point.
pub unsafe fn register_module<F>(
    api: *const sys::HostApi,
    raw_env: sys::Env,
    exports: sys::Value,
    init: F,
) -> sys::Value
where
    F: FnOnce(Env, Value) -> Result<Value>,
{
    if let Err(err) = install_api(api) {
        tracing::error!(error = %err, "module registration rejected host api");
        return ptr::null_mut();
    }
    let env = Env::from_raw(raw_env);
    match recover(|| init(env, Value::from_raw(exports))).and_then(|result| result) {
        Ok(exports) => exports.raw(),
        Err(err) => {
            tracing::error!(error = %err, "module initialization failed");
            throw_error(env, &err);
            ptr::null_mut()
        }
    }
}
