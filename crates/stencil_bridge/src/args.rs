use crate::env::{Env, Value};
use crate::error::{BridgeError, Result};
use stencil_abi as sys;
use stencil_abi::Status;
use std::ffi::c_void;
use std::ptr;

/// Receiver and arguments of one host call.
pub struct CallArgs {
    env: Env,
    this: Value,
    args: Vec<Value>,
    data: *mut c_void,
}

/// Argument slots offered on the first `get_cb_info` call.
const INLINE_ARGS: usize = 8;

impl CallArgs {
    /// Read receiver, arguments and callback data. Calls with more than
    /// [`INLINE_ARGS`] arguments need a second pass for the rest.
    pub(crate) fn fetch(env: Env, info: sys::CallbackInfo) -> Result<Self> {
        let mut raw_args: Vec<sys::Value> = vec![ptr::null_mut(); INLINE_ARGS];
        let mut argc = INLINE_ARGS;
        let mut this_arg = ptr::null_mut();
        let mut data = ptr::null_mut();
        env.get_cb_info(info, &mut argc, raw_args.as_mut_ptr(), &mut this_arg, &mut data)?;

        if argc > INLINE_ARGS {
            raw_args.resize(argc, ptr::null_mut());
            let mut capacity = argc;
            env.get_cb_info(info, &mut capacity, raw_args.as_mut_ptr(), &mut this_arg, &mut data)?;
        }
        raw_args.truncate(argc);

        Ok(Self {
            env,
            this: Value::from_raw(this_arg),
            args: raw_args.into_iter().map(Value::from_raw).collect(),
            data,
        })
    }

    pub fn env(&self) -> Env {
        self.env
    }

    pub fn this(&self) -> Value {
        self.this
    }

    pub fn data(&self) -> *mut c_void {
        self.data
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn all(&self) -> &[Value] {
        &self.args
    }

    /// Argument `index`, or `undefined` when it was not passed.
    pub fn value(&self, index: usize) -> Result<Value> {
        match self.args.get(index) {
            Some(value) => Ok(*value),
            None => self.env.get_undefined(),
        }
    }

    /// Argument `index` as a string; missing or non-string arguments fail
    /// the same way the host's own string accessor does.
    pub fn string(&self, index: usize) -> Result<String> {
        let value = self.args.get(index).ok_or_else(string_expected)?;
        self.env.get_value_string(*value)
    }

    /// Every argument from `start` on, each required to be a string.
    pub fn strings_from(&self, start: usize) -> Result<Vec<String>> {
        (start..self.args.len()).map(|i| self.string(i)).collect()
    }
}

fn string_expected() -> BridgeError {
    BridgeError::Status {
        status: Status::STRING_EXPECTED,
        code: Some(Status::STRING_EXPECTED.name().to_string()),
        message: Status::STRING_EXPECTED.message().to_string(),
    }
}
