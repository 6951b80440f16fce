//! Safe facade over the host function table.
//!
//! Every primitive returns a status; a non-ok status is turned into a
//! [`BridgeError::Status`] carrying the host's extended error message.

use crate::error::{BridgeError, Result};
use once_cell::sync::OnceCell;
use stencil_abi as sys;
use stencil_abi::{
    KeyCollectionMode, KeyConversion, KeyFilter, PropertyDescriptor, Status, TypeTag, ValueType,
};
use std::ffi::{c_void, CStr, CString};
use std::ptr;

static HOST_API: OnceCell<&'static sys::HostApi> = OnceCell::new();

/// Record the host function table. Called once per module registration;
/// later calls must pass the same table.
///
/// # Safety
/// `api` must point to a table that stays valid for the life of the process.
pub unsafe fn install_api(api: *const sys::HostApi) -> Result<()> {
    let api = api.as_ref().ok_or_else(|| {
        BridgeError::status(Status::INVALID_ARG, "host api table is null")
    })?;
    if api.api_version < sys::HOST_API_VERSION || api.size < std::mem::size_of::<sys::HostApi>() {
        return Err(BridgeError::status(
            Status::GENERIC_FAILURE,
            format!(
                "host api version {} is older than required {}",
                api.api_version,
                sys::HOST_API_VERSION
            ),
        ));
    }
    let installed = HOST_API.get_or_init(|| api);
    if !ptr::eq(*installed, api) {
        return Err(BridgeError::status(
            Status::GENERIC_FAILURE,
            "a different host api table is already installed",
        ));
    }
    Ok(())
}

fn api() -> &'static sys::HostApi {
    match HOST_API.get() {
        Some(api) => api,
        None => panic!("host api used before module registration"),
    }
}

/// A host value. Only meaningful inside the native call that produced it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Value(sys::Value);

impl Value {
    pub fn from_raw(raw: sys::Value) -> Self {
        Value(raw)
    }

    pub fn raw(self) -> sys::Value {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// A persistent host reference. Owned: must be handed to
/// [`Env::delete_reference`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Reference(sys::Ref);

// Host references are plain handles; they are only dereferenced through an
// `Env` on the thread the host is calling from.
unsafe impl Send for Reference {}
unsafe impl Sync for Reference {}

impl Reference {
    pub(crate) fn from_raw(raw: sys::Ref) -> Self {
        Reference(raw)
    }

    pub fn raw(&self) -> sys::Ref {
        self.0
    }
}

/// Handle to one host execution context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Env(sys::Env);

// The host serializes calls into native code; an env handle is only used
// while the host call that supplied it is on the stack.
unsafe impl Send for Env {}
unsafe impl Sync for Env {}

macro_rules! host_call {
    ($env:expr, $func:ident ( $($arg:expr),* $(,)? )) => {{
        let status = unsafe { (api().$func)($env.0, $($arg),*) };
        $env.check(status)
    }};
}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| {
        BridgeError::status(Status::INVALID_ARG, format!("string {s:?} contains a NUL byte"))
    })
}

/// Text that always survives the trip to a C string: NUL bytes are spelled
/// out as `\0`.
fn c_message(s: &str) -> CString {
    CString::new(s.replace('\0', "\\0")).unwrap_or_default()
}

impl Env {
    /// # Safety
    /// `raw` must be an environment handle supplied by the host for the
    /// current call.
    pub unsafe fn from_raw(raw: sys::Env) -> Self {
        Env(raw)
    }

    pub fn raw(self) -> sys::Env {
        self.0
    }

    fn check(self, status: Status) -> Result<()> {
        if status.is_ok() {
            return Ok(());
        }
        let mut info: *const sys::ExtendedErrorInfo = ptr::null();
        let info_status = unsafe { (api().get_last_error_info)(self.0, &mut info) };
        let info = if info_status.is_ok() {
            unsafe { info.as_ref() }
        } else {
            None
        };
        let message = info
            .filter(|info| !info.error_message.is_null())
            .map(|info| {
                unsafe { CStr::from_ptr(info.error_message) }
                    .to_string_lossy()
                    .into_owned()
            });
        let code = match info {
            Some(info) if info.engine_error_code != 0 => {
                format!("{}:{}", info.error_code.name(), info.engine_error_code)
            }
            Some(info) if !info.error_code.is_ok() => info.error_code.name().to_string(),
            _ => status.name().to_string(),
        };
        Err(BridgeError::Status {
            status,
            code: Some(code),
            message: message.unwrap_or_else(|| status.message().to_string()),
        })
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    pub fn throw(self, error: Value) -> Result<()> {
        host_call!(self, throw(error.0))
    }

    pub fn throw_error(self, code: Option<&str>, message: &str) -> Result<()> {
        let code = code.map(c_message);
        let message = c_message(message);
        host_call!(
            self,
            throw_error(
                code.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
                message.as_ptr()
            )
        )
    }

    pub fn throw_type_error(self, code: Option<&str>, message: &str) -> Result<()> {
        let code = code.map(c_message);
        let message = c_message(message);
        host_call!(
            self,
            throw_type_error(
                code.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
                message.as_ptr()
            )
        )
    }

    pub fn is_exception_pending(self) -> Result<bool> {
        let mut result = false;
        host_call!(self, is_exception_pending(&mut result))?;
        Ok(result)
    }

    pub fn get_and_clear_last_exception(self) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, get_and_clear_last_exception(&mut result))?;
        Ok(Value(result))
    }

    // ------------------------------------------------------------------
    // Creating values
    // ------------------------------------------------------------------

    pub fn get_undefined(self) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, get_undefined(&mut result))?;
        Ok(Value(result))
    }

    pub fn get_null(self) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, get_null(&mut result))?;
        Ok(Value(result))
    }

    pub fn get_global(self) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, get_global(&mut result))?;
        Ok(Value(result))
    }

    pub fn get_boolean(self, value: bool) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, get_boolean(value, &mut result))?;
        Ok(Value(result))
    }

    pub fn create_double(self, value: f64) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, create_double(value, &mut result))?;
        Ok(Value(result))
    }

    pub fn create_int64(self, value: i64) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, create_int64(value, &mut result))?;
        Ok(Value(result))
    }

    pub fn create_string(self, value: &str) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(
            self,
            create_string_utf8(value.as_ptr().cast(), value.len(), &mut result)
        )?;
        Ok(Value(result))
    }

    /// `words` are little-endian 64-bit limbs of the magnitude.
    pub fn create_bigint_words(self, negative: bool, words: &[u64]) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(
            self,
            create_bigint_words(negative as i32, words.len(), words.as_ptr(), &mut result)
        )?;
        Ok(Value(result))
    }

    pub fn create_object(self) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, create_object(&mut result))?;
        Ok(Value(result))
    }

    pub fn create_array_with_length(self, length: usize) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, create_array_with_length(length, &mut result))?;
        Ok(Value(result))
    }

    // ------------------------------------------------------------------
    // Reading values
    // ------------------------------------------------------------------

    pub fn type_of(self, value: Value) -> Result<ValueType> {
        let mut result = ValueType::UNDEFINED;
        host_call!(self, type_of(value.0, &mut result))?;
        Ok(result)
    }

    pub fn get_value_bool(self, value: Value) -> Result<bool> {
        let mut result = false;
        host_call!(self, get_value_bool(value.0, &mut result))?;
        Ok(result)
    }

    pub fn get_value_double(self, value: Value) -> Result<f64> {
        let mut result = 0.0;
        host_call!(self, get_value_double(value.0, &mut result))?;
        Ok(result)
    }

    /// Two passes: query the byte length, then fill a buffer of that size.
    pub fn get_value_string(self, value: Value) -> Result<String> {
        let mut len = 0usize;
        host_call!(
            self,
            get_value_string_utf8(value.0, ptr::null_mut(), 0, &mut len)
        )?;

        let mut buf = vec![0u8; len + 1];
        let mut written = 0usize;
        host_call!(
            self,
            get_value_string_utf8(value.0, buf.as_mut_ptr().cast(), buf.len(), &mut written)
        )?;
        buf.truncate(written);
        String::from_utf8(buf).map_err(|err| {
            BridgeError::status(Status::STRING_EXPECTED, format!("invalid UTF-8 from host: {err}"))
        })
    }

    /// Returns the sign bit and the little-endian magnitude words.
    pub fn get_value_bigint_words(self, value: Value) -> Result<(bool, Vec<u64>)> {
        let mut word_count = 0usize;
        host_call!(
            self,
            get_value_bigint_words(value.0, ptr::null_mut(), &mut word_count, ptr::null_mut())
        )?;

        let mut sign_bit = 0i32;
        let mut words = vec![0u64; word_count];
        host_call!(
            self,
            get_value_bigint_words(value.0, &mut sign_bit, &mut word_count, words.as_mut_ptr())
        )?;
        words.truncate(word_count);
        Ok((sign_bit != 0, words))
    }

    pub fn is_array(self, value: Value) -> Result<bool> {
        let mut result = false;
        host_call!(self, is_array(value.0, &mut result))?;
        Ok(result)
    }

    pub fn get_array_length(self, value: Value) -> Result<u32> {
        let mut result = 0u32;
        host_call!(self, get_array_length(value.0, &mut result))?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    pub fn get_all_property_names(
        self,
        object: Value,
        mode: KeyCollectionMode,
        filter: KeyFilter,
        conversion: KeyConversion,
    ) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(
            self,
            get_all_property_names(object.0, mode, filter, conversion, &mut result)
        )?;
        Ok(Value(result))
    }

    pub fn set_property(self, object: Value, key: Value, value: Value) -> Result<()> {
        host_call!(self, set_property(object.0, key.0, value.0))
    }

    pub fn get_property(self, object: Value, key: Value) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, get_property(object.0, key.0, &mut result))?;
        Ok(Value(result))
    }

    pub fn set_named_property(self, object: Value, name: &str, value: Value) -> Result<()> {
        let name = c_string(name)?;
        host_call!(self, set_named_property(object.0, name.as_ptr(), value.0))
    }

    pub fn set_element(self, object: Value, index: u32, value: Value) -> Result<()> {
        host_call!(self, set_element(object.0, index, value.0))
    }

    pub fn get_element(self, object: Value, index: u32) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(self, get_element(object.0, index, &mut result))?;
        Ok(Value(result))
    }

    pub fn define_properties(self, object: Value, properties: &[PropertyDescriptor]) -> Result<()> {
        host_call!(
            self,
            define_properties(object.0, properties.len(), properties.as_ptr())
        )
    }

    // ------------------------------------------------------------------
    // Functions and classes
    // ------------------------------------------------------------------

    /// Raw access to per-call information; see [`crate::CallArgs`].
    pub fn get_cb_info(
        self,
        info: sys::CallbackInfo,
        argc: &mut usize,
        argv: *mut sys::Value,
        this_arg: &mut sys::Value,
        data: &mut *mut c_void,
    ) -> Result<()> {
        host_call!(self, get_cb_info(info, argc, argv, this_arg, data))
    }

    pub fn call_function(self, recv: Value, func: Value, args: &[Value]) -> Result<Value> {
        let argv: Vec<sys::Value> = args.iter().map(|v| v.0).collect();
        let mut result = ptr::null_mut();
        host_call!(
            self,
            call_function(recv.0, func.0, argv.len(), argv.as_ptr(), &mut result)
        )?;
        Ok(Value(result))
    }

    pub fn create_function(
        self,
        name: &str,
        cb: sys::Callback,
        data: *mut c_void,
    ) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(
            self,
            create_function(name.as_ptr().cast(), name.len(), cb, data, &mut result)
        )?;
        Ok(Value(result))
    }

    pub fn define_class(
        self,
        name: &str,
        constructor: sys::Callback,
        data: *mut c_void,
        properties: &[PropertyDescriptor],
    ) -> Result<Value> {
        let mut result = ptr::null_mut();
        host_call!(
            self,
            define_class(
                name.as_ptr().cast(),
                name.len(),
                constructor,
                data,
                properties.len(),
                properties.as_ptr(),
                &mut result,
            )
        )?;
        Ok(Value(result))
    }

    pub fn new_instance(self, constructor: Value, args: &[Value]) -> Result<Value> {
        let argv: Vec<sys::Value> = args.iter().map(|v| v.0).collect();
        let mut result = ptr::null_mut();
        host_call!(
            self,
            new_instance(constructor.0, argv.len(), argv.as_ptr(), &mut result)
        )?;
        Ok(Value(result))
    }

    // ------------------------------------------------------------------
    // Object wrap
    // ------------------------------------------------------------------

    pub fn wrap(
        self,
        object: Value,
        native: *mut c_void,
        finalize: sys::Finalize,
        hint: *mut c_void,
    ) -> Result<()> {
        host_call!(
            self,
            wrap(object.0, native, Some(finalize), hint, ptr::null_mut())
        )
    }

    pub fn unwrap(self, object: Value) -> Result<*mut c_void> {
        let mut result = ptr::null_mut();
        host_call!(self, unwrap(object.0, &mut result))?;
        Ok(result)
    }

    pub fn type_tag_object(self, object: Value, tag: &TypeTag) -> Result<()> {
        host_call!(self, type_tag_object(object.0, tag))
    }

    pub fn check_object_type_tag(self, object: Value, tag: &TypeTag) -> Result<bool> {
        let mut result = false;
        host_call!(self, check_object_type_tag(object.0, tag, &mut result))?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    pub fn create_reference(self, value: Value, initial_refcount: u32) -> Result<Reference> {
        let mut result = ptr::null_mut();
        host_call!(self, create_reference(value.0, initial_refcount, &mut result))?;
        Ok(Reference::from_raw(result))
    }

    pub fn delete_reference(self, reference: Reference) -> Result<()> {
        host_call!(self, delete_reference(reference.0))
    }

    pub fn reference_ref(self, reference: &Reference) -> Result<u32> {
        let mut result = 0u32;
        host_call!(self, reference_ref(reference.0, &mut result))?;
        Ok(result)
    }

    pub fn reference_unref(self, reference: &Reference) -> Result<u32> {
        let mut result = 0u32;
        host_call!(self, reference_unref(reference.0, &mut result))?;
        Ok(result)
    }

    /// `None` once the referenced value has been collected.
    pub fn get_reference_value(self, reference: &Reference) -> Result<Option<Value>> {
        let mut result = ptr::null_mut();
        host_call!(self, get_reference_value(reference.0, &mut result))?;
        Ok((!result.is_null()).then_some(Value(result)))
    }

    // ------------------------------------------------------------------
    // Instance data
    // ------------------------------------------------------------------

    pub fn set_instance_data(
        self,
        data: *mut c_void,
        finalize: sys::Finalize,
        hint: *mut c_void,
    ) -> Result<()> {
        host_call!(self, set_instance_data(data, Some(finalize), hint))
    }

    pub fn get_instance_data(self) -> Result<*mut c_void> {
        let mut result = ptr::null_mut();
        host_call!(self, get_instance_data(&mut result))?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_with_nul_bytes_still_convert() {
        assert_eq!(c_message("bad\0key").to_str().unwrap(), "bad\\0key");
        assert_eq!(c_message("plain").to_str().unwrap(), "plain");
        assert!(c_string("bad\0key").is_err());
    }
}
