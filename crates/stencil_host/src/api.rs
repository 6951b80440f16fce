//! The `HostApi` function table plugins are loaded with.
//!
//! Every entry resolves its environment from the `env` pointer, validates
//! raw handles against the handle stack and reports failures as a status
//! plus an extended error message, never by unwinding.

use crate::env::{ApiError, ApiResult, CallFrame, HostEnv, InstanceData, JsValue};
use rquickjs::{Object, Value};
use stencil_abi as sys;
use stencil_abi::{
    KeyCollectionMode, KeyConversion, KeyFilter, PropertyAttributes, PropertyDescriptor, Status,
    TypeTag, ValueType,
};
use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::slice;

/// The table handed to every plugin entry point.
pub static HOST_API: sys::HostApi = sys::HostApi {
    api_version: sys::HOST_API_VERSION,
    size: std::mem::size_of::<sys::HostApi>(),
    get_last_error_info,
    throw,
    throw_error,
    throw_type_error,
    is_exception_pending,
    get_and_clear_last_exception,
    fatal_error,
    get_undefined,
    get_null,
    get_global,
    get_boolean,
    create_double,
    create_int64,
    create_string_utf8,
    create_bigint_words,
    create_object,
    create_array_with_length,
    type_of,
    get_value_bool,
    get_value_double,
    get_value_string_utf8,
    get_value_bigint_words,
    is_array,
    get_array_length,
    get_all_property_names,
    set_property,
    get_property,
    set_named_property,
    set_element,
    get_element,
    define_properties,
    get_cb_info,
    call_function,
    create_function,
    define_class,
    new_instance,
    wrap,
    unwrap,
    type_tag_object,
    check_object_type_tag,
    create_reference,
    delete_reference,
    reference_ref,
    reference_unref,
    get_reference_value,
    set_instance_data,
    get_instance_data,
};

// ============================================================================
// Helpers
// ============================================================================

unsafe fn guard(env: sys::Env, f: impl FnOnce(&HostEnv) -> ApiResult<()>) -> Status {
    let Some(host) = HostEnv::from_raw(env) else {
        return Status::INVALID_ARG;
    };
    match f(host) {
        Ok(()) => {
            host.clear_last_error();
            Status::OK
        }
        Err(err) => {
            tracing::trace!(status = err.status.0, message = %err.message, "host primitive failed");
            host.set_last_error(&err);
            err.status
        }
    }
}

unsafe fn out<'a, T>(ptr: *mut T) -> ApiResult<&'a mut T> {
    ptr.as_mut()
        .ok_or_else(|| ApiError::with_message(Status::INVALID_ARG, "null out-parameter"))
}

unsafe fn c_str<'a>(ptr: *const c_char) -> ApiResult<&'a str> {
    if ptr.is_null() {
        return Err(ApiError::with_message(Status::INVALID_ARG, "null string"));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| ApiError::with_message(Status::INVALID_ARG, "string is not UTF-8"))
}

/// `length == usize::MAX` means NUL-terminated.
unsafe fn utf8<'a>(ptr: *const c_char, length: usize) -> ApiResult<&'a str> {
    if length == usize::MAX {
        return c_str(ptr);
    }
    if ptr.is_null() {
        return if length == 0 {
            Ok("")
        } else {
            Err(ApiError::with_message(Status::INVALID_ARG, "null string"))
        };
    }
    std::str::from_utf8(slice::from_raw_parts(ptr.cast::<u8>(), length))
        .map_err(|_| ApiError::with_message(Status::INVALID_ARG, "string is not UTF-8"))
}

unsafe fn values(host: &HostEnv, argc: usize, argv: *const sys::Value) -> ApiResult<Vec<JsValue>> {
    if argc == 0 {
        return Ok(Vec::new());
    }
    if argv.is_null() {
        return Err(ApiError::with_message(Status::INVALID_ARG, "null argument vector"));
    }
    slice::from_raw_parts(argv, argc)
        .iter()
        .map(|raw| host.value(*raw))
        .collect()
}

unsafe fn put(result: *mut sys::Value, handle: sys::Value) -> ApiResult<()> {
    *out(result)? = handle;
    Ok(())
}

fn is_object(value: &JsValue) -> bool {
    value.is_object() || value.is_function() || value.is_array()
}

fn object(host: &HostEnv, raw: sys::Value) -> ApiResult<JsValue> {
    let value = host.value(raw)?;
    if is_object(&value) {
        Ok(value)
    } else {
        Err(ApiError::new(Status::OBJECT_EXPECTED))
    }
}

fn function(host: &HostEnv, raw: sys::Value) -> ApiResult<JsValue> {
    let value = host.value(raw)?;
    if value.is_function() {
        Ok(value)
    } else {
        Err(ApiError::new(Status::FUNCTION_EXPECTED))
    }
}

fn undefined(host: &HostEnv) -> ApiResult<JsValue> {
    Ok(Value::new_undefined(host.ctx()?))
}

fn type_tag_text(tag: &TypeTag) -> String {
    format!("{:016x}{:016x}", tag.upper, tag.lower)
}

// ============================================================================
// Errors and exceptions
// ============================================================================

unsafe extern "C" fn get_last_error_info(
    env: sys::Env,
    result: *mut *const sys::ExtendedErrorInfo,
) -> Status {
    let Some(host) = HostEnv::from_raw(env) else {
        return Status::INVALID_ARG;
    };
    match result.as_mut() {
        Some(result) => {
            *result = host.last_error_info();
            Status::OK
        }
        None => Status::INVALID_ARG,
    }
}

unsafe extern "C" fn throw(env: sys::Env, error: sys::Value) -> Status {
    guard(env, |host| host.set_pending(host.value(error)?))
}

unsafe fn throw_new(env: sys::Env, type_error: bool, code: *const c_char, msg: *const c_char) -> Status {
    guard(env, |host| {
        let message = c_str(msg)?;
        let code = if code.is_null() { None } else { Some(c_str(code)?) };
        let error = host.call::<_, JsValue>("error", (type_error, message, code))?;
        host.set_pending(error)
    })
}

unsafe extern "C" fn throw_error(env: sys::Env, code: *const c_char, msg: *const c_char) -> Status {
    throw_new(env, false, code, msg)
}

unsafe extern "C" fn throw_type_error(
    env: sys::Env,
    code: *const c_char,
    msg: *const c_char,
) -> Status {
    throw_new(env, true, code, msg)
}

unsafe extern "C" fn is_exception_pending(env: sys::Env, result: *mut bool) -> Status {
    guard(env, |host| {
        *out(result)? = host.has_pending();
        Ok(())
    })
}

unsafe extern "C" fn get_and_clear_last_exception(env: sys::Env, result: *mut sys::Value) -> Status {
    guard(env, |host| {
        let exception = match host.take_pending() {
            Some(exception) => exception,
            None => undefined(host)?,
        };
        put(result, host.push(exception))
    })
}

unsafe extern "C" fn fatal_error(
    location: *const c_char,
    location_len: usize,
    message: *const c_char,
    message_len: usize,
) {
    let location = utf8(location, location_len).unwrap_or("<unknown>");
    let message = utf8(message, message_len).unwrap_or("<invalid message>");
    tracing::error!(location, message, "fatal error raised by plugin");
    std::process::abort();
}

// ============================================================================
// Creating values
// ============================================================================

unsafe extern "C" fn get_undefined(env: sys::Env, result: *mut sys::Value) -> Status {
    guard(env, |host| put(result, host.push(undefined(host)?)))
}

unsafe extern "C" fn get_null(env: sys::Env, result: *mut sys::Value) -> Status {
    guard(env, |host| put(result, host.push(Value::new_null(host.ctx()?))))
}

unsafe extern "C" fn get_global(env: sys::Env, result: *mut sys::Value) -> Status {
    guard(env, |host| put(result, host.push(host.ctx()?.globals().into_value())))
}

unsafe extern "C" fn get_boolean(env: sys::Env, value: bool, result: *mut sys::Value) -> Status {
    guard(env, |host| put(result, host.js(value)?))
}

unsafe extern "C" fn create_double(env: sys::Env, value: f64, result: *mut sys::Value) -> Status {
    guard(env, |host| put(result, host.js(value)?))
}

unsafe extern "C" fn create_int64(env: sys::Env, value: i64, result: *mut sys::Value) -> Status {
    guard(env, |host| put(result, host.js(value as f64)?))
}

unsafe extern "C" fn create_string_utf8(
    env: sys::Env,
    str: *const c_char,
    length: usize,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| put(result, host.js(utf8(str, length)?)?))
}

unsafe extern "C" fn create_bigint_words(
    env: sys::Env,
    sign_bit: i32,
    word_count: usize,
    words: *const u64,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let words = if word_count == 0 {
            &[][..]
        } else if words.is_null() {
            return Err(ApiError::with_message(Status::INVALID_ARG, "null word buffer"));
        } else {
            slice::from_raw_parts(words, word_count)
        };
        let hex = words_to_hex(words);
        let value = host.call::<_, JsValue>("bigint", (sign_bit != 0, hex))?;
        put(result, host.push(value))
    })
}

unsafe extern "C" fn create_object(env: sys::Env, result: *mut sys::Value) -> Status {
    guard(env, |host| {
        let object = Object::new(host.ctx()?).map_err(|err| host.lift(err))?;
        put(result, host.push(object.into_value()))
    })
}

unsafe extern "C" fn create_array_with_length(
    env: sys::Env,
    length: usize,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let array = host.call::<_, JsValue>("array", (length as f64,))?;
        put(result, host.push(array))
    })
}

// ============================================================================
// Reading values
// ============================================================================

unsafe extern "C" fn type_of(env: sys::Env, value: sys::Value, result: *mut ValueType) -> Status {
    guard(env, |host| {
        let value = host.value(value)?;
        *out(result)? = if value.is_undefined() {
            ValueType::UNDEFINED
        } else if value.is_null() {
            ValueType::NULL
        } else if value.is_bool() {
            ValueType::BOOLEAN
        } else if value.is_number() {
            ValueType::NUMBER
        } else if value.is_string() {
            ValueType::STRING
        } else if value.is_symbol() {
            ValueType::SYMBOL
        } else if value.as_big_int().is_some() {
            ValueType::BIGINT
        } else if value.is_function() {
            ValueType::FUNCTION
        } else {
            ValueType::OBJECT
        };
        Ok(())
    })
}

unsafe extern "C" fn get_value_bool(env: sys::Env, value: sys::Value, result: *mut bool) -> Status {
    guard(env, |host| {
        let flag = host
            .value(value)?
            .as_bool()
            .ok_or_else(|| ApiError::new(Status::BOOLEAN_EXPECTED))?;
        *out(result)? = flag;
        Ok(())
    })
}

unsafe extern "C" fn get_value_double(env: sys::Env, value: sys::Value, result: *mut f64) -> Status {
    guard(env, |host| {
        let number = host
            .value(value)?
            .as_number()
            .ok_or_else(|| ApiError::new(Status::NUMBER_EXPECTED))?;
        *out(result)? = number;
        Ok(())
    })
}

unsafe extern "C" fn get_value_string_utf8(
    env: sys::Env,
    value: sys::Value,
    buf: *mut c_char,
    bufsize: usize,
    result: *mut usize,
) -> Status {
    guard(env, |host| {
        let value = host.value(value)?;
        let string = value
            .as_string()
            .ok_or_else(|| ApiError::new(Status::STRING_EXPECTED))?
            .to_string()
            .map_err(|err| host.lift(err))?;
        let bytes = string.as_bytes();
        if buf.is_null() {
            *out(result)? = bytes.len();
            return Ok(());
        }
        let copied = if bufsize == 0 {
            0
        } else {
            let copied = bytes.len().min(bufsize - 1);
            ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), copied);
            *buf.add(copied) = 0;
            copied
        };
        if let Some(result) = result.as_mut() {
            *result = copied;
        }
        Ok(())
    })
}

unsafe extern "C" fn get_value_bigint_words(
    env: sys::Env,
    value: sys::Value,
    sign_bit: *mut i32,
    word_count: *mut usize,
    words: *mut u64,
) -> Status {
    guard(env, |host| {
        let value = host.value(value)?;
        if !value.as_big_int().is_some() {
            return Err(ApiError::new(Status::BIGINT_EXPECTED));
        }
        let text = host.call::<_, String>("bigintHex", (value,))?;
        let (negative, limbs) = hex_to_words(&text)?;
        let word_count = out(word_count)?;
        if !words.is_null() {
            let capacity = (*word_count).min(limbs.len());
            ptr::copy_nonoverlapping(limbs.as_ptr(), words, capacity);
            if let Some(sign_bit) = sign_bit.as_mut() {
                *sign_bit = negative as i32;
            }
        }
        *word_count = limbs.len();
        Ok(())
    })
}

unsafe extern "C" fn is_array(env: sys::Env, value: sys::Value, result: *mut bool) -> Status {
    guard(env, |host| {
        *out(result)? = host.value(value)?.is_array();
        Ok(())
    })
}

unsafe extern "C" fn get_array_length(env: sys::Env, value: sys::Value, result: *mut u32) -> Status {
    guard(env, |host| {
        let value = host.value(value)?;
        let length = value
            .as_array()
            .ok_or_else(|| ApiError::new(Status::ARRAY_EXPECTED))?
            .len();
        *out(result)? = length as u32;
        Ok(())
    })
}

// ============================================================================
// Properties
// ============================================================================

unsafe extern "C" fn get_all_property_names(
    env: sys::Env,
    object_value: sys::Value,
    key_mode: KeyCollectionMode,
    key_filter: KeyFilter,
    key_conversion: KeyConversion,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let target = object(host, object_value)?;
        let keys = host.call::<_, JsValue>(
            "keys",
            (
                target,
                key_mode == KeyCollectionMode::OWN_ONLY,
                key_filter.0 as f64,
                key_conversion == KeyConversion::NUMBERS_TO_STRINGS,
            ),
        )?;
        put(result, host.push(keys))
    })
}

unsafe extern "C" fn set_property(
    env: sys::Env,
    object_value: sys::Value,
    key: sys::Value,
    value: sys::Value,
) -> Status {
    guard(env, |host| {
        let target = object(host, object_value)?;
        host.call::<_, ()>("set", (target, host.value(key)?, host.value(value)?))
    })
}

unsafe extern "C" fn get_property(
    env: sys::Env,
    object_value: sys::Value,
    key: sys::Value,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let target = object(host, object_value)?;
        let value = host.call::<_, JsValue>("get", (target, host.value(key)?))?;
        put(result, host.push(value))
    })
}

unsafe extern "C" fn set_named_property(
    env: sys::Env,
    object_value: sys::Value,
    utf8name: *const c_char,
    value: sys::Value,
) -> Status {
    guard(env, |host| {
        let target = object(host, object_value)?;
        host.call::<_, ()>("set", (target, c_str(utf8name)?, host.value(value)?))
    })
}

unsafe extern "C" fn set_element(
    env: sys::Env,
    object_value: sys::Value,
    index: u32,
    value: sys::Value,
) -> Status {
    guard(env, |host| {
        let target = object(host, object_value)?;
        host.call::<_, ()>("set", (target, index as f64, host.value(value)?))
    })
}

unsafe extern "C" fn get_element(
    env: sys::Env,
    object_value: sys::Value,
    index: u32,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let target = object(host, object_value)?;
        let value = host.call::<_, JsValue>("get", (target, index as f64))?;
        put(result, host.push(value))
    })
}

unsafe fn descriptors<'a>(count: usize, properties: *const PropertyDescriptor) -> ApiResult<&'a [PropertyDescriptor]> {
    if count == 0 {
        Ok(&[])
    } else if properties.is_null() {
        Err(ApiError::with_message(Status::INVALID_ARG, "null property descriptors"))
    } else {
        Ok(slice::from_raw_parts(properties, count))
    }
}

/// Define one descriptor on `target`. Methods, getters and setters become
/// script functions that forward to the descriptor's callbacks.
unsafe fn define_descriptor(host: &HostEnv, target: &JsValue, descriptor: &PropertyDescriptor) -> ApiResult<()> {
    let key = if descriptor.utf8name.is_null() {
        host.value(descriptor.name)?
    } else {
        let name = c_str(descriptor.utf8name)?;
        rquickjs::String::from_str(host.ctx()?, name)
            .map_err(|err| host.lift(err))?
            .into_value()
    };
    let label = key
        .as_string()
        .and_then(|name| name.to_string().ok())
        .unwrap_or_default();
    let forward = |cb: Option<sys::Callback>| -> ApiResult<JsValue> {
        match cb {
            Some(cb) => {
                let native = host.native(cb, descriptor.data)?;
                host.call::<_, JsValue>("func", (label.as_str(), native))
            }
            None => undefined(host),
        }
    };
    let value = match descriptor.method {
        Some(_) => forward(descriptor.method)?,
        None if descriptor.value.is_null() => undefined(host)?,
        None => host.value(descriptor.value)?,
    };
    let getter = forward(descriptor.getter)?;
    let setter = forward(descriptor.setter)?;
    let attributes = descriptor.attributes;
    host.call::<_, ()>(
        "define",
        (
            target.clone(),
            key,
            value,
            getter,
            setter,
            // IntoArgs only covers tuples up to 7; spread the flags as trailing args.
            rquickjs::function::Rest(vec![
                attributes.contains(PropertyAttributes::WRITABLE),
                attributes.contains(PropertyAttributes::ENUMERABLE),
                attributes.contains(PropertyAttributes::CONFIGURABLE),
            ]),
        ),
    )
}

unsafe extern "C" fn define_properties(
    env: sys::Env,
    object_value: sys::Value,
    property_count: usize,
    properties: *const PropertyDescriptor,
) -> Status {
    guard(env, |host| {
        let target = object(host, object_value)?;
        for descriptor in descriptors(property_count, properties)? {
            define_descriptor(host, &target, descriptor)?;
        }
        Ok(())
    })
}

// ============================================================================
// Functions and classes
// ============================================================================

/// `argc` is the capacity of `argv` on entry and the actual argument count
/// on return; unused `argv` slots are filled with `undefined`.
unsafe extern "C" fn get_cb_info(
    env: sys::Env,
    info: sys::CallbackInfo,
    argc: *mut usize,
    argv: *mut sys::Value,
    this_arg: *mut sys::Value,
    data: *mut *mut c_void,
) -> Status {
    guard(env, |host| {
        let frame = (info as *const CallFrame)
            .as_ref()
            .ok_or_else(|| ApiError::with_message(Status::INVALID_ARG, "null callback info"))?;
        if let Some(argc) = argc.as_mut() {
            if !argv.is_null() && *argc > frame.args.len() {
                let filler = host.push(undefined(host)?);
                for i in frame.args.len()..*argc {
                    *argv.add(i) = filler;
                }
            }
            if !argv.is_null() {
                for (i, arg) in frame.args.iter().take(*argc).enumerate() {
                    *argv.add(i) = *arg;
                }
            }
            *argc = frame.args.len();
        }
        if let Some(this_arg) = this_arg.as_mut() {
            *this_arg = frame.this;
        }
        if let Some(data) = data.as_mut() {
            *data = frame.data;
        }
        Ok(())
    })
}

unsafe extern "C" fn call_function(
    env: sys::Env,
    recv: sys::Value,
    func: sys::Value,
    argc: usize,
    argv: *const sys::Value,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let target = function(host, func)?;
        let recv = if recv.is_null() { undefined(host)? } else { host.value(recv)? };
        let args = host.array(values(host, argc, argv)?)?;
        let returned = host.call::<_, JsValue>("apply", (target, recv, args))?;
        if !result.is_null() {
            put(result, host.push(returned))?;
        }
        Ok(())
    })
}

unsafe extern "C" fn create_function(
    env: sys::Env,
    utf8name: *const c_char,
    length: usize,
    cb: sys::Callback,
    data: *mut c_void,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let name = utf8(utf8name, length)?;
        let native = host.native(cb, data)?;
        let function = host.call::<_, JsValue>("func", (name, native))?;
        put(result, host.push(function))
    })
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn define_class(
    env: sys::Env,
    utf8name: *const c_char,
    length: usize,
    constructor: sys::Callback,
    data: *mut c_void,
    property_count: usize,
    properties: *const PropertyDescriptor,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let name = utf8(utf8name, length)?;
        let descriptors = descriptors(property_count, properties)?;
        let native = host.native(constructor, data)?;
        let class = host.call::<_, JsValue>("klass", (name, native))?;
        let prototype = host.call::<_, JsValue>("get", (class.clone(), "prototype"))?;
        for descriptor in descriptors {
            let target = if descriptor.attributes.contains(PropertyAttributes::STATIC) {
                &class
            } else {
                &prototype
            };
            define_descriptor(host, target, descriptor)?;
        }
        put(result, host.push(class))
    })
}

unsafe extern "C" fn new_instance(
    env: sys::Env,
    constructor: sys::Value,
    argc: usize,
    argv: *const sys::Value,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let class = function(host, constructor)?;
        let args = host.array(values(host, argc, argv)?)?;
        let instance = host.call::<_, JsValue>("construct", (class, args))?;
        put(result, host.push(instance))
    })
}

// ============================================================================
// Object wrap
// ============================================================================

unsafe extern "C" fn wrap(
    env: sys::Env,
    js_object: sys::Value,
    native_object: *mut c_void,
    finalize_cb: Option<sys::Finalize>,
    finalize_hint: *mut c_void,
    result: *mut sys::Ref,
) -> Status {
    guard(env, |host| {
        let target = object(host, js_object)?;
        host.wrap(target.clone(), native_object, finalize_cb, finalize_hint)?;
        if !result.is_null() {
            *result = host.create_ref(target, 0)?;
        }
        Ok(())
    })
}

unsafe extern "C" fn unwrap(env: sys::Env, js_object: sys::Value, result: *mut *mut c_void) -> Status {
    guard(env, |host| {
        let native = host.unwrap(object(host, js_object)?)?;
        *out(result)? = native;
        Ok(())
    })
}

unsafe extern "C" fn type_tag_object(
    env: sys::Env,
    object_value: sys::Value,
    type_tag: *const TypeTag,
) -> Status {
    guard(env, |host| {
        let tag = type_tag
            .as_ref()
            .ok_or_else(|| ApiError::with_message(Status::INVALID_ARG, "null type tag"))?;
        let target = object(host, object_value)?;
        if !host.call::<_, bool>("stamp", (target, type_tag_text(tag)))? {
            return Err(ApiError::with_message(
                Status::INVALID_ARG,
                "object is already type-tagged",
            ));
        }
        Ok(())
    })
}

unsafe extern "C" fn check_object_type_tag(
    env: sys::Env,
    object_value: sys::Value,
    type_tag: *const TypeTag,
    result: *mut bool,
) -> Status {
    guard(env, |host| {
        let tag = type_tag
            .as_ref()
            .ok_or_else(|| ApiError::with_message(Status::INVALID_ARG, "null type tag"))?;
        let target = object(host, object_value)?;
        let stamped = host.call::<_, String>("tagOf", (target,))?;
        *out(result)? = stamped == type_tag_text(tag);
        Ok(())
    })
}

// ============================================================================
// References
// ============================================================================

unsafe extern "C" fn create_reference(
    env: sys::Env,
    value: sys::Value,
    initial_refcount: u32,
    result: *mut sys::Ref,
) -> Status {
    guard(env, |host| {
        let target = host.value(value)?;
        let result = out(result)?;
        *result = host.create_ref(target, initial_refcount)?;
        Ok(())
    })
}

unsafe extern "C" fn delete_reference(env: sys::Env, reference: sys::Ref) -> Status {
    guard(env, |host| host.delete_ref(reference))
}

unsafe extern "C" fn reference_ref(env: sys::Env, reference: sys::Ref, result: *mut u32) -> Status {
    guard(env, |host| {
        let count = host.adjust_ref(reference, |count| Ok(count + 1))?;
        if let Some(result) = result.as_mut() {
            *result = count;
        }
        Ok(())
    })
}

unsafe extern "C" fn reference_unref(env: sys::Env, reference: sys::Ref, result: *mut u32) -> Status {
    guard(env, |host| {
        let count = host.adjust_ref(reference, |count| {
            count.checked_sub(1).ok_or_else(|| {
                ApiError::with_message(Status::GENERIC_FAILURE, "reference count is already zero")
            })
        })?;
        if let Some(result) = result.as_mut() {
            *result = count;
        }
        Ok(())
    })
}

unsafe extern "C" fn get_reference_value(
    env: sys::Env,
    reference: sys::Ref,
    result: *mut sys::Value,
) -> Status {
    guard(env, |host| {
        let value = host.ref_value(reference)?;
        put(result, host.push(value))
    })
}

// ============================================================================
// Instance data
// ============================================================================

unsafe extern "C" fn set_instance_data(
    env: sys::Env,
    data: *mut c_void,
    finalize_cb: Option<sys::Finalize>,
    finalize_hint: *mut c_void,
) -> Status {
    guard(env, |host| {
        host.set_instance_data(InstanceData {
            data,
            finalize: finalize_cb,
            hint: finalize_hint,
        });
        Ok(())
    })
}

unsafe extern "C" fn get_instance_data(env: sys::Env, data: *mut *mut c_void) -> Status {
    guard(env, |host| {
        *out(data)? = host.instance_data();
        Ok(())
    })
}

// ============================================================================
// BigInt words
// ============================================================================

/// Little-endian words to the hex digits `BigInt("0x...")` reads.
fn words_to_hex(words: &[u64]) -> String {
    let hex: String = words.iter().rev().map(|word| format!("{word:016x}")).collect();
    if hex.is_empty() {
        "0".to_string()
    } else {
        hex
    }
}

/// Parse `bigintHex` output (an optional `-` then hex digits) into a sign
/// and little-endian words without trailing zero words.
fn hex_to_words(text: &str) -> ApiResult<(bool, Vec<u64>)> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text),
    };
    let invalid = || ApiError::with_message(Status::GENERIC_FAILURE, format!("malformed bigint digits {text:?}"));
    let bytes = digits.as_bytes();
    let mut words = Vec::with_capacity(bytes.len() / 16 + 1);
    let mut end = bytes.len();
    while end > 0 {
        let start = end.saturating_sub(16);
        let chunk = std::str::from_utf8(&bytes[start..end]).map_err(|_| invalid())?;
        words.push(u64::from_str_radix(chunk, 16).map_err(|_| invalid())?);
        end = start;
    }
    while words.last() == Some(&0) {
        words.pop();
    }
    Ok((negative && !words.is_empty(), words))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigint_words_hex_roundtrip() {
        assert_eq!(words_to_hex(&[]), "0");
        assert_eq!(
            words_to_hex(&[2, 0, 1]),
            "000000000000000100000000000000000000000000000002"
        );
        let (negative, words) = hex_to_words("-100000000000000000000000000000002").unwrap();
        assert!(negative);
        assert_eq!(words, vec![2, 0, 1]);
    }

    #[test]
    fn zero_bigint_has_no_words_or_sign() {
        let (negative, words) = hex_to_words("-0").unwrap();
        assert!(!negative);
        assert!(words.is_empty());
    }

    #[test]
    fn malformed_bigint_digits_are_rejected() {
        assert!(hex_to_words("xyz").is_err());
    }
}
