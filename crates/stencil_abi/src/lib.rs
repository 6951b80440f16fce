//! Stencil plugin ABI
//!
//! Raw `#[repr(C)]` types shared by the host runtime and native plugins.
//! Everything crossing the boundary is either a plain integer, a pointer to
//! an opaque host structure, or a function pointer in [`HostApi`].
//!
//! The layout and numbering mirror Node-API so the same plugin logic can be
//! pointed at an N-API style host with a thin shim.

use std::ffi::{c_char, c_void};
use std::ops::BitOr;

/// Version of [`HostApi`] this crate describes.
pub const HOST_API_VERSION: u32 = 1;

/// Symbol name the host looks up when loading a plugin.
pub const MODULE_INIT_SYMBOL: &str = "stencil_module_init";

// ============================================================================
// Opaque handles
// ============================================================================

macro_rules! opaque {
    ($($(#[$meta:meta])* $name:ident => $alias:ident;)*) => {
        $(
            $(#[$meta])*
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }

            pub type $alias = *mut $name;
        )*
    };
}

opaque! {
    /// One execution context of the host runtime.
    EnvOpaque => Env;
    /// A host value, valid for the duration of the current native call.
    ValueOpaque => Value;
    /// Per-call information (receiver, arguments, callback data).
    CallbackInfoOpaque => CallbackInfo;
    /// A persistent reference that can keep a host value alive.
    RefOpaque => Ref;
}

// ============================================================================
// Status codes
// ============================================================================

/// Result of every host API call.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const INVALID_ARG: Status = Status(1);
    pub const OBJECT_EXPECTED: Status = Status(2);
    pub const STRING_EXPECTED: Status = Status(3);
    pub const NAME_EXPECTED: Status = Status(4);
    pub const FUNCTION_EXPECTED: Status = Status(5);
    pub const NUMBER_EXPECTED: Status = Status(6);
    pub const BOOLEAN_EXPECTED: Status = Status(7);
    pub const ARRAY_EXPECTED: Status = Status(8);
    pub const GENERIC_FAILURE: Status = Status(9);
    pub const PENDING_EXCEPTION: Status = Status(10);
    pub const BIGINT_EXPECTED: Status = Status(17);

    pub fn is_ok(self) -> bool {
        self == Status::OK
    }

    /// Default message for a status, used when extended info is unavailable.
    pub fn message(self) -> &'static str {
        match self {
            Status::OK => "",
            Status::INVALID_ARG => "Invalid argument",
            Status::OBJECT_EXPECTED => "An object was expected",
            Status::STRING_EXPECTED => "A string was expected",
            Status::NAME_EXPECTED => "A string or symbol was expected",
            Status::FUNCTION_EXPECTED => "A function was expected",
            Status::NUMBER_EXPECTED => "A number was expected",
            Status::BOOLEAN_EXPECTED => "A boolean was expected",
            Status::ARRAY_EXPECTED => "An array was expected",
            Status::GENERIC_FAILURE => "Unknown failure",
            Status::PENDING_EXCEPTION => "An exception is pending",
            Status::BIGINT_EXPECTED => "A bigint was expected",
            _ => "Unknown status",
        }
    }

    /// Identifier used as the `code` of errors built from a failed call.
    pub fn name(self) -> &'static str {
        match self {
            Status::OK => "ok",
            Status::INVALID_ARG => "invalid_arg",
            Status::OBJECT_EXPECTED => "object_expected",
            Status::STRING_EXPECTED => "string_expected",
            Status::NAME_EXPECTED => "name_expected",
            Status::FUNCTION_EXPECTED => "function_expected",
            Status::NUMBER_EXPECTED => "number_expected",
            Status::BOOLEAN_EXPECTED => "boolean_expected",
            Status::ARRAY_EXPECTED => "array_expected",
            Status::GENERIC_FAILURE => "generic_failure",
            Status::PENDING_EXCEPTION => "pending_exception",
            Status::BIGINT_EXPECTED => "bigint_expected",
            _ => "unknown_status",
        }
    }
}

// ============================================================================
// Value types
// ============================================================================

/// Runtime type of a host value, as reported by `type_of`.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ValueType(pub i32);

impl ValueType {
    pub const UNDEFINED: ValueType = ValueType(0);
    pub const NULL: ValueType = ValueType(1);
    pub const BOOLEAN: ValueType = ValueType(2);
    pub const NUMBER: ValueType = ValueType(3);
    pub const STRING: ValueType = ValueType(4);
    pub const SYMBOL: ValueType = ValueType(5);
    pub const OBJECT: ValueType = ValueType(6);
    pub const FUNCTION: ValueType = ValueType(7);
    pub const EXTERNAL: ValueType = ValueType(8);
    pub const BIGINT: ValueType = ValueType(9);

    pub fn name(self) -> &'static str {
        match self {
            ValueType::UNDEFINED => "undefined",
            ValueType::NULL => "null",
            ValueType::BOOLEAN => "boolean",
            ValueType::NUMBER => "number",
            ValueType::STRING => "string",
            ValueType::SYMBOL => "symbol",
            ValueType::OBJECT => "object",
            ValueType::FUNCTION => "function",
            ValueType::EXTERNAL => "external",
            ValueType::BIGINT => "bigint",
            _ => "unknown",
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

/// Bitset of property attributes.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct PropertyAttributes(pub u32);

impl PropertyAttributes {
    pub const DEFAULT: PropertyAttributes = PropertyAttributes(0);
    pub const WRITABLE: PropertyAttributes = PropertyAttributes(1);
    pub const ENUMERABLE: PropertyAttributes = PropertyAttributes(1 << 1);
    pub const CONFIGURABLE: PropertyAttributes = PropertyAttributes(1 << 2);
    /// Class member defined on the constructor rather than the prototype.
    pub const STATIC: PropertyAttributes = PropertyAttributes(1 << 10);
    pub const DEFAULT_METHOD: PropertyAttributes =
        PropertyAttributes(Self::WRITABLE.0 | Self::CONFIGURABLE.0);
    pub const DEFAULT_JSPROPERTY: PropertyAttributes =
        PropertyAttributes(Self::WRITABLE.0 | Self::ENUMERABLE.0 | Self::CONFIGURABLE.0);

    pub fn contains(self, other: PropertyAttributes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyAttributes {
    type Output = PropertyAttributes;

    fn bitor(self, rhs: Self) -> Self::Output {
        PropertyAttributes(self.0 | rhs.0)
    }
}

/// Which objects in the prototype chain contribute keys.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeyCollectionMode(pub i32);

impl KeyCollectionMode {
    pub const INCLUDE_PROTOTYPES: KeyCollectionMode = KeyCollectionMode(0);
    pub const OWN_ONLY: KeyCollectionMode = KeyCollectionMode(1);
}

/// Filter bits for key enumeration.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeyFilter(pub u32);

impl KeyFilter {
    pub const ALL_PROPERTIES: KeyFilter = KeyFilter(0);
    pub const WRITABLE: KeyFilter = KeyFilter(1);
    pub const ENUMERABLE: KeyFilter = KeyFilter(1 << 1);
    pub const CONFIGURABLE: KeyFilter = KeyFilter(1 << 2);
    pub const SKIP_STRINGS: KeyFilter = KeyFilter(1 << 3);
    pub const SKIP_SYMBOLS: KeyFilter = KeyFilter(1 << 4);

    pub fn contains(self, other: KeyFilter) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for KeyFilter {
    type Output = KeyFilter;

    fn bitor(self, rhs: Self) -> Self::Output {
        KeyFilter(self.0 | rhs.0)
    }
}

/// How integer-like keys are reported.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeyConversion(pub i32);

impl KeyConversion {
    pub const KEEP_NUMBERS: KeyConversion = KeyConversion(0);
    pub const NUMBERS_TO_STRINGS: KeyConversion = KeyConversion(1);
}

// ============================================================================
// Callbacks and descriptors
// ============================================================================

/// Signature of every native-backed callable.
pub type Callback = unsafe extern "C" fn(env: Env, info: CallbackInfo) -> Value;

/// Signature of finalizers invoked during host garbage collection.
pub type Finalize = unsafe extern "C" fn(env: Env, data: *mut c_void, hint: *mut c_void);

/// Member or export definition. Exactly one of `method`, `getter`/`setter`
/// or `value` is meaningful.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct PropertyDescriptor {
    pub utf8name: *const c_char,
    pub name: Value,
    pub method: Option<Callback>,
    pub getter: Option<Callback>,
    pub setter: Option<Callback>,
    pub value: Value,
    pub attributes: PropertyAttributes,
    pub data: *mut c_void,
}

/// 128-bit tag stamped on wrapped objects.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TypeTag {
    pub lower: u64,
    pub upper: u64,
}

/// Details about the most recent failed host call.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ExtendedErrorInfo {
    pub error_message: *const c_char,
    pub engine_reserved: *mut c_void,
    pub engine_error_code: u32,
    pub error_code: Status,
}

// ============================================================================
// Host function table
// ============================================================================

/// Functions the host exposes to plugins. Passed to the module entry point;
/// valid for the lifetime of the process.
#[repr(C)]
pub struct HostApi {
    pub api_version: u32,
    pub size: usize,

    // Errors and exceptions
    pub get_last_error_info:
        unsafe extern "C" fn(env: Env, result: *mut *const ExtendedErrorInfo) -> Status,
    pub throw: unsafe extern "C" fn(env: Env, error: Value) -> Status,
    pub throw_error:
        unsafe extern "C" fn(env: Env, code: *const c_char, msg: *const c_char) -> Status,
    pub throw_type_error:
        unsafe extern "C" fn(env: Env, code: *const c_char, msg: *const c_char) -> Status,
    pub is_exception_pending: unsafe extern "C" fn(env: Env, result: *mut bool) -> Status,
    pub get_and_clear_last_exception: unsafe extern "C" fn(env: Env, result: *mut Value) -> Status,
    pub fatal_error: unsafe extern "C" fn(
        location: *const c_char,
        location_len: usize,
        message: *const c_char,
        message_len: usize,
    ),

    // Singletons and primitives
    pub get_undefined: unsafe extern "C" fn(env: Env, result: *mut Value) -> Status,
    pub get_null: unsafe extern "C" fn(env: Env, result: *mut Value) -> Status,
    pub get_global: unsafe extern "C" fn(env: Env, result: *mut Value) -> Status,
    pub get_boolean: unsafe extern "C" fn(env: Env, value: bool, result: *mut Value) -> Status,
    pub create_double: unsafe extern "C" fn(env: Env, value: f64, result: *mut Value) -> Status,
    pub create_int64: unsafe extern "C" fn(env: Env, value: i64, result: *mut Value) -> Status,
    pub create_string_utf8: unsafe extern "C" fn(
        env: Env,
        str: *const c_char,
        length: usize,
        result: *mut Value,
    ) -> Status,
    pub create_bigint_words: unsafe extern "C" fn(
        env: Env,
        sign_bit: i32,
        word_count: usize,
        words: *const u64,
        result: *mut Value,
    ) -> Status,
    pub create_object: unsafe extern "C" fn(env: Env, result: *mut Value) -> Status,
    pub create_array_with_length:
        unsafe extern "C" fn(env: Env, length: usize, result: *mut Value) -> Status,

    // Reading values
    pub type_of: unsafe extern "C" fn(env: Env, value: Value, result: *mut ValueType) -> Status,
    pub get_value_bool: unsafe extern "C" fn(env: Env, value: Value, result: *mut bool) -> Status,
    pub get_value_double: unsafe extern "C" fn(env: Env, value: Value, result: *mut f64) -> Status,
    /// With a null `buf`, reports the byte length (excluding NUL) in `result`.
    pub get_value_string_utf8: unsafe extern "C" fn(
        env: Env,
        value: Value,
        buf: *mut c_char,
        bufsize: usize,
        result: *mut usize,
    ) -> Status,
    /// With a null `words`, reports the word count in `word_count`.
    pub get_value_bigint_words: unsafe extern "C" fn(
        env: Env,
        value: Value,
        sign_bit: *mut i32,
        word_count: *mut usize,
        words: *mut u64,
    ) -> Status,
    pub is_array: unsafe extern "C" fn(env: Env, value: Value, result: *mut bool) -> Status,
    pub get_array_length: unsafe extern "C" fn(env: Env, value: Value, result: *mut u32) -> Status,

    // Properties
    pub get_all_property_names: unsafe extern "C" fn(
        env: Env,
        object: Value,
        key_mode: KeyCollectionMode,
        key_filter: KeyFilter,
        key_conversion: KeyConversion,
        result: *mut Value,
    ) -> Status,
    pub set_property:
        unsafe extern "C" fn(env: Env, object: Value, key: Value, value: Value) -> Status,
    pub get_property:
        unsafe extern "C" fn(env: Env, object: Value, key: Value, result: *mut Value) -> Status,
    pub set_named_property: unsafe extern "C" fn(
        env: Env,
        object: Value,
        utf8name: *const c_char,
        value: Value,
    ) -> Status,
    pub set_element:
        unsafe extern "C" fn(env: Env, object: Value, index: u32, value: Value) -> Status,
    pub get_element:
        unsafe extern "C" fn(env: Env, object: Value, index: u32, result: *mut Value) -> Status,
    pub define_properties: unsafe extern "C" fn(
        env: Env,
        object: Value,
        property_count: usize,
        properties: *const PropertyDescriptor,
    ) -> Status,

    // Functions and classes
    pub get_cb_info: unsafe extern "C" fn(
        env: Env,
        info: CallbackInfo,
        argc: *mut usize,
        argv: *mut Value,
        this_arg: *mut Value,
        data: *mut *mut c_void,
    ) -> Status,
    pub call_function: unsafe extern "C" fn(
        env: Env,
        recv: Value,
        func: Value,
        argc: usize,
        argv: *const Value,
        result: *mut Value,
    ) -> Status,
    pub create_function: unsafe extern "C" fn(
        env: Env,
        utf8name: *const c_char,
        length: usize,
        cb: Callback,
        data: *mut c_void,
        result: *mut Value,
    ) -> Status,
    pub define_class: unsafe extern "C" fn(
        env: Env,
        utf8name: *const c_char,
        length: usize,
        constructor: Callback,
        data: *mut c_void,
        property_count: usize,
        properties: *const PropertyDescriptor,
        result: *mut Value,
    ) -> Status,
    pub new_instance: unsafe extern "C" fn(
        env: Env,
        constructor: Value,
        argc: usize,
        argv: *const Value,
        result: *mut Value,
    ) -> Status,

    // Object wrap
    pub wrap: unsafe extern "C" fn(
        env: Env,
        js_object: Value,
        native_object: *mut c_void,
        finalize_cb: Option<Finalize>,
        finalize_hint: *mut c_void,
        result: *mut Ref,
    ) -> Status,
    pub unwrap: unsafe extern "C" fn(env: Env, js_object: Value, result: *mut *mut c_void) -> Status,
    pub type_tag_object:
        unsafe extern "C" fn(env: Env, object: Value, type_tag: *const TypeTag) -> Status,
    pub check_object_type_tag: unsafe extern "C" fn(
        env: Env,
        object: Value,
        type_tag: *const TypeTag,
        result: *mut bool,
    ) -> Status,

    // Lifetime management
    pub create_reference: unsafe extern "C" fn(
        env: Env,
        value: Value,
        initial_refcount: u32,
        result: *mut Ref,
    ) -> Status,
    pub delete_reference: unsafe extern "C" fn(env: Env, reference: Ref) -> Status,
    pub reference_ref: unsafe extern "C" fn(env: Env, reference: Ref, result: *mut u32) -> Status,
    pub reference_unref: unsafe extern "C" fn(env: Env, reference: Ref, result: *mut u32) -> Status,
    pub get_reference_value:
        unsafe extern "C" fn(env: Env, reference: Ref, result: *mut Value) -> Status,

    // Module instance data
    pub set_instance_data: unsafe extern "C" fn(
        env: Env,
        data: *mut c_void,
        finalize_cb: Option<Finalize>,
        finalize_hint: *mut c_void,
    ) -> Status,
    pub get_instance_data: unsafe extern "C" fn(env: Env, data: *mut *mut c_void) -> Status,
}

/// Plugin entry point: receives the host table, an environment and the
/// exports object; returns the exports (or null with an exception pending).
pub type ModuleInit =
    unsafe extern "C" fn(api: *const HostApi, env: Env, exports: Value) -> Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_method_attributes() {
        let attrs = PropertyAttributes::DEFAULT_METHOD;
        assert!(attrs.contains(PropertyAttributes::WRITABLE));
        assert!(attrs.contains(PropertyAttributes::CONFIGURABLE));
        assert!(!attrs.contains(PropertyAttributes::ENUMERABLE));
        assert!((attrs | PropertyAttributes::STATIC).contains(PropertyAttributes::STATIC));
    }

    #[test]
    fn status_messages() {
        assert_eq!(Status::STRING_EXPECTED.message(), "A string was expected");
        assert!(Status::OK.is_ok());
        assert!(!Status::PENDING_EXCEPTION.is_ok());
    }

    #[test]
    fn status_names() {
        assert_eq!(Status::STRING_EXPECTED.name(), "string_expected");
        assert_eq!(Status::ARRAY_EXPECTED.name(), "array_expected");
        assert_eq!(Status::OK.name(), "ok");
    }
}
