//! Value conversion engine
//!
//! Recursive conversion between host values and [`NativeValue`]. Both
//! directions fail with an explicit error on anything outside their
//! supported set; nothing is coerced or truncated silently.
//!
//! | host            | native                         |
//! |-----------------|--------------------------------|
//! | undefined, null | `Nil`                          |
//! | boolean         | `Bool`                         |
//! | number          | `Float`                        |
//! | string          | `String`                       |
//! | array           | `Seq`                          |
//! | plain object    | `Map` with `NativeKey::String` |
//! | bigint          | `BigInt`                       |

use crate::env::{Env, Value};
use crate::error::{BridgeError, Result};
use indexmap::IndexMap;
use num_bigint::{BigInt, Sign};
use stencil_abi::{KeyCollectionMode, KeyConversion, KeyFilter, ValueType};
use std::fmt;

/// Deepest nesting accepted in either direction. Cyclic host objects hit
/// this instead of overflowing the stack.
pub const MAX_DEPTH: usize = 256;

/// Largest magnitude a host number represents exactly.
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Structured value on the native side of the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    BigInt(BigInt),
    Seq(Vec<NativeValue>),
    Map(IndexMap<NativeKey, NativeValue>),
    Complex { re: f64, im: f64 },
    /// A native value with no host representation, named by its type.
    Opaque(String),
}

/// Map key on the native side. Only `String` keys can reach the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NativeKey {
    String(String),
    Int(i64),
    Bool(bool),
}

impl NativeKey {
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeKey::String(_) => "string",
            NativeKey::Int(_) => "i64",
            NativeKey::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for NativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeKey::String(s) => f.write_str(s),
            NativeKey::Int(i) => write!(f, "{i}"),
            NativeKey::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for NativeKey {
    fn from(value: &str) -> Self {
        NativeKey::String(value.to_string())
    }
}

impl NativeValue {
    pub fn type_name(&self) -> &str {
        match self {
            NativeValue::Nil => "nil",
            NativeValue::Bool(_) => "bool",
            NativeValue::Int(_) => "i64",
            NativeValue::Uint(_) => "u64",
            NativeValue::Float(_) => "f64",
            NativeValue::String(_) => "string",
            NativeValue::BigInt(_) => "bigint",
            NativeValue::Seq(_) => "sequence",
            NativeValue::Map(_) => "map",
            NativeValue::Complex { .. } => "complex128",
            NativeValue::Opaque(name) => name,
        }
    }

    /// Build a string-keyed map.
    pub fn map<K, I>(entries: I) -> NativeValue
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, NativeValue)>,
    {
        NativeValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (NativeKey::String(k.into()), v))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, NativeValue::Nil)
    }
}

impl From<bool> for NativeValue {
    fn from(value: bool) -> Self {
        NativeValue::Bool(value)
    }
}

impl From<f64> for NativeValue {
    fn from(value: f64) -> Self {
        NativeValue::Float(value)
    }
}

impl From<i64> for NativeValue {
    fn from(value: i64) -> Self {
        NativeValue::Int(value)
    }
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        NativeValue::String(value.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(value: String) -> Self {
        NativeValue::String(value)
    }
}

impl From<BigInt> for NativeValue {
    fn from(value: BigInt) -> Self {
        NativeValue::BigInt(value)
    }
}

impl From<Vec<NativeValue>> for NativeValue {
    fn from(value: Vec<NativeValue>) -> Self {
        NativeValue::Seq(value)
    }
}

// ============================================================================
// Host -> native
// ============================================================================

pub fn to_native(env: Env, value: Value) -> Result<NativeValue> {
    to_native_at(env, value, 0)
}

/// Convert every value of an argument list.
pub fn to_native_all(env: Env, values: &[Value]) -> Result<Vec<NativeValue>> {
    values.iter().map(|v| to_native(env, *v)).collect()
}

fn to_native_at(env: Env, value: Value, depth: usize) -> Result<NativeValue> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::Unsupported(format!(
            "value nesting exceeds {MAX_DEPTH} levels"
        )));
    }

    match env.type_of(value)? {
        ValueType::UNDEFINED | ValueType::NULL => Ok(NativeValue::Nil),
        ValueType::BOOLEAN => Ok(NativeValue::Bool(env.get_value_bool(value)?)),
        ValueType::NUMBER => Ok(NativeValue::Float(env.get_value_double(value)?)),
        ValueType::STRING => Ok(NativeValue::String(env.get_value_string(value)?)),
        ValueType::OBJECT if env.is_array(value)? => array_to_native(env, value, depth),
        ValueType::OBJECT => object_to_native(env, value, depth),
        ValueType::BIGINT => bigint_to_native(env, value).map(NativeValue::BigInt),
        other => Err(BridgeError::Unsupported(format!(
            "Unsupported value type: {}",
            other.name()
        ))),
    }
}

fn array_to_native(env: Env, array: Value, depth: usize) -> Result<NativeValue> {
    let length = env.get_array_length(array)?;
    let mut items = Vec::with_capacity(length as usize);
    for index in 0..length {
        let element = env.get_element(array, index)?;
        items.push(to_native_at(env, element, depth + 1)?);
    }
    Ok(NativeValue::Seq(items))
}

fn object_to_native(env: Env, object: Value, depth: usize) -> Result<NativeValue> {
    let keys = env.get_all_property_names(
        object,
        KeyCollectionMode::OWN_ONLY,
        KeyFilter::ENUMERABLE | KeyFilter::SKIP_SYMBOLS,
        KeyConversion::NUMBERS_TO_STRINGS,
    )?;
    let length = env.get_array_length(keys)?;
    let mut entries = IndexMap::with_capacity(length as usize);
    for index in 0..length {
        let key = env.get_element(keys, index)?;
        let name = env.get_value_string(key)?;
        let element = env.get_property(object, key)?;
        entries.insert(
            NativeKey::String(name),
            to_native_at(env, element, depth + 1)?,
        );
    }
    Ok(NativeValue::Map(entries))
}

/// Little-endian words are laid out most-significant first as big-endian
/// bytes, then read as a sign-magnitude integer.
fn bigint_to_native(env: Env, value: Value) -> Result<BigInt> {
    let (negative, words) = env.get_value_bigint_words(value)?;
    Ok(bigint_from_words(negative, &words))
}

pub fn bigint_from_words(negative: bool, words: &[u64]) -> BigInt {
    let mut bytes = Vec::with_capacity(words.len() * 8);
    for word in words.iter().rev() {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    BigInt::from_bytes_be(sign, &bytes)
}

// ============================================================================
// Native -> host
// ============================================================================

pub fn to_host(env: Env, value: &NativeValue) -> Result<Value> {
    to_host_at(env, value, 0)
}

fn to_host_at(env: Env, value: &NativeValue, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::Unsupported(format!(
            "value nesting exceeds {MAX_DEPTH} levels"
        )));
    }

    match value {
        NativeValue::Nil => env.get_null(),
        NativeValue::Bool(b) => env.get_boolean(*b),
        NativeValue::Int(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER => env.create_int64(*i),
        NativeValue::Int(i) => bigint_to_host(env, &BigInt::from(*i)),
        NativeValue::Uint(u) if *u <= MAX_SAFE_INTEGER => env.create_int64(*u as i64),
        NativeValue::Uint(u) => bigint_to_host(env, &BigInt::from(*u)),
        NativeValue::Float(f) => env.create_double(*f),
        NativeValue::String(s) => env.create_string(s),
        NativeValue::BigInt(big) => bigint_to_host(env, big),
        NativeValue::Seq(items) => {
            let array = env.create_array_with_length(items.len())?;
            for (index, item) in items.iter().enumerate() {
                let element = to_host_at(env, item, depth + 1)?;
                env.set_element(array, index as u32, element)?;
            }
            Ok(array)
        }
        NativeValue::Map(entries) => {
            let object = env.create_object()?;
            for (key, item) in entries {
                let NativeKey::String(name) = key else {
                    return Err(BridgeError::Unsupported(format!(
                        "can't convert native map key of type {}",
                        key.type_name()
                    )));
                };
                let key = env.create_string(name)?;
                let element = to_host_at(env, item, depth + 1)?;
                env.set_property(object, key, element)?;
            }
            Ok(object)
        }
        NativeValue::Complex { .. } | NativeValue::Opaque(_) => Err(BridgeError::Unsupported(
            format!("can't convert native value of type {}", value.type_name()),
        )),
    }
}

fn bigint_to_host(env: Env, value: &BigInt) -> Result<Value> {
    let (sign, words) = value.to_u64_digits();
    env.create_bigint_words(sign == Sign::Minus, &words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_bigint_sign() {
        assert_eq!(bigint_from_words(true, &[0x1]), BigInt::from(-1));
        assert_eq!(bigint_from_words(false, &[0x1]), BigInt::from(1));
    }

    #[test]
    fn multi_word_bigint_is_little_endian() {
        // (1 << 128) + 2
        let expected = (BigInt::from(1) << 128) + 2;
        assert_eq!(bigint_from_words(false, &[2, 0, 1]), expected);
        assert_eq!(bigint_from_words(true, &[2, 0, 1]), -expected);
    }

    #[test]
    fn zero_words_is_zero() {
        assert_eq!(bigint_from_words(true, &[]), BigInt::from(0));
    }

    #[test]
    fn type_names() {
        assert_eq!(NativeValue::Complex { re: 1.0, im: 0.0 }.type_name(), "complex128");
        assert_eq!(NativeValue::Opaque("chan int".into()).type_name(), "chan int");
        assert_eq!(NativeKey::Int(3).type_name(), "i64");
    }
}
