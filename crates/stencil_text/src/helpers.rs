//! Bundled helper functions, installed on request.

use crate::print::to_text;
use indexmap::IndexMap;
use stencil_bridge::{NativeKey, NativeValue};
use stencil_template::{FuncError, NativeFunc};
use std::sync::Arc;

type HelperResult = Result<NativeValue, FuncError>;

/// The hermetic set never reads the process environment.
pub fn helper_funcs(hermetic: bool) -> Vec<(String, NativeFunc)> {
    let mut funcs: Vec<(&str, NativeFunc)> = vec![
        ("dict", Arc::new(dict) as NativeFunc),
        ("list", Arc::new(list) as NativeFunc),
        ("lower", Arc::new(lower) as NativeFunc),
        ("upper", Arc::new(upper) as NativeFunc),
    ];
    if !hermetic {
        funcs.push(("env", Arc::new(env) as NativeFunc));
    }
    funcs
        .into_iter()
        .map(|(name, func)| (name.to_string(), func))
        .collect()
}

fn arity(name: &str, args: &[NativeValue], want: usize) -> Result<(), FuncError> {
    if args.len() != want {
        return Err(format!(
            "wrong number of args for {name}: want {want} got {}",
            args.len()
        )
        .into());
    }
    Ok(())
}

/// Alternating keys and values; a trailing key maps to the empty string.
fn dict(args: &[NativeValue]) -> HelperResult {
    let mut map = IndexMap::with_capacity(args.len() / 2);
    for pair in args.chunks(2) {
        let key = match &pair[0] {
            NativeValue::String(key) => key.clone(),
            other => to_text(other),
        };
        let value = pair
            .get(1)
            .cloned()
            .unwrap_or_else(|| NativeValue::String(String::new()));
        map.insert(NativeKey::String(key), value);
    }
    Ok(NativeValue::Map(map))
}

fn list(args: &[NativeValue]) -> HelperResult {
    Ok(NativeValue::Seq(args.to_vec()))
}

fn lower(args: &[NativeValue]) -> HelperResult {
    arity("lower", args, 1)?;
    Ok(NativeValue::String(to_text(&args[0]).to_lowercase()))
}

fn upper(args: &[NativeValue]) -> HelperResult {
    arity("upper", args, 1)?;
    Ok(NativeValue::String(to_text(&args[0]).to_uppercase()))
}

fn env(args: &[NativeValue]) -> HelperResult {
    arity("env", args, 1)?;
    Ok(NativeValue::String(
        std::env::var(to_text(&args[0])).unwrap_or_default(),
    ))
}
