//! How values print inside templates and escapers.
//!
//! - nil prints as `<no value>` at the top level of an action and as
//!   `<nil>` inside composites
//! - integral floats print without a fraction; exponents appear below
//!   `1e-4` and from `1e21` on
//! - sequences print as `[a b]`, maps as `map[k:v]` sorted by key

use stencil_bridge::{NativeKey, NativeValue};
use std::fmt::Write;

/// Output of `{{ value }}`.
pub fn print_action(value: &NativeValue) -> String {
    match value {
        NativeValue::Nil => "<no value>".to_string(),
        other => to_text(other),
    }
}

pub fn to_text(value: &NativeValue) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Concatenate operands, adding a space between two operands when neither
/// is a string.
pub fn sprint(values: &[NativeValue]) -> String {
    let mut out = String::new();
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            let prev_is_string = matches!(values[index - 1], NativeValue::String(_));
            let is_string = matches!(value, NativeValue::String(_));
            if !prev_is_string && !is_string {
                out.push(' ');
            }
        }
        write_value(&mut out, value);
    }
    out
}

fn write_value(out: &mut String, value: &NativeValue) {
    match value {
        NativeValue::Nil => out.push_str("<nil>"),
        NativeValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        NativeValue::Int(i) => {
            let _ = write!(out, "{i}");
        }
        NativeValue::Uint(u) => {
            let _ = write!(out, "{u}");
        }
        NativeValue::Float(f) => out.push_str(&format_float(*f)),
        NativeValue::String(s) => out.push_str(s),
        NativeValue::BigInt(big) => {
            let _ = write!(out, "{big}");
        }
        NativeValue::Seq(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(' ');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        NativeValue::Map(entries) => {
            let mut sorted: Vec<(&NativeKey, &NativeValue)> = entries.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            out.push_str("map[");
            for (index, (key, item)) in sorted.into_iter().enumerate() {
                if index > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{key}:");
                write_value(out, item);
            }
            out.push(']');
        }
        NativeValue::Complex { re, im } => {
            let sign = if *im >= 0.0 || im.is_nan() { "+" } else { "" };
            let _ = write!(out, "({}{sign}{}i)", format_float(*re), format_float(*im));
        }
        NativeValue::Opaque(name) => {
            let _ = write!(out, "<{name}>");
        }
    }
}

pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => return format!("{value}"),
    };
    if (-4..21).contains(&exponent) {
        format!("{value}")
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_bridge::num_bigint::BigInt;

    #[test]
    fn nil_prints_differently_at_top_level() {
        assert_eq!(print_action(&NativeValue::Nil), "<no value>");
        assert_eq!(
            print_action(&NativeValue::Seq(vec![NativeValue::Nil])),
            "[<nil>]"
        );
    }

    #[test]
    fn floats() {
        assert_eq!(format_float(123.0), "123");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(1e20), "100000000000000000000");
        assert_eq!(format_float(1e21), "1e+21");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(0.00001), "1e-05");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn composites() {
        let map = NativeValue::map([
            ("b", NativeValue::from("x")),
            ("a", NativeValue::Float(42.0)),
        ]);
        assert_eq!(to_text(&map), "map[a:42 b:x]");
        let seq = NativeValue::Seq(vec!["foo".into(), "bar".into()]);
        assert_eq!(to_text(&seq), "[foo bar]");
        assert_eq!(
            to_text(&NativeValue::Complex { re: 1.0, im: -2.0 }),
            "(1-2i)"
        );
    }

    #[test]
    fn bigints_print_in_decimal() {
        let big = (BigInt::from(1) << 128) + 2;
        assert_eq!(
            to_text(&NativeValue::BigInt(big)),
            "340282366920938463463374607431768211458"
        );
    }

    #[test]
    fn sprint_spacing() {
        assert_eq!(sprint(&["foo".into(), "<bar>".into()]), "foo<bar>");
        assert_eq!(sprint(&[NativeValue::Int(1), NativeValue::Int(2)]), "1 2");
        assert_eq!(sprint(&[NativeValue::Int(1), "x".into()]), "1x");
    }
}
