//! Module-level escaping functions.

use crate::engine::TemplateEngine;
use stencil_bridge::convert::to_native_all;
use stencil_bridge::module::PropertyDef;
use stencil_bridge::Result;

pub(crate) fn functions<E: TemplateEngine>() -> Result<Vec<PropertyDef>> {
    Ok(vec![
        PropertyDef::function("htmlEscapeString", |args| {
            let env = args.env();
            env.create_string(&E::html_escape(&args.string(0)?))
        })?,
        PropertyDef::function("htmlEscaper", |args| {
            let env = args.env();
            let values = to_native_all(env, args.all())?;
            env.create_string(&E::html_escape(&E::sprint(&values)))
        })?,
        PropertyDef::function("jsEscapeString", |args| {
            let env = args.env();
            env.create_string(&E::js_escape(&args.string(0)?))
        })?,
        PropertyDef::function("jsEscaper", |args| {
            let env = args.env();
            let values = to_native_all(env, args.all())?;
            env.create_string(&E::js_escape(&E::sprint(&values)))
        })?,
        PropertyDef::function("urlQueryEscaper", |args| {
            let env = args.env();
            let values = to_native_all(env, args.all())?;
            env.create_string(&E::url_query_escape(&E::sprint(&values)))
        })?,
    ])
}
