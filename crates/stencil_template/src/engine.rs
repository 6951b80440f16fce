//! Contract the wrapped templating library satisfies.
//!
//! A template value is a cheap handle: `Clone` shares the same underlying
//! template (and its namespace), like a pointer. Mutating operations take
//! `&self`.

use stencil_bridge::NativeValue;
use std::sync::Arc;

/// Failure raised by a registered function while a template executes.
pub type FuncError = Box<dyn std::error::Error + Send + Sync>;

/// A function callable from template actions.
pub type NativeFunc = Arc<dyn Fn(&[NativeValue]) -> Result<NativeValue, FuncError> + Send + Sync>;

pub trait TemplateEngine: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fresh template with its own namespace.
    fn new(name: &str) -> Self;

    fn name(&self) -> String;

    fn parse(&self, text: &str) -> Result<(), Self::Error>;

    /// New template named `name` in this template's namespace.
    fn new_template(&self, name: &str) -> Self;

    /// Deep copy: an independent namespace with the same definitions and
    /// function table.
    fn deep_clone(&self) -> Result<Self, Self::Error>;

    fn lookup(&self, name: &str) -> Option<Self>;

    /// Every defined template of the namespace.
    fn templates(&self) -> Vec<Self>;

    /// `"; defined templates are: ..."`, or empty when none are defined.
    fn defined_templates(&self) -> String;

    fn delims(&self, left: &str, right: &str);

    /// Register functions, replacing same-named ones.
    ///
    /// # Panics
    /// If a name is not a valid identifier.
    fn funcs(&self, funcs: Vec<(String, NativeFunc)>);

    /// # Panics
    /// On an unrecognized option.
    fn option(&self, options: &[String]);

    fn execute(&self, data: &NativeValue) -> Result<String, Self::Error>;

    fn execute_template(&self, name: &str, data: &NativeValue) -> Result<String, Self::Error>;

    fn parse_files(&self, files: &[String]) -> Result<(), Self::Error>;

    fn parse_glob(&self, pattern: &str) -> Result<(), Self::Error>;

    /// New template named after the first file, holding every file.
    fn parse_files_new(files: &[String]) -> Result<Self, Self::Error>;

    /// New template named after the first match, holding every match.
    fn parse_glob_new(pattern: &str) -> Result<Self, Self::Error>;

    /// The library's bundled helper functions. The hermetic set leaves out
    /// anything that reads the environment or the clock.
    fn helper_funcs(hermetic: bool) -> Vec<(String, NativeFunc)>;

    fn html_escape(text: &str) -> String;

    fn js_escape(text: &str) -> String;

    fn url_query_escape(text: &str) -> String;

    /// Format escaper arguments the way actions print them.
    fn sprint(args: &[NativeValue]) -> String;
}
