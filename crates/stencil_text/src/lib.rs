//! Stencil Text
//!
//! A compact text-templating engine implementing
//! [`stencil_template::TemplateEngine`].
//!
//! ## Architecture
//!
//! - **parse:** delimiters and comments; actions to trees
//! - **exec:** walks a tree against a [`NativeValue`]
//! - **print:** how values render in output
//! - **helpers:** opt-in bundled functions
//! - **escape:** HTML, JavaScript and URL query escaping
//!
//! Templates created from one another share a namespace: their definitions,
//! function table, delimiters and options. [`TextTemplate`] is a handle onto
//! one name in a namespace.
//!
//! ```ignore
//! let t = TextTemplate::new("page");
//! t.parse(r#"{{define "title"}}Hi{{end}}<h1>{{template "title"}}</h1>"#)?;
//! assert_eq!(t.execute(&NativeValue::Nil)?, "<h1>Hi</h1>");
//! ```

mod error;
mod escape;
mod exec;
mod files;
mod helpers;
mod parse;
mod print;

pub use error::{EngineError, EngineResult};
pub use escape::{html_escape, js_escape, url_query_escape};
pub use print::{format_float, print_action, sprint};

use exec::Snapshot;
use indexmap::IndexMap;
use parking_lot::Mutex;
use parse::Tree;
use stencil_bridge::NativeValue;
use stencil_template::{NativeFunc, TemplateEngine};
use std::fmt;
use std::sync::Arc;

const DEFAULT_LEFT: &str = "{{";
const DEFAULT_RIGHT: &str = "}}";

/// What a field lookup yields when a map lacks the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKey {
    /// Nil, printed as `<no value>`.
    #[default]
    Default,
    /// The zero value; for dynamically typed maps this is also nil.
    Zero,
    Error,
}

struct Namespace {
    trees: IndexMap<String, Arc<Tree>>,
    funcs: IndexMap<String, NativeFunc>,
    left: String,
    right: String,
    missing_key: MissingKey,
}

impl Namespace {
    fn new() -> Self {
        Self {
            trees: IndexMap::new(),
            funcs: IndexMap::new(),
            left: DEFAULT_LEFT.to_string(),
            right: DEFAULT_RIGHT.to_string(),
            missing_key: MissingKey::Default,
        }
    }

    /// Install `tree`, unless it is empty and a definition already exists.
    fn associate(&mut self, tree: Tree) {
        if tree.is_empty() && self.trees.contains_key(&tree.name) {
            return;
        }
        self.trees.insert(tree.name.clone(), Arc::new(tree));
    }
}

#[derive(Clone)]
pub struct TextTemplate {
    name: String,
    ns: Arc<Mutex<Namespace>>,
}

impl fmt::Debug for TextTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextTemplate")
            .field("name", &self.name)
            .field("defined", &self.ns.lock().trees.len())
            .finish()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

impl TextTemplate {
    fn snapshot(&self) -> Snapshot {
        let ns = self.ns.lock();
        Snapshot {
            trees: ns.trees.clone(),
            funcs: ns.funcs.clone(),
            missing_key: ns.missing_key,
        }
    }

    fn tree(&self, name: &str) -> Option<Arc<Tree>> {
        self.ns.lock().trees.get(name).cloned()
    }

    fn parse_sources(&self, files: Vec<files::SourceFile>) -> EngineResult<()> {
        for file in files {
            let target = if file.name == self.name {
                self.clone()
            } else {
                self.new_template(&file.name)
            };
            target.parse(&file.text)?;
        }
        Ok(())
    }

    pub fn missing_key(&self) -> MissingKey {
        self.ns.lock().missing_key
    }
}

impl TemplateEngine for TextTemplate {
    type Error = EngineError;

    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ns: Arc::new(Mutex::new(Namespace::new())),
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn parse(&self, text: &str) -> EngineResult<()> {
        let (left, right, funcs) = {
            let ns = self.ns.lock();
            let funcs: Vec<String> = ns.funcs.keys().cloned().collect();
            (ns.left.clone(), ns.right.clone(), funcs)
        };
        let is_function = |name: &str| funcs.iter().any(|f| f == name);
        let trees = parse::parse(&self.name, text, &left, &right, &is_function)?;
        tracing::trace!(template = %self.name, trees = trees.len(), "parsed template");

        let mut ns = self.ns.lock();
        for tree in trees {
            ns.associate(tree);
        }
        Ok(())
    }

    fn new_template(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ns: Arc::clone(&self.ns),
        }
    }

    fn deep_clone(&self) -> EngineResult<Self> {
        let ns = self.ns.lock();
        let copy = Namespace {
            trees: ns.trees.clone(),
            funcs: ns.funcs.clone(),
            left: ns.left.clone(),
            right: ns.right.clone(),
            missing_key: ns.missing_key,
        };
        Ok(Self {
            name: self.name.clone(),
            ns: Arc::new(Mutex::new(copy)),
        })
    }

    fn lookup(&self, name: &str) -> Option<Self> {
        self.tree(name).map(|_| self.new_template(name))
    }

    fn templates(&self) -> Vec<Self> {
        let names: Vec<String> = self.ns.lock().trees.keys().cloned().collect();
        names.iter().map(|name| self.new_template(name)).collect()
    }

    fn defined_templates(&self) -> String {
        let ns = self.ns.lock();
        if ns.trees.is_empty() {
            return String::new();
        }
        let names: Vec<String> = ns.trees.keys().map(|name| format!("{name:?}")).collect();
        format!("; defined templates are: {}", names.join(", "))
    }

    fn delims(&self, left: &str, right: &str) {
        let mut ns = self.ns.lock();
        ns.left = if left.is_empty() { DEFAULT_LEFT } else { left }.to_string();
        ns.right = if right.is_empty() { DEFAULT_RIGHT } else { right }.to_string();
    }

    fn funcs(&self, funcs: Vec<(String, NativeFunc)>) {
        if let Some((name, _)) = funcs.iter().find(|(name, _)| !is_identifier(name)) {
            panic!("function name {name:?} is not a valid identifier");
        }
        let mut ns = self.ns.lock();
        for (name, func) in funcs {
            ns.funcs.insert(name, func);
        }
    }

    fn option(&self, options: &[String]) {
        for option in options {
            if option.is_empty() {
                panic!("empty option string");
            }
            let missing_key = match option.split_once('=') {
                Some(("missingkey", "default" | "invalid")) => MissingKey::Default,
                Some(("missingkey", "zero")) => MissingKey::Zero,
                Some(("missingkey", "error")) => MissingKey::Error,
                _ => panic!("unrecognized option: {option}"),
            };
            self.ns.lock().missing_key = missing_key;
        }
    }

    fn execute(&self, data: &NativeValue) -> EngineResult<String> {
        let snapshot = self.snapshot();
        match snapshot.trees.get(&self.name) {
            Some(tree) if !tree.is_empty() => exec::execute(&snapshot, tree, data),
            _ => Err(EngineError::Incomplete {
                name: self.name.clone(),
            }),
        }
    }

    fn execute_template(&self, name: &str, data: &NativeValue) -> EngineResult<String> {
        match self.lookup(name) {
            Some(template) => template.execute(data),
            None => Err(EngineError::NoTemplate {
                name: name.to_string(),
                parent: self.name.clone(),
            }),
        }
    }

    fn parse_files(&self, files: &[String]) -> EngineResult<()> {
        self.parse_sources(files::read_files(files)?)
    }

    fn parse_glob(&self, pattern: &str) -> EngineResult<()> {
        self.parse_files(&files::glob(pattern)?)
    }

    fn parse_files_new(files: &[String]) -> EngineResult<Self> {
        let sources = files::read_files(files)?;
        let template = Self::new(&sources[0].name);
        template.parse_sources(sources)?;
        Ok(template)
    }

    fn parse_glob_new(pattern: &str) -> EngineResult<Self> {
        Self::parse_files_new(&files::glob(pattern)?)
    }

    fn helper_funcs(hermetic: bool) -> Vec<(String, NativeFunc)> {
        helpers::helper_funcs(hermetic)
    }

    fn html_escape(text: &str) -> String {
        escape::html_escape(text)
    }

    fn js_escape(text: &str) -> String {
        escape::js_escape(text)
    }

    fn url_query_escape(text: &str) -> String {
        escape::url_query_escape(text)
    }

    fn sprint(args: &[NativeValue]) -> String {
        print::sprint(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_template::FuncError;

    fn run(text: &str, data: NativeValue) -> EngineResult<String> {
        let t = TextTemplate::new("t");
        t.parse(text)?;
        t.execute(&data)
    }

    fn func<F>(f: F) -> NativeFunc
    where
        F: Fn(&[NativeValue]) -> Result<NativeValue, FuncError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    #[test]
    fn fields_and_text() {
        let data = NativeValue::map([("foo", NativeValue::from("hello")), ("bar", NativeValue::from("world"))]);
        assert_eq!(run("{{ .foo }}, {{ .bar }}", data).unwrap(), "hello, world");
    }

    #[test]
    fn missing_keys_follow_the_option() {
        let t = TextTemplate::new("test_template");
        t.parse("{{ .param }}").unwrap();
        let empty = NativeValue::map(Vec::<(String, NativeValue)>::new());
        assert_eq!(t.execute(&empty).unwrap(), "<no value>");

        t.option(&["missingkey=error".to_string()]);
        assert_eq!(
            t.execute(&empty).unwrap_err().to_string(),
            "template: test_template:1:3: executing \"test_template\" at <.param>: map has no entry for key \"param\""
        );
    }

    #[test]
    #[should_panic(expected = "unrecognized option: invalidArg")]
    fn bad_option_panics() {
        TextTemplate::new("t").option(&["invalidArg".to_string()]);
    }

    #[test]
    #[should_panic(expected = "function name \"\" is not a valid identifier")]
    fn bad_function_name_panics() {
        TextTemplate::new("t").funcs(vec![(String::new(), func(|_| Ok(NativeValue::Nil)))]);
    }

    #[test]
    fn rejected_batch_registers_nothing() {
        let t = TextTemplate::new("t");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            t.funcs(vec![
                ("good".to_string(), func(|_| Ok(NativeValue::Nil))),
                ("1bad".to_string(), func(|_| Ok(NativeValue::Nil))),
            ])
        }));
        assert!(result.is_err());
        assert!(t.parse("{{ good }}").is_err());
    }

    #[test]
    fn registered_functions_receive_arguments() {
        let t = TextTemplate::new("t");
        t.funcs(vec![(
            "wrap".to_string(),
            func(|args| Ok(NativeValue::String(format!("pre-{}-post", sprint(args))))),
        )]);
        t.parse(r#"{{ wrap "hello" }} {{ "x" | wrap }}"#).unwrap();
        assert_eq!(t.execute(&NativeValue::Nil).unwrap(), "pre-hello-post pre-x-post");
    }

    #[test]
    fn function_errors_name_the_call() {
        let t = TextTemplate::new("t");
        t.funcs(vec![("fail".to_string(), func(|_| Err("boom".into())))]);
        t.parse("{{ fail }}").unwrap();
        let err = t.execute(&NativeValue::Nil).unwrap_err().to_string();
        assert!(err.ends_with("error calling fail: boom"), "{err}");
    }

    #[test]
    fn defines_and_template_calls() {
        let t = TextTemplate::new("outer");
        t.parse(r#"{{ define "inner" }}inner {{ .param }}{{ end }}[{{ template "inner" . }}]"#)
            .unwrap();
        let data = NativeValue::map([("param", NativeValue::from("p"))]);
        assert_eq!(t.execute_template("inner", &data).unwrap(), "inner p");
        assert_eq!(t.execute(&data).unwrap(), "[inner p]");
    }

    #[test]
    fn defined_templates_lists_names() {
        let t = TextTemplate::new("test_template");
        assert_eq!(t.defined_templates(), "");
        t.parse(r#"{{define "foo"}}{{ end }}"#).unwrap();
        assert_eq!(
            t.defined_templates(),
            r#"; defined templates are: "foo", "test_template""#
        );
    }

    #[test]
    fn empty_root_is_incomplete() {
        let t = TextTemplate::new("t");
        let err = t.execute(&NativeValue::Nil).unwrap_err();
        assert_eq!(
            err.to_string(),
            "template: t: \"t\" is an incomplete or empty template"
        );
    }

    #[test]
    fn empty_redefinition_keeps_the_old_tree() {
        let t = TextTemplate::new("t");
        t.parse("body").unwrap();
        t.parse(r#"{{define "x"}}x{{end}}"#).unwrap();
        assert_eq!(t.execute(&NativeValue::Nil).unwrap(), "body");
    }

    #[test]
    fn unknown_template_name() {
        let err = TextTemplate::new("t")
            .execute_template("invalid", &NativeValue::Nil)
            .unwrap_err();
        assert!(err.to_string().contains("no template \"invalid\""));
    }

    #[test]
    fn delimiters_are_configurable() {
        let t = TextTemplate::new("t");
        t.delims("<<", ">>");
        t.parse("<< . >>").unwrap();
        assert_eq!(t.execute(&"hello".into()).unwrap(), "hello");
    }

    #[test]
    fn namespace_is_shared_but_clones_are_not() {
        let t = TextTemplate::new("root");
        let inner = t.new_template("inner");
        inner.parse("new {{ .param }}").unwrap();
        assert_eq!(t.templates().len(), 1);
        assert_eq!(t.lookup("inner").map(|i| i.name()), Some("inner".into()));
        assert!(t.lookup("root").is_none());

        let copy = t.deep_clone().unwrap();
        copy.new_template("other").parse("o").unwrap();
        assert!(t.lookup("other").is_none());
        assert!(copy.lookup("inner").is_some());
    }

    #[test]
    fn printing_rules() {
        assert_eq!(run("{{ . }}", NativeValue::Nil).unwrap(), "<no value>");
        assert_eq!(run("{{ . }}", NativeValue::Float(123.0)).unwrap(), "123");
        assert_eq!(
            run("{{ . }}", NativeValue::map([("foo", NativeValue::from("bar"))])).unwrap(),
            "map[foo:bar]"
        );
        assert_eq!(
            run("{{ . }}", NativeValue::Seq(vec!["foo".into(), "bar".into()])).unwrap(),
            "[foo bar]"
        );
        let nested = NativeValue::map([("a", NativeValue::map([("b", NativeValue::Int(7))]))]);
        assert_eq!(run("{{ .a.b }}", nested).unwrap(), "7");
    }

    #[test]
    fn helpers_are_opt_in() {
        let t = TextTemplate::new("t");
        assert!(t.parse(r#"{{ dict "a" 42 }}"#).is_err());
        t.funcs(TextTemplate::helper_funcs(true));
        t.parse(r#"{{ dict "a" 42 }}"#).unwrap();
        assert_eq!(t.execute(&NativeValue::Nil).unwrap(), "map[a:42]");
        let err = t.parse("{{ env \"HOME\" }}").unwrap_err();
        assert_eq!(err.to_string(), "template: t:1: function \"env\" not defined");
    }

    #[test]
    fn parse_errors_leave_namespace_untouched() {
        let t = TextTemplate::new("t");
        t.parse("ok").unwrap();
        assert!(t.parse("{{ end }}").is_err());
        assert_eq!(t.execute(&NativeValue::Nil).unwrap(), "ok");
    }

    #[test]
    fn functions_may_reenter_the_engine() {
        let t = TextTemplate::new("t");
        let inner = t.clone();
        t.funcs(vec![(
            "reparse".to_string(),
            func(move |_| {
                inner.new_template("late").parse("late").map_err(|e| e.to_string())?;
                Ok(NativeValue::from("done"))
            }),
        )]);
        t.parse("{{ reparse }}").unwrap();
        assert_eq!(t.execute(&NativeValue::Nil).unwrap(), "done");
        assert!(t.lookup("late").is_some());
    }
}
