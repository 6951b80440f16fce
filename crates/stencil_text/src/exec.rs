//! Tree walking.
//!
//! Execution works on a [`Snapshot`] of the namespace, so no lock is held
//! while registered functions run. Those functions may re-enter the engine
//! (parse more text, register functions) without deadlocking.

use crate::error::{EngineError, EngineResult};
use crate::parse::{Arg, Command, Node, Operand, Pipeline, Pos, Tree};
use crate::print::print_action;
use crate::MissingKey;
use indexmap::IndexMap;
use stencil_bridge::{NativeKey, NativeValue};
use stencil_template::NativeFunc;
use std::sync::Arc;

/// Deepest `{{template}}` nesting before execution gives up.
const MAX_TEMPLATE_DEPTH: usize = 1000;

pub(crate) struct Snapshot {
    pub trees: IndexMap<String, Arc<Tree>>,
    pub funcs: IndexMap<String, NativeFunc>,
    pub missing_key: MissingKey,
}

pub(crate) fn execute(snapshot: &Snapshot, tree: &Arc<Tree>, data: &NativeValue) -> EngineResult<String> {
    let mut state = State {
        snapshot,
        tree: Arc::clone(tree),
        out: String::new(),
        depth: 0,
    };
    state.walk_list(data, &tree.root)?;
    Ok(state.out)
}

struct State<'a> {
    snapshot: &'a Snapshot,
    tree: Arc<Tree>,
    out: String,
    depth: usize,
}

impl State<'_> {
    fn error(&self, pos: Pos, node: &str, message: impl Into<String>) -> EngineError {
        EngineError::Exec {
            location: format!("{}:{}:{}", self.tree.parse_name, pos.line, pos.col),
            name: self.tree.name.clone(),
            node: node.to_string(),
            message: message.into(),
        }
    }

    fn walk_list(&mut self, dot: &NativeValue, nodes: &[Node]) -> EngineResult<()> {
        nodes.iter().try_for_each(|node| self.walk(dot, node))
    }

    fn walk(&mut self, dot: &NativeValue, node: &Node) -> EngineResult<()> {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Action(pipe) => {
                let value = self.pipeline(dot, pipe)?;
                self.out.push_str(&print_action(&value));
            }
            Node::Template {
                pos,
                source,
                name,
                pipe,
            } => {
                let data = match pipe {
                    Some(pipe) => self.pipeline(dot, pipe)?,
                    None => NativeValue::Nil,
                };
                let tree = self
                    .snapshot
                    .trees
                    .get(name)
                    .cloned()
                    .ok_or_else(|| self.error(*pos, source, format!("template {name:?} not defined")))?;
                if self.depth >= MAX_TEMPLATE_DEPTH {
                    return Err(self.error(
                        *pos,
                        source,
                        format!("exceeded maximum template depth ({MAX_TEMPLATE_DEPTH})"),
                    ));
                }
                let saved = std::mem::replace(&mut self.tree, Arc::clone(&tree));
                self.depth += 1;
                let result = self.walk_list(&data, &tree.root);
                self.depth -= 1;
                self.tree = saved;
                result?;
            }
        }
        Ok(())
    }

    fn pipeline(&mut self, dot: &NativeValue, pipe: &Pipeline) -> EngineResult<NativeValue> {
        let mut value = None;
        for cmd in &pipe.cmds {
            value = Some(self.command(dot, cmd, value)?);
        }
        Ok(value.unwrap_or(NativeValue::Nil))
    }

    fn command(&mut self, dot: &NativeValue, cmd: &Command, piped: Option<NativeValue>) -> EngineResult<NativeValue> {
        let Some((first, rest)) = cmd.args.split_first() else {
            return Ok(NativeValue::Nil);
        };
        if let Arg::Function(name) = &first.arg {
            let mut args = rest
                .iter()
                .map(|operand| self.operand(dot, operand))
                .collect::<EngineResult<Vec<_>>>()?;
            args.extend(piped);
            return self.call(first, name, args);
        }
        if !rest.is_empty() || piped.is_some() {
            return Err(self.error(
                first.pos,
                &first.source,
                format!("can't give argument to non-function {}", first.source),
            ));
        }
        if let Arg::Nil = first.arg {
            return Err(self.error(first.pos, &first.source, "nil is not a command"));
        }
        self.operand(dot, first)
    }

    fn operand(&mut self, dot: &NativeValue, operand: &Operand) -> EngineResult<NativeValue> {
        match &operand.arg {
            Arg::Dot => Ok(dot.clone()),
            Arg::Nil => Ok(NativeValue::Nil),
            Arg::Bool(b) => Ok(NativeValue::Bool(*b)),
            Arg::Int(i) => Ok(NativeValue::Int(*i)),
            Arg::Float(f) => Ok(NativeValue::Float(*f)),
            Arg::String(s) => Ok(NativeValue::String(s.clone())),
            Arg::Field(names) => {
                let mut value = dot.clone();
                for name in names {
                    value = self
                        .field(value, name)
                        .map_err(|message| self.error(operand.pos, &operand.source, message))?;
                }
                Ok(value)
            }
            Arg::Function(name) => self.call(operand, name, Vec::new()),
            Arg::Pipe(pipe) => self.pipeline(dot, pipe),
        }
    }

    fn field(&self, receiver: NativeValue, name: &str) -> Result<NativeValue, String> {
        let missing_is_error = self.snapshot.missing_key == MissingKey::Error;
        match receiver {
            NativeValue::Map(mut entries) => match entries.swap_remove(&NativeKey::String(name.to_string())) {
                Some(value) => Ok(value),
                None if missing_is_error => Err(format!("map has no entry for key {name:?}")),
                None => Ok(NativeValue::Nil),
            },
            NativeValue::Nil if missing_is_error => Err(format!("nil data; no entry for key {name:?}")),
            NativeValue::Nil => Ok(NativeValue::Nil),
            other => Err(format!("can't evaluate field {name} in type {}", other.type_name())),
        }
    }

    fn call(&self, operand: &Operand, name: &str, args: Vec<NativeValue>) -> EngineResult<NativeValue> {
        let func = self
            .snapshot
            .funcs
            .get(name)
            .ok_or_else(|| self.error(operand.pos, &operand.source, format!("{name:?} is not a defined function")))?;
        (**func)(&args).map_err(|err| {
            self.error(
                operand.pos,
                &operand.source,
                format!("error calling {name}: {err}"),
            )
        })
    }
}
