//! Template source to trees.
//!
//! The source is split into text and action items (honouring the
//! configured delimiters and `/* */` comments), then each action is
//! tokenized and assembled into nodes. Every `{{define}}` block becomes its
//! own [`Tree`].

use crate::error::{EngineError, EngineResult};
use std::collections::VecDeque;

/// Line (1-based) and byte column (0-based) of a node in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug)]
pub struct Tree {
    pub name: String,
    /// Template whose source this tree was parsed from.
    pub parse_name: String,
    pub root: Vec<Node>,
}

impl Tree {
    /// Only whitespace: such a tree never replaces an existing definition.
    pub fn is_empty(&self) -> bool {
        self.root
            .iter()
            .all(|node| matches!(node, Node::Text(text) if text.trim().is_empty()))
    }
}

#[derive(Debug)]
pub enum Node {
    Text(String),
    Action(Pipeline),
    Template {
        pos: Pos,
        source: String,
        name: String,
        pipe: Option<Pipeline>,
    },
}

#[derive(Debug)]
pub struct Pipeline {
    pub cmds: Vec<Command>,
}

#[derive(Debug)]
pub struct Command {
    pub args: Vec<Operand>,
}

#[derive(Debug)]
pub struct Operand {
    pub pos: Pos,
    pub source: String,
    pub arg: Arg,
}

#[derive(Debug)]
pub enum Arg {
    Dot,
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Field(Vec<String>),
    Function(String),
    Pipe(Box<Pipeline>),
}

/// Parse `text` as template `name`. Returns the trees of every
/// `{{define}}` block followed by the tree of `name` itself.
pub fn parse(
    name: &str,
    text: &str,
    left: &str,
    right: &str,
    is_function: &dyn Fn(&str) -> bool,
) -> EngineResult<Vec<Tree>> {
    let mut parser = Parser {
        name,
        text,
        right,
        is_function,
        items: VecDeque::new(),
        trees: Vec::new(),
    };
    parser.items = parser.lex(left)?;
    let (root, end) = parser.parse_list()?;
    if let Some(offset) = end {
        return Err(parser.error(offset, "unexpected {{end}}"));
    }
    parser.trees.push(Tree {
        name: name.to_string(),
        parse_name: name.to_string(),
        root,
    });
    Ok(parser.trees)
}

enum Item {
    Text(String),
    Action { offset: usize, tokens: Vec<Token> },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// `.` (no names) or `.a.b`.
    Field(Vec<String>),
    Ident(String),
    Str(String),
    Number(String),
    LParen,
    RParen,
    Pipe,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Split `body` (which starts at absolute offset `base`) into tokens.
fn tokenize(body: &str, base: usize) -> Result<Vec<Token>, (usize, String)> {
    let chars: Vec<(usize, char)> = body.char_indices().collect();
    let offset = |i: usize| base + chars.get(i).map_or(body.len(), |c| c.0);
    let at = |i: usize| chars.get(i).map(|c| c.1);
    let take = |i: &mut usize, accept: &dyn Fn(char) -> bool| {
        let mut taken = String::new();
        while let Some(c) = at(*i).filter(|c| accept(*c)) {
            taken.push(c);
            *i += 1;
        }
        taken
    };

    let mut tokens = Vec::new();
    let mut i = 0;
    while let Some(c) = at(i) {
        let start = i;
        let tok = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' | ')' | '|' => {
                i += 1;
                match c {
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    _ => Tok::Pipe,
                }
            }
            '"' => {
                i += 1;
                let mut value = String::new();
                loop {
                    match (at(i), at(i + 1)) {
                        (None, _) | (Some('\\'), None) => {
                            return Err((offset(start), "unterminated quoted string".into()))
                        }
                        (Some('"'), _) => break,
                        (Some('\\'), Some(escaped)) => {
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                '0' => '\0',
                                '\\' | '"' => escaped,
                                other => {
                                    return Err((offset(i), format!("unknown escape sequence: \\{other}")))
                                }
                            });
                            i += 2;
                        }
                        (Some(c), _) => {
                            value.push(c);
                            i += 1;
                        }
                    }
                }
                i += 1;
                Tok::Str(value)
            }
            '.' if !at(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                let mut fields = Vec::new();
                while at(i) == Some('.') {
                    i += 1;
                    let name = take(&mut i, &is_ident_char);
                    if name.is_empty() {
                        break;
                    }
                    fields.push(name);
                }
                Tok::Field(fields)
            }
            c if c.is_ascii_digit() || c == '.' || (c == '-' && at(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                i += 1;
                let mut number = c.to_string();
                number.push_str(&take(&mut i, &|c| c.is_ascii_alphanumeric() || c == '.'));
                Tok::Number(number)
            }
            c if c.is_alphabetic() || c == '_' => Tok::Ident(take(&mut i, &is_ident_char)),
            other => return Err((offset(i), format!("unexpected {other:?} in command"))),
        };
        tokens.push(Token {
            tok,
            start: offset(start),
            end: offset(i),
        });
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Result<Arg, String> {
    if let Ok(value) = text.parse::<i64>() {
        return Ok(Arg::Int(value));
    }
    text.parse::<f64>()
        .map(Arg::Float)
        .map_err(|_| format!("bad number syntax: {text:?}"))
}

struct Parser<'a> {
    name: &'a str,
    text: &'a str,
    right: &'a str,
    is_function: &'a dyn Fn(&str) -> bool,
    items: VecDeque<Item>,
    trees: Vec<Tree>,
}

impl Parser<'_> {
    fn pos(&self, offset: usize) -> Pos {
        let before = &self.text[..offset.min(self.text.len())];
        Pos {
            line: before.matches('\n').count() + 1,
            col: before.len() - before.rfind('\n').map_or(0, |i| i + 1),
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> EngineError {
        EngineError::Parse {
            name: self.name.to_string(),
            line: self.pos(offset).line,
            message: message.into(),
        }
    }

    fn lex(&self, left: &str) -> EngineResult<VecDeque<Item>> {
        let text = self.text;
        let mut items = VecDeque::new();
        let mut pos = 0;
        while let Some(found) = text[pos..].find(left) {
            let start = pos + found;
            if start > pos {
                items.push_back(Item::Text(text[pos..start].to_string()));
            }
            let body_start = start + left.len();
            let end = self
                .find_right(body_start)
                .ok_or_else(|| self.error(start, "unclosed action"))?;
            let body = &text[body_start..end];
            let trimmed = body.trim();
            if trimmed.starts_with("/*") {
                if trimmed.len() < 4 || !trimmed.ends_with("*/") {
                    return Err(self.error(start, "unclosed comment"));
                }
            } else {
                let tokens = tokenize(body, body_start).map_err(|(at, msg)| self.error(at, msg))?;
                items.push_back(Item::Action {
                    offset: start,
                    tokens,
                });
            }
            pos = end + self.right.len();
        }
        if pos < text.len() {
            items.push_back(Item::Text(text[pos..].to_string()));
        }
        Ok(items)
    }

    /// Offset of the right delimiter closing the action that starts at
    /// `from`, skipping quoted strings.
    fn find_right(&self, from: usize) -> Option<usize> {
        let text = self.text;
        let mut chars = text[from..].char_indices();
        while let Some((i, c)) = chars.next() {
            if c == '"' {
                let mut escaped = false;
                for (_, c) in chars.by_ref() {
                    match c {
                        '\\' if !escaped => escaped = true,
                        '"' if !escaped => break,
                        _ => escaped = false,
                    }
                }
            } else if text[from + i..].starts_with(self.right) {
                return Some(from + i);
            }
        }
        None
    }

    /// Nodes up to `{{end}}` (whose offset is returned) or the end of input.
    fn parse_list(&mut self) -> EngineResult<(Vec<Node>, Option<usize>)> {
        let mut nodes = Vec::new();
        while let Some(item) = self.items.pop_front() {
            let (offset, tokens) = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action { offset, tokens } => (offset, tokens),
            };
            let rest = tokens.get(1..).unwrap_or_default();
            match tokens.first().map(|t| &t.tok) {
                Some(Tok::Ident(word)) if word == "end" => {
                    if !rest.is_empty() {
                        return Err(self.error(offset, "unexpected tokens in {{end}}"));
                    }
                    return Ok((nodes, Some(offset)));
                }
                Some(Tok::Ident(word)) if word == "define" => self.define(offset, rest)?,
                Some(Tok::Ident(word)) if word == "template" => nodes.push(self.template(offset, rest)?),
                _ => nodes.push(Node::Action(self.pipeline(offset, &tokens)?)),
            }
        }
        Ok((nodes, None))
    }

    fn define(&mut self, offset: usize, tokens: &[Token]) -> EngineResult<()> {
        let name = match tokens {
            [Token {
                tok: Tok::Str(name),
                ..
            }] => name.clone(),
            _ => return Err(self.error(offset, "define clause expects a quoted template name")),
        };
        match self.parse_list()? {
            (root, Some(_)) => {
                self.trees.push(Tree {
                    name,
                    parse_name: self.name.to_string(),
                    root,
                });
                Ok(())
            }
            (_, None) => Err(self.error(self.text.len(), "unexpected EOF")),
        }
    }

    fn template(&mut self, offset: usize, tokens: &[Token]) -> EngineResult<Node> {
        let (name, rest) = match tokens.split_first() {
            Some((
                Token {
                    tok: Tok::Str(name),
                    ..
                },
                rest,
            )) => (name.clone(), rest),
            _ => return Err(self.error(offset, "template clause expects a quoted template name")),
        };
        let pipe = if rest.is_empty() {
            None
        } else {
            Some(self.pipeline(offset, rest)?)
        };
        let end = tokens.last().map_or(offset, |t| t.end);
        Ok(Node::Template {
            pos: self.pos(offset),
            source: format!("{{{{template {}}}}}", self.text[tokens[0].start..end].trim()),
            name,
            pipe,
        })
    }

    fn pipeline(&self, offset: usize, tokens: &[Token]) -> EngineResult<Pipeline> {
        let mut index = 0;
        let pipe = self.commands(offset, tokens, &mut index, false)?;
        if let Some(extra) = tokens.get(index) {
            return Err(self.error(extra.start, "unexpected \")\" in operand"));
        }
        Ok(pipe)
    }

    fn commands(&self, offset: usize, tokens: &[Token], index: &mut usize, nested: bool) -> EngineResult<Pipeline> {
        let mut cmds = Vec::new();
        loop {
            let mut args = Vec::new();
            while let Some(token) = tokens.get(*index) {
                match token.tok {
                    Tok::Pipe | Tok::RParen => break,
                    Tok::LParen => {
                        *index += 1;
                        let inner = self.commands(token.start, tokens, index, true)?;
                        let close = match tokens.get(*index) {
                            Some(t) if t.tok == Tok::RParen => t.end,
                            _ => return Err(self.error(token.start, "unclosed left paren")),
                        };
                        *index += 1;
                        args.push(Operand {
                            pos: self.pos(token.start),
                            source: self.text[token.start..close].to_string(),
                            arg: Arg::Pipe(Box::new(inner)),
                        });
                    }
                    _ => {
                        args.push(self.operand(token)?);
                        *index += 1;
                    }
                }
            }
            if args.is_empty() {
                return Err(self.error(offset, "missing value for command"));
            }
            cmds.push(Command { args });
            match tokens.get(*index).map(|t| &t.tok) {
                Some(Tok::Pipe) => *index += 1,
                Some(Tok::RParen) if !nested => return Err(self.error(offset, "unexpected right paren")),
                _ => return Ok(Pipeline { cmds }),
            }
        }
    }

    fn operand(&self, token: &Token) -> EngineResult<Operand> {
        let arg = match &token.tok {
            Tok::Field(fields) if fields.is_empty() => Arg::Dot,
            Tok::Field(fields) => Arg::Field(fields.clone()),
            Tok::Str(value) => Arg::String(value.clone()),
            Tok::Number(text) => parse_number(text).map_err(|msg| self.error(token.start, msg))?,
            Tok::Ident(name) => match name.as_str() {
                "true" => Arg::Bool(true),
                "false" => Arg::Bool(false),
                "nil" => Arg::Nil,
                "define" | "end" | "template" => {
                    return Err(self.error(token.start, format!("unexpected <{name}> in command")))
                }
                name if (self.is_function)(name) => Arg::Function(name.to_string()),
                name => return Err(self.error(token.start, format!("function {name:?} not defined"))),
            },
            Tok::LParen | Tok::RParen | Tok::Pipe => {
                return Err(self.error(token.start, "unexpected delimiter in operand"))
            }
        };
        Ok(Operand {
            pos: self.pos(token.start),
            source: self.text[token.start..token.end].to_string(),
            arg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_function(_: &str) -> bool {
        true
    }

    fn no_functions(_: &str) -> bool {
        false
    }

    fn parse_one(text: &str) -> EngineResult<Vec<Tree>> {
        parse("t", text, "{{", "}}", &any_function)
    }

    #[test]
    fn text_and_actions() {
        let trees = parse_one("a {{ .b }} c").unwrap();
        let root = &trees[0].root;
        assert_eq!(root.len(), 3);
        assert!(matches!(&root[0], Node::Text(t) if t == "a "));
        let Node::Action(pipe) = &root[1] else {
            panic!("expected action");
        };
        let operand = &pipe.cmds[0].args[0];
        assert!(matches!(&operand.arg, Arg::Field(f) if f == &["b".to_string()]));
        assert_eq!(operand.pos, Pos { line: 1, col: 5 });
        assert_eq!(operand.source, ".b");
    }

    #[test]
    fn defines_become_trees() {
        let trees = parse_one(r#"{{define "inner"}}x{{end}}outer"#).unwrap();
        let names: Vec<_> = trees.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["inner", "t"]);
        assert!(trees.iter().all(|t| t.parse_name == "t"));

        let trees = parse_one(r#"{{define "foo"}}{{ end }}"#).unwrap();
        assert!(trees[1].is_empty());
    }

    #[test]
    fn comments_and_custom_delimiters() {
        assert_eq!(parse_one("a{{/* note */}}b").unwrap()[0].root.len(), 2);

        let trees = parse("t", "<< . >>{{ x }}", "<<", ">>", &no_functions).unwrap();
        let root = &trees[0].root;
        assert!(matches!(&root[0], Node::Action(_)));
        assert!(matches!(&root[1], Node::Text(t) if t == "{{ x }}"));
    }

    #[test]
    fn undefined_functions_fail_at_parse() {
        let err = parse("t", "\n{{ myUndef }}", "{{", "}}", &no_functions).unwrap_err();
        assert_eq!(err.to_string(), "template: t:2: function \"myUndef\" not defined");
    }

    #[test]
    fn numbers() {
        assert!(matches!(parse_number("123"), Ok(Arg::Int(123))));
        assert!(matches!(parse_number("-4"), Ok(Arg::Int(-4))));
        assert!(matches!(parse_number("3.5"), Ok(Arg::Float(f)) if f == 3.5));
        assert!(parse_number("12ab").is_err());
    }

    #[test]
    fn pipelines_and_parens() {
        let trees = parse_one(r#"{{ f (g "a") 1 | h }}"#).unwrap();
        let Node::Action(pipe) = &trees[0].root[0] else {
            panic!("expected action");
        };
        assert_eq!(pipe.cmds.len(), 2);
        assert_eq!(pipe.cmds[0].args.len(), 3);
        assert!(matches!(&pipe.cmds[0].args[1].arg, Arg::Pipe(_)));
        assert_eq!(pipe.cmds[0].args[1].source, r#"(g "a")"#);
    }

    #[test]
    fn unbalanced_input() {
        assert!(parse_one(r#"{{define "x"}}x"#).is_err());
        assert!(parse_one("x{{end}}").is_err());
        assert!(parse_one("{{ .x ").is_err());
        assert!(parse_one("{{ (f }}").is_err());
    }

    #[test]
    fn delimiter_inside_string_does_not_close() {
        let trees = parse_one(r#"{{ "}}" }}"#).unwrap();
        let Node::Action(pipe) = &trees[0].root[0] else {
            panic!("expected action");
        };
        assert!(matches!(&pipe.cmds[0].args[0].arg, Arg::String(s) if s == "}}"));
    }
}
