//! Template engine.
//!
//! Boot content carries templates in the action language the original
//! content library uses: literal text interleaved with `{{ ... }}`
//! actions. The engine supports exactly what that content needs:
//!
//! - field chains: `{{.Machine.Name}}`, `{{.Env.Name}}`
//! - helper calls with literal arguments: `{{.Param "foo"}}`,
//!   `{{.ParseUrl "scheme" "http://..."}}`
//! - conditionals: `{{if .ParamExists "fred"}} ... {{else}} ... {{end}}`
//! - sub-template inclusion: `{{template "included" .}}`
//!
//! Parsing and evaluation are split: entities parse their template
//! sources at validation time, and the renderer executes the parsed
//! form against a [`Context`].

use thiserror::Error;

/// Template parse or execution failure.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The source text does not parse.
    #[error("parse error at offset {pos}: {msg}")]
    Parse { pos: usize, msg: String },
    /// An action failed while executing.
    #[error("{0}")]
    Exec(String),
}

/// A literal argument to a helper call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
}

/// A field chain plus its arguments: `.Machine.Name`, `.Param "foo"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Chain segments, leading dot stripped.
    pub path: Vec<String>,
    /// Literal arguments.
    pub args: Vec<Arg>,
}

/// One parsed template node.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Action(Expr),
    If {
        cond: Expr,
        then: Vec<Node>,
        els: Vec<Node>,
    },
    Include(String),
}

/// A parsed template, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    nodes: Vec<Node>,
}

/// A value produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TplValue {
    Str(String),
    Bool(bool),
    Json(serde_json::Value),
}

impl TplValue {
    /// Truthiness for `{{if}}`.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Str(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::Json(v) => match v {
                serde_json::Value::Null => false,
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::String(s) => !s.is_empty(),
                _ => true,
            },
        }
    }
}

impl std::fmt::Display for TplValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Json(serde_json::Value::String(s)) => f.write_str(s),
            Self::Json(v) => f.write_str(&v.to_string()),
        }
    }
}

/// What expression evaluation runs against.
pub trait Context {
    /// Evaluate a field chain with arguments.
    fn call(&self, path: &[String], args: &[Arg]) -> Result<TplValue, String>;

    /// Resolve a sub-template by ID for `{{template "id" .}}`.
    fn include(&self, id: &str) -> Result<Compiled, String>;
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err(&self, msg: impl Into<String>) -> TemplateError {
        TemplateError::Parse {
            pos: self.pos,
            msg: msg.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Top-level and block-body node loop. Returns at end of input or
    /// when an `{{else}}` / `{{end}}` terminator is seen (and reports
    /// which one).
    fn parse_nodes(&mut self, in_block: bool) -> Result<(Vec<Node>, Option<Terminator>), TemplateError> {
        let mut nodes = Vec::new();
        loop {
            match self.rest().find("{{") {
                None => {
                    if !self.rest().is_empty() {
                        nodes.push(Node::Text(self.rest().to_string()));
                        self.pos = self.src.len();
                    }
                    if in_block {
                        return Err(self.err("missing {{end}}"));
                    }
                    return Ok((nodes, None));
                }
                Some(off) => {
                    if off > 0 {
                        nodes.push(Node::Text(self.rest()[..off].to_string()));
                    }
                    self.pos += off + 2;
                    let action = self.action_body()?;
                    match self.parse_action(&action)? {
                        Parsed::Node(n) => nodes.push(n),
                        Parsed::Terminator(t) => {
                            if !in_block {
                                return Err(self.err(format!("unexpected {{{{{t}}}}}")));
                            }
                            return Ok((nodes, Some(t)));
                        }
                    }
                }
            }
        }
    }

    /// Consume up to the closing `}}` and return the trimmed body.
    fn action_body(&mut self) -> Result<String, TemplateError> {
        match self.rest().find("}}") {
            None => Err(self.err("unclosed action")),
            Some(off) => {
                let body = self.rest()[..off].trim().to_string();
                self.pos += off + 2;
                Ok(body)
            }
        }
    }

    fn parse_action(&mut self, body: &str) -> Result<Parsed, TemplateError> {
        if body == "end" {
            return Ok(Parsed::Terminator(Terminator::End));
        }
        if body == "else" {
            return Ok(Parsed::Terminator(Terminator::Else));
        }
        if let Some(rest) = body.strip_prefix("if ") {
            let cond = self.parse_expr(rest.trim())?;
            let (then, term) = self.parse_nodes(true)?;
            let els = match term {
                Some(Terminator::Else) => {
                    let (els, term) = self.parse_nodes(true)?;
                    if term != Some(Terminator::End) {
                        return Err(self.err("missing {{end}} after {{else}}"));
                    }
                    els
                }
                Some(Terminator::End) => Vec::new(),
                None => return Err(self.err("missing {{end}}")),
            };
            return Ok(Parsed::Node(Node::If { cond, then, els }));
        }
        if let Some(rest) = body.strip_prefix("template ") {
            let mut lex = Lexer::new(rest.trim());
            match lex.next_arg() {
                Some(Ok(Arg::Str(id))) => return Ok(Parsed::Node(Node::Include(id))),
                _ => return Err(self.err("template action needs a quoted template ID")),
            }
        }
        Ok(Parsed::Node(Node::Action(self.parse_expr(body)?)))
    }

    fn parse_expr(&self, body: &str) -> Result<Expr, TemplateError> {
        if !body.starts_with('.') {
            return Err(self.err(format!("expected a field chain, got {body:?}")));
        }
        let (chain, rest) = match body.find(char::is_whitespace) {
            Some(i) => (&body[..i], body[i..].trim()),
            None => (body, ""),
        };
        let path: Vec<String> = chain[1..]
            .split('.')
            .map(str::to_string)
            .collect();
        if path.iter().any(String::is_empty) {
            return Err(self.err(format!("malformed field chain {chain:?}")));
        }
        let mut args = Vec::new();
        let mut lex = Lexer::new(rest);
        while let Some(arg) = lex.next_arg() {
            args.push(arg.map_err(|m| self.err(m))?);
        }
        Ok(Expr { path, args })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Terminator {
    Else,
    End,
}

impl std::fmt::Display for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Else => f.write_str("else"),
            Self::End => f.write_str("end"),
        }
    }
}

enum Parsed {
    Node(Node),
    Terminator(Terminator),
}

/// Argument lexer: quoted strings (with `\"` and `\\` escapes) and
/// integers, whitespace separated. A bare `.` (the "current data"
/// argument to `template`) is skipped.
struct Lexer<'a> {
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(rest: &'a str) -> Self {
        Self { rest }
    }

    fn next_arg(&mut self) -> Option<Result<Arg, String>> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        if let Some(stripped) = self.rest.strip_prefix('.') {
            if stripped.is_empty() || stripped.starts_with(char::is_whitespace) {
                self.rest = stripped;
                return self.next_arg();
            }
        }
        if let Some(stripped) = self.rest.strip_prefix('"') {
            let mut out = String::new();
            let mut chars = stripped.char_indices();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some((_, e)) => out.push(e),
                        None => return Some(Err("unterminated escape".to_string())),
                    },
                    '"' => {
                        self.rest = &stripped[i + 1..];
                        return Some(Ok(Arg::Str(out)));
                    }
                    c => out.push(c),
                }
            }
            return Some(Err("unterminated string".to_string()));
        }
        let end = self
            .rest
            .find(char::is_whitespace)
            .unwrap_or(self.rest.len());
        let tok = &self.rest[..end];
        self.rest = &self.rest[end..];
        match tok.parse::<i64>() {
            Ok(n) => Some(Ok(Arg::Int(n))),
            Err(_) => Some(Err(format!("unexpected argument {tok:?}"))),
        }
    }
}

/// Parse a template source.
pub fn parse(src: &str) -> Result<Compiled, TemplateError> {
    let mut p = Parser { src, pos: 0 };
    let (nodes, _) = p.parse_nodes(false)?;
    Ok(Compiled { nodes })
}

// ============================================================================
// Execution
// ============================================================================

impl Compiled {
    /// Execute against a context, producing the rendered text.
    pub fn execute(&self, ctx: &dyn Context) -> Result<String, TemplateError> {
        let mut out = String::new();
        exec_nodes(&self.nodes, ctx, &mut out)?;
        Ok(out)
    }
}

fn exec_nodes(nodes: &[Node], ctx: &dyn Context, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Action(expr) => {
                let v = ctx
                    .call(&expr.path, &expr.args)
                    .map_err(TemplateError::Exec)?;
                out.push_str(&v.to_string());
            }
            Node::If { cond, then, els } => {
                let v = ctx
                    .call(&cond.path, &cond.args)
                    .map_err(TemplateError::Exec)?;
                if v.truthy() {
                    exec_nodes(then, ctx, out)?;
                } else {
                    exec_nodes(els, ctx, out)?;
                }
            }
            Node::Include(id) => {
                let sub = ctx.include(id).map_err(TemplateError::Exec)?;
                exec_nodes(&sub.nodes, ctx, out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestCtx;

    impl Context for TestCtx {
        fn call(&self, path: &[String], args: &[Arg]) -> Result<TplValue, String> {
            match path[0].as_str() {
                "Name" => Ok(TplValue::Str("fred".to_string())),
                "Param" => match args {
                    [Arg::Str(k)] if k == "exists" => Ok(TplValue::Str("yes".to_string())),
                    [Arg::Str(k)] => Err(format!("No such machine parameter {k}")),
                    _ => Err("Param needs one string argument".to_string()),
                },
                "ParamExists" => match args {
                    [Arg::Str(k)] => Ok(TplValue::Bool(k == "exists")),
                    _ => Err("ParamExists needs one string argument".to_string()),
                },
                "Machine" => match path.get(1).map(String::as_str) {
                    Some("Name") => Ok(TplValue::Str("mach1".to_string())),
                    _ => Err(format!("unknown machine field in {path:?}")),
                },
                _ => Err(format!("unknown helper {path:?}")),
            }
        }

        fn include(&self, id: &str) -> Result<Compiled, String> {
            match id {
                "included" => Ok(parse("sub:{{.Name}}").unwrap()),
                _ => Err(format!("Template does not exist: {id}")),
            }
        }
    }

    #[test]
    fn literal_text_passes_through() {
        let t = parse("no actions here").unwrap();
        assert_eq!(t.execute(&TestCtx).unwrap(), "no actions here");
    }

    #[test]
    fn empty_source_is_fine() {
        assert_eq!(parse("").unwrap().execute(&TestCtx).unwrap(), "");
    }

    #[test]
    fn field_chains_and_args() {
        let t = parse("Name = {{.Machine.Name}}, p = {{.Param \"exists\"}}").unwrap();
        assert_eq!(t.execute(&TestCtx).unwrap(), "Name = mach1, p = yes");
    }

    #[test]
    fn if_blocks_with_else() {
        let t = parse("{{if .ParamExists \"exists\"}}yes{{else}}no{{end}}").unwrap();
        assert_eq!(t.execute(&TestCtx).unwrap(), "yes");
        let t = parse("{{if .ParamExists \"nope\"}}yes{{else}}no{{end}}").unwrap();
        assert_eq!(t.execute(&TestCtx).unwrap(), "no");
    }

    #[test]
    fn if_without_else() {
        let t = parse("a{{if .ParamExists \"nope\"}}X{{end}}b").unwrap();
        assert_eq!(t.execute(&TestCtx).unwrap(), "ab");
    }

    #[test]
    fn template_inclusion() {
        let t = parse("[{{template \"included\" .}}]").unwrap();
        assert_eq!(t.execute(&TestCtx).unwrap(), "[sub:fred]");
    }

    #[test]
    fn parse_errors() {
        assert!(parse("{{.Name").is_err()); // unclosed
        assert!(parse("{{end}}").is_err()); // stray end
        assert!(parse("{{if .Name}}x").is_err()); // missing end
        assert!(parse("{{bogus}}").is_err()); // not a field chain
        assert!(parse("{{.Param \"unterminated}}").is_err());
        assert!(parse("{{..Name}}").is_err());
    }

    #[test]
    fn exec_errors_propagate() {
        let t = parse("{{.Param \"missing\"}}").unwrap();
        let err = t.execute(&TestCtx).unwrap_err();
        assert!(err.to_string().contains("No such machine parameter"));
    }
}
