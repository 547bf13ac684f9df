//! Template parser.
//!
//! The grammar is the familiar action-template one: literal text
//! interleaved with `{{ ... }}` actions (delimiters configurable).
//! Actions are pipelines of commands separated by `|`; commands are a
//! callee with space-separated arguments; `if`, `range` and `with`
//! introduce nested blocks closed by `end`, with an optional `else`
//! branch. `range` accepts `$v :=` and `$k, $v :=` declarations.

use super::value::Value;
use crate::errors::TemplateError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Action(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        els: Vec<Node>,
    },
    Range {
        decls: Vec<String>,
        pipe: Pipeline,
        body: Vec<Node>,
        els: Vec<Node>,
    },
    With {
        pipe: Pipeline,
        body: Vec<Node>,
        els: Vec<Node>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Pipeline {
    pub cmds: Vec<Command>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Command {
    pub args: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// `.`
    Dot,
    /// `.Foo.Bar`
    Field(Vec<String>),
    /// `$name` with optional field path
    Variable(String, Vec<String>),
    /// bare identifier, resolved as a function
    Ident(String),
    /// `( pipeline )`
    SubPipeline(Pipeline),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Dot,
    Field(Vec<String>),
    Variable(String, Vec<String>),
    Pipe,
    LParen,
    RParen,
    Comma,
    Declare, // :=
}

/// A source segment: literal text, or one action's token stream.
enum Segment {
    Text(String),
    Action { tokens: Vec<Token>, line: usize, col: usize },
}

pub(crate) fn parse(
    source: &str,
    left_delim: &str,
    right_delim: &str,
) -> Result<Vec<Node>, TemplateError> {
    let segments = split_segments(source, left_delim, right_delim)?;
    let mut parser = Parser {
        segments,
        pos: 0,
    };
    let nodes = parser.parse_nodes(&mut Vec::new())?;
    if parser.pos < parser.segments.len() {
        return Err(parser.error_here("unexpected else/end outside a block"));
    }
    Ok(nodes)
}

fn split_segments(
    source: &str,
    left: &str,
    right: &str,
) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut line = 1usize;
    let mut col = 1usize;

    let advance_pos = |text: &str, line: &mut usize, col: &mut usize| {
        for c in text.chars() {
            if c == '\n' {
                *line += 1;
                *col = 1;
            } else {
                *col += 1;
            }
        }
    };

    while let Some(start) = rest.find(left) {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        advance_pos(&rest[..start], &mut line, &mut col);
        let (action_line, action_col) = (line, col);
        let after = &rest[start + left.len()..];
        let end = after.find(right).ok_or(TemplateError::Parse {
            line,
            col,
            msg: format!("unclosed action (missing {:?})", right),
        })?;
        let body = &after[..end];
        let tokens = tokenize(body, action_line, action_col)?;
        if !tokens.is_empty() {
            segments.push(Segment::Action {
                tokens,
                line: action_line,
                col: action_col,
            });
        }
        advance_pos(&rest[start..start + left.len() + end + right.len()], &mut line, &mut col);
        rest = &after[end + right.len()..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

fn tokenize(body: &str, line: usize, col: usize) -> Result<Vec<Token>, TemplateError> {
    let err = |msg: String| TemplateError::Parse { line, col, msg };
    let mut tokens = Vec::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err("unterminated string literal".into())),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            i += 1;
                            match chars.get(i) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some('\\') => s.push('\\'),
                                Some('"') => s.push('"'),
                                Some(other) => {
                                    return Err(err(format!("bad escape \\{:?}", other)))
                                }
                                None => return Err(err("unterminated escape".into())),
                            }
                            i += 1;
                        }
                        Some(other) => {
                            s.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '$' => {
                i += 1;
                let mut name = String::new();
                while let Some(c) = chars.get(i) {
                    if c.is_alphanumeric() || *c == '_' {
                        name.push(*c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                let fields = lex_fields(&chars, &mut i);
                tokens.push(Token::Variable(name, fields));
            }
            '.' => {
                let fields = lex_fields(&chars, &mut i);
                if fields.is_empty() {
                    // bare dot
                    i += 1;
                    tokens.push(Token::Dot);
                } else {
                    tokens.push(Token::Field(fields));
                }
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while let Some(c) = chars.get(i) {
                    if c.is_ascii_digit() || *c == '.' || *c == 'e' || *c == '-' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') || text.contains('e') {
                    let f: f64 = text
                        .parse()
                        .map_err(|_| err(format!("bad number {:?}", text)))?;
                    tokens.push(Token::Float(f));
                } else {
                    let n: i64 = text
                        .parse()
                        .map_err(|_| err(format!("bad number {:?}", text)))?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while let Some(c) = chars.get(i) {
                    if c.is_alphanumeric() || *c == '_' || *c == '.' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "nil" => Token::Nil,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(err(format!("unexpected character {:?}", other))),
        }
    }
    Ok(tokens)
}

/// Consumes `.Foo.Bar` chains starting at a dot. Leaves `i` untouched
/// for a bare dot (no following identifier).
fn lex_fields(chars: &[char], i: &mut usize) -> Vec<String> {
    let mut fields = Vec::new();
    let mut j = *i;
    while chars.get(j) == Some(&'.') {
        let mut name = String::new();
        let mut k = j + 1;
        while let Some(c) = chars.get(k) {
            if c.is_alphanumeric() || *c == '_' {
                name.push(*c);
                k += 1;
            } else {
                break;
            }
        }
        if name.is_empty() {
            break;
        }
        fields.push(name);
        j = k;
    }
    if !fields.is_empty() {
        *i = j;
    }
    fields
}

struct Parser {
    segments: Vec<Segment>,
    pos: usize,
}

/// Which keyword terminated a block body.
#[derive(PartialEq)]
enum Terminator {
    End,
    Else,
    Eof,
}

impl Parser {
    fn error_here(&self, msg: &str) -> TemplateError {
        let (line, col) = match self.segments.get(self.pos.saturating_sub(1)) {
            Some(Segment::Action { line, col, .. }) => (*line, *col),
            _ => (0, 0),
        };
        TemplateError::Parse {
            line,
            col,
            msg: msg.to_string(),
        }
    }

    /// Parses nodes until `end`, `else` or end-of-input; pushes the
    /// terminator kind onto `terminators`.
    fn parse_nodes(&mut self, terminators: &mut Vec<Terminator>) -> Result<Vec<Node>, TemplateError> {
        let mut nodes = Vec::new();
        while self.pos < self.segments.len() {
            match &self.segments[self.pos] {
                Segment::Text(t) => {
                    nodes.push(Node::Text(t.clone()));
                    self.pos += 1;
                }
                Segment::Action { tokens, .. } => {
                    let tokens = tokens.clone();
                    self.pos += 1;
                    match tokens.first() {
                        Some(Token::Ident(kw)) if kw == "end" => {
                            terminators.push(Terminator::End);
                            return Ok(nodes);
                        }
                        Some(Token::Ident(kw)) if kw == "else" => {
                            terminators.push(Terminator::Else);
                            return Ok(nodes);
                        }
                        Some(Token::Ident(kw)) if kw == "if" => {
                            nodes.push(self.parse_if(&tokens[1..])?);
                        }
                        Some(Token::Ident(kw)) if kw == "range" => {
                            nodes.push(self.parse_range(&tokens[1..])?);
                        }
                        Some(Token::Ident(kw)) if kw == "with" => {
                            nodes.push(self.parse_with(&tokens[1..])?);
                        }
                        _ => {
                            let pipe = parse_pipeline(&tokens)
                                .map_err(|msg| self.error_here(&msg))?;
                            nodes.push(Node::Action(pipe));
                        }
                    }
                }
            }
        }
        terminators.push(Terminator::Eof);
        Ok(nodes)
    }

    fn parse_block(&mut self) -> Result<(Vec<Node>, Vec<Node>), TemplateError> {
        let mut terms = Vec::new();
        let body = self.parse_nodes(&mut terms)?;
        match terms.pop() {
            Some(Terminator::End) => Ok((body, Vec::new())),
            Some(Terminator::Else) => {
                let mut terms = Vec::new();
                let els = self.parse_nodes(&mut terms)?;
                match terms.pop() {
                    Some(Terminator::End) => Ok((body, els)),
                    _ => Err(self.error_here("else branch missing end")),
                }
            }
            _ => Err(self.error_here("block missing end")),
        }
    }

    fn parse_if(&mut self, cond_tokens: &[Token]) -> Result<Node, TemplateError> {
        let cond = parse_pipeline(cond_tokens).map_err(|msg| self.error_here(&msg))?;
        let (then, els) = self.parse_block()?;
        Ok(Node::If { cond, then, els })
    }

    fn parse_with(&mut self, tokens: &[Token]) -> Result<Node, TemplateError> {
        let pipe = parse_pipeline(tokens).map_err(|msg| self.error_here(&msg))?;
        let (body, els) = self.parse_block()?;
        Ok(Node::With { pipe, body, els })
    }

    fn parse_range(&mut self, tokens: &[Token]) -> Result<Node, TemplateError> {
        // Optional `$k, $v :=` / `$v :=` prefix.
        let mut decls = Vec::new();
        let mut rest = tokens;
        if let Some(decl_at) = tokens.iter().position(|t| *t == Token::Declare) {
            for t in &tokens[..decl_at] {
                match t {
                    Token::Variable(name, fields) if fields.is_empty() => {
                        decls.push(name.clone())
                    }
                    Token::Comma => {}
                    _ => return Err(self.error_here("bad range declaration")),
                }
            }
            if decls.is_empty() || decls.len() > 2 {
                return Err(self.error_here("range declares one or two variables"));
            }
            rest = &tokens[decl_at + 1..];
        }
        let pipe = parse_pipeline(rest).map_err(|msg| self.error_here(&msg))?;
        let (body, els) = self.parse_block()?;
        Ok(Node::Range {
            decls,
            pipe,
            body,
            els,
        })
    }
}

fn parse_pipeline(tokens: &[Token]) -> Result<Pipeline, String> {
    let mut cmds = Vec::new();
    for chunk in split_on_pipes(tokens)? {
        let mut args = Vec::new();
        let mut i = 0;
        while i < chunk.len() {
            let (expr, next) = parse_expr(chunk, i)?;
            args.push(expr);
            i = next;
        }
        if args.is_empty() {
            return Err("empty command in pipeline".to_string());
        }
        cmds.push(Command { args });
    }
    if cmds.is_empty() {
        return Err("empty pipeline".to_string());
    }
    Ok(Pipeline { cmds })
}

/// Splits a token stream on `|` at paren depth zero.
fn split_on_pipes(tokens: &[Token]) -> Result<Vec<&[Token]>, String> {
    let mut chunks = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, t) in tokens.iter().enumerate() {
        match t {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.checked_sub(1).ok_or("unbalanced parentheses")?;
            }
            Token::Pipe if depth == 0 => {
                chunks.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced parentheses".to_string());
    }
    chunks.push(&tokens[start..]);
    Ok(chunks)
}

fn parse_expr(tokens: &[Token], i: usize) -> Result<(Expr, usize), String> {
    match &tokens[i] {
        Token::Str(s) => Ok((Expr::Literal(Value::String(s.clone())), i + 1)),
        Token::Int(n) => Ok((Expr::Literal(Value::Int(*n)), i + 1)),
        Token::Float(f) => Ok((Expr::Literal(Value::Float(*f)), i + 1)),
        Token::Bool(b) => Ok((Expr::Literal(Value::Bool(*b)), i + 1)),
        Token::Nil => Ok((Expr::Literal(Value::Null), i + 1)),
        Token::Dot => Ok((Expr::Dot, i + 1)),
        Token::Field(fields) => Ok((Expr::Field(fields.clone()), i + 1)),
        Token::Variable(name, fields) => {
            Ok((Expr::Variable(name.clone(), fields.clone()), i + 1))
        }
        Token::Ident(name) => Ok((Expr::Ident(name.clone()), i + 1)),
        Token::LParen => {
            // Find the matching close paren.
            let mut depth = 1usize;
            let mut j = i + 1;
            while j < tokens.len() {
                match tokens[j] {
                    Token::LParen => depth += 1,
                    Token::RParen => {
                        depth -= 1;
                        if depth == 0 {
                            let inner = parse_pipeline(&tokens[i + 1..j])?;
                            return Ok((Expr::SubPipeline(inner), j + 1));
                        }
                    }
                    _ => {}
                }
                j += 1;
            }
            Err("unbalanced parentheses".to_string())
        }
        Token::Pipe | Token::RParen | Token::Comma | Token::Declare => {
            Err("unexpected token in expression".to_string())
        }
    }
}
