//! Minimal expression language for computed clause values.
//!
//! Only literals, declared constants, arithmetic and a fixed set of date and
//! string helpers are available. Nothing in here can reach the caller, the
//! process environment or the filesystem.
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := '-' unary | atom
//! atom   := NUMBER | STRING | IDENT | IDENT '(' [expr (',' expr)*] ')' | '(' expr ')'
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use thiserror::Error;

const MAX_DEPTH: usize = 32;
const MAX_SOURCE_LEN: usize = 512;
const MAX_DURATION_SECS: f64 = 1_000_000.0 * 86_400.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{function}' expects {expected} argument(s), got {found}")]
    Arity { function: String, expected: String, found: usize },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Text(String),
    Symbol(String),
    Call { name: String, args: Vec<Node> },
    Neg(Box<Node>),
    Binary { op: BinOp, lhs: Box<Node>, rhs: Box<Node> },
}

/// A parsed expression. Parsing happens once when declarations are loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

/// Read-only evaluation environment: the clock and the declared constants
#[derive(Debug, Clone, Copy)]
pub struct Environment<'a> {
    now: DateTime<Utc>,
    constants: &'a BTreeMap<String, String>,
}

impl<'a> Environment<'a> {
    pub fn new(constants: &'a BTreeMap<String, String>) -> Self {
        Self::at(Utc::now(), constants)
    }

    pub fn at(now: DateTime<Utc>, constants: &'a BTreeMap<String, String>) -> Self {
        Self { now, constants }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn constant(&self, name: &str) -> Option<&'a str> {
        self.constants.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Duration(Duration),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Duration(_) => "duration",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Value::Number(n) => render_number(*n),
            Value::Text(s) => s.clone(),
            Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Duration(d) => d.num_seconds().to_string(),
        }
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ExpressionError::Parse {
                position: MAX_SOURCE_LEN,
                message: format!("expression longer than {} characters", MAX_SOURCE_LEN),
            });
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let root = parser.expr()?;
        if let Some((position, token)) = parser.peek_with_pos() {
            return Err(ExpressionError::Parse { position, message: format!("unexpected {}", token) });
        }
        Ok(Self { source: source.to_string(), root })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of every constant the expression reads
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_symbols(&self.root, &mut out);
        out
    }

    pub fn evaluate(&self, env: &Environment<'_>) -> Result<String, ExpressionError> {
        eval(&self.root, env).map(|v| v.render())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_symbols<'a>(node: &'a Node, out: &mut Vec<&'a str>) {
    match node {
        Node::Symbol(name) => out.push(name),
        Node::Call { args, .. } => args.iter().for_each(|a| collect_symbols(a, out)),
        Node::Neg(inner) => collect_symbols(inner, out),
        Node::Binary { lhs, rhs, .. } => {
            collect_symbols(lhs, out);
            collect_symbols(rhs, out);
        }
        Node::Number(_) | Node::Text(_) => {}
    }
}

// --- tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Text(s) => write!(f, "string '{}'", s),
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => tokens.push((start, Token::Plus)),
            '-' => tokens.push((start, Token::Minus)),
            '*' => tokens.push((start, Token::Star)),
            '/' => tokens.push((start, Token::Slash)),
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            ',' => tokens.push((start, Token::Comma)),
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(ExpressionError::Parse {
                                position: start,
                                message: "unterminated string".to_string(),
                            })
                        }
                        // doubled quote is an escaped quote
                        Some(&ch) if ch == quote && chars.get(i + 1) == Some(&quote) => {
                            text.push(quote);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => break,
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Text(text)));
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal.parse::<f64>().map_err(|_| ExpressionError::Parse {
                    position: start,
                    message: format!("invalid number '{}'", literal),
                })?;
                tokens.push((start, Token::Number(n)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
                continue;
            }
            other => {
                return Err(ExpressionError::Parse {
                    position: start,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
        i += 1;
    }

    Ok(tokens)
}

// --- parser ---

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_with_pos(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(p, t)| (*p, t))
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or_else(|| {
            self.tokens.last().map(|(p, _)| p + 1).unwrap_or(0)
        })
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse { position: self.position(), message: message.into() }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {}", MAX_DEPTH)));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Node, ExpressionError> {
        self.enter()?;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.term()?;
            lhs = Node::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.next();
            let rhs = self.unary()?;
            lhs = Node::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.next();
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Node::Neg(Box::new(inner)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::Text(s)) => Ok(Node::Text(s)),
            Some(Token::Ident(name)) => {
                if !matches!(self.peek(), Some(Token::LParen)) {
                    return Ok(Node::Symbol(name));
                }
                self.next();
                let mut args = Vec::new();
                if matches!(self.peek(), Some(Token::RParen)) {
                    self.next();
                    return Ok(Node::Call { name, args });
                }
                loop {
                    args.push(self.expr()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        Some(other) => return Err(self.error(format!("expected ',' or ')', found {}", other))),
                        None => return Err(self.error("unterminated argument list")),
                    }
                }
                Ok(Node::Call { name, args })
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(other) => Err(self.error(format!("unexpected {}", other))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

// --- evaluation ---

fn eval(node: &Node, env: &Environment<'_>) -> Result<Value, ExpressionError> {
    match node {
        Node::Number(n) => Ok(Value::Number(*n)),
        Node::Text(s) => Ok(Value::Text(s.clone())),
        Node::Symbol(name) => env
            .constant(name)
            .map(|v| Value::Text(v.to_string()))
            .ok_or_else(|| ExpressionError::UndefinedSymbol(name.clone())),
        Node::Neg(inner) => match eval(inner, env)? {
            Value::Duration(d) => Ok(Value::Duration(-d)),
            other => other
                .as_number()
                .map(|n| Value::Number(-n))
                .ok_or_else(|| ExpressionError::TypeMismatch(format!("cannot negate {}", other.kind()))),
        },
        Node::Binary { op, lhs, rhs } => binary(*op, eval(lhs, env)?, eval(rhs, env)?),
        Node::Call { name, args } => call(name, args, env),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, ExpressionError> {
    let overflow = || ExpressionError::TypeMismatch("date arithmetic out of range".to_string());

    match (op, &lhs, &rhs) {
        (BinOp::Add, Value::Timestamp(t), Value::Duration(d))
        | (BinOp::Add, Value::Duration(d), Value::Timestamp(t)) => {
            t.checked_add_signed(*d).map(Value::Timestamp).ok_or_else(overflow)
        }
        (BinOp::Sub, Value::Timestamp(t), Value::Duration(d)) => {
            t.checked_sub_signed(*d).map(Value::Timestamp).ok_or_else(overflow)
        }
        (BinOp::Sub, Value::Timestamp(a), Value::Timestamp(b)) => Ok(Value::Duration(*a - *b)),
        (BinOp::Add, Value::Date(day), Value::Duration(d)) | (BinOp::Add, Value::Duration(d), Value::Date(day)) => {
            day.checked_add_signed(*d).map(Value::Date).ok_or_else(overflow)
        }
        (BinOp::Sub, Value::Date(day), Value::Duration(d)) => {
            day.checked_sub_signed(*d).map(Value::Date).ok_or_else(overflow)
        }
        (BinOp::Add, Value::Duration(a), Value::Duration(b)) => a.checked_add(b).map(Value::Duration).ok_or_else(overflow),
        (BinOp::Sub, Value::Duration(a), Value::Duration(b)) => a.checked_sub(b).map(Value::Duration).ok_or_else(overflow),
        (BinOp::Mul, Value::Duration(d), factor) | (BinOp::Mul, factor, Value::Duration(d)) => {
            let factor = factor.as_number().ok_or_else(|| {
                ExpressionError::TypeMismatch(format!("cannot multiply duration by {}", factor.kind()))
            })?;
            duration_from_secs(d.num_seconds() as f64 * factor).map(Value::Duration)
        }
        (BinOp::Add, Value::Text(a), Value::Text(b)) if lhs.as_number().is_none() || rhs.as_number().is_none() => {
            Ok(Value::Text(format!("{}{}", a, b)))
        }
        _ => {
            let (a, b) = match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(ExpressionError::TypeMismatch(format!(
                        "unsupported operands {} {:?} {}",
                        lhs.kind(),
                        op,
                        rhs.kind()
                    )))
                }
            };
            match op {
                BinOp::Add => Ok(Value::Number(a + b)),
                BinOp::Sub => Ok(Value::Number(a - b)),
                BinOp::Mul => Ok(Value::Number(a * b)),
                BinOp::Div if b == 0.0 => Err(ExpressionError::DivisionByZero),
                BinOp::Div => Ok(Value::Number(a / b)),
            }
        }
    }
}

fn duration_from_secs(secs: f64) -> Result<Duration, ExpressionError> {
    if !secs.is_finite() || secs.abs() > MAX_DURATION_SECS {
        return Err(ExpressionError::TypeMismatch("duration out of range".to_string()));
    }
    Ok(Duration::seconds(secs as i64))
}

fn call(name: &str, args: &[Node], env: &Environment<'_>) -> Result<Value, ExpressionError> {
    let arity = |expected: &str| ExpressionError::Arity {
        function: name.to_string(),
        expected: expected.to_string(),
        found: args.len(),
    };

    match name {
        "now" | "today" => {
            if !args.is_empty() {
                return Err(arity("0"));
            }
            Ok(if name == "now" { Value::Timestamp(env.now()) } else { Value::Date(env.now().date_naive()) })
        }
        "days" | "hours" | "minutes" => {
            let [arg] = args else { return Err(arity("1")) };
            let value = eval(arg, env)?;
            let n = value
                .as_number()
                .ok_or_else(|| ExpressionError::TypeMismatch(format!("{}() expects a number, got {}", name, value.kind())))?;
            let unit = match name {
                "days" => 86_400.0,
                "hours" => 3_600.0,
                _ => 60.0,
            };
            duration_from_secs(n * unit).map(Value::Duration)
        }
        "concat" => {
            if args.is_empty() {
                return Err(arity("at least 1"));
            }
            let mut out = String::new();
            for arg in args {
                out.push_str(&eval(arg, env)?.render());
            }
            Ok(Value::Text(out))
        }
        "lower" | "upper" => {
            let [arg] = args else { return Err(arity("1")) };
            let text = eval(arg, env)?.render();
            Ok(Value::Text(if name == "lower" { text.to_lowercase() } else { text.to_uppercase() }))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}
