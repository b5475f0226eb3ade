//! Safe arithmetic expression evaluation.
//!
//! Source text is tokenized and parsed into a generic [`Expr`] tree first.
//! The evaluator then walks the tree node by node and rejects every node
//! kind, operator, name or function that is not on the allow-list. The
//! parser deliberately accepts more than the evaluator does (strings,
//! attributes, subscripts, comparisons) so that disallowed constructs are
//! reported as such instead of as syntax errors.
//!
//! ```
//! use corvid_guard::expression::evaluate;
//!
//! assert_eq!(evaluate("sqrt(16) + 2").unwrap(), 6.0);
//! assert!(evaluate("__import__('os')").is_err());
//! ```

use std::fmt;

use crate::error::{GuardError, Result};

/// Longest expression accepted, in characters.
pub const MAX_EXPRESSION_LEN: usize = 2_000;

/// Deepest nesting accepted by the parser.
pub const MAX_DEPTH: usize = 64;

/// Named constants available to expressions.
pub const CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("tau", std::f64::consts::TAU),
];

/// Functions available to expressions.
pub const FUNCTIONS: &[&str] = &[
    "abs", "round", "min", "max", "sum", "pow", "sqrt", "sin", "cos", "tan", "asin", "acos",
    "atan", "atan2", "sinh", "cosh", "tanh", "hypot", "degrees", "radians", "log", "log10",
    "log2", "exp", "floor", "ceil",
];

/// True if `name` is an allowed constant or function.
pub fn is_allowed_name(name: &str) -> bool {
    CONSTANTS.iter().any(|(c, _)| *c == name) || FUNCTIONS.contains(&name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Expression tree
// ─────────────────────────────────────────────────────────────────────────────

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

/// Binary operators understood by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitXor => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
        }
    }

    fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::FloorDiv
                | BinaryOp::Mod
                | BinaryOp::Pow
        )
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Name(String),
    List(Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(BinaryOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Op(op) => write!(f, "{}", op.symbol()),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let starts_number =
            c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit));
        if starts_number {
            let start = i;
            while i < len && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < len && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < len && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < len && chars[j].is_ascii_digit() {
                    i = j;
                    while i < len && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| GuardError::invalid(format!("malformed number '{text}'")))?;
            tokens.push(Token::Number(value));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c == '\'' || c == '"' {
            let start = i + 1;
            let mut j = start;
            while j < len && chars[j] != c {
                j += 1;
            }
            if j >= len {
                return Err(GuardError::invalid("unterminated string literal"));
            }
            tokens.push(Token::Str(chars[start..j].iter().collect()));
            i = j + 1;
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::Op(BinaryOp::Pow), 2),
            ('/', Some('/')) => (Token::Op(BinaryOp::FloorDiv), 2),
            ('<', Some('=')) => (Token::Op(BinaryOp::Le), 2),
            ('>', Some('=')) => (Token::Op(BinaryOp::Ge), 2),
            ('=', Some('=')) => (Token::Op(BinaryOp::Eq), 2),
            ('!', Some('=')) => (Token::Op(BinaryOp::NotEq), 2),
            ('+', _) => (Token::Op(BinaryOp::Add), 1),
            ('-', _) => (Token::Op(BinaryOp::Sub), 1),
            ('*', _) => (Token::Op(BinaryOp::Mul), 1),
            ('/', _) => (Token::Op(BinaryOp::Div), 1),
            ('%', _) => (Token::Op(BinaryOp::Mod), 1),
            ('^', _) => (Token::Op(BinaryOp::BitXor), 1),
            ('<', _) => (Token::Op(BinaryOp::Lt), 1),
            ('>', _) => (Token::Op(BinaryOp::Gt), 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            ('=', _) => return Err(GuardError::invalid("assignment is not allowed")),
            _ => {
                return Err(GuardError::invalid(format!(
                    "unexpected character '{c}' at position {i}"
                )));
            }
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.advance() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(GuardError::invalid(format!(
                "expected '{expected}' but found '{t}'"
            ))),
            None => Err(GuardError::invalid(format!(
                "expected '{expected}' but reached end of input"
            ))),
        }
    }

    fn peek_op(&self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(GuardError::invalid("expression is too deeply nested"));
        }
        Ok(())
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = self.parse_comparison();
        self.depth -= 1;
        expr
    }

    fn parse_binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        while let Some(op) = self.peek_op(ops) {
            self.pos += 1;
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                BinaryOp::Lt,
                BinaryOp::Le,
                BinaryOp::Gt,
                BinaryOp::Ge,
                BinaryOp::Eq,
                BinaryOp::NotEq,
            ],
            Self::parse_bitxor,
        )
    }

    fn parse_bitxor(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[BinaryOp::BitXor], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[BinaryOp::Add, BinaryOp::Sub], Self::parse_term)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[BinaryOp::Mul, BinaryOp::Div, BinaryOp::FloorDiv, BinaryOp::Mod],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek_op(&[BinaryOp::Add, BinaryOp::Sub]) {
            Some(BinaryOp::Add) => UnaryOp::Plus,
            Some(_) => UnaryOp::Minus,
            None => return self.parse_power(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.parse_unary();
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix()?;
        if self.peek_op(&[BinaryOp::Pow]).is_some() {
            self.pos += 1;
            // Right associative; the exponent may carry its own sign.
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat(&Token::LParen) {
                let args = self.parse_sequence(Token::RParen)?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(attr)) => {
                        expr = Expr::Attribute {
                            value: Box::new(expr),
                            attr,
                        };
                    }
                    _ => return Err(GuardError::invalid("expected attribute name after '.'")),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_expression()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma separated expressions up to `close`, allowing a trailing comma.
    fn parse_sequence(&mut self, close: Token) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression()?);
            if self.eat(&Token::Comma) {
                if self.eat(&close) {
                    return Ok(items);
                }
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => Ok(Expr::Name(name)),
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                self.enter()?;
                let items = self.parse_sequence(Token::RBracket);
                self.depth -= 1;
                Ok(Expr::List(items?))
            }
            Some(t) => Err(GuardError::invalid(format!("unexpected token '{t}'"))),
            None => Err(GuardError::invalid("unexpected end of expression")),
        }
    }
}

/// Parse an expression into a tree without evaluating it.
pub fn parse(src: &str) -> Result<Expr> {
    if src.trim().is_empty() {
        return Err(GuardError::invalid("expression is empty"));
    }
    if src.chars().count() > MAX_EXPRESSION_LEN {
        return Err(GuardError::invalid(format!(
            "expression exceeds {MAX_EXPRESSION_LEN} characters"
        )));
    }

    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression()?;
    if let Some(t) = parser.peek() {
        return Err(GuardError::invalid(format!("unexpected token '{t}'")));
    }
    Ok(expr)
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluator
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    List(Vec<f64>),
}

/// Evaluate an arithmetic expression.
///
/// Fails with [`GuardError::InvalidExpression`] for syntax errors and anything
/// outside the allow-list, and with [`GuardError::ArithmeticError`] for
/// division by zero, overflow and domain errors.
pub fn evaluate(src: &str) -> Result<f64> {
    let expr = parse(src)?;
    match eval_node(&expr)? {
        Value::Number(n) => Ok(n),
        Value::List(_) => Err(GuardError::invalid(
            "lists are only allowed as function arguments",
        )),
    }
}

/// Evaluate an already parsed tree.
pub fn evaluate_tree(expr: &Expr) -> Result<f64> {
    match eval_node(expr)? {
        Value::Number(n) => Ok(n),
        Value::List(_) => Err(GuardError::invalid(
            "lists are only allowed as function arguments",
        )),
    }
}

fn finite(value: f64) -> Result<f64> {
    if value.is_nan() {
        Err(GuardError::arithmetic("math domain error"))
    } else if value.is_infinite() {
        Err(GuardError::arithmetic("numeric overflow"))
    } else {
        Ok(value)
    }
}

fn number(value: Value) -> Result<f64> {
    match value {
        Value::Number(n) => Ok(n),
        Value::List(_) => Err(GuardError::invalid(
            "lists are only allowed as function arguments",
        )),
    }
}

fn eval_node(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(finite(*n)?)),
        Expr::Str(_) => Err(GuardError::invalid("string literals are not allowed")),
        Expr::Name(name) => CONSTANTS
            .iter()
            .find(|(c, _)| *c == name.as_str())
            .map(|(_, v)| Value::Number(*v))
            .ok_or_else(|| GuardError::invalid(format!("unknown identifier '{name}'"))),
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match eval_node(item)? {
                    Value::Number(n) => values.push(n),
                    Value::List(_) => {
                        return Err(GuardError::invalid("nested lists are not allowed"));
                    }
                }
            }
            Ok(Value::List(values))
        }
        Expr::Unary { op, operand } => {
            let v = number(eval_node(operand)?)?;
            Ok(Value::Number(match op {
                UnaryOp::Plus => v,
                UnaryOp::Minus => -v,
            }))
        }
        Expr::Binary { op, left, right } => {
            if !op.is_arithmetic() {
                let hint = if *op == BinaryOp::BitXor {
                    " (use ** for exponentiation)"
                } else {
                    ""
                };
                return Err(GuardError::invalid(format!(
                    "operator '{}' is not allowed{hint}",
                    op.symbol()
                )));
            }
            let a = number(eval_node(left)?)?;
            let b = number(eval_node(right)?)?;
            Ok(Value::Number(apply_binary(*op, a, b)?))
        }
        Expr::Call { func, args } => {
            let name = match func.as_ref() {
                Expr::Name(name) => name,
                _ => {
                    return Err(GuardError::invalid(
                        "only direct calls to allowed functions are permitted",
                    ));
                }
            };
            if !FUNCTIONS.contains(&name.as_str()) {
                return Err(GuardError::invalid(format!(
                    "function '{name}' is not allowed"
                )));
            }
            let values = args.iter().map(eval_node).collect::<Result<Vec<_>>>()?;
            Ok(Value::Number(call_function(name, values)?))
        }
        Expr::Attribute { attr, .. } => Err(GuardError::invalid(format!(
            "attribute access is not allowed ('.{attr}')"
        ))),
        Expr::Subscript { .. } => Err(GuardError::invalid("subscripts are not allowed")),
    }
}

fn apply_binary(op: BinaryOp, a: f64, b: f64) -> Result<f64> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(GuardError::arithmetic("division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(GuardError::arithmetic("integer division by zero"));
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(GuardError::arithmetic("modulo by zero"));
            }
            // Result takes the sign of the divisor.
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(GuardError::arithmetic(
                    "zero cannot be raised to a negative power",
                ));
            }
            a.powf(b)
        }
        _ => {
            return Err(GuardError::invalid(format!(
                "operator '{}' is not allowed",
                op.symbol()
            )));
        }
    };
    finite(value)
}

fn scalar_args(name: &str, args: Vec<Value>, count: usize) -> Result<Vec<f64>> {
    if args.len() != count {
        return Err(GuardError::invalid(format!(
            "{name}() takes {count} argument(s), got {}",
            args.len()
        )));
    }
    args.into_iter().map(number).collect()
}

/// Values for aggregate functions: either a single list or scalar varargs.
fn aggregate_args(name: &str, args: Vec<Value>) -> Result<Vec<f64>> {
    match args.as_slice() {
        [Value::List(items)] => Ok(items.clone()),
        _ => args
            .into_iter()
            .map(|v| match v {
                Value::Number(n) => Ok(n),
                Value::List(_) => Err(GuardError::invalid(format!(
                    "{name}() accepts one list or several numbers"
                ))),
            })
            .collect(),
    }
}

fn call_function(name: &str, args: Vec<Value>) -> Result<f64> {
    let one = |args: Vec<Value>| scalar_args(name, args, 1).map(|v| v[0]);
    let two = |args: Vec<Value>| scalar_args(name, args, 2).map(|v| (v[0], v[1]));

    let value = match name {
        "abs" => one(args)?.abs(),
        "round" => match args.len() {
            1 => one(args)?.round_ties_even(),
            2 => {
                let (x, digits) = two(args)?;
                if digits.fract() != 0.0 || digits.abs() > 15.0 {
                    return Err(GuardError::invalid(
                        "round() digits must be an integer between -15 and 15",
                    ));
                }
                let factor = 10f64.powi(digits as i32);
                (x * factor).round_ties_even() / factor
            }
            n => {
                return Err(GuardError::invalid(format!(
                    "round() takes 1 or 2 arguments, got {n}"
                )));
            }
        },
        "min" | "max" => {
            let values = aggregate_args(name, args)?;
            if values.is_empty() {
                return Err(GuardError::invalid(format!(
                    "{name}() requires at least one value"
                )));
            }
            let fold: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            values[1..].iter().copied().fold(values[0], fold)
        }
        "sum" => aggregate_args(name, args)?.iter().sum(),
        "pow" => {
            let (a, b) = two(args)?;
            apply_binary(BinaryOp::Pow, a, b)?
        }
        "sqrt" => {
            let x = one(args)?;
            if x < 0.0 {
                return Err(GuardError::arithmetic("math domain error"));
            }
            x.sqrt()
        }
        "sin" => one(args)?.sin(),
        "cos" => one(args)?.cos(),
        "tan" => one(args)?.tan(),
        "asin" => one(args)?.asin(),
        "acos" => one(args)?.acos(),
        "atan" => one(args)?.atan(),
        "sinh" => one(args)?.sinh(),
        "cosh" => one(args)?.cosh(),
        "tanh" => one(args)?.tanh(),
        "atan2" => {
            let (y, x) = two(args)?;
            y.atan2(x)
        }
        "hypot" => {
            let (a, b) = two(args)?;
            a.hypot(b)
        }
        "degrees" => one(args)?.to_degrees(),
        "radians" => one(args)?.to_radians(),
        "log" => match args.len() {
            1 => positive(one(args)?)?.ln(),
            2 => {
                let (x, base) = two(args)?;
                let base = positive(base)?;
                if base == 1.0 {
                    return Err(GuardError::arithmetic("logarithm base cannot be 1"));
                }
                positive(x)?.ln() / base.ln()
            }
            n => {
                return Err(GuardError::invalid(format!(
                    "log() takes 1 or 2 arguments, got {n}"
                )));
            }
        },
        "log10" => positive(one(args)?)?.log10(),
        "log2" => positive(one(args)?)?.log2(),
        "exp" => one(args)?.exp(),
        "floor" => one(args)?.floor(),
        "ceil" => one(args)?.ceil(),
        other => {
            return Err(GuardError::invalid(format!(
                "function '{other}' is not allowed"
            )));
        }
    };
    finite(value)
}

fn positive(x: f64) -> Result<f64> {
    if x <= 0.0 {
        Err(GuardError::arithmetic("math domain error"))
    } else {
        Ok(x)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
