//! Transform expressions applied to channel values.
//!
//! Bindings carry a small arithmetic expression over one implicit input `x`,
//! the channel's value for the case being provisioned. Expressions are parsed
//! into a closed AST and evaluated by [`Transform::apply`]; nothing from the
//! configuration text is ever executed.
//!
//! ```text
//! 2.0 * x
//! -x / 3 + 0.5
//! min(max(x, -1), 1)
//! math.sqrt(x) ** 2
//! ```

use std::fmt;

use crate::error::{CampaignError, CampaignResult};

/// Name of the implicit input variable.
pub const INPUT_VARIABLE: &str = "x";

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

/// Allow-listed functions callable from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Round,
    Pow,
    Min,
    Max,
    Clamp,
}

/// Accepted argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        // Accept the `math.` prefix used by older configuration sheets.
        let name = name.strip_prefix("math.").unwrap_or(name);
        let func = match name {
            "abs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "exp" => Self::Exp,
            "ln" | "log" => Self::Ln,
            "log10" => Self::Log10,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" => Self::Round,
            "pow" => Self::Pow,
            "min" => Self::Min,
            "max" => Self::Max,
            "clamp" => Self::Clamp,
            _ => return None,
        };
        Some(func)
    }

    fn arity(self) -> Arity {
        match self {
            Self::Pow => Arity::Exactly(2),
            Self::Clamp => Arity::Exactly(3),
            Self::Min | Self::Max => Arity::AtLeast(1),
            _ => Arity::Exactly(1),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Log10 => "log10",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Pow => "pow",
            Self::Min => "min",
            Self::Max => "max",
            Self::Clamp => "clamp",
        }
    }

    fn call(self, args: &[f64]) -> f64 {
        match self {
            Self::Abs => args[0].abs(),
            Self::Sqrt => args[0].sqrt(),
            Self::Exp => args[0].exp(),
            Self::Ln => args[0].ln(),
            Self::Log10 => args[0].log10(),
            Self::Sin => args[0].sin(),
            Self::Cos => args[0].cos(),
            Self::Tan => args[0].tan(),
            Self::Floor => args[0].floor(),
            Self::Ceil => args[0].ceil(),
            Self::Round => args[0].round(),
            Self::Pow => args[0].powf(args[1]),
            Self::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Clamp => args[0].max(args[1]).min(args[2]),
        }
    }
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal (named constants are folded into literals)
    Number(f64),
    /// The implicit input `x`
    Input,
    /// Unary minus
    Neg(Box<Expr>),
    /// Binary arithmetic
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Call to an allow-listed function
    Call { func: Function, args: Vec<Expr> },
}

impl Expr {
    /// Evaluate with `x` bound to `input`.
    pub fn eval(&self, input: f64) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Input => input,
            Expr::Neg(inner) => -inner.eval(input),
            Expr::Binary { op, left, right } => {
                let l = left.eval(input);
                let r = right.eval(input);
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Rem => l % r,
                    BinaryOp::Pow => l.powf(r),
                }
            }
            Expr::Call { func, args } => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(input)).collect();
                func.call(&values)
            }
        }
    }
}

/// A parsed transform together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    source: String,
    expr: Expr,
}

impl Transform {
    /// Parse a transform expression.
    pub fn parse(source: &str) -> CampaignResult<Self> {
        let expr = parse(source).map_err(|e| CampaignError::InvalidExpression {
            expression: source.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// The identity transform `x`.
    pub fn identity() -> Self {
        Self {
            source: INPUT_VARIABLE.to_string(),
            expr: Expr::Input,
        }
    }

    /// Source text as written in the configuration.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed expression tree.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate with `x` bound to `input`. Non-finite results are rejected.
    pub fn apply(&self, input: f64) -> CampaignResult<f64> {
        let value = self.expr.eval(input);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CampaignError::Evaluation(format!(
                "'{}' with x = {} yields {}",
                self.source, input, value
            )))
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse failure with the byte offset where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for ExprError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let start = i;
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
                continue;
            }
            '+' => tokens.push((Token::Plus, start)),
            '-' => tokens.push((Token::Minus, start)),
            '*' => {
                // `**` is accepted as power
                if bytes.get(i + 1) == Some(&b'*') {
                    i += 1;
                    tokens.push((Token::Caret, start));
                } else {
                    tokens.push((Token::Star, start));
                }
            }
            '/' => tokens.push((Token::Slash, start)),
            '%' => tokens.push((Token::Percent, start)),
            '^' => tokens.push((Token::Caret, start)),
            '(' => tokens.push((Token::LParen, start)),
            ')' => tokens.push((Token::RParen, start)),
            ',' => tokens.push((Token::Comma, start)),
            c if c.is_ascii_digit() || c == '.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                // Exponent part: 1e-3, 2.5E+4
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text = &source[start..i];
                let value = text.parse::<f64>().map_err(|_| ExprError {
                    message: format!("invalid number '{}'", text),
                    offset: start,
                })?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                {
                    i += 1;
                }
                tokens.push((Token::Ident(source[start..i].to_string()), start));
                continue;
            }
            other => {
                return Err(ExprError {
                    message: format!("unexpected character '{}'", other),
                    offset: start,
                })
            }
        }
        i += 1;
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinaryOp)> {
    match token {
        Token::Plus => Some((10, Assoc::Left, BinaryOp::Add)),
        Token::Minus => Some((10, Assoc::Left, BinaryOp::Sub)),
        Token::Star => Some((20, Assoc::Left, BinaryOp::Mul)),
        Token::Slash => Some((20, Assoc::Left, BinaryOp::Div)),
        Token::Percent => Some((20, Assoc::Left, BinaryOp::Rem)),
        Token::Caret => Some((40, Assoc::Right, BinaryOp::Pow)),
        _ => None,
    }
}

/// Unary minus binds looser than `^` so that `-x^2` is `-(x^2)`.
const UNARY_PREC: u8 = 30;

struct Parser<'a> {
    tokens: &'a [(Token, usize)],
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExprError> {
        match self.peek() {
            Some(t) if *t == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => Err(self.error(format!("expected {}, found {:?}", what, t))),
            None => Err(self.error(format!("expected {}, found end of input", what))),
        }
    }

    fn parse_pratt(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut left = self.parse_prefix()?;

        while let Some(token) = self.peek() {
            let Some((prec, assoc, op)) = binary_op_info(token) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();

            let next_prec = if assoc == Assoc::Left { prec + 1 } else { prec };
            let right = self.parse_pratt(next_prec)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let operand = self.parse_pratt(UNARY_PREC)?;
                Ok(Expr::Neg(Box::new(operand)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_pratt(UNARY_PREC)
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_pratt(0)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    return self.parse_call(&name, offset);
                }
                match name.as_str() {
                    INPUT_VARIABLE => Ok(Expr::Input),
                    "pi" | "math.pi" => Ok(Expr::Number(std::f64::consts::PI)),
                    "e" | "math.e" => Ok(Expr::Number(std::f64::consts::E)),
                    _ => Err(ExprError {
                        message: format!("unknown identifier '{}'", name),
                        offset,
                    }),
                }
            }
            Some(token) => Err(ExprError {
                message: format!("unexpected {:?}", token),
                offset,
            }),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_call(&mut self, name: &str, offset: usize) -> Result<Expr, ExprError> {
        let func = Function::from_name(name).ok_or_else(|| ExprError {
            message: format!("unknown function '{}'", name),
            offset,
        })?;
        self.expect(Token::LParen, "'('")?;

        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                args.push(self.parse_pratt(0)?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;

        let ok = match func.arity() {
            Arity::Exactly(n) => args.len() == n,
            Arity::AtLeast(n) => args.len() >= n,
        };
        if !ok {
            return Err(ExprError {
                message: format!("wrong number of arguments to {}: {}", func.name(), args.len()),
                offset,
            });
        }

        Ok(Expr::Call { func, args })
    }
}

/// Parse an expression string into an [`Expr`].
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.parse_pratt(0)?;
    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected trailing {:?}", token)));
    }
    Ok(expr)
}
