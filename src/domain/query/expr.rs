//! Derived-expression grammar
//!
//! A hand-written tokenizer and recursive-descent parser over a closed
//! token set: `+ - * /`, parentheses, integer/decimal literals,
//! identifiers, and the functions `nullif`, `coalesce`, `round`, `abs`.
//! Anything else is rejected before SQL emission, so derived expressions
//! never reach the SQL engine's own parser. Emission walks the parsed tree
//! with every identifier quoted.
//!
//! Grammar:
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := NUMBER | IDENT | IDENT '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use std::fmt;

use crate::utils::sql::quote_ident;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(String),
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
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

/// Expression rejection; the reason is surfaced inside a BAD_SPEC error
#[derive(Debug, Clone, PartialEq)]
pub struct ExprError {
    pub reason: String,
}

impl ExprError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Functions admissible inside derived expressions, with arity bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Nullif,
    Coalesce,
    Round,
    Abs,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "nullif" => Some(Self::Nullif),
            "coalesce" => Some(Self::Coalesce),
            "round" => Some(Self::Round),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    pub const fn sql_name(&self) -> &'static str {
        match self {
            Self::Nullif => "nullif",
            Self::Coalesce => "coalesce",
            Self::Round => "round",
            Self::Abs => "abs",
        }
    }

    const fn arity(&self) -> (usize, usize) {
        match self {
            Self::Nullif => (2, 2),
            Self::Coalesce => (2, usize::MAX),
            Self::Round => (2, 2),
            Self::Abs => (1, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(String),
    Ident(String),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// All identifiers referenced by the expression, in encounter order
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Ident(name) => out.push(name),
            Expr::Binary { left, right, .. } => {
                left.collect_identifiers(out);
                right.collect_identifiers(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
        }
    }

    /// Re-serialize the tree as SQL with quoted identifiers.
    ///
    /// Binary nodes are parenthesized so the emitted string carries the
    /// parsed precedence regardless of the engine's.
    pub fn to_sql(&self) -> String {
        match self {
            Expr::Number(n) => n.clone(),
            Expr::Ident(name) => quote_ident(name),
            Expr::Binary { op, left, right } => {
                format!("({} {} {})", left.to_sql(), op.as_sql(), right.to_sql())
            }
            Expr::Call { func, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_sql()).collect();
                format!("{}({})", func.sql_name(), args.join(", "))
            }
        }
    }
}

/// Split the expression into tokens, rejecting anything outside the set
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '0'..='9' => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&'.') {
                    number.push('.');
                    chars.next();
                    let mut fraction = false;
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_digit() {
                            number.push(d);
                            fraction = true;
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if !fraction {
                        return Err(ExprError::new(format!("malformed number: {number:?}")));
                    }
                }
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(ExprError::new(format!("unexpected character: {other:?}")));
            }
        }
    }

    if tokens.is_empty() {
        return Err(ExprError::new("empty expression"));
    }
    Ok(tokens)
}

/// Parse an expression string into its tree
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::new(format!(
            "unexpected trailing token: {}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExprError::new(format!(
                "expected {expected}, found {token}"
            ))),
            None => Err(ExprError::new(format!(
                "expected {expected}, found end of expression"
            ))),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(BinOp::Add),
            Some(Token::Minus) => Some(BinOp::Sub),
            _ => None,
        } {
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.factor()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(BinOp::Mul),
            Some(Token::Slash) => Some(BinOp::Div),
            _ => None,
        } {
            self.pos += 1;
            let right = self.factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.call(&name)
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(ExprError::new(format!("unexpected token: {token}"))),
            None => Err(ExprError::new("unexpected end of expression")),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, ExprError> {
        let func = Func::from_name(name)
            .ok_or_else(|| ExprError::new(format!("unknown function: {name}")))?;
        self.expect(Token::LParen)?;

        let mut args = vec![self.expr()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            args.push(self.expr()?);
        }
        self.expect(Token::RParen)?;

        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(ExprError::new(format!(
                "{} expects {} argument(s), got {}",
                func.sql_name(),
                if min == max {
                    min.to_string()
                } else {
                    format!("at least {min}")
                },
                args.len()
            )));
        }
        Ok(Expr::Call { func, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_with_precedence() {
        let expr = parse("a + b * 2").unwrap();
        assert_eq!(expr.to_sql(), "(\"a\" + (\"b\" * 2))");
    }

    #[test]
    fn parses_parentheses() {
        let expr = parse("(a + b) * 2").unwrap();
        assert_eq!(expr.to_sql(), "((\"a\" + \"b\") * 2)");
    }

    #[test]
    fn parses_division_with_nullif() {
        let expr = parse("quality_cnt / nullif(total, 0)").unwrap();
        assert_eq!(expr.to_sql(), "(\"quality_cnt\" / nullif(\"total\", 0))");
        assert_eq!(expr.identifiers(), vec!["quality_cnt", "total"]);
    }

    #[test]
    fn parses_decimal_literals() {
        let expr = parse("round(rate * 100.5, 2)").unwrap();
        assert_eq!(expr.to_sql(), "round((\"rate\" * 100.5), 2)");
    }

    #[test]
    fn parses_coalesce_varargs() {
        let expr = parse("coalesce(a, b, 0)").unwrap();
        assert_eq!(expr.to_sql(), "coalesce(\"a\", \"b\", 0)");
    }

    #[test]
    fn parses_unicode_identifiers() {
        let expr = parse("退货数量 / nullif(销售数量, 0)").unwrap();
        assert_eq!(expr.identifiers(), vec!["退货数量", "销售数量"]);
    }

    #[test]
    fn rejects_unknown_functions() {
        let err = parse("exec(a)").unwrap_err();
        assert!(err.reason.contains("unknown function"));
        assert!(parse("sqrt(a)").is_err());
    }

    #[test]
    fn rejects_foreign_tokens() {
        assert!(parse("a; drop table x").is_err());
        assert!(parse("a -- comment").is_err());
        assert!(parse("'str'").is_err());
        assert!(parse("a = b").is_err());
        assert!(parse("a % b").is_err());
    }

    #[test]
    fn rejects_unary_minus() {
        // Negative literals are not in the grammar
        assert!(parse("-1").is_err());
        assert!(parse("a * -2").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("a +").is_err());
        assert!(parse("(a + b").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("1.").is_err());
        assert!(parse("nullif(a)").is_err());
        assert!(parse("abs(a, b)").is_err());
        assert!(parse("round(a)").is_err());
    }

    #[test]
    fn quotes_embedded_quotes_in_identifiers() {
        let expr = Expr::Ident("we\"ird".to_string());
        assert_eq!(expr.to_sql(), "\"we\"\"ird\"");
    }
}
