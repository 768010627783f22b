// expr.rs — Parameter expression language
//
// Parameters hold expressions (`2 * gain`, `{1, 2, 3}`, `"label"`) that are
// evaluated against the enclosing model's parameter scope when a `$val`
// macro asks for them. Lexed with `logos`, parsed with `chumsky`.
//
// Preconditions: none.
// Postconditions: `parse` yields a full expression tree or an error naming
//   every syntax problem; `evaluate` yields a value or an error.
// Failure modes: syntax errors (E0402); unknown identifiers, type mismatches
//   and integer division by zero (E0403).
// Side effects: none.

use std::fmt;

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use logos::Logos;

use crate::diag::{codes, CgError, ErrorKind, Result};
use crate::types::PtType;

// ── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum ExprToken {
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,

    /// Unsigned numeric literal; the lexeme decides int versus double.
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    /// String literal with `\"`, `\\`, `\n` and `\t` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for ExprToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprToken::True => write!(f, "true"),
            ExprToken::False => write!(f, "false"),
            ExprToken::LParen => write!(f, "("),
            ExprToken::RParen => write!(f, ")"),
            ExprToken::LBrace => write!(f, "{{"),
            ExprToken::RBrace => write!(f, "}}"),
            ExprToken::Comma => write!(f, ","),
            ExprToken::Plus => write!(f, "+"),
            ExprToken::Minus => write!(f, "-"),
            ExprToken::Star => write!(f, "*"),
            ExprToken::Slash => write!(f, "/"),
            ExprToken::Percent => write!(f, "%"),
            ExprToken::Bang => write!(f, "!"),
            ExprToken::Lt => write!(f, "<"),
            ExprToken::Le => write!(f, "<="),
            ExprToken::Gt => write!(f, ">"),
            ExprToken::Ge => write!(f, ">="),
            ExprToken::EqEq => write!(f, "=="),
            ExprToken::NotEq => write!(f, "!="),
            ExprToken::AndAnd => write!(f, "&&"),
            ExprToken::OrOr => write!(f, "||"),
            ExprToken::Number(v) => write!(f, "{v}"),
            ExprToken::StringLit(s) => write!(f, "\"{s}\""),
            ExprToken::Ident => write!(f, "<ident>"),
        }
    }
}

fn parse_number(lex: &mut logos::Lexer<'_, ExprToken>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, ExprToken>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Syntax tree ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Ident(String),
    Array(Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

// ── Parser ──────────────────────────────────────────────────────────────────

/// Parse an expression string into a syntax tree.
pub fn parse(source: &str) -> Result<Expr> {
    let mut tokens = Vec::new();
    for (result, range) in ExprToken::lexer(source).spanned() {
        match result {
            Ok(tok) => tokens.push((tok, SimpleSpan::from(range))),
            Err(()) => {
                return Err(CgError::new(
                    ErrorKind::Expression,
                    format!(
                        "unexpected character {:?} in expression \"{}\"",
                        &source[range.clone()],
                        source
                    ),
                )
                .with_code(codes::E0402))
            }
        }
    }

    let len = source.len();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(tokens.into_iter()).map(eoi, |(t, s): (_, _)| (t, s));

    let (expr, errors) = expr_parser(source)
        .then_ignore(end())
        .parse(stream)
        .into_output_errors();

    match expr {
        Some(expr) if errors.is_empty() => Ok(expr),
        _ => {
            let mut err = CgError::new(
                ErrorKind::Expression,
                format!("failed to parse expression \"{}\"", source),
            )
            .with_code(codes::E0402);
            for e in errors {
                err = err.with_cause(e.to_string(), None);
            }
            Err(err)
        }
    }
}

fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, ExprToken, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = ExprToken, Span = SimpleSpan>,
{
    recursive(|expr| {
        let literal = select! {
            ExprToken::Number(n) = e => {
                let span: SimpleSpan = e.span();
                let lexeme = &source[span.start()..span.end()];
                if lexeme.contains('.') || lexeme.contains('e') || lexeme.contains('E') {
                    Expr::Double(n)
                } else {
                    Expr::Int(n as i64)
                }
            },
            ExprToken::StringLit(s) => Expr::Str(s),
            ExprToken::True => Expr::Bool(true),
            ExprToken::False => Expr::Bool(false),
        };

        let ident = just(ExprToken::Ident).map_with(move |_, e| {
            let span: SimpleSpan = e.span();
            Expr::Ident(source[span.start()..span.end()].to_string())
        });

        let array = expr
            .clone()
            .separated_by(just(ExprToken::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(ExprToken::LBrace), just(ExprToken::RBrace))
            .map(Expr::Array);

        let atom = choice((
            literal,
            ident,
            array,
            expr.clone()
                .delimited_by(just(ExprToken::LParen), just(ExprToken::RParen)),
        ));

        let unary = choice((
            just(ExprToken::Minus).to(UnOp::Neg),
            just(ExprToken::Bang).to(UnOp::Not),
        ))
        .repeated()
        .foldr(atom, |op, rhs| Expr::Unary(op, Box::new(rhs)));

        let fold = |lhs: Expr, (op, rhs): (BinOp, Expr)| Expr::Binary(op, Box::new(lhs), Box::new(rhs));

        let product = unary.clone().foldl(
            choice((
                just(ExprToken::Star).to(BinOp::Mul),
                just(ExprToken::Slash).to(BinOp::Div),
                just(ExprToken::Percent).to(BinOp::Rem),
            ))
            .then(unary)
            .repeated(),
            fold,
        );

        let sum = product.clone().foldl(
            choice((
                just(ExprToken::Plus).to(BinOp::Add),
                just(ExprToken::Minus).to(BinOp::Sub),
            ))
            .then(product)
            .repeated(),
            fold,
        );

        let comparison = sum.clone().foldl(
            choice((
                just(ExprToken::Le).to(BinOp::Le),
                just(ExprToken::Ge).to(BinOp::Ge),
                just(ExprToken::Lt).to(BinOp::Lt),
                just(ExprToken::Gt).to(BinOp::Gt),
                just(ExprToken::EqEq).to(BinOp::Eq),
                just(ExprToken::NotEq).to(BinOp::Ne),
            ))
            .then(sum)
            .repeated(),
            fold,
        );

        let conjunction = comparison.clone().foldl(
            just(ExprToken::AndAnd)
                .to(BinOp::And)
                .then(comparison)
                .repeated(),
            fold,
        );

        conjunction.clone().foldl(
            just(ExprToken::OrOr)
                .to(BinOp::Or)
                .then(conjunction)
                .repeated(),
            fold,
        )
    })
}

// ── Values ──────────────────────────────────────────────────────────────────

/// An evaluated parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn pt_type(&self) -> PtType {
        match self {
            Value::Boolean(_) => PtType::Boolean,
            Value::Int(_) => PtType::Int,
            Value::Long(_) => PtType::Long,
            Value::Double(_) => PtType::Double,
            Value::Str(_) => PtType::String,
            Value::Array(items) => {
                let mut elem: Option<PtType> = None;
                for item in items {
                    let t = item.pt_type();
                    elem = Some(match elem {
                        None => t,
                        Some(prev) if prev == t => prev,
                        Some(prev) if is_numeric(&prev) && is_numeric(&t) => PtType::Double,
                        Some(_) => PtType::General,
                    });
                }
                PtType::Array(Box::new(elem.unwrap_or(PtType::Unknown)))
            }
        }
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Value::Int(_) => Some(0),
            Value::Long(_) => Some(1),
            Value::Double(_) => Some(2),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }
}

fn is_numeric(t: &PtType) -> bool {
    matches!(t, PtType::Int | PtType::Long | PtType::Double)
}

impl fmt::Display for Value {
    /// Renders in expression syntax: `3`, `3L`, `2.0`, `"s"`, `{1, 2}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}L"),
            Value::Double(v) => write!(f, "{}", format_double(*v)),
            Value::Str(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Value::Array(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Format a double so that it always reads back as a double.
pub fn format_double(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

// ── Evaluation ──────────────────────────────────────────────────────────────

/// Resolves identifiers during evaluation.
pub trait Scope {
    /// `Ok(None)` if the name is not defined in this scope.
    fn resolve(&self, name: &str) -> Result<Option<Value>>;
}

/// A scope with no bindings.
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn resolve(&self, _name: &str) -> Result<Option<Value>> {
        Ok(None)
    }
}

fn eval_error(message: impl Into<String>) -> CgError {
    CgError::new(ErrorKind::Expression, message).with_code(codes::E0403)
}

pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value> {
    match expr {
        Expr::Int(v) => Ok(match i32::try_from(*v) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Long(*v),
        }),
        Expr::Double(v) => Ok(Value::Double(*v)),
        Expr::Bool(b) => Ok(Value::Boolean(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Ident(name) => match scope.resolve(name)? {
            Some(v) => Ok(v),
            None => match name.as_str() {
                "PI" | "pi" => Ok(Value::Double(std::f64::consts::PI)),
                "E" | "e" => Ok(Value::Double(std::f64::consts::E)),
                _ => Err(eval_error(format!("unknown identifier '{}'", name))),
            },
        },
        Expr::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|e| evaluate(e, scope))
                .collect::<Result<Vec<_>>>()?,
        )),
        Expr::Unary(op, operand) => {
            let v = evaluate(operand, scope)?;
            match (op, v) {
                (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
                (UnOp::Neg, Value::Long(i)) => Ok(Value::Long(i.wrapping_neg())),
                (UnOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
                (UnOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                (op, v) => Err(eval_error(format!(
                    "operator {:?} does not apply to {}",
                    op,
                    v.pt_type()
                ))),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = evaluate(lhs, scope)?;
            let r = evaluate(rhs, scope)?;
            binary(*op, l, r)
        }
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value> {
    use BinOp::*;

    match op {
        And | Or => {
            return match (&l, &r) {
                (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(if op == And {
                    *a && *b
                } else {
                    *a || *b
                })),
                _ => Err(eval_error(format!(
                    "logical operator needs booleans, found {} and {}",
                    l.pt_type(),
                    r.pt_type()
                ))),
            };
        }
        Add => {
            if let (Value::Str(a), b) | (b, Value::Str(a)) = (&l, &r) {
                let b = match b {
                    Value::Str(s) => s.clone(),
                    other => other.to_string(),
                };
                return Ok(Value::Str(if matches!(l, Value::Str(_)) {
                    format!("{}{}", a, b)
                } else {
                    format!("{}{}", b, a)
                }));
            }
        }
        Eq | Ne => {
            if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
                return Ok(Value::Boolean((a == b) == (op == Eq)));
            }
            return Ok(Value::Boolean((l == r) == (op == Eq)));
        }
        _ => {}
    }

    let rank = match (l.rank(), r.rank()) {
        (Some(a), Some(b)) => a.max(b),
        _ => {
            return Err(eval_error(format!(
                "operator {:?} does not apply to {} and {}",
                op,
                l.pt_type(),
                r.pt_type()
            )))
        }
    };

    if matches!(op, Lt | Le | Gt | Ge) {
        let (a, b) = (l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0));
        return Ok(Value::Boolean(match op {
            Lt => a < b,
            Le => a <= b,
            Gt => a > b,
            _ => a >= b,
        }));
    }

    if rank == 2 {
        let (a, b) = (l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0));
        return Ok(Value::Double(match op {
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => a / b,
            _ => a % b,
        }));
    }

    let (a, b) = (l.as_i64().unwrap_or(0), r.as_i64().unwrap_or(0));
    if matches!(op, Div | Rem) && b == 0 {
        return Err(eval_error("integer division by zero"));
    }
    let v = match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        Mul => a.wrapping_mul(b),
        Div => a.wrapping_div(b),
        _ => a.wrapping_rem(b),
    };
    if rank == 0 {
        Ok(Value::Int(v as i32))
    } else {
        Ok(Value::Long(v))
    }
}

/// Parse and evaluate in one step.
pub fn eval_str(source: &str, scope: &dyn Scope) -> Result<Value> {
    evaluate(&parse(source)?, scope)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapScope(HashMap<&'static str, Value>);

    impl Scope for MapScope {
        fn resolve(&self, name: &str) -> Result<Option<Value>> {
            Ok(self.0.get(name).cloned())
        }
    }

    fn eval(src: &str) -> Value {
        eval_str(src, &EmptyScope).unwrap()
    }

    #[test]
    fn literals() {
        assert_eq!(eval("3"), Value::Int(3));
        assert_eq!(eval("2.5"), Value::Double(2.5));
        assert_eq!(eval("1e3"), Value::Double(1000.0));
        assert_eq!(eval("true"), Value::Boolean(true));
        assert_eq!(eval("\"a\\\"b\""), Value::Str("a\"b".to_string()));
        assert_eq!(eval("5000000000"), Value::Long(5_000_000_000));
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval("-2 * -3"), Value::Int(6));
        assert_eq!(eval("7 % 4 - 1"), Value::Int(2));
    }

    #[test]
    fn promotion() {
        assert_eq!(eval("1 + 0.5"), Value::Double(1.5));
        assert_eq!(eval("7 / 2"), Value::Int(3));
        assert_eq!(eval("7.0 / 2"), Value::Double(3.5));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("1 < 2 && 2 <= 2"), Value::Boolean(true));
        assert_eq!(eval("1 == 1.0"), Value::Boolean(true));
        assert_eq!(eval("!(3 > 4) || false"), Value::Boolean(true));
    }

    #[test]
    fn string_concat() {
        assert_eq!(eval("\"n=\" + 3"), Value::Str("n=3".to_string()));
    }

    #[test]
    fn arrays() {
        let v = eval("{1, 2, 3,}");
        assert_eq!(v, Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        assert_eq!(v.pt_type(), PtType::Array(Box::new(PtType::Int)));
        assert_eq!(eval("{1, 2.5}").pt_type(), PtType::Array(Box::new(PtType::Double)));
        assert_eq!(v.to_string(), "{1, 2, 3}");
    }

    #[test]
    fn identifiers_from_scope() {
        let scope = MapScope(HashMap::from([("gain", Value::Double(2.0))]));
        assert_eq!(eval_str("gain * 3", &scope).unwrap(), Value::Double(6.0));
        let err = eval_str("offset + 1", &scope).unwrap_err();
        assert_eq!(err.code, Some(codes::E0403));
    }

    #[test]
    fn syntax_errors() {
        let err = parse("1 +").unwrap_err();
        assert_eq!(err.code, Some(codes::E0402));
        assert!(!err.cause_chain.is_empty());
        assert!(parse("1 # 2").is_err());
    }

    #[test]
    fn division_by_zero() {
        assert!(eval_str("1 / 0", &EmptyScope).is_err());
        assert_eq!(eval("1.0 / 0"), Value::Double(f64::INFINITY));
    }

    #[test]
    fn double_display_keeps_point() {
        assert_eq!(Value::Double(2.0).to_string(), "2.0");
        assert_eq!(Value::Double(0.25).to_string(), "0.25");
        assert_eq!(Value::Long(4).to_string(), "4L");
    }
}
