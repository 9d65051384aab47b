//! Pixel expressions for apply-pixel and filter-pixel.
//!
//! Formulas reference bands by name, e.g. `(B08 - B04) / (B08 + B04)` or
//! `B04 > 0.1 && !isnan(B08)`. Band names are resolved to indices when the
//! expression is compiled, so evaluation only indexes a slice of band values.
//!
//! Booleans are `1.0` and `0.0`. Comparisons and logical operators with a
//! nodata operand yield nodata.

use crate::error::{CubeError, Result};

/// A token in the parsed expression
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sqrt,
    Exp,
    Log,
    Log10,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    IsNan,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        let f = match name {
            "abs" => (Func::Abs, 1),
            "sqrt" => (Func::Sqrt, 1),
            "exp" => (Func::Exp, 1),
            "log" => (Func::Log, 1),
            "log10" => (Func::Log10, 1),
            "sin" => (Func::Sin, 1),
            "cos" => (Func::Cos, 1),
            "tan" => (Func::Tan, 1),
            "floor" => (Func::Floor, 1),
            "ceil" => (Func::Ceil, 1),
            "round" => (Func::Round, 1),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            "isnan" => (Func::IsNan, 1),
            _ => return None,
        };
        Some(f)
    }
}

/// A node in the expression AST
#[derive(Debug, Clone)]
enum Expr {
    Num(f64),
    Band(usize),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Bin {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call(Func, Vec<Expr>),
}

fn tokenize(formula: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = formula.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
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
            '+' | '-' | '*' | '/' | '%' | '^' => {
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    _ => "^",
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                let (op, len) = match (c, next) {
                    ('<', Some('=')) => ("<=", 2),
                    ('>', Some('=')) => (">=", 2),
                    ('=', Some('=')) => ("==", 2),
                    ('!', Some('=')) => ("!=", 2),
                    ('<', _) => ("<", 1),
                    ('>', _) => (">", 1),
                    ('!', _) => ("!", 1),
                    _ => {
                        return Err(CubeError::config(format!(
                            "unexpected '=' at position {} in '{}'",
                            i, formula
                        )))
                    }
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            '&' | '|' => {
                if next != Some(c) {
                    return Err(CubeError::config(format!(
                        "unexpected '{}' at position {} in '{}'",
                        c, i, formula
                    )));
                }
                tokens.push(Token::Op(if c == '&' { "&&" } else { "||" }));
                i += 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent part, e.g. 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let num_str: String = chars[start..i].iter().collect();
                let num = num_str
                    .parse::<f64>()
                    .map_err(|_| CubeError::config(format!("invalid number '{}'", num_str)))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c => {
                return Err(CubeError::config(format!(
                    "unexpected character '{}' in '{}'",
                    c, formula
                )))
            }
        }
    }

    Ok(tokens)
}

/// Recursive descent parser, lowest precedence first:
/// `||`, `&&`, comparisons, `+ -`, `* / %`, unary, `^`.
struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    bands: &'a [String],
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(CubeError::config(format!(
                "expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn binary(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        while let Some(op) = self
            .peek_op()
            .and_then(|o| ops.iter().find(|(s, _)| *s == o).map(|(_, b)| *b))
        {
            self.pos += 1;
            let right = next(self)?;
            left = Expr::Bin {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.binary(&[("||", BinOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.binary(&[("&&", BinOp::And)], Self::parse_cmp)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        self.binary(
            &[
                ("<", BinOp::Lt),
                ("<=", BinOp::Le),
                (">", BinOp::Gt),
                (">=", BinOp::Ge),
                ("==", BinOp::Eq),
                ("!=", BinOp::Ne),
            ],
            Self::parse_add,
        )
    }

    fn parse_add(&mut self) -> Result<Expr> {
        self.binary(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::parse_mul)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        self.binary(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some("+") => {
                self.pos += 1;
                self.parse_unary()
            }
            Some("!") => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_pow(),
        }
    }

    fn parse_pow(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if self.peek_op() == Some("^") {
            self.pos += 1;
            // right associative
            let exponent = self.parse_unary()?;
            return Ok(Expr::Bin {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Num(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    return self.parse_call(&name);
                }
                if let Some(i) = self.bands.iter().position(|b| *b == name) {
                    return Ok(Expr::Band(i));
                }
                match name.as_str() {
                    "pi" => Ok(Expr::Num(std::f64::consts::PI)),
                    "nan" => Ok(Expr::Num(f64::NAN)),
                    _ => Err(CubeError::config(format!(
                        "unknown band '{}' (available: {})",
                        name,
                        self.bands.join(", ")
                    ))),
                }
            }
            other => Err(CubeError::config(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr> {
        let (func, arity) = Func::lookup(name)
            .ok_or_else(|| CubeError::config(format!("unknown function '{}'", name)))?;
        self.expect(Token::LParen)?;
        let mut args = vec![self.parse_or()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            args.push(self.parse_or()?);
        }
        self.expect(Token::RParen)?;
        if args.len() != arity {
            return Err(CubeError::config(format!(
                "{}() takes {} argument(s), got {}",
                name,
                arity,
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval(e: &Expr, bands: &[f64]) -> f64 {
    match e {
        Expr::Num(n) => *n,
        Expr::Band(i) => bands[*i],
        Expr::Neg(inner) => -eval(inner, bands),
        Expr::Not(inner) => {
            let v = eval(inner, bands);
            if v.is_nan() {
                f64::NAN
            } else {
                truth(v == 0.0)
            }
        }
        Expr::Bin { op, left, right } => {
            let l = eval(left, bands);
            let r = eval(right, bands);
            match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
                BinOp::Rem => l % r,
                BinOp::Pow => l.powf(r),
                _ if l.is_nan() || r.is_nan() => f64::NAN,
                BinOp::Lt => truth(l < r),
                BinOp::Le => truth(l <= r),
                BinOp::Gt => truth(l > r),
                BinOp::Ge => truth(l >= r),
                BinOp::Eq => truth(l == r),
                BinOp::Ne => truth(l != r),
                BinOp::And => truth(l != 0.0 && r != 0.0),
                BinOp::Or => truth(l != 0.0 || r != 0.0),
            }
        }
        Expr::Call(func, args) => {
            let a = eval(&args[0], bands);
            match func {
                Func::Abs => a.abs(),
                Func::Sqrt => a.sqrt(),
                Func::Exp => a.exp(),
                Func::Log => a.ln(),
                Func::Log10 => a.log10(),
                Func::Sin => a.sin(),
                Func::Cos => a.cos(),
                Func::Tan => a.tan(),
                Func::Floor => a.floor(),
                Func::Ceil => a.ceil(),
                Func::Round => a.round(),
                Func::IsNan => truth(a.is_nan()),
                Func::Min | Func::Max => {
                    let b = eval(&args[1], bands);
                    if a.is_nan() || b.is_nan() {
                        f64::NAN
                    } else if *func == Func::Min {
                        a.min(b)
                    } else {
                        a.max(b)
                    }
                }
            }
        }
    }
}

fn collect_bands(e: &Expr, out: &mut Vec<usize>) {
    match e {
        Expr::Band(i) => {
            if !out.contains(i) {
                out.push(*i);
            }
        }
        Expr::Num(_) => {}
        Expr::Neg(inner) | Expr::Not(inner) => collect_bands(inner, out),
        Expr::Bin { left, right, .. } => {
            collect_bands(left, out);
            collect_bands(right, out);
        }
        Expr::Call(_, args) => args.iter().for_each(|a| collect_bands(a, out)),
    }
}

/// A compiled pixel expression.
#[derive(Debug, Clone)]
pub struct PixelExpr {
    source: String,
    root: Expr,
}

impl PixelExpr {
    /// Compile `formula` against the given band names.
    pub fn compile(formula: &str, bands: &[String]) -> Result<Self> {
        let tokens = tokenize(formula)?;
        if tokens.is_empty() {
            return Err(CubeError::config("empty expression"));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            bands,
        };
        let root = parser.parse_or()?;
        if let Some(t) = parser.peek() {
            return Err(CubeError::config(format!(
                "unexpected trailing {:?} in '{}'",
                t, formula
            )));
        }
        Ok(Self {
            source: formula.to_string(),
            root,
        })
    }

    /// Evaluate for one pixel; `bands` holds the value of every input band.
    #[inline]
    pub fn eval(&self, bands: &[f64]) -> f64 {
        eval(&self.root, bands)
    }

    /// Evaluate as a predicate: nodata counts as false.
    #[inline]
    pub fn test(&self, bands: &[f64]) -> bool {
        let v = self.eval(bands);
        !v.is_nan() && v != 0.0
    }

    /// Indices of the bands the expression reads.
    pub fn referenced_bands(&self) -> Vec<usize> {
        let mut out = Vec::new();
        collect_bands(&self.root, &mut out);
        out.sort_unstable();
        out
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    fn eval_str(formula: &str, values: &[f64]) -> f64 {
        PixelExpr::compile(formula, &names(&["B04", "B08"]))
            .unwrap()
            .eval(values)
    }

    #[test]
    fn test_ndvi() {
        let v = eval_str("(B08 - B04) / (B08 + B04)", &[0.1, 0.5]);
        assert!((v - 0.4 / 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_str("1 + 2 * 3", &[0.0, 0.0]), 7.0);
        assert_eq!(eval_str("2 ^ 3 ^ 2", &[0.0, 0.0]), 512.0);
        assert_eq!(eval_str("-2 ^ 2", &[0.0, 0.0]), -4.0);
        assert_eq!(eval_str("7 % 4 + 1e1", &[0.0, 0.0]), 13.0);
        assert_eq!(eval_str("1 < 2 && 3 >= 3 || 0", &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_functions_and_constants() {
        assert_eq!(eval_str("max(B04, B08)", &[1.0, 2.0]), 2.0);
        assert_eq!(eval_str("abs(B04 - B08)", &[1.0, 3.0]), 2.0);
        assert_eq!(eval_str("isnan(B04)", &[f64::NAN, 0.0]), 1.0);
        assert!((eval_str("cos(pi)", &[0.0, 0.0]) + 1.0).abs() < 1e-12);
        assert!(eval_str("nan + 1", &[0.0, 0.0]).is_nan());
    }

    #[test]
    fn test_nodata_propagation() {
        assert!(eval_str("B04 * 2", &[f64::NAN, 0.0]).is_nan());
        assert!(eval_str("B04 > 0", &[f64::NAN, 0.0]).is_nan());
        assert!(eval_str("!(B04 > 0)", &[f64::NAN, 0.0]).is_nan());
        let p = PixelExpr::compile("B04 > 0", &names(&["B04"])).unwrap();
        assert!(!p.test(&[f64::NAN]));
        assert!(p.test(&[1.0]));
    }

    #[test]
    fn test_errors_at_compile_time() {
        let bands = names(&["B04"]);
        assert!(PixelExpr::compile("B05 + 1", &bands).is_err());
        assert!(PixelExpr::compile("(B04 + 1", &bands).is_err());
        assert!(PixelExpr::compile("B04 +", &bands).is_err());
        assert!(PixelExpr::compile("B04 = 1", &bands).is_err());
        assert!(PixelExpr::compile("sqrt(B04, 2)", &bands).is_err());
        assert!(PixelExpr::compile("foo(B04)", &bands).is_err());
        assert!(PixelExpr::compile("", &bands).is_err());
        assert!(PixelExpr::compile("B04 B04", &bands).is_err());
    }

    #[test]
    fn test_referenced_bands() {
        let p = PixelExpr::compile("B08 / B04 + B08", &names(&["B04", "B08", "B11"])).unwrap();
        assert_eq!(p.referenced_bands(), vec![0, 1]);
    }

    #[test]
    fn test_dotted_band_names() {
        let p = PixelExpr::compile("A.ndvi - B.ndvi", &names(&["A.ndvi", "B.ndvi"])).unwrap();
        assert_eq!(p.eval(&[0.5, 0.25]), 0.25);
    }
}
