//! Recursive-descent expression parser and evaluator.
//!
//! The formula language covers the usual C-like operator ladder (ternary down to
//! unary), numeric literals (decimal, hex, binary, floats, `_` separators),
//! string literals, case-insensitive `true`/`false`, and hierarchical identifiers
//! which may carry a clock-index suffix (`system_clock[]`).
//!
//! One parse produces an [`Expr`]; [`Expr::evaluate`] and [`Expr::identifiers`]
//! are two walks over the same tree, so full evaluation and identifier collection
//! share precedence rules by construction.

use indexmap::IndexSet;

use crate::errors::{WeaveError, WeaveResult};
use crate::model::Value;

#[cfg(test)]
mod tests;

/// Lookup seam between the evaluator and the variable store.
pub trait EvalContext {
    fn lookup(&self, ident: &str) -> WeaveResult<Value>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    BitNot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        when_true: Box<Expr>,
        when_false: Box<Expr>,
    },
}

impl Expr {
    pub fn parse(src: &str) -> WeaveResult<Expr> {
        let mut parser = Parser { src, pos: 0 };
        let expr = parser.expr()?;
        parser.skip_space();
        if parser.pos < parser.src.len() {
            return Err(parser.syntax_error("trailing input"));
        }
        Ok(expr)
    }

    /// Fully evaluate against the given context.
    pub fn evaluate(&self, ctx: &dyn EvalContext) -> WeaveResult<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => ctx.lookup(name),
            Expr::Unary { op, operand } => apply_unary(*op, operand.evaluate(ctx)?),
            Expr::Binary { op, lhs, rhs } => match op {
                // Logical operators short-circuit.
                BinaryOp::And => {
                    if !lhs.evaluate(ctx)?.as_bool()? {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(rhs.evaluate(ctx)?.as_bool()?))
                }
                BinaryOp::Or => {
                    if lhs.evaluate(ctx)?.as_bool()? {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(rhs.evaluate(ctx)?.as_bool()?))
                }
                _ => apply_binary(*op, lhs.evaluate(ctx)?, rhs.evaluate(ctx)?),
            },
            Expr::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                if condition.evaluate(ctx)?.as_bool()? {
                    when_true.evaluate(ctx)
                } else {
                    when_false.evaluate(ctx)
                }
            }
        }
    }

    /// Referenced identifiers in first-encounter order, deduplicated. Collection
    /// never touches the variable store.
    pub fn identifiers(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut IndexSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::Unary { operand, .. } => operand.collect_into(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_into(out);
                rhs.collect_into(out);
            }
            Expr::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                condition.collect_into(out);
                when_true.collect_into(out);
                when_false.collect_into(out);
            }
        }
    }
}

fn apply_unary(op: UnaryOp, operand: Value) -> WeaveResult<Value> {
    match (op, operand) {
        (UnaryOp::Plus, v) if v.is_numeric() => Ok(v),
        (UnaryOp::Minus, Value::Int(v)) => Ok(Value::Int(-v)),
        (UnaryOp::Minus, Value::Double(v)) => Ok(Value::Double(-v)),
        (UnaryOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
        (UnaryOp::BitNot, Value::Int(v)) => Ok(Value::Int(!v)),
        (op, v) => Err(WeaveError::InvalidOperands {
            op: match op {
                UnaryOp::Plus => "+",
                UnaryOp::Minus => "-",
                UnaryOp::Not => "!",
                UnaryOp::BitNot => "~",
            },
            operands: v.to_string(),
        }
        .into()),
    }
}

fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> WeaveResult<Value> {
    let invalid = |lhs: &Value, rhs: &Value| -> anyhow::Error {
        WeaveError::InvalidOperands {
            op: op.symbol(),
            operands: format!("{} and {}", lhs.type_name(), rhs.type_name()),
        }
        .into()
    };

    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    let (a, b) = (*a, *b);
                    Ok(Value::Int(match op {
                        BinaryOp::Add => a.wrapping_add(b),
                        BinaryOp::Sub => a.wrapping_sub(b),
                        BinaryOp::Mul => a.wrapping_mul(b),
                        BinaryOp::Div if b != 0 => a / b,
                        BinaryOp::Rem if b != 0 => a % b,
                        _ => return Err(WeaveError::DivisionByZero.into()),
                    }))
                }
                _ if lhs.is_numeric() && rhs.is_numeric() => {
                    let (a, b) = (lhs.as_double()?, rhs.as_double()?);
                    Ok(Value::Double(match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div => a / b,
                        BinaryOp::Rem => a % b,
                        _ => unreachable!(),
                    }))
                }
                _ => Err(invalid(&lhs, &rhs)),
            }
        }
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitXor | BinaryOp::BitOr => {
            let (a, b) = (lhs.as_int()?, rhs.as_int()?);
            Ok(Value::Int(match op {
                BinaryOp::Shl => a.wrapping_shl(b as u32),
                BinaryOp::Shr => a.wrapping_shr(b as u32),
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitXor => a ^ b,
                BinaryOp::BitOr => a | b,
                _ => unreachable!(),
            }))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ if lhs.is_numeric() && rhs.is_numeric() => {
                    match lhs.as_double()?.partial_cmp(&rhs.as_double()?) {
                        Some(ordering) => ordering,
                        None => return Err(invalid(&lhs, &rhs)),
                    }
                }
                _ => return Err(invalid(&lhs, &rhs)),
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            }))
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let equal = match (&lhs, &rhs) {
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::String(a), Value::String(b)) => a == b,
                _ if lhs.is_numeric() && rhs.is_numeric() => lhs.as_double()? == rhs.as_double()?,
                _ => return Err(invalid(&lhs, &rhs)),
            };
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        // Handled with short-circuit in `evaluate`; kept for direct calls.
        BinaryOp::And => Ok(Value::Bool(lhs.as_bool()? && rhs.as_bool()?)),
        BinaryOp::Or => Ok(Value::Bool(lhs.as_bool()? || rhs.as_bool()?)),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn syntax_error<M: Into<String>>(&self, message: M) -> anyhow::Error {
        WeaveError::ExpressionSyntax {
            expression: self.src.to_string(),
            at: self.pos,
            message: message.into(),
        }
        .into()
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_space(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Consume `symbol` if it is next, refusing when a longer operator starts
    /// with it (`<` vs `<<`, `&` vs `&&`, ...).
    fn eat_operator(&mut self, symbol: &str, reject_next: &[u8]) -> bool {
        self.skip_space();
        if !self.src[self.pos..].starts_with(symbol) {
            return false;
        }
        if let Some(following) = self.peek_at(symbol.len()) {
            if reject_next.contains(&following) {
                return false;
            }
        }
        self.pos += symbol.len();
        true
    }

    fn expect(&mut self, symbol: u8) -> WeaveResult<()> {
        self.skip_space();
        if self.peek() == Some(symbol) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.syntax_error(format!("expected '{}'", symbol as char)))
        }
    }

    fn expr(&mut self) -> WeaveResult<Expr> {
        self.ternary()
    }

    fn ternary(&mut self) -> WeaveResult<Expr> {
        let condition = self.logical_or()?;
        if !self.eat_operator("?", &[]) {
            return Ok(condition);
        }
        let when_true = self.expr()?;
        self.expect(b':')?;
        let when_false = self.expr()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
        })
    }

    fn logical_or(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.logical_and()?;
        while self.eat_operator("||", &[]) {
            let rhs = self.logical_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.bit_or()?;
        while self.eat_operator("&&", &[]) {
            let rhs = self.bit_or()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_or(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.bit_xor()?;
        while self.eat_operator("|", &[b'|']) {
            let rhs = self.bit_xor()?;
            lhs = binary(BinaryOp::BitOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_xor(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.bit_and()?;
        while self.eat_operator("^", &[]) {
            let rhs = self.bit_and()?;
            lhs = binary(BinaryOp::BitXor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bit_and(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.equality()?;
        while self.eat_operator("&", &[b'&']) {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::BitAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.comparison()?;
        loop {
            let op = if self.eat_operator("==", &[]) {
                BinaryOp::Eq
            } else if self.eat_operator("!=", &[]) {
                BinaryOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.comparison()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn comparison(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.shift()?;
        loop {
            let op = if self.eat_operator("<=", &[]) {
                BinaryOp::Le
            } else if self.eat_operator(">=", &[]) {
                BinaryOp::Ge
            } else if self.eat_operator("<", &[b'<', b'=']) {
                BinaryOp::Lt
            } else if self.eat_operator(">", &[b'>', b'=']) {
                BinaryOp::Gt
            } else {
                return Ok(lhs);
            };
            let rhs = self.shift()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn shift(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.sum()?;
        loop {
            let op = if self.eat_operator("<<", &[]) {
                BinaryOp::Shl
            } else if self.eat_operator(">>", &[]) {
                BinaryOp::Shr
            } else {
                return Ok(lhs);
            };
            let rhs = self.sum()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn sum(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat_operator("+", &[]) {
                BinaryOp::Add
            } else if self.eat_operator("-", &[]) {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> WeaveResult<Expr> {
        let mut lhs = self.factor()?;
        loop {
            let op = if self.eat_operator("*", &[]) {
                BinaryOp::Mul
            } else if self.eat_operator("/", &[]) {
                BinaryOp::Div
            } else if self.eat_operator("%", &[]) {
                BinaryOp::Rem
            } else {
                return Ok(lhs);
            };
            let rhs = self.factor()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn factor(&mut self) -> WeaveResult<Expr> {
        self.skip_space();
        let op = match self.peek() {
            Some(b'+') => Some(UnaryOp::Plus),
            Some(b'-') => Some(UnaryOp::Minus),
            Some(b'!') if self.peek_at(1) != Some(b'=') => Some(UnaryOp::Not),
            Some(b'~') => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.factor()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> WeaveResult<Expr> {
        self.skip_space();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(b')')?;
                Ok(inner)
            }
            Some(b'"') => self.string_literal(),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' || c == b'/' => self.identifier(),
            Some(c) => Err(self.syntax_error(format!("unexpected character '{}'", c as char))),
            None => Err(self.syntax_error("unexpected end of expression")),
        }
    }

    fn string_literal(&mut self) -> WeaveResult<Expr> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(b'"') => return Ok(Expr::Literal(Value::String(out))),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'n') => out.push('\n'),
                    _ => return Err(self.syntax_error("invalid escape in string literal")),
                },
                Some(c) => out.push(c as char),
                None => return Err(self.syntax_error("unterminated string literal")),
            }
        }
    }

    fn number(&mut self) -> WeaveResult<Expr> {
        let start = self.pos;

        let radix = if self.src[self.pos..].starts_with("0x") || self.src[self.pos..].starts_with("0X")
        {
            self.pos += 2;
            16
        } else if self.src[self.pos..].starts_with("0b") || self.src[self.pos..].starts_with("0B") {
            self.pos += 2;
            2
        } else {
            10
        };

        let digits_start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            let valid = match radix {
                16 => c.is_ascii_hexdigit(),
                2 => c == b'0' || c == b'1',
                _ => c.is_ascii_digit(),
            };
            if valid || c == b'_' {
                self.pos += 1;
            } else if radix == 10 && c == b'.' && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit())
            {
                is_float = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == digits_start {
            return Err(self.syntax_error("expected digits"));
        }

        let text: String = self.src[start..self.pos].replace('_', "");
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.syntax_error(format!("invalid number '{text}'")))?;
            Ok(Expr::Literal(Value::Double(value)))
        } else {
            let digits = if radix == 10 { &text } else { &text[2..] };
            let value = i64::from_str_radix(digits, radix)
                .map_err(|_| self.syntax_error(format!("invalid number '{text}'")))?;
            Ok(Expr::Literal(Value::Int(value)))
        }
    }

    fn identifier(&mut self) -> WeaveResult<Expr> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, b'_' | b'/' | b'[' | b']') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name = &self.src[start..self.pos];
        if name.eq_ignore_ascii_case("true") {
            return Ok(Expr::Literal(Value::Bool(true)));
        }
        if name.eq_ignore_ascii_case("false") {
            return Ok(Expr::Literal(Value::Bool(false)));
        }
        Ok(Expr::Ident(name.to_string()))
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

/// Whether an identifier carries the clock-index suffix `[]`.
pub fn is_clock_indexed(ident: &str) -> bool {
    ident.ends_with("[]")
}
