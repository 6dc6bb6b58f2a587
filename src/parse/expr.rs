//! Evaluating operand expressions.
//!
//! Expressions are evaluated directly from a [`LineLexer`] with an operator-precedence
//! (shunting-yard) evaluator, which keeps an explicit operator stack and value stack.
//!
//! The supported operators are (from loosest to tightest binding):
//!
//! | operator       | precedence |
//! |----------------|------------|
//! | `\|`           | 10         |
//! | `&`            | 20         |
//! | `<<`, `>>`     | 30         |
//! | `+`, `-`       | 40         |
//! | `*`, `/`       | 50         |
//! | unary `<` (low byte), `>` (high byte), `-` | 100 |
//!
//! Operands are numeric literals, character literals, symbols, and `*` (the current address).
//!
//! Symbols are resolved through a [`SymbolLookup`], which also decides whether
//! an unknown symbol is a forward reference ([`Value::Undefined`]) or an error.
//!
//! ```
//! use std::collections::HashMap;
//! use m6502_ensemble::parse::lex::LineLexer;
//! use m6502_ensemble::parse::expr::{eval, SymbolLookup, Value};
//!
//! struct Symbols(HashMap<&'static str, i32>);
//! impl SymbolLookup for Symbols {
//!     fn current_address(&self) -> u16 { 0x0200 }
//!     fn resolve(&mut self, name: &str) -> Option<i32> { self.0.get(name).copied() }
//!     fn allow_undefined(&self) -> bool { true }
//! }
//!
//! let mut syms = Symbols(HashMap::from([("base", 0x1000)]));
//! let mut lx = LineLexer::new("base + 2 * 3");
//! assert_eq!(eval(&mut lx, &mut syms), Ok(Value::Known(0x1006)));
//!
//! let mut lx = LineLexer::new("later + 1");
//! assert_eq!(eval(&mut lx, &mut syms), Ok(Value::Undefined));
//! ```

use super::lex::{LexErr, LineLexer, Token, Word};

/// The result of evaluating an expression.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Value {
    /// The expression resolved to this value.
    Known(i32),
    /// The expression is well-formed, but references a symbol which is not yet defined.
    Undefined,
}
impl Value {
    /// The resolved value, if it is known.
    pub fn known(self) -> Option<i32> {
        match self {
            Value::Known(v) => Some(v),
            Value::Undefined => None,
        }
    }
    /// Whether this value is not yet known.
    pub fn is_undefined(self) -> bool {
        matches!(self, Value::Undefined)
    }
}

/// Symbol context for expression evaluation.
pub trait SymbolLookup {
    /// The current write address (the value of `*`).
    fn current_address(&self) -> u16;

    /// Resolves a symbol reference (as written in source) to its value.
    ///
    /// This returns `None` if the symbol is not defined.
    fn resolve(&mut self, name: &str) -> Option<i32>;

    /// Whether undefined symbols evaluate to [`Value::Undefined`] (`true`)
    /// or are an error (`false`).
    fn allow_undefined(&self) -> bool;
}

/// Any errors raised while evaluating an expression.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum ExprErr {
    /// A token could not be read.
    #[error(transparent)]
    Lex(#[from] LexErr),
    /// An operand was expected, but the expression ended.
    #[error("expected an expression")]
    MissingOperand,
    /// An operand was expected, but something else was found.
    #[error("unexpected '{0}' in expression")]
    UnexpectedToken(String),
    /// Parentheses aren't balanced.
    #[error("unbalanced parentheses")]
    UnbalancedParen,
    /// Division by zero occurred.
    #[error("division by zero")]
    DivisionByZero,
    /// A symbol was referenced which was never defined.
    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),
}
impl crate::err::Error for ExprErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        use crate::err::Error;

        match self {
            ExprErr::Lex(e) => e.help(),
            ExprErr::MissingOperand => Some("an operand is a number, character, symbol, `*`, or parenthesized expression".into()),
            ExprErr::UnexpectedToken(_) => None,
            ExprErr::UnbalancedParen => Some("every `(` needs a matching `)`".into()),
            ExprErr::DivisionByZero => None,
            ExprErr::UndefinedSymbol(_) => Some("try defining this symbol as a label or with `name = value`".into()),
        }
    }
}

/// The result of evaluating an instruction operand (see [`eval_operand`]).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Operand {
    /// The value of the operand.
    pub value: Value,
    /// Whether the operand started with a `(` that spans the whole operand
    /// (i.e., it is an indirect operand).
    pub opened_paren: bool,
    /// Whether that starting `(` was closed by the evaluator.
    ///
    /// This is `true` for `(expr)` and `(expr),Y` and `false` for `(expr,X)`
    /// (where the `)` comes after the index register).
    pub closed_paren: bool,
}

/// Evaluates an expression, consuming its tokens from the lexer.
///
/// Evaluation stops (without consuming) at the end of the line,
/// at a `,` or `)` that is not inside a parenthesis, or at any other token
/// that can't continue the expression.
pub fn eval(lx: &mut LineLexer, ctx: &mut impl SymbolLookup) -> Result<Value, ExprErr> {
    Evaluator::new(ctx, false).run(lx).map(|o| o.value)
}

/// Evaluates an instruction operand, consuming its tokens from the lexer.
///
/// This is [`eval`] with support for indirect operands (if `indirect` is true):
/// when the operand starts with `(`, this reports whether that parenthesis
/// was closed as part of the expression, and evaluation also stops at a `,`
/// that is directly inside of it (as in `(expr,X)`).
///
/// ```
/// use m6502_ensemble::parse::lex::{LineLexer, Token};
/// use m6502_ensemble::parse::expr::{eval_operand, SymbolLookup, Value};
///
/// struct NoSymbols;
/// impl SymbolLookup for NoSymbols {
///     fn current_address(&self) -> u16 { 0 }
///     fn resolve(&mut self, _: &str) -> Option<i32> { None }
///     fn allow_undefined(&self) -> bool { false }
/// }
///
/// let mut lx = LineLexer::new("($10),Y");
/// let op = eval_operand(&mut lx, &mut NoSymbols, true).unwrap();
/// assert_eq!(op.value, Value::Known(0x10));
/// assert!(op.opened_paren && op.closed_paren);
///
/// let mut lx = LineLexer::new("($10,X)");
/// let op = eval_operand(&mut lx, &mut NoSymbols, true).unwrap();
/// assert!(op.opened_paren && !op.closed_paren);
/// assert_eq!(lx.next_token(), Ok(Some(Token::Punct(','))));
/// ```
pub fn eval_operand(lx: &mut LineLexer, ctx: &mut impl SymbolLookup, indirect: bool) -> Result<Operand, ExprErr> {
    Evaluator::new(ctx, indirect).run(lx)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Oper {
    Or, And, Shl, Shr, Add, Sub, Mul, Div,
    Lo, Hi, Neg,
    Open,
}
impl Oper {
    fn precedence(self) -> u8 {
        match self {
            Oper::Or => 10,
            Oper::And => 20,
            Oper::Shl | Oper::Shr => 30,
            Oper::Add | Oper::Sub => 40,
            Oper::Mul | Oper::Div => 50,
            Oper::Lo | Oper::Hi | Oper::Neg => 100,
            Oper::Open => 0,
        }
    }

    fn binary(t: Token) -> Option<Self> {
        match t {
            Token::Punct('|') => Some(Oper::Or),
            Token::Punct('&') => Some(Oper::And),
            Token::Shl => Some(Oper::Shl),
            Token::Shr => Some(Oper::Shr),
            Token::Punct('+') => Some(Oper::Add),
            Token::Punct('-') => Some(Oper::Sub),
            Token::Punct('*') => Some(Oper::Mul),
            Token::Punct('/') => Some(Oper::Div),
            _ => None
        }
    }

    fn apply_unary(self, v: i32) -> i32 {
        match self {
            Oper::Lo => v & 0xFF,
            Oper::Hi => (v >> 8) & 0xFF,
            _ => v.wrapping_neg(),
        }
    }

    fn apply_binary(self, l: i32, r: i32) -> Result<i32, ExprErr> {
        let value = match self {
            Oper::Or  => l | r,
            Oper::And => l & r,
            Oper::Shl => u32::try_from(r).ok()
                .and_then(|r| l.checked_shl(r))
                .unwrap_or(0),
            Oper::Shr => u32::try_from(r).ok()
                .and_then(|r| l.checked_shr(r))
                .unwrap_or(if l < 0 { -1 } else { 0 }),
            Oper::Add => l.wrapping_add(r),
            Oper::Sub => l.wrapping_sub(r),
            Oper::Mul => l.wrapping_mul(r),
            Oper::Div if r == 0 => {
                tracing::warn!(dividend = l, "division by zero in expression");
                return Err(ExprErr::DivisionByZero);
            },
            _ => l.wrapping_div(r),
        };
        Ok(value)
    }
}

struct Evaluator<'c, C> {
    ctx: &'c mut C,
    indirect: bool,
    ops: Vec<Oper>,
    values: Vec<Value>,
}
impl<'c, C: SymbolLookup> Evaluator<'c, C> {
    fn new(ctx: &'c mut C, indirect: bool) -> Self {
        Self { ctx, indirect, ops: vec![], values: vec![] }
    }

    fn run(mut self, lx: &mut LineLexer) -> Result<Operand, ExprErr> {
        let mut depth = 0usize;
        let mut opened = false;
        let mut closed = false;
        let mut expect_operand = true;
        let mut first = true;

        loop {
            let token = lx.peek()?;

            if expect_operand {
                let Some(token) = token else { return Err(ExprErr::MissingOperand) };
                lx.next_token()?;

                match token {
                    Token::Word(w) => {
                        let v = self.word(w)?;
                        self.values.push(v);
                        expect_operand = false;
                    },
                    Token::Char(c) => {
                        self.values.push(Value::Known(i32::from(c)));
                        expect_operand = false;
                    },
                    Token::Punct('*') => {
                        self.values.push(Value::Known(i32::from(self.ctx.current_address())));
                        expect_operand = false;
                    },
                    Token::Punct('(') => {
                        opened |= first && self.indirect;
                        depth += 1;
                        self.ops.push(Oper::Open);
                    },
                    Token::Punct('<') => self.ops.push(Oper::Lo),
                    Token::Punct('>') => self.ops.push(Oper::Hi),
                    Token::Punct('-') => self.ops.push(Oper::Neg),
                    Token::Punct('+') => {},
                    t => return Err(ExprErr::UnexpectedToken(t.to_string())),
                }
            } else {
                match token {
                    None => break,
                    Some(Token::Punct(',')) => match depth {
                        0 => break,
                        // `(expr,X)`
                        1 if opened => break,
                        _ => return Err(ExprErr::UnexpectedToken(",".to_string())),
                    },
                    Some(Token::Punct(')')) => {
                        if depth == 0 { break };
                        lx.next_token()?;

                        self.reduce_group()?;
                        depth -= 1;
                        closed = opened && depth == 0;
                    },
                    Some(t) => {
                        let Some(op) = Oper::binary(t) else { break };
                        lx.next_token()?;

                        // The leading parenthesis was only grouping part of the operand:
                        if closed {
                            opened = false;
                            closed = false;
                        }
                        self.reduce_while(op.precedence())?;
                        self.ops.push(op);
                        expect_operand = true;
                    }
                }
            }

            first = false;
        }

        while let Some(op) = self.ops.pop() {
            match op {
                // The outer parenthesis of `(expr,X)` is left for the caller to close.
                Oper::Open if opened && depth == 1 && self.ops.is_empty() => depth = 0,
                Oper::Open => return Err(ExprErr::UnbalancedParen),
                op => self.apply(op)?,
            }
        }

        let value = self.pop_value()?;
        match self.values.is_empty() {
            true  => Ok(Operand { value, opened_paren: opened, closed_paren: closed }),
            false => Err(ExprErr::MissingOperand),
        }
    }

    fn word(&mut self, w: &str) -> Result<Value, ExprErr> {
        match Word::classify(w)? {
            Word::Number(n) => Ok(Value::Known(n)),
            Word::Symbol(name) => match self.ctx.resolve(name) {
                Some(v) => Ok(Value::Known(v)),
                None if self.ctx.allow_undefined() => Ok(Value::Undefined),
                None => Err(ExprErr::UndefinedSymbol(name.to_string())),
            }
        }
    }

    fn pop_value(&mut self) -> Result<Value, ExprErr> {
        self.values.pop().ok_or(ExprErr::MissingOperand)
    }

    /// Applies operators on the top of the stack that bind at least as tightly as `prec`.
    fn reduce_while(&mut self, prec: u8) -> Result<(), ExprErr> {
        while let Some(&top) = self.ops.last() {
            if top == Oper::Open || top.precedence() < prec { break };
            self.ops.pop();
            self.apply(top)?;
        }
        Ok(())
    }

    /// Applies operators until the innermost open parenthesis is removed.
    fn reduce_group(&mut self) -> Result<(), ExprErr> {
        loop {
            match self.ops.pop() {
                Some(Oper::Open) => return Ok(()),
                Some(op) => self.apply(op)?,
                None => return Err(ExprErr::UnbalancedParen),
            }
        }
    }

    fn apply(&mut self, op: Oper) -> Result<(), ExprErr> {
        let result = match op {
            Oper::Lo | Oper::Hi | Oper::Neg => match self.pop_value()? {
                Value::Known(v) => Value::Known(op.apply_unary(v)),
                Value::Undefined => Value::Undefined,
            },
            Oper::Open => return Err(ExprErr::UnbalancedParen),
            _ => {
                let r = self.pop_value()?;
                let l = self.pop_value()?;
                match (l, r) {
                    (Value::Known(l), Value::Known(r)) => Value::Known(op.apply_binary(l, r)?),
                    _ => Value::Undefined,
                }
            }
        };

        self.values.push(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct Env {
        symbols: HashMap<&'static str, i32>,
        pc: u16,
        lenient: bool,
    }
    impl Env {
        fn new(lenient: bool) -> Self {
            Env {
                symbols: HashMap::from([("ten", 10), ("vec", 0x1234), ("zp", 0x80)]),
                pc: 0x0300,
                lenient
            }
        }
    }
    impl SymbolLookup for Env {
        fn current_address(&self) -> u16 {
            self.pc
        }
        fn resolve(&mut self, name: &str) -> Option<i32> {
            self.symbols.get(name).copied()
        }
        fn allow_undefined(&self) -> bool {
            self.lenient
        }
    }

    fn eval_str(src: &str) -> Result<Value, ExprErr> {
        eval(&mut LineLexer::new(src), &mut Env::new(false))
    }
    fn eval_known(src: &str) -> i32 {
        match eval_str(src) {
            Ok(Value::Known(v)) => v,
            r => panic!("expected {src:?} to evaluate, got {r:?}"),
        }
    }
    fn eval_op(src: &str) -> Operand {
        eval_operand(&mut LineLexer::new(src), &mut Env::new(false), true).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_known("1+2*3"), 7);
        assert_eq!(eval_known("(1+2)*3"), 9);
        assert_eq!(eval_known("<$1234"), 0x34);
        assert_eq!(eval_known("> $1234"), 0x12);
        assert_eq!(eval_known("10-2-3"), 5);
        assert_eq!(eval_known("100/7/2"), 7);
        assert_eq!(eval_known("1<<4|1"), 17);
        assert_eq!(eval_known("$F0|$0F&$3C"), 0xFC);
        assert_eq!(eval_known("$FF & %1010"), 10);
        assert_eq!(eval_known("1 << 2 + 1"), 8);
        assert_eq!(eval_known("<vec+1"), 0x35);
        assert_eq!(eval_known(">(vec+$100)"), 0x13);
        assert_eq!(eval_known("((ten))"), 10);
    }

    #[test]
    fn test_unary_and_literals() {
        assert_eq!(eval_known("-1"), -1);
        assert_eq!(eval_known("2*-3"), -6);
        assert_eq!(eval_known("--4"), 4);
        assert_eq!(eval_known("+4"), 4);
        assert_eq!(eval_known("'A'+1"), 66);
        assert_eq!(eval_known("*"), 0x0300);
        assert_eq!(eval_known("*+2"), 0x0302);
        assert_eq!(eval_known("* * 2"), 0x0600);
        assert_eq!(eval_known("$80 >> 3"), 0x10);
        assert_eq!(eval_known("-8 >> 40"), -1);
        assert_eq!(eval_known("1 << 40"), 0);
    }

    #[test]
    fn test_undefined() {
        let mut lenient = Env::new(true);
        assert_eq!(eval(&mut LineLexer::new("later+1"), &mut lenient), Ok(Value::Undefined));
        assert_eq!(eval(&mut LineLexer::new("<later"), &mut lenient), Ok(Value::Undefined));
        // undefined wins over a division by zero
        assert_eq!(eval(&mut LineLexer::new("later/0"), &mut lenient), Ok(Value::Undefined));

        assert_eq!(eval_str("later+1"), Err(ExprErr::UndefinedSymbol("later".to_string())));
    }

    #[test]
    fn test_errors() {
        assert_eq!(eval_str("1/0"), Err(ExprErr::DivisionByZero));
        assert_eq!(eval_str("1+"), Err(ExprErr::MissingOperand));
        assert_eq!(eval_str(""), Err(ExprErr::MissingOperand));
        assert_eq!(eval_str("(1+2"), Err(ExprErr::UnbalancedParen));
        assert_eq!(eval_str("#1"), Err(ExprErr::UnexpectedToken("#".to_string())));
        assert_eq!(eval_str("$1G"), Err(ExprErr::Lex(LexErr::InvalidHex)));
        assert_eq!(eval_str("(1,2)"), Err(ExprErr::UnexpectedToken(",".to_string())));
    }

    #[test]
    fn test_stop_tokens() {
        let mut lx = LineLexer::new("$10,X");
        assert_eq!(eval(&mut lx, &mut Env::new(false)), Ok(Value::Known(0x10)));
        assert_eq!(lx.next_token(), Ok(Some(Token::Punct(','))));

        let mut lx = LineLexer::new("1 2");
        assert_eq!(eval(&mut lx, &mut Env::new(false)), Ok(Value::Known(1)));
        assert_eq!(lx.next_token(), Ok(Some(Token::Word("2"))));

        let mut lx = LineLexer::new("5)");
        assert_eq!(eval(&mut lx, &mut Env::new(false)), Ok(Value::Known(5)));
        assert_eq!(lx.next_token(), Ok(Some(Token::Punct(')'))));
    }

    #[test]
    fn test_indirect_operands() {
        let op = eval_op("(zp),Y");
        assert_eq!(op, Operand { value: Value::Known(0x80), opened_paren: true, closed_paren: true });

        let op = eval_op("(zp,X)");
        assert_eq!(op, Operand { value: Value::Known(0x80), opened_paren: true, closed_paren: false });

        let op = eval_op("(vec)");
        assert_eq!(op, Operand { value: Value::Known(0x1234), opened_paren: true, closed_paren: true });

        let op = eval_op("((zp+1)),Y");
        assert_eq!(op, Operand { value: Value::Known(0x81), opened_paren: true, closed_paren: true });

        let op = eval_op("(zp+1,X)");
        assert_eq!(op, Operand { value: Value::Known(0x81), opened_paren: true, closed_paren: false });

        // Parentheses only grouping part of the operand:
        let op = eval_op("(1+2)*3");
        assert_eq!(op, Operand { value: Value::Known(9), opened_paren: false, closed_paren: false });
        let op = eval_op("2*(zp),Y");
        assert_eq!(op, Operand { value: Value::Known(0x100), opened_paren: false, closed_paren: false });

        // Without indirect support, the parenthesis is just grouping:
        let op = eval_operand(&mut LineLexer::new("(vec)"), &mut Env::new(false), false).unwrap();
        assert_eq!(op, Operand { value: Value::Known(0x1234), opened_paren: false, closed_paren: false });
    }
}
