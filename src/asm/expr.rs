//! The expression evaluator.
//!
//! Expressions are evaluated with the classic two-stack algorithm: one stack
//! of values and one of pending operators. Pushing a binary operator first
//! applies every stacked operator of greater or equal precedence, which makes
//! operators of equal precedence associate to the left.
//!
//! `<` and `>` are prefix "low byte" and "high byte" operators when a value
//! is expected, and comparisons otherwise. `%` works the same way: a binary
//! literal where a value is expected, modulo elsewhere.

use lazy_static::lazy_static;
use regex::Regex;

use crate::asm::symbol::Kind;
use crate::asm::symbol::SymbolId;
use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::asm::Pass;
use crate::syn::token::lex;
use crate::syn::token::LexError;
use crate::syn::token::Token;

/// The deepest either evaluator stack may grow.
const STACK_DEPTH: usize = 64;

/// The deepest user functions may call each other.
const FUNC_DEPTH: usize = 8;

/// The result of evaluating an expression.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Value {
  /// The value itself.
  pub value: i32,
  /// The bank given by a `bank:address` pair, if any.
  pub bank: Option<u32>,
  /// Whether the expression references a symbol that has never been defined.
  pub undef: bool,
  /// Whether the expression references a symbol only defined later on.
  pub forward: bool,
  /// Whether the expression contains any operator or function.
  pub complex: bool,
  /// The last symbol the expression referenced.
  pub symbol: Option<SymbolId>,
  /// The number of symbol references in the expression.
  pub symbols: usize,
  undef_name: Option<String>,
}

impl Value {
  fn absorb(&mut self, other: &Value) {
    self.undef |= other.undef;
    self.forward |= other.forward;
    self.complex |= other.complex;
    self.symbols += other.symbols;
    if other.symbol.is_some() {
      self.symbol = other.symbol;
    }
    if self.undef_name.is_none() {
      self.undef_name = other.undef_name.clone();
    }
  }

  fn undefined(&self) -> ErrorType {
    ErrorType::Undefined(self.undef_name.clone().unwrap_or_default())
  }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Op {
  Neg,
  Not,
  LNot,
  Pos,
  Lo,
  Hi,
  Mul,
  Div,
  Mod,
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
  And,
  Xor,
  Or,
  LAnd,
  LOr,
  Paren,
}

impl Op {
  fn prefix(s: &str) -> Option<Self> {
    Some(match s {
      "-" => Self::Neg,
      "~" => Self::Not,
      "!" => Self::LNot,
      "+" => Self::Pos,
      "<" => Self::Lo,
      ">" => Self::Hi,
      _ => return None,
    })
  }

  fn infix(s: &str) -> Option<Self> {
    Some(match s {
      "*" => Self::Mul,
      "/" => Self::Div,
      "%" => Self::Mod,
      "+" => Self::Add,
      "-" => Self::Sub,
      "<<" => Self::Shl,
      ">>" => Self::Shr,
      "<" => Self::Lt,
      "<=" => Self::Le,
      ">" => Self::Gt,
      ">=" => Self::Ge,
      "=" | "==" => Self::Eq,
      "!=" | "<>" => Self::Ne,
      "&" => Self::And,
      "^" => Self::Xor,
      "|" => Self::Or,
      "&&" => Self::LAnd,
      "||" => Self::LOr,
      _ => return None,
    })
  }

  fn prec(self) -> u8 {
    use Op::*;
    match self {
      Neg | Not | LNot | Pos => 12,
      Mul | Div | Mod => 11,
      Add | Sub => 10,
      Shl | Shr => 9,
      Lt | Le | Gt | Ge => 8,
      Eq | Ne => 7,
      And => 6,
      Xor => 5,
      Or => 4,
      LAnd => 3,
      LOr => 2,
      Lo | Hi => 1,
      Paren => 0,
    }
  }

  fn is_prefix(self) -> bool {
    use Op::*;
    matches!(self, Neg | Not | LNot | Pos | Lo | Hi)
  }

  /// Pops this operator's operands off `values` and pushes the result.
  fn apply(self, values: &mut Vec<i32>) -> Result<(), ErrorType> {
    use Op::*;
    let missing = || ErrorType::ExprSyntax("missing operand".into());
    let b = values.pop().ok_or_else(missing)?;
    if self.is_prefix() {
      values.push(match self {
        Neg => b.wrapping_neg(),
        Not => !b,
        LNot => (b == 0) as i32,
        Lo => b & 0xff,
        Hi => (b >> 8) & 0xff,
        _ => b,
      });
      return Ok(());
    }

    let a = values.pop().ok_or_else(missing)?;
    values.push(match self {
      Mul => a.wrapping_mul(b),
      Div | Mod if b == 0 => return Err(ErrorType::DivideByZero),
      Div => a.wrapping_div(b),
      Mod => a.wrapping_rem(b),
      Add => a.wrapping_add(b),
      Sub => a.wrapping_sub(b),
      Shl => a.checked_shl(b as u32).unwrap_or(0),
      Shr => a.checked_shr(b as u32).unwrap_or(if a < 0 { -1 } else { 0 }),
      Lt => (a < b) as i32,
      Le => (a <= b) as i32,
      Gt => (a > b) as i32,
      Ge => (a >= b) as i32,
      Eq => (a == b) as i32,
      Ne => (a != b) as i32,
      And => a & b,
      Xor => a ^ b,
      Or => a | b,
      LAnd => (a != 0 && b != 0) as i32,
      LOr => (a != 0 || b != 0) as i32,
      _ => return Err(ErrorType::UnbalancedParens),
    });
    Ok(())
  }
}

/// The functions built into the evaluator.
const BUILTINS: &[&str] = &[
  "bank", "page", "vram", "pal", "sizeof", "countof", "linear", "overlay",
  "defined", "high", "low",
];

fn is_builtin(name: &str) -> bool {
  BUILTINS.iter().any(|b| b.eq_ignore_ascii_case(name))
}

fn parse_binary(digits: &str) -> Result<i32, ErrorType> {
  u32::from_str_radix(digits, 2)
    .map(|v| v as i32)
    .map_err(|_| ErrorType::ExprSyntax(format!("bad binary literal %{}", digits)))
}

/// Returns the index of the `)` closing the `(` at `open`.
fn matching_paren(tokens: &[Token], open: usize) -> Result<usize, ErrorType> {
  let mut depth = 0;
  for (i, tok) in tokens.iter().enumerate().skip(open) {
    match tok {
      Token::LParen => depth += 1,
      Token::RParen => {
        depth -= 1;
        if depth == 0 {
          return Ok(i);
        }
      }
      _ => {}
    }
  }
  Err(ErrorType::UnbalancedParens)
}

/// Splits a function's argument tokens on top-level commas.
fn split_tokens<'t, 'a>(tokens: &'t [Token<'a>]) -> Vec<&'t [Token<'a>]> {
  if tokens.is_empty() {
    return Vec::new();
  }
  let mut args = Vec::new();
  let mut depth = 0;
  let mut start = 0;
  for (i, tok) in tokens.iter().enumerate() {
    match tok {
      Token::LParen | Token::LBracket => depth += 1,
      Token::RParen | Token::RBracket => depth -= 1,
      Token::Comma if depth == 0 => {
        args.push(&tokens[start..i]);
        start = i + 1;
      }
      _ => {}
    }
  }
  args.push(&tokens[start..]);
  args
}

fn untokenize(tokens: &[Token]) -> String {
  tokens
    .iter()
    .map(|t| t.to_string())
    .collect::<Vec<_>>()
    .join(" ")
}

impl Assembler {
  /// Evaluates `text`.
  ///
  /// References to undefined symbols evaluate to zero. During the final pass
  /// they are reported (once per expression) but evaluation still succeeds,
  /// so that the instruction being assembled keeps its size.
  pub(in crate::asm) fn eval(&mut self, text: &str) -> Result<Value, ErrorType> {
    self.eval_with(text, false)
  }

  /// Like `eval()`, but also accepts a `bank:address` pair.
  pub(in crate::asm) fn eval_addr(
    &mut self,
    text: &str,
  ) -> Result<Value, ErrorType> {
    self.eval_with(text, true)
  }

  /// Evaluates `text`, which must not reference undefined symbols in any
  /// pass.
  pub(in crate::asm) fn eval_defined(
    &mut self,
    text: &str,
  ) -> Result<Value, ErrorType> {
    let value = self.eval_quiet(text, false)?;
    if value.undef {
      return Err(value.undefined());
    }
    Ok(value)
  }

  fn eval_with(
    &mut self,
    text: &str,
    allow_bank: bool,
  ) -> Result<Value, ErrorType> {
    let value = self.eval_quiet(text, allow_bank)?;
    if value.undef && self.pass == Pass::Final {
      self.report(value.undefined());
    }
    Ok(value)
  }

  fn eval_quiet(
    &mut self,
    text: &str,
    allow_bank: bool,
  ) -> Result<Value, ErrorType> {
    let tokens = lex(text).map_err(ErrorType::Lex)?;
    let mut value = Value::default();
    match tokens.as_slice() {
      [Token::Int(bank), Token::Colon, rest @ ..] if allow_bank => {
        if !(0..=0xff).contains(bank) {
          return Err(ErrorType::BankAddr);
        }
        value.value = self.eval_tokens(rest, &mut value, 0)?;
        if !(0..=0xffff).contains(&value.value) {
          return Err(ErrorType::BankAddr);
        }
        value.bank = Some(*bank as u32);
      }
      tokens => value.value = self.eval_tokens(tokens, &mut value, 0)?,
    }
    Ok(value)
  }

  /// Evaluates a token sequence, accumulating metadata into `meta`.
  fn eval_tokens(
    &mut self,
    tokens: &[Token],
    meta: &mut Value,
    depth: usize,
  ) -> Result<i32, ErrorType> {
    if tokens.is_empty() {
      return Err(ErrorType::ExprSyntax("missing expression".into()));
    }

    let mut values = Vec::new();
    let mut ops = Vec::new();
    let mut expect_value = true;
    let mut i = 0;
    while i < tokens.len() {
      let tok = tokens[i];
      i += 1;

      if !expect_value {
        match tok {
          Token::Op(s) => match Op::infix(s) {
            Some(op) => {
              push_infix(op, &mut values, &mut ops, meta)?;
              expect_value = true;
            }
            None => return Err(unexpected(tok)),
          },
          Token::Percent(digits) => {
            push_infix(Op::Mod, &mut values, &mut ops, meta)?;
            let rhs = digits
              .parse::<u32>()
              .map_err(|_| ErrorType::Lex(LexError::Overflow))?;
            push_value(rhs as i32, &mut values)?;
          }
          Token::RParen => loop {
            match ops.pop() {
              Some(Op::Paren) => break,
              Some(op) => op.apply(&mut values)?,
              None => return Err(ErrorType::UnbalancedParens),
            }
          },
          _ => return Err(unexpected(tok)),
        }
        continue;
      }

      let value = match tok {
        Token::Int(v) => v,
        Token::Percent(digits) => parse_binary(digits)?,
        Token::Str(_) => return Err(ErrorType::StringInExpr),
        Token::Ident(name)
          if tokens.get(i) == Some(&Token::LParen) && self.is_function(name) =>
        {
          let close = matching_paren(tokens, i)?;
          let args = &tokens[i + 1..close];
          i = close + 1;
          meta.complex = true;
          self.call_function(name, args, meta, depth)?
        }
        Token::Ident(name) => {
          let id = self.resolve(name)?;
          self.symbol_value(id, meta)?
        }
        Token::MultiRef { name, steps } => {
          let id = self.resolve_multi(name, steps)?;
          self.symbol_value(id, meta)?
        }
        Token::Op("*") => self.pc(),
        Token::Op(s) => match Op::prefix(s) {
          Some(op) => {
            if ops.len() >= STACK_DEPTH {
              return Err(ErrorType::ExprTooComplex);
            }
            meta.complex = true;
            ops.push(op);
            continue;
          }
          None => return Err(unexpected(tok)),
        },
        Token::LParen => {
          if ops.len() >= STACK_DEPTH {
            return Err(ErrorType::ExprTooComplex);
          }
          ops.push(Op::Paren);
          continue;
        }
        _ => return Err(unexpected(tok)),
      };
      push_value(value, &mut values)?;
      expect_value = false;
    }

    if expect_value {
      return Err(ErrorType::ExprSyntax("missing operand".into()));
    }
    while let Some(op) = ops.pop() {
      if op == Op::Paren {
        return Err(ErrorType::UnbalancedParens);
      }
      op.apply(&mut values)?;
    }
    match values.as_slice() {
      [v] => Ok(*v),
      _ => Err(ErrorType::ExprSyntax("missing operator".into())),
    }
  }

  /// Reads a symbol's value, noting whether it is undefined or a forward
  /// reference.
  fn symbol_value(
    &mut self,
    id: SymbolId,
    meta: &mut Value,
  ) -> Result<i32, ErrorType> {
    self.reference(id);
    meta.symbols += 1;
    meta.symbol = Some(id);

    let sym = self.sym(id);
    if matches!(sym.kind, Kind::Macro | Kind::Function) {
      return Err(ErrorType::ExprSyntax(format!("{} is not a value", sym.name)));
    }
    if sym.defined || sym.builtin {
      Ok(sym.value)
    } else if sym.prev_defined {
      meta.forward = true;
      Ok(sym.value)
    } else {
      meta.undef = true;
      if meta.undef_name.is_none() {
        meta.undef_name = Some(sym.name.clone());
      }
      Ok(0)
    }
  }

  fn find_function(&self, name: &str) -> Option<SymbolId> {
    self
      .symbols
      .get(name)
      .filter(|&id| self.sym(id).kind == Kind::Function)
  }

  fn is_function(&self, name: &str) -> bool {
    is_builtin(name) || self.find_function(name).is_some()
  }

  fn call_function(
    &mut self,
    name: &str,
    args: &[Token],
    meta: &mut Value,
    depth: usize,
  ) -> Result<i32, ErrorType> {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
      "high" | "low" => {
        let mut inner = Value::default();
        let v = self.eval_tokens(args, &mut inner, depth)?;
        meta.absorb(&inner);
        Ok(if lower == "high" { (v >> 8) & 0xff } else { v & 0xff })
      }
      "defined" => match args {
        [Token::Ident(name)] => {
          let id = self.resolve(name)?;
          let sym = self.sym(id);
          Ok((sym.defined || sym.builtin) as i32)
        }
        _ => Err(ErrorType::FunctionArg("DEFINED")),
      },
      _ if is_builtin(&lower) => self.query(&lower, args, meta, depth),
      _ => self.call_user(name, args, meta, depth),
    }
  }

  /// Evaluates one of the functions that ask about a single symbol.
  fn query(
    &mut self,
    func: &str,
    args: &[Token],
    meta: &mut Value,
    depth: usize,
  ) -> Result<i32, ErrorType> {
    let upper = match func {
      "bank" => "BANK",
      "page" => "PAGE",
      "vram" => "VRAM",
      "pal" => "PAL",
      "sizeof" => "SIZEOF",
      "countof" => "COUNTOF",
      "linear" => "LINEAR",
      _ => "OVERLAY",
    };

    let mut inner = Value::default();
    let v = self.eval_tokens(args, &mut inner, depth)?;
    let id = match (inner.symbols, inner.symbol) {
      (1, Some(id)) => id,
      _ => return Err(ErrorType::FunctionArg(upper)),
    };
    meta.absorb(&inner);

    let sym = self.sym(id);
    let attr = |attr: Option<i32>| match attr {
      Some(v) => Ok(v),
      None if !sym.is_known() => Ok(0),
      None => Err(ErrorType::ExprSyntax(format!(
        "{} has no {} attribute",
        sym.name, upper
      ))),
    };
    match func {
      "bank" => Ok(sym.bank as i32),
      "page" => Ok(sym.page as i32),
      "vram" => attr(sym.vram),
      "pal" => attr(sym.pal),
      "sizeof" => Ok(sym.data_size),
      "countof" => Ok(sym.data_count),
      "linear" => Ok(((sym.bank as i32) << 13) + (v & 0x1fff)),
      _ => Ok(sym.overlay),
    }
  }

  /// Calls a function defined with `.func`: each `\n` in its body is replaced
  /// by the parenthesized `n`th argument, and the result is evaluated.
  fn call_user(
    &mut self,
    name: &str,
    args: &[Token],
    meta: &mut Value,
    depth: usize,
  ) -> Result<i32, ErrorType> {
    lazy_static! {
      static ref PARAM: Regex = Regex::new(r"\\([1-9])").unwrap();
    }

    if depth >= FUNC_DEPTH {
      return Err(ErrorType::FunctionDepth);
    }
    let body = match self.find_function(name) {
      Some(id) => self.sym(id).func_body.clone(),
      None => None,
    };
    let body = match body {
      Some(body) => body,
      None => return Err(ErrorType::UnknownInstruction(name.to_string())),
    };
    let args = split_tokens(args)
      .into_iter()
      .map(untokenize)
      .collect::<Vec<_>>();

    let mut text = String::with_capacity(body.len());
    let mut last = 0;
    for caps in PARAM.captures_iter(&body) {
      let whole = caps.get(0).map_or(0..0, |m| m.range());
      let n = caps[1].parse::<usize>().unwrap_or(1);
      let arg = args.get(n - 1).ok_or_else(|| {
        ErrorType::ExprSyntax(format!("{} needs argument {}", name, n))
      })?;
      text.push_str(&body[last..whole.start]);
      text.push('(');
      text.push_str(arg);
      text.push(')');
      last = whole.end;
    }
    text.push_str(&body[last..]);

    let tokens = lex(&text).map_err(ErrorType::Lex)?;
    self.eval_tokens(&tokens, meta, depth + 1)
  }
}

fn unexpected(tok: Token) -> ErrorType {
  ErrorType::ExprSyntax(format!("unexpected {}", tok))
}

fn push_value(value: i32, values: &mut Vec<i32>) -> Result<(), ErrorType> {
  if values.len() >= STACK_DEPTH {
    return Err(ErrorType::ExprTooComplex);
  }
  values.push(value);
  Ok(())
}

fn push_infix(
  op: Op,
  values: &mut Vec<i32>,
  ops: &mut Vec<Op>,
  meta: &mut Value,
) -> Result<(), ErrorType> {
  while let Some(&top) = ops.last() {
    if top == Op::Paren || top.prec() < op.prec() {
      break;
    }
    ops.pop();
    top.apply(values)?;
  }
  if ops.len() >= STACK_DEPTH {
    return Err(ErrorType::ExprTooComplex);
  }
  meta.complex = true;
  ops.push(op);
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::asm::test::assemble_text;
  use crate::config::Config;

  fn assembler() -> Assembler {
    let mut asm = Assembler::new(Config::default());
    asm.reset_locs();
    asm
  }

  macro_rules! eval {
    ($text:expr) => {
      assembler().eval($text).map(|v| v.value)
    };
  }

  #[test]
  fn precedence() {
    assert_eq!(eval!("2 + 3 * 4"), Ok(14));
    assert_eq!(eval!("(2 + 3) * 4"), Ok(20));
    assert_eq!(eval!("1 << 4"), Ok(16));
    assert_eq!(eval!("$FF & $0F"), Ok(15));
    assert_eq!(eval!("10 - 4 - 3"), Ok(3));
    assert_eq!(eval!("-2 * 3"), Ok(-6));
    assert_eq!(eval!("1 + 2 == 3 && 4 > 3"), Ok(1));
  }

  #[test]
  fn byte_operators() {
    assert_eq!(eval!("<$1234"), Ok(0x34));
    assert_eq!(eval!(">$1234"), Ok(0x12));
    assert_eq!(eval!(">$1200 + $34"), Ok(0x12));
    assert_eq!(eval!("3 < 4"), Ok(1));
    assert_eq!(eval!("HIGH($abcd) + low($abcd)"), Ok(0xab + 0xcd));
  }

  #[test]
  fn percent() {
    assert_eq!(eval!("%1010"), Ok(10));
    assert_eq!(eval!("17 %10"), Ok(7));
    assert!(eval!("%102").is_err());
  }

  #[test]
  fn pc_and_errors() {
    assert_eq!(eval!("* + 2"), Ok(0xe002));
    assert_eq!(eval!("1 / 0"), Err(ErrorType::DivideByZero));
    assert_eq!(eval!("5 % (3 - 3)"), Err(ErrorType::DivideByZero));
    assert_eq!(eval!("(1 + 2"), Err(ErrorType::UnbalancedParens));
    assert_eq!(eval!("1 + 2)"), Err(ErrorType::UnbalancedParens));
    assert_eq!(eval!("\"x\""), Err(ErrorType::StringInExpr));
    assert!(eval!("1 +").is_err());
    assert!(eval!("1 2").is_err());
  }

  #[test]
  fn stack_limit() {
    let deep = format!("{}1{}", "(".repeat(70), ")".repeat(70));
    assert_eq!(eval!(&deep), Err(ErrorType::ExprTooComplex));
  }

  #[test]
  fn undefined_symbols() {
    let mut asm = assembler();
    let v = asm.eval("later + 1").unwrap();
    assert!(v.undef);
    assert_eq!(v.value, 1);
    assert!(asm.errors.is_empty());
    assert_eq!(
      asm.eval_defined("later"),
      Err(ErrorType::Undefined("later".into()))
    );
  }

  #[test]
  fn bank_addresses() {
    let mut asm = assembler();
    let v = asm.eval_addr("3:$4000").unwrap();
    assert_eq!((v.bank, v.value), (Some(3), 0x4000));
    assert_eq!(asm.eval_addr("300:0"), Err(ErrorType::BankAddr));
    assert!(asm.eval("3:$4000").is_err());
  }

  #[test]
  fn queries_and_functions() {
    let out = assemble_text(
      "
scale  .func (\\1) * 4 + \\2
  .org $e000
  .db 0
table: .db 1, 2, 3
  .bank 2
  .org $c000
far:
  .bank 0
  .db SIZEOF(table), BANK(far), PAGE(far), scale(1 + 1, 2)
  .dw LINEAR(far)
  .db DEFINED(table), DEFINED(nowhere)
",
    )
    .unwrap();
    assert_eq!(out.lookup("table"), Some(0xe001));
    let tail = (4..12)
      .map(|o| out.image.get(0, o).unwrap_or(0xff))
      .collect::<Vec<_>>();
    assert_eq!(tail, vec![3, 2, 6, 10, 0x00, 0x40, 1, 0]);
  }

  #[test]
  fn query_needs_one_symbol() {
    let mut asm = assembler();
    assert_eq!(asm.eval("BANK(1 + 2)"), Err(ErrorType::FunctionArg("BANK")));
  }
}
