//! Recursive-descent parser for the factor s-expression grammar (spec §4.1).
//!
//! Builds the operator tree top-down, validating arity and argument kinds as
//! it goes; any violation produces a `ParseError` carrying the offending
//! substring and its byte offset, per spec §7.

use crate::error::{ParseError, ParseErrorKind};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::node::Node;
use crate::ops::{CorrState, ExtremumState, Kind, MomentState, Op, OrderStatState, SumState};

const ROLLING_NAMES: &[&str] = &[
    "Sum", "Mean", "Min", "Max", "ArgMin", "ArgMax", "Std", "Skew", "Rank", "Quantile", "LogReturn",
    "Corr", "Delay",
];

/// Strips an optional `TS` alias prefix, but only when doing so yields a
/// recognized rolling-operator name — this is the concrete rule behind
/// "names prefixed TS and their unprefixed counterparts are aliases".
fn canonical_rolling_name(name: &str) -> Option<&str> {
    if ROLLING_NAMES.contains(&name) {
        return Some(name);
    }
    if let Some(rest) = name.strip_prefix("TS") {
        if ROLLING_NAMES.contains(&rest) {
            return Some(rest);
        }
    }
    None
}

pub fn parse(source: &str) -> Result<Node, ParseError> {
    let tokens = tokenize(source).map_err(|e| ParseError {
        kind: ParseErrorKind::UnexpectedToken,
        position: e.position,
        snippet: e.snippet,
    })?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let node = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        let tok = &parser.tokens[parser.pos];
        return Err(parser.error(ParseErrorKind::TrailingInput, tok));
    }
    Ok(node)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, kind: ParseErrorKind, tok: &Token) -> ParseError {
        ParseError { kind, position: tok.position, snippet: tok.text.clone() }
    }

    fn eof_error(&self, kind: ParseErrorKind) -> ParseError {
        let position = self.tokens.last().map(|t| t.position + t.text.len()).unwrap_or(0);
        ParseError { kind, position, snippet: String::new() }
    }

    fn parse_expr(&mut self) -> Result<Node, ParseError> {
        match self.peek() {
            Some(Token { kind: TokenKind::Number(v), .. }) => {
                let v = *v;
                self.bump();
                Ok(Node::leaf(Op::Literal(v), Kind::Num))
            }
            Some(Token { kind: TokenKind::ColumnRef(name), .. }) => {
                let name = name.clone();
                self.bump();
                Ok(Node::leaf(Op::Column(name), Kind::Num))
            }
            Some(Token { kind: TokenKind::LParen, .. }) => self.parse_list(),
            Some(tok) => Err(self.error(ParseErrorKind::UnexpectedToken, &tok.clone())),
            None => Err(self.eof_error(ParseErrorKind::UnexpectedToken)),
        }
    }

    fn expect_lparen(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Some(Token { kind: TokenKind::LParen, .. }) => {
                self.bump();
                Ok(())
            }
            Some(tok) => Err(self.error(ParseErrorKind::UnexpectedToken, &tok.clone())),
            None => Err(self.eof_error(ParseErrorKind::UnexpectedToken)),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Some(Token { kind: TokenKind::RParen, .. }) => {
                self.bump();
                Ok(())
            }
            Some(tok) => Err(self.error(ParseErrorKind::ArityMismatch {
                operator: "<list>".to_string(),
                expected: "fewer".to_string(),
                found: usize::MAX,
            }, &tok.clone())),
            None => Err(self.eof_error(ParseErrorKind::UnterminatedList)),
        }
    }

    fn read_operator_name(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token { kind: TokenKind::Ident(name), .. }) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            Some(tok) => Err(self.error(ParseErrorKind::UnknownOperator, &tok.clone())),
            None => Err(self.eof_error(ParseErrorKind::UnknownOperator)),
        }
    }

    fn expect_number(&mut self) -> Result<f64, ParseError> {
        match self.peek() {
            Some(Token { kind: TokenKind::Number(v), .. }) => {
                let v = *v;
                self.bump();
                Ok(v)
            }
            Some(tok) => Err(self.error(ParseErrorKind::ExpectedLiteral, &tok.clone())),
            None => Err(self.eof_error(ParseErrorKind::ExpectedLiteral)),
        }
    }

    fn expect_kind(&self, node: &Node, expected: Kind, op_text: &Token) -> Result<(), ParseError> {
        if node.kind != expected {
            let expected_str = if expected == Kind::Num { "numeric" } else { "boolean" };
            return Err(self.error(ParseErrorKind::KindMismatch { expected: expected_str }, op_text));
        }
        Ok(())
    }

    fn arity_error(&self, operator: &str, expected: usize, found: usize, tok: &Token) -> ParseError {
        self.error(
            ParseErrorKind::ArityMismatch { operator: operator.to_string(), expected: expected.to_string(), found },
            tok,
        )
    }

    fn window_usize(&self, raw: f64, tok: &Token, min: usize, op: &str) -> Result<usize, ParseError> {
        if raw < min as f64 || raw.fract() != 0.0 {
            return Err(self.error(
                ParseErrorKind::InvalidWindow { reason: format!("{op} requires an integer window >= {min}, got {raw}") },
                tok,
            ));
        }
        Ok(raw as usize)
    }

    fn parse_list(&mut self) -> Result<Node, ParseError> {
        let op_tok = {
            self.expect_lparen()?;
            let name_tok = self.peek().cloned().ok_or_else(|| self.eof_error(ParseErrorKind::UnknownOperator))?;
            name_tok
        };
        let name = self.read_operator_name()?;

        let node = match name.as_str() {
            "+" => self.binary_arith(&op_tok, Op::Add)?,
            "-" => self.binary_arith(&op_tok, Op::Sub)?,
            "*" => self.binary_arith(&op_tok, Op::Mul)?,
            "/" => self.binary_arith(&op_tok, Op::Div)?,
            "^" => self.binary_arith(&op_tok, Op::Pow)?,
            "SPow" => self.binary_arith(&op_tok, Op::SPow)?,
            "Abs" => self.unary_arith(&op_tok, Op::Abs)?,
            "Sign" => self.unary_arith(&op_tok, Op::Sign)?,
            "LogAbs" => self.unary_arith(&op_tok, Op::LogAbs)?,
            ">" => self.compare(&op_tok, Op::Gt)?,
            ">=" => self.compare(&op_tok, Op::Ge)?,
            "<" => self.compare(&op_tok, Op::Lt)?,
            "<=" => self.compare(&op_tok, Op::Le)?,
            "==" => self.compare(&op_tok, Op::Eq)?,
            "And" => self.logic_binary(&op_tok, Op::And)?,
            "Or" => self.logic_binary(&op_tok, Op::Or)?,
            "!" => self.logic_unary(&op_tok)?,
            "If" => self.if_expr(&op_tok)?,
            other => {
                if let Some(canon) = canonical_rolling_name(other) {
                    self.rolling(&op_tok, canon)?
                } else {
                    return Err(self.error(ParseErrorKind::UnknownOperator, &op_tok));
                }
            }
        };

        self.expect_rparen()?;
        Ok(node)
    }

    fn binary_arith(&mut self, op_tok: &Token, op: Op) -> Result<Node, ParseError> {
        let a = self.parse_expr()?;
        let b = self.parse_expr()?;
        self.expect_kind(&a, Kind::Num, op_tok)?;
        self.expect_kind(&b, Kind::Num, op_tok)?;
        self.expect_no_more_args(op_tok)?;
        Ok(Node::branch(op, vec![a, b], Kind::Num))
    }

    fn unary_arith(&mut self, op_tok: &Token, op: Op) -> Result<Node, ParseError> {
        let a = self.parse_expr()?;
        self.expect_kind(&a, Kind::Num, op_tok)?;
        self.expect_no_more_args(op_tok)?;
        Ok(Node::branch(op, vec![a], Kind::Num))
    }

    fn compare(&mut self, op_tok: &Token, op: Op) -> Result<Node, ParseError> {
        let a = self.parse_expr()?;
        let b = self.parse_expr()?;
        self.expect_kind(&a, Kind::Num, op_tok)?;
        self.expect_kind(&b, Kind::Num, op_tok)?;
        self.expect_no_more_args(op_tok)?;
        Ok(Node::branch(op, vec![a, b], Kind::Bool))
    }

    fn logic_binary(&mut self, op_tok: &Token, op: Op) -> Result<Node, ParseError> {
        let a = self.parse_expr()?;
        let b = self.parse_expr()?;
        self.expect_kind(&a, Kind::Bool, op_tok)?;
        self.expect_kind(&b, Kind::Bool, op_tok)?;
        self.expect_no_more_args(op_tok)?;
        Ok(Node::branch(op, vec![a, b], Kind::Bool))
    }

    fn logic_unary(&mut self, op_tok: &Token) -> Result<Node, ParseError> {
        let a = self.parse_expr()?;
        self.expect_kind(&a, Kind::Bool, op_tok)?;
        self.expect_no_more_args(op_tok)?;
        Ok(Node::branch(Op::Not, vec![a], Kind::Bool))
    }

    fn if_expr(&mut self, op_tok: &Token) -> Result<Node, ParseError> {
        let cond = self.parse_expr()?;
        let a = self.parse_expr()?;
        let b = self.parse_expr()?;
        self.expect_kind(&cond, Kind::Bool, op_tok)?;
        if a.kind != b.kind {
            return Err(self.error(ParseErrorKind::KindMismatch { expected: "matching branch kinds" }, op_tok));
        }
        self.expect_no_more_args(op_tok)?;
        let kind = a.kind;
        Ok(Node::branch(Op::If, vec![cond, a, b], kind))
    }

    fn rolling(&mut self, op_tok: &Token, canon: &str) -> Result<Node, ParseError> {
        match canon {
            "Corr" => {
                let w_raw = self.expect_number()?;
                let w = self.window_usize(w_raw, op_tok, 2, "TSCorr")?;
                let a = self.parse_expr()?;
                let b = self.parse_expr()?;
                self.expect_kind(&a, Kind::Num, op_tok)?;
                self.expect_kind(&b, Kind::Num, op_tok)?;
                self.expect_no_more_args(op_tok)?;
                Ok(Node::branch(Op::Corr { window: w, state: CorrState::new(w) }, vec![a, b], Kind::Num))
            }
            "Quantile" => {
                let w_raw = self.expect_number()?;
                let w = self.window_usize(w_raw, op_tok, 1, "TSQuantile")?;
                let q = self.expect_number()?;
                if !(0.0..=1.0).contains(&q) {
                    return Err(self.error(ParseErrorKind::InvalidQuantile, op_tok));
                }
                let x = self.parse_expr()?;
                self.expect_kind(&x, Kind::Num, op_tok)?;
                self.expect_no_more_args(op_tok)?;
                Ok(Node::branch(Op::Quantile { window: w, q, state: OrderStatState::new(w) }, vec![x], Kind::Num))
            }
            "Rank" => {
                let w = self.read_window(op_tok, 1, "TSRank")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::Rank { window: w, state: OrderStatState::new(w) }, vec![x], Kind::Num))
            }
            "Sum" => {
                let w = self.read_window(op_tok, 1, "TSSum")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::Sum { window: w, state: SumState::new(w) }, vec![x], Kind::Num))
            }
            "Mean" => {
                let w = self.read_window(op_tok, 1, "TSMean")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::Mean { window: w, state: SumState::new(w) }, vec![x], Kind::Num))
            }
            "Min" => {
                let w = self.read_window(op_tok, 1, "TSMin")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::Min { window: w, state: ExtremumState::new(w, true) }, vec![x], Kind::Num))
            }
            "Max" => {
                let w = self.read_window(op_tok, 1, "TSMax")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::Max { window: w, state: ExtremumState::new(w, false) }, vec![x], Kind::Num))
            }
            "ArgMin" => {
                let w = self.read_window(op_tok, 1, "TSArgMin")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::ArgMin { window: w, state: ExtremumState::new(w, true) }, vec![x], Kind::Num))
            }
            "ArgMax" => {
                let w = self.read_window(op_tok, 1, "TSArgMax")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::ArgMax { window: w, state: ExtremumState::new(w, false) }, vec![x], Kind::Num))
            }
            "Std" => {
                let w = self.read_window(op_tok, 2, "TSStd")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::Std { window: w, state: MomentState::new(w) }, vec![x], Kind::Num))
            }
            "Skew" => {
                let w = self.read_window(op_tok, 3, "TSSkew")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::Skew { window: w, state: MomentState::new(w) }, vec![x], Kind::Num))
            }
            "Delay" => {
                let w = self.read_window(op_tok, 1, "Delay")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::Delay { window: w, buf: Default::default() }, vec![x], Kind::Num))
            }
            "LogReturn" => {
                let w = self.read_window(op_tok, 1, "TSLogReturn")?;
                let x = self.expect_num_child(op_tok)?;
                Ok(Node::branch(Op::LogReturn { window: w, buf: Default::default() }, vec![x], Kind::Num))
            }
            _ => unreachable!("canonical_rolling_name only returns recognized names"),
        }
    }

    fn read_window(&mut self, op_tok: &Token, min: usize, name: &str) -> Result<usize, ParseError> {
        let raw = self.expect_number()?;
        self.window_usize(raw, op_tok, min, name)
    }

    fn expect_num_child(&mut self, op_tok: &Token) -> Result<Node, ParseError> {
        let x = self.parse_expr()?;
        self.expect_kind(&x, Kind::Num, op_tok)?;
        self.expect_no_more_args(op_tok)?;
        Ok(x)
    }

    /// After reading the expected arguments, the next token must close the
    /// list; anything else means too many arguments were supplied.
    fn expect_no_more_args(&self, op_tok: &Token) -> Result<(), ParseError> {
        match self.peek() {
            Some(Token { kind: TokenKind::RParen, .. }) => Ok(()),
            Some(tok) => Err(self.arity_error(&op_tok.text, 0, 0, &tok.clone())),
            None => Err(self.eof_error(ParseErrorKind::UnterminatedList)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_arithmetic() {
        let node = parse("(+ :x :y)").unwrap();
        assert_eq!(node.to_string_canonical(), "(+ :x :y)");
    }

    #[test]
    fn canonicalizes_ts_alias() {
        let node = parse("(Sum 3 :x)").unwrap();
        assert_eq!(node.to_string_canonical(), "(TSSum 3 :x)");
        let node2 = parse("(TSSum 3 :x)").unwrap();
        assert_eq!(node2.to_string_canonical(), node.to_string_canonical());
    }

    #[test]
    fn rejects_bad_arity() {
        assert!(parse("(+ :x)").is_err());
        assert!(parse("(+ :x :y :z)").is_err());
    }

    #[test]
    fn rejects_zero_window() {
        let err = parse("(TSSum 0 :x)").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::InvalidWindow { .. }));
    }

    #[test]
    fn rejects_logic_on_numeric_operand() {
        assert!(parse("(And :x :y)").is_err());
    }

    #[test]
    fn parses_if_with_matching_branch_kinds() {
        let node = parse("(If (> :x 5) :y :x)").unwrap();
        assert_eq!(node.kind, Kind::Num);
    }

    #[test]
    fn parses_nested_rolling_example() {
        let node = parse("(> (TSStd 60 (TSLogReturn 120 (+ :price_bid :price_ask))) 0.0005)").unwrap();
        assert_eq!(node.ready_offset, 60 - 1 + 120);
    }

    #[test]
    fn quantile_requires_level_in_range() {
        assert!(parse("(TSQuantile 4 1.5 :x)").is_err());
    }
}
