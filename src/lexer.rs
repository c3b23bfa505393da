//! Hand-written tokenizer for the factor s-expression grammar.
//!
//! The grammar is small enough (parens, a handful of atom shapes) that a
//! single-pass byte scanner is simpler and faster than pulling in a
//! parser-combinator crate; this mirrors how the reference codebase tokenizes
//! its own formal language by hand rather than through a generated lexer.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    /// A bare identifier: an operator name like `+`, `TSMean`, `And`, `!`.
    Ident(String),
    /// A `:`-prefixed column reference, without the leading colon.
    ColumnRef(String),
    /// A signed decimal literal.
    Number(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
    pub text: String,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// A tokenizing failure, reported back as a `ParseErrorKind::UnexpectedToken`
/// by the caller along with the byte offset and snippet recorded here.
#[derive(Debug)]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Operator identifiers also include bare symbolic names (`+`, `-`, `*`,
/// `/`, `^`, `>`, `>=`, `<`, `<=`, `==`, `!`) which do not follow the
/// identifier character class above; they are recognized as fixed strings.
const SYMBOLIC_OPERATORS: &[&str] = &["+", "-", "*", "/", "^", ">=", "<=", "==", ">", "<", "!"];

pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let bytes = source.as_bytes();
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;
    // byte offset tracking parallels `chars` index-for-index only for ASCII
    // input, which is all the grammar admits; `position` is therefore a
    // char index used purely for diagnostics.
    let _ = bytes;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            out.push(Token { kind: TokenKind::LParen, position: i, text: "(".to_string() });
            i += 1;
            continue;
        }
        if c == ')' {
            out.push(Token { kind: TokenKind::RParen, position: i, text: ")".to_string() });
            i += 1;
            continue;
        }
        if c == ':' {
            let start = i;
            i += 1;
            let name_start = i;
            if i >= chars.len() || !is_ident_start(chars[i]) {
                return Err(LexError { position: start, snippet: chars[start..].iter().collect() });
            }
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            let name: String = chars[name_start..i].iter().collect();
            out.push(Token { kind: TokenKind::ColumnRef(name.clone()), position: start, text: format!(":{name}") });
            continue;
        }
        if c.is_ascii_digit() || ((c == '-' || c == '+') && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) {
            let start = i;
            if c == '-' || c == '+' {
                i += 1;
            }
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i < chars.len() && chars[i] == '.' {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mark = i;
                i += 1;
                if i < chars.len() && (chars[i] == '-' || chars[i] == '+') {
                    i += 1;
                }
                if i < chars.len() && chars[i].is_ascii_digit() {
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                } else {
                    i = mark;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value: f64 = text.parse().map_err(|_| LexError { position: start, snippet: text.clone() })?;
            out.push(Token { kind: TokenKind::Number(value), position: start, text });
            continue;
        }
        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            out.push(Token { kind: TokenKind::Ident(text.clone()), position: start, text });
            continue;
        }
        // Try the longest matching symbolic operator first (">=" before ">").
        let mut matched = false;
        for sym in SYMBOLIC_OPERATORS {
            let len = sym.chars().count();
            if chars[i..].iter().take(len).collect::<String>() == **sym {
                out.push(Token { kind: TokenKind::Ident((*sym).to_string()), position: i, text: (*sym).to_string() });
                i += len;
                matched = true;
                break;
            }
        }
        if matched {
            continue;
        }
        return Err(LexError { position: i, snippet: chars[i..].iter().take(8).collect() });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_application() {
        let toks = tokenize("(+ :x :y)").unwrap();
        assert_eq!(toks.len(), 5);
        assert_eq!(toks[0].kind, TokenKind::LParen);
        assert_eq!(toks[1].kind, TokenKind::Ident("+".to_string()));
        assert_eq!(toks[2].kind, TokenKind::ColumnRef("x".to_string()));
    }

    #[test]
    fn tokenizes_negative_and_decimal_numbers() {
        let toks = tokenize("(> :x -0.0005)").unwrap();
        assert_eq!(toks[3].kind, TokenKind::Number(-0.0005));
    }

    #[test]
    fn tokenizes_comparison_operators_longest_match_first() {
        let toks = tokenize("(>= :x 1)").unwrap();
        assert_eq!(toks[1].kind, TokenKind::Ident(">=".to_string()));
    }

    #[test]
    fn rejects_bad_column_ref() {
        assert!(tokenize("(+ : :y)").is_err());
    }
}
