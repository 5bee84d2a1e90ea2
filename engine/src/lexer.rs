// Lexer for mica source files.
//
// Tokenizes source text using the `logos` crate for DFA-based lexing.
// Newlines and semicolons are significant (statement terminators); all
// other whitespace and `#` comments are skipped.
//
// Preconditions: input is valid UTF-8 (the source registry decodes first).
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

use crate::ast::Span;

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Mica token types.
///
/// Keywords and symbols are matched as fixed strings. Literals carry parsed
/// values. Identifiers carry no value — use the span to retrieve the text
/// from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("fn")]
    Fn,
    #[token("class")]
    Class,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("del")]
    Del,
    #[token("not")]
    Not,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("is")]
    Is,
    #[token("in")]
    In,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token("=")]
    Equals,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
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
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("->")]
    Arrow,

    // ── Literals ──
    /// Float literal. Must appear before Int so the longer match wins.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", parse_float)]
    Float(f64),

    /// Integer literal.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    /// Format string: `f"text {name} more"`. Carries the raw inner text
    /// (quotes and `f` prefix stripped, escapes untouched); the parser
    /// splits interpolation fields and computes their spans.
    #[regex(r#"f"([^"\\\n]|\\.)*""#, parse_fstring_raw)]
    FStr(String),

    /// String literal with `\"`, `\\`, `\n`, `\t` escapes.
    #[regex(r#""([^"\\\n]|\\.)*""#, parse_string)]
    Str(String),

    // ── Identifier ──
    //
    // Placed after keywords — logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `fn` matches Fn, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (significant — statement terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Fn => write!(f, "fn"),
            Token::Class => write!(f, "class"),
            Token::Return => write!(f, "return"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::Del => write!(f, "del"),
            Token::Not => write!(f, "not"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Is => write!(f, "is"),
            Token::In => write!(f, "in"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Nil => write!(f, "nil"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Colon => write!(f, ":"),
            Token::Semi => write!(f, ";"),
            Token::Equals => write!(f, "="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::PlusEq => write!(f, "+="),
            Token::MinusEq => write!(f, "-="),
            Token::StarEq => write!(f, "*="),
            Token::SlashEq => write!(f, "/="),
            Token::Arrow => write!(f, "->"),
            Token::Float(v) => write!(f, "{v}"),
            Token::Int(v) => write!(f, "{v}"),
            Token::FStr(s) => write!(f, "f\"{s}\""),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    unescape(&lex.slice()[1..lex.slice().len() - 1])
}

fn parse_fstring_raw(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    // Strip the `f"` prefix and closing quote; keep escapes raw so the
    // parser can compute field spans against the original source bytes.
    let slice = lex.slice();
    Some(slice[2..slice.len() - 1].to_string())
}

/// Resolve string escapes in a raw source fragment. Used by the parser for
/// format-string text segments, which the lexer hands over unprocessed.
pub(crate) fn unescape_text(inner: &str) -> Option<String> {
    unescape(inner)
}

fn unescape(inner: &str) -> Option<String> {
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

// ── Public API ──

/// Lex a mica source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start as u32,
            end: range.end as u32,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!(
                    "unexpected character: {:?}",
                    &source[range.start..range.end]
                ),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("fn class return if else while del not and or is in true false nil");
        assert_eq!(
            tokens,
            vec![
                Token::Fn,
                Token::Class,
                Token::Return,
                Token::If,
                Token::Else,
                Token::While,
                Token::Del,
                Token::Not,
                Token::And,
                Token::Or,
                Token::Is,
                Token::In,
                Token::True,
                Token::False,
                Token::Nil,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `fname` is an identifier, not keyword `fn` + `ame`
        let tokens = lex_ok("fn fname");
        assert_eq!(tokens, vec![Token::Fn, Token::Ident]);
    }

    #[test]
    fn compound_operators() {
        let tokens = lex_ok("== != <= >= += -= *= /= ->");
        assert_eq!(
            tokens,
            vec![
                Token::EqEq,
                Token::NotEq,
                Token::Le,
                Token::Ge,
                Token::PlusEq,
                Token::MinusEq,
                Token::StarEq,
                Token::SlashEq,
                Token::Arrow,
            ]
        );
    }

    #[test]
    fn int_literal() {
        let tokens = lex_ok("134895");
        assert_eq!(tokens, vec![Token::Int(134895)]);
    }

    #[test]
    fn float_literal() {
        let tokens = lex_ok("3.25 1.0e3");
        assert_eq!(tokens, vec![Token::Float(3.25), Token::Float(1000.0)]);
    }

    #[test]
    fn string_escapes() {
        let tokens = lex_ok(r#""say \"hi\"\n""#);
        assert_eq!(tokens, vec![Token::Str("say \"hi\"\n".into())]);
    }

    #[test]
    fn fstring_keeps_raw_inner_text() {
        let tokens = lex_ok(r#"f"a {name} b""#);
        assert_eq!(tokens, vec![Token::FStr("a {name} b".into())]);
    }

    #[test]
    fn fstring_vs_ident_prefix() {
        // A bare `f` is an identifier; `f"..."` is a format string.
        let tokens = lex_ok(r#"f f"x""#);
        assert_eq!(tokens, vec![Token::Ident, Token::FStr("x".into())]);
    }

    #[test]
    fn semicolons_and_newlines() {
        let tokens = lex_ok("a; b\nc");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Semi,
                Token::Ident,
                Token::Newline,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn multiple_newlines_collapsed() {
        let tokens = lex_ok("a\n\n\nb");
        assert_eq!(tokens, vec![Token::Ident, Token::Newline, Token::Ident]);
    }

    #[test]
    fn comment_skipped() {
        let tokens = lex_ok("x # trailing comment\ny");
        assert_eq!(tokens, vec![Token::Ident, Token::Newline, Token::Ident]);
    }

    #[test]
    fn spans_correct() {
        let result = lex("del foo");
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 3 });
        assert_eq!(result.tokens[1].1, Span { start: 4, end: 7 });
    }

    #[test]
    fn error_recovery() {
        let result = lex("foo ~ bar");
        let tokens: Vec<Token> = result.tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 4, end: 5 });
    }

    #[test]
    fn method_call_chain() {
        let tokens = lex_ok("obj.field[0](x)");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Dot,
                Token::Ident,
                Token::LBracket,
                Token::Int(0),
                Token::RBracket,
                Token::LParen,
                Token::Ident,
                Token::RParen,
            ]
        );
    }
}
