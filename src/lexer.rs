//! Scanner for C-Accel
//!
//! The scanner converts source code into a stream of tokens.
//! It uses the `logos` crate for efficient lexing. Scanning is total: a
//! character no rule accepts becomes an `Unknown` token and the stream always
//! ends with exactly one `Eof`.

use crate::span::{LineIndex, Span};
use crate::token::{Token, TokenKind};
use logos::Logos;

/// The scanner for C-Accel
pub struct Lexer<'src> {
    source: &'src str,
    inner: logos::Lexer<'src, TokenKind>,
    lines: LineIndex,
    peeked: Option<Token>,
    finished: bool,
}

impl<'src> Lexer<'src> {
    /// Create a new scanner for the given source code
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            inner: TokenKind::lexer(source),
            lines: LineIndex::new(source),
            peeked: None,
            finished: false,
        }
    }

    /// Get the source code
    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Peek at the next token without consuming it
    pub fn peek(&mut self) -> Option<&Token> {
        if self.peeked.is_none() {
            self.peeked = self.next_token();
        }
        self.peeked.as_ref()
    }

    /// Get the next token. Returns `Eof` once, then `None`.
    pub fn next_token(&mut self) -> Option<Token> {
        if let Some(token) = self.peeked.take() {
            return Some(token);
        }
        if self.finished {
            return None;
        }

        let (kind, range) = match self.inner.next() {
            Some(Ok(kind)) => (kind, self.inner.span()),
            Some(Err(())) => (TokenKind::Unknown, self.inner.span()),
            None => {
                self.finished = true;
                let end = self.source.len();
                (TokenKind::Eof, end..end)
            }
        };

        let span = Span::new(range.start, range.end);
        let slice = span.text(self.source);
        let text = match kind {
            TokenKind::StringLiteral => decode_string(slice),
            TokenKind::CharLiteral => decode_char(slice),
            _ => slice.to_string(),
        };
        let position = self.lines.position(self.source, span.start);

        Some(Token::new(kind, text, span, position))
    }

    /// Collect all tokens into a vector, `Eof` included
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token() {
            tokens.push(token);
        }
        tokens
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.next_token()?;
        if token.kind == TokenKind::Eof {
            None
        } else {
            Some(token)
        }
    }
}

/// Strip the quotes of a string literal. A backslash keeps the next
/// character as written; no escape codes are interpreted.
fn decode_string(slice: &str) -> String {
    let mut value = String::with_capacity(slice.len());
    let mut chars = slice.chars().skip(1);
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => {
                if let Some(escaped) = chars.next() {
                    value.push(escaped);
                }
            }
            c => value.push(c),
        }
    }
    value
}

/// The interior character of a char literal, or NUL for `''`
fn decode_char(slice: &str) -> String {
    match slice.chars().nth(1) {
        Some('\'') | None => "\0".to_string(),
        Some(c) => c.to_string(),
    }
}

/// Helper function to scan source code
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    fn token_texts(source: &str) -> Vec<String> {
        tokenize(source).into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(token_kinds(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_whitespace_and_comments_only() {
        let kinds = token_kinds("   \t\n  // nothing here\n// or here");
        assert_eq!(kinds, vec![TokenKind::Eof]);
    }

    #[test]
    fn test_always_single_trailing_eof() {
        for source in ["", "x", "@@@", "\"open", "'", "func(Main) {", "#", "1.2.3"] {
            let kinds = token_kinds(source);
            assert_eq!(kinds.last(), Some(&TokenKind::Eof), "source {:?}", source);
            let eofs = kinds.iter().filter(|k| **k == TokenKind::Eof).count();
            assert_eq!(eofs, 1, "source {:?}", source);
        }
    }

    #[test]
    fn test_iterator_stops_before_eof() {
        let kinds: Vec<_> = Lexer::new("a b").map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Identifier, TokenKind::Identifier]);
    }

    #[test]
    fn test_double_equals_is_one_token() {
        assert_eq!(token_kinds("=="), vec![TokenKind::EqEq, TokenKind::Eof]);
        assert_eq!(
            token_kinds("= ="),
            vec![TokenKind::Eq, TokenKind::Eq, TokenKind::Eof]
        );
    }

    #[test]
    fn test_two_char_operators() {
        let kinds = token_kinds("== != <= >= && || ++ -- += -= *= /=");
        assert_eq!(
            kinds,
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::SlashEq,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_single_char_operators_and_delimiters() {
        let kinds = token_kinds("+ - * / % . = < > ! ( ) { } [ ] , : ; #");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Dot,
                TokenKind::Eq,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Not,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::Comma,
                TokenKind::Colon,
                TokenKind::Semicolon,
                TokenKind::Hash,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 -7 3.14 2. 1.2.3");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral,
                TokenKind::IntLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::Dot,
                TokenKind::IntLiteral,
                TokenKind::Eof
            ]
        );
        assert_eq!(tokens[1].text, "-7");
        assert_eq!(tokens[4].text, "1.2");
    }

    #[test]
    fn test_minus_before_digit_is_part_of_number() {
        assert_eq!(
            token_kinds("x -1"),
            vec![TokenKind::Identifier, TokenKind::IntLiteral, TokenKind::Eof]
        );
        assert_eq!(
            token_kinds("x - 1"),
            vec![
                TokenKind::Identifier,
                TokenKind::Minus,
                TokenKind::IntLiteral,
                TokenKind::Eof
            ]
        );
        assert_eq!(
            token_kinds("--1"),
            vec![TokenKind::MinusMinus, TokenKind::IntLiteral, TokenKind::Eof]
        );
    }

    #[test]
    fn test_strings() {
        let tokens = tokenize(r#""hello" "say \"hi\"" "a\nb""#);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "hello");
        assert_eq!(tokens[1].text, "say \"hi\"");
        // escapes are kept verbatim, not interpreted
        assert_eq!(tokens[2].text, "anb");
        assert_eq!(tokens[3].kind, TokenKind::Eof);
    }

    #[test]
    fn test_unterminated_string_runs_to_end() {
        let tokens = tokenize("\"abc\ndef");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "abc\ndef");
    }

    #[test]
    fn test_chars() {
        let tokens = tokenize("'a' '' 'b");
        assert_eq!(tokens[0].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[0].text, "a");
        assert_eq!(tokens[1].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[1].text, "\0");
        assert_eq!(tokens[2].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[2].text, "b");
        assert_eq!(tokens[3].kind, TokenKind::Eof);
    }

    #[test]
    fn test_keywords() {
        let kinds = token_kinds(
            "func class object member import exec for while if else in range return print vector push pop size len",
        );
        assert_eq!(
            kinds,
            vec![
                TokenKind::Func,
                TokenKind::Class,
                TokenKind::Object,
                TokenKind::Member,
                TokenKind::Import,
                TokenKind::Exec,
                TokenKind::For,
                TokenKind::While,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::In,
                TokenKind::Range,
                TokenKind::Return,
                TokenKind::Print,
                TokenKind::Vector,
                TokenKind::Push,
                TokenKind::Pop,
                TokenKind::Size,
                TokenKind::Len,
                TokenKind::Eof
            ]
        );
        assert!(kinds[..19].iter().all(|k| k.is_keyword()));
    }

    #[test]
    fn test_boolean_and_null() {
        let tokens = tokenize("true false null truthy");
        assert_eq!(tokens[0].kind, TokenKind::BoolLiteral);
        assert_eq!(tokens[0].text, "true");
        assert_eq!(tokens[1].kind, TokenKind::BoolLiteral);
        assert_eq!(tokens[2].kind, TokenKind::Null);
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            token_texts("foo _bar Main x1 funcs"),
            vec!["foo", "_bar", "Main", "x1", "funcs", ""]
        );
    }

    #[test]
    fn test_unknown_characters() {
        let tokens = tokenize("a @ $");
        assert_eq!(tokens[1].kind, TokenKind::Unknown);
        assert_eq!(tokens[1].text, "@");
        assert_eq!(tokens[2].kind, TokenKind::Unknown);
        assert_eq!(tokens[2].text, "$");
        assert_eq!(tokens[3].kind, TokenKind::Eof);
    }

    #[test]
    fn test_import_directive() {
        let tokens = tokenize("#import \"math\"");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Hash,
                TokenKind::Import,
                TokenKind::StringLiteral,
                TokenKind::Eof
            ]
        );
        assert_eq!(tokens[2].text, "math");
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("func(Main) {\n  x = 1\n}");
        assert_eq!(tokens[0].position.line, 1);
        assert_eq!(tokens[0].position.column, 1);
        // x
        assert_eq!(tokens[5].text, "x");
        assert_eq!(tokens[5].line(), 2);
        assert_eq!(tokens[5].position.column, 3);
        // }
        assert_eq!(tokens[8].kind, TokenKind::RBrace);
        assert_eq!(tokens[8].line(), 3);
    }

    #[test]
    fn test_function_declaration() {
        let kinds = token_kinds("func(Main) {\n  print(\"hi\")\n}");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Func,
                TokenKind::LParen,
                TokenKind::Identifier, // Main
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::Print,
                TokenKind::LParen,
                TokenKind::StringLiteral,
                TokenKind::RParen,
                TokenKind::RBrace,
                TokenKind::Eof
            ]
        );
    }
}
