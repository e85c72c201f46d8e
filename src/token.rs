//! Token definitions for C-Accel
//!
//! This module defines all the tokens that the scanner can produce.

use crate::span::{Position, Span};
use logos::Logos;
use std::fmt;

/// A token produced by the scanner
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Literal text. String and char literals carry their decoded contents.
    pub text: String,
    pub span: Span,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, span: Span, position: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
            position,
        }
    }

    pub fn line(&self) -> u32 {
        self.position.line
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

/// Consume the body of a string literal after its opening quote.
///
/// A backslash takes the following character verbatim. A missing closing
/// quote swallows the rest of the input.
fn lex_string(lex: &mut logos::Lexer<TokenKind>) -> bool {
    let rest = lex.remainder();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                lex.bump(i + 1);
                return true;
            }
            '\\' => {
                chars.next();
            }
            _ => {}
        }
    }
    lex.bump(rest.len());
    true
}

/// Consume the body of a char literal after its opening quote: at most one
/// interior character, then an optional closing quote.
fn lex_char(lex: &mut logos::Lexer<TokenKind>) -> bool {
    let rest = lex.remainder();
    let mut chars = rest.chars();
    let len = match chars.next() {
        Some('\'') => 1,
        Some(c) if chars.next() == Some('\'') => c.len_utf8() + 1,
        Some(c) => c.len_utf8(),
        None => 0,
    };
    lex.bump(len);
    true
}

/// All possible token types in C-Accel
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n\f]+")]  // Skip whitespace
#[logos(skip r"//[^\n]*")]      // Skip line comments
pub enum TokenKind {
    // ============ Literals ============

    /// Integer literal: 42, -7
    #[regex(r"-?[0-9]+")]
    IntLiteral,

    /// Float literal: 3.14, -0.5, 2.
    #[regex(r"-?[0-9]+\.[0-9]*")]
    FloatLiteral,

    /// String literal: "hello", "say \"hi\""
    #[token("\"", lex_string)]
    StringLiteral,

    /// Character literal: 'a', ''
    #[token("'", lex_char)]
    CharLiteral,

    /// Boolean literal
    #[token("true")]
    #[token("false")]
    BoolLiteral,

    #[token("null")]
    Null,

    // ============ Keywords ============

    #[token("func")]
    Func,
    #[token("class")]
    Class,
    #[token("object")]
    Object,
    #[token("member")]
    Member,
    #[token("import")]
    Import,
    #[token("exec")]
    Exec,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("in")]
    In,
    #[token("range")]
    Range,
    #[token("return")]
    Return,
    #[token("print")]
    Print,
    #[token("vector")]
    Vector,
    #[token("push")]
    Push,
    #[token("pop")]
    Pop,
    #[token("size")]
    Size,
    #[token("len")]
    Len,

    // ============ Operators ============

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

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,

    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Not,

    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,

    // ============ Delimiters ============

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("#")]
    Hash,

    // ============ Identifiers ============

    /// Identifier: foo, _bar, Main
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,

    // ============ Special ============

    /// A character no other rule accepts
    Unknown,

    /// End of input
    Eof,
}

impl TokenKind {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Func
                | TokenKind::Class
                | TokenKind::Object
                | TokenKind::Member
                | TokenKind::Import
                | TokenKind::Exec
                | TokenKind::For
                | TokenKind::While
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::In
                | TokenKind::Range
                | TokenKind::Return
                | TokenKind::Print
                | TokenKind::Vector
                | TokenKind::Push
                | TokenKind::Pop
                | TokenKind::Size
                | TokenKind::Len
        )
    }

    /// Check if this token is a literal
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::IntLiteral
                | TokenKind::FloatLiteral
                | TokenKind::StringLiteral
                | TokenKind::CharLiteral
                | TokenKind::BoolLiteral
                | TokenKind::Null
        )
    }

    /// Check if this token is an operator
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::LtEq
                | TokenKind::GtEq
                | TokenKind::AndAnd
                | TokenKind::OrOr
                | TokenKind::Not
                | TokenKind::PlusPlus
                | TokenKind::MinusMinus
        )
    }

    /// `=` and the compound assignment operators
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::IntLiteral => "integer",
            TokenKind::FloatLiteral => "float",
            TokenKind::StringLiteral => "string",
            TokenKind::CharLiteral => "char",
            TokenKind::BoolLiteral => "boolean",
            TokenKind::Null => "null",
            TokenKind::Func => "func",
            TokenKind::Class => "class",
            TokenKind::Object => "object",
            TokenKind::Member => "member",
            TokenKind::Import => "import",
            TokenKind::Exec => "exec",
            TokenKind::For => "for",
            TokenKind::While => "while",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::In => "in",
            TokenKind::Range => "range",
            TokenKind::Return => "return",
            TokenKind::Print => "print",
            TokenKind::Vector => "vector",
            TokenKind::Push => "push",
            TokenKind::Pop => "pop",
            TokenKind::Size => "size",
            TokenKind::Len => "len",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Not => "!",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::Eq => "=",
            TokenKind::PlusEq => "+=",
            TokenKind::MinusEq => "-=",
            TokenKind::StarEq => "*=",
            TokenKind::SlashEq => "/=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Hash => "#",
            TokenKind::Identifier => "identifier",
            TokenKind::Unknown => "unknown",
            TokenKind::Eof => "end of file",
        };
        write!(f, "{}", s)
    }
}
