//! Parser for C-Accel
//!
//! A recursive descent parser that turns the token stream into a [`Node`]
//! tree. Malformed input never aborts the parse: every mismatch is recorded as
//! a line-tagged [`Diagnostic`] and parsing continues. The single exception is
//! a named entry point, which is a language rule violation and fails the whole
//! parse with a [`ParseError`].
//!
//! Loops over variable-length lists are capped at [`MAX_LOOP_ITERATIONS`] so
//! that a stalled cursor turns into a diagnostic instead of a hang.

use crate::ast::{Node, NodeKind};
use crate::lexer::tokenize;
use crate::span::{Position, Span};
use crate::token::{Token, TokenKind};
use std::fmt;
use thiserror::Error;

/// Default cap for every list-consuming loop
pub const MAX_LOOP_ITERATIONS: usize = 10_000;

/// Deepest nesting of blocks, parentheses and prefix operators
pub const MAX_NESTING_DEPTH: usize = 64;

/// Fatal parser errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error(
        "Line {line}: Main function cannot have a name (found \"{name}\"). \
         Use 'func(Main) {{ ... }}' with no '= \"name\"'."
    )]
    NamedEntryPoint { line: u32, name: String },
}

impl ParseError {
    pub fn line(&self) -> u32 {
        match self {
            ParseError::NamedEntryPoint { line, .. } => *line,
        }
    }
}

/// Parse result
pub type ParseResult<T> = Result<T, ParseError>;

/// A recoverable syntax problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

/// The parser for C-Accel
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    max_iterations: usize,
    depth: usize,
}

impl Parser {
    /// Create a new parser over a token stream
    pub fn new(tokens: Vec<Token>) -> Self {
        Self::with_limit(tokens, MAX_LOOP_ITERATIONS)
    }

    /// Create a parser with a custom loop iteration cap
    pub fn with_limit(mut tokens: Vec<Token>, max_iterations: usize) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let (end, position) = tokens
                .last()
                .map(|t| (t.span.end, t.position))
                .unwrap_or((0, Position::new(1, 1)));
            tokens.push(Token::new(TokenKind::Eof, "", Span::new(end, end), position));
        }
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            max_iterations,
            depth: 0,
        }
    }

    /// Diagnostics recorded so far
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    // ============ Cursor ============

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    /// Peek at the nth token ahead (0 = current). Past the end this is `Eof`.
    fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn is_at_end(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    /// Consume the current token. `Eof` is never consumed.
    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    /// Consume a token of the given kind, or record `message`
    fn expect(&mut self, kind: TokenKind, message: &str) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            let found = describe(self.peek());
            let line = self.peek().line();
            self.error(line, format!("{}, found {}", message, found));
            None
        }
    }

    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(line, message));
    }

    /// Count one loop iteration; records `message` once the cap is passed
    fn exceeded(&mut self, iterations: &mut usize, message: &str) -> bool {
        *iterations += 1;
        if *iterations > self.max_iterations {
            let line = self.peek().line();
            self.error(line, message);
            true
        } else {
            false
        }
    }

    /// Enter one nesting level. Past the cap the current token is consumed,
    /// reported, and false is returned.
    fn descend(&mut self) -> bool {
        if self.depth >= MAX_NESTING_DEPTH {
            let token = self.advance();
            self.error(token.line(), "Nesting too deep");
            return false;
        }
        self.depth += 1;
        true
    }

    fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Placeholder for an expression that could not be parsed
    fn placeholder(line: u32) -> Node {
        Node::new(NodeKind::Literal, "0", line).with_attribute("placeholder", "true")
    }

    // ============ Top-level parsing ============

    /// Parse a complete program
    pub fn parse_program(&mut self) -> ParseResult<Node> {
        let mut program = Node::new(NodeKind::Program, "", 1);

        while !self.is_at_end() {
            match self.peek().kind {
                TokenKind::Hash => {
                    let hash = self.advance();
                    if self.check(TokenKind::Import) {
                        program.add_child(self.parse_import());
                    } else {
                        self.error(hash.line(), "Expected 'import' after '#'");
                    }
                }
                TokenKind::Exec => program.add_child(self.parse_exec()),
                TokenKind::Func => program.add_child(self.parse_function()?),
                TokenKind::Class => program.add_child(self.parse_class()?),
                TokenKind::Semicolon => {
                    self.advance();
                }
                _ => {
                    let token = self.advance();
                    self.error(
                        token.line(),
                        format!("Unexpected token at top level: {}", describe(&token)),
                    );
                }
            }
        }

        Ok(program)
    }

    /// `import "module"` (the `#` is already consumed)
    fn parse_import(&mut self) -> Node {
        let import = self.advance();
        let mut node = Node::new(NodeKind::Import, "", import.line());
        if let Some(module) = self.expect(TokenKind::StringLiteral, "Expected module name after import") {
            node.value = module.text;
        }
        node
    }

    /// `exec(name = expr, expr, ...)`
    fn parse_exec(&mut self) -> Node {
        let exec = self.advance();
        let mut node = Node::new(NodeKind::Exec, "exec", exec.line());
        if self.expect(TokenKind::LParen, "Expected '(' after exec").is_none() {
            return node;
        }

        let mut iterations = 0;
        while !self.check(TokenKind::RParen) && !self.is_at_end() {
            if self.exceeded(
                &mut iterations,
                "Too many iterations parsing exec (possible infinite loop)",
            ) {
                break;
            }

            let before = self.pos;
            if self.check(TokenKind::Identifier) && self.peek_nth(1).kind == TokenKind::Eq {
                let name = self.advance();
                self.advance();
                let value = self.parse_expression();
                node.add_child(Node::new(NodeKind::Assignment, name.text.clone(), name.line()).with_child(value));
            } else {
                node.add_child(self.parse_expression());
            }

            if self.check(TokenKind::Comma) {
                self.advance();
            } else if self.pos == before && !self.check(TokenKind::RParen) {
                self.advance();
            }
        }

        self.expect(TokenKind::RParen, "Expected ')' after exec parameters");
        node
    }

    /// `func(Type) = "name" { ... }`
    fn parse_function(&mut self) -> ParseResult<Node> {
        let func = self.advance();
        let line = func.line();
        self.expect(TokenKind::LParen, "Expected '(' after func");

        let mut func_type = String::new();
        if self.check(TokenKind::Identifier) {
            func_type = self.advance().text;
        }
        self.expect(TokenKind::RParen, "Expected ')' after function type");

        let mut name = String::new();
        if self.check(TokenKind::Eq) {
            self.advance();
            if self.check(TokenKind::StringLiteral) || self.check(TokenKind::Identifier) {
                name = self.advance().text;
            } else {
                let found = describe(self.peek());
                self.error(line, format!("Expected function name after '=', found {}", found));
            }
        }

        if func_type == "Main" && !name.is_empty() {
            return Err(ParseError::NamedEntryPoint { line, name });
        }

        let value = if name.is_empty() { func_type.clone() } else { name };
        let mut node = Node::new(NodeKind::FunctionDecl, value, line).with_attribute("type", func_type);
        node.add_child(self.parse_block());
        Ok(node)
    }

    /// `class(Type) = "name" { object: a, b member: func... }`
    fn parse_class(&mut self) -> ParseResult<Node> {
        let class = self.advance();
        let line = class.line();
        self.expect(TokenKind::LParen, "Expected '(' after class");

        let mut class_type = String::new();
        if self.check(TokenKind::Identifier) {
            class_type = self.advance().text;
        }
        self.expect(TokenKind::RParen, "Expected ')' after class type");

        let mut name = String::new();
        if self.check(TokenKind::Eq) {
            self.advance();
            if let Some(token) = self.expect(TokenKind::StringLiteral, "Expected class name after '='") {
                name = token.text;
            }
        }

        let value = if name.is_empty() { class_type.clone() } else { name };
        let mut node = Node::new(NodeKind::ClassDecl, value, line).with_attribute("type", class_type);
        self.expect(TokenKind::LBrace, "Expected '{' after class declaration");

        let mut iterations = 0;
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if self.exceeded(&mut iterations, "Too many items in class body (possible infinite loop)") {
                break;
            }
            match self.peek().kind {
                TokenKind::Object => node.add_child(self.parse_object_section()),
                TokenKind::Member => node.add_child(self.parse_member_section()?),
                _ => {
                    let token = self.advance();
                    self.error(
                        token.line(),
                        format!("Expected 'object:' or 'member:' in class body, found {}", describe(&token)),
                    );
                }
            }
        }

        self.expect(TokenKind::RBrace, "Expected '}' after class body");
        Ok(node)
    }

    fn parse_object_section(&mut self) -> Node {
        let object = self.advance();
        let mut section = Node::new(NodeKind::ObjectSection, "object", object.line());
        self.expect(TokenKind::Colon, "Expected ':' after object");

        let mut iterations = 0;
        while !self.check(TokenKind::Member) && !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if self.exceeded(&mut iterations, "Too many items in list (possible infinite loop)") {
                break;
            }
            let token = self.advance();
            match token.kind {
                TokenKind::Identifier => {
                    section.add_child(Node::new(NodeKind::Identifier, token.text.clone(), token.line()));
                }
                TokenKind::Comma | TokenKind::Semicolon => {}
                _ => self.error(
                    token.line(),
                    format!("Expected field name in object section, found {}", describe(&token)),
                ),
            }
        }
        section
    }

    fn parse_member_section(&mut self) -> ParseResult<Node> {
        let member = self.advance();
        let mut section = Node::new(NodeKind::MemberSection, "member", member.line());
        self.expect(TokenKind::Colon, "Expected ':' after member");

        let mut iterations = 0;
        while !self.check(TokenKind::Object) && !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if self.exceeded(&mut iterations, "Too many items in list (possible infinite loop)") {
                break;
            }
            if self.check(TokenKind::Func) {
                let method = self.parse_function()?.with_attribute("isClass", "true");
                section.add_child(method);
            } else {
                let token = self.advance();
                self.error(
                    token.line(),
                    format!("Expected function declaration in member section, found {}", describe(&token)),
                );
            }
        }
        Ok(section)
    }

    // ============ Statements ============

    /// `{ statement* }`
    fn parse_block(&mut self) -> Node {
        let line = self.peek().line();
        if !self.descend() {
            return Node::new(NodeKind::Block, "", line);
        }
        let block = self.parse_block_body(line);
        self.ascend();
        block
    }

    fn parse_block_body(&mut self, line: u32) -> Node {
        let mut block = Node::new(NodeKind::Block, "", line);
        self.expect(TokenKind::LBrace, "Expected '{' to start block");

        let mut iterations = 0;
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if self.exceeded(&mut iterations, "Too many statements in block (possible infinite loop)") {
                break;
            }
            let before = self.pos;
            if let Some(statement) = self.parse_statement() {
                block.add_child(statement);
            }
            if self.pos == before && !self.check(TokenKind::RBrace) {
                let token = self.advance();
                self.error(token.line(), format!("Unexpected token: {}", describe(&token)));
            }
        }

        self.expect(TokenKind::RBrace, "Expected '}' to close block");
        block
    }

    fn parse_statement(&mut self) -> Option<Node> {
        match self.peek().kind {
            TokenKind::RBrace | TokenKind::Eof => None,
            TokenKind::Semicolon => {
                self.advance();
                None
            }
            TokenKind::For => Some(self.parse_for()),
            TokenKind::While => Some(self.parse_while()),
            TokenKind::If => Some(self.parse_if()),
            TokenKind::Return => Some(self.parse_return()),
            TokenKind::Print => Some(self.parse_print()),
            TokenKind::Vector => Some(self.parse_vector_decl()),
            TokenKind::Identifier if self.assignment_ahead() => Some(self.parse_assignment()),
            _ => Some(self.parse_expression()),
        }
    }

    /// Whether the identifier at the cursor starts an assignment, including
    /// the `name[index] op= value` form
    fn assignment_ahead(&self) -> bool {
        let next = self.peek_nth(1).kind;
        if next.is_assignment() {
            return true;
        }
        if next != TokenKind::LBracket {
            return false;
        }

        let mut depth = 0usize;
        let mut offset = 1;
        loop {
            match self.peek_nth(offset).kind {
                TokenKind::LBracket => depth += 1,
                TokenKind::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek_nth(offset + 1).kind.is_assignment();
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            offset += 1;
        }
    }

    /// `name = expr`, `name op= expr`, `name[index] op= expr`
    fn parse_assignment(&mut self) -> Node {
        let target = self.advance();
        let mut node = Node::new(NodeKind::Assignment, target.text.clone(), target.line());

        let mut index = None;
        if self.check(TokenKind::LBracket) {
            self.advance();
            index = Some(self.parse_expression());
            self.expect(TokenKind::RBracket, "Expected ']' after index");
            node.set_attribute("indexed", "true");
        }

        let op = self.peek().kind;
        if op.is_assignment() {
            self.advance();
            if op != TokenKind::Eq {
                node.set_attribute("operator", op.to_string());
            }
        } else {
            let found = describe(self.peek());
            self.error(
                target.line(),
                format!("Expected assignment operator after '{}', found {}", target.text, found),
            );
        }

        if let Some(index) = index {
            node.add_child(index);
        }
        node.add_child(self.parse_expression());
        node
    }

    /// `for (init, cond, incr) { }` or `for (x in expr) { }`
    fn parse_for(&mut self) -> Node {
        let token = self.advance();
        let mut node = Node::new(NodeKind::For, "", token.line());
        self.expect(TokenKind::LParen, "Expected '(' after for");

        if self.check(TokenKind::Identifier) && self.peek_nth(1).kind == TokenKind::In {
            let var = self.advance();
            self.advance();
            let iterable = self.parse_expression();
            node.add_child(Node::new(NodeKind::RangeFor, var.text.clone(), var.line()).with_child(iterable));
            self.expect(TokenKind::RParen, "Expected ')' after range expression");
            node.add_child(self.parse_block());
            return node;
        }

        let init = self.parse_for_clause();
        self.expect_separator("Expected ',' after for initializer");
        let condition = self.parse_expression();
        self.expect_separator("Expected ',' after for condition");
        let increment = self.parse_for_clause();
        self.expect(TokenKind::RParen, "Expected ')' after for clauses");

        node.add_child(init);
        node.add_child(condition);
        node.add_child(increment);
        node.add_child(self.parse_block());
        node
    }

    fn parse_for_clause(&mut self) -> Node {
        if self.check(TokenKind::Identifier) && self.peek_nth(1).kind.is_assignment() {
            self.parse_assignment()
        } else {
            self.parse_expression()
        }
    }

    /// Clauses of a C-style for are separated by `,` (a `;` is accepted too)
    fn expect_separator(&mut self, message: &str) {
        if self.check(TokenKind::Comma) || self.check(TokenKind::Semicolon) {
            self.advance();
        } else {
            self.expect(TokenKind::Comma, message);
        }
    }

    fn parse_while(&mut self) -> Node {
        let token = self.advance();
        let mut node = Node::new(NodeKind::While, "", token.line());
        self.expect(TokenKind::LParen, "Expected '(' after while");
        node.add_child(self.parse_expression());
        self.expect(TokenKind::RParen, "Expected ')' after condition");
        node.add_child(self.parse_block());
        node
    }

    fn parse_if(&mut self) -> Node {
        let token = self.advance();
        let mut node = Node::new(NodeKind::If, "", token.line());
        self.expect(TokenKind::LParen, "Expected '(' after if");
        node.add_child(self.parse_expression());
        self.expect(TokenKind::RParen, "Expected ')' after condition");
        node.add_child(self.parse_block());

        if self.check(TokenKind::Else) {
            let else_token = self.advance();
            if self.check(TokenKind::If) {
                // else-if chains nest as a block holding the inner if
                let nested = self.parse_if();
                node.add_child(Node::new(NodeKind::Block, "", else_token.line()).with_child(nested));
            } else {
                node.add_child(self.parse_block());
            }
        }
        node
    }

    fn parse_return(&mut self) -> Node {
        let token = self.advance();
        let mut node = Node::new(NodeKind::Return, "", token.line());
        if !self.check(TokenKind::RBrace) && !self.check(TokenKind::Semicolon) && !self.is_at_end() {
            node.add_child(self.parse_expression());
        }
        node
    }

    fn parse_print(&mut self) -> Node {
        let token = self.advance();
        let mut node = Node::new(NodeKind::Print, "", token.line());
        if self.expect(TokenKind::LParen, "Expected '(' after print").is_none() {
            return node;
        }
        self.parse_list_into(&mut node, TokenKind::RParen);
        self.expect(TokenKind::RParen, "Expected ')' after print arguments");
        node
    }

    /// `vector<Type> name`
    fn parse_vector_decl(&mut self) -> Node {
        let token = self.advance();
        let line = token.line();
        self.expect(TokenKind::Lt, "Expected '<' after vector");
        let element_type = self
            .expect(TokenKind::Identifier, "Expected element type")
            .map(|t| t.text)
            .unwrap_or_default();
        self.expect(TokenKind::Gt, "Expected '>' after element type");
        let name = self
            .expect(TokenKind::Identifier, "Expected vector name")
            .map(|t| t.text)
            .unwrap_or_default();
        Node::new(NodeKind::VectorDecl, name, line).with_attribute("elementType", element_type)
    }

    // ============ Expressions ============

    /// Parse an expression
    pub fn parse_expression(&mut self) -> Node {
        let line = self.peek().line();
        if !self.descend() {
            return Self::placeholder(line);
        }
        let expr = self.parse_or();
        self.ascend();
        expr
    }

    /// Left-associative binary level over `ops`
    fn binary_level(&mut self, ops: &[TokenKind], operand: fn(&mut Self) -> Node) -> Node {
        let mut left = operand(self);
        while ops.contains(&self.peek().kind) {
            let op = self.advance();
            let right = operand(self);
            left = Node::new(NodeKind::BinaryOp, op.text.clone(), op.line())
                .with_child(left)
                .with_child(right);
        }
        left
    }

    fn parse_or(&mut self) -> Node {
        self.binary_level(&[TokenKind::OrOr], Self::parse_and)
    }

    fn parse_and(&mut self) -> Node {
        self.binary_level(&[TokenKind::AndAnd], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Node {
        self.binary_level(&[TokenKind::EqEq, TokenKind::NotEq], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Node {
        self.binary_level(
            &[TokenKind::Lt, TokenKind::Gt, TokenKind::LtEq, TokenKind::GtEq],
            Self::parse_term,
        )
    }

    fn parse_term(&mut self) -> Node {
        self.binary_level(&[TokenKind::Plus, TokenKind::Minus], Self::parse_factor)
    }

    fn parse_factor(&mut self) -> Node {
        self.binary_level(
            &[TokenKind::Star, TokenKind::Slash, TokenKind::Percent],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Node {
        match self.peek().kind {
            TokenKind::Not | TokenKind::Minus | TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = self.advance();
                if !self.descend() {
                    return Self::placeholder(op.line());
                }
                let operand = self.parse_unary();
                self.ascend();
                Node::new(NodeKind::UnaryOp, op.text.clone(), op.line()).with_child(operand)
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Node {
        let mut expr = self.parse_primary();

        loop {
            match self.peek().kind {
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op = self.advance();
                    expr = Node::new(NodeKind::UnaryOp, format!("{}post", op.text), op.line())
                        .with_child(expr);
                }
                TokenKind::Dot => {
                    self.advance();
                    let member = self.peek().clone();
                    if member.kind != TokenKind::Identifier && !member.kind.is_keyword() {
                        self.error(
                            member.line(),
                            format!("Expected member name after '.', found {}", describe(&member)),
                        );
                        break;
                    }
                    self.advance();
                    if self.check(TokenKind::LParen) {
                        self.advance();
                        // the receiver travels as the first argument
                        let mut call = Node::new(NodeKind::FunctionCall, member.text.clone(), member.line())
                            .with_child(expr);
                        self.parse_arguments(&mut call);
                        expr = call;
                    } else {
                        expr = Node::new(NodeKind::MemberAccess, member.text.clone(), member.line())
                            .with_child(expr);
                    }
                }
                TokenKind::LBracket => {
                    let bracket = self.advance();
                    let index = self.parse_expression();
                    self.expect(TokenKind::RBracket, "Expected ']' after index");
                    expr = Node::new(NodeKind::ArrayAccess, "[]", bracket.line())
                        .with_child(expr)
                        .with_child(index);
                }
                TokenKind::LParen if expr.is(NodeKind::Identifier) => {
                    self.advance();
                    let mut call = Node::new(NodeKind::FunctionCall, expr.value.clone(), expr.line);
                    self.parse_arguments(&mut call);
                    expr = call;
                }
                _ => break,
            }
        }

        expr
    }

    /// Arguments after an already consumed `(`
    fn parse_arguments(&mut self, call: &mut Node) {
        self.parse_list_into(call, TokenKind::RParen);
        self.expect(TokenKind::RParen, "Expected ')' after arguments");
    }

    /// Comma-separated expressions up to (not including) `close`
    fn parse_list_into(&mut self, node: &mut Node, close: TokenKind) {
        let mut iterations = 0;
        while !self.check(close) && !self.is_at_end() {
            if self.exceeded(&mut iterations, "Too many items in list (possible infinite loop)") {
                break;
            }
            node.add_child(self.parse_expression());
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn parse_primary(&mut self) -> Node {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::IntLiteral
            | TokenKind::FloatLiteral
            | TokenKind::StringLiteral
            | TokenKind::CharLiteral
            | TokenKind::BoolLiteral
            | TokenKind::Null => {
                self.advance();
                Node::new(NodeKind::Literal, token.text.clone(), token.line())
            }
            TokenKind::Identifier => {
                self.advance();
                Node::new(NodeKind::Identifier, token.text.clone(), token.line())
            }
            TokenKind::LBracket => {
                self.advance();
                let mut array = Node::new(NodeKind::ArrayLiteral, "[]", token.line());
                self.parse_list_into(&mut array, TokenKind::RBracket);
                self.expect(TokenKind::RBracket, "Expected ']' after array elements");
                array
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression();
                self.expect(TokenKind::RParen, "Expected ')' after expression");
                expr
            }
            TokenKind::Range | TokenKind::Len | TokenKind::Size | TokenKind::Push | TokenKind::Pop => {
                self.advance();
                let mut call = Node::new(NodeKind::FunctionCall, token.text.clone(), token.line());
                let message = format!("Expected '(' after {}", token.text);
                if self.expect(TokenKind::LParen, &message).is_some() {
                    self.parse_arguments(&mut call);
                }
                call
            }
            _ => {
                // a closing brace belongs to the enclosing block
                if token.kind != TokenKind::RBrace {
                    self.advance();
                }
                self.error(token.line(), format!("Unexpected token: {}", describe(&token)));
                Self::placeholder(token.line())
            }
        }
    }
}

/// How a token is named in diagnostics
fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => "end of file".to_string(),
        TokenKind::StringLiteral => format!("\"{}\"", token.text),
        _ => format!("'{}'", token.text),
    }
}

/// Parse a token stream into a program tree plus recoverable diagnostics
pub fn parse(tokens: Vec<Token>) -> ParseResult<(Node, Vec<Diagnostic>)> {
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program()?;
    Ok((program, parser.into_diagnostics()))
}

/// Scan and parse source text
pub fn parse_source(source: &str) -> ParseResult<(Node, Vec<Diagnostic>)> {
    parse(tokenize(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Node {
        let (program, diagnostics) = parse_source(source).expect("fatal parse error");
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {:?}", diagnostics);
        program
    }

    fn parse_with_diagnostics(source: &str) -> (Node, Vec<String>) {
        let (program, diagnostics) = parse_source(source).expect("fatal parse error");
        (program, diagnostics.iter().map(|d| d.to_string()).collect())
    }

    /// Statements of the first function's body
    fn body(source: &str) -> Vec<Node> {
        let program = parse_ok(source);
        program.children[0].children[0].children.clone()
    }

    #[test]
    fn test_function_declaration() {
        let program = parse_ok("func(Helper) = \"greet\" { }");
        let func = &program.children[0];
        assert_eq!(func.kind, NodeKind::FunctionDecl);
        assert_eq!(func.value, "greet");
        assert_eq!(func.attribute("type"), Some("Helper"));
        assert_eq!(func.children[0].kind, NodeKind::Block);
        assert!(!func.is_entry_point());
    }

    #[test]
    fn test_anonymous_main() {
        let program = parse_ok("func(Main) { }");
        let main = &program.children[0];
        assert_eq!(main.value, "Main");
        assert!(main.is_entry_point());
    }

    #[test]
    fn test_named_main_is_fatal() {
        let result = parse_source("func(Main) = \"x\" { }");
        assert_eq!(
            result,
            Err(ParseError::NamedEntryPoint {
                line: 1,
                name: "x".to_string()
            })
        );
        let message = ParseError::NamedEntryPoint { line: 1, name: "x".into() }.to_string();
        assert!(message.starts_with("Line 1: Main function cannot have a name"));
    }

    #[test]
    fn test_named_main_inside_class_is_fatal() {
        let source = "class(Shape) = \"Box\" { member: func(Main) = \"m\" { } }";
        assert!(matches!(
            parse_source(source),
            Err(ParseError::NamedEntryPoint { .. })
        ));
    }

    #[test]
    fn test_class_declaration() {
        let source = r#"
            class(Shape) = "Circle" {
                object: radius, area
                member:
                    func(Float) = "getArea" { return radius }
            }
        "#;
        let program = parse_ok(source);
        let class = &program.children[0];
        assert_eq!(class.kind, NodeKind::ClassDecl);
        assert_eq!(class.value, "Circle");
        assert_eq!(class.attribute("type"), Some("Shape"));

        let object = &class.children[0];
        assert_eq!(object.kind, NodeKind::ObjectSection);
        let fields: Vec<_> = object.children.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(fields, vec!["radius", "area"]);

        let member = &class.children[1];
        assert_eq!(member.kind, NodeKind::MemberSection);
        assert_eq!(member.children[0].value, "getArea");
        assert_eq!(member.children[0].attribute("isClass"), Some("true"));
    }

    #[test]
    fn test_import_and_exec() {
        let program = parse_ok("#import \"math\"\nexec(count = 3, \"fast\")");
        let import = &program.children[0];
        assert_eq!(import.kind, NodeKind::Import);
        assert_eq!(import.value, "math");

        let exec = &program.children[1];
        assert_eq!(exec.kind, NodeKind::Exec);
        assert_eq!(exec.line, 2);
        assert_eq!(exec.children.len(), 2);
        assert_eq!(exec.children[0].kind, NodeKind::Assignment);
        assert_eq!(exec.children[0].value, "count");
        assert_eq!(exec.children[0].children[0].value, "3");
        assert_eq!(exec.children[1].kind, NodeKind::Literal);
        assert_eq!(exec.children[1].value, "fast");
    }

    #[test]
    fn test_precedence() {
        let stmts = body("func(Main) { x = 1 + 2 * 3 }");
        let value = &stmts[0].children[0];
        assert_eq!(value.kind, NodeKind::BinaryOp);
        assert_eq!(value.value, "+");
        assert_eq!(value.children[0].value, "1");
        assert_eq!(value.children[1].value, "*");

        let stmts = body("func(Main) { r = a || b && c == d < e }");
        let or = &stmts[0].children[0];
        assert_eq!(or.value, "||");
        let and = &or.children[1];
        assert_eq!(and.value, "&&");
        let eq = &and.children[1];
        assert_eq!(eq.value, "==");
        assert_eq!(eq.children[1].value, "<");
    }

    #[test]
    fn test_left_associativity() {
        let stmts = body("func(Main) { x = 10 - 4 - 3 }");
        let outer = &stmts[0].children[0];
        assert_eq!(outer.value, "-");
        assert_eq!(outer.children[0].value, "-");
        assert_eq!(outer.children[1].value, "3");
    }

    #[test]
    fn test_parenthesized_expression() {
        let stmts = body("func(Main) { x = (1 + 2) * 3 }");
        let mul = &stmts[0].children[0];
        assert_eq!(mul.value, "*");
        assert_eq!(mul.children[0].value, "+");
    }

    #[test]
    fn test_unary_and_postfix() {
        let stmts = body("func(Main) { x = -y; i++; ++i; b = !flag }");
        assert_eq!(stmts[0].children[0].kind, NodeKind::UnaryOp);
        assert_eq!(stmts[0].children[0].value, "-");
        assert_eq!(stmts[1].kind, NodeKind::UnaryOp);
        assert_eq!(stmts[1].value, "++post");
        assert_eq!(stmts[2].value, "++");
        assert_eq!(stmts[2].children[0].value, "i");
        assert_eq!(stmts[3].children[0].value, "!");
    }

    #[test]
    fn test_method_call_injects_receiver() {
        let stmts = body("func(Main) { list.push(4)\n n = obj.field }");
        let call = &stmts[0];
        assert_eq!(call.kind, NodeKind::FunctionCall);
        assert_eq!(call.value, "push");
        assert_eq!(call.children[0].kind, NodeKind::Identifier);
        assert_eq!(call.children[0].value, "list");
        assert_eq!(call.children[1].value, "4");

        let access = &stmts[1].children[0];
        assert_eq!(access.kind, NodeKind::MemberAccess);
        assert_eq!(access.value, "field");
    }

    #[test]
    fn test_calls_and_indexing() {
        let stmts = body("func(Main) { foo(1, 2)\n y = a[0]\n n = len(a) }");
        assert_eq!(stmts[0].kind, NodeKind::FunctionCall);
        assert_eq!(stmts[0].children.len(), 2);

        let access = &stmts[1].children[0];
        assert_eq!(access.kind, NodeKind::ArrayAccess);
        assert_eq!(access.children[0].value, "a");
        assert_eq!(access.children[1].value, "0");

        let len = &stmts[2].children[0];
        assert_eq!(len.kind, NodeKind::FunctionCall);
        assert_eq!(len.value, "len");
        assert_eq!(len.children[0].value, "a");
    }

    #[test]
    fn test_array_literal() {
        let stmts = body("func(Main) { a = [1, 2.5, 'c'] }");
        let array = &stmts[0].children[0];
        assert_eq!(array.kind, NodeKind::ArrayLiteral);
        let values: Vec<_> = array.children.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, vec!["1", "2.5", "c"]);
    }

    #[test]
    fn test_c_style_for() {
        let stmts = body("func(Main) { for (i = 0, i < 10, i++) { print(i) } }");
        let for_node = &stmts[0];
        assert_eq!(for_node.kind, NodeKind::For);
        assert_eq!(for_node.children.len(), 4);
        assert_eq!(for_node.children[0].kind, NodeKind::Assignment);
        assert_eq!(for_node.children[1].value, "<");
        assert_eq!(for_node.children[2].value, "++post");
        assert_eq!(for_node.children[3].kind, NodeKind::Block);
    }

    #[test]
    fn test_for_accepts_assignment_increment() {
        let stmts = body("func(Main) { for (i = 0; i < 3; i += 1) { } }");
        assert_eq!(stmts[0].children[2].kind, NodeKind::Assignment);
        assert_eq!(stmts[0].children[2].attribute("operator"), Some("+="));
    }

    #[test]
    fn test_range_for() {
        let stmts = body("func(Main) { for (x in range(5)) { print(x) } }");
        let for_node = &stmts[0];
        assert_eq!(for_node.children.len(), 2);
        let range = &for_node.children[0];
        assert_eq!(range.kind, NodeKind::RangeFor);
        assert_eq!(range.value, "x");
        assert_eq!(range.children[0].kind, NodeKind::FunctionCall);
        assert_eq!(range.children[0].value, "range");
    }

    #[test]
    fn test_if_else() {
        let stmts = body("func(Main) { if (x > 1) { y = 1 } else { y = 2 } }");
        let if_node = &stmts[0];
        assert_eq!(if_node.children.len(), 3);
        assert_eq!(if_node.children[2].kind, NodeKind::Block);

        let stmts = body("func(Main) { if (a) { } else if (b) { } else { } }");
        let else_block = &stmts[0].children[2];
        assert_eq!(else_block.kind, NodeKind::Block);
        assert_eq!(else_block.children[0].kind, NodeKind::If);
        assert_eq!(else_block.children[0].children.len(), 3);
    }

    #[test]
    fn test_while() {
        let stmts = body("func(Main) { while (i < 3) { i++ } }");
        assert_eq!(stmts[0].kind, NodeKind::While);
        assert_eq!(stmts[0].children.len(), 2);
    }

    #[test]
    fn test_compound_and_indexed_assignment() {
        let stmts = body("func(Main) { x += 2\n a[1] = 5\n a[i + 1] -= 2 }");
        assert_eq!(stmts[0].attribute("operator"), Some("+="));
        assert_eq!(stmts[0].children.len(), 1);

        assert_eq!(stmts[1].attribute("indexed"), Some("true"));
        assert_eq!(stmts[1].attribute("operator"), None);
        assert_eq!(stmts[1].children.len(), 2);
        assert_eq!(stmts[1].children[0].value, "1");
        assert_eq!(stmts[1].children[1].value, "5");

        assert_eq!(stmts[2].attribute("operator"), Some("-="));
        assert_eq!(stmts[2].children[0].value, "+");
    }

    #[test]
    fn test_indexed_read_is_not_assignment() {
        let stmts = body("func(Main) { a[0] }");
        assert_eq!(stmts[0].kind, NodeKind::ArrayAccess);
    }

    #[test]
    fn test_return_forms() {
        let stmts = body("func(Main) { return }");
        assert_eq!(stmts[0].kind, NodeKind::Return);
        assert!(stmts[0].children.is_empty());

        let stmts = body("func(Main) { return x + 1 }");
        assert_eq!(stmts[0].children.len(), 1);
    }

    #[test]
    fn test_vector_decl() {
        let stmts = body("func(Main) { vector<Int> nums }");
        assert_eq!(stmts[0].kind, NodeKind::VectorDecl);
        assert_eq!(stmts[0].value, "nums");
        assert_eq!(stmts[0].attribute("elementType"), Some("Int"));
    }

    #[test]
    fn test_print_arguments() {
        let stmts = body("func(Main) { print(\"a\", x) }");
        assert_eq!(stmts[0].kind, NodeKind::Print);
        assert_eq!(stmts[0].children.len(), 2);
    }

    #[test]
    fn test_semicolons_are_optional() {
        let stmts = body("func(Main) { x = 1; y = 2; print(x); }");
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_statement_lines() {
        let stmts = body("func(Main) {\n  x = 1\n\n  print(x)\n}");
        assert_eq!(stmts[0].line, 2);
        assert_eq!(stmts[1].line, 4);
    }

    #[test]
    fn test_missing_paren_diagnostic() {
        let (_, diagnostics) = parse_with_diagnostics("func(Main) { if x > 1) { } }");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].starts_with("Line 1: Expected '(' after if"));
    }

    #[test]
    fn test_unexpected_token_placeholder() {
        let (program, diagnostics) = parse_with_diagnostics("func(Main) {\n x = )\n}");
        assert_eq!(diagnostics, vec!["Line 2: Unexpected token: ')'".to_string()]);
        let assignment = &program.children[0].children[0].children[0];
        let value = &assignment.children[0];
        assert_eq!(value.value, "0");
        assert_eq!(value.attribute("placeholder"), Some("true"));
    }

    #[test]
    fn test_top_level_junk_is_reported() {
        let (program, diagnostics) = parse_with_diagnostics("x func(Main) { }");
        assert_eq!(program.children.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("Unexpected token at top level"));
    }

    #[test]
    fn test_unterminated_exec_terminates() {
        let (_, diagnostics) = parse_with_diagnostics("exec(");
        assert!(diagnostics.iter().any(|d| d.contains("Expected ')' after exec")));

        let (_, diagnostics) = parse_with_diagnostics("exec(}");
        assert_eq!(diagnostics.len(), 2, "diagnostics: {:?}", diagnostics);
        assert!(diagnostics[0].contains("Unexpected token: '}'"));
        assert!(!diagnostics.iter().any(|d| d.contains("Too many")));
    }

    #[test]
    fn test_deep_nesting_is_reported() {
        let source = format!("func(Main) {{ x = {}1{} }}", "(".repeat(500), ")".repeat(500));
        let (_, diagnostics) = parse_with_diagnostics(&source);
        assert!(diagnostics.iter().any(|d| d.contains("Nesting too deep")));

        let source = format!("func(Main) {{ y = {}1 }}", "-".repeat(2000));
        let (_, diagnostics) = parse_with_diagnostics(&source);
        assert!(diagnostics.iter().any(|d| d.contains("Nesting too deep")));
    }

    #[test]
    fn test_moderate_nesting_is_accepted() {
        let source = format!("func(Main) {{ x = {}1{} }}", "(".repeat(20), ")".repeat(20));
        let (program, diagnostics) = parse_with_diagnostics(&source);
        assert!(diagnostics.is_empty(), "diagnostics: {:?}", diagnostics);
        let value = &program.children[0].children[0].children[0].children[0];
        assert_eq!(value.value, "1");
    }

    #[test]
    fn test_statement_cap() {
        let mut parser = Parser::with_limit(tokenize("func(Main) { a() b() c() d() e() }"), 3);
        let program = parser.parse_program().expect("fatal parse error");
        assert!(parser
            .diagnostics()
            .iter()
            .any(|d| d.message == "Too many statements in block (possible infinite loop)"));
        assert_eq!(program.children[0].children[0].children.len(), 3);
    }

    #[test]
    fn test_parser_appends_missing_eof() {
        let mut tokens = tokenize("func(Main) { }");
        tokens.pop();
        let (program, diagnostics) = parse(tokens).expect("fatal parse error");
        assert!(diagnostics.is_empty());
        assert_eq!(program.children.len(), 1);
    }

    #[test]
    fn test_unclosed_block_reports() {
        let (_, diagnostics) = parse_with_diagnostics("func(Main) { x = 1");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("Expected '}' to close block, found end of file"));
    }
}
