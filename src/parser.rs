//! Hand-written recursive-descent parser driving a [`Semantics`] implementor.
//!
//! The grammar is a precedence ladder (assignment → ternary → logor → logand
//! → equality → relational → shift → additive → mult → unary → postfix →
//! primary) matched one level per method, Pratt-style. `Semantics` factors
//! node construction out of the grammar itself so an alternate implementor
//! (a graph-visualization tool, say) can drive the same parse with its own
//! node type.

use crate::ast::{self, UnaryOp};
use crate::error::{CompileError, CompileResult, Position};
use crate::intern::{Interner, StringId};
use crate::lexer::Lexer;
use crate::token::{BinOp, Token, TokenKind};
use crate::word::{TargetConfig, Word};

/// One method per grammar rule family that needs to build a node.
///
/// `DefaultSemantics` builds this crate's own [`ast`] types; an alternate
/// implementor can substitute a different `Program`/`Definition`/`Expr`/
/// `Stmt` type to repurpose the same grammar for another consumer.
pub trait Semantics {
    type Program;
    type Definition;
    type Expr;
    type Stmt;

    fn program(&mut self, position: Position, definitions: Vec<Self::Definition>) -> Self::Program;

    fn simpledef(&mut self, position: Position, name: StringId, initializer: Option<Self::Expr>) -> Self::Definition;
    fn vectordef(
        &mut self,
        position: Position,
        name: StringId,
        max_index: Option<Word>,
        initializers: Vec<Self::Expr>,
    ) -> Self::Definition;
    fn functiondef(
        &mut self,
        position: Position,
        name: StringId,
        params: Vec<StringId>,
        body: Self::Stmt,
    ) -> Self::Definition;

    fn numeric(&mut self, position: Position, value: Word) -> Self::Expr;
    fn character(&mut self, position: Position, value: Word) -> Self::Expr;
    fn string(&mut self, position: Position, bytes: Vec<u8>) -> Self::Expr;
    fn name(&mut self, position: Position, name: StringId) -> Self::Expr;
    fn unary(&mut self, position: Position, op: UnaryOp, operand: Self::Expr) -> Self::Expr;
    fn binary(&mut self, position: Position, op: BinOp, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn ternary(
        &mut self,
        position: Position,
        condition: Self::Expr,
        then_expr: Self::Expr,
        else_expr: Self::Expr,
    ) -> Self::Expr;
    fn assign(
        &mut self,
        position: Position,
        compound_op: Option<BinOp>,
        lvalue: Self::Expr,
        rvalue: Self::Expr,
    ) -> Self::Expr;
    fn call(&mut self, position: Position, callee: Self::Expr, args: Vec<Self::Expr>) -> Self::Expr;
    fn index(&mut self, position: Position, base: Self::Expr, index: Self::Expr) -> Self::Expr;

    fn compound(&mut self, position: Position, statements: Vec<Self::Stmt>) -> Self::Stmt;
    fn if_stmt(
        &mut self,
        position: Position,
        condition: Self::Expr,
        then_stmt: Self::Stmt,
        else_stmt: Option<Self::Stmt>,
    ) -> Self::Stmt;
    fn while_stmt(&mut self, position: Position, condition: Self::Expr, body: Self::Stmt) -> Self::Stmt;
    fn return_stmt(&mut self, position: Position, value: Option<Self::Expr>) -> Self::Stmt;
    fn break_stmt(&mut self, position: Position) -> Self::Stmt;
    fn goto_stmt(&mut self, position: Position, label: Self::Expr) -> Self::Stmt;
    fn label_stmt(&mut self, position: Position, name: StringId, body: Self::Stmt) -> Self::Stmt;
    fn switch_stmt(&mut self, position: Position, expr: Self::Expr, body: Self::Stmt) -> Self::Stmt;
    fn case_stmt(&mut self, position: Position, constant: Word, body: Self::Stmt) -> Self::Stmt;
    fn auto_stmt(&mut self, position: Position, names: Vec<(StringId, Option<Word>)>, body: Self::Stmt) -> Self::Stmt;
    fn extrn_stmt(&mut self, position: Position, names: Vec<StringId>, body: Self::Stmt) -> Self::Stmt;
    fn expr_stmt(&mut self, position: Position, expr: Self::Expr) -> Self::Stmt;
    fn null_stmt(&mut self, position: Position) -> Self::Stmt;
}

/// Builds this crate's own [`ast`] node family.
#[derive(Debug, Default)]
pub struct DefaultSemantics;

impl Semantics for DefaultSemantics {
    type Program = ast::Program;
    type Definition = ast::Definition;
    type Expr = ast::Expr;
    type Stmt = ast::Stmt;

    fn program(&mut self, _position: Position, definitions: Vec<ast::Definition>) -> ast::Program {
        ast::Program { definitions }
    }

    fn simpledef(&mut self, position: Position, name: StringId, initializer: Option<ast::Expr>) -> ast::Definition {
        ast::Definition::SimpleDefinition { position, name, initializer }
    }

    fn vectordef(
        &mut self,
        position: Position,
        name: StringId,
        max_index: Option<Word>,
        initializers: Vec<ast::Expr>,
    ) -> ast::Definition {
        ast::Definition::VectorDefinition { position, name, max_index, initializers }
    }

    fn functiondef(
        &mut self,
        position: Position,
        name: StringId,
        params: Vec<StringId>,
        body: ast::Stmt,
    ) -> ast::Definition {
        ast::Definition::FunctionDefinition { position, name, params, body: Box::new(body) }
    }

    fn numeric(&mut self, position: Position, value: Word) -> ast::Expr {
        ast::Expr::Numeric { position, value }
    }

    fn character(&mut self, position: Position, value: Word) -> ast::Expr {
        ast::Expr::Character { position, value }
    }

    fn string(&mut self, position: Position, bytes: Vec<u8>) -> ast::Expr {
        ast::Expr::String { position, bytes }
    }

    fn name(&mut self, position: Position, name: StringId) -> ast::Expr {
        ast::Expr::Name { position, name }
    }

    fn unary(&mut self, position: Position, op: UnaryOp, operand: ast::Expr) -> ast::Expr {
        ast::Expr::Unary { position, op, operand: Box::new(operand) }
    }

    fn binary(&mut self, position: Position, op: BinOp, left: ast::Expr, right: ast::Expr) -> ast::Expr {
        ast::Expr::Binary { position, op, left: Box::new(left), right: Box::new(right) }
    }

    fn ternary(
        &mut self,
        position: Position,
        condition: ast::Expr,
        then_expr: ast::Expr,
        else_expr: ast::Expr,
    ) -> ast::Expr {
        ast::Expr::Ternary {
            position,
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    fn assign(
        &mut self,
        position: Position,
        compound_op: Option<BinOp>,
        lvalue: ast::Expr,
        rvalue: ast::Expr,
    ) -> ast::Expr {
        ast::Expr::Assign { position, compound_op, lvalue: Box::new(lvalue), rvalue: Box::new(rvalue) }
    }

    fn call(&mut self, position: Position, callee: ast::Expr, args: Vec<ast::Expr>) -> ast::Expr {
        ast::Expr::Call { position, callee: Box::new(callee), args }
    }

    fn index(&mut self, position: Position, base: ast::Expr, index: ast::Expr) -> ast::Expr {
        ast::Expr::Index { position, base: Box::new(base), index: Box::new(index) }
    }

    fn compound(&mut self, position: Position, statements: Vec<ast::Stmt>) -> ast::Stmt {
        ast::Stmt::Compound { position, statements }
    }

    fn if_stmt(
        &mut self,
        position: Position,
        condition: ast::Expr,
        then_stmt: ast::Stmt,
        else_stmt: Option<ast::Stmt>,
    ) -> ast::Stmt {
        ast::Stmt::If { position, condition, then_stmt: Box::new(then_stmt), else_stmt: else_stmt.map(Box::new) }
    }

    fn while_stmt(&mut self, position: Position, condition: ast::Expr, body: ast::Stmt) -> ast::Stmt {
        ast::Stmt::While { position, condition, body: Box::new(body) }
    }

    fn return_stmt(&mut self, position: Position, value: Option<ast::Expr>) -> ast::Stmt {
        ast::Stmt::Return { position, value }
    }

    fn break_stmt(&mut self, position: Position) -> ast::Stmt {
        ast::Stmt::Break { position }
    }

    fn goto_stmt(&mut self, position: Position, label: ast::Expr) -> ast::Stmt {
        ast::Stmt::Goto { position, label: Box::new(label) }
    }

    fn label_stmt(&mut self, position: Position, name: StringId, body: ast::Stmt) -> ast::Stmt {
        ast::Stmt::Label { position, name, body: Box::new(body) }
    }

    fn switch_stmt(&mut self, position: Position, expr: ast::Expr, body: ast::Stmt) -> ast::Stmt {
        ast::Stmt::Switch { position, expr, body: Box::new(body) }
    }

    fn case_stmt(&mut self, position: Position, constant: Word, body: ast::Stmt) -> ast::Stmt {
        ast::Stmt::Case { position, constant, body: Box::new(body) }
    }

    fn auto_stmt(
        &mut self,
        position: Position,
        names: Vec<(StringId, Option<Word>)>,
        body: ast::Stmt,
    ) -> ast::Stmt {
        ast::Stmt::Auto { position, names, body: Box::new(body) }
    }

    fn extrn_stmt(&mut self, position: Position, names: Vec<StringId>, body: ast::Stmt) -> ast::Stmt {
        ast::Stmt::Extrn { position, names, body: Box::new(body) }
    }

    fn expr_stmt(&mut self, position: Position, expr: ast::Expr) -> ast::Stmt {
        ast::Stmt::Expr { position, expr }
    }

    fn null_stmt(&mut self, position: Position) -> ast::Stmt {
        ast::Stmt::Null { position }
    }
}

/// `*X` escapes recognized inside character and string literals.
fn expand_escapes(raw: &str, position: Position) -> CompileResult<Vec<u8>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'*' {
            let escape = *bytes.get(i + 1).ok_or_else(|| CompileError::ParseError {
                position,
                message: "dangling '*' escape introducer at end of literal".to_owned(),
            })?;
            let expanded = match escape {
                b'n' => b'\n',
                b't' => b'\t',
                b'0' => 0,
                b'e' => 0x04,
                b'\'' => b'\'',
                b'"' => b'"',
                b'*' => b'*',
                other => {
                    return Err(CompileError::EscapeError { position, escape: other as char });
                }
            };
            out.push(expanded);
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Drives a [`Semantics`] implementor through a hand-written recursive-
/// descent parse of one translation unit.
pub struct Parser<'src, 'sem, S: Semantics> {
    lexer: Lexer<'src>,
    current: Token,
    lookahead: Option<Token>,
    target: TargetConfig,
    semantics: &'sem mut S,
}

impl<'src, 'sem, S: Semantics> Parser<'src, 'sem, S> {
    pub fn new(
        source: &'src str,
        interner: &'src mut Interner,
        target: TargetConfig,
        semantics: &'sem mut S,
    ) -> CompileResult<Self> {
        let mut lexer = Lexer::new(source, interner);
        let current = lexer.next_token()?;
        Ok(Self { lexer, current, lookahead: None, target, semantics })
    }

    fn peek(&self) -> TokenKind {
        self.current.kind
    }

    fn peek2(&mut self) -> CompileResult<TokenKind> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        Ok(self.lookahead.expect("just filled").kind)
    }

    fn position(&self) -> Position {
        self.current.position
    }

    fn bump(&mut self) -> CompileResult<Token> {
        let tok = self.current;
        self.current = match self.lookahead.take() {
            Some(next) => next,
            None => self.lexer.next_token()?,
        };
        Ok(tok)
    }

    fn keyword_text(&self, id: StringId) -> &str {
        self.lexer.interner().get(id)
    }

    fn at_keyword(&self, text: &str) -> bool {
        matches!(self.peek(), TokenKind::Name(id) if self.keyword_text(id) == text)
    }

    fn expect_punct(&mut self, kind: TokenKind, what: &str) -> CompileResult<Position> {
        let position = self.position();
        if self.peek() == kind {
            self.bump()?;
            Ok(position)
        } else {
            Err(CompileError::ParseError { position, message: format!("expected {what}") })
        }
    }

    fn expect_name(&mut self) -> CompileResult<(StringId, Position)> {
        let position = self.position();
        match self.peek() {
            TokenKind::Name(id) => {
                self.bump()?;
                Ok((id, position))
            }
            other => Err(CompileError::ParseError {
                position,
                message: format!("expected a name, found {other:?}"),
            }),
        }
    }

    // --- program / definitions -------------------------------------------------

    pub fn parse_program(&mut self) -> CompileResult<S::Program> {
        let position = self.position();
        let mut definitions = Vec::new();
        while self.peek() != TokenKind::Eof {
            definitions.push(self.parse_definition()?);
        }
        Ok(self.semantics.program(position, definitions))
    }

    fn parse_definition(&mut self) -> CompileResult<S::Definition> {
        let (name, position) = self.expect_name()?;
        match self.peek() {
            TokenKind::LParen => self.parse_functiondef_tail(name, position),
            TokenKind::LBracket => self.parse_vectordef_tail(name, position),
            _ => self.parse_simpledef_tail(name, position),
        }
    }

    fn parse_simpledef_tail(&mut self, name: StringId, position: Position) -> CompileResult<S::Definition> {
        let initializer =
            if self.peek() == TokenKind::Semicolon { None } else { Some(self.parse_ival()?) };
        self.expect_punct(TokenKind::Semicolon, "';' after a definition")?;
        Ok(self.semantics.simpledef(position, name, initializer))
    }

    fn parse_vectordef_tail(&mut self, name: StringId, position: Position) -> CompileResult<S::Definition> {
        self.bump()?; // '['
        let max_index =
            if self.peek() == TokenKind::RBracket { None } else { Some(self.parse_constant_word()?) };
        self.expect_punct(TokenKind::RBracket, "']'")?;

        let mut initializers = Vec::new();
        if self.peek() != TokenKind::Semicolon {
            initializers.push(self.parse_ival()?);
            while self.peek() == TokenKind::Comma {
                self.bump()?;
                initializers.push(self.parse_ival()?);
            }
        }
        self.expect_punct(TokenKind::Semicolon, "';' after a vector definition")?;
        Ok(self.semantics.vectordef(position, name, max_index, initializers))
    }

    fn parse_functiondef_tail(&mut self, name: StringId, position: Position) -> CompileResult<S::Definition> {
        self.bump()?; // '('
        let mut params = Vec::new();
        if self.peek() != TokenKind::RParen {
            let (p, _) = self.expect_name()?;
            params.push(p);
            while self.peek() == TokenKind::Comma {
                self.bump()?;
                let (p, _) = self.expect_name()?;
                params.push(p);
            }
        }
        self.expect_punct(TokenKind::RParen, "')'")?;
        let body = self.parse_statement()?;
        Ok(self.semantics.functiondef(position, name, params, body))
    }

    /// `ival = [ "-" ] ( numericexpr | characterexpr | stringexpr | name )`
    fn parse_ival(&mut self) -> CompileResult<S::Expr> {
        let position = self.position();
        let negate = self.peek() == TokenKind::Minus;
        if negate {
            self.bump()?;
        }
        let atom = self.parse_ival_atom()?;
        if negate {
            Ok(self.semantics.unary(position, UnaryOp::Neg, atom))
        } else {
            Ok(atom)
        }
    }

    fn parse_ival_atom(&mut self) -> CompileResult<S::Expr> {
        let position = self.position();
        match self.peek() {
            TokenKind::Number(n) => {
                self.bump()?;
                Ok(self.semantics.numeric(position, Word(n as i64)))
            }
            TokenKind::CharLiteral(id) => {
                self.bump()?;
                let value = self.pack_character(position, id)?;
                Ok(self.semantics.character(position, value))
            }
            TokenKind::StringLiteral(id) => {
                self.bump()?;
                let bytes = self.expand_literal(position, id)?;
                Ok(self.semantics.string(position, bytes))
            }
            TokenKind::Name(id) => {
                self.bump()?;
                Ok(self.semantics.name(position, id))
            }
            other => Err(CompileError::ParseError {
                position,
                message: format!("expected a constant initializer, found {other:?}"),
            }),
        }
    }

    fn parse_constant_word(&mut self) -> CompileResult<Word> {
        let position = self.position();
        let negate = self.peek() == TokenKind::Minus;
        if negate {
            self.bump()?;
        }
        match self.peek() {
            TokenKind::Number(n) => {
                self.bump()?;
                let value = Word(n as i64);
                Ok(if negate { -value } else { value })
            }
            other => Err(CompileError::ParseError {
                position,
                message: format!("expected a constant integer, found {other:?}"),
            }),
        }
    }

    // --- statements --------------------------------------------------------

    pub fn parse_statement(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        match self.peek() {
            TokenKind::LBrace => self.parse_compound(),
            TokenKind::Semicolon => {
                self.bump()?;
                Ok(self.semantics.null_stmt(position))
            }
            TokenKind::Name(_) if self.at_keyword("if") => self.parse_if(),
            TokenKind::Name(_) if self.at_keyword("while") => self.parse_while(),
            TokenKind::Name(_) if self.at_keyword("return") => self.parse_return(),
            TokenKind::Name(_) if self.at_keyword("goto") => self.parse_goto(),
            TokenKind::Name(_) if self.at_keyword("break") => {
                self.bump()?;
                self.expect_punct(TokenKind::Semicolon, "';' after break")?;
                Ok(self.semantics.break_stmt(position))
            }
            TokenKind::Name(_) if self.at_keyword("auto") => self.parse_auto(),
            TokenKind::Name(_) if self.at_keyword("extrn") => self.parse_extrn(),
            TokenKind::Name(_) if self.at_keyword("switch") => self.parse_switch(),
            TokenKind::Name(_) if self.at_keyword("case") => self.parse_case(),
            _ => self.parse_label_or_expr_stmt(),
        }
    }

    fn parse_compound(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // '{'
        let mut statements = Vec::new();
        while self.peek() != TokenKind::RBrace {
            statements.push(self.parse_statement()?);
        }
        self.expect_punct(TokenKind::RBrace, "'}'")?;
        Ok(self.semantics.compound(position, statements))
    }

    fn parse_if(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // 'if'
        self.expect_punct(TokenKind::LParen, "'(' after if")?;
        let condition = self.parse_expression()?;
        self.expect_punct(TokenKind::RParen, "')' after if condition")?;
        let then_stmt = self.parse_statement()?;
        let else_stmt = if self.at_keyword("else") {
            self.bump()?;
            Some(self.parse_statement()?)
        } else {
            None
        };
        Ok(self.semantics.if_stmt(position, condition, then_stmt, else_stmt))
    }

    fn parse_while(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // 'while'
        self.expect_punct(TokenKind::LParen, "'(' after while")?;
        let condition = self.parse_expression()?;
        self.expect_punct(TokenKind::RParen, "')' after while condition")?;
        let body = self.parse_statement()?;
        Ok(self.semantics.while_stmt(position, condition, body))
    }

    fn parse_return(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // 'return'
        let value = match self.peek() {
            TokenKind::Semicolon => None,
            TokenKind::LParen => {
                self.bump()?;
                let expr = self.parse_expression()?;
                self.expect_punct(TokenKind::RParen, "')' after return value")?;
                Some(expr)
            }
            _ => Some(self.parse_expression()?),
        };
        self.expect_punct(TokenKind::Semicolon, "';' after return")?;
        Ok(self.semantics.return_stmt(position, value))
    }

    fn parse_goto(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // 'goto'
        let label = self.parse_expression()?;
        self.expect_punct(TokenKind::Semicolon, "';' after goto")?;
        Ok(self.semantics.goto_stmt(position, label))
    }

    fn parse_auto(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // 'auto'
        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_name()?;
            let size = if self.peek() == TokenKind::LBracket {
                self.bump()?;
                let w = self.parse_constant_word()?;
                self.expect_punct(TokenKind::RBracket, "']'")?;
                Some(w)
            } else {
                None
            };
            names.push((name, size));
            if self.peek() == TokenKind::Comma {
                self.bump()?;
            } else {
                break;
            }
        }
        self.expect_punct(TokenKind::Semicolon, "';' after auto declaration")?;
        let body = self.parse_statement()?;
        Ok(self.semantics.auto_stmt(position, names, body))
    }

    fn parse_extrn(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // 'extrn'
        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_name()?;
            names.push(name);
            if self.peek() == TokenKind::Comma {
                self.bump()?;
            } else {
                break;
            }
        }
        self.expect_punct(TokenKind::Semicolon, "';' after extrn declaration")?;
        let body = self.parse_statement()?;
        Ok(self.semantics.extrn_stmt(position, names, body))
    }

    fn parse_switch(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // 'switch'
        self.expect_punct(TokenKind::LParen, "'(' after switch")?;
        let expr = self.parse_expression()?;
        self.expect_punct(TokenKind::RParen, "')' after switch expression")?;
        let body = self.parse_statement()?;
        Ok(self.semantics.switch_stmt(position, expr, body))
    }

    fn parse_case(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        self.bump()?; // 'case'
        let constant = self.parse_constant_word()?;
        self.expect_punct(TokenKind::Colon, "':' after case constant")?;
        let body = self.parse_statement()?;
        Ok(self.semantics.case_stmt(position, constant, body))
    }

    fn parse_label_or_expr_stmt(&mut self) -> CompileResult<S::Stmt> {
        let position = self.position();
        if let TokenKind::Name(id) = self.peek() {
            if self.peek2()? == TokenKind::Colon {
                self.bump()?; // name
                self.bump()?; // ':'
                let body = self.parse_statement()?;
                return Ok(self.semantics.label_stmt(position, id, body));
            }
        }
        let expr = self.parse_expression()?;
        self.expect_punct(TokenKind::Semicolon, "';' after expression")?;
        Ok(self.semantics.expr_stmt(position, expr))
    }

    // --- expressions ---------------------------------------------------------

    pub fn parse_expression(&mut self) -> CompileResult<S::Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> CompileResult<S::Expr> {
        let position = self.position();
        let lhs = self.parse_ternary()?;
        match self.peek() {
            TokenKind::Assign => {
                self.bump()?;
                let rhs = self.parse_assignment()?;
                Ok(self.semantics.assign(position, None, lhs, rhs))
            }
            TokenKind::CompoundAssign(op) => {
                self.bump()?;
                let rhs = self.parse_assignment()?;
                Ok(self.semantics.assign(position, Some(op), lhs, rhs))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_ternary(&mut self) -> CompileResult<S::Expr> {
        let position = self.position();
        let condition = self.parse_logor()?;
        if self.peek() == TokenKind::Question {
            self.bump()?;
            let then_expr = self.parse_expression()?;
            self.expect_punct(TokenKind::Colon, "':' in ternary expression")?;
            let else_expr = self.parse_ternary()?;
            Ok(self.semantics.ternary(position, condition, then_expr, else_expr))
        } else {
            Ok(condition)
        }
    }

    fn parse_logor(&mut self) -> CompileResult<S::Expr> {
        let mut left = self.parse_logand()?;
        while self.peek() == TokenKind::Pipe {
            let position = self.position();
            self.bump()?;
            let right = self.parse_logand()?;
            left = self.semantics.binary(position, BinOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn parse_logand(&mut self) -> CompileResult<S::Expr> {
        let mut left = self.parse_equality()?;
        while self.peek() == TokenKind::Amp {
            let position = self.position();
            self.bump()?;
            let right = self.parse_equality()?;
            left = self.semantics.binary(position, BinOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> CompileResult<S::Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => break,
            };
            let position = self.position();
            self.bump()?;
            let right = self.parse_relational()?;
            left = self.semantics.binary(position, op, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> CompileResult<S::Expr> {
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            let position = self.position();
            self.bump()?;
            let right = self.parse_shift()?;
            left = self.semantics.binary(position, op, left, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> CompileResult<S::Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                _ => break,
            };
            let position = self.position();
            self.bump()?;
            let right = self.parse_additive()?;
            left = self.semantics.binary(position, op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> CompileResult<S::Expr> {
        let mut left = self.parse_mult()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let position = self.position();
            self.bump()?;
            let right = self.parse_mult()?;
            left = self.semantics.binary(position, op, left, right);
        }
        Ok(left)
    }

    fn parse_mult(&mut self) -> CompileResult<S::Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let position = self.position();
            self.bump()?;
            let right = self.parse_unary()?;
            left = self.semantics.binary(position, op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> CompileResult<S::Expr> {
        let position = self.position();
        let op = match self.peek() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::LogicalNot),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Star => Some(UnaryOp::Deref),
            TokenKind::Amp => Some(UnaryOp::AddressOf),
            TokenKind::PlusPlus => Some(UnaryOp::PreIncr),
            TokenKind::MinusMinus => Some(UnaryOp::PreDecr),
            _ => None,
        };
        if let Some(op) = op {
            self.bump()?;
            let operand = self.parse_unary()?;
            Ok(self.semantics.unary(position, op, operand))
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> CompileResult<S::Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let position = self.position();
            match self.peek() {
                TokenKind::LParen => {
                    self.bump()?;
                    let mut args = Vec::new();
                    if self.peek() != TokenKind::RParen {
                        args.push(self.parse_expression()?);
                        while self.peek() == TokenKind::Comma {
                            self.bump()?;
                            args.push(self.parse_expression()?);
                        }
                    }
                    self.expect_punct(TokenKind::RParen, "')' after call arguments")?;
                    expr = self.semantics.call(position, expr, args);
                }
                TokenKind::LBracket => {
                    self.bump()?;
                    let index = self.parse_expression()?;
                    self.expect_punct(TokenKind::RBracket, "']' after index")?;
                    expr = self.semantics.index(position, expr, index);
                }
                TokenKind::PlusPlus => {
                    self.bump()?;
                    expr = self.semantics.unary(position, UnaryOp::PostIncr, expr);
                }
                TokenKind::MinusMinus => {
                    self.bump()?;
                    expr = self.semantics.unary(position, UnaryOp::PostDecr, expr);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> CompileResult<S::Expr> {
        let position = self.position();
        match self.peek() {
            TokenKind::Name(id) => {
                self.bump()?;
                Ok(self.semantics.name(position, id))
            }
            TokenKind::Number(n) => {
                self.bump()?;
                Ok(self.semantics.numeric(position, Word(n as i64)))
            }
            TokenKind::CharLiteral(id) => {
                self.bump()?;
                let value = self.pack_character(position, id)?;
                Ok(self.semantics.character(position, value))
            }
            TokenKind::StringLiteral(id) => {
                self.bump()?;
                let bytes = self.expand_literal(position, id)?;
                Ok(self.semantics.string(position, bytes))
            }
            TokenKind::LParen => {
                self.bump()?;
                let inner = self.parse_expression()?;
                self.expect_punct(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(CompileError::ParseError {
                position,
                message: format!("unexpected token in expression: {other:?}"),
            }),
        }
    }

    // --- literal expansion ---------------------------------------------------

    fn expand_literal(&self, position: Position, id: StringId) -> CompileResult<Vec<u8>> {
        expand_escapes(self.lexer.interner().get(id), position)
    }

    /// Packs a character literal's expanded bytes right-aligned into a word:
    /// the first character occupies the least-significant byte.
    fn pack_character(&self, position: Position, id: StringId) -> CompileResult<Word> {
        let bytes = self.expand_literal(position, id)?;
        let max = self.target.bytes_per_word.bytes() as usize;
        if bytes.len() > max {
            return Err(CompileError::LiteralTooWide { position, bytes: bytes.len(), max });
        }
        let mut value: i64 = 0;
        for (i, &b) in bytes.iter().enumerate() {
            value |= i64::from(b) << (8 * i);
        }
        Ok(Word(value))
    }
}

/// Parses one translation unit (§4.1's `program` rule) through `semantics`.
pub fn parse<S: Semantics>(
    source: &str,
    interner: &mut Interner,
    target: TargetConfig,
    semantics: &mut S,
) -> CompileResult<S::Program> {
    let mut parser = Parser::new(source, interner, target, semantics)?;
    parser.parse_program()
}

/// Parses a single statement, for tooling (e.g. a REPL) that only needs one
/// grammar fragment rather than a whole translation unit.
pub fn parse_statement<S: Semantics>(
    source: &str,
    interner: &mut Interner,
    target: TargetConfig,
    semantics: &mut S,
) -> CompileResult<S::Stmt> {
    let mut parser = Parser::new(source, interner, target, semantics)?;
    let stmt = parser.parse_statement()?;
    match parser.peek() {
        TokenKind::Eof => Ok(stmt),
        other => Err(CompileError::ParseError {
            position: parser.position(),
            message: format!("trailing input after statement: {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::BytesPerWord;

    fn target() -> TargetConfig {
        TargetConfig::new(BytesPerWord::Eight)
    }

    fn parse_program_src(src: &str) -> ast::Program {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        parse(src, &mut interner, target(), &mut semantics).unwrap()
    }

    #[test]
    fn parses_simpledef_with_numeric_initializer() {
        let program = parse_program_src("x 1;");
        assert_eq!(program.definitions.len(), 1);
        assert!(matches!(
            program.definitions[0],
            ast::Definition::SimpleDefinition { initializer: Some(ast::Expr::Numeric { value: Word(1), .. }), .. }
        ));
    }

    #[test]
    fn parses_vectordef_growing_past_declared_size() {
        let program = parse_program_src("v[1] 10, 20, 30;");
        match &program.definitions[0] {
            ast::Definition::VectorDefinition { max_index, initializers, .. } => {
                assert_eq!(*max_index, Some(Word(1)));
                assert_eq!(initializers.len(), 3);
            }
            other => panic!("expected a vector definition, got {other:?}"),
        }
    }

    #[test]
    fn parses_function_with_params_and_compound_body() {
        let program = parse_program_src("main(argc, argv) { return 0; }");
        match &program.definitions[0] {
            ast::Definition::FunctionDefinition { params, body, .. } => {
                assert_eq!(params.len(), 2);
                assert!(matches!(**body, ast::Stmt::Compound { .. }));
            }
            other => panic!("expected a function definition, got {other:?}"),
        }
    }

    #[test]
    fn compound_assignment_binds_tighter_than_a_following_statement() {
        let program = parse_program_src("f() { auto a; a =+ 1; }");
        let ast::Definition::FunctionDefinition { body, .. } = &program.definitions[0] else {
            panic!("expected a function definition");
        };
        let ast::Stmt::Auto { body: inner, .. } = body.as_ref() else {
            panic!("expected an auto statement");
        };
        let ast::Stmt::Compound { statements, .. } = inner.as_ref() else {
            panic!("expected a compound body");
        };
        let ast::Stmt::Expr { expr, .. } = &statements[0] else {
            panic!("expected an expression statement");
        };
        assert!(matches!(expr, ast::Expr::Assign { compound_op: Some(BinOp::Add), .. }));
    }

    #[test]
    fn plain_assign_with_space_then_unary_minus_parses_as_two_expressions() {
        let program = parse_program_src("f() { auto a, b; a = -b; }");
        let ast::Definition::FunctionDefinition { body, .. } = &program.definitions[0] else {
            panic!("expected a function definition");
        };
        let ast::Stmt::Auto { body: inner, .. } = body.as_ref() else {
            panic!("expected an auto statement");
        };
        let ast::Stmt::Compound { statements, .. } = inner.as_ref() else {
            panic!("expected a compound body");
        };
        let ast::Stmt::Expr { expr, .. } = &statements[0] else {
            panic!("expected an expression statement");
        };
        match expr {
            ast::Expr::Assign { compound_op: None, rvalue, .. } => {
                assert!(matches!(**rvalue, ast::Expr::Unary { op: UnaryOp::Neg, .. }));
            }
            other => panic!("expected a plain assignment, got {other:?}"),
        }
    }

    #[test]
    fn label_statement_is_distinguished_from_expression_statement_by_colon() {
        let program = parse_program_src("f() { top: return 0; }");
        let ast::Definition::FunctionDefinition { body, .. } = &program.definitions[0] else {
            panic!("expected a function definition");
        };
        assert!(matches!(body.as_ref(), ast::Stmt::Label { .. }));
    }

    #[test]
    fn forward_goto_reference_parses_without_the_target_existing_yet() {
        let program = parse_program_src("f() { goto done; done: return 0; }");
        let ast::Definition::FunctionDefinition { body, .. } = &program.definitions[0] else {
            panic!("expected a function definition");
        };
        let ast::Stmt::Compound { statements, .. } = body.as_ref() else {
            panic!("expected a compound body");
        };
        assert!(matches!(statements[0], ast::Stmt::Goto { .. }));
        assert!(matches!(statements[1], ast::Stmt::Label { .. }));
    }

    #[test]
    fn character_literal_packs_first_char_into_least_significant_byte() {
        let program = parse_program_src("x 'ab';");
        match &program.definitions[0] {
            ast::Definition::SimpleDefinition { initializer: Some(ast::Expr::Character { value, .. }), .. } => {
                assert_eq!(value.0, i64::from(b'a') | (i64::from(b'b') << 8));
            }
            other => panic!("expected a character literal initializer, got {other:?}"),
        }
    }

    #[test]
    fn character_literal_wider_than_a_word_is_rejected() {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        let cfg = TargetConfig::new(BytesPerWord::Four);
        let err = parse("x 'abcde';", &mut interner, cfg, &mut semantics).unwrap_err();
        assert!(matches!(err, CompileError::LiteralTooWide { .. }));
    }

    #[test]
    fn string_literal_expands_escapes_but_does_not_append_the_terminator() {
        let program = parse_program_src(r#"x "hi*n";"#);
        match &program.definitions[0] {
            ast::Definition::SimpleDefinition { initializer: Some(ast::Expr::String { bytes, .. }), .. } => {
                assert_eq!(bytes, b"hi\n");
            }
            other => panic!("expected a string literal initializer, got {other:?}"),
        }
    }

    #[test]
    fn unknown_escape_is_an_error() {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        let err = parse(r#"x "*q";"#, &mut interner, target(), &mut semantics).unwrap_err();
        assert!(matches!(err, CompileError::EscapeError { escape: 'q', .. }));
    }

    #[test]
    fn parse_statement_rejects_trailing_input() {
        let mut interner = Interner::new();
        let mut semantics = DefaultSemantics;
        let err = parse_statement("return 0; return 1;", &mut interner, target(), &mut semantics).unwrap_err();
        assert!(matches!(err, CompileError::ParseError { .. }));
    }
}
