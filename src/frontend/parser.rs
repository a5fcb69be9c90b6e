use crate::diagnostics::{Diagnostics, SourceLoc, Stage};
use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;
use crate::lang::ast::{
    BaseType, BinOp, Block, Expr, Param, Program, Stmt, TypeSpec, UnOp,
};
use crate::lang::value::Value;

/// Recursive-descent parser for Cinder.
///
/// Expressions use precedence climbing; statements are dispatched on the
/// leading token, with one-token lookahead to tell type-prefixed
/// declarations (`Int x = 1`) apart from expression statements.
///
/// The parser never aborts: a missing expected token is recorded in the
/// diagnostic collector and a placeholder node is synthesized so parsing
/// continues.
pub struct Parser<'d> {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Location of the most recently consumed token, used for errors
    /// reported at or past end-of-file.
    last_loc: SourceLoc,
    diags: &'d mut Diagnostics,
}

impl<'d> Parser<'d> {
    /// Creates a parser from lexer output. Newlines are filtered out up
    /// front: they are insignificant between tokens.
    pub fn new(tokens: Vec<Spanned>, diags: &'d mut Diagnostics) -> Self {
        let tokens: Vec<Spanned> = tokens
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Newline))
            .collect();
        Parser {
            tokens,
            pos: 0,
            last_loc: SourceLoc::new(1, 1),
            diags,
        }
    }

    fn current(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_next(&self) -> &Token {
        self.tokens
            .get(self.pos + 1)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn loc(&self) -> SourceLoc {
        self.tokens
            .get(self.pos)
            .map(|s| s.loc)
            .unwrap_or(self.last_loc)
    }

    fn advance(&mut self) -> Token {
        let spanned = self.tokens.get(self.pos).cloned();
        match spanned {
            Some(s) => {
                self.last_loc = s.loc;
                if !matches!(s.token, Token::Eof) {
                    self.pos += 1;
                }
                s.token
            }
            None => Token::Eof,
        }
    }

    fn check(&self, token: &Token) -> bool {
        self.current() == token
    }

    fn matches(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            return true;
        }
        false
    }

    fn at_end(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn error(&mut self, message: impl Into<String>) {
        let loc = self.loc();
        self.diags.error(Stage::Parser, loc, message);
    }

    /// Consume `token` or record a diagnostic and stay put.
    fn expect(&mut self, token: &Token, message: &str) -> bool {
        if self.matches(token) {
            return true;
        }
        let got = self.current().to_string();
        self.error(format!("{}, got '{}'", message, got));
        false
    }

    fn placeholder(&self) -> Expr {
        Expr::Literal {
            value: Value::Null,
            loc: self.last_loc,
        }
    }

    /// Parses a complete program: a flat list of top-level forms.
    pub fn parse(&mut self) -> Program {
        let mut program = Program::default();

        while !self.at_end() {
            let before = self.pos;
            if let Some(stmt) = self.parse_top_level() {
                program.nodes.push(stmt);
            }
            // A statement that consumed nothing would loop forever; skip
            // the offending token.
            if self.pos == before && !self.at_end() {
                self.advance();
            }
        }

        program
    }

    fn parse_top_level(&mut self) -> Option<Stmt> {
        if self.check(&Token::Func) {
            return self.parse_func_decl();
        }
        self.parse_statement()
    }

    // ── Declarations ────────────────────────────────────────────────

    /// `func ReturnType? name ( params? ) block`
    ///
    /// The return type is present iff the token after `func` is a type
    /// name; otherwise the function is void.
    fn parse_func_decl(&mut self) -> Option<Stmt> {
        let loc = self.loc();
        self.advance(); // 'func'

        let has_return_type = self
            .current()
            .ident_lexeme()
            .map(|lex| TypeSpec::base_from_name(lex).is_some())
            .unwrap_or(false);
        let return_type = if has_return_type {
            self.parse_type()
        } else {
            TypeSpec::void()
        };

        let name = match self.advance() {
            Token::Ident(name) => name,
            other => {
                self.diags.error(
                    Stage::Parser,
                    loc,
                    format!("expected function name, got '{}'", other),
                );
                return None;
            }
        };

        self.expect(&Token::LParen, "expected '(' after function name");

        let mut params = Vec::new();
        if !self.check(&Token::RParen) && !self.at_end() {
            loop {
                let param_loc = self.loc();
                let param_name = match self.advance() {
                    Token::Ident(n) => n,
                    other => {
                        self.diags.error(
                            Stage::Parser,
                            param_loc,
                            format!("expected parameter name, got '{}'", other),
                        );
                        break;
                    }
                };
                self.expect(&Token::Colon, "expected ':' after parameter name");
                let ty = self.parse_type();
                params.push(Param {
                    name: param_name,
                    ty,
                    loc: param_loc,
                });
                if !self.matches(&Token::Comma) {
                    break;
                }
            }
        }

        self.expect(&Token::RParen, "expected ')' after parameters");
        let body = self.parse_block();

        Some(Stmt::FuncDecl {
            name,
            return_type,
            params,
            body,
            loc,
        })
    }

    /// Type annotation: a built-in type name, an optional `32`/`64` bit
    /// width written as a separate integer literal, and an optional `[]`.
    fn parse_type(&mut self) -> TypeSpec {
        let lexeme = self.current().ident_lexeme().map(str::to_string);
        let base = match lexeme {
            Some(lex) => match TypeSpec::base_from_name(&lex) {
                Some(base) => {
                    self.advance();
                    base
                }
                None => {
                    self.error(format!("unknown type name '{}'", lex));
                    self.advance();
                    BaseType::Unknown
                }
            },
            None => {
                let got = self.current().to_string();
                self.error(format!("expected type name, got '{}'", got));
                BaseType::Unknown
            }
        };

        let mut ty = TypeSpec::new(base);

        if let Token::Int(width) = *self.current() {
            if width == 32 || width == 64 {
                ty.bit_width = width as u32;
                self.advance();
            }
        }

        if self.matches(&Token::LBracket) {
            ty.is_array = true;
            self.expect(&Token::RBracket, "expected ']' in array type");
        }

        ty
    }

    /// `Let name : Type = init?`
    fn parse_let_decl(&mut self) -> Option<Stmt> {
        let loc = self.loc();
        self.advance(); // 'Let'

        let name = match self.advance() {
            Token::Ident(name) => name,
            other => {
                self.diags.error(
                    Stage::Parser,
                    loc,
                    format!("expected variable name after 'Let', got '{}'", other),
                );
                return None;
            }
        };

        self.expect(&Token::Colon, "expected ':' in variable declaration");
        let ty = self.parse_type();

        let init = if self.matches(&Token::Equal) {
            Some(self.parse_expression())
        } else {
            None
        };

        self.matches(&Token::Semicolon);

        Some(Stmt::VarDecl {
            name,
            ty,
            init,
            loc,
        })
    }

    /// `Type name = init?` — entered only after the lookahead confirmed
    /// the current lexeme is a type name and the next token an identifier.
    fn parse_typed_decl(&mut self) -> Option<Stmt> {
        let loc = self.loc();
        let ty = self.parse_type();

        let name = match self.advance() {
            Token::Ident(name) => name,
            other => {
                self.diags.error(
                    Stage::Parser,
                    loc,
                    format!("expected variable name after type, got '{}'", other),
                );
                return None;
            }
        };

        let init = if self.matches(&Token::Equal) {
            Some(self.parse_expression())
        } else {
            None
        };

        self.matches(&Token::Semicolon);

        Some(Stmt::VarDecl {
            name,
            ty,
            init,
            loc,
        })
    }

    /// True when the current position starts a type-prefixed declaration:
    /// a type-name lexeme followed by an identifier.
    fn at_typed_decl(&self) -> bool {
        let is_type = self
            .current()
            .ident_lexeme()
            .map(|lex| TypeSpec::base_from_name(lex).is_some())
            .unwrap_or(false);
        is_type && matches!(self.peek_next(), Token::Ident(_))
    }

    // ── Statements ──────────────────────────────────────────────────

    fn parse_block(&mut self) -> Block {
        let mut block = Block::default();
        if !self.expect(&Token::LBrace, "expected '{'") {
            return block;
        }

        while !self.check(&Token::RBrace) && !self.at_end() {
            let before = self.pos;
            if let Some(stmt) = self.parse_statement() {
                block.statements.push(stmt);
            }
            if self.pos == before && !self.at_end() {
                self.advance();
            }
        }

        self.expect(&Token::RBrace, "expected '}'");
        block
    }

    fn parse_statement(&mut self) -> Option<Stmt> {
        match self.current() {
            Token::Import => self.parse_import(),
            Token::Let => self.parse_let_decl(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::For => self.parse_for(),
            Token::Return => self.parse_return(),
            Token::Break => {
                let loc = self.loc();
                self.advance();
                self.matches(&Token::Semicolon);
                Some(Stmt::Break { loc })
            }
            Token::Continue => {
                let loc = self.loc();
                self.advance();
                self.matches(&Token::Semicolon);
                Some(Stmt::Continue { loc })
            }
            Token::Func => {
                self.error("function declarations are only allowed at the top level");
                self.advance();
                None
            }
            _ if self.at_typed_decl() => self.parse_typed_decl(),
            _ => {
                let expr = self.parse_expression();
                self.matches(&Token::Semicolon);
                Some(Stmt::Expr(expr))
            }
        }
    }

    /// `Import < ident (. ident)? >`
    fn parse_import(&mut self) -> Option<Stmt> {
        let loc = self.loc();
        self.advance(); // 'Import'

        self.expect(&Token::Less, "expected '<' after 'Import'");

        let mut target = match self.advance() {
            Token::Ident(name) => name,
            other => {
                self.diags.error(
                    Stage::Parser,
                    loc,
                    format!("expected import name, got '{}'", other),
                );
                return None;
            }
        };

        if self.matches(&Token::Dot) {
            if let Token::Ident(ext) = self.current().clone() {
                self.advance();
                target.push('.');
                target.push_str(&ext);
            }
        }

        self.expect(&Token::Greater, "expected '>' after import name");
        self.matches(&Token::Semicolon);

        Some(Stmt::Import { target, loc })
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let loc = self.loc();
        self.advance(); // 'if'

        self.expect(&Token::LParen, "expected '(' after 'if'");
        let cond = self.parse_expression();
        self.expect(&Token::RParen, "expected ')' after condition");

        let then_block = self.parse_block();

        let else_block = if self.matches(&Token::Else) {
            if self.check(&Token::If) {
                // `else if`: wrap the nested if in a synthetic block.
                let mut block = Block::default();
                if let Some(nested) = self.parse_if() {
                    block.statements.push(nested);
                }
                Some(block)
            } else {
                Some(self.parse_block())
            }
        } else {
            None
        };

        Some(Stmt::If {
            cond,
            then_block,
            else_block,
            loc,
        })
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let loc = self.loc();
        self.advance(); // 'while'

        self.expect(&Token::LParen, "expected '(' after 'while'");
        let cond = self.parse_expression();
        self.expect(&Token::RParen, "expected ')' after condition");

        let body = self.parse_block();

        Some(Stmt::While { cond, body, loc })
    }

    /// `for ( init? ; cond? ; step? ) block`
    fn parse_for(&mut self) -> Option<Stmt> {
        let loc = self.loc();
        self.advance(); // 'for'

        self.expect(&Token::LParen, "expected '(' after 'for'");

        let init = if self.check(&Token::Semicolon) {
            None
        } else if self.check(&Token::Let) {
            self.parse_let_decl().map(Box::new)
        } else if self.at_typed_decl() {
            self.parse_typed_decl().map(Box::new)
        } else {
            let expr = self.parse_expression();
            Some(Box::new(Stmt::Expr(expr)))
        };
        // A declaration consumed its own semicolon; a bare init did not.
        self.matches(&Token::Semicolon);

        let cond = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression())
        };
        self.matches(&Token::Semicolon);

        let step = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_expression())
        };

        self.expect(&Token::RParen, "expected ')' after for clauses");

        let body = self.parse_block();

        Some(Stmt::For {
            init,
            cond,
            step,
            body,
            loc,
        })
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let loc = self.loc();
        self.advance(); // 'return'

        let value = if self.check(&Token::Semicolon)
            || self.check(&Token::RBrace)
            || self.at_end()
        {
            None
        } else {
            Some(self.parse_expression())
        };

        self.matches(&Token::Semicolon);

        Some(Stmt::Return { value, loc })
    }

    // ── Expressions ─────────────────────────────────────────────────

    pub fn parse_expression(&mut self) -> Expr {
        self.parse_assignment()
    }

    /// Assignment is right-associative and only valid when the left side
    /// is an identifier or an index access.
    fn parse_assignment(&mut self) -> Expr {
        let expr = self.parse_logic_or();

        if self.check(&Token::Equal) {
            let loc = self.loc();
            self.advance();
            let value = self.parse_assignment();

            match &expr {
                Expr::Identifier { .. } | Expr::Index { .. } => {
                    return Expr::Assign {
                        target: Box::new(expr),
                        value: Box::new(value),
                        loc,
                    };
                }
                _ => {
                    self.diags.error(
                        Stage::Parser,
                        loc,
                        "invalid assignment target".to_string(),
                    );
                    return expr;
                }
            }
        }

        expr
    }

    fn parse_logic_or(&mut self) -> Expr {
        let mut expr = self.parse_logic_and();
        while self.check(&Token::OrOr) {
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_logic_and();
            expr = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
                loc,
            };
        }
        expr
    }

    fn parse_logic_and(&mut self) -> Expr {
        let mut expr = self.parse_equality();
        while self.check(&Token::AndAnd) {
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_equality();
            expr = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
                loc,
            };
        }
        expr
    }

    fn parse_equality(&mut self) -> Expr {
        let mut expr = self.parse_comparison();
        loop {
            let op = match self.current() {
                Token::EqualEqual => BinOp::Eq,
                Token::BangEqual => BinOp::Ne,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_comparison();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
                loc,
            };
        }
        expr
    }

    fn parse_comparison(&mut self) -> Expr {
        let mut expr = self.parse_additive();
        loop {
            let op = match self.current() {
                Token::Less => BinOp::Lt,
                Token::LessEqual => BinOp::Le,
                Token::Greater => BinOp::Gt,
                Token::GreaterEqual => BinOp::Ge,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_additive();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
                loc,
            };
        }
        expr
    }

    fn parse_additive(&mut self) -> Expr {
        let mut expr = self.parse_multiplicative();
        loop {
            let op = match self.current() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_multiplicative();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
                loc,
            };
        }
        expr
    }

    fn parse_multiplicative(&mut self) -> Expr {
        let mut expr = self.parse_unary();
        loop {
            let op = match self.current() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_unary();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
                loc,
            };
        }
        expr
    }

    fn parse_unary(&mut self) -> Expr {
        let op = match self.current() {
            Token::Minus => Some(UnOp::Neg),
            Token::Bang => Some(UnOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            let loc = self.loc();
            self.advance();
            let operand = self.parse_unary();
            return Expr::Unary {
                op,
                operand: Box::new(operand),
                loc,
            };
        }
        self.parse_postfix()
    }

    /// Postfix operators: a call on an identifier, then any number of
    /// index accesses chaining left-to-right.
    fn parse_postfix(&mut self) -> Expr {
        let mut expr = self.parse_primary();

        if self.check(&Token::LParen) {
            if let Expr::Identifier { name, loc } = &expr {
                let callee = name.clone();
                let loc = *loc;
                self.advance(); // '('
                let args = self.parse_call_args(&callee);
                expr = Expr::Call { callee, args, loc };
            }
        }

        while self.check(&Token::LBracket) {
            let loc = self.loc();
            self.advance();
            let index = self.parse_expression();
            self.expect(&Token::RBracket, "expected ']' after index");
            expr = Expr::Index {
                array: Box::new(expr),
                index: Box::new(index),
                loc,
            };
        }

        expr
    }

    /// Argument list after an already-consumed `(`.
    ///
    /// The formatted-print builtins accept a colon after the first
    /// argument separating the format from its arguments:
    /// `printf("%d\n": x)`. A comma in that position is the same call.
    fn parse_call_args(&mut self, callee: &str) -> Vec<Expr> {
        let mut args = Vec::new();

        if !self.check(&Token::RParen) && !self.at_end() {
            loop {
                args.push(self.parse_assignment());

                let formatted = (callee == "printf" || callee == "print") && args.len() == 1;
                if formatted && self.matches(&Token::Colon) {
                    if !self.check(&Token::RParen) && !self.at_end() {
                        loop {
                            args.push(self.parse_assignment());
                            if !self.matches(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    break;
                }

                if !self.matches(&Token::Comma) {
                    break;
                }
            }
        }

        self.expect(&Token::RParen, "expected ')' after arguments");
        args
    }

    fn parse_primary(&mut self) -> Expr {
        let loc = self.loc();
        match self.current().clone() {
            Token::Int(n) => {
                self.advance();
                Expr::Literal {
                    value: Value::Int(n),
                    loc,
                }
            }
            Token::Float(n) => {
                self.advance();
                Expr::Literal {
                    value: Value::Float(n),
                    loc,
                }
            }
            Token::Str(s) => {
                self.advance();
                Expr::Literal {
                    value: Value::str(s),
                    loc,
                }
            }
            Token::Char(c) => {
                self.advance();
                Expr::Literal {
                    value: Value::Char(c),
                    loc,
                }
            }
            Token::True => {
                self.advance();
                Expr::Literal {
                    value: Value::Bool(true),
                    loc,
                }
            }
            Token::False => {
                self.advance();
                Expr::Literal {
                    value: Value::Bool(false),
                    loc,
                }
            }
            Token::Ident(name) => {
                self.advance();
                Expr::Identifier { name, loc }
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression();
                self.expect(&Token::RParen, "expected ')'");
                expr
            }
            other => {
                self.error(format!("unexpected token in expression: '{}'", other));
                self.placeholder()
            }
        }
    }
}
