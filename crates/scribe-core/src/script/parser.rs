//! Recursive descent parser for cell script.

use std::fmt;
use std::rc::Rc;

use super::ast::{
    BinaryOp, Block, Expr, FnDecl, Literal, LogicalOp, Pos, Program, Stmt, UnaryOp,
};
use super::lexer::{LineIndex, Spanned, Token, tokenize};

/// A syntax error with the position it was detected at.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
}

impl ParseError {
    fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxError: {} ({})", self.message, self.pos)
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = Result<T, ParseError>;

/// Blocks and expressions that may be open at once. Generated programs use
/// three levels per cell.
const MAX_NESTING: usize = 4096;

/// Parse a whole program.
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let tokens = tokenize(source).map_err(|e| {
        ParseError::new(format!("unexpected character `{}`", e.text), e.pos)
    })?;
    let end = LineIndex::new(source).end();
    let mut parser = Parser {
        tokens,
        pos: 0,
        end,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at_end() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: Pos,
    depth: usize,
}

impl Parser {
    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                format!("code is nested more than {} levels deep", MAX_NESTING),
                self.current_pos(),
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn current_pos(&self) -> Pos {
        self.tokens.get(self.pos).map(|s| s.pos).unwrap_or(self.end)
    }

    /// Whether the current token starts a new line.
    fn newline_before(&self) -> bool {
        match (self.tokens.get(self.pos), self.pos.checked_sub(1)) {
            (Some(current), Some(prev)) => current.pos.line > self.tokens[prev].pos.line,
            _ => true,
        }
    }

    fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(found) => ParseError::new(
                format!("expected {}, found {}", expected, found),
                self.current_pos(),
            ),
            None => ParseError::new(
                format!("expected {}, found end of input", expected),
                self.end,
            ),
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<Pos> {
        let pos = self.current_pos();
        if self.eat(&expected) {
            Ok(pos)
        } else {
            Err(self.unexpected(&expected.to_string()))
        }
    }

    fn ident(&mut self) -> ParseResult<Rc<str>> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name: Rc<str> = name.as_str().into();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Statements end at `;`, a line break, `}` or end of input.
    fn terminate(&mut self) -> ParseResult<()> {
        if self.eat(&Token::Semi) || self.at_end() || self.check(&Token::RBrace) {
            return Ok(());
        }
        if self.newline_before() {
            return Ok(());
        }
        Err(self.unexpected("`;` or end of line"))
    }

    fn block(&mut self) -> ParseResult<Block> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> ParseResult<Block> {
        self.expect(Token::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.unexpected("`}`"));
            }
            body.push(self.statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(body)
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let pos = self.current_pos();
        match self.peek() {
            Some(Token::Semi) => {
                self.pos += 1;
                Ok(Stmt::Empty)
            }
            Some(Token::Let) | Some(Token::Const) => {
                let constant = matches!(self.advance().map(|s| s.token), Some(Token::Const));
                let name = self.ident()?;
                let init = if self.eat(&Token::Assign) {
                    Some(self.expression()?)
                } else if constant {
                    return Err(self.unexpected("`=` after const declaration"));
                } else {
                    None
                };
                self.terminate()?;
                Ok(Stmt::Let {
                    name,
                    init,
                    constant,
                    pos,
                })
            }
            Some(Token::Fn) if matches!(self.peek_nth(1), Some(Token::Ident(_))) => {
                self.pos += 1;
                let decl = self.function_rest(pos)?;
                Ok(Stmt::Fn(Rc::new(decl)))
            }
            Some(Token::Return) => {
                self.pos += 1;
                let value = if self.at_end()
                    || self.check(&Token::Semi)
                    || self.check(&Token::RBrace)
                    || self.newline_before()
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.terminate()?;
                Ok(Stmt::Return(value, pos))
            }
            Some(Token::If) => self.if_statement(),
            Some(Token::While) => {
                self.pos += 1;
                self.expect(Token::LParen)?;
                let cond = self.expression()?;
                self.expect(Token::RParen)?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::Break) => {
                self.pos += 1;
                self.terminate()?;
                Ok(Stmt::Break(pos))
            }
            Some(Token::Continue) => {
                self.pos += 1;
                self.terminate()?;
                Ok(Stmt::Continue(pos))
            }
            Some(Token::Throw) => {
                self.pos += 1;
                let value = self.expression()?;
                self.terminate()?;
                Ok(Stmt::Throw(value, pos))
            }
            Some(Token::Try) => {
                self.pos += 1;
                let body = self.block()?;
                self.expect(Token::Catch)?;
                let binding = if self.eat(&Token::LParen) {
                    let name = self.ident()?;
                    self.expect(Token::RParen)?;
                    Some(name)
                } else {
                    None
                };
                let handler = self.block()?;
                Ok(Stmt::Try {
                    body,
                    binding,
                    handler,
                })
            }
            Some(Token::LBrace) => Ok(Stmt::Block(self.block()?)),
            Some(Token::Import) => self.import_statement(pos),
            _ => {
                let expr = self.expression()?;
                self.terminate()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        let cond = self.expression()?;
        self.expect(Token::RParen)?;
        let then = self.block()?;
        let otherwise = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                Some(vec![self.nested(Self::if_statement)?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn import_statement(&mut self, pos: Pos) -> ParseResult<Stmt> {
        self.expect(Token::Import)?;
        let binding = match self.peek() {
            Some(Token::Ident(_)) => {
                let name = self.ident()?;
                match self.peek() {
                    Some(Token::Ident(kw)) if kw == "from" => self.pos += 1,
                    _ => return Err(self.unexpected("`from`")),
                }
                Some(name)
            }
            _ => None,
        };
        let module = match self.peek() {
            Some(Token::Str(module)) => module.clone(),
            _ => return Err(self.unexpected("module name string")),
        };
        self.pos += 1;
        self.terminate()?;
        Ok(Stmt::Import {
            binding,
            module,
            pos,
        })
    }

    /// Parameters and body after `fn` (and an optional name).
    fn function_rest(&mut self, pos: Pos) -> ParseResult<FnDecl> {
        let name = match self.peek() {
            Some(Token::Ident(_)) => Some(self.ident()?),
            _ => None,
        };
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            params.push(self.ident()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;
        let body = self.block()?;
        Ok(FnDecl {
            name,
            params,
            body,
            pos,
        })
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let target = self.logical_or()?;
        if self.check(&Token::Assign) {
            let pos = self.current_pos();
            self.pos += 1;
            if !matches!(
                target,
                Expr::Ident(..) | Expr::Member { .. } | Expr::Index { .. }
            ) {
                return Err(ParseError::new("invalid assignment target", target.pos()));
            }
            let value = self.expression()?;
            return Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
                pos,
            });
        }
        Ok(target)
    }

    fn logical_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.logical_and()?;
        while self.check(&Token::OrOr) {
            let pos = self.current_pos();
            self.pos += 1;
            let rhs = self.logical_and()?;
            lhs = Expr::Logical {
                op: LogicalOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.equality()?;
        while self.check(&Token::AndAnd) {
            let pos = self.current_pos();
            self.pos += 1;
            let rhs = self.equality()?;
            lhs = Expr::Logical {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        ops: &[(Token, BinaryOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.check(token) {
                    let pos = self.current_pos();
                    self.pos += 1;
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        pos,
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::NotEq)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::LtEq, BinaryOp::LtEq),
                (Token::Gt, BinaryOp::Gt),
                (Token::GtEq, BinaryOp::GtEq),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let pos = self.current_pos();
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let expr = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
            pos,
        })
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) if !self.newline_before() => {
                    let pos = self.current_pos();
                    self.pos += 1;
                    let args = self.list_items(Token::RParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        pos,
                    };
                }
                Some(Token::LBracket) if !self.newline_before() => {
                    let pos = self.current_pos();
                    self.pos += 1;
                    let index = self.expression()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        pos,
                    };
                }
                Some(Token::Dot) => {
                    let pos = self.current_pos();
                    self.pos += 1;
                    let name = self.ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        name,
                        pos,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma separated expressions up to `close`; trailing comma allowed.
    fn list_items(&mut self, close: Token) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.check(&close) {
            items.push(self.expression()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let pos = self.current_pos();
        let Some(spanned) = self.advance() else {
            return Err(self.unexpected("expression"));
        };
        let expr = match spanned.token {
            Token::Number(n) => Expr::Literal(Literal::Number(n), pos),
            Token::Str(s) => Expr::Literal(Literal::Str(s.into()), pos),
            Token::True => Expr::Literal(Literal::Bool(true), pos),
            Token::False => Expr::Literal(Literal::Bool(false), pos),
            Token::Null => Expr::Literal(Literal::Null, pos),
            Token::Ident(name) => Expr::Ident(name.into(), pos),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                inner
            }
            Token::LBracket => Expr::List(self.list_items(Token::RBracket)?, pos),
            Token::LBrace => {
                let mut fields = Vec::new();
                while !self.check(&Token::RBrace) {
                    let key: Rc<str> = match self.peek() {
                        Some(Token::Ident(key)) | Some(Token::Str(key)) => key.as_str().into(),
                        _ => return Err(self.unexpected("object key")),
                    };
                    self.pos += 1;
                    self.expect(Token::Colon)?;
                    let value = self.expression()?;
                    fields.push((key, value));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBrace)?;
                Expr::Object(fields, pos)
            }
            Token::Fn => Expr::Function(Rc::new(self.function_rest(pos)?)),
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("expression"));
            }
        };
        Ok(expr)
    }
}
