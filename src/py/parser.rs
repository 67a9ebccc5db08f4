//! Recursive-descent parser building into the flat arena.
//!
//! Every node gets a byte span. Errors carry line/column and render with a
//! caret under the offending column.

use super::ast::{
    Arena, BinOpKind, BoolOpKind, CmpOpKind, NameCtx, NodeId, NodeKind, Number, Span, UnaryOpKind,
};
use super::errors::{error_at, ParseError};
use super::lexer::{decode_string, tokenize, Token, TokenKind};

const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "while", "for", "in", "is", "def", "return", "pass", "break", "continue",
    "and", "or", "not", "None", "True", "False",
];

#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub arena: Arena,
    pub root: NodeId,
    pub tokens: Vec<Token>,
    pub comments: Vec<Span>,
}

pub fn parse_module(text: &str, filename: &str) -> Result<ParseOutput, ParseError> {
    let lexed = tokenize(text, filename)?;
    let mut parser = Parser {
        text,
        filename,
        tokens: &lexed.tokens,
        pos: 0,
        arena: Arena::new(),
    };
    let mut body = Vec::new();
    while parser.peek_kind() != TokenKind::Eof {
        parser.parse_stmt_into(&mut body)?;
    }
    let root = parser
        .arena
        .alloc(NodeKind::Module { body }, Span::new(0, text.len()));
    Ok(ParseOutput {
        arena: parser.arena,
        root,
        tokens: lexed.tokens,
        comments: lexed.comments,
    })
}

struct Parser<'a> {
    text: &'a str,
    filename: &'a str,
    tokens: &'a [Token],
    pos: usize,
    arena: Arena,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_text(&self) -> &'a str {
        self.peek().text(self.text)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(error_at(
            self.filename,
            self.text,
            self.peek().span.start,
            message.into(),
        ))
    }

    fn error_at_span<T>(&self, span: Span, message: impl Into<String>) -> Result<T, ParseError> {
        Err(error_at(self.filename, self.text, span.start, message.into()))
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.peek_kind() == TokenKind::Ident && self.peek_text() == kw
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<Token, ParseError> {
        if self.at_keyword(kw) {
            Ok(self.advance())
        } else {
            self.error(format!("expected '{kw}'"))
        }
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Op(o) if o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<Token, ParseError> {
        if self.at_op(op) {
            Ok(self.advance())
        } else {
            self.error(format!("expected '{op}'"))
        }
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        if self.peek_kind() == TokenKind::Newline {
            self.advance();
            Ok(())
        } else {
            self.error("expected end of line")
        }
    }

    // ---- statements ----

    fn parse_stmt_into(&mut self, body: &mut Vec<NodeId>) -> Result<(), ParseError> {
        match self.peek_text() {
            "if" => body.push(self.parse_if()?),
            "while" => body.push(self.parse_while()?),
            "for" => body.push(self.parse_for()?),
            "def" => body.push(self.parse_def()?),
            _ => self.parse_simple_line(body)?,
        }
        Ok(())
    }

    /// One physical line of `;`-separated small statements.
    fn parse_simple_line(&mut self, body: &mut Vec<NodeId>) -> Result<(), ParseError> {
        loop {
            body.push(self.parse_small_stmt()?);
            if !self.eat_op(";") {
                break;
            }
            if self.peek_kind() == TokenKind::Newline {
                break;
            }
        }
        self.expect_newline()
    }

    fn parse_small_stmt(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        match self.peek_text() {
            "pass" => {
                self.advance();
                Ok(self.arena.alloc(NodeKind::Pass, Span::new(start, self.prev_end())))
            }
            "break" => {
                self.advance();
                Ok(self.arena.alloc(NodeKind::Break, Span::new(start, self.prev_end())))
            }
            "continue" => {
                self.advance();
                Ok(self
                    .arena
                    .alloc(NodeKind::Continue, Span::new(start, self.prev_end())))
            }
            "return" => {
                self.advance();
                let value = if self.peek_kind() == TokenKind::Newline || self.at_op(";") {
                    None
                } else {
                    Some(self.parse_expr_or_tuple()?)
                };
                Ok(self
                    .arena
                    .alloc(NodeKind::Return { value }, Span::new(start, self.prev_end())))
            }
            _ => self.parse_expr_stmt(start),
        }
    }

    fn parse_expr_stmt(&mut self, start: usize) -> Result<NodeId, ParseError> {
        let first = self.parse_expr_or_tuple()?;
        if let Some(op) = self.peek_aug_op() {
            self.advance();
            self.check_aug_target(first)?;
            self.set_store(first)?;
            let value = self.parse_expr_or_tuple()?;
            return Ok(self.arena.alloc(
                NodeKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
                Span::new(start, self.prev_end()),
            ));
        }
        if self.eat_op("=") {
            self.set_store(first)?;
            let value = self.parse_expr_or_tuple()?;
            if self.at_op("=") {
                return self.error("chained assignment is not supported");
            }
            return Ok(self.arena.alloc(
                NodeKind::Assign {
                    target: first,
                    value,
                },
                Span::new(start, self.prev_end()),
            ));
        }
        Ok(self
            .arena
            .alloc(NodeKind::ExprStmt { value: first }, Span::new(start, self.prev_end())))
    }

    fn peek_aug_op(&self) -> Option<BinOpKind> {
        let TokenKind::Op(op) = self.peek_kind() else {
            return None;
        };
        match op {
            "+=" => Some(BinOpKind::Add),
            "-=" => Some(BinOpKind::Sub),
            "*=" => Some(BinOpKind::Mul),
            "/=" => Some(BinOpKind::Div),
            "//=" => Some(BinOpKind::FloorDiv),
            "%=" => Some(BinOpKind::Mod),
            "**=" => Some(BinOpKind::Pow),
            _ => None,
        }
    }

    fn check_aug_target(&self, id: NodeId) -> Result<(), ParseError> {
        let node = self.arena.node(id);
        if matches!(
            node.kind,
            NodeKind::Name { .. } | NodeKind::Attribute { .. } | NodeKind::Subscript { .. }
        ) {
            Ok(())
        } else {
            self.error_at_span(node.span, "invalid augmented assignment target")
        }
    }

    /// Flips load context to store on an assignment target, recursing into
    /// tuple and list targets.
    fn set_store(&mut self, id: NodeId) -> Result<(), ParseError> {
        let span = self.arena.node(id).span;
        let elts = match &mut self.arena.node_mut(id).kind {
            NodeKind::Name { ctx, .. }
            | NodeKind::Attribute { ctx, .. }
            | NodeKind::Subscript { ctx, .. } => {
                *ctx = NameCtx::Store;
                return Ok(());
            }
            NodeKind::Tuple { elts, ctx } | NodeKind::List { elts, ctx } => {
                *ctx = NameCtx::Store;
                elts.clone()
            }
            _ => return self.error_at_span(span, "cannot assign to this expression"),
        };
        for elt in elts {
            self.set_store(elt)?;
        }
        Ok(())
    }

    fn parse_if(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        self.expect_keyword("if")?;
        let test = self.parse_expr()?;
        self.expect_op(":")?;
        let body = self.parse_suite()?;
        let orelse = self.parse_if_tail()?;
        Ok(self.arena.alloc(
            NodeKind::If { test, body, orelse },
            Span::new(start, self.prev_end()),
        ))
    }

    /// `elif` chains become a nested `If` in the else branch.
    fn parse_if_tail(&mut self) -> Result<Vec<NodeId>, ParseError> {
        if self.at_keyword("elif") {
            let start = self.peek().span.start;
            self.advance();
            let test = self.parse_expr()?;
            self.expect_op(":")?;
            let body = self.parse_suite()?;
            let orelse = self.parse_if_tail()?;
            let nested = self.arena.alloc(
                NodeKind::If { test, body, orelse },
                Span::new(start, self.prev_end()),
            );
            return Ok(vec![nested]);
        }
        if self.eat_keyword("else") {
            self.expect_op(":")?;
            return self.parse_suite();
        }
        Ok(Vec::new())
    }

    fn parse_while(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        self.expect_keyword("while")?;
        let test = self.parse_expr()?;
        self.expect_op(":")?;
        let body = self.parse_suite()?;
        let orelse = self.parse_else_suite()?;
        Ok(self.arena.alloc(
            NodeKind::While { test, body, orelse },
            Span::new(start, self.prev_end()),
        ))
    }

    fn parse_for(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        self.expect_keyword("for")?;
        let target = self.parse_expr_or_tuple_no_in()?;
        self.set_store(target)?;
        self.expect_keyword("in")?;
        let iter = self.parse_expr_or_tuple()?;
        self.expect_op(":")?;
        let body = self.parse_suite()?;
        let orelse = self.parse_else_suite()?;
        Ok(self.arena.alloc(
            NodeKind::For {
                target,
                iter,
                body,
                orelse,
            },
            Span::new(start, self.prev_end()),
        ))
    }

    fn parse_else_suite(&mut self) -> Result<Vec<NodeId>, ParseError> {
        if self.eat_keyword("else") {
            self.expect_op(":")?;
            self.parse_suite()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_def(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        self.expect_keyword("def")?;
        let name = self.expect_plain_ident("function name")?;
        self.expect_op("(")?;
        let params = self.parse_params()?;
        self.expect_op(")")?;
        self.expect_op(":")?;
        let body = self.parse_suite()?;
        Ok(self.arena.alloc(
            NodeKind::FunctionDef { name, params, body },
            Span::new(start, self.prev_end()),
        ))
    }

    fn parse_params(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut params = Vec::new();
        let mut saw_default = false;
        while !self.at_op(")") {
            let start = self.peek().span.start;
            let name = self.expect_plain_ident("parameter name")?;
            let default = if self.eat_op("=") {
                saw_default = true;
                Some(self.parse_expr()?)
            } else {
                if saw_default {
                    return self.error_at_span(
                        Span::new(start, self.prev_end()),
                        "parameter without a default follows a parameter with a default",
                    );
                }
                None
            };
            params.push(self.arena.alloc(
                NodeKind::Param { name, default },
                Span::new(start, self.prev_end()),
            ));
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn parse_suite(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut body = Vec::new();
        if self.peek_kind() == TokenKind::Newline {
            self.advance();
            if self.peek_kind() != TokenKind::Indent {
                return self.error("expected an indented block");
            }
            self.advance();
            while self.peek_kind() != TokenKind::Dedent {
                if self.peek_kind() == TokenKind::Eof {
                    return self.error("expected a dedent to close the block");
                }
                self.parse_stmt_into(&mut body)?;
            }
            self.advance();
        } else {
            self.parse_simple_line(&mut body)?;
        }
        Ok(body)
    }

    // ---- expressions ----

    fn parse_expr_or_tuple(&mut self) -> Result<NodeId, ParseError> {
        self.parse_tuple_impl(true)
    }

    /// `for` targets stop at `in`, which plain tuple parsing would swallow
    /// as a comparison operand.
    fn parse_expr_or_tuple_no_in(&mut self) -> Result<NodeId, ParseError> {
        self.parse_tuple_impl(false)
    }

    fn parse_tuple_impl(&mut self, allow_in: bool) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let first = if allow_in {
            self.parse_expr()?
        } else {
            self.parse_no_in_element()?
        };
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        let mut end = self.arena.node(first).span.end;
        while self.eat_op(",") {
            end = self.prev_end();
            if self.tuple_element_follows() {
                let elt = if allow_in {
                    self.parse_expr()?
                } else {
                    self.parse_no_in_element()?
                };
                end = self.arena.node(elt).span.end;
                elts.push(elt);
            } else {
                break;
            }
        }
        Ok(self.arena.alloc(
            NodeKind::Tuple {
                elts,
                ctx: NameCtx::Load,
            },
            Span::new(start, end),
        ))
    }

    fn tuple_element_follows(&self) -> bool {
        match self.peek_kind() {
            TokenKind::Newline | TokenKind::Eof => false,
            TokenKind::Op(op) => !matches!(op, ")" | "]" | ":" | ";" | "="),
            TokenKind::Ident => !matches!(self.peek_text(), "in" | "if" | "else"),
            _ => true,
        }
    }

    /// A tuple element in a `for` target: comparisons would consume `in`,
    /// so targets parse at arithmetic precedence.
    fn parse_no_in_element(&mut self) -> Result<NodeId, ParseError> {
        self.parse_arith()
    }

    fn parse_expr(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let body = self.parse_or()?;
        if self.eat_keyword("if") {
            let test = self.parse_or()?;
            self.expect_keyword("else")?;
            let orelse = self.parse_expr()?;
            return Ok(self.arena.alloc(
                NodeKind::IfExp { test, body, orelse },
                Span::new(start, self.prev_end()),
            ));
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let first = self.parse_and()?;
        if !self.at_keyword("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword("or") {
            values.push(self.parse_and()?);
        }
        Ok(self.arena.alloc(
            NodeKind::BoolOp {
                op: BoolOpKind::Or,
                values,
            },
            Span::new(start, self.prev_end()),
        ))
    }

    fn parse_and(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let first = self.parse_not()?;
        if !self.at_keyword("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword("and") {
            values.push(self.parse_not()?);
        }
        Ok(self.arena.alloc(
            NodeKind::BoolOp {
                op: BoolOpKind::And,
                values,
            },
            Span::new(start, self.prev_end()),
        ))
    }

    fn parse_not(&mut self) -> Result<NodeId, ParseError> {
        if self.at_keyword("not") {
            let start = self.peek().span.start;
            self.advance();
            let operand = self.parse_not()?;
            return Ok(self.arena.alloc(
                NodeKind::UnaryOp {
                    op: UnaryOpKind::Not,
                    operand,
                },
                Span::new(start, self.prev_end()),
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let left = self.parse_arith()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.peek_cmp_op() {
            self.consume_cmp_op(op);
            ops.push(op);
            comparators.push(self.parse_arith()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(self.arena.alloc(
            NodeKind::Compare {
                left,
                ops,
                comparators,
            },
            Span::new(start, self.prev_end()),
        ))
    }

    fn peek_cmp_op(&self) -> Option<CmpOpKind> {
        match self.peek_kind() {
            TokenKind::Op("==") => Some(CmpOpKind::Eq),
            TokenKind::Op("!=") => Some(CmpOpKind::NotEq),
            TokenKind::Op("<") => Some(CmpOpKind::Lt),
            TokenKind::Op("<=") => Some(CmpOpKind::LtE),
            TokenKind::Op(">") => Some(CmpOpKind::Gt),
            TokenKind::Op(">=") => Some(CmpOpKind::GtE),
            TokenKind::Ident if self.peek_text() == "is" => {
                if self.next_is_keyword("not") {
                    Some(CmpOpKind::IsNot)
                } else {
                    Some(CmpOpKind::Is)
                }
            }
            TokenKind::Ident if self.peek_text() == "in" => Some(CmpOpKind::In),
            TokenKind::Ident if self.peek_text() == "not" => {
                if self.next_is_keyword("in") {
                    Some(CmpOpKind::NotIn)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn next_is_keyword(&self, kw: &str) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| t.kind == TokenKind::Ident && t.text(self.text) == kw)
    }

    fn consume_cmp_op(&mut self, op: CmpOpKind) {
        self.advance();
        if matches!(op, CmpOpKind::IsNot | CmpOpKind::NotIn) {
            self.advance();
        }
    }

    fn parse_arith(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Op("+") => BinOpKind::Add,
                TokenKind::Op("-") => BinOpKind::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = self.arena.alloc(
                NodeKind::BinOp { left, op, right },
                Span::new(start, self.prev_end()),
            );
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Op("*") => BinOpKind::Mul,
                TokenKind::Op("/") => BinOpKind::Div,
                TokenKind::Op("//") => BinOpKind::FloorDiv,
                TokenKind::Op("%") => BinOpKind::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = self.arena.alloc(
                NodeKind::BinOp { left, op, right },
                Span::new(start, self.prev_end()),
            );
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let op = match self.peek_kind() {
            TokenKind::Op("+") => Some(UnaryOpKind::UAdd),
            TokenKind::Op("-") => Some(UnaryOpKind::USub),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_factor()?;
            return Ok(self.arena.alloc(
                NodeKind::UnaryOp { op, operand },
                Span::new(start, self.prev_end()),
            ));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let left = self.parse_postfix()?;
        if self.eat_op("**") {
            let right = self.parse_factor()?;
            return Ok(self.arena.alloc(
                NodeKind::BinOp {
                    left,
                    op: BinOpKind::Pow,
                    right,
                },
                Span::new(start, self.prev_end()),
            ));
        }
        Ok(left)
    }

    fn parse_postfix(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span.start;
        let mut value = self.parse_atom()?;
        loop {
            if self.eat_op("(") {
                let (args, keywords) = self.parse_call_args()?;
                self.expect_op(")")?;
                value = self.arena.alloc(
                    NodeKind::Call {
                        func: value,
                        args,
                        keywords,
                    },
                    Span::new(start, self.prev_end()),
                );
            } else if self.eat_op(".") {
                let attr = self.expect_plain_ident("attribute name")?;
                value = self.arena.alloc(
                    NodeKind::Attribute {
                        value,
                        attr,
                        ctx: NameCtx::Load,
                    },
                    Span::new(start, self.prev_end()),
                );
            } else if self.eat_op("[") {
                let index = self.parse_expr_or_tuple()?;
                self.expect_op("]")?;
                value = self.arena.alloc(
                    NodeKind::Subscript {
                        value,
                        index,
                        ctx: NameCtx::Load,
                    },
                    Span::new(start, self.prev_end()),
                );
            } else {
                return Ok(value);
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<(Vec<NodeId>, Vec<NodeId>), ParseError> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.at_op(")") {
            let start = self.peek().span.start;
            if self.peek_kind() == TokenKind::Ident
                && !KEYWORDS.contains(&self.peek_text())
                && self.next_is_op("=")
            {
                let arg = self.advance().text(self.text).to_string();
                self.advance();
                let value = self.parse_expr()?;
                keywords.push(self.arena.alloc(
                    NodeKind::Keyword { arg, value },
                    Span::new(start, self.prev_end()),
                ));
            } else {
                let value = self.parse_expr()?;
                if !keywords.is_empty() {
                    return self.error_at_span(
                        self.arena.node(value).span,
                        "positional argument follows keyword argument",
                    );
                }
                args.push(value);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn next_is_op(&self, op: &str) -> bool {
        matches!(self.tokens.get(self.pos + 1), Some(t) if matches!(t.kind, TokenKind::Op(o) if o == op))
    }

    fn parse_atom(&mut self) -> Result<NodeId, ParseError> {
        let tok = self.peek();
        let start = tok.span.start;
        match tok.kind {
            TokenKind::Ident => {
                let text = self.peek_text();
                match text {
                    "None" => {
                        self.advance();
                        Ok(self.arena.alloc(NodeKind::NoneLit, tok.span))
                    }
                    "True" | "False" => {
                        self.advance();
                        Ok(self.arena.alloc(
                            NodeKind::Bool {
                                value: text == "True",
                            },
                            tok.span,
                        ))
                    }
                    _ if KEYWORDS.contains(&text) => {
                        self.error(format!("unexpected keyword '{text}'"))
                    }
                    _ => {
                        let id = text.to_string();
                        self.advance();
                        Ok(self.arena.alloc(
                            NodeKind::Name {
                                id,
                                ctx: NameCtx::Load,
                            },
                            tok.span,
                        ))
                    }
                }
            }
            TokenKind::Int => {
                let text = self.peek_text();
                let value: i64 = text
                    .parse()
                    .map_err(|_| error_at(self.filename, self.text, start, "integer literal too large".into()))?;
                self.advance();
                Ok(self.arena.alloc(
                    NodeKind::Num {
                        value: Number::Int(value),
                    },
                    tok.span,
                ))
            }
            TokenKind::Float => {
                let text = self.peek_text();
                let value: f64 = text
                    .parse()
                    .map_err(|_| error_at(self.filename, self.text, start, "invalid float literal".into()))?;
                self.advance();
                Ok(self.arena.alloc(
                    NodeKind::Num {
                        value: Number::Float(value),
                    },
                    tok.span,
                ))
            }
            TokenKind::Str => {
                let value = decode_string(self.peek_text());
                self.advance();
                Ok(self.arena.alloc(NodeKind::Str { value }, tok.span))
            }
            TokenKind::Op("(") => self.parse_paren(start),
            TokenKind::Op("[") => self.parse_list(start),
            TokenKind::Unknown => self.error(format!(
                "unexpected character '{}'",
                tok.text(self.text)
            )),
            _ => self.error("expected expression"),
        }
    }

    fn parse_paren(&mut self, start: usize) -> Result<NodeId, ParseError> {
        self.expect_op("(")?;
        if self.eat_op(")") {
            return Ok(self.arena.alloc(
                NodeKind::Tuple {
                    elts: Vec::new(),
                    ctx: NameCtx::Load,
                },
                Span::new(start, self.prev_end()),
            ));
        }
        let inner = self.parse_expr_or_tuple()?;
        self.expect_op(")")?;
        // A parenthesized tuple owns its parens; plain grouping parens are
        // dropped and the inner node keeps its own span.
        if self.arena.node(inner).span.start > start
            && matches!(self.arena.node(inner).kind, NodeKind::Tuple { .. })
        {
            self.arena.node_mut(inner).span = Span::new(start, self.prev_end());
        }
        Ok(inner)
    }

    fn parse_list(&mut self, start: usize) -> Result<NodeId, ParseError> {
        self.expect_op("[")?;
        let mut elts = Vec::new();
        while !self.at_op("]") {
            elts.push(self.parse_expr()?);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("]")?;
        Ok(self.arena.alloc(
            NodeKind::List {
                elts,
                ctx: NameCtx::Load,
            },
            Span::new(start, self.prev_end()),
        ))
    }

    fn expect_plain_ident(&mut self, what: &str) -> Result<String, ParseError> {
        if self.peek_kind() == TokenKind::Ident && !KEYWORDS.contains(&self.peek_text()) {
            Ok(self.advance().text(self.text).to_string())
        } else {
            self.error(format!("expected {what}"))
        }
    }
}
