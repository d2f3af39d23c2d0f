//! Recursive-descent parser over the lexer's token stream.
//!
//! Operator precedence, loosest first:
//!
//! ```text
//! inline-if < or < and < not < in < is < compare < ~ < + - < * / // % < ** < unary
//! ```
//!
//! Filters bind to the unary expression on their left, so `a + b | upper`
//! filters only `b`.
//!
//! The helpers marked `pub` form the surface available to
//! [`Extension::parse`](super::Extension::parse) hooks.

use super::ast::{BinaryOp, CompareOp, KeywordArg, Literal, Node, NodeKind, Param, Span, UnaryOp};
use super::environment::Environment;
use super::extension::ExtensionSite;
use super::lexer::{Token, TokenKind};
use super::ParseError;

type Args = (Vec<Node>, Vec<KeywordArg>);

pub struct Parser<'a> {
    template: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    env: &'a Environment,
    break_on: Vec<String>,
}

fn span_of(token: &Token) -> Span {
    Span {
        line: token.line,
        col: token.col,
    }
}

fn boxed(node: Node) -> Box<Node> {
    Box::new(node)
}

impl<'a> Parser<'a> {
    /// Create a parser over `tokens`, which must end with [`TokenKind::Eof`].
    #[must_use]
    pub fn new(template: &'a str, mut tokens: Vec<Token>, env: &'a Environment) -> Self {
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let (line, col) = tokens.last().map_or((1, 1), |t| (t.line, t.col));
            tokens.push(Token {
                kind: TokenKind::Eof,
                value: String::new(),
                line,
                col,
            });
        }
        Self {
            template,
            tokens,
            pos: 0,
            env,
            break_on: Vec::new(),
        }
    }

    /// Parse the whole token stream.
    ///
    /// # Errors
    ///
    /// Returns the first grammar violation found.
    pub fn parse_root(&mut self) -> Result<Vec<Node>, ParseError> {
        self.parse_nodes()
    }

    // ---- token helpers -------------------------------------------------

    /// The current token without consuming it.
    #[must_use]
    pub fn peek_token(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)]
    }

    /// Consume and return the current token. Stays on end of file.
    pub fn next_token(&mut self) -> Token {
        let token = self.peek_token().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    /// Build an error located at `token`.
    #[must_use]
    pub fn error_at(&self, message: impl Into<String>, token: &Token) -> ParseError {
        ParseError::new(self.template, message, Some(token.line), Some(token.col))
    }

    fn fail<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(self.error_at(message, self.peek_token()))
    }

    fn describe(token: &Token) -> String {
        match token.kind {
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::BlockEnd | TokenKind::VariableEnd => format!("end of tag '{}'", token.value),
            TokenKind::String => format!("string \"{}\"", token.value),
            _ => format!("'{}'", token.value),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.peek_token().kind == kind {
            Ok(self.next_token())
        } else {
            self.fail(format!("expected {what}, got {}", Self::describe(self.peek_token())))
        }
    }

    fn expect_symbol(&mut self, what: &str) -> Result<String, ParseError> {
        Ok(self.expect(TokenKind::Symbol, what)?.value)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.skip_symbol(keyword) {
            Ok(())
        } else {
            self.fail(format!("expected '{keyword}', got {}", Self::describe(self.peek_token())))
        }
    }

    fn skip(&mut self, kind: TokenKind) -> bool {
        if self.peek_token().kind == kind {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume the current token if it is the symbol `name`.
    pub fn skip_symbol(&mut self, name: &str) -> bool {
        if self.peek_token().is_symbol(name) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_operator(&mut self, op: &str) -> bool {
        if self.peek_token().is_operator(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume an optional tag name equal to `name`, then the block end.
    ///
    /// # Errors
    ///
    /// Fails if the next token does not close the block.
    pub fn advance_after_block_end(&mut self, name: &str) -> Result<(), ParseError> {
        self.skip_symbol(name);
        if self.skip(TokenKind::BlockEnd) {
            Ok(())
        } else {
            self.fail(format!(
                "expected end of block in '{name}' tag, got {}",
                Self::describe(self.peek_token())
            ))
        }
    }

    // ---- statements ----------------------------------------------------

    /// Parse nodes until one of the `names` block tags is reached.
    ///
    /// On return the parser sits on the tag-name symbol of the closing tag.
    ///
    /// # Errors
    ///
    /// Fails on end of file before any of `names` appears.
    pub fn parse_until_blocks(&mut self, names: &[&str]) -> Result<Vec<Node>, ParseError> {
        let saved =
            std::mem::replace(&mut self.break_on, names.iter().map(|s| (*s).to_string()).collect());
        let result = self.parse_nodes();
        self.break_on = saved;
        result
    }

    fn parse_nodes(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();

        loop {
            let token = self.peek_token().clone();
            match token.kind {
                TokenKind::Eof => {
                    if !self.break_on.is_empty() {
                        return self.fail(format!(
                            "unexpected end of file, expected {}",
                            self.break_on.join(" or ")
                        ));
                    }
                    return Ok(nodes);
                }
                TokenKind::Data | TokenKind::Raw => {
                    self.pos += 1;
                    nodes.push(Node::new(span_of(&token), NodeKind::TemplateData(token.value)));
                }
                TokenKind::VariableStart => {
                    self.pos += 1;
                    if self.peek_token().kind == TokenKind::VariableEnd {
                        return self.fail("expected expression in variable tag");
                    }
                    let expr = self.parse_expression()?;
                    self.expect(TokenKind::VariableEnd, "end of variable tag")?;
                    nodes.push(Node::new(span_of(&token), NodeKind::Output(vec![expr])));
                }
                TokenKind::BlockStart => {
                    self.pos += 1;
                    let name = self.peek_token();
                    if name.kind == TokenKind::Symbol && self.break_on.contains(&name.value) {
                        return Ok(nodes);
                    }
                    nodes.push(self.parse_statement()?);
                }
                _ => {
                    return self.fail(format!("unexpected {}", Self::describe(&token)));
                }
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let token = self.peek_token().clone();
        if token.kind != TokenKind::Symbol {
            return self.fail("tag name expected");
        }

        match token.value.as_str() {
            "if" | "ifAsync" => {
                self.pos += 1;
                self.parse_if_chain(span_of(&token), &token.value)
            }
            "for" | "asyncEach" | "asyncAll" => self.parse_for(),
            "set" => self.parse_set(),
            "block" => self.parse_block(),
            "macro" => self.parse_macro(),
            "call" => self.parse_call_block(),
            "filter" => self.parse_filter_block(),
            "extends" => self.parse_extends(),
            "include" => self.parse_include(),
            "import" => self.parse_import(),
            "from" => self.parse_from_import(),
            other => {
                let Some(descriptor) = self.env.extension_for_tag(other) else {
                    return Err(self.error_at(format!("unknown block tag: {other}"), &token));
                };
                let site = ExtensionSite {
                    name: descriptor.name.clone(),
                    handle: descriptor.handle,
                };
                let instance = descriptor.instance.clone();
                instance.parse(self, &site)
            }
        }
    }

    /// `if`/`elif` body after the keyword has been consumed.
    fn parse_if_chain(&mut self, span: Span, keyword: &str) -> Result<Node, ParseError> {
        let cond = self.parse_expression()?;
        self.advance_after_block_end(keyword)?;
        let body = self.parse_until_blocks(&["elif", "elseif", "else", "endif"])?;

        let branch = self.next_token();
        let else_body = match branch.value.as_str() {
            "elif" | "elseif" => vec![self.parse_if_chain(span_of(&branch), &branch.value)?],
            "else" => {
                self.advance_after_block_end("else")?;
                let body = self.parse_until_blocks(&["endif"])?;
                self.advance_after_block_end("endif")?;
                body
            }
            _ => {
                self.advance_after_block_end("endif")?;
                Vec::new()
            }
        };

        Ok(Node::new(
            span,
            NodeKind::If {
                cond: boxed(cond),
                body,
                else_body,
            },
        ))
    }

    fn parse_for(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let end_tag = match token.value.as_str() {
            "asyncEach" => "endeach",
            "asyncAll" => "endall",
            _ => "endfor",
        };

        let mut targets = vec![self.expect_symbol("loop variable")?];
        while self.skip(TokenKind::Comma) {
            targets.push(self.expect_symbol("loop variable")?);
        }
        self.expect_keyword("in")?;
        let iter = self.parse_expression()?;
        self.advance_after_block_end(&token.value)?;

        let body = self.parse_until_blocks(&[end_tag, "else"])?;
        let mut else_body = Vec::new();
        if self.skip_symbol("else") {
            self.advance_after_block_end("else")?;
            else_body = self.parse_until_blocks(&[end_tag])?;
        }
        self.advance_after_block_end(end_tag)?;

        Ok(Node::new(
            span_of(&token),
            NodeKind::For {
                targets,
                iter: boxed(iter),
                body,
                else_body,
            },
        ))
    }

    fn parse_set(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let mut targets = vec![self.expect_symbol("variable name")?];
        while self.skip(TokenKind::Comma) {
            targets.push(self.expect_symbol("variable name")?);
        }

        let value = if self.skip_operator("=") {
            let value = self.parse_expression()?;
            self.advance_after_block_end("set")?;
            value
        } else {
            self.advance_after_block_end("set")?;
            let body = self.parse_until_blocks(&["endset"])?;
            self.advance_after_block_end("endset")?;
            Node::new(span_of(&token), NodeKind::Capture(body))
        };

        Ok(Node::new(
            span_of(&token),
            NodeKind::Set {
                targets,
                value: boxed(value),
            },
        ))
    }

    fn parse_block(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let name = self.expect_symbol("block name")?;
        self.advance_after_block_end("block")?;
        let body = self.parse_until_blocks(&["endblock"])?;
        self.expect_keyword("endblock")?;
        self.skip_symbol(&name);
        self.expect(TokenKind::BlockEnd, "end of block in 'endblock' tag")?;

        Ok(Node::new(
            span_of(&token),
            NodeKind::Block {
                name,
                body,
            },
        ))
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect(TokenKind::LeftParen, "'(' to open parameter list")?;
        let mut params = Vec::new();
        while !self.skip(TokenKind::RightParen) {
            if !params.is_empty() {
                self.expect(TokenKind::Comma, "',' between parameters")?;
                if self.skip(TokenKind::RightParen) {
                    break;
                }
            }
            let name = self.expect_symbol("parameter name")?;
            let default =
                if self.skip_operator("=") { Some(self.parse_expression()?) } else { None };
            params.push(Param {
                name,
                default,
            });
        }
        Ok(params)
    }

    fn parse_macro(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let name = self.expect_symbol("macro name")?;
        let params = self.parse_params()?;
        self.advance_after_block_end("macro")?;
        let body = self.parse_until_blocks(&["endmacro"])?;
        self.advance_after_block_end("endmacro")?;

        Ok(Node::new(
            span_of(&token),
            NodeKind::Macro {
                name,
                params,
                body,
            },
        ))
    }

    fn parse_call_block(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let params = if self.peek_token().kind == TokenKind::LeftParen {
            self.parse_params()?
        } else {
            Vec::new()
        };
        let mut call = self.parse_expression()?;
        self.advance_after_block_end("call")?;
        let body = self.parse_until_blocks(&["endcall"])?;
        self.advance_after_block_end("endcall")?;

        let NodeKind::FunCall {
            kwargs,
            ..
        } = &mut call.kind
        else {
            return Err(self.error_at("expected a macro call in 'call' tag", &token));
        };
        kwargs.push(KeywordArg {
            name: "caller".to_string(),
            value: Node::new(
                span_of(&token),
                NodeKind::Caller {
                    params,
                    body,
                },
            ),
        });

        Ok(Node::new(span_of(&token), NodeKind::Output(vec![call])))
    }

    fn parse_filter_block(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let name_token = self.peek_token().clone();
        let name = self.parse_filter_name()?;
        let (args, kwargs) = if self.peek_token().kind == TokenKind::LeftParen {
            self.parse_call_args()?
        } else {
            (Vec::new(), Vec::new())
        };
        self.advance_after_block_end("filter")?;
        let body = self.parse_until_blocks(&["endfilter"])?;
        self.advance_after_block_end("endfilter")?;

        let filter = Node::new(
            span_of(&name_token),
            NodeKind::Filter {
                name,
                target: boxed(Node::new(span_of(&token), NodeKind::Capture(body))),
                args,
                kwargs,
            },
        );
        Ok(Node::new(span_of(&token), NodeKind::Output(vec![filter])))
    }

    fn parse_extends(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let template = self.parse_expression()?;
        self.advance_after_block_end("extends")?;
        Ok(Node::new(
            span_of(&token),
            NodeKind::Extends {
                template: boxed(template),
            },
        ))
    }

    fn parse_include(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let template = self.parse_expression()?;
        let ignore_missing = if self.skip_symbol("ignore") {
            self.expect_keyword("missing")?;
            true
        } else {
            false
        };
        self.advance_after_block_end("include")?;
        Ok(Node::new(
            span_of(&token),
            NodeKind::Include {
                template: boxed(template),
                ignore_missing,
            },
        ))
    }

    fn parse_with_context(&mut self) -> Result<Option<bool>, ParseError> {
        let with = if self.skip_symbol("with") {
            true
        } else if self.skip_symbol("without") {
            false
        } else {
            return Ok(None);
        };
        self.expect_keyword("context")?;
        Ok(Some(with))
    }

    fn parse_import(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let template = self.parse_expression()?;
        self.expect_keyword("as")?;
        let target = self.expect_symbol("import target")?;
        let with_context = self.parse_with_context()?.unwrap_or(false);
        self.advance_after_block_end("import")?;
        Ok(Node::new(
            span_of(&token),
            NodeKind::Import {
                template: boxed(template),
                target,
                with_context,
            },
        ))
    }

    fn parse_from_import(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let template = self.parse_expression()?;
        self.expect_keyword("import")?;

        let mut names = Vec::new();
        let with_context = loop {
            if let Some(with) = self.parse_with_context()? {
                break with;
            }
            if self.peek_token().kind == TokenKind::BlockEnd {
                if names.is_empty() {
                    return self.fail("expected at least one import name");
                }
                break false;
            }
            if !names.is_empty() {
                self.expect(TokenKind::Comma, "',' between import names")?;
            }
            let name = self.expect_symbol("import name")?;
            let alias =
                if self.skip_symbol("as") { Some(self.expect_symbol("import alias")?) } else { None };
            names.push((name, alias));
        };
        self.advance_after_block_end("from")?;

        Ok(Node::new(
            span_of(&token),
            NodeKind::FromImport {
                template: boxed(template),
                names,
                with_context,
            },
        ))
    }

    // ---- expressions ---------------------------------------------------

    /// Parse one full expression.
    ///
    /// # Errors
    ///
    /// Fails on any token that cannot start or continue an expression.
    pub fn parse_expression(&mut self) -> Result<Node, ParseError> {
        self.parse_inline_if()
    }

    /// Parse tag arguments, parenthesized or (when `tolerant`) bare up to the
    /// block end.
    ///
    /// # Errors
    ///
    /// Fails on malformed arguments, or on a missing `(` when not `tolerant`.
    pub fn parse_signature(&mut self, tolerant: bool) -> Result<Args, ParseError> {
        if self.peek_token().kind == TokenKind::LeftParen {
            return self.parse_call_args();
        }
        if !tolerant {
            return self.fail("expected '(' to open argument list");
        }

        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while self.peek_token().kind != TokenKind::BlockEnd {
            if !(args.is_empty() && kwargs.is_empty()) {
                self.expect(TokenKind::Comma, "',' between arguments")?;
            }
            self.parse_argument(&mut args, &mut kwargs)?;
        }
        Ok((args, kwargs))
    }

    fn parse_argument(
        &mut self,
        args: &mut Vec<Node>,
        kwargs: &mut Vec<KeywordArg>,
    ) -> Result<(), ParseError> {
        if self.peek_token().kind == TokenKind::Symbol && self.peek_at(1).is_operator("=") {
            let name = self.next_token().value;
            self.pos += 1;
            kwargs.push(KeywordArg {
                name,
                value: self.parse_expression()?,
            });
        } else {
            if !kwargs.is_empty() {
                return self.fail("positional argument follows keyword argument");
            }
            args.push(self.parse_expression()?);
        }
        Ok(())
    }

    fn parse_call_args(&mut self) -> Result<Args, ParseError> {
        self.expect(TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.skip(TokenKind::RightParen) {
            if !(args.is_empty() && kwargs.is_empty()) {
                self.expect(TokenKind::Comma, "',' between arguments")?;
                if self.skip(TokenKind::RightParen) {
                    break;
                }
            }
            self.parse_argument(&mut args, &mut kwargs)?;
        }
        Ok((args, kwargs))
    }

    fn parse_inline_if(&mut self) -> Result<Node, ParseError> {
        let body = self.parse_or()?;
        if !self.skip_symbol("if") {
            return Ok(body);
        }
        let cond = self.parse_or()?;
        let else_body = if self.skip_symbol("else") { Some(boxed(self.parse_or()?)) } else { None };
        Ok(Node::new(
            body.span,
            NodeKind::InlineIf {
                cond: boxed(cond),
                body: boxed(body),
                else_body,
            },
        ))
    }

    fn binary(op: BinaryOp, left: Node, right: Node) -> Node {
        Node::new(
            left.span,
            NodeKind::Binary {
                op,
                left: boxed(left),
                right: boxed(right),
            },
        )
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_and()?;
        while self.skip_symbol("or") {
            let right = self.parse_and()?;
            node = Self::binary(BinaryOp::Or, node, right);
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_not()?;
        while self.skip_symbol("and") {
            let right = self.parse_not()?;
            node = Self::binary(BinaryOp::And, node, right);
        }
        Ok(node)
    }

    fn parse_not(&mut self) -> Result<Node, ParseError> {
        let token = self.peek_token().clone();
        if self.skip_symbol("not") {
            let operand = self.parse_not()?;
            return Ok(Node::new(
                span_of(&token),
                NodeKind::Unary {
                    op: UnaryOp::Not,
                    operand: boxed(operand),
                },
            ));
        }
        self.parse_in()
    }

    fn parse_in(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_is()?;
        loop {
            if self.peek_token().is_symbol("not") && self.peek_at(1).is_symbol("in") {
                self.pos += 2;
                let right = self.parse_is()?;
                node = Self::binary(BinaryOp::NotIn, node, right);
            } else if self.skip_symbol("in") {
                let right = self.parse_is()?;
                node = Self::binary(BinaryOp::In, node, right);
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_is(&mut self) -> Result<Node, ParseError> {
        let node = self.parse_compare()?;
        if !self.skip_symbol("is") {
            return Ok(node);
        }
        let negated = self.skip_symbol("not");
        let test = self.expect_symbol("test name")?;
        let args = if self.peek_token().kind == TokenKind::LeftParen {
            self.parse_call_args()?.0
        } else {
            Vec::new()
        };
        Ok(Node::new(
            node.span,
            NodeKind::Is {
                target: boxed(node),
                test,
                args,
                negated,
            },
        ))
    }

    fn parse_compare(&mut self) -> Result<Node, ParseError> {
        let first = self.parse_concat()?;
        let mut rest = Vec::new();
        while let Some(op) = (self.peek_token().kind == TokenKind::Operator)
            .then(|| CompareOp::from_token(&self.peek_token().value))
            .flatten()
        {
            self.pos += 1;
            rest.push((op, self.parse_concat()?));
        }
        if rest.is_empty() {
            return Ok(first);
        }
        Ok(Node::new(
            first.span,
            NodeKind::Compare {
                first: boxed(first),
                rest,
            },
        ))
    }

    fn parse_concat(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_add()?;
        while self.skip_operator("~") {
            let right = self.parse_add()?;
            node = Self::binary(BinaryOp::Concat, node, right);
        }
        Ok(node)
    }

    fn parse_add(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_mul()?;
        loop {
            let op = if self.skip_operator("+") {
                BinaryOp::Add
            } else if self.skip_operator("-") {
                BinaryOp::Sub
            } else {
                return Ok(node);
            };
            let right = self.parse_mul()?;
            node = Self::binary(op, node, right);
        }
    }

    fn parse_mul(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_pow()?;
        loop {
            let op = if self.skip_operator("*") {
                BinaryOp::Mul
            } else if self.skip_operator("//") {
                BinaryOp::FloorDiv
            } else if self.skip_operator("/") {
                BinaryOp::Div
            } else if self.skip_operator("%") {
                BinaryOp::Mod
            } else {
                return Ok(node);
            };
            let right = self.parse_pow()?;
            node = Self::binary(op, node, right);
        }
    }

    fn parse_pow(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_unary()?;
        while self.skip_operator("**") {
            let right = self.parse_unary()?;
            node = Self::binary(BinaryOp::Pow, node, right);
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let token = self.peek_token().clone();
        let op = if self.skip_operator("-") {
            Some(UnaryOp::Neg)
        } else if self.skip_operator("+") {
            Some(UnaryOp::Pos)
        } else {
            None
        };

        let node = match op {
            Some(op) => Node::new(
                span_of(&token),
                NodeKind::Unary {
                    op,
                    operand: boxed(self.parse_unary()?),
                },
            ),
            None => self.parse_primary()?,
        };
        self.parse_filters(node)
    }

    fn parse_filter_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.expect_symbol("filter name")?;
        while self.skip_operator(".") {
            name.push('.');
            name.push_str(&self.expect_symbol("filter name")?);
        }
        Ok(name)
    }

    fn parse_filters(&mut self, mut node: Node) -> Result<Node, ParseError> {
        while self.skip(TokenKind::Pipe) {
            let name_token = self.peek_token().clone();
            let name = self.parse_filter_name()?;
            let (args, kwargs) = if self.peek_token().kind == TokenKind::LeftParen {
                self.parse_call_args()?
            } else {
                (Vec::new(), Vec::new())
            };
            node = Node::new(
                span_of(&name_token),
                NodeKind::Filter {
                    name,
                    target: boxed(node),
                    args,
                    kwargs,
                },
            );
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let token = self.next_token();
        let span = span_of(&token);

        let node = match token.kind {
            TokenKind::String => Node::new(span, NodeKind::Literal(Literal::Str(token.value))),
            TokenKind::Int => {
                let value = token.value.parse::<i64>().map_err(|_| {
                    self.error_at(format!("integer literal {} is out of range", token.value), &token)
                })?;
                Node::new(span, NodeKind::Literal(Literal::Int(value)))
            }
            TokenKind::Float => {
                let value = token.value.parse::<f64>().map_err(|_| {
                    self.error_at(format!("invalid float literal {}", token.value), &token)
                })?;
                Node::new(span, NodeKind::Literal(Literal::Float(value)))
            }
            TokenKind::Symbol => {
                let kind = match token.value.as_str() {
                    "true" | "True" => NodeKind::Literal(Literal::Bool(true)),
                    "false" | "False" => NodeKind::Literal(Literal::Bool(false)),
                    "none" | "None" | "null" => NodeKind::Literal(Literal::None),
                    _ => NodeKind::Symbol(token.value),
                };
                Node::new(span, kind)
            }
            TokenKind::LeftParen => self.parse_group(span)?,
            TokenKind::LeftBracket => {
                let mut items = Vec::new();
                while !self.skip(TokenKind::RightBracket) {
                    if !items.is_empty() {
                        self.expect(TokenKind::Comma, "',' between array items")?;
                        if self.skip(TokenKind::RightBracket) {
                            break;
                        }
                    }
                    items.push(self.parse_expression()?);
                }
                Node::new(span, NodeKind::Array(items))
            }
            TokenKind::LeftCurly => self.parse_dict(span)?,
            _ => {
                return Err(self.error_at(
                    format!("unexpected token: {}", Self::describe(&token)),
                    &token,
                ));
            }
        };

        self.parse_postfix(node)
    }

    fn parse_group(&mut self, span: Span) -> Result<Node, ParseError> {
        if self.skip(TokenKind::RightParen) {
            return Ok(Node::new(span, NodeKind::Array(Vec::new())));
        }
        let first = self.parse_expression()?;
        if self.skip(TokenKind::RightParen) {
            return Ok(Node::new(span, NodeKind::Group(boxed(first))));
        }

        let mut items = vec![first];
        while !self.skip(TokenKind::RightParen) {
            self.expect(TokenKind::Comma, "',' or ')'")?;
            if self.skip(TokenKind::RightParen) {
                break;
            }
            items.push(self.parse_expression()?);
        }
        Ok(Node::new(span, NodeKind::Array(items)))
    }

    fn parse_dict(&mut self, span: Span) -> Result<Node, ParseError> {
        let mut pairs = Vec::new();
        while !self.skip(TokenKind::RightCurly) {
            if !pairs.is_empty() {
                self.expect(TokenKind::Comma, "',' between dict entries")?;
                if self.skip(TokenKind::RightCurly) {
                    break;
                }
            }
            let mut key = self.parse_primary()?;
            if let NodeKind::Symbol(name) = &key.kind {
                key = Node::new(key.span, NodeKind::Literal(Literal::Str(name.clone())));
            }
            self.expect(TokenKind::Colon, "':' after dict key")?;
            let value = self.parse_expression()?;
            pairs.push((key, value));
        }
        Ok(Node::new(span, NodeKind::Dict(pairs)))
    }

    fn parse_postfix(&mut self, mut node: Node) -> Result<Node, ParseError> {
        loop {
            match self.peek_token().kind {
                TokenKind::LeftParen => {
                    let (args, kwargs) = self.parse_call_args()?;
                    node = Node::new(
                        node.span,
                        NodeKind::FunCall {
                            callee: boxed(node),
                            args,
                            kwargs,
                        },
                    );
                }
                TokenKind::LeftBracket => {
                    self.pos += 1;
                    let key = self.parse_expression()?;
                    self.expect(TokenKind::RightBracket, "']'")?;
                    node = Node::new(
                        node.span,
                        NodeKind::Lookup {
                            target: boxed(node),
                            key: boxed(key),
                        },
                    );
                }
                TokenKind::Operator if self.peek_token().value == "." => {
                    self.pos += 1;
                    let key_token = self.next_token();
                    if !matches!(key_token.kind, TokenKind::Symbol | TokenKind::Int) {
                        return Err(self.error_at(
                            format!("expected name after '.', got {}", Self::describe(&key_token)),
                            &key_token,
                        ));
                    }
                    let key = Node::new(
                        span_of(&key_token),
                        NodeKind::Literal(Literal::Str(key_token.value)),
                    );
                    node = Node::new(
                        node.span,
                        NodeKind::Lookup {
                            target: boxed(node),
                            key: boxed(key),
                        },
                    );
                }
                _ => return Ok(node),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::{ExtensionDescriptor, ExtensionRef};
    use crate::template::ast::NodeCategory;
    use crate::template::extension::Identity;
    use crate::template::{Template, TagExtension};
    use std::sync::Arc;

    fn parse(source: &str) -> Template {
        Environment::builder().build().parse("test.njk", source).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        Environment::builder().build().parse("test.njk", source).unwrap_err()
    }

    fn output_expr(tree: &Template) -> &Node {
        match &tree.body[0].kind {
            NodeKind::Output(nodes) => &nodes[0],
            other => panic!("expected output, got {other:?}"),
        }
    }

    #[test]
    fn test_add_chain_is_left_associated() {
        let tree = parse(r#"{{ "img/" + name + ".png" }}"#);
        let NodeKind::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } = &output_expr(&tree).kind
        else {
            panic!("expected add");
        };
        assert_eq!(left.category(), NodeCategory::Add);
        assert_eq!(right.kind, NodeKind::Literal(Literal::Str(".png".into())));
    }

    #[test]
    fn test_filters_bind_tighter_than_add() {
        let tree = parse("{{ a + b | upper }}");
        let NodeKind::Binary {
            right,
            ..
        } = &output_expr(&tree).kind
        else {
            panic!("expected binary");
        };
        assert!(matches!(&right.kind, NodeKind::Filter { name, .. } if name == "upper"));
    }

    #[test]
    fn test_inclusion_statements() {
        let tree = parse(
            r#"{% extends "base.njk" %}{% include "a.njk" ignore missing %}{% import "m.njk" as m %}{% from "f.njk" import x, y as z with context %}"#,
        );
        assert_eq!(tree.find_all(NodeCategory::Inclusion).len(), 4);
        assert!(matches!(&tree.body[1].kind, NodeKind::Include { ignore_missing: true, .. }));
        let NodeKind::FromImport {
            names,
            with_context,
            ..
        } = &tree.body[3].kind
        else {
            panic!("expected from-import");
        };
        assert_eq!(names, &vec![("x".to_string(), None), ("y".to_string(), Some("z".to_string()))]);
        assert!(*with_context);
    }

    #[test]
    fn test_if_elif_else() {
        let tree = parse("{% if a %}1{% elif b %}2{% else %}3{% endif %}");
        let NodeKind::If {
            else_body,
            ..
        } = &tree.body[0].kind
        else {
            panic!("expected if");
        };
        let NodeKind::If {
            else_body: inner_else,
            ..
        } = &else_body[0].kind
        else {
            panic!("expected nested if");
        };
        assert_eq!(inner_else[0].kind, NodeKind::TemplateData("3".into()));
    }

    #[test]
    fn test_for_with_two_targets_and_else() {
        let tree = parse("{% for k, v in items %}{{ k }}{% else %}none{% endfor %}");
        let NodeKind::For {
            targets,
            else_body,
            ..
        } = &tree.body[0].kind
        else {
            panic!("expected for");
        };
        assert_eq!(targets, &vec!["k".to_string(), "v".to_string()]);
        assert_eq!(else_body.len(), 1);
    }

    #[test]
    fn test_macro_call_block_and_filter_block() {
        let tree = parse(
            "{% macro m(a, b=2) %}{{ caller() }}{% endmacro %}{% call m(1) %}x{% endcall %}{% filter upper %}y{% endfilter %}",
        );
        assert!(matches!(&tree.body[0].kind, NodeKind::Macro { params, .. } if params.len() == 2));
        assert_eq!(tree.find_all(NodeCategory::FilterCall).len(), 1);
        let calls = tree.find_all(NodeCategory::FunctionCall);
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().any(|c| c.callee_name() == Some("m")));
    }

    #[test]
    fn test_set_block_form() {
        let tree = parse("{% set nav %}<a>{% endset %}");
        assert!(matches!(
            &tree.body[0].kind,
            NodeKind::Set { value, .. } if matches!(value.kind, NodeKind::Capture(_))
        ));
    }

    #[test]
    fn test_lookups_calls_and_literals() {
        let tree = parse(r#"{{ user.name[0](1, key="v") if ok else none }}"#);
        let NodeKind::InlineIf {
            body,
            else_body,
            ..
        } = &output_expr(&tree).kind
        else {
            panic!("expected inline if");
        };
        assert!(matches!(&body.kind, NodeKind::FunCall { kwargs, .. } if kwargs[0].name == "key"));
        assert_eq!(else_body.as_ref().unwrap().kind, NodeKind::Literal(Literal::None));
    }

    #[test]
    fn test_unknown_tag_is_error_with_location() {
        let err = parse_err("line one\n{% shout 'x' %}");
        assert_eq!(err.message, "unknown block tag: shout");
        assert_eq!(err.line, Some(2));
        assert_eq!(err.template, "test.njk");
    }

    #[test]
    fn test_unclosed_block_is_error() {
        let err = parse_err("{% if a %}never closed");
        assert!(err.message.contains("endif"), "{}", err.message);
    }

    #[test]
    fn test_extension_tag_with_body() {
        let ext = ExtensionDescriptor::new(
            "highlight",
            "addons/highlight.toml",
            Arc::new(TagExtension::new("highlight").with_body(true)),
        );
        let handle = ext.handle;
        let env = Environment::builder().extension(ext).build();
        let tree =
            env.parse("t", r#"{% highlight "rust", lines=true %}fn main() {}{% endhighlight %}"#).unwrap();

        let NodeKind::CallExtension {
            ext,
            args,
            kwargs,
            bodies,
            ..
        } = &tree.body[0].kind
        else {
            panic!("expected extension call");
        };
        assert_eq!(ext, &ExtensionRef::ByName("highlight".into()));
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].name, "lines");
        assert_eq!(bodies[0].len(), 1);

        let by_instance = ExtensionDescriptor::new(
            "hl",
            "x",
            Arc::new(TagExtension::new("hl").with_identity(Identity::Instance)),
        );
        let instance_handle = by_instance.handle;
        let env = Environment::builder().extension(by_instance).build();
        let tree = env.parse("t", "{% hl %}").unwrap();
        assert!(matches!(
            &tree.body[0].kind,
            NodeKind::CallExtension { ext: ExtensionRef::ByInstance(h), .. } if *h == instance_handle
        ));
        assert_ne!(handle, instance_handle);
    }
}
