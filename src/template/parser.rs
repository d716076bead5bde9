//! Glimmer template parser.
//!
//! Produces the [`Template`] AST with byte spans for every node. Text and
//! whitespace are kept verbatim in the spans; the AST itself only stores what
//! the passes need.

use thiserror::Error;

use crate::template::ast::{
    AttrNode, AttrValue, Block, BlockStatement, CommentStatement, ConcatPart, ConcatStatement,
    ElementModifierStatement, ElementNode, Expression, Hash, HashPair, Literal, LiteralKind,
    MustacheCommentStatement, MustacheStatement, PathExpression, Span, Statement, SubExpression,
    Template, TextNode,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (offset {offset})")]
pub struct TemplateParseError {
    pub message: String,
    pub offset: u32,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link",
    "meta", "param", "source", "track", "wbr",
];

type CallParts = (Expression, Vec<Expression>, Hash);

pub fn parse_template(source: &str) -> Result<Template, TemplateParseError> {
    let mut parser = Parser::new(source);
    let body = parser.parse_content()?;
    if parser.pos < parser.bytes.len() {
        let found = if parser.at(b"</") {
            "unexpected closing tag"
        } else if parser.at_else() {
            "unexpected {{else}}"
        } else {
            "unexpected block close"
        };
        return Err(parser.error(found));
    }
    Ok(Template {
        body,
        block_params: Vec::new(),
        span: Span::new(0, source.len()),
    })
}

struct Parser<'s> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
}

fn is_path_byte(b: u8) -> bool {
    !b.is_ascii_whitespace()
        && !matches!(
            b,
            b'=' | b'(' | b')' | b'{' | b'}' | b'|' | b'"' | b'\'' | b'~' | b'<' | b'>'
        )
}

fn is_tag_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b':' || b == b'@'
}

fn is_tag_byte(b: u8) -> bool {
    !b.is_ascii_whitespace() && b != b'/' && b != b'>'
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Self {
        Parser {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> TemplateParseError {
        TemplateParseError {
            message: message.to_string(),
            offset: self.pos as u32,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn at(&self, s: &[u8]) -> bool {
        self.bytes[self.pos..].starts_with(s)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, s: &[u8], what: &str) -> Result<(), TemplateParseError> {
        if self.at(s) {
            self.pos += s.len();
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    fn find(&self, needle: &[u8], from: usize) -> Option<usize> {
        self.bytes[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| i + from)
    }

    /// Position of the first significant byte inside a `{{`, past `~` and spaces.
    fn mustache_inner(&self) -> usize {
        let mut i = self.pos + 2;
        if self.bytes.get(i) == Some(&b'~') {
            i += 1;
        }
        while matches!(self.bytes.get(i), Some(b) if b.is_ascii_whitespace()) {
            i += 1;
        }
        i
    }

    fn at_else(&self) -> bool {
        if !self.at(b"{{") {
            return false;
        }
        let i = self.mustache_inner();
        self.bytes[i..].starts_with(b"else")
            && matches!(self.bytes.get(i + 4), Some(b) if b.is_ascii_whitespace() || *b == b'~' || *b == b'}')
    }

    fn at_block_close(&self) -> bool {
        self.at(b"{{") && self.bytes.get(self.mustache_inner()) == Some(&b'/')
    }

    fn at_block_params(&self) -> bool {
        if !self.at(b"as") {
            return false;
        }
        let mut i = self.pos + 2;
        if !matches!(self.bytes.get(i), Some(b) if b.is_ascii_whitespace()) {
            return false;
        }
        while matches!(self.bytes.get(i), Some(b) if b.is_ascii_whitespace()) {
            i += 1;
        }
        self.bytes.get(i) == Some(&b'|')
    }

    // ───────────────────────────────────────────────────────────────────────
    // Content
    // ───────────────────────────────────────────────────────────────────────

    /// Parses statements until end of input, a closing tag, `{{else}}` or a
    /// block close. The caller decides whether the stop is legal.
    fn parse_content(&mut self) -> Result<Vec<Statement>, TemplateParseError> {
        let mut body = Vec::new();
        while self.pos < self.bytes.len() {
            if self.at(b"{{") {
                if self.at_block_close() || self.at_else() {
                    break;
                }
                body.push(self.parse_mustache_like()?);
            } else if self.at(b"</") {
                break;
            } else if self.at(b"<!--") {
                body.push(self.parse_html_comment()?);
            } else if self.at(b"<") && self.peek_at(1).map_or(false, is_tag_start) {
                body.push(Statement::Element(self.parse_element()?));
            } else {
                body.push(Statement::Text(self.parse_text()));
            }
        }
        Ok(body)
    }

    fn parse_text(&mut self) -> TextNode {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            if self.at(b"\\{{") {
                self.pos += 3;
                continue;
            }
            if self.at(b"{{") {
                break;
            }
            if self.at(b"</") || self.at(b"<!--") {
                break;
            }
            if self.at(b"<") && self.peek_at(1).map_or(false, is_tag_start) {
                break;
            }
            self.pos += 1;
        }
        // Guarantee progress on a stray `<`.
        if self.pos == start {
            self.pos += 1;
        }
        TextNode {
            chars: self.src[start..self.pos].to_string(),
            span: Span::new(start, self.pos),
        }
    }

    fn parse_html_comment(&mut self) -> Result<Statement, TemplateParseError> {
        let start = self.pos;
        let end = self
            .find(b"-->", start + 4)
            .ok_or_else(|| self.error("unterminated HTML comment"))?;
        self.pos = end + 3;
        Ok(Statement::Comment(CommentStatement {
            value: self.src[start + 4..end].to_string(),
            span: Span::new(start, self.pos),
        }))
    }

    fn parse_mustache_comment(&mut self) -> Result<MustacheCommentStatement, TemplateParseError> {
        let start = self.pos;
        let (value_start, value_end, end) = if self.at(b"{{!--") {
            let close = self
                .find(b"--}}", start + 5)
                .ok_or_else(|| self.error("unterminated {{!-- comment"))?;
            (start + 5, close, close + 4)
        } else {
            let close = self
                .find(b"}}", start + 3)
                .ok_or_else(|| self.error("unterminated {{! comment"))?;
            (start + 3, close, close + 2)
        };
        self.pos = end;
        Ok(MustacheCommentStatement {
            value: self.src[value_start..value_end].to_string(),
            span: Span::new(start, end),
        })
    }

    fn parse_mustache_like(&mut self) -> Result<Statement, TemplateParseError> {
        if self.at(b"{{!") {
            return Ok(Statement::MustacheComment(self.parse_mustache_comment()?));
        }
        let inner = self.mustache_inner();
        if !self.at(b"{{{") && self.bytes.get(inner) == Some(&b'#') {
            return Ok(Statement::Block(self.parse_block()?));
        }
        Ok(Statement::Mustache(self.parse_mustache()?))
    }

    fn expect_close(&mut self, trusting: bool) -> Result<(), TemplateParseError> {
        self.skip_ws();
        if self.peek() == Some(b'~') {
            self.pos += 1;
        }
        if trusting {
            self.expect(b"}}}", "'}}}'")
        } else {
            self.expect(b"}}", "'}}'")
        }
    }

    fn parse_mustache(&mut self) -> Result<MustacheStatement, TemplateParseError> {
        let start = self.pos;
        let trusting = self.at(b"{{{");
        self.pos += if trusting { 3 } else { 2 };
        if self.peek() == Some(b'~') {
            self.pos += 1;
        }
        let (path, params, hash) = self.parse_call_body()?;
        self.expect_close(trusting)?;
        Ok(MustacheStatement {
            path,
            params,
            hash,
            trusting,
            span: Span::new(start, self.pos),
        })
    }

    fn parse_block(&mut self) -> Result<BlockStatement, TemplateParseError> {
        let start = self.pos;
        self.pos = self.mustache_inner() + 1; // past '#'
        let (path, params, hash) = self.parse_call_body()?;
        self.skip_ws();
        let block_params = if self.at_block_params() {
            self.parse_block_params()?
        } else {
            Vec::new()
        };
        self.expect_close(false)?;

        let program_start = self.pos;
        let body = self.parse_content()?;
        let program = Block {
            body,
            block_params,
            chained: false,
            span: Span::new(program_start, self.pos),
        };
        let inverse = self.parse_inverse()?;
        self.parse_block_close(&path)?;

        Ok(BlockStatement {
            path,
            params,
            hash,
            program,
            inverse,
            span: Span::new(start, self.pos),
        })
    }

    fn parse_inverse(&mut self) -> Result<Option<Block>, TemplateParseError> {
        if !self.at_else() {
            return Ok(None);
        }
        let else_start = self.pos;
        self.pos = self.mustache_inner() + 4; // past "else"
        self.skip_ws();

        if self.peek() == Some(b'~') || self.peek() == Some(b'}') {
            self.expect_close(false)?;
            let inverse_start = self.pos;
            let body = self.parse_content()?;
            if self.at_else() {
                return Err(self.error("{{else}} after a plain {{else}}"));
            }
            return Ok(Some(Block {
                body,
                block_params: Vec::new(),
                chained: false,
                span: Span::new(inverse_start, self.pos),
            }));
        }

        // {{else if cond}} ... : a nested block sharing the outer close tag.
        let (path, params, hash) = self.parse_call_body()?;
        self.skip_ws();
        let block_params = if self.at_block_params() {
            self.parse_block_params()?
        } else {
            Vec::new()
        };
        self.expect_close(false)?;
        let program_start = self.pos;
        let body = self.parse_content()?;
        let program = Block {
            body,
            block_params,
            chained: false,
            span: Span::new(program_start, self.pos),
        };
        let inverse = self.parse_inverse()?;
        let nested = BlockStatement {
            path,
            params,
            hash,
            program,
            inverse,
            span: Span::new(else_start, self.pos),
        };
        Ok(Some(Block {
            body: vec![Statement::Block(nested)],
            block_params: Vec::new(),
            chained: true,
            span: Span::new(else_start, self.pos),
        }))
    }

    fn parse_block_close(&mut self, open: &Expression) -> Result<(), TemplateParseError> {
        if !self.at_block_close() {
            return Err(self.error("unclosed block"));
        }
        self.pos = self.mustache_inner() + 1; // past '/'
        self.skip_ws();
        let name_start = self.pos;
        while matches!(self.peek(), Some(b) if is_path_byte(b)) {
            self.pos += 1;
        }
        let name = &self.src[name_start..self.pos];
        if let Some(path) = open.as_path() {
            if path.original != name {
                return Err(TemplateParseError {
                    message: format!(
                        "{{{{/{}}}}} does not close {{{{#{}}}}}",
                        name, path.original
                    ),
                    offset: name_start as u32,
                });
            }
        }
        self.expect_close(false)
    }

    fn parse_block_params(&mut self) -> Result<Vec<String>, TemplateParseError> {
        self.pos += 2; // "as"
        self.skip_ws();
        self.expect(b"|", "'|'")?;
        let mut names = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'|') => {
                    self.pos += 1;
                    break;
                }
                Some(b) if is_path_byte(b) => {
                    let start = self.pos;
                    while matches!(self.peek(), Some(b) if is_path_byte(b)) {
                        self.pos += 1;
                    }
                    names.push(self.src[start..self.pos].to_string());
                }
                _ => return Err(self.error("unterminated block params")),
            }
        }
        Ok(names)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────────

    fn at_call_end(&self) -> bool {
        match self.peek() {
            None | Some(b'}') | Some(b')') => true,
            Some(b'~') => self.peek_at(1) == Some(b'}'),
            _ => self.at_block_params(),
        }
    }

    fn at_hash_key(&self) -> bool {
        let mut i = self.pos;
        while matches!(self.bytes.get(i), Some(b) if is_path_byte(*b)) {
            i += 1;
        }
        i > self.pos && self.bytes.get(i) == Some(&b'=')
    }

    fn parse_call_body(&mut self) -> Result<CallParts, TemplateParseError> {
        self.skip_ws();
        let path = self.parse_expression()?;
        let mut params = Vec::new();
        let mut pairs = Vec::new();
        loop {
            self.skip_ws();
            if self.at_call_end() {
                break;
            }
            if self.at_hash_key() {
                let start = self.pos;
                while self.peek() != Some(b'=') {
                    self.pos += 1;
                }
                let key = self.src[start..self.pos].to_string();
                self.pos += 1;
                let value = self.parse_expression()?;
                pairs.push(HashPair {
                    key,
                    value,
                    span: Span::new(start, self.pos),
                });
            } else {
                if !pairs.is_empty() {
                    return Err(self.error("positional argument after named argument"));
                }
                params.push(self.parse_expression()?);
            }
        }
        let hash_span = match (pairs.first(), pairs.last()) {
            (Some(first), Some(last)) => Span {
                start: first.span.start,
                end: last.span.end,
            },
            _ => Span::new(self.pos, self.pos),
        };
        Ok((
            path,
            params,
            Hash {
                pairs,
                span: hash_span,
            },
        ))
    }

    fn parse_expression(&mut self) -> Result<Expression, TemplateParseError> {
        let start = self.pos;
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let (path, params, hash) = self.parse_call_body()?;
                self.skip_ws();
                self.expect(b")", "')'")?;
                Ok(Expression::SubExpression(SubExpression {
                    path: Box::new(path),
                    params,
                    hash,
                    span: Span::new(start, self.pos),
                }))
            }
            Some(q @ (b'"' | b'\'')) => {
                let value = self.parse_string(q)?;
                Ok(Expression::Literal(Literal {
                    kind: LiteralKind::String(value),
                    span: Span::new(start, self.pos),
                }))
            }
            Some(b) if b.is_ascii_digit()
                || (b == b'-' && self.peek_at(1).map_or(false, |n| n.is_ascii_digit())) =>
            {
                self.pos += 1;
                while matches!(self.peek(), Some(b) if b.is_ascii_digit() || b == b'.') {
                    self.pos += 1;
                }
                Ok(Expression::Literal(Literal {
                    kind: LiteralKind::Number(self.src[start..self.pos].to_string()),
                    span: Span::new(start, self.pos),
                }))
            }
            Some(b) if is_path_byte(b) => {
                while matches!(self.peek(), Some(b) if is_path_byte(b)) {
                    self.pos += 1;
                }
                let word = &self.src[start..self.pos];
                let span = Span::new(start, self.pos);
                let kind = match word {
                    "true" => Some(LiteralKind::Boolean(true)),
                    "false" => Some(LiteralKind::Boolean(false)),
                    "null" => Some(LiteralKind::Null),
                    "undefined" => Some(LiteralKind::Undefined),
                    _ => None,
                };
                Ok(match kind {
                    Some(kind) => Expression::Literal(Literal { kind, span }),
                    None => Expression::Path(PathExpression::new(word, span)),
                })
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_string(&mut self, quote: u8) -> Result<String, TemplateParseError> {
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string literal")),
                Some(b'\\') if self.peek_at(1) == Some(quote) => {
                    value.push(quote as char);
                    self.pos += 2;
                }
                Some(b) if b == quote => {
                    self.pos += 1;
                    return Ok(value);
                }
                Some(_) => {
                    let ch = self.src[self.pos..].chars().next().unwrap_or('\u{FFFD}');
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Elements
    // ───────────────────────────────────────────────────────────────────────

    fn parse_element(&mut self) -> Result<ElementNode, TemplateParseError> {
        let start = self.pos;
        self.pos += 1;
        let tag_start = self.pos;
        while matches!(self.peek(), Some(b) if is_tag_byte(b)) {
            self.pos += 1;
        }
        let tag = self.src[tag_start..self.pos].to_string();
        let tag_span = Span::new(tag_start, self.pos);

        let mut attributes = Vec::new();
        let mut modifiers = Vec::new();
        let mut comments = Vec::new();
        let mut block_params = Vec::new();
        let self_closing;
        loop {
            self.skip_ws();
            if self.peek().is_none() {
                return Err(self.error(&format!("unterminated opening tag <{}>", tag)));
            }
            if self.at(b"/>") {
                self.pos += 2;
                self_closing = true;
                break;
            }
            if self.at(b">") {
                self.pos += 1;
                self_closing = false;
                break;
            }
            if self.at(b"{{!") {
                comments.push(self.parse_mustache_comment()?);
            } else if self.at(b"{{") {
                modifiers.push(self.parse_modifier()?);
            } else if self.at_block_params() {
                block_params = self.parse_block_params()?;
            } else {
                attributes.push(self.parse_attribute()?);
            }
        }

        let void = VOID_ELEMENTS.contains(&tag.as_str());
        if self_closing || void {
            return Ok(ElementNode {
                tag,
                tag_span,
                close_tag_span: None,
                self_closing,
                attributes,
                modifiers,
                comments,
                block_params,
                children: Vec::new(),
                span: Span::new(start, self.pos),
            });
        }

        let children = self.parse_content()?;
        if !self.at(b"</") {
            return Err(self.error(&format!("unclosed element <{}>", tag)));
        }
        self.pos += 2;
        let close_start = self.pos;
        while matches!(self.peek(), Some(b) if is_tag_byte(b)) {
            self.pos += 1;
        }
        let close_name = &self.src[close_start..self.pos];
        if close_name != tag {
            return Err(TemplateParseError {
                message: format!("</{}> does not close <{}>", close_name, tag),
                offset: close_start as u32,
            });
        }
        let close_tag_span = Span::new(close_start, self.pos);
        self.skip_ws();
        self.expect(b">", "'>'")?;

        Ok(ElementNode {
            tag,
            tag_span,
            close_tag_span: Some(close_tag_span),
            self_closing: false,
            attributes,
            modifiers,
            comments,
            block_params,
            children,
            span: Span::new(start, self.pos),
        })
    }

    fn parse_modifier(&mut self) -> Result<ElementModifierStatement, TemplateParseError> {
        let start = self.pos;
        self.pos += 2;
        if self.peek() == Some(b'~') {
            self.pos += 1;
        }
        let (path, params, hash) = self.parse_call_body()?;
        self.expect_close(false)?;
        Ok(ElementModifierStatement {
            path,
            params,
            hash,
            span: Span::new(start, self.pos),
        })
    }

    fn parse_attribute(&mut self) -> Result<AttrNode, TemplateParseError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || b == b'=' || b == b'>' || self.at(b"/>") {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected an attribute name"));
        }
        let name = self.src[start..self.pos].to_string();

        if self.peek() != Some(b'=') {
            return Ok(AttrNode {
                name,
                value: AttrValue::Text(TextNode {
                    chars: String::new(),
                    span: Span::new(self.pos, self.pos),
                }),
                span: Span::new(start, self.pos),
            });
        }
        self.pos += 1;

        let value = match self.peek() {
            Some(q @ (b'"' | b'\'')) => self.parse_quoted_attr_value(q)?,
            Some(b'{') if self.at(b"{{") => AttrValue::Mustache(self.parse_mustache()?),
            _ => {
                let value_start = self.pos;
                while let Some(b) = self.peek() {
                    if b.is_ascii_whitespace() || b == b'>' || self.at(b"/>") {
                        break;
                    }
                    self.pos += 1;
                }
                AttrValue::Text(TextNode {
                    chars: self.src[value_start..self.pos].to_string(),
                    span: Span::new(value_start, self.pos),
                })
            }
        };
        Ok(AttrNode {
            name,
            value,
            span: Span::new(start, self.pos),
        })
    }

    fn parse_quoted_attr_value(&mut self, quote: u8) -> Result<AttrValue, TemplateParseError> {
        let open = self.pos;
        self.pos += 1;
        let mut parts = Vec::new();
        let mut text_start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated attribute value")),
                Some(b) if b == quote => {
                    if self.pos > text_start {
                        parts.push(ConcatPart::Text(TextNode {
                            chars: self.src[text_start..self.pos].to_string(),
                            span: Span::new(text_start, self.pos),
                        }));
                    }
                    self.pos += 1;
                    break;
                }
                Some(b'{') if self.at(b"{{") => {
                    if self.pos > text_start {
                        parts.push(ConcatPart::Text(TextNode {
                            chars: self.src[text_start..self.pos].to_string(),
                            span: Span::new(text_start, self.pos),
                        }));
                    }
                    if self.at(b"{{!") {
                        self.parse_mustache_comment()?;
                    } else {
                        parts.push(ConcatPart::Mustache(self.parse_mustache()?));
                    }
                    text_start = self.pos;
                }
                Some(_) => self.pos += 1,
            }
        }

        let has_mustache = parts.iter().any(|p| matches!(p, ConcatPart::Mustache(_)));
        if !has_mustache {
            return Ok(AttrValue::Text(TextNode {
                chars: self.src[open + 1..self.pos - 1].to_string(),
                span: Span::new(open + 1, self.pos - 1),
            }));
        }
        Ok(AttrValue::Concat(ConcatStatement {
            parts,
            span: Span::new(open, self.pos),
        }))
    }
}
