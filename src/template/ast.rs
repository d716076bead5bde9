//! Template AST.
//!
//! Every node carries a [`Span`] into the template source it was parsed from.
//! Passes mutate nodes in place; [`crate::template::codegen`] later re-prints
//! only the nodes whose text no longer matches their span.

use serde::{Deserialize, Serialize};

/// Byte range in the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span {
            start: start as u32,
            end: end as u32,
        }
    }

    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        source
            .get(self.start as usize..self.end as usize)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub body: Vec<Statement>,
    pub block_params: Vec<String>,
    pub span: Span,
}

/// Body of a block statement (`program` or `inverse`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub body: Vec<Statement>,
    pub block_params: Vec<String>,
    /// `{{else if ...}}` chains: the inverse holds a single nested block.
    pub chained: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Text(TextNode),
    Mustache(MustacheStatement),
    Block(BlockStatement),
    Element(ElementNode),
    Comment(CommentStatement),
    MustacheComment(MustacheCommentStatement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub chars: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentStatement {
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MustacheCommentStatement {
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MustacheStatement {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Hash,
    /// `{{{ }}}`
    pub trusting: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStatement {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Hash,
    pub program: Block,
    pub inverse: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementModifierStatement {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Hash,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    /// Tag name in the opening tag.
    pub tag_span: Span,
    /// Tag name in the closing tag, absent for void and self-closing elements.
    pub close_tag_span: Option<Span>,
    pub self_closing: bool,
    pub attributes: Vec<AttrNode>,
    pub modifiers: Vec<ElementModifierStatement>,
    pub comments: Vec<MustacheCommentStatement>,
    pub block_params: Vec<String>,
    pub children: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrNode {
    pub name: String,
    pub value: AttrValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// Static text; empty for valueless attributes such as `disabled`.
    Text(TextNode),
    Mustache(MustacheStatement),
    Concat(ConcatStatement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatStatement {
    pub parts: Vec<ConcatPart>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConcatPart {
    Text(TextNode),
    Mustache(MustacheStatement),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hash {
    pub pairs: Vec<HashPair>,
    pub span: Span,
}

impl Hash {
    pub fn get(&self, key: &str) -> Option<&Expression> {
        self.pairs.iter().find(|p| p.key == key).map(|p| &p.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashPair {
    pub key: String,
    pub value: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Path(PathExpression),
    SubExpression(SubExpression),
    Literal(Literal),
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::Path(p) => p.span,
            Expression::SubExpression(s) => s.span,
            Expression::Literal(l) => l.span,
        }
    }

    pub fn as_path(&self) -> Option<&PathExpression> {
        match self {
            Expression::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_string_literal(&self) -> Option<&str> {
        match self {
            Expression::Literal(Literal {
                kind: LiteralKind::String(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubExpression {
    pub path: Box<Expression>,
    pub params: Vec<Expression>,
    pub hash: Hash,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PathHead {
    This,
    /// `@name` argument reference; holds the name without `@`.
    AtName(String),
    Var(String),
}

/// `original` is the authoritative text; `head` and `tail` are always derived
/// from it through [`PathExpression::set_original`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathExpression {
    pub original: String,
    pub head: PathHead,
    pub tail: Vec<String>,
    pub span: Span,
}

impl PathExpression {
    pub fn new(original: &str, span: Span) -> Self {
        let (head, tail) = split_path(original);
        PathExpression {
            original: original.to_string(),
            head,
            tail,
            span,
        }
    }

    pub fn set_original(&mut self, original: String) {
        let (head, tail) = split_path(&original);
        self.head = head;
        self.tail = tail;
        self.original = original;
    }

    /// First dotted segment exactly as written (`this`, `@foo`, `foo`).
    pub fn head_text(&self) -> &str {
        self.original.split('.').next().unwrap_or("")
    }

    /// Dotted segments after the head.
    pub fn parts(&self) -> Vec<&str> {
        self.original.split('.').collect()
    }
}

fn split_path(original: &str) -> (PathHead, Vec<String>) {
    let mut segments = original.split('.');
    let first = segments.next().unwrap_or("");
    let tail = segments.map(str::to_string).collect();
    let head = if first == "this" {
        PathHead::This
    } else if let Some(name) = first.strip_prefix('@') {
        PathHead::AtName(name.to_string())
    } else {
        PathHead::Var(first.to_string())
    };
    (head, tail)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub kind: LiteralKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralKind {
    String(String),
    Boolean(bool),
    /// Source text of the number.
    Number(String),
    Null,
    Undefined,
}
