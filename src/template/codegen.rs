//! Span-preserving template printer.
//!
//! Parsing keeps every path expression's `original` identical to its source
//! slice, so a path whose text differs from its span was rewritten by a pass.
//! Only those spans (and renamed element tags) are re-printed; everything else
//! is copied byte for byte.

use crate::edits::SourceEdits;
use crate::template::ast::{
    AttrValue, Block, ConcatPart, ElementNode, Expression, Hash, Statement, Template,
};

pub fn regenerate(source: &str, template: &Template) -> String {
    let mut edits = SourceEdits::new();
    collect_statements(&template.body, source, &mut edits);
    edits.apply(source)
}

/// Whether any node was rewritten since parsing.
pub fn is_modified(source: &str, template: &Template) -> bool {
    let mut edits = SourceEdits::new();
    collect_statements(&template.body, source, &mut edits);
    !edits.is_empty()
}

fn collect_statements(body: &[Statement], source: &str, edits: &mut SourceEdits) {
    for statement in body {
        match statement {
            Statement::Element(el) => collect_element(el, source, edits),
            Statement::Mustache(m) => collect_call(&m.path, &m.params, &m.hash, source, edits),
            Statement::Block(b) => {
                collect_call(&b.path, &b.params, &b.hash, source, edits);
                collect_block(&b.program, source, edits);
                if let Some(inverse) = &b.inverse {
                    collect_block(inverse, source, edits);
                }
            }
            Statement::Text(_) | Statement::Comment(_) | Statement::MustacheComment(_) => {}
        }
    }
}

fn collect_block(block: &Block, source: &str, edits: &mut SourceEdits) {
    collect_statements(&block.body, source, edits);
}

fn collect_element(el: &ElementNode, source: &str, edits: &mut SourceEdits) {
    if el.tag_span.text(source) != el.tag {
        edits.replace(el.tag_span.start, el.tag_span.end, el.tag.clone());
        if let Some(close) = el.close_tag_span {
            edits.replace(close.start, close.end, el.tag.clone());
        }
    }
    for attr in &el.attributes {
        match &attr.value {
            AttrValue::Text(_) => {}
            AttrValue::Mustache(m) => collect_call(&m.path, &m.params, &m.hash, source, edits),
            AttrValue::Concat(concat) => {
                for part in &concat.parts {
                    if let ConcatPart::Mustache(m) = part {
                        collect_call(&m.path, &m.params, &m.hash, source, edits);
                    }
                }
            }
        }
    }
    for modifier in &el.modifiers {
        collect_call(&modifier.path, &modifier.params, &modifier.hash, source, edits);
    }
    collect_statements(&el.children, source, edits);
}

fn collect_call(
    path: &Expression,
    params: &[Expression],
    hash: &Hash,
    source: &str,
    edits: &mut SourceEdits,
) {
    collect_expression(path, source, edits);
    for param in params {
        collect_expression(param, source, edits);
    }
    for pair in &hash.pairs {
        collect_expression(&pair.value, source, edits);
    }
}

fn collect_expression(expression: &Expression, source: &str, edits: &mut SourceEdits) {
    match expression {
        Expression::Path(p) => {
            if p.span.text(source) != p.original {
                edits.replace(p.span.start, p.span.end, p.original.clone());
            }
        }
        Expression::SubExpression(sub) => {
            collect_call(&sub.path, &sub.params, &sub.hash, source, edits)
        }
        Expression::Literal(_) => {}
    }
}
