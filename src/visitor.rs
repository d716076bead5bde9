use crate::template::ast::{
    AttrValue, Block, BlockStatement, ConcatPart, ElementNode, Expression, Hash, PathExpression,
    Statement, Template, TextNode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Template,
    Block,
    BlockStatement,
    ElementNode,
    MustacheStatement,
    SubExpression,
    ElementModifierStatement,
    AttrNode,
}

/// Where an expression sits inside its invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Callee,
    Param(usize),
    HashValue,
}

/// `component`, `helper` and `modifier` take the real target as their first
/// positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKeyword {
    Component,
    Helper,
    Modifier,
}

impl InvocationKeyword {
    pub fn from_callee(callee: &Expression) -> Option<Self> {
        match callee.as_path()?.original.as_str() {
            "component" => Some(InvocationKeyword::Component),
            "helper" => Some(InvocationKeyword::Helper),
            "modifier" => Some(InvocationKeyword::Modifier),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationKeyword::Component => "component",
            InvocationKeyword::Helper => "helper",
            InvocationKeyword::Modifier => "modifier",
        }
    }
}

/// One frame of the ancestor chain, built on the stack during traversal.
///
/// Only frames whose block parameters are in scope for the visited subtree
/// carry them: an element's `as |x|` applies to its children, not to its own
/// tag or attributes, and a block statement's to its program body.
#[derive(Debug, Clone, Copy)]
pub struct NodePath<'a> {
    pub kind: NodeKind,
    pub block_params: &'a [String],
    /// Set on invocation frames whose callee is a keyword.
    pub keyword: Option<InvocationKeyword>,
    pub parent: Option<&'a NodePath<'a>>,
}

impl<'a> NodePath<'a> {
    pub fn root(block_params: &'a [String]) -> Self {
        NodePath {
            kind: NodeKind::Template,
            block_params,
            keyword: None,
            parent: None,
        }
    }

    pub fn child(&'a self, kind: NodeKind) -> NodePath<'a> {
        NodePath {
            kind,
            block_params: &[],
            keyword: None,
            parent: Some(self),
        }
    }

    pub fn scoped(&'a self, kind: NodeKind, block_params: &'a [String]) -> NodePath<'a> {
        NodePath {
            kind,
            block_params,
            keyword: None,
            parent: Some(self),
        }
    }

    /// This frame followed by every ancestor up to the root.
    pub fn ancestors(&'a self) -> impl Iterator<Item = &'a NodePath<'a>> {
        std::iter::successors(Some(self), |p| p.parent)
    }
}

/// Mutable view over the callee/params/hash triple shared by mustaches,
/// blocks, sub-expressions and modifiers.
pub struct Invocation<'n> {
    pub kind: NodeKind,
    pub path: &'n mut Expression,
    pub params: &'n mut Vec<Expression>,
    pub hash: &'n mut Hash,
}

/// Traversal over a template AST.
///
/// Implementers override `visit_*` methods and call the matching `walk_*`
/// function to continue into children. Every method receives the frame of
/// the enclosing node.
pub trait TemplateVisitor {
    fn visit_template(&mut self, template: &mut Template) {
        walk_template(self, template);
    }

    fn visit_statement(&mut self, statement: &mut Statement, parent: &NodePath<'_>) {
        walk_statement(self, statement, parent);
    }

    fn visit_element(&mut self, element: &mut ElementNode, parent: &NodePath<'_>) {
        walk_element(self, element, parent);
    }

    fn visit_block_statement(&mut self, block: &mut BlockStatement, parent: &NodePath<'_>) {
        walk_block_statement(self, block, parent);
    }

    fn visit_block(&mut self, block: &mut Block, parent: &NodePath<'_>) {
        walk_block(self, block, parent);
    }

    fn visit_invocation(&mut self, call: Invocation<'_>, parent: &NodePath<'_>) {
        walk_invocation(self, call, parent);
    }

    fn visit_expression(&mut self, expression: &mut Expression, role: Role, parent: &NodePath<'_>) {
        walk_expression(self, expression, role, parent);
    }

    fn visit_path_expression(
        &mut self,
        _path: &mut PathExpression,
        _role: Role,
        _parent: &NodePath<'_>,
    ) {
        // Leaf node
    }

    fn visit_text(&mut self, _text: &mut TextNode, _parent: &NodePath<'_>) {
        // Leaf node
    }
}

pub fn walk_template<V: TemplateVisitor + ?Sized>(visitor: &mut V, template: &mut Template) {
    let Template {
        body, block_params, ..
    } = template;
    let root = NodePath::root(block_params);
    for statement in body {
        visitor.visit_statement(statement, &root);
    }
}

pub fn walk_statement<V: TemplateVisitor + ?Sized>(
    visitor: &mut V,
    statement: &mut Statement,
    parent: &NodePath<'_>,
) {
    match statement {
        Statement::Text(t) => visitor.visit_text(t, parent),
        Statement::Mustache(m) => visitor.visit_invocation(
            Invocation {
                kind: NodeKind::MustacheStatement,
                path: &mut m.path,
                params: &mut m.params,
                hash: &mut m.hash,
            },
            parent,
        ),
        Statement::Block(b) => visitor.visit_block_statement(b, parent),
        Statement::Element(e) => visitor.visit_element(e, parent),
        Statement::Comment(_) | Statement::MustacheComment(_) => {}
    }
}

pub fn walk_element<V: TemplateVisitor + ?Sized>(
    visitor: &mut V,
    element: &mut ElementNode,
    parent: &NodePath<'_>,
) {
    let ElementNode {
        attributes,
        modifiers,
        block_params,
        children,
        ..
    } = element;

    let own = parent.child(NodeKind::ElementNode);
    for attr in attributes {
        let attr_frame = own.child(NodeKind::AttrNode);
        match &mut attr.value {
            AttrValue::Text(t) => visitor.visit_text(t, &attr_frame),
            AttrValue::Mustache(m) => visitor.visit_invocation(
                Invocation {
                    kind: NodeKind::MustacheStatement,
                    path: &mut m.path,
                    params: &mut m.params,
                    hash: &mut m.hash,
                },
                &attr_frame,
            ),
            AttrValue::Concat(concat) => {
                for part in &mut concat.parts {
                    match part {
                        ConcatPart::Text(t) => visitor.visit_text(t, &attr_frame),
                        ConcatPart::Mustache(m) => visitor.visit_invocation(
                            Invocation {
                                kind: NodeKind::MustacheStatement,
                                path: &mut m.path,
                                params: &mut m.params,
                                hash: &mut m.hash,
                            },
                            &attr_frame,
                        ),
                    }
                }
            }
        }
    }
    for modifier in modifiers {
        visitor.visit_invocation(
            Invocation {
                kind: NodeKind::ElementModifierStatement,
                path: &mut modifier.path,
                params: &mut modifier.params,
                hash: &mut modifier.hash,
            },
            &own,
        );
    }

    let body = parent.scoped(NodeKind::ElementNode, block_params);
    for child in children {
        visitor.visit_statement(child, &body);
    }
}

pub fn walk_block_statement<V: TemplateVisitor + ?Sized>(
    visitor: &mut V,
    block: &mut BlockStatement,
    parent: &NodePath<'_>,
) {
    let BlockStatement {
        path,
        params,
        hash,
        program,
        inverse,
        ..
    } = block;
    visitor.visit_invocation(
        Invocation {
            kind: NodeKind::BlockStatement,
            path,
            params,
            hash,
        },
        parent,
    );
    let own = parent.child(NodeKind::BlockStatement);
    visitor.visit_block(program, &own);
    if let Some(inverse) = inverse {
        visitor.visit_block(inverse, &own);
    }
}

pub fn walk_block<V: TemplateVisitor + ?Sized>(
    visitor: &mut V,
    block: &mut Block,
    parent: &NodePath<'_>,
) {
    let Block {
        body, block_params, ..
    } = block;
    let frame = parent.scoped(NodeKind::Block, block_params);
    for statement in body {
        visitor.visit_statement(statement, &frame);
    }
}

pub fn walk_invocation<V: TemplateVisitor + ?Sized>(
    visitor: &mut V,
    call: Invocation<'_>,
    parent: &NodePath<'_>,
) {
    let mut frame = parent.child(call.kind);
    frame.keyword = InvocationKeyword::from_callee(call.path);
    visitor.visit_expression(call.path, Role::Callee, &frame);
    for (i, param) in call.params.iter_mut().enumerate() {
        visitor.visit_expression(param, Role::Param(i), &frame);
    }
    for pair in &mut call.hash.pairs {
        visitor.visit_expression(&mut pair.value, Role::HashValue, &frame);
    }
}

pub fn walk_expression<V: TemplateVisitor + ?Sized>(
    visitor: &mut V,
    expression: &mut Expression,
    role: Role,
    parent: &NodePath<'_>,
) {
    match expression {
        Expression::Path(p) => visitor.visit_path_expression(p, role, parent),
        Expression::SubExpression(sub) => visitor.visit_invocation(
            Invocation {
                kind: NodeKind::SubExpression,
                path: &mut *sub.path,
                params: &mut sub.params,
                hash: &mut sub.hash,
            },
            parent,
        ),
        Expression::Literal(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parser::parse_template;

    #[derive(Default)]
    struct PathRecorder {
        seen: Vec<(String, Role, NodeKind, usize)>,
    }

    impl TemplateVisitor for PathRecorder {
        fn visit_path_expression(
            &mut self,
            path: &mut PathExpression,
            role: Role,
            parent: &NodePath<'_>,
        ) {
            let depth = parent.ancestors().count();
            self.seen
                .push((path.original.clone(), role, parent.kind, depth));
        }
    }

    #[test]
    fn test_walk_visits_paths_with_roles() {
        let mut t = parse_template("{{foo bar baz=qux}}<div class={{cls}}></div>").unwrap();
        let mut rec = PathRecorder::default();
        rec.visit_template(&mut t);
        let names: Vec<(&str, Role)> = rec.seen.iter().map(|s| (s.0.as_str(), s.1)).collect();
        assert_eq!(
            names,
            vec![
                ("foo", Role::Callee),
                ("bar", Role::Param(0)),
                ("qux", Role::HashValue),
                ("cls", Role::Callee),
            ]
        );
    }

    #[test]
    fn test_block_params_scoped_to_program() {
        let mut t = parse_template("{{#each list as |item|}}{{item}}{{/each}}").unwrap();

        struct Scopes(Vec<(String, Vec<String>)>);
        impl TemplateVisitor for Scopes {
            fn visit_path_expression(
                &mut self,
                path: &mut PathExpression,
                _role: Role,
                parent: &NodePath<'_>,
            ) {
                let visible = parent
                    .ancestors()
                    .flat_map(|p| p.block_params.iter().cloned())
                    .collect();
                self.0.push((path.original.clone(), visible));
            }
        }

        let mut scopes = Scopes(Vec::new());
        scopes.visit_template(&mut t);
        assert_eq!(scopes.0[0], ("each".to_string(), vec![]));
        assert_eq!(scopes.0[1], ("list".to_string(), vec![]));
        assert_eq!(scopes.0[2], ("item".to_string(), vec!["item".to_string()]));
    }

    #[test]
    fn test_keyword_frame() {
        let mut t = parse_template(r#"{{component "x-y"}}"#).unwrap();

        struct Keywords(Vec<Option<InvocationKeyword>>);
        impl TemplateVisitor for Keywords {
            fn visit_invocation(&mut self, call: Invocation<'_>, parent: &NodePath<'_>) {
                self.0.push(InvocationKeyword::from_callee(call.path));
                walk_invocation(self, call, parent);
            }
        }

        let mut k = Keywords(Vec::new());
        k.visit_template(&mut t);
        assert_eq!(k.0, vec![Some(InvocationKeyword::Component)]);
    }
}
