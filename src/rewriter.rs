use crate::program::BindingTable;
use crate::scope::{dasherize, is_block_param, is_candidate_head, is_loose_mode_builtin};
use crate::template::ast::{ElementNode, Expression, LiteralKind, PathExpression, PathHead};
use crate::visitor::{
    walk_element, walk_invocation, Invocation, InvocationKeyword, NodePath, Role, TemplateVisitor,
};
use std::collections::BTreeSet;

/// Keyword target that is neither a static name nor a dynamic expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordArgumentIssue {
    pub keyword: &'static str,
    /// Byte offset into the template.
    pub offset: u32,
}

/// Redirects references to imported bindings through the indirection
/// variable.
///
/// Every rewritten name lands in `used`. Names are only ever taken from
/// `bindings`, so `used` stays a subset of it.
pub struct ReferenceRewriter<'c> {
    bindings: &'c BindingTable,
    /// Strict-mode scope keys; `None` makes every binding a candidate.
    locals: Option<&'c BTreeSet<String>>,
    var: &'c str,
    used: &'c mut BTreeSet<String>,
    /// Nodes rewritten by this visitor.
    pub rewrites: usize,
    pub issues: Vec<KeywordArgumentIssue>,
}

impl<'c> ReferenceRewriter<'c> {
    pub fn new(
        bindings: &'c BindingTable,
        locals: Option<&'c BTreeSet<String>>,
        var: &'c str,
        used: &'c mut BTreeSet<String>,
    ) -> Self {
        ReferenceRewriter {
            bindings,
            locals,
            var,
            used,
            rewrites: 0,
            issues: Vec::new(),
        }
    }

    /// Strict templates see exactly their scope keys; loose ones see every
    /// import except names the framework resolves first.
    fn is_bound(&self, name: &str) -> bool {
        if !self.bindings.contains_key(name) {
            return false;
        }
        match self.locals {
            Some(locals) => locals.contains(name),
            None => !is_loose_mode_builtin(name),
        }
    }

    fn record(&mut self, name: &str) {
        self.rewrites += 1;
        if self.used.insert(name.to_string()) {
            tracing::debug!(binding = %name, var = %self.var, "rewrote reference");
        }
    }

    /// Binding targeted by a keyword's string argument: exact local name
    /// first, then a local whose dasherized form matches.
    fn keyword_string_target(&self, target: &str) -> Option<String> {
        if self.locals.is_none() && is_loose_mode_builtin(target) {
            return None;
        }
        if self.is_bound(target) {
            return Some(target.to_string());
        }
        self.bindings
            .keys()
            .find(|local| dasherize(local) == target && self.is_bound(local))
            .cloned()
    }

    /// `{{component "x"}}`, `(helper x)`, `{{modifier "x"}}`: the first
    /// positional argument names the real target.
    fn rewrite_keyword_target(
        &mut self,
        keyword: InvocationKeyword,
        params: &mut [Expression],
        frame: &NodePath<'_>,
    ) {
        let Some(first) = params.first_mut() else {
            return;
        };
        match first {
            Expression::Literal(lit) => {
                let span = lit.span;
                let target = match &lit.kind {
                    LiteralKind::String(target) => target.clone(),
                    _ => {
                        self.issues.push(KeywordArgumentIssue {
                            keyword: keyword.as_str(),
                            offset: span.start,
                        });
                        return;
                    }
                };
                if target.contains('.') || target.is_empty() || is_block_param(&target, frame) {
                    return;
                }
                let Some(local) = self.keyword_string_target(&target) else {
                    return;
                };
                *first = Expression::Path(PathExpression::new(
                    &format!("{}.{}", self.var, local),
                    span,
                ));
                self.record(&local);
            }
            Expression::Path(path) => {
                let PathHead::Var(head) = &path.head else {
                    return;
                };
                if !path.tail.is_empty() || is_block_param(head, frame) {
                    return;
                }
                let name = head.clone();
                if self.is_bound(&name) {
                    path.set_original(format!("{}.{}", self.var, name));
                    self.record(&name);
                }
            }
            // Computed target; resolved at runtime.
            Expression::SubExpression(_) => {}
        }
    }
}

/// Keyword of the invocation `frame` belongs to, unless a block parameter
/// shadows the keyword itself.
fn active_keyword(frame: &NodePath<'_>) -> Option<InvocationKeyword> {
    frame
        .keyword
        .filter(|k| !is_block_param(k.as_str(), frame))
}

impl TemplateVisitor for ReferenceRewriter<'_> {
    fn visit_invocation(&mut self, call: Invocation<'_>, parent: &NodePath<'_>) {
        if let Some(keyword) = InvocationKeyword::from_callee(call.path) {
            if !is_block_param(keyword.as_str(), parent) {
                self.rewrite_keyword_target(keyword, call.params.as_mut_slice(), parent);
            }
        }
        walk_invocation(self, call, parent);
    }

    fn visit_path_expression(
        &mut self,
        path: &mut PathExpression,
        role: Role,
        parent: &NodePath<'_>,
    ) {
        if active_keyword(parent).is_some() && matches!(role, Role::Callee | Role::Param(0)) {
            return;
        }
        let head = path.head_text();
        if !is_candidate_head(head) || is_block_param(head, parent) || !self.is_bound(head) {
            return;
        }
        let head = head.to_string();
        path.set_original(format!("{}.{}", self.var, path.original));
        self.record(&head);
    }

    fn visit_element(&mut self, element: &mut ElementNode, parent: &NodePath<'_>) {
        let head = element.tag.split('.').next().unwrap_or("");
        if is_candidate_head(head)
            && !head.starts_with(':')
            && !is_block_param(head, parent)
            && self.is_bound(head)
        {
            let head = head.to_string();
            element.tag = format!("{}.{}", self.var, element.tag);
            self.record(&head);
        }
        walk_element(self, element, parent);
    }
}
