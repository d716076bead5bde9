use crate::visitor::NodePath;
use oxc_ast_visit::Visit;
use std::collections::BTreeSet;

/// Heads that never name an import, whatever is in scope.
const NEVER_CANDIDATES: &[&str] = &["this", "block"];

/// Names a loose-mode template resolves to framework built-ins before any
/// JS binding. Only an explicit strict-mode `scope` entry can override them.
const LOOSE_MODE_BUILTINS: &[&str] = &[
    "-element",
    "-get-dynamic-var",
    "-in-element",
    "-lf-get-outlet-state",
    "-with-dynamic-vars",
    "Input",
    "LinkTo",
    "Textarea",
    "action",
    "array",
    "component",
    "concat",
    "debugger",
    "each",
    "each-in",
    "fn",
    "get",
    "has-block",
    "has-block-params",
    "hasBlock",
    "hasBlockParams",
    "hash",
    "helper",
    "if",
    "in-element",
    "input",
    "let",
    "link-to",
    "loc",
    "log",
    "modifier",
    "mount",
    "mut",
    "on",
    "outlet",
    "partial",
    "query-params",
    "readonly",
    "textarea",
    "unbound",
    "unless",
    "with",
    "yield",
];

pub fn is_loose_mode_builtin(name: &str) -> bool {
    LOOSE_MODE_BUILTINS.contains(&name)
}

/// Whether the leading segment of a path may name an external binding.
///
/// `this`-rooted paths, `@arg` paths and the `block` keyword are filtered
/// here, before block-parameter scope is consulted.
pub fn is_candidate_head(head: &str) -> bool {
    !head.is_empty() && !head.starts_with('@') && !NEVER_CANDIDATES.contains(&head)
}

/// Whether `name` (only its first dotted segment matters) is declared as a
/// block parameter by any frame from `position` up to the root.
pub fn is_block_param(name: &str, position: &NodePath<'_>) -> bool {
    let head = name.split('.').next().unwrap_or(name);
    let found = position
        .ancestors()
        .any(|frame| frame.block_params.iter().any(|p| p == head));
    if found {
        tracing::trace!(name = head, "shadowed by block param");
    }
    found
}

/// `MyComponent` -> `my-component`, `HTMLInput` -> `h-t-m-l-input`.
///
/// A dash goes before every capital letter; a dot right before a capital is
/// dropped.
pub fn dasherize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.trim().chars() {
        if c.is_ascii_uppercase() && !out.is_empty() {
            if out.ends_with('.') {
                out.pop();
            }
            out.push('-');
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Every name bound anywhere in a host module: imports, declarations,
/// parameters, class and function ids.
///
/// Generated identifiers must avoid all of them, not only top-level ones,
/// since a nested binding would shadow the generated one inside its scope.
pub struct BindingCollector<'a> {
    pub symbols: &'a mut BTreeSet<String>,
}

impl<'a, 'b> Visit<'b> for BindingCollector<'a> {
    fn visit_binding_identifier(&mut self, ident: &oxc_ast::ast::BindingIdentifier<'b>) {
        self.symbols.insert(ident.name.to_string());
    }
}
