//! Pre-pass over the host module.
//!
//! Parses the JS/TS module once with `oxc` and records everything later
//! passes need as owned data: import bindings, an existing indirection
//! variable, insertion offsets and the template call sites. The allocator is
//! dropped before any template is touched.

use crate::config::{HmrConfig, ImportRef};
use crate::scope::BindingCollector;
use crate::validate::HmrError;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, BindingPattern, CallExpression, Expression, ImportDeclarationSpecifier,
    ModuleExportName, ObjectExpression, ObjectPropertyKind, Program, PropertyKey, Statement,
    VariableDeclarationKind,
};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use std::collections::{BTreeMap, BTreeSet};

// ═══════════════════════════════════════════════════════════════════════════════
// BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportedName {
    Default,
    Named(String),
    Namespace,
}

/// One import declaration specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub local: String,
    pub source: String,
    pub imported: ImportedName,
}

impl Binding {
    /// Expression reading this binding's value off a freshly loaded module
    /// object named `module`.
    pub fn accessor(&self, module: &str) -> String {
        match &self.imported {
            ImportedName::Default => format!("{}.default", module),
            ImportedName::Namespace => module.to_string(),
            ImportedName::Named(name) if is_identifier_name(name) => {
                format!("{}.{}", module, name)
            }
            ImportedName::Named(name) => format!(
                "{}[{}]",
                module,
                serde_json::to_string(name).unwrap_or_else(|_| format!("\"{}\"", name))
            ),
        }
    }

    /// Whether this binding is `import`. An export named `default` matches
    /// default imports.
    pub fn is(&self, import: &ImportRef) -> bool {
        if self.source != import.source {
            return false;
        }
        match &self.imported {
            ImportedName::Default => import.export == "default",
            ImportedName::Named(name) => *name == import.export,
            ImportedName::Namespace => false,
        }
    }

    /// Export name on the source module; `None` for namespace imports.
    pub fn export_name(&self) -> Option<&str> {
        match &self.imported {
            ImportedName::Default => Some("default"),
            ImportedName::Named(name) => Some(name),
            ImportedName::Namespace => None,
        }
    }
}

/// Local name -> binding, frozen once the pre-pass finishes.
pub type BindingTable = BTreeMap<String, Binding>;

fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNIQUE IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Hands out identifiers that collide with nothing bound in the module.
#[derive(Debug, Clone, Default)]
pub struct UniqueNames {
    taken: BTreeSet<String>,
    counter: u32,
}

impl UniqueNames {
    pub fn new(taken: BTreeSet<String>) -> Self {
        UniqueNames { taken, counter: 0 }
    }

    /// `hint` itself when free, otherwise `hint` with the next counter value.
    pub fn bind(&mut self, hint: &str) -> String {
        let mut candidate = hint.to_string();
        while self.taken.contains(&candidate) {
            self.counter += 1;
            candidate = format!("{}{}", hint, self.counter);
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE CALL SITES
// ═══════════════════════════════════════════════════════════════════════════════

/// How the options argument of a template call exposes JS scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeShape {
    /// `{ scope: () => ({ A, B }) }`. New keys go at `insert_at`.
    Object {
        keys: BTreeSet<String>,
        insert_at: u32,
        empty: bool,
    },
    /// Options object without a `scope` property.
    Missing { insert_at: u32, empty: bool },
    /// No options argument; `insert_at` is the end of the template argument.
    NoOptions { insert_at: u32 },
    /// `{ eval() { return eval(arguments[0]) } }`: the whole module scope is
    /// visible already.
    Eval,
    Unsupported,
}

impl ScopeShape {
    /// Names the template may reference, or `None` when every import is
    /// reachable.
    pub fn locals(&self) -> Option<&BTreeSet<String>> {
        match self {
            ScopeShape::Object { keys, .. } => Some(keys),
            _ => None,
        }
    }

    /// Source insertion that puts `var` into the template's scope. `None`
    /// when nothing needs inserting.
    pub fn injection(&self, var: &str) -> Option<(u32, String)> {
        match self {
            ScopeShape::Object { keys, .. } if keys.contains(var) => None,
            ScopeShape::Object {
                insert_at, empty, ..
            } => Some(if *empty {
                (*insert_at, format!(" {} ", var))
            } else {
                (*insert_at, format!(", {}", var))
            }),
            ScopeShape::Missing { insert_at, empty } => Some(if *empty {
                (*insert_at, format!(" scope: () => ({{ {} }}) ", var))
            } else {
                (*insert_at, format!(", scope: () => ({{ {} }})", var))
            }),
            ScopeShape::NoOptions { insert_at } => {
                Some((*insert_at, format!(", {{ scope: () => ({{ {} }}) }}", var)))
            }
            ScopeShape::Eval | ScopeShape::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSite {
    /// Template text with JS escapes resolved.
    pub text: String,
    /// Span of the whole string/template literal argument in the host.
    pub literal_start: u32,
    pub literal_end: u32,
    pub scope: ScopeShape,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A top-level `let <name> = null;` the indirection object can reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingVar {
    pub name: String,
    pub decl_end: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ProgramFacts {
    pub bindings: BindingTable,
    pub indirection_var: Option<ExistingVar>,
    pub last_import_end: Option<u32>,
    /// End of the hashbang and directive prologue.
    pub prologue_end: u32,
    pub templates: Vec<TemplateSite>,
    /// Existing local for the reactive decorator import.
    pub reactive_local: Option<String>,
    /// Existing local for the component base class import.
    pub component_base_local: Option<String>,
    pub taken_names: BTreeSet<String>,
}

impl ProgramFacts {
    pub fn binding(&self, local: &str) -> Option<&Binding> {
        self.bindings.get(local)
    }
}

pub fn source_type_for(path: &str) -> SourceType {
    let ts = path.ends_with(".ts") || path.ends_with(".gts") || path.ends_with(".mts");
    SourceType::default()
        .with_module(true)
        .with_typescript(ts)
}

pub fn scan_program(path: &str, source: &str, config: &HmrConfig) -> Result<ProgramFacts, HmrError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type_for(path)).parse();
    if ret.panicked || !ret.errors.is_empty() {
        let message = ret
            .errors
            .first()
            .map(|e| format!("{:?}", e))
            .unwrap_or_else(|| "parser panicked".to_string());
        return Err(HmrError::ProgramParse {
            file: path.to_string(),
            message,
        });
    }
    let program = ret.program;

    let mut facts = ProgramFacts::default();
    collect_top_level(&program, config, &mut facts);

    BindingCollector {
        symbols: &mut facts.taken_names,
    }
    .visit_program(&program);

    let callees: BTreeSet<String> = facts
        .bindings
        .values()
        .filter(|b| config.template_callees.iter().any(|c| b.is(c)))
        .map(|b| b.local.clone())
        .collect();
    if !callees.is_empty() {
        let mut finder = TemplateCallFinder {
            callees: &callees,
            sites: Vec::new(),
        };
        finder.visit_program(&program);
        facts.templates = finder.sites;
    }

    tracing::debug!(
        file = %path,
        bindings = facts.bindings.len(),
        templates = facts.templates.len(),
        "scanned host module"
    );
    Ok(facts)
}

fn collect_top_level(program: &Program<'_>, config: &HmrConfig, facts: &mut ProgramFacts) {
    let mut prologue_end = program.hashbang.as_ref().map_or(0, |h| h.span.end);
    if let Some(last) = program.directives.last() {
        prologue_end = prologue_end.max(last.span.end);
    }
    facts.prologue_end = prologue_end;

    for stmt in &program.body {
        match stmt {
            Statement::ImportDeclaration(import_decl) => {
                facts.last_import_end = Some(import_decl.span.end);
                if import_decl.import_kind.is_type() {
                    continue;
                }
                let source = import_decl.source.value.to_string();
                let Some(specifiers) = &import_decl.specifiers else {
                    continue;
                };
                for specifier in specifiers {
                    let (local, imported) = match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            if s.import_kind.is_type() {
                                continue;
                            }
                            let imported = match &s.imported {
                                ModuleExportName::IdentifierName(id) => id.name.to_string(),
                                ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
                                _ => continue,
                            };
                            if imported == "default" {
                                (s.local.name.to_string(), ImportedName::Default)
                            } else {
                                (s.local.name.to_string(), ImportedName::Named(imported))
                            }
                        }
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            (s.local.name.to_string(), ImportedName::Default)
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            (s.local.name.to_string(), ImportedName::Namespace)
                        }
                    };
                    let binding = Binding {
                        local: local.clone(),
                        source: source.clone(),
                        imported,
                    };
                    if facts.reactive_local.is_none() && binding.is(&config.reactive_decorator) {
                        facts.reactive_local = Some(local.clone());
                    }
                    if facts.component_base_local.is_none() && binding.is(&config.component_base) {
                        facts.component_base_local = Some(local.clone());
                    }
                    facts.bindings.insert(local, binding);
                }
            }
            Statement::VariableDeclaration(var_decl)
                if facts.indirection_var.is_none()
                    && var_decl.kind != VariableDeclarationKind::Const =>
            {
                for decl in &var_decl.declarations {
                    if let BindingPattern::BindingIdentifier(id) = &decl.id {
                        if id.name == config.indirection_var_hint.as_str()
                            && matches!(&decl.init, Some(Expression::NullLiteral(_)))
                        {
                            facts.indirection_var = Some(ExistingVar {
                                name: id.name.to_string(),
                                decl_end: var_decl.span.end,
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

struct TemplateCallFinder<'c> {
    callees: &'c BTreeSet<String>,
    sites: Vec<TemplateSite>,
}

impl<'a, 'c> Visit<'a> for TemplateCallFinder<'c> {
    fn visit_call_expression(&mut self, expr: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &expr.callee {
            if self.callees.contains(ident.name.as_str()) {
                if let Some(site) = template_site(expr) {
                    self.sites.push(site);
                }
            }
        }
        oxc_ast_visit::walk::walk_call_expression(self, expr);
    }
}

fn template_site(call: &CallExpression<'_>) -> Option<TemplateSite> {
    let first = call.arguments.first()?;
    let text = match first {
        Argument::StringLiteral(lit) => lit.value.to_string(),
        Argument::TemplateLiteral(tpl) if tpl.expressions.is_empty() => {
            let quasi = tpl.quasis.first()?;
            quasi
                .value
                .cooked
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| quasi.value.raw.to_string())
        }
        _ => return None,
    };
    let span = first.span();

    let scope = match call.arguments.get(1) {
        None => ScopeShape::NoOptions { insert_at: span.end },
        Some(Argument::ObjectExpression(options)) => options_scope(options),
        Some(_) => ScopeShape::Unsupported,
    };

    Some(TemplateSite {
        text,
        literal_start: span.start,
        literal_end: span.end,
        scope,
    })
}

fn property_name(key: &PropertyKey<'_>) -> Option<String> {
    match key {
        PropertyKey::StaticIdentifier(id) => Some(id.name.to_string()),
        PropertyKey::StringLiteral(lit) => Some(lit.value.to_string()),
        _ => None,
    }
}

/// Where new keys go in an object literal, and whether it has none yet.
fn object_insertion(object: &ObjectExpression<'_>) -> (u32, bool) {
    match object.properties.last() {
        Some(last) => (last.span().end, false),
        None => (object.span.start + 1, true),
    }
}

fn options_scope(options: &ObjectExpression<'_>) -> ScopeShape {
    let mut scope_value = None;
    for property in &options.properties {
        match property {
            ObjectPropertyKind::ObjectProperty(p) => match property_name(&p.key).as_deref() {
                Some("scope") => scope_value = Some(&p.value),
                Some("eval") => return ScopeShape::Eval,
                _ => {}
            },
            ObjectPropertyKind::SpreadProperty(_) => return ScopeShape::Unsupported,
        }
    }

    let Some(value) = scope_value else {
        let (insert_at, empty) = object_insertion(options);
        return ScopeShape::Missing { insert_at, empty };
    };

    let Expression::ArrowFunctionExpression(arrow) = value else {
        return ScopeShape::Unsupported;
    };
    if !arrow.expression {
        return ScopeShape::Unsupported;
    }
    let Some(Statement::ExpressionStatement(body)) = arrow.body.statements.first() else {
        return ScopeShape::Unsupported;
    };
    let object = match &body.expression {
        Expression::ObjectExpression(o) => o,
        Expression::ParenthesizedExpression(paren) => match &paren.expression {
            Expression::ObjectExpression(o) => o,
            _ => return ScopeShape::Unsupported,
        },
        _ => return ScopeShape::Unsupported,
    };

    let mut keys = BTreeSet::new();
    for property in &object.properties {
        match property {
            ObjectPropertyKind::ObjectProperty(p) => match property_name(&p.key) {
                Some(name) => {
                    keys.insert(name);
                }
                None => return ScopeShape::Unsupported,
            },
            ObjectPropertyKind::SpreadProperty(_) => return ScopeShape::Unsupported,
        }
    }
    let (insert_at, empty) = object_insertion(object);
    ScopeShape::Object {
        keys,
        insert_at,
        empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(source: &str) -> ProgramFacts {
        scan_program("/app/rewritten-app/components/a.js", source, &HmrConfig::default())
            .expect("parses")
    }

    #[test]
    fn test_import_bindings() {
        let facts = scan(
            "import Foo from './foo';\n\
             import { bar, baz as qux, \"x-y\" as xy } from 'lib';\n\
             import * as ns from 'ns';\n\
             import type { T } from 'types';",
        );
        assert_eq!(facts.bindings.len(), 5);
        assert_eq!(facts.binding("Foo").unwrap().imported, ImportedName::Default);
        assert_eq!(
            facts.binding("qux").unwrap().imported,
            ImportedName::Named("baz".to_string())
        );
        assert_eq!(facts.binding("ns").unwrap().imported, ImportedName::Namespace);
        assert!(facts.binding("T").is_none());
        assert_eq!(facts.binding("xy").unwrap().accessor("m"), "m[\"x-y\"]");
        assert_eq!(facts.binding("Foo").unwrap().accessor("m"), "m.default");
    }

    #[test]
    fn test_known_imports_are_recognised() {
        let facts = scan(
            "import Component from '@glimmer/component';\n\
             import { tracked as t } from '@glimmer/tracking';\n\
             import * as all from './all';",
        );
        assert_eq!(facts.component_base_local.as_deref(), Some("Component"));
        assert_eq!(facts.reactive_local.as_deref(), Some("t"));
        assert_eq!(facts.binding("Component").unwrap().export_name(), Some("default"));
        assert_eq!(facts.binding("all").unwrap().export_name(), None);
    }

    #[test]
    fn test_last_import_and_existing_var() {
        let src = "import a from 'a';\nlet template__imports__ = null;\nimport b from 'b';\n";
        let facts = scan(src);
        let var = facts.indirection_var.expect("reused");
        assert_eq!(var.name, "template__imports__");
        assert_eq!(&src[..var.decl_end as usize], "import a from 'a';\nlet template__imports__ = null;");
        assert_eq!(facts.last_import_end, Some((src.len() - 1) as u32));
    }

    #[test]
    fn test_template_sites_and_scope_shapes() {
        let src = r#"import { precompileTemplate } from '@ember/template-compilation';
import { template } from '@ember/template-compiler';
const a = precompileTemplate("<Foo />");
const b = precompileTemplate(`<Bar />`, { strictMode: true, scope: () => ({ Bar }) });
const c = template("<Baz />", { eval() { return eval(arguments[0]); } });
const d = template("<Qux />", {});
const e = template("<Q />", options);
const f = notATemplate("<Z />");
"#;
        let facts = scan(src);
        assert_eq!(facts.templates.len(), 5);
        assert!(matches!(facts.templates[0].scope, ScopeShape::NoOptions { .. }));
        assert_eq!(facts.templates[1].text, "<Bar />");
        let keys: Vec<&str> = facts.templates[1]
            .scope
            .locals()
            .unwrap()
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["Bar"]);
        assert_eq!(facts.templates[2].scope, ScopeShape::Eval);
        assert!(matches!(
            facts.templates[3].scope,
            ScopeShape::Missing { empty: true, .. }
        ));
        assert_eq!(facts.templates[4].scope, ScopeShape::Unsupported);
    }

    #[test]
    fn test_scope_injection_text() {
        let src = "import { template } from '@ember/template-compiler';\n\
                   template('<A />', { scope: () => ({ A }) });";
        let facts = scan(src);
        let (at, text) = facts.templates[0].scope.injection("v").unwrap();
        let mut out = src.to_string();
        out.insert_str(at as usize, &text);
        assert!(out.ends_with("template('<A />', { scope: () => ({ A, v }) });"));
    }

    #[test]
    fn test_unique_names() {
        let mut names = UniqueNames::new(["tracked".to_string(), "tracked1".to_string()].into());
        assert_eq!(names.bind("tracked"), "tracked2");
        assert_eq!(names.bind("fresh"), "fresh");
        assert_eq!(names.bind("fresh"), "fresh3");
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = scan_program("a.js", "import {", &HmrConfig::default()).unwrap_err();
        assert!(matches!(err, HmrError::ProgramParse { .. }));
    }
}
