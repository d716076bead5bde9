//! Declarations emitted around rewritten templates.
//!
//! All output goes through [`SourceEdits`] against the original host source:
//! the `let` for the indirection variable, the reactive decorator import, the
//! holder class with its instantiation, and the guarded hot-accept block.

use crate::config::ImportRef;
use crate::dev_server::virtual_component_id;
use crate::edits::SourceEdits;
use crate::program::{Binding, ProgramFacts};
use crate::validate::{HmrDiagnostic, HMR_MISSING_BINDING};
use std::collections::BTreeSet;

/// Names and switches for one file's scaffolding.
#[derive(Debug, Clone)]
pub struct Scaffold<'f> {
    pub var: &'f str,
    /// No reusable `let <var> = null;` exists yet.
    pub declare_var: bool,
    pub class_name: &'f str,
    /// Local name of the reactive decorator.
    pub decorator: &'f str,
    /// Set when the decorator still has to be imported under `decorator`.
    pub decorator_import: Option<&'f ImportRef>,
    /// Local name of the component base class.
    pub component_base: &'f str,
    /// Set when the base class still has to be imported under
    /// `component_base`.
    pub component_base_import: Option<&'f ImportRef>,
    pub hot_guard: &'f str,
}

/// JS string literal for `value`.
pub fn js_string_literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.replace('"', "\\\"")))
}

fn import_statement(import: &ImportRef, local: &str) -> String {
    if import.export == "default" {
        format!("import {} from {};", local, js_string_literal(&import.source))
    } else if import.export == local {
        format!("import {{ {} }} from {};", local, js_string_literal(&import.source))
    } else {
        format!(
            "import {{ {} as {} }} from {};",
            import.export,
            local,
            js_string_literal(&import.source)
        )
    }
}

pub fn holder_class(class_name: &str, decorator: &str, fields: &[&Binding]) -> String {
    let mut out = format!("class {} {{\n", class_name);
    for binding in fields {
        out.push_str(&format!("  @{} {} = {};\n", decorator, binding.local, binding.local));
    }
    out.push('}');
    out
}

fn accept_with_callback(hot_guard: &str, var: &str, binding: &Binding, indent: &str) -> String {
    format!(
        "{i}{hot}.accept({src}, (module) => {{\n{i}  if (module) {var}.{local} = {value};\n{i}}});\n",
        i = indent,
        hot = hot_guard,
        src = js_string_literal(&binding.source),
        var = var,
        local = binding.local,
        value = binding.accessor("module"),
    )
}

/// Registrations for every field. A binding holding a component class is
/// swapped for its virtual pass-through wrapper, which re-renders on
/// replacement by itself; anything else is reassigned from the new module.
pub fn hot_accept_block(
    hot_guard: &str,
    var: &str,
    component_base: &str,
    fields: &[&Binding],
) -> String {
    let mut out = format!("if ({}) {{\n", hot_guard);
    for binding in fields {
        let Some(export) = binding.export_name() else {
            out.push_str(&accept_with_callback(hot_guard, var, binding, "  "));
            continue;
        };
        let wrapper = virtual_component_id(&binding.source, export);
        out.push_str(&format!(
            "  if ({local}?.prototype instanceof {base}) {{\n\
             \x20   (async () => {{\n\
             \x20     const c = await import({wrapper});\n\
             \x20     {var}.{local} = c.default;\n\
             \x20   }})();\n\
             \x20   {hot}.accept({src});\n\
             \x20 }} else {{\n",
            local = binding.local,
            base = component_base,
            wrapper = js_string_literal(&wrapper),
            var = var,
            hot = hot_guard,
            src = js_string_literal(&binding.source),
        ));
        out.push_str(&accept_with_callback(hot_guard, var, binding, "    "));
        out.push_str("  }\n");
    }
    out.push('}');
    out
}

/// Emits the scaffolding for `used` into `edits`.
///
/// Fields come out sorted by name. A used name without an import produces an
/// `HMR001` diagnostic and is left out; the other names are still emitted.
pub fn synthesize(
    used: &BTreeSet<String>,
    facts: &ProgramFacts,
    scaffold: &Scaffold<'_>,
    file: &str,
    source: &str,
    edits: &mut SourceEdits,
) -> Vec<HmrDiagnostic> {
    let mut diagnostics = Vec::new();
    let mut fields = Vec::with_capacity(used.len());
    for name in used {
        match facts.binding(name) {
            Some(binding) => fields.push(binding),
            None => diagnostics.push(
                HmrDiagnostic::at_offset(
                    HMR_MISSING_BINDING,
                    &format!("'{}' is referenced from a template but has no import", name),
                    file,
                    source,
                    0,
                )
                .report(),
            ),
        }
    }
    if fields.is_empty() {
        return diagnostics;
    }

    let top = facts.prologue_end;
    let top_text = |line: String| {
        if top == 0 {
            format!("{}\n", line)
        } else {
            format!("\n{}", line)
        }
    };
    if let Some(import) = scaffold.decorator_import {
        edits.insert(top, top_text(import_statement(import, scaffold.decorator)));
    }
    if let Some(import) = scaffold.component_base_import {
        if fields.iter().any(|b| b.export_name().is_some()) {
            edits.insert(top, top_text(import_statement(import, scaffold.component_base)));
        }
    }
    if scaffold.declare_var {
        edits.insert(top, top_text(format!("let {} = null;", scaffold.var)));
    }

    // After every import the class reads from, and after the declaration.
    let anchor = [
        facts.last_import_end,
        facts.indirection_var.as_ref().map(|v| v.decl_end),
    ]
    .into_iter()
    .flatten()
    .max();
    let populate = format!(
        "{}\n{} = new {}();",
        holder_class(scaffold.class_name, scaffold.decorator, &fields),
        scaffold.var,
        scaffold.class_name
    );
    match anchor {
        Some(at) => edits.insert(at, format!("\n{}", populate)),
        None => edits.insert(top, top_text(populate)),
    }

    let tail = if source.ends_with('\n') { "" } else { "\n" };
    edits.insert(
        source.len() as u32,
        format!("{}{}\n", tail, hot_accept_block(
            scaffold.hot_guard,
            scaffold.var,
            scaffold.component_base,
            &fields
        )),
    );

    tracing::debug!(
        file = %file,
        var = %scaffold.var,
        fields = fields.len(),
        "synthesized indirection class"
    );
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HmrConfig;
    use crate::program::scan_program;

    fn scaffold<'f>(declare_var: bool, import: Option<&'f ImportRef>) -> Scaffold<'f> {
        Scaffold {
            var: "template__imports__",
            declare_var,
            class_name: "_Imports",
            decorator: "tracked",
            decorator_import: import,
            component_base: "GlimmerComponent",
            component_base_import: None,
            hot_guard: "import.meta.hot",
        }
    }

    fn run(source: &str, used: &[&str], scaffold: &Scaffold<'_>) -> (String, Vec<HmrDiagnostic>) {
        let facts = scan_program("a.js", source, &HmrConfig::default()).unwrap();
        let used: BTreeSet<String> = used.iter().map(|s| s.to_string()).collect();
        let mut edits = SourceEdits::new();
        let diags = synthesize(&used, &facts, scaffold, "a.js", source, &mut edits);
        (edits.apply(source), diags)
    }

    #[test]
    fn test_fields_sorted_and_registered() {
        let src = "import b from './b';\nimport { a } from './a';\nimport * as c from './c';\nexport default 1;\n";
        let decorator = ImportRef::new("@glimmer/tracking", "tracked");
        let base = ImportRef::new("@glimmer/component", "default");
        let mut scaffold = scaffold(true, Some(&decorator));
        scaffold.component_base_import = Some(&base);
        let (out, diags) = run(src, &["b", "a", "c"], &scaffold);
        assert!(diags.is_empty());
        let expected = "import { tracked } from \"@glimmer/tracking\";\n\
import GlimmerComponent from \"@glimmer/component\";\n\
let template__imports__ = null;\n\
import b from './b';\n\
import { a } from './a';\n\
import * as c from './c';\n\
class _Imports {\n  @tracked a = a;\n  @tracked b = b;\n  @tracked c = c;\n}\n\
template__imports__ = new _Imports();\n\
export default 1;\n\
if (import.meta.hot) {\n\
  if (a?.prototype instanceof GlimmerComponent) {\n\
    (async () => {\n\
      const c = await import(\"ember-vite-hmr/virtual/component:./a:a.gjs\");\n\
      template__imports__.a = c.default;\n\
    })();\n\
    import.meta.hot.accept(\"./a\");\n\
  } else {\n\
    import.meta.hot.accept(\"./a\", (module) => {\n\
      if (module) template__imports__.a = module.a;\n\
    });\n\
  }\n\
  if (b?.prototype instanceof GlimmerComponent) {\n\
    (async () => {\n\
      const c = await import(\"ember-vite-hmr/virtual/component:./b:default.gjs\");\n\
      template__imports__.b = c.default;\n\
    })();\n\
    import.meta.hot.accept(\"./b\");\n\
  } else {\n\
    import.meta.hot.accept(\"./b\", (module) => {\n\
      if (module) template__imports__.b = module.default;\n\
    });\n\
  }\n\
  import.meta.hot.accept(\"./c\", (module) => {\n\
    if (module) template__imports__.c = module;\n\
  });\n\
}\n";
        assert_eq!(out, expected);
    }

    #[test]
    fn test_namespace_only_needs_no_component_import() {
        let src = "import * as ns from './ns';\n";
        let base = ImportRef::new("@glimmer/component", "default");
        let mut scaffold = scaffold(true, None);
        scaffold.component_base_import = Some(&base);
        let (out, _) = run(src, &["ns"], &scaffold);
        assert!(!out.contains("@glimmer/component"));
        assert!(!out.contains("instanceof"));
    }

    #[test]
    fn test_reused_var_populated_after_later_of_decl_and_imports() {
        let src = "import a from './a';\nlet template__imports__ = null;\nconst x = 1;";
        let (out, _) = run(src, &["a"], &scaffold(false, None));
        assert!(out.starts_with(
            "import a from './a';\nlet template__imports__ = null;\nclass _Imports {"
        ));
        assert_eq!(out.matches("let template__imports__").count(), 1);
    }

    #[test]
    fn test_missing_binding_is_skipped_with_diagnostic() {
        let src = "import a from './a';\n";
        let (out, diags) = run(src, &["a", "ghost"], &scaffold(true, None));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, HMR_MISSING_BINDING);
        assert!(out.contains("@tracked a = a;"));
        assert!(!out.contains("ghost"));
    }

    #[test]
    fn test_nothing_emitted_without_fields() {
        let src = "import a from './a';\n";
        let (out, _) = run(src, &[], &scaffold(true, None));
        assert_eq!(out, src);
    }

    #[test]
    fn test_renamed_decorator_import() {
        let import = ImportRef::new("@glimmer/tracking", "tracked");
        assert_eq!(
            import_statement(&import, "tracked1"),
            "import { tracked as tracked1 } from \"@glimmer/tracking\";"
        );
        let base = ImportRef::new("@glimmer/component", "default");
        assert_eq!(
            import_statement(&base, "GlimmerComponent1"),
            "import GlimmerComponent1 from \"@glimmer/component\";"
        );
    }
}
