use crate::cache::compute_hash;
use crate::config::HmrConfig;
use crate::template::{parse_template, regenerate};
use crate::transform::{transform_modules, HotTransformer, Phase, TransformOutput};
use crate::validate::{HmrError, HMR_TEMPLATE_PARSE, HMR_UNSUPPORTED_OPTIONS};

const PATH: &str = "/p/rewritten-app/components/a.js";

const PRECOMPILE: &str = "import { precompileTemplate } from '@ember/template-compilation';\n";
const TEMPLATE: &str = "import { template } from '@ember/template-compiler';\n";

fn enabled() -> HmrConfig {
    HmrConfig::default().enabled(true)
}

/// `RUST_LOG=ember_hot_imports=debug` shows the passes while a test runs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn transform(source: &str) -> TransformOutput {
    init_tracing();
    HotTransformer::new(enabled())
        .transform_module(PATH, source)
        .expect("transform succeeds")
}

#[test]
fn test_strict_template_end_to_end() {
    let src = format!(
        "{}import SomeComponent from './some-component';\n\
         export default precompileTemplate(\"<SomeComponent /><this.X />\", {{ strictMode: true, scope: () => ({{ SomeComponent }}) }});\n",
        PRECOMPILE
    );
    let out = transform(&src);

    let expected = "import { tracked } from \"@glimmer/tracking\";\n\
import GlimmerComponent from \"@glimmer/component\";\n\
let template__imports__ = null;\n\
import { precompileTemplate } from '@ember/template-compilation';\n\
import SomeComponent from './some-component';\n\
class _Imports {\n  @tracked SomeComponent = SomeComponent;\n}\n\
template__imports__ = new _Imports();\n\
export default precompileTemplate(\"<template__imports__.SomeComponent /><this.X />\", { strictMode: true, scope: () => ({ SomeComponent, template__imports__ }) });\n\
if (import.meta.hot) {\n\
  if (SomeComponent?.prototype instanceof GlimmerComponent) {\n\
    (async () => {\n\
      const c = await import(\"ember-vite-hmr/virtual/component:./some-component:default.gjs\");\n\
      template__imports__.SomeComponent = c.default;\n\
    })();\n\
    import.meta.hot.accept(\"./some-component\");\n\
  } else {\n\
    import.meta.hot.accept(\"./some-component\", (module) => {\n\
      if (module) template__imports__.SomeComponent = module.default;\n\
    });\n\
  }\n\
}\n";
    assert_eq!(out.code, expected);
    assert!(out.changed);
    assert_eq!(out.used_bindings, vec!["SomeComponent".to_string()]);
    assert_eq!(out.indirection_var.as_deref(), Some("template__imports__"));
    assert!(out.diagnostics.is_empty());
    assert_eq!(out.content_hash, compute_hash(&out.code));
}

#[test]
fn test_second_run_changes_nothing() {
    let src = format!(
        "{}import Foo from './foo';\nimport {{ bar }} from './bar';\n\
         export default precompileTemplate(\"<Foo @x={{{{bar}}}} />\");\n",
        PRECOMPILE
    );
    let first = transform(&src);
    assert!(first.changed);

    let second = transform(&first.code);
    assert!(!second.changed);
    assert_eq!(second.code, first.code);
    assert!(second.used_bindings.is_empty());
}

#[test]
fn test_block_param_shadowing_import_is_untouched() {
    let src = format!(
        "{}import Foo from './foo';\n\
         export default precompileTemplate(\"{{{{#each items as |Foo|}}}}<Foo />{{{{/each}}}}\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert_eq!(out.code, src);
    assert!(!out.changed);
    assert!(out.used_bindings.is_empty());
}

#[test]
fn test_used_names_are_import_bindings_only() {
    let src = format!(
        "{}import Foo from './foo';\nconst bar = 1;\n\
         export default precompileTemplate(\"<Foo /><Unknown />{{{{bar}}}}\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert_eq!(out.used_bindings, vec!["Foo".to_string()]);
    assert!(out.code.contains("<template__imports__.Foo /><Unknown />{{bar}}"));
    assert!(!out.code.contains("@tracked bar"));
    assert!(!out.code.contains("@tracked Unknown"));
}

#[test]
fn test_fields_follow_name_order() {
    let src = format!(
        "{}import b from './b';\nimport a from './a';\nimport c from './c';\n\
         export default precompileTemplate(\"{{{{b}}}}{{{{a}}}}{{{{c}}}}\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert_eq!(out.used_bindings, vec!["a", "b", "c"]);
    let pos = |needle: &str| out.code.find(needle).expect(needle);
    assert!(pos("@tracked a = a;") < pos("@tracked b = b;"));
    assert!(pos("@tracked b = b;") < pos("@tracked c = c;"));
    assert!(pos("accept(\"./a\"") < pos("accept(\"./b\""));
    assert!(pos("accept(\"./b\"") < pos("accept(\"./c\""));
}

#[test]
fn test_dotted_paths_keep_their_tail() {
    let src = format!(
        "{}import foo from './foo';\n\
         export default precompileTemplate(\"{{{{foo.bar.baz}}}} {{{{#if foo.ok}}}}x{{{{/if}}}}\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert!(out
        .code
        .contains("\"{{template__imports__.foo.bar.baz}} {{#if template__imports__.foo.ok}}x{{/if}}\""));
    assert_eq!(out.used_bindings, vec!["foo"]);
}

#[test]
fn test_component_keyword_string_targets() {
    let src = format!(
        "{}import MyComponent from './my-component';\n\
         export default precompileTemplate('{{{{component \"my-component\"}}}}{{{{component this.dynamicThing}}}}');\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert!(out
        .code
        .contains("{{component template__imports__.MyComponent}}{{component this.dynamicThing}}"));
    assert!(out.code.contains("template__imports__.MyComponent = module.default;"));
}

#[test]
fn test_disabled_is_byte_identical() {
    let src = format!(
        "{}import Foo from './foo';\nexport default precompileTemplate(\"<Foo />\");\n",
        PRECOMPILE
    );
    let out = HotTransformer::new(HmrConfig::default())
        .transform_module(PATH, &src)
        .unwrap();
    assert_eq!(out.code, src);
    assert!(!out.changed);
    assert!(out.indirection_var.is_none());
}

#[test]
fn test_files_outside_the_app_tree_pass_through() {
    let src = format!(
        "{}import Foo from './foo';\nexport default precompileTemplate(\"<Foo />\");\n",
        PRECOMPILE
    );
    let out = HotTransformer::new(enabled())
        .transform_module("/p/node_modules/addon/components/a.js", &src)
        .unwrap();
    assert_eq!(out.code, src);
}

#[test]
fn test_scope_injection_without_options() {
    let src = format!(
        "{}import Foo from './foo';\nexport default precompileTemplate(\"<Foo />\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert!(out.code.contains(
        "precompileTemplate(\"<template__imports__.Foo />\", { scope: () => ({ template__imports__ }) });"
    ));
}

#[test]
fn test_scope_injection_into_options_without_scope() {
    let src = format!(
        "{}import Foo from './foo';\n\
         export const a = template(\"<Foo />\", {{ strictMode: true }});\n\
         export const b = template(\"<Foo />\", {{}});\n",
        TEMPLATE
    );
    let out = transform(&src);
    assert!(out.code.contains(
        "template(\"<template__imports__.Foo />\", { strictMode: true, scope: () => ({ template__imports__ }) });"
    ));
    assert!(out
        .code
        .contains("template(\"<template__imports__.Foo />\", { scope: () => ({ template__imports__ }) });"));
    assert_eq!(out.code.matches("@tracked Foo = Foo;").count(), 1);
}

#[test]
fn test_eval_options_need_no_injection() {
    let src = format!(
        "{}import Foo from './foo';\n\
         export default template(\"<Foo />\", {{ eval() {{ return eval(arguments[0]); }} }});\n",
        TEMPLATE
    );
    let out = transform(&src);
    assert!(out.code.contains(
        "template(\"<template__imports__.Foo />\", { eval() { return eval(arguments[0]); } });"
    ));
}

#[test]
fn test_unsupported_options_are_reported_and_skipped() {
    let src = format!(
        "{}import Foo from './foo';\nexport default template(\"<Foo />\", options);\n",
        TEMPLATE
    );
    let out = transform(&src);
    assert_eq!(out.code, src);
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[0].code, HMR_UNSUPPORTED_OPTIONS);
}

#[test]
fn test_unparsable_template_is_reported() {
    let src = format!(
        "{}import Foo from './foo';\n\
         export const a = precompileTemplate(\"{{{{#if x}}}}<Foo />\");\n\
         export const b = precompileTemplate(\"<Foo />\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[0].code, HMR_TEMPLATE_PARSE);
    assert!(out.code.contains("precompileTemplate(\"{{#if x}}<Foo />\");"));
    assert!(out.code.contains("precompileTemplate(\"<template__imports__.Foo />\""));
}

#[test]
fn test_existing_tracked_import_is_reused() {
    let src = format!(
        "{}import {{ tracked }} from '@glimmer/tracking';\nimport Foo from './foo';\n\
         export default precompileTemplate(\"<Foo />\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert_eq!(out.code.matches("@glimmer/tracking").count(), 1);
    assert!(out.code.contains("@tracked Foo = Foo;"));
}

#[test]
fn test_generated_names_avoid_collisions() {
    let src = format!(
        "{}import Foo from './foo';\nconst template__imports__ = 1;\nfunction tracked() {{}}\n\
         export default precompileTemplate(\"<Foo />\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert_eq!(out.indirection_var.as_deref(), Some("template__imports__1"));
    assert!(out.code.contains("let template__imports__1 = null;"));
    assert!(out
        .code
        .contains("import { tracked as tracked2 } from \"@glimmer/tracking\";"));
    assert!(out.code.contains("@tracked2 Foo = Foo;"));
    assert!(out.code.contains("<template__imports__1.Foo />"));
}

#[test]
fn test_declarations_follow_directive_prologue() {
    let src = format!(
        "\"use strict\";\n{}import Foo from './foo';\nexport default precompileTemplate(\"<Foo />\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert!(out.code.starts_with(
        "\"use strict\";\nimport { tracked } from \"@glimmer/tracking\";\nimport GlimmerComponent from \"@glimmer/component\";\nlet template__imports__ = null;\nimport"
    ));
}

#[test]
fn test_host_parse_error_surfaces() {
    let err = HotTransformer::new(enabled())
        .transform_module(PATH, "import {")
        .unwrap_err();
    assert!(matches!(err, HmrError::ProgramParse { .. }));
}

#[test]
fn test_rewrite_without_open_file_is_a_phase_violation() {
    let mut transformer = HotTransformer::new(enabled());
    let mut t = parse_template("<Foo />").unwrap();
    let err = transformer.rewrite_template(&mut t, None).unwrap_err();
    assert!(matches!(
        err,
        HmrError::PhaseViolation {
            operation: "rewrite_template",
            phase: "idle"
        }
    ));
    assert!(matches!(
        transformer.finish_file(),
        Err(HmrError::PhaseViolation { .. })
    ));
}

#[test]
fn test_host_driven_passes() {
    let src = "import Foo from './foo';\nexport default class A {}\n";
    let mut transformer = HotTransformer::new(enabled());
    assert!(transformer.begin_file(PATH, src).unwrap());
    assert_eq!(transformer.phase(), Phase::PrePass);
    assert_eq!(transformer.indirection_var(), Some("template__imports__"));

    let mut t = parse_template("<Foo />{{@x}}").unwrap();
    assert!(transformer.rewrite_template(&mut t, None).unwrap());
    assert_eq!(transformer.phase(), Phase::MainPass);
    assert_eq!(regenerate("<Foo />{{@x}}", &t), "<template__imports__.Foo />{{@x}}");

    let out = transformer.finish_file().unwrap();
    assert_eq!(transformer.phase(), Phase::Idle);
    assert_eq!(out.used_bindings, vec!["Foo"]);
    assert!(out.code.contains("@tracked Foo = Foo;"));
    assert!(out.code.ends_with(
        "    import.meta.hot.accept(\"./foo\", (module) => {\n      if (module) template__imports__.Foo = module.default;\n    });\n  }\n}\n"
    ));
}

#[test]
fn test_disabled_host_driven_passes_are_noops() {
    let mut transformer = HotTransformer::new(HmrConfig::default());
    assert!(!transformer.begin_file(PATH, "import Foo from './foo';").unwrap());
    let mut t = parse_template("<Foo />").unwrap();
    assert!(!transformer.rewrite_template(&mut t, None).unwrap());
    assert_eq!(regenerate("<Foo />", &t), "<Foo />");
}

#[test]
fn test_parallel_files_do_not_share_state() {
    let one = format!(
        "{}import Foo from './foo';\nexport default precompileTemplate(\"<Foo />\");\n",
        PRECOMPILE
    );
    let two = format!(
        "{}import Bar from './bar';\nexport default precompileTemplate(\"<Bar />\");\n",
        PRECOMPILE
    );
    let modules = vec![
        ("/p/rewritten-app/components/one.js".to_string(), one),
        ("/p/rewritten-app/components/two.js".to_string(), two),
    ];
    let outputs: Vec<TransformOutput> = transform_modules(&enabled(), &modules)
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(outputs[0].used_bindings, vec!["Foo"]);
    assert_eq!(outputs[1].used_bindings, vec!["Bar"]);
    assert_eq!(outputs[0].indirection_var, outputs[1].indirection_var);
    assert!(!outputs[1].code.contains("Foo"));
}

#[test]
fn test_component_classes_swap_through_virtual_wrapper() {
    let src = format!(
        "{}import Component from '@glimmer/component';\nimport {{ Card }} from 'my-app/components/card';\n\
         export default precompileTemplate(\"<Card />\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    // The module's own base-class import is reused.
    assert!(!out.code.contains("GlimmerComponent"));
    assert!(out.code.contains("if (Card?.prototype instanceof Component) {"));
    assert!(out.code.contains(
        "const c = await import(\"ember-vite-hmr/virtual/component:my-app/components/card:Card.gjs\");"
    ));
    assert!(out.code.contains("template__imports__.Card = c.default;"));
    assert!(out.code.contains("import.meta.hot.accept(\"my-app/components/card\");"));
}

#[test]
fn test_loose_mode_keeps_builtin_helpers_and_modifiers() {
    let src = format!(
        "{}import {{ action }} from '@ember/object';\nimport {{ on }} from '@ember/modifier';\n\
         import Foo from './foo';\n\
         export default precompileTemplate(\"<button {{{{action 'save'}}}}>x</button><i {{{{on 'click' this.save}}}} /><Foo />\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert_eq!(out.used_bindings, vec!["Foo"]);
    assert!(out.code.contains(
        "\"<button {{action 'save'}}>x</button><i {{on 'click' this.save}} /><template__imports__.Foo />\""
    ));
    assert!(!out.code.contains("@tracked action"));
    assert!(!out.code.contains("@tracked on"));
    assert!(!out.code.contains("accept(\"@ember/object\""));
}

#[test]
fn test_templates_in_one_file_share_one_holder() {
    let src = format!(
        "{}import Foo from './foo';\nimport {{ bar }} from './bar';\n\
         export const a = precompileTemplate(\"<Foo />\");\n\
         export const b = precompileTemplate(\"{{{{bar}}}}\");\n",
        PRECOMPILE
    );
    let out = transform(&src);
    assert_eq!(out.used_bindings, vec!["Foo", "bar"]);
    assert_eq!(out.code.matches("class _Imports").count(), 1);
    assert_eq!(out.code.matches("let template__imports__").count(), 1);
    assert_eq!(out.code.matches("new _Imports()").count(), 1);
    let foo = out.code.find("@tracked Foo = Foo;").expect("Foo field");
    let bar = out.code.find("@tracked bar = bar;").expect("bar field");
    assert!(foo < bar);
    assert!(out.code.contains(
        "precompileTemplate(\"<template__imports__.Foo />\", { scope: () => ({ template__imports__ }) });"
    ));
    assert!(out.code.contains(
        "precompileTemplate(\"{{template__imports__.bar}}\", { scope: () => ({ template__imports__ }) });"
    ));
}
