//! # Ember hot imports
//!
//! Build-time half of hot module replacement for Ember templates.
//!
//! Every reference a template makes to an imported binding is redirected
//! through a per-file holder object whose fields are reactive:
//!
//! ```text
//! <Foo />          =>  <__hmr_imports.Foo />
//! {{format x}}     =>  {{__hmr_imports.format x}}
//! ```
//!
//! The host module gains the holder (`class _Imports { @tracked Foo = Foo; }`)
//! and an `import.meta.hot.accept` registration per source module that writes
//! the replacement export into the matching field, so only the templates that
//! read it re-render.
//!
//! ## Invariants
//!
//! 1. Names bound by template block params are never rewritten, whatever the
//!    host module imports.
//! 2. Every rewritten name is an import binding of the host module; a name
//!    with no binding gets no field and no registration.
//! 3. Holder fields and registrations are emitted in sorted name order.
//! 4. Running the transform on its own output changes nothing.
//! 5. With hot reload disabled the output is byte-identical to the input.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod cache;
mod config;
mod dev_server;
mod edits;
mod program;
mod rewriter;
pub mod runtime;
mod scope;
mod synthesize;
pub mod template;
mod transform;
mod validate;
mod visitor;

#[cfg(test)]
mod transform_tests;

pub use cache::{compute_hash, ModuleVersionMap, YieldShape, YieldShapeCache};
pub use config::{normalize_path, HmrConfig, ImportRef, HMR_ENABLED_ENV};
pub use dev_server::{
    parse_virtual_component_id, pass_through_component, virtual_component_id, DevServerPlugin,
    ModuleResolver, VIRTUAL_COMPONENT_PREFIX,
};
pub use edits::SourceEdits;
pub use program::{scan_program, Binding, BindingTable, ImportedName, ProgramFacts, ScopeShape};
pub use rewriter::{KeywordArgumentIssue, ReferenceRewriter};
pub use transform::{transform_modules, HotTransformer, Phase, TransformOutput};
pub use validate::*;
pub use visitor::{NodePath, Role, TemplateVisitor};

#[cfg(feature = "napi")]
pub use transform::transform_module_native;

#[cfg(feature = "napi")]
#[napi]
pub fn hot_imports_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
