#[cfg(feature = "napi")]
use napi_derive::napi;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::cache::compute_hash;
use crate::config::HmrConfig;
use crate::edits::SourceEdits;
use crate::program::{scan_program, ProgramFacts, ScopeShape, TemplateSite, UniqueNames};
use crate::rewriter::{KeywordArgumentIssue, ReferenceRewriter};
use crate::synthesize::{js_string_literal, synthesize, Scaffold};
use crate::template::codegen::{is_modified, regenerate};
use crate::template::{parse_template, Template};
use crate::validate::{
    HmrDiagnostic, HmrError, HMR_KEYWORD_ARGUMENT, HMR_TEMPLATE_PARSE, HMR_UNSUPPORTED_OPTIONS,
};
use crate::visitor::TemplateVisitor;

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct TransformOutput {
    pub code: String,
    pub changed: bool,
    /// Sorted names routed through the indirection variable.
    pub used_bindings: Vec<String>,
    pub indirection_var: Option<String>,
    pub diagnostics: Vec<HmrDiagnostic>,
    /// SHA-256 of `code`.
    pub content_hash: String,
}

impl TransformOutput {
    pub fn unchanged(source: &str) -> Self {
        TransformOutput {
            code: source.to_string(),
            changed: false,
            used_bindings: Vec::new(),
            indirection_var: None,
            diagnostics: Vec::new(),
            content_hash: compute_hash(source),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PER-FILE STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PrePass,
    MainPass,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::PrePass => "in the pre-pass",
            Phase::MainPass => "in the main pass",
        }
    }
}

/// Everything accumulated while one file is processed. Dropped when the file
/// finishes; nothing in here outlives it.
#[derive(Debug)]
struct FileContext {
    path: String,
    source: String,
    facts: ProgramFacts,
    names: UniqueNames,
    var: String,
    used: BTreeSet<String>,
    edits: SourceEdits,
    diagnostics: Vec<HmrDiagnostic>,
}

impl FileContext {
    fn rewrite(
        &mut self,
        template: &mut Template,
        locals: Option<&BTreeSet<String>>,
    ) -> (usize, Vec<KeywordArgumentIssue>) {
        let mut rewriter =
            ReferenceRewriter::new(&self.facts.bindings, locals, &self.var, &mut self.used);
        rewriter.visit_template(template);
        (rewriter.rewrites, rewriter.issues)
    }

    fn diagnostic(&mut self, code: &str, message: &str, offset: u32) {
        let diagnostic =
            HmrDiagnostic::at_offset(code, message, &self.path, &self.source, offset).report();
        self.diagnostics.push(diagnostic);
    }

    /// Rewrites one template embedded in the host source.
    fn rewrite_site(&mut self, site: &TemplateSite) {
        // Offsets inside the literal are approximate once escapes are involved.
        let content_start = site.literal_start + 1;

        if site.scope == ScopeShape::Unsupported {
            self.diagnostic(
                HMR_UNSUPPORTED_OPTIONS,
                "template options are not an object literal with a `scope` arrow; template left as is",
                site.literal_start,
            );
            return;
        }

        let mut template = match parse_template(&site.text) {
            Ok(t) => t,
            Err(err) => {
                self.diagnostic(
                    HMR_TEMPLATE_PARSE,
                    &format!("template could not be parsed: {}", err.message),
                    content_start + err.offset,
                );
                return;
            }
        };

        let (_, issues) = self.rewrite(&mut template, site.scope.locals());
        for issue in issues {
            self.diagnostic(
                HMR_KEYWORD_ARGUMENT,
                &format!("`{}` expects a name as its first argument", issue.keyword),
                content_start + issue.offset,
            );
        }

        if !is_modified(&site.text, &template) {
            return;
        }
        let rewritten = regenerate(&site.text, &template);
        self.edits.replace(
            site.literal_start,
            site.literal_end,
            js_string_literal(&rewritten),
        );
        if let Some((at, text)) = site.scope.injection(&self.var) {
            self.edits.insert(at, text);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COORDINATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Drives the pre-pass and main pass for one file at a time.
///
/// `begin_file` scans the host module and opens a fresh per-file context,
/// `rewrite_template` runs over each template of that file, and `finish_file`
/// emits the declarations and closes the context. `transform_module` chains
/// all three over the templates found in the host source.
#[derive(Debug)]
pub struct HotTransformer {
    config: HmrConfig,
    phase: Phase,
    file: Option<FileContext>,
}

impl HotTransformer {
    pub fn new(config: HmrConfig) -> Self {
        HotTransformer {
            config,
            phase: Phase::Idle,
            file: None,
        }
    }

    pub fn config(&self) -> &HmrConfig {
        &self.config
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Name of the indirection variable for the file being processed.
    pub fn indirection_var(&self) -> Option<&str> {
        self.file.as_ref().map(|f| f.var.as_str())
    }

    /// Pre-pass. Returns `false` when the file is not transformed at all, in
    /// which case the transformer stays idle.
    pub fn begin_file(&mut self, path: &str, source: &str) -> Result<bool, HmrError> {
        self.file = None;
        self.phase = Phase::Idle;
        if !self.config.enabled || !self.config.is_eligible(path) {
            return Ok(false);
        }

        let facts = scan_program(path, source, &self.config)?;
        let mut names = UniqueNames::new(facts.taken_names.clone());
        let var = match &facts.indirection_var {
            Some(existing) => existing.name.clone(),
            None => names.bind(&self.config.indirection_var_hint),
        };
        tracing::debug!(file = %path, var = %var, "pre-pass complete");

        self.file = Some(FileContext {
            path: path.to_string(),
            source: source.to_string(),
            facts,
            names,
            var,
            used: BTreeSet::new(),
            edits: SourceEdits::new(),
            diagnostics: Vec::new(),
        });
        self.phase = Phase::PrePass;
        Ok(true)
    }

    fn context_mut(&mut self, operation: &'static str) -> Result<&mut FileContext, HmrError> {
        let phase = self.phase;
        match (&mut self.file, phase) {
            (Some(file), Phase::PrePass | Phase::MainPass) => Ok(file),
            _ => Err(HmrError::PhaseViolation {
                operation,
                phase: phase.as_str(),
            }),
        }
    }

    /// Main pass over one template AST of the current file. `locals` are the
    /// template's strict-mode scope names, if it has any.
    ///
    /// Returns whether the template was changed.
    pub fn rewrite_template(
        &mut self,
        template: &mut Template,
        locals: Option<&BTreeSet<String>>,
    ) -> Result<bool, HmrError> {
        if !self.config.enabled {
            return Ok(false);
        }
        let file = self.context_mut("rewrite_template")?;
        let (rewrites, issues) = file.rewrite(template, locals);
        for issue in issues {
            // Host-supplied templates carry no host offsets.
            file.diagnostic(
                HMR_KEYWORD_ARGUMENT,
                &format!("`{}` expects a name as its first argument", issue.keyword),
                0,
            );
        }
        self.phase = Phase::MainPass;
        Ok(rewrites > 0)
    }

    /// Emits the declarations for every name used by the file's templates
    /// and returns the finished module.
    pub fn finish_file(&mut self) -> Result<TransformOutput, HmrError> {
        self.context_mut("finish_file")?;
        let Some(mut file) = self.file.take() else {
            return Err(HmrError::PhaseViolation {
                operation: "finish_file",
                phase: Phase::Idle.as_str(),
            });
        };
        self.phase = Phase::Idle;

        if !self.config.enabled {
            return Ok(TransformOutput::unchanged(&file.source));
        }
        if file.used.is_empty() && file.edits.is_empty() {
            let mut output = TransformOutput::unchanged(&file.source);
            output.diagnostics = file.diagnostics;
            return Ok(output);
        }

        if !file.used.is_empty() {
            let (decorator, decorator_import) = match &file.facts.reactive_local {
                Some(local) => (local.clone(), None),
                None => (
                    file.names.bind(&self.config.reactive_decorator.export),
                    Some(&self.config.reactive_decorator),
                ),
            };
            let (component_base, component_base_import) = match &file.facts.component_base_local {
                Some(local) => (local.clone(), None),
                None => (
                    file.names.bind(&self.config.component_base_hint),
                    Some(&self.config.component_base),
                ),
            };
            let class_name = file.names.bind(&self.config.imports_class_hint);
            let scaffold = Scaffold {
                var: &file.var,
                declare_var: file.facts.indirection_var.is_none(),
                class_name: &class_name,
                decorator: &decorator,
                decorator_import,
                component_base: &component_base,
                component_base_import,
                hot_guard: &self.config.hot_guard,
            };
            let diagnostics = synthesize(
                &file.used,
                &file.facts,
                &scaffold,
                &file.path,
                &file.source,
                &mut file.edits,
            );
            file.diagnostics.extend(diagnostics);
        }

        let code = file.edits.apply(&file.source);
        tracing::debug!(
            file = %file.path,
            used = file.used.len(),
            edits = file.edits.len(),
            "main pass complete"
        );
        Ok(TransformOutput {
            changed: code != file.source,
            content_hash: compute_hash(&code),
            code,
            used_bindings: file.used.into_iter().collect(),
            indirection_var: Some(file.var),
            diagnostics: file.diagnostics,
        })
    }

    /// Both passes over every template call in `source`.
    pub fn transform_module(&mut self, path: &str, source: &str) -> Result<TransformOutput, HmrError> {
        if !self.begin_file(path, source)? {
            return Ok(TransformOutput::unchanged(source));
        }
        let file = self.context_mut("transform_module")?;
        let sites = std::mem::take(&mut file.facts.templates);
        for site in &sites {
            file.rewrite_site(site);
        }
        file.facts.templates = sites;
        self.phase = Phase::MainPass;
        self.finish_file()
    }
}

/// Transforms independent files in parallel, one coordinator per file.
pub fn transform_modules(
    config: &HmrConfig,
    modules: &[(String, String)],
) -> Vec<Result<TransformOutput, HmrError>> {
    modules
        .par_iter()
        .map(|(path, source)| HotTransformer::new(config.clone()).transform_module(path, source))
        .collect()
}

#[cfg(feature = "napi")]
#[napi]
pub fn transform_module_native(
    source: String,
    path: String,
    options_json: Option<String>,
) -> napi::Result<TransformOutput> {
    let config = match options_json {
        Some(json) => HmrConfig::from_json(&json)?,
        None => HmrConfig::from_env(),
    };
    Ok(HotTransformer::new(config).transform_module(&path, &source)?)
}
