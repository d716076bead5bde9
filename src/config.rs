//! Transform configuration.
//!
//! The hot-reload switch is a plain value on [`HmrConfig`]; the transformer
//! consults it at every entry point instead of reading the environment.

use serde::{Deserialize, Serialize};

use crate::validate::HmrError;

/// Environment variable that turns the transform on (`"true"`).
pub const HMR_ENABLED_ENV: &str = "EMBER_VITE_HMR_ENABLED";

/// A named export of a module, e.g. `precompileTemplate` from
/// `@ember/template-compilation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRef {
    pub source: String,
    pub export: String,
}

impl ImportRef {
    pub fn new(source: &str, export: &str) -> Self {
        ImportRef {
            source: source.to_string(),
            export: export.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HmrConfig {
    pub enabled: bool,
    /// Path fragments marking the compiled application tree.
    pub app_tree_markers: Vec<String>,
    /// Path fragments that always disqualify a file.
    pub excluded_markers: Vec<String>,
    pub extensions: Vec<String>,
    pub indirection_var_hint: String,
    pub imports_class_hint: String,
    pub reactive_decorator: ImportRef,
    /// Base class whose subclasses are swapped through a virtual wrapper
    /// component instead of being assigned directly.
    pub component_base: ImportRef,
    pub component_base_hint: String,
    /// Functions whose first argument is template source.
    pub template_callees: Vec<ImportRef>,
    /// Expression that is truthy only while a hot-reload runtime is attached.
    pub hot_guard: String,
}

impl Default for HmrConfig {
    fn default() -> Self {
        HmrConfig {
            enabled: false,
            app_tree_markers: vec!["/rewritten-app/".to_string()],
            excluded_markers: vec!["/node_modules/".to_string()],
            extensions: [".hbs", ".gjs", ".gts", ".js", ".ts"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            indirection_var_hint: "template__imports__".to_string(),
            imports_class_hint: "_Imports".to_string(),
            reactive_decorator: ImportRef::new("@glimmer/tracking", "tracked"),
            component_base: ImportRef::new("@glimmer/component", "default"),
            component_base_hint: "GlimmerComponent".to_string(),
            template_callees: vec![
                ImportRef::new("@ember/template-compilation", "precompileTemplate"),
                ImportRef::new("@ember/template-compiler", "template"),
            ],
            hot_guard: "import.meta.hot".to_string(),
        }
    }
}

impl HmrConfig {
    /// Defaults with `enabled` taken from [`HMR_ENABLED_ENV`].
    pub fn from_env() -> Self {
        let enabled = std::env::var(HMR_ENABLED_ENV)
            .map(|v| v.trim() == "true")
            .unwrap_or(false);
        HmrConfig {
            enabled,
            ..Default::default()
        }
    }

    /// Host-supplied options; missing keys fall back to the defaults.
    pub fn from_json(json: &str) -> Result<Self, HmrError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether `path` belongs to the rewritten application tree and has a
    /// supported extension. Query strings and Windows separators are ignored.
    pub fn is_eligible(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if self.excluded_markers.iter().any(|m| path.contains(m.as_str())) {
            return false;
        }
        if !self.app_tree_markers.iter().any(|m| path.contains(m.as_str())) {
            return false;
        }
        self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }
}

/// Forward slashes, no query string.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    match path.split_once('?') {
        Some((head, _)) => head.to_string(),
        None => path,
    }
}
