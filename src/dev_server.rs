//! Bundler-side post transform.
//!
//! Runs after the module transform on every served module: points the
//! generated hot-accept registrations at the ids the dev server actually
//! serves, makes routes and controllers self-accepting, and produces the
//! virtual pass-through component modules.

use crate::cache::{ModuleVersionMap, YieldShape, YieldShapeCache};
use crate::config::{normalize_path, HmrConfig};
use crate::synthesize::js_string_literal;
use crate::validate::HmrError;
use lazy_static::lazy_static;
use regex::Regex;

pub const VIRTUAL_COMPONENT_PREFIX: &str = "ember-vite-hmr/virtual/component:";

lazy_static! {
    static ref ACCEPT_RE: Regex =
        Regex::new(r#"import\.meta\.hot\.accept\((['"])([^'"]+)(['"])"#).unwrap();
    static ref VIRTUAL_IMPORT_RE: Regex =
        Regex::new(r#"(['"])(ember-vite-hmr/virtual/component:[^'"]+\.gjs)(['"])"#).unwrap();
    static ref ROUTE_FILE_RE: Regex =
        Regex::new(r"(^|/)(router|controller)\.(js|ts|gjs|gts)$").unwrap();
}

const SELF_ACCEPT_DIRS: &[&str] = &["/routes/", "/routers/", "/controllers/"];

/// The bundler's module resolution, used to turn accept specifiers into
/// served ids.
pub trait ModuleResolver {
    /// Resolved file id for `specifier` imported from `importer`, or `None`
    /// when it does not resolve.
    fn resolve_id(&self, specifier: &str, importer: &str) -> Result<Option<String>, HmrError>;
}

impl<F> ModuleResolver for F
where
    F: Fn(&str, &str) -> Result<Option<String>, HmrError>,
{
    fn resolve_id(&self, specifier: &str, importer: &str) -> Result<Option<String>, HmrError> {
        self(specifier, importer)
    }
}

fn is_template_module(path: &str) -> bool {
    path.ends_with(".hbs") || path.ends_with(".gjs") || path.ends_with(".gts")
}

fn is_self_accepting(path: &str) -> bool {
    SELF_ACCEPT_DIRS.iter().any(|d| path.contains(d)) || ROUTE_FILE_RE.is_match(path)
}

fn is_absolute_fs_path(id: &str) -> bool {
    let bytes = id.as_bytes();
    id.starts_with('/')
        || (bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/')
}

/// Id of the virtual wrapper around `export` of `specifier`.
pub fn virtual_component_id(specifier: &str, export: &str) -> String {
    format!(
        "{}{}:{}.gjs",
        VIRTUAL_COMPONENT_PREFIX,
        specifier.replace("@embroider/virtual", "embroider_virtual"),
        export
    )
}

/// `(specifier, export)` of a virtual component id.
pub fn parse_virtual_component_id(id: &str) -> Option<(String, String)> {
    let rest = normalize_path(id);
    let rest = rest.strip_prefix('/').unwrap_or(&rest);
    let rest = rest.strip_prefix(VIRTUAL_COMPONENT_PREFIX)?;
    let rest = rest.strip_suffix(".gjs")?;
    let (specifier, export) = rest.rsplit_once(':')?;
    if specifier.is_empty() || export.is_empty() {
        return None;
    }
    Some((
        specifier.replace("embroider_virtual", "@embroider/virtual"),
        export.to_string(),
    ))
}

fn block_params(prefix: &str, count: usize) -> (String, String) {
    let names: Vec<String> = (0..count).map(|i| format!("{}{}", prefix, i)).collect();
    if names.is_empty() {
        (String::new(), String::new())
    } else {
        (format!(" as |{}|", names.join(" ")), format!(" {}", names.join(" ")))
    }
}

/// Wrapper component that renders the target with every argument and block
/// forwarded.
pub fn pass_through_component(specifier: &str, export: &str, shape: &YieldShape) -> String {
    let import = if export == "default" {
        format!("import Target from {};\n", js_string_literal(specifier))
    } else {
        format!(
            "import {{ {} as Target }} from {};\n",
            export,
            js_string_literal(specifier)
        )
    };

    let mut invocation = String::from("<Target ...attributes");
    for arg in &shape.args {
        invocation.push_str(&format!(" @{}={{{{@{}}}}}", arg, arg));
    }

    let named = !shape.named_blocks.is_empty() || shape.has_inverse;
    let (default_as, default_yield) = block_params("p", shape.default_params);
    let mut body = String::new();
    if !named {
        if shape.has_default {
            invocation.push_str(&format!("{}>", default_as));
            body.push_str(&format!("{{{{yield{}}}}}", default_yield));
        } else {
            invocation.push_str(" />");
        }
    } else {
        invocation.push('>');
        if shape.has_default {
            body.push_str(&format!("<:default{}>{{{{yield{}}}}}</:default>", default_as, default_yield));
        }
        for (name, count) in &shape.named_blocks {
            let (params_as, params_yield) = block_params("p", *count);
            body.push_str(&format!(
                "<:{}{}>{{{{yield{} to=\"{}\"}}}}</:{}>",
                name, params_as, params_yield, name, name
            ));
        }
        if shape.has_inverse {
            body.push_str("<:inverse>{{yield to=\"inverse\"}}</:inverse>");
        }
    }
    let close = if invocation.ends_with("/>") { "" } else { "</Target>" };

    format!("{}\n<template>{}{}{}</template>\n", import, invocation, body, close)
}

/// Post-transform plugin state. One per dev-server process.
#[derive(Debug)]
pub struct DevServerPlugin {
    config: HmrConfig,
    shapes: YieldShapeCache,
    versions: ModuleVersionMap,
}

impl DevServerPlugin {
    pub fn new(config: HmrConfig) -> Self {
        DevServerPlugin {
            config,
            shapes: YieldShapeCache::new(),
            versions: ModuleVersionMap::new(),
        }
    }

    pub fn versions(&self) -> &ModuleVersionMap {
        &self.versions
    }

    pub fn shapes(&self) -> &YieldShapeCache {
        &self.shapes
    }

    /// Id the dev server serves a resolved file under.
    pub fn served_id(&self, resolved: &str) -> String {
        let resolved = normalize_path(resolved);
        for marker in &self.config.app_tree_markers {
            if let Some((_, rest)) = resolved.split_once(marker.as_str()) {
                return format!("/{}", rest);
            }
        }
        if resolved.starts_with("/@") || !is_absolute_fs_path(&resolved) {
            return resolved;
        }
        if resolved.starts_with('/') {
            format!("/@fs{}", resolved)
        } else {
            format!("/@fs/{}", resolved)
        }
    }

    pub fn post_transform(
        &self,
        source: &str,
        id: &str,
        resolver: &dyn ModuleResolver,
    ) -> Result<String, HmrError> {
        if !self.config.enabled {
            return Ok(source.to_string());
        }
        let path = normalize_path(id);
        if is_template_module(&path) {
            let accepted = self.rewrite_accept_specifiers(source, &path, resolver)?;
            return self.rewrite_virtual_ids(&accepted, &path, resolver);
        }
        if is_self_accepting(&path) {
            tracing::debug!(module = %path, "appending self-accept footer");
            return Ok(format!("{}{}", source, self.self_accept_footer()));
        }
        Ok(source.to_string())
    }

    fn served_for(
        &self,
        specifier: &str,
        importer: &str,
        resolver: &dyn ModuleResolver,
    ) -> Result<String, HmrError> {
        let resolved = resolver
            .resolve_id(specifier, importer)?
            .ok_or_else(|| HmrError::Resolve {
                specifier: specifier.to_string(),
                importer: importer.to_string(),
                reason: "module not found".to_string(),
            })?;
        Ok(self.served_id(&resolved))
    }

    fn rewrite_accept_specifiers(
        &self,
        source: &str,
        importer: &str,
        resolver: &dyn ModuleResolver,
    ) -> Result<String, HmrError> {
        let mut out = String::with_capacity(source.len());
        let mut last = 0;
        for caps in ACCEPT_RE.captures_iter(source) {
            let (Some(whole), Some(dep)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let served = self.served_for(dep.as_str(), importer, resolver)?;
            out.push_str(&source[last..whole.start()]);
            out.push_str(&format!("{}.accept({}", self.config.hot_guard, js_string_literal(&served)));
            last = whole.end();
        }
        out.push_str(&source[last..]);
        Ok(out)
    }

    /// Points wrapper imports at the served id of the wrapped module, so the
    /// wrapper's shape entry is keyed the way file changes arrive.
    fn rewrite_virtual_ids(
        &self,
        source: &str,
        importer: &str,
        resolver: &dyn ModuleResolver,
    ) -> Result<String, HmrError> {
        let mut out = String::with_capacity(source.len());
        let mut last = 0;
        for caps in VIRTUAL_IMPORT_RE.captures_iter(source) {
            let (Some(whole), Some(id)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let Some((specifier, export)) = parse_virtual_component_id(id.as_str()) else {
                continue;
            };
            let served = self.served_for(&specifier, importer, resolver)?;
            out.push_str(&source[last..whole.start()]);
            out.push_str(&js_string_literal(&virtual_component_id(&served, &export)));
            last = whole.end();
        }
        out.push_str(&source[last..]);
        Ok(out)
    }

    fn self_accept_footer(&self) -> String {
        let hot = &self.config.hot_guard;
        format!(
            "\nif ({hot} && window.emberHotReloadPlugin) {{\n\
             \x20 window.emberHotReloadPlugin.canAcceptNew({hot_url}).then((ok) => {{\n\
             \x20   if (ok) {{\n\
             \x20     {hot}.accept();\n\
             \x20   }} else {{\n\
             \x20     {hot}.decline();\n\
             \x20   }}\n\
             \x20 }});\n\
             }}\n",
            hot = hot,
            hot_url = "import.meta.url",
        )
    }

    /// A changed file drops the shapes of every wrapper around it and its
    /// accepted version. Wrappers are keyed by the served id.
    pub fn on_file_changed(&self, module_id: &str) {
        let module_id = normalize_path(module_id);
        let served = self.served_id(&module_id);
        let mut shapes = self.shapes.invalidate_module(&served);
        if served != module_id {
            shapes += self.shapes.invalidate_module(&module_id);
        }
        let version = self.versions.invalidate(&module_id);
        tracing::debug!(module = %module_id, served = %served, shapes, version, "invalidated caches");
    }

    /// Source of a virtual pass-through component module, or `None` when `id`
    /// is not one. `target_template` is the wrapped component's template,
    /// when it has one.
    pub fn virtual_component_module(&self, id: &str, target_template: Option<&str>) -> Option<String> {
        let (specifier, export) = parse_virtual_component_id(id)?;
        let key = format!("{}:{}", specifier, export);
        // `specifier` is a served id after post_transform; see on_file_changed.
        let shape = target_template
            .and_then(|t| self.shapes.get_or_compute(&key, t))
            .map(|s| (*s).clone())
            .unwrap_or_else(|| YieldShape {
                has_default: true,
                ..YieldShape::default()
            });
        Some(pass_through_component(&specifier, &export, &shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin() -> DevServerPlugin {
        DevServerPlugin::new(HmrConfig::default().enabled(true))
    }

    fn resolver(specifier: &str, _importer: &str) -> Result<Option<String>, HmrError> {
        Ok(match specifier {
            "./missing" => None,
            "lib" => Some("/project/node_modules/lib/index.js".to_string()),
            other => Some(format!(
                "/project/dist/rewritten-app/components/{}.js",
                other.trim_start_matches("./")
            )),
        })
    }

    #[test]
    fn test_accept_specifiers_resolved_to_served_ids() {
        let src = "if (import.meta.hot) {\n  import.meta.hot.accept(\"./foo\", cb);\n  import.meta.hot.accept('lib', cb);\n}";
        let out = plugin()
            .post_transform(src, "/project/dist/rewritten-app/components/a.gjs", &resolver)
            .unwrap();
        assert!(out.contains("import.meta.hot.accept(\"/components/foo.js\", cb);"));
        assert!(out.contains("import.meta.hot.accept(\"/@fs/project/node_modules/lib/index.js\", cb);"));
    }

    #[test]
    fn test_resolution_failure_propagates() {
        let src = "import.meta.hot.accept('./missing', cb);";
        let err = plugin()
            .post_transform(src, "/x/rewritten-app/a.hbs", &resolver)
            .unwrap_err();
        assert!(matches!(err, HmrError::Resolve { .. }));
    }

    #[test]
    fn test_routes_get_self_accept_footer() {
        let p = plugin();
        let out = p
            .post_transform("export default 1;", "/x/rewritten-app/routes/index.js", &resolver)
            .unwrap();
        assert!(out.starts_with("export default 1;\nif (import.meta.hot && window.emberHotReloadPlugin)"));
        assert!(out.contains("canAcceptNew(import.meta.url)"));
        assert!(out.contains("import.meta.hot.decline();"));

        let router = p
            .post_transform("x", "C:\\app\\rewritten-app\\router.ts?v=1", &resolver)
            .unwrap();
        assert!(router.contains("canAcceptNew"));

        let other = p.post_transform("x", "/x/rewritten-app/utils/a.js", &resolver).unwrap();
        assert_eq!(other, "x");
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let p = DevServerPlugin::new(HmrConfig::default());
        let src = "import.meta.hot.accept('./missing', cb);";
        assert_eq!(p.post_transform(src, "/x/rewritten-app/a.gjs", &resolver).unwrap(), src);
    }

    #[test]
    fn test_virtual_component_ids() {
        let id = virtual_component_id("@embroider/virtual/components/my-component", "default");
        assert_eq!(
            id,
            "ember-vite-hmr/virtual/component:embroider_virtual/components/my-component:default.gjs"
        );
        assert_eq!(
            parse_virtual_component_id(&format!("/{}", id)),
            Some((
                "@embroider/virtual/components/my-component".to_string(),
                "default".to_string()
            ))
        );
        assert_eq!(parse_virtual_component_id("/src/a.gjs"), None);
    }

    #[test]
    fn test_virtual_module_forwards_blocks() {
        let p = plugin();
        let id = virtual_component_id("/components/card.js", "Card");
        let module = p
            .virtual_component_module(&id, Some(r#"{{yield @title}}{{yield to="footer"}}"#))
            .unwrap();
        assert!(module.starts_with("import { Card as Target } from \"/components/card.js\";"));
        assert!(module.contains(
            "<Target ...attributes @title={{@title}}><:default as |p0|>{{yield p0}}</:default><:footer>{{yield to=\"footer\"}}</:footer></Target>"
        ));
        p.virtual_component_module(&virtual_component_id("/components/card.js", "default"), Some("{{yield}}"))
            .unwrap();
        p.virtual_component_module(&virtual_component_id("/components/other.js", "default"), Some("{{yield}}"))
            .unwrap();
        assert_eq!(p.shapes().len(), 3);

        p.on_file_changed("/project/dist/rewritten-app/components/card.js");
        assert_eq!(p.shapes().len(), 1);
    }

    #[test]
    fn test_wrapper_imports_point_at_served_ids() {
        let src = "if (Foo?.prototype instanceof GlimmerComponent) {\n\
                   \x20 (async () => {\n\
                   \x20   const c = await import(\"ember-vite-hmr/virtual/component:./foo:default.gjs\");\n\
                   \x20   template__imports__.Foo = c.default;\n\
                   \x20 })();\n\
                   \x20 import.meta.hot.accept(\"./foo\");\n\
                   }";
        let p = plugin();
        let out = p
            .post_transform(src, "/project/dist/rewritten-app/components/a.gjs", &resolver)
            .unwrap();
        let wrapper = "ember-vite-hmr/virtual/component:/components/foo.js:default.gjs";
        assert!(out.contains(&format!("await import(\"{}\");", wrapper)));
        assert!(out.contains("import.meta.hot.accept(\"/components/foo.js\");"));

        p.virtual_component_module(wrapper, Some("{{yield}}")).unwrap();
        assert_eq!(p.shapes().len(), 1);
        p.on_file_changed("/project/dist/rewritten-app/components/foo.js");
        assert!(p.shapes().is_empty());
    }

    #[test]
    fn test_unresolvable_wrapper_target_propagates() {
        let src = "import(\"ember-vite-hmr/virtual/component:./missing:default.gjs\");";
        let err = plugin()
            .post_transform(src, "/x/rewritten-app/a.gjs", &resolver)
            .unwrap_err();
        assert!(matches!(err, HmrError::Resolve { .. }));
    }

    #[test]
    fn test_virtual_module_without_template() {
        let module = plugin()
            .virtual_component_module(&virtual_component_id("a", "default"), None)
            .unwrap();
        assert!(module.contains("<template><Target ...attributes>{{yield}}</Target></template>"));
    }
}
