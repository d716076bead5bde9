//! Caches that live for the whole dev-server process.
//!
//! Both are keyed by module id and invalidated per module on file change.
//! Entries are dropped and recomputed on the next access, never refreshed
//! eagerly.

use crate::template::ast::{Expression, LiteralKind, PathHead, PathExpression};
use crate::template::parse_template;
use crate::visitor::{walk_invocation, Invocation, NodePath, Role, TemplateVisitor};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════════════
// YIELD SHAPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Which blocks a component yields to, so a pass-through wrapper can forward
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldShape {
    pub has_default: bool,
    pub has_inverse: bool,
    /// Named blocks other than `default`, `inverse` and `else`, with the
    /// largest number of values yielded to each.
    pub named_blocks: BTreeMap<String, usize>,
    /// Largest number of values yielded to the default block.
    pub default_params: usize,
    /// `@arg` names the component reads.
    pub args: BTreeSet<String>,
}

impl YieldShape {
    pub fn from_template(source: &str) -> Option<Self> {
        let mut template = parse_template(source).ok()?;
        let mut collector = YieldCollector::default();
        collector.visit_template(&mut template);
        Some(collector.shape)
    }

    fn add_block(&mut self, name: &str, params: usize) {
        match name {
            "default" => {
                self.has_default = true;
                self.default_params = self.default_params.max(params);
            }
            "inverse" | "else" => self.has_inverse = true,
            other => {
                let count = self.named_blocks.entry(other.to_string()).or_insert(0);
                *count = (*count).max(params);
            }
        }
    }
}

#[derive(Default)]
struct YieldCollector {
    shape: YieldShape,
}

impl TemplateVisitor for YieldCollector {
    fn visit_invocation(&mut self, call: Invocation<'_>, parent: &NodePath<'_>) {
        if let Some(callee) = call.path.as_path() {
            match callee.original.as_str() {
                "yield" => {
                    let target = match call.hash.get("to") {
                        Some(Expression::Literal(lit)) => match &lit.kind {
                            LiteralKind::String(s) => s.clone(),
                            _ => "default".to_string(),
                        },
                        _ => "default".to_string(),
                    };
                    self.shape.add_block(&target, call.params.len());
                }
                "has-block" | "has-block-params" | "hasBlock" | "hasBlockParams" => {
                    let target = call
                        .params
                        .first()
                        .and_then(Expression::as_string_literal)
                        .unwrap_or("default")
                        .to_string();
                    self.shape.add_block(&target, 0);
                }
                _ => {}
            }
        }
        walk_invocation(self, call, parent);
    }

    fn visit_path_expression(&mut self, path: &mut PathExpression, _role: Role, _parent: &NodePath<'_>) {
        if let PathHead::AtName(name) = &path.head {
            self.shape.args.insert(name.clone());
        }
    }
}

#[derive(Debug, Clone)]
struct ShapeEntry {
    hash: String,
    shape: Arc<YieldShape>,
}

/// Module id -> yield shape of its template, keyed on the template's content
/// hash so a stale entry is never served.
#[derive(Debug, Default)]
pub struct YieldShapeCache {
    entries: DashMap<String, ShapeEntry>,
}

impl YieldShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached shape for `module_id`, recomputed when `template` changed.
    /// `None` when the template does not parse.
    pub fn get_or_compute(&self, module_id: &str, template: &str) -> Option<Arc<YieldShape>> {
        let hash = compute_hash(template);
        if let Some(entry) = self.entries.get(module_id) {
            if entry.hash == hash {
                return Some(entry.shape.clone());
            }
        }
        let shape = Arc::new(YieldShape::from_template(template)?);
        tracing::debug!(module = %module_id, "computed yield shape");
        self.entries.insert(
            module_id.to_string(),
            ShapeEntry {
                hash,
                shape: shape.clone(),
            },
        );
        Some(shape)
    }

    pub fn invalidate(&self, module_id: &str) -> bool {
        self.entries.remove(module_id).is_some()
    }

    /// Drops the entry for `module_id` and every per-export entry
    /// (`<module_id>:<export>`) under it. Returns how many were removed.
    pub fn invalidate_module(&self, module_id: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let stale = key == module_id
                || key
                    .strip_prefix(module_id)
                    .and_then(|rest| rest.strip_prefix(':'))
                    .map_or(false, |export| !export.is_empty() && !export.contains(['/', ':']));
            if stale {
                removed += 1;
            }
            !stale
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE VERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Latest accepted version of each hot-swappable module.
///
/// `current` starts at 1 and is bumped once per batch of accepted modules.
#[derive(Debug)]
pub struct ModuleVersionMap {
    current: AtomicU64,
    accepted: DashMap<String, u64>,
}

impl Default for ModuleVersionMap {
    fn default() -> Self {
        ModuleVersionMap {
            current: AtomicU64::new(1),
            accepted: DashMap::new(),
        }
    }
}

impl ModuleVersionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Stamps `module_id` with the current version and returns it.
    pub fn accept(&self, module_id: &str) -> u64 {
        let version = self.current();
        self.accepted.insert(module_id.to_string(), version);
        version
    }

    pub fn version_of(&self, module_id: &str) -> Option<u64> {
        self.accepted.get(module_id).map(|v| *v)
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.accepted.contains_key(module_id)
    }

    pub fn invalidate(&self, module_id: &str) -> bool {
        self.accepted.remove(module_id).is_some()
    }

    /// Starts a new version; returns it.
    pub fn bump(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }
}
