//! Route and controller side of hot swapping.
//!
//! While hot reload is active the router looks routes up as
//! `<name>--hot-version--<n>`, so a bumped version forces a fresh lookup. The
//! resolver strips the suffix again, container caches for swappable types are
//! evicted when a module is replaced, and route state is carried across the
//! re-resolution by route name.

use crate::cache::ModuleVersionMap;
use crate::runtime::state_bridge::{shallow_state, HotInstance, InstanceState};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const HOT_VERSION_SEPARATOR: &str = "--hot-version--";

/// Container key prefixes dropped when any module is replaced.
pub const EVICTED_TYPES: &[&str] = &["route", "controller", "template", "modifier", "helper", "component"];

lazy_static! {
    static ref DEV_SERVER_ORIGIN_RE: Regex = Regex::new(r"^https?://[^/]*/").unwrap();
    static ref ROUTE_MODULE_RE: Regex = Regex::new(r"(controller\.(js|ts)|route\.(js|ts|gts))$").unwrap();
}

/// `name` without its hot-version suffix.
pub fn strip_hot_version(name: &str) -> &str {
    match name.find(HOT_VERSION_SEPARATOR) {
        Some(at) => &name[..at],
        None => name,
    }
}

pub fn versioned_name(name: &str, version: u64) -> String {
    format!("{}{}{}", strip_hot_version(name), HOT_VERSION_SEPARATOR, version)
}

/// The framework's resolver.
pub trait Resolver {
    type Output;

    fn resolve(&self, name: &str) -> Option<Self::Output>;
}

/// Resolver that ignores hot-version suffixes.
#[derive(Debug, Clone)]
pub struct HotResolver<R> {
    inner: R,
}

impl<R: Resolver> HotResolver<R> {
    pub fn new(inner: R) -> Self {
        HotResolver { inner }
    }
}

impl<R: Resolver> Resolver for HotResolver<R> {
    type Output = R::Output;

    fn resolve(&self, name: &str) -> Option<Self::Output> {
        self.inner.resolve(strip_hot_version(name))
    }
}

pub fn is_evictable_key(key: &str) -> bool {
    match key.split_once(':') {
        Some((kind, _)) => EVICTED_TYPES.contains(&kind),
        None => false,
    }
}

/// Drops every swappable-type entry from one container cache. Returns how
/// many were removed.
pub fn evict_hot_entries<V>(cache: &mut BTreeMap<String, V>) -> usize {
    let before = cache.len();
    cache.retain(|key, _| !is_evictable_key(key));
    before - cache.len()
}

/// Module id as the runtime tracks it: no query, no dev-server origin.
pub fn module_id_from_url(url: &str) -> String {
    let path = url.split('?').next().unwrap_or(url);
    DEV_SERVER_ORIGIN_RE.replace(path, "").into_owned()
}

/// Whether a replaced module can be swapped in place: routes, routers,
/// controllers and route templates, but not component templates.
pub fn can_accept_module(module_id: &str) -> bool {
    let swappable = ["/routes/", "/routers/", "/controllers/", "/templates/"]
        .iter()
        .any(|d| module_id.contains(d))
        || ROUTE_MODULE_RE.is_match(module_id);
    swappable && !(module_id.contains("templates") && module_id.contains("components"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleChange {
    pub module_id: String,
    pub old_version: u64,
    pub new_version: u64,
}

/// Accept bookkeeping behind `canAcceptNew`.
///
/// Modules accepted while others are still loading are batched; the batch is
/// released by `notify_new` once the last pending load finishes.
#[derive(Debug, Default)]
pub struct HotReloadRegistry {
    versions: ModuleVersionMap,
    accepting: AtomicUsize,
    changed: DashMap<String, ModuleChange>,
}

impl HotReloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.versions.current()
    }

    /// Marks the start of loading a replacement module.
    pub fn begin_accept(&self) {
        self.accepting.fetch_add(1, Ordering::SeqCst);
    }

    /// Decides on a loaded replacement. Returns the verdict and whether this
    /// was the last pending load, in which case the caller should
    /// [`notify_new`](Self::notify_new).
    pub fn finish_accept(&self, module_url: &str) -> (bool, bool) {
        let previous = self
            .accepting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or_else(|n| n);
        let remaining = previous.saturating_sub(1);
        let settle = remaining == 0;

        let module_id = module_id_from_url(module_url);
        if !can_accept_module(&module_id) {
            return (false, settle);
        }
        let current = self.versions.current();
        match self.versions.version_of(&module_id) {
            Some(old_version) => {
                self.changed.insert(
                    module_id.clone(),
                    ModuleChange {
                        module_id: module_id.clone(),
                        old_version,
                        new_version: current,
                    },
                );
            }
            None => {
                self.versions.accept(&module_id);
            }
        }
        (true, settle)
    }

    /// Bumps the version and hands out the batched changes, each replaced
    /// module stamped with the new version.
    pub fn notify_new(&self) -> Vec<ModuleChange> {
        let version = self.versions.bump();
        let keys: Vec<String> = self.changed.iter().map(|e| e.key().clone()).collect();
        let mut changes: Vec<ModuleChange> = keys
            .into_iter()
            .filter_map(|k| self.changed.remove(&k).map(|(_, change)| change))
            .collect();
        changes.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        for change in &mut changes {
            change.new_version = version;
            self.versions.accept(&change.module_id);
        }
        tracing::debug!(changes = changes.len(), version = self.version(), "released hot changes");
        changes
    }

    /// Router lookup name for `route` under the current version.
    pub fn route_lookup_name(&self, route: &str) -> String {
        versioned_name(route, self.version())
    }
}

/// Whether replacing this module needs a router refresh to show up.
pub fn needs_router_refresh(module_id: &str, pod_prefix: Option<&str>) -> bool {
    if module_id.contains("/routes/") || module_id.contains("/controllers/") {
        return true;
    }
    if let Some(rest) = module_id.strip_prefix("./templates/") {
        return !rest.starts_with("components/");
    }
    pod_prefix.map_or(false, |p| module_id.starts_with(&format!("./{}/", p)))
}

/// Route and controller state captured before re-resolution, keyed by route
/// name without version suffix.
#[derive(Debug, Default)]
pub struct RouteStateCache {
    states: BTreeMap<String, InstanceState>,
}

impl RouteStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture(&mut self, route: &str, instance: &dyn HotInstance) {
        let state = instance
            .custom_hot_state()
            .unwrap_or_else(|| shallow_state(instance));
        self.states.insert(strip_hot_version(route).to_string(), state);
    }

    /// Copies the captured state onto a freshly resolved instance. The entry
    /// is consumed.
    pub fn restore(&mut self, route: &str, instance: &mut dyn HotInstance) -> bool {
        match self.states.remove(strip_hot_version(route)) {
            Some(state) => {
                for (key, value) in state {
                    instance.set_property(&key, value);
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
