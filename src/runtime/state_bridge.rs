//! Component-manager hook that carries instance state across hot swaps.
//!
//! A replacement component is created with a [`HotToken`] in its arguments.
//! The token remembers the instance it was last attached to; the new instance
//! copies that instance's state and then becomes the token's source, so the
//! next replacement reads from it in turn.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub type InstanceState = BTreeMap<String, Value>;

/// One property as found on an instance or its prototype chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Data { value: Value, writable: bool },
    Function,
    Accessor { value: Value, has_setter: bool },
}

pub trait HotInstance {
    /// Enumerable properties, own and inherited, with their current values.
    fn properties(&self) -> Vec<(String, Property)>;

    fn set_property(&mut self, key: &str, value: Value);

    /// Replaces the default shallow copy when present.
    fn custom_hot_state(&self) -> Option<InstanceState> {
        None
    }
}

/// Writable data properties and settable accessors; functions never.
pub fn shallow_state(instance: &dyn HotInstance) -> InstanceState {
    let mut state = InstanceState::new();
    for (key, property) in instance.properties() {
        match property {
            Property::Data {
                value,
                writable: true,
            } => {
                state.insert(key, value);
            }
            Property::Accessor {
                value,
                has_setter: true,
            } => {
                state.insert(key, value);
            }
            _ => {}
        }
    }
    state
}

fn capture(instance: &dyn HotInstance) -> InstanceState {
    instance
        .custom_hot_state()
        .unwrap_or_else(|| shallow_state(instance))
}

#[derive(Default)]
struct TokenState {
    source: Option<Rc<RefCell<dyn HotInstance>>>,
}

/// Correlation token threaded through re-instantiation.
#[derive(Clone, Default)]
pub struct HotToken(Rc<RefCell<TokenState>>);

impl HotToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of the instance this token was last attached to.
    pub fn get_state(&self) -> Option<InstanceState> {
        let token = self.0.borrow();
        let source = token.source.as_ref()?;
        let instance = source.borrow();
        Some(capture(&*instance))
    }

    fn attach(&self, instance: Rc<RefCell<dyn HotInstance>>) {
        self.0.borrow_mut().source = Some(instance);
    }
}

impl std::fmt::Debug for HotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotToken")
            .field("attached", &self.0.borrow().source.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComponentArgs {
    pub named: BTreeMap<String, Value>,
    pub hot: Option<HotToken>,
}

pub trait ComponentManager {
    type Instance: HotInstance + 'static;

    fn create(&self, args: &ComponentArgs) -> Rc<RefCell<Self::Instance>>;
}

/// Wraps a manager so created instances inherit their predecessor's state.
/// Without a token in the arguments this adds nothing but the check.
#[derive(Debug, Clone)]
pub struct HotComponentManager<M> {
    inner: M,
}

impl<M: ComponentManager> HotComponentManager<M> {
    pub fn new(inner: M) -> Self {
        HotComponentManager { inner }
    }
}

impl<M: ComponentManager> ComponentManager for HotComponentManager<M> {
    type Instance = M::Instance;

    fn create(&self, args: &ComponentArgs) -> Rc<RefCell<Self::Instance>> {
        let instance = self.inner.create(args);
        if let Some(token) = &args.hot {
            sync_state(&instance, token);
        }
        instance
    }
}

fn sync_state<I: HotInstance + 'static>(instance: &Rc<RefCell<I>>, token: &HotToken) {
    if let Some(state) = token.get_state() {
        let mut target = instance.borrow_mut();
        for (key, value) in state {
            target.set_property(&key, value);
        }
        tracing::debug!("restored hot state onto new instance");
    }
    let source: Rc<RefCell<dyn HotInstance>> = instance.clone();
    token.attach(source);
}
