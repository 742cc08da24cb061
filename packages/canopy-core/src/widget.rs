use crate::host::HostBinding;
use crate::rendering::NodeId;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

pub type WidgetError = Box<dyn std::error::Error + Send + Sync>;

/// A host-native component rendered from a `widget` rendering.
pub trait WidgetCapability<H: HostBinding>: Send + Sync {
    fn create(&self, host: &mut H, id: &NodeId, props: &Value) -> Result<H::Node, WidgetError>;

    /// Applies new props to a live widget. Widgets without updatable state can ignore this.
    fn reconcile(
        &self,
        _host: &mut H,
        _node: &H::Node,
        _props: &Value,
    ) -> Result<(), WidgetError> {
        Ok(())
    }

    fn dispose(&self, _host: &mut H, _node: &H::Node) {}
}

/// Widget capabilities by name. Built once and handed to the reconciler.
pub struct WidgetRegistry<H: HostBinding> {
    widgets: FxHashMap<String, Arc<dyn WidgetCapability<H>>>,
}

impl<H: HostBinding> Default for WidgetRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HostBinding> WidgetRegistry<H> {
    pub fn new() -> Self {
        Self {
            widgets: FxHashMap::default(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, widget: Arc<dyn WidgetCapability<H>>) {
        let name = name.into();
        if self.widgets.insert(name.clone(), widget).is_some() {
            tracing::warn!(widget = %name, "replacing registered widget");
        }
    }

    pub fn with(mut self, name: impl Into<String>, widget: Arc<dyn WidgetCapability<H>>) -> Self {
        self.register(name, widget);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn WidgetCapability<H>>> {
        self.widgets.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.widgets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}
