//! Request-scoped execution context shared by every node in one pipeline run.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use uuid::Uuid;

use crate::core::{PipeError, Result};
use crate::graph::NodeId;

/// Key into the context attribute map.
///
/// Node-private per-evaluation state is keyed by node identity; shared
/// cross-node resources use well-known names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKey {
    Node(NodeId),
    Named(String),
}

impl From<NodeId> for ContextKey {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<&str> for ContextKey {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for ContextKey {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// Teardown notification. Listeners are the sole mechanism by which shared
/// resources learn whether to commit or roll back.
pub trait ContextListener: Send {
    fn context_destroyed(&self, success: bool) -> Result<()>;
}

impl<F> ContextListener for F
where
    F: Fn(bool) -> Result<()> + Send,
{
    fn context_destroyed(&self, success: bool) -> Result<()> {
        self(success)
    }
}

struct ListenerState {
    listeners: Vec<Box<dyn ContextListener>>,
    destroyed: bool,
}

/// One instance per top-level pipeline invocation.
///
/// Carries shared resources and per-evaluation state that must survive across
/// node boundaries but not across invocations. Attribute access is safe from
/// concurrent node evaluations.
pub struct ExecutionContext {
    id: Uuid,
    attributes: Mutex<HashMap<ContextKey, Arc<dyn Any + Send + Sync>>>,
    listeners: Mutex<ListenerState>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            attributes: Mutex::new(HashMap::new()),
            listeners: Mutex::new(ListenerState {
                listeners: Vec::new(),
                destroyed: false,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Set an attribute. The last value set for a key wins.
    pub fn set_attribute<T>(&self, key: impl Into<ContextKey>, value: T) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        let mut attributes = self.attributes.lock()?;
        attributes.insert(key.into(), Arc::new(value));
        Ok(())
    }

    /// Get an attribute, downcast to the requested type.
    ///
    /// Returns `None` both when the key is absent and when the stored value
    /// has a different type.
    pub fn attribute<T>(&self, key: impl Into<ContextKey>) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        let attributes = self.attributes.lock()?;
        Ok(attributes
            .get(&key.into())
            .and_then(|value| Arc::clone(value).downcast::<T>().ok()))
    }

    /// Get an attribute, or insert the value produced by `init` if absent.
    ///
    /// The map lock is held across `init`, so concurrent first access from
    /// parallel branches resolves to a single stored value.
    pub fn attribute_or_insert<T, F>(&self, key: impl Into<ContextKey>, init: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let key = key.into();
        let mut attributes = self.attributes.lock()?;
        if let Some(existing) = attributes.get(&key) {
            if let Ok(typed) = Arc::clone(existing).downcast::<T>() {
                return Ok(typed);
            }
        }
        let value = Arc::new(init());
        attributes.insert(key, Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        Ok(value)
    }

    /// Register a teardown listener.
    ///
    /// Registration after [`destroy`](Self::destroy) is rejected: a listener
    /// is how a resource learns about commit/rollback, and one registered too
    /// late could never fire.
    pub fn add_listener(&self, listener: Box<dyn ContextListener>) -> Result<()> {
        let mut state = self.listeners.lock()?;
        if state.destroyed {
            return Err(PipeError::ContextDestroyed);
        }
        state.listeners.push(listener);
        Ok(())
    }

    /// Register a closure as a teardown listener.
    pub fn add_listener_fn<F>(&self, listener: F) -> Result<()>
    where
        F: Fn(bool) -> Result<()> + Send + 'static,
    {
        self.add_listener(Box::new(listener))
    }

    pub fn is_destroyed(&self) -> Result<bool> {
        Ok(self.listeners.lock()?.destroyed)
    }

    /// Destroy the context, running every registered listener in registration
    /// order with the overall success flag.
    ///
    /// Must be called exactly once after the pipeline terminates, whether it
    /// succeeded or not; repeat calls are no-ops. A failing listener does not
    /// prevent the remaining listeners from running: failures are collected
    /// and reported together after all listeners executed.
    pub fn destroy(&self, success: bool) -> Result<()> {
        let drained = {
            let mut state = self.listeners.lock()?;
            if state.destroyed {
                return Ok(());
            }
            state.destroyed = true;
            std::mem::take(&mut state.listeners)
        };

        debug!(
            "Destroying execution context {} (success: {}, {} listener(s))",
            self.id,
            success,
            drained.len()
        );

        let mut failures = Vec::new();
        for listener in &drained {
            if let Err(err) = listener.context_destroyed(success) {
                warn!("Context teardown listener failed: {}", err);
                failures.push(err.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipeError::Teardown(failures))
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
