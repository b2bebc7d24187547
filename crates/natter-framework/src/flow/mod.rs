//! Multi-turn conversational flows.
//!
//! A flow overlays a state machine ([`FlowDefinition`]) on the ordinary
//! message stream. The [`FlowEngine`] keeps at most one session per
//! (identifier, flow) pair and advances it as matching messages arrive.

mod definition;
mod engine;

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tower::service_fn;
use tower::util::BoxCloneSyncService;

pub use definition::{
    FlowBuilder, FlowDefinition, FlowState, MessagePredicate, StateBuilder, Transition, Trigger,
    VarsPredicate,
};
pub use engine::{FlowEngine, FlowOptions, FlowSummary, FlowTicket, SessionInfo};

use crate::error::BoxError;
use natter_core::{Address, BoxedMessenger, Identifier, Message, TransportResult};

// =============================================================================
// FlowVars
// =============================================================================

/// The shared variable map of one session.
#[derive(Clone, Default)]
pub struct FlowVars(Arc<Mutex<Map<String, Value>>>);

impl FlowVars {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(Arc::new(Mutex::new(map)))
    }

    /// Reads and deserializes a variable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.0.lock().get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.0.lock().get(key).cloned()
    }

    /// Serializes and stores a variable.
    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.0.lock().insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.lock().contains_key(key)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.0.lock().clone()
    }
}

impl std::fmt::Debug for FlowVars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FlowVars").field(&*self.0.lock()).finish()
    }
}

// =============================================================================
// FlowScope
// =============================================================================

/// What a state action sees.
#[derive(Clone)]
pub struct FlowScope {
    pub(crate) session_id: u64,
    pub(crate) flow: Arc<str>,
    pub(crate) state: String,
    pub(crate) owner: Identifier,
    pub(crate) message: Option<Message>,
    pub(crate) vars: FlowVars,
    pub(crate) messenger: BoxedMessenger,
}

impl FlowScope {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// Who started the session.
    pub fn owner(&self) -> &Identifier {
        &self.owner
    }

    /// The message that caused this state entry, if any.
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn vars(&self) -> &FlowVars {
        &self.vars
    }

    pub fn messenger(&self) -> &BoxedMessenger {
        &self.messenger
    }

    /// Sends `body` where the conversation is happening: back to the
    /// triggering message, else to the owner's room or the owner directly.
    pub async fn say(&self, body: impl Into<String>) -> TransportResult<()> {
        let body = body.into();
        match &self.message {
            Some(message) => self.messenger.reply(message, body).await,
            None => {
                let to = match self.owner.room() {
                    Some(room) => Address::Room(room.to_owned()),
                    None => Address::Person(self.owner.clone()),
                };
                self.messenger.send_text(to, body).await
            }
        }
    }
}

/// A state action: a boxed tower service over [`FlowScope`].
pub type FlowAction = BoxCloneSyncService<FlowScope, (), BoxError>;

/// Lifts an async closure into a [`FlowAction`].
pub fn action<F, Fut>(f: F) -> FlowAction
where
    F: Fn(FlowScope) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    BoxCloneSyncService::new(service_fn(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vars_roundtrip_typed_values() {
        let vars = FlowVars::default();
        vars.set("count", 3u32).unwrap();
        vars.set("names", vec!["a", "b"]).unwrap();
        assert_eq!(vars.get::<u32>("count"), Some(3));
        assert_eq!(vars.get::<Vec<String>>("names").unwrap(), vec!["a", "b"]);
        assert_eq!(vars.get::<u32>("names"), None);
        assert!(vars.contains("count"));
        assert_eq!(vars.remove("count"), Some(Value::from(3)));
        assert!(!vars.contains("count"));
    }

    #[test]
    fn test_vars_are_shared_between_clones() {
        let vars = FlowVars::default();
        let other = vars.clone();
        other.set("k", "v").unwrap();
        assert_eq!(vars.get::<String>("k").as_deref(), Some("v"));
    }
}
