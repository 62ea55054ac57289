use std::sync::{Arc, Mutex};
use tracing::info;

use crate::{
    node::{Node, NodeError},
    port::{Sink, Source},
};

/// A boolean device. `toggle` flips it, `set_state` sets it, and every
/// change is published on `state`. Starts off.
pub struct ToggleNode {
    id: String,
    current: Arc<Mutex<bool>>,
    toggle: Arc<Sink>,
    set_state: Arc<Sink>,
    state: Arc<Source>,
}

impl ToggleNode {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let id = id.into();
        let current = Arc::new(Mutex::new(false));
        let state = Source::new("state");

        let toggle = {
            let (id, current, state) = (id.clone(), current.clone(), state.clone());
            Sink::from_fn("toggle", move |_msg| {
                let mut on = current.lock().unwrap_or_else(|p| p.into_inner());
                *on = !*on;
                info!(node = %id, state = *on, "toggle");
                // emitting under the lock keeps emission order; delivery tasks are unordered
                state.emit(*on);
                Ok(())
            })
        };

        let set_state = {
            let (id, current, state) = (id.clone(), current.clone(), state.clone());
            Sink::from_fn("set_state", move |msg| {
                let value = msg.as_bool().ok_or_else(|| {
                    NodeError::InvalidInput("expected bool but did not get it".into())
                })?;
                let mut on = current.lock().unwrap_or_else(|p| p.into_inner());
                *on = value;
                info!(node = %id, state = *on, "set_state");
                state.emit(*on);
                Ok(())
            })
        };

        Arc::new(Self {
            id,
            current,
            toggle,
            set_state,
            state,
        })
    }

    pub fn is_on(&self) -> bool {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Node for ToggleNode {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn type_name(&self) -> String {
        "ToggleNode".to_string()
    }

    fn sinks(&self) -> Vec<Arc<Sink>> {
        vec![self.toggle.clone(), self.set_state.clone()]
    }

    fn sources(&self) -> Vec<Arc<Source>> {
        vec![self.state.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn test_toggle_flips_state() {
        let node = ToggleNode::new("led");
        assert!(!node.is_on());
        node.toggle.call(Message::new(serde_json::Value::Null)).await.unwrap();
        assert!(node.is_on());
        node.toggle.call(Message::new(serde_json::Value::Null)).await.unwrap();
        assert!(!node.is_on());
    }

    #[tokio::test]
    async fn test_set_state_rejects_non_bool() {
        let node = ToggleNode::new("led");
        node.set_state.call(Message::from(true)).await.unwrap();
        assert!(node.is_on());

        let err = node.set_state.call(Message::new("on")).await.unwrap_err();
        assert_eq!(err, NodeError::InvalidInput("expected bool but did not get it".into()));
        assert!(node.is_on());
    }

    #[test]
    fn test_ports() {
        let node = ToggleNode::new("led");
        let sinks: Vec<String> = node.sinks().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(sinks, vec!["toggle", "set_state"]);
        assert_eq!(node.sources()[0].name(), "state");
    }
}
