use std::sync::{Arc, Mutex};
use tracing::info;

use crate::{
    message::Message,
    node::Node,
    port::{Sink, Source},
};

/// Logs everything that reaches its `sink` and keeps a copy.
/// Works as an error sink as well.
pub struct DebugNode {
    id: String,
    sink: Arc<Sink>,
    received: Arc<Mutex<Vec<Message>>>,
}

impl DebugNode {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let id = id.into();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let (id, received) = (id.clone(), received.clone());
            Sink::from_fn("sink", move |msg| {
                info!(node = %id, payload = %msg.payload(), "debug");
                received
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(msg);
                Ok(())
            })
        };
        Arc::new(Self { id, sink, received })
    }

    pub fn sink(&self) -> Arc<Sink> {
        self.sink.clone()
    }

    pub fn received(&self) -> Vec<Message> {
        self.received
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl Node for DebugNode {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn type_name(&self) -> String {
        "DebugNode".to_string()
    }

    fn sinks(&self) -> Vec<Arc<Sink>> {
        vec![self.sink.clone()]
    }

    fn sources(&self) -> Vec<Arc<Source>> {
        vec![]
    }
}
