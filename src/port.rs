use std::{
    fmt,
    sync::{Arc, Mutex, RwLock},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    dispatch::Dispatcher,
    message::Message,
    node::{Node, NodeError},
};

/// The work done when a value arrives at a sink.
#[async_trait]
pub trait SinkHandler: Send + Sync {
    async fn handle(&self, msg: Message) -> Result<(), NodeError>;
}

/// Plain closures are handlers too.
#[async_trait]
impl<F> SinkHandler for F
where
    F: Fn(Message) -> Result<(), NodeError> + Send + Sync,
{
    async fn handle(&self, msg: Message) -> Result<(), NodeError> {
        (self)(msg)
    }
}

/// A named input port.
pub struct Sink {
    name: String,
    handler: Arc<dyn SinkHandler>,
}

impl Sink {
    pub fn new<H>(name: impl Into<String>, handler: H) -> Arc<Self>
    where
        H: SinkHandler + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            handler: Arc::new(handler),
        })
    }

    /// Sink backed by a synchronous closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Arc<Self>
    where
        F: Fn(Message) -> Result<(), NodeError> + Send + Sync + 'static,
    {
        Self::new(name, f)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the handler in the caller's task.
    pub async fn call(&self, msg: Message) -> Result<(), NodeError> {
        self.handler.handle(msg).await
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").field("name", &self.name).finish()
    }
}

/// A named output port and the links fanning out of it.
pub struct Source {
    name: String,
    links: Mutex<Vec<Link>>,
    dispatcher: RwLock<Dispatcher>,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            links: Mutex::new(Vec::new()),
            dispatcher: RwLock::new(Dispatcher::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current outgoing links.
    pub fn links(&self) -> Vec<Link> {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Send `msg` to every linked sink. Never blocks and never fails; handler
    /// errors go to the flow's error sink.
    pub fn emit(&self, msg: impl Into<Message>) {
        let links = self.links();
        let dispatcher = self
            .dispatcher
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        dispatcher.dispatch(links, msg.into());
    }

    pub(crate) fn attach(&self, dispatcher: Dispatcher) {
        *self
            .dispatcher
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = dispatcher;
    }

    pub(crate) fn push_link(&self, link: Link) {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(link);
    }

    /// Removes the first link targeting `sink_node`/`sink_port`.
    pub(crate) fn remove_link(&self, sink_node: &str, sink_port: &str) -> Option<Link> {
        let mut links = self
            .links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let pos = links
            .iter()
            .position(|l| l.sink.node_id == sink_node && l.sink.port == sink_port)?;
        Some(links.remove(pos))
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("links", &self.links().len())
            .finish()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One side of a link: which node, what kind, which port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEnd {
    pub node_id: String,
    pub node_type: String,
    pub port: String,
}

impl LinkEnd {
    fn of(node: &dyn Node, port: &str) -> Self {
        Self {
            node_id: node.id(),
            node_type: node.type_name(),
            port: port.to_string(),
        }
    }
}

impl fmt::Display for LinkEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})->{}", self.node_type, self.node_id, self.port)
    }
}

/// A directed edge from a source port to a sink port.
///
/// Holds the target sink itself so dispatch needs no registry lookup.
#[derive(Clone)]
pub struct Link {
    source: LinkEnd,
    sink: LinkEnd,
    target: Arc<Sink>,
}

impl Link {
    pub(crate) fn new(
        source_node: &dyn Node,
        source: &Source,
        sink_node: &dyn Node,
        sink: Arc<Sink>,
    ) -> Self {
        Self {
            source: LinkEnd::of(source_node, source.name()),
            sink: LinkEnd::of(sink_node, sink.name()),
            target: sink,
        }
    }

    pub fn source(&self) -> &LinkEnd {
        &self.source
    }

    pub fn sink(&self) -> &LinkEnd {
        &self.sink
    }

    pub(crate) fn target(&self) -> &Arc<Sink> {
        &self.target
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("source", &self.source)
            .field("sink", &self.sink)
            .finish()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.source, self.sink)
    }
}
