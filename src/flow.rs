// src/flow.rs

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, RwLock},
};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::FlowSettings,
    dispatch::{Dispatcher, ErrorSinkSlot},
    lifecycle::Lifecycle,
    node::Node,
    port::{Link, Sink, Source},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("no node `{id}`")]
    UnknownNode { id: String },
    #[error("node `{node}` has no source `{port}`")]
    UnknownSource { node: String, port: String },
    #[error("node `{node}` has no sink `{port}`")]
    UnknownSink { node: String, port: String },
    #[error("no link from {source_node}.{source_port} to {sink_node}.{sink_port}")]
    LinkNotFound {
        source_node: String,
        source_port: String,
        sink_node: String,
        sink_port: String,
    },
    #[error("flow is already running")]
    AlreadyRunning,
    #[error("flow is not running")]
    NotRunning,
    #[error("no async runtime to run nodes on")]
    NoRuntime,
}

impl FlowError {
    pub fn is_unknown_node(&self) -> bool {
        matches!(self, FlowError::UnknownNode { .. })
    }

    pub fn is_unknown_port(&self) -> bool {
        matches!(self, FlowError::UnknownSource { .. } | FlowError::UnknownSink { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    /// Nodes may be registered; runners are idle.
    Configuring,
    /// Runners are live. Registration is refused, linking still works.
    Running,
}

/// The registry: nodes, their ports, the link topology and the run lifecycle.
pub struct Flow {
    nodes: DashMap<String, Arc<dyn Node>>,
    sinks: DashMap<String, HashMap<String, Arc<Sink>>>,
    sources: DashMap<String, HashMap<String, Arc<Source>>>,
    error_sink: ErrorSinkSlot,
    lifecycle: Mutex<Lifecycle>,
    settings: FlowSettings,
}

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}

impl Flow {
    pub fn new() -> Self {
        Self::with_settings(FlowSettings::default())
    }

    pub fn with_settings(settings: FlowSettings) -> Self {
        Flow {
            nodes: DashMap::new(),
            sinks: DashMap::new(),
            sources: DashMap::new(),
            error_sink: Arc::new(RwLock::new(None)),
            lifecycle: Mutex::new(Lifecycle::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> FlowPhase {
        if self.lifecycle().is_running() {
            FlowPhase::Running
        } else {
            FlowPhase::Configuring
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase() == FlowPhase::Running
    }

    /// Index `node` and every port it reports.
    ///
    /// Registering an id again replaces the previous node and its port
    /// indexes. Links already made to the old ports stay until unlinked.
    pub fn register_node(&self, node: Arc<dyn Node>) -> Result<(), FlowError> {
        if self.is_running() {
            return Err(FlowError::AlreadyRunning);
        }
        let id = node.id();
        info!("register {} {}", node.type_name(), id);
        if self.nodes.contains_key(&id) {
            warn!(node = %id, "node already registered, replacing it");
        }

        let mut sinks = HashMap::new();
        for sink in node.sinks() {
            debug!("\tSink {}", sink.name());
            sinks.insert(sink.name().to_string(), sink);
        }
        let mut sources = HashMap::new();
        for source in node.sources() {
            debug!("\tSource {}", source.name());
            source.attach(Dispatcher::new(self.error_sink.clone()));
            sources.insert(source.name().to_string(), source);
        }

        self.sinks.insert(id.clone(), sinks);
        self.sources.insert(id.clone(), sources);
        self.nodes.insert(id, node);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(id).map(|n| n.value().clone())
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.key().clone()).collect()
    }

    pub fn sink(&self, node_id: &str, name: &str) -> Option<Arc<Sink>> {
        self.sinks.get(node_id)?.get(name).cloned()
    }

    pub fn source(&self, node_id: &str, name: &str) -> Option<Arc<Source>> {
        self.sources.get(node_id)?.get(name).cloned()
    }

    pub fn sinks_of(&self, node_id: &str) -> Vec<Arc<Sink>> {
        self.sinks
            .get(node_id)
            .map(|ports| ports.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sources_of(&self, node_id: &str) -> Vec<Arc<Source>> {
        self.sources
            .get(node_id)
            .map(|ports| ports.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every link of every registered source.
    pub fn links(&self) -> Vec<Link> {
        self.sources
            .iter()
            .flat_map(|ports| ports.values().flat_map(|s| s.links()).collect::<Vec<_>>())
            .collect()
    }

    fn resolve_source(
        &self,
        node_id: &str,
        port: &str,
    ) -> Result<(Arc<dyn Node>, Arc<Source>), FlowError> {
        let node = self.node(node_id).ok_or_else(|| FlowError::UnknownNode {
            id: node_id.to_string(),
        })?;
        let source = self.source(node_id, port).ok_or_else(|| FlowError::UnknownSource {
            node: node_id.to_string(),
            port: port.to_string(),
        })?;
        Ok((node, source))
    }

    fn resolve_sink(
        &self,
        node_id: &str,
        port: &str,
    ) -> Result<(Arc<dyn Node>, Arc<Sink>), FlowError> {
        let node = self.node(node_id).ok_or_else(|| FlowError::UnknownNode {
            id: node_id.to_string(),
        })?;
        let sink = self.sink(node_id, port).ok_or_else(|| FlowError::UnknownSink {
            node: node_id.to_string(),
            port: port.to_string(),
        })?;
        Ok((node, sink))
    }

    /// Connect `source_node.source_port` to `sink_node.sink_port`.
    ///
    /// Linking the same pair twice gives two links and two deliveries per emission.
    pub fn link_node(
        &self,
        source_node: &str,
        source_port: &str,
        sink_node: &str,
        sink_port: &str,
    ) -> Result<(), FlowError> {
        let (from_node, source) = self.resolve_source(source_node, source_port)?;
        let (to_node, sink) = self.resolve_sink(sink_node, sink_port)?;
        let link = Link::new(from_node.as_ref(), &source, to_node.as_ref(), sink);
        info!("link {}", link);
        source.push_link(link);
        Ok(())
    }

    /// Remove one link previously made with the same arguments.
    ///
    /// The link is matched on the endpoints it recorded when it was made, so
    /// a link to a port that a re-registered node no longer has can still be
    /// removed. Dispatches already in flight keep their snapshot and still
    /// deliver.
    pub fn unlink_node(
        &self,
        source_node: &str,
        source_port: &str,
        sink_node: &str,
        sink_port: &str,
    ) -> Result<(), FlowError> {
        let (_, source) = self.resolve_source(source_node, source_port)?;
        if let Some(link) = source.remove_link(sink_node, sink_port) {
            info!("unlink {}", link);
            return Ok(());
        }
        self.resolve_sink(sink_node, sink_port)?;
        Err(FlowError::LinkNotFound {
            source_node: source_node.to_string(),
            source_port: source_port.to_string(),
            sink_node: sink_node.to_string(),
            sink_port: sink_port.to_string(),
        })
    }

    /// Route handler failures to `sink`, or drop them when `None`.
    pub fn set_error_sink(&self, sink: Option<Arc<Sink>>) {
        *self
            .error_sink
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = sink;
    }

    pub fn error_sink(&self) -> Option<Arc<Sink>> {
        self.error_sink
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run every runner-capable node until `stop`. Returns how many were started.
    pub fn start(&self) -> Result<usize, FlowError> {
        let nodes: Vec<Arc<dyn Node>> = self.nodes.iter().map(|n| n.value().clone()).collect();
        self.lifecycle().start(nodes)
    }

    /// Signal every runner to stop. Fire-and-forget.
    pub fn stop(&self) -> Result<(), FlowError> {
        self.lifecycle().stop().map(|_| ())
    }

    /// Stop, then wait for the runners for up to the configured stop timeout,
    /// aborting any that have not exited. Returns the ids of aborted runners.
    pub async fn shutdown(&self) -> Result<Vec<String>, FlowError> {
        let stopped = self.lifecycle().stop()?;
        Ok(stopped.join(self.settings.stop_timeout).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::node::NodeError;

    struct Ports {
        id: String,
        sinks: Vec<Arc<Sink>>,
        sources: Vec<Arc<Source>>,
    }

    impl Ports {
        fn new(id: &str, sinks: &[&str], sources: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                sinks: sinks
                    .iter()
                    .map(|name| Sink::from_fn(*name, |_msg: Message| Ok::<(), NodeError>(())))
                    .collect(),
                sources: sources.iter().map(|name| Source::new(*name)).collect(),
            })
        }
    }

    impl Node for Ports {
        fn id(&self) -> String {
            self.id.clone()
        }
        fn type_name(&self) -> String {
            "Ports".into()
        }
        fn sinks(&self) -> Vec<Arc<Sink>> {
            self.sinks.clone()
        }
        fn sources(&self) -> Vec<Arc<Source>> {
            self.sources.clone()
        }
    }

    fn two_nodes() -> Flow {
        let flow = Flow::new();
        flow.register_node(Ports::new("a", &[], &["out"])).unwrap();
        flow.register_node(Ports::new("b", &["in", "other"], &[])).unwrap();
        flow
    }

    #[test]
    fn test_register_indexes_ports() {
        let flow = Flow::new();
        flow.register_node(Ports::new("n", &["s1", "s2", "s3"], &["o1", "o2"]))
            .unwrap();

        assert_eq!(flow.sinks_of("n").len(), 3);
        assert_eq!(flow.sources_of("n").len(), 2);
        for name in ["s1", "s2", "s3"] {
            assert_eq!(flow.sink("n", name).unwrap().name(), name);
        }
        for name in ["o1", "o2"] {
            assert_eq!(flow.source("n", name).unwrap().name(), name);
        }
        assert!(flow.sink("n", "o1").is_none());
        assert!(flow.node("n").is_some());
    }

    #[test]
    fn test_same_port_name_on_different_nodes() {
        let flow = Flow::new();
        flow.register_node(Ports::new("x", &["in"], &[])).unwrap();
        flow.register_node(Ports::new("y", &["in"], &[])).unwrap();
        let x = flow.sink("x", "in").unwrap();
        let y = flow.sink("y", "in").unwrap();
        assert!(!Arc::ptr_eq(&x, &y));
    }

    #[test]
    fn test_reregister_replaces_port_index() {
        let flow = Flow::new();
        flow.register_node(Ports::new("n", &["old"], &["out"])).unwrap();
        flow.register_node(Ports::new("n", &["new"], &[])).unwrap();

        assert!(flow.sink("n", "old").is_none());
        assert!(flow.sink("n", "new").is_some());
        assert!(flow.sources_of("n").is_empty());
        assert_eq!(flow.node_ids(), vec!["n".to_string()]);
    }

    #[test]
    fn test_link_errors() {
        let flow = two_nodes();

        let err = flow.link_node("zz", "out", "b", "in").unwrap_err();
        assert!(err.is_unknown_node());
        let err = flow.link_node("a", "out", "zz", "in").unwrap_err();
        assert!(err.is_unknown_node());
        let err = flow.link_node("a", "nope", "b", "in").unwrap_err();
        assert!(err.is_unknown_port());
        assert_eq!(err.to_string(), "node `a` has no source `nope`");
        let err = flow.link_node("a", "out", "b", "nope").unwrap_err();
        assert!(err.is_unknown_port());
        assert!(flow.links().is_empty());
    }

    #[test]
    fn test_duplicate_links_are_kept() {
        let flow = two_nodes();
        flow.link_node("a", "out", "b", "in").unwrap();
        flow.link_node("a", "out", "b", "in").unwrap();
        assert_eq!(flow.source("a", "out").unwrap().links().len(), 2);
        assert_eq!(flow.links().len(), 2);
    }

    #[test]
    fn test_unlink() {
        let flow = two_nodes();
        flow.link_node("a", "out", "b", "in").unwrap();
        flow.link_node("a", "out", "b", "other").unwrap();

        flow.unlink_node("a", "out", "b", "in").unwrap();
        let links = flow.source("a", "out").unwrap().links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].sink().port, "other");

        let err = flow.unlink_node("a", "out", "b", "in").unwrap_err();
        assert!(matches!(err, FlowError::LinkNotFound { .. }));
        assert!(flow.unlink_node("zz", "out", "b", "in").unwrap_err().is_unknown_node());
        assert!(flow.unlink_node("a", "out", "b", "nope").unwrap_err().is_unknown_port());
    }

    #[tokio::test]
    async fn test_unlink_port_dropped_by_reregister() {
        let flow = Flow::new();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = hits.clone();
        flow.register_node(Ports::new("a", &[], &["out"])).unwrap();
        flow.register_node(Arc::new(Ports {
            id: "b".into(),
            sinks: vec![Sink::from_fn("old", move |_msg: Message| {
                counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<(), NodeError>(())
            })],
            sources: vec![],
        }))
        .unwrap();
        flow.link_node("a", "out", "b", "old").unwrap();
        flow.register_node(Ports::new("b", &["new"], &[])).unwrap();
        assert!(flow.sink("b", "old").is_none());

        flow.unlink_node("a", "out", "b", "old").unwrap();
        assert!(flow.source("a", "out").unwrap().links().is_empty());

        flow.source("a", "out").unwrap().emit(true);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);

        // nothing left to match, so the missing port is reported
        let err = flow.unlink_node("a", "out", "b", "old").unwrap_err();
        assert_eq!(
            err,
            FlowError::UnknownSink {
                node: "b".into(),
                port: "old".into()
            }
        );
    }

    #[test]
    fn test_error_sink_slot() {
        let flow = Flow::new();
        assert!(flow.error_sink().is_none());
        flow.set_error_sink(Some(Sink::from_fn("errors", |_msg: Message| Ok::<(), NodeError>(()))));
        assert_eq!(flow.error_sink().unwrap().name(), "errors");
        flow.set_error_sink(None);
        assert!(flow.error_sink().is_none());
    }

    #[tokio::test]
    async fn test_phase_gates_registration() {
        let flow = two_nodes();
        assert_eq!(flow.phase(), FlowPhase::Configuring);
        assert_eq!(flow.start().unwrap(), 0);
        assert_eq!(flow.phase(), FlowPhase::Running);

        let err = flow.register_node(Ports::new("c", &[], &[])).unwrap_err();
        assert_eq!(err, FlowError::AlreadyRunning);
        // linking stays available while running
        flow.link_node("a", "out", "b", "in").unwrap();

        flow.stop().unwrap();
        assert_eq!(flow.phase(), FlowPhase::Configuring);
        assert_eq!(flow.stop().unwrap_err(), FlowError::NotRunning);
        flow.register_node(Ports::new("c", &[], &[])).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let flow = Flow::new();
        assert_eq!(flow.shutdown().await.unwrap_err(), FlowError::NotRunning);
    }
}
