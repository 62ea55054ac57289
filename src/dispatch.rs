use std::{
    fmt,
    sync::{Arc, RwLock},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{Instrument, error, info_span, trace, warn};

use crate::{
    message::Message,
    node::NodeError,
    port::{Link, Sink},
};

/// Metadata key on an error record message holding the id of the message
/// whose delivery failed.
pub const CAUSE_ID_KEY: &str = "cause_id";

/// Record of a sink handler failure, delivered to the flow's error sink.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DispatchError {
    pub source_node_id: String,
    pub source_node_type: String,
    pub source_port: String,
    pub sink_node_id: String,
    pub sink_node_type: String,
    pub sink_port: String,
    pub error: NodeError,
}

impl DispatchError {
    fn new(link: &Link, error: NodeError) -> Self {
        let source = link.source();
        let sink = link.sink();
        Self {
            source_node_id: source.node_id.clone(),
            source_node_type: source.node_type.clone(),
            source_port: source.port.clone(),
            sink_node_id: sink.node_id.clone(),
            sink_node_type: sink.node_type.clone(),
            sink_port: sink.port.clone(),
            error,
        }
    }

    /// Recover the record from a message delivered to an error sink.
    pub fn from_message(msg: &Message) -> Option<Self> {
        serde_json::from_value(msg.payload().clone()).ok()
    }

    fn to_message(&self, cause_id: String) -> Message {
        let mut msg = match serde_json::to_value(self) {
            Ok(value) => Message::new(value),
            Err(err) => Message::new(err.to_string()),
        };
        msg.add(CAUSE_ID_KEY.to_string(), cause_id);
        msg
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error {}({})->{} -> {}({})->{}: {}",
            self.source_node_id,
            self.source_node_type,
            self.source_port,
            self.sink_node_id,
            self.sink_node_type,
            self.sink_port,
            self.error
        )
    }
}

impl std::error::Error for DispatchError {}

/// Slot shared by a flow and every source registered with it.
pub(crate) type ErrorSinkSlot = Arc<RwLock<Option<Arc<Sink>>>>;

/// Fans an emitted value out to the links of one source.
///
/// Every link gets its own task. There is no ordering between them, no
/// bound on how many run at once, and no back-pressure.
#[derive(Clone, Default)]
pub struct Dispatcher {
    error_sink: ErrorSinkSlot,
}

impl Dispatcher {
    pub(crate) fn new(error_sink: ErrorSinkSlot) -> Self {
        Self { error_sink }
    }

    fn error_sink(&self) -> Option<Arc<Sink>> {
        self.error_sink
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn dispatch(&self, links: Vec<Link>, msg: Message) {
        if links.is_empty() {
            return;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    message_id = %msg.id(),
                    "no async runtime available, dropping value for {} link(s)",
                    links.len()
                );
                return;
            }
        };

        for link in links {
            let msg = msg.clone();
            let errors = self.clone();
            let span = info_span!(
                "dispatch",
                source = %link.source(),
                sink = %link.sink(),
            );
            handle.spawn(
                async move {
                    let cause_id = msg.id();
                    match link.target().call(msg).await {
                        Ok(()) => trace!("delivered"),
                        Err(err) => {
                            errors.report(DispatchError::new(&link, err), cause_id).await
                        }
                    }
                }
                .instrument(span),
            );
        }
    }

    async fn report(&self, record: DispatchError, cause_id: String) {
        warn!(%record, %cause_id, "sink handler failed");
        let Some(sink) = self.error_sink() else {
            return;
        };
        if let Err(err) = sink.call(record.to_message(cause_id)).await {
            error!(error_sink = sink.name(), %err, "error sink failed");
        }
    }
}
