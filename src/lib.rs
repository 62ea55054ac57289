//! In-process dataflow engine.
//!
//! Nodes expose named sinks (inputs) and sources (outputs). A [`flow::Flow`]
//! indexes nodes, links sources to sinks, and runs the nodes that produce
//! values on their own. Emitting on a source hands the value to every linked
//! sink in its own task; handler failures go to an optional error sink.

pub mod config;
pub mod dispatch;
pub mod flow;
pub mod lifecycle;
pub mod logger;
pub mod message;
pub mod node;
pub mod nodes;
pub mod port;

pub use dispatch::DispatchError;
pub use flow::{Flow, FlowError, FlowPhase};
pub use message::Message;
pub use node::{Node, NodeError, Runner, ShutdownSignal};
pub use port::{Link, LinkEnd, Sink, SinkHandler, Source};
