//! Ready-made nodes for wiring demos and tests.

pub mod debug;
pub mod timer;
pub mod toggle;

pub use debug::DebugNode;
pub use timer::TimerNode;
pub use toggle::ToggleNode;
