// crates/weavecore/src/events/mod.rs

mod bus;

pub use bus::{EventBus, EventEmitter, ExecutionEvent, NodeEvent};
