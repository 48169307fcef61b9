//! In-process publish/subscribe for orchestration lifecycle events.

pub mod bus;

pub use bus::EventBus;
