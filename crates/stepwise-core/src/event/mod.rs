//! Activation sources.
//!
//! The `EventBus` carries every inbound `Activation` (domain events and
//! schedule ticks) to whoever routes them.

pub mod bus;

pub use bus::EventBus;
