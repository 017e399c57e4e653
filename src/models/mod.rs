//! Domain models shared across the bridge.

pub mod event;
pub mod key;
pub mod run;
