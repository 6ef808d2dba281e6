//! # libime-demo
//!
//! A small input method built on libime-core, and a driver that runs it on the
//! in-memory host. Letters compose upper-cased text; Space or Enter commits.

pub mod config;
pub mod driver;
pub mod ime;
pub mod input_buffer;

pub use config::DemoConfig;
pub use driver::{parse_keys, Command, Demo, Snapshot};
pub use ime::{create_service, DemoIme, DemoState};
pub use input_buffer::InputBuffer;
