//! Coordinator core for the Disk Striping System: wire codec, peer registry,
//! disk allocator, array directory and the request dispatcher.
#![allow(clippy::cargo_common_metadata)]

pub mod allocator;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;

pub use dispatcher::{Coordinator, CoordinatorConfig, CoordinatorStats};
pub use error::{DssError, Result};
