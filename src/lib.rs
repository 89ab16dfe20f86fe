//! Sparse, quantum-addressed in-memory byte stores.
//!
//! Each [`SparseStore`] maps a linear byte address space onto a chain of nodes,
//! each node holding `qset` slots of `quantum`-byte blocks drawn from a shared
//! [`BlockPool`]. Blocks appear on first write; never-written ranges are holes.
//! A [`DeviceSet`] groups numbered stores and hands out cursor-carrying
//! [`Handle`]s, and a [`CompletionQueue`] runs requests inline or after a delay.

pub mod completion;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod store;

pub use completion::{Completion, CompletionQueue, Outcome, Request, RequestState};
pub use config::DeviceConfig;
pub use control::ControlOp;
pub use device::{DeviceSet, Handle, OpenMode};
pub use error::{Error, Result};
pub use pool::{Block, BlockPool};
pub use store::{Layout, MappedView, SparseStore, Store, Whence};
