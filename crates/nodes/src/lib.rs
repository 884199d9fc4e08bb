//! `nodes` crate — the `Executor` trait and built-in executor implementations.
//!
//! Every executor — built-in and plugin alike — must implement [`Executor`].
//! The engine crate dispatches step execution through this trait object; it
//! never names a concrete executor type itself (see `spec.md` §6).

pub mod command;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use command::{CommandBody, CommandExecutor};
pub use error::ExecutorError;
pub use registry::{ExecutorFactory, ExecutorRegistry, ExecutorSpec};
pub use traits::{Executor, ExecutorContext};
