//! Command-line interface for workqueue.
//!
//! Provides commands for running engines, enqueueing tasks, sending realtime
//! messages and inspecting the queue.

mod commands;

pub use commands::{
    parse_cli, register_handlers, run, run_with_cli, Cli, Commands, LOG_TASK,
};
