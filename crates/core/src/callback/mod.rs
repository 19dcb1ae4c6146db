//! Waiters for long-running remote work.

mod command;
mod latch;
mod process;
mod registration;

pub use command::{CommandCallback, CommandObserver};
pub use process::{ProcessCallback, ProcessOutcome};
