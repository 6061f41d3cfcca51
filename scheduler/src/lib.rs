//! # Scheduler
//!
//! Task admission, lifecycle records and the generation task executor.
//!
//! - [`TaskScheduler`]: bounded FIFO admission, cancellation, registry
//!   queries and the task event bus
//! - [`TaskExecutor`]: the seam between the queue and the work it runs
//! - [`GenerationExecutor`]: context preparation, prompt assembly and
//!   resilient generation for writing tasks

pub mod executor;
pub mod generation;
pub mod prompts;
pub mod queue;
pub mod sink;

pub use executor::{ExecutionContext, TaskExecutor};
pub use generation::GenerationExecutor;
pub use prompts::{Prompt, build_prompt};
pub use queue::{TaskHandle, TaskReporter, TaskScheduler};
pub use sink::TaskLogSink;
