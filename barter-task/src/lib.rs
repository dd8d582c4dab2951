//! Persistent, cooperatively scheduled state machines for long-running trading strategies.
//!
//! # Key Components
//!
//! - [`TaskContext`]: Versioned, immutable record of a task's identity, state, error and
//!   metadata, replaced only via [`TaskContext::evolve`].
//! - [`TaskLogic`]: Per task kind handlers, dispatched on a closed phase enum.
//! - [`BaseTradingTask`]: Driver exposing a single [`BaseTradingTask::execute_once`] step for
//!   an external scheduler, plus save / restore for crash recovery.
//! - [`ContextStore`]: Persistence of serialised contexts keyed by [`TaskId`].
//! - [`TaskRunner`] & [`recover_tasks`]: Drive a task to completion, and rebuild tasks after
//!   a restart, quarantining payloads that cannot be restored.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut task = BaseTradingTask::new(MyStrategy::new(), None, TaskConfig::default());
//!
//! loop {
//!     let step = task.execute_once().await?;
//!     store.save(task.task_id(), task.save_context()?).await?;
//!     if !step.should_continue {
//!         break;
//!     }
//!     tokio::time::sleep(step.next_delay).await;
//! }
//! ```

/// [`TaskContext`], [`TaskId`] and the typed [`ContextPatch`].
pub mod context;

/// All errors generated in `barter-task`.
pub mod error;

/// [`TaskRunner`] and the [`recover_tasks`] supervisor.
pub mod runner;

/// [`TaskState`] and the [`TaskPhase`](state::TaskPhase) bounds.
pub mod state;

/// [`ContextStore`] trait with in-memory and JSON file implementations.
pub mod store;

/// [`TaskLogic`], [`TaskScope`] and the [`BaseTradingTask`] driver.
pub mod task;

pub use context::{CONTEXT_VERSION, ContextPatch, Metadata, TaskContext, TaskFailure, TaskId};
pub use error::TaskError;
pub use runner::{Recovery, RunOutcome, RunnerConfig, TaskRunner, recover_tasks};
pub use state::{TaskPhase, TaskState};
pub use store::{ContextStore, InMemoryContextStore, JsonFileStore};
pub use task::{BaseTradingTask, StepResult, TaskConfig, TaskLogic, TaskScope};
