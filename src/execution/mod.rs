//! Pipeline execution: resume planning, dispatch and the run controller

pub mod controller;
pub mod dispatcher;
pub mod resume;
pub mod workspace;

pub use controller::{EventHandler, ExecutionEvent, RunController, RunOptions};
pub use dispatcher::{build_dispatcher, Dispatcher, ExecutionResult, InProcessDispatcher};
pub use workspace::{FsWorkspace, Workspace};
