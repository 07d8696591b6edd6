//! Application handler dispatch.
//!
//! 1. **Routing** (`router`): registration table keyed by destination
//! 2. **Middleware** (`middleware`): load shedding, timeout, instrumentation
//! 3. **Dispatch** (`dispatcher`): runs the pipeline and publishes replies

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod middleware;
pub mod router;

pub use config::DispatcherConfig;
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use handler::{HandlerError, HandlerRequest, HandlerResponse, Reply};
pub use router::{BoxHandler, HandlerRouter};
