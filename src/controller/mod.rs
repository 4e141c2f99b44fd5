// Streaming request controller module
// Author: kelexine (https://github.com/kelexine)

#[allow(clippy::module_inception)]
mod controller;
pub mod events;
pub mod state;

pub use controller::{ControllerConfig, RequestOutcome, StreamingRequestController};
pub use events::{ControllerEvent, FunctionCallHandler, NoopFunctionCallHandler};
pub use state::{ControlSignal, RequestContext, RequestState, MAX_HISTORY_TURNS};
