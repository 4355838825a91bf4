pub mod sink;
pub mod state;

pub use sink::{CaptureSink, SinkError};
pub use state::{CaptureState, CaptureStateMachine};
