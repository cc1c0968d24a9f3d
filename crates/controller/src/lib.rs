mod config;
mod machine;
mod node;
mod outputs;
mod publisher;
mod queue;

pub use config::{ConfigError, TimingConfig};
pub use machine::{ControlEvent, SignalController, SignalState, Snapshot, Transition, TransitionCause};
pub use node::{ControlLoop, ControllerSetup, InboundError};
pub use outputs::{Lamps, PinMap, PinWrite, RecordingOutputs, SignalOutputs, Tone, TracingOutputs};
pub use publisher::StatePublisher;
pub use queue::QueueModel;
pub use safety::{MonitorConfig, TripReason};
