//! Execution model for pipeline topologies.
//!
//! Reproduces the provider's control flow for simulation and testing: stage
//! sequencing over an [`ActionExecutor`], blue/green release gating, and
//! failure alerts fanned out from an event bus. Nothing here calls a cloud
//! API.

pub mod artifacts;
pub mod deploy;
pub mod error;
pub mod events;
pub mod executor;
pub mod release;
pub mod sequencer;

pub use artifacts::{ArtifactSnapshot, ArtifactStore};
pub use deploy::{ApprovalDecision, ReleaseExecutor};
pub use error::{EngineError, Result};
pub use events::{
    AlertDispatcher, EventBus, EventSink, MemoryTopic, Notification, NotificationTopic, NullSink,
};
pub use executor::{ActionExecutor, ActionRequest, ActionResponse, CallRecord, ScriptedExecutor};
pub use release::{
    AlwaysHealthy, BlueGreenGate, GateState, GateTransition, HealthProbe, InstantClock,
    ReleaseError, ShiftClock, TokioClock, TrafficSplit, UnhealthyFrom,
};
pub use sequencer::{ActionResult, ActionStatus, ExecutionRecord, StageSequencer};
