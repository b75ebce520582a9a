//! meetsync-core: pure presence-detection primitives.
//! Snapshot types, room parsing, the heuristic detector with its grace
//! window, title extraction, the per-observer state machine and the
//! forced-termination triggers. No IO, no async, no clock access: every
//! time-dependent function takes `now`.

pub mod detect;
pub mod observer;
pub mod room;
pub mod termination;
pub mod title;
pub mod types;

pub use detect::{Heuristic, SignalDetector, default_heuristics};
pub use observer::{ObserverPhase, ObserverRecord, ObserverStateMachine};
pub use room::RoomId;
pub use termination::{TerminationCause, TerminationWatch};
pub use types::{
    ActivityLabel, CoreError, EnvironmentSnapshot, LabelSource, ObserverId, PresenceVerdict,
    StatusValue, Transition, VerdictReason,
};
