//! Ensemble Engine: clock reconstruction, parameter staging and scenes.
//!
//! Crate layout:
//! - [`clock`]    : rebuilds a continuous cycle phase from network beacons
//! - [`params`]   : per-parameter config, generators and routing
//! - [`staging`]  : changes parked until the next cycle boundary
//! - [`engine`]   : `SynthesisEngine`, the owner of all control-side state
//! - [`scenes`]   : versioned snapshots and the slot bank
//! - [`messages`] : wire messages, `EnvelopeSink` and `Transport` seams
//! - [`runtime`]  : clock/control contexts joined by channels
//! - [`follower`] : one follower device pumped on the caller's thread
//! - [`leader`]   : the beacon source
//! - [`config`] / [`error`]
//!
//! Audible changes land on cycle boundaries while playing, and right away with
//! a glide while paused. Boundary processing never returns an error.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod follower;
pub mod leader;
pub mod messages;
pub mod params;
pub mod runtime;
pub mod scenes;
pub mod staging;

pub use clock::{Beacon, BeaconClass, ClockCommand, ClockEvent, ClockReconstructor, CycleClock, TransportAction};
pub use config::EngineConfig;
pub use engine::{ParamChange, SynthesisEngine};
pub use error::{EngineError, Result};
pub use follower::Follower;
pub use leader::Leader;
pub use messages::{AudioCommand, EnvelopeSink, Inbound, RecordingSink, RecordingTransport, Transport};
pub use params::{Interpolation, ParameterConfig, ParameterState, ResolvedEnvelope, Routing};
pub use scenes::{SceneBank, SceneMetadata, SceneSnapshot, SCENE_SCHEMA_VERSION};
