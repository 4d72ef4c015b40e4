//! Wire messages and the two collaborator seams.
//!
//! Inbound messages arrive from the transport collaborator as JSON objects
//! tagged by `type`. Outbound audio commands go to whatever implements
//! [`EnvelopeSink`]; the leader broadcasts through [`Transport`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::clock::{Beacon, ClockCommand};
pub use crate::clock::TransportAction;
use crate::error::Result;
use crate::params::{ParameterConfig, ResolvedEnvelope, Routing};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Inbound {
    PhasorSync(Beacon),
    ProgramUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        portamento_ms: Option<f64>,
        #[serde(flatten)]
        parameters: BTreeMap<String, ParameterConfig>,
    },
    SubParamUpdate {
        path: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        portamento_ms: Option<f64>,
    },
    SaveScene { slot: u32 },
    LoadScene {
        slot: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        portamento_ms: Option<f64>,
    },
    ClearScene { slot: u32 },
    ClearBanks,
    ReresolveAtEoc,
    Transport { action: TransportAction },
    JumpToEoc,
    /// Constant value for one parameter, staged like any other change.
    ParamValue {
        param: String,
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        portamento_ms: Option<f64>,
    },
    Routing {
        param: String,
        #[serde(flatten)]
        routing: Routing,
    },
}

impl Inbound {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Messages that belong to the clock context rather than the control context.
    pub fn clock_command(&self) -> Option<ClockCommand> {
        match self {
            Inbound::PhasorSync(b) => Some(ClockCommand::Beacon(*b)),
            Inbound::Transport { action } => Some(ClockCommand::Transport(*action)),
            Inbound::JumpToEoc => Some(ClockCommand::JumpToEoc),
            _ => None,
        }
    }

    /// Beacons may be dropped or reordered; everything else needs ordered delivery.
    pub fn needs_ordered_delivery(&self) -> bool {
        !matches!(self, Inbound::PhasorSync(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::PhasorSync(_) => "PHASOR_SYNC",
            Inbound::ProgramUpdate { .. } => "PROGRAM_UPDATE",
            Inbound::SubParamUpdate { .. } => "SUB_PARAM_UPDATE",
            Inbound::SaveScene { .. } => "SAVE_SCENE",
            Inbound::LoadScene { .. } => "LOAD_SCENE",
            Inbound::ClearScene { .. } => "CLEAR_SCENE",
            Inbound::ClearBanks => "CLEAR_BANKS",
            Inbound::ReresolveAtEoc => "RERESOLVE_AT_EOC",
            Inbound::Transport { .. } => "TRANSPORT",
            Inbound::JumpToEoc => "JUMP_TO_EOC",
            Inbound::ParamValue { .. } => "PARAM_VALUE",
            Inbound::Routing { .. } => "ROUTING",
        }
    }
}

/// Outbound to the audio-rendering collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioCommand {
    SetEnv {
        param: String,
        #[serde(flatten)]
        envelope: ResolvedEnvelope,
    },
    SetAllEnv { params: BTreeMap<String, ResolvedEnvelope> },
}

impl AudioCommand {
    /// Envelope for `param` if this command carries one.
    pub fn envelope(&self, param: &str) -> Option<&ResolvedEnvelope> {
        match self {
            AudioCommand::SetEnv { param: p, envelope } if p == param => Some(envelope),
            AudioCommand::SetEnv { .. } => None,
            AudioCommand::SetAllEnv { params } => params.get(param),
        }
    }
}

/// The narrow contract of the audio-rendering side.
pub trait EnvelopeSink {
    fn set_env(&mut self, param: &str, envelope: &ResolvedEnvelope);
    fn set_all_env(&mut self, params: &BTreeMap<String, ResolvedEnvelope>);
}

/// Keeps every command; used by tests and the simulator.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    pub commands: Vec<AudioCommand>,
}

impl RecordingSink {
    pub fn new() -> Self { Self::default() }

    /// Most recent envelope sent for `param`.
    pub fn last_envelope(&self, param: &str) -> Option<&ResolvedEnvelope> {
        self.commands.iter().rev().find_map(|c| c.envelope(param))
    }

    pub fn clear(&mut self) { self.commands.clear(); }
}

impl EnvelopeSink for RecordingSink {
    fn set_env(&mut self, param: &str, envelope: &ResolvedEnvelope) {
        self.commands.push(AudioCommand::SetEnv { param: param.to_string(), envelope: *envelope });
    }

    fn set_all_env(&mut self, params: &BTreeMap<String, ResolvedEnvelope>) {
        self.commands.push(AudioCommand::SetAllEnv { params: params.clone() });
    }
}

/// Forward to another context (e.g. an audio callback) over a channel.
impl EnvelopeSink for crossbeam::channel::Sender<AudioCommand> {
    fn set_env(&mut self, param: &str, envelope: &ResolvedEnvelope) {
        if self.send(AudioCommand::SetEnv { param: param.to_string(), envelope: *envelope }).is_err() {
            debug!(param, "audio receiver gone; dropping SET_ENV");
        }
    }

    fn set_all_env(&mut self, params: &BTreeMap<String, ResolvedEnvelope>) {
        if self.send(AudioCommand::SetAllEnv { params: params.clone() }).is_err() {
            debug!(params = params.len(), "audio receiver gone; dropping SET_ALL_ENV");
        }
    }
}

impl<S: EnvelopeSink + ?Sized> EnvelopeSink for &mut S {
    fn set_env(&mut self, param: &str, envelope: &ResolvedEnvelope) { (**self).set_env(param, envelope) }
    fn set_all_env(&mut self, params: &BTreeMap<String, ResolvedEnvelope>) { (**self).set_all_env(params) }
}

/// Broadcast primitives of the transport collaborator (leader side).
pub trait Transport {
    /// Best effort; may drop or reorder.
    fn broadcast_unordered(&mut self, msg: &Inbound);
    /// Reliable and in order.
    fn broadcast_ordered(&mut self, msg: &Inbound);
}

/// Keeps every broadcast with its delivery class.
#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    pub sent: Vec<(bool, Inbound)>,
}

impl RecordingTransport {
    pub fn beacons(&self) -> impl Iterator<Item = &Beacon> {
        self.sent.iter().filter_map(|(_, m)| match m {
            Inbound::PhasorSync(b) => Some(b),
            _ => None,
        })
    }
}

impl Transport for RecordingTransport {
    fn broadcast_unordered(&mut self, msg: &Inbound) { self.sent.push((false, msg.clone())); }
    fn broadcast_ordered(&mut self, msg: &Inbound) { self.sent.push((true, msg.clone())); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Interpolation;

    #[test]
    fn channel_sink_tolerates_a_closed_receiver() {
        let (mut tx, rx) = crossbeam::channel::unbounded::<AudioCommand>();
        tx.set_env("amp", &ResolvedEnvelope::constant(0.3, 0.0));
        assert_eq!(rx.try_recv().ok().and_then(|c| c.envelope("amp").map(|e| e.start_value)), Some(0.3));
        drop(rx);
        tx.set_env("amp", &ResolvedEnvelope::constant(0.4, 0.0));
        tx.set_all_env(&BTreeMap::new());
    }

    #[test]
    fn parses_beacon() {
        let m = Inbound::from_json(
            r#"{"type":"PHASOR_SYNC","phase":0.002,"stepsPerCycle":4,"cycleLength":4,"isPlaying":false,"timestamp":12.5}"#,
        )
        .unwrap();
        match m {
            Inbound::PhasorSync(b) => {
                assert!(!b.is_playing);
                assert_eq!(b.steps_per_cycle, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_flat_program_update() {
        let m = Inbound::from_json(
            r#"{"type":"PROGRAM_UPDATE","portamentoMs":50,
                "frequency":{"interpolation":"step",
                  "startValueGenerator":{"type":"periodic","numerators":"1-3","denominators":"1","baseValue":220}}}"#,
        )
        .unwrap();
        match m {
            Inbound::ProgramUpdate { portamento_ms, parameters } => {
                assert_eq!(portamento_ms, Some(50.0));
                assert_eq!(parameters.len(), 1);
                assert_eq!(parameters["frequency"].interpolation, Interpolation::Step);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unit_and_small_messages() {
        assert_eq!(Inbound::from_json(r#"{"type":"CLEAR_BANKS"}"#).unwrap(), Inbound::ClearBanks);
        assert_eq!(Inbound::from_json(r#"{"type":"RERESOLVE_AT_EOC"}"#).unwrap(), Inbound::ReresolveAtEoc);
        assert_eq!(
            Inbound::from_json(r#"{"type":"TRANSPORT","action":"stop"}"#).unwrap(),
            Inbound::Transport { action: TransportAction::Stop }
        );
        assert_eq!(
            Inbound::from_json(r#"{"type":"ROUTING","param":"amp","mode":"constant","value":0.5}"#).unwrap(),
            Inbound::Routing { param: "amp".into(), routing: Routing::Constant { value: 0.5 } }
        );
        assert!(Inbound::from_json(r#"{"type":"NOPE"}"#).is_err());
    }

    #[test]
    fn only_clock_messages_route_to_clock() {
        assert!(Inbound::JumpToEoc.clock_command().is_some());
        assert!(Inbound::ReresolveAtEoc.clock_command().is_none());
        assert!(Inbound::SaveScene { slot: 1 }.needs_ordered_delivery());
    }

    #[test]
    fn set_env_is_flat_on_the_wire() {
        let cmd = AudioCommand::SetEnv { param: "amp".into(), envelope: ResolvedEnvelope::constant(0.5, 10.0) };
        let v: Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["type"], "SET_ENV");
        assert_eq!(v["startValue"], 0.5);
        assert_eq!(v["portamentoMs"], 10.0);
    }

    #[test]
    fn recording_sink_finds_latest() {
        let mut sink = RecordingSink::new();
        sink.set_env("amp", &ResolvedEnvelope::constant(0.1, 0.0));
        let mut all = BTreeMap::new();
        all.insert("amp".to_string(), ResolvedEnvelope::constant(0.2, 0.0));
        sink.set_all_env(&all);
        assert_eq!(sink.last_envelope("amp").map(|e| e.start_value), Some(0.2));
        assert!(sink.last_envelope("freq").is_none());
    }
}
