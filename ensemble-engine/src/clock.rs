//! Cyclic clock reconstruction from network beacons.
//!
//! Followers never see the leader's clock directly. They get periodic
//! `PHASOR_SYNC` beacons and rebuild a continuous local phase from them:
//!
//! - Between beacons the phase free-runs at `1 / cycle_length` per second, so the
//!   signal never stalls, even under total beacon loss.
//! - End-of-cycle beacons (phase ≈ 0) pull the estimate hard toward the leader;
//!   step beacons nudge it with roughly half that strength. Network jitter is
//!   smoothed instead of snapping audibly.
//! - Paused heartbeats are recognised by their `is_playing` flag alone, never by
//!   phase, so a paused beacon near 0 can't masquerade as a cycle boundary.
//!
//! Boundaries are counted on an unwrapped cycle position. A correction that
//! moves the estimate backwards across a boundary already fired does not fire it
//! again, and one that moves it forwards fires it on the same call.

use ensemble_core::phase::{near_cycle_start, phase_delta, phase_rate, smooth_toward, wrap_phase01};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

/// Longest gap (in cycles) we replay event by event. Longer gaps collapse into one boundary.
const MAX_CATCHUP_CYCLES: i64 = 16;

/// Wire beacon as broadcast by the leader.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    pub phase: f64,
    pub steps_per_cycle: u32,
    pub cycle_length: f64,
    pub is_playing: bool,
    /// Sender's elapsed time in seconds.
    pub timestamp: f64,
}

/// How an incoming beacon was interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BeaconClass {
    PausedHeartbeat,
    EndOfCycle,
    Step,
}

/// Discrete clock output consumed by the control context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockEvent {
    CycleBoundary { cycle: u64 },
    Step { index: u32 },
    PlayState { playing: bool },
}

/// Local transport actions, as carried by `TRANSPORT {action}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportAction {
    Play,
    Pause,
    Stop,
}

/// Control → clock direction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClockCommand {
    Beacon(Beacon),
    Transport(TransportAction),
    JumpToEoc,
    MeasuredRtt(f64),
    SetTiming { cycle_length: f64, steps_per_cycle: u32 },
}

/// Public view of the clock.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CycleClock {
    pub phase: f64,
    pub cycle_length: f64,
    pub steps_per_cycle: u32,
    pub is_playing: bool,
}

#[derive(Copy, Clone, Debug)]
struct DelayEstimate {
    fixed: f64,
    measured: Option<f64>,
    smoothing: f64,
}

impl DelayEstimate {
    #[inline]
    fn one_way(&self) -> f64 { self.measured.unwrap_or(self.fixed) }
}

#[derive(Clone, Debug)]
pub struct ClockReconstructor {
    // unwrapped position (cycles) at `anchor_time`
    position: f64,
    anchor_time: f64,
    cycle_length: f64,
    steps_per_cycle: u32,
    playing: bool,
    // set once a playing beacon has given us a reference
    synced: bool,
    // position has been tied to the leader's cycle at least once
    anchored: bool,
    last_boundary: i64,
    last_step: i64,
    last_beacon_timestamp: Option<f64>,
    delay: DelayEstimate,
    eoc_epsilon: f64,
    eoc_correction: f64,
    step_correction: f64,
}

impl ClockReconstructor {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            position: 0.0,
            anchor_time: 0.0,
            cycle_length: cfg.default_cycle_length,
            steps_per_cycle: cfg.default_steps_per_cycle.max(1),
            playing: false,
            synced: false,
            anchored: false,
            last_boundary: 0,
            last_step: 0,
            last_beacon_timestamp: None,
            delay: DelayEstimate {
                fixed: cfg.network_delay_ms * 0.001,
                measured: None,
                smoothing: cfg.rtt_smoothing,
            },
            eoc_epsilon: cfg.eoc_epsilon,
            eoc_correction: cfg.eoc_correction,
            step_correction: cfg.step_correction,
        }
    }

    // ------------------------------------------------------------------ queries

    #[inline]
    fn position_at(&self, now: f64) -> f64 {
        if self.playing {
            self.position + (now - self.anchor_time).max(0.0) * phase_rate(self.cycle_length)
        } else {
            self.position
        }
    }

    /// Locally estimated phase at `now`, in [0, 1).
    pub fn local_phase_now(&self, now: f64) -> f64 {
        wrap_phase01(self.position_at(now))
    }

    pub fn snapshot(&self, now: f64) -> CycleClock {
        CycleClock {
            phase: self.local_phase_now(now),
            cycle_length: self.cycle_length,
            steps_per_cycle: self.steps_per_cycle,
            is_playing: self.playing,
        }
    }

    #[inline] pub fn is_playing(&self) -> bool { self.playing }
    #[inline] pub fn cycle_length(&self) -> f64 { self.cycle_length }
    #[inline] pub fn steps_per_cycle(&self) -> u32 { self.steps_per_cycle }
    #[inline] pub fn one_way_delay(&self) -> f64 { self.delay.one_way() }
    #[inline] pub fn last_beacon_timestamp(&self) -> Option<f64> { self.last_beacon_timestamp }

    /// Predicted time of the next boundary, if playing.
    pub fn next_boundary_time(&self, now: f64) -> Option<f64> {
        let rate = phase_rate(self.cycle_length);
        if !self.playing || rate == 0.0 {
            return None;
        }
        let pos = self.position_at(now);
        Some(now + (pos.floor() + 1.0 - pos) / rate)
    }

    // ------------------------------------------------------------------ free-run

    /// Free-run to `now`, emitting boundary and step events in time order.
    pub fn advance(&mut self, now: f64) -> Vec<ClockEvent> {
        let mut events = Vec::new();
        let pos = self.position_at(now);
        self.position = pos;
        self.anchor_time = now;
        if !self.playing {
            return events;
        }

        let steps = i64::from(self.steps_per_cycle);
        let target_step = (pos * steps as f64).floor() as i64;

        if target_step - self.last_step > steps * MAX_CATCHUP_CYCLES {
            warn!(gap_steps = target_step - self.last_step, "clock fell far behind; collapsing missed cycles");
            self.last_boundary = pos.floor() as i64;
            self.last_step = target_step;
            events.push(ClockEvent::CycleBoundary { cycle: self.last_boundary.max(0) as u64 });
            events.push(ClockEvent::Step { index: target_step.rem_euclid(steps) as u32 });
            return events;
        }

        for s in (self.last_step + 1)..=target_step {
            if s.rem_euclid(steps) == 0 {
                let cycle = s.div_euclid(steps);
                if cycle > self.last_boundary {
                    self.last_boundary = cycle;
                    events.push(ClockEvent::CycleBoundary { cycle: cycle.max(0) as u64 });
                }
            }
            events.push(ClockEvent::Step { index: s.rem_euclid(steps) as u32 });
        }
        self.last_step = self.last_step.max(target_step);

        // Only reachable if step bookkeeping lagged a rate change.
        let cycle_now = pos.floor() as i64;
        if cycle_now > self.last_boundary {
            self.last_boundary = cycle_now;
            events.push(ClockEvent::CycleBoundary { cycle: cycle_now.max(0) as u64 });
        }
        events
    }

    // ------------------------------------------------------------------ beacons

    /// Classify a beacon, fold it into the local estimate and return any events it caused.
    pub fn ingest_beacon(&mut self, beacon: &Beacon, now: f64) -> (BeaconClass, Vec<ClockEvent>) {
        let mut events = self.advance(now);
        self.last_beacon_timestamp = Some(beacon.timestamp);
        self.update_rate(beacon.cycle_length, beacon.steps_per_cycle);

        if !beacon.is_playing {
            if self.playing {
                info!("leader paused");
                events.push(ClockEvent::PlayState { playing: false });
            }
            self.playing = false;
            self.synced = false;
            self.rebase(wrap_phase01(beacon.phase));
            return (BeaconClass::PausedHeartbeat, events);
        }

        let class = if near_cycle_start(beacon.phase, self.eoc_epsilon) {
            BeaconClass::EndOfCycle
        } else {
            BeaconClass::Step
        };

        // The beacon left the leader `one_way` seconds ago; it has moved on since.
        let implied = wrap_phase01(beacon.phase + self.delay.one_way() * phase_rate(self.cycle_length));

        if !self.playing {
            info!(phase = implied, "leader playing; syncing");
            self.playing = true;
            events.push(ClockEvent::PlayState { playing: true });
        }

        if self.synced {
            let err = phase_delta(wrap_phase01(self.position), implied);
            let k = match class {
                BeaconClass::EndOfCycle => self.eoc_correction,
                _ => self.step_correction,
            };
            self.position += k * err;
            debug!(?class, err, "beacon correction");
        } else {
            self.hard_sync(implied);
        }

        events.extend(self.advance(now));
        (class, events)
    }

    /// Feed a round-trip measurement; delay compensation switches to smoothed RTT/2.
    pub fn set_measured_rtt(&mut self, rtt_seconds: f64) {
        if !rtt_seconds.is_finite() || rtt_seconds < 0.0 {
            return;
        }
        let half = rtt_seconds * 0.5;
        self.delay.measured = Some(match self.delay.measured {
            None => half,
            Some(m) => smooth_toward(m, half, self.delay.smoothing),
        });
    }

    fn hard_sync(&mut self, phase: f64) {
        self.rebase(phase);
        self.synced = true;
    }

    /// Move to `phase` within the cycle nearest the current estimate. Before any
    /// reference exists, the cycle after the last boundary is used. Boundaries
    /// already fired stay fired.
    fn rebase(&mut self, phase: f64) {
        let base = if self.anchored {
            (self.position - phase + 0.5).floor()
        } else {
            self.last_boundary as f64
        };
        self.position = base + phase;
        self.anchored = true;
        self.resync_step_counter();
    }

    fn resync_step_counter(&mut self) {
        self.last_step = (self.position * f64::from(self.steps_per_cycle)).floor() as i64;
        self.last_boundary = self.last_boundary.max(self.position.floor() as i64);
    }

    fn update_rate(&mut self, cycle_length: f64, steps_per_cycle: u32) {
        if cycle_length.is_finite() && cycle_length > 0.0 && cycle_length != self.cycle_length {
            debug!(from = self.cycle_length, to = cycle_length, "cycle length changed");
            self.cycle_length = cycle_length;
        }
        let steps = steps_per_cycle.max(1);
        if steps != self.steps_per_cycle {
            self.steps_per_cycle = steps;
            self.last_step = (self.position * f64::from(steps)).floor() as i64;
        }
    }

    // ------------------------------------------------------------------ local transport

    pub fn play(&mut self, now: f64) -> Vec<ClockEvent> {
        self.advance(now);
        if self.playing {
            return Vec::new();
        }
        self.playing = true;
        self.synced = false;
        self.anchor_time = now;
        vec![ClockEvent::PlayState { playing: true }]
    }

    pub fn pause(&mut self, now: f64) -> Vec<ClockEvent> {
        let mut events = self.advance(now);
        if self.playing {
            self.playing = false;
            self.synced = false;
            events.push(ClockEvent::PlayState { playing: false });
        }
        events
    }

    /// Pause and rewind to the start of the current cycle.
    pub fn stop(&mut self, now: f64) -> Vec<ClockEvent> {
        let events = self.pause(now);
        self.position = self.position.floor();
        self.resync_step_counter();
        events
    }

    /// Jump straight to the end of the current cycle. While playing this fires
    /// the boundary immediately; while paused it only rewinds the phase to 0.
    pub fn jump_to_eoc(&mut self, now: f64) -> Vec<ClockEvent> {
        let mut events = self.advance(now);
        self.position = self.position.floor() + 1.0;
        self.anchor_time = now;
        if self.playing {
            events.extend(self.advance(now));
        } else {
            self.resync_step_counter();
        }
        events
    }

    /// Apply leader-side timing changes (control → clock direction).
    pub fn set_timing(&mut self, now: f64, cycle_length: f64, steps_per_cycle: u32) -> Vec<ClockEvent> {
        let events = self.advance(now);
        self.update_rate(cycle_length, steps_per_cycle);
        events
    }

    pub fn apply(&mut self, command: ClockCommand, now: f64) -> Vec<ClockEvent> {
        match command {
            ClockCommand::Beacon(b) => self.ingest_beacon(&b, now).1,
            ClockCommand::Transport(TransportAction::Play) => self.play(now),
            ClockCommand::Transport(TransportAction::Pause) => self.pause(now),
            ClockCommand::Transport(TransportAction::Stop) => self.stop(now),
            ClockCommand::JumpToEoc => self.jump_to_eoc(now),
            ClockCommand::MeasuredRtt(rtt) => {
                self.set_measured_rtt(rtt);
                self.advance(now)
            }
            ClockCommand::SetTiming { cycle_length, steps_per_cycle } => {
                self.set_timing(now, cycle_length, steps_per_cycle)
            }
        }
    }
}
