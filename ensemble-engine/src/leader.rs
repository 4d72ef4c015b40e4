//! Leader role: owns the authoritative cycle and broadcasts beacons.
//!
//! While playing, a `PHASOR_SYNC` goes out at every step, with phase exactly 0
//! at each boundary. While paused, a heartbeat carrying `isPlaying: false` goes
//! out every `heartbeat_interval_ms` so late joiners learn the paused state.
//! Program and scene commands ride the ordered channel.

use tracing::{debug, info};

use crate::clock::{Beacon, ClockEvent, ClockReconstructor};
use crate::config::EngineConfig;
use crate::messages::{Inbound, Transport};

pub struct Leader {
    clock: ClockReconstructor,
    heartbeat_interval: f64,
    last_heartbeat: Option<f64>,
}

impl Leader {
    pub fn new(config: &EngineConfig) -> Self {
        let config = EngineConfig { network_delay_ms: 0.0, ..config.clone() }.sanitized();
        Self {
            clock: ClockReconstructor::new(&config),
            heartbeat_interval: config.heartbeat_interval_ms * 0.001,
            last_heartbeat: None,
        }
    }

    #[inline] pub fn is_playing(&self) -> bool { self.clock.is_playing() }
    #[inline] pub fn phase(&self, now: f64) -> f64 { self.clock.local_phase_now(now) }
    #[inline] pub fn cycle_length(&self) -> f64 { self.clock.cycle_length() }
    #[inline] pub fn steps_per_cycle(&self) -> u32 { self.clock.steps_per_cycle() }

    fn beacon(&self, phase: f64, now: f64) -> Inbound {
        Inbound::PhasorSync(Beacon {
            phase,
            steps_per_cycle: self.clock.steps_per_cycle(),
            cycle_length: self.clock.cycle_length(),
            is_playing: self.clock.is_playing(),
            timestamp: now,
        })
    }

    fn broadcast_steps(&self, events: &[ClockEvent], now: f64, transport: &mut impl Transport) {
        let steps = f64::from(self.clock.steps_per_cycle());
        for ev in events {
            if let ClockEvent::Step { index } = ev {
                transport.broadcast_unordered(&self.beacon(f64::from(*index) / steps, now));
            }
        }
    }

    fn heartbeat(&mut self, now: f64, transport: &mut impl Transport) {
        transport.broadcast_unordered(&self.beacon(self.clock.local_phase_now(now), now));
        self.last_heartbeat = Some(now);
    }

    /// Free-run to `now` and broadcast whatever is due.
    pub fn tick(&mut self, now: f64, transport: &mut impl Transport) -> Vec<ClockEvent> {
        let events = self.clock.advance(now);
        if self.clock.is_playing() {
            self.broadcast_steps(&events, now, transport);
        } else if self.last_heartbeat.map_or(true, |t| now - t >= self.heartbeat_interval) {
            self.heartbeat(now, transport);
        }
        events
    }

    pub fn play(&mut self, now: f64, transport: &mut impl Transport) -> Vec<ClockEvent> {
        let events = self.clock.play(now);
        info!(phase = self.clock.local_phase_now(now), "leader play");
        transport.broadcast_unordered(&self.beacon(self.clock.local_phase_now(now), now));
        events
    }

    pub fn pause(&mut self, now: f64, transport: &mut impl Transport) -> Vec<ClockEvent> {
        let events = self.clock.pause(now);
        info!("leader pause");
        self.heartbeat(now, transport);
        events
    }

    pub fn stop(&mut self, now: f64, transport: &mut impl Transport) -> Vec<ClockEvent> {
        let events = self.clock.stop(now);
        info!("leader stop");
        self.heartbeat(now, transport);
        events
    }

    /// Cut the current cycle short. Playing: followers see an immediate phase-0 beacon.
    pub fn jump_to_eoc(&mut self, now: f64, transport: &mut impl Transport) -> Vec<ClockEvent> {
        let events = self.clock.jump_to_eoc(now);
        if self.clock.is_playing() {
            self.broadcast_steps(&events, now, transport);
        } else {
            self.heartbeat(now, transport);
        }
        events
    }

    pub fn set_cycle(&mut self, now: f64, cycle_length: f64, steps_per_cycle: u32) -> Vec<ClockEvent> {
        debug!(cycle_length, steps_per_cycle, "leader timing change");
        self.clock.set_timing(now, cycle_length, steps_per_cycle)
    }

    /// Reliable, ordered broadcast for program and scene commands.
    pub fn broadcast_ordered(&self, msg: &Inbound, transport: &mut impl Transport) {
        debug!(kind = msg.kind(), "ordered broadcast");
        transport.broadcast_ordered(msg);
    }
}
