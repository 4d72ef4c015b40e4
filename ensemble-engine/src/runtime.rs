//! The two execution contexts and the channels between them.
//!
//! ```text
//!   network ──► Dispatcher ──► ClockCommand ──► ClockContext (audio clock)
//!                   │                               │ ClockEvent
//!                   └──────► ControlInput ◄─────────┘
//!                                  │
//!                                  ▼
//!                           ControlContext ──► EnvelopeSink (audio)
//! ```
//!
//! No state is shared: each context owns its half and only talks through
//! `crossbeam` channels. The control inbox is a single queue, so control
//! messages and clock events are handled strictly one at a time in arrival
//! order.

use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::clock::{ClockCommand, ClockEvent, ClockReconstructor};
use crate::config::EngineConfig;
use crate::engine::SynthesisEngine;
use crate::messages::{EnvelopeSink, Inbound};

/// What the control context consumes.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlInput {
    Message(Inbound),
    Clock(ClockEvent),
}

/// Owns the clock; advanced per audio block or by polling.
pub struct ClockContext {
    clock: ClockReconstructor,
    commands: Receiver<ClockCommand>,
    events: Sender<ControlInput>,
    now: f64,
}

impl ClockContext {
    /// Advance by one audio block. Returns the number of events emitted.
    pub fn process_block(&mut self, frames: usize, sample_rate: u32) -> usize {
        let dt = if sample_rate == 0 { 0.0 } else { frames as f64 / f64::from(sample_rate) };
        self.poll(self.now + dt)
    }

    /// Apply queued commands at the current time, then free-run to `now`.
    pub fn poll(&mut self, now: f64) -> usize {
        let mut sent = 0;
        while let Ok(cmd) = self.commands.try_recv() {
            trace!(?cmd, "clock command");
            let events = self.clock.apply(cmd, self.now);
            sent += self.forward(events);
        }
        self.now = now.max(self.now);
        let events = self.clock.advance(self.now);
        sent + self.forward(events)
    }

    fn forward(&self, events: Vec<ClockEvent>) -> usize {
        let n = events.len();
        for ev in events {
            if self.events.send(ControlInput::Clock(ev)).is_err() {
                debug!("control context gone; dropping clock event");
                return 0;
            }
        }
        n
    }

    #[inline] pub fn clock(&self) -> &ClockReconstructor { &self.clock }
    #[inline] pub fn now(&self) -> f64 { self.now }
}

/// Owns the engine; processes one input at a time.
pub struct ControlContext<S: EnvelopeSink> {
    engine: SynthesisEngine,
    inbox: Receiver<ControlInput>,
    clock: Sender<ClockCommand>,
    sink: S,
}

impl<S: EnvelopeSink> ControlContext<S> {
    fn process(&mut self, input: ControlInput) {
        match input {
            ControlInput::Clock(ev) => self.engine.on_clock_event(ev, &mut self.sink),
            ControlInput::Message(msg) => {
                // Clock-bound messages that reached us anyway go to the clock.
                if let Some(cmd) = msg.clock_command() {
                    let _ = self.clock.send(cmd);
                    return;
                }
                let kind = msg.kind();
                if let Err(e) = self.engine.handle(msg, &mut self.sink) {
                    warn!(kind, error = %e, "control message rejected");
                }
            }
        }
    }

    /// Handle everything queued right now. Returns how many inputs were processed.
    pub fn drain(&mut self) -> usize {
        let mut n = 0;
        while let Ok(input) = self.inbox.try_recv() {
            self.process(input);
            n += 1;
        }
        n
    }

    /// Block until every sender is gone, then hand the context back.
    pub fn run(mut self) -> Self {
        while let Ok(input) = self.inbox.recv() {
            self.process(input);
        }
        debug!("control inbox closed");
        self
    }

    /// Ask the clock to change its timing (control → clock direction).
    pub fn send_clock(&self, cmd: ClockCommand) {
        let _ = self.clock.send(cmd);
    }

    #[inline] pub fn engine(&self) -> &SynthesisEngine { &self.engine }
    #[inline] pub fn engine_mut(&mut self) -> &mut SynthesisEngine { &mut self.engine }
    #[inline] pub fn sink(&self) -> &S { &self.sink }
    #[inline] pub fn sink_mut(&mut self) -> &mut S { &mut self.sink }
}

/// Routes network messages to the right context. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    clock: Sender<ClockCommand>,
    control: Sender<ControlInput>,
}

impl Dispatcher {
    /// Returns `false` if the receiving context is gone.
    pub fn dispatch(&self, msg: Inbound) -> bool {
        match msg.clock_command() {
            Some(cmd) => self.clock.send(cmd).is_ok(),
            None => self.control.send(ControlInput::Message(msg)).is_ok(),
        }
    }

    /// Feed a round-trip measurement to the clock.
    pub fn measured_rtt(&self, seconds: f64) -> bool {
        self.clock.send(ClockCommand::MeasuredRtt(seconds)).is_ok()
    }
}

/// Build a connected clock/control pair for one peer.
pub fn contexts<S: EnvelopeSink>(config: &EngineConfig, sink: S) -> (ClockContext, ControlContext<S>, Dispatcher) {
    let config = config.clone().sanitized();
    let (clock_tx, clock_rx) = unbounded();
    let (control_tx, control_rx) = unbounded();
    let clock = ClockContext {
        clock: ClockReconstructor::new(&config),
        commands: clock_rx,
        events: control_tx.clone(),
        now: 0.0,
    };
    let control = ControlContext {
        engine: SynthesisEngine::new(config),
        inbox: control_rx,
        clock: clock_tx.clone(),
        sink,
    };
    (clock, control, Dispatcher { clock: clock_tx, control: control_tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Beacon, TransportAction};
    use crate::messages::RecordingSink;

    #[test]
    fn beacons_reach_the_clock_and_events_reach_control() {
        let cfg = EngineConfig { network_delay_ms: 0.0, ..EngineConfig::default() };
        let (mut clock, mut control, dispatch) = contexts(&cfg, RecordingSink::new());
        assert!(dispatch.dispatch(Inbound::PhasorSync(Beacon {
            phase: 0.9,
            steps_per_cycle: 4,
            cycle_length: 1.0,
            is_playing: true,
            timestamp: 0.0,
        })));
        clock.poll(0.0);
        clock.poll(0.2);
        control.drain();
        assert!(control.engine().is_playing());
        assert_eq!(control.engine().cycle(), Some(1));
    }

    #[test]
    fn process_block_advances_by_frames() {
        let (mut clock, _control, dispatch) = contexts(&EngineConfig::default(), RecordingSink::new());
        dispatch.dispatch(Inbound::Transport { action: TransportAction::Play });
        clock.process_block(48_000, 48_000);
        assert!((clock.now() - 1.0).abs() < 1e-12);
        assert!((clock.clock().local_phase_now(clock.now()) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn control_forwards_clock_messages() {
        let (mut clock, mut control, dispatch) = contexts(&EngineConfig::default(), RecordingSink::new());
        // bypass the dispatcher's routing on purpose
        control.process(ControlInput::Message(Inbound::Transport { action: TransportAction::Play }));
        clock.poll(0.1);
        assert!(clock.clock().is_playing());
        drop(dispatch);
    }

    #[test]
    fn threaded_control_context() {
        let (mut clock, control, dispatch) = contexts(&EngineConfig::default().with_seed(1), RecordingSink::new());
        let handle = std::thread::spawn(move || control.run());
        dispatch.dispatch(Inbound::from_json(
            r#"{"type":"PROGRAM_UPDATE","amp":{"startGenerator":{"type":"normalised","range":0.3}}}"#,
        ).unwrap());
        clock.poll(0.0);
        drop(dispatch);
        drop(clock);
        let control = handle.join().unwrap();
        assert_eq!(control.sink().last_envelope("amp").map(|e| e.start_value), Some(0.3));
    }
}
