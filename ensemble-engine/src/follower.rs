//! One follower device, driven synchronously.
//!
//! Wraps a clock/control pair from [`crate::runtime`] and pumps both on the
//! caller's thread, which keeps simulations and tests deterministic. For a real
//! device, drive the `ClockContext` from the audio callback and run the
//! `ControlContext` on its own thread instead.

use crate::clock::{ClockReconstructor, CycleClock};
use crate::config::EngineConfig;
use crate::engine::SynthesisEngine;
use crate::error::Result;
use crate::messages::{EnvelopeSink, Inbound};
use crate::runtime::{contexts, ClockContext, ControlContext, Dispatcher};

pub struct Follower<S: EnvelopeSink> {
    clock: ClockContext,
    control: ControlContext<S>,
    dispatch: Dispatcher,
}

impl<S: EnvelopeSink> Follower<S> {
    pub fn new(config: &EngineConfig, sink: S) -> Self {
        let (clock, control, dispatch) = contexts(config, sink);
        Self { clock, control, dispatch }
    }

    /// Run the clock up to `now` and let control catch up with it.
    pub fn tick(&mut self, now: f64) {
        self.clock.poll(now);
        self.control.drain();
    }

    /// Deliver one message at local time `now`. Events due before `now` are
    /// handled first.
    pub fn receive(&mut self, msg: Inbound, now: f64) {
        self.tick(now);
        self.dispatch.dispatch(msg);
        self.tick(now);
    }

    pub fn receive_json(&mut self, text: &str, now: f64) -> Result<()> {
        let msg = Inbound::from_json(text)?;
        self.receive(msg, now);
        Ok(())
    }

    pub fn measured_rtt(&mut self, seconds: f64, now: f64) {
        self.tick(now);
        self.dispatch.measured_rtt(seconds);
        self.tick(now);
    }

    #[inline] pub fn phase(&self, now: f64) -> f64 { self.clock.clock().local_phase_now(now) }
    #[inline] pub fn snapshot(&self, now: f64) -> CycleClock { self.clock.clock().snapshot(now) }
    #[inline] pub fn clock(&self) -> &ClockReconstructor { self.clock.clock() }
    #[inline] pub fn engine(&self) -> &SynthesisEngine { self.control.engine() }
    #[inline] pub fn engine_mut(&mut self) -> &mut SynthesisEngine { self.control.engine_mut() }
    #[inline] pub fn sink(&self) -> &S { self.control.sink() }
    #[inline] pub fn sink_mut(&mut self) -> &mut S { self.control.sink_mut() }
}
