//! Live preview of one follower through `cpal`.
//!
//! The follower's envelopes arrive over a channel and drive a single sine
//! voice: `frequency` and `amp` ramp with each envelope's portamento; a `glide`
//! envelope then travels to its end value across the rest of the cycle.

use std::error::Error;

use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam::channel::Receiver;
use ensemble_core::glide::{GlideCurve, GlideRamp};
use ensemble_engine::{AudioCommand, Interpolation, ResolvedEnvelope};

pub fn list_output_devices() -> Result<(), Box<dyn Error>> {
    let host = cpal::default_host();
    println!("Available output devices:");
    for dev in host.output_devices()? {
        println!("- {}", dev.name()?);
    }
    Ok(())
}

pub fn pick_device(name: Option<&str>) -> Result<cpal::Device, Box<dyn Error>> {
    let host = cpal::default_host();
    if let Some(name) = name {
        for d in host.output_devices()? {
            if d.name()? == name {
                return Ok(d);
            }
        }
        return Err(format!("requested device not found: {name}").into());
    }
    host.default_output_device().ok_or_else(|| "no default output device".into())
}

struct Lane {
    ramp: GlideRamp,
    // end value and duration to glide to once the start is reached
    then: Option<(f64, f64)>,
}

impl Lane {
    fn new(initial: f64) -> Self {
        Self { ramp: GlideRamp::new(initial, GlideCurve::Cosine), then: None }
    }

    fn apply(&mut self, env: &ResolvedEnvelope, cycle_ms: f64, sr: f64) {
        self.ramp.set_target(env.start_value, env.portamento_ms, sr);
        self.then = match env.interpolation {
            Interpolation::Glide if env.end_value != env.start_value => {
                Some((env.end_value, (cycle_ms - env.portamento_ms).max(0.0)))
            }
            _ => None,
        };
    }

    #[inline]
    fn next(&mut self, sr: f64) -> f64 {
        if !self.ramp.is_gliding() {
            if let Some((end, ms)) = self.then.take() {
                self.ramp.set_target(end, ms, sr);
            }
        }
        self.ramp.next()
    }
}

/// Single sine voice steered by audio commands.
pub struct Voice {
    rx: Receiver<AudioCommand>,
    freq: Lane,
    amp: Lane,
    phase: f64,
    sr: f64,
    cycle_ms: f64,
}

impl Voice {
    pub fn new(rx: Receiver<AudioCommand>, sample_rate: f64, cycle_length: f64) -> Self {
        Self {
            rx,
            freq: Lane::new(220.0),
            amp: Lane::new(0.0),
            phase: 0.0,
            sr: sample_rate,
            cycle_ms: cycle_length * 1000.0,
        }
    }

    fn apply(&mut self, param: &str, env: &ResolvedEnvelope) {
        match param {
            "frequency" | "freq" => self.freq.apply(env, self.cycle_ms, self.sr),
            "amp" | "amplitude" => self.amp.apply(env, self.cycle_ms, self.sr),
            _ => {}
        }
    }

    /// Drain pending commands; call once per audio buffer.
    pub fn poll(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            match cmd {
                AudioCommand::SetEnv { param, envelope } => self.apply(&param, &envelope),
                AudioCommand::SetAllEnv { params } => {
                    for (param, env) in &params {
                        self.apply(param, env);
                    }
                }
            }
        }
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let f = self.freq.next(self.sr).clamp(0.0, self.sr * 0.45);
        let a = self.amp.next(self.sr).clamp(0.0, 1.0);
        self.phase = (self.phase + f / self.sr).fract();
        ((std::f64::consts::TAU * self.phase).sin() * a) as f32
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    cfg: &cpal::StreamConfig,
    mut voice: Voice,
    gain: f32,
) -> Result<cpal::Stream, Box<dyn Error>>
where
    T: cpal::Sample + cpal::FromSample<f32> + cpal::SizedSample + Send + 'static,
{
    let channels = cfg.channels as usize;
    let err_fn = |e: cpal::StreamError| tracing::error!(error = %e, "audio stream error");
    let stream = device.build_output_stream(
        cfg,
        move |output: &mut [T], _| {
            voice.poll();
            for frame in output.chunks_mut(channels) {
                let s = (voice.next() * gain).clamp(-1.0, 1.0);
                let v: T = T::from_sample(s);
                for ch in frame.iter_mut() {
                    *ch = v;
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Open the device and start a stream fed by `rx`. Keep the returned stream alive.
pub fn start(
    device_name: Option<&str>,
    rx: Receiver<AudioCommand>,
    cycle_length: f64,
    gain: f32,
) -> Result<cpal::Stream, Box<dyn Error>> {
    use cpal::traits::StreamTrait;

    let device = pick_device(device_name)?;
    let sup_cfg = device.default_output_config()?;
    let sample_format = sup_cfg.sample_format();
    let cfg = sup_cfg.config();
    let voice = Voice::new(rx, f64::from(cfg.sample_rate.0), cycle_length);
    tracing::info!(device = %device.name()?, ?cfg, ?sample_format, "audio preview");

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &cfg, voice, gain)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &cfg, voice, gain)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &cfg, voice, gain)?,
        other => return Err(format!("unsupported device sample format: {other:?}").into()),
    };
    stream.play()?;
    Ok(stream)
}
