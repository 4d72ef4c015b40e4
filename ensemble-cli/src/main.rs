//! Ensemble CLI: a scripted performance with one leader and N followers.
//!
//! Followers are fed over a simulated network with delay, jitter and beacon
//! loss. One follower joins late. With `--play`, follower 0 is rendered live.

mod network;
mod preview;

use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam::channel::Sender;
use ensemble_core::phase::phase_delta;
use ensemble_engine::{
    AudioCommand, ClockEvent, EngineConfig, EnvelopeSink, Follower, Inbound, Leader, ResolvedEnvelope,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use network::SimNetwork;

#[derive(Parser, Debug)]
#[command(name = "ensemble")]
#[command(about = "Run a leader and followers through a scripted performance")]
struct Args {
    /// Number of follower devices
    #[arg(long, default_value_t = 3)]
    followers: usize,
    /// Leader cycles to run
    #[arg(long, default_value_t = 12)]
    cycles: u32,
    /// Seconds per cycle
    #[arg(long, default_value_t = 2.0)]
    cycle_length: f64,
    #[arg(long, default_value_t = 4)]
    steps: u32,
    /// Mean one-way network delay
    #[arg(long, default_value_t = 40.0)]
    delay_ms: f64,
    #[arg(long, default_value_t = 30.0)]
    jitter_ms: f64,
    /// Fraction of beacons lost in transit
    #[arg(long, default_value_t = 0.05)]
    loss: f64,
    /// Seed every RNG; omit for a different performance each run
    #[arg(long)]
    seed: Option<u64>,
    /// Engine config (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Render follower 0 on the audio device, in real time
    #[arg(long)]
    play: bool,
    #[arg(long)]
    list_devices: bool,
    #[arg(long)]
    device: Option<String>,
    #[arg(long, default_value_t = 0.2)]
    gain: f32,
    /// Write follower 0's scene bank here at the end
    #[arg(long)]
    bank_out: Option<PathBuf>,
}

/// Counts and logs what a follower would hand to its synth.
struct PeerSink {
    id: usize,
    batches: u64,
    edits: u64,
    last: BTreeMap<String, ResolvedEnvelope>,
    preview: Option<Sender<AudioCommand>>,
}

impl PeerSink {
    fn new(id: usize, preview: Option<Sender<AudioCommand>>) -> Self {
        Self { id, batches: 0, edits: 0, last: BTreeMap::new(), preview }
    }
}

impl EnvelopeSink for PeerSink {
    fn set_env(&mut self, param: &str, envelope: &ResolvedEnvelope) {
        self.edits += 1;
        debug!(peer = self.id, param, value = envelope.start_value, glide = envelope.portamento_ms, "SET_ENV");
        self.last.insert(param.to_string(), *envelope);
        if let Some(tx) = self.preview.as_mut() {
            tx.set_env(param, envelope);
        }
    }

    fn set_all_env(&mut self, params: &BTreeMap<String, ResolvedEnvelope>) {
        self.batches += 1;
        debug!(peer = self.id, params = params.len(), "SET_ALL_ENV");
        self.last.extend(params.iter().map(|(k, v)| (k.clone(), *v)));
        if let Some(tx) = self.preview.as_mut() {
            tx.set_all_env(params);
        }
    }
}

enum Cue {
    Send(&'static str),
    Play,
    Pause,
    JumpToEoc,
    Join(usize),
}

const PROGRAM: &str = r#"{
    "type": "PROGRAM_UPDATE",
    "frequency": {
        "interpolation": "glide",
        "startValueGenerator": {"type": "periodic", "numerators": "1-4", "denominators": "1",
                                "numeratorBehavior": "ascending", "baseValue": 110},
        "endValueGenerator": {"type": "periodic", "numerators": "3", "denominators": "2",
                              "baseValue": 110}
    },
    "amp": {
        "startValueGenerator": {"type": "normalised", "range": {"min": 0.2, "max": 0.6},
                                "sequenceBehavior": "static"}
    },
    "cutoff": {
        "startValueGenerator": {"type": "periodic", "numerators": "1-8", "denominators": "1-2",
                                "numeratorBehavior": "shuffle", "denominatorBehavior": "random",
                                "baseValue": 400}
    }
}"#;

const SECOND_PROGRAM: &str = r#"{
    "type": "PROGRAM_UPDATE",
    "frequency": {
        "startValueGenerator": {"type": "periodic", "numerators": "5-1", "denominators": "4",
                                "numeratorBehavior": "ascending", "baseValue": 220}
    }
}"#;

/// (time in cycles, cue)
fn script(late_joiner: Option<usize>) -> Vec<(f64, Cue)> {
    let mut cues: Vec<(f64, Cue)> = vec![
        (0.0, Cue::Send(PROGRAM)),
        (0.25, Cue::Play),
        (3.5, Cue::Send(r#"{"type":"SUB_PARAM_UPDATE","path":"frequency.start.baseValue","value":165}"#)),
        (4.5, Cue::Send(r#"{"type":"SAVE_SCENE","slot":1}"#)),
        (5.5, Cue::Send(r#"{"type":"RERESOLVE_AT_EOC"}"#)),
        (6.5, Cue::Send(SECOND_PROGRAM)),
        (7.3, Cue::JumpToEoc),
        (7.6, Cue::Send(r#"{"type":"ROUTING","param":"cutoff","mode":"constant","value":900}"#)),
        (8.5, Cue::Send(r#"{"type":"LOAD_SCENE","slot":1}"#)),
        (9.4, Cue::Pause),
        (9.7, Cue::Send(r#"{"type":"PARAM_VALUE","param":"amp","value":0.3,"portamentoMs":200}"#)),
        (10.0, Cue::Play),
    ];
    if let Some(peer) = late_joiner {
        cues.push((2.2, Cue::Join(peer)));
    }
    cues.sort_by(|a, b| a.0.total_cmp(&b.0));
    cues
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .init();

    if args.list_devices {
        return preview::list_output_devices();
    }

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.default_cycle_length = args.cycle_length;
    config.default_steps_per_cycle = args.steps;
    config.network_delay_ms = args.delay_ms;
    let config = config.sanitized();
    let cycle_length = config.default_cycle_length;

    let (preview_tx, _stream) = if args.play {
        let (tx, rx) = crossbeam::channel::unbounded();
        let stream = preview::start(args.device.as_deref(), rx, cycle_length, args.gain)?;
        (Some(tx), Some(stream))
    } else {
        (None, None)
    };

    let net_rng = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let mut net = SimNetwork::new(args.followers, args.delay_ms, args.jitter_ms, args.loss, net_rng);
    let mut leader = Leader::new(&config);
    let mut followers: Vec<Follower<PeerSink>> = (0..args.followers)
        .map(|i| {
            let cfg = match args.seed {
                Some(s) => config.clone().with_seed(s.wrapping_add(1 + i as u64)),
                None => config.clone(),
            };
            let tx = if i == 0 { preview_tx.clone() } else { None };
            Follower::new(&cfg, PeerSink::new(i, tx))
        })
        .collect();

    let late_joiner = (args.followers > 1).then(|| args.followers - 1);
    if let Some(peer) = late_joiner {
        net.leave(peer);
    }
    let mut cues = script(late_joiner).into_iter().peekable();

    info!(
        followers = args.followers,
        cycles = args.cycles,
        cycle_length,
        steps = args.steps,
        "performance start"
    );

    let until = (f64::from(args.cycles) + 0.5) * cycle_length;
    let dt = 0.001;
    let wall = Instant::now();
    let mut worst_error: f64 = 0.0;
    let mut now = 0.0;
    while now < until {
        now += dt;
        net.set_now(now);

        while let Some((_, cue)) = cues.next_if(|(at, _)| at * cycle_length <= now) {
            match cue {
                Cue::Send(json) => match Inbound::from_json(json) {
                    Ok(msg) => leader.broadcast_ordered(&msg, &mut net),
                    Err(e) => warn!(error = %e, "bad scripted message"),
                },
                Cue::Play => {
                    leader.play(now, &mut net);
                }
                Cue::Pause => {
                    leader.pause(now, &mut net);
                }
                Cue::JumpToEoc => {
                    leader.jump_to_eoc(now, &mut net);
                }
                Cue::Join(peer) => {
                    info!(peer, "late join");
                    net.join(peer);
                }
            }
        }

        let events = leader.tick(now, &mut net);
        for (peer, msg) in net.due(now) {
            followers[peer].receive(msg, now);
        }
        for f in followers.iter_mut() {
            f.tick(now);
        }

        for ev in &events {
            if let ClockEvent::CycleBoundary { cycle } = ev {
                let lead = leader.phase(now);
                let err = followers
                    .iter()
                    .filter(|f| f.engine().is_playing())
                    .map(|f| phase_delta(lead, f.phase(now)).abs())
                    .fold(0.0, f64::max);
                worst_error = worst_error.max(err);
                let freqs: Vec<f64> = followers
                    .iter()
                    .map(|f| f.sink().last.get("frequency").map_or(0.0, |e| e.start_value))
                    .collect();
                info!(cycle, phase_error = err, ?freqs, "leader boundary");
            }
        }

        if args.play {
            let target = Duration::from_secs_f64(now);
            let elapsed = wall.elapsed();
            if target > elapsed + Duration::from_millis(5) {
                std::thread::sleep(target - elapsed);
            }
        }
    }

    for f in &followers {
        let sink = f.sink();
        info!(
            peer = sink.id,
            cycle = ?f.engine().cycle(),
            batches = sink.batches,
            edits = sink.edits,
            scenes = f.engine().scenes().len(),
            "follower summary"
        );
    }
    info!(worst_phase_error = worst_error, beacons_dropped = net.dropped(), "performance done");

    if let (Some(path), Some(f)) = (&args.bank_out, followers.first()) {
        f.engine().scenes().save(path)?;
    }
    Ok(())
}
