//! Leader and followers over a jittery in-memory network.

use ensemble_core::phase::phase_delta;
use ensemble_engine::{
    AudioCommand, EngineConfig, Follower, Inbound, Leader, RecordingSink, Transport,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Net {
    now: f64,
    peers: usize,
    rng: StdRng,
    /// Fraction of beacons lost.
    loss: f64,
    queue: Vec<(f64, usize, Inbound)>,
}

impl Net {
    fn new(peers: usize, seed: u64) -> Self {
        Self { now: 0.0, peers, rng: StdRng::seed_from_u64(seed), loss: 0.0, queue: Vec::new() }
    }

    fn due(&mut self, now: f64) -> Vec<(usize, Inbound)> {
        self.queue.sort_by(|a, b| a.0.total_cmp(&b.0));
        let split = self.queue.partition_point(|(t, _, _)| *t <= now);
        self.queue.drain(..split).map(|(_, p, m)| (p, m)).collect()
    }
}

impl Transport for Net {
    fn broadcast_unordered(&mut self, msg: &Inbound) {
        for p in 0..self.peers {
            if self.rng.gen::<f64>() < self.loss {
                continue;
            }
            let delay = self.rng.gen_range(0.02..0.06);
            self.queue.push((self.now + delay, p, msg.clone()));
        }
    }

    fn broadcast_ordered(&mut self, msg: &Inbound) {
        for p in 0..self.peers {
            self.queue.push((self.now + 0.04, p, msg.clone()));
        }
    }
}

const PROGRAM: &str = r#"{"type":"PROGRAM_UPDATE",
    "frequency":{"startValueGenerator":{"type":"periodic","numerators":"1-4","denominators":"1",
                 "numeratorBehavior":"ascending","baseValue":110}},
    "amp":{"startValueGenerator":{"type":"normalised","range":0.5}}}"#;

fn follower_config() -> EngineConfig {
    EngineConfig { network_delay_ms: 40.0, default_cycle_length: 1.0, ..EngineConfig::default() }
}

fn boundary_batches(sink: &RecordingSink) -> usize {
    sink.commands
        .iter()
        .filter(|c| matches!(c, AudioCommand::SetAllEnv { params } if params.values().all(|e| e.portamento_ms == 0.0)))
        .count()
}

/// Run a performance; `script` is called once per tick with the leader and network.
fn perform(
    followers: &mut [Follower<RecordingSink>],
    leader: &mut Leader,
    net: &mut Net,
    until: f64,
    mut script: impl FnMut(f64, &mut Leader, &mut Net, &mut [Follower<RecordingSink>]),
) {
    let dt = 0.001;
    let mut now = 0.0;
    while now < until {
        now += dt;
        net.now = now;
        script(now, &mut *leader, &mut *net, &mut *followers);
        leader.tick(now, net);
        for (p, msg) in net.due(now) {
            followers[p].receive(msg, now);
        }
        for f in followers.iter_mut() {
            f.tick(now);
        }
    }
}

#[test]
fn followers_fire_one_boundary_per_leader_cycle() {
    let cfg = EngineConfig { default_cycle_length: 1.0, default_steps_per_cycle: 4, ..EngineConfig::default() };
    let mut leader = Leader::new(&cfg);
    let mut net = Net::new(3, 1);
    let mut followers: Vec<_> = (0..3)
        .map(|i| Follower::new(&follower_config().with_seed(i), RecordingSink::new()))
        .collect();

    leader.broadcast_ordered(&Inbound::from_json(PROGRAM).unwrap(), &mut net);
    let mut started = false;
    perform(&mut followers, &mut leader, &mut net, 20.5, |now, leader, net, _| {
        if !started && now >= 0.1 {
            leader.play(now, net);
            started = true;
        }
    });

    for f in &followers {
        assert_eq!(f.engine().cycle(), Some(20));
        assert_eq!(boundary_batches(f.sink()), 20);
        let err = phase_delta(leader.phase(20.5), f.phase(20.5)).abs();
        assert!(err < 0.04, "phase error {err}");
    }
    // ascending sequences stay in lockstep across peers
    let last: Vec<f64> = followers.iter().map(|f| f.sink().last_envelope("frequency").unwrap().start_value).collect();
    assert!(last.windows(2).all(|w| w[0] == w[1]), "{last:?}");
}

#[test]
fn staged_update_lands_on_the_same_boundary_everywhere() {
    let cfg = EngineConfig { default_cycle_length: 1.0, default_steps_per_cycle: 4, ..EngineConfig::default() };
    let mut leader = Leader::new(&cfg);
    let mut net = Net::new(2, 2);
    let mut followers: Vec<_> = (0..2)
        .map(|i| Follower::new(&follower_config().with_seed(10 + i), RecordingSink::new()))
        .collect();
    leader.broadcast_ordered(&Inbound::from_json(PROGRAM).unwrap(), &mut net);

    let mut step = 0;
    perform(&mut followers, &mut leader, &mut net, 6.5, |now, leader, net, followers| {
        if step == 0 && now >= 0.1 {
            leader.play(now, net);
            step = 1;
        }
        if step == 1 && now >= 3.3 {
            let msg = Inbound::from_json(r#"{"type":"SUB_PARAM_UPDATE","path":"amp.start.range","value":0.9}"#).unwrap();
            leader.broadcast_ordered(&msg, net);
            step = 2;
        }
        if step == 2 && now >= 3.8 {
            // delivered, but the running cycle is untouched
            for f in followers.iter() {
                assert_eq!(f.sink().last_envelope("amp").unwrap().start_value, 0.5);
            }
            step = 3;
        }
    });

    for f in &followers {
        let amps: Vec<f64> = f
            .sink()
            .commands
            .iter()
            .filter_map(|c| match c {
                AudioCommand::SetAllEnv { params } => params.get("amp").map(|e| e.start_value),
                AudioCommand::SetEnv { .. } => None,
            })
            .collect();
        // program push + 6 boundaries; the change shows from the 4th boundary on
        assert_eq!(amps, vec![0.5, 0.5, 0.5, 0.5, 0.9, 0.9, 0.9]);
    }
}

#[test]
fn beacon_loss_degrades_to_free_running() {
    let cfg = EngineConfig { default_cycle_length: 1.0, default_steps_per_cycle: 4, ..EngineConfig::default() };
    let mut leader = Leader::new(&cfg);
    let mut net = Net::new(1, 3);
    let mut followers = vec![Follower::new(&follower_config(), RecordingSink::new())];
    let mut started = false;
    perform(&mut followers, &mut leader, &mut net, 10.5, |now, leader, net, _| {
        if !started && now >= 0.1 {
            leader.play(now, net);
            started = true;
        }
        if now >= 2.0 {
            net.loss = 1.0;
        }
    });
    let f = &followers[0];
    assert!(f.engine().is_playing());
    assert_eq!(f.engine().cycle(), Some(10));
    let err = phase_delta(leader.phase(10.5), f.phase(10.5)).abs();
    assert!(err < 0.05, "phase error {err}");
}

#[test]
fn paused_heartbeat_near_zero_fires_nothing() {
    let mut f = Follower::new(&follower_config(), RecordingSink::new());
    f.receive_json(
        r#"{"type":"PHASOR_SYNC","phase":0.002,"stepsPerCycle":4,"cycleLength":1,"isPlaying":false,"timestamp":3}"#,
        0.0,
    )
    .unwrap();
    f.tick(10.0);
    assert_eq!(f.engine().cycle(), None);
    assert!(f.sink().commands.is_empty());
    assert!(!f.snapshot(10.0).is_playing);
}

#[test]
fn pause_and_resume_through_the_leader() {
    let cfg = EngineConfig { default_cycle_length: 1.0, default_steps_per_cycle: 4, ..EngineConfig::default() };
    let mut leader = Leader::new(&cfg);
    let mut net = Net::new(1, 4);
    let mut followers = vec![Follower::new(&follower_config(), RecordingSink::new())];
    leader.broadcast_ordered(&Inbound::from_json(PROGRAM).unwrap(), &mut net);
    let mut step = 0;
    perform(&mut followers, &mut leader, &mut net, 8.5, |now, leader, net, followers| {
        match step {
            0 if now >= 0.1 => {
                leader.play(now, net);
                step = 1;
            }
            1 if now >= 3.5 => {
                leader.pause(now, net);
                step = 2;
            }
            2 if now >= 4.0 => {
                assert!(!followers[0].engine().is_playing());
                let msg = Inbound::from_json(r#"{"type":"PARAM_VALUE","param":"amp","value":0.1,"portamentoMs":80}"#).unwrap();
                leader.broadcast_ordered(&msg, net);
                step = 3;
            }
            3 if now >= 4.5 => {
                // paused edits are heard right away, with the glide asked for
                let env = followers[0].sink().last_envelope("amp").unwrap();
                assert_eq!((env.start_value, env.portamento_ms), (0.1, 80.0));
                leader.play(now, net);
                step = 4;
            }
            _ => {}
        }
    });
    let f = &followers[0];
    assert!(f.engine().is_playing());
    // no boundary fires while paused; the clock resumes mid-cycle
    assert_eq!(f.engine().cycle(), Some(7));
}
