//! In-memory network with per-peer delay, jitter and beacon loss.
//!
//! Unordered traffic (beacons) gets a random delay and may be dropped.
//! Ordered traffic is never dropped and never overtakes earlier ordered
//! traffic to the same peer. Peers that join late get the ordered history
//! replayed, the way a reliable log-backed transport would.

use ensemble_engine::{Inbound, Transport};
use rand::rngs::StdRng;
use rand::Rng;

pub struct SimNetwork {
    now: f64,
    base_delay: f64,
    jitter: f64,
    loss: f64,
    rng: StdRng,
    joined: Vec<bool>,
    last_ordered: Vec<f64>,
    history: Vec<Inbound>,
    queue: Vec<(f64, usize, Inbound)>,
    dropped: u64,
}

impl SimNetwork {
    pub fn new(peers: usize, base_delay_ms: f64, jitter_ms: f64, loss: f64, rng: StdRng) -> Self {
        Self {
            now: 0.0,
            base_delay: base_delay_ms.max(0.0) * 0.001,
            jitter: jitter_ms.max(0.0) * 0.001,
            loss: loss.clamp(0.0, 1.0),
            rng,
            joined: vec![true; peers],
            last_ordered: vec![0.0; peers],
            history: Vec::new(),
            queue: Vec::new(),
            dropped: 0,
        }
    }

    pub fn set_now(&mut self, now: f64) { self.now = now; }
    pub fn dropped(&self) -> u64 { self.dropped }

    /// Mark a peer as absent; it receives nothing until [`join`](Self::join).
    pub fn leave(&mut self, peer: usize) {
        if let Some(j) = self.joined.get_mut(peer) {
            *j = false;
        }
    }

    pub fn join(&mut self, peer: usize) {
        if peer >= self.joined.len() || self.joined[peer] {
            return;
        }
        self.joined[peer] = true;
        for msg in self.history.clone() {
            self.push_ordered(peer, msg);
        }
    }

    fn delay(&mut self) -> f64 {
        let spread = if self.jitter > 0.0 { self.rng.gen_range(-0.5..0.5) * self.jitter } else { 0.0 };
        (self.base_delay + spread).max(0.0)
    }

    fn push_ordered(&mut self, peer: usize, msg: Inbound) {
        let at = (self.now + self.base_delay + 0.5 * self.jitter).max(self.last_ordered[peer]);
        self.last_ordered[peer] = at;
        self.queue.push((at, peer, msg));
    }

    /// Messages due at `now`, in delivery order.
    pub fn due(&mut self, now: f64) -> Vec<(usize, Inbound)> {
        self.queue.sort_by(|a, b| a.0.total_cmp(&b.0));
        let split = self.queue.partition_point(|(t, _, _)| *t <= now);
        self.queue.drain(..split).map(|(_, p, m)| (p, m)).collect()
    }
}

impl Transport for SimNetwork {
    fn broadcast_unordered(&mut self, msg: &Inbound) {
        for peer in 0..self.joined.len() {
            if !self.joined[peer] {
                continue;
            }
            if self.rng.gen::<f64>() < self.loss {
                self.dropped += 1;
                continue;
            }
            let at = self.now + self.delay();
            self.queue.push((at, peer, msg.clone()));
        }
    }

    fn broadcast_ordered(&mut self, msg: &Inbound) {
        self.history.push(msg.clone());
        for peer in 0..self.joined.len() {
            if self.joined[peer] {
                self.push_ordered(peer, msg.clone());
            }
        }
    }
}
