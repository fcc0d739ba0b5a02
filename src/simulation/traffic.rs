//! Traffic generation into the per-node packet buffer.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};
use std::collections::VecDeque;

use crate::scheduler::Time;
use crate::simulation::types::{PACKET_BUFFER_SIZE, TrafficModel};

/// A buffered application packet awaiting transmission.
#[derive(Debug, Clone, Copy)]
pub struct BufferedPacket {
    /// Generation timestamp, feeding the delay statistics.
    pub generated_at: Time,
}

/// Bounded FIFO packet buffer with drop accounting.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    queue: VecDeque<BufferedPacket>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(PACKET_BUFFER_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append a generated packet; returns false (a drop) when full.
    pub fn push(&mut self, packet: BufferedPacket) -> bool {
        if self.queue.len() >= PACKET_BUFFER_SIZE {
            return false;
        }
        self.queue.push_back(packet);
        true
    }

    pub fn head(&self) -> Option<&BufferedPacket> {
        self.queue.front()
    }

    pub fn pop(&mut self) -> Option<BufferedPacket> {
        self.queue.pop_front()
    }

    /// Pop up to `n` packets (one A-MPDU worth), returning the batch.
    pub fn pop_batch(&mut self, n: usize) -> Vec<BufferedPacket> {
        let take = n.min(self.queue.len());
        self.queue.drain(..take).collect()
    }
}

/// Time until the next packet arrival, or None for full-buffer sources
/// (which never schedule arrival events).
pub fn next_arrival_gap(model: TrafficModel, rng: &mut StdRng) -> Option<Time> {
    match model {
        TrafficModel::FullBuffer => None,
        TrafficModel::Poisson { load } => {
            if load <= 0.0 {
                return None;
            }
            let exp = Exp::new(load).expect("invalid traffic load");
            Some(exp.sample(rng))
        }
        TrafficModel::Deterministic { load } => {
            if load <= 0.0 {
                return None;
            }
            Some(1.0 / load)
        }
    }
}

/// Top the buffer up to capacity (full-buffer model at startup and after
/// every delivery).
pub fn refill(buffer: &mut PacketBuffer, now: Time) {
    while buffer.push(BufferedPacket { generated_at: now }) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn buffer_drops_beyond_capacity() {
        let mut buffer = PacketBuffer::new();
        for _ in 0..PACKET_BUFFER_SIZE {
            assert!(buffer.push(BufferedPacket { generated_at: 0.0 }));
        }
        assert!(!buffer.push(BufferedPacket { generated_at: 1.0 }));
        assert_eq!(buffer.len(), PACKET_BUFFER_SIZE);
    }

    #[test]
    fn batch_pop_preserves_fifo_order() {
        let mut buffer = PacketBuffer::new();
        for i in 0..10 {
            buffer.push(BufferedPacket {
                generated_at: i as Time,
            });
        }
        let batch = buffer.pop_batch(4);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch[0].generated_at, 0.0);
        assert_eq!(batch[3].generated_at, 3.0);
        assert_eq!(buffer.head().unwrap().generated_at, 4.0);
        // Asking for more than available drains what is there.
        assert_eq!(buffer.pop_batch(100).len(), 6);
        assert!(buffer.is_empty());
    }

    #[test]
    fn arrival_gaps_match_models() {
        let mut rng = StdRng::seed_from_u64(11);
        assert_eq!(next_arrival_gap(TrafficModel::FullBuffer, &mut rng), None);
        let gap = next_arrival_gap(TrafficModel::Deterministic { load: 200.0 }, &mut rng).unwrap();
        assert!((gap - 0.005).abs() < 1e-12);
        // Poisson mean inter-arrival ≈ 1/load.
        let mut sum = 0.0;
        let n = 5000;
        for _ in 0..n {
            sum += next_arrival_gap(TrafficModel::Poisson { load: 100.0 }, &mut rng).unwrap();
        }
        let mean = sum / n as f64;
        assert!((mean - 0.01).abs() < 0.001, "mean = {mean}");
    }

    #[test]
    fn refill_fills_to_capacity() {
        let mut buffer = PacketBuffer::new();
        buffer.push(BufferedPacket { generated_at: 0.0 });
        refill(&mut buffer, 5.0);
        assert_eq!(buffer.len(), PACKET_BUFFER_SIZE);
        assert_eq!(buffer.head().unwrap().generated_at, 0.0);
    }
}
