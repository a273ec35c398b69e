//! Streaming chunk cutting for a recording session.
//!
//! Mirrors the capture loop's own bookkeeping: every read appended to the
//! session buffer is also offered to a [`ChunkAccumulator`], which decides
//! when enough new samples have built up to cut and emit the next chunk.
//! Kept as a standalone, clock-free unit so the cutting logic (and the
//! buffer-conservation invariant it must uphold) can be tested without a
//! real input device.

use std::time::Duration;

/// Tracks how much of a growing sample buffer has already been handed off
/// as a streaming chunk, and decides when to cut the next one.
///
/// `chunked_samples_sent` only ever grows, and it never exceeds the total
/// number of samples captured so far -- the invariant the recorder's
/// buffer-conservation property rests on.
pub struct ChunkAccumulator {
    chunk_len_samples: usize,
    chunked_samples_sent: usize,
    next_chunk_id: u64,
}

impl ChunkAccumulator {
    /// `chunk_duration` is converted to a sample count using `sample_rate_hz`;
    /// a zero or unreasonably short duration is clamped to one sample so the
    /// accumulator always makes forward progress.
    pub fn new(chunk_duration: Duration, sample_rate_hz: u32) -> Self {
        let chunk_len_samples =
            ((chunk_duration.as_secs_f64() * sample_rate_hz as f64).round() as usize).max(1);
        Self {
            chunk_len_samples,
            chunked_samples_sent: 0,
            next_chunk_id: 0,
        }
    }

    pub fn chunked_samples_sent(&self) -> usize {
        self.chunked_samples_sent
    }

    /// Offers the current total sample count captured so far. Returns every
    /// full chunk that can now be cut, as `(chunk_id, start, end)` ranges
    /// into the caller's buffer, oldest first. `total_samples` must be
    /// monotonically non-decreasing across calls.
    pub fn poll(&mut self, total_samples: usize) -> Vec<(u64, usize, usize)> {
        let mut cut = Vec::new();
        while total_samples - self.chunked_samples_sent >= self.chunk_len_samples {
            let start = self.chunked_samples_sent;
            let end = start + self.chunk_len_samples;
            cut.push((self.next_chunk_id, start, end));
            self.next_chunk_id += 1;
            self.chunked_samples_sent = end;
        }
        cut
    }

    /// Resets for a new recording session; chunk ids keep counting up rather
    /// than restarting at zero, so a caller that logs chunk ids across
    /// sessions never sees a collision.
    pub fn reset(&mut self) {
        self.chunked_samples_sent = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuts_full_chunks_only_and_advances_monotonically() {
        // 1 second of audio at 16kHz, chunk duration 0.25s => 4000 samples/chunk.
        let mut acc = ChunkAccumulator::new(Duration::from_millis(250), 16_000);

        assert!(acc.poll(3_999).is_empty());
        assert_eq!(acc.chunked_samples_sent(), 0);

        let cut = acc.poll(4_000);
        assert_eq!(cut, vec![(0, 0, 4_000)]);
        assert_eq!(acc.chunked_samples_sent(), 4_000);

        // Two more chunks' worth arrive in one go.
        let cut = acc.poll(12_000);
        assert_eq!(cut, vec![(1, 4_000, 8_000), (2, 8_000, 12_000)]);
        assert_eq!(acc.chunked_samples_sent(), 12_000);

        // Partial remainder is never emitted.
        assert!(acc.poll(13_500).is_empty());
        assert_eq!(acc.chunked_samples_sent(), 12_000);
    }

    #[test]
    fn buffer_conservation_holds_for_arbitrary_growth_schedule() {
        // P1: concatenating every emitted chunk plus the final remaining
        // tail must reconstruct the whole buffer exactly, regardless of how
        // unevenly samples trickle in between polls.
        let mut acc = ChunkAccumulator::new(Duration::from_millis(100), 16_000); // 1600/chunk
        let total: Vec<f32> = (0..50_000).map(|i| i as f32).collect();

        let growth_steps = [0usize, 137, 1_600, 1_601, 9_999, 16_000, 50_000];
        let mut reconstructed = Vec::new();
        let mut last_sent = 0usize;

        for &grown_to in &growth_steps {
            for (_, start, end) in acc.poll(grown_to) {
                assert_eq!(start, last_sent);
                reconstructed.extend_from_slice(&total[start..end]);
                last_sent = end;
            }
        }
        // Final tail: whatever never made it into a full chunk.
        reconstructed.extend_from_slice(&total[acc.chunked_samples_sent()..total.len()]);

        assert_eq!(reconstructed, total);
    }

    #[test]
    fn chunk_ids_assigned_in_ascending_order() {
        let mut acc = ChunkAccumulator::new(Duration::from_millis(10), 16_000); // 160/chunk
        let cut = acc.poll(800);
        let ids: Vec<u64> = cut.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn zero_duration_clamped_to_one_sample_and_still_progresses() {
        let mut acc = ChunkAccumulator::new(Duration::from_secs(0), 16_000);
        let cut = acc.poll(3);
        assert_eq!(cut.len(), 3);
        assert_eq!(acc.chunked_samples_sent(), 3);
    }
}
