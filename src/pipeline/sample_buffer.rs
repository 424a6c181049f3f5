//! Bounded-lookahead reassembly buffer.
//!
//! Accepts RTP packets in any arrival order and emits complete, time-ordered
//! samples. A sliding window sorted by sequence number absorbs reordering;
//! `max_late` bounds how far the stream may advance past a missing packet
//! before the gap is abandoned as unrecoverable loss. Loss is silent: it
//! shows up only in the drop counters, never as an error.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::warn;
use rtp::packet::Packet;

use super::health::PipelineHealth;
use crate::codec::PayloadStrategy;

/// Returns true if `a` precedes `b` in 16-bit wrapping sequence order.
fn seq_before(a: u16, b: u16) -> bool {
    a != b && b.wrapping_sub(a) < 0x8000
}

/// Out-of-order reassembly buffer for one track.
///
/// A sample is a run of consecutive-sequence packets sharing one timestamp.
/// The run is complete when its last packet is a partition tail, or when the
/// sequence-consecutive packet of the next sample has arrived (a timestamp
/// change proves the boundary). Either signal is carried by the packets
/// themselves, so emission is invariant under reordering within the window.
pub struct SampleBuffer {
    strategy: PayloadStrategy,
    max_late: u16,
    max_window: usize,
    /// Pending packets in ascending (wrapping) sequence order.
    window: VecDeque<Packet>,
    /// Sequence number the next emission starts at.
    next_seq: Option<u16>,
    /// Set once the buffer has emitted or deliberately skipped; from then on
    /// packets older than the emission point are dropped instead of buffered.
    started: bool,
    health: Arc<PipelineHealth>,
}

impl SampleBuffer {
    /// `max_late` is the lookahead depth in packets and must be non-zero
    /// (validated by the engine constructor).
    pub fn new(strategy: PayloadStrategy, max_late: u16, health: Arc<PipelineHealth>) -> Self {
        let max_window = (max_late as usize).saturating_mul(4).max(64);
        Self {
            strategy,
            max_late,
            max_window,
            window: VecDeque::new(),
            next_seq: None,
            started: false,
            health,
        }
    }

    /// Ingest one packet, in any order. Duplicates and packets older than the
    /// current emission point are discarded.
    pub fn push(&mut self, packet: Packet) {
        self.health.record_packet();
        let seq = packet.header.sequence_number;

        match self.next_seq {
            Some(next) if seq_before(seq, next) => {
                if self.started {
                    // arrived after its sample was emitted or given up on
                    self.health.record_dropped(1);
                    return;
                }
                // stream start is not pinned yet, slide the emission point back
                self.next_seq = Some(seq);
            }
            None => self.next_seq = Some(seq),
            _ => {}
        }

        if self.window.iter().any(|p| p.header.sequence_number == seq) {
            return; // duplicate
        }

        let pos = self
            .window
            .iter()
            .position(|p| seq_before(seq, p.header.sequence_number));
        match pos {
            Some(i) => self.window.insert(i, packet),
            None => self.window.push_back(packet),
        }

        if self.window.len() > self.max_window {
            self.evict_front();
        }
    }

    /// Emit the oldest fully reassembled sample with its RTP timestamp, or
    /// `None` if no sample is ready yet.
    pub fn pop(&mut self) -> Option<(Bytes, u32)> {
        loop {
            let front = self.window.front()?;
            let front_seq = front.header.sequence_number;
            let ts = front.header.timestamp;
            let expected = *self.next_seq.get_or_insert(front_seq);

            if front_seq != expected {
                // missing packet(s) at the emission point
                if self.span_from(expected) < self.max_late {
                    return None; // may still arrive
                }
                self.health
                    .record_dropped(u64::from(front_seq.wrapping_sub(expected)));
                self.started = true;
                self.next_seq = Some(front_seq);
                continue;
            }

            // collect the run of consecutive packets sharing the front timestamp
            let mut len = 0usize;
            let mut complete = false;
            for (i, p) in self.window.iter().enumerate() {
                if p.header.sequence_number != expected.wrapping_add(i as u16) {
                    break; // run interrupted by a gap
                }
                if p.header.timestamp != ts {
                    // the next sample's packet proves the boundary closed
                    complete = true;
                    break;
                }
                len += 1;
                if self.strategy.is_partition_tail(p.header.marker, &p.payload) {
                    complete = true;
                    break;
                }
            }

            if !complete {
                if self.span_from(expected) < self.max_late {
                    return None;
                }
                // the closing fragment can no longer arrive
                self.drop_front(len);
                continue;
            }

            if self.strategy.has_head_checker()
                && !self
                    .strategy
                    .is_partition_head(&self.window.front()?.payload)
            {
                // run does not open on a partition boundary
                if !self.started && self.span_from(expected) < self.max_late {
                    return None; // earlier fragments may still be in flight
                }
                self.drop_front(1);
                continue;
            }

            // reassemble
            let mut data = BytesMut::new();
            let mut ok = true;
            for _ in 0..len {
                let Some(p) = self.window.pop_front() else {
                    break;
                };
                match self.strategy.depacketize(&p.payload) {
                    Ok(fragment) => data.extend_from_slice(&fragment),
                    Err(e) => {
                        warn!(
                            "depacketize failed at seq {}: {e}",
                            p.header.sequence_number
                        );
                        ok = false;
                    }
                }
            }
            self.started = true;
            self.next_seq = Some(expected.wrapping_add(len as u16));

            if !ok || data.is_empty() {
                self.health.record_dropped(len as u64);
                continue;
            }
            return Some((data.freeze(), ts));
        }
    }

    /// Number of packets currently buffered.
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    /// Distance from `from` to the newest buffered sequence number.
    fn span_from(&self, from: u16) -> u16 {
        match self.window.back() {
            Some(p) => p.header.sequence_number.wrapping_sub(from),
            None => 0,
        }
    }

    /// Discard the first `n` packets of the window and advance past them.
    fn drop_front(&mut self, n: usize) {
        let n = n.max(1);
        for _ in 0..n {
            self.window.pop_front();
        }
        self.health.record_dropped(n as u64);
        self.started = true;
        if let Some(next) = self.next_seq {
            self.next_seq = Some(next.wrapping_add(n as u16));
        }
    }

    /// Window overrun: give up on the oldest packet and resync to the next.
    fn evict_front(&mut self) {
        if self.window.pop_front().is_some() {
            self.health.record_dropped(1);
            self.started = true;
            if let Some(front) = self.window.front() {
                self.next_seq = Some(front.header.sequence_number);
                warn!(
                    "reassembly window overflow, resynced to seq {}",
                    front.header.sequence_number
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtp::header::Header;

    fn packet(seq: u16, ts: u32, marker: bool, payload: &[u8]) -> Packet {
        Packet {
            header: Header {
                sequence_number: seq,
                timestamp: ts,
                marker,
                ..Default::default()
            },
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn opus_buffer(max_late: u16) -> SampleBuffer {
        SampleBuffer::new(
            PayloadStrategy::for_codec("opus"),
            max_late,
            Arc::new(PipelineHealth::new()),
        )
    }

    fn vp8_buffer(max_late: u16) -> SampleBuffer {
        SampleBuffer::new(
            PayloadStrategy::for_codec("video/VP8"),
            max_late,
            Arc::new(PipelineHealth::new()),
        )
    }

    // VP8 payload descriptor: 0x10 sets the S bit (partition head)
    fn vp8_head(seq: u16, ts: u32, marker: bool, data: &[u8]) -> Packet {
        let mut payload = vec![0x10];
        payload.extend_from_slice(data);
        packet(seq, ts, marker, &payload)
    }

    fn vp8_cont(seq: u16, ts: u32, marker: bool, data: &[u8]) -> Packet {
        let mut payload = vec![0x00];
        payload.extend_from_slice(data);
        packet(seq, ts, marker, &payload)
    }

    fn drain(buffer: &mut SampleBuffer) -> Vec<(Bytes, u32)> {
        let mut out = Vec::new();
        while let Some(sample) = buffer.pop() {
            out.push(sample);
        }
        out
    }

    #[test]
    fn test_opus_in_order() {
        let mut buffer = opus_buffer(50);
        buffer.push(packet(10, 1000, true, &[1]));
        buffer.push(packet(11, 2000, true, &[2]));
        buffer.push(packet(12, 3000, true, &[3]));

        let samples = drain(&mut buffer);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], (Bytes::from_static(&[1]), 1000));
        assert_eq!(samples[1], (Bytes::from_static(&[2]), 2000));
        assert_eq!(samples[2], (Bytes::from_static(&[3]), 3000));
    }

    #[test]
    fn test_vp8_fragmented_sample() {
        let mut buffer = vp8_buffer(50);
        buffer.push(vp8_head(1, 1000, false, &[1, 2, 3, 4]));
        assert!(buffer.pop().is_none());
        buffer.push(vp8_cont(2, 1000, false, &[5, 6, 7, 8]));
        assert!(buffer.pop().is_none());
        buffer.push(vp8_cont(3, 1000, true, &[9, 10, 11, 12]));

        let (data, ts) = buffer.pop().expect("sample ready after tail");
        assert_eq!(ts, 1000);
        assert_eq!(
            data.as_ref(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
        );
    }

    #[test]
    fn test_fragments_arriving_backwards() {
        // parts of A arrive as [A3, A1, A2], then B
        let mut buffer = vp8_buffer(50);
        buffer.push(vp8_cont(3, 1000, true, &[9, 10, 11, 12]));
        assert!(buffer.pop().is_none());
        buffer.push(vp8_head(1, 1000, false, &[1, 2, 3, 4]));
        assert!(buffer.pop().is_none());
        buffer.push(vp8_cont(2, 1000, false, &[5, 6, 7, 8]));

        let (a, ts_a) = buffer.pop().expect("A complete");
        assert_eq!(ts_a, 1000);
        assert_eq!(a.as_ref(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);

        buffer.push(vp8_head(4, 2000, true, &[20, 21, 22, 23]));
        let (b, ts_b) = buffer.pop().expect("B complete");
        assert_eq!(ts_b, 2000);
        assert_eq!(b.as_ref(), &[20, 21, 22, 23]);
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_reordering_invariance_within_window() {
        // same packets, one feed ordered and one shuffled, same samples out;
        // a first in-order sample pins the emission point in both buffers
        let pin = vp8_head(99, 500, true, &[9, 9, 9, 9]);
        let ordered = vec![
            vp8_head(100, 1000, false, &[1, 1, 1, 1]),
            vp8_cont(101, 1000, true, &[2, 2, 2, 2]),
            vp8_head(102, 2000, true, &[3, 3, 3, 3]),
            vp8_head(103, 3000, false, &[4, 4, 4, 4]),
            vp8_cont(104, 3000, true, &[5, 5, 5, 5]),
            vp8_head(105, 4000, true, &[6, 6, 6, 6]),
        ];
        let shuffled_order = [2usize, 0, 4, 1, 5, 3];

        let mut in_order = vp8_buffer(50);
        let mut out_of_order = vp8_buffer(50);
        in_order.push(pin.clone());
        out_of_order.push(pin);
        assert_eq!(drain(&mut in_order).len(), 1);
        assert_eq!(drain(&mut out_of_order).len(), 1);

        let mut from_ordered = Vec::new();
        for p in &ordered {
            in_order.push(p.clone());
            from_ordered.extend(drain(&mut in_order));
        }

        let mut from_shuffled = Vec::new();
        for &i in &shuffled_order {
            out_of_order.push(ordered[i].clone());
            from_shuffled.extend(drain(&mut out_of_order));
        }

        assert_eq!(from_ordered, from_shuffled);
        assert_eq!(from_ordered.len(), 4);
    }

    #[test]
    fn test_gap_abandoned_after_lookahead() {
        let mut buffer = opus_buffer(10);
        buffer.push(packet(0, 0, true, &[0]));
        assert_eq!(drain(&mut buffer).len(), 1);

        // seq 1 never arrives
        for seq in 2..=10u16 {
            buffer.push(packet(seq, u32::from(seq) * 100, true, &[seq as u8]));
            assert!(buffer.pop().is_none(), "gap still within lookahead");
        }

        // window now spans max_late past the missing packet
        buffer.push(packet(11, 1100, true, &[11]));
        let samples = drain(&mut buffer);
        assert_eq!(samples.len(), 10);
        assert_eq!(samples[0].0.as_ref(), &[2]);
    }

    #[test]
    fn test_late_packet_dropped_after_emission() {
        let mut buffer = opus_buffer(50);
        buffer.push(packet(10, 1000, true, &[10]));
        assert_eq!(drain(&mut buffer).len(), 1);

        let health = buffer.health.clone();
        let dropped_before = health.packets_dropped();
        buffer.push(packet(5, 500, true, &[5]));
        assert_eq!(buffer.pending(), 0);
        assert_eq!(health.packets_dropped(), dropped_before + 1);
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_duplicate_discarded() {
        let mut buffer = vp8_buffer(50);
        buffer.push(vp8_head(1, 1000, false, &[1, 2, 3, 4]));
        buffer.push(vp8_head(1, 1000, false, &[1, 2, 3, 4]));
        assert_eq!(buffer.pending(), 1);
    }

    #[test]
    fn test_headless_run_dropped_mid_stream() {
        let mut buffer = vp8_buffer(50);
        buffer.push(vp8_head(1, 1000, true, &[1, 1, 1, 1]));
        assert_eq!(drain(&mut buffer).len(), 1);

        // continuation with no head: its opening fragment is already lost
        buffer.push(vp8_cont(2, 2000, true, &[2, 2, 2, 2]));
        buffer.push(vp8_head(3, 3000, true, &[3, 3, 3, 3]));

        let samples = drain(&mut buffer);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].1, 3000);
    }

    #[test]
    fn test_stale_incomplete_run_discarded() {
        // no tail marker and no following sample: once the window spans the
        // lookahead depth the run is given up
        let mut buffer = SampleBuffer::new(
            PayloadStrategy::for_codec("x-unknown"),
            8,
            Arc::new(PipelineHealth::new()),
        );
        for seq in 0..=8u16 {
            buffer.push(packet(seq, 7000, false, &[seq as u8]));
        }
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.health.packets_dropped(), 9);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut buffer = opus_buffer(50);
        buffer.push(packet(65534, 100, true, &[1]));
        buffer.push(packet(65535, 200, true, &[2]));
        buffer.push(packet(0, 300, true, &[3]));
        buffer.push(packet(1, 400, true, &[4]));

        let samples = drain(&mut buffer);
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[3], (Bytes::from_static(&[4]), 400));
    }
}
