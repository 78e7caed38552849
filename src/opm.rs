// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! At-most-once outbound delivery: a fixed slot table of in-flight,
//! ACK-required packets, retried on a timer and matched off by `(id,
//! nextHop)` when the ACK comes back.

use crate::address::NodeAddr;
use crate::buffer::CircularBuffer;
use crate::packet::{Packet, MAX_PACKET_LEN};

const OPM_SLOTS: usize = 8;

struct PendingSlot {
    packet: Packet,
    packet_len: usize,
    first_send_time: u32,
    last_attempt_time: u32,
    attempts: u32,
}

/// Schedules at-most-once delivery of ACK-required packets, with
/// timeout-bounded retry and TX-full backpressure.
pub struct OutboundPacketManager<const TX_CAP: usize> {
    slots: [Option<PendingSlot>; OPM_SLOTS],
    tx_timeout_ms: u32,
    tx_retry_ms: u32,
    failed_delivery_count: u32,
}

impl<const TX_CAP: usize> OutboundPacketManager<TX_CAP> {
    pub fn new(tx_timeout_ms: u32, tx_retry_ms: u32) -> Self {
        OutboundPacketManager {
            slots: [None, None, None, None, None, None, None, None],
            tx_timeout_ms,
            tx_retry_ms,
            failed_delivery_count: 0,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn failed_delivery_count(&self) -> u32 {
        self.failed_delivery_count
    }

    /// Emits `packet` to `tx` immediately. If the header asks for an ACK,
    /// also claims a free slot so `pump()` retries it; if no slot is free
    /// the call fails without touching `tx`. Non-ACK-required packets are
    /// fire-and-forget: emitted if `tx` has room, never retried.
    pub fn schedule_transmit_if_possible(
        &mut self,
        tx: &mut CircularBuffer<0, TX_CAP>,
        packet: &Packet,
        len: usize,
        now: u32,
    ) -> bool {
        if packet.header.is_ack_required() {
            let free_index = match self.slots.iter().position(|s| s.is_none()) {
                Some(i) => i,
                None => return false,
            };
            let mut scratch = [0u8; MAX_PACKET_LEN];
            packet.encode(&mut scratch);
            if !tx.push(&[], &scratch[..len]) {
                return false;
            }
            self.slots[free_index] = Some(PendingSlot {
                packet: *packet,
                packet_len: len,
                first_send_time: now,
                last_attempt_time: now,
                attempts: 1,
            });
            true
        } else {
            let mut scratch = [0u8; MAX_PACKET_LEN];
            packet.encode(&mut scratch);
            tx.push(&[], &scratch[..len])
        }
    }

    /// Frees the slot whose `(id, nextHop)` matches the ACK's `(id,
    /// sourceAddr)`. Unmatched ACKs are silently dropped.
    pub fn process_ack(&mut self, ack_id: u16, ack_source_addr: NodeAddr) {
        for slot in self.slots.iter_mut() {
            let matches = matches!(
                slot,
                Some(s) if s.packet.header.id == ack_id && s.packet.header.dest_addr == ack_source_addr
            );
            if matches {
                *slot = None;
                return;
            }
        }
    }

    /// Advances retry/timeout state for every pending slot. Retries that
    /// find `tx` full are deferred, not counted as failures; only a full
    /// `tx_timeout_ms` with no matching ACK counts as a failed delivery.
    pub fn pump(&mut self, tx: &mut CircularBuffer<0, TX_CAP>, now: u32) {
        for slot in self.slots.iter_mut() {
            let expired = match slot {
                Some(s) => now.wrapping_sub(s.first_send_time) >= self.tx_timeout_ms,
                None => false,
            };
            if expired {
                log::warn!("OPM: delivery timeout, giving up");
                self.failed_delivery_count += 1;
                *slot = None;
                continue;
            }
            if let Some(s) = slot {
                if now.wrapping_sub(s.last_attempt_time) >= self.tx_retry_ms {
                    let mut scratch = [0u8; MAX_PACKET_LEN];
                    s.packet.encode(&mut scratch);
                    if tx.push(&[], &scratch[..s.packet_len]) {
                        s.last_attempt_time = now;
                        s.attempts += 1;
                    }
                    // else: tx is full, defer to the next pump.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CallSign;
    use crate::packet::{Header, MessageType, Payload};

    fn ack_required_packet(id: u16, dest: NodeAddr) -> Packet {
        let mut header = Header::new(MessageType::Text);
        header.id = id;
        header.source_addr = 1;
        header.dest_addr = dest;
        header.set_ack_required(true);
        header.source_call = CallSign::from_str("KC1FSZ");
        Packet::new(header, Payload::Text(crate::packet::TextPayload::new(b"hi")))
    }

    #[test]
    fn schedule_fails_when_no_free_slot() {
        let mut opm: OutboundPacketManager<4096> = OutboundPacketManager::new(5_000, 1_000);
        let mut tx: CircularBuffer<0, 4096> = CircularBuffer::new();
        for i in 0..OPM_SLOTS as u16 {
            let packet = ack_required_packet(i, 3);
            let mut buf = [0u8; MAX_PACKET_LEN];
            let len = packet.encode(&mut buf);
            assert!(opm.schedule_transmit_if_possible(&mut tx, &packet, len, 0));
        }
        let overflow = ack_required_packet(999, 3);
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = overflow.encode(&mut buf);
        assert!(!opm.schedule_transmit_if_possible(&mut tx, &overflow, len, 0));
        assert_eq!(opm.pending_count(), OPM_SLOTS);
    }

    #[test]
    fn process_ack_frees_matching_slot_only() {
        let mut opm: OutboundPacketManager<4096> = OutboundPacketManager::new(5_000, 1_000);
        let mut tx: CircularBuffer<0, 4096> = CircularBuffer::new();
        let packet = ack_required_packet(42, 3);
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = packet.encode(&mut buf);
        assert!(opm.schedule_transmit_if_possible(&mut tx, &packet, len, 0));
        assert_eq!(opm.pending_count(), 1);

        // Wrong source address: not a match.
        opm.process_ack(42, 99);
        assert_eq!(opm.pending_count(), 1);

        opm.process_ack(42, 3);
        assert_eq!(opm.pending_count(), 0);
    }

    #[test]
    fn retry_re_emits_and_timeout_frees_the_slot() {
        let mut opm: OutboundPacketManager<4096> = OutboundPacketManager::new(1_000, 100);
        let mut tx: CircularBuffer<0, 4096> = CircularBuffer::new();
        let packet = ack_required_packet(1, 3);
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = packet.encode(&mut buf);
        assert!(opm.schedule_transmit_if_possible(&mut tx, &packet, len, 0));

        let mut side = [0u8; 0];
        let mut payload = [0u8; MAX_PACKET_LEN];
        let mut out_len = 0usize;
        assert!(tx.pop_if_not_empty(&mut side, &mut payload, &mut out_len));
        assert!(tx.is_empty());

        opm.pump(&mut tx, 150);
        assert!(!tx.is_empty());
        assert_eq!(opm.pending_count(), 1);

        opm.pump(&mut tx, 1_500);
        assert_eq!(opm.pending_count(), 0);
        assert_eq!(opm.failed_delivery_count(), 1);
    }

    #[test]
    fn non_ack_required_packet_is_not_retried() {
        let mut opm: OutboundPacketManager<4096> = OutboundPacketManager::new(1_000, 100);
        let mut tx: CircularBuffer<0, 4096> = CircularBuffer::new();
        let mut header = Header::new(MessageType::PingResp);
        header.dest_addr = 3;
        let packet = Packet::new(header, Payload::None);
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = packet.encode(&mut buf);
        assert!(opm.schedule_transmit_if_possible(&mut tx, &packet, len, 0));
        assert_eq!(opm.pending_count(), 0);
    }
}
