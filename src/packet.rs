// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! Header + payload wire layout.
//!
//! The layout is a fixed-size header followed by up to `MAX_PAYLOAD_LEN`
//! bytes of payload, little-endian, no padding — a sum type over the
//! payload rather than a raw byte blob, per the "Packet as a tagged union"
//! design note: callers build and read named fields, the codec is the only
//! place that touches byte offsets.

use crate::address::{CallSign, NodeAddr};
use crate::error::EngineError;

/// Only version this engine accepts; anything else is `UnsupportedVersion`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Header size on the wire: version(1) + type(1) + id(2) + 4 addrs(2 each)
/// + 2 call signs(8 each).
pub const HEADER_LEN: usize = 1 + 1 + 2 + 2 + 2 + 2 + 2 + 8 + 8;

/// Reference hardware caps a whole packet (header + payload) at 256 bytes.
pub const MAX_PACKET_LEN: usize = 256;

/// Largest payload that still fits a `MAX_PACKET_LEN` packet.
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_LEN - HEADER_LEN;

const TYPE_MASK: u8 = 0x3F;
const ACK_BIT: u8 = 0x40;
const ACK_REQUIRED_BIT: u8 = 0x80;

/// Tagged-union discriminant for a packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    PingReq,
    PingResp,
    GetSedReq,
    GetSedResp,
    Reset,
    ResetCounters,
    Text,
    SetRoute,
    GetRouteReq,
    GetRouteResp,
    /// Any discriminant this engine doesn't recognize; dispatched to the
    /// "Unknown message" local handler instead of rejected as malformed.
    Unknown(u8),
}

impl MessageType {
    fn to_byte(self) -> u8 {
        match self {
            MessageType::PingReq => 0,
            MessageType::PingResp => 1,
            MessageType::GetSedReq => 2,
            MessageType::GetSedResp => 3,
            MessageType::Reset => 4,
            MessageType::ResetCounters => 5,
            MessageType::Text => 6,
            MessageType::SetRoute => 7,
            MessageType::GetRouteReq => 8,
            MessageType::GetRouteResp => 9,
            MessageType::Unknown(b) => b,
        }
    }

    fn from_byte(b: u8) -> MessageType {
        match b {
            0 => MessageType::PingReq,
            1 => MessageType::PingResp,
            2 => MessageType::GetSedReq,
            3 => MessageType::GetSedResp,
            4 => MessageType::Reset,
            5 => MessageType::ResetCounters,
            6 => MessageType::Text,
            7 => MessageType::SetRoute,
            8 => MessageType::GetRouteReq,
            9 => MessageType::GetRouteResp,
            other => MessageType::Unknown(other),
        }
    }
}

/// Fixed-size protocol header, byte-compatible across the radio link.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub version: u8,
    type_byte: u8,
    pub id: u16,
    pub source_addr: NodeAddr,
    pub dest_addr: NodeAddr,
    pub original_source_addr: NodeAddr,
    pub final_dest_addr: NodeAddr,
    pub source_call: CallSign,
    pub original_source_call: CallSign,
}

impl Header {
    pub fn new(message_type: MessageType) -> Self {
        Header {
            version: PROTOCOL_VERSION,
            type_byte: message_type.to_byte(),
            id: 0,
            source_addr: 0,
            dest_addr: 0,
            original_source_addr: 0,
            final_dest_addr: 0,
            source_call: CallSign::default(),
            original_source_call: CallSign::default(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_byte(self.type_byte & TYPE_MASK)
    }

    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.type_byte = (self.type_byte & !TYPE_MASK) | (message_type.to_byte() & TYPE_MASK);
    }

    pub fn is_ack(&self) -> bool {
        self.type_byte & ACK_BIT != 0
    }

    pub fn set_ack(&mut self, ack: bool) {
        if ack {
            self.type_byte |= ACK_BIT;
        } else {
            self.type_byte &= !ACK_BIT;
        }
    }

    pub fn is_ack_required(&self) -> bool {
        self.type_byte & ACK_REQUIRED_BIT != 0
    }

    pub fn set_ack_required(&mut self, required: bool) {
        if required {
            self.type_byte |= ACK_REQUIRED_BIT;
        } else {
            self.type_byte &= !ACK_REQUIRED_BIT;
        }
    }

    /// Rewrites the hop-local fields of a packet about to be forwarded,
    /// keeping `originalSourceAddr`/`finalDestAddr` (and both call signs)
    /// untouched end-to-end.
    pub fn rewrite_for_forward(&mut self, next_hop: NodeAddr, self_addr: NodeAddr, new_id: u16) {
        self.source_addr = self_addr;
        self.dest_addr = next_hop;
        self.id = new_id;
    }

    /// Builds the ACK frame for a received, ACK-required header: ACK bit
    /// set, ACK-required bit clear, `id` copied, hop-local reply addressing.
    pub fn setup_ack_for(received: &Header, self_addr: NodeAddr, self_call: CallSign) -> Header {
        let mut header = Header::new(received.message_type());
        header.set_ack(true);
        header.set_ack_required(false);
        header.id = received.id;
        header.source_addr = self_addr;
        header.dest_addr = received.source_addr;
        header.original_source_addr = self_addr;
        header.final_dest_addr = received.source_addr;
        header.source_call = self_call;
        header.original_source_call = self_call;
        header
    }

    /// Builds a locally-originated response to `request`, addressed back
    /// toward the original sender via `first_hop`.
    #[allow(clippy::too_many_arguments)]
    pub fn setup_response_for(
        request: &Header,
        response_type: MessageType,
        first_hop: NodeAddr,
        self_addr: NodeAddr,
        self_call: CallSign,
        id: u16,
    ) -> Header {
        let mut header = Header::new(response_type);
        header.id = id;
        header.source_addr = self_addr;
        header.dest_addr = first_hop;
        header.original_source_addr = self_addr;
        header.final_dest_addr = request.original_source_addr;
        header.source_call = self_call;
        header.original_source_call = self_call;
        header
    }

    pub fn encode(&self, out: &mut [u8]) -> usize {
        out[0] = self.version;
        out[1] = self.type_byte;
        out[2..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..6].copy_from_slice(&self.source_addr.to_le_bytes());
        out[6..8].copy_from_slice(&self.dest_addr.to_le_bytes());
        out[8..10].copy_from_slice(&self.original_source_addr.to_le_bytes());
        out[10..12].copy_from_slice(&self.final_dest_addr.to_le_bytes());
        out[12..20].copy_from_slice(self.source_call.as_bytes());
        out[20..28].copy_from_slice(self.original_source_call.as_bytes());
        HEADER_LEN
    }

    pub fn decode(data: &[u8]) -> Result<Header, EngineError> {
        if data.len() < HEADER_LEN {
            return Err(EngineError::MalformedFrame);
        }
        let mut source_call = [0u8; 8];
        source_call.copy_from_slice(&data[12..20]);
        let mut original_source_call = [0u8; 8];
        original_source_call.copy_from_slice(&data[20..28]);
        Ok(Header {
            version: data[0],
            type_byte: data[1],
            id: u16::from_le_bytes([data[2], data[3]]),
            source_addr: u16::from_le_bytes([data[4], data[5]]),
            dest_addr: u16::from_le_bytes([data[6], data[7]]),
            original_source_addr: u16::from_le_bytes([data[8], data[9]]),
            final_dest_addr: u16::from_le_bytes([data[10], data[11]]),
            source_call: CallSign(source_call),
            original_source_call: CallSign(original_source_call),
        })
    }
}

/// Device status snapshot carried by `GETSED_RESP`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SadResp {
    pub version: u8,
    pub battery_mv: u16,
    pub panel_mv: u16,
    pub uptime_seconds: u32,
    pub time: u32,
    pub boot_count: u16,
    pub sleep_count: u16,
    pub last_hop_rssi: i16,
    pub temp: i16,
    pub humidity: u8,
    pub device_class: u8,
    pub device_revision: u8,
    pub rx_packet_count: u32,
    pub bad_rx_packet_count: u32,
    pub bad_route_count: u32,
}

const SAD_RESP_LEN: usize = 1 + 2 + 2 + 4 + 4 + 2 + 2 + 2 + 2 + 1 + 1 + 1 + 4 + 4 + 4;

/// Raw text payload: `len` bytes, never null-terminated.
#[derive(Debug, Clone, Copy)]
pub struct TextPayload {
    data: [u8; MAX_PAYLOAD_LEN],
    len: usize,
}

impl TextPayload {
    pub fn new(bytes: &[u8]) -> Self {
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        let len = bytes.len().min(MAX_PAYLOAD_LEN);
        data[..len].copy_from_slice(&bytes[..len]);
        TextPayload { data, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Payload tagged by the header's `MessageType`.
#[derive(Debug, Clone, Copy)]
pub enum Payload {
    None,
    SetRouteReq {
        passcode: u32,
        target_addr: NodeAddr,
        next_hop_addr: NodeAddr,
    },
    GetRouteReq {
        target_addr: NodeAddr,
    },
    GetRouteResp {
        target_addr: NodeAddr,
        next_hop_addr: NodeAddr,
        tx_packet_count: u32,
        rx_packet_count: u32,
    },
    ResetReq {
        passcode: u32,
    },
    SadResp(SadResp),
    Text(TextPayload),
}

impl Payload {
    pub fn encode(&self, out: &mut [u8]) -> usize {
        match self {
            Payload::None => 0,
            Payload::SetRouteReq {
                passcode,
                target_addr,
                next_hop_addr,
            } => {
                out[0..4].copy_from_slice(&passcode.to_le_bytes());
                out[4..6].copy_from_slice(&target_addr.to_le_bytes());
                out[6..8].copy_from_slice(&next_hop_addr.to_le_bytes());
                8
            }
            Payload::GetRouteReq { target_addr } => {
                out[0..2].copy_from_slice(&target_addr.to_le_bytes());
                2
            }
            Payload::GetRouteResp {
                target_addr,
                next_hop_addr,
                tx_packet_count,
                rx_packet_count,
            } => {
                out[0..2].copy_from_slice(&target_addr.to_le_bytes());
                out[2..4].copy_from_slice(&next_hop_addr.to_le_bytes());
                out[4..8].copy_from_slice(&tx_packet_count.to_le_bytes());
                out[8..12].copy_from_slice(&rx_packet_count.to_le_bytes());
                12
            }
            Payload::ResetReq { passcode } => {
                out[0..4].copy_from_slice(&passcode.to_le_bytes());
                4
            }
            Payload::SadResp(sad) => {
                out[0] = sad.version;
                out[1..3].copy_from_slice(&sad.battery_mv.to_le_bytes());
                out[3..5].copy_from_slice(&sad.panel_mv.to_le_bytes());
                out[5..9].copy_from_slice(&sad.uptime_seconds.to_le_bytes());
                out[9..13].copy_from_slice(&sad.time.to_le_bytes());
                out[13..15].copy_from_slice(&sad.boot_count.to_le_bytes());
                out[15..17].copy_from_slice(&sad.sleep_count.to_le_bytes());
                out[17..19].copy_from_slice(&sad.last_hop_rssi.to_le_bytes());
                out[19..21].copy_from_slice(&sad.temp.to_le_bytes());
                out[21] = sad.humidity;
                out[22] = sad.device_class;
                out[23] = sad.device_revision;
                out[24..28].copy_from_slice(&sad.rx_packet_count.to_le_bytes());
                out[28..32].copy_from_slice(&sad.bad_rx_packet_count.to_le_bytes());
                out[32..36].copy_from_slice(&sad.bad_route_count.to_le_bytes());
                SAD_RESP_LEN
            }
            Payload::Text(text) => {
                let bytes = text.as_bytes();
                out[..bytes.len()].copy_from_slice(bytes);
                bytes.len()
            }
        }
    }

    pub fn decode(message_type: MessageType, data: &[u8]) -> Result<Payload, EngineError> {
        let need = |n: usize| -> Result<(), EngineError> {
            if data.len() < n {
                Err(EngineError::MalformedFrame)
            } else {
                Ok(())
            }
        };
        match message_type {
            MessageType::PingReq | MessageType::PingResp | MessageType::GetSedReq => {
                Ok(Payload::None)
            }
            MessageType::Reset | MessageType::ResetCounters => {
                need(4)?;
                Ok(Payload::ResetReq {
                    passcode: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
                })
            }
            MessageType::Text => Ok(Payload::Text(TextPayload::new(data))),
            MessageType::SetRoute => {
                need(8)?;
                Ok(Payload::SetRouteReq {
                    passcode: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
                    target_addr: u16::from_le_bytes([data[4], data[5]]),
                    next_hop_addr: u16::from_le_bytes([data[6], data[7]]),
                })
            }
            MessageType::GetRouteReq => {
                need(2)?;
                Ok(Payload::GetRouteReq {
                    target_addr: u16::from_le_bytes([data[0], data[1]]),
                })
            }
            MessageType::GetRouteResp => {
                need(12)?;
                Ok(Payload::GetRouteResp {
                    target_addr: u16::from_le_bytes([data[0], data[1]]),
                    next_hop_addr: u16::from_le_bytes([data[2], data[3]]),
                    tx_packet_count: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
                    rx_packet_count: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
                })
            }
            MessageType::GetSedResp => {
                need(SAD_RESP_LEN)?;
                Ok(Payload::SadResp(SadResp {
                    version: data[0],
                    battery_mv: u16::from_le_bytes([data[1], data[2]]),
                    panel_mv: u16::from_le_bytes([data[3], data[4]]),
                    uptime_seconds: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
                    time: u32::from_le_bytes([data[9], data[10], data[11], data[12]]),
                    boot_count: u16::from_le_bytes([data[13], data[14]]),
                    sleep_count: u16::from_le_bytes([data[15], data[16]]),
                    last_hop_rssi: i16::from_le_bytes([data[17], data[18]]),
                    temp: i16::from_le_bytes([data[19], data[20]]),
                    humidity: data[21],
                    device_class: data[22],
                    device_revision: data[23],
                    rx_packet_count: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
                    bad_rx_packet_count: u32::from_le_bytes([data[28], data[29], data[30], data[31]]),
                    bad_route_count: u32::from_le_bytes([data[32], data[33], data[34], data[35]]),
                }))
            }
            MessageType::Unknown(_) => Ok(Payload::None),
        }
    }
}

/// A header plus its decoded payload.
#[derive(Debug, Clone, Copy)]
pub struct Packet {
    pub header: Header,
    pub payload: Payload,
}

impl Packet {
    pub fn new(header: Header, payload: Payload) -> Self {
        Packet { header, payload }
    }

    /// Encodes header + payload into `out`, returning the total length.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        let header_len = self.header.encode(out);
        let payload_len = self.payload.encode(&mut out[header_len..]);
        header_len + payload_len
    }

    /// Decodes a full packet from a frame of `len` bytes. `len` is the
    /// declared/received length, not necessarily `data.len()`.
    pub fn decode(data: &[u8], len: usize) -> Result<Packet, EngineError> {
        if len < HEADER_LEN || data.len() < len {
            return Err(EngineError::MalformedFrame);
        }
        let header = Header::decode(&data[..HEADER_LEN])?;
        let payload = Payload::decode(header.message_type(), &data[HEADER_LEN..len])?;
        Ok(Packet { header, payload })
    }
}
