// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! The engine proper: drains RX, advances retry/timeout state, dispatches
//! or forwards what it decoded, and pushes whatever that produced onto TX.
//!
//! `pump()` is the only entry point the host loop calls; everything else is
//! reached through it. The host owns the two `CircularBuffer`s and feeds RX
//! from the radio driver's interrupt/polling path — this module never talks
//! to hardware directly.

use crate::address::{self, NodeAddr};
use crate::buffer::CircularBuffer;
use crate::clock::Clock;
use crate::command::{Command, CommandEffect};
use crate::dedup::PacketReport;
use crate::error::EngineError;
use crate::opm::OutboundPacketManager;
use crate::packet::{Header, MessageType, Packet, Payload, SadResp, MAX_PACKET_LEN, PROTOCOL_VERSION};
use crate::ports::{CommandMode, Configuration, Instrumentation};
use crate::routing::RoutingTable;

/// Width of the RX sidechannel: a little-endian `i16` RSSI reading the
/// radio driver stamps on every received frame.
pub const RSSI_SIDE: usize = 2;

/// The packet engine. Generic over the three capability ports and the two
/// `CircularBuffer` capacities it was constructed against, so a caller can
/// size RX/TX independently of everything else.
pub struct MessageProcessor<C, I, G, const RX_CAP: usize, const TX_CAP: usize>
where
    C: Clock,
    I: Instrumentation,
    G: Configuration,
{
    clock: C,
    instrumentation: I,
    config: G,
    routing: RoutingTable,
    dedup: PacketReport,
    opm: OutboundPacketManager<TX_CAP>,
    rx_packet_counter: u32,
    bad_rx_packet_counter: u32,
    bad_route_counter: u32,
    last_rx_time: u32,
    id_counter: u16,
}

impl<C, I, G, const RX_CAP: usize, const TX_CAP: usize> MessageProcessor<C, I, G, RX_CAP, TX_CAP>
where
    C: Clock,
    I: Instrumentation,
    G: Configuration,
{
    pub fn new(
        clock: C,
        instrumentation: I,
        config: G,
        dedup_window_ms: u32,
        tx_timeout_ms: u32,
        tx_retry_ms: u32,
    ) -> Self {
        MessageProcessor {
            clock,
            instrumentation,
            config,
            routing: RoutingTable::new(),
            dedup: PacketReport::new(dedup_window_ms),
            opm: OutboundPacketManager::new(tx_timeout_ms, tx_retry_ms),
            rx_packet_counter: 0,
            bad_rx_packet_counter: 0,
            bad_route_counter: 0,
            last_rx_time: 0,
            id_counter: 0,
        }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn rx_packet_count(&self) -> u32 {
        self.rx_packet_counter
    }

    pub fn bad_rx_packet_count(&self) -> u32 {
        self.bad_rx_packet_counter
    }

    pub fn bad_route_count(&self) -> u32 {
        self.bad_route_counter
    }

    pub fn pending_ack_count(&self) -> usize {
        self.opm.pending_count()
    }

    pub fn failed_delivery_count(&self) -> u32 {
        self.opm.failed_delivery_count()
    }

    fn next_unique_id(&mut self) -> u16 {
        let id = self.id_counter;
        self.id_counter = self.id_counter.wrapping_add(1);
        id
    }

    /// Drains `rx` to empty, then advances OPM retry/timeout state, then
    /// lets any packets that state produced flow into `tx`. One cooperative
    /// step; the host calls this from its own loop as often as it likes.
    pub fn pump(
        &mut self,
        rx: &mut CircularBuffer<RSSI_SIDE, RX_CAP>,
        tx: &mut CircularBuffer<0, TX_CAP>,
    ) {
        let mut side = [0u8; RSSI_SIDE];
        let mut buf = [0u8; MAX_PACKET_LEN];
        let mut len = 0usize;
        while rx.pop_if_not_empty(&mut side, &mut buf, &mut len) {
            let rssi = i16::from_le_bytes(side);
            self.process(rssi, &buf[..len], rx, tx);
        }
        let now = self.clock.now_ms();
        self.opm.pump(tx, now);
    }

    /// Hands a locally-issued console command to the engine: either an
    /// immediate routing-table edit, or a fresh packet resolved through the
    /// routing table exactly like a forwarded frame. `rx` is needed for the
    /// (unusual but legal) case of a command addressed back at ourselves.
    pub fn inject_command(
        &mut self,
        command: Command,
        rx: &mut CircularBuffer<RSSI_SIDE, RX_CAP>,
        tx: &mut CircularBuffer<0, TX_CAP>,
    ) {
        match command.effect(self.config.passcode()) {
            CommandEffect::Local => {
                log::info!("command: local, no packet emitted");
            }
            CommandEffect::SetRouteLocal { target, next_hop } => {
                self.routing.set_route(target, next_hop);
            }
            CommandEffect::Transmit {
                message_type,
                payload,
                final_dest,
            } => {
                let self_addr = self.config.addr();
                let next_hop = self.routing.next_hop(final_dest);
                if next_hop == address::NO_ROUTE {
                    self.bad_route_counter += 1;
                    log::warn!("{}", EngineError::NoRoute);
                    return;
                }
                let mut header = Header::new(message_type);
                header.id = self.next_unique_id();
                header.source_addr = self_addr;
                header.dest_addr = next_hop;
                header.original_source_addr = self_addr;
                header.final_dest_addr = final_dest;
                header.source_call = self.config.call();
                header.original_source_call = self.config.call();
                let packet = Packet::new(header, payload);
                self.transmit_if_possible(&packet, rx, tx);
            }
        }
    }

    fn process(
        &mut self,
        rssi: i16,
        data: &[u8],
        rx: &mut CircularBuffer<RSSI_SIDE, RX_CAP>,
        tx: &mut CircularBuffer<0, TX_CAP>,
    ) {
        let packet = match Packet::decode(data, data.len()) {
            Ok(p) => p,
            Err(_) => {
                self.bad_rx_packet_counter += 1;
                log::warn!("{}", EngineError::MalformedFrame);
                return;
            }
        };
        if packet.header.version != PROTOCOL_VERSION {
            self.bad_rx_packet_counter += 1;
            log::warn!("{}", EngineError::UnsupportedVersion);
            return;
        }

        let self_addr = self.config.addr();
        if packet.header.dest_addr != self_addr && packet.header.dest_addr != address::BROADCAST {
            log::debug!("{}", EngineError::Overheard);
            return;
        }

        self.rx_packet_counter += 1;
        self.last_rx_time = self.clock.now_ms();

        if packet.header.is_ack() {
            self.opm.process_ack(packet.header.id, packet.header.source_addr);
            return;
        }

        // ACKs go out before the duplicate check: a retried original must
        // still get a fresh ACK even if this node already processed it once.
        if packet.header.is_ack_required() {
            let ack = Header::setup_ack_for(&packet.header, self_addr, self.config.call());
            self.transmit_if_possible(&Packet::new(ack, Payload::None), rx, tx);
        }

        let now = self.clock.now_ms();
        if self
            .dedup
            .contains(packet.header.original_source_addr, packet.header.id, now)
        {
            log::debug!("{}", EngineError::Duplicate);
            return;
        }
        self.dedup.record(packet.header.original_source_addr, packet.header.id, now);

        // Broadcast is handled locally by every receiver and never
        // relayed further; the rest of the reserved range is an ordinary
        // forwarding target whose next hop happens to equal its own
        // address (see RoutingTable::next_hop), so it still goes through
        // the forward branch below.
        let final_dest = packet.header.final_dest_addr;
        let is_local = final_dest == self_addr || final_dest == address::BROADCAST;
        if is_local {
            self.dispatch_local(rssi, &packet, rx, tx);
        } else {
            let next_hop = self.routing.next_hop(final_dest);
            if next_hop == address::NO_ROUTE {
                self.bad_route_counter += 1;
                log::warn!("{}", EngineError::NoRoute);
                return;
            }
            let mut forwarded = packet;
            let new_id = self.next_unique_id();
            forwarded.header.rewrite_for_forward(next_hop, self_addr, new_id);
            self.transmit_if_possible(&forwarded, rx, tx);
        }
    }

    fn dispatch_local(
        &mut self,
        rssi: i16,
        packet: &Packet,
        rx: &mut CircularBuffer<RSSI_SIDE, RX_CAP>,
        tx: &mut CircularBuffer<0, TX_CAP>,
    ) {
        let self_addr = self.config.addr();
        let self_call = self.config.call();
        match packet.header.message_type() {
            MessageType::PingReq => {
                let first_hop = self.routing.next_hop(packet.header.original_source_addr);
                if first_hop == address::NO_ROUTE {
                    self.bad_route_counter += 1;
                    log::warn!("{}", EngineError::NoRoute);
                    return;
                }
                let id = self.next_unique_id();
                let header = Header::setup_response_for(
                    &packet.header,
                    MessageType::PingResp,
                    first_hop,
                    self_addr,
                    self_call,
                    id,
                );
                self.transmit_if_possible(&Packet::new(header, Payload::None), rx, tx);
            }
            MessageType::PingResp => {
                log::info!("PING_RESP from {}", packet.header.original_source_addr);
            }
            MessageType::GetSedReq => {
                let first_hop = self.routing.next_hop(packet.header.original_source_addr);
                if first_hop == address::NO_ROUTE {
                    self.bad_route_counter += 1;
                    log::warn!("{}", EngineError::NoRoute);
                    return;
                }
                let sad = SadResp {
                    version: self.instrumentation.software_version(),
                    battery_mv: self.instrumentation.battery_mv(),
                    panel_mv: self.instrumentation.panel_mv(),
                    uptime_seconds: self.instrumentation.uptime_seconds(),
                    time: self.instrumentation.time(),
                    boot_count: self.instrumentation.boot_count(),
                    sleep_count: self.instrumentation.sleep_count(),
                    last_hop_rssi: rssi,
                    temp: self.instrumentation.temperature_c_tenths(),
                    humidity: self.instrumentation.humidity_percent(),
                    device_class: self.instrumentation.device_class(),
                    device_revision: self.instrumentation.device_revision(),
                    rx_packet_count: self.rx_packet_counter,
                    bad_rx_packet_count: self.bad_rx_packet_counter,
                    bad_route_count: self.bad_route_counter,
                };
                let id = self.next_unique_id();
                let header = Header::setup_response_for(
                    &packet.header,
                    MessageType::GetSedResp,
                    first_hop,
                    self_addr,
                    self_call,
                    id,
                );
                self.transmit_if_possible(&Packet::new(header, Payload::SadResp(sad)), rx, tx);
            }
            MessageType::GetSedResp => {
                self.log_sad_resp_as_json(&packet.header, &packet.payload);
            }
            MessageType::Reset => {
                if let Payload::ResetReq { passcode } = packet.payload {
                    if self.config.check_passcode(passcode) {
                        self.instrumentation.restart();
                    } else {
                        log::warn!("{}", EngineError::Unauthorized);
                    }
                }
            }
            MessageType::ResetCounters => {
                if let Payload::ResetReq { passcode } = packet.payload {
                    if self.config.check_passcode(passcode) {
                        self.rx_packet_counter = 0;
                        self.bad_rx_packet_counter = 0;
                        self.bad_route_counter = 0;
                    } else {
                        log::warn!("{}", EngineError::Unauthorized);
                    }
                }
            }
            MessageType::Text => {
                if let Payload::Text(text) = packet.payload {
                    self.log_text(&packet.header, text.as_bytes());
                }
            }
            MessageType::SetRoute => {
                if let Payload::SetRouteReq {
                    passcode,
                    target_addr,
                    next_hop_addr,
                } = packet.payload
                {
                    if self.config.check_passcode(passcode) {
                        self.routing.set_route(target_addr, next_hop_addr);
                    } else {
                        log::warn!("{}", EngineError::Unauthorized);
                    }
                }
            }
            MessageType::GetRouteReq => {
                if let Payload::GetRouteReq { target_addr } = packet.payload {
                    let first_hop = self.routing.next_hop(packet.header.original_source_addr);
                    if first_hop == address::NO_ROUTE {
                        self.bad_route_counter += 1;
                        log::warn!("{}", EngineError::NoRoute);
                        return;
                    }
                    let id = self.next_unique_id();
                    let header = Header::setup_response_for(
                        &packet.header,
                        MessageType::GetRouteResp,
                        first_hop,
                        self_addr,
                        self_call,
                        id,
                    );
                    // tx/rxPacketCount for an arbitrary routed target aren't
                    // tracked per-destination anywhere upstream; left at 0
                    // rather than guessed.
                    let response = Payload::GetRouteResp {
                        target_addr,
                        next_hop_addr: self.routing.next_hop(target_addr),
                        tx_packet_count: 0,
                        rx_packet_count: 0,
                    };
                    self.transmit_if_possible(&Packet::new(header, response), rx, tx);
                }
            }
            MessageType::GetRouteResp => {
                self.log_get_route_resp_as_json(&packet.header, &packet.payload);
            }
            MessageType::Unknown(b) => {
                log::warn!("unknown message type {b}");
            }
        }
    }

    /// Emits `packet`, resolving the loopback/no-route edge cases that can
    /// arise when a local handler or a forward addresses a reply back to
    /// ourselves. A self-addressed packet never enters the OPM — it goes
    /// straight onto `rx` (rssi 0) so the outer `pump()` loop picks it up
    /// on its next iteration; this function itself must not recurse into
    /// `process()`.
    fn transmit_if_possible(
        &mut self,
        packet: &Packet,
        rx: &mut CircularBuffer<RSSI_SIDE, RX_CAP>,
        tx: &mut CircularBuffer<0, TX_CAP>,
    ) -> bool {
        if packet.header.dest_addr == address::NO_ROUTE {
            self.bad_route_counter += 1;
            log::warn!("{}", EngineError::NoRoute);
            return false;
        }
        if packet.header.dest_addr == self.config.addr() {
            let mut buf = [0u8; MAX_PACKET_LEN];
            let len = packet.encode(&mut buf);
            let ok = rx.push(&0i16.to_le_bytes(), &buf[..len]);
            if !ok {
                log::warn!("{}", EngineError::QueueFull);
            }
            return ok;
        }
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = packet.encode(&mut buf);
        let now = self.clock.now_ms();
        let ok = self.opm.schedule_transmit_if_possible(tx, packet, len, now);
        if !ok {
            log::warn!("{}", EngineError::QueueFull);
        }
        ok
    }

    #[cfg(feature = "std")]
    fn log_sad_resp_as_json(&self, header: &Header, payload: &Payload) {
        if let Payload::SadResp(sad) = payload {
            match self.config.command_mode() {
                CommandMode::Api => {
                    let value = serde_json::json!({
                        "type": "GETSED_RESP",
                        "from": header.original_source_addr,
                        "batteryMv": sad.battery_mv,
                        "panelMv": sad.panel_mv,
                        "tempTenths": sad.temp,
                        "humidity": sad.humidity,
                        "rssi": sad.last_hop_rssi,
                        "rxPacketCount": sad.rx_packet_count,
                        "badRxPacketCount": sad.bad_rx_packet_count,
                        "badRouteCount": sad.bad_route_count,
                    });
                    log::info!("{value}");
                }
                CommandMode::Interactive => {
                    log::info!(
                        "GETSED_RESP from {}: battery={}mV panel={}mV temp={}.{}C humidity={}% rssi={}",
                        header.original_source_addr,
                        sad.battery_mv,
                        sad.panel_mv,
                        sad.temp / 10,
                        (sad.temp % 10).abs(),
                        sad.humidity,
                        sad.last_hop_rssi,
                    );
                }
            }
        }
    }

    #[cfg(not(feature = "std"))]
    fn log_sad_resp_as_json(&self, header: &Header, payload: &Payload) {
        if let Payload::SadResp(sad) = payload {
            log::info!(
                "GETSED_RESP from {}: battery={}mV panel={}mV",
                header.original_source_addr,
                sad.battery_mv,
                sad.panel_mv
            );
        }
    }

    #[cfg(feature = "std")]
    fn log_get_route_resp_as_json(&self, header: &Header, payload: &Payload) {
        if let Payload::GetRouteResp {
            target_addr,
            next_hop_addr,
            tx_packet_count,
            rx_packet_count,
        } = payload
        {
            match self.config.command_mode() {
                CommandMode::Api => {
                    let value = serde_json::json!({
                        "type": "GETROUTE_RESP",
                        "from": header.original_source_addr,
                        "target": target_addr,
                        "nextHop": next_hop_addr,
                        "txPacketCount": tx_packet_count,
                        "rxPacketCount": rx_packet_count,
                    });
                    log::info!("{value}");
                }
                CommandMode::Interactive => {
                    log::info!(
                        "GETROUTE_RESP from {}: target={} nextHop={}",
                        header.original_source_addr,
                        target_addr,
                        next_hop_addr,
                    );
                }
            }
        }
    }

    #[cfg(not(feature = "std"))]
    fn log_get_route_resp_as_json(&self, header: &Header, payload: &Payload) {
        if let Payload::GetRouteResp {
            target_addr,
            next_hop_addr,
            ..
        } = payload
        {
            log::info!(
                "GETROUTE_RESP from {}: target={} nextHop={}",
                header.original_source_addr,
                target_addr,
                next_hop_addr
            );
        }
    }

    fn log_text(&self, header: &Header, message: &[u8]) {
        let text = core::str::from_utf8(message).unwrap_or("<invalid utf-8>");
        match self.config.command_mode() {
            CommandMode::Interactive => {
                log::info!("TEXT from {}: {}", header.original_source_addr, text);
            }
            #[cfg(feature = "std")]
            CommandMode::Api => {
                let value = serde_json::json!({
                    "type": "TEXT",
                    "from": header.original_source_addr,
                    "message": text,
                });
                log::info!("{value}");
            }
            #[cfg(not(feature = "std"))]
            CommandMode::Api => {
                log::info!("TEXT from {}: {}", header.original_source_addr, text);
            }
        }
    }
}
