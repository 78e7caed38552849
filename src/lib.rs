#![cfg_attr(not(feature = "std"), no_std)]

// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! On-node packet engine for a small LoRa amateur-radio mesh of battery and
//! solar-powered field sensors ("birdhouses"): wire codec, duplicate
//! suppression, administratively-routed forwarding and at-most-once
//! reliable delivery.
//!
//! This crate owns none of the radio hardware. The host feeds received
//! frames into an RX [`buffer::CircularBuffer`] (stamped with RSSI) and
//! drains an equivalent TX buffer to hand to the transmitter; everything in
//! between — decode, dedup, route, retry — is [`processor::MessageProcessor`].
//!
//! # Usage
//!
//! ```no_run
//! use birdhouse_mesh_engine::buffer::CircularBuffer;
//! use birdhouse_mesh_engine::clock::SystemClock;
//! use birdhouse_mesh_engine::ports::{CommandMode, StaticConfiguration};
//! use birdhouse_mesh_engine::address::CallSign;
//! use birdhouse_mesh_engine::processor::{MessageProcessor, RSSI_SIDE};
//!
//! # struct Telemetry;
//! # impl birdhouse_mesh_engine::ports::Instrumentation for Telemetry {
//! #     fn software_version(&self) -> u8 { 1 }
//! #     fn battery_mv(&self) -> u16 { 0 }
//! #     fn panel_mv(&self) -> u16 { 0 }
//! #     fn temperature_c_tenths(&self) -> i16 { 0 }
//! #     fn humidity_percent(&self) -> u8 { 0 }
//! #     fn device_class(&self) -> u8 { 0 }
//! #     fn device_revision(&self) -> u8 { 0 }
//! #     fn boot_count(&self) -> u16 { 0 }
//! #     fn sleep_count(&self) -> u16 { 0 }
//! #     fn uptime_seconds(&self) -> u32 { 0 }
//! #     fn time(&self) -> u32 { 0 }
//! #     fn restart(&mut self) {}
//! #     fn restart_radio(&mut self) {}
//! #     fn sleep(&mut self, _ms: u32) {}
//! # }
//! let config = StaticConfiguration {
//!     addr: 1,
//!     call: CallSign::from_str("KC1FSZ"),
//!     battery_limit_mv: 3_300,
//!     boot_count: 1,
//!     sleep_count: 0,
//!     log_level: 0,
//!     command_mode: CommandMode::Interactive,
//!     passcode: 1234,
//! };
//! let mut engine: MessageProcessor<_, _, _, 4096, 4096> =
//!     MessageProcessor::new(SystemClock::new(), Telemetry, config, 60_000, 5_000, 1_000);
//! let mut rx: CircularBuffer<RSSI_SIDE, 4096> = CircularBuffer::new();
//! let mut tx: CircularBuffer<0, 4096> = CircularBuffer::new();
//! engine.pump(&mut rx, &mut tx);
//! ```

pub mod address;
pub mod buffer;
pub mod clock;
pub mod command;
pub mod dedup;
pub mod error;
pub mod opm;
pub mod packet;
pub mod ports;
pub mod processor;
pub mod routing;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::EngineError;
pub use packet::{Header, MessageType, Packet, Payload};
pub use processor::MessageProcessor;
