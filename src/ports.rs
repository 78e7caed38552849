// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! Capability ports the engine is generic over: hardware telemetry,
//! node configuration, and the console's text-output mode. Constructor
//! injection, same shape as the `Configuration`/`Device` trait pair this
//! crate's driver ancestor used to talk to a concrete radio chip.

use crate::address::{CallSign, NodeAddr};

/// How the console renders TEXT messages it relays to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    /// Human-readable one-liner, meant for an interactive terminal session.
    Interactive,
    /// Machine-readable JSON object, meant for a scripted/API consumer.
    Api,
}

/// Read-only hardware/firmware telemetry, plus the two terminal actions
/// (`restart`, `restart_radio`) and `sleep` that this engine never calls
/// itself but exposes for local command handlers (`RESET`).
pub trait Instrumentation {
    fn software_version(&self) -> u8;
    fn battery_mv(&self) -> u16;
    fn panel_mv(&self) -> u16;
    fn temperature_c_tenths(&self) -> i16;
    fn humidity_percent(&self) -> u8;
    fn device_class(&self) -> u8;
    fn device_revision(&self) -> u8;
    fn boot_count(&self) -> u16;
    fn sleep_count(&self) -> u16;
    fn uptime_seconds(&self) -> u32;
    fn time(&self) -> u32;

    /// Terminal: no further `pump()` call is guaranteed to return.
    fn restart(&mut self);
    fn restart_radio(&mut self);
    fn sleep(&mut self, ms: u32);
}

/// Node identity and administrative settings.
pub trait Configuration {
    fn addr(&self) -> NodeAddr;
    fn call(&self) -> CallSign;
    fn battery_limit_mv(&self) -> u16;
    fn boot_count(&self) -> u16;
    fn sleep_count(&self) -> u16;
    fn log_level(&self) -> u8;
    fn command_mode(&self) -> CommandMode;
    /// Authorizes `RESET`/`RESET_COUNTERS`/`SETROUTE`.
    fn check_passcode(&self, passcode: u32) -> bool;
    /// This node's own passcode, embedded in outgoing `SETROUTE` requests
    /// this node issues against another node (`setrouteremote`).
    fn passcode(&self) -> u32;
}

/// Plain-data `Configuration`, loaded once at boot from whatever backing
/// store the embedder uses (EEPROM, flash, a config partition) and held
/// fixed for the node's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfiguration {
    pub addr: NodeAddr,
    pub call: CallSign,
    pub battery_limit_mv: u16,
    pub boot_count: u16,
    pub sleep_count: u16,
    pub log_level: u8,
    pub command_mode: CommandMode,
    pub passcode: u32,
}

impl Configuration for StaticConfiguration {
    fn addr(&self) -> NodeAddr {
        self.addr
    }
    fn call(&self) -> CallSign {
        self.call
    }
    fn battery_limit_mv(&self) -> u16 {
        self.battery_limit_mv
    }
    fn boot_count(&self) -> u16 {
        self.boot_count
    }
    fn sleep_count(&self) -> u16 {
        self.sleep_count
    }
    fn log_level(&self) -> u8 {
        self.log_level
    }
    fn command_mode(&self) -> CommandMode {
        self.command_mode
    }
    fn check_passcode(&self, passcode: u32) -> bool {
        passcode == self.passcode
    }
    fn passcode(&self) -> u32 {
        self.passcode
    }
}
