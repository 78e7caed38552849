// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! Deterministic test doubles for the capability ports, so scenarios can
//! drive `MessageProcessor` without a clock that actually moves or a radio
//! that actually restarts.

use crate::address::{CallSign, NodeAddr};
use crate::clock::Clock;
use crate::ports::{CommandMode, Configuration, Instrumentation};

/// A clock the test fully controls; `now_ms()` only ever changes when the
/// test calls [`TestClock::advance`]. Cloning shares the same underlying
/// counter, so a test can hand one clone to the engine under test and keep
/// another to drive time forward from the outside.
#[derive(Clone)]
pub struct TestClock {
    now_ms: std::rc::Rc<core::cell::Cell<u32>>,
}

impl TestClock {
    pub fn new(start_ms: u32) -> Self {
        TestClock {
            now_ms: std::rc::Rc::new(core::cell::Cell::new(start_ms)),
        }
    }

    pub fn advance(&self, delta_ms: u32) {
        self.now_ms.set(self.now_ms.get().wrapping_add(delta_ms));
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u32 {
        self.now_ms.get()
    }
}

/// Fixed telemetry plus a record of which terminal actions were requested.
pub struct TestInstrumentation {
    pub software_version: u8,
    pub battery_mv: u16,
    pub panel_mv: u16,
    pub temperature_c_tenths: i16,
    pub humidity_percent: u8,
    pub device_class: u8,
    pub device_revision: u8,
    pub boot_count: u16,
    pub sleep_count: u16,
    pub uptime_seconds: u32,
    pub time: u32,
    pub restart_count: u32,
    pub restart_radio_count: u32,
    pub last_sleep_ms: Option<u32>,
}

impl Default for TestInstrumentation {
    fn default() -> Self {
        TestInstrumentation {
            software_version: 1,
            battery_mv: 4_100,
            panel_mv: 5_000,
            temperature_c_tenths: 215,
            humidity_percent: 47,
            device_class: 1,
            device_revision: 2,
            boot_count: 3,
            sleep_count: 10,
            uptime_seconds: 3_600,
            time: 1_700_000_000,
            restart_count: 0,
            restart_radio_count: 0,
            last_sleep_ms: None,
        }
    }
}

impl Instrumentation for TestInstrumentation {
    fn software_version(&self) -> u8 {
        self.software_version
    }
    fn battery_mv(&self) -> u16 {
        self.battery_mv
    }
    fn panel_mv(&self) -> u16 {
        self.panel_mv
    }
    fn temperature_c_tenths(&self) -> i16 {
        self.temperature_c_tenths
    }
    fn humidity_percent(&self) -> u8 {
        self.humidity_percent
    }
    fn device_class(&self) -> u8 {
        self.device_class
    }
    fn device_revision(&self) -> u8 {
        self.device_revision
    }
    fn boot_count(&self) -> u16 {
        self.boot_count
    }
    fn sleep_count(&self) -> u16 {
        self.sleep_count
    }
    fn uptime_seconds(&self) -> u32 {
        self.uptime_seconds
    }
    fn time(&self) -> u32 {
        self.time
    }
    fn restart(&mut self) {
        self.restart_count += 1;
    }
    fn restart_radio(&mut self) {
        self.restart_radio_count += 1;
    }
    fn sleep(&mut self, ms: u32) {
        self.last_sleep_ms = Some(ms);
    }
}

/// In-memory node identity/admin settings, with a fixed passcode.
pub struct TestConfiguration {
    pub addr: NodeAddr,
    pub call: CallSign,
    pub battery_limit_mv: u16,
    pub boot_count: u16,
    pub sleep_count: u16,
    pub log_level: u8,
    pub command_mode: CommandMode,
    pub passcode: u32,
}

impl TestConfiguration {
    pub fn new(addr: NodeAddr, call: &str) -> Self {
        TestConfiguration {
            addr,
            call: CallSign::from_str(call),
            battery_limit_mv: 3_300,
            boot_count: 1,
            sleep_count: 0,
            log_level: 0,
            command_mode: CommandMode::Interactive,
            passcode: 1234,
        }
    }
}

impl Configuration for TestConfiguration {
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
