// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! Translates a console command line into the packet (or direct
//! routing-table edit) the engine must produce. The console itself —
//! reading lines, writing responses — lives outside this crate; this
//! module covers only the mechanical, precisely-specified half of that
//! contract.

use crate::address::NodeAddr;
use crate::packet::{MessageType, Payload, TextPayload};

/// A parsed console command, pre-translation.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    Ping { addr: NodeAddr },
    Info,
    SetRoute { target: NodeAddr, next_hop: NodeAddr },
    SetRouteRemote {
        node_addr: NodeAddr,
        target: NodeAddr,
        next_hop: NodeAddr,
    },
    Text { addr: NodeAddr, message: TextPayload },
}

/// What the engine must do to carry out a command.
pub enum CommandEffect {
    /// Purely local (e.g. `info`); nothing is transmitted.
    Local,
    /// Applied directly to the routing table; no packet leaves the node.
    SetRouteLocal { target: NodeAddr, next_hop: NodeAddr },
    /// A fresh, locally-originated packet addressed at `final_dest`,
    /// resolved through the routing table like any other outbound frame.
    Transmit {
        message_type: MessageType,
        payload: Payload,
        final_dest: NodeAddr,
    },
}

impl Command {
    /// Parses one whitespace-separated command line. Unknown verbs and
    /// malformed arguments both yield `None` — the caller just drops them.
    pub fn parse(line: &str) -> Option<Command> {
        let mut head = line.trim().splitn(2, char::is_whitespace);
        let verb = head.next()?;
        let rest = head.next().unwrap_or("").trim();
        match verb {
            "ping" => Some(Command::Ping {
                addr: rest.parse().ok()?,
            }),
            "info" => Some(Command::Info),
            "setroute" => {
                let mut args = rest.split_whitespace();
                let target = args.next()?.parse().ok()?;
                let next_hop = args.next()?.parse().ok()?;
                Some(Command::SetRoute { target, next_hop })
            }
            "setrouteremote" => {
                let mut args = rest.split_whitespace();
                let node_addr = args.next()?.parse().ok()?;
                let target = args.next()?.parse().ok()?;
                let next_hop = args.next()?.parse().ok()?;
                Some(Command::SetRouteRemote {
                    node_addr,
                    target,
                    next_hop,
                })
            }
            "text" => {
                let mut args = rest.splitn(2, char::is_whitespace);
                let addr = args.next()?.parse().ok()?;
                let message = args.next().unwrap_or("").trim();
                Some(Command::Text {
                    addr,
                    message: TextPayload::new(message.as_bytes()),
                })
            }
            _ => None,
        }
    }

    /// `passcode` is only consulted for `setrouteremote`, which must embed
    /// one so the remote node's own `checkPasscode` can authorize it.
    pub fn effect(self, passcode: u32) -> CommandEffect {
        match self {
            Command::Ping { addr } => CommandEffect::Transmit {
                message_type: MessageType::PingReq,
                payload: Payload::None,
                final_dest: addr,
            },
            Command::Info => CommandEffect::Local,
            Command::SetRoute { target, next_hop } => {
                CommandEffect::SetRouteLocal { target, next_hop }
            }
            Command::SetRouteRemote {
                node_addr,
                target,
                next_hop,
            } => CommandEffect::Transmit {
                message_type: MessageType::SetRoute,
                payload: Payload::SetRouteReq {
                    passcode,
                    target_addr: target,
                    next_hop_addr: next_hop,
                },
                final_dest: node_addr,
            },
            Command::Text { addr, message } => CommandEffect::Transmit {
                message_type: MessageType::Text,
                payload: Payload::Text(message),
                final_dest: addr,
            },
        }
    }
}
