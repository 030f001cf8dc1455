// ABOUTME: Static descriptors for protocol interfaces: their requests, events, and enums
// ABOUTME: The scanner emits `Interface` constants from XML; hand-written ones back the core protocol

//! An [`Interface`] is the statically-known shape of one protocol type: its
//! name, version, and the argument signatures of every request it accepts
//! and event it emits. [`crate::wire`] decodes/encodes against a
//! [`MessageSignature`] looked up here by opcode; [`crate::dispatch`] uses
//! the same table to route an incoming message to a handler method.

use crate::wire::ArgType;

/// The argument list of one request or event.
pub type MessageSignature = &'static [ArgType];

/// One entry in a request or event table: its name (for logging/errors) and
/// argument signature.
#[derive(Clone, Copy, Debug)]
pub struct MessageDescriptor {
    pub name: &'static str,
    pub signature: MessageSignature,
}

/// The complete static shape of a protocol interface, as produced either by
/// the scanner from protocol XML or by hand for the core bootstrap
/// interfaces (`wl_display`, `wl_registry`, `wl_callback`).
#[derive(Clone, Copy, Debug)]
pub struct Interface {
    pub name: &'static str,
    pub version: u32,
    pub requests: &'static [MessageDescriptor],
    pub events: &'static [MessageDescriptor],
}

impl Interface {
    pub fn request(&self, opcode: u16) -> Option<&'static MessageDescriptor> {
        self.requests.get(opcode as usize)
    }

    pub fn event(&self, opcode: u16) -> Option<&'static MessageDescriptor> {
        self.events.get(opcode as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: MessageDescriptor = MessageDescriptor {
        name: "ping",
        signature: &[ArgType::Uint],
    };

    const TEST_INTERFACE: Interface = Interface {
        name: "wl_test",
        version: 1,
        requests: &[PING],
        events: &[],
    };

    #[test]
    fn request_lookup_by_opcode() {
        let desc = TEST_INTERFACE.request(0).unwrap();
        assert_eq!(desc.name, "ping");
        assert_eq!(desc.signature, &[ArgType::Uint]);
    }

    #[test]
    fn out_of_range_opcode_is_none() {
        assert!(TEST_INTERFACE.request(5).is_none());
        assert!(TEST_INTERFACE.event(0).is_none());
    }
}
