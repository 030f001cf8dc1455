// ABOUTME: wl_callback: one-shot completion signal, used by Display.sync as the barrier primitive
// ABOUTME: Destroyed by the server immediately after emitting done; the client releases its id on receipt

use crate::dispatch::{Handler, HandlerContext};
use crate::error::ProtocolError;
use crate::interface::{Interface, MessageDescriptor};
use crate::object::RawObjectId;
use crate::wire::ArgValue;

const EVENTS: &[MessageDescriptor] = &[MessageDescriptor {
    name: "done",
    signature: &[crate::wire::ArgType::Uint],
}];

pub const INTERFACE: Interface = Interface {
    name: "wl_callback",
    version: 1,
    requests: &[],
    events: EVENTS,
};

/// Client-side handle for a pending `sync` barrier. `done` fires exactly
/// once; after it fires the dispatcher releases the callback's id (the
/// server never reuses a callback object past its single event).
pub struct Callback {
    id: RawObjectId,
    fired: bool,
    on_done: Option<Box<dyn FnOnce(u32) + Send>>,
}

impl Callback {
    pub fn new(id: RawObjectId) -> Callback {
        Callback {
            id,
            fired: false,
            on_done: None,
        }
    }

    pub fn id(&self) -> RawObjectId {
        self.id
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn on_done(&mut self, f: impl FnOnce(u32) + Send + 'static) -> &mut Self {
        self.on_done = Some(Box::new(f));
        self
    }
}

impl Handler for Callback {
    fn interface(&self) -> &'static Interface {
        &INTERFACE
    }

    fn incoming_is_request(&self) -> bool {
        false
    }

    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError> {
        match opcode {
            0 => {
                let data = args[0].as_uint().unwrap_or(0);
                self.fired = true;
                if let Some(cb) = self.on_done.take() {
                    cb(data);
                }
                ctx.release(self.id);
                Ok(())
            }
            _ => unreachable!("dispatcher validated opcode against INTERFACE.events"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_has_single_done_event() {
        assert_eq!(INTERFACE.event(0).unwrap().name, "done");
        assert!(INTERFACE.requests.is_empty());
    }
}
