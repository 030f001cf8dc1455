// ABOUTME: wl_display: the always-id-1 bootstrap object every connection starts with
// ABOUTME: Client-side proxy only; the server side is driven by crate::server::Display

use crate::dispatch::{Handler, HandlerContext};
use crate::interface::{Interface, MessageDescriptor};
use crate::object::DISPLAY_ID;
use crate::wire::{ArgType, ArgValue};
use crate::error::ProtocolError;

const REQUESTS: &[MessageDescriptor] = &[
    MessageDescriptor {
        name: "sync",
        signature: &[ArgType::NewId],
    },
    MessageDescriptor {
        name: "get_registry",
        signature: &[ArgType::NewId],
    },
];

const EVENTS: &[MessageDescriptor] = &[
    MessageDescriptor {
        name: "error",
        signature: &[
            ArgType::Object { nullable: false },
            ArgType::Uint,
            ArgType::String,
        ],
    },
    MessageDescriptor {
        name: "delete_id",
        signature: &[ArgType::Uint],
    },
];

pub const INTERFACE: Interface = Interface {
    name: "wl_display",
    version: 1,
    requests: REQUESTS,
    events: EVENTS,
};

/// Client-side handle for the `Display` singleton. Its `handle` implementation
/// reacts to the two events every connection must understand: a fatal
/// protocol error, and permission to recycle a destroyed object's id.
pub struct Display {
    on_error: Option<Box<dyn FnMut(u32, u32, &str) + Send>>,
}

impl Display {
    pub fn new() -> Display {
        Display { on_error: None }
    }

    pub fn on_error(&mut self, f: impl FnMut(u32, u32, &str) + Send + 'static) -> &mut Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn sync(ctx: &mut HandlerContext<'_>, callback_id: u32) -> Result<(), crate::wire::WireError> {
        ctx.connection
            .send(DISPLAY_ID, 0, vec![ArgValue::NewId(callback_id)])
    }

    pub fn get_registry(
        ctx: &mut HandlerContext<'_>,
        registry_id: u32,
    ) -> Result<(), crate::wire::WireError> {
        ctx.connection
            .send(DISPLAY_ID, 1, vec![ArgValue::NewId(registry_id)])
    }
}

impl Default for Display {
    fn default() -> Self {
        Display::new()
    }
}

impl Handler for Display {
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
                let object = args[0].as_uint().unwrap_or(0);
                let code = args[1].as_uint().unwrap_or(0);
                let message = args[2].as_str().unwrap_or_default().to_string();
                if let Some(cb) = &mut self.on_error {
                    cb(object, code, &message);
                }
                Err(ProtocolError::InterfaceSpecific {
                    object,
                    code,
                    message,
                })
            }
            1 => {
                let id = args[0].as_uint().unwrap_or(0);
                ctx.release(id);
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
    fn interface_table_matches_opcodes() {
        assert_eq!(INTERFACE.request(0).unwrap().name, "sync");
        assert_eq!(INTERFACE.request(1).unwrap().name, "get_registry");
        assert_eq!(INTERFACE.event(0).unwrap().name, "error");
        assert_eq!(INTERFACE.event(1).unwrap().name, "delete_id");
    }
}
