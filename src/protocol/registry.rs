// ABOUTME: wl_registry: advertises server globals and lets the client bind the ones it wants
// ABOUTME: Client-side proxy; bind() issues the any-new-id request that creates a typed object

use crate::dispatch::{Handler, HandlerContext};
use crate::error::ProtocolError;
use crate::interface::{Interface, MessageDescriptor};
use crate::object::RawObjectId;
use crate::wire::{ArgType, ArgValue, WireError};

const REQUESTS: &[MessageDescriptor] = &[MessageDescriptor {
    name: "bind",
    signature: &[ArgType::Uint, ArgType::AnyNewId],
}];

const EVENTS: &[MessageDescriptor] = &[
    MessageDescriptor {
        name: "global",
        signature: &[ArgType::Uint, ArgType::String, ArgType::Uint],
    },
    MessageDescriptor {
        name: "global_remove",
        signature: &[ArgType::Uint],
    },
];

pub const INTERFACE: Interface = Interface {
    name: "wl_registry",
    version: 1,
    requests: REQUESTS,
    events: EVENTS,
};

/// Client-side handle bound to the registry id allocated by `Display.get_registry`.
pub struct Registry {
    id: RawObjectId,
    on_global: Option<Box<dyn FnMut(u32, &str, u32) + Send>>,
    on_global_remove: Option<Box<dyn FnMut(u32) + Send>>,
}

impl Registry {
    pub fn new(id: RawObjectId) -> Registry {
        Registry {
            id,
            on_global: None,
            on_global_remove: None,
        }
    }

    pub fn id(&self) -> RawObjectId {
        self.id
    }

    pub fn on_global(&mut self, f: impl FnMut(u32, &str, u32) + Send + 'static) -> &mut Self {
        self.on_global = Some(Box::new(f));
        self
    }

    pub fn on_global_remove(&mut self, f: impl FnMut(u32) + Send + 'static) -> &mut Self {
        self.on_global_remove = Some(Box::new(f));
        self
    }

    /// Bind global `name` (of the given interface and version) to a freshly
    /// allocated `new_id`. The caller has already reserved `new_id` in the
    /// object table and will register its own handler for it once the bind
    /// is enqueued.
    pub fn bind(
        &self,
        ctx: &mut HandlerContext<'_>,
        name: u32,
        interface_name: &str,
        version: u32,
        new_id: RawObjectId,
    ) -> Result<(), WireError> {
        ctx.connection.send(
            self.id,
            0,
            vec![
                ArgValue::Uint(name),
                ArgValue::AnyNewId {
                    interface: interface_name.to_string(),
                    version,
                    id: new_id,
                },
            ],
        )
    }
}

impl Handler for Registry {
    fn interface(&self) -> &'static Interface {
        &INTERFACE
    }

    fn incoming_is_request(&self) -> bool {
        false
    }

    fn handle(
        &mut self,
        _ctx: &mut HandlerContext<'_>,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError> {
        match opcode {
            0 => {
                let name = args[0].as_uint().unwrap_or(0);
                let interface = args[1].as_str().unwrap_or_default();
                let version = args[2].as_uint().unwrap_or(0);
                if let Some(cb) = &mut self.on_global {
                    cb(name, interface, version);
                }
                Ok(())
            }
            1 => {
                let name = args[0].as_uint().unwrap_or(0);
                if let Some(cb) = &mut self.on_global_remove {
                    cb(name);
                }
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
        assert_eq!(INTERFACE.request(0).unwrap().name, "bind");
        assert_eq!(INTERFACE.event(0).unwrap().name, "global");
        assert_eq!(INTERFACE.event(1).unwrap().name, "global_remove");
    }
}
