//! Integration tests driving the full client/server machinery end to end:
//! bootstrap (get_registry/bind/sync), fd transfer through `wl_shm`, object id
//! recycling, and the `sync`/`Callback.done` barrier law. Unlike the
//! per-module unit tests these exercise [`Dispatcher`] and [`Connection`]
//! together over a real connected socket pair, the way two independent
//! processes would see each other.

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use crate::connection::Connection;
use crate::dispatch::{Dispatcher, Handler, HandlerContext};
use crate::error::ProtocolError;
use crate::interface::Interface;
use crate::object::{Side, DISPLAY_ID};
use crate::protocol::callback::Callback;
use crate::protocol::registry::Registry;
use crate::protocol::{display, registry};
use crate::shm::Shm;
use crate::socket::Socket;
use crate::wire::ArgValue;

fn dispatcher_pair() -> (Dispatcher, Dispatcher) {
    let (a, b) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_NONBLOCK,
    )
    .unwrap();
    (
        Dispatcher::new(Connection::new(Socket::new(a)), Side::Server),
        Dispatcher::new(Connection::new(Socket::new(b)), Side::Client),
    )
}

/// A test-local stand-in for `crate::server`'s private `ServerDisplay`: just
/// enough of `wl_display` to answer `sync` and `get_registry`, so these tests
/// don't depend on the server module's internal (non-pub) wiring.
struct TestServerDisplay {
    globals: Vec<(u32, &'static str, u32)>,
}

impl Handler for TestServerDisplay {
    fn interface(&self) -> &'static Interface {
        &display::INTERFACE
    }

    fn incoming_is_request(&self) -> bool {
        true
    }

    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError> {
        match opcode {
            0 => {
                let callback_id = args[0].as_uint().unwrap();
                ctx.connection
                    .send(callback_id, 0, vec![ArgValue::Uint(0)])
                    .unwrap();
                Ok(())
            }
            1 => {
                let registry_id = args[0].as_uint().unwrap();
                ctx.objects
                    .insert(registry_id, "wl_registry", registry::INTERFACE.version)
                    .unwrap();
                for (name, interface, version) in &self.globals {
                    ctx.connection
                        .send(
                            registry_id,
                            0,
                            vec![
                                ArgValue::Uint(*name),
                                ArgValue::String(interface.to_string()),
                                ArgValue::Uint(*version),
                            ],
                        )
                        .unwrap();
                }
                ctx.spawn(
                    registry_id,
                    Box::new(TestServerRegistry {
                        globals: self.globals.clone(),
                    }),
                );
                Ok(())
            }
            _ => unreachable!(),
        }
    }
}

struct TestServerRegistry {
    globals: Vec<(u32, &'static str, u32)>,
}

impl Handler for TestServerRegistry {
    fn interface(&self) -> &'static Interface {
        &registry::INTERFACE
    }

    fn incoming_is_request(&self) -> bool {
        true
    }

    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError> {
        match opcode {
            0 => {
                let name = args[0].as_uint().unwrap();
                let (_, interface, version) = *self
                    .globals
                    .iter()
                    .find(|(n, ..)| *n == name)
                    .expect("bound global must exist");
                if let ArgValue::AnyNewId { id, .. } = &args[1] {
                    ctx.objects.insert(*id, interface, version).unwrap();
                }
                Ok(())
            }
            _ => unreachable!(),
        }
    }
}

fn pump_until_quiet(sides: &mut [&mut Dispatcher]) {
    for _ in 0..16 {
        for d in sides.iter_mut() {
            d.pump().unwrap();
        }
    }
}

#[test]
fn bootstrap_sequence_binds_a_global_and_fires_sync() {
    let (mut server, mut client) = dispatcher_pair();
    server
        .objects()
        .insert(DISPLAY_ID, "wl_display", 1)
        .unwrap();
    server.register(
        DISPLAY_ID,
        Box::new(TestServerDisplay {
            globals: vec![(1, "wl_shm", 1)],
        }),
    );
    client
        .objects()
        .insert(DISPLAY_ID, "wl_display", 1)
        .unwrap();
    client.register(DISPLAY_ID, Box::new(display::Display::new()));

    let registry_id = client.objects().allocate().unwrap();
    client.objects().insert(registry_id, "wl_registry", 1).unwrap();

    let seen_globals: std::rc::Rc<std::cell::RefCell<Vec<(u32, String, u32)>>> =
        Default::default();
    let seen = seen_globals.clone();
    let mut registry = Registry::new(registry_id);
    registry.on_global(move |name, interface, version| {
        seen.borrow_mut().push((name, interface.to_string(), version));
    });
    client.register(registry_id, Box::new(registry));
    client
        .connection()
        .send(DISPLAY_ID, 1, vec![ArgValue::NewId(registry_id)])
        .unwrap();

    let callback_id = client.objects().allocate().unwrap();
    client.objects().insert(callback_id, "wl_callback", 1).unwrap();
    client.register(callback_id, Box::new(Callback::new(callback_id)));
    client
        .connection()
        .send(DISPLAY_ID, 0, vec![ArgValue::NewId(callback_id)])
        .unwrap();

    pump_until_quiet(&mut [&mut server, &mut client]);

    assert_eq!(
        *seen_globals.borrow(),
        vec![(1, "wl_shm".to_string(), 1)]
    );
    // The barrier law: by the time the callback's id has been released, every
    // request enqueued before `sync` (here, `get_registry`) has already been
    // processed by the server.
    assert!(!client.objects().contains(callback_id));
}

#[test]
fn id_recycling_reuses_freed_ids_across_a_live_dispatcher() {
    let (mut server, _client) = dispatcher_pair();
    let a = server.objects().allocate().unwrap();
    server.objects().insert(a, "wl_surface", 1).unwrap();
    server.release(a).unwrap();
    let b = server.objects().allocate().unwrap();
    assert_eq!(a, b);
}

#[test]
fn shm_pool_fd_round_trips_and_unmaps_once_both_sides_tear_down() {
    let (mut server, mut client) = dispatcher_pair();

    let shm_id = server.objects().allocate().unwrap();
    server.objects().insert(shm_id, "wl_shm", 1).unwrap();
    server.register(shm_id, Box::new(Shm::new(shm_id)));

    client.objects().insert(DISPLAY_ID, "wl_display", 1).unwrap();
    let pool_id_on_client = client.objects().allocate().unwrap();
    client
        .objects()
        .insert(pool_id_on_client, "wl_shm_pool", 1)
        .unwrap();

    let backing = memfd("waycore-test-pool", 4096);
    client
        .connection()
        .send(
            shm_id,
            0,
            vec![
                ArgValue::NewId(pool_id_on_client),
                ArgValue::Fd(backing),
                ArgValue::Int(4096),
            ],
        )
        .unwrap();

    pump_until_quiet(&mut [&mut client, &mut server]);
    assert!(server.objects().contains(pool_id_on_client));

    let buffer_id = server.objects().allocate().unwrap();
    client
        .connection()
        .send(
            pool_id_on_client,
            0,
            vec![
                ArgValue::NewId(buffer_id),
                ArgValue::Int(0),
                ArgValue::Int(64),
                ArgValue::Int(16),
                ArgValue::Int(256),
                ArgValue::Uint(0),
            ],
        )
        .unwrap();
    pump_until_quiet(&mut [&mut client, &mut server]);
    assert!(server.objects().contains(buffer_id));

    // destroy the pool first, then the buffer: the mapping must survive until
    // the buffer destroy arrives, regardless of arrival order (DESIGN.md §9.2).
    client
        .connection()
        .send(pool_id_on_client, 2, vec![])
        .unwrap();
    pump_until_quiet(&mut [&mut client, &mut server]);
    assert!(!server.objects().contains(pool_id_on_client));

    client.connection().send(buffer_id, 0, vec![]).unwrap();
    pump_until_quiet(&mut [&mut client, &mut server]);
    assert!(!server.objects().contains(buffer_id));
}

fn memfd(name: &str, len: usize) -> std::os::fd::OwnedFd {
    use nix::sys::memfd::{memfd_create, MFdFlags};
    let fd = memfd_create(name, MFdFlags::empty()).unwrap();
    let file = std::fs::File::from(fd);
    file.set_len(len as u64).unwrap();
    std::os::fd::OwnedFd::from(file)
}
