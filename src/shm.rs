// ABOUTME: Hand-written lifecycle logic for wl_shm / wl_shm_pool / wl_buffer server resources
// ABOUTME: mmap/munmap state machine the scanner's generic opcode-closure stubs cannot express

//! The scanner emits a generic `ShmPoolResource`/`BufferResource` pair from
//! `protocol/core.xml`, but their actual behavior — mapping the client's fd,
//! carving buffers out of it, and tearing the mapping down at the right
//! moment — is real state, not boilerplate a codegen template can produce.
//! This module implements that behavior directly as [`Handler`]s against the
//! generated `wl_shm`/`wl_shm_pool`/`wl_buffer` interface descriptors, the
//! same way [`crate::protocol::display`] hand-writes behavior against its
//! own descriptors.
//!
//! Teardown follows the decision recorded in DESIGN.md: a pool's backing
//! mapping is unmapped exactly once, when it has been explicitly destroyed
//! *and* every buffer carved from it has also been destroyed — whichever of
//! the two happens second is the one that performs the unmap.

use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use tracing::{instrument, trace};

use crate::dispatch::{Handler, HandlerContext};
use crate::error::ProtocolError;
use crate::generated::{buffer, shm, shm_pool};
use crate::interface::Interface;
use crate::object::RawObjectId;
use crate::wire::ArgValue;

/// An active `mmap`-backed region. Dropped only via [`Mapping::unmap`], never
/// implicitly, so teardown timing stays a deliberate decision of the owning
/// resource rather than of Rust's drop order.
struct Mapping {
    ptr: std::ptr::NonNull<std::ffi::c_void>,
    len: usize,
}

// The mapping is only ever touched from the single thread that owns the
// connection's Dispatcher (§5's single-threaded invariant), so moving the
// pointer across a `Send` boundary between construction and use is sound.
unsafe impl Send for Mapping {}

impl Mapping {
    fn map(fd: &OwnedFd, len: usize) -> nix::Result<Mapping> {
        use nix::sys::mman::{mmap, MapFlags, ProtFlags};
        let len = NonZeroUsize::new(len).ok_or(nix::errno::Errno::EINVAL)?;
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )?
        };
        Ok(Mapping {
            ptr,
            len: len.get(),
        })
    }

    fn unmap(self) {
        // SAFETY: `ptr`/`len` are exactly the pair returned by the `mmap`
        // call that produced this `Mapping`, and this is the only reference
        // to it (no buffer holds a raw pointer past `create_buffer` time).
        if let Err(err) = unsafe { nix::sys::mman::munmap(self.ptr, self.len) } {
            tracing::warn!(%err, "munmap failed during shm pool teardown");
        }
    }
}

/// Server-side resource for one `wl_shm_pool`. Lives in the dispatcher's
/// handler map under the id the client's `create_pool` allocated.
pub struct ShmPool {
    id: RawObjectId,
    map: Option<Mapping>,
    fd: OwnedFd,
    unlinked: bool,
    live_buffers: usize,
}

impl ShmPool {
    pub fn new(id: RawObjectId, fd: OwnedFd, size: i32) -> nix::Result<ShmPool> {
        let map = Mapping::map(&fd, size.max(0) as usize)?;
        Ok(ShmPool {
            id,
            map: Some(map),
            fd,
            unlinked: false,
            live_buffers: 0,
        })
    }

    /// Unmap now if both teardown conditions (§9.2) hold; otherwise defer.
    fn maybe_unmap(&mut self) {
        if self.unlinked && self.live_buffers == 0 {
            if let Some(map) = self.map.take() {
                map.unmap();
            }
        }
    }
}

/// Sent by a [`Buffer`] to its owning pool's [`Handler::notify`] when the
/// buffer is destroyed, so the pool can drop its refcount and potentially
/// complete teardown regardless of which destroy arrived second.
struct BufferDestroyed;

impl Handler for ShmPool {
    fn interface(&self) -> &'static Interface {
        &shm_pool::INTERFACE
    }

    fn incoming_is_request(&self) -> bool {
        true
    }

    #[instrument(skip(self, ctx, args), fields(pool = self.id))]
    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError> {
        match opcode {
            // create_buffer(id, offset, width, height, stride, format)
            0 => {
                let new_id = args[0].as_uint().unwrap_or(0);
                ctx.objects
                    .insert(new_id, "wl_buffer", buffer::INTERFACE.version)
                    .map_err(|e| ProtocolError::ResourceExhausted(e.to_string()))?;
                self.live_buffers += 1;
                trace!(new_id, live_buffers = self.live_buffers, "buffer created");
                ctx.spawn(new_id, Box::new(Buffer::new(new_id, self.id)));
                Ok(())
            }
            // resize(size): the reference implementation re-mmaps without
            // unmapping the old region first; this port explicitly unmaps
            // before remapping to avoid leaking the old mapping (§9.2).
            1 => {
                let size = args[0].as_uint().unwrap_or(0) as i32;
                if let Some(old) = self.map.take() {
                    old.unmap();
                }
                match Mapping::map(&self.fd, size.max(0) as usize) {
                    Ok(new_map) => {
                        self.map = Some(new_map);
                        Ok(())
                    }
                    Err(err) => Err(ProtocolError::ResourceExhausted(format!(
                        "shm pool resize to {size} bytes failed: {err}"
                    ))),
                }
            }
            // destroy
            2 => {
                self.unlinked = true;
                self.maybe_unmap();
                ctx.release(self.id);
                Ok(())
            }
            _ => unreachable!("dispatcher validated opcode against INTERFACE.requests"),
        }
    }

    fn notify(&mut self, event: &dyn std::any::Any) {
        if event.downcast_ref::<BufferDestroyed>().is_some() {
            self.live_buffers = self.live_buffers.saturating_sub(1);
            self.maybe_unmap();
        }
    }
}

/// Server-side resource for one `wl_buffer`. Its only lifecycle
/// responsibility is telling its parent pool it has gone away.
pub struct Buffer {
    id: RawObjectId,
    pool: RawObjectId,
}

impl Buffer {
    pub fn new(id: RawObjectId, pool: RawObjectId) -> Buffer {
        Buffer { id, pool }
    }

    pub fn pool(&self) -> RawObjectId {
        self.pool
    }
}

impl Handler for Buffer {
    fn interface(&self) -> &'static Interface {
        &buffer::INTERFACE
    }

    fn incoming_is_request(&self) -> bool {
        true
    }

    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        opcode: u16,
        _args: Vec<ArgValue>,
    ) -> Result<(), ProtocolError> {
        match opcode {
            // destroy
            0 => {
                ctx.notify(self.pool, Box::new(BufferDestroyed));
                ctx.release(self.id);
                Ok(())
            }
            _ => unreachable!("dispatcher validated opcode against INTERFACE.requests"),
        }
    }
}

/// Server-side resource for the `wl_shm` global itself: the only request it
/// accepts is `create_pool`, which receives the client's fd and mmaps it.
pub struct Shm {
    id: RawObjectId,
}

impl Shm {
    pub fn new(id: RawObjectId) -> Shm {
        Shm { id }
    }
}

impl Handler for Shm {
    fn interface(&self) -> &'static Interface {
        &shm::INTERFACE
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
            // create_pool(id, fd, size)
            0 => {
                let new_id = args[0].as_uint().unwrap_or(0);
                let size = match &args[2] {
                    ArgValue::Int(v) => *v,
                    _ => 0,
                };
                let mut args = args;
                let fd = match args.swap_remove(1) {
                    ArgValue::Fd(fd) => fd,
                    _ => {
                        return Err(ProtocolError::InvalidMethod {
                            object: self.id,
                            opcode,
                        })
                    }
                };
                match ShmPool::new(new_id, fd, size) {
                    Ok(pool) => {
                        ctx.objects
                            .insert(new_id, "wl_shm_pool", shm_pool::INTERFACE.version)
                            .map_err(|e| ProtocolError::ResourceExhausted(e.to_string()))?;
                        ctx.spawn(new_id, Box::new(pool));
                        Ok(())
                    }
                    Err(err) => Err(ProtocolError::ResourceExhausted(format!(
                        "mmap of client shm pool fd failed: {err}"
                    ))),
                }
            }
            _ => unreachable!("dispatcher validated opcode against INTERFACE.requests"),
        }
    }
}
