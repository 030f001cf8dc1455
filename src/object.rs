// ABOUTME: Object id allocation and the live object table shared by client and server
// ABOUTME: Tracks which interface each live id belongs to and recycles freed ids

//! Every message targets an object id. This module owns the bookkeeping that
//! both client and server need to resolve an id to an interface (to know how
//! to decode the message that follows) and to allocate/recycle ids as
//! objects are created and destroyed.
//!
//! Ids below `0xFF00_0000` are client-allocated (requests create them via
//! `new_id` arguments); ids at or above that are server-allocated (events
//! that hand back server-side globals). Id `0` is reserved for "null" and is
//! never assigned. Id `1` is always the `Display` singleton.

use std::collections::HashMap;
use thiserror::Error;

pub use crate::wire::RawObjectId;

/// First id in the server-allocated range.
pub const SERVER_ID_BASE: RawObjectId = 0xFF00_0000;

/// The `Display` singleton always occupies id 1.
pub const DISPLAY_ID: RawObjectId = 1;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("object {0} is not in the live object table")]
    Unknown(RawObjectId),

    #[error("object {0} already exists")]
    AlreadyExists(RawObjectId),

    #[error("id allocator exhausted its range")]
    IdSpaceExhausted,
}

/// Which side allocated an id, determining which half of the id space a
/// fresh allocation is drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// One live entry in the object table: the interface name it was bound as
/// (used to look up its message signatures) and the protocol version it was
/// created at.
#[derive(Clone, Debug)]
pub struct ObjectEntry {
    pub interface: &'static str,
    pub version: u32,
}

/// Monotonic-counter-plus-free-list allocator and live-object map, one
/// instance per connection endpoint.
#[derive(Debug)]
pub struct ObjectTable {
    side: Side,
    next: RawObjectId,
    free_list: Vec<RawObjectId>,
    live: HashMap<RawObjectId, ObjectEntry>,
}

impl ObjectTable {
    pub fn new(side: Side) -> ObjectTable {
        let next = match side {
            Side::Client => DISPLAY_ID,
            Side::Server => SERVER_ID_BASE,
        };
        ObjectTable {
            side,
            next,
            free_list: Vec::new(),
            live: HashMap::new(),
        }
    }

    /// Allocate a fresh id in this table's half of the id space, preferring
    /// a recycled id from the free list over growing the monotonic counter.
    pub fn allocate(&mut self) -> Result<RawObjectId, ObjectError> {
        if let Some(id) = self.free_list.pop() {
            return Ok(id);
        }
        let id = self.next;
        let limit = match self.side {
            Side::Client => SERVER_ID_BASE - 1,
            Side::Server => RawObjectId::MAX,
        };
        if id > limit {
            return Err(ObjectError::IdSpaceExhausted);
        }
        self.next = self.next.wrapping_add(1);
        Ok(id)
    }

    /// Register `id` as live, bound to `interface` at `version`. Used both
    /// for ids this table allocated and for ids the peer announced (e.g. a
    /// registry `global` id the local side did not allocate itself).
    pub fn insert(
        &mut self,
        id: RawObjectId,
        interface: &'static str,
        version: u32,
    ) -> Result<(), ObjectError> {
        if self.live.contains_key(&id) {
            return Err(ObjectError::AlreadyExists(id));
        }
        self.live.insert(id, ObjectEntry { interface, version });
        Ok(())
    }

    pub fn get(&self, id: RawObjectId) -> Result<&ObjectEntry, ObjectError> {
        self.live.get(&id).ok_or(ObjectError::Unknown(id))
    }

    /// Destroy `id`, returning it to the free list for reuse. Per the
    /// protocol's "no premature id recycling" invariant, this must only be
    /// called once the peer has acknowledged (or does not need to
    /// acknowledge) the destruction — callers are responsible for sequencing
    /// that via `Display.delete_id` / request ordering, not this table.
    pub fn remove(&mut self, id: RawObjectId) -> Result<ObjectEntry, ObjectError> {
        let entry = self.live.remove(&id).ok_or(ObjectError::Unknown(id))?;
        self.free_list.push(id);
        Ok(entry)
    }

    pub fn contains(&self, id: RawObjectId) -> bool {
        self.live.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_allocates_from_low_range_starting_after_display() {
        let mut table = ObjectTable::new(Side::Client);
        table.insert(DISPLAY_ID, "wl_display", 1).unwrap();
        let id = table.allocate().unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn server_allocates_from_high_range() {
        let mut table = ObjectTable::new(Side::Server);
        let id = table.allocate().unwrap();
        assert_eq!(id, SERVER_ID_BASE);
    }

    #[test]
    fn freed_ids_are_recycled_before_growing_counter() {
        let mut table = ObjectTable::new(Side::Client);
        table.insert(DISPLAY_ID, "wl_display", 1).unwrap();
        let a = table.allocate().unwrap();
        table.insert(a, "wl_surface", 1).unwrap();
        table.remove(a).unwrap();
        let b = table.allocate().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_object_lookup_fails() {
        let table = ObjectTable::new(Side::Client);
        assert!(matches!(table.get(42), Err(ObjectError::Unknown(42))));
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut table = ObjectTable::new(Side::Client);
        table.insert(2, "wl_surface", 1).unwrap();
        assert!(matches!(
            table.insert(2, "wl_surface", 1),
            Err(ObjectError::AlreadyExists(2))
        ));
    }
}
