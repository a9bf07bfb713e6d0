//! Bookkeeping for open sockets, client identities, and rooms.
//!
//! The registry is plain synchronous state; the [`Subprotocol`] keeps it
//! behind a mutex and never holds that lock across an `.await`. It is
//! generic over the handle stored per socket so its invariants can be
//! checked without spawning anything.
//!
//! Invariants maintained by every method:
//!
//! - a client appears in `clients` iff it owns at least one open socket.
//! - a room exists iff it has at least one member.
//! - every room member owns at least one open socket.
//!
//! [`Subprotocol`]: crate::Subprotocol

use std::collections::{HashMap, HashSet};

use wsmux_transport::ConnectionId;

use crate::ClientId;

pub(crate) struct Registry<S> {
    sockets: HashMap<ConnectionId, S>,
    clients: HashMap<ClientId, HashSet<ConnectionId>>,
    rooms: HashMap<String, HashSet<ClientId>>,
}

/// What [`Registry::remove`] changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Removal {
    /// The socket was registered.
    pub socket: bool,
    /// It was the client's last socket; the client is gone.
    pub client_gone: bool,
    /// Rooms deleted because the client was their last member.
    pub rooms_deleted: usize,
}

impl<S: Clone> Registry<S> {
    pub fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            clients: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: ConnectionId, client: Option<&ClientId>, socket: S) {
        self.sockets.insert(id, socket);
        if let Some(client) = client {
            self.clients.entry(client.clone()).or_default().insert(id);
        }
    }

    /// Removes a socket. When it was its client's last one, the client also
    /// leaves every room, and rooms left empty are deleted.
    pub fn remove(&mut self, id: ConnectionId, client: Option<&ClientId>) -> Removal {
        let mut removal = Removal {
            socket: self.sockets.remove(&id).is_some(),
            ..Removal::default()
        };

        let Some(client) = client else {
            return removal;
        };
        let Some(owned) = self.clients.get_mut(client) else {
            return removal;
        };
        owned.remove(&id);
        if !owned.is_empty() {
            return removal;
        }

        self.clients.remove(client);
        removal.client_gone = true;

        let before = self.rooms.len();
        self.rooms.retain(|_, members| {
            members.remove(client);
            !members.is_empty()
        });
        removal.rooms_deleted = before - self.rooms.len();
        removal
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.sockets.contains_key(&id)
    }

    /// Adds `client` to `room`, creating the room if needed. Returns `false`
    /// if it was already a member.
    pub fn join(&mut self, room: &str, client: &ClientId) -> bool {
        match self.rooms.get_mut(room) {
            Some(members) => members.insert(client.clone()),
            None => {
                self.rooms
                    .insert(room.to_owned(), HashSet::from([client.clone()]));
                true
            }
        }
    }

    /// Removes `client` from `room`, deleting the room when it empties.
    /// Returns `false` if it was not a member.
    pub fn leave(&mut self, room: &str, client: &ClientId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(client);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Fanout snapshots
    // -----------------------------------------------------------------------

    pub fn socket(&self, id: ConnectionId) -> Option<S> {
        self.sockets.get(&id).cloned()
    }

    pub fn all(&self) -> Vec<S> {
        self.sockets.values().cloned().collect()
    }

    pub fn client_sockets(&self, client: &str) -> Vec<S> {
        self.clients
            .get(client)
            .map(|ids| self.resolve(ids.iter()))
            .unwrap_or_default()
    }

    /// Every socket of every member of `room`.
    pub fn room_sockets(&self, room: &str) -> Vec<S> {
        let Some(members) = self.rooms.get(room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|client| self.clients.get(client))
            .flat_map(|ids| self.resolve(ids.iter()))
            .collect()
    }

    fn resolve<'a>(&self, ids: impl Iterator<Item = &'a ConnectionId>) -> Vec<S> {
        ids.filter_map(|id| self.sockets.get(id).cloned()).collect()
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_socket_count(&self, client: &str) -> usize {
        self.clients.get(client).map_or(0, HashSet::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Sorted members of `room`, or `None` if the room does not exist.
    pub fn room_members(&self, room: &str) -> Option<Vec<ClientId>> {
        let mut members: Vec<_> = self.rooms.get(room)?.iter().cloned().collect();
        members.sort();
        Some(members)
    }

    /// Sorted rooms `client` is a member of.
    pub fn rooms_of(&self, client: &str) -> Vec<String> {
        let mut rooms: Vec<_> = self
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(client))
            .map(|(room, _)| room.clone())
            .collect();
        rooms.sort();
        rooms
    }
}
