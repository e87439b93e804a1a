//! Host-side collaborators
//!
//! The engine never touches sockets, clocks or the account database
//! directly. The game server hands each call an implementation of these
//! traits.

use std::time::Duration;

use warden_core::wire::ServerOpcode;

/// Identifier the host uses for a connected client session.
pub type SessionId = u64;

/// Session transport and world state.
pub trait Transport {
    /// Deliver an already-encrypted frame, reliably and in order.
    /// `opcode` is the plaintext opcode, for host-side accounting only.
    fn send_framed(&mut self, session: SessionId, opcode: ServerOpcode, frame: Vec<u8>);

    /// Server clock in milliseconds; wraps like the client tick counter.
    fn now_millis(&self) -> u32;

    /// Whether the session currently controls a player in the world.
    fn has_active_player(&self, session: SessionId) -> bool;
}

/// Account store used to enforce penalties.
pub trait AccountStore {
    fn account_name(&self, session: SessionId) -> Option<String>;

    fn kick(&mut self, session: SessionId, reason: &str);

    fn ban(&mut self, account: &str, duration: Duration, reason: &str, banned_by: &str);
}

/// Everything a session needs from its host.
pub trait SessionHost: Transport + AccountStore {}

impl<T: Transport + AccountStore> SessionHost for T {}
