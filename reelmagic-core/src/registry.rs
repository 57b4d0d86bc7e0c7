//! # Handle Registry
//!
//! Maps the small integer handles the driver API speaks in to players. A player
//! takes one handle per stream it exposes (demux, video, audio), with its base
//! handle doubling as the first of those.
//!
//! The table only grows as far as it needs to; a failed allocation shrinks it
//! back to where it was.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ReelMagicError, ReelMagicResult};
use crate::player::SharedPlayer;

pub type Handle = u8;

pub const INVALID_HANDLE: Handle = 0;
pub const FIRST_HANDLE: Handle = 1;
pub const LAST_HANDLE: Handle = 15;

/// Inclusive range of handles the registry hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    pub first: Handle,
    pub last: Handle,
}

impl HandleRange {
    pub fn new(first: Handle, last: Handle) -> Self {
        let first = if first == INVALID_HANDLE {
            warn!("Handle {} is reserved, starting at {}", INVALID_HANDLE, FIRST_HANDLE);
            FIRST_HANDLE
        } else {
            first
        };
        let last = if last < first {
            warn!("Last handle {} is below first handle {}, using {}", last, first, first);
            first
        } else {
            last
        };
        Self { first, last }
    }

    pub fn len(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    pub fn contains(&self, handle: Handle) -> bool {
        (self.first..=self.last).contains(&handle)
    }
}

impl Default for HandleRange {
    fn default() -> Self {
        Self::new(FIRST_HANDLE, LAST_HANDLE)
    }
}

pub struct HandleRegistry {
    range: HandleRange,
    /// Slot `i` holds handle `range.first + i`
    slots: Vec<Option<SharedPlayer>>,
}

impl HandleRegistry {
    pub fn new(range: HandleRange) -> Self {
        Self {
            range,
            slots: Vec::new(),
        }
    }

    pub fn range(&self) -> HandleRange {
        self.range
    }

    /// Bind `player` to a base handle plus one handle per extra stream.
    ///
    /// On exhaustion nothing is left behind: the table and the player's handles
    /// are exactly as they were before the call.
    pub fn allocate(&mut self, player: &SharedPlayer) -> ReelMagicResult<Handle> {
        let table_len = self.slots.len();
        match self.bind(player) {
            Ok(base) => Ok(base),
            Err(e) => {
                self.rollback(player, table_len);
                Err(e)
            }
        }
    }

    fn bind(&mut self, player: &SharedPlayer) -> ReelMagicResult<Handle> {
        let base = self.claim(player)?;
        let mut p = player.lock();
        p.register_base_handle(base);

        let mut unused_base = Some(base);
        for kind in p.streams() {
            let handle = match unused_base.take() {
                Some(handle) => handle,
                None => self.claim(player)?,
            };
            p.register_stream_handle(kind, handle);
            debug!("Handle #{} -> {} {:?}", handle, p.name(), kind);
        }
        Ok(base)
    }

    /// First free handle, growing the table when every existing slot is taken
    fn claim(&mut self, player: &SharedPlayer) -> ReelMagicResult<Handle> {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None if self.slots.len() < self.range.len() => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(ReelMagicError::HandlesExhausted),
        };
        self.slots[index] = Some(player.clone());
        Ok(self.handle_at(index))
    }

    fn rollback(&mut self, player: &SharedPlayer, table_len: usize) {
        warn!("Ran out of handles while registering {}", player.lock().name());
        self.slots.truncate(table_len);
        self.clear_slots_of(player);
        player.lock().clear_handles();
    }

    /// Drop every handle bound to the player owning `handle`
    pub fn free(&mut self, handle: Handle) -> ReelMagicResult<()> {
        let player = self.resolve(handle)?;
        self.clear_slots_of(&player);
        debug!("Freed handles of player #{}", handle);
        Ok(())
    }

    pub fn resolve(&self, handle: Handle) -> ReelMagicResult<SharedPlayer> {
        self.index_of(handle)
            .and_then(|index| self.slots.get(index))
            .and_then(|slot| slot.clone())
            .ok_or(ReelMagicError::InvalidHandle(handle))
    }

    pub fn clear_all(&mut self) {
        self.slots.clear();
    }

    /// Occupied handles in ascending order
    pub fn live_handles(&self) -> Vec<Handle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| self.handle_at(index))
            .collect()
    }

    /// Distinct players currently registered
    pub fn players(&self) -> Vec<SharedPlayer> {
        let mut players: Vec<SharedPlayer> = Vec::new();
        for player in self.slots.iter().flatten() {
            if !players.iter().any(|p| Arc::ptr_eq(p, player)) {
                players.push(player.clone());
            }
        }
        players
    }

    fn clear_slots_of(&mut self, player: &SharedPlayer) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|p| Arc::ptr_eq(p, player)) {
                *slot = None;
            }
        }
    }

    fn handle_at(&self, index: usize) -> Handle {
        self.range.first + index as Handle
    }

    fn index_of(&self, handle: Handle) -> Option<usize> {
        self.range
            .contains(handle)
            .then(|| (handle - self.range.first) as usize)
    }

    #[cfg(test)]
    fn table_len(&self) -> usize {
        self.slots.len()
    }
}
