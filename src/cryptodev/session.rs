// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fixed size table mapping session ids to session contexts.

use super::CryptodevError;

/// Maximum number of live sessions per backend.
pub const MAX_NUM_SESSIONS: usize = 256;

/// Session slots indexed by session id.
///
/// Ids are handed out lowest free index first. The table itself is not synchronized; callers
/// serialize create and close.
#[derive(Debug)]
pub struct SessionTable<S> {
    slots: Vec<Option<S>>,
}

impl<S> Default for SessionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionTable<S> {
    /// Creates an empty table of [`MAX_NUM_SESSIONS`] slots.
    pub fn new() -> Self {
        SessionTable {
            slots: std::iter::repeat_with(|| None)
                .take(MAX_NUM_SESSIONS)
                .collect(),
        }
    }

    /// Lowest free slot, if any.
    pub fn allocate_index(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Stores `session` in the lowest free slot and returns its id.
    pub fn insert(&mut self, session: S) -> Result<u64, CryptodevError> {
        let index = self
            .allocate_index()
            .ok_or(CryptodevError::NoCapacity(MAX_NUM_SESSIONS))?;
        self.slots[index] = Some(session);
        Ok(index as u64)
    }

    /// Live session with the given id.
    pub fn get(&self, id: u64) -> Option<&S> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
    }

    /// Mutable access to a live session.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut S> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
            .and_then(Option::as_mut)
    }

    /// Removes a live session and returns it.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range or not allocated.
    pub fn close(&mut self, id: u64) -> S {
        let index = usize::try_from(id).unwrap_or(usize::MAX);
        assert!(index < self.slots.len(), "session id {id} out of range");
        match self.slots[index].take() {
            Some(session) => session,
            None => panic!("session {id} is not allocated"),
        }
    }

    /// Ids of all live sessions in ascending order.
    pub fn open_ids(&self) -> Vec<u64> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| index as u64)
            .collect()
    }

    /// Closes every live session.
    pub fn close_all(&mut self) -> Vec<S> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}
