//! Fixed-capacity buffer pool for one queue direction.
//!
//! Slots are indexed 0..capacity and tagged with an ownership state. The
//! session flips a slot to device-owned on submit and back to client-owned
//! on retrieve; a slot can never be queued twice without an intervening
//! completion.

use crate::device::Direction;
use crate::error::{CodecError, CodecResult};

/// Hard upper bound on buffers per direction.
pub const MAX_POOL_BUFFERS: u32 = 32;

/// Ownership tag of one pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    FreeForClient,
    OwnedByDevice,
}

#[derive(Debug)]
pub struct BufferPool {
    direction: Direction,
    slots: Vec<SlotState>,
}

impl BufferPool {
    /// Pool with zero capacity, the state outside Configured/Running.
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            slots: Vec::new(),
        }
    }

    pub fn with_capacity(direction: Direction, count: u32) -> Self {
        Self {
            direction,
            slots: vec![SlotState::FreeForClient; count as usize],
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_state(&self, index: u32) -> Option<SlotState> {
        self.slots.get(index as usize).copied()
    }

    pub fn queued_count(&self) -> u32 {
        self.slots
            .iter()
            .filter(|s| **s == SlotState::OwnedByDevice)
            .count() as u32
    }

    /// Flip a slot to device-owned. Fails when the index is out of range or
    /// the slot is already queued.
    pub fn mark_queued(&mut self, index: u32) -> CodecResult<()> {
        match self.slots.get_mut(index as usize) {
            Some(slot @ SlotState::FreeForClient) => {
                *slot = SlotState::OwnedByDevice;
                Ok(())
            }
            _ => Err(CodecError::InvalidSlot {
                direction: self.direction,
                index,
            }),
        }
    }

    /// Flip a completed slot back to client-owned.
    pub fn mark_completed(&mut self, index: u32) -> CodecResult<()> {
        match self.slots.get_mut(index as usize) {
            Some(slot @ SlotState::OwnedByDevice) => {
                *slot = SlotState::FreeForClient;
                Ok(())
            }
            _ => Err(CodecError::InvalidSlot {
                direction: self.direction,
                index,
            }),
        }
    }

    /// Return every slot to the client. Stream-off aborts all in-flight
    /// device work, so the pool view must match.
    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            *slot = SlotState::FreeForClient;
        }
    }

    /// Drop all slots; capacity becomes zero.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_and_complete_round_trip() {
        let mut pool = BufferPool::with_capacity(Direction::Input, 4);
        assert_eq!(pool.capacity(), 4);
        pool.mark_queued(2).unwrap();
        assert_eq!(pool.slot_state(2), Some(SlotState::OwnedByDevice));
        assert_eq!(pool.queued_count(), 1);
        pool.mark_completed(2).unwrap();
        assert_eq!(pool.slot_state(2), Some(SlotState::FreeForClient));
        assert_eq!(pool.queued_count(), 0);
    }

    #[test]
    fn double_queue_is_rejected() {
        let mut pool = BufferPool::with_capacity(Direction::Output, 2);
        pool.mark_queued(0).unwrap();
        let err = pool.mark_queued(0).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidSlot {
                direction: Direction::Output,
                index: 0
            }
        );
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut pool = BufferPool::with_capacity(Direction::Input, 2);
        assert!(pool.mark_queued(2).is_err());
        assert!(pool.mark_completed(5).is_err());
        assert_eq!(pool.slot_state(2), None);
    }

    #[test]
    fn complete_of_free_slot_is_rejected() {
        let mut pool = BufferPool::with_capacity(Direction::Input, 1);
        assert!(pool.mark_completed(0).is_err());
    }

    #[test]
    fn release_all_frees_queued_slots() {
        let mut pool = BufferPool::with_capacity(Direction::Input, 3);
        pool.mark_queued(0).unwrap();
        pool.mark_queued(1).unwrap();
        pool.release_all();
        assert_eq!(pool.queued_count(), 0);
        assert_eq!(pool.capacity(), 3);
        pool.mark_queued(0).unwrap();
    }

    #[test]
    fn clear_drops_capacity() {
        let mut pool = BufferPool::with_capacity(Direction::Output, 3);
        pool.clear();
        assert!(pool.is_empty());
        assert!(pool.mark_queued(0).is_err());
    }
}
