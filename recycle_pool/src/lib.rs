// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::len_without_is_empty, clippy::new_without_default)]

//! A fixed-capacity id allocator used for pids and engine ids (§4.1 of the spec).
//!
//! Ids are drawn from `[0, N)`. A `RecyclePool` never double-allocates a live id, and
//! `free` of an id that is not currently allocated is rejected rather than silently
//! ignored, so that a caller bug (double free) surfaces immediately instead of
//! corrupting the live set.

use std::fmt;

use fixedbitset::FixedBitSet;

pub type Id = u32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolError {
    /// No free id remains in the pool.
    PoolExhausted,
    /// `free` was called with an id that is not currently allocated.
    InvalidFree(Id),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::PoolExhausted => write!(f, "pool exhausted"),
            PoolError::InvalidFree(id) => write!(f, "id {id} is not currently allocated"),
        }
    }
}

impl std::error::Error for PoolError {}

///
/// A bounded id allocator. Ids are handed out from a stack of never-yet-used ids until
/// exhausted, after which freed ids are reused: both `allocate` and `free` are O(1).
///
pub struct RecyclePool {
    capacity: u32,
    // Ids in `[next_fresh, capacity)` have never been allocated.
    next_fresh: u32,
    // Ids explicitly freed and available for reuse, most-recently-freed first.
    free_stack: Vec<Id>,
    // Tracks which ids are currently held, to reject double-frees.
    allocated: FixedBitSet,
}

impl RecyclePool {
    /// Creates a pool that can hand out ids in `[0, size)`.
    pub fn new(size: u32) -> RecyclePool {
        RecyclePool {
            capacity: size,
            next_fresh: 0,
            free_stack: Vec::new(),
            allocated: FixedBitSet::with_capacity(size as usize),
        }
    }

    /// Total capacity of the pool.
    pub fn len(&self) -> u32 {
        self.capacity
    }

    /// Number of ids currently allocated.
    pub fn in_use(&self) -> u32 {
        self.allocated.count_ones(..) as u32
    }

    /// Allocates and returns a fresh id in `[0, N)`, or fails if the pool is exhausted.
    pub fn allocate(&mut self) -> Result<Id, PoolError> {
        let id = if let Some(id) = self.free_stack.pop() {
            id
        } else if self.next_fresh < self.capacity {
            let id = self.next_fresh;
            self.next_fresh += 1;
            id
        } else {
            return Err(PoolError::PoolExhausted);
        };

        debug_assert!(!self.allocated[id as usize], "id {id} was already allocated");
        self.allocated.set(id as usize, true);
        Ok(id)
    }

    /// Returns `id` to the pool for reuse. Fails if `id` is not currently allocated.
    pub fn free(&mut self, id: Id) -> Result<(), PoolError> {
        if id >= self.capacity || !self.allocated[id as usize] {
            return Err(PoolError::InvalidFree(id));
        }
        self.allocated.set(id as usize, false);
        self.free_stack.push(id);
        Ok(())
    }
}
