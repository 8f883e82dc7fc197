//! Blocked line storage and type-erased access for chunk columns.
//!
//! This module implements [`Line<T>`], the column container behind every trait
//! line of a chunk (and the slot arrays of chunks and belts). Values are stored
//! densely in fixed-capacity blocks:
//!
//! ```text
//! Vec<Box<[UnsafeCell<MaybeUninit<T>>]>>
//! ```
//!
//! # Storage model
//!
//! - Values are written densely from the beginning of block 0 upward with no
//!   gaps; only `0..len` are initialized.
//! - A block, once allocated, is never moved or freed until the line is cleared
//!   or dropped. Appending therefore never invalidates the address of an
//!   existing element, which is what lets a liquid chain keep iterating a chunk
//!   while callbacks append to it.
//! - Removal is `swap_remove`: the last element moves into the hole, so order
//!   is not preserved.
//! - Elements sit in `UnsafeCell`s so that the cursor can hand out element
//!   pointers from a shared reference to the line.
//!
//! # Type erasure
//!
//! [`ErasedLine`] lets chunks hold heterogeneous lines as
//! `Box<dyn ErasedLine>` and run the migration primitives (clone a row into
//! another line, move a row into another line) without knowing `T`. Typed access
//! goes through `as_any`/`as_any_mut` downcasts.
//!
//! # Safety and invariants
//!
//! - `len` equals the number of initialized elements.
//! - Element `i` lives in block `i >> shift` at row `i & mask`.
//! - No method exposes references to uninitialized memory.
//! - [`Line::ptr`] hands out raw pointers whose aliasing is governed by the
//!   caller (the chunk's slot-disjointness rules).

use std::{
    any::{type_name, Any, TypeId},
    cell::UnsafeCell,
    mem::MaybeUninit,
    ptr,
};

use crate::engine::error::{ApparatusError, ApparatusResult, TypeMismatchError};
use crate::engine::record::{Recorded, RecordedValue};


type Block<T> = Box<[UnsafeCell<MaybeUninit<T>>]>;

fn new_block<T>(capacity: usize) -> Block<T> {
    (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect()
}

/// Dense, blocked column of `T` with stable element addresses.
pub struct Line<T> {
    blocks: Vec<Block<T>>,
    shift: u32,
    mask: usize,
    len: usize,
}

// SAFETY: `Line<T>` owns its elements like a `Vec<T>`. The `UnsafeCell`s only
// allow pointer-based access through `ptr`, whose callers uphold exclusivity.
unsafe impl<T: Send> Send for Line<T> {}
// SAFETY: shared access either reads (`get`) or goes through `ptr`, which is
// `unsafe` and requires the caller to prevent data races.
unsafe impl<T: Send + Sync> Sync for Line<T> {}

impl<T> Line<T> {
    /// Creates an empty line whose blocks hold `block_capacity` rows
    /// (rounded up to a power of two).
    pub fn new(block_capacity: usize) -> Self {
        let capacity = block_capacity.max(1).next_power_of_two();
        Self {
            blocks: Vec::new(),
            shift: capacity.trailing_zeros(),
            mask: capacity - 1,
            len: 0,
        }
    }

    /// Rows per block.
    #[inline]
    pub fn block_capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the line holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn cell(&self, index: usize) -> &UnsafeCell<MaybeUninit<T>> {
        &self.blocks[index >> self.shift][index & self.mask]
    }

    /// Appends a value and returns its index.
    pub fn push(&mut self, value: T) -> usize {
        let index = self.len;
        if index >> self.shift >= self.blocks.len() {
            self.blocks.push(new_block(self.block_capacity()));
        }
        // SAFETY: `index` is the first uninitialized row; we have `&mut self`.
        unsafe { (*self.cell(index).get()).write(value) };
        self.len += 1;
        index
    }

    /// Shared reference to element `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: `index < len`, so the row is initialized.
        Some(unsafe { (*self.cell(index).get()).assume_init_ref() })
    }

    /// Exclusive reference to element `index`.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        // SAFETY: `index < len` and `&mut self` guarantees exclusivity.
        Some(unsafe { (*self.cell(index).get()).assume_init_mut() })
    }

    /// Raw pointer to element `index`.
    ///
    /// # Safety
    /// `index` must be below [`Line::len`]. The caller must ensure that no other
    /// reference to the same element is used in a conflicting way while the
    /// pointer is dereferenced.
    #[inline]
    pub unsafe fn ptr(&self, index: usize) -> *mut T {
        debug_assert!(index < self.len, "line index {index} out of range {}", self.len);
        self.cell(index).get().cast::<T>()
    }

    /// Removes element `index`, moving the last element into its place.
    pub fn swap_remove(&mut self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        let last = self.len - 1;
        self.len = last;
        // SAFETY: both rows were initialized; after the move row `last` is
        // considered uninitialized because `len` no longer covers it.
        unsafe {
            let last_value = ptr::read(self.cell(last).get().cast::<T>());
            if index == last {
                Some(last_value)
            } else {
                Some(ptr::replace(self.cell(index).get().cast::<T>(), last_value))
            }
        }
    }

    /// Removes and returns the last element.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.swap_remove(self.len - 1)
    }

    /// Drops elements past `len`.
    pub fn truncate(&mut self, len: usize) {
        while self.len > len {
            drop(self.pop());
        }
    }

    /// Drops every element and releases the blocks.
    pub fn clear(&mut self) {
        self.truncate(0);
        self.blocks.clear();
    }

    /// Iterates over the elements in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |index| self.get(index))
    }
}

impl<T> Drop for Line<T> {
    fn drop(&mut self) {
        if std::mem::needs_drop::<T>() {
            self.truncate(0);
        }
    }
}

/// Dynamically typed interface over a [`Line`].
///
/// Implementations must keep the element type fixed: every method taking a
/// boxed value or another line checks the type and returns
/// [`ApparatusError::WrongType`] on mismatch.
pub trait ErasedLine: Send + Sync {
    /// Borrows the concrete line as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Borrows the concrete line as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;
    /// Name of the element type.
    fn element_type_name(&self) -> &'static str;
    /// Number of stored elements.
    fn len(&self) -> usize;
    /// Returns `true` if the line holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Appends a default value.
    fn push_default(&mut self) -> usize;
    /// Appends a boxed value.
    fn push_boxed(&mut self, value: Box<dyn Any + Send>) -> ApparatusResult<usize>;
    /// Overwrites element `index` with a boxed value.
    fn write_boxed(&mut self, index: usize, value: Box<dyn Any + Send>) -> ApparatusResult<()>;
    /// Removes element `index` by swap-remove. Returns `false` if out of range.
    fn swap_remove(&mut self, index: usize) -> bool;
    /// Drops elements past `len`.
    fn truncate(&mut self, len: usize);
    /// Appends a clone of element `index` to the same line.
    fn clone_row(&mut self, index: usize) -> ApparatusResult<usize>;
    /// Appends a clone of element `index` to `target`.
    fn clone_row_into(&self, index: usize, target: &mut dyn ErasedLine) -> ApparatusResult<usize>;
    /// Moves element `index` to the end of `target`, swap-removing it here.
    fn move_into(&mut self, index: usize, target: &mut dyn ErasedLine) -> ApparatusResult<usize>;
    /// Detached copy of element `index`.
    fn record(&self, index: usize) -> ApparatusResult<Box<dyn RecordedValue>>;
}

fn mismatch<T>(actual: &'static str) -> ApparatusError {
    TypeMismatchError { expected: type_name::<T>(), actual }.into()
}

fn out_of_range(index: usize, length: usize) -> ApparatusError {
    ApparatusError::OutOfRange { index, length }
}

impl<T> ErasedLine for Line<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn element_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn push_default(&mut self) -> usize {
        self.push(T::default())
    }

    fn push_boxed(&mut self, value: Box<dyn Any + Send>) -> ApparatusResult<usize> {
        let value = value.downcast::<T>().map_err(|_| mismatch::<T>("<boxed value>"))?;
        Ok(self.push(*value))
    }

    fn write_boxed(&mut self, index: usize, value: Box<dyn Any + Send>) -> ApparatusResult<()> {
        let value = value.downcast::<T>().map_err(|_| mismatch::<T>("<boxed value>"))?;
        let length = self.len;
        let slot = self.get_mut(index).ok_or_else(|| out_of_range(index, length))?;
        *slot = *value;
        Ok(())
    }

    fn swap_remove(&mut self, index: usize) -> bool {
        Line::swap_remove(self, index).is_some()
    }

    fn truncate(&mut self, len: usize) {
        Line::truncate(self, len);
    }

    fn clone_row(&mut self, index: usize) -> ApparatusResult<usize> {
        let value = self.get(index).cloned().ok_or_else(|| out_of_range(index, self.len))?;
        Ok(self.push(value))
    }

    fn clone_row_into(&self, index: usize, target: &mut dyn ErasedLine) -> ApparatusResult<usize> {
        let actual = target.element_type_name();
        let target = target
            .as_any_mut()
            .downcast_mut::<Line<T>>()
            .ok_or_else(|| mismatch::<T>(actual))?;
        let value = self.get(index).cloned().ok_or_else(|| out_of_range(index, self.len))?;
        Ok(target.push(value))
    }

    fn move_into(&mut self, index: usize, target: &mut dyn ErasedLine) -> ApparatusResult<usize> {
        let actual = target.element_type_name();
        let target = target
            .as_any_mut()
            .downcast_mut::<Line<T>>()
            .ok_or_else(|| mismatch::<T>(actual))?;
        let length = self.len;
        let value = Line::swap_remove(self, index).ok_or_else(|| out_of_range(index, length))?;
        Ok(target.push(value))
    }

    fn record(&self, index: usize) -> ApparatusResult<Box<dyn RecordedValue>> {
        let value = self.get(index).cloned().ok_or_else(|| out_of_range(index, self.len))?;
        Ok(Box::new(Recorded(value)))
    }
}
