//! Fixed-capacity circular queue
//!
//! Stores `capacity` elements of exactly `elem_size` bytes each in storage
//! supplied by the caller. Elements are copied in and out; nothing is ever
//! allocated after construction.
//!
//! Elements can be pushed at either end but are always taken from the
//! front, so `send_front` jumps the queue.

use crate::kernel::error::{KernelError, KernelResult};
use bytemuck::Pod;

#[derive(Debug, Clone)]
pub struct FixedQueue<B = Vec<u8>> {
    storage: B,
    elem_size: usize,
    capacity: usize,
    /// Slot of the front element
    head: usize,
    len: usize,
}

impl FixedQueue<Vec<u8>> {
    /// A queue owning zeroed storage for `count` elements
    pub fn with_capacity(elem_size: usize, count: usize) -> KernelResult<Self> {
        let bytes = elem_size
            .checked_mul(count)
            .ok_or(KernelError::InvalidArgument("queue size overflows"))?;
        Self::new(vec![0; bytes], elem_size)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> FixedQueue<B> {
    /// Use `storage` for as many whole elements as fit
    pub fn new(storage: B, elem_size: usize) -> KernelResult<Self> {
        if elem_size == 0 {
            return Err(KernelError::InvalidArgument("zero element size"));
        }
        let capacity = storage.as_ref().len() / elem_size;
        if capacity == 0 {
            return Err(KernelError::InvalidArgument("storage smaller than one element"));
        }
        Ok(Self {
            storage,
            elem_size,
            capacity,
            head: 0,
            len: 0,
        })
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Free slots
    pub fn available(&self) -> usize {
        self.capacity - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Drop every element
    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn slot(&self, index: usize) -> std::ops::Range<usize> {
        let start = (index % self.capacity) * self.elem_size;
        start..start + self.elem_size
    }

    fn check_len(&self, len: usize) -> KernelResult<()> {
        if len != self.elem_size {
            return Err(KernelError::InvalidArgument("element size mismatch"));
        }
        Ok(())
    }

    /// Append an element; `Busy` when full
    pub fn send_back(&mut self, item: &[u8]) -> KernelResult<()> {
        self.check_len(item.len())?;
        if self.is_full() {
            return Err(KernelError::Busy);
        }
        let range = self.slot(self.head + self.len);
        self.storage.as_mut()[range].copy_from_slice(item);
        self.len += 1;
        Ok(())
    }

    /// Insert an element ahead of everything queued; `Busy` when full
    pub fn send_front(&mut self, item: &[u8]) -> KernelResult<()> {
        self.check_len(item.len())?;
        if self.is_full() {
            return Err(KernelError::Busy);
        }
        self.head = (self.head + self.capacity - 1) % self.capacity;
        let range = self.slot(self.head);
        self.storage.as_mut()[range].copy_from_slice(item);
        self.len += 1;
        Ok(())
    }

    /// Copy the front element into `out` and remove it; `Busy` when empty
    pub fn receive(&mut self, out: &mut [u8]) -> KernelResult<()> {
        self.check_len(out.len())?;
        if self.is_empty() {
            return Err(KernelError::Busy);
        }
        let range = self.slot(self.head);
        out.copy_from_slice(&self.storage.as_ref()[range]);
        self.advance();
        Ok(())
    }

    /// The front element, in place
    pub fn peek(&self) -> Option<&[u8]> {
        if self.is_empty() {
            return None;
        }
        Some(&self.storage.as_ref()[self.slot(self.head)])
    }

    /// Discard the front element; `Busy` when empty
    pub fn remove_front(&mut self) -> KernelResult<()> {
        if self.is_empty() {
            return Err(KernelError::Busy);
        }
        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        self.head = (self.head + 1) % self.capacity;
        self.len -= 1;
    }

    // ========================================================================
    // Typed access
    // ========================================================================

    pub fn push<T: Pod>(&mut self, value: &T) -> KernelResult<()> {
        self.send_back(bytemuck::bytes_of(value))
    }

    pub fn push_front<T: Pod>(&mut self, value: &T) -> KernelResult<()> {
        self.send_front(bytemuck::bytes_of(value))
    }

    pub fn pop<T: Pod>(&mut self) -> KernelResult<T> {
        let value = self.peek_value::<T>()?;
        self.advance();
        Ok(value)
    }

    pub fn peek_value<T: Pod>(&self) -> KernelResult<T> {
        self.check_len(std::mem::size_of::<T>())?;
        let bytes = self.peek().ok_or(KernelError::Busy)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}
