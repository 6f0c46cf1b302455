use std::collections::TryReserveError;
use std::fmt;

#[derive(Debug)]
pub enum GrowError {
    OutOfMemory { requested: usize, source: TryReserveError },
}

impl fmt::Display for GrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, .. } => {
                write!(f, "Out of memory growing buffer to {} elements", requested)
            }
        }
    }
}

impl std::error::Error for GrowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            GrowError::OutOfMemory { ref source, .. } => Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, GrowError>;

/// Growable storage with an explicit doubling policy.
///
/// Growth goes through `try_reserve_exact`, so a failed allocation leaves the
/// buffer and its contents untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrowBuf<T> {
    items: Vec<T>,
}

impl<T> GrowBuf<T> {
    pub fn new(initial_capacity: usize) -> Result<Self> {
        let mut items = Vec::new();
        items
            .try_reserve_exact(initial_capacity)
            .map_err(|source| GrowError::OutOfMemory {
                requested: initial_capacity,
                source,
            })?;
        Ok(GrowBuf { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Grow to hold at least `needed` elements: double the capacity, or go
    /// straight to `needed` when doubling is not enough.
    pub fn ensure_capacity(&mut self, needed: usize) -> Result<()> {
        let capacity = self.items.capacity();
        if needed <= capacity {
            return Ok(());
        }
        let target = capacity.saturating_mul(2).max(needed);
        self.items
            .try_reserve_exact(target - self.items.len())
            .map_err(|source| GrowError::OutOfMemory {
                requested: target,
                source,
            })
    }

    pub fn push(&mut self, item: T) -> Result<()> {
        self.ensure_capacity(self.items.len() + 1)?;
        self.items.push(item);
        Ok(())
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Drop the logical content, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// Free the backing storage.
    pub fn release(self) {
        drop(self.items);
    }

    /// Hand every element to `destructor` in order, then free the backing
    /// storage.
    pub fn release_with<F: FnMut(T)>(self, destructor: F) {
        self.items.into_iter().for_each(destructor);
    }
}

impl<T: Clone> GrowBuf<T> {
    /// Copy `data` to the end of the content, growing first if required.
    pub fn append(&mut self, data: &[T]) -> Result<()> {
        self.ensure_capacity(self.items.len() + data.len())?;
        self.items.extend_from_slice(data);
        Ok(())
    }
}

impl<'a, T> IntoIterator for &'a GrowBuf<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> IntoIterator for GrowBuf<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// UTF-8 text accumulated from several character data runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBuf {
    bytes: GrowBuf<u8>,
}

impl TextBuf {
    pub fn new(initial_capacity: usize) -> Result<Self> {
        Ok(TextBuf {
            bytes: GrowBuf::new(initial_capacity)?,
        })
    }

    pub fn push_str(&mut self, s: &str) -> Result<()> {
        self.bytes.append(s.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        // only whole &str values are ever appended
        std::str::from_utf8(self.bytes.as_slice()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}
