//! Type-erased access to resizable byte containers.
//!
//! Framing needs four things from a destination: its bytes, its length, a
//! way to resize it, and indexed access. [`ByteContainer`] names those
//! capabilities and [`ContainerView`] erases the concrete type behind them,
//! so one receive path serves `Vec<u8>`, `BytesMut`, arenas and anything else
//! that implements the trait.

use std::io;
use std::ops::{Index, IndexMut};

use bytes::BytesMut;

/// A contiguous, resizable run of bytes.
pub trait ByteContainer {
    /// Current contents.
    fn as_bytes(&self) -> &[u8];

    /// Current contents, mutably.
    fn as_bytes_mut(&mut self) -> &mut [u8];

    /// Resize to exactly `new_len` bytes. New bytes are zeroed.
    fn resize(&mut self, new_len: usize) -> io::Result<()>;

    /// Current length in bytes.
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the container holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteContainer for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }

    fn resize(&mut self, new_len: usize) -> io::Result<()> {
        Vec::resize(self, new_len, 0);
        Ok(())
    }
}

impl ByteContainer for BytesMut {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }

    fn resize(&mut self, new_len: usize) -> io::Result<()> {
        BytesMut::resize(self, new_len, 0);
        Ok(())
    }
}

/// A borrowed, type-erased view over any [`ByteContainer`].
///
/// The view does not own the container. `data()` may point somewhere else
/// after `resize`, which the borrow checker already forbids callers from
/// relying on.
pub struct ContainerView<'a> {
    inner: &'a mut dyn ByteContainer,
}

impl<'a> ContainerView<'a> {
    /// Wrap a container for the duration of the borrow.
    pub fn new<C: ByteContainer>(container: &'a mut C) -> Self {
        Self { inner: container }
    }

    /// Wrap an already type-erased container.
    pub fn from_dyn(inner: &'a mut dyn ByteContainer) -> Self {
        Self { inner }
    }

    /// Current backing bytes.
    pub fn data(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    /// Current backing bytes, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.inner.as_bytes_mut()
    }

    /// Current length.
    pub fn size(&self) -> usize {
        self.inner.len()
    }

    /// Forward to the wrapped container's own resize.
    pub fn resize(&mut self, new_len: usize) -> io::Result<()> {
        self.inner.resize(new_len)
    }
}

impl<'a, C: ByteContainer> From<&'a mut C> for ContainerView<'a> {
    fn from(container: &'a mut C) -> Self {
        Self::new(container)
    }
}

impl Index<usize> for ContainerView<'_> {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        &self.inner.as_bytes()[index]
    }
}

impl IndexMut<usize> for ContainerView<'_> {
    fn index_mut(&mut self, index: usize) -> &mut u8 {
        &mut self.inner.as_bytes_mut()[index]
    }
}

impl std::fmt::Debug for ContainerView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerView")
            .field("size", &self.size())
            .finish()
    }
}
