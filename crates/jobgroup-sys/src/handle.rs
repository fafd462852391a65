//! Kernel handle values and an owning guard

use log::debug;

use crate::api::JobApi;

/// Opaque kernel handle value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(isize);

impl Handle {
    /// `NULL`
    pub const NULL: Handle = Handle(0);
    /// `INVALID_HANDLE_VALUE`
    pub const INVALID: Handle = Handle(-1);

    pub const fn from_raw(raw: isize) -> Self {
        Handle(raw)
    }

    pub const fn as_raw(self) -> isize {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::NULL.0 && self.0 != Self::INVALID.0
    }
}

/// Closes the wrapped handle when dropped
pub struct OwnedHandle<A: JobApi> {
    api: A,
    raw: Handle,
}

impl<A: JobApi> OwnedHandle<A> {
    pub fn new(api: A, raw: Handle) -> Self {
        Self { api, raw }
    }

    pub fn as_handle(&self) -> Handle {
        self.raw
    }

    pub fn api(&self) -> &A {
        &self.api
    }
}

impl<A: JobApi> std::fmt::Debug for OwnedHandle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.raw).finish()
    }
}

impl<A: JobApi> Drop for OwnedHandle<A> {
    fn drop(&mut self) {
        if !self.raw.is_valid() {
            return;
        }
        if let Err(e) = self.api.close_handle(self.raw) {
            debug!("Closing handle {:?} failed: {}", self.raw, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_validity() {
        assert!(!Handle::NULL.is_valid());
        assert!(!Handle::INVALID.is_valid());
        assert!(Handle::from_raw(0x104).is_valid());
        assert_eq!(Handle::from_raw(0x104).as_raw(), 0x104);
    }
}
