//! Generated peer identities and request ids.
//!
//! A peer that connects without an identity is registered under a generated
//! one. Generated identities live in a reserved namespace (`%GN%` followed by
//! a fixed-width hex counter) so the socket can tell them apart from
//! addressable identities and garbage-collect their queues on disconnect.

use bytes::{BufMut, Bytes, BytesMut};

/// Prefix reserved for generated identities.
pub const GENERATED_PREFIX: &[u8] = b"%GN%";

const GENERATED_LEN: usize = GENERATED_PREFIX.len() + 16;

/// Returns true if `identity` was produced by an [`IdentityGenerator`].
#[inline]
pub fn is_generated(identity: &[u8]) -> bool {
    identity.starts_with(GENERATED_PREFIX)
}

/// Per-socket counter producing unique generated identities.
///
/// Each socket seeds its counter randomly so identities generated by
/// different sockets in the same process rarely collide; 64 bits never wrap
/// in practice.
#[derive(Debug, Clone)]
pub struct IdentityGenerator {
    next: u64,
}

impl IdentityGenerator {
    /// Create a generator with a random starting point.
    pub fn new() -> Self {
        Self::starting_at(u64::from(rand::random::<u32>()))
    }

    /// Create a generator with a fixed starting point.
    pub const fn starting_at(seed: u64) -> Self {
        Self { next: seed }
    }

    /// Produce the next identity.
    ///
    /// ```
    /// use zmq2_core::identity::{is_generated, IdentityGenerator};
    ///
    /// let mut ids = IdentityGenerator::starting_at(255);
    /// let id = ids.next_identity();
    /// assert_eq!(&id[..], b"%GN%00000000000000ff");
    /// assert!(is_generated(&id));
    /// ```
    pub fn next_identity(&mut self) -> Bytes {
        let value = self.next;
        self.next = self.next.wrapping_add(1);

        let mut buf = BytesMut::with_capacity(GENERATED_LEN);
        buf.put_slice(GENERATED_PREFIX);
        buf.put_slice(format!("{value:016x}").as_bytes());
        buf.freeze()
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}
