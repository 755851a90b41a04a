//! Pluggable value transformation applied at the storage boundary.

use bytes::Bytes;

/// Transforms values on their way into and out of a node's store.
///
/// The overlay passes every stored value through [`wrap`](ValueCodec::wrap)
/// on put and [`unwrap`](ValueCodec::unwrap) on get. The codec is opaque to
/// the overlay: values at rest are whatever `wrap` produced, and snapshots
/// capture them in wrapped form. An encrypting codec lives entirely behind
/// this seam.
pub trait ValueCodec: Send + Sync {
    /// Transform a value before it is stored.
    fn wrap(&self, value: Bytes) -> Bytes;

    /// Reverse [`wrap`](ValueCodec::wrap) when a value is read back.
    fn unwrap(&self, value: Bytes) -> Bytes;
}

/// Codec that stores values verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl ValueCodec for IdentityCodec {
    fn wrap(&self, value: Bytes) -> Bytes {
        value
    }

    fn unwrap(&self, value: Bytes) -> Bytes {
        value
    }
}
