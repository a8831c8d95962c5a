//! Pluggable at-rest transform for block values.

/// Error type returned by [`DataEncryption`] implementations.
pub type EncryptionError = Box<dyn std::error::Error + Send + Sync>;

/// Byte transform applied to every block value before it is written, and
/// reversed when the block is read back.
///
/// Block headers stay in clear text so a reader can walk a file without the
/// key. `decrypt(encrypt(x))` must return `x`.
pub trait DataEncryption: Send + Sync {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError>;
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}
