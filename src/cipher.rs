/// External decryption collaborator for the encrypted envelope.
///
/// The original tooling this format comes from loads a native library at
/// runtime (`ctypes.cdll.LoadLibrary`) and calls into it for the proprietary
/// cipher. This crate has no business linking that library, so the contract
/// is expressed as a trait: callers that have the primitive register an
/// implementation, callers that don't get [`crate::Error::CipherUnavailable`]
/// instead of a missing-symbol crash.
pub trait CipherPrimitive {
    /// Decrypts `buf` in place.
    fn decrypt(&self, buf: &mut [u8]);
}
