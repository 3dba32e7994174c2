use std::io;
use std::path::Path;

/// External texture-encoding collaborator.
///
/// Mirrors the original tooling's `libahff` native call: turning a decoded
/// `Texture2D` object's raw pixel buffer into an on-disk image is delegated
/// to whatever encoder the caller has available, rather than bundled here.
pub trait TextureEncoder {
    /// Encodes `data` (in the engine's native texture format `format`, at
    /// `width` x `height`) and writes the result to `out_path`.
    fn encode(&self, format: i32, width: i32, height: i32, data: &[u8], out_path: &Path) -> io::Result<()>;
}
