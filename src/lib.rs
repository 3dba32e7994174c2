//! Reader for a proprietary, self-describing game-engine asset container
//! format: unwraps an outer envelope (optional encryption, `UnityFS`
//! archive, or bare `UnityRaw` stream), parses each asset's embedded
//! type-tree schema, and decodes its objects lazily against that schema.

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod object;
pub mod reader;
pub mod texture;
pub mod typetree;
pub mod value;

pub use cipher::CipherPrimitive;
pub use envelope::{EnvelopeProbe, Pipeline, ProbeOutcome};
pub use error::{Error, Result};
pub use object::{Asset, ObjectEntry, Promise};
pub use reader::{BinaryReader, ReadSeek};
pub use texture::TextureEncoder;
pub use typetree::{FieldDef, TypeTable};
pub use value::Value;

use std::fs;
use std::path::Path;

/// Opens a file at `path` and runs it through the default envelope
/// pipeline, returning every asset found inside. `cipher` is consulted
/// only if the stream turns out to be encrypted.
pub fn open_path(path: impl AsRef<Path>, cipher: Option<&dyn CipherPrimitive>) -> Result<Vec<Asset>> {
    let bytes = fs::read(path)?;
    open_bytes(bytes, cipher)
}

/// Runs `bytes` through the default envelope pipeline.
pub fn open_bytes(bytes: Vec<u8>, cipher: Option<&dyn CipherPrimitive>) -> Result<Vec<Asset>> {
    Pipeline::default().run(bytes, cipher)
}
