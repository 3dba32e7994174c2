use thiserror::Error;

/// Errors produced while unwrapping envelopes, parsing the type-tree schema,
/// or decoding an object against its type tree.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected end of stream at offset {offset} (wanted {wanted} more byte(s))")]
    UnexpectedEof { offset: u64, wanted: usize },

    #[error("invalid utf-8 in string field at offset {offset}: {source}")]
    InvalidUtf8 {
        offset: u64,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("no envelope probe recognized the stream (tried {tried} probe(s))")]
    UnknownEnvelope { tried: usize },

    #[error("unsupported compression method {code:#x} in {context}")]
    UnsupportedCompression { code: u32, context: &'static str },

    #[error("encrypted envelope detected but no cipher primitive was registered")]
    CipherUnavailable,

    #[error("malformed schema: {reason}")]
    MalformedSchema { reason: String },

    #[error("object references unknown type code {type_code:#x}")]
    UnknownTypeCode { type_code: u32 },

    #[error("{what} = {value} exceeds the defensive bound of {bound}")]
    SanityBound {
        what: &'static str,
        value: u64,
        bound: u64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
