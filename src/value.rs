use serde::Serialize;

/// A decoded object value: a tagged sum over everything the type-tree
/// decoder can produce. Kept as an explicit enum rather than collapsed into
/// an untyped `serde_json::Value`-style map so callers can match on the
/// concrete shape the schema described.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bool(bool),
    F32(f32),
    F64(f64),
    /// A fixed-size raw-byte blob: either a leaf type outside the primitive
    /// interpretation table, or an array of `UInt8`/`char` collapsed to
    /// bytes. `string`-typed fields also decode to this variant: this
    /// format never interprets a string payload as UTF-8 itself, so there
    /// is no separate `String` variant to misuse.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// Ordered field-name -> value mapping; a `Vec` of pairs rather than a
    /// hash map so declaration order survives.
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Looks up a field by name in a `Map` value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_map()?.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Renders this value as pretty-printed JSON, for dumping a decoded
    /// object tree to a log or a file.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
