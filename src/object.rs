use std::io::Cursor;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::reader::BinaryReader;
use crate::typetree::{FieldDef, TypeTable};
use crate::value::Value;

/// Defensive upper bound on the object table: no known asset carries this
/// many top-level objects.
const MAX_OBJECT_COUNT: u32 = 2048;

/// Defensive upper bound on a single array's declared length.
const MAX_ARRAY_LEN: u32 = 10_000_000;

/// One row of the object table: where an object's bytes live and which
/// type code describes its shape. `t2` and `unk` are carried through
/// unchanged; nothing in this crate interprets them.
#[derive(Debug, Clone, Copy)]
pub struct ObjectEntry {
    pub path_id: u64,
    pub offset: u32,
    pub size: u32,
    pub type_code: u32,
    pub t2: u16,
    pub unk: u8,
}

/// An unfulfilled object: everything needed to decode it, without having
/// done so yet. Fulfilling the same promise twice yields equal values
/// (decoding is pure over the backing buffer).
pub struct Promise<'a> {
    pub path_id: u64,
    pub type_code: u32,
    pub type_name: String,
    entry: ObjectEntry,
    asset: &'a Asset,
}

impl<'a> Promise<'a> {
    /// Renders `path_id` as a hexadecimal string, the form this format
    /// displays object identities in (mirrors `hex(pathId)` in
    /// `original_source/assetbundle.py`'s `decode_data`).
    pub fn path_id_hex(&self) -> String {
        format!("{:#x}", self.path_id)
    }

    /// Decodes this object's bytes against its type tree.
    pub fn fulfill(&self) -> Result<Value> {
        let root = self
            .asset
            .type_table
            .get(&self.entry.type_code)
            .ok_or(Error::UnknownTypeCode {
                type_code: self.entry.type_code,
            })?;

        let start = self.asset.data_offset as usize + self.entry.offset as usize;
        let end = start + self.entry.size as usize;
        let slice = self
            .asset
            .buffer
            .get(start..end)
            .ok_or(Error::UnexpectedEof {
                offset: start as u64,
                wanted: self.entry.size as usize,
            })?;

        let mut reader = BinaryReader::new(Cursor::new(slice.to_vec()));
        decode_node(&mut reader, root)
    }
}

/// A fully parsed asset: its header fields, its type-tree schema, the
/// object table as unfulfilled [`Promise`]s, and the owned byte buffer
/// every promise borrows from. Owning the buffer (rather than borrowing
/// the original source) is what lets promises outlive the envelope that
/// produced them.
pub struct Asset {
    pub table_size: u32,
    pub data_end: u32,
    pub file_generation: u32,
    pub data_offset: u32,
    pub version: String,
    pub platform: u32,
    pub type_table: TypeTable,
    pub are_defs: u8,
    entries: Vec<ObjectEntry>,
    buffer: Vec<u8>,
}

impl Asset {
    /// Parses a full asset stream: the fixed header, the type-tree schema,
    /// and the object table. `buffer` becomes the owned backing store every
    /// [`Promise`] decodes against, so callers must hand in a stream that
    /// already starts at this asset's own origin (a fresh slurp per asset,
    /// not a shared cursor into a larger container).
    pub fn read(reader: &mut BinaryReader<Cursor<Vec<u8>>>, buffer: Vec<u8>) -> Result<Self> {
        let table_size = reader.read_u32_be()?;
        let data_end = reader.read_u32_be()?;
        let file_generation = reader.read_u32_be()?;
        let data_offset = reader.read_u32_be()?;
        let _reserved = reader.read_bytes(4)?;
        let version = reader.read_cstring()?;
        let platform = reader.read_u32_le()?;

        let (are_defs, type_table) = crate::typetree::read_schema(reader)?;

        Self::parse(
            table_size,
            data_end,
            file_generation,
            data_offset,
            version,
            platform,
            are_defs,
            type_table,
            reader,
            buffer,
        )
    }

    /// Parses the object table given an already-resolved header and
    /// type-tree schema. Split out from [`Asset::read`] so tests can feed
    /// a schema directly without re-deriving header bytes.
    pub fn parse(
        table_size: u32,
        data_end: u32,
        file_generation: u32,
        data_offset: u32,
        version: String,
        platform: u32,
        are_defs: u8,
        type_table: TypeTable,
        reader: &mut BinaryReader<Cursor<Vec<u8>>>,
        buffer: Vec<u8>,
    ) -> Result<Self> {
        let object_count = reader.read_u32_le()?;
        if object_count >= MAX_OBJECT_COUNT {
            return Err(Error::SanityBound {
                what: "object_count",
                value: object_count as u64,
                bound: MAX_OBJECT_COUNT as u64,
            });
        }

        let mut entries = Vec::with_capacity(object_count as usize);
        for _ in 0..object_count {
            reader.align(4)?;
            let path_id = reader.read_u64_le()?;
            let offset = reader.read_u32_le()?;
            let size = reader.read_u32_le()?;
            let type_code = reader.read_u32_le()?;
            let t2 = reader.read_u16_le()?;
            let _reserved = reader.read_bytes(2)?;
            let unk = reader.read_u8()?;
            // The type code must resolve against the schema right away: a
            // Promise's type_name comes from its root FieldDef, so an
            // unknown code can't wait until fulfill time to surface.
            if !type_table.contains_key(&type_code) {
                return Err(Error::UnknownTypeCode { type_code });
            }
            entries.push(ObjectEntry {
                path_id,
                offset,
                size,
                type_code,
                t2,
                unk,
            });
        }
        debug!(count = entries.len(), "parsed object table");

        Ok(Asset {
            table_size,
            data_end,
            file_generation,
            data_offset,
            version,
            platform,
            type_table,
            are_defs,
            entries,
            buffer,
        })
    }

    /// Yields a [`Promise`] per object-table entry, in table order. Every
    /// entry's type code was already checked against the schema in
    /// [`Asset::parse`], so the lookup here cannot fail.
    pub fn promises(&self) -> impl Iterator<Item = Promise<'_>> + '_ {
        self.entries.iter().map(move |entry| Promise {
            path_id: entry.path_id,
            type_code: entry.type_code,
            type_name: self.type_table[&entry.type_code].type_name.clone(),
            entry: *entry,
            asset: self,
        })
    }

    pub fn object_count(&self) -> usize {
        self.entries.len()
    }
}

/// Decodes a value from `reader` per `def`'s shape: array, record, or leaf.
fn decode_node(reader: &mut BinaryReader<Cursor<Vec<u8>>>, def: &FieldDef) -> Result<Value> {
    if def.is_array {
        decode_array(reader, def)
    } else if !def.children.is_empty() {
        decode_record(reader, def)
    } else {
        decode_leaf(reader, def)
    }
}

fn decode_array(reader: &mut BinaryReader<Cursor<Vec<u8>>>, def: &FieldDef) -> Result<Value> {
    // Array nodes carry their own length-then-element shape: a size child
    // (always present, always an int) followed by the element FieldDef.
    // The size child is decoded through the normal node path (not read
    // directly) so it gets the same pre-leaf alignment as any other leaf.
    let size_child = def
        .children
        .first()
        .ok_or_else(|| Error::MalformedSchema {
            reason: format!("array field {:?} has no size child", def.name),
        })?;
    let elem_def = def.children.get(1).ok_or_else(|| Error::MalformedSchema {
        reason: format!("array field {:?} has no element child", def.name),
    })?;

    let len = match decode_node(reader, size_child)? {
        Value::I32(v) => v as u32,
        Value::U32(v) => v,
        Value::I64(v) => v as u32,
        Value::U64(v) => v as u32,
        other => {
            return Err(Error::MalformedSchema {
                reason: format!("array size child decoded to non-integer value {other:?}"),
            })
        }
    };
    if len >= MAX_ARRAY_LEN {
        return Err(Error::SanityBound {
            what: "array length",
            value: len as u64,
            bound: MAX_ARRAY_LEN as u64,
        });
    }

    // Alignment happens only immediately before a leaf read; nothing here
    // re-aligns after the array body.
    let is_byte_like = matches!(elem_def.type_name.as_str(), "UInt8" | "char") && elem_def.is_leaf();
    if is_byte_like {
        let bytes = reader.read_bytes(len as usize)?;
        return Ok(Value::Bytes(bytes));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(decode_node(reader, elem_def)?);
    }
    Ok(Value::Array(items))
}

fn decode_record(reader: &mut BinaryReader<Cursor<Vec<u8>>>, def: &FieldDef) -> Result<Value> {
    // A record whose sole child is the conventional array-of-char "string"
    // shape (named "Array", per the schema's own naming convention)
    // collapses to that child's value directly: a raw byte blob, not a
    // decoded `Value::String` — this format never interprets string
    // payloads as UTF-8 itself, leaving that to the caller.
    if def.type_name == "string" && def.children.len() == 1 && def.children[0].name == "Array" {
        return decode_node(reader, &def.children[0]);
    }

    let mut fields = Vec::with_capacity(def.children.len());
    for child in &def.children {
        let value = decode_node(reader, child)?;
        fields.push((child.name.clone(), value));
    }
    Ok(Value::Map(fields))
}

fn decode_leaf(reader: &mut BinaryReader<Cursor<Vec<u8>>>, def: &FieldDef) -> Result<Value> {
    let size = def.size.unwrap_or(0);
    reader.align(size.min(4) as u64)?;

    trace!(type_name = %def.type_name, size, "decoding leaf");

    let value = match def.type_name.as_str() {
        "bool" => Value::Bool(reader.read_u8()? != 0),
        "char" => Value::I8(reader.read_i8()?),
        "int" => Value::I32(reader.read_i32_le()?),
        "int64" => Value::I64(reader.read_i64_le()?),
        "float" => Value::F32(reader.read_f32_le()?),
        _ => Value::Bytes(reader.read_bytes(size as usize)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::collections::HashMap;

    fn leaf(name: &str, type_name: &str, size: u32) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            type_name: type_name.to_string(),
            size: Some(size),
            flags: 0,
            is_array: false,
            children: Vec::new(),
        }
    }

    #[test]
    fn decode_record_reads_fields_in_order() {
        let root = FieldDef {
            name: "Base".to_string(),
            type_name: "MonoBehaviour".to_string(),
            size: None,
            flags: 0,
            is_array: false,
            children: vec![leaf("m_Enabled", "bool", 1), leaf("m_Type", "int", 4)],
        };

        let mut bytes = Vec::new();
        bytes.push(1u8);
        bytes.extend_from_slice(&[0u8; 3]); // align to 4
        bytes.write_i32::<LittleEndian>(42).unwrap();

        let mut reader = BinaryReader::new(Cursor::new(bytes));
        let value = decode_node(&mut reader, &root).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map[0].0, "m_Enabled");
        assert_eq!(map[0].1, Value::Bool(true));
        assert_eq!(map[1].0, "m_Type");
        assert_eq!(map[1].1, Value::I32(42));
    }

    #[test]
    fn decode_array_of_bytes_collapses_to_bytes_value() {
        let elem = leaf("data", "UInt8", 1);
        let size_field = leaf("size", "int", 4);
        let root = FieldDef {
            name: "m_Data".to_string(),
            type_name: "TypelessData".to_string(),
            size: None,
            flags: 0,
            is_array: true,
            children: vec![size_field, elem],
        };

        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(3).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(&[0u8]); // align to 4

        let mut reader = BinaryReader::new(Cursor::new(bytes));
        let value = decode_node(&mut reader, &root).unwrap();
        assert_eq!(value.as_bytes().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn decode_array_rejects_absurd_length() {
        let elem = leaf("x", "int", 4);
        let size_field = leaf("size", "int", 4);
        let root = FieldDef {
            name: "arr".to_string(),
            type_name: "vector".to_string(),
            size: None,
            flags: 0,
            is_array: true,
            children: vec![size_field, elem],
        };
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        let mut reader = BinaryReader::new(Cursor::new(bytes));
        let err = decode_node(&mut reader, &root).unwrap_err();
        assert!(matches!(err, Error::SanityBound { .. }));
    }

    #[test]
    fn asset_parse_rejects_absurd_object_count() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        let mut reader = BinaryReader::new(Cursor::new(bytes));
        let err = Asset::parse(
            0,
            0,
            0,
            0,
            "2020.3.0f1".to_string(),
            0,
            0,
            HashMap::new(),
            &mut reader,
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SanityBound { .. }));
    }

    #[test]
    fn unknown_type_code_fails_while_parsing_the_object_table() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(1).unwrap(); // object_count
        bytes.write_u64::<LittleEndian>(1).unwrap(); // path_id
        bytes.write_u32::<LittleEndian>(0).unwrap(); // offset
        bytes.write_u32::<LittleEndian>(0).unwrap(); // size
        bytes.write_u32::<LittleEndian>(0xDEAD).unwrap(); // type_code
        bytes.write_u16::<LittleEndian>(0).unwrap(); // t2
        bytes.extend_from_slice(&[0u8; 2]); // reserved
        bytes.push(0); // unk

        let mut reader = BinaryReader::new(Cursor::new(bytes));
        let err = Asset::parse(
            0,
            0,
            0,
            0,
            "2020.3.0f1".to_string(),
            0,
            0,
            HashMap::new(),
            &mut reader,
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownTypeCode { type_code: 0xDEAD }));
    }
}
