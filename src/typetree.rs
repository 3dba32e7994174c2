use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::reader::{BinaryReader, ReadSeek};

/// One node of a type tree: a field name, its declared type name, its leaf
/// byte size (if it is a leaf), opaque flags, array-ness, and its children
/// in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub type_name: String,
    /// `None` for a non-leaf node (the stream's `0xFFFFFFFF` sentinel).
    pub size: Option<u32>,
    /// Preserved but not interpreted by the decoder.
    pub flags: u32,
    pub is_array: bool,
    pub children: Vec<FieldDef>,
}

impl FieldDef {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_record(&self) -> bool {
        !self.is_array && !self.children.is_empty()
    }
}

/// Mapping from type code (class ID) to its root [`FieldDef`].
pub type TypeTable = HashMap<u32, FieldDef>;

/// `class_code` sentinel indicating the 32-byte identity block variant
/// rather than the usual 16-byte one.
const WIDE_IDENTITY_CODE: u32 = 0xFFFFFFFF;

/// Defensive upper bound on a single type record's attribute count, mirroring
/// `original_source/assetbundle.py`'s `assert attr_cnt < 2048` guard ahead of
/// its own attribute-table read.
const MAX_ATTR_COUNT: u32 = 2048;

/// Reads the `are_defs` flag and the schema section (`type_count` type
/// records), returning the opaque flag and the populated [`TypeTable`].
pub fn read_schema<R: ReadSeek>(reader: &mut BinaryReader<R>) -> Result<(u8, TypeTable)> {
    let are_defs = reader.read_u8()?;
    let type_count = reader.read_u32_le()?;

    let mut table = TypeTable::with_capacity(type_count as usize);
    for _ in 0..type_count {
        let (class_code, root) = read_type_record(reader)?;
        table.insert(class_code, root);
    }
    Ok((are_defs, table))
}

fn read_type_record<R: ReadSeek>(reader: &mut BinaryReader<R>) -> Result<(u32, FieldDef)> {
    let class_code = reader.read_u32_le()?;

    let identity_len = if class_code == WIDE_IDENTITY_CODE { 32 } else { 16 };
    let _identity = reader.read_bytes(identity_len)?;

    let attr_count = reader.read_u32_le()?;
    let stab_len = reader.read_u32_le()?;

    if attr_count >= MAX_ATTR_COUNT {
        return Err(Error::SanityBound {
            what: "attr_count",
            value: attr_count as u64,
            bound: MAX_ATTR_COUNT as u64,
        });
    }

    let attrs = reader.read_bytes(attr_count as usize * 24)?;
    let stab = reader.read_bytes(stab_len as usize)?;

    let root = build_tree(&attrs, attr_count as usize, &stab)?;
    Ok((class_code, root))
}

struct RawAttr {
    level: u8,
    is_array: bool,
    type_off: u32,
    name_off: u32,
    size: u32,
    flags: u32,
}

fn parse_attrs(attrs: &[u8], count: usize) -> Result<Vec<RawAttr>> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let rec = &attrs[i * 24..i * 24 + 24];
        let level = rec[2];
        let is_array = rec[3] != 0;
        let type_off = u32::from_le_bytes(rec[4..8].try_into().unwrap());
        let name_off = u32::from_le_bytes(rec[8..12].try_into().unwrap());
        let size = u32::from_le_bytes(rec[12..16].try_into().unwrap());
        // rec[16..20] is the "index" field; read and discarded, not
        // surfaced on FieldDef.
        let flags = u32::from_le_bytes(rec[20..24].try_into().unwrap());

        if level >= 32 {
            return Err(Error::MalformedSchema {
                reason: format!("type-tree depth {level} exceeds the maximum of 32"),
            });
        }

        out.push(RawAttr {
            level,
            is_array,
            type_off,
            name_off,
            size,
            flags,
        });
    }
    Ok(out)
}

/// Reconstructs the tree from a flat, level-tagged attribute list by
/// keeping a stack of "current parent at depth k".
fn build_tree(attrs: &[u8], attr_count: usize, stab: &[u8]) -> Result<FieldDef> {
    let raw = parse_attrs(attrs, attr_count)?;

    let mut roots: Vec<FieldDef> = Vec::new();
    // stack[d] is a path of indices into `roots`/children identifying the
    // node most recently pushed at depth d.
    let mut stack: Vec<Vec<usize>> = Vec::new();

    for attr in &raw {
        let name = resolve_string(attr.name_off, stab)?;
        let type_name = resolve_string(attr.type_off, stab)?;
        let size = if attr.size == 0xFFFF_FFFF {
            None
        } else {
            Some(attr.size)
        };
        let node = FieldDef {
            name,
            type_name,
            size,
            flags: attr.flags,
            is_array: attr.is_array,
            children: Vec::new(),
        };

        let level = attr.level as usize;
        if level > stack.len() {
            return Err(Error::MalformedSchema {
                reason: format!(
                    "type-tree level jumped from depth {} to {level} with no intervening parent",
                    stack.len()
                ),
            });
        }
        stack.truncate(level);

        if level == 0 {
            roots.push(node);
            stack.push(vec![roots.len() - 1]);
        } else {
            let parent_path = stack[level - 1].clone();
            let parent = path_mut(&mut roots, &parent_path);
            parent.children.push(node);
            let mut child_path = parent_path;
            child_path.push(parent.children.len() - 1);
            stack.push(child_path);
        }
    }

    if roots.len() != 1 {
        return Err(Error::MalformedSchema {
            reason: format!(
                "expected exactly one level-0 node per type record, found {}",
                roots.len()
            ),
        });
    }
    Ok(roots.into_iter().next().unwrap())
}

/// Walks `path` into `roots`, where `path[0]` indexes `roots` and every
/// subsequent entry indexes into the previous node's `children`.
fn path_mut<'a>(roots: &'a mut [FieldDef], path: &[usize]) -> &'a mut FieldDef {
    let mut node = &mut roots[path[0]];
    for &idx in &path[1..] {
        node = &mut node.children[idx];
    }
    node
}

/// Resolves a name/type offset: high bit set means "look up the low 31 bits
/// in the base-string dictionary", otherwise it's a byte index into the
/// type record's local string table (`stab`), NUL-terminated.
fn resolve_string(offset: u32, stab: &[u8]) -> Result<String> {
    if offset & 0x8000_0000 != 0 {
        Ok(base_string(offset & 0x7FFF_FFFF).to_string())
    } else {
        let start = offset as usize;
        let slice = stab.get(start..).ok_or_else(|| Error::MalformedSchema {
            reason: format!("string table offset {offset} out of bounds"),
        })?;
        let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        String::from_utf8(slice[..end].to_vec()).map_err(|e| Error::InvalidUtf8 {
            offset: offset as u64,
            source: e,
        })
    }
}

/// Resolves a base-string-dictionary offset, falling back to `"TypeUnknown"`
/// for offsets this fixed table doesn't carry — mirroring
/// `original_source/assetbundle.py`'s `defaultdict(lambda: "TypeUnknown")`.
pub fn base_string(offset: u32) -> &'static str {
    BASE_STRINGS
        .iter()
        .find(|(off, _)| *off == offset)
        .map(|(_, name)| *name)
        .unwrap_or("TypeUnknown")
}

/// The base-string dictionary, reproduced verbatim from
/// `original_source/assetbundle.py`'s `baseStrings` table. Fixed data for
/// this format; offsets not listed here resolve to `"TypeUnknown"`.
pub const BASE_STRINGS: &[(u32, &str)] = &[
    (0, "AABB"),
    (5, "AnimationClip"),
    (19, "AnimationCurve"),
    (49, "Array"),
    (55, "Base"),
    (60, "BitField"),
    (76, "bool"),
    (81, "char"),
    (86, "ColorRGBA"),
    (106, "data"),
    (138, "FastPropertyName"),
    (155, "first"),
    (161, "float"),
    (167, "Font"),
    (172, "GameObject"),
    (183, "Generic Mono"),
    (208, "GUID"),
    (222, "int"),
    (241, "map"),
    (245, "Matrix4x4f"),
    (262, "NavMeshSettings"),
    (263, "MonoBehaviour"),
    (277, "MonoScript"),
    (299, "m_Curve"),
    (349, "m_Enabled"),
    (374, "m_GameObject"),
    (427, "m_Name"),
    (490, "m_Script"),
    (519, "m_Type"),
    (526, "m_Version"),
    (543, "pair"),
    (548, "PPtr<Component>"),
    (564, "PPtr<GameObject>"),
    (581, "PPtr<Material>"),
    (616, "PPtr<MonoScript>"),
    (633, "PPtr<Object>"),
    (688, "PPtr<Texture>"),
    (702, "PPtr<Texture2D>"),
    (718, "PPtr<Transform>"),
    (741, "Quaternionf"),
    (753, "Rectf"),
    (778, "second"),
    (795, "size"),
    (800, "SInt16"),
    (814, "int64"),
    (840, "string"),
    (847, "TextAsset"),
    (874, "Texture2D"),
    (884, "Transform"),
    (894, "TypelessData"),
    (907, "UInt16"),
    (928, "UInt8"),
    (934, "unsigned int"),
    (981, "vector"),
    (988, "Vector2f"),
    (997, "Vector3f"),
    (1006, "Vector4f"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_string_resolves_known_offsets() {
        assert_eq!(base_string(427), "m_Name");
        assert_eq!(base_string(0), "AABB");
        assert_eq!(base_string(1006), "Vector4f");
    }

    #[test]
    fn base_string_falls_back_for_unknown_offsets() {
        assert_eq!(base_string(999_999), "TypeUnknown");
    }

    #[test]
    fn resolve_string_high_bit_uses_base_dictionary() {
        let resolved = resolve_string(0x8000_01AB, &[]).unwrap();
        assert_eq!(resolved, "m_Name");
    }

    #[test]
    fn resolve_string_local_reads_from_stab() {
        let stab = b"Hello\0World\0";
        assert_eq!(resolve_string(0, stab).unwrap(), "Hello");
        assert_eq!(resolve_string(6, stab).unwrap(), "World");
    }

    fn attr_bytes(
        level: u8,
        is_array: bool,
        type_off: u32,
        name_off: u32,
        size: u32,
    ) -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[2] = level;
        buf[3] = is_array as u8;
        buf[4..8].copy_from_slice(&type_off.to_le_bytes());
        buf[8..12].copy_from_slice(&name_off.to_le_bytes());
        buf[12..16].copy_from_slice(&size.to_le_bytes());
        buf
    }

    #[test]
    fn build_tree_reconstructs_nesting_from_level_deltas() {
        // root (record) -> child "m_Name" (string, leaf-ish handled elsewhere)
        let stab = b"Root\0Child\0int\0";
        let mut attrs = Vec::new();
        attrs.extend_from_slice(&attr_bytes(0, false, 0x8000_0840, 0, 0xFFFF_FFFF));
        attrs.extend_from_slice(&attr_bytes(1, false, 11, 5, 4));

        let root = build_tree(&attrs, 2, stab).unwrap();
        assert_eq!(root.name, "Root");
        assert_eq!(root.type_name, "string");
        assert_eq!(root.size, None);
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "Child");
        assert_eq!(root.children[0].type_name, "int");
        assert_eq!(root.children[0].size, Some(4));
    }

    #[test]
    fn build_tree_rejects_more_than_one_root() {
        let stab = b"A\0B\0";
        let mut attrs = Vec::new();
        attrs.extend_from_slice(&attr_bytes(0, false, 0, 0, 0));
        attrs.extend_from_slice(&attr_bytes(0, false, 2, 2, 0));
        let err = build_tree(&attrs, 2, stab).unwrap_err();
        assert!(matches!(err, Error::MalformedSchema { .. }));
    }

    #[test]
    fn build_tree_rejects_level_jump_instead_of_panicking() {
        let stab = b"Root\0Child\0";
        let mut attrs = Vec::new();
        attrs.extend_from_slice(&attr_bytes(0, false, 0, 0, 0xFFFF_FFFF));
        // Jumps straight from depth 0 to depth 2 with no depth-1 parent.
        attrs.extend_from_slice(&attr_bytes(2, false, 5, 5, 4));
        let err = build_tree(&attrs, 2, stab).unwrap_err();
        assert!(matches!(err, Error::MalformedSchema { .. }));
    }

    #[test]
    fn read_type_record_rejects_absurd_attr_count() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes()); // class_code
        bytes.extend_from_slice(&[0u8; 16]); // identity
        bytes.extend_from_slice(&u32::MAX.to_le_bytes()); // attr_count
        bytes.extend_from_slice(&0u32.to_le_bytes()); // stab_len
        let mut reader = BinaryReader::new(std::io::Cursor::new(bytes));
        let err = read_type_record(&mut reader).unwrap_err();
        assert!(matches!(err, Error::SanityBound { what: "attr_count", .. }));
    }
}
