use il2cpp_metadata::global_metadata::{FieldIndex, TypeDefinitionIndex};
use il2cpp_metadata::runtime_metadata::FieldOffsets;
use il2cpp_metadata::{Metadata, MetadataVersion};

/// Supplies the byte offset of a field within its owner.
pub trait FieldOffsetSource {
    /// `-1` when the offset is unknown.
    fn offset(
        &self,
        definition: TypeDefinitionIndex,
        ordinal: u32,
        field: FieldIndex,
        is_value_type: bool,
        is_static: bool,
    ) -> i32;
}

/// Offsets read from the binary's field offset tables.
///
/// Value type instance offsets are stored as if the value were boxed; the
/// object header is taken off so they are relative to the raw value.
pub struct FieldOffsetTable<'md> {
    offsets: Option<&'md FieldOffsets>,
    header_size: i32,
}

impl<'md> FieldOffsetTable<'md> {
    pub fn new(metadata: &'md Metadata) -> Self {
        let offsets = metadata
            .runtime_metadata
            .metadata_registration
            .field_offsets
            .as_ref();
        let per_type = metadata.version > MetadataVersion::new(21, 0);
        match offsets {
            Some(FieldOffsets::ByField(_)) if per_type => log::warn!(
                "metadata {} should carry per-type field offsets but has a flat table",
                metadata.version
            ),
            Some(FieldOffsets::ByType(_)) if !per_type => log::warn!(
                "metadata {} should carry a flat field offset table but has per-type tables",
                metadata.version
            ),
            None => log::debug!("no field offsets, every offset will be -1"),
            _ => {}
        }

        FieldOffsetTable {
            offsets,
            header_size: if metadata.runtime_metadata.is_32bit { 8 } else { 16 },
        }
    }
}

impl FieldOffsetSource for FieldOffsetTable<'_> {
    fn offset(
        &self,
        definition: TypeDefinitionIndex,
        ordinal: u32,
        field: FieldIndex,
        is_value_type: bool,
        is_static: bool,
    ) -> i32 {
        let offset = match self.offsets {
            Some(FieldOffsets::ByField(offsets)) => offsets.get(field.index()).copied(),
            Some(FieldOffsets::ByType(offsets)) => offsets
                .get(definition.index())
                .and_then(|offsets| offsets.get(ordinal as usize))
                .copied(),
            None => None,
        };
        match offset {
            Some(offset) if offset > 0 && is_value_type && !is_static => offset - self.header_size,
            Some(offset) => offset,
            None => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TableBuilder;

    #[test]
    fn per_type_offsets() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        tables.runtime_metadata.metadata_registration.field_offsets =
            Some(FieldOffsets::ByType(vec![vec![16, 24], vec![]]));
        let metadata = tables.build();

        let offsets = FieldOffsetTable::new(&metadata);
        let def = TypeDefinitionIndex::new(0);
        assert_eq!(offsets.offset(def, 1, FieldIndex::new(9), false, false), 24);
        assert_eq!(offsets.offset(def, 0, FieldIndex::new(9), true, false), 0);
        assert_eq!(offsets.offset(def, 1, FieldIndex::new(9), true, true), 24);
        assert_eq!(offsets.offset(TypeDefinitionIndex::new(1), 0, FieldIndex::new(0), false, false), -1);
        assert_eq!(offsets.offset(TypeDefinitionIndex::new(5), 0, FieldIndex::new(0), false, false), -1);
    }

    #[test]
    fn flat_offsets_on_32bit() {
        let mut tables = TableBuilder::new(MetadataVersion::new(21, 0));
        tables.runtime_metadata.is_32bit = true;
        tables.runtime_metadata.metadata_registration.field_offsets =
            Some(FieldOffsets::ByField(vec![8, 12, 0]));
        let metadata = tables.build();

        let offsets = FieldOffsetTable::new(&metadata);
        let def = TypeDefinitionIndex::new(3);
        assert_eq!(offsets.offset(def, 0, FieldIndex::new(1), true, false), 4);
        assert_eq!(offsets.offset(def, 0, FieldIndex::new(2), true, false), 0);
        assert_eq!(offsets.offset(def, 0, FieldIndex::new(3), true, false), -1);
    }

    #[test]
    fn missing_table() {
        let metadata = TableBuilder::new(MetadataVersion::new(24, 0)).build();
        let offsets = FieldOffsetTable::new(&metadata);
        assert_eq!(
            offsets.offset(TypeDefinitionIndex::new(0), 0, FieldIndex::new(0), false, false),
            -1
        );
    }
}
