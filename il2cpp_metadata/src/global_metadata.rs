//! Tables read from `global-metadata.dat`.
//!
//! Strings are resolved by the parser, so records carry their names inline
//! instead of string table offsets.

use serde::{Deserialize, Serialize};

use crate::runtime_metadata::{Il2CppRGCTXDefinition, TypeIndex};
use crate::{MetadataIndex, MetadataTable};

pub type TypeDefinitionIndex = MetadataIndex<Il2CppTypeDefinition>;
pub type FieldIndex = MetadataIndex<Il2CppFieldDefinition>;
pub type MethodIndex = MetadataIndex<Il2CppMethodDefinition>;
pub type GenericContainerIndex = MetadataIndex<Il2CppGenericContainer>;
pub type GenericParameterIndex = MetadataIndex<Il2CppGenericParameter>;
pub type ImageIndex = MetadataIndex<Il2CppImageDefinition>;
pub type VTableIndex = MetadataIndex<EncodedMethodIndex>;
pub type RGCTXIndex = MetadataIndex<Il2CppRGCTXDefinition>;
pub type Token = u32;

/// A method reference packed with its usage kind, as stored in vtables and
/// metadata usage pairs.
pub type EncodedMethodIndex = u32;

/// Type attribute bit: the definition is a value type.
const TYPE_BITFIELD_VALUETYPE: u32 = 1 << 0;
/// Type attribute bit: the definition is an enum.
const TYPE_BITFIELD_ENUMTYPE: u32 = 1 << 1;

/// Defined at `il2cpp-metadata.h:208`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppTypeDefinition {
    pub name: String,
    pub namespace: String,
    pub byval_type_index: TypeIndex,

    pub declaring_type_index: TypeIndex,
    pub parent_index: TypeIndex,
    /// Underlying integer type for enums.
    pub element_type_index: TypeIndex,

    pub generic_container_index: GenericContainerIndex,

    pub flags: u32,

    pub field_start: FieldIndex,
    pub vtable_start: VTableIndex,
    /// Only used before `24.2`, later revisions key RGCTX data by token.
    pub rgctx_start_index: RGCTXIndex,
    pub rgctx_count: u32,

    pub field_count: u16,
    pub vtable_count: u16,

    pub bitfield: u32,
    pub token: Token,
}

impl Il2CppTypeDefinition {
    pub fn is_value_type(&self) -> bool {
        self.bitfield & TYPE_BITFIELD_VALUETYPE != 0
    }

    pub fn is_enum(&self) -> bool {
        self.bitfield & TYPE_BITFIELD_ENUMTYPE != 0
    }

    pub fn is_generic(&self) -> bool {
        self.generic_container_index.is_valid()
    }
}

/// Defined at `il2cpp-metadata.h:128`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppFieldDefinition {
    pub name: String,
    /// Field attributes live on the referenced type's `attrs`.
    pub type_index: TypeIndex,
    pub token: Token,
}

/// Defined at `il2cpp-metadata.h:181`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppMethodDefinition {
    pub name: String,
    pub declaring_type: TypeDefinitionIndex,
    pub generic_container_index: GenericContainerIndex,
    pub token: Token,
    pub flags: u16,
    /// The declared virtual slot, `0xFFFF` for non-virtual methods.
    pub slot: u16,
    /// Only used before `24.2`.
    pub rgctx_start_index: RGCTXIndex,
    pub rgctx_count: u32,
}

/// Defined at `il2cpp-metadata.h:266`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppGenericParameter {
    /// Type or method this parameter was defined in.
    pub owner_index: GenericContainerIndex,
    pub name: String,
    /// Ordinal within the owner's argument list.
    pub num: u16,
    pub flags: u16,
}

/// Defined at `il2cpp-metadata.h:254`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppGenericContainer {
    /// index of the generic type definition or the generic method definition corresponding to this container \
    /// either index into Il2CppClass metadata array or Il2CppMethodDefinition array
    pub owner_index: u32,
    pub type_argc: u32,
    /// If true, we're a generic method, otherwise a generic type definition.
    pub is_method: bool,
    /// Our type parameters.
    pub generic_parameter_start: GenericParameterIndex,
}

/// Defined at `il2cpp-metadata.h:287`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppImageDefinition {
    /// Image names have `.dll` at the end
    pub name: String,

    pub type_start: TypeDefinitionIndex,
    pub type_count: u32,

    pub custom_attribute_start: u32,
    pub custom_attribute_count: u32,

    pub token: Token,
}

/// Defined at `il2cpp-metadata.h:312`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Il2CppMetadataUsagePair {
    /// Index into [`Il2CppMetadataRegistration::metadata_usages`](crate::runtime_metadata::Il2CppMetadataRegistration::metadata_usages)
    pub destination_index: u32,
    pub encoded_source_index: EncodedMethodIndex,
}

/// Where the metadata tables sat in memory when they were dumped from a
/// running process. Revisions from 27 on reference definitions by address,
/// which can only be turned back into indices with this information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetadataLayout {
    /// Load address of `global-metadata.dat`.
    pub address: u64,
    pub type_definitions_offset: u64,
    pub type_definition_size: u64,
    pub generic_parameters_offset: u64,
    pub generic_parameter_size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalMetadata {
    pub type_definitions: MetadataTable<Il2CppTypeDefinition>,
    pub fields: MetadataTable<Il2CppFieldDefinition>,
    pub methods: MetadataTable<Il2CppMethodDefinition>,
    pub generic_parameters: MetadataTable<Il2CppGenericParameter>,
    pub generic_containers: MetadataTable<Il2CppGenericContainer>,
    pub images: MetadataTable<Il2CppImageDefinition>,
    pub vtable_methods: MetadataTable<EncodedMethodIndex>,
    /// Only present before `24.2`.
    pub rgctx_entries: MetadataTable<Il2CppRGCTXDefinition>,
    pub metadata_usage_pairs: Vec<Il2CppMetadataUsagePair>,
    pub layout: Option<MetadataLayout>,
}
