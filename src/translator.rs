//! Turns revision specific encodings into table indices.
//!
//! Everything that changes between metadata revisions is decided here, once,
//! from the [`Revision`] picked at construction. The rest of the crate only
//! deals in typed indices.

use std::collections::{BTreeMap, HashMap};

use il2cpp_metadata::global_metadata::{
    EncodedMethodIndex, FieldIndex, GenericContainerIndex, GenericParameterIndex,
    Il2CppFieldDefinition, Il2CppGenericContainer, Il2CppGenericParameter,
    Il2CppImageDefinition, Il2CppMethodDefinition, Il2CppTypeDefinition, MetadataLayout,
    MethodIndex, Token, TypeDefinitionIndex, VTableIndex,
};
use il2cpp_metadata::runtime_metadata::{
    ArrayTypeIndex, GenericClassIndex, GenericInstIndex, Il2CppArrayType, Il2CppCodeGenModule,
    Il2CppGenericClass, Il2CppGenericContext, Il2CppGenericInst, Il2CppMethodSpec, Il2CppRGCTXDefinition,
    Il2CppRange, Il2CppType, Il2CppTypeEnum, MethodSpecIndex, TypeData, TypeIndex,
};
use il2cpp_metadata::{Metadata, MetadataIndex, MetadataVersion};

use crate::error::{out_of_range, Result, StructIndexError};

/// `kIl2CppMetadataUsageMethodDef`
const USAGE_METHOD_DEF: u32 = 3;
/// `kIl2CppMetadataUsageMethodRef`
const USAGE_METHOD_REF: u32 = 6;

/// The encoding family a metadata version belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    /// Direct indices everywhere, RGCTX entries in one global table.
    Legacy,
    /// From `24.2`: RGCTX entries move into per-image code gen modules,
    /// looked up by token.
    TokenRgctx,
    /// From `27`: types reference definitions and generic parameters by
    /// address, and encoded method indices carry a flag bit.
    Handles,
}

impl Revision {
    pub fn of(version: MetadataVersion) -> Self {
        if version >= MetadataVersion::new(27, 0) {
            Revision::Handles
        } else if version >= MetadataVersion::new(24, 2) {
            Revision::TokenRgctx
        } else {
            Revision::Legacy
        }
    }
}

/// A generic context with the "no list" sentinels already decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GenericContext {
    pub class_inst: Option<GenericInstIndex>,
    pub method_inst: Option<GenericInstIndex>,
}

impl GenericContext {
    pub fn from_raw(context: &Il2CppGenericContext) -> Self {
        GenericContext {
            class_inst: context.class_inst_index.valid(),
            method_inst: context.method_inst_index.valid(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.class_inst.is_none() && self.method_inst.is_none()
    }
}

/// The method an encoded method index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodReference {
    Definition(MethodIndex),
    Specialization(MethodSpecIndex),
}

/// A call site recovered from the metadata usage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSite {
    /// Relative to the image base.
    pub address: u64,
    pub target: MethodReference,
}

struct TokenRgctxModule<'md> {
    module: &'md Il2CppCodeGenModule,
    ranges: HashMap<Token, Il2CppRange>,
}

pub struct Translator<'md> {
    metadata: &'md Metadata,
    revision: Revision,
    /// Type usages for definitions whose `byval_type_index` is not set.
    definition_types: HashMap<TypeDefinitionIndex, TypeIndex>,
    rgctx_modules: HashMap<&'md str, TokenRgctxModule<'md>>,
}

macro_rules! table_lookups {
    ($($name:ident($idx:ty) -> $ty:ty = $($path:ident).+, $label:literal;)*) => {
        $(
            pub fn $name(&self, index: $idx) -> Result<&'md $ty> {
                self.metadata
                    .$($path).+
                    .get(index)
                    .ok_or_else(|| out_of_range($label, index))
            }
        )*
    };
}

impl<'md> Translator<'md> {
    pub fn new(metadata: &'md Metadata) -> Result<Self> {
        let revision = Revision::of(metadata.version);
        let rgctx_modules = metadata
            .runtime_metadata
            .code_registration
            .code_gen_modules
            .iter()
            .map(|module| {
                let ranges = module
                    .rgctx_ranges
                    .iter()
                    .map(|pair| (pair.token, pair.range))
                    .collect();
                (module.name.as_str(), TokenRgctxModule { module, ranges })
            })
            .collect();

        let mut translator = Translator {
            metadata,
            revision,
            definition_types: HashMap::new(),
            rgctx_modules,
        };
        translator.index_definition_types()?;
        Ok(translator)
    }

    /// Builds the definition to type reverse lookup. The first by-value
    /// class or value type usage of a definition wins.
    fn index_definition_types(&mut self) -> Result<()> {
        let types = &self.metadata.runtime_metadata.metadata_registration.types;
        let mut definition_types = HashMap::new();
        for (type_index, ty) in types.enumerate() {
            if ty.byref || !matches!(ty.ty, Il2CppTypeEnum::Class | Il2CppTypeEnum::Valuetype) {
                continue;
            }
            let definition = self.definition_of(type_index)?;
            definition_types.entry(definition).or_insert(type_index);
        }
        self.definition_types = definition_types;
        Ok(())
    }

    pub fn metadata(&self) -> &'md Metadata {
        self.metadata
    }

    pub fn version(&self) -> MetadataVersion {
        self.metadata.version
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    table_lookups! {
        type_definition(TypeDefinitionIndex) -> Il2CppTypeDefinition = global_metadata.type_definitions, "type definitions";
        field(FieldIndex) -> Il2CppFieldDefinition = global_metadata.fields, "fields";
        method(MethodIndex) -> Il2CppMethodDefinition = global_metadata.methods, "methods";
        generic_container(GenericContainerIndex) -> Il2CppGenericContainer = global_metadata.generic_containers, "generic containers";
        generic_parameter(GenericParameterIndex) -> Il2CppGenericParameter = global_metadata.generic_parameters, "generic parameters";
        vtable_entry(VTableIndex) -> EncodedMethodIndex = global_metadata.vtable_methods, "vtable methods";
        il2cpp_type(TypeIndex) -> Il2CppType = runtime_metadata.metadata_registration.types, "types";
        generic_class(GenericClassIndex) -> Il2CppGenericClass = runtime_metadata.metadata_registration.generic_classes, "generic classes";
        generic_inst(GenericInstIndex) -> Il2CppGenericInst = runtime_metadata.metadata_registration.generic_insts, "generic instantiations";
        array_type(ArrayTypeIndex) -> Il2CppArrayType = runtime_metadata.metadata_registration.array_types, "array types";
        method_spec(MethodSpecIndex) -> Il2CppMethodSpec = runtime_metadata.metadata_registration.method_specs, "method specs";
    }

    /// The definition behind a class or value type usage.
    pub fn definition_of(&self, type_index: TypeIndex) -> Result<TypeDefinitionIndex> {
        let ty = self.il2cpp_type(type_index)?;
        match ty.data {
            TypeData::TypeDefinitionIndex(idx) => {
                self.type_definition(idx)?;
                Ok(idx)
            }
            TypeData::TypeDefinitionHandle(handle) => {
                let section = |layout: &MetadataLayout| {
                    (layout.type_definitions_offset, layout.type_definition_size)
                };
                let len = self.metadata.global_metadata.type_definitions.len();
                let idx = self.from_handle(handle, "type definitions", section, len)?;
                Ok(TypeDefinitionIndex::new(idx))
            }
            _ => Err(StructIndexError::MismatchedTypeData {
                type_index: type_index.raw(),
                kind: ty.ty,
            }),
        }
    }

    /// The declaration behind a `VAR` or `MVAR` usage.
    pub fn generic_parameter_of(&self, type_index: TypeIndex) -> Result<GenericParameterIndex> {
        let ty = self.il2cpp_type(type_index)?;
        match ty.data {
            TypeData::GenericParameterIndex(idx) => {
                self.generic_parameter(idx)?;
                Ok(idx)
            }
            TypeData::GenericParameterHandle(handle) => {
                let section = |layout: &MetadataLayout| {
                    (layout.generic_parameters_offset, layout.generic_parameter_size)
                };
                let len = self.metadata.global_metadata.generic_parameters.len();
                let idx = self.from_handle(handle, "generic parameters", section, len)?;
                Ok(GenericParameterIndex::new(idx))
            }
            _ => Err(StructIndexError::MismatchedTypeData {
                type_index: type_index.raw(),
                kind: ty.ty,
            }),
        }
    }

    /// `(handle - metadata address - section offset) / record size`, only
    /// meaningful for revisions that encode references as addresses.
    fn from_handle<F>(&self, handle: u64, table: &'static str, section: F, len: usize) -> Result<u32>
    where
        F: FnOnce(&MetadataLayout) -> (u64, u64),
    {
        let bad_handle = || StructIndexError::BadHandle { table, handle };
        if self.revision != Revision::Handles {
            return Err(bad_handle());
        }
        let layout = self.metadata.global_metadata.layout.as_ref().ok_or_else(bad_handle)?;
        let (section_offset, stride) = section(layout);
        let offset = handle
            .checked_sub(layout.address)
            .and_then(|offset| offset.checked_sub(section_offset))
            .ok_or_else(bad_handle)?;
        if stride == 0 || offset % stride != 0 {
            return Err(bad_handle());
        }
        let idx = u32::try_from(offset / stride).map_err(|_| bad_handle())?;
        if idx as usize >= len {
            return Err(bad_handle());
        }
        Ok(idx)
    }

    /// The open definition a generic class instantiates, `None` when the
    /// record leaves it unset.
    pub fn generic_class_definition(
        &self,
        generic_class: GenericClassIndex,
    ) -> Result<Option<TypeDefinitionIndex>> {
        let gc = self.generic_class(generic_class)?;
        match self.revision {
            Revision::Handles => match gc.type_index.valid() {
                Some(type_index) => self.definition_of(type_index).map(Some),
                None => Ok(None),
            },
            Revision::Legacy | Revision::TokenRgctx => match gc.type_definition_index.valid() {
                Some(definition) => {
                    self.type_definition(definition)?;
                    Ok(Some(definition))
                }
                None => Ok(None),
            },
        }
    }

    /// A type usage standing for `definition` itself. Prefers the
    /// definition's own cross reference and falls back to a reverse lookup.
    pub fn type_for_definition(&self, definition: TypeDefinitionIndex) -> Result<Option<TypeIndex>> {
        let td = self.type_definition(definition)?;
        if let Some(byval) = td.byval_type_index.valid() {
            self.il2cpp_type(byval)?;
            return Ok(Some(byval));
        }
        Ok(self.definition_types.get(&definition).copied())
    }

    pub fn method_spec_context(&self, spec: MethodSpecIndex) -> Result<GenericContext> {
        let spec = self.method_spec(spec)?;
        let class_inst = spec.class_inst_index.valid();
        let method_inst = spec.method_inst_index.valid();
        for inst in class_inst.iter().chain(method_inst.iter()) {
            self.generic_inst(*inst)?;
        }
        Ok(GenericContext {
            class_inst,
            method_inst,
        })
    }

    pub fn rgctx_for_type(
        &self,
        image: &Il2CppImageDefinition,
        definition: TypeDefinitionIndex,
    ) -> Result<&'md [Il2CppRGCTXDefinition]> {
        let td = self.type_definition(definition)?;
        self.rgctx_entries(image, td.token, td.rgctx_start_index, td.rgctx_count)
    }

    pub fn rgctx_for_method(
        &self,
        image: &Il2CppImageDefinition,
        method: MethodIndex,
    ) -> Result<&'md [Il2CppRGCTXDefinition]> {
        let md = self.method(method)?;
        self.rgctx_entries(image, md.token, md.rgctx_start_index, md.rgctx_count)
    }

    fn rgctx_entries(
        &self,
        image: &Il2CppImageDefinition,
        token: Token,
        start: MetadataIndex<Il2CppRGCTXDefinition>,
        count: u32,
    ) -> Result<&'md [Il2CppRGCTXDefinition]> {
        if self.revision == Revision::Legacy {
            return self
                .metadata
                .global_metadata
                .rgctx_entries
                .slice(start, count)
                .ok_or_else(|| out_of_range("rgctx entries", start));
        }

        let module = self
            .rgctx_modules
            .get(image.name.as_str())
            .ok_or_else(|| StructIndexError::MissingCodeGenModule(image.name.clone()))?;
        let range = match module.ranges.get(&token) {
            Some(range) => range,
            None => return Ok(&[]),
        };
        let start = MetadataIndex::new(range.start);
        module
            .module
            .rgctxs
            .slice(start, range.length)
            .ok_or_else(|| out_of_range("code gen module rgctxs", start))
    }

    /// Splits an encoded method index into its usage kind and index.
    pub fn decode_method_index(&self, encoded: EncodedMethodIndex) -> (u32, u32) {
        let usage = (encoded & 0xE000_0000) >> 29;
        let index = match self.revision {
            Revision::Handles => (encoded & 0x1FFF_FFFE) >> 1,
            Revision::Legacy | Revision::TokenRgctx => encoded & 0x1FFF_FFFF,
        };
        (usage, index)
    }

    /// The method occupying a vtable entry. Method references go through
    /// their method spec to the generic method definition.
    pub fn vtable_method(&self, entry: VTableIndex) -> Result<MethodIndex> {
        let encoded = *self.vtable_entry(entry)?;
        let (usage, index) = self.decode_method_index(encoded);
        let method = if usage == USAGE_METHOD_REF {
            self.method_spec(MethodSpecIndex::new(index))?
                .method_definition_index
        } else {
            MethodIndex::new(index)
        };
        self.method(method)?;
        Ok(method)
    }

    /// Whether this revision carries a metadata usage table at all.
    pub fn has_metadata_usages(&self) -> bool {
        let version = self.metadata.version;
        version > MetadataVersion::new(16, 0) && version < MetadataVersion::new(27, 0)
    }

    /// Method definition usages followed by method reference usages, each in
    /// destination order. Empty for revisions without a usage table.
    pub fn metadata_usages(&self) -> Result<Vec<UsageSite>> {
        if !self.has_metadata_usages() {
            return Ok(Vec::new());
        }

        let mut definitions = BTreeMap::new();
        let mut specializations = BTreeMap::new();
        for pair in &self.metadata.global_metadata.metadata_usage_pairs {
            let (usage, index) = self.decode_method_index(pair.encoded_source_index);
            match usage {
                USAGE_METHOD_DEF => {
                    definitions.insert(pair.destination_index, MethodReference::Definition(MethodIndex::new(index)));
                }
                USAGE_METHOD_REF => {
                    specializations.insert(
                        pair.destination_index,
                        MethodReference::Specialization(MethodSpecIndex::new(index)),
                    );
                }
                _ => {}
            }
        }

        let registration = &self.metadata.runtime_metadata.metadata_registration;
        let image_base = self.metadata.runtime_metadata.image_base;
        definitions
            .into_iter()
            .chain(specializations)
            .map(|(destination, target)| {
                let address = *registration
                    .metadata_usages
                    .get(destination as usize)
                    .ok_or_else(|| out_of_range("metadata usages", MetadataIndex::<u64>::new(destination)))?;
                let address = address.checked_sub(image_base).ok_or(StructIndexError::BadHandle {
                    table: "metadata usages",
                    handle: address,
                })?;
                Ok(UsageSite { address, target })
            })
            .collect()
    }
}
