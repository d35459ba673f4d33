//! The struct layout index: one batch build over a [`Metadata`] table set.
//!
//! The build runs four passes in order:
//! 1. every definition of every image gets a unique display name,
//! 2. every generic class referenced from the type table gets an
//!    instantiation name derived from its definition's display name,
//! 3. metadata usage sites are grouped into static method lists,
//! 4. one [`StructRecord`] is synthesized per definition and per generic
//!    instantiation.
//!
//! Any failure aborts the whole build.

use std::collections::{BTreeMap, HashMap, HashSet};

use il2cpp_metadata::global_metadata::{
    Il2CppImageDefinition, Il2CppTypeDefinition, ImageIndex, MethodIndex, TypeDefinitionIndex,
};
use il2cpp_metadata::runtime_metadata::{
    GenericClassIndex, Il2CppRGCTXDataType, Il2CppRGCTXDefinition, Il2CppTypeEnum, TypeData,
};
use il2cpp_metadata::Metadata;
use serde::Deserialize;

use crate::error::{out_of_range, Result, StructIndexError};
use crate::identifier::IdentifierResolver;
use crate::offsets::{FieldOffsetSource, FieldOffsetTable};
use crate::resolver::{
    c_type_name, corlib_name, DescriptorId, DescriptorKind, ResolveMode, TypeResolver, TypeUsage,
};
use crate::translator::{GenericContext, MethodReference, Translator};

/// What the build emits besides the definition structs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Emit one struct per discovered generic instantiation.
    pub generic_instances: bool,
    /// Record the owning image on every struct.
    pub image_names: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            generic_instances: true,
            image_names: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub name: String,
    pub type_name: String,
    pub is_value_type: bool,
    pub is_custom_type: bool,
    pub offset: i32,
    pub indirection: u32,
}

/// A call site of a static or generic method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMethod {
    /// Relative to the image base.
    pub address: u64,
    pub name: String,
    /// Class arguments of a specialization, as `<A, B>`.
    pub type_args: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RgctxRecord {
    Type(String),
    Class(String),
    /// `DeclaringType<args>.Method<args>`
    Method(String),
}

/// The runtime generic context a generic method carries of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRgctx {
    pub method_name: String,
    pub rgctxs: Vec<RgctxRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructRecord {
    pub type_name: String,
    pub namespace: String,
    pub image_name: Option<String>,
    pub is_value_type: bool,
    pub is_generic: bool,
    pub parent: Option<String>,
    pub fields: Vec<FieldRecord>,
    pub static_fields: Vec<FieldRecord>,
    pub static_methods: Vec<StaticMethod>,
    /// Ordered by slot.
    pub vtable_methods: Vec<String>,
    pub rgctxs: Vec<RgctxRecord>,
    /// Methods of a definition with a non-empty context, in method order.
    pub method_rgctxs: Vec<MethodRgctx>,
}

impl StructRecord {
    fn new(type_name: String, namespace: String) -> Self {
        StructRecord {
            type_name,
            namespace,
            image_name: None,
            is_value_type: false,
            is_generic: false,
            parent: None,
            fields: Vec::new(),
            static_fields: Vec::new(),
            static_methods: Vec::new(),
            vtable_methods: Vec::new(),
            rgctxs: Vec::new(),
            method_rgctxs: Vec::new(),
        }
    }
}

/// The finished, immutable result of a build.
#[derive(Debug)]
pub struct StructIndex {
    structs: Vec<StructRecord>,
    display_names: HashMap<TypeDefinitionIndex, String>,
    instance_names: HashMap<GenericClassIndex, String>,
    static_methods: HashMap<String, Vec<StaticMethod>>,
}

impl StructIndex {
    /// Builds the index with offsets from the metadata's own field offset
    /// tables.
    pub fn build(metadata: &Metadata, options: &IndexOptions) -> Result<Self> {
        let offsets = FieldOffsetTable::new(metadata);
        Self::build_with_offsets(metadata, options, &offsets)
    }

    pub fn build_with_offsets(
        metadata: &Metadata,
        options: &IndexOptions,
        offsets: &dyn FieldOffsetSource,
    ) -> Result<Self> {
        let translator = Translator::new(metadata)?;
        log::debug!(
            "building struct index for metadata {} ({:?})",
            metadata.version,
            translator.revision()
        );
        let mut builder = IndexBuilder {
            resolver: TypeResolver::new(translator),
            offsets,
            options,
            type_names: IdentifierResolver::new(),
            definitions: Vec::new(),
            display_names: HashMap::new(),
            owners: HashMap::new(),
            primitive_structs: HashMap::new(),
            methods: HashMap::new(),
            instances: Vec::new(),
            instance_names: HashMap::new(),
            instance_structs: HashSet::new(),
            static_methods: HashMap::new(),
        };

        builder.index_definitions()?;
        log::debug!("pass 1: indexed {} definitions", builder.definitions.len());
        builder.discover_instances()?;
        log::debug!(
            "pass 2: named {} generic classes, {} distinct instantiations",
            builder.instance_names.len(),
            builder.instances.len()
        );
        builder.index_usages()?;
        log::debug!("pass 3: static methods for {} types", builder.static_methods.len());
        let structs = builder.synthesize()?;
        log::debug!(
            "pass 4: synthesized {} structs from {} resolved type usages",
            structs.len(),
            builder.resolver.resolved_count()
        );

        Ok(StructIndex {
            structs,
            display_names: builder.display_names,
            instance_names: builder.instance_names,
            static_methods: builder.static_methods,
        })
    }

    /// Definition structs in image order, then instantiation structs in type
    /// table order.
    pub fn structs(&self) -> &[StructRecord] {
        &self.structs
    }

    pub fn display_name(&self, definition: TypeDefinitionIndex) -> Option<&str> {
        self.display_names.get(&definition).map(String::as_str)
    }

    pub fn instance_name(&self, generic_class: GenericClassIndex) -> Option<&str> {
        self.instance_names.get(&generic_class).map(String::as_str)
    }

    /// Every usage site recorded for the type with this display name.
    pub fn static_methods(&self, type_name: &str) -> &[StaticMethod] {
        self.static_methods
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

const PRIMITIVE_KINDS: [Il2CppTypeEnum; 18] = [
    Il2CppTypeEnum::Void,
    Il2CppTypeEnum::Boolean,
    Il2CppTypeEnum::Char,
    Il2CppTypeEnum::I1,
    Il2CppTypeEnum::U1,
    Il2CppTypeEnum::I2,
    Il2CppTypeEnum::U2,
    Il2CppTypeEnum::I4,
    Il2CppTypeEnum::U4,
    Il2CppTypeEnum::I8,
    Il2CppTypeEnum::U8,
    Il2CppTypeEnum::R4,
    Il2CppTypeEnum::R8,
    Il2CppTypeEnum::String,
    Il2CppTypeEnum::I,
    Il2CppTypeEnum::U,
    Il2CppTypeEnum::Object,
    Il2CppTypeEnum::Typedbyref,
];

struct IndexedDefinition {
    definition: TypeDefinitionIndex,
    image: ImageIndex,
    name: String,
    descriptor: DescriptorId,
}

struct IndexedInstance {
    generic_class: GenericClassIndex,
    definition: TypeDefinitionIndex,
    name: String,
    descriptor: DescriptorId,
}

struct IndexBuilder<'a, 'md> {
    resolver: TypeResolver<'md>,
    offsets: &'a dyn FieldOffsetSource,
    options: &'a IndexOptions,
    type_names: IdentifierResolver,
    definitions: Vec<IndexedDefinition>,
    display_names: HashMap<TypeDefinitionIndex, String>,
    owners: HashMap<TypeDefinitionIndex, ImageIndex>,
    /// Display names of the corlib definitions behind primitive kinds.
    primitive_structs: HashMap<Il2CppTypeEnum, String>,
    methods: HashMap<TypeDefinitionIndex, Vec<MethodIndex>>,
    instances: Vec<IndexedInstance>,
    instance_names: HashMap<GenericClassIndex, String>,
    /// Every name pass 2 synthesized for a closed instantiation.
    instance_structs: HashSet<String>,
    static_methods: HashMap<String, Vec<StaticMethod>>,
}

impl<'a, 'md> IndexBuilder<'a, 'md> {
    fn metadata(&self) -> &'md Metadata {
        self.resolver.translator().metadata()
    }

    fn index_definitions(&mut self) -> Result<()> {
        let images = &self.metadata().global_metadata.images;
        for (image, image_def) in images.enumerate() {
            for offset in 0..image_def.type_count {
                let definition = image_def.type_start.offset(offset);
                if let Some(owner) = self.owners.get(&definition) {
                    log::warn!(
                        "type definition {} is claimed by images {} and {}",
                        definition,
                        owner,
                        image
                    );
                    continue;
                }

                let usage = self.resolver.definition_usage(definition, ResolveMode::Name)?;
                let name = self.type_names.resolve(&self.resolver.render(&usage, true));
                if let Some(kind) = self.primitive_kind(definition)? {
                    self.primitive_structs.entry(kind).or_insert_with(|| name.clone());
                }
                self.owners.insert(definition, image);
                self.display_names.insert(definition, name.clone());
                self.definitions.push(IndexedDefinition {
                    definition,
                    image,
                    name,
                    descriptor: usage.descriptor,
                });
            }
        }

        for (method, md) in self.metadata().global_metadata.methods.enumerate() {
            self.methods.entry(md.declaring_type).or_default().push(method);
        }
        Ok(())
    }

    /// The primitive kind a corlib definition stands for: either its own
    /// type usage is primitive, or it is the `System` type of that name.
    fn primitive_kind(&self, definition: TypeDefinitionIndex) -> Result<Option<Il2CppTypeEnum>> {
        let translator = self.resolver.translator();
        let td = translator.type_definition(definition)?;
        if let Some(byval) = td.byval_type_index.valid() {
            let kind = translator.il2cpp_type(byval)?.ty;
            if c_type_name(kind).is_some() {
                return Ok(Some(kind));
            }
        }
        if td.namespace != "System" || td.declaring_type_index.is_valid() {
            return Ok(None);
        }
        Ok(PRIMITIVE_KINDS
            .iter()
            .copied()
            .find(|&kind| corlib_name(kind) == Some(td.name.as_str())))
    }

    /// The definition's display name with its bare token replaced by the
    /// instance's, wherever it occurs.
    fn instance_display_name(&self, instance: DescriptorId, definition: TypeDefinitionIndex) -> Option<String> {
        let open_name = self.display_names.get(&definition)?;
        let open = self.resolver.built_definition(definition)?;
        let open_bare = self.resolver.render_bare(open);
        if !open_name.contains(&open_bare) {
            return None;
        }
        Some(open_name.replace(&open_bare, &self.resolver.render_bare(instance)))
    }

    fn discover_instances(&mut self) -> Result<()> {
        let types = &self.metadata().runtime_metadata.metadata_registration.types;
        for (type_index, ty) in types.enumerate() {
            if ty.ty != Il2CppTypeEnum::Genericinst {
                continue;
            }
            let TypeData::GenericClassIndex(generic_class) = ty.data else {
                return Err(StructIndexError::MismatchedTypeData {
                    type_index: type_index.raw(),
                    kind: ty.ty,
                });
            };
            if self.instance_names.contains_key(&generic_class) {
                continue;
            }
            let Some(definition) = self.resolver.translator().generic_class_definition(generic_class)? else {
                continue;
            };
            if !self.display_names.contains_key(&definition) {
                return Err(StructIndexError::UnownedDefinition(generic_class.raw()));
            }

            let usage = self.resolver.resolve(type_index, GenericContext::default(), ResolveMode::Name)?;
            self.resolver.definition_descriptor(definition)?;
            let name = match self.instance_display_name(usage.descriptor, definition) {
                Some(name) => name,
                None => self.resolver.render(&usage, true),
            };
            log::trace!("generic class {} is {}", generic_class, name);
            self.instance_names.insert(generic_class, name.clone());

            // open instantiations render like their definition
            if self.type_names.contains(&name) || !self.instance_structs.insert(name.clone()) {
                continue;
            }
            self.instances.push(IndexedInstance {
                generic_class,
                definition,
                name,
                descriptor: usage.descriptor,
            });
        }
        Ok(())
    }

    fn index_usages(&mut self) -> Result<()> {
        if !self.resolver.translator().has_metadata_usages() {
            log::debug!(
                "metadata {} has no usage table, skipping static methods",
                self.metadata().version
            );
            return Ok(());
        }

        for site in self.resolver.translator().metadata_usages()? {
            let entry = match site.target {
                MethodReference::Definition(method) => {
                    let method = self.resolver.translator().method(method)?;
                    let type_name = self.declaring_name(method.declaring_type)?;
                    let static_method = StaticMethod {
                        address: site.address,
                        name: method.name.clone(),
                        type_args: None,
                    };
                    (type_name, static_method)
                }
                MethodReference::Specialization(spec) => {
                    let context = self.resolver.translator().method_spec_context(spec)?;
                    let spec = self.resolver.translator().method_spec(spec)?;
                    let method = self.resolver.translator().method(spec.method_definition_index)?;
                    let type_name = self.declaring_name(method.declaring_type)?;
                    let mut name = method.name.clone();
                    if let Some(inst) = context.method_inst {
                        name.push_str(&self.resolver.render_inst(inst)?);
                    }
                    let type_args = match context.class_inst {
                        Some(inst) => Some(self.resolver.render_inst(inst)?),
                        None => None,
                    };
                    let static_method = StaticMethod {
                        address: site.address,
                        name,
                        type_args,
                    };
                    (type_name, static_method)
                }
            };
            self.static_methods.entry(entry.0).or_default().push(entry.1);
        }
        Ok(())
    }

    /// The display name of a method's declaring type. Definitions outside
    /// every image fall back to their rendered name.
    fn declaring_name(&mut self, definition: TypeDefinitionIndex) -> Result<String> {
        if let Some(name) = self.display_names.get(&definition) {
            return Ok(name.clone());
        }
        let descriptor = self.resolver.definition_descriptor(definition)?;
        Ok(self.resolver.render_descriptor(descriptor, true, true))
    }

    fn synthesize(&mut self) -> Result<Vec<StructRecord>> {
        let mut structs = Vec::new();
        for indexed in std::mem::take(&mut self.definitions) {
            structs.push(self.definition_struct(&indexed)?);
        }
        if self.options.generic_instances {
            for indexed in std::mem::take(&mut self.instances) {
                structs.push(self.instance_struct(&indexed)?);
            }
        }
        Ok(structs)
    }

    fn definition_struct(&mut self, indexed: &IndexedDefinition) -> Result<StructRecord> {
        let td = self.resolver.translator().type_definition(indexed.definition)?;
        let image = &self.metadata().global_metadata.images[indexed.image];

        let namespace = self.resolver.root_namespace(indexed.descriptor).to_string();
        let mut record = StructRecord::new(indexed.name.clone(), namespace);
        record.image_name = self.options.image_names.then(|| image.name.clone());
        record.is_value_type = td.is_value_type();
        record.is_generic = td.is_generic();
        record.parent = self.parent_name(indexed.definition, td, GenericContext::default())?;
        self.add_fields(&mut record, indexed.definition, td, GenericContext::default())?;
        record.static_methods = self
            .static_methods
            .get(&indexed.name)
            .cloned()
            .unwrap_or_default();
        record.vtable_methods = self.vtable_methods(td)?;
        let entries = self.resolver.translator().rgctx_for_type(image, indexed.definition)?;
        record.rgctxs = self.rgctx_records(entries)?;
        record.method_rgctxs = self.method_rgctxs(image, indexed.definition)?;
        Ok(record)
    }

    fn instance_struct(&mut self, indexed: &IndexedInstance) -> Result<StructRecord> {
        let td = self.resolver.translator().type_definition(indexed.definition)?;
        let generic_class = self.resolver.translator().generic_class(indexed.generic_class)?;
        let context = GenericContext {
            class_inst: generic_class.context.class_inst_index.valid(),
            method_inst: None,
        };

        let namespace = self.resolver.root_namespace(indexed.descriptor).to_string();
        let mut record = StructRecord::new(indexed.name.clone(), namespace);
        if self.options.image_names {
            if let Some(&image) = self.owners.get(&indexed.definition) {
                record.image_name = Some(self.metadata().global_metadata.images[image].name.clone());
            }
        }
        record.is_value_type = td.is_value_type();
        record.is_generic = true;
        record.parent = self.parent_name(indexed.definition, td, context)?;
        self.add_fields(&mut record, indexed.definition, td, context)?;

        let type_args = match context.class_inst {
            Some(inst) => Some(self.resolver.render_inst(inst)?),
            None => None,
        };
        if let Some(open_methods) = self
            .display_names
            .get(&indexed.definition)
            .and_then(|open_name| self.static_methods.get(open_name))
        {
            record.static_methods = open_methods
                .iter()
                .filter(|method| method.type_args.is_some() && method.type_args == type_args)
                .cloned()
                .collect();
        }
        record.vtable_methods = self.vtable_methods(td)?;
        Ok(record)
    }

    fn parent_name(
        &mut self,
        definition: TypeDefinitionIndex,
        td: &Il2CppTypeDefinition,
        context: GenericContext,
    ) -> Result<Option<String>> {
        if td.is_value_type() || td.is_enum() {
            return Ok(None);
        }
        let Some(parent) = td.parent_index.valid() else {
            return Ok(None);
        };

        let usage = self.resolver.resolve(parent, context, ResolveMode::Name)?;
        match self.resolver.descriptor(usage.descriptor).kind {
            DescriptorKind::Primitive(Il2CppTypeEnum::Object) => Ok(None),
            DescriptorKind::Definition(parent) if parent == definition => {
                log::warn!("type definition {} derives from itself, dropping parent", definition);
                Ok(None)
            }
            DescriptorKind::Definition(_) | DescriptorKind::Instance { .. } => {
                Ok(Some(self.struct_name(&usage)))
            }
            DescriptorKind::Primitive(_) | DescriptorKind::Parameter(_) => {
                log::warn!(
                    "type definition {} derives from {}, dropping parent",
                    definition,
                    self.resolver.render(&usage, true)
                );
                Ok(None)
            }
        }
    }

    fn add_fields(
        &mut self,
        record: &mut StructRecord,
        definition: TypeDefinitionIndex,
        td: &Il2CppTypeDefinition,
        context: GenericContext,
    ) -> Result<()> {
        let fields = self
            .metadata()
            .global_metadata
            .fields
            .slice(td.field_start, td.field_count as u32)
            .ok_or_else(|| out_of_range("fields", td.field_start))?;

        let mut field_names = IdentifierResolver::new();
        for (ordinal, field) in fields.iter().enumerate() {
            let ordinal = ordinal as u32;
            let field_type = self.resolver.translator().il2cpp_type(field.type_index)?;
            if field_type.is_literal() {
                continue;
            }

            let usage = self.resolver.resolve(field.type_index, context, ResolveMode::Value)?;
            let candidate = if field_names.contains(&field.name) {
                format!("_{}_{}", ordinal, field.name)
            } else {
                field.name.clone()
            };
            let is_static = field_type.is_static();
            let field_record = FieldRecord {
                name: field_names.resolve(&candidate),
                type_name: self.field_type_name(&usage),
                is_value_type: self.resolver.is_value_type(&usage),
                is_custom_type: self.resolver.is_custom_type(&usage),
                offset: self.offsets.offset(
                    definition,
                    ordinal,
                    td.field_start.offset(ordinal),
                    td.is_value_type(),
                    is_static,
                ),
                indirection: usage.indirection,
            };
            if is_static {
                record.static_fields.push(field_record);
            } else {
                record.fields.push(field_record);
            }
        }
        Ok(())
    }

    /// The struct a usage's descriptor is emitted as, ignoring pointers and
    /// arrays. An instance resolved under a context names the closed struct
    /// for its substituted arguments when pass 2 synthesized one.
    fn struct_name(&self, usage: &TypeUsage) -> String {
        let descriptor = self.resolver.descriptor(usage.descriptor);
        let known = match descriptor.kind {
            DescriptorKind::Primitive(kind) => {
                return match self.primitive_structs.get(&kind) {
                    Some(name) => name.clone(),
                    None => descriptor.name.clone(),
                }
            }
            DescriptorKind::Parameter(_) => return "Il2CppObject".to_string(),
            DescriptorKind::Definition(definition) => self.display_names.get(&definition),
            DescriptorKind::Instance {
                generic_class,
                definition,
            } => {
                let closed = self
                    .instance_display_name(usage.descriptor, definition)
                    .filter(|name| self.instance_structs.contains(name));
                if let Some(closed) = closed {
                    return closed;
                }
                self.instance_names.get(&generic_class)
            }
        };
        match known {
            Some(name) => name.clone(),
            None => self.resolver.render_descriptor(usage.descriptor, true, true),
        }
    }

    /// The C type of a field holding `usage`.
    fn field_type_name(&self, usage: &TypeUsage) -> String {
        if usage.is_array() {
            let mut name = self.struct_name(usage);
            for _ in &usage.arrays {
                name.push_str("_array");
            }
            name.push('*');
            for _ in 0..usage.indirection {
                name.push('*');
            }
            return name;
        }

        let descriptor = self.resolver.descriptor(usage.descriptor);
        let mut name = match descriptor.kind {
            DescriptorKind::Primitive(kind) => c_type_name(kind).unwrap_or("void").to_string(),
            DescriptorKind::Parameter(_) => "Il2CppObject*".to_string(),
            DescriptorKind::Definition(_) | DescriptorKind::Instance { .. } => {
                let mut name = self.struct_name(usage);
                if !descriptor.is_value_type {
                    name.push('*');
                }
                name
            }
        };
        for _ in 0..usage.indirection {
            name.push('*');
        }
        name
    }

    /// Virtual methods keyed by their declared slot. A later entry for a slot
    /// replaces an earlier one.
    fn vtable_methods(&self, td: &Il2CppTypeDefinition) -> Result<Vec<String>> {
        let translator = self.resolver.translator();
        let mut slots = BTreeMap::new();
        for i in 0..td.vtable_count as u32 {
            let method = translator.vtable_method(td.vtable_start.offset(i))?;
            let method = translator.method(method)?;
            slots.insert(method.slot, method.name.as_str());
        }
        Ok(slots
            .into_iter()
            .map(|(slot, name)| format!("_{}_{}", slot, name))
            .collect())
    }

    /// Per-method contexts of the methods `definition` declares.
    fn method_rgctxs(
        &mut self,
        image: &Il2CppImageDefinition,
        definition: TypeDefinitionIndex,
    ) -> Result<Vec<MethodRgctx>> {
        let methods = self.methods.get(&definition).cloned().unwrap_or_default();
        let mut method_rgctxs = Vec::new();
        for method in methods {
            let entries = self.resolver.translator().rgctx_for_method(image, method)?;
            if entries.is_empty() {
                continue;
            }
            let method_name = self.resolver.translator().method(method)?.name.clone();
            method_rgctxs.push(MethodRgctx {
                method_name,
                rgctxs: self.rgctx_records(entries)?,
            });
        }
        Ok(method_rgctxs)
    }

    fn rgctx_records(&mut self, entries: &[Il2CppRGCTXDefinition]) -> Result<Vec<RgctxRecord>> {
        let mut rgctxs = Vec::with_capacity(entries.len());
        for entry in entries {
            let rgctx = match entry.ty {
                Il2CppRGCTXDataType::Type | Il2CppRGCTXDataType::Class => {
                    let usage = self.resolver.resolve(
                        entry.type_index(),
                        GenericContext::default(),
                        ResolveMode::Name,
                    )?;
                    let name = self.resolver.render(&usage, true);
                    if entry.ty == Il2CppRGCTXDataType::Type {
                        RgctxRecord::Type(name)
                    } else {
                        RgctxRecord::Class(name)
                    }
                }
                Il2CppRGCTXDataType::Method => {
                    let spec = entry.method_spec_index();
                    let context = self.resolver.translator().method_spec_context(spec)?;
                    let spec = self.resolver.translator().method_spec(spec)?;
                    let method = self.resolver.translator().method(spec.method_definition_index)?;
                    let declaring = self.resolver.definition_descriptor(method.declaring_type)?;
                    let mut name = self.resolver.render_descriptor(declaring, true, false);
                    if let Some(inst) = context.class_inst {
                        name.push_str(&self.resolver.render_inst(inst)?);
                    }
                    name.push('.');
                    name.push_str(&method.name);
                    if let Some(inst) = context.method_inst {
                        name.push_str(&self.resolver.render_inst(inst)?);
                    }
                    RgctxRecord::Method(name)
                }
                kind => return Err(StructIndexError::UnsupportedRgctxKind(kind)),
            };
            rgctxs.push(rgctx);
        }
        Ok(rgctxs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TableBuilder;
    use il2cpp_metadata::global_metadata::{FieldIndex, Il2CppMetadataUsagePair};
    use il2cpp_metadata::runtime_metadata::{
        FieldOffsets, Il2CppCodeGenModule, TypeIndex, FIELD_ATTRIBUTE_LITERAL, FIELD_ATTRIBUTE_STATIC,
    };
    use il2cpp_metadata::{MetadataIndex, MetadataVersion};

    const METHOD_DEF: u32 = 0x6000_0000;
    const METHOD_REF: u32 = 0xC000_0000;

    fn find<'s>(index: &'s StructIndex, name: &str) -> &'s StructRecord {
        index
            .structs()
            .iter()
            .find(|record| record.type_name == name)
            .unwrap_or_else(|| panic!("no struct named {}", name))
    }

    #[test]
    fn display_names_are_unique_across_images() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let first = tables.image("First.dll");
        tables.class(first, "Game", "Util");
        let second = tables.image("Second.dll");
        tables.class(second, "Game", "Util");
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        let names: Vec<_> = index.structs().iter().map(|s| s.type_name.as_str()).collect();
        assert_eq!(names, ["Game.Util", "Game.Util_1"]);
        assert_eq!(index.structs()[1].image_name.as_deref(), Some("Second.dll"));
        assert_eq!(index.display_name(TypeDefinitionIndex::new(1)), Some("Game.Util_1"));
    }

    #[test]
    fn fields_split_and_skip_literals() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("Assembly-CSharp.dll");
        let player = tables.class(image, "Game", "Player");
        let int = tables.push_type(Il2CppTypeEnum::I4, TypeData::None);
        let string = tables.push_type(Il2CppTypeEnum::String, TypeData::None);
        tables.field(player, "health", int, 0);
        tables.field(player, "name", string, 0);
        tables.field(player, "count", int, FIELD_ATTRIBUTE_STATIC);
        tables.field(player, "MAX", int, FIELD_ATTRIBUTE_STATIC | FIELD_ATTRIBUTE_LITERAL);
        tables.field(player, "health", int, 0);
        tables.runtime_metadata.metadata_registration.field_offsets =
            Some(FieldOffsets::ByType(vec![vec![16, 24, 0, -1, 28]]));
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        let player = find(&index, "Game.Player");
        let fields: Vec<_> = player
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.type_name.as_str(), f.offset, f.is_custom_type))
            .collect();
        assert_eq!(
            fields,
            [
                ("health", "int32_t", 16, false),
                ("name", "Il2CppString*", 24, true),
                ("_4_health", "int32_t", 28, false),
            ]
        );
        assert_eq!(player.static_fields.len(), 1);
        assert_eq!(player.static_fields[0].name, "count");
        assert_eq!(player.static_fields[0].offset, 0);
    }

    #[test]
    fn value_type_fields() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("UnityEngine.dll");
        let vector = tables.value_type(image, "UnityEngine", "Vector3");
        let float = tables.push_type(Il2CppTypeEnum::R4, TypeData::None);
        tables.field(vector, "x", float, 0);
        tables.field(vector, "y", float, 0);
        let transform = tables.class(image, "UnityEngine", "Transform");
        let vector_type = tables.definition_type(vector);
        let layer = tables.enum_type(image, "UnityEngine", "Layer", Il2CppTypeEnum::I4);
        let layer_type = tables.definition_type(layer);
        tables.field(transform, "position", vector_type, 0);
        tables.field(transform, "layer", layer_type, 0);
        tables.runtime_metadata.metadata_registration.field_offsets =
            Some(FieldOffsets::ByType(vec![vec![16, 20], vec![16, 28], vec![]]));
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        let vector = find(&index, "UnityEngine.Vector3");
        assert!(vector.is_value_type);
        assert_eq!(vector.parent, None);
        assert_eq!(vector.fields[0].offset, 0);
        assert_eq!(vector.fields[1].offset, 4);

        let transform = find(&index, "UnityEngine.Transform");
        let position = &transform.fields[0];
        assert_eq!(position.type_name, "UnityEngine.Vector3");
        assert!(position.is_value_type && position.is_custom_type);
        assert_eq!(position.offset, 16);
        let layer = &transform.fields[1];
        assert_eq!(layer.type_name, "int32_t");
        assert!(!layer.is_value_type && !layer.is_custom_type);
    }

    #[test]
    fn parents() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("Assembly-CSharp.dll");
        let base = tables.class(image, "Game", "Base");
        let derived = tables.class(image, "Game", "Derived");
        let base_type = tables.definition_type(base);
        tables.global_metadata.type_definitions[derived].parent_index = base_type;
        let looped = tables.class(image, "Game", "Looped");
        let looped_type = tables.definition_type(looped);
        tables.global_metadata.type_definitions[looped].parent_index = looped_type;
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        assert_eq!(find(&index, "Game.Base").parent, None);
        assert_eq!(find(&index, "Game.Derived").parent.as_deref(), Some("Game.Base"));
        assert_eq!(find(&index, "Game.Looped").parent, None);
    }

    #[test]
    fn vtable_groups_by_declared_slot() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("Assembly-CSharp.dll");
        let widget = tables.class(image, "", "Widget");
        let foo_5 = tables.method(widget, "Foo", 5);
        let foo_3 = tables.method(widget, "Foo", 3);
        let generic = tables.method(widget, "Map", 4);
        let to_string = tables.method(widget, "ToString", 3);
        let spec = tables.push_method_spec(generic, MetadataIndex::none(), MetadataIndex::none());
        tables.vtable(
            widget,
            &[
                METHOD_DEF | foo_5.raw(),
                METHOD_REF | spec.raw(),
                METHOD_DEF | to_string.raw(),
                METHOD_DEF | foo_3.raw(),
            ],
        );
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        assert_eq!(find(&index, "Widget").vtable_methods, ["_3_Foo", "_4_Map", "_5_Foo"]);
    }

    /// `System.Int32`, `MyList<T>` and the type usage of `MyList<Int32>`.
    fn generic_tables(version: MetadataVersion) -> (TableBuilder, TypeIndex) {
        let mut tables = TableBuilder::new(version);
        let image = tables.image("Assembly-CSharp.dll");
        let int32 = tables.value_type(image, "System", "Int32");
        let list = tables.class(image, "", "MyList`1");
        tables.generic_params(list, &["T"]);
        let t = tables.var(list, 0);
        let items = tables.array_of(t);
        tables.field(list, "_items", items, 0);
        tables.field(list, "_first", t, 0);
        let add = tables.method(list, "Add", 0xFFFF);
        let int32_type = tables.definition_type(int32);
        let list_int = tables.generic_instance(list, &[int32_type]);
        // a second record for the same instantiation
        tables.generic_instance(list, &[int32_type]);

        let class_inst = tables.push_generic_inst(&[int32_type]);
        let string = tables.push_type(Il2CppTypeEnum::String, TypeData::None);
        let method_inst = tables.push_generic_inst(&[string]);
        tables.push_method_spec(add, class_inst, method_inst);
        tables.push_method_spec(add, MetadataIndex::none(), MetadataIndex::none());
        (tables, list_int)
    }

    #[test]
    fn generic_instances_take_their_definitions_name() {
        let metadata = generic_tables(MetadataVersion::new(24, 0)).0.build();
        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();

        let names: Vec<_> = index.structs().iter().map(|s| s.type_name.as_str()).collect();
        assert_eq!(names, ["System.Int32", "MyList<T>", "MyList<Int32>"]);
        assert_eq!(index.instance_name(MetadataIndex::new(0)), Some("MyList<Int32>"));
        assert_eq!(index.instance_name(MetadataIndex::new(1)), Some("MyList<Int32>"));

        let open = find(&index, "MyList<T>");
        assert!(open.is_generic);
        assert_eq!(open.fields[0].type_name, "Il2CppObject_array*");
        assert_eq!(open.fields[1].type_name, "Il2CppObject*");
        assert!(!open.fields[1].is_custom_type);

        let closed = find(&index, "MyList<Int32>");
        assert!(closed.is_generic);
        assert_eq!(closed.image_name.as_deref(), Some("Assembly-CSharp.dll"));
        assert_eq!(closed.fields[0].type_name, "System.Int32_array*");
        assert_eq!(closed.fields[1].type_name, "System.Int32");
        assert!(closed.fields[1].is_value_type);
    }

    #[test]
    fn nested_instances_name_their_substituted_struct() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("Assembly-CSharp.dll");
        let int32 = tables.value_type(image, "System", "Int32");
        let int64 = tables.value_type(image, "System", "Int64");
        let inner = tables.class(image, "", "Inner`1");
        tables.generic_params(inner, &["U"]);
        let u = tables.var(inner, 0);
        tables.field(inner, "value", u, 0);
        let list = tables.class(image, "", "MyList`1");
        tables.generic_params(list, &["T"]);
        let t = tables.var(list, 0);
        let inner_t = tables.generic_instance(inner, &[t]);
        tables.field(list, "inner", inner_t, 0);
        let int32_type = tables.definition_type(int32);
        let int64_type = tables.definition_type(int64);
        tables.generic_instance(list, &[int32_type]);
        tables.generic_instance(list, &[int64_type]);
        tables.generic_instance(inner, &[int32_type]);
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        assert_eq!(find(&index, "MyList<T>").fields[0].type_name, "Inner<T>*");
        assert_eq!(find(&index, "MyList<Int32>").fields[0].type_name, "Inner<Int32>*");
        assert_eq!(find(&index, "Inner<Int32>").fields[0].type_name, "System.Int32");
        // no Inner<Int64> struct exists, so the field names the open one
        assert_eq!(find(&index, "MyList<Int64>").fields[0].type_name, "Inner<T>*");
    }

    #[test]
    fn instance_parents_follow_the_context() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("Assembly-CSharp.dll");
        let int32 = tables.value_type(image, "System", "Int32");
        let base = tables.class(image, "Game", "Base`1");
        tables.generic_params(base, &["T"]);
        let derived = tables.class(image, "Game", "Derived`1");
        tables.generic_params(derived, &["T"]);
        let t = tables.var(derived, 0);
        let base_t = tables.generic_instance(base, &[t]);
        tables.global_metadata.type_definitions[derived].parent_index = base_t;
        let int32_type = tables.definition_type(int32);
        tables.generic_instance(derived, &[int32_type]);
        tables.generic_instance(base, &[int32_type]);
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        assert_eq!(find(&index, "Game.Derived<T>").parent.as_deref(), Some("Game.Base<T>"));
        assert_eq!(
            find(&index, "Game.Derived<Int32>").parent.as_deref(),
            Some("Game.Base<Int32>")
        );
    }

    #[test]
    fn every_occurrence_of_the_open_name_is_replaced() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("Assembly-CSharp.dll");
        let int32 = tables.value_type(image, "System", "Int32");
        let cache = tables.class(image, "Cache<T>", "Cache`1");
        tables.generic_params(cache, &["T"]);
        let int32_type = tables.definition_type(int32);
        let cache_int = tables.generic_instance(cache, &[int32_type]);
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        assert_eq!(index.display_name(cache), Some("Cache<T>.Cache<T>"));
        let TypeData::GenericClassIndex(generic_class) = metadata.runtime_metadata.metadata_registration.types[cache_int].data else {
            panic!("not an instantiation");
        };
        assert_eq!(index.instance_name(generic_class), Some("Cache<Int32>.Cache<Int32>"));
    }

    #[test]
    fn array_fields_name_their_element_struct() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("mscorlib.dll");
        tables.value_type(image, "System", "Int32");
        // corlib records whose own usage is the primitive kind
        let single = tables.value_type(image, "System", "Single");
        let r4 = tables.push_type(Il2CppTypeEnum::R4, TypeData::TypeDefinitionIndex(single));
        tables.global_metadata.type_definitions[single].byval_type_index = r4;
        let holder = tables.class(image, "Game", "Holder");

        let int = tables.push_type(Il2CppTypeEnum::I4, TypeData::None);
        let float = tables.push_type(Il2CppTypeEnum::R4, TypeData::None);
        let byte = tables.push_type(Il2CppTypeEnum::U1, TypeData::None);
        let ints = tables.array_of(int);
        let floats = tables.array_of(float);
        let bytes = tables.array_of(byte);
        let int_ptr = tables.pointer_to(int);
        let int_ptrs = tables.array_of(int_ptr);
        let ints_ptr = tables.pointer_to(ints);
        let grid = tables.array_of(ints);
        tables.field(holder, "ints", ints, 0);
        tables.field(holder, "floats", floats, 0);
        tables.field(holder, "bytes", bytes, 0);
        tables.field(holder, "pointers", int_ptrs, 0);
        tables.field(holder, "indirect", ints_ptr, 0);
        tables.field(holder, "grid", grid, 0);
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        assert_eq!(index.display_name(single), Some("System.Single"));
        let fields: Vec<_> = find(&index, "Game.Holder")
            .fields
            .iter()
            .map(|f| (f.type_name.as_str(), f.indirection))
            .collect();
        assert_eq!(
            fields,
            [
                ("System.Int32_array*", 0),
                ("System.Single_array*", 0),
                ("byte_array*", 0),
                ("System.Int32_array*", 0),
                ("System.Int32_array**", 1),
                ("System.Int32_array_array*", 0),
            ]
        );
    }

    #[test]
    fn options_drop_instances_and_image_names() {
        let metadata = generic_tables(MetadataVersion::new(24, 0)).0.build();
        let options = IndexOptions {
            generic_instances: false,
            image_names: false,
        };
        let index = StructIndex::build(&metadata, &options).unwrap();
        assert_eq!(index.structs().len(), 2);
        assert!(index.structs().iter().all(|s| s.image_name.is_none()));
        // names are still synthesized for the instances
        assert_eq!(index.instance_name(MetadataIndex::new(0)), Some("MyList<Int32>"));
    }

    fn with_usages(version: MetadataVersion) -> Metadata {
        let (mut tables, _) = generic_tables(version);
        // token keyed revisions look contexts up per code gen module
        tables.runtime_metadata.code_registration.code_gen_modules.push(Il2CppCodeGenModule {
            name: "Assembly-CSharp.dll".to_string(),
            ..Default::default()
        });
        tables.runtime_metadata.image_base = 0x1000;
        tables.runtime_metadata.metadata_registration.metadata_usages = vec![0x1100, 0x1200, 0x1300];
        tables.global_metadata.metadata_usage_pairs = vec![
            Il2CppMetadataUsagePair {
                destination_index: 2,
                encoded_source_index: METHOD_REF,
            },
            Il2CppMetadataUsagePair {
                destination_index: 0,
                encoded_source_index: METHOD_DEF,
            },
            Il2CppMetadataUsagePair {
                destination_index: 1,
                encoded_source_index: METHOD_REF | 1,
            },
        ];
        tables.build()
    }

    #[test]
    fn usage_sites_become_static_methods() {
        let metadata = with_usages(MetadataVersion::new(24, 0));
        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();

        let add = |address, name: &str, type_args: Option<&str>| StaticMethod {
            address,
            name: name.to_string(),
            type_args: type_args.map(str::to_string),
        };
        assert_eq!(
            index.static_methods("MyList<T>"),
            [
                add(0x100, "Add", None),
                add(0x200, "Add", None),
                add(0x300, "Add<string>", Some("<Int32>")),
            ]
        );
        assert_eq!(find(&index, "MyList<T>").static_methods.len(), 3);
        assert_eq!(
            find(&index, "MyList<Int32>").static_methods,
            [add(0x300, "Add<string>", Some("<Int32>"))]
        );
    }

    #[test]
    fn usage_sites_outside_the_window_are_ignored() {
        for version in [MetadataVersion::new(16, 0), MetadataVersion::new(27, 0)] {
            let metadata = with_usages(version);
            let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
            assert!(index.static_methods("MyList<T>").is_empty(), "{}", version);
            assert!(index.structs().iter().all(|s| s.static_methods.is_empty()));
        }
    }

    #[test]
    fn rgctx_entries() {
        let (mut tables, list_int) = generic_tables(MetadataVersion::new(24, 0));
        let list = TypeDefinitionIndex::new(1);
        tables.global_metadata.rgctx_entries = vec![
            Il2CppRGCTXDefinition {
                ty: Il2CppRGCTXDataType::Type,
                data: tables.definition_type(TypeDefinitionIndex::new(0)).raw(),
            },
            Il2CppRGCTXDefinition {
                ty: Il2CppRGCTXDataType::Class,
                data: list_int.raw(),
            },
            Il2CppRGCTXDefinition {
                ty: Il2CppRGCTXDataType::Method,
                data: 0,
            },
            Il2CppRGCTXDefinition {
                ty: Il2CppRGCTXDataType::Array,
                data: 0,
            },
        ]
        .into();
        tables.global_metadata.type_definitions[list].rgctx_start_index = MetadataIndex::new(0);
        tables.global_metadata.type_definitions[list].rgctx_count = 3;
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        assert_eq!(
            find(&index, "MyList<T>").rgctxs,
            [
                RgctxRecord::Type("System.Int32".to_string()),
                RgctxRecord::Class("MyList<Int32>".to_string()),
                RgctxRecord::Method("MyList<Int32>.Add<string>".to_string()),
            ]
        );
        assert!(find(&index, "MyList<Int32>").rgctxs.is_empty());

        let (mut tables, _) = generic_tables(MetadataVersion::new(24, 0));
        tables.global_metadata.rgctx_entries = vec![Il2CppRGCTXDefinition {
            ty: Il2CppRGCTXDataType::Array,
            data: 0,
        }]
        .into();
        tables.global_metadata.type_definitions[list].rgctx_start_index = MetadataIndex::new(0);
        tables.global_metadata.type_definitions[list].rgctx_count = 1;
        let metadata = tables.build();
        assert_eq!(
            StructIndex::build(&metadata, &IndexOptions::default()).unwrap_err(),
            StructIndexError::UnsupportedRgctxKind(Il2CppRGCTXDataType::Array)
        );
    }

    #[test]
    fn method_rgctx_entries() {
        let (mut tables, _) = generic_tables(MetadataVersion::new(24, 0));
        let add = MethodIndex::new(0);
        tables.global_metadata.rgctx_entries = vec![
            Il2CppRGCTXDefinition {
                ty: Il2CppRGCTXDataType::Type,
                data: tables.definition_type(TypeDefinitionIndex::new(0)).raw(),
            },
            Il2CppRGCTXDefinition {
                ty: Il2CppRGCTXDataType::Method,
                data: 0,
            },
        ]
        .into();
        tables.global_metadata.methods[add].rgctx_start_index = MetadataIndex::new(0);
        tables.global_metadata.methods[add].rgctx_count = 2;
        let metadata = tables.build();

        let index = StructIndex::build(&metadata, &IndexOptions::default()).unwrap();
        let open = find(&index, "MyList<T>");
        assert!(open.rgctxs.is_empty());
        assert_eq!(
            open.method_rgctxs,
            [MethodRgctx {
                method_name: "Add".to_string(),
                rgctxs: vec![
                    RgctxRecord::Type("System.Int32".to_string()),
                    RgctxRecord::Method("MyList<Int32>.Add<string>".to_string()),
                ],
            }]
        );
        assert!(find(&index, "System.Int32").method_rgctxs.is_empty());
    }

    #[test]
    fn instantiation_of_an_unowned_definition() {
        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("Assembly-CSharp.dll");
        let list = tables.class(image, "", "MyList`1");
        tables.generic_params(list, &["T"]);
        tables.global_metadata.images[image].type_count = 0;
        let int = tables.push_type(Il2CppTypeEnum::I4, TypeData::None);
        tables.generic_instance(list, &[int]);
        let metadata = tables.build();

        assert_eq!(
            StructIndex::build(&metadata, &IndexOptions::default()).unwrap_err(),
            StructIndexError::UnownedDefinition(0)
        );
    }

    #[test]
    fn custom_offset_source() {
        struct OrdinalOffsets;

        impl FieldOffsetSource for OrdinalOffsets {
            fn offset(
                &self,
                _: TypeDefinitionIndex,
                ordinal: u32,
                _: FieldIndex,
                _: bool,
                is_static: bool,
            ) -> i32 {
                if is_static {
                    -1
                } else {
                    ordinal as i32 * 8
                }
            }
        }

        let mut tables = TableBuilder::new(MetadataVersion::new(24, 0));
        let image = tables.image("Assembly-CSharp.dll");
        let node = tables.class(image, "", "Node");
        let node_type = tables.definition_type(node);
        tables.field(node, "next", node_type, 0);
        tables.field(node, "prev", node_type, 0);
        let metadata = tables.build();

        let index =
            StructIndex::build_with_offsets(&metadata, &IndexOptions::default(), &OrdinalOffsets).unwrap();
        let node = find(&index, "Node");
        assert_eq!(node.fields[1].offset, 8);
        assert_eq!(node.fields[1].type_name, "Node*");
        assert!(!node.fields[1].is_value_type && node.fields[1].is_custom_type);
    }
}
