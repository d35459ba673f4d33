//! Resolution of type usages into named descriptors.
//!
//! Descriptors live in an arena owned by the [`TypeResolver`] and are
//! addressed by [`DescriptorId`]. Pointers and arrays do not get descriptors
//! of their own; they are recorded on the [`TypeUsage`] that refers to the
//! element descriptor.

use std::collections::HashMap;
use std::fmt::Write;

use il2cpp_metadata::global_metadata::{GenericParameterIndex, TypeDefinitionIndex};
use il2cpp_metadata::runtime_metadata::{
    GenericClassIndex, GenericInstIndex, Il2CppType, Il2CppTypeEnum, TypeData, TypeIndex,
};

use crate::error::{Result, StructIndexError};
use crate::identifier::IdentifierResolver;
use crate::translator::{GenericContext, Translator};

/// Deepest chain of nested usages one resolution may walk.
pub const MAX_NESTING: usize = 256;

/// C# keyword and C field type of each primitive kind.
fn primitive_names(kind: Il2CppTypeEnum) -> Option<(&'static str, &'static str)> {
    use Il2CppTypeEnum as K;
    let names = match kind {
        K::Void => ("void", "void"),
        K::Boolean => ("bool", "bool"),
        K::Char => ("char", "uint16_t"),
        K::I1 => ("sbyte", "int8_t"),
        K::U1 => ("byte", "uint8_t"),
        K::I2 => ("short", "int16_t"),
        K::U2 => ("ushort", "uint16_t"),
        K::I4 => ("int", "int32_t"),
        K::U4 => ("uint", "uint32_t"),
        K::I8 => ("long", "int64_t"),
        K::U8 => ("ulong", "uint64_t"),
        K::R4 => ("float", "float"),
        K::R8 => ("double", "double"),
        K::String => ("string", "Il2CppString*"),
        K::I => ("intptr_t", "intptr_t"),
        K::U => ("uintptr_t", "uintptr_t"),
        K::Object => ("object", "Il2CppObject*"),
        K::Typedbyref => ("typedbyref", "Il2CppObject*"),
        _ => return None,
    };
    Some(names)
}

/// The C type a field of primitive kind `kind` is declared with.
pub fn c_type_name(kind: Il2CppTypeEnum) -> Option<&'static str> {
    primitive_names(kind).map(|(_, c_name)| c_name)
}

/// The corlib definition a primitive kind stands for, in `System`.
pub fn corlib_name(kind: Il2CppTypeEnum) -> Option<&'static str> {
    use Il2CppTypeEnum as K;
    let name = match kind {
        K::Void => "Void",
        K::Boolean => "Boolean",
        K::Char => "Char",
        K::I1 => "SByte",
        K::U1 => "Byte",
        K::I2 => "Int16",
        K::U2 => "UInt16",
        K::I4 => "Int32",
        K::U4 => "UInt32",
        K::I8 => "Int64",
        K::U8 => "UInt64",
        K::R4 => "Single",
        K::R8 => "Double",
        K::String => "String",
        K::I => "IntPtr",
        K::U => "UIntPtr",
        K::Object => "Object",
        K::Typedbyref => "TypedReference",
        _ => return None,
    };
    Some(name)
}

/// Whether resolving a usage of this kind can depend on a generic context.
fn depends_on_context(kind: Il2CppTypeEnum) -> bool {
    matches!(
        kind,
        Il2CppTypeEnum::Ptr
            | Il2CppTypeEnum::Szarray
            | Il2CppTypeEnum::Array
            | Il2CppTypeEnum::Var
            | Il2CppTypeEnum::Mvar
            | Il2CppTypeEnum::Genericinst
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(usize);

impl DescriptorId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Primitive(Il2CppTypeEnum),
    /// An open parameter that no context binds.
    Parameter(GenericParameterIndex),
    Definition(TypeDefinitionIndex),
    Instance {
        generic_class: GenericClassIndex,
        definition: TypeDefinitionIndex,
    },
}

#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub kind: DescriptorKind,
    /// Backtick-stripped and unique within the owner.
    pub name: String,
    pub namespace: String,
    pub declaring_type: Option<DescriptorId>,
    /// Bound arguments of an instance.
    pub type_arguments: Vec<TypeUsage>,
    /// Declared parameter names of an open generic definition.
    pub parameter_names: Vec<String>,
    pub is_value_type: bool,
    pub is_enum: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayShape {
    /// Single dimension, zero based.
    Vector,
    Ranked(u8),
}

/// One array wrapper around an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayLevel {
    pub shape: ArrayShape,
    /// Pointers applied to the element before it was wrapped.
    pub element_indirection: u32,
}

/// A descriptor as used at one site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeUsage {
    pub descriptor: DescriptorId,
    /// Pointers applied outside the outermost array.
    pub indirection: u32,
    /// Innermost first.
    pub arrays: Vec<ArrayLevel>,
}

impl TypeUsage {
    fn plain(descriptor: DescriptorId) -> Self {
        TypeUsage {
            descriptor,
            indirection: 0,
            arrays: Vec::new(),
        }
    }

    fn wrap_array(&mut self, shape: ArrayShape) {
        self.arrays.push(ArrayLevel {
            shape,
            element_indirection: self.indirection,
        });
        self.indirection = 0;
    }

    pub fn is_array(&self) -> bool {
        !self.arrays.is_empty()
    }

    pub fn is_pointer(&self) -> bool {
        self.indirection > 0
    }
}

/// How the consumer of a usage wants it represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveMode {
    /// The type as written, enums stay enums.
    Name,
    /// The in-memory representation, enums become their underlying
    /// primitive.
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct UsageKey {
    type_index: TypeIndex,
    context: GenericContext,
    mode: ResolveMode,
}

enum Slot<T> {
    InProgress,
    Resolved(T),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum OwnerScope {
    Namespace(String),
    Declaring(DescriptorId),
}

pub struct TypeResolver<'md> {
    translator: Translator<'md>,
    descriptors: Vec<TypeDescriptor>,
    usages: HashMap<UsageKey, Slot<TypeUsage>>,
    definitions: HashMap<TypeDefinitionIndex, Slot<DescriptorId>>,
    parameters: HashMap<GenericParameterIndex, DescriptorId>,
    primitives: HashMap<Il2CppTypeEnum, DescriptorId>,
    base_names: HashMap<OwnerScope, IdentifierResolver>,
    resolved: usize,
    depth: usize,
}

impl<'md> TypeResolver<'md> {
    pub fn new(translator: Translator<'md>) -> Self {
        TypeResolver {
            translator,
            descriptors: Vec::new(),
            usages: HashMap::new(),
            definitions: HashMap::new(),
            parameters: HashMap::new(),
            primitives: HashMap::new(),
            base_names: HashMap::new(),
            resolved: 0,
            depth: 0,
        }
    }

    pub fn translator(&self) -> &Translator<'md> {
        &self.translator
    }

    pub fn descriptor(&self, id: DescriptorId) -> &TypeDescriptor {
        &self.descriptors[id.0]
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Number of usages that were computed rather than served from the
    /// cache.
    pub fn resolved_count(&self) -> usize {
        self.resolved
    }

    fn push(&mut self, descriptor: TypeDescriptor) -> DescriptorId {
        self.descriptors.push(descriptor);
        DescriptorId(self.descriptors.len() - 1)
    }

    /// Resolves the usage at `type_index`. Results are memoized on the usage
    /// identity, the parts of `context` it can depend on, and `mode`.
    ///
    /// Chains nested deeper than [`MAX_NESTING`] fail with
    /// [`StructIndexError::ExpansionTooDeep`].
    pub fn resolve(
        &mut self,
        type_index: TypeIndex,
        context: GenericContext,
        mode: ResolveMode,
    ) -> Result<TypeUsage> {
        let ty = *self.translator.il2cpp_type(type_index)?;
        let context = if depends_on_context(ty.ty) {
            context
        } else {
            GenericContext::default()
        };
        let key = UsageKey {
            type_index,
            context,
            mode,
        };
        match self.usages.get(&key) {
            Some(Slot::Resolved(usage)) => return Ok(usage.clone()),
            Some(Slot::InProgress) => {
                return Err(StructIndexError::NonTerminatingExpansion {
                    table: "types",
                    index: type_index.raw(),
                })
            }
            None => {}
        }

        if self.depth >= MAX_NESTING {
            return Err(StructIndexError::ExpansionTooDeep {
                index: type_index.raw(),
                limit: MAX_NESTING,
            });
        }

        self.usages.insert(key, Slot::InProgress);
        self.resolved += 1;
        self.depth += 1;
        let result = self.resolve_uncached(type_index, &ty, context, mode);
        self.depth -= 1;
        match result {
            Ok(usage) => {
                self.usages.insert(key, Slot::Resolved(usage.clone()));
                Ok(usage)
            }
            Err(err) => {
                self.usages.remove(&key);
                Err(err)
            }
        }
    }

    fn resolve_uncached(
        &mut self,
        type_index: TypeIndex,
        ty: &Il2CppType,
        context: GenericContext,
        mode: ResolveMode,
    ) -> Result<TypeUsage> {
        use Il2CppTypeEnum as K;
        let mismatched = || StructIndexError::MismatchedTypeData {
            type_index: type_index.raw(),
            kind: ty.ty,
        };

        match ty.ty {
            kind if primitive_names(kind).is_some() => Ok(TypeUsage::plain(self.primitive(kind))),
            K::Ptr => {
                let TypeData::TypeIndex(pointee) = ty.data else {
                    return Err(mismatched());
                };
                let mut usage = self.resolve(pointee, context, mode)?;
                usage.indirection += 1;
                Ok(usage)
            }
            K::Szarray => {
                let TypeData::TypeIndex(element) = ty.data else {
                    return Err(mismatched());
                };
                let mut usage = self.resolve(element, context, ResolveMode::Value)?;
                usage.wrap_array(ArrayShape::Vector);
                Ok(usage)
            }
            K::Array => {
                let TypeData::ArrayType(array) = ty.data else {
                    return Err(mismatched());
                };
                let array = self.translator.array_type(array)?;
                let mut usage = self.resolve(array.elem_ty, context, ResolveMode::Value)?;
                usage.wrap_array(ArrayShape::Ranked(array.rank));
                Ok(usage)
            }
            K::Var | K::Mvar => {
                let parameter = self.translator.generic_parameter_of(type_index)?;
                let inst = if ty.ty == K::Var {
                    context.class_inst
                } else {
                    context.method_inst
                };
                let Some(inst) = inst else {
                    return Ok(TypeUsage::plain(self.parameter(parameter)?));
                };
                let ordinal = self.translator.generic_parameter(parameter)?.num;
                let argument = *self
                    .translator
                    .generic_inst(inst)?
                    .types
                    .get(ordinal as usize)
                    .ok_or(StructIndexError::IndexOutOfRange {
                        table: "generic instantiation arguments",
                        index: ordinal as u32,
                    })?;
                self.resolve(argument, GenericContext::default(), mode)
            }
            K::Class | K::Valuetype => {
                let definition = self.translator.definition_of(type_index)?;
                if let Some(underlying) = self.enum_underlying(definition, mode)? {
                    return self.resolve(underlying, GenericContext::default(), ResolveMode::Value);
                }
                Ok(TypeUsage::plain(self.definition_descriptor(definition)?))
            }
            K::Genericinst => {
                let TypeData::GenericClassIndex(generic_class) = ty.data else {
                    return Err(mismatched());
                };
                self.resolve_instance(generic_class, context, mode)
            }
            kind => Err(StructIndexError::UnsupportedTypeKind(kind)),
        }
    }

    /// The underlying integer usage of an enum definition, when `mode` asks
    /// for the value representation.
    fn enum_underlying(
        &self,
        definition: TypeDefinitionIndex,
        mode: ResolveMode,
    ) -> Result<Option<TypeIndex>> {
        if mode != ResolveMode::Value {
            return Ok(None);
        }
        let td = self.translator.type_definition(definition)?;
        Ok(td.is_enum().then(|| td.element_type_index.valid()).flatten())
    }

    fn resolve_instance(
        &mut self,
        generic_class: GenericClassIndex,
        context: GenericContext,
        mode: ResolveMode,
    ) -> Result<TypeUsage> {
        let Some(definition) = self.translator.generic_class_definition(generic_class)? else {
            log::debug!("generic class {} has no definition, using object", generic_class);
            return Ok(TypeUsage::plain(self.primitive(Il2CppTypeEnum::Object)));
        };
        if let Some(underlying) = self.enum_underlying(definition, mode)? {
            return self.resolve(underlying, GenericContext::default(), ResolveMode::Value);
        }

        let open = self.definition_descriptor(definition)?;
        let class_inst = self
            .translator
            .generic_class(generic_class)?
            .context
            .class_inst_index
            .valid();
        let mut type_arguments = Vec::new();
        if let Some(inst) = class_inst {
            for &argument in &self.translator.generic_inst(inst)?.types {
                type_arguments.push(self.resolve(argument, context, ResolveMode::Name)?);
            }
        }

        let open = &self.descriptors[open.0];
        let descriptor = TypeDescriptor {
            kind: DescriptorKind::Instance {
                generic_class,
                definition,
            },
            name: open.name.clone(),
            namespace: open.namespace.clone(),
            declaring_type: open.declaring_type,
            type_arguments,
            parameter_names: Vec::new(),
            is_value_type: open.is_value_type,
            is_enum: open.is_enum,
        };
        Ok(TypeUsage::plain(self.push(descriptor)))
    }

    fn primitive(&mut self, kind: Il2CppTypeEnum) -> DescriptorId {
        if let Some(&id) = self.primitives.get(&kind) {
            return id;
        }
        let name = primitive_names(kind).map_or("", |(name, _)| name);
        let id = self.push(TypeDescriptor {
            kind: DescriptorKind::Primitive(kind),
            name: name.to_string(),
            namespace: String::new(),
            declaring_type: None,
            type_arguments: Vec::new(),
            parameter_names: Vec::new(),
            is_value_type: false,
            is_enum: false,
        });
        self.primitives.insert(kind, id);
        id
    }

    fn parameter(&mut self, parameter: GenericParameterIndex) -> Result<DescriptorId> {
        if let Some(&id) = self.parameters.get(&parameter) {
            return Ok(id);
        }
        let name = self.translator.generic_parameter(parameter)?.name.clone();
        let id = self.push(TypeDescriptor {
            kind: DescriptorKind::Parameter(parameter),
            name,
            namespace: String::new(),
            declaring_type: None,
            type_arguments: Vec::new(),
            parameter_names: Vec::new(),
            is_value_type: false,
            is_enum: false,
        });
        self.parameters.insert(parameter, id);
        Ok(id)
    }

    /// The descriptor of an open definition. Built once per definition.
    pub fn definition_descriptor(&mut self, definition: TypeDefinitionIndex) -> Result<DescriptorId> {
        match self.definitions.get(&definition) {
            Some(Slot::Resolved(id)) => return Ok(*id),
            Some(Slot::InProgress) => {
                return Err(StructIndexError::NonTerminatingExpansion {
                    table: "type definitions",
                    index: definition.raw(),
                })
            }
            None => {}
        }

        self.definitions.insert(definition, Slot::InProgress);
        match self.build_definition(definition) {
            Ok(id) => {
                self.definitions.insert(definition, Slot::Resolved(id));
                Ok(id)
            }
            Err(err) => {
                self.definitions.remove(&definition);
                Err(err)
            }
        }
    }

    fn build_definition(&mut self, definition: TypeDefinitionIndex) -> Result<DescriptorId> {
        let td = self.translator.type_definition(definition)?;
        let declaring_type = match td.declaring_type_index.valid() {
            Some(declaring) => Some(
                self.resolve(declaring, GenericContext::default(), ResolveMode::Name)?
                    .descriptor,
            ),
            None => None,
        };

        let base_name = match td.name.find('`') {
            Some(tick) => &td.name[..tick],
            None => td.name.as_str(),
        };
        let scope = match declaring_type {
            Some(declaring) => OwnerScope::Declaring(declaring),
            None => OwnerScope::Namespace(td.namespace.clone()),
        };
        let name = self.base_names.entry(scope).or_default().resolve(base_name);

        let mut parameter_names = Vec::new();
        if let Some(container) = td.generic_container_index.valid() {
            let container = self.translator.generic_container(container)?;
            for ordinal in 0..container.type_argc {
                let parameter = container.generic_parameter_start.offset(ordinal);
                parameter_names.push(self.translator.generic_parameter(parameter)?.name.clone());
            }
        }

        Ok(self.push(TypeDescriptor {
            kind: DescriptorKind::Definition(definition),
            name,
            namespace: td.namespace.clone(),
            declaring_type,
            type_arguments: Vec::new(),
            parameter_names,
            is_value_type: td.is_value_type(),
            is_enum: td.is_enum(),
        }))
    }

    /// The descriptor of `definition` if it has already been built.
    pub fn built_definition(&self, definition: TypeDefinitionIndex) -> Option<DescriptorId> {
        match self.definitions.get(&definition) {
            Some(Slot::Resolved(id)) => Some(*id),
            Some(Slot::InProgress) | None => None,
        }
    }

    /// A usage standing for `definition` itself, shared with the usages
    /// that reference it through the type table. Corlib definitions whose
    /// own usage is a primitive kind keep their definition descriptor.
    pub fn definition_usage(
        &mut self,
        definition: TypeDefinitionIndex,
        mode: ResolveMode,
    ) -> Result<TypeUsage> {
        if let Some(type_index) = self.translator.type_for_definition(definition)? {
            if primitive_names(self.translator.il2cpp_type(type_index)?.ty).is_none() {
                return self.resolve(type_index, GenericContext::default(), mode);
            }
        }
        Ok(TypeUsage::plain(self.definition_descriptor(definition)?))
    }

    /// `<A, B>` for the arguments of a generic instantiation, each resolved
    /// without a context.
    pub fn render_inst(&mut self, inst: GenericInstIndex) -> Result<String> {
        let mut arguments = Vec::new();
        for &argument in &self.translator.generic_inst(inst)?.types {
            let usage = self.resolve(argument, GenericContext::default(), ResolveMode::Name)?;
            arguments.push(self.render(&usage, false));
        }
        Ok(format!("<{}>", arguments.join(", ")))
    }

    /// Renders a usage as C# source would spell it. `qualified` adds the
    /// namespace of the outermost type; arguments are never qualified.
    pub fn render(&self, usage: &TypeUsage, qualified: bool) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out, usage.descriptor, qualified, true);
        for level in &usage.arrays {
            for _ in 0..level.element_indirection {
                out.push('*');
            }
            match level.shape {
                ArrayShape::Vector => out.push_str("[]"),
                ArrayShape::Ranked(rank) => {
                    out.push('[');
                    for _ in 1..rank {
                        out.push(',');
                    }
                    out.push(']');
                }
            }
        }
        for _ in 0..usage.indirection {
            out.push('*');
        }
        out
    }

    /// The name of a descriptor, optionally followed by its arguments or
    /// parameter names.
    pub fn render_descriptor(&self, id: DescriptorId, qualified: bool, with_arguments: bool) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out, id, qualified, with_arguments);
        out
    }

    /// The last name segment with its arguments, no owner.
    pub fn render_bare(&self, id: DescriptorId) -> String {
        let mut out = self.descriptors[id.0].name.clone();
        self.write_arguments(&mut out, id);
        out
    }

    fn write_descriptor(&self, out: &mut String, id: DescriptorId, qualified: bool, with_arguments: bool) {
        self.write_owner(out, id, qualified);
        out.push_str(&self.descriptors[id.0].name);
        if with_arguments {
            self.write_arguments(out, id);
        }
    }

    /// Enclosing type names never carry arguments.
    fn write_owner(&self, out: &mut String, id: DescriptorId, qualified: bool) {
        let descriptor = &self.descriptors[id.0];
        match descriptor.declaring_type {
            Some(declaring) => {
                self.write_owner(out, declaring, qualified);
                let _ = write!(out, "{}.", self.descriptors[declaring.0].name);
            }
            None if qualified && !descriptor.namespace.is_empty() => {
                let _ = write!(out, "{}.", descriptor.namespace);
            }
            None => {}
        }
    }

    fn write_arguments(&self, out: &mut String, id: DescriptorId) {
        let descriptor = &self.descriptors[id.0];
        let arguments: Vec<String> = match descriptor.kind {
            DescriptorKind::Instance { .. } => descriptor
                .type_arguments
                .iter()
                .map(|argument| self.render(argument, false))
                .collect(),
            DescriptorKind::Definition(_) => descriptor.parameter_names.clone(),
            DescriptorKind::Primitive(_) | DescriptorKind::Parameter(_) => return,
        };
        if !arguments.is_empty() {
            let _ = write!(out, "<{}>", arguments.join(", "));
        }
    }

    /// The namespace of the outermost enclosing type.
    pub fn root_namespace(&self, id: DescriptorId) -> &str {
        let mut descriptor = &self.descriptors[id.0];
        while let Some(declaring) = descriptor.declaring_type {
            descriptor = &self.descriptors[declaring.0];
        }
        &descriptor.namespace
    }

    /// A non-enum value type used by value. Unbound parameters are not.
    pub fn is_value_type(&self, usage: &TypeUsage) -> bool {
        if usage.is_array() || usage.is_pointer() {
            return false;
        }
        let descriptor = &self.descriptors[usage.descriptor.0];
        match descriptor.kind {
            DescriptorKind::Definition(_) | DescriptorKind::Instance { .. } => {
                descriptor.is_value_type && !descriptor.is_enum
            }
            DescriptorKind::Primitive(_) | DescriptorKind::Parameter(_) => false,
        }
    }

    /// Whether the usage names something other than a plain scalar: strings,
    /// arrays and any user defined type. Pointers classify as their pointee.
    pub fn is_custom_type(&self, usage: &TypeUsage) -> bool {
        if usage.is_array() {
            return true;
        }
        match self.descriptors[usage.descriptor.0].kind {
            DescriptorKind::Primitive(kind) => kind == Il2CppTypeEnum::String,
            DescriptorKind::Definition(_) | DescriptorKind::Instance { .. } => true,
            DescriptorKind::Parameter(_) => false,
        }
    }
}
