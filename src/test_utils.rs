//! Builds small synthetic table sets for unit tests.

use il2cpp_metadata::global_metadata::{
    EncodedMethodIndex, FieldIndex, GlobalMetadata, Il2CppFieldDefinition,
    Il2CppGenericContainer, Il2CppGenericParameter, Il2CppImageDefinition,
    Il2CppMethodDefinition, Il2CppTypeDefinition, ImageIndex, MethodIndex, TypeDefinitionIndex,
};
use il2cpp_metadata::runtime_metadata::{
    GenericClassIndex, GenericInstIndex, Il2CppGenericClass, Il2CppGenericContext,
    Il2CppGenericInst, Il2CppMethodSpec, Il2CppType, Il2CppTypeEnum, MethodSpecIndex,
    RuntimeMetadata, TypeData, TypeIndex,
};
use il2cpp_metadata::{Metadata, MetadataIndex, MetadataVersion};

const TYPE_DEF_TOKEN: u32 = 0x0200_0000;
const METHOD_DEF_TOKEN: u32 = 0x0600_0000;

pub struct TableBuilder {
    pub version: MetadataVersion,
    pub global_metadata: GlobalMetadata,
    pub runtime_metadata: RuntimeMetadata,
    object: Option<TypeIndex>,
}

impl TableBuilder {
    pub fn new(version: MetadataVersion) -> Self {
        TableBuilder {
            version,
            global_metadata: GlobalMetadata::default(),
            runtime_metadata: RuntimeMetadata::default(),
            object: None,
        }
    }

    pub fn build(self) -> Metadata {
        Metadata {
            version: self.version,
            global_metadata: self.global_metadata,
            runtime_metadata: self.runtime_metadata,
        }
    }

    pub fn image(&mut self, name: &str) -> ImageIndex {
        let type_start = TypeDefinitionIndex::new(self.global_metadata.type_definitions.len() as u32);
        self.global_metadata.images.push(Il2CppImageDefinition {
            name: name.to_string(),
            type_start,
            ..Default::default()
        })
    }

    pub fn push_type(&mut self, ty: Il2CppTypeEnum, data: TypeData) -> TypeIndex {
        self.runtime_metadata.metadata_registration.types.push(Il2CppType {
            data,
            attrs: 0,
            ty,
            byref: false,
            pinned: false,
            valuetype: false,
        })
    }

    pub fn object_type(&mut self) -> TypeIndex {
        match self.object {
            Some(object) => object,
            None => {
                let object = self.push_type(Il2CppTypeEnum::Object, TypeData::None);
                self.object = Some(object);
                object
            }
        }
    }

    fn define(&mut self, image: ImageIndex, namespace: &str, name: &str, bitfield: u32) -> TypeDefinitionIndex {
        let images = &mut self.global_metadata.images;
        assert_eq!(image.index() + 1, images.len(), "types are added to the last image");
        images[image].type_count += 1;

        let defs = &mut self.global_metadata.type_definitions;
        let token = TYPE_DEF_TOKEN + defs.len() as u32 + 1;
        let def = defs.push(Il2CppTypeDefinition {
            name: name.to_string(),
            namespace: namespace.to_string(),
            bitfield,
            token,
            ..Default::default()
        });
        let kind = if bitfield & 1 != 0 {
            Il2CppTypeEnum::Valuetype
        } else {
            Il2CppTypeEnum::Class
        };
        let byval = self.push_type(kind, TypeData::TypeDefinitionIndex(def));
        self.global_metadata.type_definitions[def].byval_type_index = byval;
        def
    }

    /// A reference type deriving from `System.Object`.
    pub fn class(&mut self, image: ImageIndex, namespace: &str, name: &str) -> TypeDefinitionIndex {
        let def = self.define(image, namespace, name, 0);
        let object = self.object_type();
        self.global_metadata.type_definitions[def].parent_index = object;
        def
    }

    pub fn value_type(&mut self, image: ImageIndex, namespace: &str, name: &str) -> TypeDefinitionIndex {
        self.define(image, namespace, name, 1)
    }

    pub fn enum_type(
        &mut self,
        image: ImageIndex,
        namespace: &str,
        name: &str,
        underlying: Il2CppTypeEnum,
    ) -> TypeDefinitionIndex {
        let def = self.define(image, namespace, name, 0b11);
        let element = self.push_type(underlying, TypeData::None);
        self.global_metadata.type_definitions[def].element_type_index = element;
        def
    }

    /// Gives `owner` a generic container declaring `params`.
    pub fn generic_params(&mut self, owner: TypeDefinitionIndex, params: &[&str]) {
        let container_index = self.global_metadata.generic_containers.len() as u32;
        let start = MetadataIndex::new(self.global_metadata.generic_parameters.len() as u32);
        for (num, name) in params.iter().enumerate() {
            self.global_metadata.generic_parameters.push(Il2CppGenericParameter {
                owner_index: MetadataIndex::new(container_index),
                name: name.to_string(),
                num: num as u16,
                flags: 0,
            });
        }
        let container = self.global_metadata.generic_containers.push(Il2CppGenericContainer {
            owner_index: owner.raw(),
            type_argc: params.len() as u32,
            is_method: false,
            generic_parameter_start: start,
        });
        self.global_metadata.type_definitions[owner].generic_container_index = container;
    }

    /// Gives `method` a generic container declaring `params`.
    pub fn method_params(&mut self, method: MethodIndex, params: &[&str]) {
        let container_index = self.global_metadata.generic_containers.len() as u32;
        let start = MetadataIndex::new(self.global_metadata.generic_parameters.len() as u32);
        for (num, name) in params.iter().enumerate() {
            self.global_metadata.generic_parameters.push(Il2CppGenericParameter {
                owner_index: MetadataIndex::new(container_index),
                name: name.to_string(),
                num: num as u16,
                flags: 0,
            });
        }
        let container = self.global_metadata.generic_containers.push(Il2CppGenericContainer {
            owner_index: method.raw(),
            type_argc: params.len() as u32,
            is_method: true,
            generic_parameter_start: start,
        });
        self.global_metadata.methods[method].generic_container_index = container;
    }

    pub fn nest(&mut self, nested: TypeDefinitionIndex, declaring: TypeDefinitionIndex) {
        let declaring = self.definition_type(declaring);
        self.global_metadata.type_definitions[nested].declaring_type_index = declaring;
    }

    pub fn definition_type(&self, def: TypeDefinitionIndex) -> TypeIndex {
        self.global_metadata.type_definitions[def].byval_type_index
    }

    /// A `VAR` usage of the `ordinal`th parameter of `owner`.
    pub fn var(&mut self, owner: TypeDefinitionIndex, ordinal: u32) -> TypeIndex {
        let container = self.global_metadata.type_definitions[owner].generic_container_index;
        let start = self.global_metadata.generic_containers[container].generic_parameter_start;
        self.push_type(Il2CppTypeEnum::Var, TypeData::GenericParameterIndex(start.offset(ordinal)))
    }

    /// An `MVAR` usage of the `ordinal`th parameter of `method`.
    pub fn mvar(&mut self, method: MethodIndex, ordinal: u32) -> TypeIndex {
        let container = self.global_metadata.methods[method].generic_container_index;
        let start = self.global_metadata.generic_containers[container].generic_parameter_start;
        self.push_type(Il2CppTypeEnum::Mvar, TypeData::GenericParameterIndex(start.offset(ordinal)))
    }

    pub fn pointer_to(&mut self, pointee: TypeIndex) -> TypeIndex {
        self.push_type(Il2CppTypeEnum::Ptr, TypeData::TypeIndex(pointee))
    }

    pub fn array_of(&mut self, element: TypeIndex) -> TypeIndex {
        self.push_type(Il2CppTypeEnum::Szarray, TypeData::TypeIndex(element))
    }

    pub fn push_generic_inst(&mut self, types: &[TypeIndex]) -> GenericInstIndex {
        self.runtime_metadata
            .metadata_registration
            .generic_insts
            .push(Il2CppGenericInst {
                types: types.to_vec(),
            })
    }

    pub fn push_generic_class(&mut self, def: TypeDefinitionIndex, args: &[TypeIndex]) -> GenericClassIndex {
        let class_inst_index = if args.is_empty() {
            GenericInstIndex::none()
        } else {
            self.push_generic_inst(args)
        };
        let mut generic_class = Il2CppGenericClass {
            context: Il2CppGenericContext {
                class_inst_index,
                method_inst_index: GenericInstIndex::none(),
            },
            ..Default::default()
        };
        if self.version >= MetadataVersion::new(27, 0) {
            if def.is_valid() {
                generic_class.type_index = self.definition_type(def);
            }
        } else {
            generic_class.type_definition_index = def;
        }
        self.runtime_metadata
            .metadata_registration
            .generic_classes
            .push(generic_class)
    }

    /// A `GENERICINST` usage of `def` bound to `args`.
    pub fn generic_instance(&mut self, def: TypeDefinitionIndex, args: &[TypeIndex]) -> TypeIndex {
        let gc = self.push_generic_class(def, args);
        self.push_type(Il2CppTypeEnum::Genericinst, TypeData::GenericClassIndex(gc))
    }

    /// Appends a field to `owner`. Fields of one type must be added in one
    /// run.
    pub fn field(&mut self, owner: TypeDefinitionIndex, name: &str, ty: TypeIndex, attrs: u16) -> FieldIndex {
        let mut field_type = self.runtime_metadata.metadata_registration.types[ty];
        field_type.attrs = attrs;
        let type_index = self.runtime_metadata.metadata_registration.types.push(field_type);

        let field = self.global_metadata.fields.push(Il2CppFieldDefinition {
            name: name.to_string(),
            type_index,
            token: 0x0400_0000 + self.global_metadata.fields.len() as u32 + 1,
        });
        let def = &mut self.global_metadata.type_definitions[owner];
        if def.field_count == 0 {
            def.field_start = field;
        }
        assert_eq!(def.field_start.offset(def.field_count as u32), field);
        def.field_count += 1;
        field
    }

    pub fn method(&mut self, owner: TypeDefinitionIndex, name: &str, slot: u16) -> MethodIndex {
        let token = METHOD_DEF_TOKEN + self.global_metadata.methods.len() as u32 + 1;
        self.global_metadata.methods.push(Il2CppMethodDefinition {
            name: name.to_string(),
            declaring_type: owner,
            token,
            slot,
            ..Default::default()
        })
    }

    pub fn vtable(&mut self, owner: TypeDefinitionIndex, entries: &[EncodedMethodIndex]) {
        let start = MetadataIndex::new(self.global_metadata.vtable_methods.len() as u32);
        for entry in entries {
            self.global_metadata.vtable_methods.push(*entry);
        }
        let def = &mut self.global_metadata.type_definitions[owner];
        def.vtable_start = start;
        def.vtable_count = entries.len() as u16;
    }

    pub fn push_method_spec(
        &mut self,
        method: MethodIndex,
        class_inst_index: GenericInstIndex,
        method_inst_index: GenericInstIndex,
    ) -> MethodSpecIndex {
        self.runtime_metadata
            .metadata_registration
            .method_specs
            .push(Il2CppMethodSpec {
                method_definition_index: method,
                class_inst_index,
                method_inst_index,
            })
    }
}
