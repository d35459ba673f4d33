//! Tables read from the game binary.
//!
//! Pointers between runtime structures are resolved by the parser into
//! indices of the tables below.

use serde::{Deserialize, Serialize};

use crate::global_metadata::{
    GenericParameterIndex, MethodIndex, Token, TypeDefinitionIndex,
};
use crate::{MetadataIndex, MetadataTable};

pub type TypeIndex = MetadataIndex<Il2CppType>;
pub type GenericClassIndex = MetadataIndex<Il2CppGenericClass>;
pub type GenericInstIndex = MetadataIndex<Il2CppGenericInst>;
pub type ArrayTypeIndex = MetadataIndex<Il2CppArrayType>;
pub type MethodSpecIndex = MetadataIndex<Il2CppMethodSpec>;

/// Field attribute: the field belongs to the type, not to instances.
pub const FIELD_ATTRIBUTE_STATIC: u16 = 0x0010;
/// Field attribute: the field is a compile time constant.
pub const FIELD_ATTRIBUTE_LITERAL: u16 = 0x0040;

/// Defined at `il2cpp-class-internals:550`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Il2CppRange {
    pub start: u32,
    pub length: u32,
}

/// Defined at `il2cpp-class-internals:556`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Il2CppTokenRangePair {
    pub token: Token,
    pub range: Il2CppRange,
}

/// Defined at `il2cpp-metadata.h:69`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Il2CppRGCTXDataType {
    Invalid,
    Type,
    Class,
    Method,
    Array,
    Constrained,
}

/// A runtime generic context.
///
/// Defined at `il2cpp-metadata.h:92`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Il2CppRGCTXDefinition {
    pub ty: Il2CppRGCTXDataType,
    /// A type index for [`Il2CppRGCTXDataType::Type`] and
    /// [`Il2CppRGCTXDataType::Class`], a method spec index for
    /// [`Il2CppRGCTXDataType::Method`].
    pub data: u32,
}

impl Il2CppRGCTXDefinition {
    pub fn type_index(&self) -> TypeIndex {
        TypeIndex::new(self.data)
    }

    pub fn method_spec_index(&self) -> MethodSpecIndex {
        MethodSpecIndex::new(self.data)
    }
}

/// Defined at `il2cpp-runtime-metadata.h:11`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Il2CppArrayType {
    pub elem_ty: TypeIndex,
    pub rank: u8,
}

/// Defined at `il2cpp-class-internals:582`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppCodeGenModule {
    /// Module names have `.dll` at the end
    pub name: String,
    pub rgctx_ranges: Vec<Il2CppTokenRangePair>,
    pub rgctxs: MetadataTable<Il2CppRGCTXDefinition>,
}

/// Defined at `il2cpp-class-internals:603`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppCodeRegistration {
    pub code_gen_modules: Vec<Il2CppCodeGenModule>,
}

/// Corresponds to element type signatures.
/// See ECMA-335, II.23.1.16
///
/// Defined at `il2cpp-blob.h:6`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Il2CppTypeEnum {
    /// End of list
    End,
    /// System.Void (void)
    Void,
    /// System.Boolean (bool)
    Boolean,
    /// System.Char (char)
    Char,
    /// System.SByte (sbyte)
    I1,
    /// System.Byte (byte)
    U1,
    /// System.Int16 (short)
    I2,
    /// System.UInt16 (ushort)
    U2,
    /// System.Int32 (int)
    I4,
    /// System.UInt32 (uint)
    U4,
    /// System.Int64 (long)
    I8,
    /// System.UInt64 (ulong)
    U8,
    /// System.Single (float)
    R4,
    /// System.Double (double)
    R8,
    /// System.String (string)
    String,
    Ptr,
    Byref,
    Valuetype,
    Class,
    /// Class generic parameter
    Var,
    Array,
    Genericinst,
    /// System.TypedReference
    Typedbyref,
    /// System.IntPtr
    I,
    /// System.UIntPtr
    U,
    Fnptr,
    /// System.Object (object)
    Object,
    /// Single-dimensioned zero-based array type
    Szarray,
    /// Method generic parameter
    Mvar,
    /// Required modifier
    CmodReqd,
    /// Optional modifier
    CmodOpt,
    Internal,
    Modifier,
    /// Sentinel for vararg method signature
    Sentinel,
    /// Denotes a local variable points to a pinned object
    Pinned,
    /// Used in custom attributes to specify an enum
    Enum,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum TypeData {
    /// Primitive types carry no data
    #[default]
    None,
    /// For [`Il2CppTypeEnum::Class`] and [`Il2CppTypeEnum::Valuetype`]
    TypeDefinitionIndex(TypeDefinitionIndex),
    /// The in-memory address of the type definition, used from version 27
    TypeDefinitionHandle(u64),
    /// For [`Il2CppTypeEnum::Ptr`] and [`Il2CppTypeEnum::Szarray`]
    TypeIndex(TypeIndex),
    /// For [`Il2CppTypeEnum::Var`] and [`Il2CppTypeEnum::Mvar`]
    GenericParameterIndex(GenericParameterIndex),
    /// The in-memory address of the generic parameter, used from version 27
    GenericParameterHandle(u64),
    /// For [`Il2CppTypeEnum::Genericinst`]
    GenericClassIndex(GenericClassIndex),
    /// For [`Il2CppTypeEnum::Array`]
    ArrayType(ArrayTypeIndex),
}

/// Defined at `il2cpp-runtime-metadata.h:48`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Il2CppType {
    #[serde(default)]
    pub data: TypeData,
    /// Param attributes or field flags. See `il2cpp-tabledef.h`
    #[serde(default)]
    pub attrs: u16,
    pub ty: Il2CppTypeEnum,
    #[serde(default)]
    pub byref: bool,
    /// valid when included in a local var signature
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub valuetype: bool,
}

impl Il2CppType {
    pub fn is_static(&self) -> bool {
        self.attrs & FIELD_ATTRIBUTE_STATIC != 0
    }

    pub fn is_literal(&self) -> bool {
        self.attrs & FIELD_ATTRIBUTE_LITERAL != 0
    }
}

/// A generic class instantiation.
///
/// Defined at `il2cpp-runtime-metadata.h:40`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppGenericClass {
    /// The generic type definition, before version 27.
    pub type_definition_index: TypeDefinitionIndex,

    /// The generic type definition's type, from version 27.
    pub type_index: TypeIndex,

    /// A context that contains the type instantiation doesn't contain any method instantiation.
    pub context: Il2CppGenericContext,
}

/// Defined at `il2cpp-runtime-metadata.h:27`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppGenericContext {
    pub class_inst_index: GenericInstIndex,
    pub method_inst_index: GenericInstIndex,
}

/// A generic method instantiation.
///
/// Defined at `il2cpp-metadata.h:67`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Il2CppMethodSpec {
    /// The method definition.
    pub method_definition_index: MethodIndex,

    /// The class generic argument list (if class is generic).
    #[serde(default)]
    pub class_inst_index: GenericInstIndex,

    /// The method generic argument list (if method is generic).
    #[serde(default)]
    pub method_inst_index: GenericInstIndex,
}

/// A list of types used for a generic instantiation.
///
/// Defined at `il2cpp-runtime-metadata.h:21`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Il2CppGenericInst {
    pub types: Vec<TypeIndex>,
}

/// Compiler calculated field offsets. Their shape depends on the revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldOffsets {
    /// One offset per field definition, up to version 21.
    ByField(Vec<i32>),
    /// One list per type definition, indexed by the field's ordinal.
    ByType(Vec<Vec<i32>>),
}

/// Defined at `il2cpp-class-internals.h:622`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Il2CppMetadataRegistration {
    pub generic_classes: MetadataTable<Il2CppGenericClass>,
    pub generic_insts: MetadataTable<Il2CppGenericInst>,
    pub types: MetadataTable<Il2CppType>,
    /// This is not a real field in the metadata. It is here to provide the
    /// ability to access array types by index instead of by pointer.
    pub array_types: MetadataTable<Il2CppArrayType>,
    pub method_specs: MetadataTable<Il2CppMethodSpec>,
    /// Compiler calculated field offset values. Since this is platform
    /// dependent, it cannot be read from C++ sources.
    pub field_offsets: Option<FieldOffsets>,
    /// Virtual addresses of metadata usage sites, only present between
    /// versions 16 and 27.
    pub metadata_usages: Vec<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeMetadata {
    pub code_registration: Il2CppCodeRegistration,
    pub metadata_registration: Il2CppMetadataRegistration,
    /// Base address that addresses are made relative to.
    pub image_base: u64,
    pub is_32bit: bool,
}
