use il2cpp_metadata::runtime_metadata::{Il2CppRGCTXDataType, Il2CppTypeEnum};
use il2cpp_metadata::MetadataIndex;
use thiserror::Error;

/// Why a struct index build failed. A build never produces a partial result.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StructIndexError {
    #[error("{table} index {index} does not resolve to a record")]
    IndexOutOfRange { table: &'static str, index: u32 },

    #[error("{table} handle {handle:#x} does not translate to a record")]
    BadHandle { table: &'static str, handle: u64 },

    #[error("type {type_index} has kind {kind:?} but carries mismatched data")]
    MismatchedTypeData {
        type_index: u32,
        kind: Il2CppTypeEnum,
    },

    #[error("no code gen module is registered for image {0}")]
    MissingCodeGenModule(String),

    #[error("generic class {0} instantiates a definition no image owns")]
    UnownedDefinition(u32),

    #[error("unsupported type kind {0:?}")]
    UnsupportedTypeKind(Il2CppTypeEnum),

    #[error("unsupported rgctx kind {0:?}")]
    UnsupportedRgctxKind(Il2CppRGCTXDataType),

    #[error("expansion of {table} record {index} refers back to itself")]
    NonTerminatingExpansion { table: &'static str, index: u32 },

    #[error("type {index} nests more than {limit} levels deep")]
    ExpansionTooDeep { index: u32, limit: usize },
}

pub type Result<T, E = StructIndexError> = std::result::Result<T, E>;

/// Builds the corrupt-metadata error for a record that is not in `table`.
pub(crate) fn out_of_range<T>(table: &'static str, index: MetadataIndex<T>) -> StructIndexError {
    StructIndexError::IndexOutOfRange {
        table,
        index: index.raw(),
    }
}
