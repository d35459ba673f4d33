//! The emitted document. Empty lists and absent values are left out.

use serde::{Deserialize, Serialize};

use crate::index::{FieldRecord, MethodRgctx, RgctxRecord, StaticMethod, StructIndex, StructRecord};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StructField {
    pub field_type_name: String,
    pub field_name: String,
    pub is_value_type: bool,
    pub is_custom_type: bool,
    pub offset: i32,
    pub indirection: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StructStaticMethod {
    pub address: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_args: Option<String>,
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StructVTableMethod {
    pub method_name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgctxKind {
    Type,
    Class,
    Method,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StructRgctx {
    #[serde(rename = "Type")]
    pub kind: RgctxKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StructMethodRgctx {
    pub method_name: String,
    #[serde(rename = "RGCTXs")]
    pub rgctxs: Vec<StructRgctx>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StructInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    pub namespace: String,
    pub type_name: String,
    pub is_value_type: bool,
    pub is_generic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<StructField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_fields: Vec<StructField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_methods: Vec<StructStaticMethod>,
    #[serde(rename = "VTableMethod", default, skip_serializing_if = "Vec::is_empty")]
    pub vtable_methods: Vec<StructVTableMethod>,
    #[serde(rename = "RGCTXs", default, skip_serializing_if = "Vec::is_empty")]
    pub rgctxs: Vec<StructRgctx>,
    #[serde(rename = "MethodRGCTXs", default, skip_serializing_if = "Vec::is_empty")]
    pub method_rgctxs: Vec<StructMethodRgctx>,
}

impl From<&FieldRecord> for StructField {
    fn from(field: &FieldRecord) -> Self {
        StructField {
            field_type_name: field.type_name.clone(),
            field_name: field.name.clone(),
            is_value_type: field.is_value_type,
            is_custom_type: field.is_custom_type,
            offset: field.offset,
            indirection: field.indirection,
        }
    }
}

impl From<&StaticMethod> for StructStaticMethod {
    fn from(method: &StaticMethod) -> Self {
        StructStaticMethod {
            address: method.address,
            type_args: method.type_args.clone(),
            name: method.name.clone(),
        }
    }
}

impl From<&RgctxRecord> for StructRgctx {
    fn from(rgctx: &RgctxRecord) -> Self {
        let (kind, name) = match rgctx {
            RgctxRecord::Type(name) => (RgctxKind::Type, name),
            RgctxRecord::Class(name) => (RgctxKind::Class, name),
            RgctxRecord::Method(name) => (RgctxKind::Method, name),
        };
        let name = Some(name.clone());
        StructRgctx {
            kind,
            type_name: name.clone().filter(|_| kind == RgctxKind::Type),
            class_name: name.clone().filter(|_| kind == RgctxKind::Class),
            method_name: name.filter(|_| kind == RgctxKind::Method),
        }
    }
}

impl From<&MethodRgctx> for StructMethodRgctx {
    fn from(method: &MethodRgctx) -> Self {
        StructMethodRgctx {
            method_name: method.method_name.clone(),
            rgctxs: method.rgctxs.iter().map(StructRgctx::from).collect(),
        }
    }
}

impl From<&StructRecord> for StructInfo {
    fn from(record: &StructRecord) -> Self {
        StructInfo {
            image_name: record.image_name.clone(),
            namespace: record.namespace.clone(),
            type_name: record.type_name.clone(),
            is_value_type: record.is_value_type,
            is_generic: record.is_generic,
            parent: record.parent.clone(),
            fields: record.fields.iter().map(StructField::from).collect(),
            static_fields: record.static_fields.iter().map(StructField::from).collect(),
            static_methods: record.static_methods.iter().map(StructStaticMethod::from).collect(),
            vtable_methods: record
                .vtable_methods
                .iter()
                .map(|name| StructVTableMethod {
                    method_name: name.clone(),
                })
                .collect(),
            rgctxs: record.rgctxs.iter().map(StructRgctx::from).collect(),
            method_rgctxs: record
                .method_rgctxs
                .iter()
                .map(StructMethodRgctx::from)
                .collect(),
        }
    }
}

/// The document for a finished index, in build order.
pub fn project(index: &StructIndex) -> Vec<StructInfo> {
    index.structs().iter().map(StructInfo::from).collect()
}
