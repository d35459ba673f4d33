//! Builds C struct layouts for the types of a Unity IL2CPP application.
//!
//! The input is the application's table set ([`Metadata`]), as dumped by a
//! binary parser. [`StructIndex::build`] resolves every type definition and
//! every generic instantiation referenced by the type table into a
//! [`StructRecord`](index::StructRecord) with field types, offsets, virtual
//! methods, static method call sites and runtime generic context entries.
//! [`output::project`] turns the result into the serializable document.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use il2cpp_structs::{output, IndexOptions, Metadata, StructIndex};
//!
//! let metadata = Metadata::from_json(std::fs::File::open("tables.json")?)?;
//! let index = StructIndex::build(&metadata, &IndexOptions::default())?;
//! let document = output::project(&index);
//! println!("{}", serde_json::to_string_pretty(&document)?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod identifier;
pub mod index;
pub mod offsets;
pub mod output;
pub mod resolver;
pub mod translator;

#[cfg(test)]
mod test_utils;

pub use error::{Result, StructIndexError};
pub use il2cpp_metadata::{Metadata, MetadataParseError, MetadataVersion};
pub use index::{IndexOptions, StructIndex};
