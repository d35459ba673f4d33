//! The table set describing a Unity IL2CPP application, as handed over by a
//! binary parser.
//!
//! The documentation contains many references to C/C++ header source files.
//! You can find these files in a Unity install at the following path:
//! `UnityEditor/2021.3.16f1/Editor/Data/il2cpp/libil2cpp`
//!
//! Tables are kept close to their in-binary layout. Optional indices keep the
//! binary's "no value" encoding (`-1` / `0xFFFFFFFF`) and are only ever
//! interpreted through [`MetadataIndex::valid`].

pub mod global_metadata;
pub mod runtime_metadata;
mod version;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use global_metadata::GlobalMetadata;
use runtime_metadata::RuntimeMetadata;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use version::MetadataVersion;

const SENTINEL: u32 = u32::MAX;

/// A typed index into a [`MetadataTable<T>`].
///
/// The raw value `0xFFFFFFFF` (`-1` in the serialized form) marks an absent
/// reference. Equality and hashing are on the raw index only, so two indices
/// compare equal exactly when they point at the same record.
pub struct MetadataIndex<T> {
    idx: u32,
    _phantom: PhantomData<*mut T>, // invariant
}

impl<T> MetadataIndex<T> {
    pub const fn new(idx: u32) -> Self {
        Self {
            idx,
            _phantom: PhantomData,
        }
    }

    /// The "no value" marker.
    pub const fn none() -> Self {
        Self::new(SENTINEL)
    }

    pub fn is_valid(self) -> bool {
        self.idx != SENTINEL
    }

    /// `None` for the sentinel, the index itself otherwise.
    pub fn valid(self) -> Option<Self> {
        self.is_valid().then_some(self)
    }

    pub fn raw(self) -> u32 {
        self.idx
    }

    pub fn index(self) -> usize {
        self.idx as usize
    }

    /// The index `n` records further into the same table.
    pub fn offset(self, n: u32) -> Self {
        Self::new(self.idx.wrapping_add(n))
    }
}

impl<T> Clone for MetadataIndex<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MetadataIndex<T> {}

impl<T> PartialEq for MetadataIndex<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<T> Eq for MetadataIndex<T> {}

impl<T> PartialOrd for MetadataIndex<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for MetadataIndex<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.idx.cmp(&other.idx)
    }
}

impl<T> Hash for MetadataIndex<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.idx.hash(state)
    }
}

impl<T> Default for MetadataIndex<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> fmt::Debug for MetadataIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.idx)
        } else {
            f.write_str("#none")
        }
    }
}

impl<T> fmt::Display for MetadataIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.idx)
        } else {
            f.write_str("-1")
        }
    }
}

impl<T> Serialize for MetadataIndex<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_valid() {
            serializer.serialize_i64(self.idx as i64)
        } else {
            serializer.serialize_i64(-1)
        }
    }
}

impl<'de, T> Deserialize<'de> for MetadataIndex<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        match raw {
            -1 => Ok(Self::none()),
            0..=0xFFFF_FFFF => Ok(Self::new(raw as u32)),
            _ => Err(serde::de::Error::custom(format!(
                "metadata index {} is neither -1 nor a 32-bit index",
                raw
            ))),
        }
    }
}

/// A table of metadata records addressed by [`MetadataIndex<T>`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataTable<T> {
    table: Vec<T>,
}

impl<T> Default for MetadataTable<T> {
    fn default() -> Self {
        Self { table: Vec::new() }
    }
}

impl<T> From<Vec<T>> for MetadataTable<T> {
    fn from(table: Vec<T>) -> Self {
        Self { table }
    }
}

impl<T> Index<MetadataIndex<T>> for MetadataTable<T> {
    type Output = T;

    fn index(&self, index: MetadataIndex<T>) -> &Self::Output {
        &self.table[index.index()]
    }
}

impl<T> IndexMut<MetadataIndex<T>> for MetadataTable<T> {
    fn index_mut(&mut self, index: MetadataIndex<T>) -> &mut Self::Output {
        &mut self.table[index.index()]
    }
}

impl<T> MetadataTable<T> {
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.table.iter()
    }

    /// Appends a record and returns its index.
    pub fn push(&mut self, record: T) -> MetadataIndex<T> {
        self.table.push(record);
        MetadataIndex::new(self.table.len() as u32 - 1)
    }

    /// Iterates the records together with the index addressing each one.
    pub fn enumerate(&self) -> impl Iterator<Item = (MetadataIndex<T>, &T)> {
        self.table
            .iter()
            .enumerate()
            .map(|(i, record)| (MetadataIndex::new(i as u32), record))
    }

    /// `None` for the sentinel and for indices past the end of the table.
    pub fn get(&self, index: MetadataIndex<T>) -> Option<&T> {
        index.valid().and_then(|idx| self.table.get(idx.index()))
    }

    /// The `count` records starting at `start`.
    ///
    /// An empty range is always valid, even with a sentinel start, since the
    /// binary stores `-1` there for types with no records.
    pub fn slice(&self, start: MetadataIndex<T>, count: u32) -> Option<&[T]> {
        if count == 0 {
            return Some(&[]);
        }
        let start = start.valid()?.index();
        let end = start.checked_add(count as usize)?;
        self.table.get(start..end)
    }
}

/// A container for all of the application's metadata structures.
///
/// A Unity IL2CPP application stores metadata in two different ways, the
/// global metadata and the runtime metadata.
///
/// The global metadata is generally the `global-metadata.dat` file in the
/// application. See [`GlobalMetadata`] for more information.
///
/// The runtime metadata is stored inside the game binary itself. This is
/// generally the `libil2cpp.so` file in the application. See
/// [`RuntimeMetadata`] for more information.
#[derive(Debug, Serialize, Deserialize)]
pub struct Metadata {
    /// The format revision both halves were written with.
    pub version: MetadataVersion,

    /// The application's global metadata.
    ///
    /// See [`GlobalMetadata`] for more information.
    pub global_metadata: GlobalMetadata,

    /// The application's runtime metadata.
    ///
    /// See [`RuntimeMetadata`] for more information.
    pub runtime_metadata: RuntimeMetadata,
}

#[derive(Error, Debug)]
pub enum MetadataParseError {
    #[error("could not parse metadata tables from json")]
    Json(#[from] serde_json::Error),

    #[error("could not parse metadata table cache")]
    Bincode(#[from] bincode::Error),

    #[error("il2cpp metadata version check failed, found {0}")]
    VersionCheck(MetadataVersion),
}

impl Metadata {
    pub fn from_json<R: Read>(reader: R) -> Result<Self, MetadataParseError> {
        let metadata: Metadata = serde_json::from_reader(reader)?;
        metadata.check_version()
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, MetadataParseError> {
        let metadata: Metadata = serde_json::from_value(value)?;
        metadata.check_version()
    }

    pub fn from_bincode<R: Read>(reader: R) -> Result<Self, MetadataParseError> {
        let metadata: Metadata = bincode::deserialize_from(reader)?;
        metadata.check_version()
    }

    pub fn write_bincode<W: Write>(&self, writer: W) -> Result<(), MetadataParseError> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    fn check_version(self) -> Result<Self, MetadataParseError> {
        if !(MetadataVersion::MIN..=MetadataVersion::MAX).contains(&self.version) {
            return Err(MetadataParseError::VersionCheck(self.version));
        }
        Ok(self)
    }
}
