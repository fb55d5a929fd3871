// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Extensions and their per-program interning.
//!
//! An [`Extension`] contributes operations, object tables and interpreter-scoped state. Compiled
//! programs never store extension names in the instruction stream; instead every program keeps an
//! [`ExtensionTable`] that assigns each referenced extension a small index in first-reference
//! order, and the stream stores `baseline + index` in a single byte.
//!
//! Which extensions exist at all is configuration: an [`ExtensionRegistry`] is passed explicitly
//! to program decoding and interpreter construction.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use hashbrown::HashMap;

use crate::object::{ObjectClass, ObjectDef};
use crate::operation::Operation;
use crate::program::BlockId;

/// A per-program extension index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtIndex(pub u32);

/// A pluggable unit contributing operations, objects and interpreter state.
///
/// Extensions are identified by [`Extension::name`]; two extensions with the same name are the
/// same extension as far as interning and container decoding are concerned.
pub trait Extension: Send + Sync {
    /// Stable extension name (e.g. `"fileinto"`).
    fn name(&self) -> &str;

    /// Operations contributed by this extension, addressed by their position in the slice.
    fn operations(&self) -> &[&'static dyn Operation] {
        &[]
    }

    /// Objects contributed to `class`, addressed by their position in the slice.
    fn objects(&self, class: ObjectClass) -> &[&'static dyn ObjectDef] {
        let _ = class;
        &[]
    }

    /// Called once when an interpreter that may run this extension's operations is created.
    ///
    /// `index` is the slot the extension's context lives in.
    fn interpreter_load(&self, index: ExtIndex, contexts: &mut ExtensionContexts) {
        let _ = (index, contexts);
    }
}

#[derive(Clone)]
struct ExtensionEntry {
    ext: Arc<dyn Extension>,
    block: Option<BlockId>,
}

/// Per-program mapping from extension to compact index.
///
/// Indices are assigned in first-registration order and never change; registering the same
/// extension again returns its existing index.
#[derive(Clone, Default)]
pub struct ExtensionTable {
    entries: Vec<ExtensionEntry>,
    by_name: HashMap<String, ExtIndex>,
}

impl ExtensionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `ext`, assigning the next free one on first use.
    pub fn register(&mut self, ext: &Arc<dyn Extension>) -> ExtIndex {
        if let Some(&index) = self.by_name.get(ext.name()) {
            return index;
        }
        let index = ExtIndex(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        self.entries.push(ExtensionEntry {
            ext: Arc::clone(ext),
            block: None,
        });
        self.by_name.insert(String::from(ext.name()), index);
        tracing::trace!(name = ext.name(), index = index.0, "extension registered");
        index
    }

    /// Looks up an extension by index.
    #[must_use]
    pub fn get(&self, index: ExtIndex) -> Option<&Arc<dyn Extension>> {
        self.entries.get(index.0 as usize).map(|e| &e.ext)
    }

    /// Looks up the index of a registered extension by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<ExtIndex> {
        self.by_name.get(name).copied()
    }

    /// Returns the private block of the extension at `index`, if it has one.
    #[must_use]
    pub fn block(&self, index: ExtIndex) -> Option<BlockId> {
        self.entries.get(index.0 as usize).and_then(|e| e.block)
    }

    pub(crate) fn set_block(&mut self, index: ExtIndex, block: BlockId) {
        if let Some(e) = self.entries.get_mut(index.0 as usize) {
            e.block = Some(block);
        }
    }

    /// Number of registered extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no extension has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(index, extension)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ExtIndex, &Arc<dyn Extension>)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (ExtIndex(u32::try_from(i).unwrap_or(u32::MAX)), &e.ext))
    }
}

impl PartialEq for ExtensionTable {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.ext.name() == b.ext.name() && a.block == b.block)
    }
}

impl Eq for ExtensionTable {}

impl fmt::Debug for ExtensionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.ext.name(), e.block)))
            .finish()
    }
}

/// Errors when configuring an [`ExtensionRegistry`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// An extension with the same name was already registered.
    DuplicateExtension {
        /// The duplicated name.
        name: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateExtension { name } => {
                write!(f, "extension '{name}' is already registered")
            }
        }
    }
}

impl core::error::Error for RegistryError {}

/// The set of extensions known to an embedder.
///
/// # Example
/// ```
/// extern crate alloc;
///
/// use alloc::sync::Arc;
///
/// use sieve_tape::extension::{Extension, ExtensionRegistry};
///
/// struct Vacation;
///
/// impl Extension for Vacation {
///     fn name(&self) -> &str {
///         "vacation"
///     }
/// }
///
/// let mut registry = ExtensionRegistry::new();
/// registry.register(Arc::new(Vacation)).unwrap();
/// assert!(registry.get("vacation").is_some());
/// assert!(registry.register(Arc::new(Vacation)).is_err());
/// ```
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    by_name: BTreeMap<String, Arc<dyn Extension>>,
    preloaded: Vec<Arc<dyn Extension>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `ext` resolvable by name.
    pub fn register(&mut self, ext: Arc<dyn Extension>) -> Result<(), RegistryError> {
        let name = String::from(ext.name());
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateExtension { name });
        }
        self.by_name.insert(name, ext);
        Ok(())
    }

    /// Registers `ext` and loads it into every interpreter, whether or not a program uses it.
    pub fn preload(&mut self, ext: Arc<dyn Extension>) -> Result<(), RegistryError> {
        self.register(Arc::clone(&ext))?;
        self.preloaded.push(ext);
        Ok(())
    }

    /// Looks up an extension by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Extension>> {
        self.by_name.get(name)
    }

    /// Preloaded extensions, in preload order.
    pub fn preloaded(&self) -> impl Iterator<Item = &Arc<dyn Extension>> + '_ {
        self.preloaded.iter()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.by_name.keys().collect::<Vec<_>>())
            .field(
                "preloaded",
                &self.preloaded.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Interpreter-owned extension state, one optional slot per extension index.
///
/// Reading a slot that was never set, or that lies past the end, yields `None`.
#[derive(Default)]
pub struct ExtensionContexts {
    slots: Vec<Option<Box<dyn Any>>>,
}

impl ExtensionContexts {
    /// Creates an empty slot array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `context` in slot `index`, replacing any previous value.
    pub fn set(&mut self, index: ExtIndex, context: Box<dyn Any>) {
        let ix = index.0 as usize;
        if self.slots.len() <= ix {
            self.slots.resize_with(ix + 1, || None);
        }
        self.slots[ix] = Some(context);
    }

    /// Empties slot `index`, returning its previous value.
    pub fn clear(&mut self, index: ExtIndex) -> Option<Box<dyn Any>> {
        self.slots.get_mut(index.0 as usize)?.take()
    }

    /// Returns the context in slot `index`.
    #[must_use]
    pub fn get(&self, index: ExtIndex) -> Option<&dyn Any> {
        self.slots.get(index.0 as usize)?.as_deref()
    }

    /// Returns the context in slot `index` if it has type `T`.
    #[must_use]
    pub fn get_as<T: Any>(&self, index: ExtIndex) -> Option<&T> {
        self.get(index)?.downcast_ref()
    }

    /// Returns the context in slot `index` mutably if it has type `T`.
    pub fn get_as_mut<T: Any>(&mut self, index: ExtIndex) -> Option<&mut T> {
        self.slots.get_mut(index.0 as usize)?.as_deref_mut()?.downcast_mut()
    }

    /// Number of slots currently allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no slot has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for ExtensionContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(Option::is_some))
            .finish()
    }
}
