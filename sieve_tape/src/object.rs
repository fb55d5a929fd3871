// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Polymorphic object tables (comparators, match types, address parts, side effects).
//!
//! An object reference is encoded like an operation reference: one extension byte whose baseline
//! is the size of the class's core table (bytes below it select a core object directly), followed
//! by a selector byte only when the extension's table for that class has more than one member.

use core::fmt;

use crate::extension::ExtIndex;

/// The kind of object a table holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    /// String comparators (`i;octet`, ...).
    Comparator,
    /// Match types (`is`, `contains`, ...).
    MatchType,
    /// Address parts (`all`, `localpart`, ...).
    AddressPart,
    /// Action side effects. There are no core side effects.
    SideEffect,
}

impl ObjectClass {
    /// Objects built into the core for this class.
    #[must_use]
    pub fn core_objects(self) -> &'static [&'static dyn ObjectDef] {
        match self {
            Self::Comparator => &CORE_COMPARATORS,
            Self::MatchType => &CORE_MATCH_TYPES,
            Self::AddressPart => &CORE_ADDRESS_PARTS,
            Self::SideEffect => &[],
        }
    }

    /// The extension-byte baseline for references of this class.
    #[must_use]
    pub fn baseline(self) -> u8 {
        // Core tables are tiny fixed arrays.
        self.core_objects().len() as u8
    }

    /// Lower-case class name used in dumps.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Comparator => "comparator",
            Self::MatchType => "match type",
            Self::AddressPart => "address part",
            Self::SideEffect => "side effect",
        }
    }
}

/// A member of an object table.
pub trait ObjectDef: Sync {
    /// The object's identifier as written in scripts (e.g. `"i;ascii-casemap"`).
    fn identifier(&self) -> &str;
}

/// A built-in object.
#[derive(Debug)]
pub struct CoreObject {
    /// Identifier as written in scripts.
    pub identifier: &'static str,
}

impl ObjectDef for CoreObject {
    fn identifier(&self) -> &str {
        self.identifier
    }
}

/// `i;octet` comparator (code 0).
pub static COMPARATOR_OCTET: CoreObject = CoreObject {
    identifier: "i;octet",
};
/// `i;ascii-casemap` comparator (code 1).
pub static COMPARATOR_ASCII_CASEMAP: CoreObject = CoreObject {
    identifier: "i;ascii-casemap",
};
/// `is` match type (code 0).
pub static MATCH_IS: CoreObject = CoreObject { identifier: "is" };
/// `contains` match type (code 1).
pub static MATCH_CONTAINS: CoreObject = CoreObject {
    identifier: "contains",
};
/// `matches` match type (code 2).
pub static MATCH_MATCHES: CoreObject = CoreObject {
    identifier: "matches",
};
/// `all` address part (code 0).
pub static ADDRESS_ALL: CoreObject = CoreObject { identifier: "all" };
/// `localpart` address part (code 1).
pub static ADDRESS_LOCALPART: CoreObject = CoreObject {
    identifier: "localpart",
};
/// `domain` address part (code 2).
pub static ADDRESS_DOMAIN: CoreObject = CoreObject {
    identifier: "domain",
};

static CORE_COMPARATORS: [&dyn ObjectDef; 2] = [&COMPARATOR_OCTET, &COMPARATOR_ASCII_CASEMAP];
static CORE_MATCH_TYPES: [&dyn ObjectDef; 3] = [&MATCH_IS, &MATCH_CONTAINS, &MATCH_MATCHES];
static CORE_ADDRESS_PARTS: [&dyn ObjectDef; 3] = [&ADDRESS_ALL, &ADDRESS_LOCALPART, &ADDRESS_DOMAIN];

/// A decoded object reference.
#[derive(Copy, Clone)]
pub struct ObjectRef<'p> {
    /// Contributing extension, or `None` for core objects.
    pub extension: Option<ExtIndex>,
    /// Position of the object in its table.
    pub code: u8,
    /// The object itself.
    pub def: &'p dyn ObjectDef,
}

impl fmt::Debug for ObjectRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("extension", &self.extension)
            .field("code", &self.code)
            .field("identifier", &self.def.identifier())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_tables_are_stable() {
        let ids = |class: ObjectClass| {
            class
                .core_objects()
                .iter()
                .map(|o| o.identifier())
                .collect::<alloc::vec::Vec<_>>()
        };
        assert_eq!(ids(ObjectClass::Comparator), ["i;octet", "i;ascii-casemap"]);
        assert_eq!(ids(ObjectClass::MatchType), ["is", "contains", "matches"]);
        assert_eq!(ids(ObjectClass::AddressPart), ["all", "localpart", "domain"]);
        assert!(ids(ObjectClass::SideEffect).is_empty());
    }

    #[test]
    fn baseline_is_core_table_len() {
        assert_eq!(ObjectClass::Comparator.baseline(), 2);
        assert_eq!(ObjectClass::MatchType.baseline(), 3);
        assert_eq!(ObjectClass::SideEffect.baseline(), 0);
    }
}
