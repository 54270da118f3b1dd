//! Atom Keys
//!
//! A key is the identity of an atom inside a store. Two atom values with an
//! equal key address the same cell.
//!
//! Keys come from one of two places:
//!
//! - The atom's Rust type plus a hash of its value. A type with fields is a
//!   family: `TodoById(1)` and `TodoById(2)` are distinct cells sharing one
//!   definition.
//! - A caller supplied name via [`AtomKey::named`].

use std::any::{type_name, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Namespace {
    Type(TypeId),
    Named,
}

/// Stable identifier of one atom instance.
#[derive(Clone, Copy)]
pub struct AtomKey {
    namespace: Namespace,
    fingerprint: u64,
    label: &'static str,
}

impl AtomKey {
    /// Key derived from the atom's type and the hash of its value.
    pub fn of<T>(atom: &T) -> Self
    where
        T: Hash + 'static,
    {
        Self {
            namespace: Namespace::Type(TypeId::of::<T>()),
            fingerprint: fingerprint(atom),
            label: type_name::<T>(),
        }
    }

    /// Key from an explicit identifier, independent of the atom's type.
    pub fn named(id: &'static str) -> Self {
        Self {
            namespace: Namespace::Named,
            fingerprint: fingerprint(id),
            label: id,
        }
    }

    /// Whether the key was supplied by the caller rather than derived.
    pub fn is_named(&self) -> bool {
        self.namespace == Namespace::Named
    }

    /// Type name or explicit identifier, for diagnostics.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// The hashed parameter part of the key.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

fn fingerprint<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl PartialEq for AtomKey {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.fingerprint == other.fingerprint
    }
}

impl Eq for AtomKey {}

impl Hash for AtomKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.fingerprint.hash(state);
    }
}

impl fmt::Debug for AtomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomKey({self})")
    }
}

impl fmt::Display for AtomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            Namespace::Named => write!(f, "\"{}\"", self.label),
            Namespace::Type(_) => {
                // Strip the module path but keep generic arguments readable.
                let head = self.label.split('<').next().unwrap_or(self.label);
                let short = head.rsplit("::").next().unwrap_or(head);
                write!(f, "{short}#{:08x}", self.fingerprint as u32)
            }
        }
    }
}
