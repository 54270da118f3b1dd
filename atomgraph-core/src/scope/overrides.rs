//! Override Tables
//!
//! Each scope keeps its own table of substitute producers, keyed either by
//! a single atom key or by an atom type. Entries are stored type-erased and
//! recovered with the caller's `(A, K)` pair, so a lookup can only ever
//! return a producer with the right signature.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::atom::{Atom, AtomKey};
use crate::context::Context;

/// A substitute producer for atoms of type `A`.
pub(crate) type OverrideFn<A, K> =
    Arc<dyn Fn(&A, &Context) -> <A as Atom<K>>::Output + Send + Sync>;

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub(crate) struct OverrideTable {
    by_key: HashMap<AtomKey, Entry>,
    by_type: HashMap<TypeId, Entry>,
}

impl OverrideTable {
    pub(crate) fn insert_key<A, K>(&mut self, key: AtomKey, replacement: OverrideFn<A, K>)
    where
        A: Atom<K>,
        K: 'static,
    {
        self.by_key.insert(key, Arc::new(replacement));
    }

    pub(crate) fn insert_type<A, K>(&mut self, replacement: OverrideFn<A, K>)
    where
        A: Atom<K>,
        K: 'static,
    {
        self.by_type.insert(TypeId::of::<A>(), Arc::new(replacement));
    }

    /// Key overrides win over type overrides within one table.
    pub(crate) fn find<A, K>(&self, key: AtomKey) -> Option<OverrideFn<A, K>>
    where
        A: Atom<K>,
        K: 'static,
    {
        self.by_key
            .get(&key)
            .and_then(|entry| entry.downcast_ref::<OverrideFn<A, K>>())
            .or_else(|| {
                self.by_type
                    .get(&TypeId::of::<A>())
                    .and_then(|entry| entry.downcast_ref::<OverrideFn<A, K>>())
            })
            .cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len() + self.by_type.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{kind, ValueAtom};

    #[derive(Clone, Hash)]
    struct Greeting(&'static str);

    impl ValueAtom for Greeting {
        type Value = String;

        fn value(&self, _context: &Context) -> String {
            format!("hello {}", self.0)
        }
    }

    fn replacement(text: &'static str) -> OverrideFn<Greeting, kind::Value> {
        Arc::new(move |_: &Greeting, _: &Context| text.to_string())
    }

    #[test]
    fn key_override_beats_type_override() {
        let mut table = OverrideTable::default();
        table.insert_type::<Greeting, kind::Value>(replacement("type"));
        table.insert_key::<Greeting, kind::Value>(
            AtomKey::of(&Greeting("a")),
            replacement("key"),
        );

        assert_eq!(table.len(), 2);
        assert!(table
            .find::<Greeting, kind::Value>(AtomKey::of(&Greeting("a")))
            .is_some());

        // Any other member of the family falls back to the type override
        assert!(table
            .find::<Greeting, kind::Value>(AtomKey::of(&Greeting("b")))
            .is_some());
    }

    #[test]
    fn empty_table_finds_nothing() {
        let table = OverrideTable::default();
        assert!(table
            .find::<Greeting, kind::Value>(AtomKey::of(&Greeting("a")))
            .is_none());
    }
}
