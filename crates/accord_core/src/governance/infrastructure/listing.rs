//! Lazy, restartable sequences over engine tables.
//!
//! A [`Listing`] is an ordered snapshot of keys taken when the query is
//! served. Values are looked up in the live table only when the iterator
//! reaches them, so a caller that stops iterating does no further work, and
//! every call to [`Listing::iter`] starts over from the first key. Keys whose
//! entry disappeared or that fail the listing filter are skipped.

use std::{fmt::Debug, hash::Hash, sync::Arc};

use dashmap::DashMap;

type Filter<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Listing<K, V>
where
    K: Eq + Hash,
{
    keys: Arc<[K]>,
    table: Arc<DashMap<K, V>>,
    filter: Option<Filter<V>>,
}

impl<K, V> Listing<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(keys: Vec<K>, table: Arc<DashMap<K, V>>) -> Self {
        Self { keys: keys.into(), table, filter: None }
    }

    /// Only yield values matching `filter`, evaluated lazily during iteration.
    pub fn with_filter(mut self, filter: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn iter(&self) -> ListingIter<'_, K, V> {
        ListingIter { listing: self, position: 0 }
    }

    /// Upper bound on the number of yielded values.
    pub fn snapshot_len(&self) -> usize {
        self.keys.len()
    }
}

impl<K, V> Debug for Listing<K, V>
where
    K: Eq + Hash + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listing")
            .field("keys", &self.keys)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Case-insensitive substring search applied to listing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm(String);

impl SearchTerm {
    /// `None` for an absent or blank term, which matches everything.
    pub fn parse(term: Option<String>) -> Option<Self> {
        term.map(|term| term.trim().to_lowercase()).filter(|term| !term.is_empty()).map(Self)
    }

    pub fn matches(&self, field: &str) -> bool {
        field.to_lowercase().contains(&self.0)
    }
}

pub struct ListingIter<'a, K, V>
where
    K: Eq + Hash,
{
    listing: &'a Listing<K, V>,
    position: usize,
}

impl<K, V> Iterator for ListingIter<'_, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.listing.keys.get(self.position)?;
            self.position += 1;
            let Some(value) = self.listing.table.get(key).map(|entry| entry.value().clone()) else {
                continue;
            };
            match &self.listing.filter {
                Some(filter) if !filter(&value) => continue,
                _ => return Some(value),
            }
        }
    }
}

impl<'a, K, V> IntoIterator for &'a Listing<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    type Item = V;
    type IntoIter = ListingIter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
