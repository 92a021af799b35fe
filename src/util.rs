//! Shared helpers.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A string key ordered by its ASCII-lowercased bytes.
#[derive(Debug, Clone, Eq)]
pub struct CiKey(String);

impl CiKey {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for CiKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Ord for CiKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let rhs = other.0.bytes().map(|b| b.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl PartialOrd for CiKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for CiKey {
    fn from(s: &str) -> Self {
        CiKey(s.to_owned())
    }
}

impl From<String> for CiKey {
    fn from(s: String) -> Self {
        CiKey(s)
    }
}

impl Borrow<CiStr> for CiKey {
    fn borrow(&self) -> &CiStr {
        CiStr::new(&self.0)
    }
}

/// Borrowed form of [`CiKey`], for map lookups without allocating.
#[derive(Debug)]
#[repr(transparent)]
pub struct CiStr(str);

impl CiStr {
    #[inline]
    fn new(s: &str) -> &Self {
        // repr(transparent) makes the cast sound
        unsafe { &*(s as *const str as *const CiStr) }
    }
}

impl PartialEq for CiStr {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CiStr {}

impl Ord for CiStr {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let rhs = other.0.bytes().map(|b| b.to_ascii_lowercase());
        lhs.cmp(rhs)
    }
}

impl PartialOrd for CiStr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An ordered map with case-insensitive string keys.
///
/// Backs both http headers and uri query parameters. Insertion is
/// first-write-wins: a later insert under an existing key (in any casing)
/// leaves the stored value untouched. Iteration yields entries sorted by
/// lowercased key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseInsensitiveMap {
    inner: BTreeMap<CiKey, String>,
}

impl CaseInsensitiveMap {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key` unless the key is already present.
    pub fn insert(&mut self, key: impl Into<CiKey>, value: impl Into<String>) {
        self.inner.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(CiStr::new(key)).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(CiStr::new(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Into<CiKey>, V: Into<String>> FromIterator<(K, V)> for CaseInsensitiveMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = CaseInsensitiveMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl fmt::Display for CaseInsensitiveMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        Ok(())
    }
}
