use serde::{Deserialize, Serialize};

const LIST_SEP: char = '|';

/// Ordered set of names stored as a `|` delimited list. Entries are trimmed,
/// duplicates (ignoring case) are dropped and the list stays sorted so two
/// lists with the same content always compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameList(Vec<String>);

impl NameList {
    pub fn from_delimited(value: &str) -> Self {
        let mut list = NameList::default();
        for part in value.split(LIST_SEP) {
            list.insert(part);
        }
        list
    }

    pub fn to_delimited(&self) -> String {
        let mut out = String::new();
        for (idx, item) in self.0.iter().enumerate() {
            if idx > 0 {
                out.push(LIST_SEP);
            }
            out.push_str(item);
        }
        out
    }

    /// Adds `value` unless it is blank or already present. Returns true when
    /// the list changed.
    pub fn insert(&mut self, value: &str) -> bool {
        let value = value.trim().replace(LIST_SEP, "/");
        if value.is_empty() {
            return false;
        }
        if self.contains(&value) {
            return false;
        }
        let key = sort_key(&value);
        let idx = self
            .0
            .iter()
            .position(|existing| sort_key(existing) > key)
            .unwrap_or(self.0.len());
        self.0.insert(idx, value);
        true
    }

    pub fn extend<'a, I>(&mut self, values: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut changed = false;
        for value in values {
            changed |= self.insert(value);
        }
        changed
    }

    pub fn union(&mut self, other: &NameList) -> bool {
        self.extend(other.0.iter())
    }

    pub fn remove(&mut self, value: &str) -> bool {
        let before = self.0.len();
        let value = value.trim();
        self.0.retain(|existing| !existing.eq_ignore_ascii_case(value));
        self.0.len() != before
    }

    pub fn contains(&self, value: &str) -> bool {
        let value = value.trim();
        self.0.iter().any(|existing| existing.eq_ignore_ascii_case(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<S: AsRef<str>> FromIterator<S> for NameList {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut list = NameList::default();
        for value in iter {
            list.insert(value.as_ref());
        }
        list
    }
}

fn sort_key(value: &str) -> (String, String) {
    (value.to_lowercase(), value.to_string())
}
