//! Ordered HTTP/2 header block.
//!
//! # Responsibilities
//! - Hold the decoded field list of a HEADERS frame in wire order
//! - Give typed access to the pseudo-headers
//! - Allow repeated names (split `cookie` entries, multi-value headers)
//!
//! # Design Decisions
//! - Fields are raw bytes, exactly as an HPACK decoder hands them over.
//!   Validation (pseudo-header placement, illegal names) belongs to the
//!   converter, not to the container.
//! - Names are stored lowercase; lookups are exact byte comparisons.

use bytes::Bytes;

/// `:method` pseudo-header.
pub const METHOD: &str = ":method";
/// `:scheme` pseudo-header.
pub const SCHEME: &str = ":scheme";
/// `:authority` pseudo-header.
pub const AUTHORITY: &str = ":authority";
/// `:path` pseudo-header.
pub const PATH: &str = ":path";
/// `:status` pseudo-header.
pub const STATUS: &str = ":status";

/// A single decoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    /// Create a field. The name is stored lowercase.
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// True if the name has pseudo-header shape (leading `:`).
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    /// Value as UTF-8, if it is.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Ordered list of header fields carried by a HEADERS frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    fields: Vec<HeaderField>,
}

impl HeaderBlock {
    /// Create an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field. The name is lowercased.
    pub fn append(&mut self, name: impl AsRef<[u8]>, value: impl Into<Bytes>) {
        let name = Bytes::from(name.as_ref().to_ascii_lowercase());
        self.fields.push(HeaderField {
            name,
            value: value.into(),
        });
    }

    /// Replace every field called `name` with a single one.
    ///
    /// The replacement takes the position of the first removed field, or is
    /// appended if there was none.
    pub fn set(&mut self, name: &str, value: impl Into<Bytes>) {
        let value = value.into();
        match self.position(name) {
            Some(index) => {
                self.fields[index].value = value;
                let mut seen = false;
                self.fields.retain(|f| {
                    if f.name.as_ref() != name.as_bytes() {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.append(name, value),
        }
    }

    /// Remove every field called `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| f.name.as_ref() != name.as_bytes());
        before - self.fields.len()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.fields
            .iter()
            .find(|f| f.name.as_ref() == name.as_bytes())
            .map(|f| &f.value)
    }

    /// First value for `name` as UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// All values for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name.as_ref() == name.as_bytes())
            .map(|f| &f.value)
    }

    /// Check if a field named `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Fields in wire order.
    pub fn iter(&self) -> std::slice::Iter<'_, HeaderField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of `:method`.
    pub fn method(&self) -> Option<&str> {
        self.get_str(METHOD)
    }

    pub fn path(&self) -> Option<&str> {
        self.get_str(PATH)
    }

    /// Value of `:authority`.
    pub fn authority(&self) -> Option<&str> {
        self.get_str(AUTHORITY)
    }

    pub fn scheme(&self) -> Option<&str> {
        self.get_str(SCHEME)
    }

    /// Value of `:status`.
    pub fn status(&self) -> Option<&str> {
        self.get_str(STATUS)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.as_ref() == name.as_bytes())
    }
}

impl FromIterator<HeaderField> for HeaderBlock {
    fn from_iter<I: IntoIterator<Item = HeaderField>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a HeaderBlock {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
