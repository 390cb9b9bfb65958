//! Hierarchical tags for slots and item categories
//!
//! Tags are dotted names such as `Slot.Hand.Left`. A tag set "has" a tag when it
//! contains the tag itself or any of its children, so an item categorised as
//! `Weapon.Sword` fits a slot that asks for `Weapon`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A dotted hierarchical name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Create a new tag
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Tag name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` equals `parent` or is nested below it
    pub fn matches(&self, parent: &Tag) -> bool {
        match self.0.strip_prefix(parent.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }

    /// Direct parent, if any
    pub fn parent(&self) -> Option<Tag> {
        self.0.rfind('.').map(|idx| Tag(self.0[..idx].to_string()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// An unordered set of tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<Tag>);

impl TagSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag
    pub fn insert(&mut self, tag: impl Into<Tag>) {
        self.0.insert(tag.into());
    }

    /// Builder-style insert
    pub fn with(mut self, tag: impl Into<Tag>) -> Self {
        self.insert(tag);
        self
    }

    /// True if the set holds `tag` or one of its children
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.0.iter().any(|t| t.matches(tag))
    }

    /// True if the set holds exactly `tag`
    pub fn has_exact(&self, tag: &Tag) -> bool {
        self.0.contains(tag)
    }

    /// Iterate over tags
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Into<Tag>> FromIterator<T> for TagSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
