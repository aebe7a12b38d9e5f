use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Filter key that selects samples by outcome rather than by a recorded tag.
///
/// `expected_response=true` keeps only successful samples and `expected_response=false` keeps only
/// failures. Samples never carry this tag themselves.
pub const EXPECTED_RESPONSE_TAG: &str = "expected_response";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TagParseError {
    #[error("Tag [{0}] must be written as key=value or key:value")]
    MissingSeparator(String),
    #[error("Tag [{0}] has an empty key")]
    EmptyKey(String),
}

/// A single `key=value` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for Tag {
    type Err = TagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .or_else(|| s.split_once(':'))
            .ok_or_else(|| TagParseError::MissingSeparator(s.to_string()))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(TagParseError::EmptyKey(s.to_string()));
        }

        Ok(Tag::new(key, value.trim()))
    }
}

/// The tags attached to a request and to every sample it produces. Keys are unique, a later
/// insert for the same key replaces the earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Copy every tag from `other` into this set, overriding existing keys.
    pub fn merge(&mut self, other: &TagSet) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.get(&tag.key) == Some(tag.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        self.0.iter().map(|(k, v)| Tag::new(k.clone(), v.clone()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Display for TagSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.iter().join(","))
    }
}

/// Conjunction of tags a sample must carry to be selected, for example
/// `test_type=steady_vus,endpoint=search`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TagFilter {
    tags: Vec<Tag>,
}

impl TagFilter {
    pub fn new(tags: impl IntoIterator<Item = Tag>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// The outcome restriction requested through [EXPECTED_RESPONSE_TAG], if any.
    ///
    /// `Some(true)` selects successes, `Some(false)` selects failures.
    pub fn expected_response(&self) -> Option<bool> {
        self.tags
            .iter()
            .rev()
            .find(|tag| tag.key == EXPECTED_RESPONSE_TAG)
            .map(|tag| tag.value.eq_ignore_ascii_case("true"))
    }

    /// Whether a series with these tags is selected, ignoring any outcome restriction.
    pub fn matches(&self, tags: &TagSet) -> bool {
        self.tags
            .iter()
            .filter(|tag| tag.key != EXPECTED_RESPONSE_TAG)
            .all(|tag| tags.contains(tag))
    }
}

impl FromStr for TagFilter {
    type Err = TagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tags = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Tag::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { tags })
    }
}

impl TryFrom<String> for TagFilter {
    type Error = TagParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TagFilter> for String {
    fn from(value: TagFilter) -> Self {
        value.to_string()
    }
}

impl Display for TagFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tags.iter().join(","))
    }
}
