use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use gale_instruments::TagSet;
use serde::Deserialize;
use url::Url;

use crate::document::read_document;
use crate::error::ConfigError;

/// Tag added to every sample with the label of the workload group the request came from.
pub const GROUP_TAG: &str = "group";

/// A single request template. The path is resolved against the run's target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawRequest")]
pub struct RequestSpec {
    pub path: String,
    pub query: Option<String>,
    pub tags: TagSet,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRequest {
    Short(String),
    Full {
        path: String,
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        tags: TagSet,
    },
}

impl From<RawRequest> for RequestSpec {
    fn from(value: RawRequest) -> Self {
        match value {
            RawRequest::Short(text) => RequestSpec::parse(&text),
            RawRequest::Full { path, query, tags } => RequestSpec { path, query, tags },
        }
    }
}

impl RequestSpec {
    /// Split `/path?query` into its parts.
    pub fn parse(text: &str) -> Self {
        match text.split_once('?') {
            Some((path, query)) => RequestSpec {
                path: path.to_string(),
                query: Some(query.to_string()),
                tags: TagSet::new(),
            },
            None => RequestSpec {
                path: text.to_string(),
                query: None,
                tags: TagSet::new(),
            },
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    fn resolve(&self, base: &str) -> Result<Url, String> {
        if self.path.is_empty() {
            return Err("empty path".to_string());
        }
        if self.path.contains("://") {
            return Err("absolute URLs are not allowed, paths are resolved against the target".to_string());
        }

        let mut url = if self.path.starts_with('/') {
            Url::parse(&format!("{base}{}", self.path))
        } else {
            Url::parse(&format!("{base}/{}", self.path))
        }
        .map_err(|e| e.to_string())?;

        if let Some(query) = &self.query {
            url.set_query(Some(query));
        }

        Ok(url)
    }
}

fn default_shuffle() -> bool {
    true
}

/// An ordered list of requests that are replayed together in one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkloadGroup {
    pub label: String,
    #[serde(default)]
    pub tags: TagSet,
    /// Replay the requests in a random order each iteration. When false they are replayed in the
    /// order they are declared.
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    pub requests: Vec<RequestSpec>,
}

impl WorkloadGroup {
    pub fn new(label: impl Into<String>, requests: impl IntoIterator<Item = RequestSpec>) -> Self {
        Self {
            label: label.into(),
            tags: TagSet::new(),
            shuffle: true,
            requests: requests.into_iter().collect(),
        }
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn in_order(mut self) -> Self {
        self.shuffle = false;
        self
    }
}

/// The requests to replay, as loaded from a YAML, TOML or JSON file.
///
/// ```yaml
/// groups:
///   - label: search
///     tags: { endpoint: search }
///     requests:
///       - /api/v1/crates?q=serde
///       - path: /api/v1/crates
///         query: q=tokio&page=2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WorkloadCatalog {
    pub groups: Vec<WorkloadGroup>,
}

impl WorkloadCatalog {
    pub fn new(groups: impl IntoIterator<Item = WorkloadGroup>) -> Self {
        Self {
            groups: groups.into_iter().collect(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        read_document(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            if !seen.insert(group.label.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.label.clone()));
            }
            if group.requests.is_empty() {
                return Err(ConfigError::EmptyGroup(group.label.clone()));
            }
        }

        Ok(())
    }

    /// Validate the catalog and resolve every request against the target.
    pub fn prepare(&self, target: &Url) -> Result<PreparedCatalog, ConfigError> {
        self.validate()?;

        if target.cannot_be_a_base() {
            return Err(ConfigError::UnsupportedTarget(target.to_string()));
        }
        let base = target.as_str().trim_end_matches('/');

        let groups = self
            .groups
            .iter()
            .map(|group| {
                let requests = group
                    .requests
                    .iter()
                    .map(|spec| {
                        let url = spec
                            .resolve(base)
                            .map_err(|reason| ConfigError::InvalidRequest {
                                group: group.label.clone(),
                                path: spec.path.clone(),
                                reason,
                            })?;

                        let mut tags = group.tags.clone();
                        tags.merge(&spec.tags);
                        tags.insert(GROUP_TAG, group.label.clone());

                        Ok(Arc::new(ResolvedRequest {
                            group: group.label.clone(),
                            url,
                            spec: spec.clone(),
                            tags,
                        }))
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;

                Ok(Arc::new(PreparedGroup {
                    label: group.label.clone(),
                    shuffle: group.shuffle,
                    requests,
                }))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(PreparedCatalog { groups })
    }
}

/// A request ready to be handed to a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub group: String,
    pub url: Url,
    pub spec: RequestSpec,
    /// Group tags, request tags and the `group` tag.
    pub tags: TagSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedGroup {
    pub label: String,
    pub shuffle: bool,
    pub requests: Vec<Arc<ResolvedRequest>>,
}

/// A validated catalog with every request resolved. Shared read-only by all virtual users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCatalog {
    groups: Vec<Arc<PreparedGroup>>,
}

impl PreparedCatalog {
    pub fn groups(&self) -> &[Arc<PreparedGroup>] {
        &self.groups
    }

    pub fn group(&self, label: &str) -> Option<&Arc<PreparedGroup>> {
        self.groups.iter().find(|g| g.label == label)
    }

    /// The groups a scenario replays: the named subset in the given order, or every group.
    pub fn select(
        &self,
        scenario: &str,
        names: Option<&[String]>,
    ) -> Result<Vec<Arc<PreparedGroup>>, ConfigError> {
        match names {
            None => Ok(self.groups.clone()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.group(name)
                        .cloned()
                        .ok_or_else(|| ConfigError::UnknownGroup {
                            scenario: scenario.to_string(),
                            group: name.clone(),
                        })
                })
                .collect(),
        }
    }
}
