use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// File formats accepted for run configuration and workload catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Toml,
    Json,
}

impl DocumentFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            "toml" => Some(DocumentFormat::Toml),
            "json" => Some(DocumentFormat::Json),
            _ => None,
        }
    }

    pub fn parse<T: DeserializeOwned>(self, content: &str) -> anyhow::Result<T> {
        let value = match self {
            DocumentFormat::Yaml => serde_yaml::from_str(content)?,
            DocumentFormat::Toml => toml::from_str(content)?,
            DocumentFormat::Json => serde_json::from_str(content)?,
        };
        Ok(value)
    }
}

pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let format = DocumentFormat::from_path(path).with_context(|| {
        format!(
            "Unsupported file extension for {}, expected .yaml, .yml, .toml or .json",
            path.display()
        )
    })?;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    format
        .parse(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}
