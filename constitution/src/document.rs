//! Loading of the constitution document.
//!
//! Documents are JSON by default; `.yaml`/`.yml` files are read as YAML.

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::digest::hash_json;
use crate::error::{ConstitutionError, Result};
use crate::types::{Article, Title};

/// The full rulebook: ordered titles containing ordered articles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constitution {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub titles: Vec<Title>,
}

impl Constitution {
    /// Build from titles, checking article id uniqueness.
    pub fn new(titles: Vec<Title>) -> Result<Self> {
        let constitution = Self {
            version: None,
            titles,
        };
        constitution.validate()?;
        Ok(constitution)
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let constitution: Self =
            serde_json::from_str(json).map_err(|e| ConstitutionError::Parse {
                path: "<inline>".into(),
                message: e.to_string(),
            })?;
        constitution.validate()?;
        Ok(constitution)
    }

    /// Load from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let constitution: Self = read_document(path.as_ref())?;
        constitution.validate()?;
        tracing::info!(
            path = %path.as_ref().display(),
            titles = constitution.titles.len(),
            articles = constitution.article_count(),
            "Loaded constitution"
        );
        Ok(constitution)
    }

    /// Articles in document order (titles outer, articles inner).
    pub fn articles(&self) -> impl Iterator<Item = &Article> {
        self.titles.iter().flat_map(|t| t.articles.iter())
    }

    /// Look up an article by id.
    pub fn article(&self, article_id: &str) -> Option<&Article> {
        self.articles().find(|a| a.article_id == article_id)
    }

    pub fn article_count(&self) -> usize {
        self.titles.iter().map(|t| t.articles.len()).sum()
    }

    /// SHA256 of the canonical JSON form.
    pub fn content_hash(&self) -> Result<String> {
        Ok(hash_json(self)?)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for title in &self.titles {
            for article in &title.articles {
                if article.article_id.trim().is_empty() {
                    return Err(ConstitutionError::MissingArticleId(title.title.clone()));
                }
                if !seen.insert(article.article_id.as_str()) {
                    return Err(ConstitutionError::DuplicateArticle(article.article_id.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Read a JSON or YAML document, by extension.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConstitutionError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let parsed = if is_yaml {
        serde_yaml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| ConstitutionError::Parse {
        path: path.to_path_buf(),
        message,
    })
}
