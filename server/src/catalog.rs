use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_CATEGORY: &str = "default";

const BUILTIN_CATALOG: &str = include_str!("../data/catalog.json");

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub id: String,
    pub keywords: Vec<String>,
    pub response: String,
}

/// Read-only table of canned answers, kept in declaration order.
#[derive(Debug, Clone)]
pub struct Catalog {
    categories: Vec<Category>,
    default_index: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("category at position {0} has an empty id")]
    EmptyId(usize),
    #[error("duplicate category id `{0}`")]
    DuplicateId(String),
    #[error("catalog has no `default` category")]
    MissingDefault,
    #[error("the `default` category must not declare keywords")]
    DefaultHasKeywords,
    #[error("category `{0}` has no keywords")]
    NoKeywords(String),
}

impl Catalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let data = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, CatalogError> {
        let categories: Vec<Category> = serde_json::from_str(data)?;
        Self::from_categories(categories)
    }

    pub fn from_categories(categories: Vec<Category>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        let mut default_index = None;
        let mut normalized = Vec::with_capacity(categories.len());

        for (position, category) in categories.into_iter().enumerate() {
            let id = category.id.trim().to_string();
            if id.is_empty() {
                return Err(CatalogError::EmptyId(position));
            }
            if !seen.insert(id.clone()) {
                return Err(CatalogError::DuplicateId(id));
            }

            let keywords: Vec<String> = category
                .keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect();

            if id == DEFAULT_CATEGORY {
                if !keywords.is_empty() {
                    return Err(CatalogError::DefaultHasKeywords);
                }
                default_index = Some(position);
            } else if keywords.is_empty() {
                return Err(CatalogError::NoKeywords(id));
            }

            normalized.push(Category {
                id,
                keywords,
                response: category.response,
            });
        }

        let default_index = default_index.ok_or(CatalogError::MissingDefault)?;
        Ok(Self {
            categories: normalized,
            default_index,
        })
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|category| category.id == id)
    }

    pub fn default_category(&self) -> &Category {
        &self.categories[self.default_index]
    }

    /// Every category except the fallback, in declaration order.
    pub fn keyed_categories(&self) -> impl Iterator<Item = &Category> {
        self.categories
            .iter()
            .enumerate()
            .filter(move |(index, _)| *index != self.default_index)
            .map(|(_, category)| category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }
}
