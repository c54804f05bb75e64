//! Category configuration and tag-rule matching.
//!
//! Categories come from a YAML document:
//!
//! ```yaml
//! categories:
//!   - name: bar
//!     max_per_region: 2
//!     tags: ["amenity=bar", "amenity=pub"]
//!   - name: shop
//!     tags: ["shop=*"]
//! ```
//!
//! Matching is first-match-wins across categories in declared order; within
//! a category any rule may match, and a rule value of `*` accepts any
//! present value.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use roam_core::TagList;

const DEFAULT_MAX_PER_REGION: usize = 100;

/// One `key=value` or `key=*` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRule {
    pub key: String,
    /// `None` for the `*` wildcard.
    pub value: Option<String>,
}

impl TagRule {
    fn matches(&self, tags: &TagList) -> bool {
        match tags.get(&self.key) {
            None => false,
            Some(actual) => match &self.value {
                None => true,
                Some(expected) => actual == expected,
            },
        }
    }
}

/// A named category with its sampling bound and rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub max_per_region: usize,
    pub rules: Vec<TagRule>,
}

/// Errors when loading a category configuration.
#[derive(Debug, Error)]
pub enum CategoryConfigError {
    /// The YAML file could not be read.
    #[error("failed to read category config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The YAML document does not match the expected schema.
    #[error("invalid category config: {source}")]
    Schema {
        #[source]
        source: serde_yaml::Error,
    },
    /// A rule string lacks the `key=value` shape.
    #[error("category {category}: tag rule {rule:?} is not of the form key=value")]
    MalformedRule { category: String, rule: String },
    /// `max_per_region` must admit at least one entry.
    #[error("category {category}: max_per_region must be at least 1")]
    ZeroBound { category: String },
    /// The document declares no categories.
    #[error("category config declares no categories")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    categories: Vec<RawCategory>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    name: String,
    max_per_region: Option<usize>,
    tags: Vec<String>,
}

/// Ordered list of categories with first-match-wins lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    categories: Vec<Category>,
}

impl CategorySet {
    /// Load from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, CategoryConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| CategoryConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Load from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, CategoryConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(text).map_err(|source| CategoryConfigError::Schema { source })?;
        if raw.categories.is_empty() {
            return Err(CategoryConfigError::Empty);
        }

        let mut categories = Vec::with_capacity(raw.categories.len());
        for raw_category in raw.categories {
            let max_per_region = raw_category.max_per_region.unwrap_or(DEFAULT_MAX_PER_REGION);
            if max_per_region == 0 {
                return Err(CategoryConfigError::ZeroBound {
                    category: raw_category.name,
                });
            }

            let mut rules = Vec::with_capacity(raw_category.tags.len());
            for rule_text in raw_category.tags {
                let Some((key, value)) = rule_text.split_once('=') else {
                    return Err(CategoryConfigError::MalformedRule {
                        category: raw_category.name,
                        rule: rule_text,
                    });
                };
                rules.push(TagRule {
                    key: key.to_owned(),
                    value: (value != "*").then(|| value.to_owned()),
                });
            }
            categories.push(Category {
                name: raw_category.name,
                max_per_region,
                rules,
            });
        }
        Ok(Self { categories })
    }

    /// First category (by declared order) whose any rule matches `tags`.
    #[must_use]
    pub fn match_tags(&self, tags: &TagList) -> Option<(usize, &Category)> {
        self.categories
            .iter()
            .enumerate()
            .find(|(_, category)| category.rules.iter().any(|rule| rule.matches(tags)))
    }

    /// Category at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Category> {
        self.categories.get(index)
    }

    /// All category names, in declared order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Report whether the set is empty (never true for a loaded set).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
