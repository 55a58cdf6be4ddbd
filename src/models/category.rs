//! Category labels that partition all stored images and URL records.
//!
//! A category is either an in-taxonomy target (a fruit the classifier is
//! trained on) or one of two reserved sentinels: recognizable fruit outside
//! the taxonomy, and images that are not fruit at all. The set is fixed when
//! configuration is loaded and never inferred from disk.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel label for fruit that is recognizable but not in the taxonomy.
pub const UNKNOWN_FRUIT: &str = "unknown";

/// Sentinel label for images outside the fruit domain.
pub const NOT_FRUIT: &str = "not_fruit";

/// Fruits the classifier is trained on (matches the recipe database).
pub const DEFAULT_TARGET_FRUITS: &[&str] = &[
    "apple",
    "apricot",
    "blackberry",
    "blueberry",
    "cherry",
    "cranberry",
    "currant",
    "dragon_fruit",
    "elderberry",
    "fig",
    "gooseberry",
    "grape",
    "grapefruit",
    "kiwi",
    "lemon",
    "lime",
    "mango",
    "nectarine",
    "orange",
    "papaya",
    "passion_fruit",
    "peach",
    "pear",
    "pineapple",
    "plum",
    "quince",
    "raspberry",
    "rhubarb",
    "strawberry",
];

/// Fruits used to populate the `unknown` sentinel.
pub const EXOTIC_FRUITS: &[&str] = &[
    "starfruit",
    "persimmon",
    "pomegranate",
    "lychee",
    "rambutan",
    "durian",
    "jackfruit",
    "mangosteen",
    "longan",
    "custard_apple",
    "soursop",
    "breadfruit",
    "plantain",
    "tamarind",
    "guava",
    "feijoa",
    "cherimoya",
    "sapodilla",
    "sugar_apple",
    "monk_fruit",
    "horned_melon",
    "kiwano",
    "ugli_fruit",
    "yuzu",
    "kumquat",
];

const NOT_FRUIT_SEARCH_TERMS: &[&str] = &[
    "vegetables on kitchen table",
    "garden flowers close up",
    "bread loaf bakery",
    "coffee cup on desk",
    "pet dog portrait",
    "city street market crowd",
];

/// Errors building a category set.
#[derive(Debug, thiserror::Error)]
pub enum CategoryError {
    #[error("Invalid category name '{0}' (expected lowercase letters, digits and '_')")]
    InvalidName(String),
    #[error("Category '{0}' is defined more than once")]
    Duplicate(String),
    #[error("'{0}' is a reserved sentinel category")]
    Reserved(String),
}

/// Role of a category in the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    /// A fruit the classifier is trained to recognize.
    Target,
    /// Recognizable fruit that is not in the taxonomy.
    UnknownFruit,
    /// Not fruit at all.
    NotFruit,
}

/// Normalize a classifier or config label for comparison.
///
/// `"Passion Fruit"`, `"passion-fruit"` and `"passion_fruit"` all normalize
/// to `passion_fruit`.
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A category label plus the metadata adapters and filters need.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    name: String,
    kind: CategoryKind,
    aliases: Vec<String>,
    search_terms: Vec<String>,
}

impl Category {
    /// Create an in-taxonomy target category.
    pub fn target(name: &str) -> Result<Self, CategoryError> {
        let name = normalize_label(name);
        if !is_valid_name(&name) {
            return Err(CategoryError::InvalidName(name));
        }
        if name == UNKNOWN_FRUIT || name == NOT_FRUIT {
            return Err(CategoryError::Reserved(name));
        }
        Ok(Self {
            name,
            kind: CategoryKind::Target,
            aliases: Vec::new(),
            search_terms: Vec::new(),
        })
    }

    /// The "recognizable but not in the taxonomy" sentinel.
    pub fn unknown_fruit() -> Self {
        Self {
            name: UNKNOWN_FRUIT.to_string(),
            kind: CategoryKind::UnknownFruit,
            aliases: Vec::new(),
            search_terms: Vec::new(),
        }
    }

    /// The "not the domain at all" sentinel.
    pub fn not_fruit() -> Self {
        Self {
            name: NOT_FRUIT.to_string(),
            kind: CategoryKind::NotFruit,
            aliases: Vec::new(),
            search_terms: Vec::new(),
        }
    }

    /// Add classifier labels that should map onto this category.
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.aliases = aliases
            .into_iter()
            .map(|a| normalize_label(a.as_ref()))
            .filter(|a| !a.is_empty())
            .collect();
        self
    }

    /// Override the search terms adapters use for this category.
    pub fn with_search_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_terms = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CategoryKind {
        self.kind
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind != CategoryKind::Target
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Human-readable form of the name (`dragon_fruit` -> `dragon fruit`).
    pub fn display_name(&self) -> String {
        self.name.replace('_', " ")
    }

    /// Search terms for source adapters, falling back to built-in variations.
    pub fn search_terms(&self) -> Vec<String> {
        if !self.search_terms.is_empty() {
            return self.search_terms.clone();
        }

        match self.kind {
            CategoryKind::Target => {
                let fruit = self.display_name();
                vec![
                    format!("{} fruit close up fresh", fruit),
                    format!("{} picking hands harvest", fruit),
                    format!("{} market fresh produce", fruit),
                    format!("{} tree branch ripe", fruit),
                    format!("{} bowl kitchen fresh", fruit),
                ]
            }
            CategoryKind::UnknownFruit => EXOTIC_FRUITS
                .iter()
                .map(|f| format!("{} fruit", f.replace('_', " ")))
                .collect(),
            CategoryKind::NotFruit => NOT_FRUIT_SEARCH_TERMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Whether a classifier label names this category.
    pub fn matches_label(&self, label: &str) -> bool {
        let label = normalize_label(label);
        label == self.name || self.aliases.iter().any(|a| *a == label)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The fixed set of categories for one configuration.
///
/// Always contains both sentinels.
#[derive(Debug, Clone)]
pub struct CategorySet {
    categories: BTreeMap<String, Category>,
}

impl CategorySet {
    /// Build a set from target categories; sentinels are added if absent.
    pub fn new<I>(categories: I) -> Result<Self, CategoryError>
    where
        I: IntoIterator<Item = Category>,
    {
        let mut map = BTreeMap::new();
        for category in categories {
            let name = category.name().to_string();
            if map.insert(name.clone(), category).is_some() {
                return Err(CategoryError::Duplicate(name));
            }
        }

        map.entry(UNKNOWN_FRUIT.to_string())
            .or_insert_with(Category::unknown_fruit);
        map.entry(NOT_FRUIT.to_string())
            .or_insert_with(Category::not_fruit);

        Ok(Self { categories: map })
    }

    /// The default taxonomy: target fruits plus sentinels.
    pub fn defaults() -> Self {
        let mut categories = BTreeMap::new();
        for fruit in DEFAULT_TARGET_FRUITS {
            // Built-in names are valid slugs
            if let Ok(category) = Category::target(fruit) {
                categories.insert(category.name().to_string(), category);
            }
        }
        categories.insert(UNKNOWN_FRUIT.to_string(), Category::unknown_fruit());
        categories.insert(NOT_FRUIT.to_string(), Category::not_fruit());
        Self { categories }
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.categories.get(&normalize_label(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.categories.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Map a classifier label to an in-taxonomy target category.
    ///
    /// Sentinels never match a label.
    pub fn resolve_label(&self, label: &str) -> Option<&Category> {
        self.categories
            .values()
            .filter(|c| !c.is_sentinel())
            .find(|c| c.matches_label(label))
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::defaults()
    }
}
