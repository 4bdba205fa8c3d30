//! Product records and the in-memory product repository.

use crate::error::{ValidationError, ValidationErrors};
use crate::money::Money;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use strum::{Display, EnumString};
use tracing::{debug, info};

static IMAGE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/]+\S*$").expect("image url pattern compiles"));

// ============================================================================
// ProductId
// ============================================================================

/// Opaque unique identifier of a product.
///
/// # Validation
/// - Must not be empty
/// - Maximum length: 128 characters
/// - No whitespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    const MAX_LENGTH: usize = 128;

    /// Creates a new ProductId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::Empty("product_id"));
        }
        if id.len() > Self::MAX_LENGTH {
            return Err(ValidationError::TooLong {
                field: "product_id",
                max: Self::MAX_LENGTH,
                actual: id.len(),
            });
        }
        if let Some(character) = id.chars().find(|c| c.is_whitespace()) {
            return Err(ValidationError::InvalidCharacter {
                field: "product_id",
                character,
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProductId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProductId> for String {
    fn from(id: ProductId) -> String {
        id.0
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Product
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Brand {
    Apple,
    Samsung,
    Anker,
    Generic,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ProductKind {
    Case,
    Charger,
    Cable,
    #[serde(rename = "Screen Protector")]
    #[strum(to_string = "Screen Protector", serialize = "screen-protector")]
    ScreenProtector,
    Phone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub author: String,
    pub rating: u8,
    pub text: String,
    pub date: String,
}

/// A catalog entry. The cart only relies on `id`, `name` and `price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    pub brand: Brand,
    #[serde(rename = "type")]
    pub kind: ProductKind,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl Product {
    /// Minimal product record, mostly useful for tests and fixtures.
    pub fn new(id: ProductId, name: impl Into<String>, price: Money) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            description: String::new(),
            image: String::new(),
            brand: Brand::Generic,
            kind: ProductKind::Case,
            rating: 0.0,
            reviews: Vec::new(),
            features: Vec::new(),
        }
    }
}

/// Admin form for creating or editing a product.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub price: Money,
    pub image: String,
    pub brand: Brand,
    #[serde(rename = "type")]
    pub kind: ProductKind,
    #[serde(default)]
    pub features: Vec<String>,
}

impl ProductDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(min_chars("name", &self.name, 2));
        errors.check(min_chars("description", &self.description, 10));
        if self.price.is_zero() {
            errors.push(ValidationError::Invalid {
                field: "price",
                reason: "must be a positive number",
            });
        }
        if !IMAGE_URL.is_match(self.image.trim()) {
            errors.push(ValidationError::Invalid {
                field: "image",
                reason: "must be an http(s) URL",
            });
        }
        errors.into_result()
    }

    /// Validates the draft and turns it into a product, keeping the rating
    /// and reviews of `existing` when editing.
    pub fn into_product(
        self,
        id: ProductId,
        existing: Option<&Product>,
    ) -> Result<Product, ValidationErrors> {
        self.validate()?;
        Ok(Product {
            id,
            name: self.name.trim().to_string(),
            price: self.price,
            description: self.description.trim().to_string(),
            image: self.image.trim().to_string(),
            brand: self.brand,
            kind: self.kind,
            rating: existing.map(|p| p.rating).unwrap_or(0.0),
            reviews: existing.map(|p| p.reviews.clone()).unwrap_or_default(),
            features: self.features,
        })
    }
}

pub(crate) fn min_chars(field: &'static str, value: &str, min: usize) -> Result<(), ValidationError> {
    let actual = value.trim().chars().count();
    if actual == 0 {
        return Err(ValidationError::Empty(field));
    }
    if actual < min {
        return Err(ValidationError::TooShort { field, min, actual });
    }
    Ok(())
}

// ============================================================================
// Filtering
// ============================================================================

/// Listing criteria. Every criterion that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProductFilter {
    /// Case-insensitive substring of the product name
    #[serde(default, rename = "q")]
    pub search: Option<String>,
    /// Brand name, any case
    #[serde(default, deserialize_with = "case_insensitive")]
    pub brand: Option<Brand>,
    /// Product type, any case; `screen-protector` also accepted
    #[serde(default, deserialize_with = "case_insensitive")]
    pub kind: Option<ProductKind>,
}

/// Parses a query value through the enum's `FromStr`. Blank values mean
/// "no criterion".
fn case_insensitive<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    use serde::de::Error;

    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("unknown value '{value}'"))),
    }
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        let matches_search = match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => product
                .name
                .to_lowercase()
                .contains(&term.to_lowercase()),
            _ => true,
        };
        let matches_brand = self.brand.is_none_or(|brand| product.brand == brand);
        let matches_kind = self.kind.is_none_or(|kind| product.kind == kind);
        matches_search && matches_brand && matches_kind
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Resolves product identifiers to product records.
pub trait ProductRepository: Send + Sync {
    /// Product by id, or `None` when not found.
    fn get(&self, id: &ProductId) -> Option<Product>;

    /// Products matching `filter`, in catalog order.
    fn list(&self, filter: &ProductFilter) -> Vec<Product>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    products: Vec<Product>,
}

/// Product repository held entirely in memory, in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<IndexMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        for product in products {
            catalog.upsert(product);
        }
        catalog
    }

    /// Loads a seed catalog from a YAML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog file {:?}", path))?;
        let ext = path
            .extension()
            .and_then(|os| os.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let file: CatalogFile = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse YAML catalog {:?}", path))?,
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse JSON catalog {:?}", path))?,
            other => anyhow::bail!("unsupported catalog extension: {other}"),
        };

        let catalog = Self::from_products(file.products);
        info!(path = %path.display(), products = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Inserts or replaces a product. Returns the previous record, if any.
    pub fn upsert(&self, product: Product) -> Option<Product> {
        debug!(product_id = %product.id, "catalog upsert");
        self.products.write().insert(product.id.clone(), product)
    }

    pub fn remove(&self, id: &ProductId) -> Option<Product> {
        debug!(product_id = %id, "catalog remove");
        self.products.write().shift_remove(id)
    }

    pub fn len(&self) -> usize {
        self.products.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.read().is_empty()
    }
}

impl ProductRepository for InMemoryCatalog {
    fn get(&self, id: &ProductId) -> Option<Product> {
        self.products.read().get(id).cloned()
    }

    fn list(&self, filter: &ProductFilter) -> Vec<Product> {
        self.products
            .read()
            .values()
            .filter(|product| filter.matches(product))
            .cloned()
            .collect()
    }
}
