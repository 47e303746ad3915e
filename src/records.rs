//! Flat views of the store's domain records and the sources that provide them.
//!
//! Cross-references (category, unit, customer, neighborhood, city) arrive
//! already resolved to display names; the indexer never sees the underlying
//! schema.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub stock: f64,
    /// Unit of measure name, e.g. "kg".
    #[serde(default)]
    pub unit: Option<String>,
    /// Category name.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    /// Product name; `None` when the referenced product no longer resolves.
    #[serde(default)]
    pub product: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub id: String,
    pub date: DateTime<Utc>,
    /// Customer name, `None` for walk-in sales.
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub items: Vec<SaleItem>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

/// Read access to the records a reindex embeds.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn active_products(&self) -> Result<Vec<ProductRecord>>;

    async fn active_categories(&self) -> Result<Vec<CategoryRecord>>;

    /// The `limit` most recent sales, newest first.
    async fn recent_sales(&self, limit: usize) -> Result<Vec<SaleRecord>>;

    async fn active_customers(&self) -> Result<Vec<CustomerRecord>>;
}

/// A JSON snapshot of the store's records.
///
/// ```json
/// {"products": [...], "categories": [...], "sales": [...], "customers": [...]}
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub products: Vec<ProductRecord>,
    #[serde(default)]
    pub categories: Vec<CategoryRecord>,
    #[serde(default)]
    pub sales: Vec<SaleRecord>,
    #[serde(default)]
    pub customers: Vec<CustomerRecord>,
}

impl Catalog {
    /// Read a catalog snapshot from a JSON file.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Source(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[async_trait]
impl DocumentSource for Catalog {
    async fn active_products(&self) -> Result<Vec<ProductRecord>> {
        Ok(self.products.iter().filter(|p| p.active).cloned().collect())
    }

    async fn active_categories(&self) -> Result<Vec<CategoryRecord>> {
        Ok(self.categories.iter().filter(|c| c.active).cloned().collect())
    }

    async fn recent_sales(&self, limit: usize) -> Result<Vec<SaleRecord>> {
        let mut sales = self.sales.clone();
        // Stable, so equal dates keep snapshot order.
        sales.sort_by(|a, b| b.date.cmp(&a.date));
        sales.truncate(limit);
        Ok(sales)
    }

    async fn active_customers(&self) -> Result<Vec<CustomerRecord>> {
        Ok(self.customers.iter().filter(|c| c.active).cloned().collect())
    }
}
