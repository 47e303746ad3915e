//! Deterministic text renderings of domain records.
//!
//! A blurb lists every salient field of a record in a fixed order so that
//! rendering unchanged data twice yields byte-identical text.

use serde_json::json;

use crate::{
    embedding_db::Metadata,
    error::{Error, Result},
    records::{CategoryRecord, CustomerRecord, ProductRecord, SaleRecord},
    source::SourceType,
    text_util::{collapse_whitespace, format_money, format_quantity},
};

const MISSING: &str = "no registrado";

/// A record that can be rendered and embedded.
pub trait Indexable {
    const SOURCE: SourceType;

    fn object_id(&self) -> &str;

    /// Render the record, failing on records that cannot be described
    /// (empty names, unresolved references, non-finite amounts).
    fn blurb(&self) -> Result<String>;

    /// Display fields stored next to the vector.
    fn metadata(&self) -> Metadata;
}

fn malformed<T: Indexable + ?Sized>(record: &T, reason: &str) -> Error {
    Error::MalformedRecord {
        source_type: T::SOURCE,
        object_id: record.object_id().to_string(),
        reason: reason.to_string(),
    }
}

fn required<T: Indexable>(record: &T, field: &str, value: &str) -> Result<String> {
    let value = collapse_whitespace(value);
    if value.is_empty() {
        return Err(malformed(record, &format!("empty {field}")));
    }
    Ok(value)
}

fn optional(value: Option<&str>, fallback: &str) -> String {
    value
        .map(collapse_whitespace)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn finite<T: Indexable>(record: &T, field: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(malformed(record, &format!("{field} is not a number")))
    }
}

impl Indexable for ProductRecord {
    const SOURCE: SourceType = SourceType::Product;

    fn object_id(&self) -> &str {
        &self.id
    }

    fn blurb(&self) -> Result<String> {
        let name = required(self, "name", &self.name)?;
        let price = finite(self, "price", self.price)?;
        let stock = finite(self, "stock", self.stock)?;

        Ok(format!(
            "Producto: {name}. Descripción: {}. Precio: {}. Stock: {} {}. Categoría: {}.",
            optional(self.description.as_deref(), "sin descripción"),
            format_money(price),
            format_quantity(stock),
            optional(self.unit.as_deref(), "unidades"),
            optional(self.category.as_deref(), "sin categoría"),
        ))
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([
            ("name".to_string(), json!(self.name)),
            ("price".to_string(), json!(self.price)),
            ("stock".to_string(), json!(self.stock)),
            ("unit".to_string(), json!(self.unit)),
            ("category".to_string(), json!(self.category)),
        ])
    }
}

impl Indexable for CategoryRecord {
    const SOURCE: SourceType = SourceType::Category;

    fn object_id(&self) -> &str {
        &self.id
    }

    fn blurb(&self) -> Result<String> {
        let name = required(self, "name", &self.name)?;
        Ok(format!(
            "Categoría: {name}. Descripción: {}.",
            optional(self.description.as_deref(), "sin descripción"),
        ))
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([
            ("name".to_string(), json!(self.name)),
            ("description".to_string(), json!(self.description)),
        ])
    }
}

impl Indexable for SaleRecord {
    const SOURCE: SourceType = SourceType::Sale;

    fn object_id(&self) -> &str {
        &self.id
    }

    fn blurb(&self) -> Result<String> {
        let total = finite(self, "total", self.total)?;

        let mut items = Vec::with_capacity(self.items.len());
        for (i, item) in self.items.iter().enumerate() {
            let product = item
                .product
                .as_deref()
                .map(collapse_whitespace)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    malformed(self, &format!("item {i} has no product"))
                })?;
            let quantity = finite(self, "quantity", item.quantity)?;
            let unit_price = finite(self, "unit price", item.unit_price)?;
            items.push(format!(
                "{} x {product} ({} c/u)",
                format_quantity(quantity),
                format_money(unit_price)
            ));
        }
        let items = if items.is_empty() {
            "sin detalle".to_string()
        } else {
            items.join("; ")
        };

        Ok(format!(
            "Venta del {}. Cliente: {}. Productos: {items}. Total: {}.",
            self.date.format("%Y-%m-%d %H:%M"),
            optional(self.customer.as_deref(), "consumidor final"),
            format_money(total),
        ))
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([
            ("date".to_string(), json!(self.date.to_rfc3339())),
            ("customer".to_string(), json!(self.customer)),
            ("items".to_string(), json!(self.items.len())),
            ("total".to_string(), json!(self.total)),
        ])
    }
}

impl Indexable for CustomerRecord {
    const SOURCE: SourceType = SourceType::Customer;

    fn object_id(&self) -> &str {
        &self.id
    }

    fn blurb(&self) -> Result<String> {
        let name = required(self, "name", &self.name)?;
        Ok(format!(
            "Cliente: {name}. Email: {}. Teléfono: {}. Dirección: {}. Barrio: {}. Ciudad: {}.",
            optional(self.email.as_deref(), MISSING),
            optional(self.phone.as_deref(), MISSING),
            optional(self.address.as_deref(), MISSING),
            optional(self.neighborhood.as_deref(), MISSING),
            optional(self.city.as_deref(), MISSING),
        ))
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([
            ("name".to_string(), json!(self.name)),
            ("email".to_string(), json!(self.email)),
            ("phone".to_string(), json!(self.phone)),
            ("neighborhood".to_string(), json!(self.neighborhood)),
            ("city".to_string(), json!(self.city)),
        ])
    }
}
