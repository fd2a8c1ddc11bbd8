use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use catlink_core::{CandidateRecord, ReconcileError, SourceKind, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// One raw row as delivered by a source collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "snake_case")]
pub enum SourceRow {
    Tabular(BTreeMap<String, String>),
    Platform(JsonValue),
    Marketplace(CatalogItem),
    /// A record the source delivered but that could not be decoded.
    Invalid(String),
}

/// Structured marketplace catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: String,
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub gtin: Option<String>,
    #[serde(default)]
    pub seller_sku: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub available_quantity: Option<i64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnownField {
    Name,
    Brand,
    Ean,
    Code,
    Price,
    Stock,
    Ref,
}

impl KnownField {
    pub fn as_str(self) -> &'static str {
        match self {
            KnownField::Name => "name",
            KnownField::Brand => "brand",
            KnownField::Ean => "ean",
            KnownField::Code => "code",
            KnownField::Price => "price",
            KnownField::Stock => "stock",
            KnownField::Ref => "ref",
        }
    }

    /// Header keys for this field, the field's own name first.
    fn synonyms(self) -> &'static [&'static str] {
        match self {
            KnownField::Name => &[
                "name", "productname", "title", "producttitle", "itemname", "product", "description",
                "nome", "nomeproduto", "descricao", "designation",
            ],
            KnownField::Brand => &["brand", "brandname", "manufacturer", "make", "marca", "fabricante"],
            KnownField::Ean => &["ean", "ean13", "ean8", "gtin", "gtin14", "upc", "barcode", "codigodebarras"],
            KnownField::Code => &[
                "code", "sku", "productcode", "itemcode", "partnumber", "mpn", "codigo", "codigoproduto",
            ],
            KnownField::Price => &["price", "unitprice", "saleprice", "cost", "preco", "valor", "precovenda"],
            KnownField::Stock => &["stock", "qty", "quantity", "inventory", "available", "estoque", "saldo"],
            KnownField::Ref => &["ref", "reference", "id", "rowid", "externalid", "referencia", "line"],
        }
    }

    const ALL: [KnownField; 7] = [
        KnownField::Name,
        KnownField::Brand,
        KnownField::Ean,
        KnownField::Code,
        KnownField::Price,
        KnownField::Stock,
        KnownField::Ref,
    ];

    /// Field and 1-based synonym rank for a normalized header key.
    fn from_synonym(normalized_header: &str) -> Option<(Self, usize)> {
        Self::ALL.into_iter().find_map(|field| {
            field
                .synonyms()
                .iter()
                .position(|synonym| *synonym == normalized_header)
                .map(|idx| (field, idx + 1))
        })
    }
}

impl fmt::Display for KnownField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnownField {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s.trim())
            .ok_or_else(|| NormalizeError::UnknownField(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedColumn {
    Known(KnownField),
    Unmapped(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("row {ordinal} has no product name")]
    MissingName { ordinal: u64 },
    #[error("row {ordinal} has a non-integer stock value {raw:?}")]
    InvalidStock { ordinal: u64, raw: String },
    #[error("row {ordinal} could not be decoded: {reason}")]
    Undecodable { ordinal: u64, reason: String },
    #[error("unknown column mapping target {0:?}")]
    UnknownField(String),
}

impl From<NormalizeError> for ReconcileError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::UnknownField(_) => ReconcileError::FatalConfig(err.to_string()),
            NormalizeError::MissingName { .. }
            | NormalizeError::InvalidStock { .. }
            | NormalizeError::Undecodable { .. } => ReconcileError::InvalidRow(err.to_string()),
        }
    }
}

/// Which column wins when several map to one field; lower is better.
/// `(dotted suffixes stripped, rank)` where rank 0 is an explicit override
/// and synonyms follow in list order.
type Priority = (usize, usize);

/// Lowercase, drop everything that is not alphanumeric.
fn header_key(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Header to field mapping: synonyms first, explicit overrides win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    overrides: BTreeMap<String, MappedColumn>,
}

impl ColumnMapping {
    pub fn auto() -> Self {
        Self::default()
    }

    /// Overrides come from configuration as `header -> field`; the field
    /// `ignore` forces a header to stay unmapped.
    pub fn with_overrides<'a>(
        overrides: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self, NormalizeError> {
        let mut mapping = Self::default();
        for (header, field) in overrides {
            let mapped = if field.trim() == "ignore" {
                MappedColumn::Unmapped(header.clone())
            } else {
                MappedColumn::Known(field.parse()?)
            };
            mapping.overrides.insert(header_key(header), mapped);
        }
        Ok(mapping)
    }

    pub fn map(&self, header: &str) -> MappedColumn {
        match self.resolve(header) {
            Some((field, _)) => MappedColumn::Known(field),
            None => MappedColumn::Unmapped(header.to_string()),
        }
    }

    fn resolve(&self, header: &str) -> Option<(KnownField, usize)> {
        let key = header_key(header);
        match self.overrides.get(&key) {
            Some(MappedColumn::Known(field)) => Some((*field, 0)),
            Some(MappedColumn::Unmapped(_)) => None,
            None => KnownField::from_synonym(&key),
        }
    }

    /// Platform keys are mapped by their full dotted path, then by ever
    /// shorter suffixes (`product.brand.name` tries `brand.name`, then `name`).
    fn resolve_path(&self, path: &str) -> Option<(KnownField, Priority)> {
        let mut rest = path;
        let mut stripped = 0;
        loop {
            if let Some((field, rank)) = self.resolve(rest) {
                return Some((field, (stripped, rank)));
            }
            let (_, tail) = rest.split_once('.')?;
            rest = tail;
            stripped += 1;
        }
    }
}

/// Flatten nested objects and arrays into dotted keys with stringified scalars.
pub fn flatten_platform_object(value: &JsonValue) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &JsonValue, prefix: String, out: &mut BTreeMap<String, String>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match value {
        JsonValue::Object(map) => {
            for (key, nested) in map {
                flatten_into(nested, join(key), out);
            }
        }
        JsonValue::Array(items) => {
            for (idx, nested) in items.iter().enumerate() {
                flatten_into(nested, join(&idx.to_string()), out);
            }
        }
        JsonValue::Null => {}
        JsonValue::String(s) => {
            out.insert(prefix, s.clone());
        }
        scalar => {
            out.insert(prefix, scalar.to_string());
        }
    }
}

/// Parse a price written with either decimal convention, ignoring currency
/// symbols. A lone comma followed by exactly three digits is read as a
/// thousands separator.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !cleaned.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let canonical = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() > 1 || decimals == 3 {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    canonical
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

/// Parse a whole quantity. `.` or `,` before groups of exactly three digits
/// separate thousands ("1.234" is 1234); a zero fraction ("7,00") is accepted.
/// Anything with a real fractional part is rejected.
pub fn parse_stock(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    let mut groups = cleaned.trim_start_matches('-').split(['.', ',']);
    let lead = groups.next().unwrap_or_default();
    if cleaned.contains(['.', ',']) && (1..=3).contains(&lead.len()) && groups.all(|g| g.len() == 3) {
        return cleaned.replace(['.', ','], "").parse().ok();
    }
    parse_price(&cleaned)
        .filter(|value| value.fract() == 0.0 && *value <= i64::MAX as f64)
        .map(|value| value as i64)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Default)]
struct FieldValues {
    values: BTreeMap<KnownField, (Priority, String)>,
}

impl FieldValues {
    /// Keep the best-priority non-empty value; visit order does not matter.
    fn offer(&mut self, field: KnownField, priority: Priority, raw: &str) {
        let Some(value) = non_empty(raw) else {
            return;
        };
        match self.values.get(&field) {
            Some((held, _)) if *held <= priority => {}
            _ => {
                self.values.insert(field, (priority, value));
            }
        }
    }

    fn get(&self, field: KnownField) -> Option<String> {
        self.values.get(&field).map(|(_, value)| value.clone())
    }
}

/// Converts raw source rows into candidate records. Pure: no I/O.
#[derive(Debug, Clone)]
pub struct Normalizer {
    tenant_id: TenantId,
    source_kind: SourceKind,
    source_id: String,
    mapping: ColumnMapping,
}

impl Normalizer {
    pub fn new(tenant_id: TenantId, source_kind: SourceKind, source_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            source_kind,
            source_id: source_id.into(),
            mapping: ColumnMapping::auto(),
        }
    }

    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// `ordinal` is the row's absolute position in the source (`offset + index`).
    pub fn normalize(&self, row: &SourceRow, ordinal: u64) -> Result<CandidateRecord, NormalizeError> {
        match row {
            SourceRow::Tabular(columns) => {
                let mut fields = FieldValues::default();
                for (header, value) in columns {
                    if let Some((field, rank)) = self.mapping.resolve(header) {
                        fields.offer(field, (0, rank), value);
                    }
                }
                let raw = columns
                    .iter()
                    .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
                    .collect::<Map<_, _>>();
                self.build(fields, JsonValue::Object(raw), ordinal)
            }
            SourceRow::Platform(value) => {
                let flat = flatten_platform_object(value);
                let mut fields = FieldValues::default();
                for (path, raw) in &flat {
                    if let Some((field, priority)) = self.mapping.resolve_path(path) {
                        fields.offer(field, priority, raw);
                    }
                }
                self.build(fields, value.clone(), ordinal)
            }
            SourceRow::Marketplace(item) => {
                // Structured fields outrank anything found in free-form attributes.
                const STRUCTURED: Priority = (0, 0);
                let mut fields = FieldValues::default();
                fields.offer(KnownField::Ref, STRUCTURED, &item.item_id);
                fields.offer(KnownField::Name, STRUCTURED, &item.title);
                if let Some(brand) = &item.brand {
                    fields.offer(KnownField::Brand, STRUCTURED, brand);
                }
                if let Some(gtin) = &item.gtin {
                    fields.offer(KnownField::Ean, STRUCTURED, gtin);
                }
                if let Some(sku) = &item.seller_sku {
                    fields.offer(KnownField::Code, STRUCTURED, sku);
                }
                for (attr, value) in &item.attributes {
                    if let Some((field, rank)) = self.mapping.resolve(attr) {
                        fields.offer(field, (1, rank), value);
                    }
                }
                let raw = serde_json::to_value(item).unwrap_or(JsonValue::Null);
                let mut candidate = self.build(fields, raw, ordinal)?;
                candidate.price = item.price.filter(|p| p.is_finite() && *p >= 0.0).or(candidate.price);
                candidate.stock = item.available_quantity.or(candidate.stock);
                Ok(candidate)
            }
            SourceRow::Invalid(reason) => Err(NormalizeError::Undecodable {
                ordinal,
                reason: reason.clone(),
            }),
        }
    }

    fn build(&self, fields: FieldValues, raw_payload: JsonValue, ordinal: u64) -> Result<CandidateRecord, NormalizeError> {
        let name = fields
            .get(KnownField::Name)
            .ok_or(NormalizeError::MissingName { ordinal })?;
        let source_ref = fields
            .get(KnownField::Ref)
            .unwrap_or_else(|| ordinal.to_string());
        let stock = match fields.get(KnownField::Stock) {
            Some(raw) if raw.bytes().any(|b| b.is_ascii_digit()) => {
                Some(parse_stock(&raw).ok_or(NormalizeError::InvalidStock { ordinal, raw })?)
            }
            _ => None,
        };

        Ok(CandidateRecord {
            tenant_id: self.tenant_id,
            source_kind: self.source_kind,
            source_id: self.source_id.clone(),
            source_ref,
            name,
            brand: fields.get(KnownField::Brand),
            identifier_ean: fields.get(KnownField::Ean),
            identifier_code: fields.get(KnownField::Code),
            price: fields.get(KnownField::Price).as_deref().and_then(parse_price),
            stock,
            raw_payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tabular(pairs: &[(&str, &str)]) -> SourceRow {
        SourceRow::Tabular(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn header_synonyms_are_case_and_punctuation_insensitive() {
        let mapping = ColumnMapping::auto();
        assert_eq!(mapping.map("Product Name"), MappedColumn::Known(KnownField::Name));
        assert_eq!(mapping.map("EAN-13"), MappedColumn::Known(KnownField::Ean));
        assert_eq!(mapping.map(" SKU "), MappedColumn::Known(KnownField::Code));
        assert_eq!(mapping.map("Preço"), MappedColumn::Unmapped("Preço".to_string()));
        assert_eq!(mapping.map("colour"), MappedColumn::Unmapped("colour".to_string()));
    }

    #[test]
    fn explicit_overrides_beat_synonyms() {
        let overrides: BTreeMap<String, String> = [
            ("Artikel".to_string(), "name".to_string()),
            ("Description".to_string(), "ignore".to_string()),
        ]
        .into_iter()
        .collect();
        let mapping = ColumnMapping::with_overrides(&overrides).expect("mapping");
        assert_eq!(mapping.map("artikel"), MappedColumn::Known(KnownField::Name));
        assert_eq!(mapping.map("Description"), MappedColumn::Unmapped("Description".to_string()));

        let bad: BTreeMap<String, String> = [("x".to_string(), "colour".to_string())].into_iter().collect();
        assert!(matches!(
            ColumnMapping::with_overrides(&bad),
            Err(NormalizeError::UnknownField(_))
        ));
    }

    #[test]
    fn prices_parse_in_both_conventions() {
        assert_eq!(parse_price("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_price("$1,234.56"), Some(1234.56));
        assert_eq!(parse_price("19.99"), Some(19.99));
        assert_eq!(parse_price("12,5"), Some(12.5));
        assert_eq!(parse_price("1,234"), Some(1234.0));
        assert_eq!(parse_price("1.234.567"), Some(1_234_567.0));
        assert_eq!(parse_price("n/a"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn tabular_rows_keep_unmapped_columns_in_payload() {
        let normalizer = Normalizer::new(TenantId::new(), SourceKind::Spreadsheet, "supplier-sheet");
        let row = tabular(&[
            ("Product Name", "  Acme Widget  "),
            ("Brand", "Acme"),
            ("EAN", "4006381333931"),
            ("SKU", "AC-1"),
            ("Price", "€ 12,50"),
            ("Qty", "7"),
            ("Colour", "red"),
        ]);

        let candidate = normalizer.normalize(&row, 42).expect("candidate");
        assert_eq!(candidate.name, "Acme Widget");
        assert_eq!(candidate.brand.as_deref(), Some("Acme"));
        assert_eq!(candidate.identifier_code.as_deref(), Some("AC-1"));
        assert_eq!(candidate.price, Some(12.5));
        assert_eq!(candidate.stock, Some(7));
        assert_eq!(candidate.source_ref, "42");
        assert_eq!(candidate.raw_payload["Colour"], json!("red"));
        assert!(candidate.gtin().is_some());
    }

    #[test]
    fn missing_name_is_a_row_error() {
        let normalizer = Normalizer::new(TenantId::new(), SourceKind::Spreadsheet, "sheet");
        let err = normalizer
            .normalize(&tabular(&[("Name", "   "), ("SKU", "x")]), 3)
            .unwrap_err();
        assert_eq!(err, NormalizeError::MissingName { ordinal: 3 });
    }

    #[test]
    fn best_ranked_synonym_wins_whatever_the_column_order() {
        let normalizer = Normalizer::new(TenantId::new(), SourceKind::Spreadsheet, "sheet");
        // BTreeMap visits "Barcode" before "EAN" and "Description" before "Name".
        let row = tabular(&[
            ("Description", "Blue steel widget, 10 pack"),
            ("Name", "Widget 10pk"),
            ("Barcode", "036000291452"),
            ("EAN", "4006381333931"),
        ]);
        let candidate = normalizer.normalize(&row, 0).expect("candidate");
        assert_eq!(candidate.name, "Widget 10pk");
        assert_eq!(candidate.identifier_ean.as_deref(), Some("4006381333931"));

        let overrides: BTreeMap<String, String> =
            [("Description".to_string(), "name".to_string())].into_iter().collect();
        let normalizer = normalizer.with_mapping(ColumnMapping::with_overrides(&overrides).expect("mapping"));
        let candidate = normalizer.normalize(&row, 0).expect("candidate");
        assert_eq!(candidate.name, "Blue steel widget, 10 pack");
    }

    #[test]
    fn stock_separators_group_thousands() {
        assert_eq!(parse_stock("1.234"), Some(1234));
        assert_eq!(parse_stock("1,234"), Some(1234));
        assert_eq!(parse_stock("12.345.678"), Some(12_345_678));
        assert_eq!(parse_stock("7"), Some(7));
        assert_eq!(parse_stock("7,00"), Some(7));
        assert_eq!(parse_stock("-3"), Some(-3));
        assert_eq!(parse_stock("2.5"), None);
        assert_eq!(parse_stock("1234.567"), None);

        let normalizer = Normalizer::new(TenantId::new(), SourceKind::Spreadsheet, "sheet");
        let candidate = normalizer
            .normalize(&tabular(&[("Name", "Widget"), ("Stock", "1.234")]), 0)
            .expect("candidate");
        assert_eq!(candidate.stock, Some(1234));
        let err = normalizer
            .normalize(&tabular(&[("Name", "Widget"), ("Stock", "2.5")]), 4)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidStock { ordinal: 4, .. }));
        let candidate = normalizer
            .normalize(&tabular(&[("Name", "Widget"), ("Stock", "n/a")]), 5)
            .expect("candidate");
        assert_eq!(candidate.stock, None);
    }

    #[test]
    fn row_errors_map_to_invalid_row() {
        let missing = ReconcileError::from(NormalizeError::MissingName { ordinal: 3 });
        assert!(matches!(&missing, ReconcileError::InvalidRow(msg) if msg.contains("row 3")));
        let undecodable = ReconcileError::from(NormalizeError::Undecodable {
            ordinal: 9,
            reason: "expected an object".to_string(),
        });
        assert!(matches!(undecodable, ReconcileError::InvalidRow(_)));
        assert!(matches!(
            ReconcileError::from(NormalizeError::UnknownField("colour".to_string())),
            ReconcileError::FatalConfig(_)
        ));
    }

    #[test]
    fn invalid_rows_normalize_to_an_error() {
        let normalizer = Normalizer::new(TenantId::new(), SourceKind::Platform, "erp");
        let err = normalizer
            .normalize(&SourceRow::Invalid("row 9 is not an object".to_string()), 9)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Undecodable { ordinal: 9, .. }));
    }

    #[test]
    fn platform_objects_are_flattened_before_mapping() {
        let normalizer = Normalizer::new(TenantId::new(), SourceKind::Platform, "erp");
        let object = json!({
            "id": 991,
            "product": { "title": "Widget Pro", "brand": { "name": "Acme" } },
            "pricing": { "price": 10.5 },
            "barcode": "036000291452",
            "stock": { "available": 3 },
            "tags": ["a", null, true]
        });

        let flat = flatten_platform_object(&object);
        assert_eq!(flat.get("product.brand.name").map(String::as_str), Some("Acme"));
        assert_eq!(flat.get("tags.2").map(String::as_str), Some("true"));
        assert!(!flat.contains_key("tags.1"));

        let candidate = normalizer.normalize(&SourceRow::Platform(object), 0).expect("candidate");
        assert_eq!(candidate.source_ref, "991");
        assert_eq!(candidate.name, "Widget Pro");
        assert_eq!(candidate.brand.as_deref(), Some("Acme"));
        assert_eq!(candidate.price, Some(10.5));
        assert_eq!(candidate.stock, Some(3));
        assert_eq!(candidate.identifier_ean.as_deref(), Some("036000291452"));
    }

    #[test]
    fn marketplace_items_use_structured_fields_and_attributes() {
        let normalizer = Normalizer::new(TenantId::new(), SourceKind::Marketplace, "market");
        let item = CatalogItem {
            item_id: "MLB-1".to_string(),
            title: "Widget Pro Max".to_string(),
            brand: None,
            gtin: None,
            seller_sku: Some("AC-1".to_string()),
            price: Some(99.9),
            available_quantity: Some(2),
            attributes: [
                ("BRAND".to_string(), "Acme".to_string()),
                ("GTIN".to_string(), "4006381333931".to_string()),
            ]
            .into_iter()
            .collect(),
        };

        let candidate = normalizer.normalize(&SourceRow::Marketplace(item), 5).expect("candidate");
        assert_eq!(candidate.source_ref, "MLB-1");
        assert_eq!(candidate.brand.as_deref(), Some("Acme"));
        assert_eq!(candidate.identifier_ean.as_deref(), Some("4006381333931"));
        assert_eq!(candidate.price, Some(99.9));
        assert_eq!(candidate.stock, Some(2));
    }
}
