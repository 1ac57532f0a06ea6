use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Storage and interchange format for `fecha_extraccion` (UTC, second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const KEY_SEPARATOR: char = '\u{1f}';

/// One product tile, normalized. Built by the extractor, read back from the
/// CSV interchange, and consumed unchanged by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub name: String,
    pub current_price: Option<f64>,
    pub previous_price: Option<f64>,
    pub discount_percent: Option<u8>,
    pub location: Option<String>,
    pub installments: Option<String>,
    pub free_shipping: bool,
    pub link: Option<String>,
    pub category: String,
    pub extracted_at: DateTime<Utc>,
}

/// Which columns decide that two rows are the same listing.
///
/// The stored `clave_natural` is built with whichever key was configured at
/// load time. Keys of different kinds never collide, so a database should be
/// loaded under a single kind: re-loading `full_row` data as `link_and_date`
/// inserts every row a second time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// Every business column must match.
    #[default]
    FullRow,
    /// Same link on the same calendar day. Records without a link use the full row.
    LinkAndDate,
}

impl ProductRecord {
    pub fn timestamp(&self) -> String {
        self.extracted_at.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn natural_key(&self, key: DedupKey) -> String {
        match (key, self.link.as_deref()) {
            (DedupKey::LinkAndDate, Some(link)) => format!(
                "{link}{KEY_SEPARATOR}{}",
                self.extracted_at.date_naive().format("%Y-%m-%d")
            ),
            _ => self.full_row_key(),
        }
    }

    fn full_row_key(&self) -> String {
        let fields = [
            self.name.clone(),
            opt(self.current_price),
            opt(self.previous_price),
            opt(self.discount_percent),
            self.location.clone().unwrap_or_default(),
            self.installments.clone().unwrap_or_default(),
            self.free_shipping.to_string(),
            self.link.clone().unwrap_or_default(),
            self.category.clone(),
            self.timestamp(),
        ];
        fields.join(&KEY_SEPARATOR.to_string())
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn sample(name: &str, category: &str, price: Option<f64>) -> ProductRecord {
    use chrono::TimeZone;

    ProductRecord {
        name: name.to_string(),
        current_price: price,
        previous_price: None,
        discount_percent: None,
        location: None,
        installments: None,
        free_shipping: false,
        link: Some(format!("https://articulo.example/{}", name.replace(' ', "-"))),
        category: category.to_string(),
        extracted_at: Utc.with_ymd_and_hms(2026, 3, 14, 12, 30, 0).unwrap(),
    }
}
