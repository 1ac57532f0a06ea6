//! Listing page → `ProductRecord`s.
//!
//! Each field has an ordered list of selectors: the current "poly" card
//! markup first, then the older `ui-search` shapes. The first selector that
//! yields non-blank text wins.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::normalize;
use crate::record::ProductRecord;

/// Outcome of one page: how many raw tiles were found and which of them
/// produced a record. Pagination decides on `fragments`, not `records`.
pub struct PageExtraction {
    pub fragments: usize,
    pub records: Vec<ProductRecord>,
}

mod selectors {
    use super::*;

    fn compile(patterns: &[&str]) -> Vec<Selector> {
        patterns
            .iter()
            .map(|p| Selector::parse(p).unwrap_or_else(|e| panic!("bad selector {p:?}: {e:?}")))
            .collect()
    }

    pub static ITEM: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("li.ui-search-layout__item").unwrap());

    pub static TITLE: LazyLock<Vec<Selector>> =
        LazyLock::new(|| compile(&[".poly-component__title", "h2.ui-search-item__title"]));

    pub static PRICE_CURRENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
        compile(&[
            ".poly-price__current .andes-money-amount__fraction",
            ".price-tag-fraction",
        ])
    });

    pub static PRICE_PREVIOUS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
        compile(&[
            ".andes-money-amount--previous .andes-money-amount__fraction",
            ".price-tag__disabled .price-tag-fraction",
        ])
    });

    pub static DISCOUNT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
        compile(&[".andes-money-amount__discount", ".ui-search-price__discount"])
    });

    pub static LOCATION: LazyLock<Vec<Selector>> = LazyLock::new(|| {
        compile(&[".poly-component__location", ".ui-search-item__location"])
    });

    pub static INSTALLMENTS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
        compile(&[".poly-price__installments", ".ui-search-installments"])
    });

    /// Both shapes are read together, not as fallbacks.
    pub static SHIPPING: LazyLock<Vec<Selector>> = LazyLock::new(|| {
        compile(&[".poly-component__shipping", ".ui-search-item__shipping"])
    });

    pub static LINK: LazyLock<Vec<Selector>> = LazyLock::new(|| {
        compile(&[
            "a.poly-component__title",
            ".poly-component__title a",
            "h2.ui-search-item__title a",
            "a.ui-search-link",
        ])
    });
}

pub fn extract_page(html: &str, category: &str, now: DateTime<Utc>) -> PageExtraction {
    let doc = Html::parse_document(html);
    let mut fragments = 0;
    let mut records = Vec::new();

    for item in doc.select(&selectors::ITEM) {
        fragments += 1;
        if let Some(record) = extract_item(item, category, now) {
            records.push(record);
        }
    }

    PageExtraction { fragments, records }
}

/// Builds a record from one tile. Tiles without a title yield `None`.
pub fn extract_item(item: ElementRef<'_>, category: &str, now: DateTime<Utc>) -> Option<ProductRecord> {
    let name = first_text(item, &selectors::TITLE)?;

    let current_price = normalize::parse_price(first_text(item, &selectors::PRICE_CURRENT).as_deref());
    let previous_price =
        normalize::parse_price(first_text(item, &selectors::PRICE_PREVIOUS).as_deref());
    let discount_percent =
        normalize::parse_discount(first_text(item, &selectors::DISCOUNT).as_deref());
    let location = normalize::clean_text(first_text(item, &selectors::LOCATION).as_deref());

    let installment_parts = first_texts(item, &selectors::INSTALLMENTS);
    let installments = normalize::join_text(installment_parts.iter().map(String::as_str));

    let shipping_parts: Vec<&str> = selectors::SHIPPING
        .iter()
        .flat_map(|sel| item.select(sel))
        .flat_map(|el| el.text())
        .collect();
    let free_shipping = normalize::is_free_shipping(shipping_parts);

    let link = normalize::strip_fragment(first_attr(item, &selectors::LINK, "href"));

    Some(ProductRecord {
        name,
        current_price,
        previous_price,
        discount_percent,
        location,
        installments,
        free_shipping,
        link,
        category: category.to_string(),
        extracted_at: now,
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// First non-blank text over the selector chain.
fn first_text(item: ElementRef<'_>, chain: &[Selector]) -> Option<String> {
    chain
        .iter()
        .flat_map(|sel| item.select(sel))
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// All text pieces of the first selector in the chain that matches anything.
fn first_texts(item: ElementRef<'_>, chain: &[Selector]) -> Vec<String> {
    for sel in chain {
        let parts: Vec<String> = item
            .select(sel)
            .flat_map(|el| el.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !parts.is_empty() {
            return parts;
        }
    }
    Vec::new()
}

fn first_attr<'a>(item: ElementRef<'a>, chain: &[Selector], attr: &str) -> Option<&'a str> {
    chain
        .iter()
        .flat_map(|sel| item.select(sel))
        .filter_map(|el| el.value().attr(attr))
        .find(|v| !v.trim().is_empty())
}
