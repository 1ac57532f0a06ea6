use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::crawl::{CategoryTarget, Pacing};
use crate::error::SettingsError;
use crate::record::DedupKey;

const DEFAULT_CONFIG_FILE: &str = "ml_scraper.toml";
const ENV_PREFIX: &str = "ML";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub csv_path: PathBuf,
    pub crawl: CrawlSettings,
    pub http: HttpSettings,
    pub load: LoadSettings,
    pub categories: Vec<CategorySettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub items_per_page: u32,
    pub max_pages: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub accept_language: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoadSettings {
    pub dedup_key: DedupKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySettings {
    pub category: String,
    pub start_url: String,
    pub max_pages: Option<u32>,
    pub items_per_page: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/ml_scraper.sqlite"),
            csv_path: PathBuf::from("productos.csv"),
            crawl: CrawlSettings::default(),
            http: HttpSettings::default(),
            load: LoadSettings::default(),
            categories: default_categories(),
        }
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        CrawlSettings {
            items_per_page: 48,
            max_pages: 5,
            min_delay_ms: 2000,
            max_delay_ms: 8000,
            max_retries: 0,
            retry_backoff_ms: 2000,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36"
                .to_string(),
            accept_language: "es-AR,es;q=0.9,en;q=0.8".to_string(),
            timeout_secs: 30,
        }
    }
}

fn default_categories() -> Vec<CategorySettings> {
    [
        ("laptops", "https://listado.mercadolibre.com.ar/laptops"),
        ("celulares", "https://listado.mercadolibre.com.ar/celulares-telefonos"),
        ("televisores", "https://listado.mercadolibre.com.ar/televisores"),
    ]
    .into_iter()
    .map(|(category, start_url)| CategorySettings {
        category: category.to_string(),
        start_url: start_url.to_string(),
        max_pages: None,
        items_per_page: None,
    })
    .collect()
}

impl Settings {
    /// Defaults, then `ml_scraper.toml` (or `path`, which must exist), then
    /// `ML_*` environment variables, e.g. `ML_CRAWL__MAX_PAGES=3`.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let c = &self.crawl;
        if c.min_delay_ms > c.max_delay_ms {
            return Err(SettingsError::Invalid(format!(
                "crawl.min_delay_ms ({}) exceeds crawl.max_delay_ms ({})",
                c.min_delay_ms, c.max_delay_ms
            )));
        }
        if self.categories.is_empty() {
            return Err(SettingsError::Invalid("no categories configured".into()));
        }
        for cat in &self.categories {
            if cat.category.trim().is_empty() {
                return Err(SettingsError::Invalid(format!(
                    "category for {} has an empty label",
                    cat.start_url
                )));
            }
            if cat.start_url.trim().is_empty() {
                return Err(SettingsError::Invalid(format!(
                    "category {} has no start_url",
                    cat.category
                )));
            }
        }
        for target in self.targets() {
            if target.items_per_page == 0 || target.max_pages == 0 {
                return Err(SettingsError::Invalid(format!(
                    "category {}: items_per_page and max_pages must be at least 1",
                    target.category
                )));
            }
        }
        Ok(())
    }

    pub fn targets(&self) -> Vec<CategoryTarget> {
        self.categories
            .iter()
            .map(|c| CategoryTarget {
                category: c.category.trim().to_string(),
                start_url: c.start_url.trim().to_string(),
                max_pages: c.max_pages.unwrap_or(self.crawl.max_pages),
                items_per_page: c.items_per_page.unwrap_or(self.crawl.items_per_page),
            })
            .collect()
    }

    pub fn pacing(&self) -> Pacing {
        let c = &self.crawl;
        Pacing {
            min_delay: Duration::from_millis(c.min_delay_ms),
            max_delay: Duration::from_millis(c.max_delay_ms),
            max_retries: c.max_retries,
            retry_backoff: Duration::from_millis(c.retry_backoff_ms),
        }
    }
}
