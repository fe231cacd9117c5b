use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{BoundingBox, Month};
use crate::error::FetchError;
use crate::grid::RequestTemplate;
use crate::registry::registry_bounding_box;
use crate::safety::{AllowList, DEFAULT_TIMEOUT};

pub const DEFAULT_CONFIG_FILE: &str = "era5-fetch.json";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub years: Vec<YearEntry>,
    #[serde(default)]
    pub months: Option<Vec<Month>>,
    pub output_dir: String,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub area: Option<BoundingBox>,
    #[serde(default)]
    pub turbine_registry: Option<String>,
    #[serde(default)]
    pub registry_margin: Option<f64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
    #[serde(default)]
    pub transfer_timeout_secs: Option<u64>,
    #[serde(default)]
    pub accepted_fingerprints: Vec<String>,
    #[serde(default)]
    pub api: Option<ApiSection>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum YearEntry {
    Single(i32),
    Range(YearRange),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct YearRange {
    pub from: i32,
    pub to: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiSection {
    pub url: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AreaSource {
    Explicit(BoundingBox),
    Registry { path: PathBuf, margin: f64 },
}

impl AreaSource {
    pub fn bounding_box(&self) -> Result<BoundingBox, FetchError> {
        match self {
            AreaSource::Explicit(bbox) => Ok(*bbox),
            AreaSource::Registry { path, margin } => registry_bounding_box(path, *margin),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub years: BTreeSet<i32>,
    pub months: BTreeSet<Month>,
    pub dataset: String,
    pub template: RequestTemplate,
    pub area: AreaSource,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub transfer_timeout: Duration,
    pub allow_list: AllowList,
    pub api: Option<ApiSection>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FetchError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(FetchError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FetchError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FetchError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, FetchError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let mut years = BTreeSet::new();
        for entry in &config.years {
            match entry {
                YearEntry::Single(year) => {
                    years.insert(*year);
                }
                YearEntry::Range(range) => {
                    if range.from > range.to {
                        return Err(FetchError::ConfigInvalid(format!(
                            "year range {}..{} is reversed",
                            range.from, range.to
                        )));
                    }
                    years.extend(range.from..=range.to);
                }
            }
        }
        if years.is_empty() {
            return Err(FetchError::ConfigInvalid("no years configured".to_string()));
        }

        let months: BTreeSet<Month> = match config.months {
            Some(months) => months.into_iter().collect(),
            None => Month::all().collect(),
        };
        if months.is_empty() {
            return Err(FetchError::ConfigInvalid("no months configured".to_string()));
        }

        if config.output_dir.trim().is_empty() {
            return Err(FetchError::ConfigInvalid("output_dir is empty".to_string()));
        }

        let area = match (config.area, config.turbine_registry) {
            (Some(bbox), _) => {
                bbox.validate()?;
                AreaSource::Explicit(bbox)
            }
            (None, Some(path)) => AreaSource::Registry {
                path: PathBuf::from(path),
                margin: config.registry_margin.unwrap_or(0.0),
            },
            (None, None) => return Err(FetchError::MissingArea),
        };

        let max_attempts = config.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(FetchError::ConfigInvalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let mut allow_list = AllowList::builtin();
        allow_list.extend(&config.accepted_fingerprints);

        Ok(ResolvedConfig {
            schema_version,
            years,
            months,
            dataset: config
                .dataset
                .unwrap_or_else(|| "reanalysis-era5-single-levels".to_string()),
            template: RequestTemplate {
                output_dir: Utf8PathBuf::from(config.output_dir),
                file_prefix: config
                    .file_prefix
                    .unwrap_or_else(|| "wind_velocity_usa".to_string()),
                product_type: config
                    .product_type
                    .unwrap_or_else(|| "reanalysis".to_string()),
                format: config.format.unwrap_or_else(|| "netcdf".to_string()),
                variables: config.variables.unwrap_or_else(default_variables),
            },
            area,
            max_attempts,
            retry_delay: Duration::from_secs(config.retry_delay_secs.unwrap_or(0)),
            transfer_timeout: config
                .transfer_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            allow_list,
            api: config.api,
        })
    }
}

pub fn default_variables() -> Vec<String> {
    vec![
        "100m_u_component_of_wind".to_string(),
        "100m_v_component_of_wind".to_string(),
        "10m_u_component_of_wind".to_string(),
        "10m_v_component_of_wind".to_string(),
    ]
}
