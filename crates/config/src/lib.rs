use anyhow::{bail, Context, Result};
use isde_core::models::{Endpoint, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "isde-monitor";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<Endpoint>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            harvest: HarvestConfig::default(),
            schema: SchemaConfig::default(),
            report: ReportConfig::default(),
            endpoints: default_endpoints(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_client_kind")]
    pub kind: String, // "network" | "local"
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    pub user_agent: Option<String>,
    /// Snapshot directory for the `local` client.
    pub local_root: Option<PathBuf>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            kind: default_client_kind(),
            timeout_secs: default_timeout_secs(),
            max_pages: default_max_pages(),
            page_size: default_page_size(),
            workers: default_workers(),
            user_agent: None,
            local_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_schema_path")]
    pub path: PathBuf,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: default_schema_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_markdown_path")]
    pub markdown_path: PathBuf,
    pub json_path: Option<PathBuf>,
    pub audit_path: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            markdown_path: default_markdown_path(),
            json_path: None,
            audit_path: None,
        }
    }
}

fn default_client_kind() -> String {
    "network".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_pages() -> u32 {
    10
}

fn default_page_size() -> u32 {
    50
}

fn default_workers() -> usize {
    8
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("schemas/gmd/gmd.xsd")
}

fn default_markdown_path() -> PathBuf {
    PathBuf::from("isde_report.md")
}

/// The historical ISDE federation. GeoNetwork nodes registered by their
/// `catalog.search` page are harvested through their sitemap.
fn default_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new(
            "maynooth",
            "http://geonetwork.maynoothuniversity.ie:8080/geonetwork",
            "Maynooth University",
        ),
        Endpoint::new(
            "epa",
            "https://gis.epa.ie/geonetwork/srv/eng/catalog.search",
            "Environmental Protection Agency",
        )
        .with_protocol(Protocol::Sitemap),
        Endpoint::new(
            "gsi",
            "http://spatial.dcenr.gov.ie/GeologicalSurvey/geonetwork",
            "Geological Survey Ireland",
        ),
        Endpoint::new("ucc", "http://pips.ucc.ie/geonetwork", "University College Cork"),
        Endpoint::new(
            "marine",
            "http://data.marine.ie/geonetwork/srv/eng/catalog.search",
            "Marine Institute",
        )
        .with_protocol(Protocol::Sitemap),
        Endpoint::new(
            "isde",
            "http://www.isde.ie/geonetwork/srv/eng/catalog.search",
            "Irish Spatial Data Exchange",
        )
        .with_protocol(Protocol::Sitemap),
        Endpoint::new(
            "biodiversity",
            "http://metadata.biodiversityireland.ie/geonetwork",
            "National Biodiversity Data Centre",
        ),
        Endpoint::new(
            "ahg",
            "http://data.ahg.gov.ie/geonetwork",
            "Department of Arts, Heritage and the Gaeltacht",
        ),
    ]
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

/// Loads from an explicit file, creating it with defaults if it is missing.
pub fn load_from(path: &Path) -> Result<AppConfig> {
    let cfg: AppConfig = confy::load_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(cfg)
}

pub fn config_path() -> Result<PathBuf> {
    confy::get_configuration_file_path(APP_NAME, None).context("Failed to locate app config")
}

impl AppConfig {
    /// The validated endpoint registry, with URLs trimmed.
    pub fn registry(&self) -> Result<Vec<Endpoint>> {
        if self.endpoints.is_empty() {
            bail!("endpoint registry is empty");
        }
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.endpoints.len());
        for ep in &self.endpoints {
            let id = ep.id.trim();
            if id.is_empty() {
                bail!("endpoint '{}' has an empty id", ep.display_name);
            }
            if !seen.insert(id.to_string()) {
                bail!("duplicate endpoint id '{id}'");
            }
            let base_url = ep.base_url.trim();
            if base_url.is_empty() {
                bail!("endpoint '{id}' has an empty base URL");
            }
            let mut endpoint = ep.clone();
            endpoint.id = id.to_string();
            endpoint.base_url = base_url.to_string();
            endpoint.catalog_url = ep
                .catalog_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string);
            if endpoint.display_name.trim().is_empty() {
                endpoint.display_name = endpoint.id.clone();
            }
            out.push(endpoint);
        }
        Ok(out)
    }
}
