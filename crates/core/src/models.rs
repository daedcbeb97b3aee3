use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a node exposes its record listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// OGC Catalog Service for the Web, `GetRecords` paged listing.
    #[default]
    Csw,
    /// GeoNetwork `portal.sitemap` followed by one XML fetch per record.
    Sitemap,
}

/// A catalog node in the federation. Immutable once the registry is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub base_url: String,
    pub display_name: String,
    #[serde(default)]
    pub organisation: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    /// Overrides the listing URL derived from `base_url`.
    #[serde(default)]
    pub catalog_url: Option<String>,
}

impl Endpoint {
    pub fn new(id: &str, base_url: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            base_url: base_url.trim().to_string(),
            display_name: display_name.to_string(),
            organisation: None,
            protocol: Protocol::Csw,
            catalog_url: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_catalog_url(mut self, url: &str) -> Self {
        self.catalog_url = Some(url.trim().to_string());
        self
    }

    /// CSW endpoint for this node. GeoNetwork nodes registered by their
    /// `catalog.search` page expose CSW next to it; older nodes registered by
    /// their root expose it under `geonetwork/srv/eng/csw`.
    pub fn csw_url(&self) -> String {
        if let Some(url) = &self.catalog_url {
            return url.clone();
        }
        let base = self.base_url.trim();
        if let Some(idx) = base.find("catalog.search") {
            return format!("{}csw", &base[..idx]);
        }
        match base.rfind("/geonetwork") {
            Some(idx) => format!("{}/geonetwork/srv/eng/csw", &base[..idx]),
            None => format!("{}/geonetwork/srv/eng/csw", base.trim_end_matches('/')),
        }
    }

    /// GeoNetwork sitemap listing for this node.
    pub fn sitemap_url(&self) -> String {
        if let Some(url) = &self.catalog_url {
            return url.clone();
        }
        let base = self.base_url.trim();
        let prefix = match base.find("catalog.search") {
            Some(idx) => &base[..idx],
            None => base,
        };
        let prefix = prefix.replace("/eng/", "/api/");
        if prefix.ends_with('/') {
            format!("{prefix}portal.sitemap")
        } else {
            format!("{prefix}/portal.sitemap")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HarvestOutcome {
    Success,
    Timeout,
    HttpError { status: u16 },
    ConnectionError,
    /// The node answered but the listing was not a usable catalog response.
    ProtocolError,
}

impl HarvestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HarvestOutcome::Success)
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            HarvestOutcome::HttpError { status } => Some(*status),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            HarvestOutcome::Success => "success".to_string(),
            HarvestOutcome::Timeout => "timeout".to_string(),
            HarvestOutcome::HttpError { status } => format!("http {status}"),
            HarvestOutcome::ConnectionError => "connection error".to_string(),
            HarvestOutcome::ProtocolError => "protocol error".to_string(),
        }
    }
}

/// A listed record whose own fetch failed. The node stays up; the record is
/// reported as not checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub url: String,
    pub reason: String,
}

/// Result of harvesting one endpoint. Payloads fetched before a failure are
/// kept, but only a `Success` attempt is ever parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestAttempt {
    pub endpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: HarvestOutcome,
    pub raw_payloads: Vec<String>,
    pub pages_fetched: u32,
    /// Total reported by the catalog, when it reports one.
    pub records_matched: Option<u64>,
    /// Status of the node's first listing response.
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub not_checked: Vec<RecordFailure>,
    pub detail: Option<String>,
}

impl HarvestAttempt {
    pub fn new(endpoint_id: &str) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            timestamp: Utc::now(),
            outcome: HarvestOutcome::Success,
            raw_payloads: Vec::new(),
            pages_fetched: 0,
            records_matched: None,
            http_status: None,
            not_checked: Vec::new(),
            detail: None,
        }
    }

    pub fn failed(mut self, outcome: HarvestOutcome, detail: String) -> Self {
        self.outcome = outcome;
        self.detail = Some(detail);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseOutcome {
    Ok,
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStandard {
    Iso19139,
    DublinCore,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub endpoint_id: String,
    /// Position of the payload within its endpoint's harvest.
    pub ordinal: usize,
    pub record_id: String,
    pub title: String,
    pub modified_date: Option<NaiveDateTime>,
    pub standard: Option<MetadataStandard>,
    pub sha256: String,
    #[serde(skip_serializing, default)]
    pub raw_xml: String,
    pub parse_outcome: ParseOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Invalid,
    ValidationError,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Valid => "valid",
            Verdict::Invalid => "invalid",
            Verdict::ValidationError => "validation error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub location: String,
    pub message: String,
}

impl Violation {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub endpoint_id: String,
    pub ordinal: usize,
    pub record_id: String,
    pub verdict: Verdict,
    pub violations: Vec<Violation>,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csw_url_from_catalog_search_page() {
        let ep = Endpoint::new(
            "epa",
            "https://gis.epa.ie/geonetwork/srv/eng/catalog.search",
            "EPA",
        );
        assert_eq!(ep.csw_url(), "https://gis.epa.ie/geonetwork/srv/eng/csw");
    }

    #[test]
    fn csw_url_from_geonetwork_root_with_trailing_space() {
        let ep = Endpoint::new("ucc", "http://pips.ucc.ie/geonetwork ", "UCC");
        assert_eq!(ep.base_url, "http://pips.ucc.ie/geonetwork");
        assert_eq!(ep.csw_url(), "http://pips.ucc.ie/geonetwork/srv/eng/csw");
    }

    #[test]
    fn csw_url_ignores_geonetwork_in_host_name() {
        let ep = Endpoint::new(
            "maynooth",
            "http://geonetwork.maynoothuniversity.ie:8080/geonetwork",
            "Maynooth",
        );
        assert_eq!(
            ep.csw_url(),
            "http://geonetwork.maynoothuniversity.ie:8080/geonetwork/srv/eng/csw"
        );
    }

    #[test]
    fn explicit_catalog_url_wins() {
        let ep = Endpoint::new("x", "http://example.org/geonetwork", "X")
            .with_catalog_url("http://example.org/csw ");
        assert_eq!(ep.csw_url(), "http://example.org/csw");
        assert_eq!(ep.sitemap_url(), "http://example.org/csw");
    }

    #[test]
    fn sitemap_url_swaps_language_for_api() {
        let ep = Endpoint::new(
            "isde",
            "http://www.isde.ie/geonetwork/srv/eng/catalog.search",
            "ISDE",
        );
        assert_eq!(
            ep.sitemap_url(),
            "http://www.isde.ie/geonetwork/srv/api/portal.sitemap"
        );
    }

    #[test]
    fn outcome_helpers() {
        assert!(HarvestOutcome::Success.is_success());
        assert_eq!(HarvestOutcome::HttpError { status: 503 }.http_status(), Some(503));
        assert_eq!(HarvestOutcome::Timeout.http_status(), None);
        assert_eq!(HarvestOutcome::HttpError { status: 404 }.label(), "http 404");
    }
}
