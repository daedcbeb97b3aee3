use super::{build_http_client, fetch, finish, CatalogClient, HarvestError, HarvestSettings};
use anyhow::Result;
use async_trait::async_trait;
use isde_core::models::{Endpoint, HarvestAttempt};
use isde_core::parsing::CSW_NS;
use std::sync::Arc;
use url::Url;

/// Harvests ISO 19139 records through CSW 2.0.2 `GetRecords` (KVP GET).
#[derive(Clone)]
pub struct CswClient {
    settings: HarvestSettings,
    http_client: reqwest::Client,
}

/// One `GetRecords` response.
#[derive(Debug, Default)]
pub(crate) struct CswPage {
    pub records: Vec<String>,
    pub matched: Option<u64>,
    pub returned: Option<u64>,
    pub next_record: Option<u64>,
}

impl CswClient {
    pub fn new(settings: HarvestSettings) -> Result<Arc<Self>> {
        let http_client = build_http_client(&settings)?;
        Ok(Arc::new(Self {
            settings,
            http_client,
        }))
    }

    fn page_url(&self, endpoint: &Endpoint, start_position: u64) -> Result<Url, HarvestError> {
        let base = endpoint.csw_url();
        let start = start_position.to_string();
        let max = self.settings.page_size.to_string();
        Url::parse_with_params(
            &base,
            &[
                ("SERVICE", "CSW"),
                ("VERSION", "2.0.2"),
                ("REQUEST", "GetRecords"),
                ("RESULTTYPE", "results"),
                ("OUTPUTFORMAT", "application/xml"),
                ("TYPENAMES", "gmd:MD_Metadata"),
                ("NAMESPACE", "xmlns(gmd=http://www.isotc211.org/2005/gmd)"),
                ("OUTPUTSCHEMA", "http://www.isotc211.org/2005/gmd"),
                ("ELEMENTSETNAME", "full"),
                ("CONSTRAINTLANGUAGE", "FILTER"),
                ("STARTPOSITION", start.as_str()),
                ("MAXRECORDS", max.as_str()),
            ],
        )
        .map_err(|e| HarvestError::Connection(format!("invalid catalog URL '{base}': {e}")))
    }

    async fn harvest_pages(
        &self,
        endpoint: &Endpoint,
        attempt: &mut HarvestAttempt,
    ) -> Result<(), HarvestError> {
        let mut start: u64 = 1;
        while attempt.pages_fetched < self.settings.max_pages {
            let url = self.page_url(endpoint, start)?;
            let (status, body) = fetch(&self.http_client, url.as_str()).await?;
            attempt.http_status.get_or_insert(status);
            let page = parse_get_records(&body)?;
            attempt.pages_fetched += 1;
            if attempt.records_matched.is_none() {
                attempt.records_matched = page.matched;
            }

            let count = page.records.len();
            tracing::debug!(
                endpoint = %endpoint.id,
                start,
                records = count,
                reported = ?page.returned,
                matched = ?page.matched,
                next = ?page.next_record,
                "Fetched CSW page"
            );
            attempt.raw_payloads.extend(page.records);
            if count == 0 {
                break;
            }

            match page.next_record {
                Some(next) if next > start && page.matched.map_or(true, |m| next <= m) => {
                    start = next
                }
                _ => return Ok(()),
            }
        }

        if attempt.pages_fetched >= self.settings.max_pages {
            tracing::debug!(
                endpoint = %endpoint.id,
                max_pages = self.settings.max_pages,
                "Page ceiling reached"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for CswClient {
    async fn harvest(&self, endpoint: &Endpoint) -> HarvestAttempt {
        let mut attempt = HarvestAttempt::new(&endpoint.id);
        let result = self.harvest_pages(endpoint, &mut attempt).await;
        finish(attempt, result)
    }
}

/// Splits a `GetRecordsResponse` into standalone record documents.
pub(crate) fn parse_get_records(body: &str) -> Result<CswPage, HarvestError> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| HarvestError::Protocol(format!("response is not XML: {e}")))?;
    let root = doc.root_element();

    if root.tag_name().name() == "ExceptionReport" {
        let text = root
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "ExceptionText")
            .and_then(|n| n.text())
            .map(str::trim)
            .unwrap_or("no exception text");
        return Err(HarvestError::Protocol(format!("catalog exception: {text}")));
    }

    let results = root
        .descendants()
        .find(|n| {
            n.is_element()
                && n.tag_name().name() == "SearchResults"
                && n.tag_name().namespace() == Some(CSW_NS)
        })
        .ok_or_else(|| HarvestError::Protocol("response has no csw:SearchResults".to_string()))?;

    let number = |name: &str| {
        results
            .attribute(name)
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    Ok(CswPage {
        records: results
            .children()
            .filter(|n| n.is_element())
            .map(|n| standalone_xml(doc.input_text(), n))
            .collect(),
        matched: number("numberOfRecordsMatched"),
        returned: number("numberOfRecordsReturned"),
        next_record: number("nextRecord"),
    })
}

/// Byte offset just past the element's start tag name.
fn name_end(fragment: &str) -> usize {
    fragment
        .char_indices()
        .skip(1)
        .find(|(_, c)| c.is_whitespace() || *c == '>' || *c == '/')
        .map(|(i, _)| i)
        .unwrap_or(fragment.len())
}

/// Attribute names written on a start tag, namespace declarations included.
/// `rest` starts just past the element name.
fn written_attributes(mut rest: &str) -> Vec<&str> {
    let mut names = Vec::new();
    loop {
        rest = rest.trim_start();
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(rest.len());
        if end == 0 {
            break;
        }
        names.push(&rest[..end]);
        rest = rest[end..].trim_start();
        let Some(value) = rest.strip_prefix('=') else {
            break;
        };
        rest = value.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        match rest[1..].find(quote) {
            Some(close) => rest = &rest[close + 2..],
            None => break,
        }
    }
    names
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// Slices an element out of its response and re-declares the namespaces it
/// inherited, so the record parses on its own.
fn standalone_xml(input: &str, node: roxmltree::Node) -> String {
    let fragment = &input[node.range()];
    let split = name_end(fragment);
    let written = written_attributes(&fragment[split..]);

    let mut declarations = String::new();
    for ns in node.namespaces() {
        let prefix = match ns.name() {
            Some("xml") => continue,
            Some(prefix) => prefix,
            None => "",
        };
        let declared_here = written.iter().any(|attr| match attr.strip_prefix("xmlns") {
            Some("") => prefix.is_empty(),
            Some(rest) => rest.strip_prefix(':') == Some(prefix),
            None => false,
        });
        if declared_here {
            continue;
        }
        if prefix.is_empty() {
            declarations.push_str(&format!(" xmlns=\"{}\"", escape_attr(ns.uri())));
        } else {
            declarations.push_str(&format!(" xmlns:{}=\"{}\"", prefix, escape_attr(ns.uri())));
        }
    }

    if declarations.is_empty() {
        return fragment.to_string();
    }
    let mut out = String::with_capacity(fragment.len() + declarations.len());
    out.push_str(&fragment[..split]);
    out.push_str(&declarations);
    out.push_str(&fragment[split..]);
    out
}
