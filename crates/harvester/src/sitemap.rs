use super::{build_http_client, fetch, fetch_text, finish, CatalogClient, HarvestError, HarvestSettings};
use anyhow::Result;
use async_trait::async_trait;
use isde_core::models::{Endpoint, HarvestAttempt, RecordFailure};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::sync::Arc;

/// Harvests GeoNetwork nodes through `portal.sitemap`, fetching each listed
/// record's XML rendition.
#[derive(Clone)]
pub struct SitemapClient {
    settings: HarvestSettings,
    http_client: reqwest::Client,
}

impl SitemapClient {
    pub fn new(settings: HarvestSettings) -> Result<Arc<Self>> {
        let http_client = build_http_client(&settings)?;
        Ok(Arc::new(Self {
            settings,
            http_client,
        }))
    }

    async fn harvest_records(
        &self,
        endpoint: &Endpoint,
        attempt: &mut HarvestAttempt,
    ) -> Result<(), HarvestError> {
        let listing_url = endpoint.sitemap_url();
        let (status, body) = fetch(&self.http_client, &listing_url).await?;
        attempt.http_status = Some(status);
        let locations = parse_sitemap(&body)?;
        attempt.pages_fetched = 1;
        attempt.records_matched = Some(locations.len() as u64);

        // Only the listing decides whether the node is up.
        for location in locations.iter().take(self.settings.record_ceiling()) {
            let url = record_url(location);
            match fetch_text(&self.http_client, &url).await {
                Ok(xml) => attempt.raw_payloads.push(xml),
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint.id, url = %url, error = %e, "Record not fetched");
                    attempt.not_checked.push(RecordFailure {
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for SitemapClient {
    async fn harvest(&self, endpoint: &Endpoint) -> HarvestAttempt {
        let mut attempt = HarvestAttempt::new(&endpoint.id);
        let result = self.harvest_records(endpoint, &mut attempt).await;
        finish(attempt, result)
    }
}

pub(crate) fn record_url(location: &str) -> String {
    format!("{}/formatters/xml", location.trim().trim_end_matches('/'))
}

/// Collects the `<url><loc>` entries of a sitemap `urlset`.
pub(crate) fn parse_sitemap(body: &str) -> Result<Vec<String>, HarvestError> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut locations = Vec::new();
    let mut saw_urlset = false;
    let mut in_url = false;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"urlset" => saw_urlset = true,
                b"url" => in_url = true,
                b"loc" if in_url => current = Some(String::new()),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(loc) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| HarvestError::Protocol(format!("bad sitemap text: {e}")))?;
                    loc.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(loc) = current.as_mut() {
                    loc.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"url" => in_url = false,
                b"loc" => {
                    if let Some(loc) = current.take() {
                        let loc = loc.trim();
                        if !loc.is_empty() {
                            locations.push(loc.to_string());
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(HarvestError::Protocol(format!(
                    "sitemap is not XML at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
    }

    if !saw_urlset {
        return Err(HarvestError::Protocol("listing is not a sitemap urlset".to_string()));
    }
    Ok(locations)
}
