use super::csw::CswClient;
use super::sitemap::SitemapClient;
use super::{CatalogClient, HarvestSettings};
use anyhow::Result;
use async_trait::async_trait;
use isde_core::models::{Endpoint, HarvestAttempt, Protocol};
use std::sync::Arc;

/// Routes each endpoint to the client for its registered protocol.
pub struct NetworkClient {
    csw: Arc<CswClient>,
    sitemap: Arc<SitemapClient>,
}

impl NetworkClient {
    pub fn new(settings: HarvestSettings) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            csw: CswClient::new(settings.clone())?,
            sitemap: SitemapClient::new(settings)?,
        }))
    }
}

#[async_trait]
impl CatalogClient for NetworkClient {
    async fn harvest(&self, endpoint: &Endpoint) -> HarvestAttempt {
        match endpoint.protocol {
            Protocol::Csw => self.csw.harvest(endpoint).await,
            Protocol::Sitemap => self.sitemap.harvest(endpoint).await,
        }
    }
}
