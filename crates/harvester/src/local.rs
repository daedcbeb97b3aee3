use super::{finish, CatalogClient, HarvestError, HarvestSettings};
use async_trait::async_trait;
use isde_core::models::{Endpoint, HarvestAttempt};
use std::path::PathBuf;
use std::sync::Arc;

/// Serves record payloads from `<root>/<endpoint id>/*.xml`, in file name
/// order. Used for offline runs and replaying saved harvests.
#[derive(Clone)]
pub struct LocalClient {
    root: PathBuf,
    settings: HarvestSettings,
}

impl LocalClient {
    pub fn new(root: impl Into<PathBuf>, settings: HarvestSettings) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            settings,
        })
    }

    async fn read_records(
        &self,
        endpoint: &Endpoint,
        attempt: &mut HarvestAttempt,
    ) -> Result<(), HarvestError> {
        let dir = self.root.join(&endpoint.id);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| HarvestError::Connection(format!("cannot read {}: {e}", dir.display())))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarvestError::Connection(format!("cannot list {}: {e}", dir.display())))?
        {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("xml")) {
                files.push(path);
            }
        }
        files.sort();
        attempt.records_matched = Some(files.len() as u64);
        attempt.pages_fetched = 1;

        for path in files.iter().take(self.settings.record_ceiling()) {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| HarvestError::Connection(format!("cannot read {}: {e}", path.display())))?;
            attempt
                .raw_payloads
                .push(String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for LocalClient {
    async fn harvest(&self, endpoint: &Endpoint) -> HarvestAttempt {
        let mut attempt = HarvestAttempt::new(&endpoint.id);
        let result = self.read_records(endpoint, &mut attempt).await;
        finish(attempt, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isde_core::models::HarvestOutcome;
    use std::fs;

    #[tokio::test]
    async fn reads_xml_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("epa");
        fs::create_dir(&node).unwrap();
        fs::write(node.join("b.xml"), "<b/>").unwrap();
        fs::write(node.join("a.xml"), "<a/>").unwrap();
        fs::write(node.join("notes.txt"), "ignored").unwrap();

        let client = LocalClient::new(dir.path(), HarvestSettings::default());
        let attempt = client.harvest(&Endpoint::new("epa", "http://epa.ie", "EPA")).await;
        assert_eq!(attempt.outcome, HarvestOutcome::Success);
        assert_eq!(attempt.raw_payloads, vec!["<a/>", "<b/>"]);
        assert_eq!(attempt.records_matched, Some(2));
    }

    #[tokio::test]
    async fn missing_directory_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalClient::new(dir.path(), HarvestSettings::default());
        let attempt = client.harvest(&Endpoint::new("gone", "http://gone", "Gone")).await;
        assert_eq!(attempt.outcome, HarvestOutcome::ConnectionError);
        assert!(attempt.detail.unwrap().contains("gone"));
    }

    #[tokio::test]
    async fn respects_the_record_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("n");
        fs::create_dir(&node).unwrap();
        for i in 0..5 {
            fs::write(node.join(format!("{i}.xml")), "<r/>").unwrap();
        }
        let settings = HarvestSettings {
            max_pages: 2,
            page_size: 2,
            ..HarvestSettings::default()
        };
        let client = LocalClient::new(dir.path(), settings);
        let attempt = client.harvest(&Endpoint::new("n", "http://n", "N")).await;
        assert_eq!(attempt.raw_payloads.len(), 4);
    }
}
