mod audit;

pub use audit::{AuditEvent, AuditLog};

use anyhow::{Context, Result};
use harvester::CatalogClient;
use isde_core::aggregate::{aggregate, RunReport};
use isde_core::models::{
    Endpoint, HarvestAttempt, HarvestOutcome, ParsedRecord, ValidationResult,
};
use isde_core::parsing::parse_record;
use isde_core::validation::{validate_record, Schema};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Everything one run needs. Built at the start of a run and dropped at the
/// end; nothing outlives it.
pub struct RunContext {
    pub run_id: Uuid,
    pub endpoints: Vec<Endpoint>,
    pub client: Arc<dyn CatalogClient + 'static>,
    pub schema: Arc<Schema>,
    pub workers: usize,
    audit: Option<AuditLog>,
}

pub struct RunOutput {
    pub run_id: Uuid,
    pub attempts: Vec<HarvestAttempt>,
    pub records: Vec<ParsedRecord>,
    pub results: Vec<ValidationResult>,
    pub report: RunReport,
}

impl RunContext {
    pub fn new(
        endpoints: Vec<Endpoint>,
        client: Arc<dyn CatalogClient + 'static>,
        schema: Arc<Schema>,
        workers: usize,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            endpoints,
            client,
            schema,
            workers: workers.max(1),
            audit: None,
        }
    }

    pub fn with_audit_log(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.audit = Some(AuditLog::create(path)?);
        Ok(self)
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            if let Err(e) = log.write(&event) {
                tracing::warn!(path = %log.path().display(), error = %e, "Failed to write audit event");
            }
        }
    }
}

/// Harvests every endpoint on a bounded pool of tasks. Attempts come back in
/// registry order whatever order the tasks finish in.
pub async fn harvest_all(ctx: &RunContext) -> Vec<HarvestAttempt> {
    let permits = Arc::new(Semaphore::new(ctx.workers));
    let mut handles = Vec::with_capacity(ctx.endpoints.len());

    for endpoint in &ctx.endpoints {
        let permits = Arc::clone(&permits);
        let client = Arc::clone(&ctx.client);
        let endpoint = endpoint.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;
            tracing::debug!(endpoint = %endpoint.id, "Harvest started");
            client.harvest(&endpoint).await
        }));
    }

    let mut attempts = Vec::with_capacity(handles.len());
    for (endpoint, handle) in ctx.endpoints.iter().zip(handles) {
        let attempt = match handle.await {
            Ok(attempt) => attempt,
            Err(e) => {
                tracing::error!(endpoint = %endpoint.id, error = %e, "Harvest task failed");
                HarvestAttempt::new(&endpoint.id).failed(
                    HarvestOutcome::ConnectionError,
                    format!("harvest task failed: {e}"),
                )
            }
        };
        ctx.audit({
            let event = AuditEvent::new("endpoint_harvested", &ctx.run_id.to_string())
                .with_endpoint(&endpoint.id)
                .with_outcome(attempt.outcome.label())
                .with_records(attempt.raw_payloads.len());
            match &attempt.detail {
                Some(detail) if !attempt.outcome.is_success() => event.with_error(detail.clone()),
                _ => event,
            }
        });
        attempts.push(attempt);
    }
    attempts
}

/// Parses and validates the payloads of every successful attempt. Payloads
/// of failed attempts are never looked at.
pub fn check_records(
    schema: &Schema,
    attempts: &[HarvestAttempt],
) -> (Vec<ParsedRecord>, Vec<ValidationResult>) {
    let mut records = Vec::new();
    let mut results = Vec::new();
    for attempt in attempts.iter().filter(|a| a.outcome.is_success()) {
        for (ordinal, xml) in attempt.raw_payloads.iter().enumerate() {
            let record = parse_record(&attempt.endpoint_id, ordinal, xml);
            results.push(validate_record(schema, &record));
            records.push(record);
        }
    }
    (records, results)
}

pub async fn run(ctx: &RunContext) -> Result<RunOutput> {
    let run_id = ctx.run_id.to_string();
    tracing::info!(run_id = %run_id, endpoints = ctx.endpoints.len(), workers = ctx.workers, "Run started");
    ctx.audit(AuditEvent::new("run_started", &run_id).with_records(ctx.endpoints.len()));

    let attempts = harvest_all(ctx).await;

    let schema = Arc::clone(&ctx.schema);
    let (attempts, records, results) = tokio::task::spawn_blocking(move || {
        let (records, results) = check_records(&schema, &attempts);
        (attempts, records, results)
    })
    .await
    .context("Record checks panicked")?;

    let report = aggregate(&ctx.endpoints, &attempts, &records, &results);
    let totals = &report.totals;
    tracing::info!(
        run_id = %run_id,
        nodes_up = totals.nodes_up,
        nodes_down = totals.nodes_down,
        records = totals.records_checked,
        valid = totals.valid,
        invalid = totals.invalid,
        malformed = totals.malformed,
        not_checked = totals.records_not_checked,
        "Run completed"
    );
    ctx.audit(
        AuditEvent::new("run_completed", &run_id)
            .with_outcome(format!("{} up, {} down", totals.nodes_up, totals.nodes_down))
            .with_records(totals.records_checked),
    );

    Ok(RunOutput {
        run_id: ctx.run_id,
        attempts,
        records,
        results,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use isde_core::models::Verdict;
    use std::collections::HashMap;
    use std::time::Duration;

    const XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
        <xs:element name="metadata">
            <xs:complexType>
                <xs:sequence>
                    <xs:element name="identifier" type="xs:string"/>
                    <xs:element name="title" type="xs:string"/>
                </xs:sequence>
            </xs:complexType>
        </xs:element>
    </xs:schema>"#;

    enum Script {
        Records(Vec<&'static str>, u64),
        Fail(HarvestOutcome),
        Panic,
    }

    /// Replays scripted harvests; the delay lets tests reorder completion.
    struct ScriptedClient {
        scripts: HashMap<String, Script>,
    }

    #[async_trait]
    impl CatalogClient for ScriptedClient {
        async fn harvest(&self, endpoint: &Endpoint) -> HarvestAttempt {
            let mut attempt = HarvestAttempt::new(&endpoint.id);
            match self.scripts.get(&endpoint.id) {
                Some(Script::Records(payloads, delay_ms)) => {
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                    attempt.raw_payloads = payloads.iter().map(|p| p.to_string()).collect();
                    attempt
                }
                Some(Script::Fail(outcome)) => {
                    attempt.raw_payloads = vec![
                        "<metadata><identifier>partial</identifier><title>t</title></metadata>"
                            .to_string(),
                    ];
                    attempt.failed(outcome.clone(), "scripted failure".to_string())
                }
                Some(Script::Panic) => panic!("client blew up"),
                None => attempt.failed(HarvestOutcome::ConnectionError, "unknown".to_string()),
            }
        }
    }

    fn context(scripts: Vec<(&str, Script)>, workers: usize) -> RunContext {
        let endpoints = scripts
            .iter()
            .map(|(id, _)| Endpoint::new(id, &format!("http://{id}.example/geonetwork"), id))
            .collect();
        let client = Arc::new(ScriptedClient {
            scripts: scripts.into_iter().map(|(id, s)| (id.to_string(), s)).collect(),
        });
        let schema = Arc::new(Schema::parse_str(XSD).unwrap());
        RunContext::new(endpoints, client, schema, workers)
    }

    const VALID_A: &str = "<metadata><identifier>a1</identifier><title>One</title></metadata>";
    const VALID_B: &str = "<metadata><identifier>a2</identifier><title>Two</title></metadata>";

    #[tokio::test]
    async fn one_node_up_one_timed_out() {
        let ctx = context(
            vec![
                ("a", Script::Records(vec![VALID_A, VALID_B], 0)),
                ("b", Script::Fail(HarvestOutcome::Timeout)),
            ],
            4,
        );
        let out = run(&ctx).await.unwrap();

        let health = &out.report.node_health;
        assert_eq!(health.len(), 2);
        assert!(health[0].reachable);
        assert_eq!(health[0].record_count, 2);
        assert!(!health[1].reachable);
        assert_eq!(health[1].record_count, 0);
        assert_eq!(out.report.latest_metadata.len(), 2);
        assert_eq!(out.report.validity.len(), 2);
        assert!(out.report.validity.iter().all(|v| v.verdict == Verdict::Valid));
        // partial payloads of the failed node are never parsed
        assert!(out.records.iter().all(|r| r.endpoint_id == "a"));
    }

    #[tokio::test]
    async fn malformed_and_invalid_records() {
        let ctx = context(
            vec![(
                "a",
                Script::Records(vec!["<metadata><title>x</title></metadata>", "<metadata><oops>"], 0),
            )],
            1,
        );
        let out = run(&ctx).await.unwrap();
        let validity = &out.report.validity;
        assert_eq!(validity[0].verdict, Verdict::Invalid);
        assert_eq!(validity[0].violations[0].location, "/metadata/identifier");
        assert_eq!(validity[1].verdict, Verdict::ValidationError);
        assert_eq!(validity[1].violation_count, 0);
        assert_eq!(out.report.latest_metadata.len(), 1);
        assert_eq!(out.report.totals.malformed, 1);
    }

    #[tokio::test]
    async fn panicking_harvest_does_not_abort_the_run() {
        let ctx = context(
            vec![
                ("a", Script::Panic),
                ("b", Script::Records(vec![VALID_A], 0)),
            ],
            2,
        );
        let out = run(&ctx).await.unwrap();
        assert_eq!(out.attempts[0].outcome, HarvestOutcome::ConnectionError);
        assert!(out.attempts[0]
            .detail
            .as_deref()
            .unwrap()
            .starts_with("harvest task failed"));
        assert!(out.attempts[1].outcome.is_success());
        assert_eq!(out.report.totals.nodes_up, 1);
    }

    #[tokio::test]
    async fn attempts_follow_registry_order() {
        let ctx = context(
            vec![
                ("slow", Script::Records(vec![VALID_A], 150)),
                ("medium", Script::Records(vec![VALID_A], 50)),
                ("fast", Script::Records(vec![VALID_A], 0)),
            ],
            3,
        );
        let attempts = harvest_all(&ctx).await;
        let ids: Vec<&str> = attempts.iter().map(|a| a.endpoint_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "medium", "fast"]);
    }

    #[tokio::test]
    async fn audit_log_records_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let ctx = context(
            vec![
                ("a", Script::Records(vec![VALID_A], 0)),
                ("b", Script::Fail(HarvestOutcome::HttpError { status: 404 })),
            ],
            2,
        )
        .with_audit_log(&path)
        .unwrap();
        run(&ctx).await.unwrap();

        let events: Vec<AuditEvent> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["run_started", "endpoint_harvested", "endpoint_harvested", "run_completed"]
        );
        assert_eq!(events[2].outcome.as_deref(), Some("http 404"));
        assert_eq!(events[2].error.as_deref(), Some("scripted failure"));
        assert!(events.iter().all(|e| e.run_id == ctx.run_id.to_string()));
    }
}
