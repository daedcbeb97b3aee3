use crate::models::{
    Endpoint, HarvestAttempt, ParseOutcome, ParsedRecord, ValidationResult, Verdict, Violation,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealthSummary {
    pub endpoint_id: String,
    pub display_name: String,
    pub base_url: String,
    pub reachable: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub record_count: usize,
    pub records_matched: Option<u64>,
    /// Listing status for a reachable node, failing status otherwise.
    pub http_status: Option<u16>,
    /// Listed records whose own fetch failed.
    pub records_not_checked: usize,
    /// Most recent modified date among the node's well-formed records.
    pub last_modified: Option<NaiveDateTime>,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestMetadataRow {
    pub endpoint_id: String,
    pub ordinal: usize,
    pub record_id: String,
    pub title: String,
    pub modified_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotCheckedRow {
    pub endpoint_id: String,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityRow {
    pub endpoint_id: String,
    pub ordinal: usize,
    pub record_id: String,
    pub title: String,
    pub verdict: Verdict,
    pub violation_count: usize,
    pub violations: Vec<Violation>,
    pub detail: Option<String>,
    /// The payload was not well-formed XML.
    pub malformed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub nodes: usize,
    pub nodes_up: usize,
    pub nodes_down: usize,
    pub records_checked: usize,
    pub malformed: usize,
    pub invalid: usize,
    pub valid: usize,
    /// Records the validator could not process, malformed ones included.
    pub validation_errors: usize,
    /// Listed records of reachable nodes that could not be fetched.
    pub records_not_checked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub node_health: Vec<NodeHealthSummary>,
    pub latest_metadata: Vec<LatestMetadataRow>,
    pub validity: Vec<ValidityRow>,
    pub not_checked: Vec<NotCheckedRow>,
    pub totals: RunTotals,
}

fn health_row(endpoint: &Endpoint, attempt: Option<&HarvestAttempt>, records: &[&ParsedRecord]) -> NodeHealthSummary {
    let Some(attempt) = attempt else {
        return NodeHealthSummary {
            endpoint_id: endpoint.id.clone(),
            display_name: endpoint.display_name.clone(),
            base_url: endpoint.base_url.clone(),
            reachable: false,
            last_checked: None,
            record_count: 0,
            records_matched: None,
            http_status: None,
            records_not_checked: 0,
            last_modified: None,
            error_detail: Some("not harvested".to_string()),
        };
    };

    let reachable = attempt.outcome.is_success();
    let error_detail = if reachable {
        None
    } else {
        Some(
            attempt
                .detail
                .clone()
                .unwrap_or_else(|| attempt.outcome.label()),
        )
    };
    NodeHealthSummary {
        endpoint_id: endpoint.id.clone(),
        display_name: endpoint.display_name.clone(),
        base_url: endpoint.base_url.clone(),
        reachable,
        last_checked: Some(attempt.timestamp),
        record_count: records.len(),
        records_matched: attempt.records_matched,
        http_status: if reachable {
            attempt.http_status
        } else {
            attempt.outcome.http_status()
        },
        records_not_checked: if reachable { attempt.not_checked.len() } else { 0 },
        last_modified: records
            .iter()
            .filter(|r| r.parse_outcome == ParseOutcome::Ok)
            .filter_map(|r| r.modified_date)
            .max(),
        error_detail,
    }
}

fn validity_row(record: &ParsedRecord, result: Option<&ValidationResult>) -> ValidityRow {
    let (verdict, violations, detail) = match (record.parse_outcome, result) {
        (ParseOutcome::Malformed, result) => (
            Verdict::ValidationError,
            Vec::new(),
            result
                .and_then(|r| r.detail.clone())
                .or_else(|| Some("record is not well-formed XML".to_string())),
        ),
        (ParseOutcome::Ok, Some(result)) => {
            (result.verdict, result.violations.clone(), result.detail.clone())
        }
        (ParseOutcome::Ok, None) => (
            Verdict::ValidationError,
            Vec::new(),
            Some("record was not validated".to_string()),
        ),
    };
    ValidityRow {
        endpoint_id: record.endpoint_id.clone(),
        ordinal: record.ordinal,
        record_id: record.record_id.clone(),
        title: record.title.clone(),
        verdict,
        violation_count: violations.len(),
        violations,
        detail,
        malformed: record.parse_outcome == ParseOutcome::Malformed,
    }
}

/// Builds the run's summary tables. Rows never depend on the order in which
/// endpoints finished harvesting.
pub fn aggregate(
    endpoints: &[Endpoint],
    attempts: &[HarvestAttempt],
    records: &[ParsedRecord],
    results: &[ValidationResult],
) -> RunReport {
    let attempts: HashMap<&str, &HarvestAttempt> = attempts
        .iter()
        .map(|a| (a.endpoint_id.as_str(), a))
        .collect();
    let reachable: HashSet<&str> = attempts
        .values()
        .filter(|a| a.outcome.is_success())
        .map(|a| a.endpoint_id.as_str())
        .collect();
    let results: HashMap<(&str, usize), &ValidationResult> = results
        .iter()
        .map(|r| ((r.endpoint_id.as_str(), r.ordinal), r))
        .collect();

    let mut by_endpoint: HashMap<&str, Vec<&ParsedRecord>> = HashMap::new();
    for record in records {
        if reachable.contains(record.endpoint_id.as_str()) {
            by_endpoint
                .entry(record.endpoint_id.as_str())
                .or_default()
                .push(record);
        }
    }

    let node_health: Vec<NodeHealthSummary> = endpoints
        .iter()
        .map(|ep| {
            let recs = by_endpoint
                .get(ep.id.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();
            health_row(ep, attempts.get(ep.id.as_str()).copied(), recs)
        })
        .collect();

    let kept: Vec<&ParsedRecord> = by_endpoint.values().flatten().copied().collect();

    let mut latest_metadata: Vec<LatestMetadataRow> = kept
        .iter()
        .filter(|r| r.parse_outcome == ParseOutcome::Ok)
        .map(|r| LatestMetadataRow {
            endpoint_id: r.endpoint_id.clone(),
            ordinal: r.ordinal,
            record_id: r.record_id.clone(),
            title: r.title.clone(),
            modified_date: r.modified_date,
        })
        .collect();
    // Option orders None first, so a reversed comparison puts undated rows last.
    latest_metadata.sort_by(|a, b| {
        b.modified_date
            .cmp(&a.modified_date)
            .then_with(|| a.endpoint_id.cmp(&b.endpoint_id))
            .then_with(|| a.record_id.cmp(&b.record_id))
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });

    let mut validity: Vec<ValidityRow> = kept
        .iter()
        .map(|r| validity_row(r, results.get(&(r.endpoint_id.as_str(), r.ordinal)).copied()))
        .collect();
    validity.sort_by(|a, b| {
        a.endpoint_id
            .cmp(&b.endpoint_id)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });

    let not_checked: Vec<NotCheckedRow> = endpoints
        .iter()
        .filter(|ep| reachable.contains(ep.id.as_str()))
        .filter_map(|ep| attempts.get(ep.id.as_str()))
        .flat_map(|a| {
            a.not_checked.iter().map(move |f| NotCheckedRow {
                endpoint_id: a.endpoint_id.clone(),
                url: f.url.clone(),
                reason: f.reason.clone(),
            })
        })
        .collect();

    let nodes_up = node_health.iter().filter(|n| n.reachable).count();
    let totals = RunTotals {
        nodes: node_health.len(),
        nodes_up,
        nodes_down: node_health.len() - nodes_up,
        records_checked: validity.len(),
        malformed: validity.iter().filter(|v| v.malformed).count(),
        invalid: validity.iter().filter(|v| v.verdict == Verdict::Invalid).count(),
        valid: validity.iter().filter(|v| v.verdict == Verdict::Valid).count(),
        validation_errors: validity
            .iter()
            .filter(|v| v.verdict == Verdict::ValidationError)
            .count(),
        records_not_checked: not_checked.len(),
    };

    RunReport {
        generated_at: Utc::now(),
        node_health,
        latest_metadata,
        validity,
        not_checked,
        totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HarvestOutcome, RecordFailure};
    use crate::parsing::parse_record;

    fn record(endpoint: &str, ordinal: usize, id: &str, modified: Option<&str>) -> ParsedRecord {
        let date = modified
            .map(|d| format!("<modified>{d}</modified>"))
            .unwrap_or_default();
        parse_record(
            endpoint,
            ordinal,
            &format!("<metadata><identifier>{id}</identifier><title>T {id}</title>{date}</metadata>"),
        )
    }

    fn result(rec: &ParsedRecord, verdict: Verdict, violations: Vec<Violation>) -> ValidationResult {
        ValidationResult {
            endpoint_id: rec.endpoint_id.clone(),
            ordinal: rec.ordinal,
            record_id: rec.record_id.clone(),
            verdict,
            violations,
            detail: None,
        }
    }

    fn endpoints() -> Vec<Endpoint> {
        vec![
            Endpoint::new("a", "http://a.example/geonetwork", "Node A"),
            Endpoint::new("b", "http://b.example/geonetwork", "Node B"),
        ]
    }

    #[test]
    fn reachable_and_timed_out_nodes() {
        let recs = vec![
            record("a", 0, "r1", Some("2021-01-01")),
            record("a", 1, "r2", Some("2022-01-01")),
        ];
        let results: Vec<_> = recs.iter().map(|r| result(r, Verdict::Valid, vec![])).collect();
        let attempts = vec![
            HarvestAttempt::new("b").failed(HarvestOutcome::Timeout, "timed out after 30s".into()),
            HarvestAttempt::new("a"),
        ];

        let report = aggregate(&endpoints(), &attempts, &recs, &results);

        assert_eq!(report.node_health.len(), 2);
        let a = &report.node_health[0];
        assert_eq!((a.endpoint_id.as_str(), a.reachable, a.record_count), ("a", true, 2));
        assert_eq!(
            a.last_modified,
            chrono::NaiveDate::from_ymd_opt(2022, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        let b = &report.node_health[1];
        assert_eq!((b.endpoint_id.as_str(), b.reachable, b.record_count), ("b", false, 0));
        assert_eq!(b.error_detail.as_deref(), Some("timed out after 30s"));

        assert_eq!(report.latest_metadata.len(), 2);
        assert_eq!(report.latest_metadata[0].record_id, "r2");
        assert_eq!(report.validity.len(), 2);
        assert!(report.validity.iter().all(|v| v.verdict == Verdict::Valid));
        assert_eq!(report.totals.nodes_up, 1);
        assert_eq!(report.totals.nodes_down, 1);
        assert_eq!(report.totals.valid, 2);
    }

    #[test]
    fn malformed_records_are_validation_errors_without_metadata_rows() {
        let bad = parse_record("a", 0, "<metadata><unclosed>");
        let results = vec![ValidationResult {
            endpoint_id: "a".into(),
            ordinal: 0,
            record_id: String::new(),
            verdict: Verdict::ValidationError,
            violations: vec![],
            detail: Some("unexpected end of stream".into()),
        }];
        let report = aggregate(&endpoints()[..1], &[HarvestAttempt::new("a")], &[bad], &results);

        assert!(report.latest_metadata.is_empty());
        assert_eq!(report.validity.len(), 1);
        assert_eq!(report.validity[0].verdict, Verdict::ValidationError);
        assert_eq!(report.validity[0].violation_count, 0);
        assert_eq!(report.totals.malformed, 1);
        assert_eq!(report.totals.validation_errors, 1);
    }

    #[test]
    fn records_from_failed_harvests_are_ignored() {
        let stray = record("b", 0, "leftover", None);
        let attempts = vec![
            HarvestAttempt::new("a"),
            HarvestAttempt::new("b").failed(HarvestOutcome::HttpError { status: 503 }, "503".into()),
        ];
        let report = aggregate(&endpoints(), &attempts, &[stray], &[]);
        assert!(report.validity.is_empty());
        assert_eq!(report.node_health[1].http_status, Some(503));
        assert_eq!(report.node_health[1].record_count, 0);
    }

    #[test]
    fn unfetched_records_are_counted_for_reachable_nodes_only() {
        let failure = |url: &str| RecordFailure {
            url: url.to_string(),
            reason: "HTTP 404".to_string(),
        };
        let mut up = HarvestAttempt::new("a");
        up.http_status = Some(200);
        up.not_checked = vec![failure("http://a/records/2"), failure("http://a/records/5")];
        let mut down = HarvestAttempt::new("b")
            .failed(HarvestOutcome::HttpError { status: 500 }, "500".into());
        down.http_status = Some(200);
        down.not_checked = vec![failure("http://b/records/1")];

        let report = aggregate(&endpoints(), &[down, up], &[], &[]);
        assert_eq!(report.totals.records_not_checked, 2);
        assert_eq!(report.node_health[0].records_not_checked, 2);
        assert_eq!(report.node_health[0].http_status, Some(200));
        assert_eq!(report.node_health[1].records_not_checked, 0);
        assert_eq!(report.node_health[1].http_status, Some(500));
        let urls: Vec<&str> = report.not_checked.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["http://a/records/2", "http://a/records/5"]);
    }

    #[test]
    fn missing_attempt_is_unreachable() {
        let report = aggregate(&endpoints(), &[HarvestAttempt::new("a")], &[], &[]);
        assert!(!report.node_health[1].reachable);
        assert!(report.node_health[1].last_checked.is_none());
    }

    #[test]
    fn latest_metadata_ordering_ignores_input_order() {
        let recs = vec![
            record("b", 0, "z", Some("2020-05-05")),
            record("a", 1, "undated", None),
            record("b", 1, "a", Some("2020-05-05")),
            record("a", 0, "m", Some("2020-05-05")),
            record("a", 2, "newest", Some("2024-01-01")),
        ];
        let attempts = vec![HarvestAttempt::new("b"), HarvestAttempt::new("a")];
        let report = aggregate(&endpoints(), &attempts, &recs, &[]);

        let order: Vec<(&str, &str)> = report
            .latest_metadata
            .iter()
            .map(|r| (r.endpoint_id.as_str(), r.record_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("a", "newest"), ("a", "m"), ("b", "a"), ("b", "z"), ("a", "undated")]
        );

        let validity: Vec<(&str, usize)> = report
            .validity
            .iter()
            .map(|v| (v.endpoint_id.as_str(), v.ordinal))
            .collect();
        assert_eq!(validity, vec![("a", 0), ("a", 1), ("a", 2), ("b", 0), ("b", 1)]);
        // not validated at all
        assert!(report
            .validity
            .iter()
            .all(|v| v.verdict == Verdict::ValidationError));
    }

    #[test]
    fn invalid_rows_carry_their_violations() {
        let rec = record("a", 0, "r1", None);
        let results = vec![result(
            &rec,
            Verdict::Invalid,
            vec![Violation::new("/metadata/identifier", "missing required element 'identifier'")],
        )];
        let report = aggregate(&endpoints()[..1], &[HarvestAttempt::new("a")], &[rec], &results);
        assert_eq!(report.validity[0].verdict, Verdict::Invalid);
        assert_eq!(report.validity[0].violation_count, 1);
        assert_eq!(report.totals.invalid, 1);
    }
}
