use anyhow::{Context, Result};
use isde_core::aggregate::{NodeHealthSummary, RunReport, ValidityRow};
use isde_core::models::Verdict;
use std::fmt::Write as _;
use std::path::Path;

const UP: &str = "🟢";
const DOWN: &str = "🔴";
const WARN: &str = "🟠";

/// Cell text with the characters that would break a Markdown table row
/// flattened.
fn cell(text: &str) -> String {
    text.replace(['\r', '\n'], " ").replace('|', "\\|").trim().to_string()
}

fn date_cell(date: Option<chrono::NaiveDateTime>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

fn node_row(out: &mut String, node: &NodeHealthSummary) {
    let name = cell(&node.display_name);
    let status = node.http_status.map(|s| s.to_string()).unwrap_or_default();
    if node.reachable {
        let count = match node.records_matched {
            Some(matched) if matched as usize != node.record_count => {
                format!("{} of {matched}", node.record_count)
            }
            _ => node.record_count.to_string(),
        };
        let detail = match node.records_not_checked {
            0 => String::new(),
            n => format!("{n} not checked"),
        };
        let _ = write!(
            out,
            "\n| {UP} | [{name}]({}) | {status} | {count} | {} | {detail} |",
            node.base_url,
            date_cell(node.last_modified),
        );
    } else {
        let detail = node.error_detail.as_deref().map(cell).unwrap_or_default();
        let _ = write!(
            out,
            "\n| {DOWN} | [{name}]({}) | {status} | | | {detail} |",
            node.base_url,
        );
    }
}

fn record_label(row: &ValidityRow) -> String {
    let name = if !row.title.is_empty() {
        row.title.as_str()
    } else if !row.record_id.is_empty() {
        row.record_id.as_str()
    } else {
        "untitled record"
    };
    format!("{} ({} #{})", cell(name), row.endpoint_id, row.ordinal)
}

fn invalid_reason(row: &ValidityRow) -> String {
    let reasons: Vec<String> = row
        .violations
        .iter()
        .map(|v| format!("`{}`: {}", v.location, cell(&v.message)))
        .collect();
    reasons.join("<br>")
}

/// Renders the run report as the dashboard's Markdown page.
pub fn render_markdown(report: &RunReport) -> String {
    let t = &report.totals;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "# ISDE Network Monitoring Report - {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M")
    );
    out.push_str("| Number of Nodes | Number of Nodes Up | Number of Nodes Down | Records Checked | Records Not Checked | Records with Malformed XML | Records with Invalid XML | Records with Valid XML |\n");
    out.push_str("|---|---|---|---|---|---|---|---|\n");
    let _ = writeln!(
        out,
        "| {} | {UP} {} | {DOWN} {} | {UP} {} | {WARN} {} | {WARN} {} | {WARN} {} | {UP} {} |\n",
        t.nodes,
        t.nodes_up,
        t.nodes_down,
        t.records_checked,
        t.records_not_checked,
        t.malformed,
        t.invalid,
        t.valid
    );

    out.push_str("### Contents\n\n");
    out.push_str("- [Network Status](#network-status)\n");
    out.push_str("- [Latest Metadata](#latest-metadata)\n");
    out.push_str("- [Malformed XML Records](#malformed-xml-records)\n");
    out.push_str("- [Invalid XML Records](#invalid-xml-records)\n");
    out.push_str("- [Records Not Validated](#records-not-validated)\n");
    out.push_str("- [Records Not Checked](#records-not-checked)\n\n");

    out.push_str("## Network Status\n\n");
    out.push_str("| | Node | HTTP Response Code | Number of Records | Last Modified | Detail |\n");
    out.push_str("|---|---|---|---|---|---|");
    for node in &report.node_health {
        node_row(&mut out, node);
    }
    out.push_str("\n\n");

    out.push_str("## Latest Metadata\n\n");
    out.push_str("| Modified | Node | Record | Title |\n");
    out.push_str("|---|---|---|---|");
    for row in &report.latest_metadata {
        let _ = write!(
            out,
            "\n| {} | {} | {} | {} |",
            date_cell(row.modified_date),
            row.endpoint_id,
            cell(&row.record_id),
            cell(&row.title)
        );
    }
    out.push_str("\n\n");

    out.push_str("## Malformed XML Records\n");
    let malformed: Vec<&ValidityRow> = report.validity.iter().filter(|r| r.malformed).collect();
    if malformed.is_empty() {
        out.push_str("\n- None");
    }
    for row in malformed {
        let _ = write!(
            out,
            "\n- {} #{}: {}",
            row.endpoint_id,
            row.ordinal,
            row.detail.as_deref().map(cell).unwrap_or_default()
        );
    }
    out.push_str("\n\n");

    out.push_str("## Invalid XML Records\n\n");
    out.push_str("| Record | Invalid Reason |\n");
    out.push_str("|---|---|");
    for row in report.validity.iter().filter(|r| r.verdict == Verdict::Invalid) {
        let _ = write!(out, "\n| {} | {} |", record_label(row), invalid_reason(row));
    }
    out.push_str("\n\n");

    out.push_str("## Records Not Validated\n");
    let unchecked: Vec<&ValidityRow> = report
        .validity
        .iter()
        .filter(|r| r.verdict == Verdict::ValidationError && !r.malformed)
        .collect();
    if unchecked.is_empty() {
        out.push_str("\n- None");
    }
    for row in unchecked {
        let _ = write!(
            out,
            "\n- {}: {}",
            record_label(row),
            row.detail.as_deref().map(cell).unwrap_or_default()
        );
    }
    out.push_str("\n\n");

    out.push_str("## Records Not Checked\n");
    if report.not_checked.is_empty() {
        out.push_str("\n- None");
    }
    for row in &report.not_checked {
        let _ = write!(out, "\n- {}: <{}> {}", row.endpoint_id, row.url, cell(&row.reason));
    }
    out.push('\n');
    out
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Overwrites the previous report.
pub fn write_markdown(report: &RunReport, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, render_markdown(report))
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "Markdown report written");
    Ok(())
}

pub fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write JSON report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "JSON report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use isde_core::aggregate::aggregate;
    use isde_core::models::{
        Endpoint, HarvestAttempt, HarvestOutcome, RecordFailure, ValidationResult, Violation,
    };
    use isde_core::parsing::parse_record;

    fn sample_report() -> RunReport {
        let endpoints = vec![
            Endpoint::new("marine", "http://data.marine.ie/geonetwork", "Marine Institute"),
            Endpoint::new("ucc", "http://pips.ucc.ie/geonetwork", "UCC"),
        ];
        let mut up = HarvestAttempt::new("marine");
        up.records_matched = Some(4);
        up.http_status = Some(200);
        up.not_checked = vec![RecordFailure {
            url: "http://data.marine.ie/geonetwork/srv/api/records/m4/formatters/xml".to_string(),
            reason: "HTTP 404 from x".to_string(),
        }];
        let down = HarvestAttempt::new("ucc")
            .failed(HarvestOutcome::HttpError { status: 503 }, "HTTP 503 from x".to_string());

        let records = vec![
            parse_record(
                "marine",
                0,
                "<metadata><identifier>m1</identifier><title>Seabed | survey</title><modified>2024-02-01</modified></metadata>",
            ),
            parse_record("marine", 1, "<metadata><identifier>m2</identifier></metadata>"),
            parse_record("marine", 2, "<metadata><oops"),
        ];
        let results = vec![
            ValidationResult {
                endpoint_id: "marine".to_string(),
                ordinal: 0,
                record_id: "m1".to_string(),
                verdict: Verdict::Valid,
                violations: vec![],
                detail: None,
            },
            ValidationResult {
                endpoint_id: "marine".to_string(),
                ordinal: 1,
                record_id: "m2".to_string(),
                verdict: Verdict::Invalid,
                violations: vec![Violation::new(
                    "/metadata/title",
                    "missing required element 'title'",
                )],
                detail: None,
            },
        ];
        aggregate(&endpoints, &[up, down], &records, &results)
    }

    #[test]
    fn markdown_has_every_section() {
        let md = render_markdown(&sample_report());
        assert!(md.starts_with("# ISDE Network Monitoring Report - "));
        assert!(md.contains("| 2 | 🟢 1 | 🔴 1 | 🟢 3 | 🟠 1 | 🟠 1 | 🟠 1 | 🟢 1 |"));
        assert!(md.contains(
            "| 🟢 | [Marine Institute](http://data.marine.ie/geonetwork) | 200 | 3 of 4 | 2024-02-01 | 1 not checked |"
        ));
        assert!(md.contains("| 🔴 | [UCC](http://pips.ucc.ie/geonetwork) | 503 | | | HTTP 503 from x |"));
        assert!(md.contains("| 2024-02-01 | marine | m1 | Seabed \\| survey |"));
        assert!(md.contains("\n- marine #2: "));
        assert!(md.contains("| m2 (marine #1) | `/metadata/title`: missing required element 'title' |"));
        assert!(md.contains("## Records Not Validated\n\n- None"));
        assert!(md.contains(
            "## Records Not Checked\n\n- marine: <http://data.marine.ie/geonetwork/srv/api/records/m4/formatters/xml> HTTP 404 from x\n"
        ));
    }

    #[test]
    fn empty_sections_say_none() {
        let report = aggregate(
            &[Endpoint::new("a", "http://a", "A")],
            &[HarvestAttempt::new("a")],
            &[],
            &[],
        );
        let md = render_markdown(&report);
        assert!(md.contains("## Malformed XML Records\n\n- None"));
        assert!(md.contains("## Records Not Checked\n\n- None"));
        assert!(md.contains("| 🟢 | [A](http://a) |  | 0 |  |  |"));
    }

    #[test]
    fn reports_are_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = dir.path().join("out/report.md");
        let json_path = dir.path().join("out/report.json");
        let report = sample_report();

        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(&md_path, "stale").unwrap();
        write_markdown(&report, &md_path).unwrap();
        write_json(&report, &json_path).unwrap();

        let md = std::fs::read_to_string(&md_path).unwrap();
        assert!(!md.contains("stale"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["totals"]["nodes_down"], 1);
        assert_eq!(json["validity"].as_array().unwrap().len(), 3);
        assert_eq!(json["node_health"][1]["http_status"], 503);
        assert_eq!(json["totals"]["records_not_checked"], 1);
    }
}
