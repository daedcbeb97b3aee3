use crate::report;
use anyhow::{bail, Context, Result};
use config::AppConfig;
use harvester::{CatalogClient, HarvestSettings};
use isde_core::aggregate::RunTotals;
use isde_core::models::{Protocol, Verdict, Violation};
use isde_core::parsing::parse_record;
use isde_core::validation::{validate_record, Schema};
use pipeline::RunContext;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

/// Command line overrides for `run`.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub schema: Option<PathBuf>,
    pub markdown: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub audit: Option<PathBuf>,
}

pub fn harvest_settings(cfg: &AppConfig) -> HarvestSettings {
    let defaults = HarvestSettings::default();
    HarvestSettings {
        timeout: Duration::from_secs(cfg.harvest.timeout_secs.max(1)),
        max_pages: cfg.harvest.max_pages.max(1),
        page_size: cfg.harvest.page_size.max(1),
        user_agent: cfg.harvest.user_agent.clone().unwrap_or(defaults.user_agent),
    }
}

pub fn load_schema(path: &Path) -> Result<Arc<Schema>> {
    let schema =
        Schema::load(path).with_context(|| format!("Failed to load schema {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        documents = schema.documents().len(),
        elements = schema.element_count(),
        "Schema loaded"
    );
    Ok(Arc::new(schema))
}

/// One full monitoring run: harvest, check, aggregate, then write reports.
pub async fn run(
    cfg: &AppConfig,
    client: Arc<dyn CatalogClient>,
    overrides: RunOverrides,
) -> Result<RunTotals> {
    let endpoints = cfg.registry().context("Invalid endpoint registry")?;
    let schema_path = overrides.schema.unwrap_or_else(|| cfg.schema.path.clone());
    let schema = load_schema(&schema_path)?;

    let mut ctx = RunContext::new(endpoints, client, schema, cfg.harvest.workers);
    if let Some(audit_path) = overrides.audit.or_else(|| cfg.report.audit_path.clone()) {
        ctx = ctx.with_audit_log(&audit_path)?;
    }

    let output = pipeline::run(&ctx).await?;

    let markdown = overrides
        .markdown
        .unwrap_or_else(|| cfg.report.markdown_path.clone());
    report::write_markdown(&output.report, &markdown)?;
    if let Some(json) = overrides.json.or_else(|| cfg.report.json_path.clone()) {
        report::write_json(&output.report, &json)?;
    }
    Ok(output.report.totals)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XmlFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Collects `*.xml` files under each path. A path naming a file is taken as
/// is, whatever its extension.
pub fn scan_paths(paths: &[PathBuf]) -> Result<Vec<XmlFile>> {
    let mut result = Vec::new();
    for path in paths {
        if path.is_file() {
            let size_bytes = path.metadata().map(|m| m.len()).unwrap_or(0);
            result.push(XmlFile {
                path: path.clone(),
                size_bytes,
            });
            continue;
        }
        if !path.is_dir() {
            bail!("{} is neither a file nor a directory", path.display());
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let p = entry.path();
            if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
                if ext.eq_ignore_ascii_case("xml") {
                    let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    found.push(XmlFile {
                        path: p.to_path_buf(),
                        size_bytes,
                    });
                }
            }
        }
        tracing::debug!(dir = %path.display(), files = found.len(), "Scanned directory");
        result.extend(found);
    }
    Ok(result)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheck {
    pub path: PathBuf,
    pub record_id: String,
    pub verdict: Verdict,
    pub violations: Vec<Violation>,
    pub detail: Option<String>,
}

/// Validates local files the same way harvested payloads are validated.
pub fn validate_files(schema: &Schema, files: &[XmlFile]) -> Vec<FileCheck> {
    files
        .iter()
        .enumerate()
        .map(|(ordinal, file)| {
            let xml = match std::fs::read(&file.path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    return FileCheck {
                        path: file.path.clone(),
                        record_id: String::new(),
                        verdict: Verdict::ValidationError,
                        violations: Vec::new(),
                        detail: Some(format!("could not read file: {e}")),
                    }
                }
            };
            let record = parse_record("local", ordinal, &xml);
            let result = validate_record(schema, &record);
            FileCheck {
                path: file.path.clone(),
                record_id: result.record_id,
                verdict: result.verdict,
                violations: result.violations,
                detail: result.detail,
            }
        })
        .collect()
}

pub fn describe_check(check: &FileCheck) -> String {
    let mut out = format!("{}: {}", check.path.display(), check.verdict.label());
    if let Some(detail) = &check.detail {
        out.push_str(&format!(" ({detail})"));
    }
    for v in &check.violations {
        out.push_str(&format!("\n  {}: {}", v.location, v.message));
    }
    out
}

pub fn list_endpoints(cfg: &AppConfig) -> Result<Vec<String>> {
    let endpoints = cfg.registry()?;
    Ok(endpoints
        .iter()
        .map(|ep| {
            let (kind, listing) = match ep.protocol {
                Protocol::Csw => ("csw", ep.csw_url()),
                Protocol::Sitemap => ("sitemap", ep.sitemap_url()),
            };
            let owner = match &ep.organisation {
                Some(org) => format!("{}, {org}", ep.display_name),
                None => ep.display_name.clone(),
            };
            format!("{:<14} {kind:<8} {listing} ({owner})", ep.id)
        })
        .collect())
}
