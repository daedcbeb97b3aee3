use crate::models::{MetadataStandard, ParseOutcome, ParsedRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};

pub const GMD_NS: &str = "http://www.isotc211.org/2005/gmd";
pub const GCO_NS: &str = "http://www.isotc211.org/2005/gco";
pub const CSW_NS: &str = "http://www.opengis.net/cat/csw/2.0.2";
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
pub const DCT_NS: &str = "http://purl.org/dc/terms/";

pub fn compute_sha256_hex(xml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(xml.as_bytes());
    let bytes = hasher.finalize();
    hex::encode(bytes)
}

/// One step of an element path. `ns` of `None` matches any namespace, and a
/// `name` of `*` matches any element.
#[derive(Debug, Clone, Copy)]
struct Step {
    ns: Option<&'static str>,
    name: &'static str,
}

const fn gmd(name: &'static str) -> Step {
    Step { ns: Some(GMD_NS), name }
}

const fn gco(name: &'static str) -> Step {
    Step { ns: Some(GCO_NS), name }
}

const fn dc(name: &'static str) -> Step {
    Step { ns: Some(DC_NS), name }
}

const fn dct(name: &'static str) -> Step {
    Step { ns: Some(DCT_NS), name }
}

const fn local(name: &'static str) -> Step {
    Step { ns: None, name }
}

const ANY: Step = Step { ns: None, name: "*" };

/// Element paths for each field, tried in order, relative to the root.
struct FieldPaths {
    identifier: &'static [&'static [Step]],
    title: &'static [&'static [Step]],
    modified: &'static [&'static [Step]],
}

const ISO_19139: FieldPaths = FieldPaths {
    identifier: &[&[gmd("fileIdentifier"), gco("CharacterString")]],
    title: &[&[
        gmd("identificationInfo"),
        ANY,
        gmd("citation"),
        gmd("CI_Citation"),
        gmd("title"),
        gco("CharacterString"),
    ]],
    modified: &[
        &[gmd("dateStamp"), gco("DateTime")],
        &[gmd("dateStamp"), gco("Date")],
    ],
};

const DUBLIN_CORE: FieldPaths = FieldPaths {
    identifier: &[&[dc("identifier")]],
    title: &[&[dc("title")]],
    modified: &[&[dct("modified")], &[dc("date")]],
};

const GENERIC: FieldPaths = FieldPaths {
    identifier: &[&[local("identifier")], &[local("fileIdentifier")]],
    title: &[&[local("title")]],
    modified: &[&[local("modified")], &[local("dateStamp")], &[local("date")]],
};

impl MetadataStandard {
    pub fn detect(root: roxmltree::Node) -> Self {
        let tag = root.tag_name();
        match (tag.namespace(), tag.name()) {
            (Some(GMD_NS), "MD_Metadata") => MetadataStandard::Iso19139,
            (Some(CSW_NS), "Record" | "SummaryRecord" | "BriefRecord") => {
                MetadataStandard::DublinCore
            }
            _ => MetadataStandard::Generic,
        }
    }

    fn paths(&self) -> &'static FieldPaths {
        match self {
            MetadataStandard::Iso19139 => &ISO_19139,
            MetadataStandard::DublinCore => &DUBLIN_CORE,
            MetadataStandard::Generic => &GENERIC,
        }
    }
}

fn step_matches(node: roxmltree::Node, step: &Step) -> bool {
    if !node.is_element() {
        return false;
    }
    let tag = node.tag_name();
    if step.name != "*" && tag.name() != step.name {
        return false;
    }
    match step.ns {
        Some(ns) => tag.namespace() == Some(ns),
        None => true,
    }
}

fn find_element<'a, 'input: 'a>(
    node: roxmltree::Node<'a, 'input>,
    path: &[Step],
) -> Option<roxmltree::Node<'a, 'input>> {
    if path.is_empty() {
        return Some(node);
    }
    for child in node.children() {
        if step_matches(child, &path[0]) {
            if path.len() == 1 {
                return Some(child);
            }
            if let Some(found) = find_element(child, &path[1..]) {
                return Some(found);
            }
        }
    }
    None
}

fn get_text_at_path(doc: &roxmltree::Document, path: &[Step]) -> Option<String> {
    find_element(doc.root_element(), path)
        .and_then(|n| n.text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn first_text(doc: &roxmltree::Document, paths: &[&[Step]]) -> Option<String> {
    paths.iter().find_map(|p| get_text_at_path(doc, p))
}

/// Parses the date forms catalogs put in `dateStamp`/`modified`. A bare date
/// is taken as midnight.
pub fn parse_metadata_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt);
        }
    }
    let date_part = value.split('T').next().unwrap_or(value);
    let date_part = date_part.trim_end_matches('Z');
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parses one harvested payload. Never fails: XML that is not well-formed is
/// recorded as `Malformed` with empty fields.
pub fn parse_record(endpoint_id: &str, ordinal: usize, raw_xml: &str) -> ParsedRecord {
    let sha256 = compute_sha256_hex(raw_xml);
    let mut record = ParsedRecord {
        endpoint_id: endpoint_id.to_string(),
        ordinal,
        record_id: String::new(),
        title: String::new(),
        modified_date: None,
        standard: None,
        sha256,
        raw_xml: raw_xml.to_string(),
        parse_outcome: ParseOutcome::Malformed,
    };

    let doc = match roxmltree::Document::parse(raw_xml) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(endpoint = %endpoint_id, ordinal, error = %e, "malformed record");
            return record;
        }
    };

    let standard = MetadataStandard::detect(doc.root_element());
    let paths = standard.paths();

    record.record_id = first_text(&doc, paths.identifier).unwrap_or_default();
    record.title = first_text(&doc, paths.title).unwrap_or_default();
    record.modified_date = first_text(&doc, paths.modified)
        .as_deref()
        .and_then(parse_metadata_date);
    record.standard = Some(standard);
    record.parse_outcome = ParseOutcome::Ok;
    record
}
