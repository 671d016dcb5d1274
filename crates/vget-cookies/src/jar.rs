//! Netscape cookie-jar parsing and rendering.
//!
//! The format is tab-separated records, one per line:
//! `domain  include_subdomains  path  secure  expiration_epoch  name  value`.
//! Comment lines begin with `#`. This is what the extractor's `--cookies`
//! flag consumes.

use chrono::{DateTime, Utc};

use crate::error::{CookieError, CookieResult};

/// One cookie record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieRecord {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Expiration as a unix timestamp; 0 means a session cookie
    pub expiration_epoch: i64,
    pub name: String,
    pub value: String,
}

impl CookieRecord {
    /// Whether the record is expired at `now`. Session cookies never are.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_epoch != 0 && self.expiration_epoch < now.timestamp()
    }
}

/// Parse a jar, skipping comments and records already expired at `now`.
///
/// An empty surviving set makes the jar invalid.
pub fn parse_jar(text: &str, now: DateTime<Utc>) -> CookieResult<Vec<CookieRecord>> {
    let mut records = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            return Err(CookieError::invalid_bundle(format!(
                "line {}: expected 7 tab-separated fields, got {}",
                lineno + 1,
                fields.len()
            )));
        }

        let record = CookieRecord {
            domain: fields[0].to_string(),
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            expiration_epoch: fields[4].parse().map_err(|_| {
                CookieError::invalid_bundle(format!("line {}: bad expiration", lineno + 1))
            })?,
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        };

        if !record.is_expired(now) {
            records.push(record);
        }
    }

    if records.is_empty() {
        return Err(CookieError::invalid_bundle(
            "no unexpired cookie records remain",
        ));
    }

    Ok(records)
}

/// Render records back to jar text, with the conventional header.
pub fn render_jar(records: &[CookieRecord]) -> String {
    let mut out = String::from("# Netscape HTTP Cookie File\n");
    for r in records {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            r.domain,
            if r.include_subdomains { "TRUE" } else { "FALSE" },
            r.path,
            if r.secure { "TRUE" } else { "FALSE" },
            r.expiration_epoch,
            r.name,
            r.value
        ));
    }
    out
}

/// Distinct domains covered by a record set.
pub fn domains(records: &[CookieRecord]) -> Vec<String> {
    let mut out: Vec<String> = records
        .iter()
        .map(|r| r.domain.trim_start_matches('.').to_ascii_lowercase())
        .collect();
    out.sort();
    out.dedup();
    out
}
