//! Archive file names: `<customer>__<document>__<YYYYMMDDTHHMMSSmmmZ>.<ext>`.
//!
//! Idents are percent-encoded so that only `[A-Za-z0-9-]` appear literally.
//! The encoded form never contains `_`, so `__` separates the three fields
//! unambiguously. Each encoded ident is capped at [`MAX_ENCODED_IDENT_LEN`]
//! bytes to keep names below the usual 255-byte filesystem limit.

use chrono::{DateTime, NaiveDateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";
const SEPARATOR: &str = "__";

/// Bytes literal in an encoded ident; everything else becomes `%XX`.
const IDENT_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-');

/// Longest encoded ident accepted in a file name.
pub const MAX_ENCODED_IDENT_LEN: usize = 100;

/// Fields recovered from an archive file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub customer_ident: String,
    pub document_ident: String,
    pub saved_at: DateTime<Utc>,
}

pub fn file_name(
    customer_ident: &str,
    document_ident: &str,
    saved_at: DateTime<Utc>,
    extension: &str,
) -> String {
    format!(
        "{}{SEPARATOR}{}{SEPARATOR}{}.{}",
        escape(customer_ident),
        escape(document_ident),
        saved_at.format(TIMESTAMP_FORMAT),
        extension
    )
}

pub fn parse_file_name(name: &str, extension: &str) -> Option<ParsedName> {
    let stem = name.strip_suffix(extension)?.strip_suffix('.')?;

    let mut parts = stem.split(SEPARATOR);
    let customer = parts.next()?;
    let document = parts.next()?;
    let timestamp = parts.next()?;
    if parts.next().is_some() || customer.is_empty() || document.is_empty() {
        return None;
    }

    let saved_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();

    Some(ParsedName {
        customer_ident: unescape(customer)?,
        document_ident: unescape(document)?,
        saved_at,
    })
}

/// Name of the in-progress file for `final_name`. Leading dot keeps it out of globs.
pub fn temp_name(final_name: &str) -> String {
    format!(".{}.tmp", final_name)
}

/// Whether `ident` fits in an archive file name once encoded.
pub fn ident_fits(ident: &str) -> bool {
    escape(ident).len() <= MAX_ENCODED_IDENT_LEN
}

fn escape(ident: &str) -> String {
    utf8_percent_encode(ident, IDENT_SET).to_string()
}

/// Decode an encoded ident. Only the exact form [`escape`] produces is accepted.
fn unescape(escaped: &str) -> Option<String> {
    let decoded = percent_decode_str(escaped).decode_utf8().ok()?;
    if escape(&decoded) != escaped {
        return None;
    }
    Some(decoded.into_owned())
}

/// The archive name a temp file stands for, if it is one of ours.
pub fn temp_target<'a>(name: &'a str, extension: &str) -> Option<&'a str> {
    let target = name.strip_prefix('.')?.strip_suffix(".tmp")?;
    parse_file_name(target, extension).map(|_| target)
}
