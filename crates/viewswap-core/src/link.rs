//! Submitted links and their identifiers
//!
//! Link identifiers are bijective base-26 numerals over `a..=z`, the same
//! scheme spreadsheets use for column names: `a`, `b`, … `z`, `aa`, `ab`, …
//! They increase monotonically with submission order.

use std::cmp::Ordering;
use std::fmt::{self, Display};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::ParticipantId;

/// Canonical short-link prefix
pub const SHORT_LINK_PREFIX: &str = "https://opr.news/";

/// Host that identifies the long link form
pub const LONG_LINK_HOST: &str = "operanewsapp.com";

/// Longest submission accepted, in bytes after trimming
///
/// Keeps every encoded link record well under the segment record limit.
pub const MAX_URL_LEN: usize = 2048;

/// Query parameter carrying the article token in long links
const NEWS_ENTRY_PARAM: &str = "news_entry_id=";

/// Base-26 link identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    /// The identifier assigned to the first link ever submitted
    pub fn first() -> Self {
        Self("a".to_string())
    }

    /// Wrap an existing identifier without validation
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier only contains `a..=z` (case-insensitive)
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_alphabetic())
    }

    /// The identifier following this one
    ///
    /// A corrupted identifier (anything outside `a..=z`) restarts the
    /// sequence at `a`.
    pub fn next(&self) -> LinkId {
        let lowered = self.0.to_ascii_lowercase();
        if !lowered.bytes().all(|b| b.is_ascii_lowercase()) {
            return LinkId::first();
        }

        let mut digits = lowered.into_bytes();
        let mut carry = true;
        for digit in digits.iter_mut().rev() {
            if *digit == b'z' {
                *digit = b'a';
            } else {
                *digit += 1;
                carry = false;
                break;
            }
        }
        if carry {
            digits.insert(0, b'a');
        }

        // Digits are ASCII by construction
        LinkId(digits.into_iter().map(char::from).collect())
    }
}

impl Ord for LinkId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for LinkId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which population a link was submitted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    /// Submitted by a privileged participant
    Operator,
    /// Submitted by a regular participant
    Participant,
}

impl PoolKind {
    pub fn opposite(self) -> PoolKind {
        match self {
            PoolKind::Operator => PoolKind::Participant,
            PoolKind::Participant => PoolKind::Operator,
        }
    }
}

impl Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Operator => f.write_str("operator"),
            PoolKind::Participant => f.write_str("participant"),
        }
    }
}

/// A submitted link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Base-26 identifier
    pub id: LinkId,
    /// Canonical URL
    pub url: String,
    /// Who submitted it
    pub submitter: ParticipantId,
    /// Submission time (Unix millis)
    pub submitted_at_millis: i64,
    /// Copied from the submitter's privileged flag at submission time
    pub privileged_origin: bool,
}

impl Link {
    /// Submission time as a UTC datetime
    pub fn submitted_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.submitted_at_millis)
            .single()
            .unwrap_or_default()
    }

    /// Pool this link belongs to
    pub fn pool_kind(&self) -> PoolKind {
        if self.privileged_origin {
            PoolKind::Operator
        } else {
            PoolKind::Participant
        }
    }
}

/// A link that has passed validation but has no identifier yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLink {
    pub url: String,
    pub submitter: ParticipantId,
    pub privileged_origin: bool,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Check that submitted text has an accepted link shape
pub fn validate_link(text: &str) -> Result<String, ValidationError> {
    let url = text.trim();
    if url.len() > MAX_URL_LEN {
        return Err(ValidationError::LinkTooLong {
            len: url.len(),
            max: MAX_URL_LEN,
        });
    }
    if url.starts_with(SHORT_LINK_PREFIX) || url.contains(LONG_LINK_HOST) {
        Ok(url.to_string())
    } else {
        Err(ValidationError::UnsupportedLink(url.to_string()))
    }
}

/// Rewrite a recognized long link to the canonical short form
///
/// Links already in short form (`https://opr.news/<token>?...`) are kept as
/// they are. Anything else that carries a `news_entry_id` parameter becomes
/// `https://opr.news/<token>?link=1&client=news`. Other URLs pass through.
pub fn normalize_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix(SHORT_LINK_PREFIX) {
        let token_len: usize = rest
            .chars()
            .take_while(|c| is_word_char(*c))
            .map(char::len_utf8)
            .sum();
        if token_len > 0 && rest[token_len..].starts_with('?') {
            return url.to_string();
        }
    }

    if let Some(pos) = url.find(NEWS_ENTRY_PARAM) {
        let token: String = url[pos + NEWS_ENTRY_PARAM.len()..]
            .chars()
            .take_while(|c| is_word_char(*c))
            .collect();
        if !token.is_empty() {
            return format!("{SHORT_LINK_PREFIX}{token}?link=1&client=news");
        }
    }

    url.to_string()
}
