//! Deterministic contact and date extraction.
//!
//! This pass never fails and has no external dependency; it runs even when
//! no text generator is configured.

use chrono::NaiveDate;
use memsync_types::extraction::{ContactToken, TokenKind};
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Confidence assigned to email tokens.
pub const EMAIL_CONFIDENCE: f32 = 0.95;
/// Confidence assigned to phone tokens.
pub const PHONE_CONFIDENCE: f32 = 0.9;
/// Confidence assigned to URL tokens.
pub const URL_CONFIDENCE: f32 = 0.95;
/// Confidence assigned to date tokens.
pub const DATE_CONFIDENCE: f32 = 0.85;

/// Shortest canonical phone accepted (area code plus local number).
const MIN_PHONE_DIGITS: usize = 10;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
            .expect("email regex is valid")
    })
}

fn phone_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            // North American, optional country code: +1 (555) 123-4567
            r"\+?1?\s*\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}",
            // Plain: 555-123-4567, 555.123.4567, 5551234567
            r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b",
            // Parenthesized area code: (555) 123-4567
            r"\(\d{3}\)\s*\d{3}-\d{4}",
            // International: +44 20 7946 0958
            r"\+\d{1,3}\s?\d{1,4}\s?\d{1,4}\s?\d{1,4}",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("phone regex is valid"))
        .collect()
    })
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("url regex is valid")
    })
}

fn date_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            r"\b\d{4}-\d{2}-\d{2}\b",
            r"\b\d{2}/\d{2}/\d{4}\b",
            r"(?i)\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.? \d{1,2},? \d{4}\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("date regex is valid"))
        .collect()
    })
}

/// Canonical phone form: digits only, a leading North American `1` dropped
/// from 11-digit numbers. `None` when too short to be a full number.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    };
    (digits.len() >= MIN_PHONE_DIGITS).then_some(digits)
}

/// ISO form of a matched date, when it names a real calendar day.
fn normalize_date(raw: &str) -> Option<String> {
    let cleaned = raw.replace('.', "");
    ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%B %d %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn token(kind: TokenKind, value: &str, normalized: Option<String>, offset: usize) -> ContactToken {
    let confidence = match kind {
        TokenKind::Email => EMAIL_CONFIDENCE,
        TokenKind::Phone => PHONE_CONFIDENCE,
        TokenKind::Url => URL_CONFIDENCE,
        TokenKind::Date => DATE_CONFIDENCE,
    };
    ContactToken {
        kind,
        value: value.to_string(),
        normalized,
        confidence,
        offset,
        attached_to: None,
    }
}

/// Phone tokens in text order. Where matches of different patterns
/// overlap, the earliest and then longest one claims the span; a match
/// inside a longer digit run is not a phone.
fn scan_phones(content: &str) -> Vec<ContactToken> {
    let mut candidates: Vec<(usize, usize)> = phone_regexes()
        .iter()
        .flat_map(|re| re.find_iter(content))
        .map(|m| (m.end() - m.as_str().trim_start().len(), m.end()))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let digit_at = |c: Option<char>| c.is_some_and(|c| c.is_ascii_digit());
    let mut phones = Vec::new();
    let mut seen = HashSet::new();
    let mut claimed_to = 0;
    for (start, end) in candidates {
        if start < claimed_to {
            continue;
        }
        if digit_at(content[..start].chars().next_back()) || digit_at(content[end..].chars().next()) {
            continue;
        }
        let raw = &content[start..end];
        let Some(canonical) = normalize_phone(raw) else {
            continue;
        };
        claimed_to = end;
        if seen.insert(canonical.clone()) {
            phones.push(token(TokenKind::Phone, raw, Some(canonical), start));
        }
    }
    phones
}

/// Every email, phone, URL and date token in `content`, in text order
/// within each kind.
pub fn scan(content: &str) -> Vec<ContactToken> {
    let mut tokens = Vec::new();

    for m in email_regex().find_iter(content) {
        tokens.push(token(
            TokenKind::Email,
            m.as_str(),
            Some(m.as_str().to_lowercase()),
            m.start(),
        ));
    }

    tokens.extend(scan_phones(content));

    for m in url_regex().find_iter(content) {
        let value = m
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'']);
        tokens.push(token(TokenKind::Url, value, None, m.start()));
    }

    let mut dates = Vec::new();
    for re in date_regexes() {
        for m in re.find_iter(content) {
            dates.push(token(
                TokenKind::Date,
                m.as_str(),
                normalize_date(m.as_str()),
                m.start(),
            ));
        }
    }
    dates.sort_by_key(|t| t.offset);
    tokens.extend(dates);

    tokens
}
