//! GS1 element strings and GS1 Digital Link URIs.
//!
//! Element strings pair Application Identifiers (AIs) with values, written
//! either bracketed, `(01)09359502000010(10)ABC123`, or raw as encoded in 2D
//! and GS1-128 symbols, `010935950200001010ABC123`, with FNC1 (ASCII 29)
//! terminating variable-length values.

use url::Url;

use super::IdentityProviderStrategy;

/// Registry key of the GS1 strategy.
pub const GS1_PROVIDER: &str = "gs1";

const GTIN_AI: &str = "01";
const GROUP_SEPARATOR: char = '\u{1d}';

/// Key qualifiers of AI 01, in Digital Link path order.
const GTIN_QUALIFIERS: &[&str] = &["22", "10", "21"];

/// Scanner formats carrying a bare GTIN.
const LINEAR_FORMATS: &[&str] = &["EAN_13", "EAN_8", "UPC_A", "ITF", "ITF_14"];

/// Value length of AIs with a predefined length, keyed by the AI's first two
/// digits.
fn predefined_value_length(ai: &str) -> Option<usize> {
    let len = match ai.get(..2)? {
        "00" => 18,
        "01" | "02" | "03" => 14,
        "04" => 16,
        "11" | "12" | "13" | "14" | "15" | "16" | "17" | "18" | "19" => 6,
        "20" => 2,
        "31" | "32" | "33" | "34" | "35" | "36" => 6,
        "41" => 13,
        _ => return None,
    };
    Some(len)
}

/// Number of digits in the AI that starts `digits`.
fn ai_length(digits: &str) -> Option<usize> {
    let prefix = digits.get(..2)?;
    let len = match prefix {
        "00" | "01" | "02" | "03" | "04" | "10" | "11" | "12" | "13" | "14" | "15" | "16"
        | "17" | "18" | "19" | "20" | "21" | "22" | "30" | "37" => 2,
        "23" | "24" | "25" | "40" | "41" | "42" => 3,
        "31" | "32" | "33" | "34" | "35" | "36" | "39" | "70" | "71" | "72" | "80" | "81"
        | "82" => 4,
        p if p.starts_with('9') => 2,
        _ => return None,
    };
    digits
        .get(..len)
        .filter(|ai| ai.bytes().all(|b| b.is_ascii_digit()))
        .map(|_| len)
}

/// Maximum value length for variable-length AIs used as key qualifiers.
fn max_value_length(ai: &str) -> usize {
    match ai {
        "10" | "21" | "22" => 20,
        _ => 90,
    }
}

/// GS1 mod-10 check digit for the digits preceding it.
pub fn gtin_check_digit(body: &str) -> Option<u32> {
    let mut sum = 0;
    for (i, c) in body.chars().rev().enumerate() {
        let digit = c.to_digit(10)?;
        sum += if i % 2 == 0 { digit * 3 } else { digit };
    }
    Some((10 - sum % 10) % 10)
}

fn is_valid_gtin(gtin: &str) -> bool {
    if gtin.len() != 14 || !gtin.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (body, check) = gtin.split_at(13);
    gtin_check_digit(body) == check.chars().next().and_then(|c| c.to_digit(10))
}

/// Parse a bracketed element string into `(ai, value)` pairs.
///
/// Returns `None` for anything that is not a well-formed sequence of
/// `(digits)value` groups, or when a predefined-length AI has the wrong
/// value length.
pub fn parse_element_string(code: &str) -> Option<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut rest = code.trim();
    if rest.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let after_open = rest.strip_prefix('(')?;
        let close = after_open.find(')')?;
        let ai = &after_open[..close];
        if !(2..=4).contains(&ai.len()) || !ai.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let after_close = &after_open[close + 1..];
        let end = after_close.find('(').unwrap_or(after_close.len());
        let value = &after_close[..end];
        if !value_fits(ai, value) {
            return None;
        }
        pairs.push((ai.to_string(), value.to_string()));
        rest = &after_close[end..];
    }
    Some(pairs)
}

fn value_fits(ai: &str, value: &str) -> bool {
    if value.is_empty() || value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return false;
    }
    match predefined_value_length(ai) {
        Some(len) => value.len() == len && value.bytes().all(|b| b.is_ascii_digit()),
        None => value.len() <= max_value_length(ai),
    }
}

/// Parse a raw (unbracketed) element string, FNC1-separated.
fn parse_raw_element_string(raw: &str) -> Option<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut rest = raw.trim_start_matches(GROUP_SEPARATOR);
    while !rest.is_empty() {
        let ai_len = ai_length(rest)?;
        let (ai, after_ai) = rest.split_at(ai_len);
        let value_len = match predefined_value_length(ai) {
            Some(len) => len,
            None => after_ai.find(GROUP_SEPARATOR).unwrap_or(after_ai.len()),
        };
        let value = after_ai.get(..value_len)?;
        if !value_fits(ai, value) {
            return None;
        }
        pairs.push((ai.to_string(), value.to_string()));
        rest = after_ai[value_len..].trim_start_matches(GROUP_SEPARATOR);
    }
    (!pairs.is_empty()).then_some(pairs)
}

/// Recover the element string from a GS1 Digital Link URI.
fn parse_digital_link(text: &str) -> Option<Vec<(String, String)>> {
    let url = Url::parse(text).ok()?;
    let segments: Vec<String> = url
        .path_segments()?
        .map(percent_decode)
        .collect::<Option<_>>()?;
    let start = segments.iter().position(|s| s == GTIN_AI)?;

    let mut pairs = Vec::new();
    let mut iter = segments[start..].iter();
    while let Some(ai) = iter.next() {
        let value = iter.next()?;
        pairs.push((ai.clone(), value.clone()));
    }
    for (key, value) in url.query_pairs() {
        if key.bytes().all(|b| b.is_ascii_digit()) {
            pairs.push((key.into_owned(), value.into_owned()));
        }
    }
    pairs
        .iter()
        .all(|(ai, value)| value_fits(ai, value))
        .then_some(pairs)
}

fn percent_decode(segment: &str) -> Option<String> {
    url::form_urlencoded::parse(format!("v={}", segment.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
}

fn bracketed(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(ai, value)| format!("({ai}){value}"))
        .collect()
}

/// Strip an ISO/IEC 15424 symbology identifier such as `]d2` or `]Q3`.
fn strip_symbology_identifier(text: &str) -> &str {
    match text.strip_prefix(']') {
        Some(rest) if rest.len() >= 2 && rest.is_char_boundary(2) => &rest[2..],
        _ => text,
    }
}

fn normalize_format(format_name: &str) -> String {
    format_name
        .trim()
        .to_ascii_uppercase()
        .replace(['-', ' '], "_")
}

/// Strategy for GS1 identifiers resolved through a GS1 Digital Link resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gs1Strategy;

impl IdentityProviderStrategy for Gs1Strategy {
    fn provider_type(&self) -> &str {
        GS1_PROVIDER
    }

    fn dlr_url(&self, code: &str, provider_url: &str) -> Option<String> {
        let code = code.trim();
        let pairs = if code.bytes().all(|b| b.is_ascii_digit()) {
            matches!(code.len(), 8 | 12 | 13 | 14)
                .then(|| vec![(GTIN_AI.to_string(), format!("{code:0>14}"))])?
        } else {
            parse_element_string(code)?
        };

        let gtin = pairs
            .iter()
            .find(|(ai, _)| ai == GTIN_AI)
            .map(|(_, value)| value.as_str())?;
        if !is_valid_gtin(gtin) {
            return None;
        }

        let mut url = Url::parse(provider_url.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        url.set_query(None);
        url.set_fragment(None);

        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.pop_if_empty();
            segments.push(GTIN_AI).push(gtin);
            for qualifier in GTIN_QUALIFIERS {
                if let Some((ai, value)) = pairs.iter().find(|(ai, _)| ai == qualifier) {
                    segments.push(ai).push(value);
                }
            }
        }

        let attributes: Vec<_> = pairs
            .iter()
            .filter(|(ai, _)| ai != GTIN_AI && !GTIN_QUALIFIERS.contains(&ai.as_str()))
            .collect();
        if !attributes.is_empty() {
            let mut query = url.query_pairs_mut();
            for (ai, value) in attributes {
                query.append_pair(ai, value);
            }
        }

        Some(url.to_string())
    }

    fn code(&self, decoded_text: &str, format_name: &str) -> String {
        let text = strip_symbology_identifier(decoded_text.trim());
        let format = normalize_format(format_name);

        if LINEAR_FORMATS.contains(&format.as_str())
            && !text.is_empty()
            && text.len() <= 14
            && text.bytes().all(|b| b.is_ascii_digit())
        {
            return format!("({GTIN_AI}){text:0>14}");
        }

        if text.starts_with('(') {
            if let Some(pairs) = parse_element_string(text) {
                return bracketed(&pairs);
            }
        } else if text.starts_with("http://") || text.starts_with("https://") {
            if let Some(pairs) = parse_digital_link(text) {
                return bracketed(&pairs);
            }
        } else if let Some(pairs) = parse_raw_element_string(text) {
            return bracketed(&pairs);
        }

        text.to_string()
    }
}
