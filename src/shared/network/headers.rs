//! Request header bag shared by every request of a download job.

use std::str::FromStr;

use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, USER_AGENT,
};

use crate::shared::errors::FetchError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/99.0.4844.51 Safari/537.36 Edg/99.0.1150.36";

/// Browser-like headers sent unless the caller overrides them.
///
/// Content encoding is pinned to identity, byte offsets must refer to the
/// stored representation.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers
}

/// Overlay `overrides` on `base`. A name present in `overrides` replaces every
/// value `base` had for it.
pub fn merge_headers(base: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = base.clone();
    for name in overrides.keys() {
        merged.remove(name);
        for value in overrides.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

/// Parse a single `Name: value` header line.
pub fn parse_header_line(line: &str) -> Result<(HeaderName, HeaderValue), FetchError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| FetchError::ParseError(format!("Invalid header `{line}`, expected `Name: value`")))?;
    let name = HeaderName::from_str(name.trim())
        .map_err(|err| FetchError::ParseError(format!("Invalid header name in `{line}`: {err}")))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|err| FetchError::ParseError(format!("Invalid header value in `{line}`: {err}")))?;
    Ok((name, value))
}

/// Parse every line into one map, later lines win.
pub fn parse_header_lines<'a, I>(lines: I) -> Result<HeaderMap, FetchError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = parse_header_line(line)?;
        headers.insert(name, value);
    }
    Ok(headers)
}
