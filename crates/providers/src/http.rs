use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

use crate::ProviderError;

/// Spaces requests at least `interval` apart. Each caller reserves the next
/// free slot under the lock and sleeps outside it.
pub(crate) struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub(crate) async fn wait(&self) {
        let delay = {
            let mut next_slot = self.next_slot.lock();
            let now = Instant::now();
            let start = (*next_slot).max(now);
            *next_slot = start + self.interval;
            start - now
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

pub(crate) async fn get_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(ProviderError::Status(response.status().as_u16()));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| ProviderError::Decode(err.to_string()))
}

pub(crate) fn clean_text(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Splits genre-ish fields on `; , / |` and drops case-insensitive repeats.
pub(crate) fn collect_genres(values: &[Option<String>]) -> Vec<String> {
    let mut out = Vec::new();
    for value in values {
        if let Some(value) = clean_text(value.clone()) {
            for part in value.split(&[';', ',', '/', '|'][..]) {
                push_unique(&mut out, part);
            }
        }
    }
    out
}

pub(crate) fn push_unique(out: &mut Vec<String>, value: &str) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return;
    }
    if !out
        .iter()
        .any(|existing: &String| existing.eq_ignore_ascii_case(trimmed))
    {
        out.push(trimmed.to_string());
    }
}

pub(crate) fn url_escape(input: &str) -> String {
    let mut out = String::new();
    for byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Removes the HTML tags some providers embed in free text.
pub(crate) fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{collect_genres, strip_html, url_escape, RateLimiter};

    #[tokio::test]
    async fn rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let started = Instant::now();
        limiter.wait().await;
        assert!(started.elapsed() < Duration::from_millis(40));
        limiter.wait().await;
        limiter.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn escapes_queries() {
        assert_eq!(url_escape("AC/DC & Co"), "AC%2FDC%20%26%20Co");
        assert_eq!(url_escape("Björk"), "Bj%C3%B6rk");
    }

    #[test]
    fn collects_unique_genres() {
        let genres = collect_genres(&[
            Some("Rock; Pop".to_string()),
            None,
            Some("rock / Jazz|".to_string()),
        ]);
        assert_eq!(genres, vec!["Rock", "Pop", "Jazz"]);
    }

    #[test]
    fn strips_markup() {
        assert_eq!(
            strip_html("Band from <b>Bristol</b>. <a href=\"x\">Read more</a>"),
            "Band from Bristol. Read more"
        );
    }
}
