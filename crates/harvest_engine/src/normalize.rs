use scraper::{Html, Selector};
use serde::Serialize;
use thiserror::Error;

use crate::signals::{decode_body, visible_text};
use crate::RawPayload;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("unsupported content type: {0}")]
    UnsupportedContent(String),
    #[error("{0}")]
    Rejected(String),
}

/// Turns a raw payload into the caller's record type. Runs once per
/// successful fetch; an error ends the target with a `Normalization` failure.
pub trait Normalizer: Send + Sync + 'static {
    type Record: Send + 'static;

    fn normalize(&self, payload: &RawPayload) -> Result<Self::Record, NormalizeError>;
}

/// Hands the payload through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughNormalizer;

impl Normalizer for PassthroughNormalizer {
    type Record = RawPayload;

    fn normalize(&self, payload: &RawPayload) -> Result<RawPayload, NormalizeError> {
        Ok(payload.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub text_chars: usize,
}

/// Decodes HTML and keeps the title and reader-visible text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageSummaryNormalizer;

impl Normalizer for PageSummaryNormalizer {
    type Record = PageSummary;

    fn normalize(&self, payload: &RawPayload) -> Result<PageSummary, NormalizeError> {
        if let Some(content_type) = payload.content_type.as_deref() {
            let mime = content_type.split(';').next().unwrap_or_default().trim();
            if !mime.is_empty() && !mime.contains("html") && !mime.starts_with("text/") {
                return Err(NormalizeError::UnsupportedContent(mime.to_string()));
            }
        }
        let html = decode_body(&payload.content, payload.content_type.as_deref());
        let doc = Html::parse_document(&html);
        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| doc.select(&sel).next().map(|t| t.text().collect::<String>()))
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty());
        let text = visible_text(&html);
        Ok(PageSummary {
            url: payload.final_url.clone(),
            title,
            text_chars: text.chars().count(),
            text,
        })
    }
}
