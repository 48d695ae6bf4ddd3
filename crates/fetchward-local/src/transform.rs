//! A minimal default [`Transform`] implementation: title + plain-text body.
//!
//! Full HTML→Markdown conversion (heading structure, tables, readability-style
//! main-content extraction) is the out-of-scope external collaborator; this
//! gives callers that don't supply their own converter a usable default rather
//! than a hard failure.

use fetchward_core::{Artifact, Error, Result, Transform};
use html_scraper::{Html, Selector};

pub struct DefaultTransform;

impl Transform for DefaultTransform {
    fn transform(
        &self,
        bytes: &[u8],
        encoding: &str,
        _url: &str,
        _options: &serde_json::Value,
    ) -> Result<Artifact> {
        let enc = encoding_rs::Encoding::for_label(encoding.as_bytes()).unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = enc.decode(bytes);

        let document = Html::parse_document(&text);
        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let markdown = html2text::from_read(text.as_bytes(), 10_000)
            .map_err(|e| Error::Unknown(format!("html to text conversion failed: {e}")))?;

        Ok(Artifact {
            markdown,
            title,
            metadata: serde_json::json!({}),
            truncated: false,
        })
    }
}
