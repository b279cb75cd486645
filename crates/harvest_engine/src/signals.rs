//! Response inspection shared by every fetch strategy: charset decoding,
//! challenge-page detection and the "needs rendering" heuristic.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use harvest_core::FailureKind;
use scraper::node::Node;
use scraper::{Html, Selector};

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Decodes body bytes to text: BOM, then Content-Type charset, then detection.
/// Undecodable sequences are replaced rather than rejected.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding.decode(bytes).0.into_owned();
    }
    let declared = content_type
        .and_then(charset_label)
        .and_then(|label| Encoding::for_label(label.as_bytes()));
    let encoding = declared.unwrap_or_else(|| {
        let mut detector = EncodingDetector::new();
        detector.feed(bytes, true);
        detector.guess(None, true)
    });
    encoding.decode(bytes).0.into_owned()
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_string())
    })
}

/// Text a reader would see: body text outside scripts, styles and templates,
/// with whitespace collapsed.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .unwrap_or_else(|| doc.root_element());

    let mut words: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_TAGS.contains(&el.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

/// Anti-bot and script-dependence checks configured from settings.
#[derive(Debug, Clone)]
pub struct ContentSignals {
    block_markers: Vec<String>,
    min_content_chars: usize,
}

impl ContentSignals {
    pub fn new(block_markers: &[String], min_content_chars: usize) -> Self {
        Self {
            block_markers: block_markers
                .iter()
                .map(|marker| marker.trim().to_lowercase())
                .filter(|marker| !marker.is_empty())
                .collect(),
            min_content_chars,
        }
    }

    pub fn is_challenge_page(&self, html: &str) -> bool {
        let lowered = html.to_lowercase();
        self.block_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }

    /// `Blocked` for challenge pages, `EmptyContent` for pages whose data
    /// only appears after script execution.
    pub fn inspect(&self, html: &str) -> Result<(), FailureKind> {
        if self.is_challenge_page(html) {
            return Err(FailureKind::Blocked);
        }
        if visible_text(html).chars().count() < self.min_content_chars {
            return Err(FailureKind::EmptyContent);
        }
        Ok(())
    }
}

/// Status codes that on their own mean the client was refused.
pub fn is_block_status(status: u16) -> bool {
    // 999 is a non-standard refusal code used by some profile sites.
    matches!(status, 403 | 999)
}
