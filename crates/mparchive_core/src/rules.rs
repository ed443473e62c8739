//! Heuristic tables used while cleaning and converting article HTML.
//!
//! Both tables deserialize from JSON so they can be tuned without touching the
//! parsing code.

use serde::{Deserialize, Serialize};

/// Noise-removal table for the content cleaner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseRules {
    /// Structural signatures of boilerplate zones (CSS selectors).
    pub boilerplate_selectors: Vec<String>,
    /// Text a noise node starts with ("previous recommendations", "read more",
    /// "like", "share", "favorite").
    pub trigger_prefixes: Vec<String>,
    /// A triggered node is removed only when its trimmed text is shorter than this.
    pub max_noise_chars: usize,
    /// Layout tags that are never removed once they hold much text.
    pub container_tags: Vec<String>,
    pub container_guard_chars: usize,
}

impl Default for NoiseRules {
    fn default() -> Self {
        Self {
            boilerplate_selectors: [
                ".qr_code_pc_outer",
                ".qr_code_pc",
                ".js_official_account_container",
                "#js_view_source",
                ".tool_area",
                ".rich_media_tool",
            ]
            .map(String::from)
            .to_vec(),
            trigger_prefixes: ["往期推荐", "阅读更多", "点个赞", "分享", "收藏"]
                .map(String::from)
                .to_vec(),
            max_noise_chars: 50,
            container_tags: ["section", "div", "article"].map(String::from).to_vec(),
            container_guard_chars: 200,
        }
    }
}

impl NoiseRules {
    /// Large layout containers are skipped to avoid deleting the article body.
    pub fn is_guarded_container(&self, tag: &str, text: &str) -> bool {
        self.container_tags
            .iter()
            .any(|t| t.eq_ignore_ascii_case(tag))
            && text.chars().count() > self.container_guard_chars
    }

    /// Short text that starts with a trigger phrase.
    pub fn is_noise(&self, text: &str) -> bool {
        let trimmed = text.trim();
        trimmed.chars().count() < self.max_noise_chars
            && self
                .trigger_prefixes
                .iter()
                .any(|prefix| trimmed.starts_with(prefix.as_str()))
    }
}

/// Sticker classification for images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmojiRules {
    /// URL fragments of the platform's sticker assets.
    pub path_fragments: Vec<String>,
    /// Declared widths at or below this are treated as stickers.
    pub max_width_px: u32,
    /// Prepended to the alt text of classified stickers.
    pub alt_marker: String,
}

impl Default for EmojiRules {
    fn default() -> Self {
        Self {
            path_fragments: ["/mmemoticon/", "/emotion/", "/emoji/", "wx_emoji"]
                .map(String::from)
                .to_vec(),
            max_width_px: 120,
            alt_marker: "emoji:".to_string(),
        }
    }
}

impl EmojiRules {
    pub fn is_emoji(&self, src: &str, declared_width: Option<u32>) -> bool {
        let by_path = self
            .path_fragments
            .iter()
            .any(|fragment| src.contains(fragment.as_str()));
        let by_size = declared_width.is_some_and(|w| w > 0 && w <= self.max_width_px);
        by_path || by_size
    }

    /// Parses `data-w` / `width` style values such as `"80"` or `"80px"`.
    pub fn parse_width(raw: &str) -> Option<u32> {
        let digits: String = raw
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    pub fn mark_alt(&self, alt: &str) -> String {
        format!("{}{}", self.alt_marker, alt)
    }
}
