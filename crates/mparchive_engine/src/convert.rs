use ego_tree::NodeRef;
use mparchive_core::EmojiRules;
use scraper::node::Node;
use scraper::{ElementRef, Html};

pub trait Converter: Send + Sync {
    fn to_markdown(&self, html: &str) -> String;
}

/// Rule-based HTML to Markdown conversion for cleaned article fragments.
///
/// - images become `![alt](src)`, stickers get their alt prefixed with the emoji marker
/// - `section`/`div` wrappers collapse to paragraph breaks
/// - links become `[text](href)` regardless of styling attributes
#[derive(Debug, Clone, Default)]
pub struct ArticleMarkdownConverter {
    emoji: EmojiRules,
}

impl ArticleMarkdownConverter {
    pub fn new(emoji: EmojiRules) -> Self {
        Self { emoji }
    }

    fn visit_node(&self, node: NodeRef<'_, Node>, ctx: &mut ConversionContext) {
        match node.value() {
            Node::Text(text) => ctx.append_text(text),
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(node) {
                    self.visit_element(element, ctx);
                }
            }
            _ => {}
        }
    }

    fn visit_children(&self, element: ElementRef<'_>, ctx: &mut ConversionContext) {
        for child in element.children() {
            self.visit_node(child, ctx);
        }
    }

    fn visit_element(&self, element: ElementRef<'_>, ctx: &mut ConversionContext) {
        let tag = element.value().name().to_ascii_lowercase();
        match tag.as_str() {
            "a" => self.handle_anchor(element, ctx),
            "img" => self.handle_image(element, ctx),
            "br" => ctx.hard_break(),
            "hr" => {
                ctx.block_break();
                ctx.push_str("---");
                ctx.block_break();
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = usize::from(tag.as_bytes()[1] - b'0');
                ctx.block_break();
                ctx.push_str(&"#".repeat(level));
                ctx.push_str(" ");
                self.visit_children(element, ctx);
                ctx.block_break();
            }
            "p" | "div" | "section" | "article" | "header" | "footer" | "figure"
            | "figcaption" | "table" | "address" | "center" => {
                ctx.block_break();
                self.visit_children(element, ctx);
                ctx.block_break();
            }
            "tr" => {
                ctx.ensure_newline();
                self.visit_children(element, ctx);
                ctx.ensure_newline();
            }
            "td" | "th" => {
                self.visit_children(element, ctx);
                ctx.append_text(" ");
            }
            "ul" | "ol" => {
                ctx.block_break();
                ctx.lists.push(ListState {
                    ordered: tag == "ol",
                    next_index: 1,
                });
                self.visit_children(element, ctx);
                ctx.lists.pop();
                ctx.block_break();
            }
            "li" => self.handle_list_item(element, ctx),
            "blockquote" => self.handle_blockquote(element, ctx),
            "pre" => self.handle_pre(element, ctx),
            "strong" | "b" => self.wrap_inline(element, ctx, "**"),
            "em" | "i" => self.wrap_inline(element, ctx, "*"),
            "del" | "s" | "strike" => self.wrap_inline(element, ctx, "~~"),
            "code" => self.wrap_inline(element, ctx, "`"),
            "script" | "style" | "noscript" | "iframe" | "template" => {}
            _ => self.visit_children(element, ctx),
        }
    }

    fn handle_anchor(&self, element: ElementRef<'_>, ctx: &mut ConversionContext) {
        let href = element
            .value()
            .attr("href")
            .map(str::trim)
            .unwrap_or_default();
        let start = ctx.out.len();
        self.visit_children(element, ctx);
        if href.is_empty() || href.to_ascii_lowercase().starts_with("javascript:") {
            return;
        }
        let inner = ctx.take_from(start);
        let text = inner.trim();
        if text.is_empty() {
            return;
        }
        if inner.starts_with(char::is_whitespace) {
            ctx.append_text(" ");
        }
        ctx.push_str(&format!("[{}]({})", text, escape_target(href)));
    }

    fn handle_image(&self, element: ElementRef<'_>, ctx: &mut ConversionContext) {
        let el = element.value();
        let Some(src) = el
            .attr("src")
            .or_else(|| el.attr("data-src"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return;
        };
        let alt = el
            .attr("alt")
            .map(clean_alt)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "image".to_string());
        let width = el
            .attr("data-w")
            .or_else(|| el.attr("width"))
            .and_then(EmojiRules::parse_width);
        let alt = if self.emoji.is_emoji(src, width) {
            self.emoji.mark_alt(&alt)
        } else {
            alt
        };
        ctx.push_str(&format!("![{}]({})", alt, escape_target(src)));
    }

    fn handle_list_item(&self, element: ElementRef<'_>, ctx: &mut ConversionContext) {
        ctx.ensure_newline();
        let depth = ctx.lists.len().max(1);
        let marker = match ctx.lists.last_mut() {
            Some(list) if list.ordered => {
                let marker = format!("{}. ", list.next_index);
                list.next_index += 1;
                marker
            }
            _ => "- ".to_string(),
        };
        ctx.push_str(&"  ".repeat(depth - 1));
        ctx.push_str(&marker);
        ctx.marker_end = Some(ctx.out.len());
        self.visit_children(element, ctx);
        ctx.ensure_newline();
    }

    fn handle_blockquote(&self, element: ElementRef<'_>, ctx: &mut ConversionContext) {
        ctx.block_break();
        let start = ctx.out.len();
        self.visit_children(element, ctx);
        let inner = ctx.take_from(start);
        let quoted = normalize_blank_lines(inner.trim())
            .lines()
            .map(|line| {
                if line.trim().is_empty() {
                    ">".to_string()
                } else {
                    format!("> {line}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        ctx.push_str(&quoted);
        ctx.block_break();
    }

    fn handle_pre(&self, element: ElementRef<'_>, ctx: &mut ConversionContext) {
        let code = element.text().collect::<String>();
        ctx.block_break();
        ctx.push_str("```\n");
        ctx.push_str(code.trim_end_matches('\n'));
        ctx.push_str("\n```");
        ctx.block_break();
    }

    fn wrap_inline(&self, element: ElementRef<'_>, ctx: &mut ConversionContext, marker: &str) {
        let start = ctx.out.len();
        self.visit_children(element, ctx);
        let inner = ctx.take_from(start);
        let trimmed = inner.trim();
        if trimmed.is_empty() {
            ctx.push_str(&inner);
            return;
        }
        if inner.starts_with(char::is_whitespace) {
            ctx.append_text(" ");
        }
        ctx.push_str(marker);
        ctx.push_str(trimmed);
        ctx.push_str(marker);
        if inner.ends_with(char::is_whitespace) {
            ctx.append_text(" ");
        }
    }
}

impl Converter for ArticleMarkdownConverter {
    fn to_markdown(&self, html: &str) -> String {
        let fragment = Html::parse_fragment(html);
        let mut ctx = ConversionContext::default();
        for child in fragment.root_element().children() {
            self.visit_node(child, &mut ctx);
        }
        ctx.into_markdown()
    }
}

struct ListState {
    ordered: bool,
    next_index: usize,
}

#[derive(Default)]
struct ConversionContext {
    out: String,
    lists: Vec<ListState>,
    /// End of a freshly written list marker; block breaks right after it are suppressed.
    marker_end: Option<usize>,
}

impl ConversionContext {
    fn into_markdown(self) -> String {
        normalize_blank_lines(&self.out).trim().to_string()
    }

    fn append_text(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() {
                if self.out.is_empty() || self.out.ends_with(' ') || self.out.ends_with('\n') {
                    continue;
                }
                self.out.push(' ');
            } else {
                self.out.push(ch);
            }
        }
    }

    fn push_str(&mut self, raw: &str) {
        self.out.push_str(raw);
    }

    fn at_marker(&self) -> bool {
        self.marker_end == Some(self.out.len())
    }

    fn trim_trailing_spaces(&mut self) {
        let trimmed = self.out.trim_end_matches([' ', '\t']).len();
        if !self.at_marker() {
            self.out.truncate(trimmed);
        }
    }

    fn ensure_newline(&mut self) {
        if self.out.is_empty() || self.at_marker() {
            return;
        }
        self.trim_trailing_spaces();
        if !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    /// Paragraph break; inside list items only a line break, to keep the item together.
    fn block_break(&mut self) {
        if !self.lists.is_empty() {
            self.ensure_newline();
            return;
        }
        if self.out.is_empty() {
            return;
        }
        self.ensure_newline();
        if !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn hard_break(&mut self) {
        self.trim_trailing_spaces();
        self.out.push('\n');
    }

    fn take_from(&mut self, start: usize) -> String {
        self.out.split_off(start)
    }
}

/// Collapses runs of blank lines and strips trailing whitespace per line.
fn normalize_blank_lines(markdown: &str) -> String {
    let mut result = String::with_capacity(markdown.len());
    let mut blank_run = 0;
    for line in markdown.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

fn clean_alt(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '[' | ']'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_target(target: &str) -> String {
    target
        .replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29")
}

#[cfg(test)]
mod tests {
    use super::normalize_blank_lines;

    #[test]
    fn blank_runs_collapse_to_one() {
        assert_eq!(normalize_blank_lines("a  \n\n\n\nb\n"), "a\n\nb\n");
    }
}
