use mparchive_core::Metadata;

/// Prepends the metadata header block to a Markdown body.
pub fn build_article_document(
    metadata: &Metadata,
    source_url: &str,
    body_markdown: &str,
) -> String {
    let fields = [
        ("title", metadata.title.as_str()),
        ("author", metadata.author.as_str()),
        ("account", metadata.account_name.as_str()),
        ("date", metadata.publish_date.as_str()),
        ("url", source_url),
        ("thumbnail", metadata.cover_image.as_str()),
    ];
    let mut doc = String::from("---\n");
    for (key, value) in fields {
        doc.push_str(key);
        doc.push_str(": \"");
        doc.push_str(&quote(value));
        doc.push_str("\"\n");
    }
    doc.push_str("---\n\n");
    doc.push_str(body_markdown);
    doc
}

/// Returns the body following a leading `---` block, or the input unchanged.
pub fn strip_frontmatter(markdown: &str) -> &str {
    let prefix = "---\n";
    if let Some(rest) = markdown.strip_prefix(prefix) {
        if let Some(idx) = rest.find("\n---\n") {
            let after = &rest[idx + "\n---\n".len()..];
            return after.trim_start_matches('\n');
        }
    }
    markdown
}

fn quote(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::{build_article_document, strip_frontmatter};
    use mparchive_core::Metadata;

    #[test]
    fn header_escapes_quotes() {
        let meta = Metadata {
            title: r#"He said "hi""#.to_string(),
            ..Metadata::default()
        };
        let doc = build_article_document(&meta, "https://mp.weixin.qq.com/s/x", "body");
        assert!(doc.starts_with("---\ntitle: \"He said \\\"hi\\\"\"\n"));
        assert!(doc.contains("url: \"https://mp.weixin.qq.com/s/x\"\n"));
        assert!(doc.ends_with("---\n\nbody"));
    }

    #[test]
    fn strips_header_and_blank_line() {
        let meta = Metadata::default();
        let doc = build_article_document(&meta, "u", "# Heading\n\ntext");
        assert_eq!(strip_frontmatter(&doc), "# Heading\n\ntext");
    }

    #[test]
    fn unterminated_header_is_kept() {
        let markdown = "---\nkey: value\nbody\n";
        assert_eq!(strip_frontmatter(markdown), markdown);
    }

    #[test]
    fn horizontal_rule_in_body_is_not_a_header() {
        let markdown = "intro\n\n---\n\nmore";
        assert_eq!(strip_frontmatter(markdown), markdown);
    }
}
