/// Upper bound on the title part of an uploaded document name, in characters.
pub const MAX_TITLE_CHARS: usize = 50;

/// Name used for the Markdown file handed to the import API: `{sanitized_title}.md`.
pub fn document_filename(title: &str) -> String {
    format!("{}.md", sanitize_title(title))
}

fn sanitize_title(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);

    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        compacted.push(c);
    }

    let truncated: String = compacted.chars().take(MAX_TITLE_CHARS).collect();
    let truncated = truncated.trim_end().to_string();
    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(
        c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}
