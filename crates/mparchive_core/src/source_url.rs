use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceUrlError {
    #[error("invalid source url: {0}")]
    Invalid(String),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
}

/// Normalizes a source URL into the unique key an article is stored under.
///
/// Surrounding whitespace and the fragment are dropped; host case is folded by
/// the URL parser. The query is kept because it identifies the article.
pub fn canonical_source_url(raw: &str) -> Result<String, SourceUrlError> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|err| SourceUrlError::Invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SourceUrlError::UnsupportedScheme(url.scheme().to_string()));
    }
    url.set_fragment(None);
    Ok(url.into())
}
