use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// How far into the document a `<meta charset>` declaration is looked for.
const META_SNIFF_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHtml {
    pub html: String,
    pub encoding_label: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("failed to decode bytes with {encoding}")]
    DecodeFailure { encoding: String },
}

/// Decode raw page bytes into UTF-8: BOM, then Content-Type charset, meta charset, chardetng.
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedHtml, DecodeError> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    let declared = content_type
        .and_then(charset_from_content_type)
        .or_else(|| charset_from_meta(bytes));
    if let Some(enc) = declared.and_then(|label| Encoding::for_label(label.as_bytes())) {
        return decode_with(bytes, enc);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    decode_with(bytes, detector.guess(None, true))
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(&['"', '\''][..]).to_string())
    })
}

fn charset_from_meta(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(META_SNIFF_BYTES)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let label: String = head[start..]
        .trim_start_matches(&['"', '\''][..])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!label.is_empty()).then_some(label)
}

fn decode_with(bytes: &[u8], enc: &'static Encoding) -> Result<DecodedHtml, DecodeError> {
    let (text, _, had_errors) = enc.decode(bytes);
    if had_errors {
        return Err(DecodeError::DecodeFailure {
            encoding: enc.name().to_string(),
        });
    }
    Ok(DecodedHtml {
        html: text.into_owned(),
        encoding_label: enc.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{charset_from_content_type, charset_from_meta, decode_html};

    #[test]
    fn header_charset_is_parsed_case_insensitively() {
        assert_eq!(
            charset_from_content_type("text/html; Charset=\"GBK\""),
            Some("GBK".to_string())
        );
        assert_eq!(charset_from_content_type("text/html"), None);
    }

    #[test]
    fn meta_charset_is_sniffed() {
        let html = br#"<html><head><meta charset="gb2312"></head></html>"#;
        assert_eq!(charset_from_meta(html), Some("gb2312".to_string()));
    }

    #[test]
    fn gbk_bytes_decode_via_meta_declaration() {
        let (bytes, _, _) = encoding_rs::GBK.encode("<meta charset=\"gbk\">微信");
        let decoded = decode_html(&bytes, Some("text/html")).unwrap();
        assert!(decoded.html.ends_with("微信"));
        assert_eq!(decoded.encoding_label, "GBK");
    }
}
