//! RFC-5988 `Link` header pagination (spec §4.5).

/// Extracts the `rel="next"` target from a `Link` header value, e.g.
/// `</page/2>; rel="next", </page/1>; rel="prev"`.
pub fn parse_link_next(header_value: &str) -> Option<String> {
    for part in header_value.split(',') {
        let part = part.trim();
        let mut segments = part.split(';').map(str::trim);
        let target = segments.next()?;
        let is_next = segments.any(|seg| {
            let seg = seg.trim();
            seg == "rel=\"next\"" || seg == "rel=next"
        });
        if is_next {
            if let Some(inner) = target.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                return Some(inner.to_string());
            }
        }
    }
    None
}

/// Resolves a possibly-relative `next` reference against the current
/// request URL.
pub fn resolve_next_url(base: &str, next: &str) -> Result<String, String> {
    let base_url = reqwest::Url::parse(base).map_err(|e| e.to_string())?;
    let resolved = base_url.join(next).map_err(|e| e.to_string())?;
    Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_next_relation_among_several() {
        let header = "</page/2>; rel=\"next\", </page/1>; rel=\"prev\"";
        assert_eq!(parse_link_next(header), Some("/page/2".to_string()));
    }

    #[test]
    fn returns_none_when_no_next_relation() {
        let header = "</page/1>; rel=\"prev\"";
        assert_eq!(parse_link_next(header), None);
    }

    #[test]
    fn resolves_relative_reference_against_base() {
        let resolved = resolve_next_url("https://api/resource?page=1", "/page/2").unwrap();
        assert_eq!(resolved, "https://api/page/2");
    }
}
