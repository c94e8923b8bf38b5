//! Minimal `Accept-Language` negotiation against a service's configured
//! `ServerLanguages` list.

/// Picks the best of `offered` for an `Accept-Language` header value,
/// honoring `;q=` weights. Returns `None` when `offered` is empty (no
/// negotiation configured) or nothing in the header matches.
pub fn negotiate(accept_language: Option<&str>, offered: &[String]) -> Option<String> {
    if offered.is_empty() {
        return None;
    }
    let header = accept_language?;
    let mut candidates: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim().to_string();
            let q = pieces
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((tag, q))
        })
        .collect();
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    for (tag, _) in &candidates {
        if let Some(exact) = offered.iter().find(|o| o.eq_ignore_ascii_case(tag)) {
            return Some(exact.clone());
        }
        let primary = tag.split('-').next().unwrap_or(tag);
        if let Some(prefix_match) = offered
            .iter()
            .find(|o| o.split('-').next().unwrap_or(o).eq_ignore_ascii_case(primary))
        {
            return Some(prefix_match.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_offered_languages_means_no_negotiation() {
        assert_eq!(negotiate(Some("fr-FR,en;q=0.8"), &[]), None);
    }

    #[test]
    fn exact_match_wins() {
        let offered = vec!["en".to_string(), "fr".to_string()];
        assert_eq!(
            negotiate(Some("fr-FR,en;q=0.8"), &offered),
            Some("fr".to_string())
        );
    }

    #[test]
    fn quality_values_reorder_candidates() {
        let offered = vec!["en".to_string(), "de".to_string()];
        assert_eq!(
            negotiate(Some("fr;q=0.9,de;q=0.95,en;q=0.1"), &offered),
            Some("de".to_string())
        );
    }

    #[test]
    fn primary_subtag_matches_when_region_is_unknown() {
        let offered = vec!["en".to_string()];
        assert_eq!(negotiate(Some("en-AU"), &offered), Some("en".to_string()));
    }

    #[test]
    fn missing_header_with_offered_languages_is_no_negotiation() {
        let offered = vec!["en".to_string()];
        assert_eq!(negotiate(None, &offered), None);
    }
}
