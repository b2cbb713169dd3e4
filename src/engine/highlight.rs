//! HTML-safe snippet construction.

/// Marker inserted before a highlighted term
pub const PRE_TAG: &str = "<em>";
/// Marker inserted after a highlighted term
pub const POST_TAG: &str = "</em>";

/// Approximate fragment length in bytes
const FRAGMENT_SIZE: usize = 100;

/// Context kept before the first match of a fragment
const FRAGMENT_LEAD: usize = 30;

/// Maximum fragments per document
const MAX_FRAGMENTS: usize = 5;

/// Build highlighted fragments for `content` from byte spans of matched terms.
///
/// Text is HTML-escaped; only the marker tags are emitted raw.
pub fn fragments(content: &str, spans: &[(usize, usize)]) -> Vec<String> {
    let spans = merge_spans(spans, content.len());
    let mut out = Vec::new();
    let mut idx = 0;
    let mut prev_end = 0;

    while idx < spans.len() && out.len() < MAX_FRAGMENTS {
        let (first_start, first_end) = spans[idx];
        // Fragments never share text with the previous one
        let frag_start =
            floor_boundary(content, first_start.saturating_sub(FRAGMENT_LEAD)).max(prev_end);
        let mut frag_end = ceil_boundary(
            content,
            (frag_start + FRAGMENT_SIZE).max(first_end).min(content.len()),
        );

        let mut frag = String::with_capacity(frag_end - frag_start + 16);
        let mut cursor = frag_start;
        // A span starting inside the fragment is kept whole
        while idx < spans.len() && spans[idx].0 < frag_end {
            let (s, e) = spans[idx];
            frag.push_str(&html_escape::encode_text(&content[cursor..s]));
            frag.push_str(PRE_TAG);
            frag.push_str(&html_escape::encode_text(&content[s..e]));
            frag.push_str(POST_TAG);
            cursor = e;
            frag_end = frag_end.max(e);
            idx += 1;
        }
        frag.push_str(&html_escape::encode_text(&content[cursor..frag_end]));
        out.push(frag.trim().to_string());
        prev_end = frag_end;
    }

    out
}

/// Escaped leading excerpt used when no highlight is available
pub fn plain_snippet(content: &str, max_chars: usize) -> String {
    let excerpt: String = content.chars().take(max_chars).collect();
    html_escape::encode_text(&excerpt).into_owned()
}

/// Sort, clamp and merge overlapping spans
fn merge_spans(spans: &[(usize, usize)], len: usize) -> Vec<(usize, usize)> {
    let mut sorted: Vec<(usize, usize)> = spans
        .iter()
        .map(|&(s, e)| (s.min(len), e.min(len)))
        .filter(|(s, e)| s < e)
        .collect();
    sorted.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(sorted.len());
    for (s, e) in sorted {
        match merged.last_mut() {
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }
    merged
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_match_wrapped() {
        let content = "SELECT * FROM users";
        let frags = fragments(content, &[(14, 19)]);
        assert_eq!(frags, vec!["SELECT * FROM <em>users</em>"]);
    }

    #[test]
    fn test_markup_in_content_is_escaped() {
        let content = "WHERE a < b AND c > '<script>'";
        let frags = fragments(content, &[(12, 15)]);
        assert_eq!(frags.len(), 1);
        assert!(frags[0].contains("a &lt; b <em>AND</em> c &gt;"));
        assert!(!frags[0].contains("<script>"));
    }

    #[test]
    fn test_overlapping_spans_merged() {
        let content = "order_items";
        let frags = fragments(content, &[(0, 5), (3, 11)]);
        assert_eq!(frags, vec!["<em>order_items</em>"]);
    }

    #[test]
    fn test_span_crossing_fragment_end_kept_whole() {
        let content = format!("alpha {}straddling_term tail", "x".repeat(89));
        assert_eq!(content.find("straddling_term"), Some(95));

        let frags = fragments(&content, &[(0, 5), (95, 110)]);
        assert_eq!(frags.len(), 1);
        assert!(frags[0].starts_with("<em>alpha</em>"));
        assert!(frags[0].ends_with("<em>straddling_term</em>"));
    }

    #[test]
    fn test_next_fragment_starts_after_previous() {
        let content = format!("alpha {}{}omega", "y".repeat(94), "z".repeat(20));
        assert_eq!(content.find("omega"), Some(120));

        let frags = fragments(&content, &[(0, 5), (120, 125)]);
        assert_eq!(frags.len(), 2);
        assert!(frags[0].ends_with('y'));
        assert_eq!(frags[1], format!("{}<em>omega</em>", "z".repeat(20)));
    }

    #[test]
    fn test_distant_matches_split_into_fragments() {
        let filler = "x ".repeat(200);
        let content = format!("alpha {} omega", filler);
        let omega = content.len() - 5;
        let frags = fragments(&content, &[(0, 5), (omega, content.len())]);
        assert_eq!(frags.len(), 2);
        assert!(frags[0].starts_with("<em>alpha</em>"));
        assert!(frags[1].ends_with("<em>omega</em>"));
    }

    #[test]
    fn test_fragment_count_capped() {
        let content = "hit ".repeat(500);
        let spans: Vec<(usize, usize)> = (0..500).map(|i| (i * 4, i * 4 + 3)).collect();
        assert_eq!(fragments(&content, &spans).len(), MAX_FRAGMENTS);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let content = format!("{}straße", "é".repeat(40));
        let start = content.find("straße").unwrap();
        let frags = fragments(&content, &[(start, content.len())]);
        assert!(frags[0].ends_with("<em>straße</em>"));
    }

    #[test]
    fn test_plain_snippet_escapes_and_truncates() {
        let snippet = plain_snippet("<b>select</b> 1", 8);
        assert_eq!(snippet, "&lt;b&gt;selec");
    }
}
