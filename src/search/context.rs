use super::QueryHit;

/// Join hits into one context block of at most `max_chars` characters.
///
/// Each hit becomes `[source_path#chunk_id]` followed by its raw text. Hits
/// are added in rank order until the next one would not fit. If even the
/// first hit does not fit it is cut at `max_chars`.
pub fn build_context(hits: &[QueryHit], max_chars: usize) -> String {
    let mut out = String::new();
    let mut used = 0;

    for hit in hits {
        let separator = if out.is_empty() { "" } else { "\n\n" };
        let block = format!(
            "{separator}[{}#{}]\n{}",
            hit.source_path,
            hit.chunk.chunk_id,
            hit.chunk.raw_chunk.trim()
        );
        let len = block.chars().count();

        if used + len > max_chars {
            if out.is_empty() {
                out.extend(block.chars().take(max_chars));
            }
            break;
        }
        out.push_str(&block);
        used += len;
    }
    out
}
