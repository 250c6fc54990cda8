/// List-view excerpt: the first `max_chars` characters of `content`, with
/// `...` appended when anything was cut.
pub fn excerpt(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// Normalise a 1-based page request against the configured limits.
pub fn page_params(page: Option<i64>, size: Option<i64>, default_size: i64, max_size: i64) -> (i64, i64) {
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    let size = size
        .filter(|s| *s > 0)
        .unwrap_or(default_size)
        .min(max_size);
    (page, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_kept_whole() {
        assert_eq!(excerpt("hello", 10), "hello");
        assert_eq!(excerpt("hello", 5), "hello");
        assert_eq!(excerpt("", 3), "");
    }

    #[test]
    fn long_content_is_cut_on_char_boundaries() {
        assert_eq!(excerpt("hello world", 5), "hello...");
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
        assert_eq!(excerpt("投票通知系统", 2), "投票...");
    }

    #[test]
    fn page_params_apply_defaults_and_cap() {
        assert_eq!(page_params(None, None, 10, 100), (1, 10));
        assert_eq!(page_params(Some(0), Some(-5), 10, 100), (1, 10));
        assert_eq!(page_params(Some(3), Some(500), 10, 100), (3, 100));
        assert_eq!(page_params(Some(2), Some(20), 10, 100), (2, 20));
    }
}
