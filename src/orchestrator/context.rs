/// Keep the first `head` and last `tail` characters of `text`, marking the
/// cut. Text that already fits is returned unchanged.
pub fn compress(text: &str, head: usize, tail: usize) -> String {
    let total = text.chars().count();
    if total <= head + tail {
        return text.to_string();
    }
    let start: String = text.chars().take(head).collect();
    let end: String = text.chars().skip(total - tail).collect();
    format!(
        "{}\n[... {} characters omitted ...]\n{}",
        start.trim_end(),
        total - head - tail,
        end.trim_start()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_untouched() {
        assert_eq!(compress("short", 10, 10), "short");
    }

    #[test]
    fn test_long_text_keeps_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(10), "b".repeat(100), "c".repeat(10));
        let out = compress(&text, 10, 10);
        assert_eq!(
            out,
            format!("{}\n[... 100 characters omitted ...]\n{}", "a".repeat(10), "c".repeat(10))
        );
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let text = "é".repeat(30);
        let out = compress(&text, 5, 5);
        assert!(out.starts_with("ééééé\n"));
        assert!(out.contains("20 characters omitted"));
    }
}
