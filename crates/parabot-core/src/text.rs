/// Discord rejects message bodies longer than this.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

pub fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Split `text` into chunks of at most `max_len` bytes, preferring line breaks.
pub fn split_lines(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let chunk_len = if remaining.len() <= max_len {
            remaining.len()
        } else {
            let boundary = match floor_char_boundary(remaining, max_len) {
                0 => remaining.chars().next().map_or(1, char::len_utf8),
                b => b,
            };
            match remaining[..boundary].rfind('\n') {
                Some(0) | None => boundary,
                Some(pos) => pos,
            }
        };
        chunks.push(remaining[..chunk_len].to_string());
        remaining = remaining[chunk_len..]
            .strip_prefix('\n')
            .unwrap_or(&remaining[chunk_len..]);
    }
    chunks
}

/// `DD/MM` with zero padding.
pub fn format_day_month(day: u32, month: u32) -> String {
    format!("{day:02}/{month:02}")
}

pub fn user_mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}

pub fn channel_mention(channel_id: &str) -> String {
    format!("<#{channel_id}>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_day_month_pads() {
        assert_eq!(format_day_month(1, 1), "01/01");
        assert_eq!(format_day_month(15, 6), "15/06");
        assert_eq!(format_day_month(31, 12), "31/12");
    }

    #[test]
    fn test_split_lines_short_text_is_single_chunk() {
        assert_eq!(split_lines("hello", 10), vec!["hello"]);
    }

    #[test]
    fn test_split_lines_breaks_on_newline() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = split_lines(text, 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_split_lines_respects_char_boundaries() {
        let text = "ééééé";
        let chunks = split_lines(text, 3);
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_mentions() {
        assert_eq!(user_mention("42"), "<@42>");
        assert_eq!(channel_mention("7"), "<#7>");
    }
}
