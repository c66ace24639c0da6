//! Incremental line splitting over a byte stream.

/// Buffers raw bytes and yields complete lines.
///
/// Bytes are kept undecoded until a newline arrives, so a multi-byte UTF-8
/// character split across two reads is reassembled before decoding. A
/// trailing `\r` is removed from each line.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let Some(last_newline) = self.buf.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buf, rest);

        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Take whatever partial line is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }

    /// Bytes waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.push(b"one\ntwo\n"), vec!["one", "two"]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn retains_partial_line() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.push(b"data: {\"ty"), Vec::<String>::new());
        assert_eq!(decoder.pending(), 10);
        assert_eq!(
            decoder.push(b"pe\":\"x\"}\nnext"),
            vec!["data: {\"type\":\"x\"}"]
        );
        assert_eq!(decoder.finish().as_deref(), Some("next"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn keeps_blank_lines_and_strips_cr() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.push(b"a\r\n\r\nb\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn reassembles_split_utf8() {
        let text = "revenue \u{20ac}5\n".as_bytes();
        let euro_start = text.iter().position(|&b| b == 0xE2).unwrap();

        let mut decoder = LineDecoder::new();
        assert!(decoder.push(&text[..=euro_start]).is_empty());
        assert_eq!(decoder.push(&text[euro_start + 1..]), vec!["revenue \u{20ac}5"]);
    }

    #[test]
    fn byte_at_a_time() {
        let input = b"first\nsecond\n";
        let mut decoder = LineDecoder::new();
        let lines: Vec<String> = input
            .iter()
            .flat_map(|b| decoder.push(std::slice::from_ref(b)))
            .collect();
        assert_eq!(lines, vec!["first", "second"]);
    }
}
