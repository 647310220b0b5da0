//! Incremental `text/event-stream` framing. Pure: bytes in, frames out.
//! Frames can split at any chunk boundary, so the parser buffers until it
//! sees a complete line and dispatches on blank lines.

/// One decoded SSE frame: the `event:` name plus the joined `data:` lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(line) = self.take_line() {
            if let Some(frame) = self.handle_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn take_line(&mut self) -> Option<String> {
        let nl = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=nl).collect();
        line.pop(); // the \n
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn handle_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            // Blank line dispatches the accumulated frame.
            let data = std::mem::take(&mut self.data);
            let event = self.event.take();
            if data.is_empty() {
                return None;
            }
            return Some(SseFrame {
                event: event.unwrap_or_else(|| "message".to_string()),
                data: data.join("\n"),
            });
        }
        if line.starts_with(':') {
            return None; // comment / keep-alive
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id/retry are part of the SSE spec but unused by this contract.
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parser: &mut SseParser, input: &str) -> Vec<SseFrame> {
        parser.push(input.as_bytes())
    }

    #[test]
    fn parses_a_single_frame() {
        let mut p = SseParser::new();
        let got = frames(&mut p, "event: heartbeat\ndata: {\"timestamp\":1}\n\n");
        assert_eq!(
            got,
            vec![SseFrame {
                event: "heartbeat".into(),
                data: r#"{"timestamp":1}"#.into()
            }]
        );
    }

    #[test]
    fn survives_arbitrary_chunk_boundaries() {
        let raw = "event: findings_delta\ndata: {\"type\":\"findings_delta\",\"timestamp\":5,\"payload\":null}\n\n";
        for split in 1..raw.len() {
            let mut p = SseParser::new();
            let mut got = p.push(raw[..split].as_bytes());
            got.extend(p.push(raw[split..].as_bytes()));
            assert_eq!(got.len(), 1, "split at {split}");
            assert_eq!(got[0].event, "findings_delta");
        }
    }

    #[test]
    fn joins_multi_line_data() {
        let mut p = SseParser::new();
        let got = frames(&mut p, "data: a\ndata: b\n\n");
        assert_eq!(got[0].data, "a\nb");
        assert_eq!(got[0].event, "message");
    }

    #[test]
    fn handles_crlf_and_comments() {
        let mut p = SseParser::new();
        let got = frames(&mut p, ": ping\r\nevent: connected\r\ndata: {}\r\n\r\n");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].event, "connected");
        assert_eq!(got[0].data, "{}");
    }

    #[test]
    fn blank_line_without_data_emits_nothing() {
        let mut p = SseParser::new();
        assert!(frames(&mut p, "event: heartbeat\n\n").is_empty());
        assert!(frames(&mut p, "\n\n\n").is_empty());
    }

    #[test]
    fn value_without_space_after_colon() {
        let mut p = SseParser::new();
        let got = frames(&mut p, "event:heartbeat\ndata:{}\n\n");
        assert_eq!(got[0].event, "heartbeat");
        assert_eq!(got[0].data, "{}");
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let mut p = SseParser::new();
        let got = frames(&mut p, "data: 1\n\ndata: 2\n\n");
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].data, "1");
        assert_eq!(got[1].data, "2");
    }
}
