//! Control protocol framing and line classification
//!
//! The subprocess writes `\n`-terminated lines. A line is either a reply-block
//! delimiter (`%begin`/`%end`/`%error`), an asynchronous notification
//! (`%output`, `%layout-change`, `%exit`, ...) or a body line of the reply
//! block currently open.

/// Accumulates raw subprocess output and yields complete protocol lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    start: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.start > 0 && self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line without its `\n` (and one trailing `\r`, if any).
    /// Partial trailing bytes stay buffered.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let offset = self.buf[self.start..].iter().position(|b| *b == b'\n')?;
        let end = self.start + offset;
        let mut line = &self.buf[self.start..end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        let line = line.to_vec();
        self.start = end + 1;
        if self.start > 64 * 1024 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        Some(line)
    }

    /// Bytes received but not yet terminated by a line feed.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.start..]
    }
}

/// A classified protocol line.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlLine<'a> {
    /// `%output %<pane> <escaped>` or `%extended-output %<pane> <age> ... : <escaped>`
    Output { pane_id: &'a str, payload: &'a [u8] },
    /// `%layout-change @<window> <layout> ...`
    LayoutChange { window_id: &'a str, layout: &'a str },
    Begin { number: u64 },
    End { number: u64 },
    Error { number: u64 },
    /// `%exit [reason]`
    Exit { reason: Option<String> },
    /// `%session-changed $<id> <name>`
    SessionChanged { session_id: &'a str, name: String },
    /// Any other `%` notification.
    Notification(&'a [u8]),
    /// Anything else: a reply body line.
    Data(&'a [u8]),
}

/// Classify a line. `%output` is checked first on the raw bytes since it
/// dominates traffic.
pub fn classify(line: &[u8]) -> ControlLine<'_> {
    if let Some(rest) = line.strip_prefix(b"%output ") {
        if let Some((pane_id, payload)) = split_token(rest) {
            return ControlLine::Output { pane_id, payload };
        }
        return ControlLine::Notification(line);
    }
    if let Some(rest) = line.strip_prefix(b"%extended-output ") {
        if let Some((pane_id, rest)) = split_token(rest) {
            if let Some(colon) = find(rest, b" : ") {
                return ControlLine::Output { pane_id, payload: &rest[colon + 3..] };
            }
        }
        return ControlLine::Notification(line);
    }
    if line.first() != Some(&b'%') {
        return ControlLine::Data(line);
    }

    let text = match std::str::from_utf8(line) {
        Ok(text) => text,
        Err(_) => return ControlLine::Notification(line),
    };
    let mut fields = text.splitn(2, ' ');
    let keyword = fields.next().unwrap_or_default();
    let rest = fields.next().unwrap_or_default();

    match keyword {
        "%begin" | "%end" | "%error" => match block_number(rest) {
            Some(number) if keyword == "%begin" => ControlLine::Begin { number },
            Some(number) if keyword == "%end" => ControlLine::End { number },
            Some(number) => ControlLine::Error { number },
            None => ControlLine::Notification(line),
        },
        "%layout-change" => {
            let mut parts = rest.split(' ');
            match (parts.next(), parts.next()) {
                (Some(window_id), Some(layout)) if !layout.is_empty() => {
                    ControlLine::LayoutChange { window_id, layout }
                }
                _ => ControlLine::Notification(line),
            }
        }
        "%exit" => ControlLine::Exit {
            reason: Some(rest.trim()).filter(|r| !r.is_empty()).map(str::to_string),
        },
        "%session-changed" => match rest.split_once(' ') {
            Some((session_id, name)) => ControlLine::SessionChanged {
                session_id,
                name: name.to_string(),
            },
            None => ControlLine::Notification(line),
        },
        _ => ControlLine::Notification(line),
    }
}

/// `<time> <number> <flags>` -> number
fn block_number(rest: &str) -> Option<u64> {
    rest.split(' ').nth(1)?.parse().ok()
}

/// Split off the first space-delimited token, which must be UTF-8.
fn split_token(input: &[u8]) -> Option<(&str, &[u8])> {
    let (token, rest) = match input.iter().position(|b| *b == b' ') {
        Some(space) => (&input[..space], &input[space + 1..]),
        None => (input, &input[input.len()..]),
    };
    if token.is_empty() {
        return None;
    }
    std::str::from_utf8(token).ok().map(|token| (token, rest))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
