//! Byte codec for the control protocol
//!
//! Output notifications carry pane bytes with non-printable bytes escaped as
//! `\NNN` (octal) and literal backslashes doubled. Decoding works on raw bytes
//! and never looks at UTF-8 boundaries: protocol lines can break inside a
//! multi-byte character, and the consumer (the browser's streaming text
//! decoder) reassembles characters across chunks.
//!
//! Input goes the other way as space-separated hex pairs for `send-keys -H`.

/// Maximum number of input bytes encoded into a single command.
pub const INPUT_CHUNK_BYTES: usize = 4096;

/// Decode an escaped payload into raw bytes.
///
/// Pure function of `input`: no partial-character state is carried between
/// calls.
pub fn decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];
        if byte == b'\\' {
            if input.get(i + 1) == Some(&b'\\') {
                out.push(b'\\');
                i += 2;
                continue;
            }
            if let Some(value) = octal_at(input, i + 1) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(byte);
        i += 1;
    }

    out
}

/// Three octal digits starting at `start`, first digit 0-3.
fn octal_at(input: &[u8], start: usize) -> Option<u8> {
    let digits = input.get(start..start + 3)?;
    if !(b'0'..=b'3').contains(&digits[0]) {
        return None;
    }
    if !digits[1..].iter().all(|d| (b'0'..=b'7').contains(d)) {
        return None;
    }
    Some((digits[0] - b'0') * 64 + (digits[1] - b'0') * 8 + (digits[2] - b'0'))
}

/// Encode bytes as lowercase hex pairs separated by single spaces.
pub fn encode_hex(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for (i, byte) in input.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Split input into blocks of at most `limit` bytes and hex-encode each one.
///
/// Chunking happens on the raw bytes, so no byte's hex pair is ever split.
pub fn encode_chunks(input: &[u8], limit: usize) -> Vec<String> {
    input.chunks(limit.max(1)).map(encode_hex).collect()
}

/// Newline-joined capture text as terminal bytes (`\n` -> `\r\n`).
pub fn to_terminal_lines(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + text.len() / 40);
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(line.as_bytes());
    }
    out
}
