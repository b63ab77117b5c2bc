//! Letter/digit encodings for turning words into searchable digit strings.
//!
//! Each letter maps to its two-digit alphabet index (`a` = `00`,
//! `z` = `25`), so `"pi"` becomes `"1508"`. Digits pass through
//! unchanged; everything else is dropped.

/// Encode text as a digit pattern
pub fn text_to_digits(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            let idx = c.to_ascii_lowercase() as u8 - b'a';
            out.push((b'0' + idx / 10) as char);
            out.push((b'0' + idx % 10) as char);
        } else if c.is_ascii_digit() {
            out.push(c);
        }
    }
    out
}

/// Decode a digit string produced by [`text_to_digits`].
///
/// Returns `None` if the input is not an even run of digit pairs in `00..=25`.
pub fn digits_to_text(digits: &str) -> Option<String> {
    let bytes = digits.as_bytes();
    if bytes.len() % 2 != 0 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }

    bytes
        .chunks_exact(2)
        .map(|pair| {
            let idx = (pair[0] - b'0') * 10 + (pair[1] - b'0');
            (idx < 26).then(|| (b'a' + idx) as char)
        })
        .collect()
}

/// True if every byte is a valid digit in `base` (10 or 16)
pub fn is_digit_string(bytes: &[u8], base: u32) -> bool {
    match base {
        16 => bytes.iter().all(u8::is_ascii_hexdigit),
        _ => bytes.iter().all(u8::is_ascii_digit),
    }
}
