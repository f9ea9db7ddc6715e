//! UTF-7 (RFC 2152) as archive browsers expect it in descriptions.
//!
//! Only the RFC's "direct" characters pass through unchanged. The optional
//! direct set (`!"#$%&*;<=>@[]^_` and friends) is always shifted into
//! base64, which is what CloudBerry and FastGlacier write and read.
//!
//! Byte strings that are not valid UTF-8 keep each stray byte `b` as the
//! lone low surrogate `U+DC00 + b`. Well-formed text never produces a lone
//! surrogate, so the byte form decodes back unambiguously.

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;

const ESCAPE_BASE: u16 = 0xDC00;

fn is_direct(unit: u16) -> bool {
    let Ok(b) = u8::try_from(unit) else {
        return false;
    };
    b.is_ascii_alphanumeric()
        || matches!(b, b'\'' | b'(' | b')' | b',' | b'-' | b'.' | b'/' | b':' | b'?' | b' ' | b'\t' | b'\r' | b'\n')
}

fn is_base64_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

fn flush_shifted(out: &mut String, units: &mut Vec<u16>) {
    if units.is_empty() {
        return;
    }
    let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_be_bytes()).collect();
    out.push('+');
    out.push_str(&STANDARD_NO_PAD.encode(bytes));
    out.push('-');
    units.clear();
}

fn encode_units(units: impl IntoIterator<Item = u16>) -> String {
    let mut out = String::new();
    let mut shifted: Vec<u16> = Vec::new();

    for unit in units {
        if is_direct(unit) {
            flush_shifted(&mut out, &mut shifted);
            out.push(char::from(unit as u8));
        } else if unit == u16::from(b'+') && shifted.is_empty() {
            out.push_str("+-");
        } else {
            shifted.push(unit);
        }
    }
    flush_shifted(&mut out, &mut shifted);

    out
}

/// Encode `text` into 7-bit safe UTF-7.
pub fn encode(text: &str) -> String {
    encode_units(text.encode_utf16())
}

/// Encode an arbitrary byte string. Valid UTF-8 runs are encoded as text;
/// stray bytes are escaped as lone surrogates.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut units = Vec::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        units.extend(chunk.valid().encode_utf16());
        units.extend(chunk.invalid().iter().map(|&b| ESCAPE_BASE + u16::from(b)));
    }
    encode_units(units)
}

fn decode_units(encoded: &str) -> Result<Vec<u16>> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(encoded.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii() {
            bail!("non-ASCII byte 0x{:02x} at offset {}", b, i);
        }
        if b != b'+' {
            out.push(u16::from(b));
            i += 1;
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && is_base64_char(bytes[end]) {
            end += 1;
        }

        if end == start {
            // "+-" is a literal plus; a lone "+" is accepted the same way.
            out.push(u16::from(b'+'));
        } else {
            let run = &encoded[start..end];
            let raw = STANDARD_NO_PAD
                .decode(run)
                .with_context(|| format!("invalid base64 run '{}'", run))?;
            if raw.len() % 2 != 0 {
                bail!("base64 run '{}' does not hold whole UTF-16 units", run);
            }
            out.extend(
                raw.chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
            );
        }

        i = end;
        if i < bytes.len() && bytes[i] == b'-' {
            i += 1;
        }
    }

    Ok(out)
}

/// Decode UTF-7 produced by [`encode`] or any other RFC 2152 encoder.
pub fn decode(encoded: &str) -> Result<String> {
    String::from_utf16(&decode_units(encoded)?)
        .map_err(|_| anyhow!("'{}' does not decode to valid UTF-16", encoded))
}

/// Inverse of [`encode_bytes`].
pub fn decode_bytes(encoded: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut buf = [0u8; 4];

    for unit in char::decode_utf16(decode_units(encoded)?) {
        match unit {
            Ok(c) => out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
            Err(e) => match e.unpaired_surrogate().checked_sub(ESCAPE_BASE) {
                Some(b @ 0x80..=0xff) => out.push(b as u8),
                _ => bail!(
                    "unpaired surrogate U+{:04X} in '{}'",
                    e.unpaired_surrogate(),
                    encoded
                ),
            },
        }
    }

    Ok(out)
}
