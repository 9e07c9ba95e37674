use std::sync::atomic::{AtomicU64, Ordering};

static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static THINKING_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Generate a call id for a tool call whose vendor never supplied one.
#[inline]
pub(crate) fn next_call_id() -> String {
    next_generated_id("call", &CALL_ID_COUNTER)
}

/// Generate an id for a logical reasoning block.
#[inline]
pub(crate) fn next_thinking_id() -> String {
    next_generated_id("think", &THINKING_ID_COUNTER)
}

pub(crate) fn next_generated_id(prefix: &str, counter: &AtomicU64) -> String {
    let id = counter.fetch_add(1, Ordering::Relaxed);
    let mut out = String::with_capacity(prefix.len() + 17);
    out.push_str(prefix);
    out.push('_');
    push_u64_hex_16(&mut out, id);
    out
}

#[inline]
fn push_u64_hex_16(out: &mut String, value: u64) {
    let mut buf = [0u8; 16];
    for (i, slot) in buf.iter_mut().enumerate() {
        let shift = (15 - i) * 4;
        *slot = HEX[((value >> shift) & 0xf) as usize];
    }
    // Safety-free: buf is all ASCII hex digits.
    out.push_str(std::str::from_utf8(&buf).unwrap_or("0000000000000000"));
}

/// Approximate decoded byte size of a base64 payload, for placeholders.
#[inline]
pub(crate) fn base64_decoded_len(encoded: &str) -> usize {
    let trimmed = encoded.trim_end_matches('=');
    (trimmed.len() / 4) * 3 + match trimmed.len() % 4 {
        2 => 1,
        3 => 2,
        _ => 0,
    }
}
