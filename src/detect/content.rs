use serde::Serialize;

/// Result of comparing the traced DUT output with the traced AUX input.
///
/// Counting bytes cannot see reordering or substitution; an exact comparison
/// can. It needs every chunk kept in memory, so it only runs when detailed
/// tracing was on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContentCheck {
    /// Tracing was off for this session.
    Skipped,
    Match,
    Mismatch {
        /// Byte offset of the first difference.
        first_difference: usize,
        sent_len: usize,
        received_len: usize,
    },
}

impl ContentCheck {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, ContentCheck::Mismatch { .. })
    }
}

/// Compare what was sent with what was received, exactly.
pub fn compare(sent: &str, received: &str) -> ContentCheck {
    if sent == received {
        return ContentCheck::Match;
    }

    let first_difference = sent
        .bytes()
        .zip(received.bytes())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| sent.len().min(received.len()));

    ContentCheck::Mismatch {
        first_difference,
        sent_len: sent.len(),
        received_len: received.len(),
    }
}
