//! Field delimiter detection.

/// Candidate delimiters in tie-break order.
const CANDIDATES: [u8; 3] = [b';', b',', b'\t'];

/// Pick the most frequent of `;`, `,` and tab. Ties resolve to the earlier
/// candidate, so `;` wins whenever it is among the most frequent.
pub fn detect(text: &str) -> u8 {
    let mut counts = [0usize; CANDIDATES.len()];
    for byte in text.bytes() {
        if let Some(idx) = CANDIDATES.iter().position(|c| *c == byte) {
            counts[idx] += 1;
        }
    }

    let mut best = 0;
    for idx in 1..CANDIDATES.len() {
        if counts[idx] > counts[best] {
            best = idx;
        }
    }
    CANDIDATES[best]
}
