//! Transcript cleanup for repeated-phrase hallucination.
//!
//! Offline recognizers sometimes loop at the end of an utterance and emit the opening
//! phrase again ("I went to the store today I went to the store"). Two detectors run per
//! pass, trailing-repeat first:
//!
//! - **Trailing repeat**: scanning split points from the middle toward the end, the first
//!   tail of at least two words that is a prefix of the head (or of any sentence in the
//!   head) is dropped.
//! - **Block repeat**: the shortest leading block of words that is immediately repeated
//!   is collapsed to one copy.
//!
//! Whenever a pass changes the text, the result is cleaned again, so the output is a fixed
//! point and cleaning is idempotent.

/// Transcripts shorter than this are left alone.
const MIN_WORDS: usize = 4;
/// A trailing repeat must span at least this many words.
const MIN_TAIL_WORDS: usize = 2;

/// Remove trailing hallucinated repetition. Returns the input unchanged when no pattern is found.
pub fn dedup_transcript(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < MIN_WORDS {
        return text.to_string();
    }

    if let Some(head) = trailing_repeat(&words) {
        return dedup_transcript(&head);
    }
    if let Some(collapsed) = block_repeat(&words) {
        return dedup_transcript(&collapsed);
    }
    text.to_string()
}

fn trailing_repeat(words: &[&str]) -> Option<String> {
    let mid = words.len() / 2;
    for split in mid..words.len() {
        if words.len() - split < MIN_TAIL_WORDS {
            break;
        }
        let head = words[..split].join(" ");
        let tail = words[split..].join(" ").to_lowercase();
        let head_lower = head.to_lowercase();

        if head_lower.starts_with(&tail) || starts_any_sentence(&head_lower, &tail) {
            return Some(head);
        }
    }
    None
}

fn starts_any_sentence(text: &str, prefix: &str) -> bool {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .any(|sentence| sentence.starts_with(prefix))
}

fn block_repeat(words: &[&str]) -> Option<String> {
    let max_len = words.len() / 2;
    for len in 2..=max_len {
        let first = &words[..len];
        let second = &words[len..2 * len];
        let repeated = first
            .iter()
            .zip(second)
            .all(|(a, b)| a.to_lowercase() == b.to_lowercase());
        if repeated {
            let mut kept: Vec<&str> = first.to_vec();
            kept.extend_from_slice(&words[2 * len..]);
            return Some(kept.join(" "));
        }
    }
    None
}
