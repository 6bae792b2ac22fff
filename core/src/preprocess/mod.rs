//! Text preprocessing: language detection, coreference resolution and
//! cross-sentence windowing

pub mod coref;
pub mod language;
pub mod windows;

pub use coref::{CoreferenceResolver, CoreferenceResult};
pub use language::detect_language;
pub use windows::{should_use_windows, SentenceWindow, WindowConfig};

/// A sentence with its byte offsets in the original text
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split text into sentences on terminal punctuation followed by
/// whitespace. Purely lexical; no model involved.
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'.' || b == b'!' || b == b'?' {
            // Consume any run of terminal punctuation
            let mut j = i + 1;
            while j < bytes.len() && matches!(bytes[j], b'.' | b'!' | b'?' | b'"' | b'\'') {
                j += 1;
            }
            if j >= bytes.len() || bytes[j].is_ascii_whitespace() {
                let raw = &text[start..j];
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    let lead = raw.len() - raw.trim_start().len();
                    sentences.push(Sentence {
                        text: trimmed.to_string(),
                        start: start + lead,
                        end: start + lead + trimmed.len(),
                    });
                }
                // Skip the whitespace run
                i = j;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                start = i;
                continue;
            }
        }
        i += 1;
    }

    let raw = &text[start..];
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        let lead = raw.len() - raw.trim_start().len();
        sentences.push(Sentence {
            text: trimmed.to_string(),
            start: start + lead,
            end: start + lead + trimmed.len(),
        });
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_basic_sentences() {
        let text = "Microsoft was founded in 1975. It later acquired GitHub.";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text, "Microsoft was founded in 1975.");
        assert_eq!(sentences[1].text, "It later acquired GitHub.");
    }

    #[test]
    fn test_split_preserves_offsets() {
        let text = "First one. Second one!";
        let sentences = split_sentences(text);
        assert_eq!(&text[sentences[0].start..sentences[0].end], "First one.");
        assert_eq!(&text[sentences[1].start..sentences[1].end], "Second one!");
    }

    #[test]
    fn test_split_no_terminal_punctuation() {
        let sentences = split_sentences("no punctuation here");
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].text, "no punctuation here");
    }

    #[test]
    fn test_split_abbreviation_period_not_followed_by_space() {
        // "U.S" style internal periods are not sentence breaks
        let sentences = split_sentences("Sold in the U.S.A. Everyone cheered.");
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn test_split_empty_input() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   ").is_empty());
    }
}
