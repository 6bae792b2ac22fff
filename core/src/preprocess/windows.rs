//! Sliding sentence windows for cross-sentence relation extraction
//!
//! Relations frequently span sentence boundaries. Overlapping windows of
//! consecutive sentences give the relation prompt enough context to catch
//! them; a final aligned window guarantees the tail sentences are covered.
//! Windowing applies only to relation extraction, never to entities.

use super::{split_sentences, Sentence};
use serde::{Deserialize, Serialize};

/// Minimum sentence count before windowed extraction kicks in
pub const WINDOW_THRESHOLD: usize = 5;

/// Window of consecutive sentences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceWindow {
    pub sentences: Vec<String>,
    /// Index of first sentence in the document
    pub start_idx: usize,
    /// Index after the last sentence (exclusive)
    pub end_idx: usize,
    pub char_start: usize,
    pub char_end: usize,
}

impl SentenceWindow {
    /// Concatenated window text
    pub fn text(&self) -> String {
        self.sentences.join(" ")
    }

    /// Number of sentences in the window
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

/// Windowing parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowConfig {
    pub window_size: usize,
    pub overlap: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: 3,
            overlap: 1,
        }
    }
}

impl WindowConfig {
    /// Validate that the overlap leaves a positive step
    pub fn validate(&self) -> bool {
        self.window_size >= 2 && self.overlap < self.window_size
    }
}

/// Whether a text is long enough to benefit from windowed extraction
pub fn should_use_windows(text: &str) -> bool {
    split_sentences(text).len() > WINDOW_THRESHOLD
}

fn window_from(sentences: &[Sentence], start: usize, end: usize) -> SentenceWindow {
    SentenceWindow {
        sentences: sentences[start..end].iter().map(|s| s.text.clone()).collect(),
        start_idx: start,
        end_idx: end,
        char_start: sentences[start].start,
        char_end: sentences[end - 1].end,
    }
}

/// Create overlapping sentence windows from text.
///
/// Short texts (at most `window_size` sentences) yield a single window equal
/// to the input. The last `window_size` sentences are always covered by a
/// final aligned window.
pub fn create_windows(text: &str, config: WindowConfig) -> Vec<SentenceWindow> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let total = sentences.len();
    if total <= config.window_size {
        return vec![window_from(&sentences, 0, total)];
    }

    let step = config.window_size - config.overlap;
    let mut windows = Vec::new();
    let mut i = 0usize;
    while i + config.window_size <= total {
        windows.push(window_from(&sentences, i, i + config.window_size));
        i += step;
    }

    // Align a final window over the tail if the stride left sentences
    // uncovered
    let last_end = windows.last().map(|w| w.end_idx).unwrap_or(0);
    if last_end < total {
        windows.push(window_from(&sentences, total - config.window_size, total));
    }

    windows
}

/// Window texts for extraction, or the whole text as one window when
/// windowing is disabled or unnecessary.
pub fn window_texts(text: &str, enabled: bool, config: WindowConfig) -> Vec<String> {
    if !enabled || !should_use_windows(text) {
        return vec![text.to_string()];
    }
    let windows = create_windows(text, config);
    if windows.is_empty() {
        return vec![text.to_string()];
    }
    windows.iter().map(|w| w.text()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> String {
        (1..=n)
            .map(|i| format!("Sentence number {} is here.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_single_window() {
        let text = sample(3);
        let windows = create_windows(&text, WindowConfig::default());
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].len(), 3);
    }

    #[test]
    fn test_sliding_with_overlap() {
        // 7 sentences, window 3, overlap 1 → starts at 0, 2, 4 + tail check
        let text = sample(7);
        let windows = create_windows(&text, WindowConfig::default());
        assert_eq!(windows[0].start_idx, 0);
        assert_eq!(windows[1].start_idx, 2);
        assert_eq!(windows[2].start_idx, 4);
        assert_eq!(windows.last().unwrap().end_idx, 7);
    }

    #[test]
    fn test_every_sentence_covered() {
        // Coverage property: every sentence index appears in some window
        for n in 1..20 {
            let text = sample(n);
            let windows = create_windows(&text, WindowConfig::default());
            let mut covered = vec![false; n];
            for w in &windows {
                for idx in w.start_idx..w.end_idx {
                    covered[idx] = true;
                }
            }
            assert!(covered.iter().all(|c| *c), "uncovered sentence with n={}", n);
        }
    }

    #[test]
    fn test_final_window_aligned_to_tail() {
        // 6 sentences, step 2: windows at 0..3, 2..5, then tail 3..6
        let text = sample(6);
        let windows = create_windows(&text, WindowConfig::default());
        let last = windows.last().unwrap();
        assert_eq!(last.end_idx, 6);
        assert_eq!(last.len(), 3);
    }

    #[test]
    fn test_should_use_windows_threshold() {
        assert!(!should_use_windows(&sample(5)));
        assert!(should_use_windows(&sample(6)));
    }

    #[test]
    fn test_window_texts_disabled_returns_input() {
        let text = sample(10);
        let texts = window_texts(&text, false, WindowConfig::default());
        assert_eq!(texts, vec![text]);
    }

    #[test]
    fn test_config_validation() {
        assert!(WindowConfig::default().validate());
        assert!(!WindowConfig { window_size: 1, overlap: 0 }.validate());
        assert!(!WindowConfig { window_size: 3, overlap: 3 }.validate());
    }

    #[test]
    fn test_empty_text_no_windows() {
        assert!(create_windows("", WindowConfig::default()).is_empty());
    }
}
