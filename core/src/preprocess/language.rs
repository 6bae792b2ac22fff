//! Heuristic language detection by stop-word frequency
//!
//! Compares token frequency against small stop-word lists for the supported
//! languages. English is the fallback when no language reaches the minimum
//! signal.

/// Languages with NER models and pronoun tables
pub const SUPPORTED_LANGUAGES: [&str; 4] = ["en", "de", "fr", "es"];

const GERMAN_INDICATORS: [&str; 8] = ["der", "die", "das", "und", "ist", "von", "zu", "im"];
const FRENCH_INDICATORS: [&str; 8] = ["le", "la", "les", "et", "est", "dans", "pour", "une"];
const SPANISH_INDICATORS: [&str; 8] = ["el", "los", "las", "es", "en", "por", "una", "del"];

fn score(words: &[&str], indicators: &[&str]) -> usize {
    words.iter().filter(|w| indicators.contains(w)).count()
}

/// Detect the language of a text.
///
/// Returns one of `en`, `de`, `fr`, `es`; defaults to `en` when no language
/// scores at least two indicator hits.
pub fn detect_language(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    let de = score(&words, &GERMAN_INDICATORS);
    let fr = score(&words, &FRENCH_INDICATORS);
    let es = score(&words, &SPANISH_INDICATORS);

    let (best_lang, best_score) = [("de", de), ("fr", fr), ("es", es)]
        .into_iter()
        .max_by_key(|(_, s)| *s)
        .unwrap_or(("en", 0));

    if best_score < 2 {
        "en"
    } else {
        best_lang
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_english_default() {
        assert_eq!(detect_language("Microsoft was founded by Bill Gates."), "en");
    }

    #[test]
    fn test_detect_german() {
        assert_eq!(
            detect_language("Das Unternehmen ist der größte Anbieter und wurde von ihm gegründet."),
            "de"
        );
    }

    #[test]
    fn test_detect_french() {
        assert_eq!(
            detect_language("La société est le plus grand fournisseur dans le monde pour les clients."),
            "fr"
        );
    }

    #[test]
    fn test_detect_spanish() {
        assert_eq!(
            detect_language("La empresa es el mayor proveedor en el mundo por una gran diferencia del resto."),
            "es"
        );
    }

    #[test]
    fn test_weak_signal_falls_back_to_english() {
        assert_eq!(detect_language("le chat"), "en");
        assert_eq!(detect_language(""), "en");
    }
}
