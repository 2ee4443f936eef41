//! Keyword-based target-language detection.
//!
//! Learners usually name the language they are practising ("let's talk in
//! French", "일본어로 말해요").  [`detect_language`] scans a transcript for
//! those names and returns the ISO-639-1 code, which becomes the hint for the
//! next transcription request.

struct LanguageKeywords {
    code: &'static str,
    keywords: &'static [&'static str],
}

static LANGUAGES: &[LanguageKeywords] = &[
    LanguageKeywords {
        code: "fr",
        keywords: &["프랑스", "france", "french"],
    },
    LanguageKeywords {
        code: "ja",
        keywords: &["일본", "japan", "japanese"],
    },
    LanguageKeywords {
        code: "es",
        keywords: &["스페인", "spain", "spanish"],
    },
    LanguageKeywords {
        code: "de",
        keywords: &["독일", "germany", "german"],
    },
    LanguageKeywords {
        code: "it",
        keywords: &["이탈리아", "italy", "italian"],
    },
    LanguageKeywords {
        code: "zh",
        keywords: &["중국", "중문", "china", "chinese"],
    },
    LanguageKeywords {
        code: "vi",
        keywords: &["베트남", "vietnam", "vietnamese"],
    },
    LanguageKeywords {
        code: "th",
        keywords: &["태국", "thailand", "thai"],
    },
];

/// ISO-639-1 code of the first language named in `text`, if any.
///
/// Matching is a case-insensitive substring search, so "Japanese" and
/// "일본어" (which contains "일본") both map to `ja`.
///
/// ```
/// use voice_practice::stt::detect_language;
///
/// assert_eq!(detect_language("Can we practise French today?"), Some("fr"));
/// assert_eq!(detect_language("스페인어로 대화해요"), Some("es"));
/// assert_eq!(detect_language("Hello"), None);
/// ```
pub fn detect_language(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    LANGUAGES
        .iter()
        .find(|lang| lang.keywords.iter().any(|k| lower.contains(k)))
        .map(|lang| lang.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_names_any_case() {
        assert_eq!(detect_language("I want to learn GERMAN"), Some("de"));
        assert_eq!(detect_language("italian please"), Some("it"));
        assert_eq!(detect_language("Vietnamese, slowly"), Some("vi"));
    }

    #[test]
    fn korean_names() {
        assert_eq!(detect_language("일본어 연습하고 싶어요"), Some("ja"));
        assert_eq!(detect_language("중문으로"), Some("zh"));
        assert_eq!(detect_language("태국어"), Some("th"));
    }

    #[test]
    fn no_language_named() {
        assert_eq!(detect_language("How are you?"), None);
        assert_eq!(detect_language(""), None);
    }
}
