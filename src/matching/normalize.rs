//! Text normalization applied to both sides before any similarity is computed.

use unaccent::unaccent;

/// Noise tokens stripped from titles, artists and albums unless configured
/// otherwise.
pub const DEFAULT_NOISE_TOKENS: &[&str] = &[
    "remastered",
    "remaster",
    "feat.",
    "feat",
    "ft.",
    "ft",
    "featuring",
    "radio edit",
    "single version",
    "album version",
    "mono",
    "stereo",
    "explicit",
    "clean",
    "deluxe",
    "bonus track",
];

/// Words that introduce a featured-artist tail ("Song feat. Someone").
const FEATURING_MARKERS: &[&str] = &["feat", "ft", "featuring"];

/// Lowercase, strip accents and punctuation, collapse whitespace.
///
/// Apostrophes are dropped rather than split ("Don't" → "dont").
pub fn normalize_string(s: &str) -> String {
    unaccent(s)
        .to_lowercase()
        .chars()
        .filter(|&c| c != '\'' && c != '’')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove every bracketed section: `(...)`, `[...]`, `【...】`, `「...」`.
pub fn strip_parentheticals(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut closing: Option<char> = None;

    for c in s.chars() {
        match closing {
            Some(close) if c == close => closing = None,
            Some(_) => {}
            None => match c {
                '(' => closing = Some(')'),
                '[' => closing = Some(']'),
                '【' => closing = Some('】'),
                '「' => closing = Some('」'),
                _ => result.push(c),
            },
        }
    }

    result.trim().to_string()
}

fn strip_leading_the(s: &str) -> &str {
    s.strip_prefix("the ").unwrap_or(s)
}

/// Configured noise-token stripping, shared by every comparison a matcher
/// performs.
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Each noise token pre-normalized and split into words.
    noise: Vec<Vec<String>>,
}

impl Normalizer {
    pub fn new<S: AsRef<str>>(noise_tokens: &[S]) -> Self {
        let mut noise: Vec<Vec<String>> = noise_tokens
            .iter()
            .map(|token| {
                normalize_string(token.as_ref())
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|words| !words.is_empty())
            .collect();
        // Longest phrases first so "radio edit" wins over a lone "edit".
        noise.sort_by_key(|words| std::cmp::Reverse(words.len()));
        noise.dedup();
        Self { noise }
    }

    fn is_noise_phrase(&self, words: &[&str]) -> bool {
        self.noise
            .iter()
            .any(|phrase| words.windows(phrase.len()).any(|w| w == phrase.as_slice()))
    }

    fn remove_noise(&self, words: Vec<&str>) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(words.len());
        let mut i = 0;
        'outer: while i < words.len() {
            for phrase in &self.noise {
                let end = i + phrase.len();
                if end <= words.len() && words[i..end] == phrase[..] {
                    i = end;
                    continue 'outer;
                }
            }
            out.push(words[i].to_string());
            i += 1;
        }
        out
    }

    /// Normalize a title, artist or album for comparison.
    ///
    /// Bracketed suffixes are dropped, a `" - <suffix>"` tail is dropped when
    /// it contains a noise token ("Song - Remastered 2011"), anything after a
    /// featuring marker is dropped, then noise tokens and a leading "the" go.
    /// If nothing survives, the plain normalized string is used instead.
    pub fn normalize(&self, raw: &str) -> String {
        let mut text = strip_parentheticals(raw);

        if let Some((head, tail)) = text.split_once(" - ") {
            let tail_norm = normalize_string(tail);
            let tail_words: Vec<&str> = tail_norm.split_whitespace().collect();
            if !head.trim().is_empty() && self.is_noise_phrase(&tail_words) {
                text = head.to_string();
            }
        }

        let normalized = normalize_string(&text);
        let mut words: Vec<&str> = normalized.split_whitespace().collect();
        if let Some(pos) = words
            .iter()
            .skip(1)
            .position(|w| FEATURING_MARKERS.contains(w))
        {
            words.truncate(pos + 1);
        }

        let cleaned = self.remove_noise(words).join(" ");
        let cleaned = strip_leading_the(&cleaned).trim().to_string();

        if cleaned.is_empty() {
            normalize_string(raw)
        } else {
            cleaned
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_TOKENS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_string() {
        assert_eq!(normalize_string("Hello World!"), "hello world");
        assert_eq!(normalize_string("Don't Stop"), "dont stop");
        assert_eq!(normalize_string("  Multiple   Spaces  "), "multiple spaces");
        assert_eq!(normalize_string("Beyoncé"), "beyonce");
    }

    #[test]
    fn test_strip_parentheticals() {
        assert_eq!(
            strip_parentheticals("Song Title (feat. Artist) [Remastered]"),
            "Song Title"
        );
        assert_eq!(strip_parentheticals("曲名【Live】"), "曲名");
        assert_eq!(strip_parentheticals("No Brackets"), "No Brackets");
    }

    #[test]
    fn test_remastered_suffix_is_noise() {
        let n = Normalizer::default();
        assert_eq!(n.normalize("Song (Remastered)"), "song");
        assert_eq!(n.normalize("song"), "song");
        assert_eq!(n.normalize("Song - Remastered 2011"), "song");
    }

    #[test]
    fn test_dash_suffix_kept_when_not_noise() {
        let n = Normalizer::default();
        assert_eq!(n.normalize("Hello - Goodbye"), "hello goodbye");
    }

    #[test]
    fn test_featuring_tail_dropped() {
        let n = Normalizer::default();
        assert_eq!(n.normalize("Song feat. Guest Artist"), "song");
        assert_eq!(n.normalize("Song ft Guest"), "song");
    }

    #[test]
    fn test_leading_the_dropped() {
        let n = Normalizer::default();
        assert_eq!(n.normalize("The Beatles"), "beatles");
    }

    #[test]
    fn test_multi_word_noise_token() {
        let n = Normalizer::default();
        assert_eq!(n.normalize("Song Radio Edit"), "song");
    }

    #[test]
    fn test_all_noise_falls_back_to_plain() {
        let n = Normalizer::default();
        assert_eq!(n.normalize("Remastered"), "remastered");
        assert_eq!(n.normalize("(Intro)"), "intro");
    }

    #[test]
    fn test_custom_noise_tokens() {
        let n = Normalizer::new(&["live"]);
        assert_eq!(n.normalize("Song Live"), "song");
        assert_eq!(n.normalize("Song Remastered"), "song remastered");
    }
}
