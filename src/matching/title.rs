//! Pure title-normalisation helpers used by every cross-provider comparison.

use regex::Regex;
use std::sync::OnceLock;

/// Consolidates regexes for title cleanup to avoid per-call overhead.
struct TitleRegex {
    parenthetical: Regex,
    affixes: Regex,
    ordinal_season: Regex,
    season_word: Regex,
    cour: Regex,
    short_season: Regex,
    part: Regex,
    whitespace: Regex,
    non_slug: Regex,
}

impl TitleRegex {
    fn get() -> Option<&'static Self> {
        static INSTANCE: OnceLock<Option<TitleRegex>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                Some(Self {
                    parenthetical: Regex::new(r"\([^)]*\)").ok()?,
                    affixes: Regex::new(r"(?i)\b(?:sub\s+indo|batch|nonton\s+anime)\b").ok()?,
                    ordinal_season: Regex::new(r"(?i)\b(\d+)(?:st|nd|rd|th)\s+season\b").ok()?,
                    season_word: Regex::new(r"(?i)\bseason\s*(\d+)\b").ok()?,
                    cour: Regex::new(r"(?i)\bcour\s*(\d+)\b").ok()?,
                    short_season: Regex::new(r"(?i)\bs(\d+)\b").ok()?,
                    part: Regex::new(r"(?i)\bpart\s*(\d+)\b").ok()?,
                    whitespace: Regex::new(r"\s+").ok()?,
                    non_slug: Regex::new(r"[^a-z0-9]+").ok()?,
                })
            })
            .as_ref()
    }
}

/// Punctuation stripped by [`clean_title`]. Providers disagree on quote and
/// exclamation conventions, and on ~110-char titles that alone drops
/// Levenshtein similarity below the 0.85 gate.
const STRIPPED_PUNCTUATION: &[char] = &[
    '"', '\u{201C}', '\u{201D}', '\'', '\u{2018}', '\u{2019}', '\u{FF02}', '\u{FF07}', '?', '!',
    '\u{FF01}',
];

/// Lowercase, collapse every non-alphanumeric run into a single hyphen,
/// trim leading/trailing hyphens.
#[must_use]
pub fn canonical_slug(title: &str) -> String {
    let Some(re) = TitleRegex::get() else {
        return title.to_lowercase();
    };
    re.non_slug
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Strip parentheticals, provider affixes and the punctuation set, then
/// collapse whitespace.
#[must_use]
pub fn clean_title(raw: &str) -> String {
    let Some(re) = TitleRegex::get() else {
        return raw.trim().to_string();
    };

    let without_parens = re.parenthetical.replace_all(raw, " ");
    let without_affixes = re.affixes.replace_all(&without_parens, " ");
    let without_punct: String = without_affixes
        .chars()
        .filter(|c| !STRIPPED_PUNCTUATION.contains(c))
        .collect();

    re.whitespace
        .replace_all(&without_punct, " ")
        .trim()
        .to_string()
}

/// Rewrite every season/cour suffix convention into a canonical `part <n>`
/// form. Applied symmetrically on both sides of any comparison.
#[must_use]
pub fn normalise_season(title: &str) -> String {
    let Some(re) = TitleRegex::get() else {
        return title.to_lowercase();
    };

    let lowered = title.to_lowercase();
    let step = re.ordinal_season.replace_all(&lowered, "part $1");
    let step = re.season_word.replace_all(&step, "part $1");
    let step = re.cour.replace_all(&step, "part $1");
    let step = re.short_season.replace_all(&step, "part $1");
    let step = re.part.replace_all(&step, "part $1");

    re.whitespace.replace_all(&step, " ").trim().to_string()
}

/// Classic DP Levenshtein over chars.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let len_a = a_chars.len();
    let len_b = b_chars.len();

    if len_a == 0 {
        return len_b;
    }
    if len_b == 0 {
        return len_a;
    }

    let mut matrix = vec![vec![0usize; len_b + 1]; len_a + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=len_b {
        matrix[0][j] = j;
    }

    for i in 1..=len_a {
        for j in 1..=len_b {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[len_a][len_b]
}

/// Normalised similarity in `[0, 1]`: `(longer - levenshtein) / longer`.
/// Two empty strings are identical.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let longer = len_a.max(len_b);

    if longer == 0 {
        return 1.0;
    }

    let distance = levenshtein_distance(a, b);
    (longer.saturating_sub(distance)) as f64 / longer as f64
}

/// True when one slug is a `<other>-…` extension of the other and the
/// shorter side is at least `min_len` chars.
#[must_use]
pub fn slug_prefix_match(a: &str, b: &str, min_len: usize) -> bool {
    let slug_a = canonical_slug(a);
    let slug_b = canonical_slug(b);
    if slug_a.len() < min_len || slug_b.len() < min_len {
        return false;
    }
    slug_a == slug_b
        || slug_a.starts_with(&format!("{slug_b}-"))
        || slug_b.starts_with(&format!("{slug_a}-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_slug() {
        assert_eq!(canonical_slug("Jigokuraku: Season 2"), "jigokuraku-season-2");
        assert_eq!(canonical_slug("  Dr. STONE!!  "), "dr-stone");
    }

    #[test]
    fn test_clean_title_strips_affixes_and_punctuation() {
        assert_eq!(
            clean_title("Jigokuraku (Hell's Paradise) Sub Indo Batch"),
            "Jigokuraku"
        );
        assert_eq!(clean_title("Oshi no Ko!!"), "Oshi no Ko");
        assert_eq!(clean_title("\u{201C}Quoted\u{201D} Title?"), "Quoted Title");
    }

    #[test]
    fn test_normalise_season_variants() {
        for raw in [
            "jigokuraku season 2",
            "jigokuraku 2nd season",
            "jigokuraku cour 2",
            "jigokuraku s2",
            "jigokuraku part 2",
        ] {
            assert_eq!(normalise_season(raw), "jigokuraku part 2");
        }
    }

    #[test]
    fn test_similarity_bounds_and_symmetry() {
        let pairs = [("jigokuraku", "jigokuraki"), ("abc", "xyz"), ("", "abc")];
        for (a, b) in pairs {
            let s = similarity(a, b);
            assert!((0.0..=1.0).contains(&s));
            assert!((s - similarity(b, a)).abs() < f64::EPSILON);
        }
        assert!((similarity("same", "same") - 1.0).abs() < f64::EPSILON);
        assert!((similarity("", "") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_levenshtein_known_values() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
    }

    #[test]
    fn test_slug_prefix_match() {
        assert!(slug_prefix_match("jigokuraku", "Jigokuraku Season 2", 5));
        assert!(!slug_prefix_match("one", "one piece", 5));
        assert!(!slug_prefix_match("jigokuraku", "kimetsu no yaiba", 5));
    }
}
