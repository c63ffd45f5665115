use nucleo_matcher::pattern::{AtomKind, CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32String};

pub const MAX_RESULTS: usize = 8;

/// Typo matches score in `1..=TYPO_CEILING`; subsequence matches are shifted
/// above it so they always rank first.
const TYPO_CEILING: u32 = 64;

/// Query words shorter than this must match a word prefix exactly.
const MIN_TYPO_WORD_LEN: usize = 3;

/// Fuzzy search over team names using nucleo-matcher, with an edit-distance
/// fallback for misspelled words.
pub struct FuzzySearch {
    matcher: Matcher,
}

impl FuzzySearch {
    pub fn new() -> Self {
        Self {
            matcher: Matcher::new(Config::DEFAULT),
        }
    }

    /// Returns at most [`MAX_RESULTS`] names, best match first. Equal scores
    /// are ordered by name.
    pub fn search<'a, I>(&mut self, corpus: I, query: &str) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let words = query_words(query);
        if words.is_empty() {
            return Vec::new();
        }

        // Each whitespace separated word becomes its own atom, so word order
        // in the query does not matter.
        let pattern = Pattern::new(
            query,
            CaseMatching::Ignore,
            Normalization::Smart,
            AtomKind::Fuzzy,
        );

        let mut scored: Vec<(&str, u32)> = corpus
            .into_iter()
            .filter_map(|candidate| {
                let haystack = Utf32String::from(candidate);
                let score = pattern
                    .score(haystack.slice(..), &mut self.matcher)
                    .map(|score| score.saturating_add(TYPO_CEILING))
                    .or_else(|| typo_score(&words, candidate))?;
                Some((candidate, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored.dedup_by(|a, b| a.0 == b.0);
        scored.truncate(MAX_RESULTS);

        scored
            .into_iter()
            .map(|(name, _)| name.to_owned())
            .collect()
    }
}

impl Default for FuzzySearch {
    fn default() -> Self {
        Self::new()
    }
}

fn query_words(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Every query word has to be close to some word of the candidate.
fn typo_score(words: &[String], candidate: &str) -> Option<u32> {
    let candidate_words = query_words(candidate);
    let mut total_distance = 0;

    for word in words {
        let distance = candidate_words
            .iter()
            .filter_map(|target| word_distance(word, target))
            .min()?;
        total_distance += distance;
    }

    let total_distance = u32::try_from(total_distance).unwrap_or(TYPO_CEILING);
    Some(TYPO_CEILING.saturating_sub(total_distance).max(1))
}

fn word_distance(word: &str, target: &str) -> Option<usize> {
    let word_len = word.chars().count();
    if word_len < MIN_TYPO_WORD_LEN {
        return target.starts_with(word).then_some(0);
    }

    let allowed = if word_len <= 5 { 1 } else { 2 };
    let distance = osa_distance(word, target);
    (distance <= allowed).then_some(distance)
}

/// Optimal string alignment distance: Levenshtein plus adjacent transpositions.
fn osa_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let width = b.len() + 1;
    let mut table = vec![0usize; (a.len() + 1) * width];

    for i in 0..=a.len() {
        table[i * width] = i;
    }
    for j in 0..=b.len() {
        table[j] = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (table[(i - 1) * width + j] + 1)
                .min(table[i * width + j - 1] + 1)
                .min(table[(i - 1) * width + j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(table[(i - 2) * width + j - 2] + 1);
            }
            table[i * width + j] = best;
        }
    }

    table[a.len() * width + b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEAMS: &[&str] = &[
        "Team Liquid",
        "Team Spirit",
        "OG",
        "Gaimin Gladiators",
        "Tundra Esports",
        "BetBoom Team",
    ];

    fn search(corpus: &[&str], query: &str) -> Vec<String> {
        FuzzySearch::new().search(corpus.iter().copied(), query)
    }

    #[test]
    fn two_character_query_matches() {
        let results = search(&["Team Liquid", "Team Spirit", "OG"], "te");
        assert_eq!(results, vec!["Team Liquid", "Team Spirit"]);
    }

    #[test]
    fn single_character_query_is_not_rejected() {
        let results = search(&["OG", "Team Liquid"], "o");
        assert_eq!(results, vec!["OG"]);
    }

    #[test]
    fn partial_input_matches() {
        let results = search(TEAMS, "liq");
        assert_eq!(results.first().map(String::as_str), Some("Team Liquid"));
    }

    #[test]
    fn reordered_words_match() {
        let results = search(TEAMS, "spirit team");
        assert_eq!(results, vec!["Team Spirit"]);
    }

    #[test]
    fn misspelled_words_match() {
        let results = search(TEAMS, "team liqiud");
        assert_eq!(results, vec!["Team Liquid"]);
    }

    #[test]
    fn subsequence_matches_outrank_typo_matches() {
        let results = search(&["Gladiators", "Gladaitors"], "gladiators");
        assert_eq!(results, vec!["Gladiators", "Gladaitors"]);
    }

    #[test]
    fn results_are_capped() {
        let corpus: Vec<String> = (0..20).map(|n| format!("Team {n:02}")).collect();
        let results = FuzzySearch::new().search(corpus.iter().map(String::as_str), "team");

        assert_eq!(results.len(), MAX_RESULTS);
    }

    #[test]
    fn ranking_is_reproducible() {
        let first = search(TEAMS, "t");
        let second = search(TEAMS, "t");

        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn duplicate_candidates_are_returned_once() {
        let results = search(&["OG", "OG"], "og");
        assert_eq!(results, vec!["OG"]);
    }

    #[test]
    fn blank_query_matches_nothing() {
        assert!(search(TEAMS, "   ").is_empty());
    }

    #[test]
    fn no_match_is_empty() {
        assert!(search(TEAMS, "xyzzy").is_empty());
    }

    #[test]
    fn osa_counts_transpositions_once() {
        assert_eq!(osa_distance("liqiud", "liquid"), 1);
        assert_eq!(osa_distance("og", "og"), 0);
        assert_eq!(osa_distance("", "abc"), 3);
    }
}
