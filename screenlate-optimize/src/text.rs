//! Shared text helpers for the post-OCR optimizers
//!
//! A compact embedded vocabulary backs the validator's word-ratio scoring
//! and the spell corrector's suggestions. The list is intentionally small:
//! enough to separate prose from OCR garbage, not a spelling authority.

use std::collections::HashSet;
use std::sync::OnceLock;

/// The most frequent English words; membership feeds the "common word" ratio
pub const COMMON_WORDS: &[&str] = &[
    "the", "be", "to", "of", "and", "a", "in", "that", "have", "i", "it", "for", "not", "on",
    "with", "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we",
    "say", "her", "she", "or", "an", "will", "my", "one", "all", "would", "there", "their",
    "what", "so", "up", "out", "if", "about", "who", "get", "which", "go", "me", "when", "make",
    "can", "like", "time", "no", "just", "him", "know", "take", "people", "into", "year", "your",
    "good", "some", "could", "them", "see", "other", "than", "then", "now", "look", "only",
    "come", "its", "over", "think", "also", "back", "after", "use", "two", "how", "our", "work",
    "first", "well", "way", "even", "new", "want", "because", "any", "these", "give", "day",
    "most", "us", "was", "is", "are", "were",
];

/// A broader vocabulary for dictionary-known ratios and spell suggestions
pub const KNOWN_WORDS: &[&str] = &[
    "about", "above", "across", "action", "actually", "after", "again", "against", "almost",
    "alone", "along", "already", "although", "always", "am", "among", "an", "and", "another",
    "answer", "any", "anything", "are", "area", "around", "as", "ask", "at", "away", "back",
    "bad", "be", "beautiful", "became", "because", "become", "been", "before", "began", "begin",
    "behind", "being", "believe", "below", "best", "better", "between", "big", "black", "blue",
    "body", "book", "both", "bring", "brought", "build", "but", "buy", "by", "call", "came",
    "can", "cannot", "car", "care", "carry", "case", "change", "check", "child", "children",
    "city", "class", "close", "cold", "come", "common", "complete", "could", "country", "course",
    "cut", "dark", "day", "decide", "deep", "did", "different", "do", "does", "done", "door",
    "down", "draw", "during", "each", "early", "earth", "easy", "eat", "end", "enough", "even",
    "evening", "ever", "every", "everything", "example", "eye", "face", "fact", "family", "far",
    "fast", "father", "feel", "feet", "few", "field", "find", "fine", "fire", "first", "follow",
    "food", "for", "form", "found", "four", "free", "friend", "from", "front", "full", "game",
    "gave", "get", "girl", "give", "go", "goes", "going", "gone", "good", "got", "great", "green",
    "ground", "group", "grow", "had", "half", "hand", "happy", "hard", "has", "have", "he",
    "head", "hear", "heard", "heart", "hello", "help", "her", "here", "high", "him", "his",
    "hold", "home", "hope", "hot", "hour", "house", "how", "however", "hundred", "idea", "if",
    "important", "in", "inside", "into", "is", "it", "its", "just", "keep", "kind", "knew",
    "know", "land", "language", "large", "last", "late", "later", "learn", "leave", "left",
    "less", "let", "letter", "life", "light", "like", "line", "list", "listen", "little",
    "live", "long", "look", "love", "low", "made", "make", "man", "many", "may", "me", "mean",
    "men", "might", "mind", "mine", "minute", "miss", "moment", "money", "month", "moon",
    "more", "morning", "most", "mother", "move", "much", "must", "my", "name", "near", "need",
    "never", "new", "news", "next", "night", "no", "not", "note", "nothing", "now", "number", "of",
    "off", "often", "old", "on", "once", "one", "only", "open", "or", "order", "other", "our",
    "out", "over", "own", "page", "paper", "part", "people", "perhaps", "person", "picture",
    "place", "plan", "play", "please", "point", "power", "press", "problem", "put", "question",
    "quick", "quite", "read", "ready", "real", "really", "red", "remember", "rest", "return",
    "right", "river", "road", "room", "run", "said", "same", "saw", "say", "school", "screen",
    "sea", "second", "see", "seem", "seen", "sentence", "set", "settings", "several", "shall",
    "she", "short", "should", "show", "side", "simple", "since", "sit", "slow", "small", "so",
    "some", "something", "sometimes", "soon", "sound", "speak", "start", "state", "stay",
    "still", "stop", "story", "street", "strong", "study", "such", "sun", "sure", "system",
    "take", "talk", "tell", "ten", "text", "than", "thank", "that", "the", "their", "them",
    "then", "there", "these", "they", "thing", "think", "third", "this", "those", "though",
    "thought", "three", "through", "time", "to", "today", "together", "told", "too", "took",
    "top", "toward", "town", "translation", "tree", "true", "try", "turn", "two", "under",
    "understand", "until", "up", "upon", "us", "use", "used", "very", "visible", "voice",
    "wait", "walk",
    "want", "warm", "was", "watch", "water", "way", "we", "week", "well", "went", "were",
    "what", "when", "where", "which", "while", "white", "who", "whole", "why", "will", "window",
    "wish", "with", "within", "without", "word", "work", "world", "would", "write", "year",
    "yes", "yet", "you", "young", "your",
];

fn common_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| COMMON_WORDS.iter().copied().collect())
}

fn known_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        KNOWN_WORDS
            .iter()
            .copied()
            .chain(COMMON_WORDS.iter().copied())
            .collect()
    })
}

/// Whether a lowercase word is in the high-frequency list
pub fn is_common_word(word: &str) -> bool {
    common_set().contains(word)
}

/// Whether a lowercase word is in the embedded vocabulary
pub fn is_known_word(word: &str) -> bool {
    known_set().contains(word)
}

/// Whether a character belongs to the CJK ranges the pipeline treats as text
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified
        | 0xAC00..=0xD7AF    // Hangul syllables
        | 0xF900..=0xFAFF    // CJK compatibility
        | 0xFF66..=0xFF9D    // Halfwidth katakana
    )
}

/// Whether the text contains any CJK character
pub fn has_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// Levenshtein edit distance
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized similarity in [0, 1]: 1 means identical
pub fn similarity(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f32 / longest as f32
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// Closest vocabulary word to `token`
///
/// Ranked by edit distance, then by shared prefix length (OCR rarely breaks
/// the first characters of a word), then by list order. Returns the word and
/// its similarity to the token; the caller applies its acceptance threshold.
pub fn suggest(token: &str) -> Option<(&'static str, f32)> {
    let lower = token.to_lowercase();
    if lower.is_empty() {
        return None;
    }
    let mut best: Option<(&'static str, usize, usize)> = None;
    for &word in KNOWN_WORDS {
        let distance = edit_distance(&lower, word);
        let prefix = common_prefix_len(&lower, word);
        let better = match best {
            None => true,
            Some((_, best_distance, best_prefix)) => {
                distance < best_distance || (distance == best_distance && prefix > best_prefix)
            }
        };
        if better {
            best = Some((word, distance, prefix));
        }
    }
    best.map(|(word, _, _)| (word, similarity(&lower, word)))
}
