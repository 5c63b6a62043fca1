//! Keyword sets and match counting for the first classification stage

use std::collections::HashSet;

use crate::state::Route;

/// Greetings and pleasantries
pub const DIRECT_KEYWORDS: &[&str] = &[
    "안녕", "안녕하세요", "감사", "고마워", "반가워", "hello", "hi", "hey", "thanks",
    "thank you", "bye",
];

/// Vague action requests
pub const REASONING_KEYWORDS: &[&str] = &[
    "도와줘", "뭔가", "어떻게 해", "이거", "그거", "뭐든", "아무거나", "좀 봐줘", "help me",
    "something", "anything",
];

/// Domain task nouns and verbs
pub const SPECIALIZED_KEYWORDS: &[&str] = &[
    "문서", "작성", "보고서", "분석", "데이터", "코드", "번역", "검색", "조사", "요약", "report",
    "document", "analyze", "analysis", "data", "code", "translate", "research", "summarize",
    "draft", "write",
];

/// One keyword, pre-split for matching
#[derive(Debug, Clone)]
enum Keyword {
    /// Non-ASCII keyword, matched as a substring
    Substring(String),
    /// ASCII keyword, matched on whole tokens
    Tokens(Vec<String>),
}

impl Keyword {
    fn parse(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.is_ascii() {
            Keyword::Tokens(tokenize(&lower))
        } else {
            Keyword::Substring(lower)
        }
    }

    fn matches(&self, lower_query: &str, tokens: &[String]) -> bool {
        match self {
            Keyword::Substring(s) => lower_query.contains(s.as_str()),
            Keyword::Tokens(words) if words.is_empty() => false,
            Keyword::Tokens(words) => tokens.windows(words.len()).any(|w| w == words.as_slice()),
        }
    }
}

/// Split on anything that is not alphanumeric
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Distinct keyword hits per route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeywordCounts {
    pub direct: usize,
    pub reasoning: usize,
    pub specialized: usize,
}

impl KeywordCounts {
    pub fn total(&self) -> usize {
        self.direct + self.reasoning + self.specialized
    }

    /// Route with the most hits. Ties prefer Reasoning, then Specialized.
    pub fn leader(&self) -> (Route, usize) {
        [
            (Route::Reasoning, self.reasoning),
            (Route::Specialized, self.specialized),
            (Route::Direct, self.direct),
        ]
        .into_iter()
        .fold((Route::Reasoning, 0), |best, candidate| {
            if candidate.1 > best.1 { candidate } else { best }
        })
    }
}

/// The three keyword sets
#[derive(Debug, Clone)]
pub struct KeywordSets {
    direct: Vec<Keyword>,
    reasoning: Vec<Keyword>,
    specialized: Vec<Keyword>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self::new(DIRECT_KEYWORDS, REASONING_KEYWORDS, SPECIALIZED_KEYWORDS)
    }
}

impl KeywordSets {
    pub fn new(direct: &[&str], reasoning: &[&str], specialized: &[&str]) -> Self {
        Self {
            direct: parse_set(direct),
            reasoning: parse_set(reasoning),
            specialized: parse_set(specialized),
        }
    }

    pub fn count(&self, query: &str) -> KeywordCounts {
        let lower = query.to_lowercase();
        let tokens = tokenize(&lower);
        let hits = |set: &[Keyword]| set.iter().filter(|k| k.matches(&lower, &tokens)).count();

        KeywordCounts {
            direct: hits(&self.direct),
            reasoning: hits(&self.reasoning),
            specialized: hits(&self.specialized),
        }
    }
}

/// Number of distinct `keywords` found in `text`, using the same matching
/// rules as the classifier sets
pub fn count_hits<S: AsRef<str>>(keywords: &[S], text: &str) -> usize {
    let lower = text.to_lowercase();
    let tokens = tokenize(&lower);
    let mut seen = HashSet::new();
    keywords
        .iter()
        .map(|k| k.as_ref().to_lowercase())
        .filter(|k| seen.insert(k.clone()))
        .filter(|k| Keyword::parse(k).matches(&lower, &tokens))
        .count()
}

fn parse_set(raw: &[&str]) -> Vec<Keyword> {
    // duplicates would double count a single hit
    let mut seen = HashSet::new();
    raw.iter()
        .filter(|k| seen.insert(k.to_lowercase()))
        .map(|k| Keyword::parse(k))
        .collect()
}
