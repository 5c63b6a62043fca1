//! Two-stage intent classifier
//!
//! Stage 1 counts keyword hits per route and applies a few shortcut rules.
//! Stage 2 runs only when no keyword matched: the query is encoded locally
//! and compared against one centroid per route. Neither stage performs I/O.

pub mod embedding;
pub mod keywords;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::{ClassificationMethod, Route};

use embedding::{HashEncoder, centroid, cosine};
use keywords::{KeywordCounts, KeywordSets};

/// Best centroid similarity below this is not trusted
const SIMILARITY_FLOOR: f32 = 0.3;
/// Lowest confidence reported for a keyword majority
const MIN_KEYWORD_CONFIDENCE: f32 = 0.3;

const DIRECT_EXAMPLES: &[&str] = &[
    "좋은 아침이에요",
    "오늘 날씨 어때",
    "잘 지냈어?",
    "오늘 기분 좋다",
    "good morning",
    "how are you",
    "nice to meet you",
    "what time is it",
];

const REASONING_EXAMPLES: &[&str] = &[
    "뭘 해야 할지 모르겠어",
    "잘 모르겠는데 방법이 있을까",
    "어디서부터 시작해야 할까",
    "이 문제 어떻게 접근하지",
    "not sure where to start",
    "i need some guidance",
    "can you figure this out",
    "what should i do next",
];

const SPECIALIZED_EXAMPLES: &[&str] = &[
    "분기별 매출 보고서를 작성해줘",
    "이 CSV 파일의 통계를 분석해줘",
    "파이썬 함수 버그를 고쳐줘",
    "이 문장을 영어로 번역해줘",
    "시장 동향 자료를 조사해줘",
    "write a project proposal",
    "debug this rust function",
    "translate this paragraph into korean",
];

/// Result of classifying one query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub route: Route,
    pub confidence: f32,
    pub method: ClassificationMethod,
}

impl Classification {
    fn keyword(route: Route, confidence: f32) -> Self {
        Self {
            route,
            confidence,
            method: ClassificationMethod::Keyword,
        }
    }

    /// Default used when the classifier could not run
    pub fn fallback() -> Self {
        Self {
            route: Route::Reasoning,
            confidence: 0.0,
            method: ClassificationMethod::Fallback,
        }
    }
}

/// Keyword sets plus precomputed route centroids.
///
/// Built once at startup and shared read-only between requests.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    keywords: KeywordSets,
    encoder: HashEncoder,
    centroids: Vec<(Route, Vec<f32>)>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    /// Classifier with the built-in keyword sets and example utterances
    pub fn new() -> Self {
        Self::with_examples(
            KeywordSets::default(),
            &[
                (Route::Direct, DIRECT_EXAMPLES),
                (Route::Reasoning, REASONING_EXAMPLES),
                (Route::Specialized, SPECIALIZED_EXAMPLES),
            ],
        )
    }

    pub fn with_examples(keywords: KeywordSets, examples: &[(Route, &[&str])]) -> Self {
        let encoder = HashEncoder::default();
        let centroids = examples
            .iter()
            .map(|(route, utterances)| (*route, centroid(&encoder, utterances)))
            .collect();

        Self {
            keywords,
            encoder,
            centroids,
        }
    }

    /// Classify `query`. Never fails; empty input lands on Reasoning.
    pub fn classify(&self, query: &str) -> Classification {
        let counts = self.keywords.count(query);
        let classification = match self.keyword_stage(query, counts) {
            Some(c) => c,
            None => self.embedding_stage(query),
        };

        debug!(
            route = %classification.route,
            confidence = classification.confidence,
            method = classification.method.as_str(),
            ?counts,
            "classified query"
        );
        classification
    }

    fn keyword_stage(&self, query: &str, counts: KeywordCounts) -> Option<Classification> {
        let length = query.trim().chars().count();

        if length < 10 && counts.direct > 0 {
            return Some(Classification::keyword(Route::Direct, 0.95));
        }
        if length < 15 && counts.reasoning > 0 {
            return Some(Classification::keyword(Route::Reasoning, 0.9));
        }
        if counts.specialized >= 2 {
            return Some(Classification::keyword(Route::Specialized, 0.85));
        }

        let total = counts.total();
        if total == 0 {
            return None;
        }

        let (route, hits) = counts.leader();
        let share = hits as f32 / total as f32;
        Some(Classification::keyword(route, share.max(MIN_KEYWORD_CONFIDENCE)))
    }

    fn embedding_stage(&self, query: &str) -> Classification {
        let encoded = self.encoder.encode(query);

        let (route, similarity) = self
            .centroids
            .iter()
            .map(|(route, c)| (*route, cosine(&encoded, c)))
            .fold((Route::Reasoning, f32::MIN), |best, candidate| {
                if candidate.1 > best.1 { candidate } else { best }
            });
        let similarity = similarity.max(0.0);

        Classification {
            route: if similarity < SIMILARITY_FLOOR {
                Route::Reasoning
            } else {
                route
            },
            confidence: similarity,
            method: ClassificationMethod::Embedding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_greeting_is_direct() {
        let classifier = IntentClassifier::new();
        for query in ["안녕하세요", "hi", "hello!", "고마워요", "thanks!"] {
            let c = classifier.classify(query);
            assert_eq!(c.route, Route::Direct, "query: {query}");
            assert!(c.confidence >= 0.95);
            assert_eq!(c.method, ClassificationMethod::Keyword);
        }
    }

    #[test]
    fn test_short_vague_request_is_reasoning() {
        let classifier = IntentClassifier::new();
        let c = classifier.classify("이거 좀 도와줘");
        assert_eq!(c.route, Route::Reasoning);
        assert!((c.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_two_domain_keywords_is_specialized() {
        let classifier = IntentClassifier::new();
        for query in [
            "문서 작성해줘 보고서",
            "이번 분기 매출 데이터를 분석해서 정리해줘",
            "please translate this document for me",
        ] {
            let c = classifier.classify(query);
            assert_eq!(c.route, Route::Specialized, "query: {query}");
            assert!(c.confidence >= 0.85);
        }
    }

    #[test]
    fn test_single_keyword_majority_share() {
        let classifier = IntentClassifier::new();
        // one Specialized hit, long enough to skip the shortcut rules
        let c = classifier.classify("could you put together a short report tomorrow");
        assert_eq!(c.route, Route::Specialized);
        assert!((c.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(c.method, ClassificationMethod::Keyword);
    }

    #[test]
    fn test_keyword_tie_prefers_reasoning() {
        let classifier = IntentClassifier::new();
        // one Reasoning and one Specialized hit, too long for the shortcuts
        let c = classifier.classify("can you help me with the quarterly report please");
        assert_eq!(c.route, Route::Reasoning);
        assert!((c.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_query_defaults_to_reasoning() {
        let classifier = IntentClassifier::new();
        for query in ["", "   ", "\n\t"] {
            let c = classifier.classify(query);
            assert_eq!(c.route, Route::Reasoning);
            assert_eq!(c.confidence, 0.0);
            assert_eq!(c.method, ClassificationMethod::Embedding);
        }
    }

    #[test]
    fn test_embedding_stage_matches_nearest_centroid() {
        let classifier = IntentClassifier::with_examples(
            KeywordSets::new(&[], &[], &[]),
            &[
                (Route::Direct, &["좋은 아침입니다"][..]),
                (Route::Reasoning, &["어디서부터 시작할까"][..]),
                (Route::Specialized, &["매출 통계를 정리"][..]),
            ],
        );
        let c = classifier.classify("매출 통계를 정리");
        assert_eq!(c.route, Route::Specialized);
        assert_eq!(c.method, ClassificationMethod::Embedding);
        assert!(c.confidence > 0.99);
    }

    #[test]
    fn test_fallback_classification() {
        let c = Classification::fallback();
        assert_eq!(c.route, Route::Reasoning);
        assert_eq!(c.method, ClassificationMethod::Fallback);
    }
}
