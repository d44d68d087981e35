//! The retrieval engine: ranks documents against a query and assembles
//! length-bounded context strings.
//!
//! # Scoring strategy
//!
//! The engine is built once against a [`DocumentStore`] and holds one of two
//! scoring strategies as explicit state:
//!
//! - **Semantic** — cosine similarity between the query's embedding and a
//!   per-document vector index computed at build time.
//! - **Lexical** — fraction of whitespace-separated query tokens found in a
//!   document's `content`, case-insensitively, as whole substrings or (for
//!   CJK tokens) character bigrams.
//!
//! The strategy is selected at construction: no embedding capability, or a
//! failure while embedding the store, selects lexical mode for the engine's
//! lifetime. The downgrade is one-way — a broken model is not retried per
//! query. A failure *during* a semantic search (a lost connection, a stale
//! index after concurrent misuse) falls back to lexical scoring for that
//! call only.
//!
//! `search` and `get_context` never fail: the worst case for a well-formed
//! query is a lower-quality lexical ranking or an empty result set.
//!
//! # Concurrency
//!
//! `search` performs no mutation and may be called concurrently. Only
//! [`RetrievalEngine::add_custom`] mutates engine state (append + full index
//! rebuild); callers must serialize it against in-flight searches — the
//! engine provides no internal locking.

use anyhow::{bail, Result};

use crate::embedding::Embedder;
use crate::models::{Document, ScoredDocument};
use crate::store::DocumentStore;

/// How many ranked documents `get_context` considers by default.
pub const DEFAULT_CONTEXT_TOP_K: usize = 3;

/// Active scoring strategy. Semantic carries the embedding capability and
/// the vector index, aligned with store insertion order.
enum ScoringStrategy {
    Semantic {
        embedder: Box<dyn Embedder>,
        index: Vec<Vec<f32>>,
    },
    Lexical,
}

/// Ranks documents by relevance to a query string.
///
/// Owns its [`DocumentStore`]; the store grows only through
/// [`add_custom`](RetrievalEngine::add_custom).
pub struct RetrievalEngine {
    store: DocumentStore,
    strategy: ScoringStrategy,
    context_top_k: usize,
}

impl RetrievalEngine {
    /// Build an engine over `store`.
    ///
    /// With an embedding capability, every document's `content` is embedded
    /// up front; an embedding failure logs once and degrades the engine
    /// permanently to lexical mode. With `None`, the engine starts in
    /// lexical mode.
    pub async fn build(store: DocumentStore, embedder: Option<Box<dyn Embedder>>) -> Self {
        let strategy = match embedder {
            Some(embedder) => build_strategy(&store, embedder).await,
            None => {
                tracing::info!("no embedding capability, using lexical matching");
                ScoringStrategy::Lexical
            }
        };
        Self {
            store,
            strategy,
            context_top_k: DEFAULT_CONTEXT_TOP_K,
        }
    }

    /// Override how many ranked documents `get_context` considers.
    pub fn with_context_top_k(mut self, top_k: usize) -> Self {
        self.context_top_k = top_k;
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// `"semantic"` or `"lexical"`.
    pub fn mode(&self) -> &'static str {
        match self.strategy {
            ScoringStrategy::Semantic { .. } => "semantic",
            ScoringStrategy::Lexical => "lexical",
        }
    }

    /// Rank documents against `query`, most relevant first, at most `top_k`.
    ///
    /// Never fails. `top_k == 0` or an empty store returns an empty vec;
    /// any failure on the semantic path falls back to lexical scoring for
    /// this call only.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<ScoredDocument> {
        if top_k == 0 || self.store.is_empty() {
            return Vec::new();
        }

        match &self.strategy {
            ScoringStrategy::Semantic { embedder, index } => {
                match self
                    .semantic_search(embedder.as_ref(), index, query, top_k)
                    .await
                {
                    Ok(results) => results,
                    Err(err) => {
                        tracing::warn!(error = %err, "semantic scoring failed, using lexical fallback for this query");
                        self.lexical_search(query, top_k)
                    }
                }
            }
            ScoringStrategy::Lexical => self.lexical_search(query, top_k),
        }
    }

    async fn semantic_search(
        &self,
        embedder: &dyn Embedder,
        index: &[Vec<f32>],
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        if index.len() != self.store.len() {
            bail!(
                "index covers {} documents but store has {}",
                index.len(),
                self.store.len()
            );
        }

        let query_vec = embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response for query"))?;

        let mut results: Vec<ScoredDocument> = self
            .store
            .documents()
            .iter()
            .zip(index)
            .map(|(doc, vec)| ScoredDocument {
                document: doc.clone(),
                similarity_score: cosine_similarity(&query_vec, vec),
            })
            .collect();

        sort_descending(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    /// Keyword overlap scoring: `matched tokens / total tokens`, matching
    /// case-insensitively on substrings. CJK queries usually contain no
    /// whitespace, so a CJK token also matches when any of its character
    /// bigrams occurs in the content. Zero-score documents are excluded.
    fn lexical_search(&self, query: &str, top_k: usize) -> Vec<ScoredDocument> {
        let query_lower = query.to_lowercase();
        let tokens: Vec<&str> = query_lower.split_whitespace().collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<ScoredDocument> = Vec::new();
        for doc in self.store.documents() {
            let content_lower = doc.content().to_lowercase();
            let matched = tokens
                .iter()
                .filter(|token| token_matches(&content_lower, token))
                .count();
            if matched > 0 {
                results.push(ScoredDocument {
                    document: doc.clone(),
                    similarity_score: matched as f32 / tokens.len() as f32,
                });
            }
        }

        sort_descending(&mut results);
        results.truncate(top_k);
        results
    }

    /// Assemble a context string from the top-ranked documents.
    ///
    /// Entries are formatted per document type (`FAQ - {question}: {answer}`
    /// for FAQ documents, `商品分类信息: {content}` otherwise) and appended
    /// whole, in rank order, until the next entry would push the total past
    /// `max_chars`. Entry lengths are counted in `char`s; joining separators
    /// are not counted. Returns `""` when there are no results or the first
    /// entry alone exceeds the budget.
    pub async fn get_context(&self, query: &str, max_chars: usize) -> String {
        let results = self.search(query, self.context_top_k).await;

        let mut parts: Vec<String> = Vec::new();
        let mut used = 0usize;

        for result in results {
            let part = match &result.document {
                Document::Faq(faq) => format!("FAQ - {}: {}", faq.question, faq.answer),
                other => format!("商品分类信息: {}", other.content()),
            };
            let chars = part.chars().count();
            if used + chars > max_chars {
                break;
            }
            used += chars;
            parts.push(part);
        }

        parts.join("\n\n")
    }

    /// Append a caller-supplied document and rebuild the index.
    ///
    /// `kind` is the document type to carry, `"custom"` for plain entries;
    /// see [`DocumentStore::push_custom`]. The rebuild embeds the whole
    /// store again — O(total documents), acceptable because the store is
    /// small. A rebuild failure degrades the engine permanently to lexical
    /// mode.
    pub async fn add_custom(
        &mut self,
        content: String,
        kind: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) {
        self.store.push_custom(content, kind, fields);

        let strategy = std::mem::replace(&mut self.strategy, ScoringStrategy::Lexical);
        self.strategy = match strategy {
            ScoringStrategy::Semantic { embedder, .. } => {
                build_strategy(&self.store, embedder).await
            }
            ScoringStrategy::Lexical => ScoringStrategy::Lexical,
        };
    }
}

/// Embed every document in order; any failure selects lexical mode.
async fn build_strategy(store: &DocumentStore, embedder: Box<dyn Embedder>) -> ScoringStrategy {
    let texts: Vec<String> = store
        .documents()
        .iter()
        .map(|doc| doc.content().to_string())
        .collect();

    if texts.is_empty() {
        return ScoringStrategy::Semantic {
            embedder,
            index: Vec::new(),
        };
    }

    match embedder.embed(&texts).await {
        Ok(index) if index.len() == texts.len() => {
            tracing::info!(
                model = embedder.model_name(),
                documents = index.len(),
                "semantic index built"
            );
            ScoringStrategy::Semantic { embedder, index }
        }
        Ok(index) => {
            tracing::warn!(
                expected = texts.len(),
                got = index.len(),
                "embedding count mismatch, degrading to lexical mode permanently"
            );
            ScoringStrategy::Lexical
        }
        Err(err) => {
            tracing::warn!(error = %err, "index build failed, degrading to lexical mode permanently");
            ScoringStrategy::Lexical
        }
    }
}

/// Whether a query token matches a document's content.
///
/// Direct substring containment first. A multi-character CJK token is
/// additionally matched through its character bigrams: "退款流程" never
/// occurs verbatim in a FAQ about refunds, but its bigram "退款" does.
fn token_matches(content: &str, token: &str) -> bool {
    if content.contains(token) {
        return true;
    }
    let chars: Vec<char> = token.chars().collect();
    chars.windows(2).any(|pair| {
        is_cjk(pair[0])
            && is_cjk(pair[1])
            && content.contains(pair.iter().collect::<String>().as_str())
    })
}

/// CJK Unified Ideographs block.
fn is_cjk(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

/// Stable descending sort: ties keep store insertion order.
fn sort_descending(results: &mut [ScoredDocument]) {
    results.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn faq_store() -> DocumentStore {
        let mut store = DocumentStore::new();
        store.ingest_faq(&json!({
            "faqs": [
                {
                    "question": "如何申请退款？",
                    "answer": "在订单页面点击退款按钮。",
                    "category": "售后",
                    "keywords": ["退款"]
                },
                {
                    "question": "物流多久到货？",
                    "answer": "一般3-5个工作日。",
                    "category": "物流"
                }
            ]
        }));
        store
    }

    /// Deterministic 3-dim embedding: [contains 退款, contains 物流, bias].
    fn encode(text: &str) -> Vec<f32> {
        vec![
            if text.contains("退款") { 1.0 } else { 0.0 },
            if text.contains("物流") { 1.0 } else { 0.0 },
            0.1,
        ]
    }

    struct VocabEmbedder;

    #[async_trait]
    impl Embedder for VocabEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| encode(t)).collect())
        }
        fn dims(&self) -> usize {
            3
        }
        fn model_name(&self) -> &str {
            "vocab-stub"
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("model load failed")
        }
        fn dims(&self) -> usize {
            3
        }
        fn model_name(&self) -> &str {
            "failing-stub"
        }
    }

    /// Succeeds on the first call (index build), fails afterwards.
    struct FlakyEmbedder {
        calls: AtomicUsize,
    }

    impl FlakyEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                bail!("connection reset");
            }
            Ok(texts.iter().map(|t| encode(t)).collect())
        }
        fn dims(&self) -> usize {
            3
        }
        fn model_name(&self) -> &str {
            "flaky-stub"
        }
    }

    #[tokio::test]
    async fn test_lexical_ranks_matching_document_only() {
        let engine = RetrievalEngine::build(faq_store(), None).await;
        let results = engine.search("退款流程", 5).await;

        // 退款 matches as a substring of doc A; doc B scores zero and is excluded.
        assert_eq!(results.len(), 1);
        assert!(results[0].document.content().contains("退款"));
        assert!(results[0].similarity_score > 0.0);
    }

    #[tokio::test]
    async fn test_lexical_cjk_query_without_whitespace() {
        let engine = RetrievalEngine::build(faq_store(), None).await;

        // No document contains "退款流程" verbatim; the bigram "退款" still
        // finds the refund FAQ, and the logistics FAQ stays at zero.
        let results = engine.search("退款流程", 5).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].document.content().contains("退款"));
        assert!(!results[0].document.content().contains("物流"));
        assert!(results[0].similarity_score > 0.0);

        // No bigram of "退货政策" occurs in either document.
        assert!(engine.search("退货政策", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_lexical_is_case_invariant() {
        let mut store = DocumentStore::new();
        store.push_custom("Refund policy details".to_string(), "custom", serde_json::Map::new());
        store.push_custom("Shipping information".to_string(), "custom", serde_json::Map::new());
        let engine = RetrievalEngine::build(store, None).await;

        let lower = engine.search("refund", 5).await;
        let upper = engine.search("REFUND", 5).await;
        assert_eq!(lower.len(), 1);
        assert_eq!(upper.len(), 1);
        assert_eq!(
            lower[0].document.content(),
            upper[0].document.content()
        );
        assert_eq!(lower[0].similarity_score, upper[0].similarity_score);
    }

    #[tokio::test]
    async fn test_lexical_score_is_matched_token_fraction() {
        let mut store = DocumentStore::new();
        store.push_custom("alpha beta".to_string(), "custom", serde_json::Map::new());
        let engine = RetrievalEngine::build(store, None).await;

        let results = engine.search("alpha gamma", 5).await;
        assert_eq!(results.len(), 1);
        assert!((results[0].similarity_score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_top_k_zero_and_empty_store() {
        let engine = RetrievalEngine::build(faq_store(), None).await;
        assert!(engine.search("退款", 0).await.is_empty());

        let empty = RetrievalEngine::build(DocumentStore::new(), None).await;
        assert!(empty.search("退款", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_larger_than_matches_returns_all() {
        let engine = RetrievalEngine::build(faq_store(), None).await;
        let results = engine.search("退款", 100).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_query_returns_empty() {
        let engine = RetrievalEngine::build(faq_store(), None).await;
        assert!(engine.search("   ", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_ranking() {
        let engine = RetrievalEngine::build(faq_store(), Some(Box::new(VocabEmbedder))).await;
        assert_eq!(engine.mode(), "semantic");

        let results = engine.search("退款流程", 5).await;
        // Semantic mode scores every document; ranking puts the refund FAQ first.
        assert_eq!(results.len(), 2);
        assert!(results[0].document.content().contains("退款"));
        assert!(results[0].similarity_score > results[1].similarity_score);
    }

    #[tokio::test]
    async fn test_results_sorted_descending() {
        let engine = RetrievalEngine::build(faq_store(), Some(Box::new(VocabEmbedder))).await;
        let results = engine.search("退款", 5).await;
        for pair in results.windows(2) {
            assert!(pair[0].similarity_score >= pair[1].similarity_score);
        }
    }

    #[tokio::test]
    async fn test_build_failure_degrades_to_lexical_permanently() {
        let engine = RetrievalEngine::build(faq_store(), Some(Box::new(FailingEmbedder))).await;
        assert_eq!(engine.mode(), "lexical");

        // Searches still work, via lexical scoring, and never error.
        let results = engine.search("退款", 5).await;
        assert_eq!(results.len(), 1);
        assert!(engine.search("没有匹配的词", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_per_query_failure_falls_back_without_downgrade() {
        let engine = RetrievalEngine::build(faq_store(), Some(Box::new(FlakyEmbedder::new()))).await;
        assert_eq!(engine.mode(), "semantic");

        // Query embedding fails; this call falls back to lexical scoring.
        let results = engine.search("退款", 5).await;
        assert_eq!(results.len(), 1);

        // The engine itself stays in semantic mode.
        assert_eq!(engine.mode(), "semantic");
    }

    #[tokio::test]
    async fn test_add_custom_is_searchable() {
        let mut engine = RetrievalEngine::build(faq_store(), None).await;
        let mut fields = serde_json::Map::new();
        fields.insert("question".to_string(), json!("测试"));
        fields.insert("answer".to_string(), json!("测试答案"));
        engine
            .add_custom("问题：测试\n答案：测试答案".to_string(), "custom", fields)
            .await;

        let results = engine.search("测试", 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.kind(), "custom");
    }

    #[tokio::test]
    async fn test_add_faq_typed_document_formats_in_context() {
        let mut engine = RetrievalEngine::build(DocumentStore::new(), None).await;
        let mut fields = serde_json::Map::new();
        fields.insert("question".to_string(), json!("保修期多久？"));
        fields.insert("answer".to_string(), json!("一年。"));
        engine
            .add_custom("保修期为一年。".to_string(), "faq", fields)
            .await;

        let context = engine.get_context("保修", 1000).await;
        assert_eq!(context, "FAQ - 保修期多久？: 一年。");
    }

    #[tokio::test]
    async fn test_add_custom_rebuild_failure_downgrades() {
        let mut engine =
            RetrievalEngine::build(faq_store(), Some(Box::new(FlakyEmbedder::new()))).await;
        assert_eq!(engine.mode(), "semantic");

        // The rebuild embed call fails, so the engine drops to lexical for good.
        engine
            .add_custom("新增知识".to_string(), "custom", serde_json::Map::new())
            .await;
        assert_eq!(engine.mode(), "lexical");
        assert_eq!(engine.store().len(), 3);
    }

    #[tokio::test]
    async fn test_get_context_formats_faq_entries() {
        let engine = RetrievalEngine::build(faq_store(), None).await;
        let context = engine.get_context("退款", 1000).await;
        assert_eq!(context, "FAQ - 如何申请退款？: 在订单页面点击退款按钮。");
    }

    #[tokio::test]
    async fn test_get_context_empty_when_no_results() {
        let engine = RetrievalEngine::build(faq_store(), None).await;
        assert_eq!(engine.get_context("没有匹配的词", 1000).await, "");
    }

    #[tokio::test]
    async fn test_get_context_excludes_whole_entries_over_budget() {
        let mut store = DocumentStore::new();
        store.push_custom("refund aaaa".to_string(), "custom", serde_json::Map::new());
        store.push_custom("refund bbbb".to_string(), "custom", serde_json::Map::new());
        let engine = RetrievalEngine::build(store, None).await;

        // Each entry renders as "商品分类信息: refund aaaa" (19 chars).
        let full = engine.get_context("refund", 1000).await;
        assert_eq!(full.matches("商品分类信息").count(), 2);

        // Budget 20: only the first whole entry fits, the second is dropped
        // entirely rather than truncated.
        let partial = engine.get_context("refund", 20).await;
        assert_eq!(partial, "商品分类信息: refund aaaa");

        // Budget below the first entry: empty string.
        assert_eq!(engine.get_context("refund", 5).await, "");
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
