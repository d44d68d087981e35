//! Core data models: the knowledge document sum type and scored results.
//!
//! A [`Document`] is a single retrievable knowledge unit. The three variants
//! reflect provenance — FAQ entries, product-category descriptors, and
//! caller-supplied custom entries — and each carries the common flattened
//! `content` string that scoring operates on. Structured fields exist for
//! response formatting only; `content` is the sole basis for both the
//! semantic and the lexical scoring path.
//!
//! `content` is rendered deterministically at construction time and never
//! mutated afterward, so re-ingesting identical sources yields byte-identical
//! strings. The labels are the Chinese blocks the downstream prompt templates
//! expect:
//!
//! ```text
//! 问题：{question}
//! 答案：{answer}
//! 分类：{category}
//! 关键词：{keywords}        (only when keywords is non-empty)
//! ```

use serde::{Deserialize, Serialize};

/// A retrievable knowledge unit.
///
/// Serialized with an internal `"type"` tag (`faq` / `category` / `custom`),
/// so a serialized document is a flat map of its fields plus the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Document {
    Faq(FaqDoc),
    Category(CategoryDoc),
    Custom(CustomDoc),
}

impl Document {
    /// The flattened text representation used for scoring.
    pub fn content(&self) -> &str {
        match self {
            Document::Faq(d) => &d.content,
            Document::Category(d) => &d.content,
            Document::Custom(d) => &d.content,
        }
    }

    /// Provenance tag, matching the serialized `"type"` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Document::Faq(_) => "faq",
            Document::Category(_) => "category",
            Document::Custom(_) => "custom",
        }
    }
}

/// A FAQ entry: one question/answer pair within a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqDoc {
    pub content: String,
    pub question: String,
    pub answer: String,
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl FaqDoc {
    /// Build a FAQ document, rendering `content` from the structured fields.
    ///
    /// The `关键词` line is appended only when `keywords` is non-empty.
    pub fn new(question: String, answer: String, category: String, keywords: Vec<String>) -> Self {
        let mut content = format!("问题：{}\n答案：{}\n分类：{}", question, answer, category);
        if !keywords.is_empty() {
            content.push_str(&format!("\n关键词：{}", keywords.join(", ")));
        }
        Self {
            content,
            question,
            answer,
            category,
            keywords,
        }
    }
}

/// A product-category descriptor: one document per subcategory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDoc {
    pub content: String,
    pub category: String,
    pub subcategory: String,
    pub keywords: Vec<String>,
    pub common_questions: Vec<String>,
}

impl CategoryDoc {
    /// Build a category document, rendering `content` from the parent
    /// category name, subcategory name, keyword list, and common questions.
    pub fn new(
        category: String,
        subcategory: String,
        keywords: Vec<String>,
        common_questions: Vec<String>,
    ) -> Self {
        let content = format!(
            "商品分类：{} - {}\n相关商品：{}\n常见问题：{}",
            category,
            subcategory,
            keywords.join(", "),
            common_questions.join(", ")
        );
        Self {
            content,
            category,
            subcategory,
            keywords,
            common_questions,
        }
    }
}

/// A caller-supplied custom entry.
///
/// `content` is taken verbatim (not rendered); any additional key/value
/// pairs are carried alongside it for response formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomDoc {
    pub content: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// A search result: a copy of the matched document plus its score.
///
/// Scores are only present on search results, never on stored documents.
/// Semantic scores are cosine similarities in `[-1.0, 1.0]`; lexical scores
/// are the matched-token fraction in `[0.0, 1.0]`.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: Document,
    pub similarity_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faq_content_rendering() {
        let doc = FaqDoc::new(
            "如何申请退款？".to_string(),
            "在订单页面点击退款按钮。".to_string(),
            "售后".to_string(),
            vec!["退款".to_string(), "售后".to_string()],
        );
        assert_eq!(
            doc.content,
            "问题：如何申请退款？\n答案：在订单页面点击退款按钮。\n分类：售后\n关键词：退款, 售后"
        );
    }

    #[test]
    fn test_faq_content_without_keywords() {
        let doc = FaqDoc::new(
            "q".to_string(),
            "a".to_string(),
            "c".to_string(),
            Vec::new(),
        );
        assert_eq!(doc.content, "问题：q\n答案：a\n分类：c");
        assert!(!doc.content.contains("关键词"));
    }

    #[test]
    fn test_category_content_rendering() {
        let doc = CategoryDoc::new(
            "服装".to_string(),
            "女装".to_string(),
            vec!["连衣裙".to_string(), "半身裙".to_string()],
            vec!["尺码怎么选".to_string()],
        );
        assert_eq!(
            doc.content,
            "商品分类：服装 - 女装\n相关商品：连衣裙, 半身裙\n常见问题：尺码怎么选"
        );
    }

    #[test]
    fn test_document_serializes_with_type_tag() {
        let doc = Document::Faq(FaqDoc::new(
            "q".to_string(),
            "a".to_string(),
            "c".to_string(),
            Vec::new(),
        ));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["type"], "faq");
        assert_eq!(json["question"], "q");
    }

    #[test]
    fn test_scored_document_flattens_fields() {
        let scored = ScoredDocument {
            document: Document::Custom(CustomDoc {
                content: "hello".to_string(),
                fields: serde_json::Map::new(),
            }),
            similarity_score: 0.5,
        };
        let json = serde_json::to_value(&scored).unwrap();
        assert_eq!(json["type"], "custom");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["similarity_score"], 0.5);
    }

    #[test]
    fn test_custom_doc_roundtrip_preserves_fields() {
        let raw = serde_json::json!({
            "type": "custom",
            "content": "问题：测试\n答案：测试答案",
            "question": "测试",
            "answer": "测试答案",
        });
        let doc: Document = serde_json::from_value(raw).unwrap();
        match &doc {
            Document::Custom(c) => {
                assert_eq!(c.fields["question"], "测试");
                assert_eq!(c.fields["answer"], "测试答案");
            }
            other => panic!("expected custom document, got {}", other.kind()),
        }
    }
}
