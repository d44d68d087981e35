//! The in-memory document store and its ingestion paths.
//!
//! The store is an insertion-ordered, append-only collection of
//! [`Document`]s. Insertion order has no ranking significance but is stable
//! across repeated loads of the same sources and breaks score ties during
//! search. No document is ever removed or mutated after creation.
//!
//! # Ingestion policy
//!
//! Loading is best-effort at every level:
//!
//! - A missing or unreadable source file is logged and skipped; an empty
//!   store is valid.
//! - Each record in a source is parsed independently; a record missing a
//!   required field is logged at WARN and skipped, the rest still load.
//! - Remote feeds are fetched per URL; a failing URL never aborts the load.
//!
//! Snapshots are a convenience for persisting custom additions, not a
//! correctness requirement. They carry documents only — embeddings are
//! rebuilt by the engine on construction.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::KnowledgeConfig;
use crate::models::{CategoryDoc, CustomDoc, Document, FaqDoc};

/// A FAQ record as it appears in the `faqs` source array.
#[derive(Debug, Deserialize)]
struct FaqRecord {
    question: String,
    answer: String,
    category: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// A category record: a name plus its subcategories.
#[derive(Debug, Deserialize)]
struct CategoryRecord {
    name: String,
    #[serde(default)]
    subcategories: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SubcategoryRecord {
    name: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    common_questions: Vec<String>,
}

/// On-disk snapshot of the store.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    documents: Vec<Document>,
}

/// Insertion-ordered, append-only collection of knowledge documents.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: Vec<Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from the configured sources.
    ///
    /// Reads the FAQ file, then the categories file, then any remote feeds.
    /// Never fails: unavailable sources are logged and skipped.
    pub async fn load(config: &KnowledgeConfig) -> Self {
        let mut store = Self::new();

        store.load_file(&config.faq_path);
        store.load_file(&config.categories_path);

        if !config.remote_urls.is_empty() {
            store.fetch_remote(&config.remote_urls).await;
        }

        tracing::info!(documents = store.len(), "knowledge base loaded");
        store
    }

    fn load_file(&mut self, path: &Path) {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "knowledge source unavailable, skipping");
                return;
            }
        };
        let data: Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "knowledge source is not valid JSON, skipping");
                return;
            }
        };
        let added = self.ingest_value(&data);
        tracing::info!(path = %path.display(), added, "ingested knowledge source");
    }

    /// Ingest a JSON document by shape: `{"faqs": […]}` or `{"categories": […]}`.
    fn ingest_value(&mut self, data: &Value) -> usize {
        if data.get("faqs").is_some() {
            self.ingest_faq(data)
        } else if data.get("categories").is_some() {
            self.ingest_categories(data)
        } else {
            tracing::warn!("unrecognized knowledge source shape (no faqs/categories key)");
            0
        }
    }

    /// Ingest a FAQ collection: `{"faqs": [{question, answer, category, keywords?}, …]}`.
    ///
    /// Returns the number of documents added. Malformed records are skipped.
    pub fn ingest_faq(&mut self, data: &Value) -> usize {
        let records = data
            .get("faqs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut added = 0;
        for record in records {
            match serde_json::from_value::<FaqRecord>(record.clone()) {
                Ok(faq) => {
                    self.documents.push(Document::Faq(FaqDoc::new(
                        faq.question,
                        faq.answer,
                        faq.category,
                        faq.keywords,
                    )));
                    added += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed FAQ record");
                }
            }
        }
        added
    }

    /// Ingest a category collection, producing one document per subcategory.
    ///
    /// Returns the number of documents added. Malformed records are skipped;
    /// missing `keywords` / `common_questions` default to empty lists.
    pub fn ingest_categories(&mut self, data: &Value) -> usize {
        let records = data
            .get("categories")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut added = 0;
        for record in records {
            let category = match serde_json::from_value::<CategoryRecord>(record.clone()) {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed category record");
                    continue;
                }
            };
            for sub in &category.subcategories {
                match serde_json::from_value::<SubcategoryRecord>(sub.clone()) {
                    Ok(sub) => {
                        self.documents.push(Document::Category(CategoryDoc::new(
                            category.name.clone(),
                            sub.name,
                            sub.keywords,
                            sub.common_questions,
                        )));
                        added += 1;
                    }
                    Err(err) => {
                        tracing::warn!(
                            category = %category.name,
                            error = %err,
                            "skipping malformed subcategory record"
                        );
                    }
                }
            }
        }
        added
    }

    /// Append a caller-supplied document with verbatim content.
    ///
    /// `kind` is the document type the addition should carry: `"faq"` with
    /// `question` and `answer` fields stores a FAQ document (so context
    /// assembly formats it as one); anything else stores a custom document.
    /// The reserved `type` and `content` field keys are dropped, as they
    /// would collide with the serialized tag and content.
    ///
    /// Repeated identical calls add duplicate documents; no deduplication
    /// is performed.
    pub fn push_custom(
        &mut self,
        content: String,
        kind: &str,
        mut fields: serde_json::Map<String, Value>,
    ) {
        fields.remove("type");
        fields.remove("content");

        if kind == "faq" {
            let question = fields.get("question").and_then(Value::as_str);
            let answer = fields.get("answer").and_then(Value::as_str);
            if let (Some(question), Some(answer)) = (question, answer) {
                let category = fields
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.documents.push(Document::Faq(FaqDoc {
                    content,
                    question: question.to_string(),
                    answer: answer.to_string(),
                    category,
                    keywords: Vec::new(),
                }));
                return;
            }
            tracing::warn!("faq-typed addition lacks question/answer fields, storing as custom");
        }

        self.documents
            .push(Document::Custom(CustomDoc { content, fields }));
    }

    /// Fetch and ingest remote JSON feeds; each URL's shape decides the
    /// ingestion path. Returns the number of documents added.
    pub async fn fetch_remote(&mut self, urls: &[String]) -> usize {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build HTTP client, skipping remote feeds");
                return 0;
            }
        };

        let mut added = 0;
        for url in urls {
            let data: Result<Value> = async {
                let resp = client.get(url).send().await?.error_for_status()?;
                Ok(resp.json::<Value>().await?)
            }
            .await;

            match data {
                Ok(data) => {
                    let n = self.ingest_value(&data);
                    tracing::info!(url, added = n, "ingested remote knowledge feed");
                    added += n;
                }
                Err(err) => {
                    tracing::warn!(url, error = %err, "remote knowledge feed unavailable, skipping");
                }
            }
        }
        added
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Write the document list to a JSON snapshot file.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            documents: self.documents.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .context("Failed to serialize knowledge snapshot")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
        Ok(())
    }

    /// Restore a store from a JSON snapshot file.
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        let snapshot: Snapshot =
            serde_json::from_str(&content).context("Failed to parse knowledge snapshot")?;
        Ok(Self {
            documents: snapshot.documents,
        })
    }
}
