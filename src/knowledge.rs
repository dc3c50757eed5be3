use serde::{Deserialize, Serialize};

use crate::models::{QaEntry, UnansweredQuestion};

pub const ALL_CATEGORIES: &str = "All";

/// Search, category filter and page requested by the knowledge-base editor
#[derive(Debug, Default, Clone, Deserialize)]
pub struct KnowledgeQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
}

/// One page of the filtered knowledge base
#[derive(Debug, Serialize)]
pub struct KnowledgePage {
    pub items: Vec<QaEntry>,
    pub page: usize,
    pub total_pages: usize,
    pub total_matches: usize,
    pub total_entries: usize,
    pub categories: Vec<String>,
}

/// Unanswered question with the closest existing entries
#[derive(Debug, Serialize)]
pub struct TriageItem {
    #[serde(flatten)]
    pub question: UnansweredQuestion,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub id: i64,
    pub question: String,
    pub similarity: f64,
}

/// "All" followed by every category label in first-seen order.
pub fn category_options(entries: &[QaEntry]) -> Vec<String> {
    let mut options = vec![ALL_CATEGORIES.to_string()];
    for entry in entries {
        let label = entry.category_label();
        if !options.iter().skip(1).any(|o| o == label) {
            options.push(label.to_string());
        }
    }
    options
}

fn matches(entry: &QaEntry, needle: &str, category: &str) -> bool {
    let in_text = needle.is_empty()
        || entry.question.to_lowercase().contains(needle)
        || entry.answer.to_lowercase().contains(needle);
    let in_category = category == ALL_CATEGORIES || entry.category_label() == category;
    in_text && in_category
}

/// Filter by search text and category, then cut out the requested page.
/// Out-of-range pages are clamped to the nearest valid one.
pub fn browse(entries: &[QaEntry], query: &KnowledgeQuery, page_size: usize) -> KnowledgePage {
    let needle = query
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let category = query
        .category
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(ALL_CATEGORIES);

    let filtered: Vec<&QaEntry> = entries
        .iter()
        .filter(|entry| matches(entry, &needle, category))
        .collect();

    let page_size = page_size.max(1);
    let total_matches = filtered.len();
    let total_pages = total_matches.div_ceil(page_size).max(1);
    let page = query.page.unwrap_or(1).clamp(1, total_pages);

    let items = filtered
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .cloned()
        .collect();

    KnowledgePage {
        items,
        page,
        total_pages,
        total_matches,
        total_entries: entries.len(),
        categories: category_options(entries),
    }
}

/// Existing entries whose question reads like `question`, best first.
pub fn similar_questions(
    entries: &[QaEntry],
    question: &str,
    limit: usize,
    threshold: f64,
) -> Vec<Suggestion> {
    let target = question.trim().to_lowercase();
    if target.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<Suggestion> = entries
        .iter()
        .map(|entry| Suggestion {
            id: entry.id,
            question: entry.question.clone(),
            similarity: strsim::normalized_levenshtein(&target, &entry.question.trim().to_lowercase()),
        })
        .filter(|s| s.similarity >= threshold)
        .collect();

    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(limit);
    scored
}

/// Attach suggestions to each queued question.
pub fn triage(
    queue: Vec<UnansweredQuestion>,
    entries: &[QaEntry],
    limit: usize,
    threshold: f64,
) -> Vec<TriageItem> {
    queue
        .into_iter()
        .map(|question| {
            let suggestions = similar_questions(entries, &question.question, limit, threshold);
            TriageItem { question, suggestions }
        })
        .collect()
}
