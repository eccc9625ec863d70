//! Source aggregation: notebook sources → one bounded context string.

use async_trait::async_trait;
use notecast_shared::{NotecastError, Result, Source};
use notecast_storage::Storage;
use tracing::{debug, instrument};

/// Separator placed between source blocks.
const SOURCE_SEPARATOR: &str = "\n\n---\n\n";

/// Read access to a notebook's sources.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Ready sources of `notebook_id` in creation order, optionally
    /// restricted to `source_ids`.
    async fn select_sources(
        &self,
        notebook_id: &str,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Source>>;
}

#[async_trait]
impl SourceCatalog for Storage {
    async fn select_sources(
        &self,
        notebook_id: &str,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Source>> {
        self.select_ready_sources(notebook_id, source_ids).await
    }
}

/// The text handed to the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedContext {
    pub text: String,
    /// Sources that contributed a block, in order.
    pub contributing_ids: Vec<String>,
    /// Whether the budget cut the context short.
    pub truncated: bool,
}

/// Concatenate each source's label and usable text, then cap the result at
/// `char_budget` characters.
///
/// A source's usable text is its body, else its summary, followed by its
/// topic list. Sources with none of those contribute nothing. Fails with
/// [`NotecastError::NoUsableContent`] when nothing is left.
#[instrument(skip_all, fields(sources = sources.len(), budget = char_budget))]
pub fn aggregate(sources: &[Source], char_budget: usize) -> Result<AggregatedContext> {
    let mut blocks = Vec::new();
    let mut contributing_ids = Vec::new();

    for source in sources {
        if let Some(block) = source_block(source) {
            blocks.push(block);
            contributing_ids.push(source.id.clone());
        }
    }

    let joined = blocks.join(SOURCE_SEPARATOR);
    let text = truncate_chars(&joined, char_budget);
    let truncated = text.len() < joined.len();

    if text.trim().is_empty() {
        return Err(NotecastError::NoUsableContent);
    }

    debug!(
        contributing = contributing_ids.len(),
        chars = text.chars().count(),
        truncated,
        "context aggregated"
    );

    Ok(AggregatedContext {
        text: text.to_string(),
        contributing_ids,
        truncated,
    })
}

/// Render one source as `### label` followed by its text, or `None` if it has nothing.
fn source_block(source: &Source) -> Option<String> {
    let body = [source.content.as_deref(), source.summary.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty());

    let topics: Vec<&str> = source
        .topics
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    if body.is_none() && topics.is_empty() {
        return None;
    }

    let mut block = format!("### {}", source.name.trim());
    if let Some(body) = body {
        block.push('\n');
        block.push_str(body);
    }
    if !topics.is_empty() {
        block.push_str("\nTopics: ");
        block.push_str(&topics.join(", "));
    }
    Some(block)
}

/// Longest prefix of `s` holding at most `max_chars` characters.
///
/// Always cuts on a character boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
