use std::sync::Arc;

use tracing::warn;

use crate::llm::CompletionApi;
use crate::news::NewsItem;

/// Substituted for the analysis when the completion call for an item fails.
pub const ANALYSIS_FAILED: &str = "Error analyzing this news.";

/// A news item plus the model's take on it. `title` and `content` are
/// carried over from the source item unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedNewsItem {
    pub title: String,
    pub content: String,
    pub analysis: String,
}

pub struct NewsAnalyzer {
    llm: Arc<dyn CompletionApi>,
    max_tokens: u32,
}

impl NewsAnalyzer {
    pub fn new(llm: Arc<dyn CompletionApi>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    fn analysis_prompt(content: &str) -> String {
        format!(
            "整理完並分析以下股市新聞，重點列出你的看法，並找出文中提到的公司\
             及其在台灣的小型供應商名稱。最後的順序是：你的看法，提及的公司，\
             其在台灣的小型供應商名稱：\n\n{content}\n\n結果："
        )
    }

    /// Runs every item through the model, one call per item, in order. A
    /// failed call marks that item with [`ANALYSIS_FAILED`] and the rest of
    /// the batch is still processed.
    pub async fn analyze(&self, items: Vec<NewsItem>) -> Vec<AnalyzedNewsItem> {
        let mut analyzed = Vec::with_capacity(items.len());

        for item in items {
            let analysis = match self
                .llm
                .chat(&Self::analysis_prompt(&item.content), self.max_tokens)
                .await
            {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    warn!("Error analyzing the news: {:#}", e);
                    ANALYSIS_FAILED.to_string()
                }
            };

            analyzed.push(AnalyzedNewsItem {
                title: item.title,
                content: item.content,
                analysis,
            });
        }

        analyzed
    }
}
