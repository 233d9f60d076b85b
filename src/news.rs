use scraper::{Html, Selector};
use tracing::warn;

const NO_TITLE: &str = "No title";
const NO_CONTENT: &str = "No content";

/// One article stub scraped from the news index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsItem {
    pub title: String,
    pub content: String,
}

pub struct NewsFetcher {
    client: reqwest::Client,
    source_url: String,
}

impl NewsFetcher {
    pub fn new(client: reqwest::Client, source_url: String) -> Self {
        Self { client, source_url }
    }

    /// Fetches the news index page and extracts the article stubs. Any
    /// transport failure is logged and reported as "no news" — an empty
    /// list, never an error.
    pub async fn fetch_news(&self) -> Vec<NewsItem> {
        let response = match self.client.get(&self.source_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Error fetching the news page: {:#}", e);
                return Vec::new();
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("News page returned {}", status);
            return Vec::new();
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Error reading the news page body: {:#}", e);
                return Vec::new();
            }
        };

        parse_news_page(&body)
    }
}

/// Extracts article stubs from the index page markup: every
/// `li.js-stream-content` element yields one item, with the first `h3` as
/// title and the first `p` as content. Missing substructure gets a literal
/// placeholder; parsing itself never fails.
///
/// Kept separate from the fetch so the site-specific selectors can change
/// without touching anything downstream.
pub fn parse_news_page(html: &str) -> Vec<NewsItem> {
    let Ok(article_sel) = Selector::parse("li.js-stream-content") else {
        return Vec::new();
    };
    let Ok(title_sel) = Selector::parse("h3") else {
        return Vec::new();
    };
    let Ok(content_sel) = Selector::parse("p") else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut items = Vec::new();

    for article in document.select(&article_sel) {
        let title = article
            .select(&title_sel)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_else(|| NO_TITLE.to_string());
        let content = article
            .select(&content_sel)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_else(|| NO_CONTENT.to_string());
        items.push(NewsItem { title, content });
    }

    items
}
