use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::analyzer::{AnalyzedNewsItem, NewsAnalyzer};
use crate::config::{Config, OpenAiConfig};
use crate::line::{EventSource, JoinedMembers, LineClient, LineEvent, MessagingApi};
use crate::llm::{CompletionApi, OpenAiClient};
use crate::news::NewsFetcher;

/// Exact inbound text that selects the news branch.
pub const NEWS_TRIGGER: &str = "最新新聞";

/// Returned by the freeform responder when the completion call fails.
pub const OPENAI_ERROR_REPLY: &str = "Error with OpenAI API.";

/// Sent when a fault escapes either dispatch branch. Quota exhaustion is
/// the usual culprit, so the message points the user at the logs.
pub const QUOTA_APOLOGY: &str =
    "你所使用的OPENAI API key額度可能已經超過，請於後台Log內確認錯誤訊息";

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub llm: Arc<dyn CompletionApi>,
    pub line: Arc<dyn MessagingApi>,
    pub fetcher: NewsFetcher,
    pub analyzer: NewsAnalyzer,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let http = reqwest::Client::new();
        let llm: Arc<dyn CompletionApi> =
            Arc::new(OpenAiClient::new(http.clone(), config.openai.clone()));
        let line: Arc<dyn MessagingApi> =
            Arc::new(LineClient::new(http.clone(), config.line.clone()));
        let fetcher = NewsFetcher::new(http, config.news.source_url.clone());
        let analyzer = NewsAnalyzer::new(llm.clone(), config.openai.analysis_max_tokens);

        Self {
            config,
            llm,
            line,
            fetcher,
            analyzer,
        }
    }
}

/// Routes one verified webhook event to its handler.
pub async fn handle_event(state: &AppState, event: LineEvent) {
    match event {
        LineEvent::Message { reply_token, message } => {
            if message.kind != "text" {
                return;
            }
            let Some(text) = message.text else {
                return;
            };
            info!("Message received: {}", text);
            handle_text_message(state, &reply_token, &text).await;
        }
        LineEvent::Postback { postback, .. } => {
            info!("Postback received: {}", postback.data);
        }
        LineEvent::MemberJoined { reply_token, joined, source } => {
            if let Err(e) = handle_member_joined(state, &reply_token, &joined, &source).await {
                error!("Failed to welcome new member: {:#}", e);
            }
        }
        LineEvent::Other => {}
    }
}

/// Handles one text message, guaranteeing a reply. Faults escaping either
/// branch are logged and answered with the fixed apology instead of
/// propagating to the webhook transport.
async fn handle_text_message(state: &AppState, reply_token: &str, text: &str) {
    if let Err(e) = dispatch_text(state, reply_token, text).await {
        error!("Message handler failed: {:#}", e);
        if let Err(e) = state.line.reply(reply_token, QUOTA_APOLOGY).await {
            error!("Failed to send fallback reply: {:#}", e);
        }
    }
}

async fn dispatch_text(state: &AppState, reply_token: &str, text: &str) -> Result<()> {
    let reply = if text == NEWS_TRIGGER {
        let news = state.fetcher.fetch_news().await;
        let analyzed = state.analyzer.analyze(news).await;
        format_news_reply(&analyzed)
    } else {
        freeform_response(state.llm.as_ref(), &state.config.openai, text).await
    };

    state.line.reply(reply_token, &reply).await
}

/// Relays arbitrary user text to the completions endpoint. The generated
/// text has every CJK full stop removed; a failed call yields the fixed
/// error string rather than propagating.
pub async fn freeform_response(llm: &dyn CompletionApi, config: &OpenAiConfig, text: &str) -> String {
    match llm
        .complete(text, config.reply_temperature, config.reply_max_tokens)
        .await
    {
        Ok(answer) => answer.replace('。', ""),
        Err(e) => {
            error!("Error with OpenAI API: {:#}", e);
            OPENAI_ERROR_REPLY.to_string()
        }
    }
}

/// Joins analyzed items into the news reply: one 標題/分析 section per
/// item, blank-line separated.
pub fn format_news_reply(items: &[AnalyzedNewsItem]) -> String {
    items
        .iter()
        .map(|news| format!("標題: {}\n分析: {}", news.title, news.analysis))
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn handle_member_joined(
    state: &AppState,
    reply_token: &str,
    joined: &JoinedMembers,
    source: &EventSource,
) -> Result<()> {
    let group_id = source
        .group_id
        .as_deref()
        .context("Member joined outside a group")?;
    let user_id = joined
        .members
        .first()
        .and_then(|member| member.user_id.as_deref())
        .context("Joined member carries no user id")?;

    let name = state.line.member_display_name(group_id, user_id).await?;
    state
        .line
        .reply(reply_token, &format!("{name}歡迎加入"))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::{MessageContent, MemberSource};
    use crate::news::NewsItem;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records completion calls; `complete` answers with a fixed string or
    /// fails, `chat` always succeeds.
    struct FakeLlm {
        complete_result: Option<String>,
        complete_calls: Mutex<Vec<String>>,
        chat_calls: Mutex<Vec<String>>,
    }

    impl FakeLlm {
        fn answering(answer: &str) -> Self {
            Self {
                complete_result: Some(answer.to_string()),
                complete_calls: Mutex::new(Vec::new()),
                chat_calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                complete_result: None,
                complete_calls: Mutex::new(Vec::new()),
                chat_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionApi for FakeLlm {
        async fn chat(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
            self.chat_calls.lock().unwrap().push(prompt.to_string());
            Ok("分析".to_string())
        }

        async fn complete(&self, prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String> {
            self.complete_calls.lock().unwrap().push(prompt.to_string());
            match &self.complete_result {
                Some(answer) => Ok(answer.clone()),
                None => bail!("quota exceeded"),
            }
        }
    }

    /// Records replies; the first `fail_first` sends error out.
    struct FakeMessenger {
        replies: Mutex<Vec<(String, String)>>,
        fail_first: Mutex<u32>,
    }

    impl FakeMessenger {
        fn new() -> Self {
            Self {
                replies: Mutex::new(Vec::new()),
                fail_first: Mutex::new(0),
            }
        }

        fn failing_first(count: u32) -> Self {
            Self {
                replies: Mutex::new(Vec::new()),
                fail_first: Mutex::new(count),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.replies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagingApi for FakeMessenger {
        async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                bail!("reply send failed");
            }
            self.replies
                .lock()
                .unwrap()
                .push((reply_token.to_string(), text.to_string()));
            Ok(())
        }

        async fn member_display_name(&self, _group_id: &str, _user_id: &str) -> Result<String> {
            Ok("小明".to_string())
        }
    }

    fn test_state(llm: Arc<FakeLlm>, line: Arc<FakeMessenger>) -> AppState {
        let config = Config::default();
        // Unreachable source so the news branch degrades to "no news" in tests
        let fetcher = NewsFetcher::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/tw-market".to_string(),
        );
        let analyzer = NewsAnalyzer::new(llm.clone(), config.openai.analysis_max_tokens);
        AppState {
            config,
            llm,
            line,
            fetcher,
            analyzer,
        }
    }

    fn text_event(reply_token: &str, text: &str) -> LineEvent {
        LineEvent::Message {
            reply_token: reply_token.to_string(),
            message: MessageContent {
                kind: "text".to_string(),
                text: Some(text.to_string()),
            },
        }
    }

    #[tokio::test]
    async fn freeform_response_strips_cjk_full_stops() {
        let llm = FakeLlm::answering("看多。建議觀察。");
        let config = OpenAiConfig::default();
        let answer = freeform_response(&llm, &config, "台積電怎麼看").await;
        assert_eq!(answer, "看多建議觀察");
    }

    #[tokio::test]
    async fn freeform_response_failure_yields_fixed_error_string() {
        let llm = FakeLlm::failing();
        let config = OpenAiConfig::default();
        let answer = freeform_response(&llm, &config, "hello").await;
        assert_eq!(answer, OPENAI_ERROR_REPLY);
    }

    #[test]
    fn news_reply_joins_sections_with_blank_lines() {
        let items = vec![
            AnalyzedNewsItem {
                title: "標題一".to_string(),
                content: "內容一".to_string(),
                analysis: "分析一".to_string(),
            },
            AnalyzedNewsItem {
                title: "標題二".to_string(),
                content: "內容二".to_string(),
                analysis: "分析二".to_string(),
            },
        ];
        assert_eq!(
            format_news_reply(&items),
            "標題: 標題一\n分析: 分析一\n\n標題: 標題二\n分析: 分析二"
        );
    }

    #[tokio::test]
    async fn ordinary_text_routes_to_the_responder() {
        let llm = Arc::new(FakeLlm::answering("回答。"));
        let line = Arc::new(FakeMessenger::new());
        let state = test_state(llm.clone(), line.clone());

        handle_event(&state, text_event("rt-1", "請給我最新新聞")).await;

        // Substring of the trigger is not the trigger
        assert_eq!(llm.complete_calls.lock().unwrap().len(), 1);
        assert!(llm.chat_calls.lock().unwrap().is_empty());
        assert_eq!(line.sent(), vec![("rt-1".to_string(), "回答".to_string())]);
    }

    #[tokio::test]
    async fn empty_text_routes_to_the_responder() {
        let llm = Arc::new(FakeLlm::answering("嗯"));
        let line = Arc::new(FakeMessenger::new());
        let state = test_state(llm.clone(), line.clone());

        handle_event(&state, text_event("rt-2", "")).await;

        assert_eq!(llm.complete_calls.lock().unwrap().len(), 1);
        assert_eq!(line.sent().len(), 1);
    }

    #[tokio::test]
    async fn trigger_text_routes_to_the_news_branch() {
        let llm = Arc::new(FakeLlm::answering("unused"));
        let line = Arc::new(FakeMessenger::new());
        let state = test_state(llm.clone(), line.clone());

        handle_event(&state, text_event("rt-3", NEWS_TRIGGER)).await;

        // The responder is never consulted on the news branch; with the
        // source unreachable the reply is the empty joined block.
        assert!(llm.complete_calls.lock().unwrap().is_empty());
        assert_eq!(line.sent(), vec![("rt-3".to_string(), String::new())]);
    }

    #[tokio::test]
    async fn news_branch_formats_analyzed_items() {
        let items = vec![
            NewsItem {
                title: "台積電".to_string(),
                content: "內容".to_string(),
            },
        ];
        let llm = Arc::new(FakeLlm::answering("unused"));
        let analyzer = NewsAnalyzer::new(llm.clone(), 2000);
        let analyzed = analyzer.analyze(items).await;

        assert_eq!(format_news_reply(&analyzed), "標題: 台積電\n分析: 分析");
    }

    #[tokio::test]
    async fn escaped_fault_produces_exactly_one_apology_reply() {
        let llm = Arc::new(FakeLlm::answering("回答"));
        let line = Arc::new(FakeMessenger::failing_first(1));
        let state = test_state(llm.clone(), line.clone());

        handle_event(&state, text_event("rt-4", "hello")).await;

        let sent = line.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "rt-4");
        assert_eq!(sent[0].1, QUOTA_APOLOGY);
    }

    #[tokio::test]
    async fn total_send_failure_is_swallowed() {
        let llm = Arc::new(FakeLlm::answering("回答"));
        let line = Arc::new(FakeMessenger::failing_first(2));
        let state = test_state(llm.clone(), line.clone());

        // Both the reply and the apology fail; nothing escapes the handler.
        handle_event(&state, text_event("rt-5", "hello")).await;
        assert!(line.sent().is_empty());
    }

    #[tokio::test]
    async fn non_text_messages_are_ignored() {
        let llm = Arc::new(FakeLlm::answering("unused"));
        let line = Arc::new(FakeMessenger::new());
        let state = test_state(llm.clone(), line.clone());

        let event = LineEvent::Message {
            reply_token: "rt-6".to_string(),
            message: MessageContent {
                kind: "sticker".to_string(),
                text: None,
            },
        };
        handle_event(&state, event).await;

        assert!(llm.complete_calls.lock().unwrap().is_empty());
        assert!(line.sent().is_empty());
    }

    #[tokio::test]
    async fn member_joined_gets_a_named_welcome() {
        let llm = Arc::new(FakeLlm::answering("unused"));
        let line = Arc::new(FakeMessenger::new());
        let state = test_state(llm.clone(), line.clone());

        let event = LineEvent::MemberJoined {
            reply_token: "rt-7".to_string(),
            joined: JoinedMembers {
                members: vec![MemberSource {
                    user_id: Some("U1".to_string()),
                }],
            },
            source: EventSource {
                group_id: Some("C1".to_string()),
                user_id: None,
            },
        };
        handle_event(&state, event).await;

        assert_eq!(
            line.sent(),
            vec![("rt-7".to_string(), "小明歡迎加入".to_string())]
        );
    }

    #[tokio::test]
    async fn postback_only_logs() {
        let llm = Arc::new(FakeLlm::answering("unused"));
        let line = Arc::new(FakeMessenger::new());
        let state = test_state(llm.clone(), line.clone());

        let event = LineEvent::Postback {
            reply_token: "rt-8".to_string(),
            postback: crate::line::PostbackContent {
                data: "action=buy".to_string(),
            },
        };
        handle_event(&state, event).await;

        assert!(line.sent().is_empty());
    }
}
