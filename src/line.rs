use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::config::LineConfig;

type HmacSha256 = Hmac<Sha256>;

/// Checks the `x-line-signature` header value against the raw request body.
/// The signature is the base64-encoded HMAC-SHA256 of the body keyed with
/// the channel secret.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(decoded) = BASE64.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&decoded).is_ok()
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub events: Vec<LineEvent>,
}

/// The webhook event kinds the bot reacts to. Anything else LINE sends
/// (follow, unfollow, leave, ...) falls into `Other` and is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LineEvent {
    #[serde(rename_all = "camelCase")]
    Message {
        reply_token: String,
        message: MessageContent,
    },
    #[serde(rename_all = "camelCase")]
    Postback {
        reply_token: String,
        postback: PostbackContent,
    },
    #[serde(rename_all = "camelCase")]
    MemberJoined {
        reply_token: String,
        joined: JoinedMembers,
        #[serde(default)]
        source: EventSource,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostbackContent {
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinedMembers {
    #[serde(default)]
    pub members: Vec<MemberSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSource {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<TextMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberProfile {
    display_name: String,
}

/// The LINE Messaging API as the bot consumes it: send one text reply for
/// a reply token, and look up a group member's display name.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()>;
    async fn member_display_name(&self, group_id: &str, user_id: &str) -> Result<String>;
}

pub struct LineClient {
    client: reqwest::Client,
    config: LineConfig,
}

impl LineClient {
    pub fn new(client: reqwest::Client, config: LineConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl MessagingApi for LineClient {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        let url = format!("{}/message/reply", self.config.api_base);
        let request = ReplyRequest {
            reply_token,
            messages: vec![TextMessage { kind: "text", text }],
        };

        debug!("Replying via LINE ({} chars)", text.len());

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.channel_access_token),
            )
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send reply to LINE")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE reply API error ({}): {}", status, error_body);
        }

        Ok(())
    }

    async fn member_display_name(&self, group_id: &str, user_id: &str) -> Result<String> {
        let url = format!("{}/group/{}/member/{}", self.config.api_base, group_id, user_id);

        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.channel_access_token),
            )
            .send()
            .await
            .context("Failed to fetch member profile from LINE")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE profile API error ({}): {}", status, error_body);
        }

        let profile: MemberProfile = response
            .json()
            .await
            .context("Failed to parse LINE member profile")?;

        Ok(profile.display_name)
    }
}
