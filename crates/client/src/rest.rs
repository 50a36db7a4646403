//! REST client for the conversation routes under `/api/conversations`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use legion_protocol::{
    AgentConfig, ConfigResponse, Conversation, ConversationResponse, CreateConversationRequest,
    HistoryMessage, HistoryResponse, ListConversationsResponse, UpdateConversationRequest,
    UploadResponse,
};
use reqwest::multipart;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ClientError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_PREVIEW: usize = 512;

/// Conversation management and history, as the chat session needs it.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;
    async fn create_conversation(&self, title: &str, work_dir: Option<&str>) -> Result<Conversation>;
    async fn get_conversation(&self, id: &str) -> Result<Conversation>;
    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation>;
    async fn delete_conversation(&self, id: &str) -> Result<()>;
    async fn history(&self, id: &str) -> Result<Vec<HistoryMessage>>;
    async fn agent_config(&self) -> Result<AgentConfig>;
    /// Upload a file into the conversation's work dir.
    async fn upload(&self, id: &str, path: &Path) -> Result<UploadResponse>;
}

/// [`ConversationApi`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: String,
}

impl HttpApi {
    pub fn new(server_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: format!("{}/api/conversations", server_url.trim_end_matches('/')),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn conversation_url(&self, id: &str, suffix: &str) -> String {
        self.url(&format!("/{}{}", urlencoding::encode(id), suffix))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_PREVIEW {
        let cut = (0..=ERROR_BODY_PREVIEW)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Best-effort MIME type from a file extension
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt" | "md") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ConversationApi for HttpApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let response = self.client.get(self.url("")).send().await?;
        let body: ListConversationsResponse = Self::decode(response).await?;
        Ok(body.conversations)
    }

    async fn create_conversation(&self, title: &str, work_dir: Option<&str>) -> Result<Conversation> {
        let request = CreateConversationRequest {
            title: title.to_string(),
            work_dir: work_dir.map(str::to_string),
        };
        let response = self.client.post(self.url("")).json(&request).send().await?;
        let body: ConversationResponse = Self::decode(response).await?;
        Ok(body.conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        let response = self.client.get(self.conversation_url(id, "")).send().await?;
        let body: ConversationResponse = Self::decode(response).await?;
        Ok(body.conversation)
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        let request = UpdateConversationRequest {
            title: Some(title.to_string()),
            ..Default::default()
        };
        let response = self
            .client
            .patch(self.conversation_url(id, ""))
            .json(&request)
            .send()
            .await?;
        let body: ConversationResponse = Self::decode(response).await?;
        Ok(body.conversation)
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.conversation_url(id, ""))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn history(&self, id: &str) -> Result<Vec<HistoryMessage>> {
        let response = self
            .client
            .get(self.conversation_url(id, "/history"))
            .send()
            .await?;
        let body: HistoryResponse = Self::decode(response).await?;
        debug!(
            component = "rest",
            event = "history.fetched",
            conversation_id = %id,
            messages = body.messages.len(),
            "Fetched conversation history"
        );
        Ok(body.messages)
    }

    async fn agent_config(&self) -> Result<AgentConfig> {
        let response = self.client.get(self.url("/config")).send().await?;
        let body: ConfigResponse = Self::decode(response).await?;
        Ok(body.config)
    }

    async fn upload(&self, id: &str, path: &Path) -> Result<UploadResponse> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let part = multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(media_type_for(path))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.conversation_url(id, "/upload"))
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }
}
