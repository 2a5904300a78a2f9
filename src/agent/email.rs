//! Gmail tools for the agent

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agent::ToolSet;
use crate::{Error, Result};

const GMAIL_BASE_URL: &str = "https://gmail.googleapis.com";
const DEFAULT_MAX_RESULTS: u32 = 20;

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct Message {
    payload: Payload,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct Draft {
    id: String,
}

#[derive(Deserialize)]
struct FetchArgs {
    #[serde(default)]
    max_results: Option<u32>,
}

#[derive(Deserialize)]
struct DraftArgs {
    subject: String,
    body: String,
    to: String,
}

#[derive(Deserialize)]
struct SendArgs {
    draft_id: String,
}

/// Inbox listing, drafting and sending through the Gmail REST API
pub struct GmailTools {
    client: reqwest::Client,
    token: SecretString,
    base_url: String,
}

impl GmailTools {
    /// Create tools authenticated with an OAuth access token
    ///
    /// # Errors
    ///
    /// Returns error if the token is empty
    pub fn new(token: SecretString) -> Result<Self> {
        if token.expose_secret().is_empty() {
            return Err(Error::Config("Gmail access token required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            token,
            base_url: GMAIL_BASE_URL.to_string(),
        })
    }

    /// Point at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/me/{path}", self.base_url)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Email(format!("Gmail API error {status}: {body}")));
        }
        Ok(response.json().await?)
    }

    /// Sender and subject of recent inbox messages
    ///
    /// # Errors
    ///
    /// Returns error if any API call fails
    pub async fn fetch_recent_emails(&self, max_results: u32) -> Result<String> {
        let list: MessageList = self
            .get(
                "messages",
                &[
                    ("maxResults", max_results.to_string()),
                    ("labelIds", "INBOX".to_string()),
                ],
            )
            .await?;

        let mut summaries = Vec::with_capacity(list.messages.len());
        for msg in list.messages {
            let message: Message = self
                .get(
                    &format!("messages/{}", msg.id),
                    &[
                        ("format", "metadata".to_string()),
                        ("metadataHeaders", "Subject".to_string()),
                        ("metadataHeaders", "From".to_string()),
                    ],
                )
                .await?;

            let header = |name: &str| {
                message
                    .payload
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case(name))
                    .map_or("", |h| h.value.as_str())
                    .to_string()
            };
            summaries.push(format!(
                "From: {}\nSubject: {}\n---",
                header("From"),
                header("Subject")
            ));
        }

        tracing::debug!(count = summaries.len(), "fetched recent emails");
        Ok(summaries.join("\n\n"))
    }

    /// Create a plain-text draft
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails
    pub async fn create_draft_email(&self, subject: &str, body: &str, to: &str) -> Result<String> {
        let raw = URL_SAFE.encode(mime_message(subject, body, to));
        let draft: Draft = self
            .post("drafts", &json!({ "message": { "raw": raw } }))
            .await?;

        tracing::info!(draft_id = %draft.id, "draft created");
        Ok(format!("Draft created with ID: {}", draft.id))
    }

    /// Send an existing draft
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails
    pub async fn send_draft(&self, draft_id: &str) -> Result<String> {
        let _: Value = self.post("drafts/send", &json!({ "id": draft_id })).await?;
        tracing::info!(%draft_id, "draft sent");
        Ok(format!("Draft {draft_id} sent successfully"))
    }
}

/// Minimal RFC 2822 text message
fn mime_message(subject: &str, body: &str, to: &str) -> String {
    format!(
        "Content-Type: text/plain; charset=\"utf-8\"\r\nMIME-Version: 1.0\r\nto: {to}\r\nsubject: {subject}\r\n\r\n{body}"
    )
}

fn parse_args<'a, T: Deserialize<'a>>(name: &str, arguments: &'a str) -> Result<T> {
    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(arguments)
        .map_err(|e| Error::Email(format!("invalid arguments for {name}: {e}")))
}

#[async_trait]
impl ToolSet for GmailTools {
    fn definitions(&self) -> Vec<Value> {
        vec![
            json!({
                "type": "function",
                "function": {
                    "name": "fetch_recent_emails",
                    "description": "Fetch sender and subject of recent emails in the inbox",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "max_results": {
                                "type": "integer",
                                "description": "How many messages to fetch (default 20)"
                            }
                        }
                    }
                }
            }),
            json!({
                "type": "function",
                "function": {
                    "name": "create_draft_email",
                    "description": "Create a draft email",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "subject": { "type": "string" },
                            "body": { "type": "string" },
                            "to": { "type": "string", "description": "Recipient address" }
                        },
                        "required": ["subject", "body", "to"]
                    }
                }
            }),
            json!({
                "type": "function",
                "function": {
                    "name": "send_draft",
                    "description": "Send an existing draft email",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "draft_id": { "type": "string" }
                        },
                        "required": ["draft_id"]
                    }
                }
            }),
        ]
    }

    async fn execute(&self, name: &str, arguments: &str) -> Result<String> {
        match name {
            "fetch_recent_emails" => {
                let args: FetchArgs = parse_args(name, arguments)?;
                self.fetch_recent_emails(args.max_results.unwrap_or(DEFAULT_MAX_RESULTS))
                    .await
            }
            "create_draft_email" => {
                let args: DraftArgs = parse_args(name, arguments)?;
                self.create_draft_email(&args.subject, &args.body, &args.to)
                    .await
            }
            "send_draft" => {
                let args: SendArgs = parse_args(name, arguments)?;
                self.send_draft(&args.draft_id).await
            }
            other => Err(Error::Email(format!("unknown tool: {other}"))),
        }
    }
}
