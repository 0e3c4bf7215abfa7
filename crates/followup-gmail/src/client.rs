//! Gmail REST client.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use followup_core::{MailClient, MailError, MessagePage, RawMessage};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use url::Url;

use crate::auth::{OAuthClient, Token};
use crate::error::{Error, Result};

/// Gmail API base for the authenticated user.
pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me/";

/// Google `OAuth2` token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Headers requested when fetching message metadata.
const METADATA_HEADERS: [&str; 4] = ["Subject", "From", "To", "Date"];

/// Connection settings for [`GmailClient`].
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// `OAuth2` client ID.
    pub client_id: String,
    /// `OAuth2` client secret.
    pub client_secret: String,
    /// Long-lived refresh token for the mailbox.
    pub refresh_token: String,
    /// Base URL of the user's Gmail API resource.
    pub api_base: String,
    /// Token endpoint URL.
    pub token_url: String,
}

impl GmailConfig {
    /// Creates a configuration pointing at Google's production endpoints.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    /// Overrides the API base URL.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Overrides the token endpoint URL.
    #[must_use]
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }
}

/// Mail collaborator backed by the Gmail REST API.
///
/// Access tokens are obtained with the refresh-token grant and reused
/// until shortly before they expire. The account address used as the
/// `From` of outgoing notices is looked up once and cached.
pub struct GmailClient {
    http: Client,
    oauth: OAuthClient,
    api_base: Url,
    token: Mutex<Token>,
    sender: OnceCell<String>,
}

impl GmailClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a credential is empty, or an
    /// error if a URL does not parse.
    pub fn new(config: GmailConfig) -> Result<Self> {
        for (name, value) in [
            ("client_id", &config.client_id),
            ("client_secret", &config.client_secret),
            ("refresh_token", &config.refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{name} is required")));
            }
        }

        let mut api_base = config.api_base;
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        let api_base = Url::parse(&api_base)?;
        let token_url = Url::parse(&config.token_url)?;

        let http = Client::builder()
            .user_agent(concat!("followup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let oauth = OAuthClient::new(config.client_id, token_url, http.clone())
            .with_client_secret(config.client_secret);

        Ok(Self {
            http,
            oauth,
            api_base,
            token: Mutex::new(Token::from_refresh_token(config.refresh_token)),
            sender: OnceCell::new(),
        })
    }

    /// Lists the most recent messages of the mailbox (IDs only).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_messages(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let mut request = self
            .http
            .get(self.endpoint("messages")?)
            .query(&[("maxResults", max_results.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response: ListResponse = self.execute(request).await?;
        debug!(
            count = response.messages.len(),
            more = response.next_page_token.is_some(),
            "Listed messages"
        );

        Ok(MessagePage {
            messages: response
                .messages
                .into_iter()
                .map(|m| RawMessage::new(m.id, m.thread_id))
                .collect(),
            next_page_token: response.next_page_token,
            estimated_count: response.result_size_estimate,
        })
    }

    /// Fetches the metadata headers of one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn fetch_message(&self, id: &str) -> Result<RawMessage> {
        let mut request = self
            .http
            .get(self.endpoint(&format!("messages/{id}"))?)
            .query(&[("format", "metadata")]);
        for header in METADATA_HEADERS {
            request = request.query(&[("metadataHeaders", header)]);
        }

        let message: GmailMessage = self.execute(request).await?;
        Ok(message.into_raw())
    }

    /// The authenticated account's address, fetched once.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be read.
    pub async fn sender_address(&self) -> Result<&str> {
        let address = self
            .sender
            .get_or_try_init(|| async {
                let profile: Profile = self.execute(self.http.get(self.endpoint("profile")?)).await?;
                profile
                    .email_address
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| Error::InvalidResponse("profile has no email address".to_string()))
            })
            .await?;
        Ok(address)
    }

    /// Sends a plain-text message and returns its Gmail message ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile lookup or the send fails.
    pub async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<String> {
        let from = self.sender_address().await?;
        let raw = URL_SAFE_NO_PAD.encode(compose_rfc5322(from, to, subject, body));

        let request = self
            .http
            .post(self.endpoint("messages/send")?)
            .json(&SendRequest { raw });
        let sent: SentMessage = self.execute(request).await?;

        debug!(message_id = %sent.id, %to, "Sent message");
        Ok(sent.id)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.api_base.join(path)?)
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if !token.is_usable() {
            debug!("Refreshing access token");
            *token = self.oauth.refresh_token(&token).await?;
        }
        Ok(token.access_token.clone())
    }

    /// Sends an authorized request and decodes the JSON answer.
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let access_token = self.access_token().await?;
        let response = request.bearer_auth(access_token).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        if status == StatusCode::UNAUTHORIZED {
            // Force a refresh on the next call
            self.token.lock().await.access_token.clear();
        }

        let text = response.text().await?;
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map_or(text, |body| body.error.message);
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MailClient for GmailClient {
    async fn list_recent_messages(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> std::result::Result<MessagePage, MailError> {
        Ok(self.list_messages(max_results, page_token).await?)
    }

    async fn get_message(&self, id: &str) -> std::result::Result<RawMessage, MailError> {
        Ok(self.fetch_message(id).await?)
    }

    async fn send_plain_text_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<String, MailError> {
        Ok(self.send_message(to, subject, body).await?)
    }
}

/// Builds the RFC 5322 formatted message.
fn compose_rfc5322(from: &str, to: &str, subject: &str, body: &str) -> String {
    use std::fmt::Write;

    let mut message = String::new();

    // Headers
    let _ = writeln!(message, "From: {}\r", header_value(from));
    let _ = writeln!(message, "To: {}\r", header_value(to));
    let _ = writeln!(message, "Subject: {}\r", encode_subject(&header_value(subject)));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n");

    // Empty line between headers and body
    message.push_str("\r\n");

    // Body
    message.push_str(&body.replace("\r\n", "\n").replace('\n', "\r\n"));

    message
}

/// Header values never carry line breaks.
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 encoded-word for non-ASCII subjects.
fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        subject.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(subject))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
    result_size_estimate: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    /// Milliseconds since the epoch, as a decimal string.
    internal_date: Option<String>,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl GmailMessage {
    fn into_raw(self) -> RawMessage {
        let internal_date = self
            .internal_date
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let mut message = RawMessage::new(self.id, self.thread_id);
        for header in self.payload.headers {
            message = message.with_header(header.name, header.value);
        }
        message.internal_date = internal_date;
        message
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
