//! Hosted Postgres-backed message store: PostgREST for reads/writes and the
//! Phoenix-channel realtime socket for insert notifications.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{
    domain::ChannelName,
    protocol::{ChatMessage, NewChatMessage},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{InsertSubscription, MessageStore, SubscriptionEvent, DEFAULT_MESSAGES_TABLE};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIPTION_BUFFER: usize = 64;
const JOIN_REF: &str = "1";

#[derive(Debug, Clone)]
pub struct HostedStoreConfig {
    pub base_url: Url,
    pub api_key: String,
    pub table: String,
    /// Upper bound for one REST call or realtime socket handshake.
    pub request_timeout: Duration,
}

impl HostedStoreConfig {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("invalid store url '{base_url}'"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            table: DEFAULT_MESSAGES_TABLE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn rest_url(&self) -> Result<Url> {
        Ok(self.base_url.join(&format!("rest/v1/{}", self.table))?)
    }

    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.base_url.join("realtime/v1/websocket")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => bail!("unsupported store url scheme '{other}'"),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("failed to switch store url to {scheme}"))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    fn topic(channel: &ChannelName) -> String {
        format!("realtime:room:{channel}")
    }
}

pub struct HostedMessageStore {
    http: Client,
    config: HostedStoreConfig,
}

impl HostedMessageStore {
    pub fn new(config: HostedStoreConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(config.request_timeout))
            .timeout(config.request_timeout)
            .build()
            .context("failed to build store http client")?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HostedStoreConfig {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    fn join_frame(&self, channel: &ChannelName) -> PhoenixFrame {
        PhoenixFrame {
            topic: HostedStoreConfig::topic(channel),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": "public",
                        "table": self.config.table,
                        "filter": format!("channel=eq.{channel}"),
                    }],
                },
            }),
            reference: Some(JOIN_REF.to_string()),
        }
    }
}

#[async_trait]
impl MessageStore for HostedMessageStore {
    async fn is_available(&self) -> bool {
        let url = match self.config.rest_url() {
            Ok(url) => url,
            Err(err) => {
                warn!("hosted store: invalid rest url: {err}");
                return false;
            }
        };
        let response = self
            .authorized(self.http.get(url))
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "hosted store: messages table check failed");
                false
            }
            Err(err) => {
                warn!("hosted store: unreachable: {err}");
                false
            }
        }
    }

    async fn insert(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let stored: Vec<ChatMessage> = self
            .authorized(self.http.post(self.config.rest_url()?))
            .header("Prefer", "return=representation")
            .json(&[&message])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid insert response from message store")?;
        stored
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("message store returned no inserted record"))
    }

    async fn history(&self, channel: &ChannelName, limit: u32) -> Result<Vec<ChatMessage>> {
        let channel_filter = format!("eq.{channel}");
        let limit = limit.to_string();
        let messages = self
            .authorized(self.http.get(self.config.rest_url()?))
            .query(&[
                ("select", "*"),
                ("channel", channel_filter.as_str()),
                ("order", "created_at.asc"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid history response for channel {channel}"))?;
        Ok(messages)
    }

    async fn subscribe_inserts(&self, channel: &ChannelName) -> Result<InsertSubscription> {
        let url = self.config.realtime_url()?;
        let connect = connect_async(url.as_str());
        let (socket, _) = tokio::time::timeout(self.config.request_timeout, connect)
            .await
            .map_err(|_| anyhow!("timed out connecting realtime socket"))?
            .context("failed to connect realtime socket")?;
        let (mut writer, mut reader) = socket.split();

        let join = serde_json::to_string(&self.join_frame(channel))?;
        writer.send(Message::Text(join)).await?;

        let joined = tokio::time::timeout(JOIN_TIMEOUT, async {
            while let Some(message) = reader.next().await {
                let Message::Text(text) = message? else {
                    continue;
                };
                let frame: PhoenixFrame = serde_json::from_str(&text)?;
                if frame.event == "phx_reply" && frame.reference.as_deref() == Some(JOIN_REF) {
                    return match classify_frame(&frame) {
                        FrameAction::Closed(reason) => Err(anyhow!(reason)),
                        _ => Ok(()),
                    };
                }
            }
            Err(anyhow!("realtime socket closed before join reply"))
        })
        .await
        .map_err(|_| anyhow!("timed out joining realtime channel"))?;
        joined?;
        info!(channel = %channel, "hosted store: realtime subscription joined");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let filter = channel.clone();
        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut next_ref: u64 = 2;

            let reason = loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        let frame = PhoenixFrame {
                            topic: "phoenix".to_string(),
                            event: "heartbeat".to_string(),
                            payload: json!({}),
                            reference: Some(next_ref.to_string()),
                        };
                        next_ref += 1;
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(err) => break format!("heartbeat encode failed: {err}"),
                        };
                        if let Err(err) = writer.send(Message::Text(text)).await {
                            break format!("heartbeat send failed: {err}");
                        }
                    }
                    incoming = reader.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let frame = match serde_json::from_str::<PhoenixFrame>(&text) {
                                Ok(frame) => frame,
                                Err(err) => {
                                    debug!("hosted store: ignoring malformed frame: {err}");
                                    continue;
                                }
                            };
                            match classify_frame(&frame) {
                                FrameAction::Insert(message) if message.channel == filter => {
                                    if tx.send(SubscriptionEvent::Inserted(*message)).await.is_err() {
                                        return;
                                    }
                                }
                                FrameAction::Closed(reason) => break reason,
                                _ => {}
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break "realtime socket closed".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break format!("realtime socket failed: {err}"),
                    },
                }
            };

            warn!(channel = %filter, %reason, "hosted store: realtime subscription ended");
            let _ = tx.send(SubscriptionEvent::Closed { reason }).await;
        });

        Ok(InsertSubscription::new(channel.clone(), rx, task))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum FrameAction {
    Insert(Box<ChatMessage>),
    Closed(String),
    Ignore,
}

pub(crate) fn classify_frame(frame: &PhoenixFrame) -> FrameAction {
    match frame.event.as_str() {
        "postgres_changes" => {
            let data = &frame.payload["data"];
            if data["type"] != "INSERT" {
                return FrameAction::Ignore;
            }
            match serde_json::from_value::<ChatMessage>(data["record"].clone()) {
                Ok(message) => FrameAction::Insert(Box::new(message)),
                Err(err) => {
                    debug!("hosted store: undecodable insert record: {err}");
                    FrameAction::Ignore
                }
            }
        }
        "phx_reply" if frame.payload["status"] == "error" => {
            FrameAction::Closed(format!("channel error: {}", frame.payload["response"]))
        }
        "phx_error" => FrameAction::Closed("channel error".to_string()),
        "phx_close" => FrameAction::Closed("channel closed".to_string()),
        "system" if frame.payload["status"] == "error" => FrameAction::Closed(format!(
            "channel error: {}",
            frame.payload["message"].as_str().unwrap_or("unknown")
        )),
        _ => FrameAction::Ignore,
    }
}

#[cfg(test)]
#[path = "tests/hosted_tests.rs"]
mod tests;
