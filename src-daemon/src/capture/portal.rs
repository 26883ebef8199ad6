/// Interactive screenshots through xdg-desktop-portal.
///
/// The portal answers asynchronously: `Screenshot` returns a request handle
/// and the result arrives later as a `Response` signal on that handle. The
/// match rule for the signal has to be in place before the call goes out,
/// otherwise a fast portal can answer into the void and the request hangs
/// until the timeout.
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::{proxy, Connection, MatchRule, MessageStream};

use super::ScreenshotResult;

pub const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
const REQUEST_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/request";
const TOKEN_PREFIX: &str = "textextractor";

/// How long the user gets to pick a region.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

const RESPONSE_SUCCESS: u32 = 0;
const RESPONSE_CANCELLED: u32 = 1;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),
    #[error("session bus connection has no unique name")]
    NoUniqueName,
    #[error("portal response stream closed before an answer arrived")]
    StreamClosed,
}

/// Options sent with a `Screenshot` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotOptions {
    pub handle_token: String,
    pub interactive: bool,
    pub modal: bool,
}

/// Decoded `Response` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub code: u32,
    pub uri: Option<String>,
}

/// A live subscription to `Response` on one request path.
///
/// Dropping it removes the match rule.
#[async_trait]
pub trait ResponseSubscription: Send {
    async fn next_response(&mut self) -> Result<PortalResponse, PortalError>;
}

/// The slice of the session bus the requester needs.
#[async_trait]
pub trait PortalBus: Send + Sync {
    type Subscription: ResponseSubscription;

    fn unique_name(&self) -> Result<String, PortalError>;

    async fn subscribe(&self, request_path: &str) -> Result<Self::Subscription, PortalError>;

    /// Issue `Screenshot`; returns the request handle the portal picked.
    async fn call_screenshot(&self, options: &ScreenshotOptions) -> Result<String, PortalError>;

    /// Ask the portal to dismiss a pending request.
    async fn close_request(&self, request_path: &str) -> Result<(), PortalError>;
}

/// Anything that can produce an interactive screenshot.
#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    async fn request_interactive_screenshot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ScreenshotResult, PortalError>;
}

pub struct ScreenshotRequester<B> {
    bus: B,
    counter: AtomicU64,
    timeout: Duration,
}

impl<B: PortalBus> ScreenshotRequester<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            counter: AtomicU64::new(0),
            timeout: RESPONSE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn next_token(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{TOKEN_PREFIX}{n}")
    }

    async fn close_quietly(&self, path: &str) {
        if let Err(e) = self.bus.close_request(path).await {
            debug!("portal: closing {path} failed: {e}");
        }
    }
}

#[async_trait]
impl<B: PortalBus> ScreenshotSource for ScreenshotRequester<B> {
    async fn request_interactive_screenshot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ScreenshotResult, PortalError> {
        let token = self.next_token();
        let path = request_path(&self.bus.unique_name()?, &token);

        let mut subscription = self.bus.subscribe(&path).await?;
        debug!("portal: subscribed to Response on {path}");

        let options = ScreenshotOptions {
            handle_token: token,
            interactive: true,
            modal: true,
        };

        let exchange = async {
            let handle = self.bus.call_screenshot(&options).await?;
            if handle != path {
                warn!("portal: request handle {handle} differs from expected {path}");
            }
            info!("portal: screenshot requested, waiting for the user");
            subscription.next_response().await
        };

        let outcome = tokio::select! {
            reply = tokio::time::timeout(self.timeout, exchange) => match reply {
                Ok(Ok(response)) => Ok(map_response(&response)),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!("portal: no response after {:?}", self.timeout);
                    self.close_quietly(&path).await;
                    Ok(ScreenshotResult::Failed("timed out".to_string()))
                }
            },
            _ = cancel.cancelled() => {
                info!("portal: request cancelled");
                self.close_quietly(&path).await;
                Ok(ScreenshotResult::Cancelled)
            }
        };

        drop(subscription);
        debug!("portal: unsubscribed from {path}");
        outcome
    }
}

/// `/org/freedesktop/portal/desktop/request/<sender>/<token>`
pub fn request_path(unique_name: &str, token: &str) -> String {
    let sender = unique_name.trim_start_matches(':').replace('.', "_");
    format!("{REQUEST_PATH_PREFIX}/{sender}/{token}")
}

pub fn map_response(response: &PortalResponse) -> ScreenshotResult {
    match response.code {
        RESPONSE_SUCCESS => match &response.uri {
            Some(uri) => ScreenshotResult::Success(uri.clone()),
            None => ScreenshotResult::Failed("no URI in response".to_string()),
        },
        RESPONSE_CANCELLED => ScreenshotResult::Cancelled,
        code => ScreenshotResult::Failed(format!("portal returned error code {code}")),
    }
}

// ─── zbus backend ────────────────────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.portal.Screenshot",
    default_service = "org.freedesktop.portal.Desktop",
    default_path = "/org/freedesktop/portal/desktop",
    gen_blocking = false
)]
trait Screenshot {
    fn screenshot(
        &self,
        parent_window: &str,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(
    interface = "org.freedesktop.portal.Request",
    default_service = "org.freedesktop.portal.Desktop",
    gen_blocking = false
)]
trait Request {
    fn close(&self) -> zbus::Result<()>;
}

/// Session bus backend.
#[derive(Clone)]
pub struct ZbusPortal {
    conn: Connection,
}

impl ZbusPortal {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

pub struct ZbusSubscription {
    stream: MessageStream,
}

#[async_trait]
impl ResponseSubscription for ZbusSubscription {
    async fn next_response(&mut self) -> Result<PortalResponse, PortalError> {
        let msg = self.stream.next().await.ok_or(PortalError::StreamClosed)??;
        let (code, results): (u32, HashMap<String, OwnedValue>) = msg.body().deserialize()?;
        let uri = results.get("uri").and_then(|value| match &**value {
            Value::Str(s) => Some(s.as_str().to_owned()),
            _ => None,
        });
        Ok(PortalResponse { code, uri })
    }
}

#[async_trait]
impl PortalBus for ZbusPortal {
    type Subscription = ZbusSubscription;

    fn unique_name(&self) -> Result<String, PortalError> {
        self.conn
            .unique_name()
            .map(|name| name.to_string())
            .ok_or(PortalError::NoUniqueName)
    }

    async fn subscribe(&self, request_path: &str) -> Result<ZbusSubscription, PortalError> {
        // No sender filter: signals carry the portal's unique name, and the
        // request path already embeds our own token.
        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface(REQUEST_INTERFACE)?
            .member("Response")?
            .path(request_path)?
            .build();
        let stream = MessageStream::for_match_rule(rule, &self.conn, Some(4)).await?;
        Ok(ZbusSubscription { stream })
    }

    async fn call_screenshot(&self, options: &ScreenshotOptions) -> Result<String, PortalError> {
        let mut args: HashMap<&str, Value<'_>> = HashMap::new();
        args.insert("handle_token", Value::from(options.handle_token.as_str()));
        args.insert("interactive", Value::from(options.interactive));
        args.insert("modal", Value::from(options.modal));

        let proxy = ScreenshotProxy::new(&self.conn).await?;
        let handle = proxy.screenshot("", args).await?;
        Ok(handle.as_str().to_owned())
    }

    async fn close_request(&self, request_path: &str) -> Result<(), PortalError> {
        let proxy = RequestProxy::builder(&self.conn)
            .path(request_path)?
            .build()
            .await?;
        proxy.close().await?;
        Ok(())
    }
}
