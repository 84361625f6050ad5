//! Request routing for the relay.
//!
//! ```text
//! GET    /new[?name=<name>]   create a channel, respond with its name
//! POST   /channel/<name>      write the request body
//! GET    /channel/<name>      read a payload
//! DELETE /channel/<name>      close the channel
//! ```

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{body::Body, Method, Request, StatusCode};
use rvp_core::{ChannelError, ChannelRegistry, Outcome};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::ServerConfig,
    response::{self, HttpResponse},
};

const CHANNEL_PREFIX: &str = "/channel/";

/// Whether `name` can be used verbatim as a single URL path segment.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no such resource")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("invalid channel name '{0}'")]
    InvalidName(String),

    #[error("payload exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ServerError {
    fn into_response(self) -> HttpResponse {
        match self {
            ServerError::NotFound => response::not_found(),
            ServerError::MethodNotAllowed => response::method_not_allowed(),
            ServerError::InvalidName(_) | ServerError::BodyRead(_) => {
                response::plain(StatusCode::BAD_REQUEST, &self.to_string())
            }
            ServerError::BodyTooLarge { .. } => {
                response::plain(StatusCode::PAYLOAD_TOO_LARGE, &self.to_string())
            }
            ServerError::Channel(err) => response::channel_error(&err),
        }
    }
}

enum Route<'a> {
    New,
    Channel(&'a str),
}

fn route(path: &str) -> Option<Route<'_>> {
    if path == "/new" {
        return Some(Route::New);
    }
    let name = path.strip_prefix(CHANNEL_PREFIX)?;
    (!name.is_empty() && !name.contains('/')).then_some(Route::Channel(name))
}

/// Serves relay requests against a shared [`ChannelRegistry`].
#[derive(Clone, Debug)]
pub struct RelayHandler {
    registry: ChannelRegistry,
    fixed_name: Option<String>,
    max_body_size: usize,
}

impl RelayHandler {
    pub fn new(registry: ChannelRegistry, config: &ServerConfig) -> Self {
        Self {
            registry,
            fixed_name: config.fixed_name.clone(),
            max_body_size: config.max_body_size,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Route a request. Every failure is rendered as a response, so this
    /// never errors.
    ///
    /// Dropping the returned future while a write or read is parked counts
    /// as the client disconnecting.
    pub async fn handle<B>(&self, req: Request<B>) -> Result<HttpResponse, Infallible>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        debug!(%method, %path, "request");

        let result = match route(&path) {
            Some(Route::New) if method == Method::GET => self.create(req.uri().query()),
            Some(Route::Channel(name)) => match method {
                Method::POST => self.write(name, req.into_body()).await,
                Method::GET => self.read(name).await,
                Method::DELETE => Ok(self.close(name)),
                _ => Err(ServerError::MethodNotAllowed),
            },
            Some(Route::New) => Err(ServerError::MethodNotAllowed),
            None => Err(ServerError::NotFound),
        };

        Ok(result.unwrap_or_else(|err| {
            debug!(%method, %path, error = %err, "request failed");
            err.into_response()
        }))
    }

    fn create(&self, query: Option<&str>) -> Result<HttpResponse, ServerError> {
        let requested = query.and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "name")
                .map(|(_, value)| value.into_owned())
        });
        let name = match requested.filter(|name| !name.is_empty()) {
            Some(name) if !is_valid_name(&name) => return Err(ServerError::InvalidName(name)),
            Some(name) => Some(name),
            None => self.fixed_name.clone(),
        };

        let channel = self.registry.create(name.as_deref());
        Ok(response::channel_name(channel.name()))
    }

    async fn write<B>(&self, name: &str, body: B) -> Result<HttpResponse, ServerError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let channel = self.lookup(name)?;
        let payload = self.read_body(body).await?;
        debug!(channel = %name, size = payload.len(), "write");
        let outcome = channel.write(payload)?.await?;
        Ok(response::outcome(outcome))
    }

    async fn read(&self, name: &str) -> Result<HttpResponse, ServerError> {
        let channel = self.lookup(name)?;
        let outcome = channel.read()?.await?;
        if let Outcome::Data(payload) = &outcome {
            debug!(channel = %name, size = payload.len(), "read");
        }
        Ok(response::outcome(outcome))
    }

    /// Closing is idempotent: an unknown name still answers `Ok`.
    fn close(&self, name: &str) -> HttpResponse {
        if !self.registry.close(name) {
            debug!(channel = %name, "close of unknown channel");
        }
        response::outcome(Outcome::Ok)
    }

    fn lookup(&self, name: &str) -> Result<rvp_core::Channel, ServerError> {
        if !is_valid_name(name) {
            return Err(ServerError::InvalidName(name.to_owned()));
        }
        self.registry.get(name).ok_or(ServerError::NotFound)
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, ServerError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match Limited::new(body, self.max_body_size).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                warn!(limit = self.max_body_size, "payload too large");
                Err(ServerError::BodyTooLarge {
                    limit: self.max_body_size,
                })
            }
            Err(err) => Err(ServerError::BodyRead(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;
    use http_body_util::Full;
    use rvp_core::{RegistryConfig, StateKind};

    use super::*;

    fn handler(max_body_size: usize) -> RelayHandler {
        let config = ServerConfig {
            max_body_size,
            ..ServerConfig::default()
        };
        RelayHandler::new(ChannelRegistry::new(RegistryConfig::default()), &config)
    }

    fn request(method: Method, uri: &str, body: &'static [u8]) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from_static(body)))
            .unwrap()
    }

    async fn send(handler: &RelayHandler, req: Request<Full<Bytes>>) -> (StatusCode, Bytes) {
        let response = handler.handle(req).await.unwrap();
        let status = response.status();
        (status, response.into_body().collect().await.unwrap().to_bytes())
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("abc-DEF_0.9~"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("a b"));
        assert!(!is_valid_name("%41"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_with_and_without_name() {
        let handler = handler(1024);

        let (status, body) = send(&handler, request(Method::GET, "/new?name=abc", b"")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"abc");

        let (_, body) = send(&handler, request(Method::GET, "/new", b"")).await;
        assert_eq!(body.len(), 32);
        assert_eq!(handler.registry().len(), 2);

        let (status, _) = send(&handler, request(Method::GET, "/new?name=a%2Fb", b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_name_is_used_when_none_requested() {
        let config = ServerConfig {
            fixed_name: Some("debug".into()),
            ..ServerConfig::default()
        };
        let handler = RelayHandler::new(ChannelRegistry::new(RegistryConfig::default()), &config);

        let (_, body) = send(&handler, request(Method::GET, "/new", b"")).await;
        assert_eq!(&body[..], b"debug");
        let (_, body) = send(&handler, request(Method::GET, "/new?name=other", b"")).await;
        assert_eq!(&body[..], b"other");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_then_read() {
        let handler = handler(1024);
        handler.registry().create(Some("abc"));

        let writer = {
            let handler = handler.clone();
            tokio::spawn(async move {
                send(&handler, request(Method::POST, "/channel/abc", b"hello")).await
            })
        };
        tokio::task::yield_now().await;

        let (status, body) = send(&handler, request(Method::GET, "/channel/abc", b"")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"hello");

        let (status, body) = writer.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"{\"status\":\"ok\",\"code\":0}\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_channel_and_conflict_are_not_found() {
        let handler = handler(1024);
        let (status, body) = send(&handler, request(Method::GET, "/channel/nope", b"")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(&body[..], b"No such resource");

        handler.registry().create(Some("abc"));
        let mut first = Box::pin(handler.handle(request(Method::GET, "/channel/abc", b"")));
        assert!((&mut first).now_or_never().is_none());

        let (status, _) = send(&handler, request(Method::GET, "/channel/abc", b"")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_frees_channel() {
        let handler = handler(1024);
        let channel = handler.registry().create(Some("abc"));

        let mut pending = Box::pin(handler.handle(request(Method::POST, "/channel/abc", b"x")));
        assert!((&mut pending).now_or_never().is_none());
        assert_eq!(channel.state(), StateKind::WriteWaiting);

        drop(pending);
        assert_eq!(channel.state(), StateKind::Standby);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_read_times_out() {
        let handler = handler(1024);
        handler.registry().create(Some("abc"));

        let reader = {
            let handler = handler.clone();
            tokio::spawn(async move {
                send(&handler, request(Method::GET, "/channel/abc", b"")).await
            })
        };
        tokio::time::sleep(Duration::from_secs(11)).await;

        let (status, body) = reader.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            &body[..],
            b"{\"status\":\"error\",\"code\":2,\"message\":\"request timed out\"}\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_body_rejected() {
        let handler = handler(4);
        let channel = handler.registry().create(Some("abc"));

        let (status, _) = send(&handler, request(Method::POST, "/channel/abc", b"too long")).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(channel.state(), StateKind::Standby);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_is_idempotent() {
        let handler = handler(1024);
        handler.registry().create(Some("abc"));

        for _ in 0..2 {
            let (status, body) = send(&handler, request(Method::DELETE, "/channel/abc", b"")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(&body[..], b"{\"status\":\"ok\",\"code\":0}\n");
        }
        assert!(handler.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_routes() {
        let handler = handler(1024);
        let (status, _) = send(&handler, request(Method::GET, "/", b"")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&handler, request(Method::GET, "/channel/a/b", b"")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&handler, request(Method::PUT, "/channel/abc", b"")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        let (status, _) = send(&handler, request(Method::POST, "/new", b"")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
