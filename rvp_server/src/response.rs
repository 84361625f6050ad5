//! Turns channel outcomes into HTTP responses.
//!
//! | Outcome            | Body                                                      |
//! |--------------------|-----------------------------------------------------------|
//! | `Ok`               | `{"status":"ok","code":0}`                                |
//! | `Data`             | the payload, `application/octet-stream`                   |
//! | `Closed`           | `{"status":"ok","code":-1,"message":"channel closed"}`    |
//! | `PeerDisconnected` | `{"status":"error","code":1,"message":...}`               |
//! | `Timeout`          | `{"status":"error","code":2,"message":...}`               |
//! | abandoned          | `{"status":"error","code":3,"message":...}`               |
//!
//! JSON bodies end with a newline. Every response carries `Content-Length`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use rvp_core::{ChannelError, Outcome};
use serde::Serialize;

pub type HttpResponse = Response<Full<Bytes>>;

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    status: &'a str,
    code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

pub fn outcome(outcome: Outcome) -> HttpResponse {
    match outcome {
        Outcome::Data(payload) => build(StatusCode::OK, "application/octet-stream", payload),
        Outcome::Ok | Outcome::Closed => envelope("ok", outcome.code(), outcome.message()),
        Outcome::Timeout | Outcome::PeerDisconnected => {
            envelope("error", outcome.code(), outcome.message())
        }
    }
}

/// Response for a core error. Errors without an envelope code mean the
/// channel cannot be addressed and are reported as a missing resource.
pub fn channel_error(err: &ChannelError) -> HttpResponse {
    match err.code() {
        Some(code) => {
            let message = err.to_string();
            envelope("error", code, Some(&message))
        }
        None => not_found(),
    }
}

/// The channel name handed back by `/new`.
pub fn channel_name(name: &str) -> HttpResponse {
    build(
        StatusCode::OK,
        "text/plain; charset=utf-8",
        Bytes::copy_from_slice(name.as_bytes()),
    )
}

pub fn not_found() -> HttpResponse {
    plain(StatusCode::NOT_FOUND, "No such resource")
}

pub fn method_not_allowed() -> HttpResponse {
    plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub fn plain(status: StatusCode, text: &str) -> HttpResponse {
    build(
        status,
        "text/plain; charset=utf-8",
        Bytes::copy_from_slice(text.as_bytes()),
    )
}

fn envelope(status: &str, code: i32, message: Option<&str>) -> HttpResponse {
    #[allow(clippy::expect_used)]
    let mut body = serde_json::to_vec(&Envelope {
        status,
        code,
        message,
    })
    .expect("envelope serializes");
    body.push(b'\n');
    build(StatusCode::OK, "application/json", Bytes::from(body))
}

#[allow(clippy::expect_used)]
fn build(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Full::new(body))
        .expect("valid response")
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_ok_envelope() {
        let response = outcome(Outcome::Ok);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body(response).await, "{\"status\":\"ok\",\"code\":0}\n");
    }

    #[tokio::test]
    async fn test_data_is_raw_bytes() {
        let response = outcome(Outcome::Data(Bytes::from_static(b"hello")));
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(body(response).await, "hello");
    }

    #[tokio::test]
    async fn test_failure_envelopes() {
        assert_eq!(
            body(outcome(Outcome::Closed)).await,
            "{\"status\":\"ok\",\"code\":-1,\"message\":\"channel closed\"}\n"
        );
        assert_eq!(
            body(outcome(Outcome::Timeout)).await,
            "{\"status\":\"error\",\"code\":2,\"message\":\"request timed out\"}\n"
        );
        assert_eq!(
            body(outcome(Outcome::PeerDisconnected)).await,
            "{\"status\":\"error\",\"code\":1,\"message\":\"peer disconnected whilst writing data\"}\n"
        );
        assert_eq!(
            body(channel_error(&ChannelError::Abandoned)).await,
            "{\"status\":\"error\",\"code\":3,\"message\":\"channel closed unexpectedly\"}\n"
        );
    }

    #[test]
    fn test_unaddressable_channel_is_not_found() {
        let err = ChannelError::Closed {
            channel: "abc".into(),
        };
        assert_eq!(channel_error(&err).status(), StatusCode::NOT_FOUND);
    }
}
