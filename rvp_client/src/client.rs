use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Status envelope returned for every non-data response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    pub status: String,
    pub code: i32,
    #[serde(default)]
    pub message: Option<String>,
}

impl Envelope {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).context("relay sent a malformed status envelope")
    }

    /// Anything but code 0 is a failed operation, including a closed channel.
    pub fn into_result(self) -> Result<Self> {
        if self.code == 0 {
            return Ok(self);
        }
        Err(anyhow!(
            "relay reported {} (code {}): {}",
            self.status,
            self.code,
            self.message.as_deref().unwrap_or("no message")
        ))
    }
}

pub struct RelayClient {
    http: reqwest::Client,
    base: Url,
}

impl RelayClient {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid relay URL '{base}'"))?;
        if base.cannot_be_a_base() {
            bail!("relay URL '{base}' cannot carry a path");
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    pub async fn new_channel(&self, name: Option<&str>) -> Result<String> {
        let mut url = self.endpoint(&["new"])?;
        if let Some(name) = name {
            url.query_pairs_mut().append_pair("name", name);
        }
        debug!(%url, "creating channel");
        let response = expect_ok(self.http.get(url).send().await?).await?;
        Ok(response.text().await?)
    }

    pub async fn write(&self, channel: &str, payload: Bytes) -> Result<Envelope> {
        let url = self.endpoint(&["channel", channel])?;
        debug!(%url, size = payload.len(), "writing");
        let response = expect_ok(self.http.post(url).body(payload).send().await?).await?;
        Envelope::parse(&response.bytes().await?)?.into_result()
    }

    pub async fn read(&self, channel: &str) -> Result<Bytes> {
        let url = self.endpoint(&["channel", channel])?;
        debug!(%url, "reading");
        let response = expect_ok(self.http.get(url).send().await?).await?;
        let is_envelope = response
            .headers()
            .get(header::CONTENT_TYPE)
            .is_some_and(|value| value.as_bytes().starts_with(b"application/json"));
        let body = response.bytes().await?;
        if is_envelope {
            Envelope::parse(&body)?.into_result()?;
            bail!("relay answered a read without data");
        }
        Ok(body)
    }

    pub async fn close(&self, channel: &str) -> Result<Envelope> {
        let url = self.endpoint(&["channel", channel])?;
        debug!(%url, "closing");
        let response = expect_ok(self.http.delete(url).send().await?).await?;
        Envelope::parse(&response.bytes().await?)?.into_result()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("relay URL '{}' cannot carry a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn expect_ok(response: Response) -> Result<Response> {
    match response.status() {
        StatusCode::OK => Ok(response),
        StatusCode::NOT_FOUND => bail!("no such channel, or it is busy"),
        status => {
            let body = response.text().await.unwrap_or_default();
            bail!("relay answered {status}: {}", body.trim())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parsing() {
        let ok = Envelope::parse(b"{\"status\":\"ok\",\"code\":0}\n").unwrap();
        assert_eq!(ok.message, None);
        assert!(ok.into_result().is_ok());

        let closed =
            Envelope::parse(b"{\"status\":\"ok\",\"code\":-1,\"message\":\"channel closed\"}").unwrap();
        let err = closed.into_result().unwrap_err().to_string();
        assert!(err.contains("code -1"));
        assert!(err.contains("channel closed"));

        assert!(Envelope::parse(b"not json").is_err());
    }

    #[test]
    fn test_endpoints() {
        let client = RelayClient::new("http://127.0.0.1:8080").unwrap();
        assert_eq!(
            client.endpoint(&["channel", "abc"]).unwrap().as_str(),
            "http://127.0.0.1:8080/channel/abc"
        );

        let nested = RelayClient::new("http://relay.local/rvp/").unwrap();
        assert_eq!(
            nested.endpoint(&["new"]).unwrap().as_str(),
            "http://relay.local/rvp/new"
        );
    }

    #[test]
    fn test_rejects_unusable_base() {
        assert!(RelayClient::new("not a url").is_err());
        assert!(RelayClient::new("mailto:someone@example.com").is_err());
    }
}
