//! Blocking reqwest transport for the spreadsheet remote.

use larder_remote::{HttpClient, HttpFailure, HttpRequest, HttpResponse, Method};
use reqwest::blocking::Client;

/// [`HttpClient`] over a shared `reqwest::blocking::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Creates a client with reqwest's default connection pool.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Put => self.client.put(&request.url),
            Method::Post => self.client.post(&request.url),
        }
        .timeout(request.timeout);

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(failure)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(failure)?;
        Ok(HttpResponse { status, body })
    }
}

fn failure(err: reqwest::Error) -> HttpFailure {
    if err.is_timeout() {
        HttpFailure::Timeout
    } else if err.is_connect() {
        HttpFailure::Connect(err.to_string())
    } else {
        HttpFailure::Transport(err.to_string())
    }
}
