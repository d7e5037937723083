use std::time::Duration;

use log::*;
use reqwest::{header::HeaderMap, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::{helpers::join_url, ProviderError};

/// A thin wrapper around a `reqwest` client bound to one provider's API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str, headers: HeaderMap, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Initialization(e.to_string()))?;
        Ok(Self { base_url: base_url.to_string(), client })
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        trace!("💳️ {method} {url}");
        self.client.request(method, url)
    }

    /// Sends the request and decodes a 2xx JSON response. Anything else is an error.
    pub async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ProviderError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            trace!("💳️ Provider request successful. {status}");
            response.json::<T>().await.map_err(|e| ProviderError::JsonError(e.to_string()))
        } else {
            let message = response.text().await.unwrap_or_default();
            warn!("💳️ Provider request failed with {status}. {message}");
            Err(ProviderError::QueryError { status: status.as_u16(), message })
        }
    }
}
