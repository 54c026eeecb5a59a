use reqwest::{Client, Proxy, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{NetError, Result};

pub struct HttpClient {
    client: Client,
    config: Config,
}

impl HttpClient {
    pub fn new(config: Config) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        if let Some(proxy_addr) = &config.proxy_addr {
            check_proxy_scheme(proxy_addr)?;
            let proxy = Proxy::all(proxy_addr)
                .map_err(|e| NetError::Config(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| NetError::Config(format!("Failed to build client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        check_status(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        response
            .json()
            .await
            .map_err(|e| NetError::Decode(format!("JSON parse failed: {}", e)))
    }

    pub async fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<Response> {
        debug!("POST {}", url);
        let response = self.client.post(url).json(body).send().await?;
        check_status(response).await
    }

    pub async fn post_json<T: Serialize, R: DeserializeOwned>(&self, url: &str, body: &T) -> Result<R> {
        let response = self.post(url, body).await?;
        response
            .json()
            .await
            .map_err(|e| NetError::Decode(format!("JSON parse failed: {}", e)))
    }

    pub async fn put_json<T: Serialize, R: DeserializeOwned>(&self, url: &str, body: &T) -> Result<R> {
        debug!("PUT {}", url);
        let response = self.client.put(url).json(body).send().await?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| NetError::Decode(format!("JSON parse failed: {}", e)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

const PROXY_SCHEMES: [&str; 4] = ["http", "https", "socks5", "socks5h"];

fn check_proxy_scheme(proxy_addr: &str) -> Result<()> {
    let url = reqwest::Url::parse(proxy_addr)
        .map_err(|e| NetError::Config(format!("Invalid proxy URL: {}", e)))?;
    if !PROXY_SCHEMES.contains(&url.scheme()) {
        return Err(NetError::Config(format!(
            "Unsupported proxy scheme '{}', expected one of {:?}",
            url.scheme(),
            PROXY_SCHEMES
        )));
    }
    Ok(())
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NetError::Status {
        status: status.as_u16(),
        body,
    })
}
