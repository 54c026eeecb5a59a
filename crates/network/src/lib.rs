//! Bounded HTTP transport shared by the license issuer and its clients.
//!
//! Every request carries the timeout from [`Config`], and failures are
//! classified so callers can tell "the authority said no" apart from "the
//! authority could not be reached".
//!
//! ```rust,no_run
//! use authority_net::{Config, HttpClient};
//!
//! #[tokio::main]
//! async fn main() -> authority_net::Result<()> {
//!     let client = HttpClient::new(Config::default().with_timeout(2))?;
//!     let health: serde_json::Value = client.get_json("http://127.0.0.1:8080/health").await?;
//!     println!("{}", health);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http_client;

pub use config::{Config, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};
pub use error::{NetError, Result};
pub use http_client::HttpClient;

pub fn default_client() -> Result<HttpClient> {
    HttpClient::new(Config::default())
}
