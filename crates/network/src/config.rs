use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;

#[derive(Clone, Debug)]
pub struct Config {
    /// Optional proxy, e.g. `socks5h://127.0.0.1:9050` or `http://proxy:3128`
    pub proxy_addr: Option<String>,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub verify_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_addr: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            verify_tls: true,
        }
    }
}

impl Config {
    pub fn with_proxy(mut self, addr: &str) -> Self {
        self.proxy_addr = Some(addr.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn without_tls_verification(mut self) -> Self {
        self.verify_tls = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
