//! Proxy pool used for the initial route of each probe and for retries.
//!
//! The pool is read-only during a run. Probes only ever pick from it.

use crate::error::ProbeError;
use std::path::Path;

/// A list of proxy URLs (`socks5://1.2.3.4:1080`, `http://proxy:3128`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyPool {
    proxies: Vec<String>,
}

impl ProxyPool {
    pub fn new<I, S>(proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            proxies: proxies
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.trim().is_empty())
                .collect(),
        }
    }

    /// Parse a proxy list.
    ///
    /// Each line is either a proxy URL or a `protocol,ip,port` triple.
    /// Blank lines, `#` comments and a CSV header line are skipped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first line that is neither form.
    pub fn parse(content: &str) -> Result<Self, ProbeError> {
        let mut proxies = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.contains("://") {
                proxies.push(line.to_string());
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                [protocol, ip, port] => {
                    if port.parse::<u16>().is_err() {
                        // header such as "protocol,ip,port"
                        if index == 0 {
                            continue;
                        }
                        return Err(ProbeError::config(format!(
                            "Invalid port '{}' on proxy list line {}",
                            port,
                            index + 1
                        )));
                    }
                    proxies.push(format!("{}://{}:{}", protocol.to_lowercase(), ip, port));
                }
                _ => {
                    return Err(ProbeError::config(format!(
                        "Invalid proxy list line {}: '{}'",
                        index + 1,
                        line
                    )));
                }
            }
        }

        Ok(Self { proxies })
    }

    /// Load a proxy list file. See [`ProxyPool::parse`] for the format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProbeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::file_error(path.display().to_string(), e.to_string()))?;
        let pool = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), proxies = pool.len(), "proxy list loaded");
        Ok(pool)
    }

    /// Pick a proxy uniformly at random.
    pub fn choose(&self) -> Option<&str> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = rand::random_range(0..self.proxies.len());
        self.proxies.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.proxies.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
