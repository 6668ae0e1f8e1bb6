//! Address parsing and port probing.
//!
//! Peers accept addresses of the form `scheme://host:minPort~maxPort/path`,
//! where the scheme, the `~maxPort` range extension and the path are each
//! optional. [`detect_port`] walks the port range and binds the first port
//! that works, which is how `:0`-style and range-style listen addresses are
//! resolved.

use std::future::Future;

use crate::error::{AddressError, Result};

/// A parsed peer address, possibly spanning a port range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub scheme: String,
    pub host: String,
    pub min_port: u16,
    pub max_port: u16,
    pub path: String,
}

impl Address {
    /// `host:port` form, without scheme or path.
    pub fn host_port_string(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }

    /// Full form including scheme and path when present.
    pub fn to_string_with_port(&self, port: u16) -> String {
        if self.scheme.is_empty() {
            self.host_port_string(port)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.host, port, self.path)
        }
    }
}

/// Parses `scheme://host:minPort~maxPort/path`.
pub fn parse_address(addr: &str) -> std::result::Result<Address, AddressError> {
    let mut rest = addr;
    let mut out = Address {
        scheme: String::new(),
        host: String::new(),
        min_port: 0,
        max_port: 0,
        path: String::new(),
    };

    if let Some(pos) = rest.find("://") {
        out.scheme = rest[..pos].to_string();
        rest = &rest[pos + 3..];
    }

    // the colon is not optional
    let colon = rest.find(':').ok_or_else(|| AddressError::InvalidFormat {
        addr: addr.to_string(),
    })?;
    out.host = rest[..colon].to_string();
    rest = &rest[colon + 1..];

    let (min_str, max_str) = match rest.find('~') {
        Some(tilde) => {
            let min_str = &rest[..tilde];
            let tail = &rest[tilde + 1..];
            match tail.find('/') {
                Some(slash) => {
                    out.path = tail[slash..].to_string();
                    (min_str, &tail[..slash])
                }
                None => (min_str, tail),
            }
        }
        None => match rest.find('/') {
            Some(slash) => {
                out.path = rest[slash..].to_string();
                (&rest[..slash], "")
            }
            None => (rest, ""),
        },
    };

    out.min_port = min_str
        .parse()
        .map_err(|_| AddressError::InvalidPortRange {
            addr: addr.to_string(),
        })?;

    out.max_port = if max_str.is_empty() {
        out.min_port
    } else {
        max_str.parse().map_err(|_| AddressError::InvalidPortRange {
            addr: addr.to_string(),
        })?
    };

    Ok(out)
}

/// Parses `addr` and invokes `bind` for each port in the range until one
/// succeeds. Returns the first success, or the last bind error once the
/// range is exhausted.
pub async fn detect_port<T, F, Fut>(addr: &str, mut bind: F) -> Result<T>
where
    F: FnMut(&Address, u16) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let parsed = parse_address(addr)?;

    let mut port = parsed.min_port;
    loop {
        match bind(&parsed, port).await {
            Ok(value) => return Ok(value),
            Err(err) if port >= parsed.max_port => return Err(err),
            Err(_) => port += 1,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
