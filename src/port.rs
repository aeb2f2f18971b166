//! Free-port discovery by bounded probing.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::LaunchError;

/// Connect timeout for a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// First port the allocator tries.
pub const BASE_PORT: u16 = 12000;

/// Number of consecutive ports probed before giving up.
pub const MAX_ATTEMPTS: u16 = 1000;

/// A port is available iff a TCP connect to localhost fails.
pub fn port_is_available(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_err()
}

/// Scan `BASE_PORT..BASE_PORT+MAX_ATTEMPTS` for the first available port.
/// Exhaustion is fatal to the caller; there is no fallback range.
pub fn find_available_port() -> Result<u16, LaunchError> {
    for offset in 0..MAX_ATTEMPTS {
        let port = BASE_PORT + offset;
        if port_is_available(port) {
            return Ok(port);
        }
    }
    Err(LaunchError::PortAllocation {
        base: BASE_PORT,
        attempts: MAX_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_bound_port_reports_occupied() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_is_available(port));
        drop(listener);
    }

    #[test]
    fn test_allocator_returns_available_port() {
        let port = find_available_port().unwrap();
        assert!(port >= BASE_PORT);
        assert!(port_is_available(port));
    }
}
