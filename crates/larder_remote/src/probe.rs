//! Reachability probing.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Returns true if a TCP connection to `host:port` opens within `timeout`.
///
/// Only the first resolved address is tried. Name resolution itself is not
/// bounded by `timeout`.
pub fn probe_tcp(host: &str, port: u16, timeout: Duration) -> bool {
    let addr = match (host, port).to_socket_addrs().map(|mut addrs| addrs.next()) {
        Ok(Some(addr)) => addr,
        Ok(None) => {
            debug!(host, port, "probe: no address");
            return false;
        }
        Err(e) => {
            debug!(host, port, error = %e, "probe: resolution failed");
            return false;
        }
    };

    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(_) => true,
        Err(e) => {
            debug!(%addr, error = %e, "probe: connect failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn open_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_tcp("127.0.0.1", port, Duration::from_secs(1)));
    }

    #[test]
    fn closed_port_is_not() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!probe_tcp("127.0.0.1", port, Duration::from_millis(200)));
    }

    #[test]
    fn unresolvable_host_is_not() {
        assert!(!probe_tcp("no-such-host.invalid", 443, Duration::from_millis(200)));
    }
}
