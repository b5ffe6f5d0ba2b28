use crate::error::{PipeError, PipeResult};
use std::net::{SocketAddr, ToSocketAddrs};

const SCHEME: &str = "udp://";
const DEFAULT_PORT: u16 = 30000;

/// Resolve a `udp://host[:port]` URI to a socket address. `host` is passed through
/// `ToSocketAddrs`, so both dotted IPv4 literals and DNS names are accepted; the port defaults
/// to 30000 when omitted.
pub fn resolve(uri: &str) -> PipeResult<SocketAddr> {
    let rest = uri
        .strip_prefix(SCHEME)
        .ok_or_else(|| PipeError::InvalidSettings(format!("not a udp:// uri: {}", uri)))?;

    if rest.is_empty() {
        return Err(PipeError::InvalidSettings("missing host".to_string()));
    }

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| PipeError::InvalidSettings(format!("invalid port: {}", port_str)))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    (host, port)
        .to_socket_addrs()
        .map_err(|err| PipeError::InvalidSettings(format!("could not resolve {}: {}", host, err)))?
        .next()
        .ok_or_else(|| PipeError::InvalidSettings(format!("no address for {}", host)))
}
