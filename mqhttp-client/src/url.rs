use crate::error::ClientError;

const DEFAULT_PORT: u16 = 1883;

/// Turns `tcp://host:port`, `mqtt://host:port` or `host:port` into a
/// `host:port` socket address string. A missing port means 1883.
pub fn parse_broker_url(url: &str) -> Result<String, ClientError> {
    let trimmed = url.trim();
    let rest = match trimmed.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => {
            return Err(ClientError::InvalidUrl(format!("unsupported scheme {:?} in {}", scheme, url)))
        }
        None => trimmed,
    };

    let authority = rest.trim_end_matches('/');
    if authority.is_empty() || authority.contains('/') {
        return Err(ClientError::InvalidUrl(url.to_string()));
    }

    let port = match authority.rsplit_once(':') {
        // a bare IPv6 literal has colons but no port
        Some((host, port)) if !host.is_empty() && (!host.contains(':') || host.ends_with(']')) => {
            Some(port)
        }
        _ => None,
    };

    match port {
        Some(port) => {
            port.parse::<u16>()
                .map_err(|_| ClientError::InvalidUrl(format!("bad port in {}", url)))?;
            Ok(authority.to_string())
        }
        None => Ok(format!("{}:{}", authority, DEFAULT_PORT)),
    }
}
