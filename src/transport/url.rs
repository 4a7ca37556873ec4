use crate::utils::error::{Error, Result};

/// The only scheme this client dials.
pub const TCP_SCHEME: &str = "tcp";

/// Splits a broker URL of the form `tcp://host:port`.
///
/// Returns the `host:port` part verbatim; resolving it is left to the dialer.
pub fn parse_url(url: &str) -> Result<&str> {
    let parts: Vec<&str> = url.split("://").collect();
    let [scheme, addr] = parts.as_slice() else {
        return Err(Error::InvalidUrl(url.to_string()));
    };
    if *scheme != TCP_SCHEME {
        return Err(Error::UnsupportedScheme(scheme.to_string()));
    }
    Ok(*addr)
}
