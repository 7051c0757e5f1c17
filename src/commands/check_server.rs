use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::CheckServerArgs;
use crate::config::{Config, resolve_config_path};

pub fn run(args: CheckServerArgs) -> Result<()> {
    let config_path = resolve_config_path(args.config.as_deref())?;
    let config = Config::load(&config_path)?;
    let timeout = Duration::from_secs(args.timeout_secs.max(1));

    probe(config.server.host.trim(), config.server.port, timeout)?;
    info!(
        host = %config.server.host.trim(),
        port = config.server.port,
        "data loader server reachable"
    );
    Ok(())
}

/// Opens and drops a TCP connection to the loader's server.
pub fn probe(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let addrs: Vec<_> = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .collect();
    if addrs.is_empty() {
        bail!("{host}:{port} resolved to no addresses");
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(err) => {
                warn!(address = %addr, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) => Err(err).with_context(|| format!("cannot reach {host}:{port}")),
        None => bail!("cannot reach {host}:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn probe_succeeds_against_listening_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        probe("127.0.0.1", port, Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn probe_fails_when_nothing_listens() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = probe("127.0.0.1", port, Duration::from_secs(2)).unwrap_err();
        assert!(format!("{err:#}").contains("cannot reach 127.0.0.1"));
    }
}
