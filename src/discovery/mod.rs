//! mDNS advertisement so the companion app can find the upload server.
//!
//! Publishes `_audiolooper._tcp.local.` with the listening port and a
//! `path=/` TXT entry pointing at the upload page.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceInfo};

use crate::server::types::SERVICE_TYPE;

/// Handle for an active mDNS advertisement.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
    instance: String,
}

/// Start advertising `instance` on `port`. `None` if mDNS is unavailable; the
/// server keeps running without discovery in that case.
pub fn spawn_mdns_advertiser(instance: &str, bind: SocketAddr) -> Option<MdnsAdvertiser> {
    let daemon = match ServiceDaemon::new() {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "mdns: daemon start failed");
            return None;
        }
    };
    let host_base = gethostname::gethostname().to_string_lossy().to_string();
    let host = if host_base.ends_with(".local.") {
        host_base
    } else {
        format!("{}.local.", host_base.trim_end_matches('.'))
    };
    let properties: HashMap<String, String> = [
        ("path".to_string(), "/".to_string()),
        ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
    ]
    .into_iter()
    .collect();
    let ip = advertised_ip(bind.ip());
    let info = match ServiceInfo::new(SERVICE_TYPE, instance, &host, ip, bind.port(), properties)
    {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(error = %e, "mdns: invalid service record");
            let _ = daemon.shutdown();
            return None;
        }
    };
    let fullname = info.get_fullname().to_string();
    if let Err(e) = daemon.register(info) {
        tracing::warn!(error = %e, "mdns: register failed");
        let _ = daemon.shutdown();
        return None;
    }
    tracing::info!(
        instance = %instance,
        addr = %SocketAddr::new(ip, bind.port()),
        "mdns: advertised upload server"
    );
    Some(MdnsAdvertiser {
        daemon,
        fullname,
        instance: instance.to_string(),
    })
}

impl MdnsAdvertiser {
    pub fn instance_name(&self) -> &str {
        &self.instance
    }

    /// Unregister and shut down the mDNS daemon.
    pub fn shutdown(&self) {
        if let Ok(rx) = self.daemon.unregister(&self.fullname) {
            let _ = rx.recv_timeout(Duration::from_secs(1));
        }
        if let Ok(rx) = self.daemon.shutdown() {
            let _ = rx.recv_timeout(Duration::from_secs(1));
        }
        tracing::debug!(instance = %self.instance, "mdns: withdrawn");
    }
}

fn advertised_ip(bound: IpAddr) -> IpAddr {
    if bound.is_unspecified() {
        local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    } else {
        bound
    }
}

/// Best-effort address of the interface that routes off-host. Connecting a
/// UDP socket sends nothing; it only asks the kernel to pick a route.
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    if socket.connect("8.8.8.8:80").is_err() && socket.connect("1.1.1.1:80").is_err() {
        return None;
    }
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// The address to show users for a server bound to `bind_host`.
pub fn display_address(bind_host: Ipv4Addr) -> String {
    advertised_ip(IpAddr::V4(bind_host)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_bind_address_is_shown_as_is() {
        assert_eq!(display_address(Ipv4Addr::new(192, 168, 1, 20)), "192.168.1.20");
        assert_eq!(display_address(Ipv4Addr::LOCALHOST), "127.0.0.1");
    }

    #[test]
    fn unspecified_bind_resolves_to_something_concrete() {
        let shown = display_address(Ipv4Addr::UNSPECIFIED);
        assert_ne!(shown, "0.0.0.0");
        assert!(shown.parse::<IpAddr>().is_ok());
    }
}
