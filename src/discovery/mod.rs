//! Service advertisement module
//!
//! Makes a listening server discoverable before any connection exists.
//! Advertisement is fire-and-forget from the server's point of view:
//! failures are logged and serving continues.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

/// Service type for BlueRPC discovery
pub const SERVICE_TYPE: &str = "_bluerpc._tcp.local.";

/// Profile descriptor advertised with every record
pub const SERIAL_PORT_PROFILE: &str = "serial-port";

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("mDNS error: {0}")]
    Mdns(String),

    #[error("Service registration failed: {0}")]
    Registration(String),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// What gets advertised for a listening server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Human-readable service name
    pub name: String,
    /// Unique service identifier
    pub service_id: String,
    /// Local transport address
    pub address: String,
    /// Listening port
    pub port: u16,
    /// Short profile descriptor
    pub profile: &'static str,
}

impl ServiceRecord {
    pub fn new(name: &str, service_id: &str, address: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            service_id: service_id.to_string(),
            address: address.to_string(),
            port,
            profile: SERIAL_PORT_PROFILE,
        }
    }
}

/// Makes services discoverable by peers
pub trait Advertiser: Send + Sync {
    /// Publish `record`
    fn advertise(&self, record: &ServiceRecord) -> DiscoveryResult<()>;

    /// Retract a previously published `record`
    fn withdraw(&self, record: &ServiceRecord) -> DiscoveryResult<()>;
}

/// Advertiser that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdvertiser;

impl Advertiser for NoopAdvertiser {
    fn advertise(&self, _record: &ServiceRecord) -> DiscoveryResult<()> {
        Ok(())
    }

    fn withdraw(&self, _record: &ServiceRecord) -> DiscoveryResult<()> {
        Ok(())
    }
}

/// mDNS/DNS-SD advertiser
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    service_type: String,
}

impl MdnsAdvertiser {
    /// Start an mDNS daemon advertising under [`SERVICE_TYPE`]
    pub fn new() -> DiscoveryResult<Self> {
        Self::with_service_type(SERVICE_TYPE)
    }

    pub fn with_service_type(service_type: &str) -> DiscoveryResult<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Mdns(e.to_string()))?;
        Ok(Self {
            daemon,
            service_type: service_type.to_string(),
        })
    }

    fn fullname(&self, record: &ServiceRecord) -> String {
        format!("{}.{}", record.name, self.service_type)
    }
}

impl Advertiser for MdnsAdvertiser {
    fn advertise(&self, record: &ServiceRecord) -> DiscoveryResult<()> {
        let host_name = format!(
            "{}.local.",
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "localhost".to_string())
        );

        let mut properties = HashMap::new();
        properties.insert("id".to_string(), record.service_id.clone());
        properties.insert("profile".to_string(), record.profile.to_string());

        // A host name rather than an IP lets the daemon pick interface addresses
        let ip = record
            .address
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        let info = ServiceInfo::new(
            &self.service_type,
            &record.name,
            &host_name,
            ip.as_str(),
            record.port,
            Some(properties),
        )
        .map_err(|e| DiscoveryError::Registration(e.to_string()))?;
        let info = if ip.is_empty() {
            info.enable_addr_auto()
        } else {
            info
        };

        self.daemon
            .register(info)
            .map_err(|e| DiscoveryError::Registration(e.to_string()))?;

        tracing::info!(
            "Registered service: {} on port {}",
            self.fullname(record),
            record.port
        );
        Ok(())
    }

    fn withdraw(&self, record: &ServiceRecord) -> DiscoveryResult<()> {
        let fullname = self.fullname(record);
        self.daemon
            .unregister(&fullname)
            .map_err(|e| DiscoveryError::Mdns(e.to_string()))?;
        tracing::info!("Unregistered service: {}", fullname);
        Ok(())
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!("mDNS daemon shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_record() {
        let record = ServiceRecord::new("printer", "abc-123", "10.0.0.5", 4000);
        assert_eq!(record.name, "printer");
        assert_eq!(record.service_id, "abc-123");
        assert_eq!(record.port, 4000);
        assert_eq!(record.profile, SERIAL_PORT_PROFILE);
    }

    #[test]
    fn test_noop_advertiser() {
        let record = ServiceRecord::new("svc", "id", "host", 1);
        assert!(NoopAdvertiser.advertise(&record).is_ok());
        assert!(NoopAdvertiser.withdraw(&record).is_ok());
    }
}
