//! Chromecast device discovery via mDNS.
//!
//! Chromecast devices advertise themselves on the `_googlecast._tcp.local`
//! service. Discovery browses that service until a device whose friendly
//! name matches the configured one answers, or the timeout elapses.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use futures_util::{pin_mut, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::errors::{Result, SponsorError};

/// mDNS service advertised by Cast devices.
pub const SERVICE_NAME: &str = "_googlecast._tcp.local";

/// Default Chromecast port.
pub const DEFAULT_CHROMECAST_PORT: u16 = 8009;

/// Default time spent browsing before giving up.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between mDNS queries while browsing.
const QUERY_INTERVAL: Duration = Duration::from_secs(2);

/// Address and identity of a discovered Chromecast.
#[derive(Clone, Debug, PartialEq)]
pub struct ChromecastInfo {
    pub friendly_name: String,
    pub host: String,
    pub port: u16,
    pub uuid: String,
    pub model: Option<String>,
}

impl ChromecastInfo {
    pub fn new(friendly_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            friendly_name: friendly_name.into(),
            uuid: format!("chromecast-{}-{}", host, port),
            host,
            port,
            model: None,
        }
    }

    /// Case-insensitive comparison with a configured device name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.friendly_name.trim().eq_ignore_ascii_case(name.trim())
    }
}

/// Records of one mDNS response that matter for Cast devices.
#[derive(Clone, Debug, Default)]
pub struct MdnsRecords {
    pub service_name: Option<String>,
    pub addresses: Vec<IpAddr>,
    pub port: Option<u16>,
    /// Raw `key=value` TXT strings.
    pub txt: Vec<String>,
}

impl MdnsRecords {
    pub fn from_response(response: &mdns::Response) -> Self {
        let mut records = MdnsRecords::default();

        for record in response.records() {
            match record.kind {
                mdns::RecordKind::PTR(ref name) => {
                    if records.service_name.is_none() {
                        records.service_name = Some(name.clone());
                    }
                }
                mdns::RecordKind::A(addr) => records.addresses.push(IpAddr::V4(addr)),
                mdns::RecordKind::AAAA(addr) => records.addresses.push(IpAddr::V6(addr)),
                mdns::RecordKind::SRV { port, .. } => {
                    if records.port.is_none() {
                        records.port = Some(port);
                    }
                }
                mdns::RecordKind::TXT(ref data) => records.txt.extend(data.iter().cloned()),
                _ => {}
            }
        }

        records
    }

    fn txt_map(&self) -> HashMap<String, String> {
        self.txt
            .iter()
            .filter_map(|entry| {
                let (key, value) = entry.split_once('=')?;
                Some((key.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Builds the device description, or `None` when the response lacks a
    /// service name or an address.
    pub fn to_info(&self) -> Option<ChromecastInfo> {
        let service_name = self.service_name.as_ref()?;

        // IPv4 d'abord
        let host = self
            .addresses
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| self.addresses.first())?
            .to_string();

        let port = self.port.unwrap_or(DEFAULT_CHROMECAST_PORT);
        let txt = self.txt_map();

        let friendly_name = txt
            .get("fn")
            .cloned()
            .unwrap_or_else(|| friendly_name_from_service(service_name));

        let uuid = txt
            .get("id")
            .cloned()
            .unwrap_or_else(|| format!("chromecast-{}-{}", host, port));

        Some(ChromecastInfo {
            friendly_name,
            host,
            port,
            uuid,
            model: txt.get("md").cloned(),
        })
    }
}

/// Extracts a readable name from `Name-<32 hex uuid>._googlecast._tcp.local`.
fn friendly_name_from_service(service_name: &str) -> String {
    service_name
        .split("._googlecast._tcp.local")
        .next()
        .unwrap_or("Unknown Chromecast")
        .split('-')
        .take_while(|part| part.len() != 32)
        .collect::<Vec<_>>()
        .join("-")
        .trim()
        .to_string()
}

/// Browses the local network for the Chromecast called `friendly_name`.
///
/// Returns [`SponsorError::DeviceNotFound`] once `timeout` elapsed without a
/// matching answer.
pub fn find_device(friendly_name: &str, timeout: Duration) -> Result<ChromecastInfo> {
    info!(device = friendly_name, timeout_secs = timeout.as_secs(), "Searching Chromecast");

    let found = async_std::task::block_on(async {
        let discovery = mdns::discover::all(SERVICE_NAME, QUERY_INTERVAL)
            .map_err(|e| SponsorError::discovery(format!("mDNS browse failed: {}", e)))?;
        let stream = discovery.listen();
        pin_mut!(stream);

        let search = async {
            while let Some(response) = stream.next().await {
                match response {
                    Ok(response) => {
                        let Some(info) = MdnsRecords::from_response(&response).to_info() else {
                            continue;
                        };
                        debug!(
                            "Discovered Chromecast: {} at {}:{} (UUID: {}, Model: {:?})",
                            info.friendly_name, info.host, info.port, info.uuid, info.model
                        );
                        if info.matches_name(friendly_name) {
                            return Some(info);
                        }
                    }
                    Err(e) => warn!("mDNS response error: {}", e),
                }
            }
            None
        };

        Ok::<_, SponsorError>(async_std::future::timeout(timeout, search).await.ok().flatten())
    })?;

    match found {
        Some(info) => {
            info!(device = %info.friendly_name, host = %info.host, port = info.port, "Chromecast found");
            Ok(info)
        }
        None => Err(SponsorError::DeviceNotFound(friendly_name.to_string())),
    }
}
