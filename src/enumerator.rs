//! Device discovery: thin wrapper over `host:devices` (spec §6).

use crate::error::Result;
use crate::host_adb::ServiceConnector;

/// Queries the host ADB server for the current device list. No caching,
/// retry, or change notification: every call is a fresh `host:devices`
/// round trip, matching the reference's one-shot enumeration at startup
/// (spec §1 non-goals: no persistence, no cross-host discovery).
pub async fn enumerate_devices<C: ServiceConnector>(connector: &C) -> Result<Vec<String>> {
    connector.list_devices().await
}
