//! In-memory stand-in for [`crate::host_adb::ServiceConnector`], the same
//! role `aim`'s `MockAdb` plays for `AdbOperations`: lets dispatch logic be
//! exercised without a real host ADB server.

use crate::error::{AdbProxyError, Result, ServicePhase};
use crate::host_adb::ServiceConnector;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::Mutex;

pub struct MockServiceConnector {
    devices: Vec<String>,
    services: Mutex<HashMap<String, DuplexStream>>,
    fail_services: Vec<String>,
}

impl MockServiceConnector {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            services: Mutex::new(HashMap::new()),
            fail_services: Vec::new(),
        }
    }

    pub fn with_devices(mut self, devices: Vec<String>) -> Self {
        self.devices = devices;
        self
    }

    /// Makes `service` resolvable by a later `open_service` call, and
    /// returns the "device side" half of the duplex pair for the test to
    /// drive directly.
    pub async fn register_service(&self, service: &str) -> DuplexStream {
        let (ours, theirs) = duplex(8192);
        self.services.lock().await.insert(service.to_string(), ours);
        theirs
    }

    /// Makes `open_service` fail for `service` instead of looking it up,
    /// simulating a host ADB server that rejects the request (e.g. no
    /// such service, or `device offline`).
    pub fn fail_service(mut self, service: &str) -> Self {
        self.fail_services.push(service.to_string());
        self
    }
}

impl Default for MockServiceConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceConnector for MockServiceConnector {
    type Stream = DuplexStream;

    async fn open_service(&self, _device_id: &str, service: &str) -> Result<DuplexStream> {
        if self.fail_services.iter().any(|s| s == service) {
            return Err(AdbProxyError::Service {
                phase: ServicePhase::Service,
                message: format!("service rejected: {}", service),
            });
        }

        self.services
            .lock()
            .await
            .remove(service)
            .ok_or_else(|| AdbProxyError::Service {
                phase: ServicePhase::Service,
                message: format!("no registered stream for service: {}", service),
            })
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.devices.clone())
    }
}
