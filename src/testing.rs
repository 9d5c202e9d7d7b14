//! Helpers shared by the unit tests.

use crate::config;
use crate::hid::{HidDevice, HidError, HidProvider};
use axum::Router;
use futures::future::BoxFuture;
use std::sync::Mutex;
use tokio::net::TcpListener;
use url::Url;

/// Serves `router` on an ephemeral local port and returns its base url.
pub async fn spawn_backend(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    Url::parse(&format!("http://{}/", addr)).unwrap()
}

/// A local url nothing listens on.
pub async fn closed_port_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{}/", addr)).unwrap()
}

pub fn backend_config(base_url: Url) -> config::Backend {
    config::Backend {
        base_url,
        user_agent: "qr-checkin-test".to_string(),
    }
}

/// In-memory HID provider.
pub struct FakeHid {
    supported: bool,
    devices: Mutex<Vec<HidDevice>>,
    request: Mutex<RequestOutcome>,
}

#[derive(Clone)]
pub enum RequestOutcome {
    Grant(HidDevice),
    Deny,
    Nothing,
}

impl FakeHid {
    pub fn with_devices(devices: Vec<HidDevice>) -> Self {
        FakeHid {
            supported: true,
            devices: Mutex::new(devices),
            request: Mutex::new(RequestOutcome::Nothing),
        }
    }

    pub fn unsupported() -> Self {
        FakeHid {
            supported: false,
            ..FakeHid::with_devices(vec![])
        }
    }

    pub fn set_devices(&self, devices: Vec<HidDevice>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_request(&self, outcome: RequestOutcome) {
        *self.request.lock().unwrap() = outcome;
    }
}

impl HidProvider for FakeHid {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn devices(&self) -> BoxFuture<'_, Result<Vec<HidDevice>, HidError>> {
        let result = if self.supported {
            Ok(self.devices.lock().unwrap().clone())
        } else {
            Err(HidError::Unsupported)
        };
        Box::pin(async move { result })
    }

    fn request_device<'a>(
        &'a self,
        _filter: &'a str,
    ) -> BoxFuture<'a, Result<Option<HidDevice>, HidError>> {
        let outcome = self.request.lock().unwrap().clone();
        Box::pin(async move {
            match outcome {
                RequestOutcome::Grant(device) => Ok(Some(device)),
                RequestOutcome::Deny => Err(HidError::PermissionDenied("/dev/hidraw9".into())),
                RequestOutcome::Nothing => Ok(None),
            }
        })
    }
}

pub fn device(node: &str, product_name: &str) -> HidDevice {
    HidDevice {
        node: node.to_string(),
        product_name: product_name.to_string(),
        vendor_id: 0x0c2e,
        product_id: 0x0b61,
    }
}
