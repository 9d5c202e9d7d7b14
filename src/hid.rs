//! Scanner presence detection.
//!
//! A barcode scanner types into the kiosk like a keyboard, so nothing here reads from the
//! device. The providers only answer "which HID devices are plugged in" and "may we use one",
//! which is enough to show whether a scanner is attached.

use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt::Display;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HidDevice {
    /// Kernel node name, e.g. `hidraw0`.
    pub node: String,
    pub product_name: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl HidDevice {
    /// Case-insensitive substring match on the product name.
    pub fn matches(&self, filter: &str) -> bool {
        self.product_name
            .to_lowercase()
            .contains(&filter.to_lowercase())
    }
}

impl Display for HidDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] ({})",
            self.product_name, self.vendor_id, self.product_id, self.node
        )
    }
}

#[derive(Debug, Error)]
pub enum HidError {
    #[error("HID is not supported on this system")]
    Unsupported,

    #[error("reading {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("access to {0} denied")]
    PermissionDenied(Utf8PathBuf),
}

pub trait HidProvider: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Devices currently visible.
    fn devices(&self) -> BoxFuture<'_, Result<Vec<HidDevice>, HidError>>;

    /// Picks a device the kiosk may use, preferring ones matching `filter`.
    fn request_device<'a>(
        &'a self,
        filter: &'a str,
    ) -> BoxFuture<'a, Result<Option<HidDevice>, HidError>>;
}

/// Provider for systems without HID access.
pub struct NoHid;

impl HidProvider for NoHid {
    fn is_supported(&self) -> bool {
        false
    }

    fn devices(&self) -> BoxFuture<'_, Result<Vec<HidDevice>, HidError>> {
        Box::pin(async { Err(HidError::Unsupported) })
    }

    fn request_device<'a>(
        &'a self,
        _filter: &'a str,
    ) -> BoxFuture<'a, Result<Option<HidDevice>, HidError>> {
        Box::pin(async { Err(HidError::Unsupported) })
    }
}

/// Linux hidraw enumeration through sysfs.
pub struct SysfsHid {
    sysfs_root: Utf8PathBuf,
    dev_root: Utf8PathBuf,
}

impl SysfsHid {
    pub fn new(sysfs_root: impl Into<Utf8PathBuf>, dev_root: impl Into<Utf8PathBuf>) -> Self {
        SysfsHid {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    async fn list(&self) -> Result<Vec<HidDevice>, HidError> {
        let io_err = |path: &Utf8Path| {
            let path = path.to_owned();
            move |source: std::io::Error| HidError::Io { path, source }
        };

        let mut entries = tokio::fs::read_dir(&self.sysfs_root)
            .await
            .map_err(io_err(&self.sysfs_root))?;

        let mut devices = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_err(&self.sysfs_root))?
        {
            let node = match entry.file_name().into_string() {
                Ok(node) => node,
                Err(name) => {
                    debug!("Skipping non-utf8 hidraw entry {:?}", name);
                    continue;
                }
            };
            let uevent = self.sysfs_root.join(&node).join("device").join("uevent");
            match tokio::fs::read_to_string(&uevent).await {
                Ok(contents) => match parse_uevent(&node, &contents) {
                    Some(device) => devices.push(device),
                    None => debug!("Unrecognized uevent at {}", uevent),
                },
                Err(e) => debug!("Cannot read {}: {}", uevent, e),
            }
        }

        devices.sort_by(|a, b| a.node.cmp(&b.node));
        Ok(devices)
    }

    async fn pick(&self, filter: &str) -> Result<Option<HidDevice>, HidError> {
        let (mut candidates, others): (Vec<_>, Vec<_>) =
            self.list().await?.into_iter().partition(|d| d.matches(filter));
        candidates.extend(others);

        let mut denied = None;
        for device in candidates {
            let path = self.dev_root.join(&device.node);
            match tokio::fs::File::open(&path).await {
                Ok(_) => {
                    trace!("Opened {}", path);
                    return Ok(Some(device));
                }
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    warn!("No permission to open {}", path);
                    denied.get_or_insert(path);
                }
                Err(e) => debug!("Cannot open {}: {}", path, e),
            }
        }

        match denied {
            Some(path) => Err(HidError::PermissionDenied(path)),
            None => Ok(None),
        }
    }
}

impl HidProvider for SysfsHid {
    fn is_supported(&self) -> bool {
        self.sysfs_root.is_dir()
    }

    fn devices(&self) -> BoxFuture<'_, Result<Vec<HidDevice>, HidError>> {
        Box::pin(self.list())
    }

    fn request_device<'a>(
        &'a self,
        filter: &'a str,
    ) -> BoxFuture<'a, Result<Option<HidDevice>, HidError>> {
        Box::pin(self.pick(filter))
    }
}

fn parse_uevent(node: &str, contents: &str) -> Option<HidDevice> {
    let mut name = None;
    let mut id = None;
    for line in contents.lines() {
        match line.split_once('=') {
            Some(("HID_NAME", value)) => name = Some(value.trim().to_string()),
            Some(("HID_ID", value)) => id = Some(value.trim()),
            _ => {}
        }
    }

    // HID_ID is `bus:vendor:product`, each in hex
    let mut parts = id?.split(':').skip(1);
    let vendor_id = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product_id = u32::from_str_radix(parts.next()?, 16).ok()?;

    Some(HidDevice {
        node: node.to_string(),
        product_name: name?,
        vendor_id: u16::try_from(vendor_id).ok()?,
        product_id: u16::try_from(product_id).ok()?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidEvent {
    Connected(HidDevice),
    Disconnected(HidDevice),
}

/// Polls a provider and reports devices coming and going.
///
/// The watcher runs for as long as this guard lives.
pub struct DeviceWatch {
    task: JoinHandle<()>,
}

impl DeviceWatch {
    pub fn spawn<H>(provider: Arc<H>, interval: Duration, events: mpsc::Sender<HidEvent>) -> Self
    where
        H: HidProvider + ?Sized + 'static,
    {
        let task = tokio::spawn(async move {
            let mut known: HashSet<HidDevice> = match provider.devices().await {
                Ok(devices) => devices.into_iter().collect(),
                Err(e) => {
                    warn!("Initial HID enumeration failed: {}", e);
                    HashSet::new()
                }
            };

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let current: HashSet<HidDevice> = match provider.devices().await {
                    Ok(devices) => devices.into_iter().collect(),
                    Err(e) => {
                        debug!("HID enumeration failed: {}", e);
                        continue;
                    }
                };

                let removed = known.difference(&current).cloned().map(HidEvent::Disconnected);
                let added = current.difference(&known).cloned().map(HidEvent::Connected);
                for event in removed.chain(added).collect::<Vec<_>>() {
                    trace!("HID event: {:?}", event);
                    if events.send(event).await.is_err() {
                        return;
                    }
                }

                known = current;
            }
        });

        DeviceWatch { task }
    }
}

impl Drop for DeviceWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
