use crate::attendance::QrCode;
use crate::client::{CheckError, CheckIn};
use crate::hid::{DeviceWatch, HidDevice, HidEvent, HidProvider};
use crate::view;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

pub const INVALID_CODE: &str = "유효하지 않은 QR 코드입니다.";
pub const NOT_REGISTERED: &str = "등록되지 않은 QR 코드입니다.";
pub const ALREADY_CHECKED_IN: &str = "이미 체크인된 QR 코드입니다.";
pub const SERVER_ERROR: &str = "서버 오류가 발생했습니다. 잠시 후 다시 시도해주세요.";
pub const CHECK_CONNECTION: &str = "인터넷 연결을 확인해주세요.";
pub const CHECK_IN_FAILED: &str = "체크인 실패";

pub const DEVICE_CONNECTED: &str = "HID 장치가 연결되었습니다.";
pub const DEVICE_DISCONNECTED: &str = "HID 장치가 연결 해제되었습니다.";
pub const DEVICE_CONNECT_FAILED: &str = "HID 장치 연결에 실패했습니다.";
pub const NO_DEVICES: &str = "연결된 HID 장치가 없습니다.";
pub const UNKNOWN_COMMAND: &str = "알 수 없는 명령입니다. /help 를 입력하세요.";

pub const HELP: &str = "QR 코드를 스캔하거나 입력한 뒤 Enter 를 누르세요.\n\
/connect  HID 장치 연결하기\n\
/devices  HID 장치 목록\n\
/help     도움말\n\
/quit     종료";

pub fn checked_in(name: &str) -> String {
    format!("{} 님 출석 완료!", name)
}

/// The status line shown for a failed check.
pub fn failure_message(err: &CheckError) -> &'static str {
    if let CheckError::Offline(_) = err {
        return CHECK_CONNECTION;
    }
    match err.status() {
        Some(StatusCode::NOT_FOUND) => NOT_REGISTERED,
        Some(StatusCode::BAD_REQUEST) => ALREADY_CHECKED_IN,
        Some(StatusCode::INTERNAL_SERVER_ERROR) => SERVER_ERROR,
        _ => CHECK_IN_FAILED,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub environment: String,
    pub hid_supported: bool,
    pub scanner_connected: bool,
    pub scanner: Option<HidDevice>,
    pub input: String,
    /// Set while a check is in flight; input is locked meanwhile.
    pub loading: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Connect,
    Devices,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// Lines starting with `/` are commands. Codes can never contain `/`.
    fn parse(line: &str) -> Option<Command> {
        let rest = line.trim().strip_prefix('/')?;
        Some(match rest.to_lowercase().as_str() {
            "connect" => Command::Connect,
            "devices" => Command::Devices,
            "help" => Command::Help,
            "quit" => Command::Quit,
            _ => Command::Unknown(rest.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Device listeners acquired by [`Kiosk::mount`]. Dropping it releases them.
pub struct Session {
    _watch: Option<DeviceWatch>,
    hid_events: mpsc::Receiver<HidEvent>,
    hid_open: bool,
}

pub struct Kiosk<C: ?Sized, H: ?Sized> {
    checker: Arc<C>,
    hid: Arc<H>,
    product_filter: String,
    view: watch::Sender<ViewState>,
}

impl<C, H> Kiosk<C, H>
where
    C: CheckIn + ?Sized,
    H: HidProvider + ?Sized + 'static,
{
    pub fn new(checker: Arc<C>, hid: Arc<H>, product_filter: impl Into<String>) -> Self {
        let (view, _) = watch::channel(ViewState {
            environment: view::environment_info(),
            ..Default::default()
        });
        Kiosk {
            checker,
            hid,
            product_filter: product_filter.into(),
            view,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view.subscribe()
    }

    #[cfg(test)]
    pub fn state(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// Detects HID support, probes for a scanner once and starts watching for devices.
    pub async fn mount(&self, poll_interval: Duration) -> Session {
        let supported = self.hid.is_supported();
        self.view.send_modify(|v| v.hid_supported = supported);

        let (tx, hid_events) = mpsc::channel(16);
        if !supported {
            info!("HID is not supported here, scanner status will not be shown");
            return Session {
                _watch: None,
                hid_events,
                hid_open: false,
            };
        }

        self.probe().await;
        Session {
            _watch: Some(DeviceWatch::spawn(self.hid.clone(), poll_interval, tx)),
            hid_events,
            hid_open: true,
        }
    }

    /// Processes input lines and device events until `/quit` or end of input.
    pub async fn run(&self, lines: &mut mpsc::Receiver<String>, session: &mut Session) {
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        if self.handle_line(&line, lines, session).await == Flow::Quit {
                            info!("Quit requested");
                            return;
                        }
                    }
                    None => {
                        info!("Input closed");
                        return;
                    }
                },
                event = session.hid_events.recv(), if session.hid_open => match event {
                    Some(event) => self.on_hid_event(event).await,
                    None => session.hid_open = false,
                },
            }
        }
    }

    async fn handle_line(
        &self,
        line: &str,
        lines: &mut mpsc::Receiver<String>,
        session: &mut Session,
    ) -> Flow {
        match Command::parse(line) {
            Some(Command::Quit) => return Flow::Quit,
            Some(Command::Connect) => self.connect().await,
            Some(Command::Devices) => self.list_devices().await,
            Some(Command::Help) => self.set_message(HELP),
            Some(Command::Unknown(name)) => {
                debug!("Unknown command {:?}", name);
                self.set_message(UNKNOWN_COMMAND);
            }
            None => {
                self.view.send_modify(|v| v.input = line.trim().to_string());
                self.submit(line, lines, session).await;
            }
        }
        Flow::Continue
    }

    /// Validates and checks in one code.
    ///
    /// While the request is pending, further input lines are dropped and device events are
    /// still handled.
    #[instrument(skip(self, lines, session))]
    async fn submit(&self, raw: &str, lines: &mut mpsc::Receiver<String>, session: &mut Session) {
        let code = match QrCode::parse(raw) {
            Ok(code) => code,
            Err(e) => {
                debug!("{}", e);
                self.set_message(INVALID_CODE);
                return;
            }
        };

        self.view.send_modify(|v| {
            v.loading = true;
            v.message = None;
        });

        let mut lines_open = true;
        let mut request = self.checker.check(&code);
        let result = loop {
            tokio::select! {
                result = &mut request => break result,
                line = lines.recv(), if lines_open => match line {
                    Some(line) => warn!("Input is locked while checking in, dropping {:?}", line),
                    None => lines_open = false,
                },
                event = session.hid_events.recv(), if session.hid_open => match event {
                    Some(event) => self.on_hid_event(event).await,
                    None => session.hid_open = false,
                },
            }
        };

        match &result {
            Ok(res) => info!("Checked in {} as {} ({})", code, res.name, res.status),
            Err(e) => warn!("Check-in of {} failed: {}", code, e),
        }

        self.view.send_modify(|v| {
            v.loading = false;
            match result {
                Ok(res) => {
                    v.message = Some(checked_in(&res.name));
                    v.input.clear();
                }
                Err(e) => v.message = Some(failure_message(&e).to_string()),
            }
        });
    }

    /// Marks the scanner connected iff a visible device matches the product filter.
    async fn probe(&self) {
        if !self.hid.is_supported() {
            return;
        }

        match self.hid.devices().await {
            Ok(devices) => {
                let found = devices
                    .into_iter()
                    .find(|d| d.matches(&self.product_filter));
                debug!("Scanner probe: {:?}", found);
                self.view.send_modify(|v| {
                    v.scanner_connected = found.is_some();
                    v.scanner = found;
                });
            }
            Err(e) => warn!("HID probe failed: {}", e),
        }
    }

    async fn on_hid_event(&self, event: HidEvent) {
        self.probe().await;
        match event {
            HidEvent::Connected(device) => {
                info!("HID device connected: {}", device);
                self.set_message(DEVICE_CONNECTED);
            }
            HidEvent::Disconnected(device) => {
                info!("HID device disconnected: {}", device);
                self.set_message(DEVICE_DISCONNECTED);
            }
        }
    }

    async fn connect(&self) {
        match self.hid.request_device(&self.product_filter).await {
            Ok(Some(device)) => {
                info!("Using HID device {}", device);
                self.view.send_modify(|v| {
                    v.scanner_connected = true;
                    v.scanner = Some(device);
                    v.message = Some(DEVICE_CONNECTED.to_string());
                });
            }
            Ok(None) => info!("No HID device available"),
            Err(e) => {
                warn!("Requesting HID device failed: {}", e);
                self.set_message(DEVICE_CONNECT_FAILED);
            }
        }
    }

    async fn list_devices(&self) {
        if !self.hid.is_supported() {
            self.set_message(view::HID_UNSUPPORTED);
            return;
        }

        match self.hid.devices().await {
            Ok(devices) if devices.is_empty() => self.set_message(NO_DEVICES),
            Ok(devices) => {
                let listing = devices
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                self.set_message(&listing);
            }
            Err(e) => {
                warn!("Listing HID devices failed: {}", e);
                self.set_message(DEVICE_CONNECT_FAILED);
            }
        }
    }

    fn set_message(&self, message: &str) {
        self.view
            .send_modify(|v| v.message = Some(message.to_string()));
    }
}
