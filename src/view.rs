//! Text rendering of the kiosk state.

use crate::kiosk::ViewState;
use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

pub const TITLE: &str = "QR 체크인 데모";
pub const SCANNER_CONNECTED: &str = "리더기 연결됨 ✅";
pub const SCANNER_DISCONNECTED: &str = "리더기 미연결 ❌";
pub const CONNECT_HINT: &str = "/connect 를 입력해 HID 장치를 연결하세요.";
pub const HID_UNSUPPORTED: &str = "이 시스템은 HID를 지원하지 않습니다.";
pub const SUBMIT: &str = "체크인";
pub const SUBMITTING: &str = "체크인 중...";
pub const PROMPT: &str = "QR 코드 또는 링크를 입력하세요.";
pub const FOOTER: &str = "* 창이 활성화된 상태에서 스캐너로 찍으면 자동 체크인됩니다.";

pub fn environment_info() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

fn scanner_lines(state: &ViewState) -> Vec<String> {
    if !state.hid_supported {
        return vec![HID_UNSUPPORTED.to_string()];
    }
    match (&state.scanner, state.scanner_connected) {
        (Some(device), true) => vec![format!("{} {}", SCANNER_CONNECTED, device)],
        (None, true) => vec![SCANNER_CONNECTED.to_string()],
        (_, false) => vec![SCANNER_DISCONNECTED.to_string(), CONNECT_HINT.to_string()],
    }
}

fn submit_line(state: &ViewState) -> &'static str {
    if state.loading {
        SUBMITTING
    } else {
        SUBMIT
    }
}

/// Full screen for the first paint.
pub fn render(state: &ViewState) -> String {
    let mut lines = vec![
        TITLE.to_string(),
        format!("현재 환경: {}", state.environment),
    ];
    lines.extend(scanner_lines(state));
    lines.push(PROMPT.to_string());
    lines.push(format!("[{}]", submit_line(state)));
    if let Some(message) = &state.message {
        lines.push(message.clone());
    }
    lines.push(FOOTER.to_string());

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Lines to print when moving from `prev` to `next`.
pub fn render_changes(prev: &ViewState, next: &ViewState) -> Vec<String> {
    let mut lines = Vec::new();

    let scanner = scanner_lines(next);
    if scanner != scanner_lines(prev) {
        lines.extend(scanner);
    }
    if prev.loading != next.loading {
        lines.push(format!("[{}]", submit_line(next)));
    }
    if prev.message != next.message {
        if let Some(message) = &next.message {
            lines.push(message.clone());
        }
    }

    lines
}

/// Paints the state once, then every change, until the kiosk goes away.
pub async fn run_renderer<W>(mut state: watch::Receiver<ViewState>, mut out: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut prev = state.borrow_and_update().clone();
    out.write_all(render(&prev).as_bytes()).await?;
    out.flush().await?;

    while state.changed().await.is_ok() {
        let next = state.borrow_and_update().clone();
        for line in render_changes(&prev, &next) {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
        out.flush().await?;
        prev = next;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::device;

    fn state() -> ViewState {
        ViewState {
            environment: "linux/x86_64".to_string(),
            hid_supported: true,
            ..Default::default()
        }
    }

    #[test]
    fn renders_full_screen() {
        let screen = render(&state());
        assert!(screen.starts_with(TITLE));
        assert!(screen.contains("현재 환경: linux/x86_64"));
        assert!(screen.contains(SCANNER_DISCONNECTED));
        assert!(screen.contains(CONNECT_HINT));
        assert!(screen.contains("[체크인]"));
        assert!(screen.ends_with(&format!("{}\n", FOOTER)));
    }

    #[test]
    fn connected_scanner_hides_hint() {
        let screen = render(&ViewState {
            scanner_connected: true,
            scanner: Some(device("hidraw1", "Bar Code Scanner")),
            ..state()
        });
        assert!(screen.contains(SCANNER_CONNECTED));
        assert!(screen.contains("hidraw1"));
        assert!(!screen.contains(CONNECT_HINT));
    }

    #[test]
    fn unsupported_shows_notice_only() {
        let screen = render(&ViewState {
            hid_supported: false,
            scanner_connected: true,
            ..state()
        });
        assert!(screen.contains(HID_UNSUPPORTED));
        assert!(!screen.contains(SCANNER_CONNECTED));
        assert!(!screen.contains(SCANNER_DISCONNECTED));
    }

    #[test]
    fn loading_changes_button() {
        let idle = state();
        let busy = ViewState {
            loading: true,
            ..state()
        };
        assert!(render(&busy).contains("[체크인 중...]"));
        assert_eq!(render_changes(&idle, &busy), ["[체크인 중...]"]);

        let done = ViewState {
            message: Some("Bob 님 출석 완료!".to_string()),
            ..state()
        };
        assert_eq!(
            render_changes(&busy, &done),
            ["[체크인]", "Bob 님 출석 완료!"]
        );
        assert!(render_changes(&done, &done).is_empty());
    }

    #[tokio::test]
    async fn renderer_writes_updates() {
        let (tx, rx) = watch::channel(state());
        let (mut reader, writer) = tokio::io::duplex(4096);
        let task = tokio::spawn(run_renderer(rx, writer));

        tx.send_modify(|v| v.message = Some("hello".to_string()));
        drop(tx);
        task.await.unwrap().unwrap();

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut output)
            .await
            .unwrap();
        assert!(output.starts_with(TITLE));
        assert!(output.contains("hello"));
    }
}
