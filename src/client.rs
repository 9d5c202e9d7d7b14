use crate::attendance::{CheckRequest, CheckResult, ErrorBody, QrCode};
use crate::config;
use crate::time_trace::TimeTrace;
use anyhow::Result;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest_tracing::TracingMiddleware;
use thiserror::Error;
use tracing::{debug, instrument, trace};
use url::Url;

const CHECK_PATH: &str = "attendance/check";
const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Error)]
pub enum CheckError {
    /// The backend answered with a non-success status.
    #[error("{detail} (HTTP {status})")]
    Rejected { status: StatusCode, detail: String },

    /// The backend could not be reached at all.
    #[error("backend unreachable: {0}")]
    Offline(#[source] reqwest_middleware::Error),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest_middleware::Error),

    #[error("malformed response body: {0}")]
    Decode(#[source] reqwest::Error),
}

impl CheckError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CheckError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_transport(e: reqwest_middleware::Error) -> Self {
        match &e {
            reqwest_middleware::Error::Reqwest(re) if re.is_connect() || re.is_timeout() => {
                CheckError::Offline(e)
            }
            _ => CheckError::Transport(e),
        }
    }
}

/// Anything that can check a code in. The kiosk only talks to the backend through this.
pub trait CheckIn: Send + Sync {
    fn check<'a>(&'a self, code: &'a QrCode) -> BoxFuture<'a, Result<CheckResult, CheckError>>;
}

pub struct AttendanceClient {
    reqwest: reqwest_middleware::ClientWithMiddleware,
    check_url: Url,
}

impl AttendanceClient {
    pub fn new(config: &config::Backend) -> Result<Self> {
        Ok(AttendanceClient {
            reqwest: reqwest_middleware::ClientBuilder::new(
                reqwest::ClientBuilder::new()
                    .user_agent(config.user_agent.as_str())
                    .build()?,
            )
            .with(TracingMiddleware::<TimeTrace>::new())
            .build(),
            check_url: config.endpoint(CHECK_PATH)?,
        })
    }

    /// Posts the code once. No retries, no timeout.
    #[instrument(skip_all, fields(qr_code = %code))]
    pub async fn check_attendance(&self, code: &QrCode) -> Result<CheckResult, CheckError> {
        trace!("Checking in {} at {}...", code, self.check_url);

        let rq = CheckRequest {
            qr_code: code.as_str(),
        };

        let res = self
            .reqwest
            .post(self.check_url.clone())
            .json(&rq)
            .send()
            .await
            .map_err(CheckError::from_transport)?;

        let status = res.status();
        if !status.is_success() {
            let detail = match res.json::<ErrorBody>().await {
                Ok(body) => body.detail,
                Err(e) => {
                    debug!("Error body is not JSON: {}", e);
                    None
                }
            };
            return Err(CheckError::Rejected {
                status,
                detail: detail.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            });
        }

        res.json::<CheckResult>().await.map_err(CheckError::Decode)
    }
}

impl CheckIn for AttendanceClient {
    fn check<'a>(&'a self, code: &'a QrCode) -> BoxFuture<'a, Result<CheckResult, CheckError>> {
        Box::pin(self.check_attendance(code))
    }
}
