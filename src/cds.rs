pub mod transfer;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use directories::BaseDirs;
use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ApiSection;
use crate::error::FetchError;
use crate::grid::ArchiveRequest;

pub use transfer::StreamTransfer;

const POLL_START: Duration = Duration::from_secs(1);
const POLL_MAX: Duration = Duration::from_secs(120);
const POLL_GROWTH: f64 = 1.5;

pub trait ArchiveClient: Send + Sync {
    fn retrieve(
        &self,
        dataset: &str,
        request: &ArchiveRequest,
        target: &Path,
    ) -> Result<(), FetchError>;
}

pub trait Transfer: Send + Sync {
    fn source(&self) -> &str;

    fn download(&self, url: &str, size: u64, target: &Path) -> Result<(), FetchError>;
}

pub trait TransferHook {
    fn transfer_source(&self) -> &str;
    fn verifies_certificates(&self) -> bool;
    fn replace_transfer(&mut self, transfer: Box<dyn Transfer>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub url: String,
    pub key: String,
    pub verify: bool,
}

impl Credentials {
    pub fn resolve(api: Option<&ApiSection>) -> Result<Self, FetchError> {
        if let Some(api) = api {
            return Self::new(api.url.clone(), api.key.clone(), true);
        }

        if let (Ok(url), Ok(key)) = (std::env::var("CDSAPI_URL"), std::env::var("CDSAPI_KEY")) {
            return Self::new(url, key, true);
        }

        let rc_path = match std::env::var_os("CDSAPI_RC") {
            Some(path) => PathBuf::from(path),
            None => BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".cdsapirc"))
                .ok_or(FetchError::MissingCredentials)?,
        };
        if !rc_path.exists() {
            return Err(FetchError::MissingCredentials);
        }
        let content = fs::read_to_string(&rc_path)
            .map_err(|err| FetchError::Filesystem(format!("read {}: {err}", rc_path.display())))?;
        Self::from_rc_str(&content)
    }

    pub fn from_rc_str(content: &str) -> Result<Self, FetchError> {
        let line_re = Regex::new(r"^\s*(\w+)\s*:\s*(.*?)\s*$")
            .map_err(|err| FetchError::InvalidCredentials(err.to_string()))?;

        let mut url = None;
        let mut key = None;
        let mut verify = true;
        for line in content.lines() {
            let Some(caps) = line_re.captures(line) else {
                continue;
            };
            let value = caps[2].to_string();
            match &caps[1] {
                "url" => url = Some(value),
                "key" => key = Some(value),
                "verify" => verify = value != "0",
                _ => {}
            }
        }

        match (url, key) {
            (Some(url), Some(key)) => Self::new(url, key, verify),
            _ => Err(FetchError::MissingCredentials),
        }
    }

    fn new(url: String, key: String, verify: bool) -> Result<Self, FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::InvalidCredentials("empty url".to_string()));
        }
        if !key.contains(':') {
            return Err(FetchError::InvalidCredentials(
                "key must have the form UID:API-KEY".to_string(),
            ));
        }
        Ok(Self {
            url: url.trim().trim_end_matches('/').to_string(),
            key: key.trim().to_string(),
            verify,
        })
    }

    fn basic_auth(&self) -> (&str, &str) {
        self.key.split_once(':').unwrap_or((self.key.as_str(), ""))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskReply {
    pub state: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub error: Option<TaskReplyError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskReplyError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl TaskReply {
    fn failure_message(&self) -> String {
        let error = self.error.as_ref();
        let message = error
            .and_then(|err| err.message.as_deref())
            .unwrap_or("unknown error");
        let reason = error
            .and_then(|err| err.reason.as_deref())
            .unwrap_or("no reason given");
        format!("{message}. {reason}.")
    }
}

pub struct CdsHttpClient {
    client: Client,
    credentials: Credentials,
    transfer: Box<dyn Transfer>,
}

impl CdsHttpClient {
    pub fn new(credentials: Credentials) -> Result<Self, FetchError> {
        let client = Client::builder()
            .default_headers(user_agent_headers()?)
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(!credentials.verify)
            .build()
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?;
        let transfer = StreamTransfer::new(credentials.verify)?;
        Ok(Self {
            client,
            credentials,
            transfer: Box::new(transfer),
        })
    }

    fn resource_url(&self, dataset: &str) -> String {
        format!("{}/resources/{}", self.credentials.url, dataset)
    }

    fn task_url(&self, request_id: &str) -> String {
        format!("{}/tasks/{}", self.credentials.url, request_id)
    }

    fn submit(&self, dataset: &str, request: &ArchiveRequest) -> Result<TaskReply, FetchError> {
        let (user, password) = self.credentials.basic_auth();
        let response = self
            .client
            .post(self.resource_url(dataset))
            .basic_auth(user, Some(password))
            .json(request)
            .send()
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?;
        parse_reply(handle_status(response)?)
    }

    fn status(&self, request_id: &str) -> Result<TaskReply, FetchError> {
        let (user, password) = self.credentials.basic_auth();
        let response = self
            .client
            .get(self.task_url(request_id))
            .basic_auth(user, Some(password))
            .send()
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?;
        parse_reply(handle_status(response)?)
    }

    fn wait_until_complete(&self, mut reply: TaskReply) -> Result<TaskReply, FetchError> {
        let mut delay = POLL_START;
        loop {
            let request_id = reply.request_id.clone().unwrap_or_default();
            match reply.state.as_str() {
                "completed" => return Ok(reply),
                "queued" | "running" => {
                    if request_id.is_empty() {
                        return Err(FetchError::UnexpectedReply(
                            "pending task without request_id".to_string(),
                        ));
                    }
                    debug!(request_id = %request_id, state = %reply.state, "waiting for CDS task");
                    thread::sleep(delay);
                    delay = delay.mul_f64(POLL_GROWTH).min(POLL_MAX);
                    reply = self.status(&request_id)?;
                }
                "failed" => {
                    return Err(FetchError::RemoteFailed {
                        request_id,
                        message: reply.failure_message(),
                    });
                }
                other => {
                    return Err(FetchError::UnexpectedReply(format!("state {other}")));
                }
            }
        }
    }

    fn result_url(&self, location: &str) -> Result<String, FetchError> {
        let base = Url::parse(&format!("{}/", self.credentials.url))
            .map_err(|err| FetchError::InvalidCredentials(err.to_string()))?;
        base.join(location)
            .map(|url| url.to_string())
            .map_err(|err| FetchError::UnexpectedReply(format!("location {location}: {err}")))
    }
}

impl ArchiveClient for CdsHttpClient {
    fn retrieve(
        &self,
        dataset: &str,
        request: &ArchiveRequest,
        target: &Path,
    ) -> Result<(), FetchError> {
        let reply = self.submit(dataset, request)?;
        let reply = self.wait_until_complete(reply)?;
        let location = reply
            .location
            .as_deref()
            .ok_or_else(|| FetchError::UnexpectedReply("completed without location".to_string()))?;
        let size = reply.content_length.ok_or_else(|| {
            FetchError::UnexpectedReply("completed without content_length".to_string())
        })?;
        let url = self.result_url(location)?;
        info!(url = %url, target = %target.display(), size, "CDS result ready");
        self.transfer.download(&url, size, target)
    }
}

impl TransferHook for CdsHttpClient {
    fn transfer_source(&self) -> &str {
        self.transfer.source()
    }

    fn verifies_certificates(&self) -> bool {
        self.credentials.verify
    }

    fn replace_transfer(&mut self, transfer: Box<dyn Transfer>) {
        self.transfer = transfer;
    }
}

pub(crate) fn user_agent_headers() -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("era5-fetch/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?,
    );
    Ok(headers)
}

pub(crate) fn handle_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, FetchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "CDS request failed".to_string());
    Err(FetchError::CdsStatus { status, message })
}

fn parse_reply(response: reqwest::blocking::Response) -> Result<TaskReply, FetchError> {
    response
        .json::<TaskReply>()
        .map_err(|err| FetchError::UnexpectedReply(err.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_rc_file() {
        let rc = "url: https://cds.climate.copernicus.eu/api/v2/\nkey: 1234:abcd-ef\nverify: 0\n";
        let creds = Credentials::from_rc_str(rc).unwrap();
        assert_eq!(creds.url, "https://cds.climate.copernicus.eu/api/v2");
        assert_eq!(creds.basic_auth(), ("1234", "abcd-ef"));
        assert!(!creds.verify);
    }

    #[test]
    fn rc_file_without_key_is_missing() {
        let err = Credentials::from_rc_str("url: https://example.org\n").unwrap_err();
        assert_matches!(err, FetchError::MissingCredentials);
    }

    #[test]
    fn key_without_uid_is_rejected() {
        let err = Credentials::from_rc_str("url: https://example.org\nkey: abcdef\n").unwrap_err();
        assert_matches!(err, FetchError::InvalidCredentials(_));
    }

    #[test]
    fn failed_reply_message() {
        let reply: TaskReply = serde_json::from_str(
            r#"{"state": "failed", "request_id": "r1",
                "error": {"message": "the request you have submitted is not valid",
                          "reason": "Mars server task finished in error"}}"#,
        )
        .unwrap();
        assert_eq!(
            reply.failure_message(),
            "the request you have submitted is not valid. Mars server task finished in error."
        );
    }

    #[test]
    fn completed_reply_fields() {
        let reply: TaskReply = serde_json::from_str(
            r#"{"state": "completed", "request_id": "r2",
                "location": "https://download.example.org/cache/r2.nc",
                "content_length": 4096}"#,
        )
        .unwrap();
        assert_eq!(reply.content_length, Some(4096));
        assert_eq!(
            reply.location.as_deref(),
            Some("https://download.example.org/cache/r2.nc")
        );
    }
}
