use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cds::{Transfer, TransferHook, handle_status, user_agent_headers};
use crate::error::FetchError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const CHUNK_SIZE: usize = 1024;

pub const BUILTIN_FINGERPRINTS: &[&str] = &[
    "0fe35b886a16ce77f9ad42fc733efd412e40ca2459a85e5f9f684cb941170d20",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(source: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    accepted: BTreeSet<String>,
}

impl AllowList {
    pub fn new<I, S>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            accepted: fingerprints
                .into_iter()
                .map(|value| value.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_FINGERPRINTS)
    }

    pub fn extend<I, S>(&mut self, fingerprints: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.accepted.extend(Self::new(fingerprints).accepted);
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.accepted.contains(fingerprint.as_str())
    }
}

pub fn is_known_good(fingerprint: &Fingerprint, allow_list: &AllowList) -> bool {
    allow_list.contains(fingerprint)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "protection", rename_all = "lowercase")]
pub enum Protection {
    Enabled { fingerprint: Fingerprint },
    Disabled { fingerprint: Fingerprint },
}

impl Protection {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Protection::Enabled { .. })
    }
}

pub fn install_protection<C: TransferHook>(
    client: &mut C,
    allow_list: &AllowList,
    timeout: Duration,
) -> Result<Protection, FetchError> {
    let fingerprint = Fingerprint::of(client.transfer_source().as_bytes());
    if !is_known_good(&fingerprint, allow_list) {
        warn!(
            fingerprint = %fingerprint,
            "unrecognised transfer routine, downloads run without a read timeout"
        );
        return Ok(Protection::Disabled { fingerprint });
    }

    let transfer = TimeoutTransfer::for_client(client, timeout)?;
    let verify = transfer.verifies_certificates();
    client.replace_transfer(Box::new(transfer));
    info!(
        fingerprint = %fingerprint,
        timeout_secs = timeout.as_secs(),
        verify,
        "download timeout enabled"
    );
    Ok(Protection::Enabled { fingerprint })
}

pub struct TimeoutTransfer {
    client: Client,
    verify: bool,
}

impl TimeoutTransfer {
    pub fn new(timeout: Duration, verify: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .default_headers(user_agent_headers()?)
            .connect_timeout(timeout)
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify)
            .build()
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?;
        Ok(Self { client, verify })
    }

    pub fn for_client<C: TransferHook>(client: &C, timeout: Duration) -> Result<Self, FetchError> {
        Self::new(timeout, client.verifies_certificates())
    }

    pub fn verifies_certificates(&self) -> bool {
        self.verify
    }
}

impl Transfer for TimeoutTransfer {
    fn source(&self) -> &str {
        include_str!("safety.rs")
    }

    fn download(&self, url: &str, size: u64, target: &Path) -> Result<(), FetchError> {
        info!(url, target = %target.display(), size, "downloading");
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?;
        let mut response = handle_status(response)?;
        let mut file = File::create(target)
            .map_err(|err| FetchError::Filesystem(format!("create {}: {err}", target.display())))?;
        stream_exact(&mut response, &mut file, size)?;

        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            info!(bytes_per_sec = (size as f64 / elapsed) as u64, "download rate");
        }
        Ok(())
    }
}

pub fn stream_exact<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    expected: u64,
) -> Result<u64, FetchError> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(FetchError::CdsHttp(err.to_string())),
        };
        writer
            .write_all(&buf[..read])
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        written += read as u64;
    }
    writer
        .flush()
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;

    if written != expected {
        return Err(FetchError::SizeMismatch { written, expected });
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn fingerprint_is_sha256_hex() {
        let fp = Fingerprint::of(b"abc");
        assert_eq!(
            fp.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn allow_list_normalises_case() {
        let fp = Fingerprint::of(b"abc");
        let list = AllowList::new([fp.as_str().to_uppercase()]);
        assert!(is_known_good(&fp, &list));
        assert!(!is_known_good(&Fingerprint::of(b"abd"), &list));
    }

    #[test]
    fn shipped_transfer_is_allow_listed() {
        let fp = Fingerprint::of(crate::cds::transfer::SOURCE.as_bytes());
        assert!(is_known_good(&fp, &AllowList::builtin()));
    }

    #[test]
    fn stream_exact_accepts_full_body() {
        let body = vec![7u8; 3 * CHUNK_SIZE + 17];
        let mut out = Vec::new();
        let written = stream_exact(&mut Cursor::new(&body), &mut out, body.len() as u64).unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(out, body);
    }

    #[test]
    fn stream_exact_rejects_short_body() {
        let mut out = Vec::new();
        let err = stream_exact(&mut Cursor::new(vec![1u8; 10]), &mut out, 11).unwrap_err();
        assert_matches!(
            err,
            FetchError::SizeMismatch {
                written: 10,
                expected: 11
            }
        );
    }
}
