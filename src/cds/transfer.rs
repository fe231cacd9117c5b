use std::fs::File;
use std::path::Path;

use reqwest::blocking::Client;
use tracing::info;

use crate::cds::{Transfer, handle_status, user_agent_headers};
use crate::error::FetchError;

pub const SOURCE: &str = include_str!("transfer.rs");

pub struct StreamTransfer {
    client: Client,
}

impl StreamTransfer {
    pub fn new(verify: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .default_headers(user_agent_headers()?)
            .timeout(None)
            .danger_accept_invalid_certs(!verify)
            .build()
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transfer for StreamTransfer {
    fn source(&self) -> &str {
        SOURCE
    }

    fn download(&self, url: &str, size: u64, target: &Path) -> Result<(), FetchError> {
        info!(url, target = %target.display(), size, "downloading");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?;
        let mut response = handle_status(response)?;
        let mut file = File::create(target)
            .map_err(|err| FetchError::Filesystem(format!("create {}: {err}", target.display())))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| FetchError::CdsHttp(err.to_string()))?;
        Ok(())
    }
}
