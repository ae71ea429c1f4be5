//! Client for the control plane's database ingestion endpoints.
//!
//! The handshake: announce the script by content ETag, upload the body when
//! the server does not already have it, finalize, then poll the ingest job's
//! bookmark until it completes. Nothing local changes on failure.

use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, ETAG};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const MAX_STATUS_POLLS: usize = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote migration failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("upload ETag mismatch: submitted {expected}, storage answered {actual}")]
    EtagMismatch { expected: String, actual: String },

    #[error("unexpected response from the control plane: {0}")]
    Protocol(&'static str),

    #[error("remote migration still not complete after {0} status polls")]
    PollTimeout(usize),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnounceResponse {
    #[serde(default)]
    completed: bool,
    upload_url: Option<String>,
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeResponse {
    #[serde(default)]
    completed: bool,
    bookmark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    completed: bool,
}

pub struct RemoteClient {
    http: Client,
    base_url: String,
    token: String,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        RemoteClient {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    /// Ships `sql` to the remote database and waits for ingestion.
    pub fn migrate(&self, sql: &str) -> Result<(), RemoteError> {
        let etag = hex::encode(Md5::digest(sql.as_bytes()));
        debug!(%etag, bytes = sql.len(), "announcing migration");

        let announce: AnnounceResponse = self.request_json(
            self.http
                .post(self.url("/database/migrate"))
                .json(&json!({ "etag": etag })),
        )?;
        if announce.completed {
            debug!("content already present server-side");
            return Ok(());
        }

        let upload_url = announce.upload_url.ok_or(RemoteError::Protocol("missing uploadUrl"))?;
        let filename = announce.filename.ok_or(RemoteError::Protocol("missing filename"))?;

        let upload = self
            .http
            .put(&upload_url)
            .header(CONTENT_LENGTH, sql.len())
            .body(sql.to_owned())
            .send()?;
        let upload = Self::check_status(upload)?;
        let answered = upload
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim_matches('"').to_owned())
            .ok_or(RemoteError::Protocol("upload response carried no ETag"))?;
        if answered != etag {
            return Err(RemoteError::EtagMismatch { expected: etag, actual: answered });
        }

        let finalize: FinalizeResponse = self.request_json(
            self.http
                .put(self.url("/database/migrate"))
                .json(&json!({ "etag": etag, "filename": filename })),
        )?;
        if finalize.completed {
            return Ok(());
        }
        let bookmark = finalize.bookmark.ok_or(RemoteError::Protocol("missing bookmark"))?;

        for poll in 0..MAX_STATUS_POLLS {
            thread::sleep(POLL_INTERVAL);
            debug!(poll, "polling migration status");
            let status: StatusResponse = self.request_json(
                self.http
                    .post(self.url("/database/migration/status"))
                    .json(&json!({ "bookmark": bookmark })),
            )?;
            if status.completed {
                return Ok(());
            }
        }

        Err(RemoteError::PollTimeout(MAX_STATUS_POLLS))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<T, RemoteError> {
        let response = request.bearer_auth(&self.token).send()?;
        let response = Self::check_status(response)?;
        Ok(response.json()?)
    }

    fn check_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(RemoteError::Status {
                status,
                body: response.text().unwrap_or_default(),
            })
        }
    }
}
