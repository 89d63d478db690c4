use super::types::{ImmediateTopLevelStatus, StatusItem};
use crate::error::ReportError;
use crate::goalstate::GoalStateKey;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

/// Destination for the aggregated immediate status (PUT semantics).
pub trait StatusSink: Send + Sync {
    fn put_status<'a>(
        &'a self,
        payload: &'a ImmediateTopLevelStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReportError>> + Send + 'a>>;
}

pub struct HostGaStatusSink {
    client: Client,
    url: String,
}

impl HostGaStatusSink {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl StatusSink for HostGaStatusSink {
    fn put_status<'a>(
        &'a self,
        payload: &'a ImmediateTopLevelStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReportError>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::to_vec(payload)?;
            let response = self
                .client
                .put(&self.url)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;

            let status = response.status();
            if status != StatusCode::OK {
                return Err(ReportError::Status {
                    status: status.as_u16(),
                });
            }
            Ok(())
        })
    }
}

/// How an execution path publishes status for one goal state.
pub trait StatusReporter: Send + Sync {
    fn report<'a>(
        &'a self,
        key: &'a GoalStateKey,
        item: StatusItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReportError>> + Send + 'a>>;
}

/// Synchronous-mode reporter: one `<seq>.status` file per goal state.
pub struct FileStatusReporter {
    status_dir: PathBuf,
}

impl FileStatusReporter {
    pub fn new(status_dir: impl Into<PathBuf>) -> Self {
        Self {
            status_dir: status_dir.into(),
        }
    }

    pub fn status_path(&self, sequence_number: i64) -> PathBuf {
        self.status_dir.join(format!("{sequence_number}.status"))
    }
}

impl StatusReporter for FileStatusReporter {
    fn report<'a>(
        &'a self,
        key: &'a GoalStateKey,
        item: StatusItem,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReportError>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.status_path(key.sequence_number);
            let file_err = |source: std::io::Error| ReportError::File {
                path: path.display().to_string(),
                source,
            };

            tokio::fs::create_dir_all(&self.status_dir)
                .await
                .map_err(file_err)?;

            let data = serde_json::to_vec_pretty(&[item])?;
            let tmp = path.with_extension("status.tmp");
            tokio::fs::write(&tmp, data).await.map_err(file_err)?;
            tokio::fs::rename(&tmp, &path).await.map_err(file_err)?;
            Ok(())
        })
    }
}
