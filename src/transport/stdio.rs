//! JSON-lines transport: jobs in on one stream, records out on another.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::protocol::{parse_job, JobResponse};
use crate::telemetry;
use crate::Dispatcher;

/// Counters for one ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub malformed: u64,
    pub rejected: u64,
}

/// Read one job per line until EOF and submit each to `dispatcher`.
///
/// Malformed lines are logged and dropped; they never become jobs.
pub async fn ingest_lines<R>(reader: R, dispatcher: &Dispatcher) -> io::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let job = match parse_job(line.as_bytes(), dispatcher.max_attempts()) {
            Ok(job) => job,
            Err(e) => {
                telemetry::record_ingest_rejected(e.reason());
                tracing::warn!(line = line_no, error = %e, "dropping malformed job message");
                stats.malformed += 1;
                continue;
            }
        };
        match dispatcher.submit(job) {
            Ok(_) => stats.accepted += 1,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "job submission refused");
                stats.rejected += 1;
            }
        }
    }

    tracing::info!(
        accepted = stats.accepted,
        malformed = stats.malformed,
        rejected = stats.rejected,
        "ingestion stream closed"
    );
    Ok(stats)
}

/// Write each record as one JSON line until the channel closes.
pub async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<JobResponse>) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}
