//! Ingestion of labelled log streams.
//!
//! Each stream in a push carries a Prometheus style label set and a list of entries. The label
//! set identifies a series by its fingerprint; a time series record is written the first time
//! a fingerprint is seen, and every entry becomes a sample of that series. All writes for one
//! series are routed by fingerprint, so they commit in push order.

use std::sync::Arc;

use chrono::Utc;
use observability_deps::tracing::debug;
use serde::Deserialize;
use tsingest_types::{
    Sample, TimeSeries,
    labels::{self, Label, LabelParseError},
};

use crate::{WriteError, WriteResponse, label_cache::LabelCache, pipeline::IngestPipeline};

/// Label holding the metric name of a series
const NAME_LABEL: &str = "__name__";

#[derive(Debug, Clone, Deserialize)]
pub struct PushRequest {
    pub streams: Vec<Stream>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stream {
    /// Label set in `{key="value", ...}` form
    pub labels: String,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    pub timestamp_ms: i64,
    pub line: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("invalid stream labels: {0}")]
    Labels(#[from] LabelParseError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug)]
pub struct StreamWriter {
    pipeline: Arc<IngestPipeline>,
    cache: Arc<LabelCache>,
}

impl StreamWriter {
    pub fn new(pipeline: Arc<IngestPipeline>, cache: Arc<LabelCache>) -> Self {
        Self { pipeline, cache }
    }

    /// Write every stream of `request`, returning the responses of all enqueued writes.
    ///
    /// All label sets are parsed before anything is written, so a malformed stream rejects the
    /// whole push.
    pub async fn push(&self, request: PushRequest) -> Result<Vec<WriteResponse>, PushError> {
        let parsed = request
            .streams
            .iter()
            .map(|stream| labels::parse_label_set(&stream.labels))
            .collect::<Result<Vec<_>, _>>()?;

        let mut responses = Vec::with_capacity(request.streams.len() * 2);
        for (stream, labels) in request.streams.into_iter().zip(parsed) {
            let fingerprint = labels::fingerprint(&labels);

            for label in &labels {
                self.cache
                    .merge_label_values(&label.key, [label.value.as_str()]);
            }
            if self.cache.insert_fingerprint(fingerprint) {
                let series = time_series(fingerprint, &labels);
                let enqueued = self
                    .pipeline
                    .time_series()
                    .submit_keyed(fingerprint, vec![series])
                    .await;
                match enqueued {
                    Ok(response) => responses.push(response),
                    Err(e) => {
                        // the series row was never queued, so a later push must write it
                        self.cache.remove_fingerprint(fingerprint);
                        return Err(e.into());
                    }
                }

                self.cache
                    .merge_label_keys(labels.iter().map(|l| l.key.as_str()));
                debug!(fingerprint, labels = %stream.labels, "new series");
            }

            if stream.entries.is_empty() {
                continue;
            }
            let samples = stream
                .entries
                .into_iter()
                .map(|entry| Sample {
                    fingerprint,
                    timestamp_ms: entry.timestamp_ms,
                    value: 0.0,
                    string: entry.line,
                })
                .collect();
            responses.push(
                self.pipeline
                    .samples()
                    .submit_keyed(fingerprint, samples)
                    .await?,
            );
        }

        Ok(responses)
    }
}

fn time_series(fingerprint: u64, labels: &[Label]) -> TimeSeries {
    let name = labels
        .iter()
        .find(|l| l.key == NAME_LABEL)
        .map(|l| l.value.clone())
        .unwrap_or_default();
    TimeSeries {
        date: Utc::now().date_naive(),
        fingerprint,
        labels: labels::labels_to_json(labels),
        name,
    }
}
