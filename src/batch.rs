//! Resumable CSV batch prediction.
//!
//! Input rows carry `index`, `image_link`, `entity_name` (and an optional
//! `group_id` the predictor ignores). Output is a two-column `index,prediction`
//! CSV appended to as rows complete; rerunning against the same output file
//! skips every index already written.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::extractor::Predictor;
use crate::ocr::OcrInput;

/// One input row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRow {
    pub index: String,
    pub image_link: String,
    #[serde(default)]
    pub group_id: Option<String>,
    pub entity_name: String,
}

/// One output row. An absent prediction is written as an empty cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPrediction {
    pub index: String,
    pub prediction: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub skipped: usize,
    pub predicted: usize,
    pub absent: usize,
}

/// Parse batch input CSV. Unknown columns are ignored.
pub fn read_rows(data: &[u8]) -> Result<Vec<BatchRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut rows = Vec::new();
    for (i, result) in reader.deserialize().enumerate() {
        let row: BatchRow = result.with_context(|| format!("Failed to read CSV row {}", i + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_rows_from_file(path: &Path) -> Result<Vec<BatchRow>> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read batch input {:?}", path))?;
    read_rows(&data).with_context(|| format!("Invalid batch input {:?}", path))
}

/// Serialize predictions as `index,prediction` CSV with a header row.
pub fn write_predictions_csv(predictions: &[BatchPrediction]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for prediction in predictions {
        writer.serialize(prediction)?;
    }
    // An empty batch still gets its header.
    if predictions.is_empty() {
        writer.write_record(["index", "prediction"])?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to finish CSV output: {}", e))
}

/// State recovered from an existing output file.
#[derive(Debug, Default)]
struct Checkpoint {
    processed: HashSet<String>,
    /// File is missing, empty, or its header was cut off.
    needs_header: bool,
    /// Last write was cut off before its line ending; the file is cut back to
    /// this length so the partial row is dropped and recomputed.
    truncate_to: Option<u64>,
}

impl Checkpoint {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                needs_header: true,
                ..Default::default()
            });
        }

        let data =
            std::fs::read(path).with_context(|| format!("Failed to read checkpoint {:?}", path))?;

        // Only complete lines count.
        let complete = match data.iter().rposition(|&b| b == b'\n') {
            Some(last) => last + 1,
            None => 0,
        };
        let truncate_to = (complete < data.len()).then_some(complete as u64);
        if complete == 0 {
            return Ok(Self {
                needs_header: true,
                truncate_to,
                ..Default::default()
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(&data[..complete]);
        let mut processed = HashSet::new();
        for result in reader.records() {
            let record = result.with_context(|| format!("Corrupt checkpoint {:?}", path))?;
            if let Some(index) = record.get(0).map(str::trim).filter(|i| !i.is_empty()) {
                processed.insert(index.to_string());
            }
        }

        Ok(Self {
            processed,
            needs_header: false,
            truncate_to,
        })
    }
}

/// Upper bound on one row's download, OCR and resolve.
pub const DEFAULT_ROW_TIMEOUT: Duration = Duration::from_secs(180);

/// Runs predictions for many rows with bounded parallelism.
pub struct BatchRunner {
    predictor: Predictor,
    concurrency: usize,
    checkpoint_every: usize,
    row_timeout: Duration,
}

impl BatchRunner {
    pub fn new(predictor: Predictor, concurrency: usize, checkpoint_every: usize) -> Self {
        Self {
            predictor,
            concurrency: concurrency.max(1),
            checkpoint_every: checkpoint_every.max(1),
            row_timeout: DEFAULT_ROW_TIMEOUT,
        }
    }

    /// Rows still running after `timeout` are written as absent.
    pub fn with_row_timeout(mut self, timeout: Duration) -> Self {
        self.row_timeout = timeout;
        self
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// Predict every row, appending results to `output` and resuming from it.
    pub async fn run(&self, rows: Vec<BatchRow>, output: &Path) -> Result<BatchSummary> {
        let checkpoint = Checkpoint::load(output)?;
        let total = rows.len();
        let pending: Vec<BatchRow> = rows
            .into_iter()
            .filter(|row| !checkpoint.processed.contains(&row.index))
            .collect();

        let mut summary = BatchSummary {
            total,
            skipped: total - pending.len(),
            ..Default::default()
        };
        if summary.skipped > 0 {
            info!(
                "Resuming from {:?}: {} rows already processed",
                output, summary.skipped
            );
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output)
            .with_context(|| format!("Failed to open output {:?}", output))?;
        if let Some(len) = checkpoint.truncate_to {
            warn!("Dropping partial last line of {:?}", output);
            file.set_len(len)
                .with_context(|| format!("Failed to truncate output {:?}", output))?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if checkpoint.needs_header {
            writer.write_record(["index", "prediction"])?;
            writer.flush()?;
        }

        let mut since_flush = 0;
        let mut done = 0;
        for chunk in pending.chunks(self.concurrency) {
            for prediction in self.predict_chunk(chunk).await {
                if prediction.prediction.is_some() {
                    summary.predicted += 1;
                } else {
                    summary.absent += 1;
                }
                writer.serialize(&prediction)?;
                since_flush += 1;
                done += 1;
            }

            if since_flush >= self.checkpoint_every {
                writer.flush()?;
                since_flush = 0;
                info!("Processed {} of {} rows", done, pending.len());
            }
        }
        writer.flush()?;

        info!(
            "Batch complete: {} rows, {} skipped, {} predicted, {} absent",
            summary.total, summary.skipped, summary.predicted, summary.absent
        );
        Ok(summary)
    }

    /// Predict rows in memory, keeping input order.
    pub async fn predict_rows(&self, rows: &[BatchRow]) -> Vec<BatchPrediction> {
        let mut predictions = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(self.concurrency) {
            predictions.extend(self.predict_chunk(chunk).await);
        }
        predictions
    }

    async fn predict_chunk(&self, chunk: &[BatchRow]) -> Vec<BatchPrediction> {
        let mut slots: Vec<Option<String>> = vec![None; chunk.len()];
        let mut tasks = JoinSet::new();

        for (position, row) in chunk.iter().enumerate() {
            let predictor = self.predictor.clone();
            let input = OcrInput::Url {
                url: row.image_link.clone(),
            };
            let entity = row.entity_name.clone();
            let row_timeout = self.row_timeout;
            tasks.spawn(async move {
                let prediction = tokio::time::timeout(
                    row_timeout,
                    predictor.predict_or_absent(&input, &entity),
                )
                .await
                .unwrap_or_else(|_| {
                    warn!("Prediction timed out after {:?} for {}", row_timeout, input.describe());
                    None
                });
                (position, prediction)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, prediction)) => slots[position] = prediction,
                Err(e) => warn!("Prediction task failed: {}", e),
            }
        }

        chunk
            .iter()
            .zip(slots)
            .map(|(row, prediction)| BatchPrediction {
                index: row.index.clone(),
                prediction,
            })
            .collect()
    }
}
