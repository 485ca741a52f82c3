//! Unit Extractor - finds attribute values (width, weight, voltage, ...) in
//! product-image OCR text.

mod batch;
mod config;
mod error;
mod extractor;
mod ocr;
mod ocr_cache;
mod openrouter;
mod scanner;
mod units;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use batch::{BatchRow, BatchRunner};
use clap::{Parser, Subcommand};
use config::AppConfig;
use extractor::Predictor;
use ocr::OcrInput;
use scanner::{ExtractedPair, UnitScanner};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "unit-extractor")]
#[command(about = "Extract value/unit pairs for product attributes from image text", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Listen address (default: BIND_ADDR or 0.0.0.0:3000)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Predict every row of a CSV, resuming from an existing output file
    Batch {
        /// Input CSV with index, image_link, entity_name columns
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV (index, prediction), appended to as rows complete
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Resolve an entity against literal text
    Resolve {
        /// Entity name (e.g. "item_weight")
        #[arg(short, long)]
        entity: String,

        /// Text to search
        text: String,
    },

    /// Print every value/unit pair found in literal text
    Scan {
        /// Text to search
        text: String,
    },

    /// Print the active unit tables as JSON (usable as UNIT_TABLES_PATH)
    Tables,
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    predictor: Predictor,
    runner: Arc<BatchRunner>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so CLI output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unit_extractor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let tables = Arc::new(config.load_tables()?);
    let scanner = Arc::new(UnitScanner::new(tables).context("Failed to build unit scanner")?);

    match cli.command {
        Commands::Resolve { entity, text } => {
            if let Some(prediction) = scanner.predict(&entity, &text) {
                println!("{}", prediction);
            }
        }
        Commands::Scan { text } => {
            for pair in scanner.scan(&text) {
                println!("{}", pair);
            }
        }
        Commands::Tables => {
            let file = scanner.tables().to_file();
            println!("{}", serde_json::to_string_pretty(&file)?);
        }
        Commands::Batch { input, output } => {
            let runner = build_runner(&config, scanner)?;
            let rows = batch::read_rows_from_file(&input)?;
            info!("Loaded {} rows from {:?}", rows.len(), input);
            let summary = runner.run(rows, &output).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Serve { bind } => {
            let runner = Arc::new(build_runner(&config, scanner)?);
            let state = AppState {
                predictor: runner.predictor().clone(),
                runner,
            };
            let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            serve(state, &bind_addr).await?;
        }
    }

    Ok(())
}

fn build_runner(config: &AppConfig, scanner: Arc<UnitScanner>) -> anyhow::Result<BatchRunner> {
    let provider = config.build_ocr_provider(config.http_client()?)?;
    let predictor = Predictor::new(provider, scanner);
    Ok(BatchRunner::new(
        predictor,
        config.batch_concurrency,
        config.checkpoint_every,
    )
    .with_row_timeout(config.row_timeout))
}

async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/entities", get(list_entities))
        .route("/scan", post(scan_text))
        .route("/resolve", post(resolve_text))
        .route("/ocr", post(ocr_image))
        .route("/predict", post(predict_image))
        .route("/predict/url", post(predict_url))
        .route("/batch", post(predict_batch))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

type HandlerError = (StatusCode, String);

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Supported entities and their canonical units.
async fn list_entities(State(state): State<AppState>) -> Json<BTreeMap<String, BTreeSet<String>>> {
    Json(state.predictor.scanner().tables().entities().clone())
}

#[derive(serde::Deserialize)]
struct ScanRequest {
    text: String,
}

#[derive(serde::Serialize)]
struct ScanResponse {
    pairs: Vec<ExtractedPair>,
}

async fn scan_text(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Json<ScanResponse> {
    Json(ScanResponse {
        pairs: state.predictor.scanner().scan(&req.text),
    })
}

#[derive(serde::Deserialize)]
struct ResolveRequest {
    entity_name: String,
    text: String,
}

#[derive(serde::Serialize)]
struct PredictionResponse {
    prediction: Option<String>,
}

async fn resolve_text(
    State(state): State<AppState>,
    Json(req): Json<ResolveRequest>,
) -> Json<PredictionResponse> {
    Json(PredictionResponse {
        prediction: state.predictor.scanner().predict(&req.entity_name, &req.text),
    })
}

#[derive(serde::Serialize)]
struct OcrResponse {
    text: String,
}

/// Upload an image and return its OCR text.
async fn ocr_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<OcrResponse>, HandlerError> {
    let upload = read_upload(multipart).await?;
    let text = run_ocr(&state, &upload.into_input()).await?;
    Ok(Json(OcrResponse { text }))
}

#[derive(serde::Serialize)]
struct PredictResponse {
    text: String,
    prediction: Option<String>,
}

/// Upload an image plus an `entity_name` field.
async fn predict_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PredictResponse>, HandlerError> {
    let upload = read_upload(multipart).await?;
    let entity = upload
        .fields
        .get("entity_name")
        .cloned()
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "Missing entity_name field".to_string()))?;

    let text = run_ocr(&state, &upload.into_input()).await?;
    let prediction = state.predictor.scanner().predict(&entity, &text);
    Ok(Json(PredictResponse { text, prediction }))
}

#[derive(serde::Deserialize)]
struct PredictUrlRequest {
    image_link: String,
    entity_name: String,
}

/// Predict from an image URL. Download or OCR failures yield a null prediction.
async fn predict_url(
    State(state): State<AppState>,
    Json(req): Json<PredictUrlRequest>,
) -> Json<PredictionResponse> {
    let input = OcrInput::Url {
        url: req.image_link,
    };
    Json(PredictionResponse {
        prediction: state.predictor.predict_or_absent(&input, &req.entity_name).await,
    })
}

/// Upload a CSV of image links and download `index,prediction` CSV.
async fn predict_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, HandlerError> {
    let upload = read_upload(multipart).await?;
    let rows: Vec<BatchRow> = batch::read_rows(&upload.data)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid CSV: {:#}", e)))?;

    info!("Batch upload {}: {} rows", upload.filename, rows.len());
    let predictions = state.runner.predict_rows(&rows).await;
    let body = batch::write_predictions_csv(&predictions).map_err(|e| {
        error!("Failed to write batch CSV: {:#}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to write CSV".to_string())
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"predictions.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

// ============================================================================
// Helper functions
// ============================================================================

/// Uploaded `file` part plus any other text fields.
struct Upload {
    filename: String,
    data: Vec<u8>,
    fields: HashMap<String, String>,
}

impl Upload {
    fn into_input(self) -> OcrInput {
        OcrInput::Bytes {
            filename: self.filename,
            data: self.data,
        }
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, HandlerError> {
    let mut filename = String::new();
    let mut data = Vec::new();
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            filename = field.file_name().unwrap_or("upload").to_string();
            data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?
                .to_vec();
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read {}: {}", name, e)))?;
            fields.insert(name, value.trim().to_string());
        }
    }

    if data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    Ok(Upload {
        filename,
        data,
        fields,
    })
}

async fn run_ocr(state: &AppState, input: &OcrInput) -> Result<String, HandlerError> {
    state.predictor.ocr_text(input).await.map_err(|e| {
        warn!("OCR failed: {:#}", e);
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Could not extract text from image: {:#}", e),
        )
    })
}
