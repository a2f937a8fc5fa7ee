use clap::Parser;
use obdwatch_anomaly::{
    AlertDispatcher, FeatureScaler, MailTransport, NormalizationParams, Pipeline, PipelineConfig,
    ReconstructionModel, SmtpMailer, WindowMeanModel, load_config,
};
use obdwatch_core::{FeatureVector, Reading};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "obdwatch-worker")]
#[command(about = "Detect abnormal vehicle sensor readings and send alerts")]
struct Args {
    /// Pipeline config (TOML); stock limits are used when omitted
    #[arg(short, long, env = "OBDWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Readings (JSON lines) to fit the feature scaler on
    #[arg(long, conflicts_with = "scaler")]
    corpus: Option<PathBuf>,

    /// Previously fitted normalization parameters (JSON)
    #[arg(long)]
    scaler: Option<PathBuf>,

    /// Write the fitted normalization parameters here
    #[arg(long, requires = "corpus")]
    save_scaler: Option<PathBuf>,

    /// Score windows with the training-free window-mean model
    #[arg(long)]
    baseline_model: bool,

    /// Live readings (JSON lines); stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // load config, environment wins over the file for delivery settings
    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            load_config(path)?
        }
        None => PipelineConfig::default(),
    };
    config.delivery.apply_env()?;
    info!(delivery = ?config.delivery, rules = config.rules.len(), "Configuration loaded");

    let scaler = load_scaler(&args, config.clamp_normalized)?;
    let model: Option<Arc<dyn ReconstructionModel>> = if args.baseline_model {
        Some(Arc::new(WindowMeanModel))
    } else {
        None
    };

    let transport = SmtpMailer::from_settings(&config.delivery)?
        .map(|mailer| Arc::new(mailer) as Arc<dyn MailTransport>);
    let dispatcher = AlertDispatcher::from_settings(&config.delivery, transport);

    let mut pipeline = Pipeline::start(&config, scaler, model, dispatcher)?;

    // reading source runs on its own task, the pipeline consumes in order
    let (tx, rx) = mpsc::channel(256);
    let source = tokio::spawn(async move {
        let result = match &args.input {
            Some(path) => match tokio::fs::File::open(path).await {
                Ok(file) => forward_readings(file, tx).await,
                Err(e) => Err(e),
            },
            None => forward_readings(tokio::io::stdin(), tx).await,
        };
        if let Err(e) = result {
            error!("Reading source failed: {}", e);
        }
    });

    tokio::select! {
        _ = pipeline.run(rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, draining alert queue");
        }
    }
    source.abort();

    let (stats, dispatch) = pipeline.shutdown().await;
    let (delivered, via_fallback, failed) = dispatch.get_stats();
    info!(
        readings = stats.readings,
        anomalies = stats.anomalies,
        violations = stats.violations,
        delivered,
        via_fallback,
        failed,
        "Worker finished"
    );
    Ok(())
}

// Fit from a corpus or load saved parameters; None leaves scoring disabled
fn load_scaler(
    args: &Args,
    clamp: bool,
) -> Result<Option<Arc<FeatureScaler>>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.scaler {
        let params: NormalizationParams = serde_json::from_str(&fs::read_to_string(path)?)?;
        info!(path = %path.display(), samples = params.samples, "Loaded normalization parameters");
        return Ok(Some(Arc::new(
            FeatureScaler::from_params(params).with_clamp(clamp),
        )));
    }

    let Some(path) = &args.corpus else {
        return Ok(None);
    };
    let corpus = read_corpus(path)?;
    let mut scaler = FeatureScaler::new().with_clamp(clamp);
    let params = scaler.fit(&corpus)?;

    if let Some(out) = &args.save_scaler {
        fs::write(out, serde_json::to_string_pretty(params)?)?;
        info!(path = %out.display(), "Saved normalization parameters");
    }
    Ok(Some(Arc::new(scaler)))
}

fn read_corpus(path: &Path) -> Result<Vec<FeatureVector>, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let mut corpus = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match Reading::from_json_line(line) {
            Ok(reading) => corpus.push(reading.features()),
            Err(e) => warn!(line = i + 1, "Skipping corpus line: {}", e),
        }
    }
    info!(path = %path.display(), samples = corpus.len(), "Corpus loaded");
    Ok(corpus)
}

// parse JSON lines and hand them to the pipeline, bad lines are skipped
async fn forward_readings<R>(source: R, tx: mpsc::Sender<Reading>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(source).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match Reading::from_json_line(&line) {
            Ok(reading) => {
                if tx.send(reading).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to parse reading: {}", e);
            }
        }
    }
    Ok(())
}
