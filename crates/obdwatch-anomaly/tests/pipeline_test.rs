use async_trait::async_trait;
use chrono::{Duration, Utc};
use ndarray::Array2;
use obdwatch_anomaly::config::PipelineConfig;
use obdwatch_anomaly::dispatch::{AlertDispatcher, DeliveryChannel};
use obdwatch_anomaly::error::{AnomalyError, Result};
use obdwatch_anomaly::mailer::{MailTransport, OutgoingMail, TransportError};
use obdwatch_anomaly::model::{ReconstructionModel, WindowMeanModel};
use obdwatch_anomaly::pipeline::Pipeline;
use obdwatch_anomaly::rules::Bound;
use obdwatch_anomaly::scaler::FeatureScaler;
use obdwatch_core::{FeatureVector, Metric, Reading};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMail>>,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> std::result::Result<(), TransportError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

// reconstructs everything as zero, so any non-zero window scores high
struct ZeroModel;

impl ReconstructionModel for ZeroModel {
    fn reconstruct(&self, window: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(Array2::zeros(window.dim()))
    }

    fn name(&self) -> &str {
        "zero"
    }
}

// idle engine, every sensor inside the stock limits
fn normal_reading(i: i64) -> Reading {
    Reading::new(Utc::now() + Duration::seconds(i))
        .with(Metric::Rpm, 1000.0)
        .with(Metric::CoolantTemp, 90.0)
        .with(Metric::IntakePressure, 40.0)
        .with(Metric::Maf, 10.0)
        .with(Metric::ThrottlePos, 15.0)
        .with(Metric::EngineLoad, 30.0)
        .with(Metric::VehicleSpeed, 50.0)
        .with(Metric::IntakeAirTemp, 30.0)
        .with(Metric::Voltage, 13.8)
}

fn fitted_scaler() -> Arc<FeatureScaler> {
    let corpus: Vec<FeatureVector> = (0..50)
        .map(|i| {
            let r = normal_reading(i)
                .with(Metric::Rpm, 800.0 + i as f64 * 40.0)
                .with(Metric::CoolantTemp, 85.0 + (i % 10) as f64);
            r.features()
        })
        .collect();
    let mut scaler = FeatureScaler::new();
    scaler.fit(&corpus).unwrap();
    Arc::new(scaler)
}

fn dispatcher(transport: Arc<RecordingTransport>) -> AlertDispatcher {
    AlertDispatcher::new(transport, vec![DeliveryChannel::direct("owner@example.com")])
}

#[tokio::test]
async fn test_sliding_window_scores_from_twentieth_reading() {
    let transport = Arc::new(RecordingTransport::default());
    let config = PipelineConfig::default();
    let mut pipeline = Pipeline::start(
        &config,
        Some(fitted_scaler()),
        Some(Arc::new(WindowMeanModel)),
        dispatcher(transport.clone()),
    )
    .unwrap();
    assert!(pipeline.scoring_enabled());

    for i in 0..25 {
        let outcome = pipeline.process(&normal_reading(i));
        assert!(outcome.violations.is_empty(), "reading {} violated a rule", i);
        if i < 19 {
            assert!(outcome.score.is_none(), "reading {} scored early", i);
        } else {
            let score = outcome.score.expect("full window must be scored");
            // constant input, so only rounding error is left
            assert!(score.value < 1e-12);
            assert!(!outcome.anomalous);
        }
    }

    assert_eq!(pipeline.stats().scores, 6);
    let (stats, dispatch) = pipeline.shutdown().await;
    assert_eq!(stats.readings, 25);
    assert_eq!(stats.alerts_enqueued, 0);
    assert_eq!(dispatch.get_stats(), (0, 0, 0));
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_coolant_overheat_raises_one_violation_and_alert() {
    let transport = Arc::new(RecordingTransport::default());
    let mut pipeline = Pipeline::start(
        &PipelineConfig::default(),
        None,
        None,
        dispatcher(transport.clone()),
    )
    .unwrap();

    let reading = normal_reading(0).with(Metric::CoolantTemp, 110.0);
    let outcome = pipeline.process(&reading);

    assert_eq!(outcome.violations.len(), 1);
    assert_eq!(outcome.violations[0].metric, Metric::CoolantTemp);
    assert_eq!(outcome.violations[0].observed, 110.0);
    assert_eq!(outcome.violations[0].bound, Bound::Upper(105.0));
    assert_eq!(outcome.alerts_enqueued, 1);

    let (_, dispatch) = pipeline.shutdown().await;
    assert_eq!(dispatch.get_stats(), (1, 0, 0));
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Vehicle Alert: coolant_temp out of range");
}

#[tokio::test]
async fn test_missing_model_keeps_rule_detection() {
    let transport = Arc::new(RecordingTransport::default());
    let mut pipeline = Pipeline::start(
        &PipelineConfig::default(),
        Some(fitted_scaler()),
        None,
        dispatcher(transport.clone()),
    )
    .unwrap();
    assert!(!pipeline.scoring_enabled());

    for i in 0..30 {
        let outcome = pipeline.process(&normal_reading(i));
        assert!(outcome.score.is_none());
    }
    let outcome = pipeline.process(&normal_reading(30).with(Metric::Voltage, 10.9));
    assert_eq!(outcome.violations.len(), 1);
    assert_eq!(outcome.violations[0].metric, Metric::Voltage);

    let (stats, _) = pipeline.shutdown().await;
    assert_eq!(stats.scores, 0);
    assert_eq!(stats.scoring_errors, 0);
}

#[tokio::test]
async fn test_reconstruction_anomaly_is_alerted_with_breakdown() {
    let transport = Arc::new(RecordingTransport::default());
    let config = PipelineConfig {
        window_size: 5,
        anomaly_threshold: 0.01,
        ..Default::default()
    };
    let mut pipeline = Pipeline::start(
        &config,
        Some(fitted_scaler()),
        Some(Arc::new(ZeroModel)),
        dispatcher(transport.clone()),
    )
    .unwrap();

    let mut anomalies = 0;
    for i in 0..5 {
        let outcome = pipeline.process(&normal_reading(i));
        if outcome.anomalous {
            anomalies += 1;
        }
    }
    assert_eq!(anomalies, 1);

    pipeline.shutdown().await;
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Vehicle Alert: Abnormal sensor pattern detected");
    assert!(sent[0].body.contains("exceeds threshold 0.010000"));
    assert!(sent[0].body.contains("Top contributing sensors:"));
}

#[tokio::test]
async fn test_incomplete_window_is_skipped_per_reading() {
    let transport = Arc::new(RecordingTransport::default());
    let config = PipelineConfig {
        window_size: 3,
        ..Default::default()
    };
    let mut pipeline = Pipeline::start(
        &config,
        Some(fitted_scaler()),
        Some(Arc::new(WindowMeanModel)),
        dispatcher(transport),
    )
    .unwrap();

    // maf never reported
    for i in 0..3 {
        let mut reading = normal_reading(i);
        reading.maf = None;
        assert!(pipeline.process(&reading).score.is_none());
    }
    // once maf shows up the window fills its gaps and scores again
    let outcome = pipeline.process(&normal_reading(3));
    assert!(outcome.score.is_some());

    let (stats, _) = pipeline.shutdown().await;
    assert_eq!(stats.scoring_errors, 1);
    assert_eq!(stats.scores, 1);
}

#[tokio::test]
async fn test_cooldown_throttles_repeated_alerts() {
    let transport = Arc::new(RecordingTransport::default());
    let config = PipelineConfig {
        alert_cooldown_seconds: 300,
        ..Default::default()
    };
    let mut pipeline =
        Pipeline::start(&config, None, None, dispatcher(transport.clone())).unwrap();

    for i in 0..3 {
        pipeline.process(&normal_reading(i).with(Metric::CoolantTemp, 112.0));
    }

    let (stats, _) = pipeline.shutdown().await;
    assert_eq!(stats.violations, 3);
    assert_eq!(stats.alerts_enqueued, 1);
    assert_eq!(stats.alerts_throttled, 2);
    assert_eq!(transport.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_consumes_source_in_order() {
    let transport = Arc::new(RecordingTransport::default());
    let mut pipeline = Pipeline::start(
        &PipelineConfig::default(),
        None,
        None,
        dispatcher(transport.clone()),
    )
    .unwrap();

    let (tx, rx) = mpsc::channel(8);
    let producer = tokio::spawn(async move {
        for i in 0..4 {
            tx.send(normal_reading(i)).await.unwrap();
        }
        tx.send(normal_reading(4).with(Metric::Rpm, 6200.0)).await.unwrap();
    });

    pipeline.run(rx).await;
    producer.await.unwrap();

    let (stats, dispatch) = pipeline.shutdown().await;
    assert_eq!(stats.readings, 5);
    assert_eq!(stats.violations, 1);
    assert_eq!(dispatch.get_stats(), (1, 0, 0));
}

#[tokio::test]
async fn test_start_requires_a_channel() {
    let result = Pipeline::start(
        &PipelineConfig::default(),
        None,
        None,
        AlertDispatcher::unconfigured(),
    );
    assert!(matches!(result, Err(AnomalyError::Config(_))));
}

#[tokio::test]
async fn test_start_rejects_unfitted_scaler() {
    let transport = Arc::new(RecordingTransport::default());
    let result = Pipeline::start(
        &PipelineConfig::default(),
        Some(Arc::new(FeatureScaler::new())),
        Some(Arc::new(WindowMeanModel)),
        dispatcher(transport),
    );
    assert!(matches!(result, Err(AnomalyError::NotFitted)));
}

#[tokio::test]
async fn test_sensor_missing_from_corpus_disables_scoring_at_start() {
    // the vehicle never reported voltage while the corpus was collected
    let corpus: Vec<FeatureVector> = (0..50)
        .map(|i| {
            let mut r = normal_reading(i).with(Metric::Rpm, 800.0 + i as f64 * 40.0);
            r.voltage = None;
            r.features()
        })
        .collect();
    let mut scaler = FeatureScaler::new();
    scaler.fit(&corpus).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let mut pipeline = Pipeline::start(
        &PipelineConfig::default(),
        Some(Arc::new(scaler)),
        Some(Arc::new(WindowMeanModel)),
        dispatcher(transport),
    )
    .unwrap();
    assert!(!pipeline.scoring_enabled());

    for i in 0..60 {
        assert!(pipeline.process(&normal_reading(i)).score.is_none());
    }
    // rules still fire
    let outcome = pipeline.process(&normal_reading(60).with(Metric::CoolantTemp, 111.0));
    assert_eq!(outcome.violations.len(), 1);

    let (stats, _) = pipeline.shutdown().await;
    assert_eq!(stats.scores, 0);
    assert_eq!(stats.scoring_errors, 0);
}
