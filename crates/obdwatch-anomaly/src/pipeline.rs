//! Per-reading orchestration: rules, sliding window, scoring and alert queueing

use crate::alerting::{Alert, AlertThrottle};
use crate::config::PipelineConfig;
use crate::dispatch::AlertDispatcher;
use crate::error::{AnomalyError, Result};
use crate::model::ReconstructionModel;
use crate::pool::{AlertQueue, DispatchPool, DispatchStats, EnqueueError};
use crate::rules::{RuleEngine, RuleViolation};
use crate::scaler::FeatureScaler;
use crate::scorer::{AnomalyScore, AnomalyScorer};
use crate::window::WindowBuffer;
use obdwatch_core::{FeatureVector, Reading};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// what happened to one reading
#[derive(Debug, Clone, Default)]
pub struct ReadingOutcome {
    pub violations: Vec<RuleViolation>,
    pub score: Option<AnomalyScore>,
    pub anomalous: bool,
    pub alerts_enqueued: usize,
}

// running totals, logged at shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub readings: u64,
    pub violations: u64,
    pub scores: u64,
    pub anomalies: u64,
    pub scoring_errors: u64,
    pub alerts_enqueued: u64,
    pub alerts_throttled: u64,
    pub alerts_dropped: u64,
}

// main pipeline that wires detection to dispatch, one reading at a time
pub struct Pipeline {
    rules: RuleEngine,
    window: WindowBuffer<FeatureVector>,
    scaler: Option<Arc<FeatureScaler>>,
    scorer: AnomalyScorer,
    threshold: f64,
    top_contributors: usize,
    throttle: AlertThrottle,
    queue: AlertQueue,
    pool: DispatchPool,
    stats: PipelineStats,
}

impl Pipeline {
    /// Build the pipeline and spawn the dispatch workers. Needs a tokio runtime.
    /// The scaler must already be fitted; a missing scaler or model only
    /// disables reconstruction scoring.
    pub fn start(
        config: &PipelineConfig,
        scaler: Option<Arc<FeatureScaler>>,
        model: Option<Arc<dyn ReconstructionModel>>,
        dispatcher: AlertDispatcher,
    ) -> Result<Self> {
        config.validate()?;

        if !dispatcher.is_configured() {
            error!("No alert channels configured, check the delivery settings");
            return Err(AnomalyError::Config(
                "no alert channels configured".to_string(),
            ));
        }
        if scaler.as_ref().is_some_and(|s| !s.is_fitted()) {
            return Err(AnomalyError::NotFitted);
        }

        // a sensor with no learned bounds never normalizes, so no window would be complete
        let unobserved = scaler
            .as_ref()
            .and_then(|s| s.params())
            .map(|p| p.unobserved())
            .unwrap_or_default();

        let scorer = match (&scaler, model) {
            (Some(_), Some(model)) if unobserved.is_empty() => {
                AnomalyScorer::new(model, config.window_size)
            }
            (Some(_), Some(model)) => {
                warn!(
                    model = %model.name(),
                    unobserved = ?unobserved.iter().map(|m| m.name()).collect::<Vec<_>>(),
                    "Fitting corpus has no values for some sensors, running rule-based detection only"
                );
                AnomalyScorer::degraded(config.window_size)
            }
            (scaler, model) => {
                warn!(
                    scaler_loaded = scaler.is_some(),
                    model_loaded = model.is_some(),
                    "Reconstruction model unavailable, running rule-based detection only"
                );
                AnomalyScorer::degraded(config.window_size)
            }
        };
        if let Some(name) = scorer.model_name() {
            info!(
                model = %name,
                window_size = scorer.window_size(),
                threshold = config.anomaly_threshold,
                "Reconstruction scoring enabled"
            );
        }

        let (queue, pool) = DispatchPool::spawn(
            Arc::new(dispatcher),
            config.dispatch.workers,
            config.dispatch.queue_capacity,
        );

        Ok(Self {
            rules: RuleEngine::from_config(&config.rules),
            window: WindowBuffer::new(config.window_size)?,
            scaler,
            scorer,
            threshold: config.anomaly_threshold,
            top_contributors: config.top_contributors,
            throttle: AlertThrottle::new(config.cooldown()),
            queue,
            pool,
            stats: PipelineStats::default(),
        })
    }

    /// Evaluate rules, slide the window, score when full and queue alerts.
    /// Never blocks on delivery and never fails: detection errors stay with
    /// this reading.
    pub fn process(&mut self, reading: &Reading) -> ReadingOutcome {
        self.stats.readings += 1;
        let mut outcome = ReadingOutcome {
            violations: self.rules.evaluate(reading),
            ..Default::default()
        };

        for violation in &outcome.violations {
            self.stats.violations += 1;
            warn!(
                metric = %violation.metric,
                observed = violation.observed,
                bound = %violation.bound,
                "Threshold rule violated"
            );
            let alert = Alert::from_violation(violation, reading.timestamp);
            if self.raise(alert) {
                outcome.alerts_enqueued += 1;
            }
        }

        if let Some(score) = self.score_reading(reading) {
            if score.is_anomalous(self.threshold) {
                self.stats.anomalies += 1;
                outcome.anomalous = true;
                warn!(
                    score = score.value,
                    threshold = self.threshold,
                    "Reconstruction anomaly detected"
                );
                let alert = Alert::from_score(&score, self.threshold, self.top_contributors);
                if self.raise(alert) {
                    outcome.alerts_enqueued += 1;
                }
            }
            outcome.score = Some(score);
        }

        debug!(
            timestamp = %reading.timestamp,
            violations = outcome.violations.len(),
            window = self.window.len(),
            score = ?outcome.score.as_ref().map(|s| s.value),
            "Reading processed"
        );
        outcome
    }

    // normalize into the window and score once it is full
    fn score_reading(&mut self, reading: &Reading) -> Option<AnomalyScore> {
        if !self.scorer.is_available() {
            return None;
        }
        let scaler = self.scaler.as_ref()?;

        match scaler.transform(&reading.features()) {
            Ok(normalized) => self.window.push(normalized),
            Err(e) => {
                self.stats.scoring_errors += 1;
                warn!("Failed to normalize reading: {}", e);
                return None;
            }
        }
        if !self.window.is_full() {
            return None;
        }

        match self.scorer.score(&self.window.snapshot()) {
            Ok(score) => {
                self.stats.scores += 1;
                Some(score)
            }
            Err(e) if e.is_not_ready() => None,
            Err(e) => {
                self.stats.scoring_errors += 1;
                warn!("Scoring skipped for this reading: {}", e);
                None
            }
        }
    }

    // cooldown check, then queue without waiting
    fn raise(&mut self, alert: Alert) -> bool {
        if !self.throttle.should_send(&alert) {
            self.stats.alerts_throttled += 1;
            debug!(source = %alert.source, "Alert suppressed by cooldown");
            return false;
        }
        let alert_id = alert.id;
        match self.queue.enqueue(alert) {
            Ok(()) => {
                self.stats.alerts_enqueued += 1;
                true
            }
            Err(EnqueueError::Full) => {
                self.stats.alerts_dropped += 1;
                warn!(alert_id = %alert_id, "Alert queue full, alert dropped");
                false
            }
            Err(EnqueueError::Closed) => {
                self.stats.alerts_dropped += 1;
                error!(alert_id = %alert_id, "Alert queue closed, alert dropped");
                false
            }
        }
    }

    /// Consume readings in arrival order until the source closes
    pub async fn run(&mut self, mut readings: mpsc::Receiver<Reading>) {
        info!("Pipeline started");
        while let Some(reading) = readings.recv().await {
            self.process(&reading);
        }
        info!(readings = self.stats.readings, "Reading source closed");
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn scoring_enabled(&self) -> bool {
        self.scorer.is_available()
    }

    /// Close the alert queue and wait for queued and in-flight deliveries
    pub async fn shutdown(self) -> (PipelineStats, Arc<DispatchStats>) {
        let Self {
            queue, pool, stats, ..
        } = self;
        drop(queue);
        let dispatch = pool.join().await;
        info!(
            readings = stats.readings,
            violations = stats.violations,
            scores = stats.scores,
            anomalies = stats.anomalies,
            alerts_enqueued = stats.alerts_enqueued,
            alerts_throttled = stats.alerts_throttled,
            alerts_dropped = stats.alerts_dropped,
            "Pipeline stopped"
        );
        (stats, dispatch)
    }
}
