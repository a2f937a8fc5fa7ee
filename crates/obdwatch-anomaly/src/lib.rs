//! Vehicle sensor anomaly detection & alerting

pub mod config;
pub mod error;
pub mod scaler;
pub mod window;
pub mod rules;
pub mod model;
pub mod scorer;
pub mod alerting;
pub mod mailer;
pub mod dispatch;
pub mod pool;
pub mod pipeline;

pub use config::{PipelineConfig, load_config};
pub use error::AnomalyError;
pub use scaler::{FeatureScaler, NormalizationParams};
pub use window::WindowBuffer;
pub use rules::{RuleEngine, RuleViolation};
pub use model::{ReconstructionModel, WindowMeanModel};
pub use scorer::{AnomalyScore, AnomalyScorer};
pub use alerting::{Alert, AlertSource};
pub use mailer::{MailTransport, SmtpMailer};
pub use dispatch::{AlertDispatcher, DispatchError, DispatchReport, DispatchState};
pub use pipeline::Pipeline;
