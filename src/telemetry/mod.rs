pub mod live;
pub mod synthetic;

pub use live::LiveSource;
pub use synthetic::SyntheticSource;

use crate::config::{KafkaConfig, SyntheticConfig};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// One raw telemetry record as received from a source
#[derive(Debug, Clone)]
pub struct Sample {
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("no message on topic {topic} within {quiet_period:?}")]
    Exhausted { topic: String, quiet_period: Duration },

    #[error("live feed unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Live,
    Synthetic,
}

/// The two concrete telemetry sources
pub enum TelemetrySource {
    Live(Box<LiveSource>),
    Synthetic(SyntheticSource),
}

impl TelemetrySource {
    pub fn mode(&self) -> SourceMode {
        match self {
            TelemetrySource::Live(_) => SourceMode::Live,
            TelemetrySource::Synthetic(_) => SourceMode::Synthetic,
        }
    }

    /// Next sample. Only the live source can fail; synthetic never exhausts.
    pub async fn next_sample(&mut self) -> Result<Sample, SourceError> {
        match self {
            TelemetrySource::Live(live) => live.next_sample().await,
            TelemetrySource::Synthetic(synthetic) => Ok(synthetic.next_sample().await),
        }
    }
}

/// Source that starts live when possible and switches to synthetic data for the
/// rest of the process lifetime once the live feed fails or goes quiet.
pub struct FallbackSource {
    source: TelemetrySource,
    synthetic: SyntheticConfig,
    mode: watch::Sender<SourceMode>,
}

impl FallbackSource {
    pub fn new(source: TelemetrySource, synthetic: SyntheticConfig) -> Self {
        let (mode, _) = watch::channel(source.mode());
        Self {
            source,
            synthetic,
            mode,
        }
    }

    /// Try the live feed on `topic`; any missing piece selects synthetic data right away
    pub fn open(
        kafka: Option<&KafkaConfig>,
        topic: Option<String>,
        synthetic: SyntheticConfig,
    ) -> Self {
        let live = match (kafka, topic) {
            (Some(kafka), Some(topic)) => {
                LiveSource::connect(kafka, &topic).map_err(|e| e.to_string())
            }
            (None, _) => Err("no kafka configuration".to_string()),
            (Some(_), None) => Err("no topic assigned".to_string()),
        };

        match live {
            Ok(live) => {
                info!(topic = %live.topic(), "telemetry source: live");
                Self::new(TelemetrySource::Live(Box::new(live)), synthetic)
            }
            Err(reason) => {
                warn!(%reason, "live telemetry unavailable, switching to synthetic data");
                let source = TelemetrySource::Synthetic(SyntheticSource::new(&synthetic));
                Self::new(source, synthetic)
            }
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.source.mode()
    }

    /// Observe the current mode and the live → synthetic transition
    pub fn subscribe_mode(&self) -> watch::Receiver<SourceMode> {
        self.mode.subscribe()
    }

    pub async fn next_sample(&mut self) -> Sample {
        loop {
            match self.source.next_sample().await {
                Ok(sample) => return sample,
                Err(e) => self.fall_back(&e),
            }
        }
    }

    /// Lazy, unbounded stream of samples
    pub fn into_stream(self) -> impl Stream<Item = Sample> {
        futures::stream::unfold(self, |mut source| async move {
            let sample = source.next_sample().await;
            Some((sample, source))
        })
    }

    fn fall_back(&mut self, error: &SourceError) {
        warn!(error = %error, "live telemetry lost, switching to synthetic data permanently");
        self.source = TelemetrySource::Synthetic(SyntheticSource::new(&self.synthetic));
        self.mode.send_replace(SourceMode::Synthetic);
    }
}
