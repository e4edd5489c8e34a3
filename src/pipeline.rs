use crate::bridge::BridgeSender;
use crate::decision::HysteresisEngine;
use crate::extract::extract;
use crate::policy::PolicyDecision;
use crate::telemetry::FallbackSource;
use futures::StreamExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters reported when the ingestion loop stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub processed: u64,
    pub skipped: u64,
    pub decisions: u64,
    /// Decisions not forwarded because the submitter queue was full
    pub decisions_dropped: u64,
}

/// Pull samples, decide, and hand each update to the bridge until `shutdown`
/// fires or the bridge is closed from the other side.
///
/// Samples that cannot be interpreted are skipped. Updates that carry an action
/// are also sent as decisions. The bridge is closed on exit so the broadcaster
/// can drain what is left and stop.
pub async fn run_ingestion(
    source: FallbackSource,
    engine: HysteresisEngine,
    bridge: BridgeSender,
    decisions: mpsc::Sender<PolicyDecision>,
    shutdown: CancellationToken,
) -> IngestStats {
    info!(mode = ?source.mode(), "ingestion started");

    let mut stats = IngestStats::default();
    let samples = source.into_stream();
    tokio::pin!(samples);

    loop {
        let sample = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("shutdown requested, stopping ingestion");
                break;
            }
            next = samples.next() => match next {
                Some(sample) => sample,
                None => break,
            },
        };
        stats.received += 1;

        let measurement = match extract(&sample) {
            Ok(measurement) => measurement,
            Err(e) => {
                stats.skipped += 1;
                debug!(error = %e, "skipping sample");
                continue;
            }
        };

        let update = engine.process(&measurement);
        stats.processed += 1;

        if let Some(decision) = PolicyDecision::from_update(&update, engine.thresholds()) {
            stats.decisions += 1;
            if !forward_decision(&decisions, decision) {
                stats.decisions_dropped += 1;
            }
        }

        if bridge.push(update).is_err() {
            warn!("event bridge closed, stopping ingestion");
            break;
        }
    }

    bridge.close();
    info!(
        received = stats.received,
        processed = stats.processed,
        skipped = stats.skipped,
        decisions = stats.decisions,
        decisions_dropped = stats.decisions_dropped,
        cells = engine.len(),
        "ingestion stopped"
    );
    stats
}

/// Hand a decision to the submitter without waiting. Returns false when it was dropped.
fn forward_decision(decisions: &mpsc::Sender<PolicyDecision>, decision: PolicyDecision) -> bool {
    match decisions.try_send(decision) {
        Ok(()) => true,
        Err(TrySendError::Full(decision)) => {
            warn!(
                cell_id = %decision.cell_id,
                action = ?decision.action,
                "policy submitter backlog full, decision dropped"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("policy submitter gone, decision not forwarded");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge;
    use crate::config::SyntheticConfig;
    use crate::telemetry::{SyntheticSource, TelemetrySource};
    use std::time::Duration;

    fn synthetic_source() -> FallbackSource {
        let config = SyntheticConfig {
            groups: 2,
            cells_per_group: 2,
            tick_millis: 5,
            ..SyntheticConfig::default()
        };
        let source = TelemetrySource::Synthetic(SyntheticSource::with_seed(&config, 3));
        FallbackSource::new(source, config)
    }

    #[tokio::test]
    async fn test_ingestion_stops_on_cancel_and_closes_bridge() {
        let (tx, mut rx) = bridge::channel(None);
        let (decision_tx, _decision_rx) = mpsc::channel(crate::policy::DECISION_QUEUE);
        let token = CancellationToken::new();

        let task = tokio::spawn(run_ingestion(
            synthetic_source(),
            HysteresisEngine::default(),
            tx.clone(),
            decision_tx,
            token.clone(),
        ));

        // The first tick covers every cell
        let mut cells = std::collections::HashSet::new();
        for _ in 0..4 {
            let update = tokio::time::timeout(Duration::from_secs(2), rx.pop())
                .await
                .unwrap()
                .unwrap();
            assert!((0.0..=100.0).contains(&update.utilization));
            cells.insert(update.cell_id);
        }
        assert_eq!(cells.len(), 4);

        token.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(tx.is_closed());
        assert!(stats.processed >= 4);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.received, stats.processed);

        // Remaining updates drain, then the bridge reports the end
        while rx.pop().await.is_some() {}
    }

    #[tokio::test]
    async fn test_ingestion_stops_when_bridge_closed() {
        let (tx, rx) = bridge::channel(None);
        let (decision_tx, _decision_rx) = mpsc::channel(crate::policy::DECISION_QUEUE);
        drop(rx);

        let stats = tokio::time::timeout(
            Duration::from_secs(2),
            run_ingestion(
                synthetic_source(),
                HysteresisEngine::default(),
                tx,
                decision_tx,
                CancellationToken::new(),
            ),
        )
        .await
        .unwrap();

        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn test_decisions_match_actions() {
        let (tx, mut rx) = bridge::channel(None);
        let (decision_tx, mut decision_rx) = mpsc::channel(crate::policy::DECISION_QUEUE);
        let token = CancellationToken::new();

        let task = tokio::spawn(run_ingestion(
            synthetic_source(),
            HysteresisEngine::default(),
            tx,
            decision_tx,
            token.clone(),
        ));

        let mut actions = 0;
        for _ in 0..40 {
            let update = rx.pop().await.unwrap();
            if !update.action.is_none() {
                actions += 1;
            }
        }
        token.cancel();
        let stats = task.await.unwrap();
        while rx.pop().await.is_some() {}

        let mut forwarded = 0;
        while let Ok(decision) = decision_rx.try_recv() {
            assert!(!decision.action.is_none());
            forwarded += 1;
        }
        assert!(forwarded >= actions);
        assert_eq!(forwarded, stats.decisions);
        assert_eq!(stats.decisions_dropped, 0);
    }

    #[test]
    fn test_full_decision_queue_drops_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        let engine = HysteresisEngine::default();
        let off = engine.decide("cell-1", 5.0);
        let on = engine.decide("cell-1", 95.0);
        let first = PolicyDecision::from_update(&off, engine.thresholds()).unwrap();
        let second = PolicyDecision::from_update(&on, engine.thresholds()).unwrap();

        assert!(forward_decision(&tx, first.clone()));
        assert!(!forward_decision(&tx, second));
        assert_eq!(rx.try_recv().unwrap(), first);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!forward_decision(&tx, first));
    }
}
