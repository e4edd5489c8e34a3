//! Outbound collaborators: decision submission to the policy management
//! service and PM job registration with the information coordinator.
//!
//! Both are single-attempt calls. Failures are reported and logged, never retried,
//! and never roll back the tracked cell state.

use crate::config::{CoordinatorConfig, PolicyConfig};
use crate::decision::{Action, ProcessedUpdate, Thresholds};
use crate::error::{AppError, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Decisions waiting for submission; newer ones are dropped once this is full
pub const DECISION_QUEUE: usize = 1024;

/// Decision record emitted for every update that carries an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub cell_id: String,
    pub action: Action,
    pub reason: String,
    pub utilization: f64,
    pub threshold_used: f64,
    pub timestamp: String,
}

impl PolicyDecision {
    /// `None` when the update recommends no action
    pub fn from_update(update: &ProcessedUpdate, thresholds: &Thresholds) -> Option<Self> {
        let threshold_used = thresholds.threshold_for(update.action)?;
        Some(Self {
            cell_id: update.cell_id.clone(),
            action: update.action,
            reason: update.reason.clone(),
            utilization: update.utilization,
            threshold_used,
            timestamp: update.timestamp.clone(),
        })
    }
}

pub struct PolicyClient {
    http: reqwest::Client,
    config: PolicyConfig,
}

impl PolicyClient {
    pub fn new(config: PolicyConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    /// Policy ids are unique per cell and second
    pub fn policy_id(cell_id: &str, unix_secs: i64) -> String {
        format!(
            "energy_save_{}_{}",
            cell_id.replace(['/', '='], "_"),
            unix_secs
        )
    }

    pub fn policy_body(&self, decision: &PolicyDecision, policy_id: &str) -> Value {
        json!({
            "policy_id": policy_id,
            "policytype_id": self.config.policy_type_id,
            "ric_id": self.config.ric_id,
            "service_id": self.config.service_id,
            "policy_data": {
                "cell_id": decision.cell_id,
                "action": decision.action,
                "reason": "traffic_based_energy_saving",
                "detail": decision.reason,
                "utilization": (decision.utilization * 100.0).round() / 100.0,
                "threshold": decision.threshold_used,
                "timestamp": decision.timestamp,
            }
        })
    }

    /// Submit one decision; returns the policy id on success
    pub async fn submit(&self, decision: &PolicyDecision) -> Result<String> {
        let policy_id = Self::policy_id(&decision.cell_id, chrono::Utc::now().timestamp());
        let body = self.policy_body(decision, &policy_id);
        let url = format!("{}/a1-policy/v2/policies", self.config.url.trim_end_matches('/'));

        debug!(%url, %policy_id, "sending policy");
        let response = self.http.put(&url).json(&body).send().await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(policy_id),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(AppError::Policy(format!("{} returned {}: {}", url, status, text)))
            }
        }
    }
}

/// Consume decisions until every sender is gone. Without a client they are only logged.
pub async fn run_submitter(
    mut decisions: mpsc::Receiver<PolicyDecision>,
    client: Option<PolicyClient>,
) {
    let mut submitted = 0u64;
    let mut failed = 0u64;

    while let Some(decision) = decisions.recv().await {
        let Some(client) = client.as_ref() else {
            info!(
                cell_id = %decision.cell_id,
                action = ?decision.action,
                utilization = decision.utilization,
                threshold = decision.threshold_used,
                "decision (no policy service configured)"
            );
            continue;
        };

        match client.submit(&decision).await {
            Ok(policy_id) => {
                submitted += 1;
                info!(cell_id = %decision.cell_id, action = ?decision.action, %policy_id, "policy submitted");
            }
            Err(e) => {
                failed += 1;
                warn!(cell_id = %decision.cell_id, action = ?decision.action, error = %e, "policy submission failed");
            }
        }
    }

    info!(submitted, failed, "policy submitter stopped");
}

/// Registration of the PM data job with the information coordinator
pub struct CoordinatorClient {
    http: reqwest::Client,
    config: CoordinatorConfig,
}

impl CoordinatorClient {
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    pub fn job_id(&self) -> String {
        format!("rapp-job-pm-energy-saving-{}", self.config.consumer_id)
    }

    fn job_url(&self) -> String {
        format!(
            "{}/data-consumer/v1/info-jobs/{}",
            self.config.url.trim_end_matches('/'),
            self.job_id()
        )
    }

    pub fn job_definition(&self, bootstrap_servers: &str) -> Value {
        let callback = self.config.callback_base_url.trim_end_matches('/');
        json!({
            "info_type_id": self.config.info_type,
            "job_owner": self.config.consumer_id,
            "job_definition": {
                "filter": {
                    "sourceNames": [],
                    "measObjInstIds": [],
                    "measTypeSpecs": [{
                        "measuredObjClass": "NRCellDU",
                        "measTypes": [
                            "pmRadioPrbUsedDl",
                            "pmRadioPrbUsedUl",
                            "pmRadioThpVolDl",
                            "pmRadioThpVolUl"
                        ]
                    }]
                },
                "deliveryInfo": {
                    "topic": self.config.delivery_topic,
                    "bootStrapServers": bootstrap_servers
                }
            },
            "job_result_uri": format!("{}/stats", callback),
            "status_notification_uri": format!("{}/status", callback),
        })
    }

    /// Register the job; the accepted delivery topic is returned
    pub async fn register(&self, bootstrap_servers: &str) -> Result<String> {
        let url = self.job_url();
        let response = self
            .http
            .put(&url)
            .json(&self.job_definition(bootstrap_servers))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                info!(job_id = %self.job_id(), topic = %self.config.delivery_topic, "registered PM job with coordinator");
                Ok(self.config.delivery_topic.clone())
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(AppError::Coordinator(format!("{} returned {}: {}", url, status, text)))
            }
        }
    }

    /// Best-effort removal of the job at shutdown
    pub async fn deregister(&self) {
        let url = self.job_url();
        match self.http.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(job_id = %self.job_id(), "deregistered PM job");
            }
            Ok(response) => {
                warn!(job_id = %self.job_id(), status = %response.status(), "failed to deregister PM job");
            }
            Err(e) => {
                error!(job_id = %self.job_id(), error = %e, "error deregistering PM job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::HysteresisEngine;

    fn policy_config() -> PolicyConfig {
        PolicyConfig {
            url: "http://pms.local:8081/".to_string(),
            ric_id: "ric1".to_string(),
            service_id: "energy-saving-rapp".to_string(),
            policy_type_id: "2".to_string(),
        }
    }

    #[test]
    fn test_decision_only_for_actions() {
        let engine = HysteresisEngine::default();
        let thresholds = *engine.thresholds();

        let none = engine.decide("cell-1", 50.0);
        assert!(PolicyDecision::from_update(&none, &thresholds).is_none());

        let off = engine.decide("cell-1", 10.0);
        let decision = PolicyDecision::from_update(&off, &thresholds).unwrap();
        assert_eq!(decision.action, Action::SwitchOff);
        assert_eq!(decision.threshold_used, 20.0);

        let on = engine.decide("cell-1", 80.0);
        let decision = PolicyDecision::from_update(&on, &thresholds).unwrap();
        assert_eq!(decision.action, Action::SwitchOn);
        assert_eq!(decision.threshold_used, 70.0);
    }

    #[test]
    fn test_policy_id_sanitized() {
        let id = PolicyClient::policy_id("ManagedElement=o-du-1,GNBDUFunction=1/NRCellDU=2", 1700000000);
        assert_eq!(
            id,
            "energy_save_ManagedElement_o-du-1,GNBDUFunction_1_NRCellDU_2_1700000000"
        );
    }

    #[test]
    fn test_policy_body() {
        let client = PolicyClient::new(policy_config()).unwrap();
        let decision = PolicyDecision {
            cell_id: "cell-1".to_string(),
            action: Action::SwitchOff,
            reason: "low".to_string(),
            utilization: 12.3456,
            threshold_used: 20.0,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
        };

        let body = client.policy_body(&decision, "p-1");
        assert_eq!(body["policy_id"], "p-1");
        assert_eq!(body["ric_id"], "ric1");
        assert_eq!(body["policytype_id"], "2");
        assert_eq!(body["policy_data"]["action"], "switch_off");
        assert_eq!(body["policy_data"]["utilization"], 12.35);
        assert_eq!(body["policy_data"]["threshold"], 20.0);
    }

    #[test]
    fn test_job_definition() {
        let client = CoordinatorClient::new(CoordinatorConfig {
            url: "http://ics:8083".to_string(),
            consumer_id: "energy-saving-rapp".to_string(),
            callback_base_url: "http://energy-saving-rapp.nonrt:8080/".to_string(),
            info_type: "PmData".to_string(),
            delivery_topic: "rapp-topic".to_string(),
        })
        .unwrap();

        assert_eq!(client.job_id(), "rapp-job-pm-energy-saving-energy-saving-rapp");
        assert_eq!(
            client.job_url(),
            "http://ics:8083/data-consumer/v1/info-jobs/rapp-job-pm-energy-saving-energy-saving-rapp"
        );

        let job = client.job_definition("kafka:9092");
        assert_eq!(job["info_type_id"], "PmData");
        assert_eq!(job["job_definition"]["deliveryInfo"]["topic"], "rapp-topic");
        assert_eq!(job["job_definition"]["deliveryInfo"]["bootStrapServers"], "kafka:9092");
        assert_eq!(job["job_result_uri"], "http://energy-saving-rapp.nonrt:8080/stats");
    }

    #[tokio::test]
    async fn test_registration_failure_is_error() {
        let client = CoordinatorClient::new(CoordinatorConfig {
            url: "http://127.0.0.1:1".to_string(),
            consumer_id: "test".to_string(),
            callback_base_url: "http://localhost".to_string(),
            info_type: "PmData".to_string(),
            delivery_topic: "rapp-topic".to_string(),
        })
        .unwrap();

        assert!(client.register("localhost:9092").await.is_err());
    }

    #[tokio::test]
    async fn test_submitter_without_client_drains() {
        let (tx, rx) = mpsc::channel(DECISION_QUEUE);
        let engine = HysteresisEngine::default();
        let update = engine.decide("cell-1", 1.0);
        tx.try_send(PolicyDecision::from_update(&update, engine.thresholds()).unwrap())
            .unwrap();
        drop(tx);

        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), run_submitter(rx, None)).await
        );
    }
}
