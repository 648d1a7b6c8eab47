//! Zero-shot text classification on top of an NLI model.
//!
//! Each candidate label becomes a hypothesis ("This example is {label}.")
//! paired with the post as premise. Multi-label mode scores every label
//! independently; single-label mode makes the labels compete.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use skytrend_common::file_config::FilterConfig;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::traits::{NliModel, CONTRADICTION, ENTAILMENT};

#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Scores per label, highest first.
    async fn classify(
        &self,
        text: &str,
        labels: &[String],
        multi_label: bool,
    ) -> Result<Vec<(String, f64)>>;
}

pub struct ZeroShotClassifier {
    model: Arc<dyn NliModel>,
    hypothesis_template: String,
    // Inference is heavy; the filter pool shares a few permits instead of
    // letting every worker hit the model at once.
    permits: Semaphore,
}

impl ZeroShotClassifier {
    pub fn new(model: Arc<dyn NliModel>, hypothesis_template: impl Into<String>, concurrency: usize) -> Self {
        Self {
            model,
            hypothesis_template: hypothesis_template.into(),
            permits: Semaphore::new(concurrency.max(1)),
        }
    }

    fn hypothesis(&self, label: &str) -> String {
        apply_template(&self.hypothesis_template, label)
    }
}

#[async_trait]
impl TextClassifier for ZeroShotClassifier {
    async fn classify(
        &self,
        text: &str,
        labels: &[String],
        multi_label: bool,
    ) -> Result<Vec<(String, f64)>> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }

        let mut logits = Vec::with_capacity(labels.len());
        {
            let _permit = self.permits.acquire().await?;
            for label in labels {
                logits.push(self.model.logits(text, &self.hypothesis(label)).await?);
            }
        }

        let scores = if multi_label {
            multi_label_scores(&logits)
        } else {
            single_label_scores(&logits)
        };

        let mut ranked: Vec<(String, f64)> = labels.iter().cloned().zip(scores).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked)
    }
}

/// Substitute the first `{}`; templates without one get the label appended.
pub fn apply_template(template: &str, label: &str) -> String {
    match template.find("{}") {
        Some(pos) => format!("{}{}{}", &template[..pos], label, &template[pos + 2..]),
        None => format!("{template}{label}"),
    }
}

/// Entailment probability of a softmax over `[contradiction, entailment]`, per label.
pub fn multi_label_scores(logits: &[[f32; 3]]) -> Vec<f64> {
    logits
        .iter()
        .map(|l| {
            let c = l[CONTRADICTION] as f64;
            let e = l[ENTAILMENT] as f64;
            let m = c.max(e);
            let (ec, ee) = ((c - m).exp(), (e - m).exp());
            ee / (ec + ee)
        })
        .collect()
}

/// Softmax of the entailment logits across labels.
pub fn single_label_scores(logits: &[[f32; 3]]) -> Vec<f64> {
    let entail: Vec<f64> = logits.iter().map(|l| l[ENTAILMENT] as f64).collect();
    let m = entail.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = entail.iter().map(|e| (e - m).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

// --- Content gate ---

/// Accept/reject decision for the filter stage.
pub struct ContentFilter {
    classifier: Arc<dyn TextClassifier>,
    labels: Vec<String>,
    multi_label: bool,
    threshold: f64,
}

impl ContentFilter {
    pub fn new(classifier: Arc<dyn TextClassifier>, config: &FilterConfig) -> Self {
        Self {
            classifier,
            labels: config.labels.clone(),
            multi_label: config.multi_label,
            threshold: config.threshold,
        }
    }

    /// True iff some label scores strictly above the threshold.
    /// Classifier failures count as a rejection.
    pub async fn accepts(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        match self.classifier.classify(text, &self.labels, self.multi_label).await {
            Ok(scores) => scores.iter().any(|(_, score)| *score > self.threshold),
            Err(e) => {
                warn!(error = %e, "Classification failed, rejecting post");
                false
            }
        }
    }
}
