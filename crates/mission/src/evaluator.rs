//! Scoring executions against their goal.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use supermean_common::{InvalidStructure, Result, SuperMeanError};
use supermean_llm::TextGenerator;
use tracing::{debug, error, info, warn};

use crate::config::EvaluatorConfig;
use crate::llm_output::{parse_json, pretty, preview};
use crate::plan::{Evaluation, ExecutionMetrics, ExecutionResult, Step};

const REQUIRED_KEYS: &[&str] = &["overall_success", "score", "reasoning", "suggestions"];

/// Aggregate view over recent evaluations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalAnalysis {
    pub average_score: f64,
    pub average_success_rate: f64,
    pub num_records_analyzed: usize,
    pub recent_trends: Trend,
}

/// First half of the analyzed window compared with the second half.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    /// `None` with fewer than two records.
    pub improving: Option<bool>,
    pub first_half_avg: f64,
    pub second_half_avg: f64,
    pub score_diff: f64,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    score: f64,
    success_rate: f64,
}

pub struct Evaluator {
    llm: Arc<dyn TextGenerator>,
    config: EvaluatorConfig,
    history: Mutex<VecDeque<HistoryEntry>>,
}

impl Evaluator {
    pub fn new(llm: Arc<dyn TextGenerator>, config: EvaluatorConfig) -> Self {
        Self {
            llm,
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Score an execution.
    ///
    /// A failed execution is scored 0 without asking the model. Otherwise
    /// the model is asked up to `max_retries` times until its verdict meets
    /// the configured thresholds; the last verdict is kept either way.
    pub async fn evaluate_execution(
        &self,
        goal: &str,
        plan: &[Step],
        result: &ExecutionResult,
    ) -> Result<Evaluation> {
        let metrics = ExecutionMetrics::compute(plan, result);

        if !result.is_success() {
            let reasoning = result.failure_summary();
            info!(reasoning = %reasoning, "Execution failed; skipping LLM evaluation");
            let evaluation = Evaluation {
                overall_success: false,
                score: 0.0,
                reasoning,
                suggestions: vec![
                    "Review the failed step's error and its inputs.".into(),
                    "Revise the plan or retry the failed step.".into(),
                ],
                metrics: Some(metrics),
                validation_passed: false,
                validation_issues: Vec::new(),
            };
            self.record(&evaluation);
            return Ok(evaluation);
        }

        let prompt = build_prompt(goal, plan, result);
        let attempts = self.config.max_retries.max(1);
        let mut outcome: Option<Result<Evaluation>> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay_ms * u64::from(attempt + 1);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }

            let mut evaluation = match self.ask(&prompt).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Evaluation attempt failed");
                    outcome = Some(Err(e));
                    continue;
                }
            };

            evaluation.validation_issues = self.threshold_issues(&evaluation, &metrics);
            evaluation.validation_passed = evaluation.validation_issues.is_empty();
            evaluation.metrics = Some(metrics.clone());

            if evaluation.validation_passed {
                outcome = Some(Ok(evaluation));
                break;
            }
            warn!(
                attempt = attempt + 1,
                issues = ?evaluation.validation_issues,
                "Evaluation below thresholds"
            );
            outcome = Some(Ok(evaluation));
        }

        match outcome {
            Some(Ok(evaluation)) => {
                info!(
                    success = evaluation.overall_success,
                    score = evaluation.score,
                    validation_passed = evaluation.validation_passed,
                    "Evaluation complete"
                );
                self.record(&evaluation);
                Ok(evaluation)
            }
            Some(Err(e)) => {
                error!(error = %e, "Evaluation failed");
                Err(e)
            }
            None => Err(SuperMeanError::evaluation(
                "Evaluation was not attempted",
                InvalidStructure("no attempts configured".into()),
            )),
        }
    }

    async fn ask(&self, prompt: &str) -> Result<Evaluation> {
        let raw = self
            .llm
            .generate(prompt, Some(&self.config.preferred_model))
            .await
            .map_err(|e| {
                SuperMeanError::evaluation(format!("LLM interaction failed during evaluation: {e}"), e)
            })?;
        debug!(response = %preview(&raw, 200), "Evaluator LLM response");
        parse_evaluation(&raw)
    }

    fn threshold_issues(&self, evaluation: &Evaluation, metrics: &ExecutionMetrics) -> Vec<String> {
        let mut issues = Vec::new();
        if evaluation.score < self.config.min_score {
            issues.push(format!(
                "Score {:.2} below minimum threshold {:.2}",
                evaluation.score, self.config.min_score
            ));
        }
        if metrics.success_rate < self.config.min_success_rate {
            issues.push(format!(
                "Success rate {:.2} below minimum threshold {:.2}",
                metrics.success_rate, self.config.min_success_rate
            ));
        }
        issues
    }

    fn record(&self, evaluation: &Evaluation) {
        let entry = HistoryEntry {
            score: evaluation.score,
            success_rate: evaluation
                .metrics
                .as_ref()
                .map(|m| m.success_rate)
                .unwrap_or_default(),
        };
        let mut history = self.history.lock();
        history.push_back(entry);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Averages and trend over the last `num_records` evaluations, or
    /// `None` when nothing has been evaluated yet.
    pub fn get_historical_analysis(&self, num_records: usize) -> Option<HistoricalAnalysis> {
        let history = self.history.lock();
        if history.is_empty() || num_records == 0 {
            return None;
        }
        let recent: Vec<&HistoryEntry> = history
            .iter()
            .skip(history.len().saturating_sub(num_records))
            .collect();
        let n = recent.len() as f64;
        let average_score = recent.iter().map(|e| e.score).sum::<f64>() / n;
        let average_success_rate = recent.iter().map(|e| e.success_rate).sum::<f64>() / n;

        let recent_trends = if recent.len() >= 2 {
            let mid = recent.len() / 2;
            let avg = |xs: &[&HistoryEntry]| xs.iter().map(|e| e.score).sum::<f64>() / xs.len() as f64;
            let first_half_avg = avg(&recent[..mid]);
            let second_half_avg = avg(&recent[mid..]);
            Trend {
                improving: Some(second_half_avg > first_half_avg),
                first_half_avg,
                second_half_avg,
                score_diff: second_half_avg - first_half_avg,
            }
        } else {
            Trend {
                improving: None,
                first_half_avg: average_score,
                second_half_avg: average_score,
                score_diff: 0.0,
            }
        };

        Some(HistoricalAnalysis {
            average_score,
            average_success_rate,
            num_records_analyzed: recent.len(),
            recent_trends,
        })
    }
}

fn build_prompt(goal: &str, plan: &[Step], result: &ExecutionResult) -> String {
    let outputs: Map<String, Value> = result
        .step_outputs
        .iter()
        .map(|(id, v)| (id.to_string(), v.clone()))
        .collect();
    let final_summary = result
        .final_result
        .as_ref()
        .map(|v| preview(&v.to_string(), 1000))
        .unwrap_or_else(|| "No final result".into());

    format!(
        "You are an evaluation agent. Judge whether the executed plan achieved the goal.\n\n\
         Goal: {goal}\n\n\
         Plan:\n{plan}\n\n\
         Step outputs:\n{outputs}\n\n\
         Final result: {final_summary}\n\n\
         Respond with a JSON object only, with exactly these keys:\n\
         - \"overall_success\": boolean\n\
         - \"score\": number between 0 and 1\n\
         - \"reasoning\": string\n\
         - \"suggestions\": list of strings",
        plan = pretty(&plan),
        outputs = pretty(&json!(outputs)),
    )
}

/// Parse and validate the evaluator's JSON verdict. The score is clamped to
/// `[0, 1]`.
pub fn parse_evaluation(raw: &str) -> Result<Evaluation> {
    let value = parse_json(raw).map_err(|e| {
        SuperMeanError::evaluation(format!("Failed to parse evaluation JSON from LLM: {e}"), e)
    })?;
    let invalid = |reason: String| {
        SuperMeanError::evaluation(
            format!("Invalid evaluation structure from LLM: {reason}"),
            InvalidStructure(reason),
        )
    };

    let Value::Object(obj) = value else {
        return Err(invalid("LLM did not return a JSON object.".into()));
    };
    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(invalid(format!(
            "Evaluation JSON missing required keys: {}",
            missing.join(", ")
        )));
    }

    let overall_success = obj["overall_success"]
        .as_bool()
        .ok_or_else(|| invalid("'overall_success' must be a boolean.".into()))?;
    let score = obj["score"]
        .as_f64()
        .ok_or_else(|| invalid("'score' must be a number.".into()))?;
    let reasoning = obj["reasoning"]
        .as_str()
        .ok_or_else(|| invalid("'reasoning' must be a string.".into()))?
        .to_string();
    let suggestions = obj["suggestions"]
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|s| s.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| invalid("'suggestions' must be a list of strings.".into()))?;

    Ok(Evaluation {
        overall_success,
        score: score.clamp(0.0, 1.0),
        reasoning,
        suggestions,
        metrics: None,
        validation_passed: false,
        validation_issues: Vec::new(),
    })
}
