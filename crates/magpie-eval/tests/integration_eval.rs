// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Harness behaviour under failures, panics and cancellation.

use async_trait::async_trait;
use magpie::prelude::*;
use magpie_eval::{EvalConfig, Evaluator, ExactMatch, RecordStatus};
use std::time::Duration;

fn qa_step() -> Step {
    Step::new("answer", Contract::parse("qa", "question -> answer").unwrap())
}

fn dataset(n: usize) -> Dataset {
    (0..n)
        .map(|i| {
            Example::new(
                format!("q{}", i),
                values([("question", i.to_string())]),
                values([("answer", (i * 2).to_string())]),
            )
        })
        .collect()
}

fn doubling_lm() -> Arc<dyn Lm> {
    Arc::new(MockLm::new(|req| {
        let n: usize = req.inputs["question"]
            .parse()
            .map_err(|_| LmError::malformed("not a number"))?;
        if n == 17 {
            return Err(LmError::safety("refused"));
        }
        Ok(values([("answer", (n * 2).to_string())]))
    }))
}

#[tokio::test]
async fn test_single_failure_is_isolated() {
    let evaluator = Evaluator::new(
        TraceRecorder::new(doubling_lm()).with_guard(QualityGuard::new(GuardPolicy::immediate(3))),
    );

    let result = evaluator
        .evaluate(&Chain::single(qa_step()), &dataset(50), &ExactMatch::new(), 8)
        .await
        .unwrap();

    assert_eq!(result.total(), 50);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.cancelled_count, 0);
    assert_eq!(
        result.per_example.iter().filter(|r| r.is_scored()).count(),
        49
    );
    let failed = &result.per_example[17];
    assert_eq!(failed.status, RecordStatus::Failed);
    assert_eq!(failed.score, 0.0);
    assert_eq!(failed.error.as_ref().unwrap().category, "non_transient");
    assert!((result.overall_score - 49.0 / 50.0).abs() < 1e-9);
}

/// Panics on one specific input.
#[derive(Clone)]
struct Fragile {
    step: Step,
}

#[async_trait]
impl Pipeline for Fragile {
    async fn run(&self, cx: &RunContext<'_>, input: &Values) -> Result<Values> {
        if input["question"] == "3" {
            panic!("fragile pipeline hit input 3");
        }
        cx.call(&self.step, input).await
    }

    fn steps(&self) -> Vec<&Step> {
        vec![&self.step]
    }

    fn steps_mut(&mut self) -> Vec<&mut Step> {
        vec![&mut self.step]
    }

    fn clone_pipeline(&self) -> Box<dyn Pipeline> {
        Box::new(self.clone())
    }
}

#[tokio::test]
async fn test_pipeline_panic_is_contained() {
    let evaluator = Evaluator::new(TraceRecorder::new(doubling_lm()));
    let pipeline = Fragile { step: qa_step() };

    let result = evaluator
        .evaluate(&pipeline, &dataset(6), &ExactMatch::new(), 3)
        .await
        .unwrap();

    assert_eq!(result.error_count, 1);
    let record = &result.per_example[3];
    assert_eq!(record.error.as_ref().unwrap().category, "panic");
    assert!(record
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("fragile pipeline"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_drains_in_flight() {
    let handle = CancelHandle::new();
    let lm: Arc<dyn Lm> = Arc::new(
        MockLm::new(|req| Ok(values([("answer", (req.inputs["question"].parse::<usize>().unwrap_or(0) * 2).to_string())])))
            .with_latency(Duration::from_millis(50)),
    );
    let evaluator = Evaluator::new(TraceRecorder::new(lm).with_cancel(handle.token()))
        .with_config(EvalConfig::default().with_drain_timeout(Duration::from_secs(5)));

    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        })
    };

    let result = evaluator
        .evaluate(&Chain::single(qa_step()), &dataset(20), &ExactMatch::new(), 4)
        .await
        .unwrap();
    canceller.await.unwrap();

    let scored = result.per_example.iter().filter(|r| r.is_scored()).count();
    assert_eq!(scored, 4);
    assert_eq!(result.cancelled_count, 16);
    assert_eq!(result.error_count, 0);
    assert!((result.overall_score - 4.0 / 20.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_respects_drain_timeout() {
    let handle = CancelHandle::new();
    let lm: Arc<dyn Lm> = Arc::new(
        MockLm::new(|_| Ok(values([("answer", "slow")]))).with_latency(Duration::from_secs(600)),
    );
    let evaluator = Evaluator::new(TraceRecorder::new(lm).with_cancel(handle.token()))
        .with_config(EvalConfig::default().with_drain_timeout(Duration::from_secs(1)));

    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        })
    };

    let started = tokio::time::Instant::now();
    let result = evaluator
        .evaluate(&Chain::single(qa_step()), &dataset(10), &ExactMatch::new(), 2)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.cancelled_count, 10);
    assert_eq!(result.overall_score, 0.0);
}
