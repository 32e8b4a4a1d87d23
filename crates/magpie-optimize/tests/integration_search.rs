// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Search controller behaviour with mocked LMs.

use async_trait::async_trait;
use magpie::prelude::*;
use magpie::{LmRequest, ProgramState, UsageMeter};
use magpie_cache::CachedLm;
use magpie_client::{LmPool, PooledLm};
use magpie_eval::{EvalConfig, Evaluator, ExactMatch};
use magpie_optimize::{
    BootstrapConfig, BootstrapFewShot, BudgetConfig, Candidate, Critic, FailureCase, IdGen,
    InstructionConfig, InstructionProposer, InstructionSearch, LabeledConfig, LabeledFewShot,
    LmCritic, LmProposer, ProposalRequest, ProposeContext, Reflective, ReflectiveConfig,
    RemainingBudget, SearchConfig, SearchController, SearchState, Selection, StopReason, Strategy,
};
use parking_lot::Mutex;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn qa_chain() -> Chain {
    let contract = Contract::builder("qa")
        .instructions("Answer the question.")
        .input(Field::input("question", "A question"))
        .output(Field::output("answer", "A short answer"))
        .build()
        .unwrap();
    Chain::single(Step::new("qa", contract))
}

fn example(id: &str, question: &str, answer: &str) -> Example {
    Example::new(
        id,
        values([("question", question)]),
        values([("answer", answer)]),
    )
}

/// Questions look like `kind:answer`; the mock answers correctly depending on kind.
fn split_question(req: &LmRequest) -> (String, String) {
    let question = req.inputs.get("question").cloned().unwrap_or_default();
    match question.split_once(':') {
        Some((kind, answer)) => (kind.to_string(), answer.to_string()),
        None => (question, String::new()),
    }
}

fn answer(text: &str) -> Values {
    values([("answer", text)])
}

fn fast_config() -> SearchConfig {
    SearchConfig::default()
        .with_guard(GuardPolicy::immediate(1))
        .with_drain_timeout(Duration::from_secs(1))
}

/// Proposes one candidate per generation with a fixed instruction sequence.
struct Scripted {
    instructions: Vec<&'static str>,
    next: usize,
}

#[async_trait]
impl Strategy for Scripted {
    async fn propose(
        &mut self,
        cx: &ProposeContext<'_>,
        current: &Candidate,
        _budget: RemainingBudget,
    ) -> Result<Vec<Candidate>> {
        let Some(instruction) = self.instructions.get(self.next) else {
            return Ok(Vec::new());
        };
        self.next += 1;
        let mut candidate = Candidate::derive(current, cx.ids, "scripted", cx.generation, *instruction);
        candidate.pipeline.steps_mut()[0].instruction = Some(instruction.to_string());
        Ok(vec![candidate])
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn max_generations(&self) -> Option<usize> {
        Some(self.instructions.len())
    }
}

#[tokio::test]
async fn test_memorizing_candidate_is_rejected_on_validation() {
    init_tracing();
    // "memorize" answers every training question and no validation question.
    let lm = Arc::new(MockLm::new(|req| {
        let (kind, expected) = split_question(req);
        let correct = if req.instruction == "memorize" {
            kind == "train"
        } else {
            kind == "easy"
        };
        Ok(answer(if correct { &expected } else { "?" }))
    }));

    let train = Dataset::new(vec![
        example("t0", "train:a", "a"),
        example("t1", "train:b", "b"),
        example("t2", "easy:c", "c"),
    ]);
    let validation = Dataset::new(vec![
        example("v0", "easy:x", "x"),
        example("v1", "hard:y", "y"),
    ]);

    /// Checks the candidate's training score before handing it over.
    struct Memorizer {
        train_score: Option<f64>,
    }

    #[async_trait]
    impl Strategy for Memorizer {
        async fn propose(
            &mut self,
            cx: &ProposeContext<'_>,
            current: &Candidate,
            _budget: RemainingBudget,
        ) -> Result<Vec<Candidate>> {
            if self.train_score.is_some() {
                return Ok(Vec::new());
            }
            let mut candidate = Candidate::derive(current, cx.ids, "memorizer", cx.generation, "");
            candidate.pipeline.steps_mut()[0].instruction = Some("memorize".into());
            self.train_score = Some(cx.evaluate_train(candidate.pipeline.as_ref()).await?.overall_score);
            Ok(vec![candidate])
        }

        fn name(&self) -> &'static str {
            "memorizer"
        }

        fn max_generations(&self) -> Option<usize> {
            Some(1)
        }
    }

    let controller =
        SearchController::new(lm, Arc::new(ExactMatch::new())).with_config(fast_config());
    let mut strategy = Memorizer { train_score: None };
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();

    assert_eq!(strategy.train_score, Some(2.0 / 3.0));
    assert_eq!(outcome.baseline_score, 0.5);
    assert_eq!(outcome.candidates.len(), 1);
    assert_eq!(outcome.candidates[0].score, Some(0.0));
    assert!(!outcome.candidates[0].accepted);
    assert!(!outcome.improved());
    assert_eq!(outcome.best.steps()[0].instruction, None);
    assert_eq!(outcome.stop_reason, StopReason::GenerationLimit);
}

#[tokio::test]
async fn test_overlapping_splits_are_rejected() {
    let lm = Arc::new(MockLm::new(|_| Ok(answer("a"))));
    let calls = lm.clone();
    let controller = SearchController::new(lm, Arc::new(ExactMatch::new()));

    let train = Dataset::new(vec![example("e1", "q", "a"), example("e2", "q", "a")]);
    let validation = Dataset::new(vec![example("e2", "q", "a")]);
    let mut strategy = LabeledFewShot::default();

    let err = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap_err();
    assert!(err.is_harness_fault());
    assert_eq!(calls.calls(), 0);
}

#[tokio::test]
async fn test_history_never_decreases() {
    init_tracing();
    // Instruction `sN` answers the first N validation questions correctly.
    let lm = Arc::new(MockLm::new(|req| {
        let (kind, expected) = split_question(req);
        let quality: usize = req
            .instruction
            .strip_prefix('s')
            .and_then(|n| n.parse().ok())
            .unwrap_or(1);
        let index: usize = kind.parse().unwrap_or(usize::MAX);
        Ok(answer(if index < quality { &expected } else { "?" }))
    }));
    let train = Dataset::new(vec![example("t0", "0:a", "a")]);
    let validation: Dataset = (0..4)
        .map(|i| example(&format!("v{i}"), &format!("{i}:ans{i}"), &format!("ans{i}")))
        .collect();

    let controller = SearchController::new(lm, Arc::new(ExactMatch::new()))
        .with_config(fast_config().with_candidate_concurrency(1));
    let mut strategy = Scripted {
        instructions: vec!["s2", "s1", "s3", "s0", "s3", "s4"],
        next: 0,
    };
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();

    assert_eq!(outcome.baseline_score, 0.25);
    assert_eq!(outcome.history, vec![0.5, 0.5, 0.75, 0.75, 0.75, 1.0]);
    assert!(outcome.history.windows(2).all(|w| w[0] <= w[1]));
    // Equal score with equal demonstrations keeps the incumbent.
    assert!(!outcome.candidates[4].accepted);
    assert_eq!(outcome.best_score, 1.0);
    assert_eq!(outcome.best.steps()[0].instruction.as_deref(), Some("s4"));
    assert_eq!(outcome.trials, 6);
    assert_eq!(controller.state(), SearchState::Terminal);
}

#[tokio::test]
async fn test_bootstrap_keeps_only_examples_above_threshold() {
    let passing = ["q0", "q3", "q7"];
    let lm = Arc::new(MockLm::new(move |req| {
        let question = req.inputs["question"].as_str();
        let reply = if passing.contains(&question) {
            format!("a{}", &question[1..])
        } else {
            "wrong".to_string()
        };
        Ok(answer(&reply))
    }));
    let train: Dataset = (0..10)
        .map(|i| example(&format!("t{i}"), &format!("q{i}"), &format!("a{i}")))
        .collect();

    let recorder = TraceRecorder::new(lm).with_guard(QualityGuard::new(GuardPolicy::immediate(1)));
    let evaluator = Evaluator::new(recorder).with_config(EvalConfig::default());
    let metric = ExactMatch::new();
    let ids = IdGen::new();
    let cx = ProposeContext {
        train: &train,
        evaluator: &evaluator,
        metric: &metric,
        ids: &ids,
        generation: 1,
        concurrency: 4,
    };
    let chain = qa_chain();
    let current = Candidate::baseline(&chain, &ids);

    let mut strategy = BootstrapFewShot::new(
        BootstrapConfig::default()
            .with_threshold(0.8)
            .with_max_demos(8),
    );
    let candidates = strategy
        .propose(&cx, &current, RemainingBudget::UNLIMITED)
        .await
        .unwrap();

    let pool = &strategy.demo_pool()["qa"];
    assert_eq!(pool.len(), 3);
    let mut questions: Vec<&str> = pool.iter().map(|d| d.inputs["question"].as_str()).collect();
    questions.sort_unstable();
    assert_eq!(questions, passing);

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].total_demos(), 3);
    assert_eq!(candidates[0].provenance.parent, Some(current.id()));
    // The source pipeline is untouched.
    assert_eq!(current.total_demos(), 0);
}

#[tokio::test]
async fn test_bootstrap_random_search_samples_differ_by_seed() {
    let lm = Arc::new(MockLm::new(|req| {
        let (_, expected) = split_question(req);
        Ok(answer(&expected))
    }));
    let train: Dataset = (0..12)
        .map(|i| example(&format!("t{i}"), &format!("k:a{i}"), &format!("a{i}")))
        .collect();

    let recorder = TraceRecorder::new(lm);
    let evaluator = Evaluator::new(recorder);
    let metric = ExactMatch::new();
    let ids = IdGen::new();
    let cx = ProposeContext {
        train: &train,
        evaluator: &evaluator,
        metric: &metric,
        ids: &ids,
        generation: 1,
        concurrency: 4,
    };
    let chain = qa_chain();
    let current = Candidate::baseline(&chain, &ids);

    let mut strategy = BootstrapFewShot::new(
        BootstrapConfig::default()
            .with_max_demos(3)
            .with_num_candidates(4),
    );
    let candidates = strategy
        .propose(&cx, &current, RemainingBudget { trials: Some(3) })
        .await
        .unwrap();

    assert_eq!(candidates.len(), 3);
    assert!(candidates.iter().all(|c| c.total_demos() == 3));
    let states: Vec<String> = candidates
        .iter()
        .map(|c| ProgramState::capture(c.pipeline.as_ref()).to_json().unwrap())
        .collect();
    assert!(states[0] != states[1] || states[1] != states[2]);

    // Exhausted after its single round.
    let again = strategy
        .propose(&cx, &current, RemainingBudget::UNLIMITED)
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_end_to_end_bootstrap_improves_validation() {
    init_tracing();
    // Easy questions are always right; medium ones need at least two demos.
    let lm = Arc::new(MockLm::new(|req| {
        let (kind, expected) = split_question(req);
        let correct = kind == "easy" || (kind == "medium" && req.demos.len() >= 2);
        Ok(answer(if correct { &expected } else { "unknown" }))
    }));

    let train = Dataset::new(vec![
        example("t0", "easy:paris", "paris"),
        example("t1", "easy:rome", "rome"),
        example("t2", "medium:lima", "lima"),
        example("t3", "medium:quito", "quito"),
    ]);
    let validation = Dataset::new(vec![
        example("v0", "easy:oslo", "oslo"),
        example("v1", "easy:bern", "bern"),
        example("v2", "medium:accra", "accra"),
        example("v3", "hard:suva", "suva"),
    ]);

    let controller =
        SearchController::new(lm, Arc::new(ExactMatch::new())).with_config(fast_config());
    let mut strategy = BootstrapFewShot::new(BootstrapConfig::default().with_threshold(0.8));
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();

    assert_eq!(outcome.baseline_score, 0.5);
    assert_eq!(outcome.best_score, 0.75);
    assert_eq!(outcome.history, vec![0.75]);
    assert!(outcome.improved());
    assert_eq!(outcome.best_provenance.strategy, "bootstrap");
    assert_eq!(outcome.stop_reason, StopReason::GenerationLimit);

    let state = ProgramState::capture(outcome.best.as_ref());
    let demos = &state.steps[0].demos;
    assert_eq!(demos.len(), 2);
    assert!(demos.iter().all(|d| d.inputs["question"].starts_with("easy:")));
    assert!(outcome.usage.calls > 0);
}

#[tokio::test]
async fn test_labeled_is_deterministic_and_reuses_cache() {
    let inner = MockLm::new(|req| {
        let (_, expected) = split_question(req);
        Ok(answer(&expected))
    });
    let lm = Arc::new(CachedLm::new(inner));

    let train: Dataset = (0..10)
        .map(|i| example(&format!("t{i}"), &format!("k:a{i}"), &format!("a{i}")))
        .collect();
    let validation: Dataset = (0..3)
        .map(|i| example(&format!("v{i}"), &format!("k:b{i}"), &format!("b{i}")))
        .collect();

    let config = LabeledConfig::default()
        .with_k(3)
        .with_selection(Selection::Random)
        .with_seed(11);
    let controller = SearchController::new(lm.clone(), Arc::new(ExactMatch::new()))
        .with_config(fast_config());

    let mut runs = Vec::new();
    for _ in 0..2 {
        let mut strategy = LabeledFewShot::new(config);
        runs.push(
            controller
                .search(&qa_chain(), &train, &validation, &mut strategy)
                .await
                .unwrap(),
        );
    }

    // Labeled demos tie the baseline on score but do not beat it.
    let candidate_states: Vec<_> = runs.iter().map(|o| o.candidates[0].clone()).collect();
    assert_eq!(candidate_states[0], candidate_states[1]);
    assert_eq!(candidate_states[0].total_demos, 3);
    assert!(!candidate_states[0].accepted);

    let first = ProgramState::capture(runs[0].best.as_ref()).to_json().unwrap();
    let second = ProgramState::capture(runs[1].best.as_ref()).to_json().unwrap();
    assert_eq!(first, second);

    assert!(runs[0].usage.calls > 0);
    assert_eq!(runs[1].usage.calls, 0);
    assert!(lm.hits() > 0);
}

#[tokio::test]
async fn test_labeled_candidate_contents_are_stable() {
    let lm = Arc::new(MockLm::new(|_| Ok(answer("?"))));
    let train: Dataset = (0..6)
        .map(|i| example(&format!("t{i}"), &format!("q{i}"), &format!("a{i}")))
        .collect();
    let evaluator = Evaluator::new(TraceRecorder::new(lm));
    let metric = ExactMatch::new();
    let chain = qa_chain();

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let ids = IdGen::new();
        let cx = ProposeContext {
            train: &train,
            evaluator: &evaluator,
            metric: &metric,
            ids: &ids,
            generation: 1,
            concurrency: 1,
        };
        let current = Candidate::baseline(&chain, &ids);
        let mut strategy = LabeledFewShot::new(LabeledConfig::default().with_k(2));
        let candidates = strategy
            .propose(&cx, &current, RemainingBudget::UNLIMITED)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(strategy
            .propose(&cx, &current, RemainingBudget::UNLIMITED)
            .await
            .unwrap()
            .is_empty());
        snapshots.push(ProgramState::capture(candidates[0].pipeline.as_ref()).to_json().unwrap());
    }

    assert_eq!(snapshots[0], snapshots[1]);
    assert!(snapshots[0].contains("\"q0\"") && snapshots[0].contains("\"q1\""));
    assert!(!snapshots[0].contains("\"q2\""));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_returns_baseline() {
    let lm = Arc::new(
        MockLm::new(|req| {
            let (_, expected) = split_question(req);
            Ok(answer(&expected))
        })
        .with_latency(Duration::from_millis(200)),
    );
    let train = Dataset::new(vec![example("t0", "k:a", "a")]);
    let validation: Dataset = (0..8)
        .map(|i| example(&format!("v{i}"), &format!("k:b{i}"), &format!("b{i}")))
        .collect();

    let handle = CancelHandle::new();
    let controller = SearchController::new(lm.clone(), Arc::new(ExactMatch::new()))
        .with_config(
            fast_config()
                .with_eval_concurrency(2)
                .with_drain_timeout(Duration::from_secs(1)),
        )
        .with_cancel(handle.token());

    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        })
    };

    let started = tokio::time::Instant::now();
    let mut strategy = Scripted {
        instructions: vec!["better"],
        next: 0,
    };
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert!(started.elapsed() <= Duration::from_millis(1100));
    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(!outcome.improved());
    assert!(outcome.candidates.is_empty());
    assert_eq!(outcome.trials, 0);
    // Only the two in-flight examples ran.
    assert_eq!(lm.calls(), 2);
    assert_eq!(outcome.baseline_score, 0.25);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_with_saturated_call_cap() {
    let lm = Arc::new(
        MockLm::new(|req| {
            let (_, expected) = split_question(req);
            Ok(answer(&expected))
        })
        .with_latency(Duration::from_millis(100)),
    );
    let train = Dataset::new(vec![example("t0", "k:a", "a")]);
    let validation: Dataset = (0..8)
        .map(|i| example(&format!("v{i}"), &format!("k:b{i}"), &format!("b{i}")))
        .collect();

    let handle = CancelHandle::new();
    let controller = SearchController::new(lm.clone(), Arc::new(ExactMatch::new()))
        .with_config(fast_config().with_max_lm_calls(1).with_eval_concurrency(4))
        .with_cancel(handle.token());

    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        })
    };

    let mut strategy = Scripted {
        instructions: vec!["better"],
        next: 0,
    };
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    // Three examples were queued behind the cap; none reached the LM.
    assert_eq!(lm.calls(), 1);
    assert_eq!(outcome.usage.calls, 1);
    assert_eq!(outcome.baseline_score, 0.125);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(lm.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_reports_queued_examples_as_cancelled() {
    let lm = Arc::new(
        MockLm::new(|req| {
            let (_, expected) = split_question(req);
            Ok(answer(&expected))
        })
        .with_latency(Duration::from_millis(100)),
    );
    let dataset: Dataset = (0..4)
        .map(|i| example(&format!("v{i}"), &format!("k:b{i}"), &format!("b{i}")))
        .collect();

    let handle = CancelHandle::new();
    let pooled = PooledLm::new(lm.clone(), Arc::new(LmPool::new(1))).with_cancel(handle.token());
    let recorder = TraceRecorder::new(Arc::new(pooled))
        .with_guard(QualityGuard::new(GuardPolicy::immediate(1)))
        .with_cancel(handle.token());
    let evaluator = Evaluator::new(recorder);

    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        })
    };
    let result = evaluator
        .evaluate(&qa_chain(), &dataset, &ExactMatch::new(), 4)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(lm.calls(), 1);
    assert_eq!(result.cancelled_count, 3);
    assert_eq!(result.error_count, 0);
    assert_eq!(result.per_example[0].score, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_cost_limit_stops_generation_in_flight() {
    let lm = Arc::new(
        MockLm::new(|_| Ok(answer("?"))).with_latency(Duration::from_millis(10)),
    );
    let train = Dataset::new(vec![example("t0", "q", "a")]);
    let validation: Dataset = (0..20)
        .map(|i| example(&format!("v{i}"), &format!("q{i}"), &format!("a{i}")))
        .collect();

    /// Proposes five candidates in its only generation.
    struct Fanout;

    #[async_trait]
    impl Strategy for Fanout {
        async fn propose(
            &mut self,
            cx: &ProposeContext<'_>,
            current: &Candidate,
            _budget: RemainingBudget,
        ) -> Result<Vec<Candidate>> {
            Ok((0..5)
                .map(|i| {
                    let mut candidate = Candidate::derive(current, cx.ids, "fanout", cx.generation, "");
                    candidate.pipeline.steps_mut()[0].instruction = Some(format!("c{i}"));
                    candidate
                })
                .collect())
        }

        fn name(&self) -> &'static str {
            "fanout"
        }

        fn max_generations(&self) -> Option<usize> {
            Some(1)
        }
    }

    // The baseline costs 20 of 25; the generation alone would cost 100.
    let controller = SearchController::new(lm.clone(), Arc::new(ExactMatch::new())).with_config(
        fast_config().with_budget(BudgetConfig::default().with_max_cost(25.0)),
    );
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut Fanout)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::CostLimit);
    assert!(outcome.usage.calls >= 25);
    assert!(outcome.usage.calls <= 40, "spent {} calls", outcome.usage.calls);
    assert_eq!(outcome.candidates.len(), 5);
    assert!(outcome.candidates.iter().all(|c| c.score.is_none()));
    assert_eq!(lm.calls() as u64, outcome.usage.calls);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_search() {
    let lm = Arc::new(
        MockLm::new(|_| Ok(answer("?"))).with_latency(Duration::from_millis(100)),
    );
    let train = Dataset::new(vec![example("t0", "q", "a")]);
    let validation = Dataset::new(vec![example("v0", "q", "a")]);

    /// Proposes a fresh candidate every generation.
    struct Endless;

    #[async_trait]
    impl Strategy for Endless {
        async fn propose(
            &mut self,
            cx: &ProposeContext<'_>,
            current: &Candidate,
            _budget: RemainingBudget,
        ) -> Result<Vec<Candidate>> {
            let mut candidate = Candidate::derive(current, cx.ids, "endless", cx.generation, "");
            candidate.pipeline.steps_mut()[0].instruction = Some(format!("v{}", cx.generation));
            Ok(vec![candidate])
        }

        fn name(&self) -> &'static str {
            "endless"
        }
    }

    let controller = SearchController::new(lm, Arc::new(ExactMatch::new())).with_config(
        fast_config().with_budget(BudgetConfig::default().with_max_duration(Duration::from_millis(550))),
    );
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut Endless)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Deadline);
    assert!(outcome.trials >= 3);
    assert_eq!(outcome.best_score, 0.0);
}

#[tokio::test]
async fn test_trial_budget_caps_candidates() {
    let lm = Arc::new(MockLm::new(|_| Ok(answer("?"))));
    let train = Dataset::new(vec![example("t0", "q", "a")]);
    let validation = Dataset::new(vec![example("v0", "q", "a")]);

    let controller = SearchController::new(lm, Arc::new(ExactMatch::new())).with_config(
        fast_config().with_budget(BudgetConfig::default().with_max_trials(2)),
    );
    let mut strategy = Scripted {
        instructions: vec!["a", "b", "c", "d"],
        next: 0,
    };
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();

    assert_eq!(outcome.trials, 2);
    assert_eq!(outcome.stop_reason, StopReason::MaxTrials);
}

/// Returns the same fixed proposals every time.
struct FixedProposer {
    proposals: Vec<&'static str>,
    requests: Mutex<usize>,
}

#[async_trait]
impl InstructionProposer for FixedProposer {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Vec<String>> {
        *self.requests.lock() += 1;
        Ok(self
            .proposals
            .iter()
            .take(request.n)
            .map(|s| s.to_string())
            .collect())
    }
}

#[tokio::test]
async fn test_instruction_search_discards_repeats() {
    let lm = Arc::new(MockLm::new(|req| {
        let (_, expected) = split_question(req);
        let correct = req.instruction == "Answer tersely.";
        Ok(answer(if correct { &expected } else { "?" }))
    }));
    let train = Dataset::new(vec![example("t0", "k:a", "a")]);
    let validation = Dataset::new(vec![example("v0", "k:b", "b"), example("v1", "k:c", "c")]);

    let proposer = Arc::new(FixedProposer {
        proposals: vec![
            "Be precise.",
            " Be precise. ",
            "Answer the question.",
            "Answer tersely.",
        ],
        requests: Mutex::new(0),
    });
    let mut strategy = InstructionSearch::new(
        InstructionConfig::default()
            .with_breadth(4)
            .with_depth(3)
            .with_sample_traces(0),
        proposer.clone(),
    );

    let controller =
        SearchController::new(lm, Arc::new(ExactMatch::new())).with_config(fast_config());
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();

    // Generation 1 yields two fresh instructions; later ones only repeats.
    assert_eq!(outcome.trials, 2);
    assert_eq!(outcome.candidates.len(), 2);
    assert_eq!(outcome.best_score, 1.0);
    assert_eq!(
        outcome.best.steps()[0].instruction.as_deref(),
        Some("Answer tersely.")
    );
    assert_eq!(outcome.stop_reason, StopReason::NoCandidates);
    assert_eq!(*proposer.requests.lock(), 3);
    assert_eq!(strategy.seen("qa"), 3);
}

/// Critic with canned feedback
struct CannedCritic;

#[async_trait]
impl Critic for CannedCritic {
    async fn critique(&self, failures: &[FailureCase], _meter: &UsageMeter) -> Result<String> {
        Ok(format!("{} failures: be more specific", failures.len()))
    }
}

/// Proposer that numbers its revisions
struct Reviser {
    count: Mutex<usize>,
}

#[async_trait]
impl InstructionProposer for Reviser {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Vec<String>> {
        assert!(request.feedback.is_some());
        let mut count = self.count.lock();
        *count += 1;
        Ok(vec![format!("revision {}", *count)])
    }
}

#[tokio::test]
async fn test_reflective_stops_on_patience() {
    init_tracing();
    let lm = Arc::new(MockLm::new(|_| Ok(answer("?"))));
    let train = Dataset::new(vec![example("t0", "q0", "a"), example("t1", "q1", "b")]);
    let validation = Dataset::new(vec![example("v0", "q2", "c")]);

    let mut strategy = Reflective::new(
        ReflectiveConfig::default()
            .with_num_iterations(5)
            .with_patience(2),
        Arc::new(Reviser {
            count: Mutex::new(0),
        }),
        Arc::new(CannedCritic),
    );

    let controller =
        SearchController::new(lm, Arc::new(ExactMatch::new())).with_config(fast_config());
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Patience);
    assert_eq!(outcome.history, vec![0.0, 0.0]);
    assert_eq!(outcome.candidates.len(), 2);
    assert_eq!(strategy.last_feedback(), Some("2 failures: be more specific"));
}

#[tokio::test]
async fn test_reflective_improvement_is_selected() {
    let lm = Arc::new(MockLm::new(|req| {
        let (_, expected) = split_question(req);
        let correct = req.instruction.starts_with("revision");
        Ok(answer(if correct { &expected } else { "?" }))
    }));
    let train = Dataset::new(vec![example("t0", "k:a", "a")]);
    let validation = Dataset::new(vec![example("v0", "k:b", "b")]);

    let mut strategy = Reflective::new(
        ReflectiveConfig::default().with_num_iterations(3),
        Arc::new(Reviser {
            count: Mutex::new(0),
        }),
        Arc::new(CannedCritic),
    );
    let controller =
        SearchController::new(lm, Arc::new(ExactMatch::new())).with_config(fast_config());
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();

    assert_eq!(outcome.baseline_score, 0.0);
    assert_eq!(outcome.best_score, 1.0);
    assert_eq!(outcome.best_provenance.strategy, "reflective");
    // Once the training split passes there is nothing left to reflect on.
    assert_eq!(outcome.stop_reason, StopReason::NoCandidates);
}

#[tokio::test]
async fn test_meta_calls_count_against_usage() {
    let lm = Arc::new(MockLm::new(|_| Ok(answer("?"))));
    let meta = Arc::new(MockLm::new(|req| {
        if req.inputs.contains_key("failures") {
            Ok(values([("feedback", "Spell out the answer.")]))
        } else {
            Ok(values([("instructions", "1. Answer carefully.")]))
        }
    }));
    let train = Dataset::new(vec![example("t0", "q0", "a"), example("t1", "q1", "b")]);
    let validation = Dataset::new(vec![example("v0", "q2", "c")]);

    let mut strategy = Reflective::new(
        ReflectiveConfig::default().with_num_iterations(1),
        Arc::new(LmProposer::new(meta.clone())),
        Arc::new(LmCritic::new(meta.clone())),
    );
    let controller =
        SearchController::new(lm.clone(), Arc::new(ExactMatch::new())).with_config(fast_config());
    let outcome = controller
        .search(&qa_chain(), &train, &validation, &mut strategy)
        .await
        .unwrap();

    // One critique and one proposal on top of the task calls.
    assert_eq!(meta.calls(), 2);
    assert_eq!(lm.calls(), 4);
    assert_eq!(outcome.usage.calls, 6);
    assert_eq!(strategy.last_feedback(), Some("Spell out the answer."));
}
