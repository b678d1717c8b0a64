//! Action executor
//!
//! Runs the actions of one test instance in order. Every action that ran
//! is reported immediately; the first failing action stops the test.

use std::time::Instant;

use super::assertions::AssertionEngine;
use super::config::Action;
use super::context::{ExecutionState, RunContext};
use super::grouper::TestInstance;
use super::handlers::HandlerRegistry;
use super::report::{ActionReport, FailedAction, TimedAction};

/// Action name reported for instances that could not be prepared
pub const SETUP_ACTION: &str = "initialize";

/// Lifecycle of one test instance
#[derive(Debug, Clone, PartialEq)]
pub enum TestState {
    Idle,
    /// Running the action at this index
    Running(usize),
    Passed,
    /// Setup failed; no action ran
    Failed(FailedAction),
    /// An action failed; the remaining `skipped` actions did not run
    Aborted { failed: FailedAction, skipped: usize },
}

/// Result of running one test instance
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub test_key: String,
    pub test_name: String,
    pub record_source_key: String,
    pub state: TestState,
    /// Actions that had a handler and ran
    pub actions_run: usize,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.state, TestState::Passed)
    }
}

/// Wall clock timing of one action
struct ActionTimer {
    action: String,
    started: Instant,
}

impl ActionTimer {
    /// Start timing if the action asks for it
    fn start(action: &Action) -> Option<Self> {
        action.time_track.then(|| Self {
            action: action.display_name().to_string(),
            started: Instant::now(),
        })
    }

    fn finish(self, report: &mut ActionReport) {
        let elapsed = self.started.elapsed();
        report.elapsed_time_tracking.push(TimedAction {
            action: self.action,
            duration_ms: elapsed.as_millis() as u64,
        });
    }
}

/// Run one test instance to completion or to its first failure
pub async fn run_test(
    run: &RunContext,
    handlers: &HandlerRegistry,
    assertions: &AssertionEngine,
    instance: TestInstance,
) -> TestOutcome {
    let mut state = ExecutionState::new(&instance);
    let mut outcome = TestOutcome {
        test_key: instance.unique_key.clone(),
        test_name: instance.test_name.clone(),
        record_source_key: instance.record_source_key.clone(),
        state: TestState::Idle,
        actions_run: 0,
    };

    if let Some(message) = &instance.setup_failure {
        let failed = FailedAction {
            name: SETUP_ACTION.to_string(),
            message: message.clone(),
        };
        state.report.test_result = false;
        state.report.failed_action = Some(failed.clone());
        run.publish(&state).await;
        outcome.state = TestState::Failed(failed);
        return outcome;
    }

    tracing::debug!(
        "Running {} against {} ({} actions)",
        instance.test_name,
        instance.record_source_key,
        instance.actions.len()
    );

    let total = instance.actions.len();
    for (index, action) in instance.actions.iter().enumerate() {
        let Some(name) = action.name.as_deref() else {
            continue;
        };
        let Some(handler) = handlers.get(name) else {
            tracing::trace!("No handler for {}, skipping", name);
            continue;
        };

        outcome.state = TestState::Running(index);
        state.begin_action();

        let timer = ActionTimer::start(action);
        let result = handler.run(run, &mut state, action).await;
        if let Some(timer) = timer {
            timer.finish(&mut state.report);
        }

        if !state.action_failed && action.assert.is_some() {
            match &result {
                Some(value) if !value.is_null() => assertions.assert(run, &mut state, action, value),
                _ => tracing::debug!("{} returned nothing to assert against", name),
            }
        }

        state.record_action(name);
        outcome.actions_run += 1;
        run.publish(&state).await;

        if state.action_failed {
            if run.clean_test_data {
                cleanup(run, &mut state).await;
            }
            let failed = state.report.failed_action.clone().unwrap_or_else(|| FailedAction {
                name: name.to_string(),
                message: state.action_message.clone(),
            });
            tracing::info!(
                "{} failed for {} at {}: {}",
                instance.test_name,
                instance.record_source_key,
                failed.name,
                failed.message
            );
            outcome.state = TestState::Aborted {
                failed,
                skipped: total - index - 1,
            };
            return outcome;
        }
    }

    tracing::debug!("{} passed for {}", instance.test_name, instance.record_source_key);
    outcome.state = TestState::Passed;
    outcome
}

/// Delete every record the test created, one object type at a time
///
/// Records that are already gone are not an error; any other failure flags
/// the run.
pub async fn cleanup(run: &RunContext, state: &mut ExecutionState) {
    for (sobject_type, ids) in state.cleanup.take() {
        match run.store.destroy(&sobject_type, &ids).await {
            Ok(()) => tracing::debug!("Successfully Deleted {} {}", sobject_type, ids.join(",")),
            Err(e) if e.is_already_deleted() => {
                tracing::debug!("Already Deleted {} {}", sobject_type, ids.join(","))
            }
            Err(e) => {
                run.flag_error();
                tracing::error!("Delete Failed {} {}: {}", sobject_type, ids.join(","), e);
            }
        }
    }
}
