//! Composite scheduler
//!
//! Runs the steps of a [`CompositePlan`] over its cached [`StepGraph`]
//! (see [`super::graph`]). A step becomes eligible once every dependency
//! has settled (completed or skipped); eligible steps run concurrently
//! inside the invoking task, bounded by `max_concurrent_steps`.
//!
//! Composites are not transactional. When a step fails no new steps are
//! started, in-flight siblings are awaited and their results discarded, and
//! side effects of steps that already completed stay in place.
//!
//! [`StepGraph`]: super::graph::StepGraph

use super::reference::{OutputTable, Scope};
use super::spec::CompositePlan;
use crate::tools::{ToolError, ToolErrorKind, ToolExecutionContext, ToolExecutionResult};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Dispatches a step's tool call
///
/// Implemented by the execution router so that steps go through name
/// resolution, schema validation and the capability gate like any other
/// call.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, name: &str, args: Value, ctx: &ToolExecutionContext) -> ToolExecutionResult;
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
    /// Finished after the composite had already failed or been cancelled
    Discarded,
}

/// Trace of a single step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub step_id: String,
    pub tool_name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl StepTrace {
    fn new(step_id: &str, tool_name: &str, status: StepStatus, duration: Duration) -> Self {
        Self {
            step_id: step_id.to_string(),
            tool_name: tool_name.to_string(),
            status,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            error: None,
        }
    }

    fn with_error(mut self, error: ToolError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Result of one composite run
#[derive(Debug)]
pub struct CompositeOutcome {
    pub result: Result<Value, ToolError>,
    /// Traces in the order steps settled
    pub steps: Vec<StepTrace>,
}

/// Frontier-based step scheduler
#[derive(Debug, Clone)]
pub struct CompositeScheduler {
    max_concurrent_steps: usize,
}

impl Default for CompositeScheduler {
    fn default() -> Self {
        Self::new(8)
    }
}

struct StepDone {
    index: usize,
    result: ToolExecutionResult,
    elapsed: Duration,
}

async fn run_step(
    invoker: &dyn ToolInvoker,
    index: usize,
    tool_name: String,
    args: Value,
    ctx: ToolExecutionContext,
) -> StepDone {
    let started = Instant::now();
    let result = invoker.invoke(&tool_name, args, &ctx).await;
    StepDone {
        index,
        result,
        elapsed: started.elapsed(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Failed,
    Cancelled,
}

impl CompositeScheduler {
    pub fn new(max_concurrent_steps: usize) -> Self {
        Self {
            max_concurrent_steps: max_concurrent_steps.max(1),
        }
    }

    /// Run every step of `plan`
    ///
    /// `ctx.cancellation` is observed throughout; each step gets a child
    /// context one level deeper.
    pub async fn run(
        &self,
        plan: &CompositePlan,
        args: &Value,
        ctx: &ToolExecutionContext,
        invoker: &dyn ToolInvoker,
    ) -> CompositeOutcome {
        let graph = plan.graph();
        let step_count = plan.steps().len();

        let mut pending_deps: Vec<usize> = (0..step_count).map(|i| graph.dependencies(i).len()).collect();
        let mut status: Vec<Option<StepStatus>> = vec![None; step_count];
        let mut ready: BinaryHeap<Reverse<usize>> = graph.roots().map(Reverse).collect();
        let mut outputs = OutputTable::new(plan.aliases());
        let mut traces = Vec::with_capacity(step_count);
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<ToolError> = None;
        let mut halt: Option<Halt> = None;

        // Mark a step settled and release dependents whose deps are all settled
        let settle = |index: usize, pending: &mut Vec<usize>, ready: &mut BinaryHeap<Reverse<usize>>| {
            for &next in graph.dependents(index) {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        };

        loop {
            while halt.is_none() && in_flight.len() < self.max_concurrent_steps {
                if ctx.is_cancelled() {
                    halt = Some(Halt::Cancelled);
                    break;
                }
                let Some(Reverse(index)) = ready.pop() else {
                    break;
                };
                let step = plan.step(index);
                let compiled = plan.compiled(index);
                let scope = Scope {
                    args,
                    outputs: &outputs,
                };

                if let Some(condition) = &compiled.condition {
                    match condition.evaluate(&scope) {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::debug!(step = %step.id, "condition false, step skipped");
                            status[index] = Some(StepStatus::Skipped);
                            traces.push(StepTrace::new(&step.id, &step.tool_name, StepStatus::Skipped, Duration::ZERO));
                            settle(index, &mut pending_deps, &mut ready);
                            continue;
                        }
                        Err(e) => {
                            let error = ToolError::step_reference(&step.id, e.to_string());
                            status[index] = Some(StepStatus::Failed);
                            traces.push(
                                StepTrace::new(&step.id, &step.tool_name, StepStatus::Failed, Duration::ZERO)
                                    .with_error(error.clone()),
                            );
                            failure = Some(error);
                            halt = Some(Halt::Failed);
                            break;
                        }
                    }
                }

                let rendered = match compiled.arguments.render(&scope) {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        let error = ToolError::step_reference(&step.id, e.to_string());
                        status[index] = Some(StepStatus::Failed);
                        traces.push(
                            StepTrace::new(&step.id, &step.tool_name, StepStatus::Failed, Duration::ZERO)
                                .with_error(error.clone()),
                        );
                        failure = Some(error);
                        halt = Some(Halt::Failed);
                        break;
                    }
                };

                tracing::debug!(step = %step.id, tool = %step.tool_name, "step started");
                in_flight.push(run_step(invoker, index, step.tool_name.clone(), rendered, ctx.child()));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled(), if halt.is_none() => {
                    tracing::info!(in_flight = in_flight.len(), "composite cancelled, draining steps");
                    halt = Some(Halt::Cancelled);
                }
                Some(done) = in_flight.next() => {
                    let step = plan.step(done.index);
                    if halt.is_some() {
                        status[done.index] = Some(StepStatus::Discarded);
                        let mut trace = StepTrace::new(&step.id, &step.tool_name, StepStatus::Discarded, done.elapsed);
                        trace.error = done.result.error;
                        traces.push(trace);
                        continue;
                    }

                    match done.result.into_result() {
                        Ok(output) => {
                            tracing::debug!(step = %step.id, elapsed = ?done.elapsed, "step completed");
                            outputs.insert(step.id.clone(), output);
                            status[done.index] = Some(StepStatus::Completed);
                            traces.push(StepTrace::new(&step.id, &step.tool_name, StepStatus::Completed, done.elapsed));
                            settle(done.index, &mut pending_deps, &mut ready);
                        }
                        Err(error) => {
                            status[done.index] = Some(StepStatus::Failed);
                            traces.push(
                                StepTrace::new(&step.id, &step.tool_name, StepStatus::Failed, done.elapsed)
                                    .with_error(error.clone()),
                            );
                            if error.kind == ToolErrorKind::Cancelled && ctx.is_cancelled() {
                                halt = Some(Halt::Cancelled);
                            } else {
                                tracing::warn!(step = %step.id, error = %error, "step failed, halting composite");
                                failure = Some(ToolError::step_failure(&step.id, &step.tool_name, error));
                                halt = Some(Halt::Failed);
                            }
                        }
                    }
                }
                else => break,
            }
        }

        let result = match halt {
            Some(Halt::Cancelled) => Err(ToolError::cancelled(
                "Composite cancelled; completed step results were discarded",
            )),
            Some(Halt::Failed) => Err(failure
                .unwrap_or_else(|| ToolError::internal("composite halted without an error"))),
            None => Ok(final_output(plan, &outputs, &status)),
        };

        CompositeOutcome {
            result,
            steps: traces,
        }
    }
}

/// Designated final output, or the outputs of completed steps that no
/// completed step depends on
fn final_output(plan: &CompositePlan, outputs: &OutputTable, status: &[Option<StepStatus>]) -> Value {
    if let Some(name) = plan.final_output() {
        return outputs.get(name).cloned().unwrap_or(Value::Null);
    }

    let graph = plan.graph();
    let completed = |i: usize| status[i] == Some(StepStatus::Completed);
    let sinks: Vec<usize> = graph
        .order()
        .iter()
        .copied()
        .filter(|&i| completed(i) && !graph.dependents(i).iter().any(|&d| completed(d)))
        .collect();

    match sinks.as_slice() {
        [] => Value::Null,
        [only] => outputs.get(&plan.step(*only).id).cloned().unwrap_or(Value::Null),
        many => {
            let mut object = Map::new();
            for &i in many {
                let step = plan.step(i);
                if let Some(value) = outputs.get(&step.id) {
                    object.insert(step.output_name().to_string(), value.clone());
                }
            }
            Value::Object(object)
        }
    }
}

#[cfg(test)]
mod composite_tests {
    use super::*;

    #[test]
    fn test_trace_duration_saturates() {
        let trace = StepTrace::new("a", "tool", StepStatus::Completed, Duration::from_millis(1500));
        assert_eq!(trace.duration_ms, 1500);

        let trace = StepTrace::new("a", "tool", StepStatus::Completed, Duration::MAX);
        assert_eq!(trace.duration_ms, u64::MAX);
    }
}
