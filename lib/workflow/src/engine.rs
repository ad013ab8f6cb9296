//! The execution engine.
//!
//! The engine drives one execution at a time through its step snapshot:
//!
//! 1. `start_execution` snapshots the workflow, seeds initial outputs and
//!    runs until the first suspension or completion.
//! 2. `proceed` runs the step at the cursor. A step that completes is
//!    committed and the loop continues with the next step; a step that
//!    suspends ends the call with nothing held.
//! 3. `advance` resumes a suspended step from a trigger function. The
//!    cursor moves through a compare-and-swap on `step_index`, so duplicate
//!    or out-of-order deliveries are no-ops.
//!
//! Executions are deleted on completion and when their workflow disappears.
//! A failed step leaves the cursor where it was.

use crate::definition::{Step, Workflow};
use crate::error::{EngineError, StoreError};
use crate::execution::WorkflowExecution;
use crate::registry::{
    FunctionResolver, StepContext, StepInputs, StepOutcome, StepOutputs, StepRegistry,
};
use crate::spec::StepSpec;
use crate::store::{ExecutionStore, TriggerStore, WorkflowStore};
use crate::template::{self, Replacements};
use async_trait::async_trait;
use rootcause::Report;
use std::collections::BTreeMap;
use std::sync::Arc;
use tidewater_core::{ExecutionId, WorkflowId};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// A request to refresh what a user sees for a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRefresh {
    pub workflow_id: WorkflowId,
    pub user_id: String,
}

/// Receives view refresh requests after state changes.
#[async_trait]
pub trait ViewRefresher: Send + Sync {
    /// Requests a refresh. Failures are the refresher's to log. Called on a
    /// detached task, so a slow refresher does not hold up the engine.
    async fn refresh(&self, request: ViewRefresh);
}

/// Drops every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRefresher;

#[async_trait]
impl ViewRefresher for NoopRefresher {
    async fn refresh(&self, _request: ViewRefresh) {}
}

/// Forwards requests to a channel.
#[derive(Debug, Clone)]
pub struct ChannelRefresher {
    sender: mpsc::UnboundedSender<ViewRefresh>,
}

impl ChannelRefresher {
    /// Creates a refresher and the receiving end of its channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ViewRefresh>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ViewRefresher for ChannelRefresher {
    async fn refresh(&self, request: ViewRefresh) {
        if self.sender.send(request).is_err() {
            debug!("view refresh receiver dropped");
        }
    }
}

/// Options for starting an execution.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Values seeded under the `trigger` output namespace.
    pub initial_outputs: BTreeMap<String, String>,
    /// Interaction id available to the first step that wants one.
    pub interaction: Option<String>,
}

impl StartOptions {
    /// Seeds an initial output.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.initial_outputs.insert(key.into(), value.into());
        self
    }

    /// Sets the interaction id.
    #[must_use]
    pub fn with_interaction(mut self, interaction: Option<String>) -> Self {
        self.interaction = interaction;
        self
    }
}

/// How a run of the step loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A step is waiting on a trigger.
    Suspended { step_index: usize },
    /// Every step ran; the execution was deleted.
    Completed,
    /// The workflow or execution no longer exists; whatever was left was
    /// deleted.
    Cancelled,
    /// Another delivery moved the cursor first; this call stopped.
    Superseded,
}

/// The result of `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The step was committed and the loop ran.
    Advanced(RunOutcome),
    /// The step is not the current one; nothing changed.
    Stale { current_index: usize },
    /// The execution no longer exists.
    Missing,
}

/// A started execution.
#[derive(Debug, Clone)]
pub struct Started {
    /// The execution as first stored.
    pub execution: WorkflowExecution,
    /// How the initial run ended.
    pub outcome: RunOutcome,
}

fn store_failure(operation: &'static str) -> impl FnOnce(Report<StoreError>) -> EngineError {
    move |e| EngineError::Store {
        operation,
        reason: e.to_string(),
    }
}

/// The execution engine.
#[derive(Clone)]
pub struct Engine {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    triggers: Arc<dyn TriggerStore>,
    steps: Arc<StepRegistry>,
    resolver: Arc<dyn FunctionResolver>,
    refresher: Arc<dyn ViewRefresher>,
}

impl Engine {
    /// Creates an engine. View refreshes are dropped until a refresher is set.
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        triggers: Arc<dyn TriggerStore>,
        steps: StepRegistry,
        resolver: Arc<dyn FunctionResolver>,
    ) -> Self {
        Self {
            workflows,
            executions,
            triggers,
            steps: Arc::new(steps),
            resolver,
            refresher: Arc::new(NoopRefresher),
        }
    }

    /// Sets the view refresher.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn ViewRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    /// The step registry.
    #[must_use]
    pub fn steps(&self) -> &StepRegistry {
        &self.steps
    }

    /// The trigger store.
    #[must_use]
    pub fn triggers(&self) -> &Arc<dyn TriggerStore> {
        &self.triggers
    }

    /// Loads a workflow.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if the lookup fails.
    pub async fn workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, Report<EngineError>> {
        Ok(self
            .workflows
            .get(id)
            .await
            .map_err(store_failure("get workflow"))?)
    }

    /// Loads an execution.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if the lookup fails.
    pub async fn execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, Report<EngineError>> {
        Ok(self
            .executions
            .get(id)
            .await
            .map_err(store_failure("get execution"))?)
    }

    /// Lists a workflow's executions.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if the lookup fails.
    pub async fn executions_for(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<WorkflowExecution>, Report<EngineError>> {
        Ok(self
            .executions
            .list_for_workflow(workflow_id)
            .await
            .map_err(store_failure("list executions"))?)
    }

    /// Starts a run of `workflow` on behalf of `trigger_user_id`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotInstalled` for a workflow without an access
    /// token, and any error from the initial run. When the initial run fails
    /// the execution stays stored at the failing step.
    #[instrument(skip(self, workflow, options), fields(workflow_id = %workflow.id))]
    pub async fn start_execution(
        &self,
        workflow: &Workflow,
        trigger_user_id: &str,
        options: StartOptions,
    ) -> Result<Started, Report<EngineError>> {
        if !workflow.is_installed() {
            return Err(EngineError::NotInstalled {
                workflow_id: workflow.id,
            }
            .into());
        }

        let mut execution = WorkflowExecution::new(workflow, trigger_user_id);
        execution
            .state
            .seed_trigger_outputs(&options.initial_outputs);
        self.executions
            .insert(&execution)
            .await
            .map_err(store_failure("insert execution"))?;
        info!(
            execution_id = %execution.id,
            steps = execution.steps.len(),
            "started execution"
        );
        self.refresh(execution.workflow_id, &execution.state.trigger_user_id);

        let outcome = self.run(execution.id, options.interaction).await?;
        Ok(Started { execution, outcome })
    }

    /// Runs the execution from its current step.
    ///
    /// # Errors
    ///
    /// Returns an error when the current step cannot run. The cursor is left
    /// at that step.
    pub async fn proceed(&self, id: ExecutionId) -> Result<RunOutcome, Report<EngineError>> {
        self.run(id, None).await
    }

    /// Completes `step_id` with `outputs` and runs the next steps.
    ///
    /// # Errors
    ///
    /// Returns an error when a following step fails to run.
    pub async fn advance(
        &self,
        id: ExecutionId,
        step_id: &str,
        outputs: StepOutputs,
    ) -> Result<AdvanceOutcome, Report<EngineError>> {
        self.advance_with(id, step_id, outputs, None).await
    }

    /// Like [`Engine::advance`], handing an interaction id to the next steps.
    ///
    /// # Errors
    ///
    /// Returns an error when a following step fails to run.
    #[instrument(skip(self, outputs, interaction), fields(execution_id = %id))]
    pub async fn advance_with(
        &self,
        id: ExecutionId,
        step_id: &str,
        outputs: StepOutputs,
        interaction: Option<String>,
    ) -> Result<AdvanceOutcome, Report<EngineError>> {
        let Some(execution) = self.execution(id).await? else {
            debug!("advance for missing execution");
            return Ok(AdvanceOutcome::Missing);
        };

        let is_current = execution
            .current_step()
            .is_some_and(|step| step.id == step_id);
        if !is_current {
            warn!(
                current_index = execution.step_index,
                "ignoring advance for a step that is not current"
            );
            return Ok(AdvanceOutcome::Stale {
                current_index: execution.step_index,
            });
        }

        if !self.commit(&execution, step_id, &outputs).await? {
            let current_index = self
                .execution(id)
                .await?
                .map_or(execution.step_index, |e| e.step_index);
            warn!(current_index, "lost the race to advance this step");
            return Ok(AdvanceOutcome::Stale { current_index });
        }

        let outcome = self.run(id, interaction).await?;
        Ok(AdvanceOutcome::Advanced(outcome))
    }

    /// Deletes an execution and its outstanding triggers.
    ///
    /// Returns whether the execution existed.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if a deletion fails.
    #[instrument(skip(self), fields(execution_id = %id))]
    pub async fn cancel_execution(&self, id: ExecutionId) -> Result<bool, Report<EngineError>> {
        let execution = self.execution(id).await?;
        let removed = self.remove_execution(id).await?;
        if let Some(execution) = execution {
            info!("cancelled execution");
            self.refresh(execution.workflow_id, &execution.state.trigger_user_id);
        }
        Ok(removed)
    }

    /// Cleans up after a workflow was deleted: removes the triggers that start
    /// it and cancels its executions.
    ///
    /// Returns the number of cancelled executions.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Store` if a lookup or deletion fails.
    #[instrument(skip(self))]
    pub async fn workflow_removed(&self, workflow_id: WorkflowId) -> Result<usize, Report<EngineError>> {
        let triggers = self
            .triggers
            .delete_for_workflow(workflow_id)
            .await
            .map_err(store_failure("delete workflow triggers"))?;
        let executions = self.executions_for(workflow_id).await?;
        for execution in &executions {
            self.remove_execution(execution.id).await?;
        }
        info!(
            triggers,
            executions = executions.len(),
            "removed workflow state"
        );
        Ok(executions.len())
    }

    /// The step loop. Each iteration runs exactly one step.
    #[instrument(skip(self, interaction), fields(execution_id = %id))]
    async fn run(
        &self,
        id: ExecutionId,
        mut interaction: Option<String>,
    ) -> Result<RunOutcome, Report<EngineError>> {
        loop {
            let Some(execution) = self.execution(id).await? else {
                debug!("execution no longer exists");
                return Ok(RunOutcome::Cancelled);
            };

            let Some(workflow) = self.workflow(execution.workflow_id).await? else {
                self.remove_execution(id).await?;
                info!(workflow_id = %execution.workflow_id, "workflow is gone, dropped execution");
                return Ok(RunOutcome::Cancelled);
            };

            if execution.step_index > execution.steps.len() {
                return Err(EngineError::MalformedState { execution_id: id }.into());
            }

            let Some(step) = execution.current_step().cloned() else {
                self.remove_execution(id).await?;
                info!("execution completed");
                self.refresh(execution.workflow_id, &execution.state.trigger_user_id);
                return Ok(RunOutcome::Completed);
            };

            let Some(registered) = self.steps.get(&step.type_id) else {
                return Err(EngineError::UnknownStepType {
                    execution_id: id,
                    type_id: step.type_id.clone(),
                }
                .into());
            };

            let Some(access_token) = workflow.access_token.clone() else {
                return Err(EngineError::NotInstalled {
                    workflow_id: workflow.id,
                }
                .into());
            };

            let replacements = Replacements::for_state(&execution.state);
            let inputs = substitute_inputs(id, &step, &registered.spec, &replacements)?;

            debug!(
                step_id = %step.id,
                type_id = %step.type_id,
                step_index = execution.step_index,
                "running step"
            );
            let mut ctx = StepContext::new(
                id,
                execution.workflow_id,
                step.id.clone(),
                execution.state.trigger_user_id.clone(),
                access_token,
                interaction.take(),
                Arc::clone(&self.triggers),
                Arc::clone(&self.resolver),
            );
            let outcome = registered
                .handler
                .run(&mut ctx, inputs)
                .await
                .map_err(|e| EngineError::StepFailed {
                    execution_id: id,
                    step_id: step.id.clone(),
                    reason: e.to_string(),
                })?;
            interaction = ctx.into_interaction();

            match outcome {
                StepOutcome::Suspended => {
                    debug!(step_id = %step.id, "step suspended");
                    self.refresh(execution.workflow_id, &execution.state.trigger_user_id);
                    return Ok(RunOutcome::Suspended {
                        step_index: execution.step_index,
                    });
                }
                StepOutcome::Completed(outputs) => {
                    if !self.commit(&execution, &step.id, &outputs).await? {
                        warn!(step_id = %step.id, "cursor moved while the step ran");
                        return Ok(RunOutcome::Superseded);
                    }
                }
            }
        }
    }

    async fn commit(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        outputs: &StepOutputs,
    ) -> Result<bool, Report<EngineError>> {
        let mut state = execution.state.clone();
        state.record_outputs(step_id, outputs);
        Ok(self
            .executions
            .commit_step(execution.id, execution.step_index, &state)
            .await
            .map_err(store_failure("commit step"))?)
    }

    async fn remove_execution(&self, id: ExecutionId) -> Result<bool, Report<EngineError>> {
        let triggers = self
            .triggers
            .delete_for_execution(id)
            .await
            .map_err(store_failure("delete execution triggers"))?;
        if triggers > 0 {
            debug!(execution_id = %id, triggers, "deleted outstanding triggers");
        }
        Ok(self
            .executions
            .delete(id)
            .await
            .map_err(store_failure("delete execution"))?)
    }

    /// Hands the request to the refresher on its own task; the step loop
    /// never waits on it.
    fn refresh(&self, workflow_id: WorkflowId, user_id: &str) {
        let refresher = Arc::clone(&self.refresher);
        let request = ViewRefresh {
            workflow_id,
            user_id: user_id.to_string(),
        };
        tokio::spawn(async move { refresher.refresh(request).await });
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// Substitutes every declared input of a step. Undeclared inputs are dropped.
fn substitute_inputs(
    execution_id: ExecutionId,
    step: &Step,
    spec: &StepSpec,
    replacements: &Replacements,
) -> Result<StepInputs, Report<EngineError>> {
    let mut inputs = StepInputs::new();
    for (key, io) in &spec.inputs {
        let value = template::substitute_input(io.data_type, step.input(key), replacements)
            .map_err(|_| EngineError::MalformedInput {
                execution_id,
                step_id: step.id.clone(),
                input: key.clone(),
            })?;
        inputs.insert(key.clone(), value);
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::memory::{MemoryExecutionStore, MemoryTriggerStore, MemoryWorkflowStore};
    use crate::registry::AcceptAllFunctions;
    use crate::spec::{DataType, IoSpec};
    use crate::trigger::{Correlation, TriggerType};
    use serde_json::json;
    use std::sync::Mutex;

    /// Records its inputs and completes with `{"value": <text>}`.
    #[derive(Default)]
    struct Echo {
        calls: Mutex<Vec<StepInputs>>,
    }

    impl Echo {
        fn calls(&self) -> Vec<StepInputs> {
            self.calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl crate::registry::StepHandler for Echo {
        async fn run(
            &self,
            _ctx: &mut StepContext,
            inputs: StepInputs,
        ) -> Result<StepOutcome, Report<StepError>> {
            let mut outputs = StepOutputs::new();
            outputs.insert("value".to_string(), inputs["text"].clone());
            self.calls.lock().expect("lock").push(inputs);
            Ok(StepOutcome::Completed(outputs))
        }
    }

    /// Registers a modal resumption and suspends. Records taken interactions.
    #[derive(Default)]
    struct Wait {
        calls: Mutex<usize>,
        interactions: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl crate::registry::StepHandler for Wait {
        async fn run(
            &self,
            ctx: &mut StepContext,
            _inputs: StepInputs,
        ) -> Result<StepOutcome, Report<StepError>> {
            *self.calls.lock().expect("lock") += 1;
            let interaction = ctx.take_interaction();
            self.interactions.lock().expect("lock").push(interaction);
            ctx.register_resumption(
                Correlation::Modal {
                    id: format!("{}:{}", ctx.execution_id, ctx.step_id),
                },
                "test.resume",
                json!({ "step_id": ctx.step_id }),
            )
            .await?;
            Ok(StepOutcome::Suspended)
        }
    }

    struct Fail;

    #[async_trait]
    impl crate::registry::StepHandler for Fail {
        async fn run(
            &self,
            _ctx: &mut StepContext,
            _inputs: StepInputs,
        ) -> Result<StepOutcome, Report<StepError>> {
            Err(StepError::External {
                service: "chat".to_string(),
                message: "channel_not_found".to_string(),
            }
            .into())
        }
    }

    struct Harness {
        engine: Engine,
        workflows: Arc<MemoryWorkflowStore>,
        executions: Arc<MemoryExecutionStore>,
        triggers: Arc<MemoryTriggerStore>,
        echo: Arc<Echo>,
        wait: Arc<Wait>,
    }

    fn harness() -> Harness {
        let workflows = Arc::new(MemoryWorkflowStore::new());
        let executions = Arc::new(MemoryExecutionStore::new());
        let triggers = Arc::new(MemoryTriggerStore::new());
        let echo = Arc::new(Echo::default());
        let wait = Arc::new(Wait::default());

        let mut steps = StepRegistry::new();
        steps
            .register(
                "echo",
                StepSpec::new("Echo", "Test")
                    .input("text", IoSpec::required("Text", DataType::Text))
                    .output("value", IoSpec::required("Value", DataType::Text)),
                echo.clone(),
            )
            .expect("register echo");
        steps
            .register("wait", StepSpec::new("Wait", "Test"), wait.clone())
            .expect("register wait");
        steps
            .register("fail", StepSpec::new("Fail", "Test"), Arc::new(Fail))
            .expect("register fail");

        let engine = Engine::new(
            workflows.clone(),
            executions.clone(),
            triggers.clone(),
            steps,
            Arc::new(AcceptAllFunctions),
        );
        Harness {
            engine,
            workflows,
            executions,
            triggers,
            echo,
            wait,
        }
    }

    async fn install(h: &Harness, steps: Vec<Step>) -> Workflow {
        let mut workflow = Workflow::new("Test", "U1").with_access_token("xoxb-test");
        for step in steps {
            workflow = workflow.with_step(step);
        }
        h.workflows.insert(workflow.clone()).await;
        workflow
    }

    #[tokio::test]
    async fn synchronous_steps_run_to_completion_with_substitution() {
        let h = harness();
        let workflow = install(
            &h,
            vec![
                Step::with_id("a", "echo").with_input("text", "from $!{outputs.trigger.channel}"),
                Step::with_id("b", "echo")
                    .with_input("text", "$!{outputs.a.value} for $!{ctx.trigger_user_ping}"),
            ],
        )
        .await;

        let started = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default().with_output("channel", "C1"))
            .await
            .expect("start");

        assert_eq!(started.outcome, RunOutcome::Completed);
        assert!(h.executions.is_empty().await);
        let calls = h.echo.calls();
        assert_eq!(calls[0]["text"], "from C1");
        assert_eq!(calls[1]["text"], "from C1 for <@U7>");
    }

    #[tokio::test]
    async fn suspension_holds_cursor_and_advance_resumes() {
        let h = harness();
        let workflow = install(
            &h,
            vec![
                Step::with_id("a", "wait"),
                Step::with_id("b", "echo").with_input("text", "$!{outputs.a.answer}"),
            ],
        )
        .await;

        let started = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await
            .expect("start");
        assert_eq!(started.outcome, RunOutcome::Suspended { step_index: 0 });

        let id = started.execution.id;
        let stored = h.engine.execution(id).await.expect("get").expect("present");
        assert_eq!(stored.step_index, 0);
        let pending = h.triggers.list_by_type(TriggerType::Modal).await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].execution_id(), Some(id));

        let mut outputs = StepOutputs::new();
        outputs.insert("answer".to_string(), "yes".to_string());
        let outcome = h.engine.advance(id, "a", outputs).await.expect("advance");

        assert_eq!(outcome, AdvanceOutcome::Advanced(RunOutcome::Completed));
        assert_eq!(h.echo.calls()[0]["text"], "yes");
        assert!(h.engine.execution(id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn advance_for_wrong_step_changes_nothing() {
        let h = harness();
        let workflow = install(&h, vec![Step::with_id("a", "wait"), Step::with_id("b", "echo")]).await;
        let started = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await
            .expect("start");
        let id = started.execution.id;
        let before = h.engine.execution(id).await.expect("get").expect("present");

        let outcome = h
            .engine
            .advance(id, "b", StepOutputs::new())
            .await
            .expect("advance");

        assert_eq!(outcome, AdvanceOutcome::Stale { current_index: 0 });
        assert_eq!(h.engine.execution(id).await.expect("get"), Some(before));
        assert!(h.echo.calls().is_empty());
        assert_eq!(*h.wait.calls.lock().expect("lock"), 1);
    }

    #[tokio::test]
    async fn duplicate_advance_applies_once() {
        let h = harness();
        let workflow = install(&h, vec![Step::with_id("a", "wait"), Step::with_id("b", "wait")]).await;
        let started = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await
            .expect("start");
        let id = started.execution.id;

        let mut outputs = StepOutputs::new();
        outputs.insert("answer".to_string(), "first".to_string());
        let mut duplicate = StepOutputs::new();
        duplicate.insert("answer".to_string(), "second".to_string());

        let (first, second) = tokio::join!(
            h.engine.advance(id, "a", outputs),
            h.engine.advance(id, "a", duplicate)
        );
        let outcomes = [first.expect("first"), second.expect("second")];
        let advanced = outcomes
            .iter()
            .filter(|o| matches!(o, AdvanceOutcome::Advanced(_)))
            .count();
        assert_eq!(advanced, 1);
        assert!(outcomes.contains(&AdvanceOutcome::Stale { current_index: 1 }));

        let stored = h.engine.execution(id).await.expect("get").expect("present");
        assert_eq!(stored.step_index, 1);
        assert_eq!(
            stored.state.outputs.keys().filter(|k| k.starts_with("a.")).count(),
            1
        );
        assert_eq!(*h.wait.calls.lock().expect("lock"), 2);
    }

    #[tokio::test]
    async fn proceed_at_end_deletes_without_running() {
        let h = harness();
        let workflow = install(&h, vec![Step::with_id("a", "echo")]).await;
        let mut execution = WorkflowExecution::new(&workflow, "U7");
        execution.step_index = 1;
        h.executions.insert(&execution).await.expect("insert");

        let outcome = h.engine.proceed(execution.id).await.expect("proceed");

        assert_eq!(outcome, RunOutcome::Completed);
        assert!(h.echo.calls().is_empty());
        assert!(h.executions.is_empty().await);
    }

    #[tokio::test]
    async fn missing_workflow_cancels_execution_and_triggers() {
        let h = harness();
        let workflow = install(&h, vec![Step::with_id("a", "wait")]).await;
        let started = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await
            .expect("start");
        h.workflows.remove(workflow.id).await;

        let outcome = h.engine.proceed(started.execution.id).await.expect("proceed");

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(h.executions.is_empty().await);
        assert!(h.triggers.list_all().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn unknown_step_type_leaves_cursor() {
        let h = harness();
        let workflow = install(
            &h,
            vec![
                Step::with_id("a", "echo").with_input("text", "x"),
                Step::with_id("b", "teleport"),
            ],
        )
        .await;

        let result = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await;

        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("teleport"));
        let executions = h.engine.executions_for(workflow.id).await.expect("list");
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].step_index, 1);
    }

    #[tokio::test]
    async fn handler_failure_leaves_cursor() {
        let h = harness();
        let workflow = install(&h, vec![Step::with_id("a", "fail")]).await;

        let result = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await;

        assert!(result.is_err());
        let executions = h.engine.executions_for(workflow.id).await.expect("list");
        assert_eq!(executions[0].step_index, 0);
    }

    #[tokio::test]
    async fn malformed_rich_text_input_is_an_error() {
        let h = harness();
        let mut steps = StepRegistry::new();
        steps
            .register(
                "rich",
                StepSpec::new("Rich", "Test")
                    .input("text", IoSpec::required("Body", DataType::RichText)),
                h.echo.clone(),
            )
            .expect("register");
        let engine = Engine::new(
            h.workflows.clone(),
            h.executions.clone(),
            h.triggers.clone(),
            steps,
            Arc::new(AcceptAllFunctions),
        );
        let workflow = install(&h, vec![Step::with_id("a", "rich").with_input("text", "{nope")]).await;

        let result = engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await;
        assert!(result.is_err());
        assert!(h.echo.calls().is_empty());
    }

    #[tokio::test]
    async fn uninstalled_workflow_cannot_start() {
        let h = harness();
        let workflow = Workflow::new("Draft", "U1").with_step(Step::with_id("a", "echo"));
        h.workflows.insert(workflow.clone()).await;

        let result = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await;
        assert!(result.is_err());
        assert!(h.executions.is_empty().await);
    }

    #[tokio::test]
    async fn interaction_reaches_first_step_that_takes_it() {
        let h = harness();
        let workflow = install(
            &h,
            vec![
                Step::with_id("a", "echo").with_input("text", "hi"),
                Step::with_id("b", "wait"),
            ],
        )
        .await;

        h.engine
            .start_execution(
                &workflow,
                "U7",
                StartOptions::default().with_interaction(Some("I-1".to_string())),
            )
            .await
            .expect("start");

        assert_eq!(
            *h.wait.interactions.lock().expect("lock"),
            vec![Some("I-1".to_string())]
        );
    }

    #[tokio::test]
    async fn cancel_execution_removes_triggers() {
        let h = harness();
        let workflow = install(&h, vec![Step::with_id("a", "wait")]).await;
        let started = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await
            .expect("start");

        assert!(h.engine.cancel_execution(started.execution.id).await.expect("cancel"));
        assert!(!h.engine.cancel_execution(started.execution.id).await.expect("cancel"));
        assert!(h.triggers.list_all().await.expect("list").is_empty());

        let outcome = h
            .engine
            .advance(started.execution.id, "a", StepOutputs::new())
            .await
            .expect("advance");
        assert_eq!(outcome, AdvanceOutcome::Missing);
    }

    #[tokio::test]
    async fn workflow_removed_cancels_everything() {
        let h = harness();
        let workflow = install(&h, vec![Step::with_id("a", "wait")]).await;
        for user in ["U1", "U2"] {
            h.engine
                .start_execution(&workflow, user, StartOptions::default())
                .await
                .expect("start");
        }
        h.workflows.remove(workflow.id).await;

        let cancelled = h.engine.workflow_removed(workflow.id).await.expect("removed");

        assert_eq!(cancelled, 2);
        assert!(h.executions.is_empty().await);
        assert!(h.triggers.list_all().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn state_changes_request_view_refresh() {
        let h = harness();
        let (refresher, mut refreshes) = ChannelRefresher::channel();
        let engine = h.engine.clone().with_refresher(Arc::new(refresher));
        let workflow = install(&h, vec![Step::with_id("a", "echo").with_input("text", "x")]).await;

        engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await
            .expect("start");

        let first = refreshes.recv().await.expect("refresh");
        assert_eq!(first.workflow_id, workflow.id);
        assert_eq!(first.user_id, "U7");
        assert!(refreshes.recv().await.is_some());
    }

    /// Never completes a request.
    struct Stalled;

    #[async_trait]
    impl ViewRefresher for Stalled {
        async fn refresh(&self, _request: ViewRefresh) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn stalled_refresher_does_not_block_the_step_loop() {
        let h = harness();
        let engine = h.engine.clone().with_refresher(Arc::new(Stalled));
        let workflow = install(
            &h,
            vec![
                Step::with_id("a", "echo").with_input("text", "x"),
                Step::with_id("b", "wait"),
            ],
        )
        .await;

        let started = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            engine.start_execution(&workflow, "U7", StartOptions::default()),
        )
        .await
        .expect("start_execution returned")
        .expect("start");

        assert_eq!(started.outcome, RunOutcome::Suspended { step_index: 1 });
    }

    #[tokio::test]
    async fn step_index_never_decreases() {
        let h = harness();
        let workflow = install(
            &h,
            vec![Step::with_id("a", "wait"), Step::with_id("b", "wait"), Step::with_id("c", "wait")],
        )
        .await;
        let id = h
            .engine
            .start_execution(&workflow, "U7", StartOptions::default())
            .await
            .expect("start")
            .execution
            .id;

        let mut last = 0;
        for step in ["a", "a", "c", "b", "b", "c"] {
            h.engine.advance(id, step, StepOutputs::new()).await.expect("advance");
            let index = h
                .engine
                .execution(id)
                .await
                .expect("get")
                .map_or(workflow.steps.len(), |e| e.step_index);
            assert!(index >= last);
            assert!(index <= workflow.steps.len());
            last = index;
        }
        assert_eq!(last, workflow.steps.len());
    }
}
