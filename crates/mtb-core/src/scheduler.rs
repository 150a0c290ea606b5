//! Batch task list executed by the platform's task automation.

use std::time::Duration;

use serde::Serialize;

use crate::error::{CampaignError, CampaignResult};
use crate::platform::{ObjectHandle, Platform, Session, Value};
use crate::provision::ExecutionContext;

/// Command kind of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCommand {
    /// Initial conditions (`ComInc`)
    Integrate,
    /// Time-domain simulation (`ComSim`)
    Simulate,
}

/// One (context, command) entry of the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTask {
    pub id: u64,
    pub rank: u32,
    pub study_case: ObjectHandle,
    pub command: TaskCommand,
    pub object: ObjectHandle,
}

/// Append-only task list, executed once as a single blocking batch.
#[derive(Debug)]
pub struct TaskScheduler {
    task_list: ObjectHandle,
    tasks: Vec<ScheduledTask>,
    next_id: u64,
    started: bool,
}

impl TaskScheduler {
    /// Create the task automation object in the study-case folder.
    pub fn create<P: Platform>(platform: &mut P, study_folder: ObjectHandle) -> CampaignResult<Self> {
        let task_list = platform.create(study_folder, "ComTasks", "MTB Tasks")?;
        Ok(Self::new(task_list))
    }

    pub fn new(task_list: ObjectHandle) -> Self {
        Self {
            task_list,
            tasks: Vec::new(),
            next_id: 0,
            started: false,
        }
    }

    pub fn task_list(&self) -> ObjectHandle {
        self.task_list
    }

    /// Tasks in execution-list order.
    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Append the integrate and simulate commands of a context.
    pub fn schedule<P: Platform>(
        &mut self,
        platform: &mut P,
        context: &ExecutionContext,
    ) -> CampaignResult<()> {
        if self.started {
            return Err(CampaignError::ContextProtocol(format!(
                "cannot schedule {} after the batch started",
                context.name
            )));
        }

        platform.execute(self.task_list, "AppendStudyCase", &[context.study_case.into()])?;
        for (command, object) in [
            (TaskCommand::Integrate, context.integrate),
            (TaskCommand::Simulate, context.simulate),
        ] {
            platform.execute(self.task_list, "AppendCommand", &[object.into(), Value::Int(-1)])?;
            self.tasks.push(ScheduledTask {
                id: self.next_id,
                rank: context.rank,
                study_case: context.study_case,
                command,
                object,
            });
            self.next_id += 1;
        }

        tracing::debug!(rank = context.rank, case = %context.name, "Context scheduled");
        Ok(())
    }

    /// Execute the whole batch. Blocks until the platform reports back.
    ///
    /// Seals the session: no context can be activated for binding afterwards.
    /// A non-zero exit code fails the batch as a whole.
    pub fn run_all<P: Platform>(
        &mut self,
        session: &mut Session<P>,
        parallel: bool,
        timeout: Duration,
    ) -> CampaignResult<()> {
        if self.started {
            return Err(CampaignError::ContextProtocol(
                "task batch already executed".to_string(),
            ));
        }
        self.started = true;
        session.seal();

        let platform = session.platform();
        platform.set_attribute(self.task_list, "iEnableParal", Value::Int(i64::from(parallel)))?;
        platform.set_attribute(self.task_list, "parMethod", Value::Int(0))?;
        let settings = platform
            .get_attribute(self.task_list, "parallelSetting")?
            .as_object()
            .ok_or_else(|| CampaignError::ObjectNotFound("parallelSetting".to_string()))?;
        let timeout_secs = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        platform.set_attribute(settings, "procTimeOut", Value::Int(timeout_secs))?;

        tracing::info!(
            tasks = self.tasks.len(),
            parallel,
            timeout_secs,
            "Running task batch"
        );
        let code = platform
            .execute(self.task_list, "Execute", &[])?
            .as_int()
            .unwrap_or(0);
        if code != 0 {
            return Err(CampaignError::TaskFailed(code));
        }
        tracing::info!("Task batch finished");
        Ok(())
    }
}
