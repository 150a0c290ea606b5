//! Campaign orchestrator.
//!
//! ```text
//! Connecting → Validating → BackingUp → Provisioning(rank)* → Scheduled
//!            → Running → Exporting(rank)* → Done
//! ```
//!
//! `Failed` is reachable from every state. Everything up to `BackingUp` only
//! reads the model, so a failed validation leaves the project untouched.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::Serialize;

use crate::case::CaseSheet;
use crate::config::CampaignConfig;
use crate::error::{CampaignError, CampaignResult};
use crate::export::ResultExporter;
use crate::platform::{ObjectHandle, Platform, ProjectFolder, Session, Value};
use crate::provision::{
    ContextState, ExecutionContext, InitializerCopyShim, ProjectLayout, Provisioner,
};
use crate::resolver::{self, ResolveSummary};
use crate::scheduler::TaskScheduler;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CampaignState {
    Idle,
    Connecting,
    Validating,
    BackingUp,
    Provisioning { rank: u32 },
    Scheduled,
    Running,
    Exporting { rank: u32 },
    Done,
    Failed,
}

impl fmt::Display for CampaignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Validating => write!(f, "validating"),
            Self::BackingUp => write!(f, "backing-up"),
            Self::Provisioning { rank } => write!(f, "provisioning({})", rank),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Exporting { rank } => write!(f, "exporting({})", rank),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Name of the project version taken before any mutation.
pub fn backup_name(at: DateTime<Local>) -> String {
    format!("PRE_MTB_{}", at.format("%d%m%Y%H%M%S"))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Summary of one provisioned context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextReport {
    pub rank: u32,
    pub name: String,
    pub export_path: String,
    pub state: ContextState,
}

/// Outcome of a finished campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub project: String,
    /// Project version taken before the first mutation
    pub backup: String,
    pub bindings: ResolveSummary,
    pub contexts: Vec<ContextReport>,
    /// Ranks of cases that are not dynamic
    pub skipped: Vec<u32>,
    /// Number of batch commands
    pub tasks: usize,
    pub started_at: String,
    pub finished_at: String,
}

/// What validation finds before the project is touched.
struct Preflight {
    project: ObjectHandle,
    base_case: ObjectHandle,
    network_data: ObjectHandle,
    model_root: ObjectHandle,
    grids: Vec<ObjectHandle>,
    study_time: Value,
    init_script: ObjectHandle,
    exporter: ResultExporter,
    shim: Option<InitializerCopyShim>,
    bindings: ResolveSummary,
}

/// Runs one campaign over a case sheet.
pub struct Campaign<P> {
    config: CampaignConfig,
    sheet: CaseSheet,
    state: CampaignState,
    history: Vec<CampaignState>,
    contexts: Vec<ExecutionContext>,
    session: Option<Session<P>>,
}

impl<P: Platform> Campaign<P> {
    pub fn new(config: CampaignConfig, sheet: CaseSheet) -> Self {
        Self {
            config,
            sheet,
            state: CampaignState::Idle,
            history: Vec::new(),
            contexts: Vec::new(),
            session: None,
        }
    }

    pub fn state(&self) -> CampaignState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[CampaignState] {
        &self.history
    }

    /// Contexts created so far, in rank order.
    pub fn contexts(&self) -> &[ExecutionContext] {
        &self.contexts
    }

    pub fn sheet(&self) -> &CaseSheet {
        &self.sheet
    }

    /// Platform session, once connected.
    pub fn session(&self) -> Option<&Session<P>> {
        self.session.as_ref()
    }

    pub fn into_session(self) -> Option<Session<P>> {
        self.session
    }

    fn transition(&mut self, next: CampaignState) {
        tracing::info!(from = %self.state, to = %next, "Campaign state");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, error: CampaignError) -> CampaignError {
        tracing::error!(state = %self.state, error = %error, "Campaign failed");
        self.transition(CampaignState::Failed);
        error
    }

    /// Run the whole campaign; `connect` establishes the platform session.
    ///
    /// The first fatal error stops the campaign; there is no per-case recovery.
    pub fn run<F>(&mut self, connect: F) -> CampaignResult<CampaignReport>
    where
        F: FnOnce() -> CampaignResult<P>,
    {
        let started_at = Utc::now();
        self.transition(CampaignState::Connecting);
        let platform = match connect() {
            Ok(platform) => platform,
            Err(e) => return Err(self.fail(e)),
        };

        let mut session = Session::new(platform);
        let result = self.drive(&mut session, started_at);
        if result.is_err() {
            // Provisioning runs with echo off
            let _ = session.platform().set_echo(true);
        }
        self.session = Some(session);
        result.map_err(|e| self.fail(e))
    }

    fn drive(
        &mut self,
        session: &mut Session<P>,
        started_at: DateTime<Utc>,
    ) -> CampaignResult<CampaignReport> {
        self.transition(CampaignState::Validating);
        let preflight = self.validate(session.platform())?;

        self.transition(CampaignState::BackingUp);
        let backup = backup_name(Local::now());
        session
            .platform()
            .create_version(preflight.project, &backup)?;
        tracing::info!(version = %backup, "Project backup created");

        let (layout, mut scheduler) = self.prepare(session, &preflight)?;
        let provisioner = Provisioner::new(&layout, &preflight.exporter, preflight.shim.as_ref());
        let width = self.sheet.rank_width();
        let cases: Vec<_> = self.sheet.dynamic_cases().cloned().collect();

        session.platform().set_echo(false)?;
        for case in &cases {
            self.transition(CampaignState::Provisioning { rank: case.rank });
            let mut context = provisioner.provision(session, &self.sheet.channels, case, width)?;
            scheduler.schedule(session.platform(), &context)?;
            context.state = ContextState::Queued;
            self.contexts.push(context);
        }
        session.platform().set_echo(true)?;
        self.transition(CampaignState::Scheduled);

        self.transition(CampaignState::Running);
        scheduler.run_all(
            session,
            self.config.parallel,
            Duration::from_secs(self.config.task_timeout_secs),
        )?;

        for i in 0..self.contexts.len() {
            self.transition(CampaignState::Exporting {
                rank: self.contexts[i].rank,
            });
            preflight.exporter.export(session, &self.contexts[i].export)?;
            self.contexts[i].state = ContextState::Exported;
        }

        self.transition(CampaignState::Done);
        Ok(CampaignReport {
            project: self.sheet.project.clone(),
            backup,
            bindings: preflight.bindings,
            contexts: self
                .contexts
                .iter()
                .map(|c| ContextReport {
                    rank: c.rank,
                    name: c.name.clone(),
                    export_path: c.export.path.display().to_string(),
                    state: c.state,
                })
                .collect(),
            skipped: self
                .sheet
                .cases()
                .iter()
                .filter(|c| !c.is_dynamic())
                .map(|c| c.rank)
                .collect(),
            tasks: scheduler.tasks().len(),
            started_at: timestamp(started_at),
            finished_at: timestamp(Utc::now()),
        })
    }

    /// Read-only checks and lookups, then subscription resolution.
    fn validate(&mut self, platform: &mut P) -> CampaignResult<Preflight> {
        let project = platform
            .active_project()?
            .ok_or(CampaignError::NoActiveProject)?;
        let base_case = platform
            .active_study_case()?
            .ok_or(CampaignError::NoActiveStudyCase)?;
        let study_time = platform.get_attribute(base_case, "iStudyTime")?;

        let network_data = platform
            .project_folder(ProjectFolder::NetworkData)?
            .ok_or_else(|| CampaignError::ObjectNotFound("netdat".to_string()))?;
        let mut grids = Vec::new();
        for grid in platform.contents(network_data, "ElmNet", true)? {
            if platform.is_calc_relevant(grid)? {
                grids.push(grid);
            }
        }
        if grids.is_empty() {
            return Err(CampaignError::NoActiveGrids);
        }
        tracing::info!(grids = grids.len(), "Active grids found");

        let model_root = platform
            .search(network_data, &self.config.model_root)?
            .ok_or_else(|| CampaignError::ObjectNotFound(self.config.model_root.clone()))?;
        let init_script = platform
            .search(model_root, "initializer_script.ComDpl")?
            .ok_or_else(|| {
                CampaignError::ObjectNotFound("initializer_script.ComDpl".to_string())
            })?;
        let exporter = ResultExporter::locate(
            platform,
            model_root,
            self.config.export_dir.clone(),
            self.sheet.project.clone(),
        )?;
        let shim = match self.config.copy_grid.as_deref() {
            Some(grid) => Some(InitializerCopyShim::locate(platform, model_root, grid)?),
            None => None,
        };

        let entries = resolver::campaign_entries(
            &self.sheet.bindings,
            &self.config.subscriptions,
            &self.config.slots,
            &self.sheet.channels,
        )?;
        let bindings = resolver::resolve(
            entries.iter().map(String::as_str),
            &mut self.sheet.channels,
        )?;

        Ok(Preflight {
            project,
            base_case,
            network_data,
            model_root,
            grids,
            study_time,
            init_script,
            exporter,
            shim,
            bindings,
        })
    }

    /// Baseline the project and create the shared folders and task list.
    fn prepare(
        &self,
        session: &mut Session<P>,
        preflight: &Preflight,
    ) -> CampaignResult<(ProjectLayout, TaskScheduler)> {
        let platform = session.platform();
        let project = preflight.project;

        if let Some(settings) = platform.search(project, "Settings.SetFold")? {
            platform.delete(settings)?;
            tracing::debug!("Project settings reset");
        }
        platform.deactivate(project)?;
        platform.activate(project)?;
        platform.activate(preflight.base_case)?;
        platform.execute(preflight.base_case, "Consolidate", &[])?;

        let variation_folder = match platform.project_folder(ProjectFolder::Variations)? {
            Some(folder) => folder,
            None => {
                let network_model = platform
                    .project_folder(ProjectFolder::NetworkModel)?
                    .ok_or_else(|| CampaignError::ObjectNotFound("netmod".to_string()))?;
                create_folder(platform, network_model, "Variations", ProjectFolder::Variations)?
            }
        };
        let study_folder = match platform.project_folder(ProjectFolder::StudyCases)? {
            Some(folder) => folder,
            None => create_folder(platform, project, "Study Cases", ProjectFolder::StudyCases)?,
        };

        let scheduler = TaskScheduler::create(platform, study_folder)?;
        std::fs::create_dir_all(preflight.exporter.export_dir())?;

        session.adopt(preflight.base_case)?;
        session.deactivate(preflight.base_case)?;

        let layout = ProjectLayout {
            network_data: preflight.network_data,
            model_root: preflight.model_root,
            study_folder,
            variation_folder,
            grids: preflight.grids.clone(),
            study_time: preflight.study_time.clone(),
            init_script: preflight.init_script,
        };
        Ok((layout, scheduler))
    }
}

fn create_folder<P: Platform>(
    platform: &mut P,
    parent: ObjectHandle,
    name: &str,
    folder: ProjectFolder,
) -> CampaignResult<ObjectHandle> {
    let created = platform.create(parent, "IntPrjfolder", name)?;
    platform.set_attribute(created, "iopt_typ", folder.code().into())?;
    tracing::info!(folder = name, "Project folder created");
    Ok(created)
}
