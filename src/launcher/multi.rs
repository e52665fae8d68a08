//! The multi-launcher: one item that runs a list of job launchers either as
//! a chain or all at once.
//!
//! Each entry of the "Jobs" master/details component names a launcher
//! template and carries its launch parameters. On launch every entry becomes
//! an independent sub-launcher whose id is derived from the parent id and
//! its position. In sequential mode a sub-launcher whose input is `LAST`
//! reads the first output file of the previous one. A background run polls
//! the sub-launchers and publishes the aggregate status.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::job::{INPUT_FILE, LAUNCH_ACTION, LAUNCH_PARAMETERS, OUTPUT_FILES};
use crate::builder::{CompositeItemBuilder, ItemBuilder};
use crate::item::types::lock;
use crate::item::{
    Component, DataComponent, Entry, Form, FormCell, Item, ItemCore, ItemId, ItemStatus, ItemType,
    MasterDetailsComponent, MasterDetailsPair, Project, Resource, ResourceComponent, StatusCell,
};

pub const LAUNCH: &str = "Launch";
pub const JOBS: &str = "Jobs";
pub const EXECUTION_MODE: &str = "Execution Mode";
pub const PARALLEL_EXECUTION: &str = "Enable Parallel Execution";
/// Input file keyword replaced by the previous job's first output
pub const LAST_OUTPUT: &str = "LAST";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A sub-launcher shared between the orchestrator and its background run
pub type SharedItem = Arc<Mutex<Box<dyn Item>>>;

struct ActiveRun {
    id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct MultiLauncher {
    core: ItemCore,
    prototypes: Vec<Box<dyn Item>>,
    poll_interval: Duration,
    running: Arc<RwLock<Vec<SharedItem>>>,
    needy: Mutex<Option<SharedItem>>,
    run: Option<ActiveRun>,
}

impl MultiLauncher {
    pub fn new(
        name: &str,
        description: &str,
        prototypes: Vec<Box<dyn Item>>,
        project: Option<Project>,
        poll_interval: Duration,
    ) -> Self {
        for prototype in &prototypes {
            prototype.core().form.update(|form| {
                if let Some(entry) = form
                    .data_mut(LAUNCH_PARAMETERS)
                    .and_then(|p| p.entry_mut(INPUT_FILE))
                    && !entry.allowed_values.iter().any(|v| v == LAST_OUTPUT)
                {
                    entry.allowed_values.push(LAST_OUTPUT.to_string());
                }
            });
        }

        let globals = DataComponent::new(1, EXECUTION_MODE, "How the jobs are run").with_entry(
            Entry::new(
                PARALLEL_EXECUTION,
                "Run all jobs at once instead of chaining them",
            )
            .with_default("false")
            .with_allowed_values(["true", "false"])
            .required(),
        );
        let mut jobs = MasterDetailsComponent::new(2, JOBS, globals);
        jobs.templates = Self::templates(&prototypes);

        let form = Form::new(name, description)
            .with_component(Component::MasterDetails(jobs))
            .with_component(Component::Resources(ResourceComponent::new(3, OUTPUT_FILES)))
            .with_actions([LAUNCH]);

        Self {
            core: ItemCore::new(name, description, name, ItemType::Simulation, form, project),
            prototypes,
            poll_interval,
            running: Arc::new(RwLock::new(Vec::new())),
            needy: Mutex::new(None),
            run: None,
        }
    }

    fn templates(prototypes: &[Box<dyn Item>]) -> Vec<MasterDetailsPair> {
        prototypes
            .iter()
            .filter_map(|p| {
                p.form()
                    .data(LAUNCH_PARAMETERS)
                    .cloned()
                    .map(|details| MasterDetailsPair {
                        master: p.name().to_string(),
                        details,
                    })
            })
            .collect()
    }

    fn review(form: &Form, templates: &[String]) -> ItemStatus {
        let Some(jobs) = form.master_details(JOBS) else {
            return ItemStatus::InfoError;
        };
        if !jobs.globals.is_satisfied() || jobs.masters.is_empty() {
            return ItemStatus::InfoError;
        }
        for (i, pair) in jobs.masters.iter().enumerate() {
            if !templates.contains(&pair.master) {
                warn!("Job {} names unknown launcher '{}'", i, pair.master);
                return ItemStatus::InfoError;
            }
            if !pair.details.is_satisfied() {
                warn!("Job {} ({}) has invalid parameters", i, pair.master);
                return ItemStatus::InfoError;
            }
        }
        ItemStatus::ReadyToProcess
    }

    /// A background run is live and has not published its final status
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.handle.is_finished())
            && self.core.status.get().is_active()
    }

    /// Id of the in-flight run, if any
    pub fn run_id(&self) -> Option<Uuid> {
        if !self.is_running() {
            return None;
        }
        self.run.as_ref().map(|run| run.id)
    }

    /// Sub-launchers of the current run
    pub fn running_launchers(&self) -> Vec<SharedItem> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The first sub-launcher of the current run that waits on input
    fn find_needy(&self) -> Option<SharedItem> {
        self.running_launchers()
            .into_iter()
            .find(|job| lock(job).status() == ItemStatus::NeedsInfo)
    }

    /// Turn each job entry into a configured sub-launcher. Stops at the
    /// first entry that does not review as ready.
    fn configure_subforms(&self, jobs: &MasterDetailsComponent) -> Option<Vec<SharedItem>> {
        let mut launchers = Vec::with_capacity(jobs.masters.len());

        for (i, pair) in jobs.masters.iter().enumerate() {
            let Some(prototype) = self.prototypes.iter().find(|p| p.name() == pair.master) else {
                warn!("No launcher named '{}' for job {}", pair.master, i);
                return None;
            };

            let mut job = prototype.duplicate();
            job.set_id(self.core.id + i as ItemId);
            job.set_name(&format!("{}_{}", prototype.name(), i));

            let mut form = job.form();
            if let Some(parameters) = form.data_mut(LAUNCH_PARAMETERS) {
                for entry in &pair.details.entries {
                    if let Some(target) = parameters.entry_mut(&entry.name) {
                        target.value = entry.value.clone();
                    }
                }
            }

            let status = job.submit_form(form);
            if status != ItemStatus::ReadyToProcess {
                warn!(
                    "Job {} ({}) of item {} is {}; not launching",
                    i,
                    job.name(),
                    self.core.id,
                    status
                );
                return None;
            }
            launchers.push(Arc::new(Mutex::new(job)));
        }

        Some(launchers)
    }

    fn launch(&mut self) -> ItemStatus {
        let form = self.core.form.get();
        let Some(jobs) = form.master_details(JOBS) else {
            return ItemStatus::InfoError;
        };
        if jobs.masters.is_empty() {
            warn!("Item {} has no jobs to launch", self.core.id);
            return ItemStatus::InfoError;
        }
        let parallel = jobs.globals.value(PARALLEL_EXECUTION) == Some("true");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Item {} cannot launch outside a tokio runtime", self.core.id);
            return ItemStatus::InfoError;
        };

        let Some(launchers) = self.configure_subforms(jobs) else {
            self.running
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            return ItemStatus::InfoError;
        };

        let mut truncated = false;
        let active = if parallel {
            let mut launched = Vec::with_capacity(launchers.len());
            for (i, job) in launchers.iter().enumerate() {
                let mut guard = lock(job);
                let status = guard.status();
                if status != ItemStatus::ReadyToProcess {
                    warn!(
                        "Job {} ({}) is {}; the remaining jobs are not launched",
                        i,
                        guard.name(),
                        status
                    );
                    truncated = true;
                    break;
                }
                let started = guard.process(LAUNCH_ACTION);
                debug!("Job {} ({}) launched: {}", i, guard.name(), started);
                drop(guard);
                launched.push(job.clone());
            }
            launched
        } else {
            launchers
        };

        *self.running.write().unwrap_or_else(PoisonError::into_inner) = active.clone();
        self.core.form.update(|form| {
            if let Some(outputs) = form.resources_mut(OUTPUT_FILES) {
                outputs.clear();
            }
        });

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        info!(
            "Item {} starting run {} with {} jobs ({})",
            self.core.id,
            run_id,
            active.len(),
            if parallel { "parallel" } else { "sequential" }
        );
        self.core.status.set(ItemStatus::Processing);

        let ctx = RunContext {
            run_id,
            launchers: active,
            sequential: !parallel,
            truncated,
            status: self.core.status.clone(),
            form: self.core.form.clone(),
            running: self.running.clone(),
            poll_interval: self.poll_interval,
            cancel: cancel.clone(),
        };
        let handle = runtime.spawn(run_launch(ctx));
        self.run = Some(ActiveRun {
            id: run_id,
            cancel,
            handle,
        });

        ItemStatus::Processing
    }
}

impl Item for MultiLauncher {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }

    /// While a sub-launcher waits on input, its form is served in place of
    /// the orchestrator's, addressed to the orchestrator.
    fn form(&self) -> Form {
        if self.status().is_active()
            && let Some(job) = self.find_needy()
        {
            let mut form = lock(&job).form();
            form.item_id = self.core.id;
            *lock(&self.needy) = Some(job);
            return form;
        }
        self.core.form.get()
    }

    fn submit_form(&mut self, form: Form) -> ItemStatus {
        if !self.core.enabled {
            return ItemStatus::InfoError;
        }

        if self.core.status.get() == ItemStatus::NeedsInfo {
            let needy = lock(&self.needy).take().or_else(|| self.find_needy());
            if let Some(job) = needy {
                let mut guard = lock(&job);
                let mut form = form;
                form.item_id = guard.id();
                let status = guard.submit_form(form);
                debug!(
                    "Item {} forwarded form to job {}: {}",
                    self.core.id,
                    guard.name(),
                    status
                );
                return ItemStatus::Processing;
            }
        }

        if self.is_running() {
            warn!("Item {} cannot be reconfigured while running", self.core.id);
            return ItemStatus::InfoError;
        }

        let templates: Vec<String> = self.prototypes.iter().map(|p| p.name().to_string()).collect();
        self.core
            .submit_with(form, |form| Self::review(form, &templates))
    }

    fn process(&mut self, action: &str) -> ItemStatus {
        if !self.core.enabled {
            return ItemStatus::InfoError;
        }

        if action != LAUNCH {
            if self.is_running() {
                return ItemStatus::Processing;
            }
            warn!("Item {} has no action '{}'", self.core.id, action);
            self.core.status.set(ItemStatus::InfoError);
            return ItemStatus::InfoError;
        }

        if self.is_running() {
            warn!("Item {} is already running", self.core.id);
            return ItemStatus::Processing;
        }
        let current = self.core.status.get();
        if !current.can_process() {
            warn!("Item {} is {} and cannot launch", self.core.id, current);
            return ItemStatus::InfoError;
        }

        // A started run owns the status from here on
        let status = self.launch();
        if status == ItemStatus::InfoError {
            self.core.status.set(status);
        }
        status
    }

    fn cancel(&mut self) -> ItemStatus {
        let Some(run) = self.run.take() else {
            return self.status();
        };
        if run.handle.is_finished() {
            return self.status();
        }

        run.cancel.cancel();
        let launchers = std::mem::take(
            &mut *self.running.write().unwrap_or_else(PoisonError::into_inner),
        );
        for job in &launchers {
            lock(job).cancel();
        }
        *lock(&self.needy) = None;

        info!("Item {} cancelled run {}", self.core.id, run.id);
        self.core.status.set(ItemStatus::ReadyToProcess);
        ItemStatus::ReadyToProcess
    }

    fn output_file(&self) -> Option<std::path::PathBuf> {
        self.core
            .form
            .get()
            .resources(OUTPUT_FILES)
            .and_then(|r| r.first())
            .map(|r| r.path.clone())
    }

    fn reload_project_data(&mut self) {
        for prototype in &mut self.prototypes {
            prototype.reload_project_data();
        }
        let templates = Self::templates(&self.prototypes);
        self.core.form.update(|form| {
            if let Some(jobs) = form.master_details_mut(JOBS) {
                jobs.templates = templates;
            }
        });
    }

    fn duplicate(&self) -> Box<dyn Item> {
        Box::new(MultiLauncher {
            core: self.core.deep_copy(),
            prototypes: self.prototypes.iter().map(|p| p.duplicate()).collect(),
            poll_interval: self.poll_interval,
            running: Arc::new(RwLock::new(Vec::new())),
            needy: Mutex::new(None),
            run: None,
        })
    }
}

/// Everything a background run needs; the run is the only writer of the
/// orchestrator's status while it is live.
struct RunContext {
    run_id: Uuid,
    launchers: Vec<SharedItem>,
    sequential: bool,
    /// A parallel fan-out stopped early; the run cannot succeed
    truncated: bool,
    status: StatusCell,
    form: FormCell,
    running: Arc<RwLock<Vec<SharedItem>>>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl RunContext {
    fn publish(&self, status: ItemStatus) {
        if !self.cancel.is_cancelled() {
            self.status.set(status);
        }
    }

    /// Wait one poll interval. Returns `false` if the run was cancelled.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }
}

async fn run_launch(ctx: RunContext) {
    if ctx.sequential && !run_sequence(&ctx).await {
        debug!("Run {} cancelled during the sequence", ctx.run_id);
        return;
    }
    aggregate(&ctx).await;
}

/// Run the jobs one after another. Returns `false` if cancelled.
async fn run_sequence(ctx: &RunContext) -> bool {
    let mut previous_output: Option<String> = None;

    for (i, job) in ctx.launchers.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return false;
        }
        if let Some(name) = previous_output.as_deref() {
            chain_input(job, name);
        }

        let mut status = {
            let mut guard = lock(job);
            let started = guard.process(LAUNCH_ACTION);
            debug!("Run {}: job {} ({}) {}", ctx.run_id, i, guard.name(), started);
            guard.status()
        };
        ctx.publish(in_sequence(status));

        while status.is_active() {
            if !ctx.pause().await {
                return false;
            }
            status = lock(job).status();
            ctx.publish(in_sequence(status));
        }

        if status == ItemStatus::InfoError {
            warn!("Run {}: job {} failed; stopping the chain", ctx.run_id, i);
            break;
        }
        previous_output = first_output(job);
    }

    true
}

/// Status shown while a chain is still going: finished jobs read as
/// progress, not as the end of the run.
fn in_sequence(status: ItemStatus) -> ItemStatus {
    match status {
        ItemStatus::NeedsInfo | ItemStatus::InfoError => status,
        _ => ItemStatus::Processing,
    }
}

async fn aggregate(ctx: &RunContext) {
    loop {
        let statuses: Vec<ItemStatus> = ctx.launchers.iter().map(|j| lock(j).status()).collect();
        let current = ItemStatus::aggregate(statuses.iter().copied());
        let settled =
            current == ItemStatus::InfoError || !statuses.iter().any(ItemStatus::is_active);

        if settled {
            finish(ctx, current);
            return;
        }

        ctx.publish(current);
        if !ctx.pause().await {
            debug!("Run {} cancelled", ctx.run_id);
            return;
        }
    }
}

fn finish(ctx: &RunContext, current: ItemStatus) {
    if ctx.cancel.is_cancelled() {
        return;
    }

    let outcome = if ctx.truncated {
        ItemStatus::InfoError
    } else {
        current
    };

    if outcome == ItemStatus::Processed || ctx.truncated {
        let resources: Vec<Resource> = ctx
            .launchers
            .iter()
            .filter_map(|job| {
                let guard = lock(job);
                (guard.status() == ItemStatus::Processed).then(|| guard.form())
            })
            .flat_map(|form| {
                form.resources(OUTPUT_FILES)
                    .map(|r| r.resources.clone())
                    .unwrap_or_default()
            })
            .collect();

        ctx.form.update(|form| {
            if let Some(outputs) = form.resources_mut(OUTPUT_FILES) {
                outputs.clear();
                outputs.resources.extend(resources);
            }
        });
    }

    ctx.running
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    ctx.publish(outcome);
    info!("Run {} finished: {}", ctx.run_id, outcome);
}

/// Point a job whose input is `LAST` at the given file
fn chain_input(job: &SharedItem, file_name: &str) {
    let mut guard = lock(job);
    let mut form = guard.form();
    let Some(entry) = form
        .data_mut(LAUNCH_PARAMETERS)
        .and_then(|p| p.entry_mut(INPUT_FILE))
    else {
        return;
    };
    if entry.value != LAST_OUTPUT {
        return;
    }

    if !entry.allowed_values.iter().any(|v| v == file_name) {
        entry.allowed_values.insert(0, file_name.to_string());
    }
    entry.value = file_name.to_string();

    let status = guard.submit_form(form);
    info!("Chained {} into {}: {}", file_name, guard.name(), status);
}

fn first_output(job: &SharedItem) -> Option<String> {
    lock(job)
        .form()
        .resources(OUTPUT_FILES)
        .and_then(|r| r.first())
        .map(|r| r.name.clone())
}

/// Builds [`MultiLauncher`]s from every non-composite simulation builder it
/// is handed.
pub struct MultiLauncherBuilder {
    name: String,
    description: String,
    poll_interval: Duration,
    sub_builders: RwLock<Vec<Arc<dyn ItemBuilder>>>,
}

impl MultiLauncherBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "Runs several job launchers in sequence or in parallel".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sub_builders: RwLock::new(Vec::new()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl ItemBuilder for MultiLauncherBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn item_type(&self) -> ItemType {
        ItemType::Simulation
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn build(&self, project: Option<&Project>) -> Option<Box<dyn Item>> {
        let builders = self
            .sub_builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if builders.is_empty() {
            warn!("Builder '{}' has no launchers to compose", self.name);
            return None;
        }

        let prototypes: Vec<Box<dyn Item>> =
            builders.iter().filter_map(|b| b.build(project)).collect();
        if prototypes.is_empty() {
            warn!("Builder '{}' could not build any launcher", self.name);
            return None;
        }

        Some(Box::new(MultiLauncher::new(
            &self.name,
            &self.description,
            prototypes,
            project.cloned(),
            self.poll_interval,
        )))
    }
}

impl CompositeItemBuilder for MultiLauncherBuilder {
    fn add_builders(&self, builders: Vec<Arc<dyn ItemBuilder>>) {
        let launchers: Vec<Arc<dyn ItemBuilder>> = builders
            .into_iter()
            .filter(|b| {
                b.name() != self.name && !b.is_composite() && b.item_type() == ItemType::Simulation
            })
            .collect();
        debug!(
            "Builder '{}' composes {} launchers",
            self.name,
            launchers.len()
        );
        *self
            .sub_builders
            .write()
            .unwrap_or_else(PoisonError::into_inner) = launchers;
    }

    fn has_builders(&self) -> bool {
        !self
            .sub_builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
