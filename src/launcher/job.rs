//! A single job launcher.
//!
//! The executable is a command-line template. `${inputFile}`, `${outputFile}`,
//! `${projectDir}` and `${itemId}` are filled in from the form; any other
//! `${name}` placeholder is asked for through a follow-up "Launch Inputs"
//! form before the job starts.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::runner::{JobCommand, JobRunner, RunnerError};
use crate::builder::ItemBuilder;
use crate::item::{
    Component, DataComponent, Entry, Form, Item, ItemCore, ItemEvent, ItemStatus, ItemType,
    Project, Resource, ResourceComponent,
};

pub const LAUNCH_ACTION: &str = "Launch the Job";
pub const LAUNCH_PARAMETERS: &str = "Launch Parameters";
pub const LAUNCH_INPUTS: &str = "Launch Inputs";
pub const OUTPUT_FILES: &str = "Output Files";
pub const EXECUTABLE: &str = "Executable";
pub const INPUT_FILE: &str = "Input File";
pub const OUTPUT_FILE: &str = "Output File";

const BUILTIN_PLACEHOLDERS: [&str; 4] = ["inputFile", "outputFile", "projectDir", "itemId"];

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Placeholder names in a template, in order of first appearance
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// How a launcher renders and runs its command
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    pub executable: String,
    /// Extension (without dot) of project files offered as inputs
    pub input_extension: Option<String>,
    pub timeout: Option<Duration>,
    /// Resolve the program on PATH when the form is reviewed
    pub check_executable: bool,
}

impl LauncherSettings {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            input_extension: None,
            timeout: None,
            check_executable: true,
        }
    }
}

pub struct JobLauncher {
    core: ItemCore,
    runner: Arc<dyn JobRunner>,
    settings: LauncherSettings,
    /// Values supplied through the "Launch Inputs" form
    inputs: BTreeMap<String, String>,
    pending: Option<Form>,
    cancel: Option<CancellationToken>,
}

impl JobLauncher {
    pub fn new(
        name: &str,
        description: &str,
        settings: LauncherSettings,
        runner: Arc<dyn JobRunner>,
        project: Option<Project>,
    ) -> Self {
        let input_files = project
            .as_ref()
            .map(|p| p.list_files(settings.input_extension.as_deref()))
            .unwrap_or_default();

        let parameters = DataComponent::new(1, LAUNCH_PARAMETERS, "Job launch parameters")
            .with_entry(
                Entry::new(EXECUTABLE, "Command line template")
                    .with_default(settings.executable.clone())
                    .required(),
            )
            .with_entry(
                Entry::new(INPUT_FILE, "Input file in the project").with_allowed_values(input_files),
            )
            .with_entry(Entry::new(
                OUTPUT_FILE,
                "File in the project that receives the job output",
            ));

        let form = Form::new(name, description)
            .with_component(Component::Data(parameters))
            .with_component(Component::Resources(ResourceComponent::new(2, OUTPUT_FILES)))
            .with_actions([LAUNCH_ACTION]);

        Self {
            core: ItemCore::new(name, description, name, ItemType::Simulation, form, project),
            runner,
            settings,
            inputs: BTreeMap::new(),
            pending: None,
            cancel: None,
        }
    }

    fn review(form: &Form, check_executable: bool) -> ItemStatus {
        let Some(parameters) = form.data(LAUNCH_PARAMETERS) else {
            return ItemStatus::InfoError;
        };
        if !parameters.is_satisfied() {
            return ItemStatus::InfoError;
        }

        let executable = parameters.value(EXECUTABLE).unwrap_or_default();
        let Some(program) = executable.split_whitespace().next() else {
            return ItemStatus::InfoError;
        };
        if check_executable && !program.contains("${") && which::which(program).is_err() {
            warn!("Executable '{}' not found on PATH", program);
            return ItemStatus::InfoError;
        }

        ItemStatus::ReadyToProcess
    }

    /// Placeholders that still need a value from the caller
    fn missing_inputs(&self, form: &Form) -> Vec<String> {
        let template = form
            .data(LAUNCH_PARAMETERS)
            .and_then(|p| p.value(EXECUTABLE))
            .unwrap_or_default();
        placeholders(template)
            .into_iter()
            .filter(|name| !BUILTIN_PLACEHOLDERS.contains(&name.as_str()))
            .filter(|name| !self.inputs.contains_key(name))
            .collect()
    }

    fn inputs_form(&self, missing: &[String]) -> Form {
        let mut inputs = DataComponent::new(1, LAUNCH_INPUTS, "Values required to launch the job");
        for name in missing {
            inputs
                .entries
                .push(Entry::new(name.clone(), format!("Value for ${{{}}}", name)).required());
        }

        let mut form = Form::new(LAUNCH_INPUTS, format!("Inputs for {}", self.core.name))
            .with_component(Component::Data(inputs));
        form.id = self.core.id;
        form.item_id = self.core.id;
        form
    }

    fn submit_inputs(&mut self, form: Form) -> ItemStatus {
        if form.item_id != self.core.id {
            warn!(
                "Launch inputs for item {} submitted to item {}",
                form.item_id, self.core.id
            );
            return ItemStatus::InfoError;
        }

        if let Some(values) = form.data(LAUNCH_INPUTS) {
            for entry in values.entries.iter().filter(|e| !e.value.trim().is_empty()) {
                self.inputs.insert(entry.name.clone(), entry.value.clone());
            }
        }

        let missing = self.missing_inputs(&self.core.form.get());
        if !missing.is_empty() {
            debug!("Item {} still needs {:?}", self.core.id, missing);
            self.pending = Some(self.inputs_form(&missing));
            self.core.status.set(ItemStatus::NeedsInfo);
            return ItemStatus::NeedsInfo;
        }

        self.pending = None;
        self.start_run()
    }

    /// Render the command line and the output path for the current form
    fn render(&self, form: &Form, project: &Project) -> (String, PathBuf) {
        let parameters = form.data(LAUNCH_PARAMETERS);
        let value = |name: &str| {
            parameters
                .and_then(|p| p.value(name))
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let template = value(EXECUTABLE);
        let input = value(INPUT_FILE);
        let output_name = match value(OUTPUT_FILE) {
            name if name.is_empty() => format!("{}_{}.out", form.name.replace(' ', "_"), self.core.id),
            name => name,
        };
        let output_path = project.file(&output_name);

        let substitute = |name: &str| -> String {
            match name {
                "inputFile" if input.is_empty() => String::new(),
                "inputFile" => project.file(&input).to_string_lossy().into_owned(),
                "outputFile" => output_path.to_string_lossy().into_owned(),
                "projectDir" => project.root.to_string_lossy().into_owned(),
                "itemId" => self.core.id.to_string(),
                other => self.inputs.get(other).cloned().unwrap_or_default(),
            }
        };

        let command_line = PLACEHOLDER
            .replace_all(&template, |caps: &Captures| {
                shell_escape::escape(Cow::Owned(substitute(&caps[1]))).into_owned()
            })
            .into_owned();

        (command_line, output_path)
    }

    fn start_run(&mut self) -> ItemStatus {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Item {} cannot launch outside a tokio runtime", self.core.id);
            self.core.status.set(ItemStatus::InfoError);
            return ItemStatus::InfoError;
        };
        let Some(project) = self.core.project.clone() else {
            warn!("Item {} has no project to run in", self.core.id);
            self.core.status.set(ItemStatus::InfoError);
            return ItemStatus::InfoError;
        };

        let form = self.core.form.get();
        let (command_line, output_path) = self.render(&form, &project);
        self.core.form.update(|form| {
            if let Some(outputs) = form.resources_mut(OUTPUT_FILES) {
                outputs.clear();
            }
        });
        self.core.output_file = Some(output_path.clone());

        let mut cmd = JobCommand::new(command_line).with_working_dir(project.root.clone());
        if let Some(timeout) = self.settings.timeout {
            cmd = cmd.with_timeout(timeout);
        }

        let token = CancellationToken::new();
        self.cancel = Some(token.clone());

        let id = self.core.id;
        let status = self.core.status.clone();
        let form_cell = self.core.form.clone();
        let runner = self.runner.clone();
        let listeners = self.core.listeners().to_vec();

        info!("Item {} launching: {}", id, cmd.command_line);
        status.set(ItemStatus::Processing);

        handle.spawn(async move {
            let next = match runner.run(cmd, token.clone()).await {
                Ok(outcome) if outcome.success() => {
                    match tokio::fs::write(&output_path, outcome.stdout.as_bytes()).await {
                        Ok(()) => {
                            form_cell.update(|form| {
                                if let Some(outputs) = form.resources_mut(OUTPUT_FILES) {
                                    outputs.add(Resource::from_path(&output_path));
                                }
                            });
                            for listener in &listeners {
                                let _ = listener.send(ItemEvent::ProjectChanged { item_id: id });
                            }
                            info!(
                                "Item {} finished in {:?}, output in {}",
                                id,
                                outcome.duration,
                                output_path.display()
                            );
                            ItemStatus::Processed
                        }
                        Err(e) => {
                            warn!("Item {} could not write {}: {}", id, output_path.display(), e);
                            ItemStatus::InfoError
                        }
                    }
                }
                Ok(outcome) => {
                    warn!(
                        "Item {} job exited with {}: {}",
                        id,
                        outcome.exit_code,
                        outcome.stderr.trim()
                    );
                    ItemStatus::InfoError
                }
                Err(RunnerError::Cancelled) => {
                    debug!("Item {} run cancelled", id);
                    return;
                }
                Err(e) => {
                    warn!("Item {} job failed: {}", id, e);
                    ItemStatus::InfoError
                }
            };

            if !token.is_cancelled() {
                status.set(next);
            }
        });

        ItemStatus::Processing
    }
}

impl Item for JobLauncher {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }

    fn form(&self) -> Form {
        match (&self.pending, self.status()) {
            (Some(pending), ItemStatus::NeedsInfo) => pending.clone(),
            _ => self.core.form.get(),
        }
    }

    fn submit_form(&mut self, form: Form) -> ItemStatus {
        if !self.core.enabled {
            return ItemStatus::InfoError;
        }
        // The run publishes its own status once started
        if self.core.status.get() == ItemStatus::NeedsInfo && form.name == LAUNCH_INPUTS {
            return self.submit_inputs(form);
        }

        let check = self.settings.check_executable;
        self.core.submit_with(form, |form| Self::review(form, check))
    }

    fn process(&mut self, action: &str) -> ItemStatus {
        if !self.core.enabled {
            return ItemStatus::InfoError;
        }
        if action != LAUNCH_ACTION {
            warn!("Item {} has no action '{}'", self.core.id, action);
            self.core.status.set(ItemStatus::InfoError);
            return ItemStatus::InfoError;
        }

        let current = self.core.status.get();
        if current.is_active() {
            warn!("Item {} is already {}", self.core.id, current);
            return current;
        }
        if !current.can_process() {
            warn!("Item {} is {} and cannot launch", self.core.id, current);
            return ItemStatus::InfoError;
        }

        let missing = self.missing_inputs(&self.core.form.get());
        if !missing.is_empty() {
            info!("Item {} needs launch inputs: {:?}", self.core.id, missing);
            self.pending = Some(self.inputs_form(&missing));
            self.core.status.set(ItemStatus::NeedsInfo);
            return ItemStatus::NeedsInfo;
        }

        self.start_run()
    }

    fn cancel(&mut self) -> ItemStatus {
        match self.status() {
            ItemStatus::Processing => {
                if let Some(token) = self.cancel.take() {
                    token.cancel();
                }
                info!("Item {} run cancelled", self.core.id);
                self.core.status.set(ItemStatus::ReadyToProcess);
                ItemStatus::ReadyToProcess
            }
            ItemStatus::NeedsInfo => {
                self.pending = None;
                self.core.status.set(ItemStatus::ReadyToProcess);
                ItemStatus::ReadyToProcess
            }
            other => other,
        }
    }

    fn reload_project_data(&mut self) {
        let Some(project) = self.core.project.clone() else {
            return;
        };
        let files = project.list_files(self.settings.input_extension.as_deref());
        self.core.form.update(|form| {
            let Some(entry) = form
                .data_mut(LAUNCH_PARAMETERS)
                .and_then(|p| p.entry_mut(INPUT_FILE))
            else {
                return;
            };
            // Values that are not project files (like a chaining keyword) stay
            let extra: Vec<String> = entry
                .allowed_values
                .iter()
                .filter(|v| !project.file(v.as_str()).exists() && !files.contains(v))
                .cloned()
                .collect();
            entry.allowed_values = files.iter().cloned().chain(extra).collect();
        });
        debug!("Item {} rescanned project {}", self.core.id, project.name);
    }

    fn duplicate(&self) -> Box<dyn Item> {
        Box::new(JobLauncher {
            core: self.core.deep_copy(),
            runner: self.runner.clone(),
            settings: self.settings.clone(),
            inputs: self.inputs.clone(),
            pending: None,
            cancel: None,
        })
    }
}

/// Builds [`JobLauncher`]s. A project is required.
pub struct JobLauncherBuilder {
    name: String,
    description: String,
    settings: LauncherSettings,
    runner: Arc<dyn JobRunner>,
    publishable: bool,
}

impl JobLauncherBuilder {
    pub fn new(name: impl Into<String>, settings: LauncherSettings, runner: Arc<dyn JobRunner>) -> Self {
        let name = name.into();
        Self {
            description: format!("Launches {}", name),
            name,
            settings,
            runner,
            publishable: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn publishable(mut self, publishable: bool) -> Self {
        self.publishable = publishable;
        self
    }
}

impl ItemBuilder for JobLauncherBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn item_type(&self) -> ItemType {
        ItemType::Simulation
    }

    fn is_publishable(&self) -> bool {
        self.publishable
    }

    fn build(&self, project: Option<&Project>) -> Option<Box<dyn Item>> {
        let Some(project) = project else {
            warn!("Builder '{}' needs a project", self.name);
            return None;
        };
        Some(Box::new(JobLauncher::new(
            &self.name,
            &self.description,
            self.settings.clone(),
            self.runner.clone(),
            Some(project.clone()),
        )))
    }
}
