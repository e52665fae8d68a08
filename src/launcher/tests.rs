#[cfg(test)]
mod tests {
    use crate::builder::{CompositeItemBuilder, ItemBuilder};
    use crate::item::{
        BasicItemBuilder, Component, DataComponent, Entry, Form, Item, ItemCore, ItemStatus,
        ItemType, Project,
    };
    use crate::launcher::job::*;
    use crate::launcher::multi::*;
    use crate::launcher::runner::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    const POLL: Duration = Duration::from_millis(10);

    /// Records command lines and echoes them as output
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
        delay: Duration,
        fail_marker: Option<String>,
    }

    impl RecordingRunner {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::from_millis(5))
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                delay,
                fail_marker: None,
            })
        }

        fn failing_on(marker: &str) -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                delay: Duration::from_millis(5),
                fail_marker: Some(marker.to_string()),
            })
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(
            &self,
            cmd: JobCommand,
            cancel: CancellationToken,
        ) -> Result<JobOutcome, RunnerError> {
            self.commands.lock().unwrap().push(cmd.command_line.clone());

            tokio::select! {
                _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }

            let failed = self
                .fail_marker
                .as_deref()
                .is_some_and(|marker| cmd.command_line.contains(marker));
            Ok(JobOutcome {
                stdout: format!("ran {}\n", cmd.command_line),
                stderr: String::new(),
                exit_code: if failed { 1 } else { 0 },
                duration: self.delay,
            })
        }

        fn runner_type(&self) -> &'static str {
            "recording"
        }
    }

    /// Accepts every form but reports InfoError right after
    struct FlakyItem {
        core: ItemCore,
        launches: Arc<AtomicUsize>,
    }

    impl Item for FlakyItem {
        fn core(&self) -> &ItemCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ItemCore {
            &mut self.core
        }

        fn submit_form(&mut self, form: Form) -> ItemStatus {
            self.core.form.replace(form);
            self.core.status.set(ItemStatus::InfoError);
            ItemStatus::ReadyToProcess
        }

        fn process(&mut self, _action: &str) -> ItemStatus {
            self.launches.fetch_add(1, Ordering::SeqCst);
            ItemStatus::Processing
        }

        fn duplicate(&self) -> Box<dyn Item> {
            Box::new(FlakyItem {
                core: self.core.deep_copy(),
                launches: self.launches.clone(),
            })
        }
    }

    struct FlakyBuilder {
        launches: Arc<AtomicUsize>,
    }

    impl ItemBuilder for FlakyBuilder {
        fn name(&self) -> &str {
            "Flaky"
        }

        fn item_type(&self) -> ItemType {
            ItemType::Simulation
        }

        fn build(&self, project: Option<&Project>) -> Option<Box<dyn Item>> {
            let parameters = DataComponent::new(1, LAUNCH_PARAMETERS, "")
                .with_entry(Entry::new(INPUT_FILE, ""));
            let form = Form::new("Flaky", "").with_component(Component::Data(parameters));
            Some(Box::new(FlakyItem {
                core: ItemCore::new("Flaky", "", "Flaky", ItemType::Simulation, form, project.cloned()),
                launches: self.launches.clone(),
            }))
        }
    }

    fn project_with_input() -> (TempDir, Project) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.in"), "alpha\n").unwrap();
        let project = Project::new("demo", temp.path());
        (temp, project)
    }

    fn solver_settings(executable: &str) -> LauncherSettings {
        LauncherSettings {
            executable: executable.to_string(),
            input_extension: Some("in".to_string()),
            timeout: None,
            check_executable: false,
        }
    }

    fn solver_builder(executable: &str, runner: Arc<RecordingRunner>) -> Arc<dyn ItemBuilder> {
        Arc::new(JobLauncherBuilder::new("Solver", solver_settings(executable), runner))
    }

    fn job_launcher(project: &Project, executable: &str, runner: Arc<RecordingRunner>) -> JobLauncher {
        let mut launcher = JobLauncher::new(
            "Solver",
            "test solver",
            solver_settings(executable),
            runner,
            Some(project.clone()),
        );
        launcher.set_id(7);
        launcher
    }

    fn multi_launcher(project: &Project, builders: &[Arc<dyn ItemBuilder>]) -> MultiLauncher {
        let prototypes = builders
            .iter()
            .filter_map(|b| b.build(Some(project)))
            .collect();
        let mut multi = MultiLauncher::new("Multi", "test multi", prototypes, Some(project.clone()), POLL);
        multi.set_id(1);
        multi
    }

    fn add_job(form: &mut Form, master: &str, values: &[(&str, &str)]) {
        let jobs = form.master_details_mut(JOBS).unwrap();
        let index = jobs.add_master(master).unwrap();
        let details = jobs.details_at_mut(index).unwrap();
        for (name, value) in values {
            assert!(details.set_value(name, *value), "cannot set {} = {}", name, value);
        }
    }

    fn set_parallel(form: &mut Form, parallel: bool) {
        let jobs = form.master_details_mut(JOBS).unwrap();
        assert!(jobs
            .globals
            .set_value(PARALLEL_EXECUTION, if parallel { "true" } else { "false" }));
    }

    async fn wait_for(item: &dyn Item, done: impl Fn(ItemStatus) -> bool) -> ItemStatus {
        for _ in 0..500 {
            let status = item.status();
            if done(status) {
                return status;
            }
            tokio::time::sleep(POLL).await;
        }
        item.status()
    }

    async fn settle(item: &dyn Item) -> ItemStatus {
        wait_for(item, |status| !status.is_active()).await
    }

    fn output_names(form: &Form) -> Vec<String> {
        form.resources(OUTPUT_FILES)
            .map(|r| r.resources.iter().map(|res| res.name.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_placeholders_in_order() {
        assert_eq!(
            placeholders("run ${mesh} -i ${inputFile} ${mesh} $plain ${9bad}"),
            vec!["mesh".to_string(), "inputFile".to_string()]
        );
        assert!(placeholders("no placeholders").is_empty());
    }

    #[test]
    fn test_launcher_form_lists_project_inputs() {
        let (temp, project) = project_with_input();
        std::fs::write(temp.path().join("b.in"), "").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "").unwrap();

        let launcher = job_launcher(&project, "solver ${inputFile}", RecordingRunner::new());
        let form = launcher.form();
        let parameters = form.data(LAUNCH_PARAMETERS).unwrap();

        assert_eq!(
            parameters.entry(INPUT_FILE).unwrap().allowed_values,
            vec!["a.in".to_string(), "b.in".to_string()]
        );
        assert_eq!(parameters.value(EXECUTABLE), Some("solver ${inputFile}"));
        assert_eq!(launcher.item_type(), ItemType::Simulation);
        assert_eq!(launcher.available_actions(), vec![LAUNCH_ACTION.to_string()]);
    }

    #[test]
    fn test_review_checks_executable_on_path() {
        let (_temp, project) = project_with_input();
        let mut settings = solver_settings("definitely-not-installed-xyz ${inputFile}");
        settings.check_executable = true;
        let mut launcher =
            JobLauncher::new("Solver", "", settings, RecordingRunner::new(), Some(project.clone()));

        assert_eq!(launcher.submit_form(launcher.form()), ItemStatus::InfoError);

        let mut form = launcher.form();
        form.set_value(EXECUTABLE, "sh -c true");
        assert_eq!(launcher.submit_form(form), ItemStatus::ReadyToProcess);
    }

    #[tokio::test]
    async fn test_job_launch_writes_output() {
        let (temp, project) = project_with_input();
        let runner = RecordingRunner::new();
        let mut launcher = job_launcher(&project, "solver ${inputFile} > ${outputFile}", runner.clone());

        let mut form = launcher.form();
        form.set_value(INPUT_FILE, "a.in");
        assert_eq!(launcher.submit_form(form), ItemStatus::ReadyToProcess);

        assert_eq!(launcher.process("Wrong Action"), ItemStatus::InfoError);
        let form = launcher.form();
        launcher.submit_form(form);

        assert_eq!(launcher.process(LAUNCH_ACTION), ItemStatus::Processing);
        assert_eq!(settle(&launcher).await, ItemStatus::Processed);

        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with("solver "));
        assert!(commands[0].contains("a.in"));
        assert!(commands[0].contains("Solver_7.out"));

        let output = temp.path().join("Solver_7.out");
        assert_eq!(launcher.output_file(), Some(output.clone()));
        assert!(std::fs::read_to_string(&output).unwrap().starts_with("ran solver"));
        assert_eq!(output_names(&launcher.form()), vec!["Solver_7.out".to_string()]);
    }

    #[tokio::test]
    async fn test_job_failure_reports_info_error() {
        let (_temp, project) = project_with_input();
        let runner = RecordingRunner::failing_on("broken");
        let mut launcher = job_launcher(&project, "broken ${inputFile}", runner);

        let form = launcher.form();
        launcher.submit_form(form);
        assert_eq!(launcher.process(LAUNCH_ACTION), ItemStatus::Processing);
        assert_eq!(settle(&launcher).await, ItemStatus::InfoError);
        assert!(output_names(&launcher.form()).is_empty());
    }

    #[tokio::test]
    async fn test_extra_placeholders_need_info() {
        let (_temp, project) = project_with_input();
        let runner = RecordingRunner::new();
        let mut launcher = job_launcher(&project, "solver --mesh ${mesh} ${inputFile}", runner.clone());

        let mut form = launcher.form();
        form.set_value(INPUT_FILE, "a.in");
        launcher.submit_form(form);

        assert_eq!(launcher.process(LAUNCH_ACTION), ItemStatus::NeedsInfo);
        assert!(runner.commands().is_empty());

        let mut inputs = launcher.form();
        assert_eq!(inputs.name, LAUNCH_INPUTS);
        assert_eq!(inputs.item_id, 7);
        assert!(inputs.data(LAUNCH_INPUTS).unwrap().entry("mesh").unwrap().required);

        // A blank value keeps the launcher waiting
        assert_eq!(launcher.submit_form(inputs.clone()), ItemStatus::NeedsInfo);

        inputs.set_value("mesh", "fine grid");
        assert_eq!(launcher.submit_form(inputs), ItemStatus::Processing);
        assert_eq!(settle(&launcher).await, ItemStatus::Processed);

        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("--mesh 'fine grid'"));
    }

    #[tokio::test]
    async fn test_cancel_job_launch() {
        let (_temp, project) = project_with_input();
        let runner = RecordingRunner::with_delay(Duration::from_secs(30));
        let mut launcher = job_launcher(&project, "solver ${inputFile}", runner);

        let form = launcher.form();
        launcher.submit_form(form);
        assert_eq!(launcher.process(LAUNCH_ACTION), ItemStatus::Processing);
        assert_eq!(launcher.process(LAUNCH_ACTION), ItemStatus::Processing);

        assert_eq!(launcher.cancel(), ItemStatus::ReadyToProcess);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(launcher.status(), ItemStatus::ReadyToProcess);
        assert_eq!(launcher.cancel(), ItemStatus::ReadyToProcess);
    }

    #[test]
    fn test_launch_outside_runtime_fails() {
        let (_temp, project) = project_with_input();
        let mut launcher = job_launcher(&project, "solver ${inputFile}", RecordingRunner::new());
        let form = launcher.form();
        launcher.submit_form(form);

        assert_eq!(launcher.process(LAUNCH_ACTION), ItemStatus::InfoError);
    }

    #[test]
    fn test_multi_launcher_form_offers_last() {
        let (_temp, project) = project_with_input();
        let multi = multi_launcher(&project, &[solver_builder("solver ${inputFile}", RecordingRunner::new())]);

        let form = multi.form();
        let jobs = form.master_details(JOBS).unwrap();
        assert_eq!(jobs.template_names(), vec!["Solver".to_string()]);
        let input = jobs.template("Solver").unwrap().details.entry(INPUT_FILE).unwrap();
        assert!(input.allowed_values.contains(&LAST_OUTPUT.to_string()));
        assert!(input.allowed_values.contains(&"a.in".to_string()));
        assert_eq!(jobs.globals.value(PARALLEL_EXECUTION), Some("false"));
        assert_eq!(multi.available_actions(), vec![LAUNCH.to_string()]);
    }

    #[test]
    fn test_multi_launcher_review() {
        let (_temp, project) = project_with_input();
        let mut multi = multi_launcher(&project, &[solver_builder("solver ${inputFile}", RecordingRunner::new())]);

        // No jobs yet
        assert_eq!(multi.submit_form(multi.form()), ItemStatus::InfoError);

        let mut form = multi.form();
        form.master_details_mut(JOBS).unwrap().masters.push(crate::item::MasterDetailsPair {
            master: "Unknown".to_string(),
            details: DataComponent::default(),
        });
        assert_eq!(multi.submit_form(form), ItemStatus::InfoError);

        let mut form = multi.form();
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in")]);
        assert_eq!(multi.submit_form(form), ItemStatus::ReadyToProcess);
    }

    #[tokio::test]
    async fn test_sequential_run_chains_last_output() {
        let (temp, project) = project_with_input();
        let runner = RecordingRunner::new();
        let mut multi = multi_launcher(&project, &[solver_builder("solver ${inputFile}", runner.clone())]);

        let mut form = multi.form();
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in"), (OUTPUT_FILE, "out_A.dat")]);
        add_job(&mut form, "Solver", &[(INPUT_FILE, LAST_OUTPUT), (OUTPUT_FILE, "out_B.dat")]);
        assert_eq!(multi.submit_form(form), ItemStatus::ReadyToProcess);

        assert_eq!(multi.process(LAUNCH), ItemStatus::Processing);
        assert!(multi.run_id().is_some() || !multi.status().is_active());
        assert_eq!(settle(&multi).await, ItemStatus::Processed);

        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].ends_with("a.in"));
        assert!(commands[1].ends_with("out_A.dat"));

        assert_eq!(
            output_names(&multi.form()),
            vec!["out_A.dat".to_string(), "out_B.dat".to_string()]
        );
        assert_eq!(multi.output_file(), Some(temp.path().join("out_A.dat")));
        assert!(multi.running_launchers().is_empty());
        assert!(!multi.is_running());
    }

    #[tokio::test]
    async fn test_sequential_failure_stops_chain() {
        let (_temp, project) = project_with_input();
        let runner = RecordingRunner::failing_on("a.in");
        let mut multi = multi_launcher(&project, &[solver_builder("solver ${inputFile}", runner.clone())]);

        let mut form = multi.form();
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in")]);
        add_job(&mut form, "Solver", &[(INPUT_FILE, LAST_OUTPUT)]);
        multi.submit_form(form);

        assert_eq!(multi.process(LAUNCH), ItemStatus::Processing);
        assert_eq!(settle(&multi).await, ItemStatus::InfoError);
        assert_eq!(runner.commands().len(), 1);
        assert!(output_names(&multi.form()).is_empty());
    }

    #[tokio::test]
    async fn test_parallel_run_aggregates_all_jobs() {
        let (_temp, project) = project_with_input();
        let runner = RecordingRunner::new();
        let mut multi = multi_launcher(&project, &[solver_builder("solver ${inputFile}", runner.clone())]);

        let mut form = multi.form();
        set_parallel(&mut form, true);
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in"), (OUTPUT_FILE, "one.dat")]);
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in"), (OUTPUT_FILE, "two.dat")]);
        multi.submit_form(form);

        assert_eq!(multi.process(LAUNCH), ItemStatus::Processing);
        assert_eq!(settle(&multi).await, ItemStatus::Processed);

        assert_eq!(runner.commands().len(), 2);
        let mut outputs = output_names(&multi.form());
        outputs.sort();
        assert_eq!(outputs, vec!["one.dat".to_string(), "two.dat".to_string()]);
    }

    #[tokio::test]
    async fn test_parallel_fan_out_stops_at_unready_job() {
        let (_temp, project) = project_with_input();
        let runner = RecordingRunner::new();
        let launches = Arc::new(AtomicUsize::new(0));
        let flaky: Arc<dyn ItemBuilder> = Arc::new(FlakyBuilder {
            launches: launches.clone(),
        });
        let mut multi = multi_launcher(
            &project,
            &[solver_builder("solver ${inputFile}", runner.clone()), flaky],
        );

        let mut form = multi.form();
        set_parallel(&mut form, true);
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in"), (OUTPUT_FILE, "first.dat")]);
        add_job(&mut form, "Flaky", &[]);
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in"), (OUTPUT_FILE, "third.dat")]);
        assert_eq!(multi.submit_form(form), ItemStatus::ReadyToProcess);

        multi.process(LAUNCH);
        assert_eq!(settle(&multi).await, ItemStatus::InfoError);

        assert_eq!(runner.commands().len(), 1);
        assert_eq!(launches.load(Ordering::SeqCst), 0);
        assert_eq!(output_names(&multi.form()), vec!["first.dat".to_string()]);
    }

    #[tokio::test]
    async fn test_needy_job_form_is_routed_through_parent() {
        let (_temp, project) = project_with_input();
        let runner = RecordingRunner::new();
        let mut multi = multi_launcher(
            &project,
            &[solver_builder("solver ${inputFile} ${mesh}", runner.clone())],
        );

        let mut form = multi.form();
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in")]);
        multi.submit_form(form);
        multi.process(LAUNCH);

        assert_eq!(
            wait_for(&multi, |s| s != ItemStatus::Processing).await,
            ItemStatus::NeedsInfo
        );

        let mut inputs = multi.form();
        assert_eq!(inputs.name, LAUNCH_INPUTS);
        assert_eq!(inputs.item_id, 1);
        assert!(inputs.set_value("mesh", "coarse"));

        assert_eq!(multi.submit_form(inputs), ItemStatus::Processing);
        assert_eq!(settle(&multi).await, ItemStatus::Processed);

        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].ends_with("coarse"));
    }

    #[tokio::test]
    async fn test_running_multi_launcher_rejects_changes_and_cancels() {
        let (_temp, project) = project_with_input();
        let runner = RecordingRunner::with_delay(Duration::from_secs(30));
        let mut multi = multi_launcher(&project, &[solver_builder("solver ${inputFile}", runner)]);

        let mut form = multi.form();
        set_parallel(&mut form, true);
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in")]);
        add_job(&mut form, "Solver", &[(INPUT_FILE, "a.in")]);
        multi.submit_form(form);

        assert_eq!(multi.process(LAUNCH), ItemStatus::Processing);
        assert!(multi.is_running());
        assert!(multi.run_id().is_some());
        assert_eq!(multi.running_launchers().len(), 2);

        assert_eq!(multi.process(LAUNCH), ItemStatus::Processing);
        assert_eq!(multi.process("Other"), ItemStatus::Processing);
        assert_eq!(multi.submit_form(multi.form()), ItemStatus::InfoError);

        let launchers = multi.running_launchers();
        assert_eq!(multi.cancel(), ItemStatus::ReadyToProcess);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(multi.status(), ItemStatus::ReadyToProcess);
        assert!(multi.running_launchers().is_empty());
        for job in launchers {
            assert_eq!(job.lock().unwrap().status(), ItemStatus::ReadyToProcess);
        }
    }

    #[tokio::test]
    async fn test_reload_project_data_keeps_last() {
        let (temp, project) = project_with_input();
        let mut multi = multi_launcher(&project, &[solver_builder("solver ${inputFile}", RecordingRunner::new())]);

        std::fs::write(temp.path().join("b.in"), "").unwrap();
        multi.reload_project_data();

        let form = multi.form();
        let template = form.master_details(JOBS).unwrap().template("Solver").unwrap();
        let allowed = &template.details.entry(INPUT_FILE).unwrap().allowed_values;
        assert!(allowed.contains(&"b.in".to_string()));
        assert!(allowed.contains(&LAST_OUTPUT.to_string()));
    }

    #[test]
    fn test_multi_launcher_builder_needs_launchers() {
        let (_temp, project) = project_with_input();
        let builder = Arc::new(MultiLauncherBuilder::new("Multi").with_poll_interval(POLL));

        assert!(builder.is_composite());
        assert!(builder.build(Some(&project)).is_none());

        let basic: Arc<dyn ItemBuilder> = Arc::new(BasicItemBuilder::new("Basic"));
        let itself: Arc<dyn ItemBuilder> = builder.clone();
        builder.add_builders(vec![basic.clone(), itself.clone()]);
        assert!(!builder.has_builders());
        assert!(builder.build(Some(&project)).is_none());

        builder.add_builders(vec![
            basic,
            itself,
            solver_builder("solver ${inputFile}", RecordingRunner::new()),
        ]);
        assert!(builder.has_builders());

        // Launchers need a project
        assert!(builder.build(None).is_none());

        let item = builder.build(Some(&project)).unwrap();
        let form = item.form();
        assert_eq!(form.master_details(JOBS).unwrap().template_names(), vec!["Solver".to_string()]);
    }
}
