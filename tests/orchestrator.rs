use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use wind_repower_era5::cds::ArchiveClient;
use wind_repower_era5::config::default_variables;
use wind_repower_era5::domain::{BoundingBox, Month};
use wind_repower_era5::error::FetchError;
use wind_repower_era5::fs_util::partial_path;
use wind_repower_era5::grid::{AcquisitionTask, ArchiveRequest, RequestTemplate, build_grid};
use wind_repower_era5::orchestrator::{
    Orchestrator, ProgressEvent, ProgressSink, RunOptions, TaskStatus, plan,
};

#[derive(Debug, Clone)]
enum Step {
    Deliver(&'static [u8]),
    Fail,
    ShortBody,
}

struct ScriptedClient {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn always(step: Step) -> Self {
        Self::scripted(Vec::new(), step)
    }

    fn scripted(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ArchiveClient for ScriptedClient {
    fn retrieve(
        &self,
        dataset: &str,
        request: &ArchiveRequest,
        target: &Path,
    ) -> Result<(), FetchError> {
        assert_eq!(dataset, "reanalysis-era5-single-levels");
        assert!(target.to_string_lossy().ends_with(".part"));
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}-{}", request.year, request.month[0]));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Deliver(bytes) => {
                fs::write(target, bytes).unwrap();
                Ok(())
            }
            Step::Fail => {
                fs::write(target, b"half").unwrap();
                Err(FetchError::CdsHttp("operation timed out".to_string()))
            }
            Step::ShortBody => {
                fs::write(target, b"short").unwrap();
                Err(FetchError::SizeMismatch {
                    written: 5,
                    expected: 10,
                })
            }
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    fn successes(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Succeeded { .. }))
            .count()
    }

    fn skips(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Skipped { .. }))
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn tasks_in(dir: &Utf8Path, months: &[u8]) -> Vec<AcquisitionTask> {
    let template = RequestTemplate {
        output_dir: dir.join("era5"),
        file_prefix: "wind_velocity_usa".to_string(),
        product_type: "reanalysis".to_string(),
        format: "netcdf".to_string(),
        variables: default_variables(),
    };
    let bbox = BoundingBox {
        north: 49.0,
        west: -125.0,
        south: 25.0,
        east: -67.0,
    };
    let months = months.iter().map(|m| Month::new(*m).unwrap());
    build_grid([2019], months, &bbox, &template)
}

fn orchestrator(client: ScriptedClient) -> Orchestrator<ScriptedClient> {
    Orchestrator::new(
        client,
        "reanalysis-era5-single-levels",
        RunOptions::default(),
    )
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn empty_directory_downloads_every_task_once() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1, 2]);
    let app = orchestrator(ScriptedClient::always(Step::Deliver(b"netcdf")));
    let sink = RecordingSink::default();

    let report = app.run(&tasks, &sink).unwrap();

    assert_eq!(app.client().calls(), vec!["2019-01", "2019-02"]);
    assert_eq!(sink.successes(), 2);
    assert_eq!(report.count(TaskStatus::Downloaded), 2);
    for name in ["wind_velocity_usa_2019-01.nc", "wind_velocity_usa_2019-02.nc"] {
        let path = root.join("era5").join(name);
        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"netcdf");
        assert!(!partial_path(&path).as_std_path().exists());
    }
}

#[test]
fn existing_artifact_is_not_requested_again() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1, 2]);
    fs::create_dir_all(root.join("era5").as_std_path()).unwrap();
    fs::write(tasks[0].destination.as_std_path(), b"complete").unwrap();

    let app = orchestrator(ScriptedClient::always(Step::Deliver(b"netcdf")));
    let sink = RecordingSink::default();
    let report = app.run(&tasks, &sink).unwrap();

    assert_eq!(app.client().calls(), vec!["2019-02"]);
    assert_eq!(sink.skips(), 1);
    assert_eq!(report.tasks[0].status, TaskStatus::Skipped);
    assert_eq!(report.tasks[0].attempts, 0);
    assert_eq!(
        fs::read(tasks[0].destination.as_std_path()).unwrap(),
        b"complete"
    );
}

#[test]
fn second_run_issues_no_requests() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1, 2, 3]);

    let first = orchestrator(ScriptedClient::always(Step::Deliver(b"netcdf")));
    first.run(&tasks, &RecordingSink::default()).unwrap();
    assert_eq!(first.client().calls().len(), 3);

    let second = orchestrator(ScriptedClient::always(Step::Deliver(b"netcdf")));
    let report = second.run(&tasks, &RecordingSink::default()).unwrap();
    assert!(second.client().calls().is_empty());
    assert_eq!(report.count(TaskStatus::Skipped), 3);
}

#[test]
fn failing_task_is_attempted_exactly_five_times() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1]);
    let app = orchestrator(ScriptedClient::always(Step::Fail));
    let sink = RecordingSink::default();

    let report = app.run(&tasks, &sink).unwrap();

    assert_eq!(app.client().calls().len(), 5);
    assert_eq!(report.tasks[0].status, TaskStatus::Failed);
    assert_eq!(report.tasks[0].attempts, 5);
    assert!(
        report.tasks[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("timed out")
    );
    let events = sink.events.lock().unwrap();
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Exhausted { attempts: 5, .. })
    ));
}

#[test]
fn exhausted_task_does_not_stop_the_run() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1, 2]);
    let steps = vec![Step::Fail; 5];
    let app = orchestrator(ScriptedClient::scripted(steps, Step::Deliver(b"ok")));

    let report = app.run(&tasks, &RecordingSink::default()).unwrap();

    assert_eq!(report.tasks[0].status, TaskStatus::Failed);
    assert_eq!(report.tasks[1].status, TaskStatus::Downloaded);
    assert_eq!(app.client().calls().len(), 6);
}

#[test]
fn failed_attempt_leaves_no_file_at_destination() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1]);
    let app = orchestrator(ScriptedClient::always(Step::Fail));

    app.run(&tasks, &RecordingSink::default()).unwrap();

    let dest = &tasks[0].destination;
    assert!(!dest.as_std_path().exists());
    assert!(!partial_path(dest).as_std_path().exists());
}

#[test]
fn size_mismatch_is_retried() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1]);
    let app = orchestrator(ScriptedClient::scripted(
        vec![Step::ShortBody],
        Step::Deliver(b"full body!"),
    ));

    let report = app.run(&tasks, &RecordingSink::default()).unwrap();

    assert_eq!(app.client().calls().len(), 2);
    assert_eq!(report.tasks[0].status, TaskStatus::Downloaded);
    assert_eq!(report.tasks[0].attempts, 2);
    assert_eq!(
        fs::read(tasks[0].destination.as_std_path()).unwrap(),
        b"full body!"
    );
}

#[test]
fn stale_partial_artifact_is_overwritten() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1]);
    let partial = partial_path(&tasks[0].destination);
    fs::create_dir_all(root.join("era5").as_std_path()).unwrap();
    fs::write(partial.as_std_path(), b"interrupted").unwrap();

    let report = plan(&tasks);
    assert_eq!(report.tasks[0].status, TaskStatus::Pending);

    let app = orchestrator(ScriptedClient::always(Step::Deliver(b"netcdf")));
    app.run(&tasks, &RecordingSink::default()).unwrap();

    assert_eq!(app.client().calls().len(), 1);
    assert_eq!(
        fs::read(tasks[0].destination.as_std_path()).unwrap(),
        b"netcdf"
    );
    assert!(!partial.as_std_path().exists());
}

#[test]
fn custom_attempt_bound_is_respected() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1]);
    let app = Orchestrator::new(
        ScriptedClient::always(Step::Fail),
        "reanalysis-era5-single-levels",
        RunOptions {
            max_attempts: 2,
            ..RunOptions::default()
        },
    );

    app.run(&tasks, &RecordingSink::default()).unwrap();
    assert_eq!(app.client().calls().len(), 2);
}

#[test]
fn plan_reports_present_and_missing_files() {
    let (_temp, root) = temp_root();
    let tasks = tasks_in(&root, &[1, 2]);
    fs::create_dir_all(root.join("era5").as_std_path()).unwrap();
    fs::write(tasks[1].destination.as_std_path(), b"complete").unwrap();

    let report = plan(&tasks);
    assert_eq!(report.tasks[0].status, TaskStatus::Pending);
    assert_eq!(report.tasks[1].status, TaskStatus::Skipped);
}
