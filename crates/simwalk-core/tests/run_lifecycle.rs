//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "tests"
//! sw_type: "source"
//! sw_scope: "test"
//! sw_description: "End-to-end run lifecycle against scripted subsystems."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use simwalk_common::config::HarnessConfig;
use simwalk_core::{HarnessError, Orchestrator, Position, RunState, Verdict};
use simwalk_testharness::{
    harness_config, Event, Journal, ProcessScript, RecordingSpawner, ScriptedBridge,
    ServiceScript, GAINS_SERVICE, PAUSE_SERVICE,
};
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

const UNPAUSE_SERVICE: &str = "/gazebo/unpause_physics";
const ON_TARGET: Position = Position::new(2.0, 0.01, 1.0);
const TORQUE_WALK: [&str; 4] = ["walk", "a", "b", "c"];

fn orchestrator(
    config: HarnessConfig,
    spawner: RecordingSpawner,
    bridge: ScriptedBridge,
) -> Orchestrator {
    simwalk_logging::init();
    Orchestrator::new(config, Arc::new(spawner), Arc::new(bridge))
}

fn bridge(journal: &Journal) -> ScriptedBridge {
    ScriptedBridge::new(journal.clone())
        .service(PAUSE_SERVICE, ServiceScript::ReadyAfter(2))
        .service(GAINS_SERVICE, ServiceScript::ReadyAfter(3))
        .final_pose(ON_TARGET)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

#[tokio::test(start_paused = true)]
async fn passing_run_walks_every_state_in_order() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(5, 0));
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    assert_eq!(report.verdict, Verdict::Passed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.states(),
        vec![
            RunState::Idle,
            RunState::MasterStarted,
            RunState::CoreStarted,
            RunState::Spawned,
            RunState::BroughtUp,
            RunState::ControllerStarted,
            RunState::Running,
            RunState::Finished,
            RunState::Validated,
            RunState::TornDown,
            RunState::Done,
        ]
    );
    assert_eq!(
        journal.spawned(),
        strings(&["master", "sim_core", "spawner", "bringup", "controller", "rosrun"])
    );
    assert_eq!(report.test_run.as_ref().and_then(|run| run.exit_code), Some(0));
}

#[tokio::test(start_paused = true)]
async fn each_stage_waits_for_the_previous_readiness() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(1, 0));
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));
    orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    let pause_ready = journal.ready_index(PAUSE_SERVICE).expect("pause probed ready");
    let gains_ready = journal.ready_index(GAINS_SERVICE).expect("gains probed ready");
    let pause_call = journal
        .position(|e| matches!(e, Event::Called { service } if service == PAUSE_SERVICE))
        .expect("pause called");
    let unpause_call = journal
        .position(|e| matches!(e, Event::Called { service } if service == UNPAUSE_SERVICE))
        .expect("unpause called");
    let spawn = journal.spawn_index("spawner").expect("spawner started");
    let bringup = journal.spawn_index("bringup").expect("bringup started");

    assert!(journal.spawn_index("sim_core").expect("core") < pause_ready);
    assert!(pause_ready < pause_call);
    assert!(pause_call < spawn);
    assert!(spawn < gains_ready);
    assert!(gains_ready < unpause_call);
    assert!(unpause_call < bringup);
    assert_eq!(journal.calls(), strings(&[PAUSE_SERVICE, UNPAUSE_SERVICE]));
}

#[tokio::test(start_paused = true)]
async fn teardown_reverses_start_order_once() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(2, 0));
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));
    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    let mut expected = journal.spawned();
    expected.reverse();
    assert_eq!(journal.stopped(), expected);
    assert_eq!(
        report.started,
        strings(&["master", "simulation_core", "spawn", "bringup", "controller", "test_process"])
    );
    let mut reversed = report.started.clone();
    reversed.reverse();
    assert_eq!(report.stopped, reversed);
}

#[tokio::test(start_paused = true)]
async fn velocity_mode_runs_the_velocity_executable() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(1, 0));
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));
    orchestrator
        .run(&["vel", "on_spot", "pattern_generator", "a", "b", "c"])
        .await
        .expect("valid arguments");

    let argv = journal
        .events()
        .into_iter()
        .find_map(|event| match event {
            Event::Spawned { program, argv } if program == "rosrun" => Some(argv),
            _ => None,
        })
        .expect("test process spawned");
    assert_eq!(
        argv,
        strings(&[
            "rosrun",
            "talos-torque-control",
            "integ_sim_walk_vel.py",
            "on_spot",
            "pattern_generator",
            "__name:=sim_walk_vel_py",
        ])
    );
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_aborts_and_tears_down_started_stages() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone());
    let bridge = bridge(&journal).service(GAINS_SERVICE, ServiceScript::Never);
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge);

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    match &report.verdict {
        Verdict::Aborted { reason } => assert!(reason.contains("not ready"), "{reason}"),
        other => panic!("unexpected verdict {other:?}"),
    }
    assert_eq!(report.exit_code(), 3);
    assert_eq!(report.final_state(), RunState::Aborted);
    assert!(!report.states().contains(&RunState::Running));
    assert_eq!(journal.spawned(), strings(&["master", "sim_core", "spawner"]));
    assert_eq!(journal.stopped(), strings(&["spawner", "sim_core", "master"]));
    assert_eq!(journal.calls(), strings(&[PAUSE_SERVICE]));
    assert!(journal
        .position(|e| matches!(e, Event::PoseQueried { .. }))
        .is_none());
    assert!(!dir.path().join("output.dat").exists());
}

#[tokio::test(start_paused = true)]
async fn launch_failure_aborts_before_later_stages() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner =
        RecordingSpawner::new(journal.clone()).script("bringup", ProcessScript::fails_to_spawn());
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    assert!(matches!(report.verdict, Verdict::Aborted { .. }));
    assert_eq!(
        report.states(),
        vec![
            RunState::Idle,
            RunState::MasterStarted,
            RunState::CoreStarted,
            RunState::Spawned,
            RunState::TornDown,
            RunState::Aborted,
        ]
    );
    assert_eq!(journal.stopped(), strings(&["spawner", "sim_core", "master"]));
    assert!(report.test_run.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_pause_call_aborts_run() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone());
    let bridge = bridge(&journal).failing_call(PAUSE_SERVICE);
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge);

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    assert!(matches!(report.verdict, Verdict::Aborted { .. }));
    assert_eq!(journal.spawned(), strings(&["master", "sim_core"]));
    assert_eq!(journal.stopped(), strings(&["sim_core", "master"]));
}

#[tokio::test(start_paused = true)]
async fn non_zero_exit_overrides_passing_pose() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(3, 1));
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    assert_eq!(report.verdict, Verdict::ProcessFailed { exit_code: Some(1) });
    assert_eq!(report.exit_code(), 2);
    assert!(report.convergence.expect("pose still evaluated").passed);
    assert_eq!(report.final_state(), RunState::Done);
    assert_eq!(journal.stopped().len(), journal.spawned().len());
}

#[tokio::test(start_paused = true)]
async fn drifting_pose_fails_convergence_and_writes_report() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(2, 0));
    let bridge = bridge(&journal).final_pose(Position::new(4.0, 0.2, 0.98));
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge);

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    match report.verdict {
        Verdict::ConvergenceFailed {
            distance,
            tolerance,
        } => {
            assert!((distance - 0.1974).abs() < 1e-3, "{distance}");
            assert_eq!(tolerance, 0.07);
        }
        ref other => panic!("unexpected verdict {other:?}"),
    }
    assert_eq!(report.exit_code(), 1);
    let contents = fs::read_to_string(dir.path().join("output.dat")).expect("report written");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(&lines[..3], &["x:4", "y:0.2", "z:0.98"]);
    assert!(lines[3].starts_with("dist:0.197"), "{}", lines[3]);
}

#[tokio::test(start_paused = true)]
async fn missing_pose_reports_validation_unavailable() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(2, 0));
    let bridge = ScriptedBridge::new(journal.clone());
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge);

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    assert!(matches!(report.verdict, Verdict::ValidationUnavailable { .. }));
    assert_eq!(report.exit_code(), 1);
    assert!(report.convergence.is_none());
    assert!(!dir.path().join("output.dat").exists());
}

#[tokio::test(start_paused = true)]
async fn interrupts_during_polling_do_not_end_the_run() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(20, 0));
    let (tx, rx) = mpsc::channel(8);
    let watcher = journal.clone();
    tokio::spawn(async move {
        while watcher.spawn_index("rosrun").is_none() {
            sleep(Duration::from_millis(10)).await;
        }
        for _ in 0..2 {
            if tx.send(()).await.is_err() {
                return;
            }
        }
    });
    let mut orchestrator =
        orchestrator(harness_config(dir.path()), spawner, bridge(&journal)).with_interrupts(rx);

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    assert_eq!(report.interrupts, 2);
    assert_eq!(report.verdict, Verdict::Passed);
    assert_eq!(report.final_state(), RunState::Done);
    assert_eq!(journal.stopped().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_readiness_wait_aborts_bring_up() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone());
    let bridge = bridge(&journal).service(GAINS_SERVICE, ServiceScript::Never);
    let (tx, rx) = mpsc::channel(8);
    let watcher = journal.clone();
    tokio::spawn(async move {
        while watcher.spawn_index("spawner").is_none() {
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_secs(3)).await;
        let _ = tx.send(()).await;
    });
    let mut orchestrator =
        orchestrator(harness_config(dir.path()), spawner, bridge).with_interrupts(rx);

    let started = Instant::now();
    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    match &report.verdict {
        Verdict::Aborted { reason } => assert!(reason.contains("interrupted"), "{reason}"),
        other => panic!("unexpected verdict {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(report.interrupts, 0);
    assert_eq!(report.final_state(), RunState::Aborted);
    assert_eq!(journal.spawned(), strings(&["master", "sim_core", "spawner"]));
    assert_eq!(journal.stopped(), strings(&["spawner", "sim_core", "master"]));
}

#[tokio::test(start_paused = true)]
async fn controller_dying_while_settling_aborts_before_the_test_process() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("controller", ProcessScript::exits_after(1, 1))
        .script("rosrun", ProcessScript::exits_after(1, 0));
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    match &report.verdict {
        Verdict::Aborted { reason } => {
            assert!(reason.contains("controller"), "{reason}");
            assert!(reason.contains("code 1"), "{reason}");
        }
        other => panic!("unexpected verdict {other:?}"),
    }
    assert_eq!(report.exit_code(), 3);
    assert!(journal.spawn_index("rosrun").is_none());
    assert!(!report.states().contains(&RunState::ControllerStarted));
    assert_eq!(journal.stopped().first().map(String::as_str), Some("controller"));
    assert!(report.test_run.is_none());
}

#[tokio::test(start_paused = true)]
async fn disabled_master_is_neither_started_nor_stopped() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(1, 0));
    let mut config = harness_config(dir.path());
    config.subsystems.master.enabled = false;
    let mut orchestrator = orchestrator(config, spawner, bridge(&journal));

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    assert_eq!(report.verdict, Verdict::Passed);
    assert!(!report.states().contains(&RunState::MasterStarted));
    assert_eq!(journal.spawned().first().map(String::as_str), Some("sim_core"));
    assert!(!journal.stopped().contains(&"master".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn run_summary_is_written_as_json() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(1, 0));
    let mut config = harness_config(dir.path());
    let summary = dir.path().join("summary.json");
    config.validation.summary_path = Some(summary.clone());
    let mut orchestrator = orchestrator(config, spawner, bridge(&journal));

    let report = orchestrator.run(&TORQUE_WALK).await.expect("valid arguments");

    let raw = fs::read_to_string(&summary).expect("summary written");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("summary is json");
    assert_eq!(json["run_id"], report.run_id.to_string());
    assert_eq!(json["verdict"]["verdict"], "passed");
    assert_eq!(json["started"][0], "master");
    assert_eq!(json["trace"][0]["state"], "idle");
    assert_eq!(json["convergence"]["passed"], true);
}

#[tokio::test(start_paused = true)]
async fn invalid_arguments_start_nothing() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone());
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));

    let err = orchestrator
        .run(&["vel", "walk", "a"])
        .await
        .expect_err("three tokens are rejected");

    assert!(matches!(err, HarnessError::InvalidArguments { ref args } if args.len() == 3));
    assert!(journal.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn consecutive_runs_do_not_share_state() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let spawner = RecordingSpawner::new(journal.clone())
        .script("rosrun", ProcessScript::exits_after(1, 0));
    let mut orchestrator = orchestrator(harness_config(dir.path()), spawner, bridge(&journal));

    let first = orchestrator.run(&TORQUE_WALK).await.expect("first run");
    let second = orchestrator.run(&TORQUE_WALK).await.expect("second run");

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.started.len(), 6);
    assert_eq!(second.stopped.len(), 6);
    assert_eq!(journal.spawned().len(), 12);
}

#[tokio::test(start_paused = true)]
async fn invalid_configuration_starts_nothing() {
    let dir = tempdir().expect("tempdir");
    let journal = Journal::new();
    let mut config = harness_config(dir.path());
    config.validation.tolerance = -1.0;
    let mut orchestrator =
        orchestrator(config, RecordingSpawner::new(journal.clone()), bridge(&journal));

    let err = orchestrator.run(&TORQUE_WALK).await.expect_err("negative tolerance");

    assert!(matches!(err, HarnessError::Config(_)));
    assert!(journal.events().is_empty());
}
