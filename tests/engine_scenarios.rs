//! End-to-end executor scenarios driven by a manual clock.
//!
//! Every test steps time explicitly and calls `tick()` directly; nothing here
//! waits on real settle windows.

use std::sync::Arc;
use std::time::Duration;

use robot_taskd::config::{EngineConfig, TopicsConfig};
use robot_taskd::engine::{
    ArmPreset, FaultReason, GripperAction, ManualClock, NavigationGoal, Quaternion, QueueError,
    RecordingSink, TaskCommand, TaskEngine, TaskKind, TickOutcome,
};

const NAV_GOAL: &str = "actuator/move_base_simple/goal";
const ARM_POSE: &str = "actuator/arm_position_drive";
const GRIPPER: &str = "actuator/cmdeffector";

struct Rig {
    engine: TaskEngine,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
}

impl Rig {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new());
        let engine = TaskEngine::from_config(
            &config,
            &TopicsConfig::default(),
            sink.clone(),
            clock.clone(),
        );
        Self {
            engine,
            sink,
            clock,
        }
    }

    fn advance_ms(&self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
    }

    fn tick(&self) -> TickOutcome {
        self.engine.tick()
    }
}

fn nav(x: f64, y: f64) -> TaskCommand {
    TaskCommand::Navigation(NavigationGoal {
        x,
        y,
        z: 0.0,
        orientation: None,
    })
}

fn gripper(action: GripperAction) -> TaskCommand {
    TaskCommand::Gripper { action }
}

fn arm(preset: ArmPreset) -> TaskCommand {
    TaskCommand::ArmPose { preset }
}

fn dispatched_id(outcome: TickOutcome) -> u64 {
    match outcome {
        TickOutcome::Dispatched { task_id, .. } => task_id,
        other => panic!("expected a dispatch, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordering and exclusivity
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn tasks_dispatch_in_arrival_order() {
    let rig = Rig::with_config(EngineConfig {
        completion_cooldown_secs: 0.0,
        ..EngineConfig::default()
    });
    let ids: Vec<u64> = (0..5)
        .map(|i| {
            let action = if i % 2 == 0 {
                GripperAction::Close
            } else {
                GripperAction::Open
            };
            rig.engine.submit(gripper(action)).unwrap()
        })
        .collect();

    let mut order = vec![dispatched_id(rig.tick())];
    while order.len() < ids.len() {
        rig.advance_ms(1500);
        order.push(dispatched_id(rig.tick()));
    }
    assert_eq!(order, ids);

    let payloads: Vec<String> = rig
        .sink
        .published()
        .iter()
        .map(|m| m.payload_str().to_string())
        .collect();
    assert_eq!(
        payloads,
        vec![
            r#"{"data":1}"#,
            r#"{"data":2}"#,
            r#"{"data":1}"#,
            r#"{"data":2}"#,
            r#"{"data":1}"#
        ]
    );
}

#[test]
fn only_one_task_in_flight() {
    let rig = Rig::new();
    rig.engine.submit(arm(ArmPreset::Home)).unwrap();
    rig.engine.submit(arm(ArmPreset::Grasp)).unwrap();
    rig.engine.update_arm_running(true);

    dispatched_id(rig.tick());
    for _ in 0..50 {
        rig.advance_ms(100);
        assert!(matches!(rig.tick(), TickOutcome::Waiting { .. }));
    }
    assert_eq!(rig.engine.pending(), 1);
    assert_eq!(rig.sink.count_for(ARM_POSE), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference scenario: navigation then gripper
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn gripper_waits_for_navigation_and_cooldown() {
    let rig = Rig::new();
    rig.engine.submit(nav(1.0, 2.0)).unwrap();
    let nav_id = dispatched_id(rig.tick());

    // Arrives while navigation is executing.
    let gripper_id = rig.engine.submit(gripper(GripperAction::Close)).unwrap();
    rig.engine.update_nav_status(3);

    rig.advance_ms(1000);
    assert_eq!(rig.tick(), TickOutcome::Waiting { task_id: nav_id });
    rig.advance_ms(1000);
    assert_eq!(rig.tick(), TickOutcome::Waiting { task_id: nav_id });

    rig.engine.update_nav_status(2);
    assert!(matches!(rig.tick(), TickOutcome::CoolingDown { .. }));
    assert_eq!(rig.sink.count_for(GRIPPER), 0);

    rig.advance_ms(400);
    assert!(matches!(rig.tick(), TickOutcome::CoolingDown { .. }));
    assert_eq!(rig.sink.count_for(GRIPPER), 0);

    rig.advance_ms(100);
    assert_eq!(
        rig.tick(),
        TickOutcome::Dispatched {
            task_id: gripper_id,
            kind: TaskKind::Gripper,
            published: true,
        }
    );

    // Finish it and make sure nothing is re-sent.
    rig.advance_ms(1500);
    rig.tick();
    rig.advance_ms(1000);
    assert_eq!(rig.tick(), TickOutcome::Idle);

    let gripper_msgs: Vec<_> = rig
        .sink
        .published()
        .into_iter()
        .filter(|m| m.topic == GRIPPER)
        .collect();
    assert_eq!(gripper_msgs.len(), 1);
    assert_eq!(gripper_msgs[0].payload_str(), r#"{"data":1}"#);

    let goal: serde_json::Value = serde_json::from_slice(&rig.sink.published()[0].payload).unwrap();
    assert_eq!(goal["pose"]["position"]["x"], 1.0);
    assert_eq!(goal["pose"]["position"]["y"], 2.0);
    assert_eq!(goal["header"]["frame_id"], "map");
    assert_eq!(rig.engine.snapshot().completed, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Settle window and dwell
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn stale_goal_reached_is_ignored_during_settle() {
    let rig = Rig::with_config(EngineConfig {
        completion_cooldown_secs: 0.0,
        ..EngineConfig::default()
    });
    // Left over from a previous goal.
    rig.engine.update_nav_status(2);
    rig.engine.submit(nav(3.0, -1.0)).unwrap();
    let id = dispatched_id(rig.tick());

    rig.advance_ms(1999);
    assert_eq!(rig.tick(), TickOutcome::Waiting { task_id: id });
    assert!(rig.engine.current_task().is_some());

    rig.advance_ms(1);
    assert_eq!(rig.tick(), TickOutcome::Idle);
    assert!(rig.engine.current_task().is_none());
}

#[test]
fn gripper_completes_on_dwell_regardless_of_status() {
    let rig = Rig::new();
    rig.engine.update_nav_status(1);
    rig.engine.update_arm_running(true);
    rig.engine.submit(gripper(GripperAction::Open)).unwrap();
    let id = dispatched_id(rig.tick());

    rig.advance_ms(1499);
    assert_eq!(rig.tick(), TickOutcome::Waiting { task_id: id });
    rig.advance_ms(1);
    assert!(matches!(rig.tick(), TickOutcome::CoolingDown { .. }));
    assert!(!rig.engine.is_paused());
}

#[test]
fn unknown_nav_status_keeps_waiting() {
    let rig = Rig::new();
    rig.engine.submit(nav(0.0, 0.0)).unwrap();
    let id = dispatched_id(rig.tick());
    rig.engine.update_nav_status(17);

    for _ in 0..10 {
        rig.advance_ms(1000);
        assert_eq!(rig.tick(), TickOutcome::Waiting { task_id: id });
    }
    assert!(!rig.engine.is_paused());
}

// ─────────────────────────────────────────────────────────────────────────────
// Fault escalation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn navigation_fault_pauses_and_drains() {
    let rig = Rig::new();
    rig.engine.submit(nav(5.0, 5.0)).unwrap();
    rig.engine.submit(arm(ArmPreset::Grasp)).unwrap();
    rig.engine.submit(gripper(GripperAction::Close)).unwrap();
    rig.engine.submit(arm(ArmPreset::Carry)).unwrap();
    let id = dispatched_id(rig.tick());

    rig.advance_ms(2000);
    rig.engine.update_nav_status(3);
    assert!(matches!(rig.tick(), TickOutcome::Waiting { .. }));
    rig.engine.update_nav_status(3);
    assert!(matches!(rig.tick(), TickOutcome::Waiting { .. }));
    rig.engine.update_nav_status(1);

    assert_eq!(
        rig.tick(),
        TickOutcome::Faulted {
            task_id: id,
            reason: FaultReason::NavigationFault,
            dropped: 3,
        }
    );
    assert!(rig.engine.is_paused());
    assert_eq!(rig.engine.pending(), 0);
    assert!(rig.engine.current_task().is_none());

    assert_eq!(rig.tick(), TickOutcome::Paused);
    assert_eq!(rig.sink.published().len(), 1);
    assert_eq!(rig.engine.snapshot().faulted, 1);
}

#[test]
fn external_override_pauses_and_drains() {
    let rig = Rig::new();
    rig.engine.submit(nav(1.0, 1.0)).unwrap();
    rig.engine.submit(gripper(GripperAction::Open)).unwrap();
    dispatched_id(rig.tick());

    rig.engine.update_nav_status(4);
    rig.advance_ms(2500);
    assert!(matches!(
        rig.tick(),
        TickOutcome::Faulted {
            reason: FaultReason::ExternalOverride,
            dropped: 1,
            ..
        }
    ));
    assert!(rig.engine.is_paused());
}

#[test]
fn enqueue_while_paused_is_rejected_until_resume() {
    let rig = Rig::new();
    rig.engine.pause_and_drain();

    for _ in 0..2 {
        let err = rig.engine.submit(gripper(GripperAction::Close)).unwrap_err();
        assert!(matches!(err, QueueError::Paused { .. }));
        assert_eq!(rig.engine.pending(), 0);
    }

    assert!(rig.engine.resume());
    rig.engine.submit(gripper(GripperAction::Close)).unwrap();
    assert!(matches!(rig.tick(), TickOutcome::Dispatched { .. }));
}

#[test]
fn resume_after_fault_starts_fresh() {
    let rig = Rig::new();
    rig.engine.submit(nav(1.0, 1.0)).unwrap();
    rig.engine.submit(nav(2.0, 2.0)).unwrap();
    dispatched_id(rig.tick());
    rig.advance_ms(2000);
    rig.engine.update_nav_status(1);
    assert!(matches!(rig.tick(), TickOutcome::Faulted { .. }));

    rig.engine.resume();
    let id = rig.engine.submit(nav(9.0, 9.0)).unwrap();
    // A fault ends the task like a completion: the cooldown still applies.
    assert!(matches!(rig.tick(), TickOutcome::CoolingDown { .. }));
    rig.advance_ms(500);
    assert_eq!(dispatched_id(rig.tick()), id);
    // Drained work is gone for good.
    assert_eq!(rig.engine.pending(), 0);
}

#[test]
fn max_wait_times_out_busy_arm() {
    let rig = Rig::with_config(EngineConfig {
        max_task_wait_secs: Some(10.0),
        ..EngineConfig::default()
    });
    rig.engine.submit(arm(ArmPreset::Release)).unwrap();
    rig.engine.submit(gripper(GripperAction::Open)).unwrap();
    rig.engine.update_arm_running(true);
    let id = dispatched_id(rig.tick());

    rig.advance_ms(9_900);
    assert_eq!(rig.tick(), TickOutcome::Waiting { task_id: id });
    rig.advance_ms(100);
    assert_eq!(
        rig.tick(),
        TickOutcome::Faulted {
            task_id: id,
            reason: FaultReason::Timeout,
            dropped: 1,
        }
    );
}

#[test]
fn without_max_wait_a_busy_arm_blocks_forever() {
    let rig = Rig::new();
    rig.engine.submit(arm(ArmPreset::Home)).unwrap();
    rig.engine.update_arm_running(true);
    let id = dispatched_id(rig.tick());

    rig.clock.advance(Duration::from_secs(6 * 3600));
    assert_eq!(rig.tick(), TickOutcome::Waiting { task_id: id });
    assert!(!rig.engine.is_paused());
}

// ─────────────────────────────────────────────────────────────────────────────
// Delivery and runtime control
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn failed_publish_is_not_retried() {
    let rig = Rig::new();
    rig.sink.set_failing(true);
    rig.engine.submit(nav(1.0, 0.0)).unwrap();
    rig.engine.update_nav_status(3);

    assert!(matches!(
        rig.tick(),
        TickOutcome::Dispatched {
            published: false,
            ..
        }
    ));
    rig.sink.set_failing(false);
    for _ in 0..30 {
        rig.advance_ms(1000);
        rig.tick();
    }
    assert!(rig.sink.published().is_empty());
    assert!(rig.engine.current_task().is_some());
}

#[test]
fn cooldown_can_be_changed_at_runtime() {
    let rig = Rig::new();
    rig.engine.set_completion_cooldown(Duration::from_secs(3));
    rig.engine.submit(gripper(GripperAction::Close)).unwrap();
    rig.engine.submit(gripper(GripperAction::Open)).unwrap();
    dispatched_id(rig.tick());

    rig.advance_ms(1500);
    assert!(matches!(rig.tick(), TickOutcome::CoolingDown { .. }));
    rig.advance_ms(2999);
    assert!(matches!(rig.tick(), TickOutcome::CoolingDown { .. }));
    rig.advance_ms(1);
    assert!(matches!(rig.tick(), TickOutcome::Dispatched { .. }));
}

#[test]
fn yaw_goal_publishes_unit_quaternion() {
    let rig = Rig::new();
    rig.engine
        .submit(TaskCommand::Navigation(NavigationGoal {
            x: 0.5,
            y: 0.5,
            z: 0.0,
            orientation: Some(Quaternion::from_yaw(std::f64::consts::FRAC_PI_2)),
        }))
        .unwrap();
    dispatched_id(rig.tick());

    let published = rig.sink.published();
    assert_eq!(published[0].topic, NAV_GOAL);
    let goal: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
    let q = &goal["pose"]["orientation"];
    let norm = ["x", "y", "z", "w"]
        .iter()
        .map(|k| q[*k].as_f64().unwrap().powi(2))
        .sum::<f64>()
        .sqrt();
    assert!((norm - 1.0).abs() < 1e-9);
    assert!((q["z"].as_f64().unwrap() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
}
