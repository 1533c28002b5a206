// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use slumber_core::{EngineConfig, HardwareError, IdleState, NodeId, NodeSpec};
use slumber_dry_tests::{FleetBuilder, HardwareStep};

fn n(raw: u32) -> NodeId {
    NodeId::new(raw)
}

async fn dwell(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn idle_node_goes_deep_after_dwell() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert!(fleet.engine.deep_idle_pending(n(1)));

    dwell(9).await;
    assert_eq!(fleet.state(1), IdleState::Idle);
    dwell(2).await;
    assert_eq!(fleet.state(1), IdleState::DeepIdle);
    assert!(!fleet.engine.deep_idle_pending(n(1)));
    assert_eq!(fleet.register.last(n(1)), Some(IdleState::DeepIdle));

    fleet.engine.exit_idle(n(1), false).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.hardware.count(HardwareStep::ExitDeepIdle), 1);
    assert_eq!(fleet.hardware.count(HardwareStep::ExitIdle), 0);
}

#[tokio::test(start_paused = true)]
async fn exit_cancels_the_pending_timer() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    dwell(5).await;
    fleet.engine.exit_idle(n(1), false).await.unwrap();
    assert!(!fleet.engine.deep_idle_pending(n(1)));

    dwell(30).await;
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.hardware.count(HardwareStep::EnterDeepIdle), 0);
}

#[tokio::test(start_paused = true)]
async fn not_ready_rearms_the_timer() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.hardware.fail_once(
        n(1),
        HardwareStep::EnterDeepIdle,
        HardwareError::NotReady { node: n(1) },
    );
    fleet.engine.enter_idle(n(1)).await.unwrap();

    dwell(11).await;
    assert_eq!(fleet.state(1), IdleState::Idle);
    assert_eq!(fleet.hardware.count(HardwareStep::EnterDeepIdle), 1);
    assert!(fleet.engine.deep_idle_pending(n(1)));

    dwell(10).await;
    assert_eq!(fleet.hardware.count(HardwareStep::EnterDeepIdle), 2);
    assert_eq!(fleet.state(1), IdleState::DeepIdle);
}

#[tokio::test(start_paused = true)]
async fn hard_failure_leaves_node_idle() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.hardware.fail(
        n(1),
        HardwareStep::EnterDeepIdle,
        HardwareError::Unresponsive { node: n(1) },
    );
    fleet.engine.enter_idle(n(1)).await.unwrap();

    dwell(25).await;
    assert_eq!(fleet.state(1), IdleState::Idle);
    assert_eq!(fleet.hardware.count(HardwareStep::EnterDeepIdle), 1);
    assert!(!fleet.engine.deep_idle_pending(n(1)));
}

#[tokio::test(start_paused = true)]
async fn stepping_and_settings_gate_deep_idle() {
    let config = EngineConfig {
        deep_idle_min_stepping: 2,
        deep_idle_excluded_steppings: vec![3],
        ..EngineConfig::default()
    };
    let fleet = FleetBuilder::new()
        .config(config)
        .spec(NodeSpec::new(n(1)).with_stepping(1))
        .spec(NodeSpec::new(n(2)).with_stepping(3))
        .spec(NodeSpec::new(n(3)).with_stepping(4))
        .spec(NodeSpec::new(n(4)).with_stepping(4))
        .build()
        .await
        .unwrap();
    fleet.engine.set_deep_idle_enabled(n(4), false).await.unwrap();

    for raw in 1..=4 {
        fleet.engine.enter_idle(n(raw)).await.unwrap();
    }
    assert!(!fleet.engine.deep_idle_pending(n(1)));
    assert!(!fleet.engine.deep_idle_pending(n(2)));
    assert!(fleet.engine.deep_idle_pending(n(3)));
    assert!(!fleet.engine.deep_idle_pending(n(4)));

    dwell(11).await;
    assert_eq!(fleet.state(3), IdleState::DeepIdle);
    assert_eq!(fleet.state(4), IdleState::Idle);

    fleet.engine.set_deep_idle_enabled(n(4), true).await.unwrap();
    assert!(fleet.engine.deep_idle_pending(n(4)));
    dwell(11).await;
    assert_eq!(fleet.state(4), IdleState::DeepIdle);
}

#[tokio::test(start_paused = true)]
async fn disabling_deep_idle_wakes_the_node() {
    let fleet = FleetBuilder::new()
        .config(EngineConfig::default().with_deep_idle_dwell(Duration::from_secs(1)))
        .nodes([1])
        .build()
        .await
        .unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    dwell(2).await;
    assert_eq!(fleet.state(1), IdleState::DeepIdle);

    fleet.engine.set_deep_idle_enabled(n(1), false).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 0);
    assert_eq!(fleet.hardware.count(HardwareStep::ExitDeepIdle), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_every_timer() {
    let fleet = FleetBuilder::new().nodes([1, 2]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    fleet.engine.enter_idle(n(2)).await.unwrap();
    fleet.engine.shutdown();

    dwell(30).await;
    assert_eq!(fleet.state(1), IdleState::Idle);
    assert_eq!(fleet.state(2), IdleState::Idle);
    assert_eq!(fleet.hardware.count(HardwareStep::EnterDeepIdle), 0);
}
