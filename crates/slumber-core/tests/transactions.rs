// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use slumber_core::{
    HardwareError, IdleError, IdleState, NodeId, NodeSet, NodeSpec, Rejection, MARKED_IDLE,
};
use slumber_dry_tests::{FleetBuilder, HardwareStep, TopologyCall};

fn n(raw: u32) -> NodeId {
    NodeId::new(raw)
}

fn set(ids: &[u32]) -> NodeSet {
    ids.iter().copied().map(NodeId::new).collect()
}

#[tokio::test]
async fn dependent_follows_target_into_idle_and_back() {
    let fleet = FleetBuilder::new().nodes([1, 2, 3]).build().await.unwrap();
    fleet.topology.add_dependency(n(2), n(1));
    fleet.topology.set_deactivation_set(n(1), [n(1), n(2)]);

    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Idle);
    assert_eq!(fleet.state(2), IdleState::Idle);
    assert_eq!(fleet.state(3), IdleState::Active);
    assert_eq!(fleet.refs(1), MARKED_IDLE);
    assert_eq!(fleet.refs(2), MARKED_IDLE);
    assert_eq!(fleet.topology.disconnects(), vec![set(&[1, 2])]);
    assert_eq!(fleet.register.last(n(2)), Some(IdleState::Idle));

    fleet.topology.set_active_set(n(1), [n(1), n(2)]);
    fleet.engine.exit_idle(n(1), true).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 1);
    assert_eq!(fleet.state(2), IdleState::Active);
    assert_eq!(fleet.refs(2), 0);
    assert_eq!(fleet.state(3), IdleState::Active);
    assert_eq!(fleet.refs(3), 0);
    assert_eq!(fleet.topology.reconnects(), vec![set(&[1, 2])]);
    assert_eq!(fleet.register.last(n(1)), Some(IdleState::Active));
    assert_eq!(fleet.hardware.count(HardwareStep::ExitIdle), 2);
}

#[tokio::test]
async fn hardware_failure_rolls_back_every_member() {
    let fleet = FleetBuilder::new().nodes([1, 2, 3]).build().await.unwrap();
    fleet.topology.set_deactivation_set(n(1), [n(1), n(2), n(3)]);
    fleet.hardware.fail(
        n(3),
        HardwareStep::EnterIdle,
        HardwareError::Unresponsive { node: n(3) },
    );

    let err = fleet.engine.enter_idle(n(1)).await.unwrap_err();
    assert!(matches!(err, IdleError::Hardware { node, .. } if node == n(3)));
    for raw in [1, 2, 3] {
        assert_eq!(fleet.state(raw), IdleState::Active, "node {raw}");
        assert_eq!(fleet.refs(raw), 0, "node {raw}");
    }
    assert_eq!(fleet.topology.reconnects(), vec![set(&[1, 2, 3])]);
    assert!(!fleet.engine.deep_idle_pending(n(1)));
}

#[tokio::test]
async fn member_that_will_not_wake_during_rollback_is_lost() {
    let fleet = FleetBuilder::new().nodes([1, 2, 3]).build().await.unwrap();
    fleet.topology.set_deactivation_set(n(1), [n(1), n(2), n(3)]);
    fleet.hardware.fail(
        n(3),
        HardwareStep::EnterIdle,
        HardwareError::Fault("rail".into()),
    );
    fleet.hardware.fail(
        n(2),
        HardwareStep::ExitIdle,
        HardwareError::Unresponsive { node: n(2) },
    );

    assert!(fleet.engine.enter_idle(n(1)).await.is_err());
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.state(2), IdleState::Lost);
    assert_eq!(fleet.refs(2), 0);
    assert_eq!(fleet.state(3), IdleState::Active);
    assert_eq!(fleet.topology.reconnects(), vec![set(&[1, 3])]);
}

#[tokio::test]
async fn failed_wake_marks_node_lost_and_zeroes_refs() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    fleet.hardware.fail(
        n(1),
        HardwareStep::ExitIdle,
        HardwareError::Unresponsive { node: n(1) },
    );

    fleet.engine.exit_idle(n(1), true).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Lost);
    assert_eq!(fleet.refs(1), 0);
    assert!(fleet.topology.reconnects().is_empty());

    assert!(matches!(
        fleet.engine.acquire(n(1), true).await,
        Err(IdleError::NodeLost(_))
    ));
    assert!(matches!(
        fleet.engine.release(n(1)),
        Err(IdleError::NodeLost(_))
    ));
    assert!(matches!(
        fleet.engine.exit_idle(n(1), false).await,
        Err(IdleError::InvalidState {
            state: Some(IdleState::Lost),
            ..
        })
    ));

    fleet.engine.recover_node(n(1)).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 0);
    assert!(matches!(
        fleet.engine.recover_node(n(1)).await,
        Err(IdleError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn lost_member_aborts_exit_without_reconnecting() {
    let fleet = FleetBuilder::new().nodes([1, 2]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    fleet.engine.enter_idle(n(2)).await.unwrap();
    fleet.hardware.fail(
        n(2),
        HardwareStep::ExitIdle,
        HardwareError::Unresponsive { node: n(2) },
    );
    fleet.engine.exit_idle(n(2), false).await.unwrap();
    assert_eq!(fleet.state(2), IdleState::Lost);

    fleet.topology.set_active_set(n(1), [n(1), n(2)]);
    let err = fleet.engine.exit_idle(n(1), false).await.unwrap_err();
    assert!(matches!(err, IdleError::InvalidState { node, .. } if node == n(2)));
    assert_eq!(fleet.state(1), IdleState::Idle);
    assert!(fleet.topology.reconnects().is_empty());
}

#[tokio::test]
async fn no_pair_stays_staged_after_entry() {
    let fleet = FleetBuilder::new().nodes([1, 2, 3]).build().await.unwrap();
    fleet.topology.add_dependency(n(1), n(3));
    fleet.topology.add_dependency(n(2), n(1));

    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert_eq!(fleet.topology.staged_pairs(), vec![vec![(n(1), n(3))]]);
    assert!(fleet.engine.staged_dependencies().await.is_empty());

    fleet.topology.set_failing(TopologyCall::Disconnect, true);
    assert!(matches!(
        fleet.engine.enter_idle(n(3)).await,
        Err(IdleError::Disconnect(_))
    ));
    assert!(fleet.engine.staged_dependencies().await.is_empty());
    assert_eq!(fleet.state(3), IdleState::Active);
    assert_eq!(fleet.refs(3), 0);
}

#[tokio::test]
async fn exit_on_active_node_is_a_no_op() {
    let fleet = FleetBuilder::new().nodes([1, 2]).build().await.unwrap();
    fleet.engine.exit_idle(n(1), false).await.unwrap();
    fleet.engine.exit_idle(n(1), false).await.unwrap();

    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 0);
    assert!(fleet.hardware.calls().is_empty());
    assert!(fleet.register.log().is_empty());
    assert!(fleet.topology.reconnects().is_empty());
    assert!(!fleet.engine.is_exit_needed(n(1)).await.unwrap());
}

#[tokio::test]
async fn referenced_node_is_refused_admission() {
    let fleet = FleetBuilder::new().nodes([1, 2]).build().await.unwrap();
    fleet.topology.set_deactivation_set(n(1), [n(1), n(2)]);
    fleet.engine.acquire(n(2), false).await.unwrap();

    let err = fleet.engine.enter_idle(n(1)).await.unwrap_err();
    assert!(matches!(
        err,
        IdleError::AdmissionRejected {
            node,
            reason: Rejection::Referenced(1),
        } if node == n(2)
    ));
    assert!(err.is_retryable());
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 0);
    assert_eq!(fleet.refs(2), 1);
    assert_eq!(fleet.hardware.count(HardwareStep::EnterIdle), 0);
    assert_eq!(fleet.topology.reconnects(), vec![set(&[1, 2])]);
}

#[tokio::test]
async fn detached_node_is_refused_admission() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.detach(n(1)).await.unwrap();
    assert!(matches!(
        fleet.engine.enter_idle(n(1)).await,
        Err(IdleError::AdmissionRejected {
            reason: Rejection::NotAttached,
            ..
        })
    ));
    assert_eq!(fleet.state(1), IdleState::Active);
}

#[tokio::test]
async fn ineligible_target_is_woken_instead() {
    let fleet = FleetBuilder::new().nodes([1, 2]).build().await.unwrap();
    fleet.engine.set_idle_enabled(n(1), false).await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);

    fleet.engine.channel_closed(n(2)).unwrap();
    fleet.engine.enter_idle(n(2)).await.unwrap();
    assert_eq!(fleet.state(2), IdleState::Active);
    assert_eq!(fleet.hardware.count(HardwareStep::EnterIdle), 0);
}

#[tokio::test]
async fn entering_an_idle_node_wakes_it() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.hardware.count(HardwareStep::ExitIdle), 1);
}

#[tokio::test]
async fn refused_entry_never_reports_the_wake_outcome() {
    let fleet = FleetBuilder::new().nodes([1, 2]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    fleet.hardware.fail(
        n(1),
        HardwareStep::ExitIdle,
        HardwareError::Unresponsive { node: n(1) },
    );
    fleet.engine.exit_idle(n(1), false).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Lost);

    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Lost);
    assert_eq!(fleet.refs(1), 0);

    fleet.engine.set_idle_enabled(n(2), false).await.unwrap();
    fleet.topology.set_failing(TopologyCall::ActiveSet, true);
    fleet.engine.enter_idle(n(2)).await.unwrap();
    assert_eq!(fleet.state(2), IdleState::Active);
}

#[tokio::test]
async fn plain_exit_leaves_no_idle_mark() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert_eq!(fleet.refs(1), MARKED_IDLE);

    fleet.engine.exit_idle(n(1), false).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 0);

    fleet.engine.acquire(n(1), false).await.unwrap();
    assert_eq!(fleet.refs(1), 1);
    fleet.engine.release(n(1)).unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Idle);
}

#[tokio::test]
async fn reconnected_channel_drops_the_idle_mark() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    fleet.engine.channel_connected(n(1)).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 0);
}

#[tokio::test]
async fn acquire_respects_force_flag() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();

    assert!(matches!(
        fleet.engine.acquire(n(1), false).await,
        Err(IdleError::NotReady(_))
    ));
    assert_eq!(fleet.state(1), IdleState::Idle);

    fleet.engine.acquire(n(1), true).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 1);

    fleet.engine.acquire(n(1), false).await.unwrap();
    assert_eq!(fleet.refs(1), 2);
    fleet.engine.release(n(1)).unwrap();
    fleet.engine.release(n(1)).unwrap();
    assert!(matches!(
        fleet.engine.release(n(1)),
        Err(IdleError::NotHeld(_))
    ));
}

#[tokio::test]
async fn capability_gates_operator_settings() {
    let fleet = FleetBuilder::new()
        .spec(NodeSpec::new(n(4)).with_capabilities(false, false))
        .build()
        .await
        .unwrap();
    assert!(matches!(
        fleet.engine.set_idle_enabled(n(4), true).await,
        Err(IdleError::NotCapable { feature: "idle", .. })
    ));
    assert!(matches!(
        fleet.engine.set_deep_idle_enabled(n(4), true).await,
        Err(IdleError::NotCapable { .. })
    ));
    fleet.engine.enter_idle(n(4)).await.unwrap();
    assert_eq!(fleet.state(4), IdleState::Active);
}

#[tokio::test]
async fn disabling_idle_wakes_a_sleeping_node() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.engine.enter_idle(n(1)).await.unwrap();
    fleet.engine.set_idle_enabled(n(1), false).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Active);
    assert_eq!(fleet.refs(1), 0);
}

#[tokio::test]
async fn topology_failures_surface_typed_errors() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.topology.set_failing(TopologyCall::Deactivation, true);
    assert!(matches!(
        fleet.engine.enter_idle(n(1)).await,
        Err(IdleError::DependencySetup(_))
    ));
    assert_eq!(fleet.state(1), IdleState::Active);
    fleet.topology.set_failing(TopologyCall::Deactivation, false);

    fleet.topology.set_deactivation_set(n(1), [n(2)]);
    assert!(matches!(
        fleet.engine.enter_idle(n(1)).await,
        Err(IdleError::DependencySetup(_))
    ));

    fleet.topology.set_failing(TopologyCall::ActiveSet, true);
    assert!(matches!(
        fleet.engine.exit_idle(n(1), false).await,
        Err(IdleError::ActiveSet(_))
    ));
}

#[tokio::test]
async fn unknown_and_reserved_ids_are_rejected() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    assert!(matches!(
        fleet.engine.enter_idle(n(9)).await,
        Err(IdleError::UnknownNode(_))
    ));
    assert!(matches!(
        fleet.engine.exit_idle(n(9), true).await,
        Err(IdleError::UnknownNode(_))
    ));
    assert!(matches!(
        fleet.engine.register_node(NodeSpec::new(n(0))),
        Err(IdleError::HostNode(_))
    ));
    assert!(matches!(
        fleet.engine.register_node(NodeSpec::new(n(1))),
        Err(IdleError::DuplicateNode(_))
    ));

    let removed = fleet.engine.remove_node(n(1)).await.unwrap();
    assert_eq!(removed.idle_state, IdleState::Active);
    assert!(fleet.engine.nodes().is_empty());
}

#[tokio::test]
async fn unpublishable_state_is_logged_not_fatal() {
    let fleet = FleetBuilder::new().nodes([1]).build().await.unwrap();
    fleet.register.set_failing(true);
    fleet.engine.enter_idle(n(1)).await.unwrap();
    assert_eq!(fleet.state(1), IdleState::Idle);
    assert_eq!(
        fleet.engine.snapshot(n(1)).unwrap().published,
        IdleState::Active
    );
}
