// SPDX-FileCopyrightText: © 2025 EdgeKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use super::{resolver_with, wait_until, RecordingObserver};
use crate::controller::PipelineController;
use crate::test_utils::{error_details, MockFramework};
use edgekit_core::description::PipelineDescription;
use edgekit_core::error::EdgekitError;
use edgekit_core::fault::FaultSeverity;
use edgekit_core::framework::{GraphState, PropertyValue, StreamingFramework};
use edgekit_core::state::PipelineState;
use edgekit_core::variable::Variable;
use std::sync::Arc;

const SIMPLE: &str = "videotestsrc name=src pattern=0 ! fakesink";

fn controller_for(
    framework: &Arc<MockFramework>,
    variables: Vec<Variable>,
    definition: &str,
) -> Arc<PipelineController> {
    let (_source, resolver) = resolver_with(variables);
    let streaming: Arc<dyn StreamingFramework> = framework.clone();
    PipelineController::new(streaming, resolver, PipelineDescription::new("p1", definition))
}

#[tokio::test]
async fn test_build_and_start_reaches_running() {
    let framework = MockFramework::new();
    let controller = controller_for(&framework, vec![], SIMPLE);

    controller.build().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Initialized);

    controller.start().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Running);
    assert_eq!(framework.graph("p1").unwrap().state(), GraphState::Playing);
}

#[tokio::test]
async fn test_build_failure_is_sticky() {
    let framework = MockFramework::new();
    framework.mark_unknown("notaplugin");
    let controller = controller_for(&framework, vec![], "notaplugin ! fakesink");

    let err = controller.build().await.unwrap_err();
    assert!(matches!(err, EdgekitError::InvalidArgument(_)), "got {err}");
    assert_eq!(controller.state(), PipelineState::Errored);
    assert!(controller.status().await.is_errored());
    // No graph and no bus task were left behind.
    assert_eq!(framework.built_count(), 0);

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, EdgekitError::InvalidState(_)), "got {err}");
}

#[tokio::test]
async fn test_stop_releases_graph_and_start_rebuilds() {
    let framework = MockFramework::new();
    let controller = controller_for(&framework, vec![], SIMPLE);
    controller.build().await.unwrap();
    controller.start().await.unwrap();

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Stopped);
    assert_eq!(framework.graph("p1").unwrap().state(), GraphState::Null);

    // A stopped controller owns no graph; starting builds a fresh one.
    controller.start().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Running);
    assert_eq!(framework.built_count(), 2);
}

#[tokio::test]
async fn test_subscribers_observe_preparing_window() {
    let framework = MockFramework::new();
    let controller = controller_for(&framework, vec![], SIMPLE);
    let observer = RecordingObserver::new();
    controller.build().await.unwrap();
    controller.subscribe(observer.clone());

    controller.start().await.unwrap();

    let states = observer.states_entered();
    let suspended = states.iter().position(|s| *s == PipelineState::Suspended);
    let running = states.iter().position(|s| *s == PipelineState::Running);
    assert!(
        suspended.is_some() && running.is_some() && suspended < running,
        "expected a preparing window before running, saw {states:?}"
    );
}

#[tokio::test]
async fn test_fault_dispatched_before_errored_state() {
    let framework = MockFramework::new();
    let controller = controller_for(&framework, vec![], SIMPLE);
    let observer = RecordingObserver::new();
    controller.build().await.unwrap();
    controller.subscribe(observer.clone());
    controller.start().await.unwrap();

    assert!(framework.inject_error("p1", error_details("resource", 3, "device unplugged")));
    assert!(
        wait_until(1000, || controller.state() == PipelineState::Errored).await,
        "controller never errored"
    );

    assert_eq!(observer.fault_count(), 1);
    #[allow(clippy::unwrap_used)]
    let fault = observer.faults.lock().unwrap()[0].clone();
    assert_eq!(fault.severity, FaultSeverity::Error);
    assert_eq!(fault.message, "device unplugged");

    let status = controller.status().await;
    assert!(status.is_errored());
    assert_eq!(status.last_fault.unwrap().code, 3);

    // Errored is terminal until restart.
    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, EdgekitError::InvalidState(_)), "got {err}");
    controller.restart().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Running);
    assert!(!controller.status().await.is_errored());
}

#[tokio::test]
async fn test_warning_leaves_state_untouched() {
    let framework = MockFramework::new();
    let controller = controller_for(&framework, vec![], SIMPLE);
    let observer = RecordingObserver::new();
    controller.build().await.unwrap();
    controller.subscribe(observer.clone());
    controller.start().await.unwrap();

    assert!(framework.inject_warning("p1", error_details("stream", 5, "late buffer")));
    assert!(wait_until(1000, || observer.fault_count() == 1).await);
    assert_eq!(controller.state(), PipelineState::Running);
    assert!(!controller.status().await.is_errored());
}

#[tokio::test]
async fn test_stop_supersedes_pending_start() {
    let framework = MockFramework::new();
    framework.stall_before_playing(true);
    let controller = controller_for(&framework, vec![], SIMPLE);
    controller.build().await.unwrap();

    let starter = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start().await })
    };
    // Let the start request park in its wait.
    assert!(
        wait_until(1000, || framework
            .graph("p1")
            .is_some_and(|g| g.state() == GraphState::Paused))
        .await
    );

    controller.stop().await.unwrap();
    let start_result = starter.await.unwrap();
    assert!(start_result.is_err(), "superseded start must not report success");
    assert_eq!(controller.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_change_definition_is_atomic_on_failure() {
    let framework = MockFramework::new();
    framework.mark_unknown("notaplugin");
    let controller = controller_for(&framework, vec![], SIMPLE);
    controller.build().await.unwrap();
    controller.start().await.unwrap();

    let err = controller.change_definition("notaplugin ! fakesink").await.unwrap_err();
    assert!(matches!(err, EdgekitError::InvalidArgument(_)), "got {err}");
    assert_eq!(controller.state(), PipelineState::Stopped);
    assert!(controller.status().await.is_errored());
    assert_eq!(controller.description().await.definition, SIMPLE);

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, EdgekitError::InvalidState(_)), "got {err}");

    controller.change_definition("videotestsrc name=src pattern=1 ! fakesink").await.unwrap();
    assert_eq!(controller.state(), PipelineState::Running);
    assert_eq!(
        controller.description().await.definition,
        "videotestsrc name=src pattern=1 ! fakesink"
    );
}

#[tokio::test]
async fn test_refresh_patches_mutable_variable_in_place() {
    let framework = MockFramework::new();
    let (source, resolver) = resolver_with(vec![Variable::string("PATTERN", "1")]);
    let streaming: Arc<dyn StreamingFramework> = framework.clone();
    let controller = PipelineController::new(
        streaming,
        resolver,
        PipelineDescription::new("p1", "videotestsrc name=src pattern=${PATTERN} ! fakesink"),
    );
    controller.build().await.unwrap();
    controller.start().await.unwrap();
    assert_eq!(
        framework.element_property("p1", "src", "pattern"),
        Some(PropertyValue::Int(1))
    );

    source.set(Variable::string("PATTERN", "0"));
    controller.refresh().await.unwrap();

    assert_eq!(
        framework.element_property("p1", "src", "pattern"),
        Some(PropertyValue::Int(0))
    );
    // No rebuild happened.
    assert_eq!(framework.built_count(), 1);
    assert_eq!(controller.state(), PipelineState::Running);
}

#[tokio::test]
async fn test_refresh_rebuilds_for_immutable_variable() {
    let framework = MockFramework::new();
    let (source, resolver) =
        resolver_with(vec![Variable::string("PATTERN", "1").immutable()]);
    let streaming: Arc<dyn StreamingFramework> = framework.clone();
    let controller = PipelineController::new(
        streaming,
        resolver,
        PipelineDescription::new("p1", "videotestsrc name=src pattern=${PATTERN} ! fakesink"),
    );
    controller.build().await.unwrap();
    controller.start().await.unwrap();

    let observer = RecordingObserver::new();
    controller.subscribe(observer.clone());

    source.set(Variable::string("PATTERN", "0").immutable());
    controller.refresh().await.unwrap();

    assert_eq!(framework.built_count(), 2);
    assert_eq!(controller.state(), PipelineState::Running);
    assert_eq!(
        framework.element_property("p1", "src", "pattern"),
        Some(PropertyValue::Int(0))
    );
    let states = observer.states_entered();
    assert!(
        states.contains(&PipelineState::Stopped) && states.contains(&PipelineState::Running),
        "expected a stop/start cycle, saw {states:?}"
    );
}

#[tokio::test]
async fn test_refresh_without_changes_is_a_no_op() {
    let framework = MockFramework::new();
    let controller = controller_for(&framework, vec![Variable::string("PATTERN", "1")], SIMPLE);
    controller.build().await.unwrap();
    controller.start().await.unwrap();
    controller.refresh().await.unwrap();
    assert_eq!(framework.built_count(), 1);
    assert_eq!(controller.state(), PipelineState::Running);
}

#[tokio::test]
async fn test_finite_source_reaches_end_of_stream() {
    let framework = MockFramework::new();
    let controller =
        controller_for(&framework, vec![], "videotestsrc name=src num-buffers=2 ! fakesink");
    controller.build().await.unwrap();
    controller.start().await.unwrap();

    assert!(
        wait_until(2000, || controller.state() == PipelineState::EndOfStream).await,
        "controller never observed end of stream"
    );
    let status = controller.status().await;
    assert!(!status.is_errored());
    assert_eq!(status.last_fault.unwrap().severity, FaultSeverity::EndOfStream);
}

#[tokio::test]
async fn test_pause_suspends_and_resume_works_once() {
    let framework = MockFramework::new();
    let controller = controller_for(&framework, vec![], SIMPLE);
    controller.build().await.unwrap();
    controller.start().await.unwrap();

    controller.pause().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Suspended);
    assert_eq!(framework.graph("p1").unwrap().state(), GraphState::Paused);

    controller.start().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Running);
}

#[tokio::test]
async fn test_unsubscribed_observer_receives_nothing_further() {
    let framework = MockFramework::new();
    let controller = controller_for(&framework, vec![], SIMPLE);
    let observer = RecordingObserver::new();
    controller.build().await.unwrap();
    controller.subscribe(observer.clone());
    controller.start().await.unwrap();

    let seen = observer.states_entered().len();
    let erased: Arc<dyn crate::observer::PipelineObserver> = observer.clone();
    controller.unsubscribe(&erased);
    controller.stop().await.unwrap();
    assert_eq!(observer.states_entered().len(), seen);
}
