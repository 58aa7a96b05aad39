//! Tests for the request state machine behind `ServerAppService::apply`
//!
//! Covers trigger acceptance, the single-flight guard, outcome labels,
//! field updates and the all-or-nothing commit.

use pretty_assertions::assert_eq;

use fleetkeeper_core::{ApplyError, DispatchRejected, Job, PROVISION_ACTION, UPGRADE_ACTION};
use tests::fixtures::{self, HOSTNAME};
use tests::harness::Harness;
use tests::mocks::*;
use tests::{labels, CredentialField, RequestCode, RequestResult, ServerUpdate};

#[tokio::test]
async fn upgrade_trigger_marks_in_flight_and_runs_playbook() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());

    let result = h
        .service()
        .apply(server.id, ServerUpdate::new().with_request(1))
        .await
        .unwrap();

    assert_eq!(result.request, RequestCode::InFlight);
    assert_eq!(result.last_action.as_deref(), Some(UPGRADE_ACTION));
    assert_eq!(result.request_status.as_deref(), Some(labels::PROCESSING));
    assert!(result.request_status_updated_at.is_some());
    assert!(result.inventory.as_deref().unwrap().contains(HOSTNAME));
    assert_eq!(h.stored(&server), result);

    let commands = h.runner.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].program, "/opt/fleet/upgrade.yml");
    assert_eq!(commands[0].args[0], "--vault-password-file");
    assert_eq!(commands[0].args[2], "-i");
    let inventory_path = std::path::PathBuf::from(&commands[0].args[3]);
    assert!(inventory_path.starts_with(&h.config.inventory_dir));
    assert_eq!(
        std::fs::read_to_string(&inventory_path).unwrap(),
        result.inventory.unwrap()
    );
    assert_eq!(commands[0].log_file.as_ref(), Some(&h.config.upgrade_log));
}

#[tokio::test]
async fn second_trigger_while_in_flight_is_rejected() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());
    let svc = h.service();

    svc.apply(server.id, ServerUpdate::new().with_request(1))
        .await
        .unwrap();
    let before = h.stored(&server);

    let err = svc
        .apply(server.id, ServerUpdate::new().with_request(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplyError::Dispatch(DispatchRejected::InFlight)
    ));
    assert!(err.field_errors().has("request"));

    assert_eq!(h.stored(&server), before);
    assert_eq!(h.runner.commands().len(), 1, "no second dispatch");

    // A provision request is guarded the same way
    let err = svc
        .apply(server.id, ServerUpdate::new().with_request(2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplyError::Dispatch(DispatchRejected::InFlight)
    ));
    assert!(h.jobs.jobs().is_empty());
}

#[tokio::test]
async fn concurrent_triggers_dispatch_once() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());
    let svc = h.service();

    let (a, b) = tokio::join!(
        svc.apply(server.id, ServerUpdate::new().with_request(1)),
        svc.apply(server.id, ServerUpdate::new().with_request(1)),
    );

    let accepted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(accepted, 1);
    for result in [a, b] {
        if let Err(err) = result {
            assert!(matches!(
                err,
                ApplyError::Conflict(_) | ApplyError::Dispatch(DispatchRejected::InFlight)
            ));
        }
    }
    assert_eq!(h.runner.commands().len(), 1);
    assert_eq!(h.stored(&server).request, RequestCode::InFlight);
}

#[tokio::test]
async fn failing_probe_rejects_without_persisting() {
    let server = fixtures::server();
    let h = Harness::builder()
        .server(server.clone())
        .gateway(MockGateway::new().failing(CredentialField::DoApiKey, "Account not active"))
        .build();

    let err = h
        .service()
        .apply(
            server.id,
            ServerUpdate::new().with_credential(CredentialField::DoApiKey, "dop_v1_inactive"),
        )
        .await
        .unwrap_err();

    let fields = err.field_errors();
    assert_eq!(fields.messages_for("do_api_key"), vec!["Account not active"]);
    assert_eq!(h.stored(&server).do_api_key, None);
    assert_eq!(h.repo.update_count(), 0);
}

#[tokio::test]
async fn probe_failure_blocks_trigger_in_same_call() {
    let server = fixtures::server();
    let h = Harness::builder()
        .server(server.clone())
        .gateway(MockGateway::new().failing(CredentialField::MgApiKey, "Unauthorized"))
        .build();

    let update = ServerUpdate::new()
        .with_credential(CredentialField::MgApiKey, "key-bad")
        .with_request(1);
    let err = h.service().apply(server.id, update).await.unwrap_err();

    assert_eq!(err.field_errors().messages_for("mg_api_key"), vec!["Unauthorized"]);
    assert!(h.runner.commands().is_empty());
    assert_eq!(h.stored(&server).request, RequestCode::Idle);
}

#[tokio::test]
async fn invalid_replacement_keeps_stored_credential() {
    for field in CredentialField::ALL {
        let mut server = fixtures::server();
        server.set_credential(field, Some("previously-valid".to_string()));
        let h = Harness::builder()
            .server(server.clone())
            .gateway(MockGateway::new().failing(field, "invalid"))
            .build();

        let err = h
            .service()
            .apply(
                server.id,
                ServerUpdate::new().with_credential(field, "replacement-rejected"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ApplyError::Validation(_)), "{:?}", field);
        assert_eq!(err.field_errors().messages_for(field.as_str()), vec!["invalid"]);
        let stored = h.stored(&server);
        assert_eq!(stored.credential(field), Some("previously-valid"), "{:?}", field);
        assert_eq!(stored, server);
        assert_eq!(h.repo.update_count(), 0);
    }
}

#[tokio::test]
async fn failed_label_clears_in_flight() {
    let server = fixtures::in_flight_server();
    let h = Harness::with_server(server.clone());

    let result = h
        .service()
        .apply(
            server.id,
            ServerUpdate::new().with_request_status(labels::FAILED),
        )
        .await
        .unwrap();

    assert_eq!(result.request_result, Some(RequestResult::Failed));
    assert_eq!(result.request, RequestCode::Idle);
    assert_eq!(result.request_status.as_deref(), Some(labels::FAILED));
    assert_eq!(h.status.refresh_count(), 0);
}

#[tokio::test]
async fn success_label_completes_and_refreshes_status() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());
    let svc = h.service();

    svc.apply(server.id, ServerUpdate::new().with_request(1))
        .await
        .unwrap();
    let result = svc
        .apply(
            server.id,
            ServerUpdate::new().with_request_status(labels::SUCCESS),
        )
        .await
        .unwrap();

    assert_eq!(result.request, RequestCode::Idle);
    assert_eq!(result.request_result, Some(RequestResult::Ok));
    assert_eq!(result.installed_version.as_deref(), Some(MOCK_VERSION));
    assert_eq!(h.status.refresh_count(), 1);
}

#[tokio::test]
async fn processing_rebuild_keeps_sentinel() {
    let server = fixtures::in_flight_server();
    let h = Harness::with_server(server.clone());

    let result = h
        .service()
        .apply(
            server.id,
            ServerUpdate::new().with_request_status(labels::PROCESSING_REBUILD),
        )
        .await
        .unwrap();

    assert_eq!(result.request, RequestCode::InFlight);
    assert_eq!(result.request_result, Some(RequestResult::Running));
}

#[tokio::test]
async fn unknown_label_leaves_result_untouched() {
    let server = fixtures::in_flight_server();
    let h = Harness::with_server(server.clone());

    let result = h
        .service()
        .apply(
            server.id,
            ServerUpdate::new().with_request_status("Installing plugins"),
        )
        .await
        .unwrap();

    assert_eq!(result.request_status.as_deref(), Some("Installing plugins"));
    assert_eq!(result.request_result, None);
    assert_eq!(result.request, RequestCode::InFlight);
}

#[tokio::test]
async fn status_refresh_failure_does_not_fail_the_update() {
    let server = fixtures::in_flight_server();
    let h = Harness::builder()
        .server(server.clone())
        .status(MockStatusSource::failing())
        .build();

    let result = h
        .service()
        .apply(
            server.id,
            ServerUpdate::new().with_request_status(labels::SUCCESS),
        )
        .await
        .unwrap();

    assert_eq!(result.request, RequestCode::Idle);
    assert_eq!(result.installed_version, None);
    assert_eq!(h.status.refresh_count(), 1);
}

#[tokio::test]
async fn status_label_wins_over_trigger() {
    let server = fixtures::in_flight_server();
    let h = Harness::with_server(server.clone());

    let update = ServerUpdate::new()
        .with_request(1)
        .with_request_status(labels::SUCCESS);
    let result = h.service().apply(server.id, update).await.unwrap();

    assert_eq!(result.request, RequestCode::Idle);
    assert!(h.runner.commands().is_empty());
}

#[tokio::test]
async fn hostname_update_leaves_request_fields_alone() {
    let mut server = fixtures::server();
    server.request_status = Some(labels::SUCCESS.to_string());
    server.request_result = Some(RequestResult::Ok);
    let h = Harness::with_server(server.clone());
    let mut events = h.subscribe();

    let result = h
        .service()
        .apply(
            server.id,
            ServerUpdate::new().with_hostname("newhost.example"),
        )
        .await
        .unwrap();

    assert_eq!(result.hostname, "newhost.example");
    assert_eq!(result.request, RequestCode::Idle);
    assert_eq!(result.request_status.as_deref(), Some(labels::SUCCESS));
    assert_eq!(result.request_status_updated_at, None);
    assert!(h.runner.commands().is_empty());
    assert!(events.drain().iter().all(|e| !e.is_status_change()));
}

#[tokio::test]
async fn blank_hostname_is_rejected() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());

    let err = h
        .service()
        .apply(server.id, ServerUpdate::new().with_hostname("   "))
        .await
        .unwrap_err();

    assert_eq!(
        err.field_errors().messages_for("hostname"),
        vec!["Hostname must be present"]
    );
    assert_eq!(h.stored(&server).hostname, HOSTNAME);
}

#[tokio::test]
async fn hostname_with_path_separator_is_rejected_before_dispatch() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());

    let update = ServerUpdate::new()
        .with_hostname("forum/../../etc.example.com")
        .with_request(1);
    let err = h.service().apply(server.id, update).await.unwrap_err();

    assert!(matches!(err, ApplyError::Validation(_)));
    assert!(err.field_errors().has("hostname"));
    assert!(h.runner.commands().is_empty());
    assert_eq!(h.stored(&server), server);
}

#[tokio::test]
async fn out_of_range_triggers_are_rejected() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());
    let svc = h.service();

    let err = svc
        .apply(server.id, ServerUpdate::new().with_request(-2))
        .await
        .unwrap_err();
    assert_eq!(
        err.field_errors().messages_for("request"),
        vec!["Valid values: 0..2"]
    );

    let err = svc
        .apply(server.id, ServerUpdate::new().with_request(3))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplyError::Dispatch(DispatchRejected::InvalidTrigger(3))
    ));
    assert_eq!(h.repo.update_count(), 0);
}

#[tokio::test]
async fn reset_clears_a_stuck_operation() {
    let server = fixtures::in_flight_server();
    let h = Harness::with_server(server.clone());
    let mut events = h.subscribe();

    let result = h
        .service()
        .apply(server.id, ServerUpdate::new().with_request(0))
        .await
        .unwrap();

    assert_eq!(result.request, RequestCode::Idle);
    assert!(h.runner.commands().is_empty());
    assert!(h.jobs.jobs().is_empty());
    assert!(events
        .drain()
        .iter()
        .all(|e| e.type_name() != "operation_dispatched"));
}

#[tokio::test]
async fn in_flight_marker_resubmission_is_a_no_op() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());

    let result = h
        .service()
        .apply(server.id, ServerUpdate::new().with_request(-1))
        .await
        .unwrap();

    assert_eq!(result.request, RequestCode::Idle);
    assert!(h.runner.commands().is_empty());
}

#[tokio::test]
async fn provision_trigger_queues_create_droplet() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());

    let result = h
        .service()
        .apply(server.id, ServerUpdate::new().with_request(2))
        .await
        .unwrap();

    assert_eq!(result.request, RequestCode::InFlight);
    assert_eq!(result.last_action.as_deref(), Some(PROVISION_ACTION));
    assert_eq!(
        h.jobs.jobs(),
        vec![Job::CreateDroplet {
            server_id: server.id
        }]
    );
    assert!(h.runner.commands().is_empty());
}

#[tokio::test]
async fn repeated_field_update_is_idempotent() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());
    let svc = h.service();
    let update = ServerUpdate::new().with_hostname("same.example.com");

    svc.apply(server.id, update.clone()).await.unwrap();
    let first = h.stored(&server);
    let second = svc.apply(server.id, update).await.unwrap();

    assert_eq!(second, first);
    assert_eq!(second.updated_at, first.updated_at);
}

#[tokio::test]
async fn only_supplied_credentials_are_probed() {
    let mut server = fixtures::server();
    server.set_credential(CredentialField::DoApiKey, Some("dop_v1_stored".into()));
    let h = Harness::with_server(server.clone());

    let update = ServerUpdate::new()
        .with_hostname("new.example.com")
        .with_credential(CredentialField::DiscourseApiKey, " abc123 ");
    let result = h.service().apply(server.id, update).await.unwrap();

    assert_eq!(
        h.gateway.calls(),
        vec![(
            CredentialField::DiscourseApiKey,
            "abc123".to_string(),
            "new.example.com".to_string()
        )]
    );
    assert_eq!(result.discourse_api_key.as_deref(), Some("abc123"));
    assert_eq!(result.do_api_key.as_deref(), Some("dop_v1_stored"));
    // Hostname and instance key changed, so the status cache was refreshed
    assert_eq!(h.status.refresh_count(), 1);
}

#[tokio::test]
async fn empty_credential_clears_without_probe() {
    let mut server = fixtures::server();
    server.set_credential(CredentialField::MgApiKey, Some("key-old".into()));
    let h = Harness::with_server(server.clone());

    let result = h
        .service()
        .apply(
            server.id,
            ServerUpdate::new().with_credential(CredentialField::MgApiKey, ""),
        )
        .await
        .unwrap();

    assert_eq!(result.mg_api_key, None);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn lost_race_is_a_conflict() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());
    h.repo.conflict_next_update();

    let err = h
        .service()
        .apply(server.id, ServerUpdate::new().with_request(1))
        .await
        .unwrap_err();

    assert!(matches!(err, ApplyError::Conflict(id) if id == server.id));
    assert!(h.runner.commands().is_empty());
}

#[tokio::test]
async fn failed_launch_restores_stored_entity() {
    let server = fixtures::server();
    let h = Harness::builder()
        .server(server.clone())
        .runner(RecordingRunner::broken())
        .build();

    let err = h
        .service()
        .apply(server.id, ServerUpdate::new().with_request(1))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApplyError::Dispatch(DispatchRejected::Launch(_))
    ));
    let stored = h.stored(&server);
    assert_eq!(stored.request, RequestCode::Idle);
    assert_eq!(stored.last_action, None);
    assert_eq!(stored.request_status, None);
}

#[tokio::test]
async fn failed_enqueue_restores_stored_entity() {
    let server = fixtures::server();
    let h = Harness::builder()
        .server(server.clone())
        .jobs(RecordingJobQueue::broken())
        .build();

    let err = h
        .service()
        .apply(server.id, ServerUpdate::new().with_request(2))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApplyError::Dispatch(DispatchRejected::Launch(_))
    ));
    assert_eq!(h.stored(&server).request, RequestCode::Idle);
}

#[tokio::test]
async fn missing_server_is_not_found() {
    let h = Harness::builder().build();
    let id = uuid::Uuid::new_v4();

    let err = h
        .service()
        .apply(id, ServerUpdate::new().with_request(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::NotFound(missing) if missing == id));
}

#[tokio::test]
async fn retrigger_after_terminal_label_dispatches_again() {
    let server = fixtures::server();
    let h = Harness::with_server(server.clone());
    let svc = h.service();

    svc.apply(server.id, ServerUpdate::new().with_request(1))
        .await
        .unwrap();
    let finished = svc
        .apply(
            server.id,
            ServerUpdate::new().with_request_status(labels::FAILED),
        )
        .await
        .unwrap();
    assert_eq!(finished.request, RequestCode::Idle);

    let again = svc
        .apply(server.id, ServerUpdate::new().with_request(1))
        .await
        .unwrap();

    assert_eq!(again.request, RequestCode::InFlight);
    assert_eq!(again.request_status.as_deref(), Some(labels::PROCESSING));
    assert_eq!(h.runner.commands().len(), 2);
    assert_eq!(h.stored(&server).request, RequestCode::InFlight);
}
