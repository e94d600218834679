//! End-to-end protocol flows through `SupervisorCore` over a scripted
//! transport.

#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use supervisor_link::channel::ConnectionState;
use supervisor_link::config::SupervisorConfig;
use supervisor_link::devices::{DeviceService, DevicesUpdaters, StateLogService};
use supervisor_link::error::SupervisorError;
use supervisor_link::supervisor::SupervisorCore;

use common::{Activity, ScriptedTransport};

const AUTH_REQUIRED: &str = r#"{"type":"auth_required","ha_version":"2024.6.0"}"#;
const AUTH_OK: &str = r#"{"type":"auth_ok","ha_version":"2024.6.0"}"#;

fn core(entities: &[&str]) -> Arc<SupervisorCore> {
    let mut config = SupervisorConfig::new("secret-token");
    config.endpoint = "ws://test/websocket".to_string();
    let service: Arc<dyn DeviceService> = Arc::new(StateLogService::new(
        entities.iter().map(|id| (*id).to_string()).collect(),
    ));
    let Ok(devices) = DevicesUpdaters::new([service]) else {
        panic!("registration failed");
    };
    let Ok(core) = SupervisorCore::new(&config, Arc::new(devices)) else {
        panic!("invalid configuration");
    };
    Arc::new(core)
}

fn start(
    core: &Arc<SupervisorCore>,
    transport: Arc<ScriptedTransport>,
) -> (
    CancellationToken,
    tokio::task::JoinHandle<Result<(), SupervisorError>>,
) {
    let cancel = CancellationToken::new();
    let task = {
        let core = Arc::clone(core);
        let cancel = cancel.clone();
        tokio::spawn(async move { core.run(transport, &cancel).await })
    };
    (cancel, task)
}

async fn finish(task: tokio::task::JoinHandle<Result<(), SupervisorError>>) {
    let Ok(result) = task.await else {
        panic!("run task panicked");
    };
    assert_ok!(result);
}

#[tokio::test]
async fn handshake_bootstraps_and_follows_state() {
    let (logs, _guard) = common::capture_logs();
    let (transport, mut activity) = ScriptedTransport::new();
    let server = transport.accept();
    let core = core(&["light.kitchen", "switch.fan"]);
    let (cancel, task) = start(&core, transport);

    assert_ok!(server.send(common::text(AUTH_REQUIRED)));
    assert!(matches!(
        common::next_activity(&mut activity).await,
        Activity::Connect { accepted: true, .. }
    ));
    assert_eq!(
        common::next_sent(&mut activity).await,
        json!({"type": "auth", "access_token": "secret-token"})
    );

    assert_ok!(server.send(common::text(AUTH_OK)));
    assert_eq!(
        common::next_sent(&mut activity).await,
        json!({"id": 1, "type": "get_states"})
    );

    assert_ok!(server.send(common::text(
        r#"{"id":1,"type":"result","success":true,"result":[
            {"entity_id":"light.kitchen","state":"on","attributes":{"brightness":255}},
            {"entity_id":"sun.sun","state":"above_horizon"},
            {"entity_id":"switch.fan","state":"off"}
        ]}"#
    )));
    assert_eq!(
        common::next_sent(&mut activity).await,
        json!({
            "id": 2,
            "type": "subscribe_trigger",
            "trigger": {"platform": "state", "entity_id": ["light.kitchen", "switch.fan"]}
        })
    );
    assert_eq!(logs.count(Level::INFO, "entity state"), 2);
    assert_eq!(logs.count(Level::WARN, "update for untracked entity sun.sun skipped"), 0);
    assert_eq!(core.pending_count(), 1);

    assert_ok!(server.send(common::text(r#"{"id":2,"type":"result","success":true,"result":null}"#)));
    assert_ok!(server.send(common::text(
        r#"{"id":2,"type":"event","event":{"variables":{"trigger":{
            "platform":"state","entity_id":"switch.fan",
            "from_state":{"entity_id":"switch.fan","state":"off"},
            "to_state":{"entity_id":"switch.fan","state":"on"}}},
            "context":{"id":"01H"}}}"#
    )));
    common::wait_until(|| logs.count(Level::INFO, "entity state") == 3).await;
    assert_eq!(core.pending_count(), 0);

    cancel.cancel();
    finish(task).await;
}

#[tokio::test]
async fn no_tracked_entities_skips_bootstrap() {
    let (logs, _guard) = common::capture_logs();
    let (transport, mut activity) = ScriptedTransport::new();
    let server = transport.accept();
    let core = core(&[]);
    let (cancel, task) = start(&core, transport);

    assert_ok!(server.send(common::text(AUTH_REQUIRED)));
    assert_ok!(server.send(common::text(AUTH_OK)));
    common::wait_until(|| logs.count(Level::INFO, "authenticated; no entities tracked") == 1).await;
    cancel.cancel();
    finish(task).await;

    let mut sent = Vec::new();
    while let Ok(next) = activity.try_recv() {
        if let Activity::Sent(text) = next {
            sent.push(text);
        }
    }
    assert_eq!(sent.len(), 1, "only auth expected, got {sent:?}");
    assert_eq!(core.pending_count(), 0);
}

#[tokio::test]
async fn rejected_credentials_stop_the_run() {
    let (logs, _guard) = common::capture_logs();
    let (transport, mut activity) = ScriptedTransport::new();
    let server = transport.accept();
    let core = core(&["light.kitchen"]);
    let (cancel, task) = start(&core, transport);

    assert_ok!(server.send(common::text(AUTH_REQUIRED)));
    assert_ok!(server.send(common::text(
        r#"{"type":"auth_invalid","message":"Invalid access token or password"}"#
    )));
    finish(task).await;

    assert!(!cancel.is_cancelled());
    assert_eq!(logs.count(Level::ERROR, "authentication rejected; stopping"), 1);
    assert_eq!(core.state(), ConnectionState::Idle);
    let mut closed = false;
    while let Ok(next) = activity.try_recv() {
        closed |= next == Activity::Closed("shutting down".to_string());
    }
    assert!(closed);
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_handshake() {
    let (transport, mut activity) = ScriptedTransport::new();
    let first = transport.accept();
    let second = transport.accept();
    let core = core(&["light.kitchen"]);
    let (cancel, task) = start(&core, transport);

    assert_ok!(first.send(common::text(AUTH_REQUIRED)));
    assert_ok!(first.send(common::text(AUTH_OK)));
    assert!(matches!(
        common::next_activity(&mut activity).await,
        Activity::Connect { accepted: true, .. }
    ));
    assert_eq!(common::next_sent(&mut activity).await.get("type"), Some(&json!("auth")));
    assert_eq!(
        common::next_sent(&mut activity).await,
        json!({"id": 1, "type": "get_states"})
    );
    drop(first);

    assert!(matches!(
        common::next_activity(&mut activity).await,
        Activity::Connect { accepted: true, .. }
    ));
    assert_ok!(second.send(common::text(AUTH_REQUIRED)));
    assert_ok!(second.send(common::text(AUTH_OK)));
    assert_eq!(common::next_sent(&mut activity).await.get("type"), Some(&json!("auth")));
    assert_eq!(
        common::next_sent(&mut activity).await,
        json!({"id": 2, "type": "get_states"})
    );
    assert_eq!(core.pending_count(), 1);
    assert!(!core.is_pending(1));

    cancel.cancel();
    finish(task).await;
}

#[tokio::test(start_paused = true)]
async fn pending_table_does_not_grow_across_outages() {
    let (transport, mut activity) = ScriptedTransport::new();
    let servers: Vec<_> = (0..5).map(|_| transport.accept()).collect();
    let core = core(&["light.kitchen"]);
    let (cancel, task) = start(&core, transport);

    for (round, server) in (1u64..).zip(servers) {
        assert!(matches!(
            common::next_activity(&mut activity).await,
            Activity::Connect { accepted: true, .. }
        ));
        assert_ok!(server.send(common::text(AUTH_REQUIRED)));
        assert_ok!(server.send(common::text(AUTH_OK)));
        assert_eq!(common::next_sent(&mut activity).await.get("type"), Some(&json!("auth")));
        assert_eq!(
            common::next_sent(&mut activity).await,
            json!({"id": round, "type": "get_states"})
        );
        assert_eq!(core.pending_count(), 1);
        drop(server);
    }

    cancel.cancel();
    finish(task).await;
    assert_eq!(core.pending_count(), 0);
}

#[tokio::test]
async fn concurrent_run_is_rejected() {
    let (transport, mut activity) = ScriptedTransport::new();
    let _server = transport.accept();
    let _spare = transport.accept();
    let core = core(&[]);
    let (cancel, task) = start(&core, Arc::clone(&transport));

    assert!(matches!(
        common::next_activity(&mut activity).await,
        Activity::Connect { accepted: true, .. }
    ));
    common::wait_until(|| core.state() == ConnectionState::Connected).await;

    let second = core.run(transport, &CancellationToken::new()).await;
    assert!(matches!(
        second,
        Err(SupervisorError::AlreadyRunning(ConnectionState::Connected))
    ));
    assert!(activity.try_recv().is_err());
    assert!(core.sender().is_connected());
    assert_eq!(core.state(), ConnectionState::Connected);

    cancel.cancel();
    finish(task).await;
    assert_eq!(core.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn duplicate_result_is_reported_not_replayed() {
    let (logs, _guard) = common::capture_logs();
    let (transport, mut activity) = ScriptedTransport::new();
    let server = transport.accept();
    let core = core(&["light.kitchen"]);
    let (cancel, task) = start(&core, transport);

    assert_ok!(server.send(common::text(AUTH_REQUIRED)));
    assert_ok!(server.send(common::text(AUTH_OK)));
    let states = r#"{"id":1,"type":"result","success":true,"result":[
        {"entity_id":"light.kitchen","state":"on"}
    ]}"#;
    assert_ok!(server.send(common::text(states)));
    assert_ok!(server.send(common::text(states)));
    common::wait_until(|| logs.count(Level::WARN, "result handler not exists") == 1).await;

    // auth, get_states, one subscribe_trigger
    let mut sent = Vec::new();
    while let Ok(next) = activity.try_recv() {
        if let Activity::Sent(text) = next {
            sent.push(text);
        }
    }
    assert_eq!(sent.len(), 3, "unexpected commands: {sent:?}");
    assert_eq!(logs.count(Level::INFO, "entity state"), 1);

    cancel.cancel();
    finish(task).await;
}

#[tokio::test]
async fn request_round_trip() {
    let (transport, mut activity) = ScriptedTransport::new();
    let server = transport.accept();
    let core = core(&[]);
    let (cancel, task) = start(&core, transport);

    assert!(matches!(
        common::next_activity(&mut activity).await,
        Activity::Connect { accepted: true, .. }
    ));
    common::wait_until(|| core.sender().is_connected()).await;

    let request = {
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            let mut fields = serde_json::Map::new();
            fields.insert("domain".to_string(), json!("light"));
            fields.insert("service".to_string(), json!("turn_on"));
            core.request("call_service", fields).await
        })
    };
    let sent = common::next_sent(&mut activity).await;
    assert_eq!(
        sent,
        json!({"id": 1, "type": "call_service", "domain": "light", "service": "turn_on"})
    );
    assert_ok!(server.send(common::text(
        r#"{"id":1,"type":"result","success":false,"error":{"code":"not_found","message":"Service not found."}}"#
    )));
    let Ok(result) = request.await else {
        panic!("request task panicked");
    };
    assert!(matches!(result, Err(SupervisorError::CommandFailed { id: 1, .. })));

    cancel.cancel();
    finish(task).await;
}
