use std::sync::atomic::Ordering;
use std::time::Duration;

use gateway_types::wire::{Response, UnauthorizedNotice, UpgradeNotice};
use serde_json::json;

mod setup;

use setup::{
    TestGateway, admin_token, find_all_request, frame_request, test_config, test_token,
    test_workspace, tx_request, unframe_response, upgrade_token,
};

#[tokio::test]
async fn connect_find_all_and_close_evicts_the_session() {
    let gateway = TestGateway::start().await;
    let workspace = test_workspace("acme");
    let token = test_token(workspace.clone(), "alice@example.com");

    let mut websocket = gateway
        .server
        .get_websocket(&gateway.handshake_path(&token, &Default::default()))
        .await
        .into_websocket()
        .await;

    websocket.send_text(frame_request(&find_all_request(1, "widgets"))).await;
    let response = unframe_response(&websocket.receive_text().await);
    assert_eq!(response.result, Some(json!({ "class": "widgets", "echoed": {} })));
    assert_eq!(gateway.pipeline_factory.construction_count.load(Ordering::SeqCst), 1);

    drop(websocket);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stats = gateway.server.get("/api/v1/statistics").await;
    let body: serde_json::Value = stats.json();
    assert_eq!(body["sessionCount"], json!(0));
}

#[tokio::test]
async fn tx_broadcasts_to_peers_but_not_the_originator() {
    let gateway = TestGateway::start().await;
    let workspace = test_workspace("acme");
    let token_a = test_token(workspace.clone(), "alice@example.com");
    let token_b = test_token(workspace.clone(), "bob@example.com");
    let empty = Default::default();

    let mut a = gateway
        .server
        .get_websocket(&gateway.handshake_path(&token_a, &empty))
        .await
        .into_websocket()
        .await;
    let mut b = gateway
        .server
        .get_websocket(&gateway.handshake_path(&token_b, &empty))
        .await
        .into_websocket()
        .await;

    assert_eq!(gateway.pipeline_factory.construction_count.load(Ordering::SeqCst), 1);

    let record = json!({ "id": 1, "name": "widget" });
    a.send_text(frame_request(&tx_request(1, "widgets", record.clone()))).await;

    let ack = unframe_response(&a.receive_text().await);
    assert_eq!(ack.id, gateway_types::wire::RequestId::Number(1));

    let broadcast = unframe_response(&b.receive_text().await);
    assert_eq!(broadcast.result, Some(json!({ "class": "widgets", "record": record })));

    a.send_text(frame_request(&find_all_request(2, "ping-check"))).await;
    let _ = unframe_response(&a.receive_text().await);
}

#[tokio::test]
async fn force_close_evicts_sessions_and_lets_an_upgrade_client_reattach() {
    let gateway = TestGateway::start().await;
    let workspace = test_workspace("acme");
    let non_upgrade_token = test_token(workspace.clone(), "alice@example.com");
    let upgrade_token = upgrade_token(workspace.clone(), "bot@example.com");
    let admin = admin_token(workspace.clone(), "root@example.com");
    let empty = Default::default();

    let _client = gateway
        .server
        .get_websocket(&gateway.handshake_path(&non_upgrade_token, &empty))
        .await
        .into_websocket()
        .await;

    // force-close with no upgrade-role resident attached tears the
    // workspace down outright, same as a shutdown.
    let manage_path = format!(
        "/api/v1/manage?token={}&operation=force-close&workspace={}",
        setup::encode_token(&admin),
        workspace.canonical()
    );
    gateway.server.put(&manage_path).await.assert_status_ok();

    let stats = gateway.server.get("/api/v1/statistics").await;
    let body: serde_json::Value = stats.json();
    assert_eq!(body["workspaceCount"], json!(0));

    let mut replacement = gateway
        .server
        .get_websocket(&gateway.handshake_path(&upgrade_token, &empty))
        .await
        .into_websocket()
        .await;
    replacement.send_text(frame_request(&find_all_request(1, "widgets"))).await;
    let response = unframe_response(&replacement.receive_text().await);
    assert!(response.error.is_none(), "upgrade client should attach cleanly");
    assert_eq!(gateway.pipeline_factory.construction_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_upgrade_client_is_refused_while_a_workspace_is_upgrading() {
    let gateway = TestGateway::start().await;
    let workspace = test_workspace("acme");
    let resident = upgrade_token(workspace.clone(), "bot@example.com");
    let admin = admin_token(workspace.clone(), "root@example.com");
    let latecomer = test_token(workspace.clone(), "carol@example.com");
    let empty = Default::default();

    let _resident = gateway
        .server
        .get_websocket(&gateway.handshake_path(&resident, &empty))
        .await
        .into_websocket()
        .await;

    let manage_path = format!(
        "/api/v1/manage?token={}&operation=force-close&workspace={}",
        setup::encode_token(&admin),
        workspace.canonical()
    );
    gateway.server.put(&manage_path).await.assert_status_ok();

    let mut blocked = gateway
        .server
        .get_websocket(&gateway.handshake_path(&latecomer, &empty))
        .await
        .into_websocket()
        .await;
    let notice: UpgradeNotice = blocked.receive_json().await;
    assert!(notice.upgrade);
}

#[tokio::test]
async fn schedule_maintenance_warns_then_closes_every_session() {
    let mut config = test_config();
    config.stats_tick_interval = Duration::from_millis(50);
    let gateway = TestGateway::start_with_config(config).await;
    let workspace = test_workspace("acme");
    let token = test_token(workspace.clone(), "alice@example.com");
    let admin = admin_token(workspace.clone(), "root@example.com");
    let empty = Default::default();

    let mut client = gateway
        .server
        .get_websocket(&gateway.handshake_path(&token, &empty))
        .await
        .into_websocket()
        .await;

    let manage_path = format!(
        "/api/v1/manage?token={}&operation=maintenance&minutes=1",
        setup::encode_token(&admin)
    );
    gateway.server.put(&manage_path).await.assert_status_ok();

    // The maintenance countdown rides the same broadcast path as a
    // pipeline's own changes, so it is flag-byte framed like any other
    // response rather than sent as a bare notice.
    let notice = unframe_response(&client.receive_text().await);
    assert_eq!(notice.result, Some(json!({ "state": "maintenance", "remaining": 1 })));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let stats = gateway.server.get("/api/v1/statistics").await;
    let body: serde_json::Value = stats.json();
    assert_eq!(body["workspaceCount"], json!(0));
}

#[tokio::test]
async fn bad_token_is_rejected_with_a_single_unauthorized_frame() {
    use base64::Engine as _;

    let gateway = TestGateway::start().await;
    let garbage = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"this is not a token");

    let mut websocket = gateway
        .server
        .get_websocket(&format!("/{garbage}"))
        .await
        .into_websocket()
        .await;

    let notice: UnauthorizedNotice = websocket.receive_json().await;
    assert_eq!(notice.error, "UNAUTHORIZED");
    assert_eq!(gateway.pipeline_factory.construction_count.load(Ordering::SeqCst), 0);

    let stats = gateway.server.get("/api/v1/statistics").await;
    let body: serde_json::Value = stats.json();
    assert_eq!(body["workspaceCount"], json!(0));
}

#[tokio::test]
async fn wipe_statistics_zeroes_counters_without_disturbing_the_registry() {
    let gateway = TestGateway::start().await;
    let workspace = test_workspace("acme");
    let token = test_token(workspace.clone(), "alice@example.com");
    let admin = admin_token(workspace.clone(), "root@example.com");
    let empty = Default::default();

    let mut websocket = gateway
        .server
        .get_websocket(&gateway.handshake_path(&token, &empty))
        .await
        .into_websocket()
        .await;
    websocket.send_text(frame_request(&find_all_request(1, "widgets"))).await;
    let _: Response = unframe_response(&websocket.receive_text().await);

    let wipe_path = format!(
        "/api/v1/manage?token={}&operation=wipe-statistics",
        setup::encode_token(&admin)
    );
    gateway.server.put(&wipe_path).await.assert_status_ok();

    websocket.send_text(frame_request(&find_all_request(2, "widgets"))).await;
    let response = unframe_response(&websocket.receive_text().await);
    assert!(response.error.is_none(), "a request right after wiping statistics still succeeds");

    let stats = gateway.server.get("/api/v1/statistics").await;
    let body: serde_json::Value = stats.json();
    assert_eq!(body["sessionCount"], json!(1), "wiping statistics does not evict sessions");
}
