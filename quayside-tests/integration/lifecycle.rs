//! Embedder lifecycle contract: hook ordering, rejection, and teardown

use quayside_core::rdp::RdpError;
use quayside_core::rdp::protocol::share::DataPduType;

use super::client::{self, EventLog, TestHandler, drive, scripted_peer};

#[tokio::test]
async fn test_rejecting_post_connect_terminates_before_activate() {
    let log = EventLog::default();
    let mut handler = TestHandler::new(log.clone());
    handler.post_connect_ok = false;
    let (mut peer, handle) = scripted_peer(handler);

    client::handshake_to_active(&mut peer, &handle).await;
    let share_id = peer.context().unwrap().settings().share_id;

    let result = drive(
        &mut peer,
        &handle,
        client::share_data(share_id, DataPduType::FontList, &client::font_list_body()),
    )
    .await;

    assert!(matches!(
        result,
        Err(RdpError::CallbackRejected {
            callback: "post_connect"
        })
    ));
    assert_eq!(log.count("post_connect"), 1);
    assert_eq!(log.count("activate"), 0);
}

#[tokio::test]
async fn test_rejecting_activate_terminates_the_session() {
    let log = EventLog::default();
    let mut handler = TestHandler::new(log.clone());
    handler.activate_ok = false;
    let (mut peer, handle) = scripted_peer(handler);

    client::handshake_to_active(&mut peer, &handle).await;
    let share_id = peer.context().unwrap().settings().share_id;

    let result = drive(
        &mut peer,
        &handle,
        client::share_data(share_id, DataPduType::FontList, &client::font_list_body()),
    )
    .await;

    assert!(matches!(
        result,
        Err(RdpError::CallbackRejected {
            callback: "activate"
        })
    ));
    assert_eq!(log.count("post_connect"), 1);
    assert_eq!(log.count("activate"), 1);
}

#[tokio::test]
async fn test_disconnect_is_idempotent_at_every_lifecycle_point() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    // Before the context exists.
    peer.disconnect();
    peer.disconnect();

    peer.context_new().unwrap();
    peer.initialize().unwrap();

    peer.disconnect();
    peer.disconnect();
    assert!(!handle.is_connected());

    // Driving a disconnected peer reports the transport as gone.
    let result = peer.check_fds().await;
    assert!(matches!(result, Err(RdpError::Disconnected)));
}

#[tokio::test]
async fn test_check_fds_without_context_is_not_connected() {
    let log = EventLog::default();
    let (mut peer, _handle) = scripted_peer(TestHandler::new(log));

    let result = peer.check_fds().await;
    assert!(matches!(result, Err(RdpError::NotConnected)));
}

#[tokio::test]
async fn test_context_free_hook_runs_exactly_once() {
    let log = EventLog::default();
    let (mut peer, _handle) = scripted_peer(TestHandler::new(log.clone()));

    peer.context_new().unwrap();
    peer.context_free();
    drop(peer);

    assert_eq!(log.count("context_free"), 1);
}

#[tokio::test]
async fn test_dropping_an_active_peer_frees_the_context() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log.clone()));

    client::activate_session(&mut peer, &handle).await;
    drop(peer);

    assert_eq!(log.count("context_free"), 1);
}
