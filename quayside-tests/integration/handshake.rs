//! Connection-phase progression: the handshake from first byte to active

use quayside_core::ConnectionState;
use quayside_core::rdp::protocol::share::DataPduType;
use quayside_core::rdp::{LicenseState, MCS_GLOBAL_CHANNEL_ID};

use super::client::{
    self, CLIENT_USER_ID, EventLog, TestHandler, drive, handshake_to_active, scripted_peer,
};

fn state(peer: &quayside_core::RdpPeer) -> ConnectionState {
    peer.context().unwrap().state()
}

#[tokio::test]
async fn test_handshake_advances_through_every_phase() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log.clone()));

    peer.context_new().unwrap();
    peer.initialize().unwrap();
    assert_eq!(state(&peer), ConnectionState::Initial);

    drive(&mut peer, &handle, client::connection_request())
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::Nego);

    drive(&mut peer, &handle, client::mcs_connect_initial())
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::McsConnect);

    drive(&mut peer, &handle, client::erect_domain())
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::McsErectDomain);

    drive(&mut peer, &handle, client::attach_user())
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::McsAttachUser);

    drive(&mut peer, &handle, client::channel_join(CLIENT_USER_ID))
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::McsAttachUser);

    drive(&mut peer, &handle, client::channel_join(MCS_GLOBAL_CHANNEL_ID))
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::McsChannelJoin);

    drive(&mut peer, &handle, client::client_info("CORP", "alice"))
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::License);
    assert_eq!(
        peer.context().unwrap().license_state(),
        LicenseState::Completed
    );

    let share_id = peer.context().unwrap().settings().share_id;
    drive(&mut peer, &handle, client::confirm_active(share_id, 1280, 720))
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::Active);

    // No lifecycle hook fires before the font list completes activation.
    assert_eq!(log.events(), ["context_new"]);
}

#[tokio::test]
async fn test_happy_path_fires_post_connect_once_and_activate_once() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log.clone()));

    client::activate_session(&mut peer, &handle).await;

    assert_eq!(state(&peer), ConnectionState::Active);
    assert_eq!(log.count("post_connect"), 1);
    assert_eq!(log.count("activate"), 1);
    assert_eq!(
        log.events(),
        ["context_new", "post_connect", "activate"]
    );
}

#[tokio::test]
async fn test_handshake_responses_flow_in_order() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    client::activate_session(&mut peer, &handle).await;

    // Connection confirm, MCS connect response, attach-user confirm, two
    // channel-join confirms, license packet, demand-active, synchronize,
    // cooperate, granted control, font map.
    let sent = handle.sent_frames();
    assert_eq!(sent.len(), 11);

    // The connection confirm is the only raw X.224 CC on the wire.
    assert_eq!(sent[0][5], 0xD0);
    // Everything afterwards is TPKT-framed.
    for frame in &sent {
        assert_eq!(frame[0], 3);
    }
}

#[tokio::test]
async fn test_client_identity_lands_in_settings() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    handshake_to_active(&mut peer, &handle).await;

    let settings = peer.context().unwrap().settings();
    assert_eq!(settings.client_domain.as_deref(), Some("CORP"));
    assert_eq!(settings.client_username.as_deref(), Some("alice"));
    // Confirm-Active committed the client's geometry.
    assert_eq!(settings.desktop_width, 1280);
    assert_eq!(settings.desktop_height, 720);
    assert_eq!(settings.color_depth, 32);
}

#[tokio::test]
async fn test_server_mode_holds_from_initialize_onward() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    client::activate_session(&mut peer, &handle).await;
    assert!(peer.context().unwrap().settings().server_mode);
}

#[tokio::test]
async fn test_reactivation_fires_activate_but_not_post_connect() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log.clone()));

    client::activate_session(&mut peer, &handle).await;
    assert_eq!(log.count("activate"), 1);

    peer.reactivate().unwrap();
    assert_eq!(state(&peer), ConnectionState::License);

    let share_id = peer.context().unwrap().settings().share_id;
    drive(&mut peer, &handle, client::confirm_active(share_id, 1280, 720))
        .await
        .unwrap();
    assert_eq!(state(&peer), ConnectionState::Active);

    drive(
        &mut peer,
        &handle,
        client::share_data(share_id, DataPduType::FontList, &client::font_list_body()),
    )
    .await
    .unwrap();

    assert_eq!(log.count("activate"), 2);
    assert_eq!(log.count("post_connect"), 1);
}

#[tokio::test]
async fn test_malformed_connection_request_is_fatal() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    peer.context_new().unwrap();
    peer.initialize().unwrap();

    // A data TPDU where a connection request belongs.
    let result = drive(&mut peer, &handle, client::erect_domain()).await;
    assert!(result.is_err());
}
