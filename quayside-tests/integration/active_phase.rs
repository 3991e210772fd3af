//! Active-phase demultiplexing: framing discrimination and data PDU dispatch

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use quayside_core::rdp::protocol::share::DataPduType;
use quayside_core::rdp::{InputHandler, RdpError};
use quayside_core::ConnectionState;

use super::client::{self, EventLog, TestHandler, drive, scripted_peer, send_data_request};

#[tokio::test]
async fn test_shutdown_request_emits_ultimatum_and_terminates() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    client::activate_session(&mut peer, &handle).await;
    let share_id = peer.context().unwrap().settings().share_id;
    let frames_before = handle.sent_frames().len();

    let result = drive(
        &mut peer,
        &handle,
        client::share_data(share_id, DataPduType::ShutdownRequest, &[]),
    )
    .await;

    assert!(matches!(result, Err(RdpError::ShutdownRequested)));
    assert!(result.unwrap_err().is_clean_shutdown());

    let sent = handle.sent_frames();
    assert_eq!(sent.len(), frames_before + 1);
    assert_eq!(
        sent.last().unwrap().as_ref(),
        &[3, 0, 0, 9, 2, 0xF0, 0x80, 0x21, 0x80]
    );
}

#[tokio::test]
async fn test_unknown_data_pdu_is_ignored() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log.clone()));

    client::activate_session(&mut peer, &handle).await;
    let share_id = peer.context().unwrap().settings().share_id;
    let events_before = log.events().len();

    drive(
        &mut peer,
        &handle,
        client::share_data(share_id, DataPduType::Unknown(0xEE), &[1, 2, 3, 4]),
    )
    .await
    .unwrap();

    assert_eq!(peer.context().unwrap().state(), ConnectionState::Active);
    assert_eq!(log.events().len(), events_before);
}

#[tokio::test]
async fn test_bitmap_cache_persistent_list_is_consumed_quietly() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    client::activate_session(&mut peer, &handle).await;
    let share_id = peer.context().unwrap().settings().share_id;
    let frames_before = handle.sent_frames().len();

    drive(
        &mut peer,
        &handle,
        client::share_data(
            share_id,
            DataPduType::BitmapCachePersistentList,
            &[0u8; 24],
        ),
    )
    .await
    .unwrap();

    assert_eq!(peer.context().unwrap().state(), ConnectionState::Active);
    // Consumed without a reply.
    assert_eq!(handle.sent_frames().len(), frames_before);
}

#[tokio::test]
async fn test_non_global_channel_data_is_dropped_without_error() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    client::activate_session(&mut peer, &handle).await;

    drive(
        &mut peer,
        &handle,
        send_data_request(1007, &[0xDE, 0xAD, 0xBE, 0xEF]),
    )
    .await
    .unwrap();

    assert_eq!(peer.context().unwrap().state(), ConnectionState::Active);
}

#[tokio::test]
async fn test_stream_that_is_neither_tpkt_nor_fastpath_fails() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    client::activate_session(&mut peer, &handle).await;

    // First byte is not a TPKT version, so the demultiplexer routes to
    // fast-path, where the length check fails.
    let result = drive(&mut peer, &handle, Bytes::from_static(&[0x48, 0x00])).await;
    assert!(matches!(result, Err(RdpError::Framing { .. })));
}

#[tokio::test]
async fn test_fastpath_input_reaches_the_input_handler() {
    #[derive(Default)]
    struct MouseLog(Arc<Mutex<Vec<(u16, u16)>>>);

    impl InputHandler for MouseLog {
        fn mouse_event(&mut self, _pointer_flags: u16, x: u16, y: u16) {
            self.0.lock().unwrap().push((x, y));
        }
    }

    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));
    client::activate_session(&mut peer, &handle).await;

    let positions = Arc::new(Mutex::new(Vec::new()));
    peer.context_mut()
        .unwrap()
        .input()
        .set_handler(Box::new(MouseLog(positions.clone())));

    drive(&mut peer, &handle, client::fastpath_mouse(320, 240))
        .await
        .unwrap();
    drive(&mut peer, &handle, client::fastpath_mouse(321, 241))
        .await
        .unwrap();

    assert_eq!(positions.lock().unwrap().as_slice(), [(320, 240), (321, 241)]);
    assert_eq!(peer.context().unwrap().state(), ConnectionState::Active);
}

#[tokio::test]
async fn test_oversized_fastpath_length_fails() {
    let log = EventLog::default();
    let (mut peer, handle) = scripted_peer(TestHandler::new(log));

    client::activate_session(&mut peer, &handle).await;

    // Header claims 32 bytes but only 2 follow.
    let result = drive(&mut peer, &handle, Bytes::from_static(&[0x04, 32, 0, 0])).await;
    assert!(matches!(result, Err(RdpError::Framing { .. })));
}
