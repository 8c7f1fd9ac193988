//! Inbound routing: frames become received records and peer updates, with
//! dedup and tactical sniffing on the way in.

mod common;

use common::MockLink;
use meshtac::config::Config;
use meshtac::cot::CotEvent;
use meshtac::queue::{DeliveryQueueBuilder, MessageKind};
use meshtac::service::MeshService;
use meshtac::transport::{Frame, RadioClient};
use tempfile::tempdir;

fn service_with_mock(tmp: &tempfile::TempDir) -> MeshService {
    let (link, _) = MockLink::new();
    let client = RadioClient::new(Box::new(link), 42);
    let queue = DeliveryQueueBuilder::new(tmp.path().join("queue")).open().unwrap();
    MeshService::new(client, queue, &Config::default())
}

#[tokio::test]
async fn chat_text_is_stored_once() {
    let tmp = tempdir().unwrap();
    let service = service_with_mock(&tmp);

    let frame = Frame::text(7, "hello from the field");
    service.ingest_frame(&frame);
    service.ingest_frame(&frame); // duplicate delivery

    let received = service.queue().list_received().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].from_peer, "ID-00000007");
    assert_eq!(received[0].kind, MessageKind::Text);
    assert!(!received[0].is_tactical_event);
    assert!(!received[0].read);
}

#[tokio::test]
async fn cot_xml_is_flagged_tactical() {
    let tmp = tempdir().unwrap();
    let service = service_with_mock(&tmp);

    let xml = CotEvent::new("T-9", "a-h-G-U-C", 47.0, 8.0).to_xml();
    service.ingest_frame(&Frame::text(7, xml));

    let received = service.queue().list_received().unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].is_tactical_event);
}

#[tokio::test]
async fn position_frames_update_the_peer_store() {
    let tmp = tempdir().unwrap();
    let service = service_with_mock(&tmp);

    service.ingest_frame(&Frame::position(7, 47.39, 8.4, 500.0));

    let peer = service.queue().get_peer("ID-00000007").unwrap().unwrap();
    assert!((peer.lat.unwrap() - 47.39).abs() < 1e-4);
    assert!((peer.lon.unwrap() - 8.4).abs() < 1e-4);
    assert!((peer.alt.unwrap() - 500.0).abs() < 1e-4);
    // The raw report is also kept in the received store.
    assert_eq!(service.queue().stats().unwrap().received_count, 1);
}

#[tokio::test]
async fn no_fix_positions_do_not_pollute_the_peer_store() {
    let tmp = tempdir().unwrap();
    let service = service_with_mock(&tmp);

    service.ingest_frame(&Frame::position(7, 0.0, 0.0, 0.0));
    assert!(service.queue().get_peer("ID-00000007").unwrap().is_none());
}

#[tokio::test]
async fn peer_info_names_merge_with_positions() {
    let tmp = tempdir().unwrap();
    let service = service_with_mock(&tmp);

    service.ingest_frame(&Frame::position(7, 47.39, 8.4, 500.0));
    service.ingest_frame(&Frame::peer_info(7, "Bravo-2"));

    let peer = service.queue().get_peer("ID-00000007").unwrap().unwrap();
    assert_eq!(peer.name, "Bravo-2");
    assert!(peer.lat.is_some());
    assert_eq!(service.queue().stats().unwrap().peer_count, 1);
}

#[tokio::test]
async fn distinct_frames_from_one_peer_all_land() {
    let tmp = tempdir().unwrap();
    let service = service_with_mock(&tmp);

    service.ingest_frame(&Frame::text(7, "first"));
    service.ingest_frame(&Frame::text(7, "second"));
    service.ingest_frame(&Frame::text(8, "first"));

    assert_eq!(service.queue().stats().unwrap().received_count, 3);
}
