//! Registration, version policing, and duplicate-name behaviour of the
//! component proxy fabric, exercised without any real sockets.

use std::sync::Arc;

use bytes::BytesMut;
use seeker_contracts::{
    ComponentContract, FrameCodec, InboundFrame, Intrinsics, MessageCode,
    MessageHeader, OutboundFrame,
};
use seeker_model::{ActivityId, ComponentKind, WireTimestamp};
use seeker_server::manager::{ComponentManager, DuplicateNamePolicy, ManagerNotice};
use seeker_server::proxy::{ComponentProxy, DetectorProxy, ManagedProxy};
use seeker_server::site::EXPECTED_INTERFACE_VERSION;
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;

fn detector_proxy() -> (DetectorProxy, mpsc::Receiver<OutboundFrame>) {
    let (inner, outbound_rx) = ComponentProxy::new(
        ComponentKind::Detector,
        "dxhost",
        EXPECTED_INTERFACE_VERSION,
    );
    (DetectorProxy::from_inner(inner), outbound_rx)
}

fn intrinsics_frame(name: &str, version: &str) -> InboundFrame {
    let intrinsics = Intrinsics {
        kind: ComponentKind::Detector,
        name: name.to_string(),
        interface_version: version.to_string(),
        host: "dxhost".to_string(),
        capabilities: "bandwidth 2.1 MHz".to_string(),
    };
    let body = intrinsics.pack();
    InboundFrame {
        header: MessageHeader {
            code: MessageCode::Intrinsics,
            activity_id: ActivityId::NONE,
            message_number: 1,
            timestamp: WireTimestamp::default(),
            data_length: body.len() as u32,
        },
        body,
    }
}

async fn register_with_intrinsics(
    manager: &ComponentManager<DetectorProxy>,
    name: &str,
    version: &str,
) -> (DetectorProxy, mpsc::Receiver<OutboundFrame>) {
    let (proxy, outbound_rx) = detector_proxy();
    manager.register_proxy(proxy.clone()).await;
    proxy
        .inner()
        .handle_inbound(intrinsics_frame(name, version), manager)
        .await;
    (proxy, outbound_rx)
}

#[tokio::test]
async fn registration_completes_after_good_intrinsics() {
    let manager = ComponentManager::<DetectorProxy>::new("dx", DuplicateNamePolicy::RejectNew);
    let mut notices = manager.subscribe();

    let (proxy, mut outbound) =
        register_with_intrinsics(&manager, "dx1", EXPECTED_INTERFACE_VERSION).await;

    assert_eq!(manager.number_of_proxies(), 1);
    assert_eq!(manager.names_of_proxies(), "dx1");
    assert_eq!(proxy.name(), "dx1");
    assert!(proxy.valid_interface_version());

    // The handshake asked for intrinsics, then for status.
    let first = outbound.recv().await.unwrap();
    assert_eq!(first.header.code, MessageCode::RequestIntrinsics);
    let second = outbound.recv().await.unwrap();
    assert_eq!(second.header.code, MessageCode::RequestStatus);

    // Subscribers heard about the registration.
    let mut saw_registered = false;
    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, ManagerNotice::Registered { ref name } if name == "dx1") {
            saw_registered = true;
        }
    }
    assert!(saw_registered);
}

#[tokio::test]
async fn version_mismatch_rejects_without_registration() {
    // Scenario: a proxy reports the wrong interface version. Expected:
    // shutdown sent, socket reset, no registration, size unchanged.
    let manager = ComponentManager::<DetectorProxy>::new("dx", DuplicateNamePolicy::RejectNew);
    let mut notices = manager.subscribe();

    let (proxy, mut outbound) = register_with_intrinsics(&manager, "dx1", "0.9-ancient").await;

    assert_eq!(manager.number_of_proxies(), 0);
    assert!(!proxy.valid_interface_version());

    // First the intrinsics request from register, then the shutdown from
    // the rejection.
    let mut codes = Vec::new();
    while let Ok(frame) = outbound.try_recv() {
        codes.push(frame.header.code);
    }
    assert!(codes.contains(&MessageCode::RequestIntrinsics));
    assert!(codes.contains(&MessageCode::Shutdown));
    assert!(!codes.contains(&MessageCode::RequestStatus));

    // No Registered notice fired.
    while let Ok(notice) = notices.try_recv() {
        assert!(
            !matches!(notice, ManagerNotice::Registered { .. }),
            "rejected proxy must not register"
        );
    }
}

#[tokio::test]
async fn duplicate_name_reject_new_keeps_the_incumbent() {
    let manager = ComponentManager::<DetectorProxy>::new("dx", DuplicateNamePolicy::RejectNew);

    let (first, _first_outbound) =
        register_with_intrinsics(&manager, "dx1", EXPECTED_INTERFACE_VERSION).await;
    let (_second, mut second_outbound) =
        register_with_intrinsics(&manager, "dx1", EXPECTED_INTERFACE_VERSION).await;

    assert_eq!(manager.number_of_proxies(), 1);
    let registered = manager.find_by_name("dx1").unwrap();
    assert_eq!(registered.inner().id(), first.inner().id());

    // The newcomer got a shutdown.
    let mut codes = Vec::new();
    while let Ok(frame) = second_outbound.try_recv() {
        codes.push(frame.header.code);
    }
    assert!(codes.contains(&MessageCode::Shutdown));
}

#[tokio::test]
async fn duplicate_name_discard_old_replaces_the_incumbent() {
    let manager =
        ComponentManager::<DetectorProxy>::new("dx", DuplicateNamePolicy::DiscardOld);

    let (first, mut first_outbound) =
        register_with_intrinsics(&manager, "dx1", EXPECTED_INTERFACE_VERSION).await;
    let (second, _second_outbound) =
        register_with_intrinsics(&manager, "dx1", EXPECTED_INTERFACE_VERSION).await;

    assert_eq!(manager.number_of_proxies(), 1);
    let registered = manager.find_by_name("dx1").unwrap();
    assert_eq!(registered.inner().id(), second.inner().id());
    assert_ne!(registered.inner().id(), first.inner().id());

    let mut codes = Vec::new();
    while let Ok(frame) = first_outbound.try_recv() {
        codes.push(frame.header.code);
    }
    assert!(codes.contains(&MessageCode::Shutdown));
}

#[tokio::test]
async fn registered_count_matches_register_minus_unregister_minus_rejected() {
    let manager = ComponentManager::<DetectorProxy>::new("dx", DuplicateNamePolicy::RejectNew);

    let mut proxies = Vec::new();
    for index in 0..12 {
        let (proxy, rx) = register_with_intrinsics(
            &manager,
            &format!("dx{index}"),
            EXPECTED_INTERFACE_VERSION,
        )
        .await;
        proxies.push((proxy, rx));
    }
    // Three duplicates rejected, two bad versions rejected.
    for index in 0..3 {
        let _ = register_with_intrinsics(
            &manager,
            &format!("dx{index}"),
            EXPECTED_INTERFACE_VERSION,
        )
        .await;
    }
    for _ in 0..2 {
        let _ = register_with_intrinsics(&manager, "dx-bad", "0.0").await;
    }
    // Four unregister.
    for (proxy, _) in proxies.drain(0..4) {
        manager.unregister_proxy(&proxy);
    }

    // 12 registered - 4 unregistered - 5 rejected-at-handshake (never
    // counted) = 8.
    assert_eq!(manager.number_of_proxies(), 8);

    // No two registered proxies share a name.
    let names = manager.names_of_proxies();
    let mut split: Vec<&str> = names.split_whitespace().collect();
    let before = split.len();
    split.dedup();
    assert_eq!(before, split.len());
}

#[tokio::test]
async fn allocation_is_exclusive_until_release() {
    let manager = ComponentManager::<DetectorProxy>::new("dx", DuplicateNamePolicy::RejectNew);
    let mut keep = Vec::new();
    for index in 0..3 {
        keep.push(
            register_with_intrinsics(
                &manager,
                &format!("dx{index}"),
                EXPECTED_INTERFACE_VERSION,
            )
            .await,
        );
    }

    let first = manager.allocate_proxy_list();
    assert_eq!(first.len(), 3);
    // Everything is allocated; a second taker gets nothing.
    assert!(manager.allocate_proxy_list().is_empty());

    manager.release_proxy_list(&first);
    assert_eq!(manager.allocate_proxy_list().len(), 3);
}

#[tokio::test]
async fn out_of_sequence_messages_resync_without_dropping() {
    let manager = ComponentManager::<DetectorProxy>::new("dx", DuplicateNamePolicy::RejectNew);
    let (proxy, _outbound) =
        register_with_intrinsics(&manager, "dx1", EXPECTED_INTERFACE_VERSION).await;

    // Deliver a status frame with a wildly wrong message number; the
    // connection stays up and the cache still updates.
    let status = seeker_contracts::StatusReport {
        kind: ComponentKind::Detector,
        name: "dx1".to_string(),
        detail: "tuned 1420.05 MHz".to_string(),
    };
    let body = status.pack();
    let frame = InboundFrame {
        header: MessageHeader {
            code: MessageCode::Status,
            activity_id: ActivityId::NONE,
            message_number: 999,
            timestamp: WireTimestamp::default(),
            data_length: body.len() as u32,
        },
        body,
    };
    proxy.inner().handle_inbound(frame, &manager).await;

    assert_eq!(manager.number_of_proxies(), 1);
    let cached = proxy.cached_status().unwrap();
    assert!(cached.detail.contains("1420.05"));
}

#[test]
fn frames_survive_an_encode_decode_cycle_byte_for_byte() {
    use tokio_util::codec::Decoder;

    let mut codec = FrameCodec::default();
    let intrinsics = Intrinsics {
        kind: ComponentKind::Detector,
        name: "dx1".to_string(),
        interface_version: EXPECTED_INTERFACE_VERSION.to_string(),
        host: "dxhost".to_string(),
        capabilities: "bandwidth 2.1 MHz".to_string(),
    };
    let frame = OutboundFrame {
        header: MessageHeader::new(MessageCode::Intrinsics, ActivityId(5)),
        body: intrinsics.pack(),
    };

    let mut wire = BytesMut::new();
    codec.encode(frame, &mut wire).unwrap();
    let first_pass_wire = wire.clone();

    let decoded = codec.decode(&mut wire).unwrap().unwrap();
    let reencoded_frame = OutboundFrame {
        header: decoded.header,
        body: Intrinsics::unpack(decoded.body).unwrap().pack(),
    };
    let mut wire2 = BytesMut::new();
    FrameCodec::default()
        .encode(reencoded_frame, &mut wire2)
        .unwrap();
    assert_eq!(first_pass_wire, wire2);
}
