use chrono::{Duration, Utc};

use attest_protocol::Reply;
use attest_schemas::{DeviceAddress, Notification};
use attest_testkit::{Harness, TestSigner};

#[tokio::test]
async fn address_without_order_is_announced_and_session_expires() {
    let h = Harness::with_session_ttl_secs(60);
    let device = DeviceAddress::parse("chat:frank").unwrap();
    let signer = TestSigner::from_seed(12);

    let reply = h.inbound.handle(&device, signer.address().as_str()).await;
    assert_eq!(reply, Reply::AddressAccepted { address: signer.address() });

    // No order exists, so nothing is written; the endpoint binding is
    // still announced.
    assert_eq!(h.store.mutation_count(), 0);
    let entries = h.outbox.all();
    assert_eq!(entries.len(), 1);
    match &entries[0].notification {
        Notification::AddressBound {
            order_id: None,
            device: Some(d),
            address,
            ..
        } => {
            assert_eq!(d, &device);
            assert_eq!(address, &signer.address());
        }
        other => panic!("expected endpoint address_bound, got {other:?}"),
    }

    let now = Utc::now();
    let live = h.sessions.get(&device, now).unwrap().unwrap();
    assert_eq!(live.address, Some(signer.address()));

    let later = now + Duration::seconds(61);
    assert_eq!(h.sessions.evict_expired(later).unwrap(), 1);
    assert!(h.sessions.get(&device, later).unwrap().is_none());
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn unrecognised_text_gets_help_and_opens_a_session() {
    let h = Harness::new();
    let device = DeviceAddress::parse("chat:gina").unwrap();
    assert_eq!(h.inbound.handle(&device, "hello there").await, Reply::Help);
    assert_eq!(h.sessions.len(), 1);
}
