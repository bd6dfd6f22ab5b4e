use std::sync::Arc;

use serde_json::json;

use attest_orders::{DispatchReport, Outbox, OutboxDispatcher};
use attest_protocol::Reply;
use attest_schemas::DeviceAddress;
use attest_testkit::{alice, Harness, RecordingSink, TestSigner};

#[tokio::test]
async fn failed_sink_gets_the_notification_again_later() {
    let h = Harness::new();
    let device = DeviceAddress::parse("chat:erin").unwrap();
    h.seed_order(Some("default"), &alice().unwrap(), Some(&device))
        .await
        .unwrap();
    let signer = TestSigner::from_seed(10);
    let text = signer.ownership_proof(json!({"username": "alice", "userId": "42"}), None);
    assert!(matches!(h.inbound.handle(&device, &text).await, Reply::Success { .. }));

    let sink = Arc::new(RecordingSink::new());
    let dispatcher = OutboxDispatcher::new(h.outbox.clone(), 8).with_sink(sink.clone());

    sink.set_failing(true);
    let r = dispatcher.run_once().await.unwrap();
    assert_eq!(r, DispatchReport { delivered: 0, failed: 1 });
    let pending = h.outbox.pending(8).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);

    sink.set_failing(false);
    let r = dispatcher.run_once().await.unwrap();
    assert_eq!(r, DispatchReport { delivered: 1, failed: 0 });
    assert_eq!(sink.seen().len(), 1);
    assert_eq!(sink.seen()[0].topic(), "attested");
    assert_eq!(h.outbox.delivered_count(), 1);

    assert_eq!(dispatcher.run_once().await.unwrap(), DispatchReport::default());
}
