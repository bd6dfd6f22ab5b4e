//! Many endpoints racing the same proof: exactly one unit is issued and
//! persisted, every other flow is told the order is already attested or busy.

use std::sync::Arc;

use serde_json::json;

use attest_orders::NewOrder;
use attest_protocol::Reply;
use attest_schemas::{DeviceAddress, OrderStatus};
use attest_testkit::{alice, Harness, TestSigner};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_proofs_issue_exactly_one_unit() {
    let h = Arc::new(Harness::new());
    let id = h.seed_order(Some("default"), &alice().unwrap(), None).await.unwrap();
    let signer = TestSigner::from_seed(8);
    let text = Arc::new(signer.ownership_proof(json!({"username": "alice", "userId": "42"}), None));

    let mut tasks = Vec::new();
    for i in 0..12 {
        let h = h.clone();
        let text = text.clone();
        tasks.push(tokio::spawn(async move {
            let device = DeviceAddress::parse(&format!("chat:{i}")).unwrap();
            h.inbound.handle(&device, &text).await
        }));
    }
    let mut replies = Vec::new();
    for t in tasks {
        replies.push(t.await.unwrap());
    }

    let order = h.lifecycle().get_order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Attested);
    let unit = order.unit.clone().unwrap();

    let successes: Vec<_> = replies
        .iter()
        .filter(|r| matches!(r, Reply::Success { .. }))
        .collect();
    assert_eq!(successes.len(), 1, "replies: {replies:?}");
    assert_eq!(successes[0], &Reply::Success { unit });
    assert_eq!(h.issuer.issued(), 1);

    for r in &replies {
        assert!(
            matches!(
                r,
                Reply::Success { .. } | Reply::AlreadyAttested { .. } | Reply::GenericError
            ),
            "unexpected reply {r:?}"
        );
    }
    let attested_events = h
        .outbox
        .all()
        .iter()
        .filter(|e| e.notification.topic() == "attested")
        .count();
    assert_eq!(attested_events, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creates_yield_one_open_order() {
    let h = Arc::new(Harness::new());

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.lifecycle()
                .create_order(NewOrder::new(Some("default".into()), alice().unwrap()), true)
                .await
                .unwrap()
        }));
    }
    let mut ids = Vec::new();
    let mut created = 0;
    for t in tasks {
        let out = t.await.unwrap();
        ids.push(out.id);
        created += usize::from(out.created);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1, "all callers see the same order");
    assert_eq!(created, 1);
    assert_eq!(h.lifecycle().counts().await.unwrap().total(), 1);
}
