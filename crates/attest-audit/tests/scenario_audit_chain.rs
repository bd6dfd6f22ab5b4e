use std::sync::Arc;

use attest_audit::{verify_hash_chain, AuditSink, AuditWriter, VerifyResult};
use attest_orders::{MemoryOutbox, Outbox, OutboxDispatcher};
use attest_schemas::{Address, Notification};
use serde_json::json;

#[test]
fn untampered_chain_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("events.jsonl");

    let mut w = AuditWriter::new(&path, true).unwrap();
    for i in 0..5 {
        w.append("attested", i, json!({"index": i})).unwrap();
    }

    assert_eq!(verify_hash_chain(&path).unwrap(), VerifyResult::Valid { lines: 5 });
}

#[test]
fn edited_payload_is_detected_at_its_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let mut w = AuditWriter::new(&path, true).unwrap();
    for i in 0..5 {
        w.append("attested", i, json!({"unit": format!("u-{i}")})).unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let tampered: Vec<String> = content
        .lines()
        .enumerate()
        .map(|(i, l)| if i == 2 { l.replace("u-2", "u-X") } else { l.to_string() })
        .collect();
    std::fs::write(&path, tampered.join("\n")).unwrap();

    match verify_hash_chain(&path).unwrap() {
        VerifyResult::Broken { line, reason } => {
            assert_eq!(line, 3);
            assert!(reason.contains("hash_self"), "{reason}");
        }
        other => panic!("expected broken chain, got {other:?}"),
    }
}

#[test]
fn removed_line_breaks_the_link() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let mut w = AuditWriter::new(&path, true).unwrap();
    for i in 0..3 {
        w.append("attested", i, json!({"i": i})).unwrap();
    }
    let content = std::fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, l)| l)
        .collect();
    std::fs::write(&path, kept.join("\n")).unwrap();

    match verify_hash_chain(&path).unwrap() {
        VerifyResult::Broken { line, reason } => {
            assert_eq!(line, 2);
            assert!(reason.contains("hash_prev"), "{reason}");
        }
        other => panic!("expected broken chain, got {other:?}"),
    }
}

#[test]
fn resumed_writer_continues_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let last = {
        let mut w = AuditWriter::new(&path, true).unwrap();
        w.append("attested", 1, json!({"i": 1})).unwrap();
        w.append("attested", 2, json!({"i": 2})).unwrap();
        w.last_hash()
    };

    let mut w = AuditWriter::resume(&path, true).unwrap();
    assert_eq!(w.seq(), 2);
    assert_eq!(w.last_hash(), last);
    let ev = w.append("attested", 3, json!({"i": 3})).unwrap();
    assert_eq!(ev.hash_prev, last);

    assert_eq!(verify_hash_chain(&path).unwrap(), VerifyResult::Valid { lines: 3 });
}

#[tokio::test]
async fn sink_records_each_delivered_notification() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let outbox = Arc::new(MemoryOutbox::new());
    let address = Address::from_public_key(&[4u8; 32]);
    for id in 1..=3 {
        outbox
            .enqueue(&Notification::AddressBound {
                order_id: Some(id),
                device: None,
                address: address.clone(),
                bound_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }

    let sink = Arc::new(AuditSink::open(&path, true).unwrap());
    let dispatcher = OutboxDispatcher::new(outbox.clone(), 10).with_sink(sink);
    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.delivered, 3);

    assert_eq!(verify_hash_chain(&path).unwrap(), VerifyResult::Valid { lines: 3 });
    let first = std::fs::read_to_string(&path).unwrap();
    let first = first.lines().next().unwrap();
    let ev: serde_json::Value = serde_json::from_str(first).unwrap();
    assert_eq!(ev["topic"], "address_bound");
    assert_eq!(ev["outbox_id"], 1);
    assert_eq!(ev["payload"]["address"], address.as_str());
}
