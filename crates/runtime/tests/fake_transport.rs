//! Request correlation and call routing over the fake transport.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gw_protocol::Identity;
use gw_runtime::connection::Connection;
use gw_runtime::transport::FakeTransportBuilder;
use gw_runtime::{CallbackTarget, DispatchRegistry, ErrorKind};
use parking_lot::Mutex;
use serde_json::json;

fn start(connection: &Arc<Connection>) {
	let conn = Arc::clone(connection);
	tokio::spawn(async move { conn.run().await });
}

#[tokio::test]
async fn request_is_sent_and_reply_returned() {
	let (parts, controller) = FakeTransportBuilder::new().build();
	let connection = Arc::new(Connection::new(parts));
	start(&connection);

	let context = BTreeMap::from([("gw.session".to_string(), "s-1".to_string())]);
	let fut = tokio::spawn({
		let conn = Arc::clone(&connection);
		async move { conn.send_message("gateway", "gateway.callbackCategory", json!(null), context).await }
	});
	controller.next_sent().await.unwrap();
	controller.inject_response(0, json!("callbacks"));

	let result = fut.await.unwrap().unwrap();
	assert_eq!(result, "callbacks");

	let sent = controller.take_sent().await;
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0]["target"], "gateway");
	assert_eq!(sent[0]["method"], "gateway.callbackCategory");
	assert_eq!(sent[0]["context"]["gw.session"], "s-1");
	assert_eq!(sent[0]["id"], 0);
}

#[tokio::test]
async fn replies_out_of_order_reach_their_requests() {
	let (parts, controller) = FakeTransportBuilder::new().build();
	let connection = Arc::new(Connection::new(parts));
	start(&connection);

	let first = tokio::spawn({
		let conn = Arc::clone(&connection);
		async move { conn.send_message("command/a", "command.status", json!(null), BTreeMap::new()).await }
	});
	let first_sent = controller.next_sent().await.unwrap();
	let second = tokio::spawn({
		let conn = Arc::clone(&connection);
		async move { conn.send_message("command/b", "command.status", json!(null), BTreeMap::new()).await }
	});
	let second_sent = controller.next_sent().await.unwrap();

	let first_id = first_sent["id"].as_u64().unwrap() as u32;
	let second_id = second_sent["id"].as_u64().unwrap() as u32;
	controller.inject_response(second_id, json!({"steps": 2}));
	controller.inject_response(first_id, json!({"steps": 1}));

	assert_eq!(first.await.unwrap().unwrap()["steps"], 1);
	assert_eq!(second.await.unwrap().unwrap()["steps"], 2);
}

#[tokio::test]
async fn server_error_is_classified() {
	let (parts, controller) = FakeTransportBuilder::new().build();
	let connection = Arc::new(Connection::new(parts));
	start(&connection);

	let fut = tokio::spawn({
		let conn = Arc::clone(&connection);
		async move { conn.send_message("session/x", "session.destroy", json!(null), BTreeMap::new()).await }
	});
	controller.next_sent().await.unwrap();
	controller.inject_error(0, "SessionNotFoundError", "no session x");

	let err = fut.await.unwrap().unwrap_err();
	assert_eq!(err.kind(), ErrorKind::SessionNotFound);
	assert!(err.is_expected_on_teardown());
}

#[tokio::test]
async fn pending_requests_fail_when_server_hangs_up() {
	let (parts, controller) = FakeTransportBuilder::new().build();
	let connection = Arc::new(Connection::new(parts));
	start(&connection);

	let pending = tokio::spawn({
		let conn = Arc::clone(&connection);
		async move { conn.send_message("command/a", "command.response", json!(null), BTreeMap::new()).await }
	});
	controller.next_sent().await.unwrap();
	controller.disconnect();

	let err = pending.await.unwrap().unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ChannelClosed);
	assert!(connection.is_closed());
}

#[tokio::test]
async fn send_failure_is_reported() {
	let (parts, _controller) = FakeTransportBuilder::new().failing_sends().build();
	let connection = Arc::new(Connection::new(parts));
	start(&connection);

	let err = connection
		.send_message("gateway", "gateway.openSession", json!({}), BTreeMap::new())
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Transport);
}

#[derive(Default)]
struct Steps(Mutex<Vec<(u32, u32)>>);

impl CallbackTarget for Steps {
	fn step(&self, complete: u32, total: u32) {
		self.0.lock().push((complete, total));
	}
}

#[tokio::test]
async fn server_calls_are_dispatched_by_identity() {
	let (parts, controller) = FakeTransportBuilder::new().build();
	let connection = Arc::new(Connection::new(parts));
	let registry = Arc::new(DispatchRegistry::new("client"));
	let steps = Arc::new(Steps::default());
	registry.add(Identity::new("cb", "cmd-1"), steps.clone()).unwrap();
	connection.attach_registry(Arc::clone(&registry));
	start(&connection);

	controller.inject_call("cb/cmd-1", "step", json!({"complete": 1, "total": 3}));
	controller.inject_call("cb/unknown", "step", json!({"complete": 9, "total": 9}));
	controller.inject_call("cb/cmd-1", "step", json!({"complete": 2, "total": 3}));

	tokio::time::timeout(Duration::from_secs(1), async {
		while steps.0.lock().len() < 2 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap();
	assert_eq!(*steps.0.lock(), vec![(1, 3), (2, 3)]);

	// Deactivated registries stop receiving calls.
	registry.deactivate().unwrap();
	controller.inject_call("cb/cmd-1", "step", json!({"complete": 3, "total": 3}));
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(steps.0.lock().len(), 2);
}

#[derive(Default)]
struct Overlap {
	running: AtomicUsize,
	peak: AtomicUsize,
	done: AtomicUsize,
}

impl CallbackTarget for Overlap {
	fn step(&self, _complete: u32, _total: u32) {
		let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
		self.peak.fetch_max(running, Ordering::SeqCst);
		std::thread::sleep(Duration::from_millis(40));
		self.running.fetch_sub(1, Ordering::SeqCst);
		self.done.fetch_add(1, Ordering::SeqCst);
	}
}

async fn peak_dispatch(limit: usize) -> usize {
	let (parts, controller) = FakeTransportBuilder::new().build();
	let connection = Arc::new(Connection::with_dispatch_limit(parts, limit));
	let registry = Arc::new(DispatchRegistry::new("client"));
	let overlap = Arc::new(Overlap::default());
	for name in ["a", "b", "c", "d"] {
		registry.add(Identity::new("cb", name), overlap.clone()).unwrap();
	}
	connection.attach_registry(registry);
	start(&connection);

	for name in ["a", "b", "c", "d"] {
		controller.inject_call(&format!("cb/{name}"), "step", json!({"complete": 1, "total": 1}));
	}
	tokio::time::timeout(Duration::from_secs(2), async {
		while overlap.done.load(Ordering::SeqCst) < 4 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap();
	overlap.peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn inbound_dispatch_respects_the_callback_pool_size() {
	assert_eq!(peak_dispatch(1).await, 1);
	assert_eq!(peak_dispatch(2).await, 2);
}
