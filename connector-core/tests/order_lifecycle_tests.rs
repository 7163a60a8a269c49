//! End-to-end lifecycle scenarios driving a real [`ConnectorFacade`] against
//! a scripted loopback venue, exercising the full C7 submission path (real
//! signer subprocess, real websocket round trip, real `UserStreamIngestor`)
//! rather than unit-level pieces in isolation.

mod support;

use connector_core::ids::OrderKind;
use connector_core::ids::PositionAction;
use connector_core::{ConnectorFacade, OrderParams, OrderState};
use rust_decimal_macros::dec;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use support::{build_facade, push_channel, read_post, reply_post, MockVenue};

fn wait_for_state(facade: &ConnectorFacade, client_id: &str, state: OrderState, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(order) = facade.get_order(client_id) {
            if order.state == state {
                return;
            }
        }
        assert!(
            Instant::now() < deadline,
            "order {client_id} never reached {state:?}"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn limit_buy_params() -> OrderParams {
    OrderParams {
        trading_pair: "BTC-USD".into(),
        amount: dec!(0.10),
        price: dec!(50000),
        order_kind: OrderKind::Limit,
        position_action: PositionAction::Open,
        leverage: None,
    }
}

/// S1: happy-path limit buy, a partial fill followed by the fill that
/// completes the order, producing the exact event sequence
/// `update -> created -> partial_fill -> filled`.
#[test]
fn happy_path_limit_buy_fills_completely() {
    let venue = MockVenue::bind();
    let url = venue.url.clone();
    let (cid_tx, cid_rx) = mpsc::channel::<String>();

    let server = venue.serve(move |ws| {
        let (id, request_type, _payload) = read_post(ws);
        assert_eq!(request_type, "order");
        reply_post(ws, id, serde_json::json!({"resting": {"oid": "123"}}));

        let client_id = cid_rx.recv().expect("client id");
        push_channel(
            ws,
            "userFills",
            serde_json::json!([{
                "client_order_id": client_id,
                "tid": "t1",
                "oid": "123",
                "coin": "BTC-USD",
                "px": "50000",
                "sz": "0.04",
                "feeToken": "USD",
                "fee": "0.01",
                "crossed": false,
            }]),
        );
        push_channel(
            ws,
            "userFills",
            serde_json::json!([{
                "client_order_id": client_id,
                "tid": "t2",
                "oid": "123",
                "coin": "BTC-USD",
                "px": "50000",
                "sz": "0.06",
                "feeToken": "USD",
                "fee": "0.015",
                "crossed": false,
            }]),
        );
    });

    let (facade, _tracker, recorder) = build_facade(&url, false);
    let client_id = facade.buy(limit_buy_params());
    cid_tx.send(client_id.clone()).unwrap();

    wait_for_state(&facade, &client_id, OrderState::Filled, Duration::from_secs(2));
    server.join().unwrap();

    let order = facade.get_order(&client_id).unwrap();
    assert_eq!(order.exchange_order_id.as_deref(), Some("123"));
    assert_eq!(order.filled_amount, dec!(0.10));
    assert_eq!(order.average_fill_price, dec!(50000));

    assert_eq!(
        recorder.event_types(),
        vec!["update", "created", "partial_fill", "filled"]
    );

    facade.shutdown();
}

/// S2: invalid amount is rejected before the order is ever tracked, with
/// exactly one `ORDER_FAILED` event and no transport round trip.
#[test]
fn invalid_amount_produces_single_failure_event_and_no_tracking() {
    let venue = MockVenue::bind();
    let url = venue.url.clone();
    // No request should ever arrive; the server simply never gets a chance
    // to read one before the test asserts and moves on.
    let server = venue.serve(|_ws| {});

    let (facade, tracker, recorder) = build_facade(&url, true);
    let mut params = limit_buy_params();
    params.amount = dec!(-1);

    let client_id = facade.buy(params);
    assert!(tracker.get_order(&client_id).is_none());

    assert_eq!(recorder.event_types(), vec!["failed"]);
    let payloads = recorder.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].data.canonical_code, Some("invalid_params"));
    assert!(payloads[0].data.reason.is_some());
    drop(payloads);

    facade.shutdown();
    drop(server);
}

/// S3: venue rejects a post-only order with `BadAloPxRejected`; the order
/// must land on FAILED via the venue-reject path, not the post-timeout path.
#[test]
fn post_only_violation_fails_the_order() {
    let venue = MockVenue::bind();
    let url = venue.url.clone();

    let server = venue.serve(|ws| {
        let (id, request_type, _payload) = read_post(ws);
        assert_eq!(request_type, "order");
        reply_post(ws, id, serde_json::json!({"error": "BadAloPxRejected"}));
    });

    let (facade, _tracker, recorder) = build_facade(&url, false);
    let mut params = limit_buy_params();
    params.order_kind = OrderKind::LimitMaker;
    let client_id = facade.buy(params);

    wait_for_state(&facade, &client_id, OrderState::Failed, Duration::from_secs(2));

    server.join().unwrap();

    let order = facade.get_order(&client_id).unwrap();
    assert_eq!(order.reason_code, Some(connector_core::ReasonCode::PostOnlyViolation));
    assert_eq!(order.reason.as_deref(), Some("BadAloPxRejected"));

    let payloads = recorder.payloads.lock().unwrap();
    let failed = payloads.iter().find(|p| p.event_type == "failed").unwrap();
    assert_eq!(failed.data.canonical_code, Some("post_only_violation"));
    drop(payloads);

    facade.shutdown();
}

/// S4: the transport goes stale mid-flight and the facade's reconnect
/// watcher tears it down, rebuilds it against a fresh connection, and
/// resumes posting orders without the caller ever seeing a hard failure.
#[test]
fn transport_disconnect_triggers_facade_reconnect() {
    let venue = MockVenue::bind();
    let url = venue.url.clone();

    let server = venue.serve_multiple(move |ws, attempt| {
        if attempt == 0 {
            // Drop the first connection immediately without responding to
            // anything, forcing the heartbeat thread to mark it stale.
            return false;
        }
        let (id, request_type, _payload) = read_post(ws);
        assert_eq!(request_type, "order");
        reply_post(ws, id, serde_json::json!({"resting": {"oid": "9"}}));
        true
    });

    let (facade, _tracker, _recorder) = build_facade(&url, false);

    let deadline = Instant::now() + Duration::from_secs(5);
    while facade.metrics().reconnect_total.get() == 0 {
        assert!(Instant::now() < deadline, "facade never reconnected");
        std::thread::sleep(Duration::from_millis(20));
    }

    let client_id = facade.buy(limit_buy_params());
    wait_for_state(&facade, &client_id, OrderState::Open, Duration::from_secs(2));

    server.join().unwrap();
    facade.shutdown();
}

/// S6: a cancel races with a fill that completes the order first. The
/// cancel handle must resolve `false` and the order must end up FILLED,
/// never CANCELLED, with no duplicate terminal events.
#[test]
fn cancel_racing_a_completing_fill_resolves_false() {
    let venue = MockVenue::bind();
    let url = venue.url.clone();
    let (cid_tx, cid_rx) = mpsc::channel::<String>();

    let server = venue.serve(move |ws| {
        let (id, request_type, _payload) = read_post(ws);
        assert_eq!(request_type, "order");
        reply_post(ws, id, serde_json::json!({"resting": {"oid": "77"}}));

        let client_id = cid_rx.recv().expect("client id");

        // The cancel request only reaches the wire after the facade has
        // already registered a cancel waiter, so pushing the completing
        // fill here deterministically lands the fill first.
        let (cancel_id, cancel_type, _payload) = read_post(ws);
        assert_eq!(cancel_type, "cancel");

        push_channel(
            ws,
            "userFills",
            serde_json::json!([{
                "client_order_id": client_id,
                "tid": "t1",
                "oid": "77",
                "coin": "BTC-USD",
                "px": "50000",
                "sz": "0.10",
                "feeToken": "USD",
                "fee": "0.02",
                "crossed": false,
            }]),
        );
        std::thread::sleep(Duration::from_millis(100));
        reply_post(ws, cancel_id, serde_json::json!({"error": "Order already filled"}));
    });

    let (facade, _tracker, recorder) = build_facade(&url, false);
    let client_id = facade.buy(limit_buy_params());
    cid_tx.send(client_id.clone()).unwrap();
    wait_for_state(&facade, &client_id, OrderState::Open, Duration::from_secs(2));

    let handle = facade.cancel("BTC-USD", &client_id);
    assert!(!handle.wait(Duration::from_secs(2)));

    wait_for_state(&facade, &client_id, OrderState::Filled, Duration::from_secs(2));
    server.join().unwrap();

    let cancelled_events = recorder
        .event_types()
        .into_iter()
        .filter(|t| *t == "cancelled")
        .count();
    assert_eq!(cancelled_events, 0);

    let filled_events = recorder
        .event_types()
        .into_iter()
        .filter(|t| *t == "filled")
        .count();
    assert_eq!(filled_events, 1);

    facade.shutdown();
}
