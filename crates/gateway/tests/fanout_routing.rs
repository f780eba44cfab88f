//! Ingress fan-out integration tests.
//!
//! Inject bus records through the dispatcher and observe what connected
//! clients receive over real sockets.

mod common;

use common::*;
use gateway::ingress::{TOPIC_USER_MARGIN, TOPIC_USER_POSITION};
use std::time::Duration;

fn margin_record(cfx_user_id: &str, asset: &str, margin_balance: f64) -> String {
    format!(
        concat!(
            r#"{{"timestamp":1718000000000,"cfx_user_id":"{}","asset":"{}","#,
            r#""total_position_value":10.0,"margin_balance":{},"order_margin":1.0,"#,
            r#""effective_leverage":2.0,"maintenance_margin":0.5,"unrealized_pnl":-1.0,"#,
            r#""available_margin":4.0,"wallet_balance":6.0,"margin_ratio":0.1,"#,
            r#""withdrawable_margin":3.0}}"#
        ),
        cfx_user_id, asset, margin_balance
    )
}

#[tokio::test]
async fn subscribed_client_receives_margin_publication_unconverted() {
    let gw = start_gateway(0, 15000.0, &[(130010505, "C1")]).await;
    let mut ws = connect_with_query(gw.addr, "130010505").await;
    recv_json(&mut ws).await;

    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:130010505:margin","id":"s1"}"#).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "subscribed");

    gw.dispatcher
        .dispatch(TOPIC_USER_MARGIN, margin_record("C1", "USDT", 42.5).as_bytes())
        .await
        .unwrap();

    let publication = recv_json(&mut ws).await;
    assert_eq!(publication["type"], "publication");
    assert_eq!(publication["channel"], "user:130010505:margin");
    // USDT-tagged records pass through with identical numeric fields.
    assert_eq!(publication["data"]["margin_balance"], 42.5);
    assert_eq!(publication["data"]["total_position_value"], 10.0);
    assert_eq!(publication["data"]["unrealized_pnl"], -1.0);
    assert_eq!(publication["data"]["asset"], "USDT");
}

#[tokio::test]
async fn idr_marked_margin_is_converted_with_cached_rate() {
    let gw = start_gateway(0, 15000.0, &[(130010505, "C1")]).await;
    let mut ws = connect_with_query(gw.addr, "130010505").await;
    recv_json(&mut ws).await;

    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:130010505:margin","id":"s1"}"#).await;
    recv_json(&mut ws).await;

    gw.dispatcher
        .dispatch(TOPIC_USER_MARGIN, margin_record("C1", "IDR", 2.0).as_bytes())
        .await
        .unwrap();

    let publication = recv_json(&mut ws).await;
    assert_eq!(publication["data"]["margin_balance"], 2.0 * 15000.0);
    assert_eq!(publication["data"]["wallet_balance"], 6.0 * 15000.0);
    // Ratios and leverage stay untouched.
    assert_eq!(publication["data"]["margin_ratio"], 0.1);
    assert_eq!(publication["data"]["effective_leverage"], 2.0);
}

#[tokio::test]
async fn rate_failure_drops_only_the_idr_record() {
    // Rate provider is down; IDR-marked records must be dropped rather
    // than emitted with wrong units, while USDT records still flow.
    let gw = start_gateway(0, 0.0, &[(111, "C1")]).await;
    let mut ws = connect_with_query(gw.addr, "111").await;
    recv_json(&mut ws).await;

    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:111:margin","id":"s1"}"#).await;
    recv_json(&mut ws).await;

    gw.dispatcher
        .dispatch(TOPIC_USER_MARGIN, margin_record("C1", "IDR", 2.0).as_bytes())
        .await
        .unwrap();
    expect_silence(&mut ws, Duration::from_millis(200)).await;

    gw.dispatcher
        .dispatch(TOPIC_USER_MARGIN, margin_record("C1", "USDT", 7.0).as_bytes())
        .await
        .unwrap();
    let publication = recv_json(&mut ws).await;
    assert_eq!(publication["data"]["margin_balance"], 7.0);
}

#[tokio::test]
async fn position_records_route_to_the_position_channel() {
    let gw = start_gateway(0, 2.0, &[(111, "C1")]).await;
    let mut ws = connect_with_query(gw.addr, "111").await;
    recv_json(&mut ws).await;

    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:111:position","id":"s1"}"#).await;
    recv_json(&mut ws).await;

    let record = r#"{"timestamp":1,"cfx_user_id":"C1","symbol":"BTCIDR-PERP","size":2.0,"value":100.0,"order_margin":8.0,"realised_pnl":1.0,"unrealised_pnl":2.0,"maintenance_margin":4.0,"entry_price":50.0}"#;
    gw.dispatcher
        .dispatch(TOPIC_USER_POSITION, record.as_bytes())
        .await
        .unwrap();

    let publication = recv_json(&mut ws).await;
    assert_eq!(publication["channel"], "user:111:position");
    assert_eq!(publication["data"]["value"], 200.0);
    assert_eq!(publication["data"]["order_margin"], 16.0);
    // Prices are not monetary fields.
    assert_eq!(publication["data"]["entry_price"], 50.0);
}

#[tokio::test]
async fn records_for_other_users_are_not_delivered() {
    let gw = start_gateway(0, 15000.0, &[(111, "C1"), (222, "C2")]).await;

    let mut ws = connect_with_query(gw.addr, "111").await;
    recv_json(&mut ws).await;
    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:111:margin","id":"s1"}"#).await;
    recv_json(&mut ws).await;

    // A record for a user with no subscribers is dropped silently.
    gw.dispatcher
        .dispatch(TOPIC_USER_MARGIN, margin_record("C2", "USDT", 5.0).as_bytes())
        .await
        .unwrap();
    expect_silence(&mut ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn margin_subscription_does_not_leak_position_records() {
    let gw = start_gateway(0, 15000.0, &[(111, "C1")]).await;
    let mut ws = connect_with_query(gw.addr, "111").await;
    recv_json(&mut ws).await;
    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:111:margin","id":"s1"}"#).await;
    recv_json(&mut ws).await;

    let record = r#"{"timestamp":1,"cfx_user_id":"C1","symbol":"BTCUSDT-PERP","value":100.0}"#;
    gw.dispatcher
        .dispatch(TOPIC_USER_POSITION, record.as_bytes())
        .await
        .unwrap();
    expect_silence(&mut ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn publications_preserve_per_channel_fifo_order() {
    let gw = start_gateway(0, 15000.0, &[(111, "C1")]).await;
    let mut ws = connect_with_query(gw.addr, "111").await;
    recv_json(&mut ws).await;
    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:111:margin","id":"s1"}"#).await;
    recv_json(&mut ws).await;

    for i in 0..100 {
        gw.dispatcher
            .dispatch(
                TOPIC_USER_MARGIN,
                margin_record("C1", "USDT", f64::from(i)).as_bytes(),
            )
            .await
            .unwrap();
    }

    for i in 0..100 {
        let publication = recv_json(&mut ws).await;
        assert_eq!(
            publication["data"]["margin_balance"],
            f64::from(i),
            "publication {} out of order",
            i
        );
    }
}

#[tokio::test]
async fn undecodable_record_is_skipped_without_breaking_the_stream() {
    let gw = start_gateway(0, 15000.0, &[(111, "C1")]).await;
    let mut ws = connect_with_query(gw.addr, "111").await;
    recv_json(&mut ws).await;
    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:111:margin","id":"s1"}"#).await;
    recv_json(&mut ws).await;

    assert!(gw
        .dispatcher
        .dispatch(TOPIC_USER_MARGIN, b"{broken json")
        .await
        .is_err());

    gw.dispatcher
        .dispatch(TOPIC_USER_MARGIN, margin_record("C1", "USDT", 1.0).as_bytes())
        .await
        .unwrap();
    assert_eq!(recv_json(&mut ws).await["data"]["margin_balance"], 1.0);
}

#[tokio::test]
async fn unsubscribed_user_stops_receiving() {
    let gw = start_gateway(0, 15000.0, &[(111, "C1")]).await;
    let mut ws = connect_with_query(gw.addr, "111").await;
    recv_json(&mut ws).await;
    send_json(&mut ws, r#"{"type":"subscribe","channel":"user:111:margin","id":"s1"}"#).await;
    recv_json(&mut ws).await;

    gw.dispatcher
        .dispatch(TOPIC_USER_MARGIN, margin_record("C1", "USDT", 1.0).as_bytes())
        .await
        .unwrap();
    recv_json(&mut ws).await;

    send_json(&mut ws, r#"{"type":"unsubscribe","channel":"user:111:margin","id":"u1"}"#).await;
    recv_json(&mut ws).await;

    gw.dispatcher
        .dispatch(TOPIC_USER_MARGIN, margin_record("C1", "USDT", 2.0).as_bytes())
        .await
        .unwrap();
    expect_silence(&mut ws, Duration::from_millis(200)).await;
}
