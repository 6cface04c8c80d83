//! Temperature bridges: Lake Shore 218 over a (mock) line transport and TR-71W over
//! a (static) HTTP page.

use daq_bridge::app;
use daq_bridge::bus::{LocalBus, MessageKind, Subscription};
use daq_bridge::config::{Connection, Lakeshore218Config, Tr71wConfig};
use daq_bridge::controller::ChannelBinding;
use daq_bridge::transport::mock::{simulated_lakeshore218, simulated_tr71w_page};
use daq_bridge::transport::{
    Endpoint, MockTransport, SharedTransport, StaticPage, TransportEvent, TransportKind,
};
use std::time::Duration;

const KELVIN: [f64; 8] = [4.2, 10.5, 77.3, 150.0, 200.0, 273.15, 295.0, 300.1];

fn lakeshore_config(channels: Vec<ChannelBinding>) -> Lakeshore218Config {
    Lakeshore218Config {
        host: "10.0.0.7".to_string(),
        port: 12,
        connection: Connection::Gpib,
        timeout_ms: 3000,
        poll_interval_ms: 10,
        channels,
    }
}

fn tr71w_config() -> Tr71wConfig {
    Tr71wConfig {
        host: "10.0.0.9".to_string(),
        port: 80,
        ondotori_no: "3".to_string(),
        timeout_ms: 3000,
        poll_interval_ms: 10,
        prefix: None,
    }
}

async fn next_reading(subscription: &mut Subscription) -> f64 {
    tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("reading should arrive")
        .expect("bus should stay open")
        .message
        .as_f64()
}

#[tokio::test]
async fn test_lakeshore_publishes_enabled_channels() {
    let mut channels: Vec<_> = (1..=8)
        .map(|ch| ChannelBinding::enabled(format!("cryostat_ch{}", ch)))
        .collect();
    channels[1] = ChannelBinding::disabled("cryostat_ch2");
    let cfg = lakeshore_config(channels);

    let bus = LocalBus::new();
    let mut ch1 = bus
        .subscribe("cryostat_ch1", MessageKind::Float64)
        .expect("subscribe ch1");
    let mut ch8 = bus
        .subscribe("cryostat_ch8", MessageKind::Float64)
        .expect("subscribe ch8");
    let mut tap = bus.tap();

    let mock = MockTransport::new(cfg.endpoint()).with_responder(simulated_lakeshore218(KELVIN));
    let journal = mock.journal();
    let tasks = app::start_lakeshore218(&cfg, &bus, SharedTransport::new(mock))
        .await
        .expect("bridge should start");

    assert!((next_reading(&mut ch1).await - 4.2).abs() < 1e-9);
    assert!((next_reading(&mut ch8).await - 300.1).abs() < 1e-9);

    for _ in 0..16 {
        let envelope = tap.recv().await.expect("tap should stay open");
        assert_ne!(envelope.topic, "cryostat_ch2", "disabled channel was published");
    }

    for task in tasks {
        task.shutdown().await.expect("poller should stop cleanly");
    }

    // Every poll is one full-frame query.
    let sent = journal.sent();
    assert!(!sent.is_empty());
    assert!(sent.iter().all(|cmd| cmd == "KRDG?"), "unexpected commands: {:?}", sent);
    assert_eq!(journal.events().first(), Some(&TransportEvent::Open));
}

#[tokio::test]
async fn test_lakeshore_unreachable_fails_to_start() {
    let cfg = lakeshore_config(
        (1..=8)
            .map(|ch| ChannelBinding::enabled(format!("lakeshore218_ch{}", ch)))
            .collect(),
    );
    let bus = LocalBus::new();
    let transport = SharedTransport::new(MockTransport::unreachable(Endpoint::new(
        "10.0.0.7",
        12,
        TransportKind::Gpib,
    )));

    let err = app::start_lakeshore218(&cfg, &bus, transport)
        .await
        .expect_err("start-up should fail");
    assert!(err.is_connection());
}

#[tokio::test]
async fn test_tr71w_publishes_both_channels() {
    let cfg = tr71w_config();
    let bus = LocalBus::new();
    let mut ch1 = bus
        .subscribe("tr71w3_temp_1", MessageKind::Float64)
        .expect("subscribe ch1");
    let mut ch2 = bus
        .subscribe("tr71w3_temp_2", MessageKind::Float64)
        .expect("subscribe ch2");

    let page = StaticPage::new(cfg.endpoint(), simulated_tr71w_page(Some(23.4), None));
    let tasks = app::start_tr71w(&cfg, &bus, page.clone())
        .await
        .expect("bridge should start");

    assert!((next_reading(&mut ch1).await - 23.4).abs() < 1e-9);
    assert_eq!(next_reading(&mut ch2).await, 0.0, "absent sensor reads as zero");

    page.set_body(simulated_tr71w_page(Some(24.0), Some(-5.5)));
    let mut latest = next_reading(&mut ch2).await;
    for _ in 0..10 {
        if latest != 0.0 {
            break;
        }
        latest = next_reading(&mut ch2).await;
    }
    assert!((latest + 5.5).abs() < 1e-9);

    for task in tasks {
        task.shutdown().await.expect("poller should stop cleanly");
    }
}

#[tokio::test]
async fn test_tr71w_poll_failure_ends_the_task() {
    let cfg = tr71w_config();
    let bus = LocalBus::new();
    let page = StaticPage::new(cfg.endpoint(), simulated_tr71w_page(Some(20.0), Some(21.0)));
    let mut tasks = app::start_tr71w(&cfg, &bus, page.clone())
        .await
        .expect("bridge should start");

    page.set_body("not a current-data page");
    let poller = tasks.pop().expect("one polling task");
    let result = tokio::time::timeout(Duration::from_secs(2), poller.join())
        .await
        .expect("poller should end on its own");
    assert!(result.is_err(), "garbled page should be reported");
}

#[tokio::test]
async fn test_tr71w_unreachable_fails_to_start() {
    let cfg = tr71w_config();
    let bus = LocalBus::new();
    let err = app::start_tr71w(&cfg, &bus, StaticPage::unreachable(cfg.endpoint()))
        .await
        .expect_err("start-up should fail");
    assert!(err.is_connection());
}
