//! Loading bridge configuration from TOML files and environment overrides.

use daq_bridge::config::{BridgeConfig, Connection, InstrumentConfig};
use daq_bridge::driver::SignalGeneratorModel;
use daq_bridge::BridgeError;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

const MG3692C: &str = r#"
[application]
name = "mg3692c-bridge"
log_level = "debug"

[instrument]
type = "signal_generator"
model = "mg3692c"
host = "10.0.0.5"
port = 1
settle_delay_ms = 500
poll_interval_ms = 2000

[instrument.topics]
power = "sg_power_readback"
"#;

#[test]
#[serial]
fn test_signal_generator_file_loads() {
    let file = write_config(MG3692C);
    let config = BridgeConfig::load_from(file.path()).expect("config should load");

    assert_eq!(config.application.log_level, "debug");
    let InstrumentConfig::SignalGenerator(sg) = &config.instrument else {
        panic!("expected a signal generator, got {:?}", config.instrument);
    };
    assert_eq!(sg.model, SignalGeneratorModel::Mg3692c);
    assert_eq!(sg.connection, Connection::Gpib);
    assert_eq!(sg.timeout(), Duration::from_millis(3000));
    assert_eq!(sg.settle_delay(), Duration::from_millis(500));
    assert_eq!(sg.poll_interval(), Some(Duration::from_secs(2)));

    let topics = sg.topics();
    assert_eq!(topics.power, "sg_power_readback");
    assert_eq!(topics.freq, "mg3692c_freq");
    assert_eq!(topics.onoff_cmd, "mg3692c_onoff_cmd");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(MG3692C);
    std::env::set_var("DAQ_BRIDGE_INSTRUMENT__HOST", "192.168.1.50");
    std::env::set_var("DAQ_BRIDGE_APPLICATION__LOG_LEVEL", "warn");
    let result = BridgeConfig::load_from(file.path());
    std::env::remove_var("DAQ_BRIDGE_INSTRUMENT__HOST");
    std::env::remove_var("DAQ_BRIDGE_APPLICATION__LOG_LEVEL");

    let config = result.expect("config should load");
    assert_eq!(config.application.log_level, "warn");
    let InstrumentConfig::SignalGenerator(sg) = &config.instrument else {
        panic!("expected a signal generator");
    };
    assert_eq!(sg.host, "192.168.1.50");
}

#[test]
#[serial]
fn test_lakeshore_defaults() {
    let file = write_config(
        r#"
[application]
name = "cryostat"

[instrument]
type = "lakeshore218"
host = "10.0.0.7"
port = 12
"#,
    );
    let config = BridgeConfig::load_from(file.path()).expect("config should load");
    let InstrumentConfig::Lakeshore218(ls) = &config.instrument else {
        panic!("expected a Lakeshore218");
    };
    assert_eq!(ls.channels.len(), 8);
    assert_eq!(ls.channels[0].topic, "lakeshore218_ch1");
    assert!(ls.channels.iter().all(|c| c.enabled));
    assert_eq!(ls.poll_interval(), Duration::from_secs(1));
}

#[test]
#[serial]
fn test_tr71w_defaults() {
    let file = write_config(
        r#"
[application]
name = "room"

[instrument]
type = "tr71w"
host = "10.0.0.9"
ondotori_no = "2"
"#,
    );
    let config = BridgeConfig::load_from(file.path()).expect("config should load");
    let InstrumentConfig::Tr71w(tr) = &config.instrument else {
        panic!("expected a TR-71W");
    };
    assert_eq!(tr.port, 80);
    let topics: Vec<_> = tr.channels().into_iter().map(|c| c.topic).collect();
    assert_eq!(topics, ["tr71w2_temp_1", "tr71w2_temp_2"]);
}

#[test]
#[serial]
fn test_out_of_range_gpib_address_is_rejected() {
    let file = write_config(&MG3692C.replace("port = 1", "port = 31"));
    let err = BridgeConfig::load_from(file.path()).expect_err("validation should fail");
    assert!(matches!(err, BridgeError::Configuration(_)), "got {:?}", err);
}

#[test]
#[serial]
fn test_unknown_instrument_type_is_rejected() {
    let file = write_config(&MG3692C.replace("signal_generator", "oscilloscope"));
    let err = BridgeConfig::load_from(file.path()).expect_err("parsing should fail");
    assert!(matches!(err, BridgeError::Config(_)), "got {:?}", err);
}

#[test]
#[serial]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = BridgeConfig::load_from(dir.path().join("absent.toml"))
        .expect_err("missing file should fail");
    assert!(matches!(err, BridgeError::Config(_)), "got {:?}", err);
}

#[test]
#[serial]
fn test_shipped_configs_are_valid() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
    for name in ["bridge.toml", "mg3692c.toml", "lakeshore218.toml", "tr71w.toml"] {
        let config = BridgeConfig::load_from(dir.join(name))
            .unwrap_or_else(|e| panic!("{} should load: {}", name, e));
        assert!(!config.describe().is_empty());
    }
}
