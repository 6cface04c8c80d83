//! Bridge assembly and lifecycle.
//!
//! Builds the transport, driver and controller for the configured instrument, checks
//! the instrument is reachable, then supervises the background tasks until Ctrl-C or
//! until a task fails.
//!
//! Start-up policy: an unreachable instrument is logged and returned as an error; there
//! is no retry. A failing temperature poll cycle ends its task and brings the whole
//! bridge down. A failing signal generator poll cycle ends only the poller; the
//! command handler keeps running.

use std::future::Future;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{error, info, warn, Instrument};

use crate::bus::{Envelope, LocalBus};
use crate::config::{
    BridgeConfig, InstrumentConfig, Lakeshore218Config, SignalGeneratorConfig, Tr71wConfig,
};
use crate::controller::{SignalGeneratorController, TaskHandle, TemperatureController};
use crate::driver::tr71w::CURRENT_DATA_PATH;
use crate::driver::{Lakeshore218, ScpiSignalGenerator, Tr71w};
use crate::error::{AppResult, BridgeError};
use crate::relay;
use crate::transport::mock::{
    simulated_lakeshore218, simulated_signal_generator, simulated_tr71w_page,
};
use crate::transport::{
    Endpoint, HttpPageSource, MockTransport, PageSource, PrologixTransport, SharedTransport,
    SocketTransport, StaticPage, TransportKind,
};

/// Kelvin readings served by the simulated Lake Shore 218.
const SIMULATED_KELVIN: [f64; 8] = [4.2, 10.0, 40.0, 77.35, 150.0, 273.15, 293.15, 300.0];

/// Round-trip time of simulated instruments.
const SIMULATED_LATENCY: Duration = Duration::from_millis(5);

/// Whether to talk to real hardware or to simulated instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Real transports (Prologix, TCP socket, HTTP)
    Hardware,
    /// In-process simulated instruments
    Simulated,
}

// ============================================================================
// Transports
// ============================================================================

fn line_transport<F>(
    endpoint: Endpoint,
    timeout: Duration,
    mode: Mode,
    simulator: F,
) -> AppResult<SharedTransport>
where
    F: FnMut(&str) -> Option<String> + Send + 'static,
{
    match mode {
        Mode::Simulated => Ok(SharedTransport::new(
            MockTransport::new(endpoint)
                .with_responder(simulator)
                .with_latency(SIMULATED_LATENCY),
        )),
        Mode::Hardware => match endpoint.kind() {
            TransportKind::Gpib => Ok(SharedTransport::new(
                PrologixTransport::new(endpoint)?.with_timeout(timeout),
            )),
            TransportKind::Lan => Ok(SharedTransport::new(
                SocketTransport::new(endpoint).with_timeout(timeout),
            )),
            TransportKind::Http => Err(BridgeError::Configuration(format!(
                "{} is not a line-oriented endpoint",
                endpoint
            ))),
        },
    }
}

fn page_source(cfg: &Tr71wConfig, mode: Mode) -> AppResult<Box<dyn PageSource>> {
    Ok(match mode {
        Mode::Simulated => Box::new(StaticPage::new(
            cfg.endpoint(),
            simulated_tr71w_page(Some(23.5), Some(24.0)),
        )),
        Mode::Hardware => Box::new(HttpPageSource::new(
            cfg.endpoint(),
            CURRENT_DATA_PATH,
            cfg.timeout(),
        )?),
    })
}

/// Transport for a configured signal generator.
pub fn signal_generator_transport(
    cfg: &SignalGeneratorConfig,
    mode: Mode,
) -> AppResult<SharedTransport> {
    line_transport(cfg.endpoint(), cfg.timeout(), mode, simulated_signal_generator())
}

/// Transport for a configured Lake Shore 218.
pub fn lakeshore218_transport(cfg: &Lakeshore218Config, mode: Mode) -> AppResult<SharedTransport> {
    line_transport(
        cfg.endpoint(),
        cfg.timeout(),
        mode,
        simulated_lakeshore218(SIMULATED_KELVIN),
    )
}

async fn probe(transport: &SharedTransport) -> AppResult<()> {
    transport.probe().await.map_err(|e| {
        error!(endpoint = %transport.endpoint(), error = %e, "Instrument unreachable");
        e
    })
}

// ============================================================================
// Controllers
// ============================================================================

fn signal_generator_controller(
    cfg: &SignalGeneratorConfig,
    bus: &LocalBus,
    transport: SharedTransport,
) -> AppResult<SignalGeneratorController<ScpiSignalGenerator>> {
    let driver = ScpiSignalGenerator::new(cfg.model, transport);
    SignalGeneratorController::new(driver, bus, cfg.topics(), cfg.settle_delay())
}

/// Starts a signal generator bridge on `transport`.
///
/// Probes the instrument, then spawns the command handler and, if configured, the
/// polling task.
pub async fn start_signal_generator(
    cfg: &SignalGeneratorConfig,
    bus: &LocalBus,
    transport: SharedTransport,
) -> AppResult<Vec<TaskHandle>> {
    probe(&transport).await?;
    let controller = signal_generator_controller(cfg, bus, transport)?;
    let commands = controller.subscribe_commands(bus)?;

    let mut tasks = vec![controller.spawn_command_loop(commands)];
    if let Some(interval) = cfg.poll_interval() {
        // A failed poll ends the poller only; commands keep being served.
        tasks.push(controller.start_polling(interval).critical(false));
    }
    info!(
        model = cfg.model.name(),
        endpoint = %cfg.endpoint(),
        polling = cfg.poll_interval_ms.is_some(),
        "Signal generator bridge started"
    );
    Ok(tasks)
}

/// Starts a Lake Shore 218 bridge on `transport`.
pub async fn start_lakeshore218(
    cfg: &Lakeshore218Config,
    bus: &LocalBus,
    transport: SharedTransport,
) -> AppResult<Vec<TaskHandle>> {
    probe(&transport).await?;
    let controller = TemperatureController::new(Lakeshore218::new(transport), bus, &cfg.channels)?;
    info!(endpoint = %cfg.endpoint(), topics = ?controller.topics(), "Lakeshore218 bridge started");
    Ok(vec![controller.start_polling(cfg.poll_interval())])
}

/// Starts a TR-71W bridge fetching pages from `source`.
pub async fn start_tr71w<P: PageSource + 'static>(
    cfg: &Tr71wConfig,
    bus: &LocalBus,
    source: P,
) -> AppResult<Vec<TaskHandle>> {
    if let Err(e) = source.fetch().await {
        error!(endpoint = %source.endpoint(), error = %e, "Instrument unreachable");
        return Err(e);
    }
    let controller = TemperatureController::new(Tr71w::new(source), bus, &cfg.channels())?;
    info!(endpoint = %cfg.endpoint(), topics = ?controller.topics(), "TR-71W bridge started");
    Ok(vec![controller.start_polling(cfg.poll_interval())])
}

/// Starts the bridge for the configured instrument.
pub async fn start(config: &BridgeConfig, bus: &LocalBus, mode: Mode) -> AppResult<Vec<TaskHandle>> {
    match &config.instrument {
        InstrumentConfig::SignalGenerator(sg) => {
            start_signal_generator(sg, bus, signal_generator_transport(sg, mode)?).await
        }
        InstrumentConfig::Lakeshore218(ls) => {
            start_lakeshore218(ls, bus, lakeshore218_transport(ls, mode)?).await
        }
        InstrumentConfig::Tr71w(tr) => start_tr71w(tr, bus, page_source(tr, mode)?).await,
    }
}

/// Polls every monitored quantity once and returns what was published.
pub async fn read_once(config: &BridgeConfig, mode: Mode) -> AppResult<Vec<Envelope>> {
    let bus = LocalBus::new();
    let mut tap = bus.tap();
    match &config.instrument {
        InstrumentConfig::SignalGenerator(sg) => {
            let transport = signal_generator_transport(sg, mode)?;
            signal_generator_controller(sg, &bus, transport)?
                .poll_once()
                .await?;
        }
        InstrumentConfig::Lakeshore218(ls) => {
            let driver = Lakeshore218::new(lakeshore218_transport(ls, mode)?);
            TemperatureController::new(driver, &bus, &ls.channels)?
                .poll_once()
                .await?;
        }
        InstrumentConfig::Tr71w(tr) => {
            let driver = Tr71w::new(page_source(tr, mode)?);
            TemperatureController::new(driver, &bus, &tr.channels())?
                .poll_once()
                .await?;
        }
    }

    let mut published = Vec::new();
    while let Ok(envelope) = tap.try_recv() {
        published.push(envelope);
    }
    Ok(published)
}

// ============================================================================
// Supervision
// ============================================================================

/// Owns the running tasks and decides when the bridge stops.
#[derive(Default)]
pub struct Supervisor {
    tasks: Vec<TaskHandle>,
}

impl Supervisor {
    /// Empty supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task.
    pub fn push(&mut self, task: TaskHandle) {
        self.tasks.push(task);
    }

    /// Adds several tasks.
    pub fn extend(&mut self, tasks: impl IntoIterator<Item = TaskHandle>) {
        self.tasks.extend(tasks);
    }

    /// Number of tasks still supervised.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task is supervised.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs until `shutdown` resolves or a task fails, then stops every task.
    ///
    /// A task that returns `Ok`, or a non-critical task that fails, is dropped from
    /// supervision without stopping the others. The first critical task error is returned.
    pub async fn run_until<F>(mut self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let outcome = loop {
            if self.tasks.is_empty() {
                (&mut shutdown).await;
                break Ok(());
            }
            let finished = {
                let waits = self.tasks.iter_mut().map(|task| Box::pin(task.wait()));
                tokio::select! {
                    _ = &mut shutdown => None,
                    (result, index, _) = futures::future::select_all(waits) => Some((index, result)),
                }
            };
            match finished {
                None => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                Some((index, result)) => {
                    let task = self.tasks.remove(index);
                    match result {
                        Ok(()) => info!(task = task.name(), "Task finished"),
                        Err(e) if task.is_critical() => {
                            error!(task = task.name(), error = %e, "Task failed, shutting down");
                            break Err(e);
                        }
                        Err(e) => {
                            error!(task = task.name(), error = %e, "Task failed, bridge keeps running");
                        }
                    }
                }
            }
        };
        let stopped = self.shutdown().await;
        outcome.and(stopped)
    }

    /// Stops every task and waits for all of them.
    pub async fn shutdown(self) -> AppResult<()> {
        for task in &self.tasks {
            task.stop();
        }
        let mut first_error = None;
        for task in self.tasks {
            let name = task.name().to_string();
            if let Err(e) = task.join().await {
                warn!(task = %name, error = %e, "Task ended with an error during shutdown");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C, running until a task stops");
        std::future::pending::<()>().await;
    }
}

/// Runs the bridge with the stdio relay until Ctrl-C or a task failure.
pub async fn run(config: &BridgeConfig, mode: Mode) -> AppResult<()> {
    let span = tracing::info_span!("bridge", name = %config.application.name);
    async move {
        let bus = LocalBus::new();
        let mut supervisor = Supervisor::new();
        supervisor.push(relay::spawn_outbound(&bus, tokio::io::stdout()));

        match start(config, &bus, mode).await {
            Ok(tasks) => supervisor.extend(tasks),
            Err(e) => {
                // Stop errors are logged by `shutdown`; the start error wins.
                let _ = supervisor.shutdown().await;
                return Err(e);
            }
        }
        supervisor.push(relay::spawn_inbound(&bus, BufReader::new(tokio::io::stdin())));

        info!(instrument = %config.describe(), ?mode, "Bridge running");
        supervisor.run_until(shutdown_signal()).await
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Message;
    use crate::config::{ApplicationConfig, Connection, TopicOverrides};
    use crate::driver::SignalGeneratorModel;
    use tracing_test::traced_test;

    fn sg_config() -> BridgeConfig {
        BridgeConfig {
            application: ApplicationConfig {
                name: "sim".to_string(),
                log_level: "info".to_string(),
            },
            instrument: InstrumentConfig::SignalGenerator(SignalGeneratorConfig {
                model: SignalGeneratorModel::E8257d,
                host: "10.0.0.5".to_string(),
                port: 1,
                connection: Connection::Gpib,
                timeout_ms: 3000,
                settle_delay_ms: 10,
                poll_interval_ms: None,
                topics: TopicOverrides::default(),
            }),
        }
    }

    #[tokio::test]
    async fn test_read_once_simulated_signal_generator() {
        let published = read_once(&sg_config(), Mode::Simulated).await.unwrap();
        let topics: Vec<&str> = published.iter().map(|e| e.topic.as_str()).collect();
        assert_eq!(topics, vec!["e8257d_freq", "e8257d_power", "e8257d_onoff"]);
        assert_eq!(published[0].message, Message::Float64(1.0));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreachable_instrument_fails_start() {
        let InstrumentConfig::SignalGenerator(sg) = sg_config().instrument else {
            unreachable!()
        };
        let bus = LocalBus::new();
        let transport = SharedTransport::new(MockTransport::unreachable(sg.endpoint()));
        let err = start_signal_generator(&sg, &bus, transport).await.unwrap_err();
        assert!(err.is_connection());
        assert!(logs_contain("Instrument unreachable"));
    }

    #[tokio::test]
    async fn test_supervisor_returns_first_task_error() {
        let mut supervisor = Supervisor::new();
        supervisor.push(TaskHandle::spawn("ok", |_| async { Ok(()) }));
        supervisor.push(TaskHandle::spawn("idle", |mut stop| async move {
            stop.stopped().await;
            Ok(())
        }));
        supervisor.push(TaskHandle::spawn("broken", |_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(BridgeError::parse("x", "bad reply"))
        }));

        let result = supervisor.run_until(std::future::pending()).await;
        assert!(matches!(result, Err(BridgeError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_supervisor_survives_non_critical_failure() {
        let mut supervisor = Supervisor::new();
        supervisor.push(
            TaskHandle::spawn("poller", |_| async { Err(BridgeError::parse("x", "bad reply")) })
                .critical(false),
        );
        supervisor.push(TaskHandle::spawn("commands", |mut stop| async move {
            stop.stopped().await;
            Ok(())
        }));

        supervisor
            .run_until(tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_stops_tasks_on_shutdown() {
        let mut supervisor = Supervisor::new();
        supervisor.push(TaskHandle::spawn("idle", |mut stop| async move {
            stop.stopped().await;
            Ok(())
        }));
        assert_eq!(supervisor.len(), 1);

        supervisor
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap();
    }
}
