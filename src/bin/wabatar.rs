use clap::{App, Arg};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, Level};
use wabatar::api;
use wabatar::config::Config;
use wabatar::datalog::DataLog;
use wabatar::forwarder::Forwarder;
use wabatar::http::HttpServer;
use wabatar::observer::{LogObserver, ObserverError, StatusObserver};
use wabatar::reactor;
use wabatar::session::{now_millis, DeviceStatus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("wabatar")
        .version("0.1.0")
        .author("Environmental Controls Team")
        .about("🌡️  Serial monitor and control daemon for environmental life-support units")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .value_name("FILE")
                .help("Append a CSV row for every status update to FILE")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("debug")
                .long("debug")
                .help("Enable debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("debug") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config_path = matches.value_of("config").unwrap_or_default();
    info!("Loading configuration from {}", config_path);
    let config = Config::load(config_path)?;

    let forwarder = match &config.telemetry {
        Some(telemetry) => {
            info!("📡 Forwarding telemetry to {}", telemetry.url);
            Some(Forwarder::new(telemetry)?)
        }
        None => None,
    };

    let datalog = match matches.value_of("log") {
        Some(path) => {
            info!("Logging to {}", path);
            Some(Arc::new(StdMutex::new(DataLog::append(path)?)))
        }
        None => None,
    };

    let mut devices = BTreeMap::new();
    let mut reactors = JoinSet::new();

    for device in &config.devices {
        let (mut session, link) = reactor::open(device, now_millis())?;

        session.register_observer(Box::new(LogObserver));
        if let Some(datalog) = &datalog {
            let datalog = Arc::clone(datalog);
            session.register_observer(Box::new(
                move |status: &DeviceStatus| -> Result<(), ObserverError> {
                    datalog
                        .lock()
                        .map_err(|_| "data log lock poisoned")?
                        .on_status(status)
                },
            ));
        }
        if let Some(forwarder) = &forwarder {
            session.register_observer(Box::new(forwarder.clone()));
        }

        let session = Arc::new(Mutex::new(session));
        devices.insert(device.name.clone(), Arc::clone(&session));

        let name = device.name.clone();
        reactors.spawn(async move { (name, reactor::run(link, session).await) });
    }

    let devices = Arc::new(devices);

    let http = HttpServer::bind(&config.listen)?;
    let http_devices = Arc::clone(&devices);
    let runtime = Handle::current();
    std::thread::Builder::new()
        .name("http".to_string())
        .spawn(move || http.run(http_devices, runtime))?;

    let listener = TcpListener::bind(&config.api_listen).await?;
    let api_server = tokio::spawn(api::serve(listener, devices));

    println!("🚀 Wabatar running with {} device(s)", config.devices.len());

    // Losing any serial link is fatal for the whole process.
    let outcome = reactors.join_next().await;
    api_server.abort();
    reactors.abort_all();

    match outcome {
        Some(Ok((name, e))) => {
            error!("❌ Device {} stopped: {}", name, e);
            Err(e.into())
        }
        Some(Err(e)) => {
            error!("❌ Device reactor panicked: {}", e);
            Err(e.into())
        }
        None => Ok(()),
    }
}
