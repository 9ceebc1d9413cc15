use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use wabatar::api::{ApiRequest, ApiResponse};
use wabatar::protocol::{IDX_CO2, IDX_O2, IDX_PRESSURE, IDX_RH, IDX_TEMPERATURE};
use wabatar::session::DeviceStatus;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8081";
const REQUEST_TIMEOUT_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("wabatar-ctl")
        .version("0.1.0")
        .author("Environmental Controls Team")
        .about("🌡️  Query and control devices managed by a wabatar daemon")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Daemon host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Daemon API port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("📊 Show sensors and setpoints for every device"),
        )
        .subcommand(
            SubCommand::with_name("setpoint")
                .about("🎛️  Write a setpoint and re-poll the device")
                .arg(
                    Arg::with_name("name")
                        .help("Device name")
                        .required(true),
                )
                .arg(
                    Arg::with_name("index")
                        .help("Setpoint index (0, 2, 3 or 4)")
                        .required(true)
                        .possible_values(&["0", "2", "3", "4"]),
                )
                .arg(
                    Arg::with_name("value")
                        .help("New setpoint value")
                        .required(true)
                        .validator(|v| match v.parse::<f64>() {
                            Ok(value) if value.is_finite() => Ok(()),
                            _ => Err("Value must be a number".into()),
                        }),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("status", _) => handle_status(host, port, format).await?,
        ("setpoint", Some(sub_matches)) => handle_setpoint(sub_matches, host, port, format).await?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
        }
    }

    Ok(())
}

async fn handle_status(host: &str, port: u16, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (raw, response) = send_request(host, port, &ApiRequest::Status).await?;

    if format == "json" {
        println!("{}", raw);
        return Ok(());
    }

    if !response.ok {
        print_failure(&response);
        return Ok(());
    }

    let statuses = response.statuses.unwrap_or_default();
    if statuses.is_empty() {
        println!("{}", "No devices configured".yellow());
    }
    for status in &statuses {
        print_device_status(status);
    }
    Ok(())
}

async fn handle_setpoint(
    matches: &ArgMatches<'_>,
    host: &str,
    port: u16,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = matches.value_of("name").unwrap_or_default().to_string();
    let index = matches.value_of("index").unwrap_or_default().parse::<u8>()?;
    let value = matches.value_of("value").unwrap_or_default().parse::<f64>()?;

    let request = ApiRequest::WriteSetpoint {
        name: name.clone(),
        index,
        value,
    };
    let (raw, response) = send_request(host, port, &request).await?;

    if format == "json" {
        println!("{}", raw);
    } else if response.ok {
        println!(
            "{} {} setpoint {} set to {}",
            "✅".green(),
            name.bright_white(),
            index.to_string().bright_cyan(),
            value.to_string().bright_cyan()
        );
        println!("{}", "Value will appear in status once the device confirms it".dimmed());
    } else {
        print_failure(&response);
    }
    Ok(())
}

fn print_device_status(status: &DeviceStatus) {
    println!("\n{} {}", "🌡️ ".bright_blue(), status.name.bright_blue().bold());

    println!("{:<14} {:>10} {:>10}", "".normal(), "Sensor".bright_white(), "Setpoint".bright_white());
    let rows = [
        ("Temperature", IDX_TEMPERATURE),
        ("CO2", IDX_CO2),
        ("O2", IDX_O2),
        ("Pressure", IDX_PRESSURE),
        ("Humidity", IDX_RH),
    ];
    for (label, index) in rows {
        let sensor = match &status.sensors {
            Some(reading) => format!("{:>10.2}", reading.values[index]).green(),
            None => format!("{:>10}", "-").dimmed(),
        };
        let setpoint = if index == IDX_RH {
            format!("{:>10}", "-").dimmed()
        } else {
            format!("{:>10.2}", status.setpoints.values[index]).cyan()
        };
        println!("{:<14} {} {}", label.bright_white(), sensor, setpoint);
    }

    match &status.sensors {
        Some(reading) => println!("{} {}", "Sensors at:".dimmed(), reading.timestamp),
        None => println!("{}", "No sensor reading yet".yellow()),
    }
    println!("{} {}", "Setpoints at:".dimmed(), status.setpoints.timestamp);
}

fn print_failure(response: &ApiResponse) {
    let message = response.message.as_deref().unwrap_or("unknown error");
    println!("{} {}", "❌".red(), message.bright_red());
}

async fn send_request(
    host: &str,
    port: u16,
    request: &ApiRequest,
) -> Result<(String, ApiResponse), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to wabatar at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Daemon is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "wabatar --config wabatar.json".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let request_json = serde_json::to_string(request)?;
    let exchange = async {
        let (reader, mut writer) = stream.into_split();
        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut line = String::new();
        if BufReader::new(reader).read_line(&mut line).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Server closed connection",
            ));
        }
        Ok(line)
    };

    match tokio::time::timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS), exchange).await {
        Ok(line) => {
            let line = line?;
            let response = serde_json::from_str::<ApiResponse>(line.trim())?;
            Ok((line.trim().to_string(), response))
        }
        Err(_) => {
            eprintln!("{} Request timed out after {} seconds", "⏰".yellow(), REQUEST_TIMEOUT_SECS);
            Err("Request timeout".into())
        }
    }
}
