use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};

use ez1_mqtt_rs::config::Config;
use ez1_mqtt_rs::ez1::{Ez1Client, PowerStatus};
use ez1_mqtt_rs::mqtt::{self, MqttPublisher, SensorPublisher};
use ez1_mqtt_rs::coordinator::NotifyMode;
use ez1_mqtt_rs::PollingCoordinator;

/// EZ1 MQTT Bridge - Publishes APsystems EZ1 inverter data to MQTT
#[derive(Parser)]
#[command(name = "ez1-mqtt-rs")]
#[command(version)]
#[command(about = "EZ1 MQTT Bridge - Publishes APsystems EZ1 inverter data to MQTT", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the inverter and publish to MQTT (default)
    Run,
    /// Print device information
    Info,
    /// Print alarm flags
    Alarm,
    /// Print output data and totals
    Output,
    /// Print the configured power limit
    GetMaxPower,
    /// Set the power limit in watts (30..=800)
    SetMaxPower { watts: i64 },
    /// Print whether the inverter is producing
    GetPowerStatus,
    /// Switch the inverter on (0, ON) or off (1, SLEEP, OFF)
    SetPowerStatus { status: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration first (to get log level)
    let config_path = cli.config;
    let config = Config::from_file(&config_path)?;

    // Initialize tracing with log level from config
    let app_log_level = config.default.log_level.as_str();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("ez1_mqtt_rs={}", app_log_level).parse()?)
                .add_directive("reqwest=warn".parse()?)
                .add_directive("hyper=warn".parse()?),
        )
        .init();

    info!("Configuration loaded from: {}", config_path);
    debug!("Debug logging is enabled");

    let client = Ez1Client::new(&config.ez1.host, config.ez1.port, config.ez1.timeout)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, client).await?,
        Command::Info => {
            let info = client.get_device_info().await?;
            println!("Device ID:  {}", info.device_id);
            println!("Firmware:   {}", info.firmware_version);
            println!("SSID:       {}", info.ssid);
            println!("IP address: {}", info.ip_address);
            println!("Power:      {}..{} W", info.min_power, info.max_power);
        }
        Command::Alarm => {
            let alarm = client.get_alarm_info().await?;
            println!("Off grid:           {}", alarm.off_grid);
            println!("DC1 short circuit:  {}", alarm.dc1_short_circuit);
            println!("DC2 short circuit:  {}", alarm.dc2_short_circuit);
            println!("Output fault:       {}", alarm.output_fault);
        }
        Command::Output => {
            let output = client.get_output_data().await?;
            println!(
                "P1: {:.1} W  today {:.3} kWh  lifetime {:.3} kWh",
                output.p1, output.e1, output.te1
            );
            println!(
                "P2: {:.1} W  today {:.3} kWh  lifetime {:.3} kWh",
                output.p2, output.e2, output.te2
            );
            println!(
                "Total: {:.1} W  today {:.3} kWh  lifetime {:.3} kWh",
                output.total_power(),
                output.today_energy(),
                output.lifetime_energy()
            );
        }
        Command::GetMaxPower => {
            println!("{} W", client.get_max_power().await?);
        }
        Command::SetMaxPower { watts } => {
            let confirmed = client.set_max_power(watts).await?;
            println!("Max power set to {} W", confirmed);
        }
        Command::GetPowerStatus => {
            println!("{}", client.get_power_status().await?);
        }
        Command::SetPowerStatus { status } => {
            let confirmed = client.set_power_status_alias(&status).await?;
            println!("Power status set to {}", confirmed);
        }
    }

    Ok(())
}

/// Publish alarms, power limit and power status; returns the alarms for change detection
async fn publish_device_state(
    client: &Ez1Client,
    publisher: &MqttPublisher,
    last_alarms: Option<&mqtt::Alarms>,
) -> anyhow::Result<mqtt::Alarms> {
    let alarms = mqtt::Alarms::from_ez1(&client.get_alarm_info().await?);
    publisher.publish_alarms(&alarms, last_alarms)?;

    let max_power = client.get_max_power().await?;
    publisher.publish_max_power(max_power)?;

    let status: PowerStatus = client.get_power_status().await?;
    publisher.publish_power_status(status)?;

    debug!("Device state: max power {} W, {}", max_power, status);
    Ok(alarms)
}

async fn run(config: Config, client: Ez1Client) -> anyhow::Result<()> {
    info!("  EZ1 Host: {}:{}", config.ez1.host, config.ez1.port);
    info!("  MQTT Root: {}", config.mqtt.root);
    info!("  Interval: {:?}", config.ez1.interval);
    info!("  Info Interval: {:?}", config.ez1.info_interval);

    let coordinator = Arc::new(PollingCoordinator::new(
        client.clone(),
        config.ez1.coordinator(),
    )?);

    ctrlc::set_handler({
        let coordinator = coordinator.clone();
        move || coordinator.shutdown()
    })?;

    // The inverter is unpowered at night, so wait for it instead of failing
    let Some(device_info) = coordinator
        .retry_until_ready(config.ez1.interval, || coordinator.source().get_device_info())
        .await
    else {
        info!("Shut down before the inverter answered");
        return Ok(());
    };
    let device_id = device_info.device_id.clone();
    info!("Device ID: {}", device_id);

    info!("Creating MQTT publisher...");
    let publisher = MqttPublisher::new(&config, &device_id)?;

    // Give MQTT a moment to connect
    tokio::time::sleep(Duration::from_millis(500)).await;

    publisher.publish_online_status(true)?;
    publisher.publish_system_info(&mqtt::SystemInfo::from_ez1(&device_info, &config.ez1.name))?;
    publisher.publish_sensor_config(&config.ez1.name)?;
    info!("✓ Published system info");

    if config.ez1.notify != NotifyMode::Always {
        warn!(
            "notify = {:?}: sensor values are only republished on matching cycles",
            config.ez1.notify
        );
    }
    coordinator.subscribe(SensorPublisher::new(publisher.clone()));

    let info_interval = config.ez1.info_interval;
    let device_state = tokio::spawn({
        let publisher = publisher.clone();
        async move {
            let mut last_alarms: Option<mqtt::Alarms> = None;
            loop {
                match publish_device_state(&client, &publisher, last_alarms.as_ref()).await {
                    Ok(alarms) => last_alarms = Some(alarms),
                    Err(e) => error!("Failed to publish device state: {}", e),
                }
                tokio::time::sleep(info_interval).await;
            }
        }
    });

    info!("Starting main loop...");
    coordinator.run().await;

    device_state.abort();
    publisher.publish_online_status(false)?;
    // Let the event loop flush the last message
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
