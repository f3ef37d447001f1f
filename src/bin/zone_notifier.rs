//! zone_notifier - restricted zone occupancy notifier
//!
//! This daemon:
//! 1. Loads configuration (file, environment, command line)
//! 2. Connects to the MQTT broker and subscribes to the status topic
//! 3. Opens the video input and loads the detection model
//! 4. Runs the tick loop until end of stream, `q`, or Ctrl-C
//! 5. Publishes `{"Person": 0|1}` every interval from a background thread

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zone_notifier::detect::backend_for_model;
use zone_notifier::ingest::{open_source, FileConfig};
use zone_notifier::interaction::terminal_console;
use zone_notifier::transport::{
    parse_mqtt_endpoint, MqttSettings, TlsMaterials, DEFAULT_CONNECT_TIMEOUT,
};
use zone_notifier::{
    ConfigOverrides, FrameDisplay, FramePipeline, InferenceScheduler, InteractionController,
    LogDisplay, MessageBus, MqttBus, NotifierConfig, NotifierError, OccupancyCell,
    PipelineContext, PublisherConfig, RecordingBus, Result, RunSummary,
};

#[derive(Parser, Debug)]
#[command(
    name = "zone_notifier",
    about = "Publish restricted-zone occupancy detected in a video stream"
)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "ZONE_NOTIFIER_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the detection model (`.onnx`, or `stub://` for a dry run).
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Target device: CPU, GPU, MYRIAD, HETERO:FPGA,CPU, HDDL or MULTI:<list>.
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Minimum confidence for a detection to count.
    #[arg(short = 't', long = "prob-threshold")]
    prob_threshold: Option<f32>,

    /// Zone origin x. Zero or negative snaps the origin to (0, 0).
    #[arg(short = 'x', long = "pointx", allow_hyphen_values = true)]
    point_x: Option<i32>,

    /// Zone origin y. Zero or negative snaps the origin to (0, 0).
    #[arg(short = 'y', long = "pointy", allow_hyphen_values = true)]
    point_y: Option<i32>,

    /// Zone width. Zero means the frame width.
    #[arg(short = 'w', long, allow_hyphen_values = true)]
    width: Option<i32>,

    /// Zone height. Zero means the frame height.
    #[arg(short = 'H', long, allow_hyphen_values = true)]
    height: Option<i32>,

    /// Seconds between status messages.
    #[arg(short = 'r', long)]
    rate: Option<u64>,

    /// Model input size as WIDTHxHEIGHT, used when the model does not declare one.
    #[arg(long)]
    input_size: Option<String>,

    /// Channel order the model expects: bgr or rgb.
    #[arg(long)]
    channel_order: Option<String>,

    /// Scheduling mode: sync or async.
    #[arg(short = 'f', long)]
    flag: Option<String>,

    /// Video file, image directory, camera number, `cam`, or `stub://` input.
    #[arg(short = 'i', long)]
    input: Option<String>,

    /// MQTT broker address (host, host:port, mqtt://, mqtts://).
    #[arg(long)]
    mqtt_broker_addr: Option<String>,

    /// MQTT topic for status messages.
    #[arg(long)]
    mqtt_topic: Option<String>,

    /// Force TLS for the MQTT connection.
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// CA certificate (PEM) for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Client certificate (PEM) for MQTT mutual TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Client key (PEM) for MQTT mutual TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// Write an overlay PNG every N frames into this directory.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Do not read operator keys from stdin.
    #[arg(long)]
    no_console: bool,

    /// Keep status messages in memory instead of connecting to a broker.
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            model: self.model.clone(),
            device: self.device.clone(),
            threshold: self.prob_threshold,
            mode: self.flag.clone(),
            model_input_size: self.input_size.clone(),
            channel_order: self.channel_order.clone(),
            roi_x: self.point_x,
            roi_y: self.point_y,
            roi_width: self.width,
            roi_height: self.height,
            input: self.input.clone(),
            publish_interval_secs: self.rate,
            mqtt_broker: self.mqtt_broker_addr.clone(),
            mqtt_topic: self.mqtt_topic.clone(),
            mqtt_use_tls: self.mqtt_use_tls,
            snapshot_dir: self.snapshot_dir.clone(),
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(summary) => {
            log::info!(
                "zone_notifier stopped ({}): {} ticks, {} status messages",
                summary.stop_reason,
                summary.ticks,
                summary.published
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(args: Args) -> Result<RunSummary> {
    let mut cfg = NotifierConfig::load_with(&args.overrides())?;
    if args.mqtt_tls_ca_path.is_some() {
        cfg.mqtt.tls_ca_path = args.mqtt_tls_ca_path.clone();
    }
    if args.mqtt_tls_client_cert_path.is_some() {
        cfg.mqtt.tls_client_cert_path = args.mqtt_tls_client_cert_path.clone();
    }
    if args.mqtt_tls_client_key_path.is_some() {
        cfg.mqtt.tls_client_key_path = args.mqtt_tls_client_key_path.clone();
    }
    let device = cfg.parsed_device()?;

    log::info!(
        "model={} device={} threshold={} mode={} input={}",
        cfg.model,
        device,
        cfg.threshold,
        cfg.mode,
        cfg.input
    );
    log::info!("ROI: {}", cfg.region);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| NotifierError::Configuration(format!("cannot set Ctrl-C handler: {}", e)))?;
    }

    let bus: Arc<dyn MessageBus> = if args.dry_run {
        log::warn!("dry run: status messages are not sent to a broker");
        Arc::new(RecordingBus::new())
    } else {
        Arc::new(connect_bus(&cfg)?)
    };
    if let Err(err) = bus.subscribe(&cfg.mqtt.topic) {
        let _ = bus.disconnect();
        return Err(err);
    }

    let mut source = match open_source(&FileConfig::new(cfg.input.clone())) {
        Ok(source) => source,
        Err(err) => {
            let _ = bus.disconnect();
            return Err(err);
        }
    };

    let scheduler = backend_for_model(&cfg.model, cfg.model_input_size).and_then(|backend| {
        InferenceScheduler::start(backend, Path::new(&cfg.model), &device, cfg.mode)
    });
    let scheduler = match scheduler {
        Ok(scheduler) => scheduler,
        Err(err) => {
            let _ = source.close();
            let _ = bus.disconnect();
            return Err(err);
        }
    };

    let display: Box<dyn FrameDisplay> = match &cfg.display.snapshot_dir {
        Some(dir) => match LogDisplay::new().with_snapshots(dir, cfg.display.snapshot_every) {
            Ok(display) => Box::new(display),
            Err(err) => {
                drop(scheduler);
                let _ = source.close();
                let _ = bus.disconnect();
                return Err(err);
            }
        },
        None => Box::new(LogDisplay::new()),
    };

    let controller = if args.no_console {
        InteractionController::disabled()
    } else {
        log::info!("keys: c = redraw zone, m/tab = toggle sync/async, q/esc = quit (then Enter)");
        let (input, selector) = terminal_console();
        InteractionController::new(Box::new(input), Box::new(selector))
    };

    let mut ctx = PipelineContext::new(
        cfg.region,
        cfg.mode,
        cfg.threshold,
        OccupancyCell::default(),
    );
    FramePipeline::new(
        source,
        scheduler,
        display,
        bus,
        PublisherConfig {
            topic: cfg.mqtt.topic.clone(),
            interval: cfg.publish_interval,
        },
    )
    .with_controller(controller)
    .with_preprocess(cfg.preprocess)
    .with_stop_flag(stop)
    .run(&mut ctx)
}

fn connect_bus(cfg: &NotifierConfig) -> Result<MqttBus> {
    let endpoint = parse_mqtt_endpoint(&cfg.mqtt.broker, cfg.mqtt.use_tls)
        .map_err(|e| NotifierError::Configuration(format!("{:#}", e)))?;
    let tls = TlsMaterials::load(
        cfg.mqtt.tls_ca_path.as_deref(),
        cfg.mqtt.tls_client_cert_path.as_deref(),
        cfg.mqtt.tls_client_key_path.as_deref(),
    )
    .map_err(|e| NotifierError::Configuration(format!("{:#}", e)))?;
    let settings = MqttSettings {
        endpoint,
        client_id: cfg.mqtt.client_id.clone(),
        keep_alive: cfg.mqtt.keep_alive,
        username: cfg.mqtt.username.clone(),
        password: cfg.mqtt.password.clone(),
        connect_timeout: DEFAULT_CONNECT_TIMEOUT,
    };
    MqttBus::connect(&settings, &tls)
}
