use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use body_scan::{
    completion::OpenAiClient,
    config::AppConfig,
    food,
    measurement::CalibratedMetrics,
    pipeline::{load_segmenter, run_cycle},
    server::ApiServer,
    types::{Band, Frame, Sample, format_ratio},
};
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "body-scan")]
#[command(author, version, about = "Body measurements from a camera, with diet and food estimates", long_about = None)]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List cameras
    Cameras,
    /// Live scan: c = capture, r = reset, d = diet plan, q = quit
    Scan {
        /// Camera index, overrides the config
        #[arg(long)]
        camera: Option<u32>,
    },
    /// Measure the person in a single image
    Measure { image: PathBuf },
    /// Estimate calories in a food photo
    Food { image: PathBuf },
    /// Serve the JSON API
    Serve {
        /// Listen address, overrides the config
        #[arg(long)]
        listen: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Cameras => list_cameras(cli.json),
        Command::Scan { camera } => scan::run(&config, camera.unwrap_or(config.camera.index)),
        Command::Measure { image } => measure(&config, &image, cli.json),
        Command::Food { image } => identify_food(&config, &image, cli.json),
        Command::Serve { listen } => serve(&config, listen),
    }
}

#[cfg(feature = "camera-nokhwa")]
fn list_cameras(json: bool) -> Result<()> {
    let cameras = body_scan::pipeline::available_cameras().context("failed to query cameras")?;
    if json {
        let list: Vec<_> = cameras
            .iter()
            .map(|cam| json!({ "index": cam.index.to_string(), "label": cam.label }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }
    if cameras.is_empty() {
        println!("no cameras found");
    }
    for cam in &cameras {
        println!("{}: {}", cam.index, cam.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn list_cameras(_json: bool) -> Result<()> {
    anyhow::bail!("built without camera support (enable the camera-nokhwa feature)")
}

fn measure(config: &AppConfig, image: &Path, json: bool) -> Result<()> {
    let rgb = image::open(image)
        .with_context(|| format!("failed to open {}", image.display()))?
        .to_rgb8();
    let frame = Frame::from_rgb_image(rgb);

    let mut segmenter = load_segmenter(&config.segmentation)?;
    let sample = run_cycle(&mut segmenter, &config.measurement, &frame)?;
    let calibrated = config
        .calibration
        .calibrate(&sample.metrics, sample.subject_height);

    if json {
        let out = json!({
            "metrics": sample.metrics,
            "subjectHeight": sample.subject_height,
            "calibrated": calibrated,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        let unit = if config.calibration.user_height_inches.is_some() {
            Some("in")
        } else if config.calibration.factor != 1.0 {
            Some("units")
        } else {
            None
        };
        print_sample(&sample, &calibrated, unit);
    }
    Ok(())
}

fn print_sample(sample: &Sample, calibrated: &CalibratedMetrics, unit: Option<&str>) {
    for band in Band::ALL {
        match (sample.metrics.measurement(band), calibrated.measurement(band), unit) {
            (Some(px), Some(value), Some(unit)) => {
                println!("{:<10} {px:>5}px  {value:.1} {unit}", band.label())
            }
            (Some(px), _, _) => println!("{:<10} {px:>5}px", band.label()),
            (None, _, _) => println!("{:<10}    --", band.label()),
        }
    }
    println!(
        "waist/shoulder {}",
        format_ratio(sample.metrics.waist_to_shoulder_ratio)
    );
    println!(
        "hip/waist      {}",
        format_ratio(sample.metrics.hip_to_waist_ratio)
    );
    println!(
        "scan           {}",
        if sample.metrics.is_valid_scan { "valid" } else { "incomplete" }
    );
}

fn identify_food(config: &AppConfig, image: &Path, json: bool) -> Result<()> {
    let bytes = fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let data_url = food::prepare_food_image(&bytes)?;
    let client = OpenAiClient::new(&config.completion)?;
    let analysis = food::identify_food(&client, &config.completion, &data_url)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }
    if let Some(calories) = analysis.calories {
        println!("{calories} calories\n");
    }
    for line in analysis.description.lines() {
        println!("- {line}");
    }
    Ok(())
}

fn serve(config: &AppConfig, listen: Option<String>) -> Result<()> {
    let addr = listen.unwrap_or_else(|| config.server.listen_addr.clone());
    let client = OpenAiClient::new(&config.completion)
        .context("the API server needs a completion key")?;
    let server = ApiServer::bind(addr.as_str(), client, config.completion.clone())
        .with_context(|| format!("failed to listen on {addr}"))?;
    println!("listening on http://{}", server.local_addr()?);
    server.run()
}

#[cfg(feature = "camera-nokhwa")]
mod scan {
    use std::{
        io::{self, BufRead},
        sync::Arc,
        thread,
        time::Duration,
    };

    use anyhow::Result;
    use body_scan::{
        completion::{CompletionError, OpenAiClient},
        config::AppConfig,
        diet,
        pipeline::{CameraStream, load_segmenter, start_camera_stream, start_sampler},
        session::{DietRequest, ScanSession},
        types::Frame,
    };
    use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
    use nokhwa::utils::CameraIndex;

    type PlanResult = (u64, Result<String, CompletionError>);

    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn run(config: &AppConfig, camera_index: u32) -> Result<()> {
        let segmenter = load_segmenter(&config.segmentation)?;

        // The sender stays here so the sampler outlives a released camera.
        let (frame_tx, frame_rx) = bounded::<Frame>(1);
        let (sample_tx, sample_rx) = bounded(1);
        let index = CameraIndex::Index(camera_index);
        let mut camera = Some(start_camera_stream(index.clone(), frame_tx.clone())?);
        let sampler = start_sampler(segmenter, config.measurement.clone(), frame_rx, sample_tx);

        let client = match OpenAiClient::new(&config.completion) {
            Ok(client) => Some(Arc::new(client)),
            Err(err) => {
                log::warn!("diet plans unavailable: {err}");
                None
            }
        };
        let commands = spawn_stdin_reader();
        let (plan_tx, plan_rx) = unbounded::<PlanResult>();

        println!("commands: c = capture, r = reset, d = diet plan, q = quit");
        let mut session = ScanSession::new();
        let mut last_line = String::new();

        'scan: loop {
            match sample_rx.recv_timeout(POLL_INTERVAL) {
                Ok(sample) => {
                    session.update_live(sample);
                    if !session.is_captured() {
                        let line = session.live().metrics.summary_text();
                        if line != last_line {
                            println!("{line}");
                            last_line = line;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::error!("sampling stopped");
                    break;
                }
            }

            while let Ok((ticket, result)) = plan_rx.try_recv() {
                session.finish_diet_request(ticket, result);
                if let Some(plan) = session.diet_plan() {
                    println!("\n{plan}\n");
                }
            }

            loop {
                let command = match commands.try_recv() {
                    Ok(command) => command,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'scan,
                };
                match command.as_str() {
                    "c" => match session.capture() {
                        Ok(metrics) => println!("captured: {}", metrics.summary_text()),
                        Err(err) => println!("{err}"),
                    },
                    "r" => {
                        session.reset();
                        last_line.clear();
                        println!("back to live");
                    }
                    "d" => match session.begin_diet_request() {
                        Ok(request) => {
                            println!("generating diet plan...");
                            request_plan(client.clone(), config, request, plan_tx.clone());
                        }
                        Err(err) => println!("{err}"),
                    },
                    "q" => break 'scan,
                    "" => {}
                    other => println!("unknown command {other:?}"),
                }
                sync_camera(&session, &mut camera, &index, &frame_tx);
            }
        }

        sampler.stop();
        if let Some(camera) = camera {
            camera.stop();
        }
        Ok(())
    }

    /// Releases the device while a snapshot is held and reopens it once the
    /// session is live again.
    fn sync_camera(
        session: &ScanSession,
        camera: &mut Option<CameraStream>,
        index: &CameraIndex,
        frame_tx: &Sender<Frame>,
    ) {
        if !session.wants_camera() {
            if let Some(stream) = camera.take() {
                log::info!("releasing camera while measurements are captured");
                stream.stop();
            }
            return;
        }
        if camera.is_none() {
            match start_camera_stream(index.clone(), frame_tx.clone()) {
                Ok(stream) => *camera = Some(stream),
                Err(err) => {
                    log::error!("failed to reopen camera: {err:?}");
                    println!("camera unavailable: {err}");
                }
            }
        }
    }

    fn request_plan(
        client: Option<Arc<OpenAiClient>>,
        config: &AppConfig,
        request: DietRequest,
        plan_tx: Sender<PlanResult>,
    ) {
        let Some(client) = client else {
            let _ = plan_tx.send((request.ticket, Err(CompletionError::MissingApiKey)));
            return;
        };
        let settings = config.completion.clone();
        thread::spawn(move || {
            let plan = diet::generate_diet_plan(&*client, &settings, &request.metrics);
            let _ = plan_tx.send((request.ticket, plan));
        });
    }

    fn spawn_stdin_reader() -> Receiver<String> {
        let (tx, rx) = unbounded();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line.trim().to_lowercase()).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

#[cfg(not(feature = "camera-nokhwa"))]
mod scan {
    use anyhow::Result;
    use body_scan::config::AppConfig;

    pub fn run(_config: &AppConfig, _camera_index: u32) -> Result<()> {
        anyhow::bail!("built without camera support (enable the camera-nokhwa feature)")
    }
}
