use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use u3vcam::storage::{compose_preview, save_frame, save_preview};
use u3vcam::{SdkContext, SimulatedSdk, UsbCamera, ViewerConfig};

const USAGE: &str = "Usage: u3vcam-cli <command> [args]

Commands:
  list-devices [--json]
  info <cam_id> [--json]
  stream [--config <file>] [--cam <id>]... [--frames <n>] [--refresh <hz>]
         [--capture] [--save] [--preview <file>] [--json]";

fn main() -> Result<()> {
    u3vcam::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "list-devices" => cmd_list_devices(&args),
        "info" => cmd_info(&args),
        "stream" => cmd_stream(&args),
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

fn open_context() -> Result<Arc<SdkContext>> {
    let sdk = Arc::new(SimulatedSdk::with_default_cameras());
    let context = SdkContext::initialized(sdk).context("failed to initialize camera API")?;
    context.refresh()?;
    context.log_system_info();
    Ok(context)
}

fn cmd_list_devices(args: &[String]) -> Result<()> {
    let context = open_context()?;
    let cameras = context.enumerate()?;

    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&cameras)?);
    } else {
        for c in cameras {
            println!(
                "{}: {} {} ({}) [{}]",
                c.index, c.manufacturer, c.model, c.serial_number, c.camera_type
            );
        }
    }
    Ok(())
}

fn cmd_info(args: &[String]) -> Result<()> {
    let Some(cam_id) = args.get(2) else {
        eprintln!("Usage: u3vcam-cli info <cam_id> [--json]");
        std::process::exit(1);
    };
    let cam_id: u32 = cam_id
        .parse()
        .with_context(|| format!("invalid camera id: {cam_id}"))?;

    let context = open_context()?;
    let mut camera = UsbCamera::new(context, cam_id, Default::default());
    camera
        .initialize()
        .with_context(|| format!("failed to initialize camera {cam_id}"))?;

    #[derive(Serialize)]
    struct Info<'a> {
        camera: Option<&'a u3vcam::CameraInfo>,
        capabilities: Option<&'a u3vcam::CameraCapabilities>,
        effective: Option<&'a u3vcam::EffectiveConfiguration>,
    }

    if args.contains(&"--json".to_string()) {
        let info = Info {
            camera: camera.camera_info(),
            capabilities: camera.capabilities(),
            effective: camera.effective_configuration(),
        };
        println!("{}", serde_json::to_string(&info)?);
    } else {
        if let Some(info) = camera.camera_info() {
            println!("{info}");
        }
        if let Some(caps) = camera.capabilities() {
            println!("{caps}");
        }
        if let Some(effective) = camera.effective_configuration() {
            println!(
                "Effective: {}x{} @ {} fps (sensor {}x{})",
                effective.width,
                effective.height,
                effective
                    .framerate
                    .map_or_else(|| "n/a".to_string(), |f| f.to_string()),
                effective.sensor_width,
                effective.sensor_height
            );
        }
    }

    camera.destroy()?;
    Ok(())
}

struct StreamArgs {
    config: Option<PathBuf>,
    cams: Vec<u32>,
    frames: Option<u64>,
    refresh: Option<u32>,
    capture: bool,
    save: bool,
    preview: Option<PathBuf>,
    json: bool,
}

fn parse_stream_args(args: &[String]) -> Result<StreamArgs> {
    let mut parsed = StreamArgs {
        config: None,
        cams: Vec::new(),
        frames: None,
        refresh: None,
        capture: false,
        save: false,
        preview: None,
        json: false,
    };

    let mut i = 2;
    while i < args.len() {
        let value = |i: usize| {
            args.get(i + 1)
                .with_context(|| format!("{} requires a value", args[i]))
        };
        match args[i].as_str() {
            "--config" => {
                parsed.config = Some(PathBuf::from(value(i)?));
                i += 1;
            }
            "--cam" => {
                parsed.cams.push(value(i)?.parse().context("invalid --cam")?);
                i += 1;
            }
            "--frames" => {
                parsed.frames = Some(value(i)?.parse().context("invalid --frames")?);
                i += 1;
            }
            "--refresh" => {
                parsed.refresh = Some(value(i)?.parse().context("invalid --refresh")?);
                i += 1;
            }
            "--preview" => {
                parsed.preview = Some(PathBuf::from(value(i)?));
                i += 1;
            }
            "--capture" => parsed.capture = true,
            "--save" => parsed.save = true,
            "--json" => parsed.json = true,
            other => bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(parsed)
}

#[derive(Serialize)]
struct FrameSummary {
    cam_id: u32,
    sequence: u64,
    frame_number: u64,
    width: u32,
    height: u32,
    received_at: chrono::DateTime<chrono::Utc>,
    saved_to: Option<PathBuf>,
}

/// Counts printed frames against the `--frames` limit.
struct FrameBudget {
    limit: Option<u64>,
    shown: u64,
}

impl FrameBudget {
    fn new(limit: Option<u64>) -> Self {
        Self { limit, shown: 0 }
    }

    fn record(&mut self) {
        self.shown += 1;
    }

    fn exhausted(&self) -> bool {
        self.limit.is_some_and(|n| self.shown >= n)
    }
}

fn cmd_stream(args: &[String]) -> Result<()> {
    let opts = parse_stream_args(args)?;

    let mut config = match &opts.config {
        Some(path) => ViewerConfig::load_from_file(path)?,
        None => ViewerConfig::default(),
    };
    if !opts.cams.is_empty() {
        config.cameras.retain(|c| opts.cams.contains(&c.cam_id));
        for &cam_id in &opts.cams {
            if config.camera(cam_id).is_none() {
                config.cameras.push(u3vcam::CameraEntry {
                    cam_id,
                    params: Default::default(),
                    downscale_factor: 1,
                });
            }
        }
    }
    if let Some(refresh) = opts.refresh {
        config.refresh_rate_hz = refresh;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let context = open_context()?;
    let mut cameras = Vec::with_capacity(config.cameras.len());
    for entry in &config.cameras {
        let mut camera = UsbCamera::new(Arc::clone(&context), entry.cam_id, entry.params.clone());
        camera
            .initialize()
            .with_context(|| format!("failed to initialize camera {}", entry.cam_id))?;
        if !opts.capture {
            camera.start_stream()?;
        }
        cameras.push((camera, entry.downscale_factor));
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let interval = Duration::from_secs_f64(1.0 / f64::from(config.refresh_rate_hz));
    let timeout = Duration::from_secs(2);
    let mut last_seen = vec![0u64; cameras.len()];
    let mut budget = FrameBudget::new(opts.frames);

    while running.load(Ordering::SeqCst) && !budget.exhausted() {
        for (slot, (camera, _)) in cameras.iter_mut().enumerate() {
            let frame = if opts.capture {
                match camera.capture_frame_and_wait(timeout)? {
                    Some(frame) => frame,
                    None => {
                        log::warn!("Camera {} capture timed out", camera.index());
                        continue;
                    }
                }
            } else {
                camera.get_last_frame()
            };

            if frame.is_placeholder() || frame.sequence == last_seen[slot] {
                continue;
            }
            last_seen[slot] = frame.sequence;

            let saved_to = if opts.save {
                Some(save_frame(&frame, &config.output_directory)?)
            } else {
                None
            };

            let summary = FrameSummary {
                cam_id: camera.index(),
                sequence: frame.sequence,
                frame_number: frame.frame_number,
                width: frame.width,
                height: frame.height,
                received_at: frame.received_at,
                saved_to,
            };
            if opts.json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!(
                    "cam {} frame #{} ({}x{}) seq {}",
                    summary.cam_id,
                    summary.frame_number,
                    summary.width,
                    summary.height,
                    summary.sequence
                );
            }
            budget.record();
            if budget.exhausted() {
                break;
            }
        }

        if !opts.capture {
            std::thread::sleep(interval);
        }
    }

    if let Some(path) = &opts.preview {
        let frames: Vec<_> = cameras
            .iter()
            .map(|(camera, factor)| (camera.get_last_frame(), *factor))
            .collect();
        let tiles: Vec<_> = frames.iter().map(|(f, factor)| (f, *factor)).collect();
        save_preview(&compose_preview(&tiles)?, path)?;
    }

    for (camera, _) in &mut cameras {
        camera.stop_stream()?;
        camera.destroy()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_counts_printed_frames_only() {
        let mut budget = FrameBudget::new(Some(2));
        assert!(!budget.exhausted());

        budget.record();
        assert!(!budget.exhausted());
        budget.record();
        assert!(budget.exhausted());
    }

    #[test]
    fn test_unlimited_budget_never_exhausts() {
        let mut budget = FrameBudget::new(None);
        for _ in 0..1000 {
            budget.record();
        }
        assert!(!budget.exhausted());
    }

    #[test]
    fn test_zero_budget_prints_nothing() {
        assert!(FrameBudget::new(Some(0)).exhausted());
    }

    #[test]
    fn test_frames_flag_parsed() {
        let args: Vec<String> = ["u3vcam-cli", "stream", "--frames", "5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let opts = parse_stream_args(&args).unwrap();
        assert_eq!(opts.frames, Some(5));
    }
}
