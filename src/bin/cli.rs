use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use log::{info, warn};
use rusttype::Font;

use target_finder::config::Config;
use target_finder::img_proc::{draw_bbox, draw_found_banner, load_font};
use target_finder::logging::init_logging;
use target_finder::pipeline::{DetectionRequest, DetectionResponse, Pipeline};
use target_finder::registry::DetectorRegistry;
use target_finder::stream::{FrameSource, ImageSequence, StreamLimits, StreamLoop};

/// 画像またはカメラに対して検出を実行します
#[derive(Parser, Debug)]
#[command(version, about)]
#[command(group(ArgGroup::new("source").required(true).args(["image", "camera", "frames"])))]
struct Args {
    /// 入力画像
    #[arg(long)]
    image: Option<PathBuf>,

    /// カメラ番号 (/dev/video<N>)
    #[arg(long)]
    camera: Option<usize>,

    /// 連続処理する画像ファイル
    #[arg(long, num_args = 1..)]
    frames: Option<Vec<PathBuf>>,

    /// ターゲットラベル
    #[arg(long, default_value = "bottle")]
    target: String,

    /// コンフィデンス下限
    #[arg(long)]
    threshold: Option<f32>,

    /// 描画した画像の保存先 (画像モード)
    #[arg(long)]
    save: Option<PathBuf>,

    /// 描画したフレームの保存先 (連続処理モード)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// 設定ファイル (TOML)
    #[arg(long, env = "TARGET_FINDER_CONFIG")]
    config: Option<PathBuf>,

    /// ラベル描画用のフォント (設定ファイルの font_path より優先)
    #[arg(long)]
    font: Option<PathBuf>,

    #[arg(long, default_value_t = 20.)]
    font_size: f32,

    #[arg(long, default_value_t = 2)]
    line_thickness: u32,

    /// 処理するフレーム数の上限
    #[arg(long)]
    max_frames: Option<u64>,

    /// 処理時間の上限 (秒)
    #[arg(long)]
    max_seconds: Option<u64>,

    #[arg(long, default_value_t = 640)]
    frame_width: u32,

    #[arg(long, default_value_t = 480)]
    frame_height: u32,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let font = match args.font.as_ref().or(config.font_path.as_ref()) {
        Some(p) => Some(load_font(p)?),
        None => None,
    };

    let registry = Arc::new(DetectorRegistry::from_config(&config)?);
    let pipeline = Pipeline::new(registry, config.default_threshold);

    if let Some(path) = &args.image {
        return run_image(&pipeline, &args, path, font.as_ref());
    }

    let mut source: Box<dyn FrameSource> = match (&args.frames, args.camera) {
        (Some(frames), _) => Box::new(ImageSequence::new(frames.clone())),
        (None, Some(index)) => open_camera(index, &args)?,
        (None, None) => bail!("no input source"),
    };
    run_stream(&pipeline, &args, source.as_mut(), font.as_ref())
}

fn print_response(resp: &DetectionResponse) -> Result<()> {
    println!("{}", serde_json::to_string(resp)?);
    Ok(())
}

fn run_image(
    pipeline: &Pipeline,
    args: &Args,
    path: &Path,
    font: Option<&Font>,
) -> Result<()> {
    let img = image::open(path).with_context(|| format!("can't open {}", path.display()))?;

    let start = Instant::now();
    let req = DetectionRequest::new(img, &args.target, args.threshold)?;
    let resp = pipeline.run(&req)?;
    let t = start.elapsed().as_secs_f64() * 1000.0;
    info!("processing time: {:.03}ms", t);

    print_response(&resp)?;

    if let Some(save) = &args.save {
        let mut rgb_img = req.image().to_rgb8();
        draw_bbox(&mut rgb_img, &resp.detections, font, args.font_size, args.line_thickness);
        if resp.found {
            draw_found_banner(&mut rgb_img, req.target(), font, args.font_size);
        }
        rgb_img.save(save)?;
        info!("annotated image saved to {}", save.display());
    }
    Ok(())
}

fn run_stream(
    pipeline: &Pipeline,
    args: &Args,
    source: &mut dyn FrameSource,
    font: Option<&Font>,
) -> Result<()> {
    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    spawn_stop_handler(Arc::clone(&stop));

    let limits = StreamLimits {
        max_frames: args.max_frames,
        max_duration: args.max_seconds.map(Duration::from_secs),
    };
    let l = StreamLoop::new(pipeline, &args.target, args.threshold, limits, stop);
    let summary = l.run(source, |i, img, resp| {
        print_response(resp)?;
        if let Some(dir) = &args.output_dir {
            let mut rgb_img = img.to_rgb8();
            draw_bbox(&mut rgb_img, &resp.detections, font, args.font_size, args.line_thickness);
            if resp.found {
                draw_found_banner(&mut rgb_img, &args.target, font, args.font_size);
            }
            rgb_img.save(dir.join(format!("frame_{:06}.png", i)))?;
        }
        Ok(())
    })?;

    info!(
        "{} frames, {} with `{}`, {} failed ({:?})",
        summary.frames, summary.found_frames, args.target, summary.failed_frames, summary.reason
    );
    Ok(())
}

/// Ctrl-Cで停止フラグを立てるスレッドを起動します。
fn spawn_stop_handler(stop: Arc<AtomicBool>) {
    thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("can't install Ctrl-C handler: {}", e);
                return;
            }
        };
        if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
            info!("stop requested");
            stop.store(true, Ordering::SeqCst);
        }
    });
}

#[cfg(feature = "camera")]
fn open_camera(index: usize, args: &Args) -> Result<Box<dyn FrameSource>> {
    use target_finder::camera::CameraSource;
    Ok(Box::new(CameraSource::open(index, args.frame_width, args.frame_height)))
}

#[cfg(not(feature = "camera"))]
fn open_camera(index: usize, args: &Args) -> Result<Box<dyn FrameSource>> {
    let _ = (args.frame_width, args.frame_height);
    bail!("camera {} requested but target-finder was built without the `camera` feature", index)
}
