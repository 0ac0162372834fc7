#![deny(clippy::all)]
#![allow(clippy::cast_precision_loss)]
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use egui::{Context, Response, RichText, Sense, TextureHandle, TextureOptions, Ui, ViewportBuilder, ViewportCommand};
use std::{
    ops::Deref,
    panic,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};
use tmlib::{
    cfg::{self, Cfg},
    crop,
    egui_mappers::{self, LastSensedBtns},
    file_util::{self, to_name_str, RECORD_EXTENSION},
    result::{to_tm, trace_ok_warn, TmResult},
    tmerr, tracing_setup, BatchCfg, BatchOrchestrator, BatchSummary, Events, Session, SessionEnd,
    ShapeI,
};
use tracing::{error, info, warn, Level};

mod detail {
    use egui::{ColorImage, Context, Image, TextureHandle, TextureOptions};
    use image::RgbImage;
    use tmlib::ShapeI;

    pub(super) fn clrim_2_handle(color_image: ColorImage, ctx: &Context) -> TextureHandle {
        ctx.load_texture("tile", color_image, TextureOptions::NEAREST)
    }

    pub(super) fn handle_2_image<'a>(handle: &TextureHandle, shape: ShapeI) -> Image<'a> {
        let size = egui::vec2(shape.w as f32, shape.h as f32);
        let sized_image = egui::load::SizedTexture::new(handle.id(), size);
        egui::Image::from_texture(sized_image)
    }

    pub(super) fn image_2_colorimage(im: &RgbImage) -> ColorImage {
        ColorImage::from_rgb([im.width() as usize, im.height() as usize], im.as_raw())
    }
}

fn collect_events(
    ui: &mut Ui,
    image_response: &Response,
    last_sensed: &mut LastSensedBtns,
    shape: ShapeI,
) -> Events {
    let rect = image_response.rect;
    let to_orig = |p| egui_mappers::egui_pos_2_orig_pos(p, rect, shape);
    // while dragging, the pointer may leave the tile and is then clamped to its border
    let mouse_pos = image_response
        .hover_pos()
        .or_else(|| image_response.interact_pointer_pos())
        .or_else(|| ui.input(|i| i.pointer.latest_pos()))
        .map(to_orig);
    let press_pos = ui.input(|i| i.pointer.press_origin()).map(to_orig);
    let key_events = egui_mappers::map_key_events(ui);
    let mouse_events = egui_mappers::map_mouse_events(ui, last_sensed, image_response);
    Events::default()
        .events(mouse_events)
        .events(key_events)
        .mousepos_orig(mouse_pos)
        .presspos_orig(press_pos)
}

struct AnnotatorApp {
    orchestrator: BatchOrchestrator,
    session: Option<Session>,
    texture: Option<TextureHandle>,
    texture_generation: Option<u64>,
    last_sensed_btns: LastSensedBtns,
    summary: BatchSummary,
    repaint_after: Duration,
    done: bool,
}

impl AnnotatorApp {
    fn new(orchestrator: BatchOrchestrator, repaint_after: Duration) -> Self {
        Self {
            orchestrator,
            session: None,
            texture: None,
            texture_generation: None,
            last_sensed_btns: LastSensedBtns::default(),
            summary: BatchSummary::default(),
            repaint_after,
            done: false,
        }
    }

    /// Moves on to the next tile. Returns `false` once the batch is exhausted.
    fn next_tile(&mut self, ctx: &Context) -> bool {
        self.session = self.orchestrator.next_session();
        self.texture_generation = None;
        self.last_sensed_btns = LastSensedBtns::default();
        if let Some(session) = &self.session {
            ctx.send_viewport_cmd(ViewportCommand::Title(format!(
                "tilemark - {}",
                session.model().stem()
            )));
            true
        } else {
            false
        }
    }

    fn finish(&mut self, ctx: &Context) {
        let n_done = self.summary.n_saved + self.summary.n_quit;
        self.summary.n_failed = self.orchestrator.n_total().saturating_sub(n_done);
        info!("batch done {:?}", self.summary);
        self.done = true;
        ctx.send_viewport_cmd(ViewportCommand::Close);
    }

    fn update_texture(&mut self, ctx: &Context) {
        if let Some(session) = &self.session {
            if self.texture_generation != Some(session.raster_generation()) {
                let color_image = detail::image_2_colorimage(session.raster());
                match &mut self.texture {
                    Some(texture) => texture.set(color_image, TextureOptions::NEAREST),
                    None => self.texture = Some(detail::clrim_2_handle(color_image, ctx)),
                }
                self.texture_generation = Some(session.raster_generation());
            }
        }
    }

    /// Shows the current tile and feeds the input of this frame into its session.
    fn show_session(&mut self, ui: &mut Ui) {
        self.update_texture(ui.ctx());
        let (Some(session), Some(texture)) = (self.session.as_mut(), self.texture.as_ref()) else {
            return;
        };
        let model = session.model();
        ui.label(
            RichText::new(format!(
                "{} | {} boxes | tile {}/{} | drag to draw, c commit, s save, q quit",
                model.stem(),
                model.boxes().len(),
                self.orchestrator.position(),
                self.orchestrator.n_total()
            ))
            .monospace(),
        );
        let shape = model.shape();
        let image_response = ui.add(
            detail::handle_2_image(texture, shape)
                .shrink_to_fit()
                .sense(Sense::click_and_drag()),
        );
        let events = collect_events(ui, &image_response, &mut self.last_sensed_btns, shape);
        let ended = match session.on_events(&events) {
            Ok(Some(SessionEnd::Saved)) => {
                self.summary.n_saved += 1;
                true
            }
            Ok(Some(SessionEnd::Quit)) => {
                self.summary.n_quit += 1;
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("ending tile {:?} due to {e}", session.model().image_path());
                true
            }
        };
        if ended {
            self.session = None;
            ui.ctx().request_repaint();
        }
    }
}

impl eframe::App for AnnotatorApp {
    fn update(&mut self, ctx: &egui::Context, _: &mut eframe::Frame) {
        if self.done {
            return;
        }
        if self.session.is_none() && !self.next_tile(ctx) {
            self.finish(ctx);
            return;
        }
        egui::CentralPanel::default().show(ctx, |ui| self.show_session(ui));
        ctx.request_repaint_after(self.repaint_after);
    }

    fn ui(&mut self, _: &mut egui::Ui, _: &mut eframe::Frame) {}
}

#[derive(Subcommand)]
enum Command {
    /// Annotate a random batch of unlabeled tiles or resume the latest record
    Annotate {
        #[arg(long)]
        batch_size: Option<usize>,
        /// open the most recently modified record instead of sampling
        #[arg(long)]
        resume_latest: bool,
    },
    /// Cut source images into square tiles
    Crop {
        #[arg(long)]
        src: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        overlap: Option<u32>,
        #[arg(long)]
        ext: Option<String>,
    },
}

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// config file, defaults to ~/.tilemark/tm_cfg.toml
    #[arg(long, global = true)]
    cfg: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

fn batch_cfg(cfg: &Cfg, batch_size: Option<usize>, resume_latest: bool) -> TmResult<BatchCfg> {
    let pinned_record = if resume_latest {
        let latest = file_util::most_recently_modified(&cfg.label_dir, RECORD_EXTENSION)?
            .ok_or_else(|| tmerr!("missing path: no record to resume in {:?}", cfg.label_dir))?;
        info!("resuming {latest:?}");
        Some(to_name_str(&latest)?.to_string())
    } else {
        None
    };
    Ok(BatchCfg {
        image_dir: cfg.image_dir.clone(),
        label_dir: cfg.label_dir.clone(),
        batch_size: batch_size.unwrap_or(cfg.batch_size),
        pinned_record,
        class_id: cfg.class_id,
        image_extension: cfg.image_extension.clone(),
        tile_size: cfg.tile_size,
        malformed_policy: cfg.malformed_records,
    })
}

fn annotate(cfg: &Cfg, batch_size: Option<usize>, resume_latest: bool) -> TmResult<()> {
    let batch_cfg = batch_cfg(cfg, batch_size, resume_latest)?;
    let orchestrator = BatchOrchestrator::new(batch_cfg, &mut rand::rng())?;
    let app = AnnotatorApp::new(orchestrator, Duration::from_millis(cfg.repaint_millis));
    let title = format!("tilemark {}", env!("GIT_DESC"));
    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_title(title.as_str())
            .with_inner_size([720.0, 780.0]),
        ..Default::default()
    };
    eframe::run_native(&title, native_options, Box::new(|_| Ok(Box::new(app)))).map_err(to_tm)
}

fn crop_sources(
    cfg: &Cfg,
    src: Option<PathBuf>,
    out: Option<PathBuf>,
    overlap: Option<u32>,
    ext: Option<String>,
) -> TmResult<()> {
    let src = src.unwrap_or_else(|| cfg.source_dir.clone());
    let out = out.unwrap_or_else(|| cfg.image_dir.clone());
    let ext = ext.unwrap_or_else(|| cfg.source_extension.clone());
    let sources = crop::source_images(&src, &ext)?;
    if sources.is_empty() {
        warn!("no '.{ext}' images found in {src:?}");
    }
    let tiles = crop::crop_images(
        &sources,
        &out,
        ShapeI::square(cfg.tile_size),
        overlap.unwrap_or(cfg.overlap),
    )?;
    info!("wrote {} tiles to {out:?}", tiles.len());
    Ok(())
}

fn load_cfg(cfg_path: Option<&Path>) -> TmResult<Cfg> {
    match cfg_path {
        Some(path) => cfg::read_cfg_from(path),
        None => cfg::read_cfg(),
    }
}

fn run(command: Command, cfg: &Cfg) -> TmResult<()> {
    match command {
        Command::Annotate {
            batch_size,
            resume_latest,
        } => annotate(cfg, batch_size, resume_latest),
        Command::Crop {
            src,
            out,
            overlap,
            ext,
        } => crop_sources(cfg, src, out, overlap, ext),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = load_cfg(cli.cfg.as_deref());
    let level = cfg.as_ref().map(Cfg::log_level).unwrap_or(Level::INFO);
    let _guard_flush_to_logfile = tracing_setup::tracing_setup(&cfg::get_log_folder(), level);
    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if cli.cfg.is_none() && !cfg::get_cfg_path().exists() {
        trace_ok_warn(cfg::write_cfg(&cfg));
    }
    let command = cli.command;
    match panic::catch_unwind(move || run(command, &cfg)) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            let panic_s = e
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| e.downcast_ref::<&'static str>().map(Deref::deref));
            error!("{:?}", panic_s);
            if let Some(b) = tracing_setup::BACKTRACE.with(|b| b.borrow_mut().take()) {
                error!("{:?}", b);
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
use tmlib::{defer_folder_removal, file_util::DEFAULT_TMPDIR};

#[test]
fn test_cli() {
    let cli = Cli::parse_from(["tilemark", "annotate", "--batch-size", "3", "--resume-latest"]);
    assert!(matches!(
        cli.command,
        Command::Annotate {
            batch_size: Some(3),
            resume_latest: true
        }
    ));
    let cli = Cli::parse_from(["tilemark", "crop", "--src", "sel", "--overlap", "20", "--cfg", "c.toml"]);
    assert_eq!(cli.cfg, Some(PathBuf::from("c.toml")));
    assert!(matches!(cli.command, Command::Crop { overlap: Some(20), .. }));
}

#[test]
fn test_batch_cfg_resume_latest() {
    let folder = DEFAULT_TMPDIR.join("test_batch_cfg_resume_latest");
    defer_folder_removal!(&folder);
    let cfg = Cfg {
        label_dir: folder.join("labels"),
        ..Cfg::default()
    };
    assert_eq!(batch_cfg(&cfg, None, false).unwrap().batch_size, 10);
    assert!(batch_cfg(&cfg, None, true).is_err());
    file_util::create_dir_all(&cfg.label_dir).unwrap();
    file_util::write(cfg.label_dir.join("T1.txt"), "0 0.5 0.5 0.1 0.1\n").unwrap();
    let batch_cfg = batch_cfg(&cfg, Some(1), true).unwrap();
    assert_eq!(batch_cfg.pinned_record.as_deref(), Some("T1.txt"));
    assert_eq!(batch_cfg.batch_size, 1);
}
