use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use harmoniq_editor_host::backend::XlibDisplay;
use harmoniq_editor_host::{
    EditorHostConfig, EmbeddingWindow, EmbeddingWindowBuilder, RunLoop, Size, WindowController,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "harmoniq-editor-host",
    about = "Opens an XEmbed host window and waits for a plugin editor"
)]
struct Cli {
    /// Window title
    #[arg(long, default_value = "Harmoniq Plugin Editor")]
    title: String,
    #[arg(long, default_value_t = 640)]
    width: i32,
    #[arg(long, default_value_t = 480)]
    height: i32,
    /// Pin the window to its initial size
    #[arg(long)]
    fixed: bool,
    /// X display to connect to instead of $DISPLAY
    #[arg(long)]
    display: Option<String>,
}

/// Keeps the window at least as large as the configured minimum.
struct MinimumSizeController {
    min: Size,
}

impl WindowController for MinimumSizeController {
    fn constrain_size(&self, _window: &EmbeddingWindow, requested: Size) -> Size {
        Size::new(
            requested.width.max(self.min.width),
            requested.height.max(self.min.height),
        )
    }

    fn on_resize(&self, _window: &EmbeddingWindow, size: Size) {
        info!(%size, "editor resized");
    }

    fn on_show(&self, window: &EmbeddingWindow) {
        info!(size = %window.size(), "editor shown");
    }

    fn on_close(&self, _window: &EmbeddingWindow) {
        info!("editor closing");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Cli::parse();
    let config = EditorHostConfig::default();

    let display = XlibDisplay::open(args.display.as_deref()).context("failed to open X display")?;
    let run_loop = RunLoop::init(Rc::new(display)).context("failed to initialise run loop")?;

    let controller = Rc::new(MinimumSizeController {
        min: config.min_size,
    });
    let stopper = Rc::downgrade(&run_loop);
    let window = EmbeddingWindowBuilder::new(args.title, Size::new(args.width, args.height))
        .resizable(!args.fixed)
        .config(config)
        .controller(controller)
        .on_closed(move |_| {
            if let Some(run_loop) = stopper.upgrade() {
                run_loop.stop();
            }
        })
        .build(&run_loop)
        .context("failed to create editor window")?;

    window.show();
    if let Some(target) = window.embed_target() {
        println!("{:#x}", target.window.0);
    }

    run_loop.run().context("editor host run loop failed")?;
    Ok(())
}
