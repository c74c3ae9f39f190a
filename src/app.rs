use std::sync::Arc;

use ab_glyph::FontVec;
use pixels::{Pixels, SurfaceTexture};
use rand::rngs::ThreadRng;
use tiny_skia::Pixmap;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Fullscreen, Window, WindowId},
};

use crate::config::TrialConfig;
use crate::error::{Error, Result};
use crate::renderer::StimulusRenderer;
use crate::screen::{Presenter, ScreenState, TrialOutcome};
use crate::timer::{HighPrecisionTimer, Timer};

/// Presents a screen state in a borderless fullscreen window.
///
/// winit allows one event loop per process, so a `WindowPresenter` can run
/// a single trial.
pub struct WindowPresenter {
    font: Option<FontVec>,
}

impl WindowPresenter {
    pub fn new(config: &TrialConfig) -> Result<Self> {
        let font = StimulusRenderer::<ThreadRng>::discover_font(config.font_path.as_deref())?;
        Ok(Self { font })
    }
}

impl Presenter for WindowPresenter {
    fn present<S: ScreenState>(&mut self, state: &mut S) -> Result<TrialOutcome> {
        let event_loop = EventLoop::new().map_err(|e| Error::Display(e.to_string()))?;
        let mut app = TrialWindow {
            state,
            font: self.font.take(),
            window: None,
            pixels: None,
            canvas: None,
            renderer: None,
            timer: HighPrecisionTimer::new(),
            last_present: None,
            outcome: None,
        };

        log::info!("Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
        event_loop
            .run_app(&mut app)
            .map_err(|e| Error::Display(e.to_string()))?;

        let stats = app.timer.calibration_stats();
        log::info!(
            "Frames: {}, {:.3} ms/frame, {:.1} Hz, jitter {:.3} ms",
            app.timer.frame_count(),
            stats.average_frame_time_ns / 1_000_000.0,
            stats.effective_fps,
            stats.jitter_ns / 1_000_000.0,
        );

        app.outcome
            .take()
            .unwrap_or_else(|| Err(Error::Display("window closed before the trial ended".into())))
    }
}

struct TrialWindow<'s, S: ScreenState> {
    state: &'s mut S,
    font: Option<FontVec>,
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    canvas: Option<Pixmap>,
    renderer: Option<StimulusRenderer<ThreadRng>>,
    timer: HighPrecisionTimer,
    last_present: Option<u64>,
    outcome: Option<Result<TrialOutcome>>,
}

impl<S: ScreenState> TrialWindow<'_, S> {
    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| Error::Display("no monitor available".into()))?;
        let refresh_rate = monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let attributes = Window::default_attributes()
            .with_title("Target Detection")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))))
            .with_resizable(false);
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|e| Error::Display(e.to_string()))?,
        );

        let size = window.inner_size();
        log::info!(
            "Display: {}x{}, scale {:.2}, refresh {}",
            size.width,
            size.height,
            window.scale_factor(),
            refresh_rate.map_or("unknown".to_string(), |hz| format!("{hz:.1} Hz")),
        );

        let surface = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
        self.pixels = Some(
            Pixels::new(size.width, size.height, surface)
                .map_err(|e| Error::Display(e.to_string()))?,
        );
        self.canvas = Pixmap::new(size.width, size.height);
        self.renderer = Some(StimulusRenderer::new(
            size.width,
            size.height,
            self.font.take(),
            rand::rng(),
        ));
        self.state.set_resolution(size.width, size.height)?;

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);
        event_loop.set_control_flow(ControlFlow::Poll);

        self.state.start(self.timer.now());
        Ok(())
    }

    fn redraw(&mut self) -> Result<Option<TrialOutcome>> {
        let now = self.timer.now();
        if self.state.tick(now)? {
            self.render()?;
            let presented = self.timer.now();
            if let Some(prev) = self.last_present.replace(presented) {
                self.timer
                    .record_frame(std::time::Duration::from_nanos(presented - prev));
            }
        }
        Ok(self.state.check_timeout(now))
    }

    fn render(&mut self) -> Result<()> {
        let (Some(pixels), Some(canvas), Some(renderer)) =
            (&mut self.pixels, &mut self.canvas, &mut self.renderer)
        else {
            return Ok(());
        };
        renderer.render_frame(canvas, &self.state.visible()?)?;
        pixels.frame_mut().copy_from_slice(canvas.data());
        pixels.render().map_err(|e| Error::Display(e.to_string()))
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        if let Some(pixels) = &mut self.pixels {
            pixels
                .resize_surface(size.width, size.height)
                .map_err(|e| Error::Display(e.to_string()))?;
            pixels
                .resize_buffer(size.width, size.height)
                .map_err(|e| Error::Display(e.to_string()))?;
        }
        if let Some(renderer) = &mut self.renderer {
            renderer.resize(size.width, size.height);
        }
        self.canvas = Pixmap::new(size.width, size.height);
        self.state.set_resolution(size.width, size.height)?;
        log::debug!("Display resized to {}x{}", size.width, size.height);
        Ok(())
    }

    fn finish(&mut self, event_loop: &ActiveEventLoop, outcome: Result<TrialOutcome>) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        self.outcome = Some(outcome);
        event_loop.exit();
    }
}

impl<S: ScreenState> ApplicationHandler for TrialWindow<'_, S> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                self.finish(event_loop, Err(e));
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if self.outcome.is_some() {
            return;
        }
        match event {
            WindowEvent::CloseRequested => self.finish(event_loop, Err(Error::Aborted)),
            WindowEvent::RedrawRequested => match self.redraw() {
                Ok(Some(outcome)) => self.finish(event_loop, Ok(outcome)),
                Ok(None) => {
                    if let Some(window) = &self.window {
                        window.request_redraw();
                    }
                }
                Err(e) => self.finish(event_loop, Err(e)),
            },
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                match &event.logical_key {
                    Key::Named(NamedKey::Escape) => self.finish(event_loop, Err(Error::Aborted)),
                    Key::Character(s) => {
                        let key = s.to_lowercase();
                        if let Some(response) = self.state.on_key(&key, self.timer.now()) {
                            self.finish(event_loop, Ok(TrialOutcome::Response(response)));
                        }
                    }
                    _ => {}
                }
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = self.handle_resize(size) {
                    self.finish(event_loop, Err(e));
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(size) = self.window.as_ref().map(|w| w.inner_size()) {
                    if let Err(e) = self.handle_resize(size) {
                        self.finish(event_loop, Err(e));
                    }
                }
            }
            _ => {}
        }
    }

    // redraws stall while the window is hidden, the timeout must not
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.outcome.is_some() {
            return;
        }
        if let Some(timeout) = self.state.check_timeout(self.timer.now()) {
            self.finish(event_loop, Ok(timeout));
        }
    }
}
