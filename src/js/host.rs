// Host driver - the main execution context and its per-frame update loop

use crate::js::config::HostConfig;
use crate::js::error::{HostError, JsRuntimeError};
use crate::js::runtime::{self, ContextSettings, GuestCallback, GuestRuntime};
use crate::js::worker::CallbackSlot;
use rquickjs::{Ctx, Function, Value};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::thread;
use std::time::Instant;

/// Label of the main execution context
pub const MAIN_CONTEXT: &str = "main";

/// What one frame did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Whether an update callback was registered and called
    pub updated: bool,
    pub jobs: usize,
    pub delivered: usize,
    pub reaped: usize,
}

/// Owns the main guest runtime and drives it frame by frame
///
/// Each tick calls the update callback, runs pending guest jobs, then drains
/// every worker owned by the main context.
pub struct Host {
    update: Rc<RefCell<CallbackSlot<GuestCallback>>>,
    guest: GuestRuntime,
    config: HostConfig,
}

impl Host {
    /// Boot the main context and install `setUpdateCallback`
    pub fn new(config: HostConfig) -> Result<Self, HostError> {
        let guest = GuestRuntime::new(MAIN_CONTEXT, ContextSettings::from_config(&config))?;
        let update = Rc::new(RefCell::new(CallbackSlot::new()));
        guest
            .with(|ctx| install_update_binding(&ctx, update.clone()))
            .map_err(JsRuntimeError::from)?;

        tracing::info!(
            assets = %guest.state().settings().assets.path().display(),
            frame_rate = config.frame_rate,
            "Host ready"
        );

        Ok(Self {
            update,
            guest,
            config,
        })
    }

    pub fn guest(&self) -> &GuestRuntime {
        &self.guest
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Run the main script
    ///
    /// A script that throws has been reported already; the error is still
    /// returned so the caller can decide whether to keep going.
    pub fn load(&self, script: impl AsRef<Path>) -> Result<(), HostError> {
        let script = script.as_ref();
        tracing::info!(script = %script.display(), "Loading main script");
        self.guest.run_script(script)?;
        Ok(())
    }

    pub fn has_update_callback(&self) -> bool {
        self.update.borrow().is_registered()
    }

    /// Whether another frame can still do anything
    pub fn is_active(&self) -> bool {
        self.has_update_callback() || self.guest.worker_count() > 0
    }

    /// Run one frame
    pub fn tick(&self) -> Tick {
        // cloned so the callback may replace itself
        let update = self.update.borrow().get().cloned();
        let updated = match update {
            Some(callback) => {
                self.guest.invoke(&callback);
                true
            }
            None => false,
        };
        let jobs = self.guest.run_pending_jobs();
        let drained = self.guest.drain_workers();

        Tick {
            updated,
            jobs,
            delivered: drained.delivered,
            reaped: drained.reaped,
        }
    }

    /// Tick at the configured frame rate
    ///
    /// Runs `frames` frames when given, otherwise until there is neither an
    /// update callback nor a live worker. Returns the number of frames run.
    pub fn run(&self, frames: Option<u64>) -> u64 {
        let period = self.config.frame_period();
        let mut ran = 0;

        loop {
            match frames {
                Some(limit) if ran >= limit => break,
                None if !self.is_active() => break,
                _ => {}
            }

            let started = Instant::now();
            self.tick();
            ran += 1;

            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }

        tracing::debug!(frames = ran, "Frame loop finished");
        ran
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        // the runtime is dropped right after; no guest callback may outlive it
        self.update.borrow_mut().clear();
        self.guest.shutdown();
    }
}

fn install_update_binding<'js>(
    ctx: &Ctx<'js>,
    update: Rc<RefCell<CallbackSlot<GuestCallback>>>,
) -> rquickjs::Result<()> {
    let set_update = Function::new(ctx.clone(), move |ctx: Ctx<'js>, callback: Value<'js>| {
        let callback = runtime::callback_from_value(&ctx, callback, "setUpdateCallback");
        // the previous callback drops after the borrow ends
        let previous = update.borrow_mut().replace(callback);
        drop(previous);
    })?
    .with_name("setUpdateCallback")?;
    ctx.globals().set("setUpdateCallback", set_update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn host_with(script: &str) -> (TempDir, Host) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.js"), script).unwrap();
        let config = HostConfig {
            assets_dir: dir.path().to_path_buf(),
            frame_rate: 0,
            ..HostConfig::default()
        };
        let host = Host::new(config).unwrap();
        host.load("main.js").unwrap();
        (dir, host)
    }

    #[test]
    fn update_callback_runs_every_tick() {
        let (_dir, host) = host_with("var frames = 0; setUpdateCallback(() => { frames++; });");
        assert!(host.has_update_callback());

        assert!(host.tick().updated);
        host.tick();
        assert_eq!(host.guest().eval_json("frames").unwrap(), json!(2));
    }

    #[test]
    fn update_callback_can_be_cleared_from_itself() {
        let (_dir, host) = host_with(
            "var frames = 0; setUpdateCallback(() => { if (++frames === 2) setUpdateCallback(null); });",
        );
        assert_eq!(host.run(None), 2);
        assert!(!host.has_update_callback());
        assert!(!host.is_active());
    }

    #[test]
    fn run_stops_after_frame_limit() {
        let (_dir, host) = host_with("var frames = 0; setUpdateCallback(() => { frames++; });");
        assert_eq!(host.run(Some(5)), 5);
        assert_eq!(host.guest().eval_json("frames").unwrap(), json!(5));
    }

    #[test]
    fn throwing_update_callback_keeps_running() {
        let (_dir, host) = host_with("var frames = 0; setUpdateCallback(() => { frames++; throw new Error('frame'); });");
        host.run(Some(3));
        assert_eq!(host.guest().eval_json("frames").unwrap(), json!(3));
    }

    #[test]
    fn idle_host_runs_no_frames() {
        let (_dir, host) = host_with("var x = 1;");
        assert!(!host.is_active());
        assert_eq!(host.run(None), 0);
    }

    #[test]
    fn load_reports_missing_script() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(HostConfig {
            assets_dir: dir.path().to_path_buf(),
            ..HostConfig::default()
        })
        .unwrap();
        assert!(matches!(host.load("nope.js"), Err(HostError::Runtime(_))));
    }
}
