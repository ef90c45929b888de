//! Runner — drives a bundle to convergence, gating each resource's apply on
//! its subscription trigger, persisting `EventState` so a crash mid-run can
//! be resumed, and emitting structured provenance events.

use crate::bundle::Bundle;
use crate::change::RunnerCtx;
use crate::error::{FuselageError, Result};
use crate::eventstate::EventState;
use crate::platform::PlatformAdapter;
use crate::tripwire::eventlog::{self, ProvenanceEvent};
use std::path::{Path, PathBuf};
use std::time::Instant;

const LEVEL_DEBUG: i32 = 10;
const LEVEL_INFO: i32 = 20;
const LEVEL_WARN: i32 = 30;

/// `setup_from_cmdline`'s verbosity arithmetic: `INFO - 10 * (verbose - quiet)`.
pub fn verbosity_from_counts(verbose: u8, quiet: u8) -> i32 {
    LEVEL_INFO - 10 * (verbose as i32 - quiet as i32)
}

pub struct Runner<'a> {
    platform: &'a dyn PlatformAdapter,
    simulate: bool,
    no_changes_ok: bool,
    state: EventState,
    state_dir: PathBuf,
    run_id: String,
    verbosity: i32,
}

impl<'a> Runner<'a> {
    /// `Runner::new(bundle, resume, no_resume, no_changes_ok, simulate,
    /// verbosity, state_path)`: the bundle itself is supplied to `run`, not
    /// held here, so one runner can be reused across `bundle.apply(&mut
    /// runner)` calls against the same state directory.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: &'a dyn PlatformAdapter,
        state_dir: &Path,
        simulate: bool,
        resume: bool,
        no_resume: bool,
        no_changes_ok: bool,
        verbose: u8,
        quiet: u8,
    ) -> Result<Self> {
        let state = EventState::open(state_dir, simulate, resume, no_resume)?;
        Ok(Runner {
            platform,
            simulate,
            no_changes_ok,
            state,
            state_dir: state_dir.to_path_buf(),
            run_id: eventlog::generate_run_id(),
            verbosity: verbosity_from_counts(verbose, quiet),
        })
    }

    fn log(&self, level: i32, msg: &str) {
        if level >= self.verbosity {
            eprintln!("{msg}");
        }
    }

    fn emit(&self, event: ProvenanceEvent) {
        if let Err(e) = eventlog::append_event(&self.state_dir, event) {
            self.log(LEVEL_WARN, &format!("could not append provenance event: {e}"));
        }
    }

    /// Apply `bundle` to convergence: pre-hash every watched file, then walk
    /// resources in order, skipping each until its subscription trigger (if
    /// any) fires. Raises `NothingChanged` when nothing in the bundle
    /// changed and the caller did not pass `--no-changes-ok`.
    pub fn run(&mut self, bundle: &Bundle) -> Result<()> {
        let started = Instant::now();
        self.emit(ProvenanceEvent::ApplyStarted {
            run_id: self.run_id.clone(),
            fuselage_version: env!("CARGO_PKG_VERSION").to_string(),
        });

        for resource in bundle.iter() {
            resource.capture_watch_hash();
        }

        let ctx = RunnerCtx::new(self.platform, self.simulate);
        let mut dirty = false;
        let mut converged = 0u32;
        let mut unchanged = 0u32;
        let mut skipped = 0u32;

        for resource in bundle.iter() {
            let has_watches = !resource.watches.is_empty();
            let triggered = self.state.is_trigger_set(&resource.id);

            if has_watches && !triggered {
                skipped += 1;
                self.log(LEVEL_DEBUG, &format!("skip {} (no trigger set)", resource.id));
                self.emit(ProvenanceEvent::ResourceSkipped {
                    resource: resource.id.clone(),
                });
                continue;
            }

            let resource_started = Instant::now();
            let outcome = resource.apply(&ctx);

            // Unset this resource's own trigger unconditionally, win or
            // lose, so a transient trigger never loops.
            self.state.unset_trigger(&resource.id)?;

            match outcome {
                Ok(true) => {
                    dirty = true;
                    converged += 1;
                    self.log(LEVEL_INFO, &format!("{} changed", resource.id));
                    self.emit(ProvenanceEvent::ResourceConverged {
                        resource: resource.id.clone(),
                        duration_seconds: resource_started.elapsed().as_secs_f64(),
                    });
                    for observer in bundle.observers_of(&resource.id) {
                        self.state.set_trigger(observer)?;
                    }
                }
                Ok(false) => {
                    unchanged += 1;
                    self.log(LEVEL_DEBUG, &format!("{} unchanged", resource.id));
                    self.emit(ProvenanceEvent::ResourceUnchanged {
                        resource: resource.id.clone(),
                    });
                }
                Err(e) => {
                    self.emit(ProvenanceEvent::ResourceFailed {
                        resource: resource.id.clone(),
                        error: e.to_string(),
                    });
                    self.emit(ProvenanceEvent::ApplyFinished {
                        run_id: self.run_id.clone(),
                        resources_converged: converged,
                        resources_unchanged: unchanged,
                        resources_skipped: skipped,
                        total_seconds: started.elapsed().as_secs_f64(),
                    });
                    return Err(e);
                }
            }
        }

        self.emit(ProvenanceEvent::ApplyFinished {
            run_id: self.run_id.clone(),
            resources_converged: converged,
            resources_unchanged: unchanged,
            resources_skipped: skipped,
            total_seconds: started.elapsed().as_secs_f64(),
        });

        if !dirty && !self.no_changes_ok {
            return Err(FuselageError::NothingChanged);
        }

        self.state.success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::local::LocalPlatform;
    use serde_json::json;

    fn obj(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match v {
            serde_json::Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_verbosity_arithmetic() {
        assert_eq!(verbosity_from_counts(0, 0), 20);
        assert_eq!(verbosity_from_counts(1, 0), 10);
        assert_eq!(verbosity_from_counts(0, 1), 30);
        assert_eq!(verbosity_from_counts(2, 0), 0);
    }

    #[test]
    fn test_file_create_then_noop_raises_nothing_changed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");
        let state_dir = dir.path().join("state");

        let mut bundle = Bundle::new();
        bundle
            .create(
                "File",
                obj(json!({"name": target.to_str().unwrap(), "contents": "hi"})),
            )
            .unwrap();

        let platform = LocalPlatform::new();
        let mut runner =
            Runner::new(&platform, &state_dir, false, false, false, false, 0, 0).unwrap();
        runner.run(&bundle).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hi");

        let mut runner2 =
            Runner::new(&platform, &state_dir, false, false, false, false, 0, 0).unwrap();
        let err = runner2.run(&bundle);
        assert!(matches!(err, Err(FuselageError::NothingChanged)));
    }

    #[test]
    fn test_no_changes_ok_suppresses_nothing_changed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");
        std::fs::write(&target, "hi").unwrap();
        let state_dir = dir.path().join("state");

        let mut bundle = Bundle::new();
        bundle
            .create(
                "File",
                obj(json!({"name": target.to_str().unwrap(), "contents": "hi"})),
            )
            .unwrap();

        let platform = LocalPlatform::new();
        let mut runner =
            Runner::new(&platform, &state_dir, false, false, false, true, 0, 0).unwrap();
        assert!(runner.run(&bundle).is_ok());
    }

    #[test]
    fn test_subscription_fires_exactly_once_then_skips() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("cfg");
        let marker = dir.path().join("reload");
        let state_dir = dir.path().join("state");

        let mut bundle = Bundle::new();
        bundle
            .create(
                "File",
                obj(json!({"name": cfg.to_str().unwrap(), "contents": "a"})),
            )
            .unwrap();
        bundle
            .create(
                "Execute",
                obj(json!({
                    "command": format!("/bin/touch {}", marker.display()),
                    "watches": [cfg.to_str().unwrap()],
                })),
            )
            .unwrap();

        let platform = LocalPlatform::new();
        let mut runner =
            Runner::new(&platform, &state_dir, false, false, false, false, 0, 0).unwrap();
        runner.run(&bundle).unwrap();
        assert!(marker.exists());

        std::fs::remove_file(&marker).unwrap();
        let mut runner2 =
            Runner::new(&platform, &state_dir, false, false, false, false, 0, 0).unwrap();
        let err = runner2.run(&bundle);
        assert!(matches!(err, Err(FuselageError::NothingChanged)));
        assert!(!marker.exists(), "Execute must not re-fire without a trigger");
    }
}
