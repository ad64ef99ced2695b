//! Process-wide owner of linked shader programs.
//!
//! Each logical name moves through `Unloaded → Loading → Ready | Failed`.
//! Loading happens outside the state lock; other callers asking for the same
//! name wait on a condition variable instead of building it a second time.
//!
//! Programs are only ever destroyed on the graphics thread. A program that
//! leaves the registry (released to zero, replaced by a reload) is parked in
//! a retired list until no graphics job still holds it, then deleted.
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;

use compiler::{
    build_program, GpuError, GpuThread, GraphicsApi, Location, ShaderProgram, UniformInfo,
    UniformValue,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use unified::{split, ShaderSource, SourceLoader, StageKind};

use crate::error::CompileError;
use crate::frame::Frame;
use crate::RegistryOptions;

/// Opaque, copyable reference to a registry entry.
///
/// A handle stays valid until the last matching `release`; a later `acquire`
/// of the same name yields a different handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(u64);

impl ShaderHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ShaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl fmt::Display for ShaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

struct Entry {
    handle: ShaderHandle,
    source: ShaderSource,
    program: Arc<ShaderProgram>,
    refs: usize,
    reloading: bool,
}

enum Slot {
    Loading,
    Ready(Entry),
    Failed {
        error: CompileError,
        /// Snapshot the failing attempt read, if reading got that far.
        source: Option<ShaderSource>,
    },
}

#[derive(Default)]
struct RegistryState {
    next_handle: u64,
    slots: HashMap<String, Slot>,
    names: HashMap<ShaderHandle, String>,
    retired: Vec<Arc<ShaderProgram>>,
}

impl RegistryState {
    fn entry(&self, handle: ShaderHandle) -> Option<&Entry> {
        let name = self.names.get(&handle)?;
        match self.slots.get(name) {
            Some(Slot::Ready(entry)) if entry.handle == handle => Some(entry),
            _ => None,
        }
    }
}

struct Failure {
    error: CompileError,
    source: Option<ShaderSource>,
}

impl Failure {
    fn new(error: impl Into<CompileError>, source: Option<ShaderSource>) -> Self {
        Self {
            error: error.into(),
            source,
        }
    }
}

enum Candidate {
    Ready(ShaderSource),
    Failed(Option<ShaderSource>),
}

pub struct ShaderRegistry {
    loader: Arc<dyn SourceLoader>,
    gpu: GpuThread,
    options: RegistryOptions,
    state: Mutex<RegistryState>,
    settled: Condvar,
}

impl ShaderRegistry {
    pub fn new(loader: Arc<dyn SourceLoader>, gpu: GpuThread, options: RegistryOptions) -> Self {
        Self {
            loader,
            gpu,
            options,
            state: Mutex::new(RegistryState::default()),
            settled: Condvar::new(),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn backend(&self) -> &'static str {
        self.gpu.backend()
    }

    /// Returns a handle to the program for `name`, building it on first use.
    ///
    /// A name that failed before keeps failing with the stored error until
    /// `clear_failed` or a content change picked up by `reload_changed`.
    /// Graphics thread failures are not stored; the name stays `Unloaded`.
    ///
    /// Refused with `GpuError::Reentrant` from inside a graphics job, which
    /// could otherwise wait on a build queued behind itself.
    pub fn acquire(&self, name: &str) -> Result<ShaderHandle, CompileError> {
        if self.gpu.is_current() {
            return Err(GpuError::Reentrant.into());
        }
        let mut state = self.state.lock();
        loop {
            match state.slots.get_mut(name) {
                Some(Slot::Loading) => {}
                Some(Slot::Ready(entry)) => {
                    entry.refs += 1;
                    debug!(shader = name, refs = entry.refs, "reusing loaded shader");
                    return Ok(entry.handle);
                }
                Some(Slot::Failed { error, .. }) => return Err(error.clone()),
                None => break,
            }
            self.settled.wait(&mut state);
        }
        state.slots.insert(name.to_string(), Slot::Loading);
        drop(state);

        let outcome = self.build(name, None);

        let mut state = self.state.lock();
        let result = match outcome {
            Ok((source, program)) => {
                state.next_handle += 1;
                let handle = ShaderHandle(state.next_handle);
                info!(
                    shader = name,
                    %handle,
                    version = source.version(),
                    "shader ready"
                );
                state.names.insert(handle, name.to_string());
                state.slots.insert(
                    name.to_string(),
                    Slot::Ready(Entry {
                        handle,
                        source,
                        program: Arc::new(program),
                        refs: 1,
                        reloading: false,
                    }),
                );
                Ok(handle)
            }
            Err(failure) if failure.error.is_transient() => {
                warn!(
                    shader = name,
                    error = %failure.error,
                    "graphics thread failed; shader left unloaded"
                );
                state.slots.remove(name);
                Err(failure.error)
            }
            Err(failure) => {
                warn!(shader = name, error = %failure.error, "shader failed to build");
                let error = failure.error.clone();
                state.slots.insert(
                    name.to_string(),
                    Slot::Failed {
                        error: failure.error,
                        source: failure.source,
                    },
                );
                Err(error)
            }
        };
        drop(state);
        self.settled.notify_all();
        result
    }

    /// Drops one reference. The last one returns the name to `Unloaded` and
    /// schedules the program for deletion.
    pub fn release(&self, handle: ShaderHandle) -> Result<(), CompileError> {
        let mut state = self.state.lock();
        let name = state
            .names
            .get(&handle)
            .cloned()
            .ok_or(CompileError::UnknownHandle)?;

        let remaining = match state.slots.get_mut(&name) {
            Some(Slot::Ready(entry)) if entry.handle == handle => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs
            }
            _ => return Err(CompileError::UnknownHandle),
        };

        if remaining == 0 {
            if let Some(Slot::Ready(entry)) = state.slots.remove(&name) {
                state.names.remove(&handle);
                state.retired.push(entry.program);
                debug!(shader = %name, %handle, "last reference released");
            }
        }
        drop(state);

        if remaining == 0 {
            self.settled.notify_all();
            self.sweep_retired();
        }
        Ok(())
    }

    /// Rebuilds `name` from its current text.
    ///
    /// On success the new program replaces the old one for every existing
    /// handle. On failure the old program stays in place and the error is
    /// returned.
    pub fn reload(&self, name: &str) -> Result<(), CompileError> {
        if self.gpu.is_current() {
            return Err(GpuError::Reentrant.into());
        }
        let mut state = self.state.lock();
        let (handle, previous) = loop {
            match state.slots.get_mut(name) {
                Some(Slot::Ready(entry)) if !entry.reloading => {
                    entry.reloading = true;
                    break (entry.handle, entry.source.clone());
                }
                Some(Slot::Loading) | Some(Slot::Ready(_)) => {}
                Some(Slot::Failed { .. }) | None => {
                    return Err(CompileError::NotLoaded {
                        name: name.to_string(),
                    })
                }
            }
            self.settled.wait(&mut state);
        };
        drop(state);

        let outcome = self.build(name, Some(&previous));

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let result = match state.slots.get_mut(name) {
            Some(Slot::Ready(entry)) if entry.handle == handle => {
                entry.reloading = false;
                match outcome {
                    Ok((source, program)) => {
                        info!(
                            shader = name,
                            version = source.version(),
                            "shader reloaded"
                        );
                        entry.source = source;
                        let old = mem::replace(&mut entry.program, Arc::new(program));
                        state.retired.push(old);
                        Ok(())
                    }
                    Err(failure) => {
                        warn!(
                            shader = name,
                            error = %failure.error,
                            "reload failed; keeping previous program"
                        );
                        Err(failure.error)
                    }
                }
            }
            _ => {
                if let Ok((_, program)) = outcome {
                    state.retired.push(Arc::new(program));
                }
                Err(CompileError::NotLoaded {
                    name: name.to_string(),
                })
            }
        };
        drop(guard);

        self.settled.notify_all();
        self.sweep_retired();
        result
    }

    /// Reloads every `Ready` shader whose text changed and forgets every
    /// `Failed` one whose text changed, so the next `acquire` rebuilds it.
    ///
    /// Returns the shaders that could not be reloaded with their errors.
    pub fn reload_changed(&self) -> Vec<(String, CompileError)> {
        let candidates: Vec<(String, Candidate)> = {
            let state = self.state.lock();
            state
                .slots
                .iter()
                .filter_map(|(name, slot)| match slot {
                    Slot::Ready(entry) if !entry.reloading => {
                        Some((name.clone(), Candidate::Ready(entry.source.clone())))
                    }
                    Slot::Failed { source, .. } => {
                        Some((name.clone(), Candidate::Failed(source.clone())))
                    }
                    _ => None,
                })
                .collect()
        };

        let mut failures = Vec::new();
        for (name, candidate) in candidates {
            match candidate {
                Candidate::Ready(source) => match self.loader.refresh(&source) {
                    Ok(None) => {}
                    Ok(Some(_)) => match self.reload(&name) {
                        Ok(()) | Err(CompileError::NotLoaded { .. }) => {}
                        Err(err) => failures.push((name, err)),
                    },
                    Err(err) => {
                        warn!(shader = %name, error = %err, "could not re-read shader; keeping previous program");
                        failures.push((name, err.into()));
                    }
                },
                Candidate::Failed(source) => {
                    let changed = match &source {
                        Some(source) => matches!(self.loader.refresh(source), Ok(Some(_))),
                        None => self.loader.load(&name).is_ok(),
                    };
                    if changed && self.clear_failed(&name) {
                        debug!(shader = %name, "failed shader changed; will rebuild on next acquire");
                    }
                }
            }
        }
        failures
    }

    /// Forgets a `Failed` entry. Returns whether there was one.
    pub fn clear_failed(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        if matches!(state.slots.get(name), Some(Slot::Failed { .. })) {
            state.slots.remove(name);
            true
        } else {
            false
        }
    }

    pub fn status(&self, name: &str) -> ShaderStatus {
        match self.state.lock().slots.get(name) {
            None => ShaderStatus::Unloaded,
            Some(Slot::Loading) => ShaderStatus::Loading,
            Some(Slot::Ready(_)) => ShaderStatus::Ready,
            Some(Slot::Failed { .. }) => ShaderStatus::Failed,
        }
    }

    /// Error stored for a `Failed` name.
    pub fn failure(&self, name: &str) -> Option<CompileError> {
        match self.state.lock().slots.get(name) {
            Some(Slot::Failed { error, .. }) => Some(error.clone()),
            _ => None,
        }
    }

    /// Number of outstanding references to `name`; zero unless `Ready`.
    pub fn ref_count(&self, name: &str) -> usize {
        match self.state.lock().slots.get(name) {
            Some(Slot::Ready(entry)) => entry.refs,
            _ => 0,
        }
    }

    /// Content version of the source the current program was built from.
    pub fn source_version(&self, handle: ShaderHandle) -> Option<u64> {
        self.state
            .lock()
            .entry(handle)
            .map(|entry| entry.source.version())
    }

    pub fn stages(&self, handle: ShaderHandle) -> Option<Vec<StageKind>> {
        self.state
            .lock()
            .entry(handle)
            .map(|entry| entry.program.stages().to_vec())
    }

    pub fn name(&self, handle: ShaderHandle) -> Option<String> {
        self.state.lock().names.get(&handle).cloned()
    }

    /// Names of all `Ready` shaders, sorted.
    pub fn loaded(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn program(&self, handle: ShaderHandle) -> Option<Arc<ShaderProgram>> {
        self.state
            .lock()
            .entry(handle)
            .map(|entry| Arc::clone(&entry.program))
    }

    /// load → split → compile → link. `previous` switches loading to a
    /// refresh so the new snapshot carries the next content version.
    fn build(
        &self,
        name: &str,
        previous: Option<&ShaderSource>,
    ) -> Result<(ShaderSource, ShaderProgram), Failure> {
        let source = match previous {
            Some(previous) => match self.loader.refresh(previous) {
                Ok(Some(fresh)) => fresh,
                Ok(None) => previous.clone(),
                Err(err) => return Err(Failure::new(err, Some(previous.clone()))),
            },
            None => self.loader.load(name).map_err(|err| Failure::new(err, None))?,
        };

        let shader = match split(&source, &self.options.split) {
            Ok(shader) => shader,
            Err(err) => return Err(Failure::new(err, Some(source))),
        };

        let validate = self.options.validate_after_link;
        let built = self
            .gpu
            .call(move |api| build_program(api, &shader, validate))
            .map_err(CompileError::from)
            .and_then(|result| result.map_err(CompileError::from));

        match built {
            Ok(program) => Ok((source, program)),
            Err(err) => Err(Failure::new(err, Some(source))),
        }
    }

    fn sweep_retired(&self) {
        let idle: Vec<Arc<ShaderProgram>> = {
            let mut state = self.state.lock();
            let (idle, busy) = mem::take(&mut state.retired)
                .into_iter()
                .partition(|program| Arc::strong_count(program) == 1);
            state.retired = busy;
            idle
        };

        for program in idle {
            let submitted = self.gpu.submit(move |api| destroy_program(api, program));
            if let Err(err) = submitted {
                warn!(error = %err, "could not schedule program deletion");
            }
        }
    }
}

/// Renderer-facing surface.
impl ShaderRegistry {
    pub fn load_shader(&self, name: &str) -> Result<ShaderHandle, CompileError> {
        self.acquire(name)
    }

    pub fn unload(&self, handle: ShaderHandle) -> Result<(), CompileError> {
        self.release(handle)
    }

    pub fn get_uniform_location(&self, handle: ShaderHandle, name: &str) -> Option<Location> {
        let program = self.program(handle)?;
        if let Some(cached) = program.cached_uniform(name) {
            return cached;
        }
        let name = name.to_string();
        self.gpu
            .call(move |api| program.uniform_location(api, &name))
            .ok()
            .flatten()
    }

    pub fn get_attribute_location(&self, handle: ShaderHandle, name: &str) -> Option<Location> {
        let program = self.program(handle)?;
        if let Some(cached) = program.cached_attribute(name) {
            return cached;
        }
        let name = name.to_string();
        self.gpu
            .call(move |api| program.attribute_location(api, &name))
            .ok()
            .flatten()
    }

    /// Makes the handle's program current for later draw calls. An unknown
    /// handle is ignored.
    pub fn bind(&self, handle: ShaderHandle) {
        let Some(program) = self.program(handle) else {
            debug!(%handle, "bind ignored for unknown handle");
            return;
        };
        if let Err(err) = self.gpu.submit(move |api| program.bind(api)) {
            debug!(%handle, error = %err, "bind dropped");
        }
    }

    pub fn unbind(&self) {
        if let Err(err) = self.gpu.submit(|api| api.use_program(None)) {
            debug!(error = %err, "unbind dropped");
        }
    }

    pub fn uniforms(&self, handle: ShaderHandle) -> Result<Vec<UniformInfo>, CompileError> {
        let program = self.program(handle).ok_or(CompileError::UnknownHandle)?;
        Ok(self.gpu.call(move |api| program.active_uniforms(api))?)
    }

    /// Writes a uniform value. `Ok(false)` means the uniform is not active.
    pub fn set_uniform(
        &self,
        handle: ShaderHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<bool, CompileError> {
        let program = self.program(handle).ok_or(CompileError::UnknownHandle)?;
        let name = name.to_string();
        Ok(self
            .gpu
            .call(move |api| program.set_uniform(api, &name, value))?)
    }

    /// Runs `job` on the graphics thread with every loaded program reachable
    /// through its handle.
    pub fn run<R, F>(&self, job: F) -> Result<R, CompileError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Frame<'_>) -> R + Send + 'static,
    {
        let programs: HashMap<ShaderHandle, Arc<ShaderProgram>> = {
            let state = self.state.lock();
            state
                .slots
                .values()
                .filter_map(|slot| match slot {
                    Slot::Ready(entry) => Some((entry.handle, Arc::clone(&entry.program))),
                    _ => None,
                })
                .collect()
        };
        let result = self.gpu.call(move |api| {
            let mut frame = Frame::new(api, &programs);
            job(&mut frame)
        });
        self.sweep_retired();
        Ok(result?)
    }
}

impl Drop for ShaderRegistry {
    fn drop(&mut self) {
        let state = mem::take(&mut *self.state.lock());
        let mut programs = state.retired;
        programs.extend(state.slots.into_values().filter_map(|slot| match slot {
            Slot::Ready(entry) => Some(entry.program),
            _ => None,
        }));
        if programs.is_empty() {
            return;
        }
        debug!(count = programs.len(), "deleting registry programs");
        let submitted = self.gpu.submit(move |api| {
            for program in programs {
                destroy_program(api, program);
            }
        });
        if let Err(err) = submitted {
            warn!(error = %err, "graphics thread gone; programs leaked");
        }
    }
}

fn destroy_program(api: &mut dyn GraphicsApi, program: Arc<ShaderProgram>) {
    match Arc::try_unwrap(program) {
        Ok(program) => program.destroy(api),
        Err(shared) => warn!(program = shared.raw().0, "program still shared; not deleted"),
    }
}
