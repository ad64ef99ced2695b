//! The single thread that owns the graphics context.
//!
//! Every graphics-API call is funnelled through a channel to this thread.
//! Callers either block on a reply (`call`) or fire and forget (`submit`).
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error};

use crate::api::GraphicsApi;
use crate::error::GpuError;

type Job = Box<dyn FnOnce(&mut dyn GraphicsApi) + Send>;

enum Command {
    Run(Job),
    Shutdown,
}

/// Handle to the graphics thread. Dropping it drains queued jobs, then stops
/// and joins the thread.
pub struct GpuThread {
    commands: Sender<Command>,
    thread_id: ThreadId,
    backend: &'static str,
    join_handle: Option<JoinHandle<()>>,
}

impl GpuThread {
    /// Spawns the thread and builds the backend on it with `factory`, so
    /// contexts that must be created on their owning thread can be.
    pub fn spawn<A, F>(name: impl Into<String>, factory: F) -> Result<Self, GpuError>
    where
        A: GraphicsApi + 'static,
        F: FnOnce() -> anyhow::Result<A> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded(1);
        let (commands_tx, commands_rx) = unbounded();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || run_gpu_thread(factory, ready_tx, commands_rx))
            .map_err(|err| GpuError::Startup(format!("failed to spawn graphics thread: {err}")))?;

        let backend = match ready_rx.recv() {
            Ok(Ok(backend)) => backend,
            Ok(Err(message)) => {
                let _ = handle.join();
                return Err(GpuError::Startup(message));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(GpuError::Startup(
                    "graphics thread exited during initialisation".into(),
                ));
            }
        };

        Ok(Self {
            commands: commands_tx,
            thread_id: handle.thread().id(),
            backend,
            join_handle: Some(handle),
        })
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// True when called from the graphics thread itself.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Runs `job` on the graphics thread and waits for its result.
    pub fn call<R, F>(&self, job: F) -> Result<R, GpuError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn GraphicsApi) -> R + Send + 'static,
    {
        if self.is_current() {
            return Err(GpuError::Reentrant);
        }
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(Command::Run(Box::new(move |api| {
                let _ = reply_tx.send(job(api));
            })))
            .map_err(|_| GpuError::Unavailable)?;
        reply_rx.recv().map_err(|_| GpuError::Unavailable)
    }

    /// Queues `job` without waiting. Jobs run in submission order.
    pub fn submit<F>(&self, job: F) -> Result<(), GpuError>
    where
        F: FnOnce(&mut dyn GraphicsApi) + Send + 'static,
    {
        self.commands
            .send(Command::Run(Box::new(job)))
            .map_err(|_| GpuError::Unavailable)
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.commands.send(Command::Shutdown);
            if self.is_current() {
                return;
            }
            if handle.join().is_err() {
                error!("graphics thread panicked during shutdown");
            }
        }
    }
}

fn run_gpu_thread<A, F>(
    factory: F,
    ready_tx: Sender<Result<&'static str, String>>,
    commands: Receiver<Command>,
) where
    A: GraphicsApi + 'static,
    F: FnOnce() -> anyhow::Result<A>,
{
    let mut api = match factory() {
        Ok(api) => api,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("{err:#}")));
            return;
        }
    };
    let backend = api.backend_name();
    let _ = ready_tx.send(Ok(backend));
    debug!(backend, "graphics thread ready");

    while let Ok(command) = commands.recv() {
        match command {
            Command::Run(job) => {
                let api: &mut dyn GraphicsApi = &mut api;
                if panic::catch_unwind(AssertUnwindSafe(|| job(api))).is_err() {
                    error!(backend, "graphics job panicked");
                }
            }
            Command::Shutdown => break,
        }
    }
    debug!(backend, "graphics thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Location, RawProgram, RawStage, UniformInfo, UniformValue};
    use unified::StageKind;

    struct Counter {
        programs: u32,
    }

    impl GraphicsApi for Counter {
        fn backend_name(&self) -> &'static str {
            "counter"
        }
        fn compile_stage(&mut self, _kind: StageKind, _source: &str) -> Result<RawStage, String> {
            Ok(RawStage(1))
        }
        fn delete_stage(&mut self, _stage: RawStage) {}
        fn create_program(&mut self) -> Result<RawProgram, String> {
            self.programs += 1;
            Ok(RawProgram(self.programs))
        }
        fn attach_stage(&mut self, _program: RawProgram, _stage: RawStage) {}
        fn detach_stage(&mut self, _program: RawProgram, _stage: RawStage) {}
        fn link_program(&mut self, _program: RawProgram) -> Result<(), String> {
            Ok(())
        }
        fn validate_program(&mut self, _program: RawProgram) -> Result<(), String> {
            Ok(())
        }
        fn delete_program(&mut self, _program: RawProgram) {}
        fn uniform_location(&mut self, _program: RawProgram, _name: &str) -> Option<Location> {
            None
        }
        fn attribute_location(&mut self, _program: RawProgram, _name: &str) -> Option<Location> {
            None
        }
        fn active_uniforms(&mut self, _program: RawProgram) -> Vec<UniformInfo> {
            Vec::new()
        }
        fn use_program(&mut self, _program: Option<RawProgram>) {}
        fn set_uniform(
            &mut self,
            _program: RawProgram,
            _location: Location,
            _value: &UniformValue,
        ) {
        }
    }

    fn spawn_counter() -> GpuThread {
        GpuThread::spawn("test-gpu", || Ok(Counter { programs: 0 })).expect("spawn")
    }

    #[test]
    fn jobs_run_in_order_on_one_thread() {
        let gpu = spawn_counter();
        assert_eq!(gpu.backend(), "counter");
        let first = gpu.call(|api| api.create_program().unwrap()).unwrap();
        gpu.submit(|api| {
            let _ = api.create_program();
        })
        .unwrap();
        let third = gpu.call(|api| api.create_program().unwrap()).unwrap();
        assert_eq!(first, RawProgram(1));
        assert_eq!(third, RawProgram(3));

        let name = gpu
            .call(|_| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-gpu"));
    }

    #[test]
    fn factory_errors_surface_as_startup() {
        let result = GpuThread::spawn("broken-gpu", || -> anyhow::Result<Counter> {
            Err(anyhow::anyhow!("no context"))
        });
        match result {
            Err(GpuError::Startup(message)) => assert!(message.contains("no context")),
            Err(other) => panic!("expected Startup, got {other:?}"),
            Ok(_) => panic!("expected Startup error"),
        }
    }

    #[test]
    fn panicking_job_does_not_stop_the_thread() {
        let gpu = spawn_counter();
        let lost = gpu.call(|_| -> u32 { panic!("boom") });
        assert_eq!(lost, Err(GpuError::Unavailable));
        assert_eq!(gpu.call(|api| api.backend_name()).unwrap(), "counter");
    }
}
