use std::collections::HashMap;
use std::thread;

use anyhow::{Context, Result};
use compiler::GpuThread;
use registry::{ShaderHandle, ShaderRegistry};
use shaderconfig::RegistryConfig;
use tracing::{info, warn};

use crate::cli::WatchArgs;

/// Loads every named shader, then polls for source changes until `--polls`
/// runs out (or forever).
///
/// A shader that fails its first load is not retried until its file changes;
/// `ShaderRegistry::reload_changed` forgets the stored failure on change and
/// the next poll acquires it again.
pub fn run_watch(args: WatchArgs, mut config: RegistryConfig) -> Result<()> {
    if !args.roots.is_empty() {
        let mut roots = args.roots.clone();
        roots.append(&mut config.roots);
        config.roots = roots;
    }
    let interval = args.interval.unwrap_or(config.reload_interval);

    let gpu = GpuThread::headless("unishade-naga").context("failed to start naga backend")?;
    let registry = ShaderRegistry::from_config(&config, gpu);

    let mut handles: HashMap<String, ShaderHandle> = HashMap::new();
    acquire_pending(&registry, &args.names, &mut handles);

    let mut reported: HashMap<String, String> = HashMap::new();
    let mut remaining = args.polls;
    while remaining != Some(0) {
        thread::sleep(interval);
        poll(&registry, &handles, &mut reported);
        acquire_pending(&registry, &args.names, &mut handles);
        if let Some(count) = remaining.as_mut() {
            *count -= 1;
        }
    }

    for (name, handle) in handles {
        if let Err(err) = registry.release(handle) {
            warn!(shader = %name, error = %err, "failed to release shader");
        }
    }
    Ok(())
}

fn acquire_pending(
    registry: &ShaderRegistry,
    names: &[String],
    handles: &mut HashMap<String, ShaderHandle>,
) {
    for name in names {
        if handles.contains_key(name) || registry.failure(name).is_some() {
            continue;
        }
        match registry.acquire(name) {
            Ok(handle) => {
                let stages = registry.stages(handle).unwrap_or_default();
                let stages: Vec<String> = stages.iter().map(ToString::to_string).collect();
                info!(shader = %name, %handle, stages = %stages.join(","), "shader ready");
                println!("ready   {name} ({})", stages.join(", "));
                handles.insert(name.clone(), handle);
            }
            Err(err) => {
                warn!(shader = %name, "shader failed to load");
                println!("failed  {name}\n{}", indent(&err.to_string()));
            }
        }
    }
}

/// A reload that keeps failing on the same text is retried every poll; its
/// error is only printed when it first appears or changes.
fn poll(
    registry: &ShaderRegistry,
    handles: &HashMap<String, ShaderHandle>,
    reported: &mut HashMap<String, String>,
) {
    let before: HashMap<&str, Option<u64>> = handles
        .iter()
        .map(|(name, handle)| (name.as_str(), registry.source_version(*handle)))
        .collect();

    let mut failing = Vec::new();
    for (name, err) in registry.reload_changed() {
        let message = err.to_string();
        if reported.get(&name) != Some(&message) {
            println!("failed  {name} (keeping previous program)\n{}", indent(&message));
            reported.insert(name.clone(), message);
        }
        failing.push(name);
    }
    reported.retain(|name, _| failing.contains(name));

    for (name, handle) in handles {
        let now = registry.source_version(*handle);
        if before.get(name.as_str()).copied().flatten() != now {
            println!("reload  {name}");
        }
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
