//! `om run`: load, link and execute a program

use crate::output::StyledOutput;
use anyhow::Context;
use om_bytecode::unit::EXTENSION;
use om_core::{FileResolver, Loader, LoaderOptions, TickSource, Value, Vm, VmOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable listing extra module directories
pub const OM_PATH: &str = "OM_PATH";

pub struct RunArgs {
    pub module: String,
    pub args: Vec<String>,
    pub paths: Vec<PathBuf>,
    pub optimize: bool,
    pub verify: bool,
    pub tick_ms: Option<u64>,
    pub tick_steps: Option<u64>,
    pub max_stack: Option<usize>,
}

pub fn execute(args: RunArgs, out: &mut StyledOutput) -> anyhow::Result<()> {
    let file = looks_like_file(&args.module).then(|| PathBuf::from(&args.module));
    let search_paths = search_paths(&args.paths, file.as_deref());
    debug!(?search_paths, "module search paths");

    let options = LoaderOptions::default()
        .with_optimize(args.optimize)
        .with_verify(args.verify)
        .with_search_paths(search_paths);
    let loader = Loader::new(FileResolver::from_options(&options), options);

    let program = match &file {
        Some(path) => {
            let unit = FileResolver::load_file(path)?;
            loader.load_unit(unit)
        }
        None => loader.load(&args.module),
    }
    .with_context(|| format!("Failed to load {}", args.module))?;

    let vm = Vm::new(program, vm_options(&args));
    let result = vm.run(&args.args)?;
    if !matches!(result, Value::Null) {
        out.line(&vm.program().describe(&result));
    }
    Ok(())
}

fn vm_options(args: &RunArgs) -> VmOptions {
    let mut options = VmOptions::default();
    if let Some(steps) = args.tick_steps {
        options = options.with_tick(TickSource::Steps(steps.max(1)));
    } else if let Some(ms) = args.tick_ms {
        options = options.with_tick(TickSource::Wall(Duration::from_millis(ms.max(1))));
    }
    if let Some(slots) = args.max_stack {
        options = options.with_max_stack(slots);
    }
    options
}

/// `--path` directories, then the unit file's own directory, then `OM_PATH`
fn search_paths(explicit: &[PathBuf], file: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = explicit.to_vec();
    if let Some(dir) = file.and_then(Path::parent) {
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir.to_path_buf()
        };
        paths.push(dir);
    }
    if let Some(extra) = std::env::var_os(OM_PATH) {
        paths.extend(std::env::split_paths(&extra));
    }
    if paths.is_empty() {
        paths.push(PathBuf::from("."));
    }
    paths
}

fn looks_like_file(module: &str) -> bool {
    let path = Path::new(module);
    path.extension().map_or(false, |ext| ext == EXTENSION) || path.is_file()
}
