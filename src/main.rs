//! gpu-reserve: pick, restrict and wait for GPUs from the shell.
//!
//! `restrict` and `auto` print the resulting `CUDA_VISIBLE_DEVICES` as an
//! `export` line, so `eval "$(gpu-reserve restrict 1)"` narrows the calling
//! shell. `auto -- <cmd>` runs the workload directly with that environment.

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gpu_reserve::backend::open_registry;
use gpu_reserve::config::{Cli, Command, Config};
use gpu_reserve::gpu::device::{
    cuda_visible_devices, to_gib, GpuDevice, ALLOW_GROWTH_VAR, DEVICE_ORDER_VAR,
    VISIBLE_DEVICES_VAR,
};
use gpu_reserve::gpu::{
    await_memory, reserve_freeest, restrict, select_freeest, DeviceRegistry, ThreadSleeper,
};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging. Logs go to stderr so stdout stays scriptable.
    let filter = if cli.verbose {
        "gpu_reserve=debug"
    } else {
        "gpu_reserve=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    }

    info!("gpu-reserve v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?.with_cli(&cli);
    let mut registry = open_registry(&config)?;

    match &cli.command {
        Command::List { json } => list(&*registry, *json)?,
        Command::Select => {
            let (index, free) = select_freeest(&*registry)?;
            println!("{index} {free}");
        }
        Command::Restrict { devices } => {
            let visible = restrict(&mut registry, config.devices_or(devices))?;
            print_exports(&visible);
        }
        Command::Await { devices, wait } => {
            let config = config.clone().with_wait_args(wait);
            await_memory(
                &*registry,
                &mut ThreadSleeper,
                config.devices_or(devices),
                config.min_free_bytes,
                config.poll_interval(),
            )?;
            info!("All requested devices have enough free memory");
        }
        Command::Auto { wait, command } => {
            let config = config.clone().with_wait_args(wait);

            let visible = reserve_freeest(
                &mut *registry,
                &mut ThreadSleeper,
                config.min_free_bytes,
                config.poll_interval(),
            )?;

            if command.is_empty() {
                print_exports(&visible);
            } else {
                let status = run_workload(&visible, command)?;
                std::process::exit(status.code().unwrap_or(1));
            }
        }
    }

    Ok(())
}

fn list(registry: &dyn DeviceRegistry, json: bool) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct Row {
        #[serde(flatten)]
        device: GpuDevice,
        free_bytes: u64,
        visible: bool,
    }

    let visible = registry.visible_devices()?;
    let mut rows = Vec::new();
    for device in registry.physical_devices()? {
        let free_bytes = registry.free_memory(device.index)?;
        rows.push(Row {
            visible: visible.contains(&device),
            device,
            free_bytes,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            println!(
                "{:>3}  {:<32} {:>8.2} GiB free{}",
                row.device.index,
                row.device.name,
                to_gib(row.free_bytes),
                if row.visible { "" } else { "  (hidden)" }
            );
        }
    }
    Ok(())
}

fn visible_indices(visible: &[GpuDevice]) -> String {
    let indices: Vec<usize> = visible.iter().map(|d| d.index).collect();
    cuda_visible_devices(&indices)
}

fn print_exports(visible: &[GpuDevice]) {
    println!("export {DEVICE_ORDER_VAR}=PCI_BUS_ID");
    println!("export {VISIBLE_DEVICES_VAR}={}", visible_indices(visible));
    println!("export {ALLOW_GROWTH_VAR}=true");
}

fn run_workload(
    visible: &[GpuDevice],
    command: &[String],
) -> anyhow::Result<std::process::ExitStatus> {
    let (program, args) = command
        .split_first()
        .context("no command given")?;

    info!(program = %program, devices = %visible_indices(visible), "Starting workload");

    std::process::Command::new(program)
        .args(args)
        .env(DEVICE_ORDER_VAR, "PCI_BUS_ID")
        .env(VISIBLE_DEVICES_VAR, visible_indices(visible))
        .env(ALLOW_GROWTH_VAR, "true")
        .status()
        .with_context(|| format!("failed to start {program}"))
}
