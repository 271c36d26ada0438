use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use netdump::{
    Args, CaptureSession, CaptureStats, Config, Controller, PacketSource, RotationTrigger,
    list_interfaces, run_capture_loop, signal,
};
use std::sync::Arc;
use std::thread;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_interfaces {
        let interfaces = list_interfaces().context("Unable to get information about interfaces")?;
        for (i, (name, desc)) in interfaces.iter().enumerate() {
            println!("{}. {} ({})", i + 1, name, desc);
        }
        return Ok(());
    }

    let config = Config::from_args(&args)?;
    let plan = config.validate()?;

    let shutdown = signal::termination_channel()?;
    let mut session = CaptureSession::open(&plan.session)
        .with_context(|| format!("Start capture on interface {} error", plan.session.interface))?;

    let mut controller = Controller::new(
        plan.template,
        session.link_type(),
        session.snaplen(),
        plan.post_rotate,
    )?;
    let trigger = RotationTrigger::start(plan.schedule)?;

    let stats = Arc::new(CaptureStats::default());
    // Reads block without a timeout, so this thread is never joined; it ends
    // with the process.
    {
        let active = controller.active_file();
        let stats = Arc::clone(&stats);
        thread::Builder::new()
            .name(format!("capture-{}", session.interface()))
            .spawn(move || run_capture_loop(&mut session, &active, &stats))
            .context("Unable to start capture thread")?;
    }

    controller
        .run(trigger.events(), &shutdown)
        .context("Capture stopped after a failed rotation")?;
    drop(trigger);

    info!(
        "Captured {} packets into {} file(s), {} write errors, {} read errors",
        stats.written(),
        controller.completed_files().len(),
        stats.write_errors(),
        stats.read_errors()
    );
    Ok(())
}
