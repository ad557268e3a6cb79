// src/main.rs
// Demo binary: a frame loop driving a ping-pong task, a gated task, and a
// count-down timer. RUST_LOG=debug shows the handle lifecycle.

use std::cell::Cell;
use std::rc::Rc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tickwork::{FailMode, LoopMode, Scheduler, TickDriver};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let driver = TickDriver::new();
    let sched = Scheduler::new(driver.clone());

    // A one-second ping-pong sweep, three iterations.
    let sweep = sched.task_for(
        |p| info!(progress = format!("{p:.2}"), "sweep"),
        1.0,
        None,
    );
    sweep
        .loop_mode(LoopMode::PingPong)
        .loop_count(3)
        .on_loop(|i| info!(iteration = i, "sweep looped"))
        .on_complete(|| info!("sweep done"))
        .begin();

    // An unbounded task held until the gate opens mid-run.
    let gate = Rc::new(Cell::new(false));
    let probe = sched.task(|_| info!("gated task ran"), None);
    let g = gate.clone();
    probe
        .with_condition(move || g.get())
        .fail_mode(FailMode::Pause)
        .begin();

    // A two-second count-down timer reporting remaining time.
    let timer = sched.timer(2.0, true, None);
    timer
        .on_update(|t| {
            info!(
                remaining = format!("{:.2}", t.remaining().as_secs_f32()),
                "timer"
            );
        })
        .on_complete(|| info!("timer done"))
        .begin();

    let dt = 1.0 / 60.0;
    for frame in 0..200 {
        if frame == 90 {
            info!("opening the gate");
            gate.set(true);
        }
        if frame == 120 {
            probe.cancel();
        }
        sched.tick(dt);
    }

    sched.shutdown();
    info!("frame loop finished");
}
