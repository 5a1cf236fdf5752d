//! coop-kernel demo
//!
//! Runs a few tasks on the host clock for a while, then prints the
//! scheduler statistics as JSON.
//!
//! Usage: coopk-demo [--seconds N] [--config kernel.json] [-v]

use coop_kernel::kernel::{Flow, Kernel, KernelConfig, StacklessConfig};
use log::{LevelFilter, Log, Metadata, Record, info, warn};
use std::error::Error;
use std::time::Duration;

const DEFAULT_SECONDS: u64 = 3;
const TOPIC_SAMPLES: u32 = 1;

/// Minimal stderr backend for the `log` facade
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

struct Options {
    seconds: u64,
    config: Option<String>,
    verbose: bool,
}

fn parse_args() -> Options {
    let mut options = Options {
        seconds: DEFAULT_SECONDS,
        config: None,
        verbose: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seconds" => {
                if let Some(n) = args.next().and_then(|s| s.parse().ok()) {
                    options.seconds = n;
                }
            }
            "--config" => options.config = args.next(),
            "-v" | "--verbose" => options.verbose = true,
            other => eprintln!("ignoring unknown argument {}", other),
        }
    }
    options
}

fn main() -> Result<(), Box<dyn Error>> {
    let options = parse_args();
    log::set_logger(&LOGGER).map_err(|e| e.to_string())?;
    log::set_max_level(if options.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let mut kernel = match &options.config {
        Some(path) => Kernel::from_json(&std::fs::read_to_string(path)?)?,
        None => Kernel::new(KernelConfig::default())?,
    };
    let m = kernel.manager_mut();
    m.set_idle(|ms| std::thread::sleep(Duration::from_millis(u64::from(ms.min(50)))));

    let samples = m.create_queue::<u32>(4)?;
    m.bus_mut().register_topic(TOPIC_SAMPLES, std::mem::size_of::<u32>())?;
    m.bus_mut()
        .subscribe_value::<u32, _>(TOPIC_SAMPLES, |v| info!("bus: sample {}", v))?;

    // Two-phase blinker driven by its marker
    m.create_stackless(3, StacklessConfig::forever(250), |cx| match cx.marker() {
        0 => {
            info!("blink on at {} ms", cx.now_ms());
            Flow::Delay { marker: 1, ms: 250 }
        }
        _ => {
            info!("blink off at {} ms", cx.now_ms());
            Flow::Delay { marker: 0, ms: 750 }
        }
    })?;

    kernel.spawn_stackful(1, move |cx| {
        let mut n = 0u32;
        loop {
            if let Err(e) = cx.send(samples, &n, 1000) {
                warn!("producer: {}", e);
            }
            n = n.wrapping_add(1);
            let _ = cx.delay(200);
        }
    })?;

    kernel.spawn_stackful(2, move |cx| loop {
        match cx.receive(samples, 1000) {
            Ok(v) => {
                let _ = cx.manager().bus_mut().publish_async_value(TOPIC_SAMPLES, &v);
            }
            Err(e) => warn!("consumer: {}", e),
        }
    })?;

    let clock = kernel.manager().clock().clone();
    let deadline = clock.now() + clock.ms_to_ticks((options.seconds * 1000).min(u32::MAX as u64) as u32);
    let (_, stats) = kernel.run_until(|m| m.clock().now() >= deadline, u64::MAX);

    info!(
        "{} passes: {} dispatched, {} urgent, {} idle, {} bus messages",
        stats.passes, stats.dispatched, stats.urgent, stats.idle, stats.delivered
    );
    println!("{}", kernel.manager().trace().to_json()?);
    Ok(())
}
