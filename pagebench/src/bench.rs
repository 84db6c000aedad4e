use tracing::{debug, info, info_span, warn};

use crate::{
    config::RunConfig,
    error::BenchError,
    layout::{normalize, resolve},
    platform::Platform,
    registrar::BufferRegistrar,
    report::Report,
    timer::{PhaseTimer, TimingSample},
    warmup::{warm_up, Strategy},
};

/// Provisions memory and faults every page in, timing both phases.
///
/// Soft failures (denied privilege, no large pages, no io_uring) are logged and the run
/// continues with degraded settings. Failure to provision memory aborts the run.
pub(crate) fn run<P: Platform>(cfg: &RunConfig, platform: &P) -> Result<Report, BenchError> {
    let _span = info_span!("run").entered();
    let small = platform.small_page_size();

    let granted = cfg.use_large_pages
        && match platform.escalate_privilege() {
            Ok(()) => true,
            Err(err) => {
                warn!("lock memory privilege denied, falling back to small pages: {:#}", err);
                false
            }
        };
    let large_minimum = if granted { platform.large_page_minimum() } else { 0 };
    if granted && large_minimum == 0 {
        warn!("host reports no large page size, falling back to small pages");
    }
    let layout = resolve(cfg.use_large_pages, granted, large_minimum, small);
    let plan = normalize(cfg.total_requested_bytes, layout.page_size)?;
    debug!(
        "requested {} bytes, provisioning {} bytes with {} byte pages. flags {}",
        cfg.total_requested_bytes, plan.size, layout.page_size, layout.flags
    );

    let mut registrar = if cfg.use_buffer_registration {
        match platform.buffer_registrar() {
            Ok(registrar) => Some(registrar),
            Err(err) => {
                warn!("buffer registration is not available, skipping it: {:#}", err);
                None
            }
        }
    } else {
        None
    };

    let strategy = if cfg.use_parallel_warm_up {
        Strategy::parallel(cfg.workers)
    } else {
        Strategy::Serial
    };

    let timer = PhaseTimer;
    // timed portion begins here
    let start = timer.now();
    let region = platform
        .provision(plan.size, layout.flags)
        .map_err(|source| BenchError::Allocation { size: plan.size, source })?;
    if let Some(registrar) = registrar.as_mut() {
        if let Err(err) = registrar.register(&region).and_then(|_| registrar.deregister()) {
            warn!("buffer registration failed: {:#}", err);
        }
    }
    let mid = timer.now();
    warm_up(&region, strategy, small, cfg.touch)?;
    let end = timer.now();
    // timed portion ends here

    let timing = TimingSample { start, mid, end };
    info!(
        "provisioned in {}. allocation {}, {} warm-up {}",
        humantime::format_duration(timing.total()),
        humantime::format_duration(timing.allocation()),
        strategy,
        humantime::format_duration(timing.warm_up()),
    );
    Ok(Report {
        size: plan.size,
        page_size: layout.page_size,
        timing,
        touch: cfg.touch,
    })
}
