use std::{io, path::PathBuf, process::ExitCode};

use calloop::signals::{Signal, Signals};
use clap::Parser;
use kmsflip::{
    backend::drm::{
        check_plane, enable_atomic, teardown, DrmDeviceFd, Error, FlipLoop, FlipSession, SURFACE_FORMAT,
    },
    producer::{FpsCounter, TestPattern},
    utils::DeviceFd,
};
use tracing::{error, info, warn};

mod config;

use config::Cli;

#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("Failed to open {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Missing client capabilities: {0}")]
    Capability(Error),
    #[error("Plane cannot be used: {0}")]
    Plane(Error),
    #[error("Invalid object ids on the command line")]
    InvalidObjects,
    #[error("Setup failed: {0}")]
    Setup(Error),
    #[error("Flip loop failed: {0}")]
    Loop(Error),
}

impl Failure {
    fn exit_code(&self) -> u8 {
        match self {
            Failure::Open { .. } => 1,
            Failure::Capability(_) => 2,
            Failure::Plane(_) => 3,
            Failure::InvalidObjects | Failure::Setup(_) => 4,
            Failure::Loop(_) => 5,
        }
    }
}

fn main() -> ExitCode {
    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().init();
    }

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!("{}", failure);
            ExitCode::from(failure.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), Failure> {
    let config = cli.session_config().ok_or(Failure::InvalidObjects)?;

    let fd = DeviceFd::open(&cli.device).map_err(|source| Failure::Open {
        path: cli.device.clone(),
        source,
    })?;
    let device = DrmDeviceFd::new(fd);

    enable_atomic(&device).map_err(|err| {
        if err.is_capability_error() {
            Failure::Capability(err)
        } else {
            Failure::Setup(err)
        }
    })?;
    check_plane(&device, config.crtc, config.plane, SURFACE_FORMAT).map_err(Failure::Plane)?;

    let mut session = FlipSession::new(
        device,
        config,
        Box::new(TestPattern::new()),
        Box::new(FpsCounter::default()),
        cli.retry_policy(),
    )
    .map_err(|err| {
        if err.is_plane_error() {
            Failure::Plane(err)
        } else {
            Failure::Setup(err)
        }
    })?;

    let mut flip_loop = match FlipLoop::new(&session).and_then(|flip_loop| {
        insert_signal_handler(&flip_loop)?;
        Ok(flip_loop)
    }) {
        Ok(flip_loop) => flip_loop,
        Err(err) => {
            teardown(&mut session, None);
            return Err(Failure::Setup(err));
        }
    };

    if let Err(err) = session.modeset() {
        teardown(&mut session, Some(&mut flip_loop));
        return Err(Failure::Setup(err));
    }

    let result = flip_loop.run(&mut session);
    let report = teardown(&mut session, Some(&mut flip_loop));
    if !report.is_clean() {
        warn!(?report, "Teardown was not clean");
    }
    result.map_err(Failure::Loop)?;

    info!(flips = session.completed_flips(), "Done");
    Ok(())
}

fn insert_signal_handler(flip_loop: &FlipLoop<DrmDeviceFd>) -> Result<(), Error> {
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM]).map_err(Error::EventLoop)?;
    flip_loop
        .handle()
        .insert_source(signals, |event, _, session| {
            info!(signal = ?event.signal(), "Shutting down");
            session.request_shutdown();
        })
        .map_err(|err| Error::EventLoop(err.error))?;
    Ok(())
}
