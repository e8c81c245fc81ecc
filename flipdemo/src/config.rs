use std::{path::PathBuf, time::Duration};

use clap::Parser;
use kmsflip::{
    backend::drm::{FlipRetryPolicy, SessionConfig},
    reexports::drm::control::from_u32,
};

/// Show an animated test pattern on one plane using atomic page flips
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Drm device node
    #[arg(short, long, default_value = "/dev/dri/card0")]
    pub device: PathBuf,
    /// Connector to drive
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub connector: u32,
    /// Crtc to route connector and plane to
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub crtc: u32,
    /// Plane showing the frames
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub plane: u32,

    #[arg(long, default_value_t = 640)]
    pub width: u32,
    #[arg(long, default_value_t = 512)]
    pub height: u32,
    /// Horizontal position on the crtc
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub x: i32,
    /// Vertical position on the crtc
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub y: i32,

    /// Rejected page flips in a row before giving up
    #[arg(long, default_value_t = 8)]
    pub max_flip_failures: u32,
    /// Delay before resubmitting a rejected page flip, in milliseconds
    #[arg(long, default_value_t = 16)]
    pub retry_delay_ms: u64,
}

impl Cli {
    /// Objects and geometry of the session, `None` if an object id is invalid
    pub fn session_config(&self) -> Option<SessionConfig> {
        Some(SessionConfig {
            connector: from_u32(self.connector)?,
            crtc: from_u32(self.crtc)?,
            plane: from_u32(self.plane)?,
            size: (self.width, self.height),
            offset: (self.x, self.y),
        })
    }

    pub fn retry_policy(&self) -> FlipRetryPolicy {
        FlipRetryPolicy {
            max_consecutive_failures: self.max_flip_failures.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
