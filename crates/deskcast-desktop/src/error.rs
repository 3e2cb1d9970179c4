//! Error types for the desktop module.

use deskcast_types::ScreenSize;
use thiserror::Error;

/// Errors that can occur while changing the screen configuration.
#[derive(Debug, Error)]
pub enum DesktopError {
    /// Zero width, height or rate.
    #[error("Invalid screen size: {0}")]
    InvalidScreenSize(ScreenSize),

    /// Size not among the configured screen configurations.
    #[error("Unsupported screen size: {0}")]
    UnsupportedScreenSize(ScreenSize),
}
