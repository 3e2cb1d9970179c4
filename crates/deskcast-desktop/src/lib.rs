//! Virtual screen geometry and resize notifications.
//!
//! The capture core only needs three things from the desktop: the current
//! screen size, and two notifications bracketing every size change.

mod error;
mod listeners;
mod virtual_desktop;

pub use error::DesktopError;
pub use listeners::{ListenerList, ScreenListener};
pub use virtual_desktop::VirtualDesktop;

use deskcast_types::ScreenSize;

/// Result type for desktop operations.
pub type DesktopResult<T> = Result<T, DesktopError>;

/// Owner of the screen geometry.
///
/// Listeners run once per change, in registration order, on the thread
/// that performs the change. They are never unregistered.
pub trait DesktopManager: Send + Sync {
    /// Get the current screen size.
    fn screen_size(&self) -> ScreenSize;

    /// Register a listener run before the geometry changes.
    fn on_before_screen_size_change(&self, listener: ScreenListener);

    /// Register a listener run after the new geometry is in effect.
    fn on_after_screen_size_change(&self, listener: ScreenListener);
}
