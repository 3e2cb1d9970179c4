//! In-process desktop with a resizable virtual screen.

use deskcast_types::ScreenSize;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::error::DesktopError;
use crate::listeners::{ListenerList, ScreenListener};
use crate::{DesktopManager, DesktopResult};

/// A virtual screen whose size can be changed at runtime.
///
/// Size changes are serialised: the before listeners, the geometry update
/// and the after listeners of one change complete before the next begins.
pub struct VirtualDesktop {
    screen: RwLock<ScreenSize>,
    configurations: Vec<ScreenSize>,
    change_lock: Mutex<()>,
    before_change: ListenerList,
    after_change: ListenerList,
}

impl VirtualDesktop {
    /// Create a desktop accepting any non-zero size.
    pub fn new(initial: ScreenSize) -> Self {
        Self::with_configurations(initial, Vec::new())
    }

    /// Create a desktop restricted to the given configurations.
    ///
    /// An empty list accepts any non-zero size.
    pub fn with_configurations(initial: ScreenSize, configurations: Vec<ScreenSize>) -> Self {
        Self {
            screen: RwLock::new(initial),
            configurations,
            change_lock: Mutex::new(()),
            before_change: ListenerList::new(),
            after_change: ListenerList::new(),
        }
    }

    /// Supported screen configurations (empty when unrestricted).
    pub fn configurations(&self) -> &[ScreenSize] {
        &self.configurations
    }

    /// Change the screen size, notifying listeners around the change.
    ///
    /// Setting the current size again is a no-op and notifies nobody.
    #[instrument(name = "set_screen_size", skip(self), fields(size = %size))]
    pub fn set_screen_size(&self, size: ScreenSize) -> DesktopResult<()> {
        if size.width == 0 || size.height == 0 || size.rate <= 0 {
            return Err(DesktopError::InvalidScreenSize(size));
        }
        if !self.configurations.is_empty() && !self.configurations.contains(&size) {
            return Err(DesktopError::UnsupportedScreenSize(size));
        }

        let _change = self.change_lock.lock();

        let previous = *self.screen.read();
        if previous == size {
            debug!("Screen size unchanged");
            return Ok(());
        }

        info!(%previous, "Changing screen size");
        self.before_change.notify();
        *self.screen.write() = size;
        self.after_change.notify();

        Ok(())
    }
}

impl DesktopManager for VirtualDesktop {
    fn screen_size(&self) -> ScreenSize {
        *self.screen.read()
    }

    fn on_before_screen_size_change(&self, listener: ScreenListener) {
        self.before_change.register(listener);
    }

    fn on_after_screen_size_change(&self, listener: ScreenListener) {
        self.after_change.register(listener);
    }
}

impl Default for VirtualDesktop {
    fn default() -> Self {
        Self::new(ScreenSize::default())
    }
}
