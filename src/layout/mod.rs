//! Window layout logic.
//!
//! Every workspace keeps its windows in three lists. `surfaces` holds every window in the order
//! it was added. `mapped` holds the windows that have content, most recently focused first.
//! `visible` is what actually ends up on screen, top to bottom, and is rebuilt from `mapped` by
//! [`Workspace::compute_layout()`] whenever something relevant changes.
//!
//! Windows are mostly placed where the client or the user puts them. The exception is the
//! maximized or fullscreen window: the topmost one gets the main area (the workspace minus the
//! panel strip) or the whole workspace, and hides everything below it.
//!
//! Geometry changes that need the client to redraw at a new size go through a
//! [`Transaction`](transaction::Transaction): the workspace keeps drawing a frozen snapshot of the
//! old layout until every affected window has committed a buffer of the new size, so resizes
//! never show a mix of old and new geometry.

use std::time::Duration;

use bitflags::bitflags;
use rose_config::Config;
use smithay::utils::{Logical, Point, Rectangle, Size};

pub use self::workspace::{Workspace, WorkspaceId};
use crate::utils::clamp_size;

pub mod transaction;
pub mod workspace;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Panel {
    pub position: PanelPosition,
    /// Thickness of the panel strip in logical pixels.
    pub size: i32,
    pub is_visible: bool,
}

pub use rose_config::PanelPosition;

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Whether geometry changes wait for clients to catch up.
    pub transactions: bool,
    /// How long a transaction waits for clients before going through anyway.
    pub transaction_timeout: Duration,
    /// Age at which a transaction is forcibly committed when an output draws a frame.
    pub fatal_transaction_timeout: Duration,
    /// Extra area around toplevels that gets damaged when they move.
    pub decoration_margin: i32,
    /// Panel configuration for new workspaces.
    pub panel: Panel,
}

bitflags! {
    /// Which parts of a [`SurfaceState`](crate::surface::SurfaceState) a configure applies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigureFlags: u8 {
        const POSITION = 1;
        const SIZE = 1 << 1;
        const ACTIVATED = 1 << 2;
        const MAXIMIZED = 1 << 3;
        const MINIMIZED = 1 << 4;
        const FULLSCREEN = 1 << 5;

        const GEOMETRY = Self::POSITION.bits() | Self::SIZE.bits();
    }
}

impl Default for Panel {
    fn default() -> Self {
        Self::from(rose_config::Panel::default())
    }
}

impl From<rose_config::Panel> for Panel {
    fn from(config: rose_config::Panel) -> Self {
        Self {
            position: config.position,
            size: i32::from(config.size),
            is_visible: !config.hidden,
        }
    }
}

impl Panel {
    /// Returns the part of `area` not covered by the panel.
    ///
    /// The result never has a negative size, even if the panel is larger than the area.
    pub fn main_area(&self, area: Rectangle<i32, Logical>) -> Rectangle<i32, Logical> {
        if !self.is_visible {
            return area;
        }

        let size = self.size.max(0);
        let Rectangle { loc, size: area_size } = area;
        let (loc, area_size) = match self.position {
            PanelPosition::Top => (
                Point::from((loc.x, loc.y + size)),
                Size::from((area_size.w, area_size.h - size)),
            ),
            PanelPosition::Bottom => (loc, Size::from((area_size.w, area_size.h - size))),
            PanelPosition::Left => (
                Point::from((loc.x + size, loc.y)),
                Size::from((area_size.w - size, area_size.h)),
            ),
            PanelPosition::Right => (loc, Size::from((area_size.w - size, area_size.h))),
        };

        Rectangle::new(loc, clamp_size(area_size))
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            transactions: true,
            transaction_timeout: rose_config::Transactions::default().timeout(),
            fatal_transaction_timeout: rose_config::Transactions::default().fatal_timeout(),
            decoration_margin: i32::from(rose_config::DEFAULT_DECORATION_MARGIN),
            panel: Panel::default(),
        }
    }
}

impl Options {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transactions: !config.transactions.off,
            transaction_timeout: config.transactions.timeout(),
            fatal_transaction_timeout: config.transactions.fatal_timeout(),
            decoration_margin: i32::from(config.decorations.margin),
            panel: Panel::from(config.panel),
        }
    }
}
