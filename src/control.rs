//! Control surface shared by UI and persistence adapters
//!
//! Menus never own the engine. They see it through [`CcControl`], build their
//! entries from the current port list and settings, and activating an entry
//! calls exactly one setter.

use tracing::debug;

use crate::engine::{CcEngine, ChannelFilter, PortSelection, NUM_CHANNELS};
use crate::error::Result;
use crate::transport::PortDescriptor;

/// Label shown when no device is selected
pub const NO_DEVICE: &str = "No device";

/// Width of the port label in the module header
pub const PORT_LABEL_WIDTH: usize = 8;

/// Spacing of the first-CC menu entries
pub const FIRST_CC_STEP: u8 = 10;

/// Exclusive upper bound of the first-CC menu entries
pub const FIRST_CC_MENU_END: u8 = 120;

/// Query and command interface over a CC engine
pub trait CcControl {
    fn list_ports(&self) -> Vec<PortDescriptor>;
    fn port_name(&self, selection: PortSelection) -> Option<String>;
    fn port(&self) -> PortSelection;
    /// Name of the open device as it was when opened
    fn active_port_name(&self) -> Option<String>;
    fn set_port(&mut self, selection: PortSelection) -> Result<()>;
    fn channel(&self) -> ChannelFilter;
    fn set_channel(&mut self, channel: ChannelFilter) -> Result<()>;
    fn first_cc(&self) -> u8;
    fn set_first_cc(&mut self, first_cc: u8) -> Result<()>;
}

impl CcControl for CcEngine {
    fn list_ports(&self) -> Vec<PortDescriptor> {
        CcEngine::list_ports(self)
    }

    fn port_name(&self, selection: PortSelection) -> Option<String> {
        CcEngine::port_name(self, selection)
    }

    fn port(&self) -> PortSelection {
        CcEngine::port(self)
    }

    fn active_port_name(&self) -> Option<String> {
        CcEngine::active_port_name(self).map(str::to_string)
    }

    fn set_port(&mut self, selection: PortSelection) -> Result<()> {
        CcEngine::set_port(self, selection)
    }

    fn channel(&self) -> ChannelFilter {
        CcEngine::channel(self)
    }

    fn set_channel(&mut self, channel: ChannelFilter) -> Result<()> {
        CcEngine::set_channel(self, channel)
    }

    fn first_cc(&self) -> u8 {
        CcEngine::first_cc(self)
    }

    fn set_first_cc(&mut self, first_cc: u8) -> Result<()> {
        CcEngine::set_first_cc(self, first_cc)
    }
}

/// Setter invoked when a menu entry is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Port(PortSelection),
    Channel(ChannelFilter),
    FirstCc(u8),
}

/// One entry of a choice menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub text: String,
    pub action: MenuAction,
}

impl MenuItem {
    fn new(text: impl Into<String>, action: MenuAction) -> Self {
        Self {
            text: text.into(),
            action,
        }
    }

    /// Apply this entry's setter
    pub fn activate(&self, control: &mut dyn CcControl) -> Result<()> {
        debug!("Menu: {}", self.text);
        match self.action {
            MenuAction::Port(selection) => control.set_port(selection),
            MenuAction::Channel(channel) => control.set_channel(channel),
            MenuAction::FirstCc(first_cc) => control.set_first_cc(first_cc),
        }
    }
}

/// "No device" followed by every enumerable device
pub fn port_menu(control: &dyn CcControl) -> Vec<MenuItem> {
    std::iter::once(MenuItem::new(NO_DEVICE, MenuAction::Port(PortSelection::None)))
        .chain(control.list_ports().into_iter().map(|port| {
            MenuItem::new(
                port.descriptive_name(),
                MenuAction::Port(PortSelection::Index(port.index)),
            )
        }))
        .collect()
}

/// "All" followed by channels 1-16
pub fn channel_menu() -> Vec<MenuItem> {
    std::iter::once(MenuItem::new("All", MenuAction::Channel(ChannelFilter::All)))
        .chain((0..NUM_CHANNELS).map(|c| {
            MenuItem::new(
                (c + 1).to_string(),
                MenuAction::Channel(ChannelFilter::Channel(c)),
            )
        }))
        .collect()
}

/// First-CC offsets 0, 10, ..., 110
pub fn first_cc_menu() -> Vec<MenuItem> {
    (0..FIRST_CC_MENU_END)
        .step_by(FIRST_CC_STEP as usize)
        .map(|first_cc| MenuItem::new(first_cc.to_string(), MenuAction::FirstCc(first_cc)))
        .collect()
}

/// Selected device name, shortened for the module header
pub fn port_label(control: &dyn CcControl) -> String {
    let name = control.active_port_name().unwrap_or_default();
    ellipsize(&name, PORT_LABEL_WIDTH)
}

pub fn channel_label(control: &dyn CcControl) -> String {
    match control.channel() {
        ChannelFilter::All => "All".to_string(),
        ChannelFilter::Channel(c) => (c + 1).to_string(),
    }
}

pub fn first_cc_label(control: &dyn CcControl) -> String {
    control.first_cc().to_string()
}

/// Truncate to `width` characters, marking the cut with "..."
pub fn ellipsize(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let keep = width.saturating_sub(3);
    let mut short: String = text.chars().take(keep).collect();
    short.push_str("...");
    short
}
