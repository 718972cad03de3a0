#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Panel {
    #[knuffel(child, unwrap(argument), default)]
    pub position: PanelPosition,
    #[knuffel(child, unwrap(argument), default = DEFAULT_PANEL_SIZE)]
    pub size: u16,
    #[knuffel(child)]
    pub hidden: bool,
}

pub const DEFAULT_PANEL_SIZE: u16 = 32;

impl Default for Panel {
    fn default() -> Self {
        Self {
            position: PanelPosition::default(),
            size: DEFAULT_PANEL_SIZE,
            hidden: false,
        }
    }
}

/// Screen edge that the panel is attached to.
#[derive(knuffel::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PanelPosition {
    #[default]
    Top,
    Bottom,
    Left,
    Right,
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decorations {
    /// Extra area around a toplevel that gets damaged together with it when it moves.
    #[knuffel(child, unwrap(argument), default = DEFAULT_DECORATION_MARGIN)]
    pub margin: u16,
}

pub const DEFAULT_DECORATION_MARGIN: u16 = 8;

impl Default for Decorations {
    fn default() -> Self {
        Self {
            margin: DEFAULT_DECORATION_MARGIN,
        }
    }
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workspaces {
    #[knuffel(child, unwrap(argument), default = DEFAULT_WORKSPACE_COUNT)]
    pub count: u8,
}

pub const DEFAULT_WORKSPACE_COUNT: u8 = 4;

impl Default for Workspaces {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKSPACE_COUNT,
        }
    }
}
