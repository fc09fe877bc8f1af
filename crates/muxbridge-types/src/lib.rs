//! Shared data types for muxbridge
//!
//! Layout trees, pane geometry and session summaries exchanged between the
//! control bridge and the web layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Constants
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Axis along which a split arranges its children.
///
/// `Horizontal` places children side by side (brace-delimited in a layout
/// string), `Vertical` stacks them (bracket-delimited).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    Horizontal,
    Vertical,
}

impl SplitDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitDirection::Horizontal => "horizontal",
            SplitDirection::Vertical => "vertical",
        }
    }
}

impl std::str::FromStr for SplitDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "horizontal" | "h" => Ok(Self::Horizontal),
            "vertical" | "v" => Ok(Self::Vertical),
            _ => Err(format!(
                "Invalid split direction: '{}'. Valid options: 'horizontal', 'vertical'",
                s
            )),
        }
    }
}

impl std::fmt::Display for SplitDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge a pane grows towards when nudged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaneEdge {
    Left,
    Right,
    Up,
    Down,
}

impl PaneEdge {
    /// `resize-pane` flag for this edge.
    pub fn flag(&self) -> &'static str {
        match self {
            PaneEdge::Left => "-L",
            PaneEdge::Right => "-R",
            PaneEdge::Up => "-U",
            PaneEdge::Down => "-D",
        }
    }
}

/// A window's pane tree as described by the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum LayoutNode {
    Leaf {
        /// `None` only when a malformed layout omitted the pane number.
        pane_id: Option<u32>,
        width: u32,
        height: u32,
        x: u32,
        y: u32,
    },
    Split {
        orientation: SplitDirection,
        width: u32,
        height: u32,
        x: u32,
        y: u32,
        children: Vec<LayoutNode>,
    },
}

impl LayoutNode {
    pub fn width(&self) -> u32 {
        match self {
            LayoutNode::Leaf { width, .. } | LayoutNode::Split { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            LayoutNode::Leaf { height, .. } | LayoutNode::Split { height, .. } => *height,
        }
    }

    pub fn x(&self) -> u32 {
        match self {
            LayoutNode::Leaf { x, .. } | LayoutNode::Split { x, .. } => *x,
        }
    }

    pub fn y(&self) -> u32 {
        match self {
            LayoutNode::Leaf { y, .. } | LayoutNode::Split { y, .. } => *y,
        }
    }

    /// Size of this node along `direction`'s axis.
    pub fn extent(&self, direction: SplitDirection) -> u32 {
        match direction {
            SplitDirection::Horizontal => self.width(),
            SplitDirection::Vertical => self.height(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, LayoutNode::Leaf { .. })
    }

    /// Pane numbers of every leaf, in left-to-right order of the layout string.
    pub fn pane_ids(&self) -> Vec<u32> {
        let mut ids = Vec::new();
        self.collect_pane_ids(&mut ids);
        ids
    }

    fn collect_pane_ids(&self, ids: &mut Vec<u32>) {
        match self {
            LayoutNode::Leaf { pane_id, .. } => ids.extend(pane_id),
            LayoutNode::Split { children, .. } => {
                for child in children {
                    child.collect_pane_ids(ids);
                }
            }
        }
    }
}

/// Renderer-facing projection of a [`LayoutNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum RenderLayoutNode {
    Terminal {
        pane_id: String,
    },
    Split {
        direction: SplitDirection,
        children: Vec<RenderLayoutNode>,
        /// Percentage per child, summing to ~100.
        ratio: Vec<f64>,
    },
}

/// Format a pane number as the multiplexer's canonical pane id (`%N`).
pub fn pane_id_string(pane: u32) -> String {
    format!("%{}", pane)
}

/// Geometry of one pane as reported by `list-panes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneInfo {
    pub pane_id: String,
    pub width: u16,
    pub height: u16,
    pub left: u16,
    pub top: u16,
    pub active: bool,
}

/// Terminal dimensions reported by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

/// Device class a client declares about itself. Passive signal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Lifecycle state of a control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Ready,
    Destroyed,
}

/// Snapshot of a live control session for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub name: String,
    pub state: SessionState,
    pub clients: usize,
    pub created_at: DateTime<Utc>,
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_render_node_wire_shape() {
        let node = RenderLayoutNode::Split {
            direction: SplitDirection::Horizontal,
            children: vec![
                RenderLayoutNode::Terminal { pane_id: "%0".to_string() },
                RenderLayoutNode::Terminal { pane_id: "%1".to_string() },
            ],
            ratio: vec![50.0, 50.0],
        };

        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({
                "type": "split",
                "direction": "horizontal",
                "children": [
                    { "type": "terminal", "paneId": "%0" },
                    { "type": "terminal", "paneId": "%1" }
                ],
                "ratio": [50.0, 50.0]
            })
        );
    }

    #[test]
    fn test_unknown_device_type() {
        let device: DeviceType = serde_json::from_str("\"smartwatch\"").unwrap();
        assert_eq!(device, DeviceType::Unknown);
        let device: DeviceType = serde_json::from_str("\"mobile\"").unwrap();
        assert_eq!(device, DeviceType::Mobile);
    }

    #[test]
    fn test_pane_ids_in_order() {
        let tree = LayoutNode::Split {
            orientation: SplitDirection::Vertical,
            width: 80,
            height: 24,
            x: 0,
            y: 0,
            children: vec![
                LayoutNode::Leaf { pane_id: Some(3), width: 80, height: 12, x: 0, y: 0 },
                LayoutNode::Leaf { pane_id: Some(1), width: 80, height: 11, x: 0, y: 13 },
            ],
        };
        assert_eq!(tree.pane_ids(), vec![3, 1]);
        assert_eq!(tree.extent(SplitDirection::Vertical), 24);
    }

    #[test]
    fn test_split_direction_parse() {
        assert_eq!("horizontal".parse::<SplitDirection>(), Ok(SplitDirection::Horizontal));
        assert_eq!("V".parse::<SplitDirection>(), Ok(SplitDirection::Vertical));
        assert!("diagonal".parse::<SplitDirection>().is_err());
    }
}
