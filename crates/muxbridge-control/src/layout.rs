//! Layout string parser
//!
//! Grammar: `<checksum>,<node>` where a node is `WxH,X,Y` followed by either
//! `,<pane>` (leaf), `{node,node...}` (side-by-side split) or
//! `[node,node...]` (stacked split).

use muxbridge_types::{pane_id_string, LayoutNode, RenderLayoutNode, SplitDirection};

use crate::error::{BridgeError, BridgeResult};

/// Parse a full layout string, checksum included.
pub fn parse_layout(input: &str) -> BridgeResult<LayoutNode> {
    let body = match input.split_once(',') {
        Some((_checksum, body)) => body,
        None => return Err(BridgeError::InvalidLayout(format!("missing checksum in '{}'", input))),
    };

    let mut parser = Parser { src: body.as_bytes(), pos: 0 };
    let node = parser.node()?;
    if parser.pos != parser.src.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(node)
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn node(&mut self) -> BridgeResult<LayoutNode> {
        let width = self.number()?;
        self.expect(b'x')?;
        let height = self.number()?;
        self.expect(b',')?;
        let x = self.number()?;
        self.expect(b',')?;
        let y = self.number()?;

        match self.peek() {
            Some(b'{') => {
                let children = self.children(b'}')?;
                Ok(LayoutNode::Split {
                    orientation: SplitDirection::Horizontal,
                    width,
                    height,
                    x,
                    y,
                    children,
                })
            }
            Some(b'[') => {
                let children = self.children(b']')?;
                Ok(LayoutNode::Split {
                    orientation: SplitDirection::Vertical,
                    width,
                    height,
                    x,
                    y,
                    children,
                })
            }
            _ => {
                let pane_id = self.pane_number()?;
                if pane_id.is_none() {
                    log::warn!("Layout leaf at {},{} has no pane number", x, y);
                }
                Ok(LayoutNode::Leaf { pane_id, width, height, x, y })
            }
        }
    }

    fn children(&mut self, close: u8) -> BridgeResult<Vec<LayoutNode>> {
        self.pos += 1; // opening bracket
        let mut children = Vec::new();
        loop {
            children.push(self.node()?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(children);
                }
                _ => return Err(self.error("unterminated child list")),
            }
        }
    }

    /// `,N` after a node is a pane number unless `N` starts the next sibling's `WxH`.
    fn pane_number(&mut self) -> BridgeResult<Option<u32>> {
        if self.peek() != Some(b',') {
            return Ok(None);
        }
        let start = self.pos + 1;
        let end = start + self.src[start..].iter().take_while(|c| c.is_ascii_digit()).count();
        if end == start || self.src.get(end) == Some(&b'x') {
            return Ok(None);
        }
        self.pos = start;
        self.number().map(Some)
    }

    fn number(&mut self) -> BridgeResult<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected number"));
        }
        // Only ASCII digits were consumed.
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| self.error("number out of range"))
    }

    fn expect(&mut self, c: u8) -> BridgeResult<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn error(&self, what: &str) -> BridgeError {
        BridgeError::InvalidLayout(format!(
            "{} at offset {} in '{}'",
            what,
            self.pos,
            String::from_utf8_lossy(self.src)
        ))
    }
}

/// Project a layout tree into ratio-based render form.
pub fn to_render_layout(node: &LayoutNode) -> RenderLayoutNode {
    match node {
        LayoutNode::Leaf { pane_id, .. } => RenderLayoutNode::Terminal {
            pane_id: pane_id.map(pane_id_string).unwrap_or_default(),
        },
        LayoutNode::Split { orientation, children, .. } => RenderLayoutNode::Split {
            direction: *orientation,
            children: children.iter().map(to_render_layout).collect(),
            ratio: split_ratios(children, *orientation),
        },
    }
}

/// Percentage of the split axis taken by each child. Falls back to an equal
/// split when every child has zero extent.
pub fn split_ratios(children: &[LayoutNode], direction: SplitDirection) -> Vec<f64> {
    if children.is_empty() {
        return Vec::new();
    }
    let total: u64 = children.iter().map(|c| u64::from(c.extent(direction))).sum();
    if total == 0 {
        let share = 100.0 / children.len() as f64;
        return vec![share; children.len()];
    }
    children
        .iter()
        .map(|c| f64::from(c.extent(direction)) / total as f64 * 100.0)
        .collect()
}
