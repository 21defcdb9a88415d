use crate::error::Result;
use crate::jpeg2000::bit_io::{J2kBitReader, J2kBitWriter};

/// Value a decoder assumes for nodes it has not resolved yet.
const UNKNOWN: u32 = u32::MAX;

/// Tag tree for packet-header coding (ISO/IEC 15444-1 B.10.2).
///
/// A quad-tree over a grid of leaves where every node holds the minimum of its
/// children. Used for code-block inclusion and zero bit-plane counts.
pub struct TagTree {
    nodes: Vec<TagTreeNode>,
    leaf_width: usize,
    leaf_height: usize,
}

#[derive(Clone, Debug)]
struct TagTreeNode {
    value: u32,
    low: u32,
    known: bool,
    parent_index: Option<usize>,
}

impl Default for TagTreeNode {
    fn default() -> Self {
        Self {
            value: UNKNOWN,
            low: 0,
            known: false,
            parent_index: None,
        }
    }
}

impl TagTree {
    /// Creates a tree for a grid of `w` x `h` leaves.
    pub fn new(w: usize, h: usize) -> Self {
        let mut nodes = vec![TagTreeNode::default(); w * h];
        let mut level_start = 0;
        let (mut level_w, mut level_h) = (w, h);

        while level_w > 1 || level_h > 1 {
            let next_w = level_w.div_ceil(2);
            let next_h = level_h.div_ceil(2);
            let next_start = nodes.len();
            nodes.resize(next_start + next_w * next_h, TagTreeNode::default());

            for y in 0..level_h {
                for x in 0..level_w {
                    let parent = next_start + (y / 2) * next_w + x / 2;
                    nodes[level_start + y * level_w + x].parent_index = Some(parent);
                }
            }
            level_w = next_w;
            level_h = next_h;
            level_start = next_start;
        }

        Self {
            nodes,
            leaf_width: w,
            leaf_height: h,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_width * self.leaf_height
    }

    /// Sets a leaf value, lowering ancestors so each holds the minimum below it.
    pub fn set_value(&mut self, leaf: usize, value: u32) {
        let mut idx = Some(leaf);
        while let Some(i) = idx {
            let node = &mut self.nodes[i];
            if node.value != UNKNOWN && node.value <= value {
                break;
            }
            node.value = value;
            idx = node.parent_index;
        }
    }

    fn path(&self, leaf: usize) -> Vec<usize> {
        let mut path = Vec::with_capacity(8);
        let mut idx = Some(leaf);
        while let Some(i) = idx {
            path.push(i);
            idx = self.nodes[i].parent_index;
        }
        path.reverse();
        path
    }

    /// Emits the bits that tell a decoder whether `leaf < threshold`.
    pub fn encode(&mut self, writer: &mut J2kBitWriter, leaf: usize, threshold: u32) {
        let mut low = 0;
        for i in self.path(leaf) {
            let node = &mut self.nodes[i];
            if low > node.low {
                node.low = low;
            } else {
                low = node.low;
            }
            while low < threshold {
                if low >= node.value {
                    if !node.known {
                        writer.write_bit(1);
                        node.known = true;
                    }
                    break;
                }
                writer.write_bit(0);
                low += 1;
            }
            node.low = low;
        }
    }

    /// Reads bits until it is known whether `leaf < threshold`.
    pub fn decode(&mut self, reader: &mut J2kBitReader, leaf: usize, threshold: u32) -> Result<bool> {
        let mut low = 0;
        for i in self.path(leaf) {
            let node = &mut self.nodes[i];
            if low > node.low {
                node.low = low;
            } else {
                low = node.low;
            }
            while low < threshold && low < node.value {
                if reader.read_bit()? == 1 {
                    node.value = low;
                } else {
                    low += 1;
                }
            }
            node.low = low;
        }
        Ok(self.nodes[leaf].value < threshold)
    }

    /// Decoded value of a leaf, once resolved.
    pub fn value(&self, leaf: usize) -> u32 {
        self.nodes[leaf].value
    }
}
