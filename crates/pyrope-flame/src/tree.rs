//! Call tree construction and horizontal layout.

use indexmap::IndexMap;

/// Arena index of a node in a [`CallTree`].
pub type NodeId = usize;

/// One rectangle of the flame graph.
#[derive(Debug)]
pub struct Node {
    /// Frame name as it appeared in the folded input.
    pub name: String,
    /// Samples attributed to this node and everything below it.
    pub total: u64,
    /// Left edge in pixels, set by [`CallTree::layout`].
    pub x: f64,
    /// Width in pixels, set by [`CallTree::layout`].
    pub width: f64,
    /// Row index; the root is depth 1.
    pub depth: usize,
    /// Arena index of the caller, `None` for the root.
    pub parent: Option<NodeId>,
    children: IndexMap<String, NodeId>,
}

impl Node {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            total: 0,
            x: 0.0,
            width: 0.0,
            depth: 0,
            parent,
            children: IndexMap::new(),
        }
    }
}

/// Arena-backed call tree built from aggregated folded stacks.
pub struct CallTree {
    nodes: Vec<Node>,
}

const ROOT: NodeId = 0;

impl CallTree {
    /// Build the tree. Every stack's count is added to the root and to each
    /// node along its path; missing children are created on demand, so the
    /// child order of any node is the insertion order of the input.
    pub fn build(stacks: &IndexMap<String, u64>) -> Self {
        let mut tree = Self {
            nodes: vec![Node::new("root".to_string(), None)],
        };

        for (stack, &count) in stacks {
            let mut node = ROOT;
            tree.nodes[node].total += count;
            for frame in stack.split(';') {
                node = tree.child(node, frame);
                tree.nodes[node].total += count;
            }
        }
        tree
    }

    fn child(&mut self, parent: NodeId, name: &str) -> NodeId {
        if let Some(&id) = self.nodes[parent].children.get(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node::new(name.to_string(), Some(parent)));
        self.nodes[parent].children.insert(name.to_string(), id);
        id
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        ROOT
    }

    /// Borrow a node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Total samples accumulated at the root.
    pub fn root_total(&self) -> u64 {
        self.nodes[ROOT].total
    }

    /// Assign x, width and depth to every node.
    ///
    /// The horizontal scale is `(width - 20) / root.total` pixels per
    /// sample with a 10 px margin on each side; the root spans the full
    /// usable width at depth 1.
    pub fn layout(&mut self, width: u32) {
        let total = self.nodes[ROOT].total;
        if total == 0 {
            return;
        }
        let scale = (f64::from(width) - 20.0) / total as f64;
        self.nodes[ROOT].depth = 1;
        self.layout_node(ROOT, 10.0, scale);
    }

    fn layout_node(&mut self, id: NodeId, x: f64, scale: f64) {
        self.nodes[id].x = x;
        self.nodes[id].width = self.nodes[id].total as f64 * scale;

        let depth = self.nodes[id].depth;
        let mut cursor = x;
        for child in self.ordered_children(id) {
            self.nodes[child].depth = depth + 1;
            self.layout_node(child, cursor, scale);
            cursor += self.nodes[child].width;
        }
    }

    /// Children of `id` in layout order: sorted by the trailing `:<int>`
    /// field of the frame name (the line number) when every sibling has
    /// one, otherwise left in insertion order.
    pub fn ordered_children(&self, id: NodeId) -> Vec<NodeId> {
        let children: Vec<NodeId> = self.nodes[id].children.values().copied().collect();

        let keys: Option<Vec<i64>> = children
            .iter()
            .map(|&c| trailing_int(&self.nodes[c].name))
            .collect();

        match keys {
            Some(keys) => {
                let mut order: Vec<(i64, NodeId)> = keys.into_iter().zip(children).collect();
                order.sort_by_key(|&(line, _)| line);
                order.into_iter().map(|(_, id)| id).collect()
            }
            None => children,
        }
    }

    /// Nodes grouped by depth in breadth-first layout order. The slot for
    /// depth 0 is always empty; the root appears at depth 1.
    pub fn nodes_by_depth(&self) -> Vec<Vec<NodeId>> {
        let max_depth = self.nodes.iter().map(|n| n.depth).max().unwrap_or(0);
        let mut by_depth: Vec<Vec<NodeId>> = vec![Vec::new(); max_depth + 1];

        let mut queue = std::collections::VecDeque::from([ROOT]);
        while let Some(id) = queue.pop_front() {
            let depth = self.nodes[id].depth;
            if depth > 0 {
                by_depth[depth].push(id);
            }
            queue.extend(self.ordered_children(id));
        }
        by_depth
    }

    /// Deepest populated row.
    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

fn trailing_int(name: &str) -> Option<i64> {
    name.rsplit(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stacks(entries: &[(&str, u64)]) -> IndexMap<String, u64> {
        entries
            .iter()
            .map(|&(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_build_accumulates_totals_along_paths() {
        let tree = CallTree::build(&stacks(&[("a;b;c", 4), ("a;d", 6)]));
        assert_eq!(tree.root_total(), 10);
        let a = tree.ordered_children(tree.root())[0];
        assert_eq!(tree.node(a).name, "a");
        assert_eq!(tree.node(a).total, 10);
    }

    #[test]
    fn test_layout_scale_and_cursor() {
        let mut tree = CallTree::build(&stacks(&[("a;b", 3), ("a;c", 1)]));
        tree.layout(1220);
        // scale = (1220 - 20) / 4 = 300 px per sample
        let root = tree.node(tree.root());
        assert_eq!(root.x, 10.0);
        assert_eq!(root.width, 1200.0);
        assert_eq!(root.depth, 1);

        let a = tree.ordered_children(tree.root())[0];
        assert_eq!(tree.node(a).width, 1200.0);
        assert_eq!(tree.node(a).depth, 2);

        let kids = tree.ordered_children(a);
        assert_eq!(tree.node(kids[0]).x, 10.0);
        assert_eq!(tree.node(kids[0]).width, 900.0);
        assert_eq!(tree.node(kids[1]).x, 910.0);
        assert_eq!(tree.node(kids[1]).width, 300.0);
    }

    #[test]
    fn test_children_sorted_by_trailing_line_number() {
        let tree = CallTree::build(&stacks(&[
            ("main;f.py:b:20", 1),
            ("main;f.py:a:3", 1),
            ("main;f.py:c:11", 1),
        ]));
        let main = tree.ordered_children(tree.root())[0];
        let names: Vec<&str> = tree
            .ordered_children(main)
            .into_iter()
            .map(|id| tree.node(id).name.as_str())
            .collect();
        assert_eq!(names, ["f.py:a:3", "f.py:c:11", "f.py:b:20"]);
    }

    #[test]
    fn test_one_non_numeric_sibling_falls_back_to_insertion_order() {
        let tree = CallTree::build(&stacks(&[
            ("main;f.py:b:20", 1),
            ("main;native_func", 1),
            ("main;f.py:a:3", 1),
        ]));
        let main = tree.ordered_children(tree.root())[0];
        let names: Vec<&str> = tree
            .ordered_children(main)
            .into_iter()
            .map(|id| tree.node(id).name.as_str())
            .collect();
        assert_eq!(names, ["f.py:b:20", "native_func", "f.py:a:3"]);
    }

    #[test]
    fn test_nodes_by_depth_excludes_depth_zero_and_includes_root() {
        let mut tree = CallTree::build(&stacks(&[("a;b", 1)]));
        tree.layout(1200);
        let by_depth = tree.nodes_by_depth();
        assert!(by_depth[0].is_empty());
        assert_eq!(by_depth[1], vec![tree.root()]);
        assert_eq!(tree.max_depth(), 3);
    }

    #[test]
    fn test_empty_input_layout_is_a_noop() {
        let mut tree = CallTree::build(&IndexMap::new());
        tree.layout(1200);
        assert_eq!(tree.root_total(), 0);
        assert_eq!(tree.node(tree.root()).width, 0.0);
    }
}
