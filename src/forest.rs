//! Quad/oct-tree forests whose z-ordered leaves are the mesh elements.
//!
//! Each [`Tree`] keeps its leaves sorted by Morton key, and that order is the
//! element order of the tree. A [`Forest`] concatenates its trees, so the
//! element numbering of the forest is tree-major and z-ordered within a tree.

use crate::adapt::refinement::RefinementTarget;
use crate::mesh_error::AmrError;
use std::collections::HashSet;

/// Deepest refinement level a cell may reach.
pub const MAX_LEVEL: u8 = 30;

/// A cell in a quadtree/octree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeCell<const D: usize> {
    /// Refinement level (0 is root).
    pub level: u8,
    /// Integer coordinates at the given level.
    pub coords: [u32; D],
}

impl<const D: usize> TreeCell<D> {
    pub const ROOT: Self = Self {
        level: 0,
        coords: [0; D],
    };

    /// Returns the parent cell, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            None
        } else {
            Some(Self {
                level: self.level - 1,
                coords: self.coords.map(|c| c / 2),
            })
        }
    }

    /// Returns the `2^D` children of this cell in z-order.
    pub fn children(&self) -> Vec<Self> {
        (0..1usize << D)
            .map(|idx| Self {
                level: self.level + 1,
                coords: std::array::from_fn(|axis| {
                    self.coords[axis] * 2 + ((idx >> axis) & 1) as u32
                }),
            })
            .collect()
    }

    /// Interleaved coordinate bits at [`MAX_LEVEL`], axis 0 least significant.
    pub fn morton_key(&self) -> u128 {
        let shift = MAX_LEVEL - self.level;
        let mut key = 0u128;
        for bit in 0..u32::from(MAX_LEVEL) {
            for axis in 0..D {
                let c = u128::from(self.coords[axis] << shift);
                key |= ((c >> bit) & 1) << (bit as usize * D + axis);
            }
        }
        key
    }

    /// `[start, end)` per axis on the [`MAX_LEVEL`] grid.
    fn bounds(&self) -> [(u64, u64); D] {
        let scale = 1u64 << (MAX_LEVEL - self.level);
        self.coords.map(|c| {
            let start = u64::from(c) * scale;
            (start, start + scale)
        })
    }
}

/// Returns true if `a` and `b` share (part of) a face.
pub fn are_face_neighbors<const D: usize>(a: &TreeCell<D>, b: &TreeCell<D>) -> bool {
    let a_bounds = a.bounds();
    let b_bounds = b.bounds();
    let mut touching_axis = None;
    for axis in 0..D {
        let (a0, a1) = a_bounds[axis];
        let (b0, b1) = b_bounds[axis];
        if a1 == b0 || b1 == a0 {
            if touching_axis.is_some() {
                return false;
            }
            touching_axis = Some(axis);
        } else if a0 >= b1 || b0 >= a1 {
            return false;
        }
    }
    touching_axis.is_some()
}

fn check_levels(min_level: u8, max_level: u8) -> Result<(), AmrError> {
    if min_level > max_level || max_level > MAX_LEVEL {
        return Err(AmrError::InvalidLevels {
            min: min_level,
            max: max_level,
            limit: MAX_LEVEL,
        });
    }
    Ok(())
}

/// One tree; its leaves are its elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree<const D: usize> {
    leaves: Vec<TreeCell<D>>,
}

impl<const D: usize> Default for Tree<D> {
    fn default() -> Self {
        Self {
            leaves: vec![TreeCell::ROOT],
        }
    }
}

impl<const D: usize> Tree<D> {
    /// Every cell of `level`, in z-order.
    pub fn uniform(level: u8) -> Result<Self, AmrError> {
        check_levels(0, level)?;
        let mut tree = Self::default();
        while tree.leaves.first().is_some_and(|c| c.level < level) {
            tree.split(|_| true);
        }
        Ok(tree)
    }

    pub fn leaves(&self) -> &[TreeCell<D>] {
        &self.leaves
    }

    pub fn num_elements(&self) -> usize {
        self.leaves.len()
    }

    /// Replace every leaf selected by `pick` (by leaf index) with its children.
    fn split(&mut self, pick: impl Fn(usize) -> bool) -> usize {
        let mut next = Vec::with_capacity(self.leaves.len());
        let mut split = 0;
        for (i, cell) in self.leaves.iter().enumerate() {
            if pick(i) {
                next.extend(cell.children());
                split += 1;
            } else {
                next.push(*cell);
            }
        }
        self.leaves = next;
        self.leaves.sort_unstable_by_key(TreeCell::morton_key);
        split
    }

    /// Split flagged leaves below `max_level` once, then split every leaf
    /// below `min_level` until it reaches `min_level`.
    ///
    /// Returns the number of split operations.
    pub fn refine(&mut self, flags: &[bool], min_level: u8, max_level: u8) -> Result<usize, AmrError> {
        check_levels(min_level, max_level)?;
        if flags.len() != self.leaves.len() {
            return Err(AmrError::FlagCountMismatch {
                flags: flags.len(),
                cells: self.leaves.len(),
            });
        }
        let levels: Vec<u8> = self.leaves.iter().map(|c| c.level).collect();
        let mut split = self.split(|i| flags[i] && levels[i] < max_level);
        loop {
            let levels: Vec<u8> = self.leaves.iter().map(|c| c.level).collect();
            if levels.iter().all(|&l| l >= min_level) {
                break;
            }
            split += self.split(|i| levels[i] < min_level);
        }
        Ok(split)
    }

    /// Enforce 2:1 face balance between the leaves of this tree.
    pub fn balance(&mut self) -> usize {
        let mut total = 0;
        loop {
            let mut to_refine = HashSet::new();
            for (i, cell) in self.leaves.iter().enumerate() {
                for (j, other) in self.leaves.iter().enumerate().skip(i + 1) {
                    if cell.level.abs_diff(other.level) > 1 && are_face_neighbors(cell, other) {
                        to_refine.insert(if cell.level < other.level { i } else { j });
                    }
                }
            }
            if to_refine.is_empty() {
                break;
            }
            total += self.split(|i| to_refine.contains(&i));
        }
        total
    }
}

/// Ordered trees, quadtrees (`D = 2`) or octrees (`D = 3`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest<const D: usize> {
    trees: Vec<Tree<D>>,
}

/// A quadtree forest (`D = 2`).
pub type QuadForest = Forest<2>;
/// An octree forest (`D = 3`).
pub type OctForest = Forest<3>;

impl<const D: usize> Forest<D> {
    /// `num_trees` trees, each refined uniformly to `level`.
    pub fn uniform(num_trees: usize, level: u8) -> Result<Self, AmrError> {
        let tree = Tree::uniform(level)?;
        Ok(Self {
            trees: vec![tree; num_trees],
        })
    }

    pub fn from_trees(trees: Vec<Tree<D>>) -> Self {
        Self { trees }
    }

    pub fn trees(&self) -> &[Tree<D>] {
        &self.trees
    }

    /// Leaves per tree, in tree order.
    pub fn tree_element_counts(&self) -> Vec<usize> {
        self.trees.iter().map(Tree::num_elements).collect()
    }

    pub fn num_elements(&self) -> usize {
        self.trees.iter().map(Tree::num_elements).sum()
    }

    /// 2:1 balance inside every tree; returns the number of splits.
    pub fn balance(&mut self) -> usize {
        self.trees.iter_mut().map(Tree::balance).sum()
    }
}

impl<const D: usize> RefinementTarget for Forest<D> {
    fn tree_element_counts(&self) -> Vec<usize> {
        Forest::tree_element_counts(self)
    }

    fn refine_tree(
        &mut self,
        tree: usize,
        flags: &[bool],
        min_level: u8,
        max_level: u8,
    ) -> Result<usize, AmrError> {
        let len = self.trees.len();
        let target = self
            .trees
            .get_mut(tree)
            .ok_or_else(|| AmrError::InvalidMesh(format!("tree {tree} out of range ({len} trees)")))?;
        target.refine(flags, min_level, max_level)
    }
}
