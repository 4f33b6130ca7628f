// src/algs/distribute.rs

use crate::adapt::refinement::ElementPartition;
use crate::data::hanging_node_constraints::{DependentNodeConstraints, LinearConstraintTerm};
use crate::data::local_mesh::LocalMesh;
use crate::discretization::quad9::NUM_NODES;
use crate::mesh_error::AmrError;
use crate::mesh_generation::GlobalMesh;
use crate::topology::ownership::{NodeOwnership, OwnershipEntry};
use std::collections::{BTreeSet, HashMap};

/// Extract the share of `global` that `rank` holds under `partition`.
///
/// # Arguments
/// - `global`: the serial mesh, identical on every rank
/// - `partition`: owning rank of every global element
/// - `rank`: the rank to build the local mesh for
/// - `vars_per_node`: values per node of the solution fields
///
/// # Returns
/// A [`LocalMesh`] where
/// - local elements are the elements assigned to `rank`, in ascending global id
/// - independent nodes are every node those elements reference, directly or
///   as a constraint parent, sorted by global id (the global id is the
///   independent node index in `global`)
/// - each independent node is owned by the lowest rank that references it;
///   nodes no element references are owned and held by rank 0
/// - dependent nodes referenced locally follow, sorted by dependent index
pub fn distribute_mesh(
    global: &GlobalMesh,
    partition: &ElementPartition,
    rank: usize,
    vars_per_node: usize,
) -> Result<LocalMesh, AmrError> {
    global.validate()?;
    if partition.len() != global.num_elements() {
        return Err(AmrError::PartitionSizeMismatch {
            expected: global.num_elements(),
            found: partition.len(),
        });
    }
    if rank >= partition.num_ranks() {
        return Err(AmrError::InvalidMesh(format!(
            "rank {rank} outside a partition of {} ranks",
            partition.num_ranks()
        )));
    }
    let num_nodes = global.num_nodes();

    // 1) Owner of every independent node: lowest referencing rank
    let mut owner: Vec<Option<usize>> = vec![None; num_nodes];
    let mut claim = |node: usize, r: usize| {
        let slot = &mut owner[node];
        *slot = Some(slot.map_or(r, |o| o.min(r)));
    };
    for (element, nodes) in global.conn.iter().enumerate() {
        let r = partition.owners()[element];
        for &n in nodes {
            match n.checked_sub(num_nodes) {
                None => claim(n, r),
                Some(d) => global.dependent[d].iter().for_each(|t| claim(t.node, r)),
            }
        }
    }

    // 2) Local node sets
    let mut independent = BTreeSet::new();
    let mut dependent = BTreeSet::new();
    let elements: Vec<usize> = partition.elements_of(rank).collect();
    for &element in &elements {
        for &n in &global.conn[element] {
            match n.checked_sub(num_nodes) {
                None => {
                    independent.insert(n);
                }
                Some(d) => {
                    dependent.insert(d);
                    independent.extend(global.dependent[d].iter().map(|t| t.node));
                }
            }
        }
    }
    let unreferenced: Vec<usize> = (0..num_nodes).filter(|&n| owner[n].is_none()).collect();
    if !unreferenced.is_empty() {
        log::warn!(
            "[rank {rank}] {} global nodes are not referenced by any element",
            unreferenced.len()
        );
        if rank == 0 {
            independent.extend(unreferenced);
        }
    }

    // 3) Local numbering
    let mut local_of: HashMap<usize, usize> = HashMap::with_capacity(independent.len());
    let mut entries = Vec::with_capacity(independent.len());
    let mut coords = Vec::with_capacity(independent.len() + dependent.len());
    for (local, &n) in independent.iter().enumerate() {
        local_of.insert(n, local);
        entries.push(OwnershipEntry {
            global: n as u64,
            owner: owner[n].unwrap_or(0),
        });
        coords.push(global.coords[n]);
    }
    let mut constraints = Vec::with_capacity(dependent.len());
    for (k, &d) in dependent.iter().enumerate() {
        local_of.insert(num_nodes + d, independent.len() + k);
        let terms = global.dependent[d]
            .iter()
            .map(|t| LinearConstraintTerm::new(local_of[&t.node], t.weight))
            .collect();
        constraints.push(terms);
        coords.push(global.node_position(num_nodes + d));
    }

    let conn: Vec<[usize; NUM_NODES]> = elements
        .iter()
        .map(|&e| global.conn[e].map(|n| local_of[&n]))
        .collect();
    let element_ids = elements.iter().map(|&e| e as u64).collect();

    log::debug!(
        "[rank {rank}] local mesh: {} elements, {} independent nodes, {} dependent nodes",
        conn.len(),
        independent.len(),
        dependent.len()
    );

    LocalMesh::new(
        vars_per_node,
        NodeOwnership::new(rank, entries)?,
        DependentNodeConstraints::new(independent.len(), constraints)?,
        conn,
        coords,
        element_ids,
    )
}
