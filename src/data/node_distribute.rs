//! Owner/ghost exchange plan for strided nodal vectors.
//!
//! A [`NodeDistribute`] is built collectively from each rank's
//! [`NodeOwnership`]. It supports the two transfers the estimator needs:
//!
//! - [`reverse_add`](NodeDistribute::reverse_add): ghost contributions are
//!   summed into the owning rank's blocks (the ghost copies are cleared).
//! - [`forward`](NodeDistribute::forward): owners overwrite every ghost copy.
//!
//! Sums on an owner are applied in ascending requester rank order.

use crate::algs::collective::{all_agree, exchange};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireScalar, WireU64, encode_scalars};
use crate::data::node_vector::NodeVector;
use crate::mesh_error::AmrError;
use crate::topology::ownership::NodeOwnership;
use std::collections::BTreeMap;

/// Number of consecutive tags consumed by [`NodeDistribute::new`].
pub const PLAN_TAGS: u16 = 6;
/// Number of consecutive tags consumed by one transfer.
pub const TRANSFER_TAGS: u16 = 2;

#[derive(Clone, Debug, Default)]
pub struct NodeDistribute {
    num_independent: usize,
    /// owner rank -> local ghost indices, ordered by global id
    requests: BTreeMap<usize, Vec<usize>>,
    /// requester rank -> local owned indices, in the requester's order
    serves: BTreeMap<usize, Vec<usize>>,
}

impl NodeDistribute {
    /// Build the plan. Collective: every rank must call this with the same `tag`.
    pub fn new<C: Communicator>(
        comm: &C,
        ownership: &NodeOwnership,
        tag: CommTag,
    ) -> Result<Self, AmrError> {
        let (rank, size) = (comm.rank(), comm.size());
        let requests = ownership.ghosts_by_owner();

        let mut local_err = requests
            .keys()
            .find(|&&owner| owner >= size)
            .map(|&owner| AmrError::PartitionRankOutOfRange {
                element: 0,
                rank: owner,
                size,
            });

        let mut outgoing: BTreeMap<usize, Vec<WireU64>> = (0..size)
            .filter(|&p| p != rank)
            .map(|p| (p, Vec::new()))
            .collect();
        if local_err.is_none() {
            for (&owner, locals) in &requests {
                let ids = locals
                    .iter()
                    .filter_map(|&l| ownership.global_id(l))
                    .map(WireU64::of)
                    .collect();
                outgoing.insert(owner, ids);
            }
        }
        let peers: Vec<usize> = (0..size).filter(|&p| p != rank).collect();
        let received = exchange(comm, tag, &outgoing, peers)?;

        let owned = ownership.owned_index();
        let mut serves = BTreeMap::new();
        for (requester, ids) in received {
            if ids.is_empty() {
                continue;
            }
            let mut locals = Vec::with_capacity(ids.len());
            for id in &ids {
                match owned.get(&id.get()) {
                    Some(&local) => locals.push(local),
                    None => {
                        log::error!(
                            "[rank {rank}] rank {requester} requested node {} which is not owned here",
                            id.get()
                        );
                        local_err.get_or_insert(AmrError::UnknownGlobalNode {
                            rank,
                            node: id.get(),
                        });
                    }
                }
            }
            serves.insert(requester, locals);
        }

        let ok = all_agree(comm, tag.offset(TRANSFER_TAGS), local_err.is_none())?;
        match (ok, local_err) {
            (true, _) => {
                log::debug!(
                    "[rank {rank}] exchange plan: {} owners requested, {} requesters served",
                    requests.len(),
                    serves.len()
                );
                Ok(Self {
                    num_independent: ownership.len(),
                    requests,
                    serves,
                })
            }
            (false, Some(err)) => Err(err),
            (false, None) => Err(AmrError::InvalidMesh(
                "node exchange plan failed on a peer rank".into(),
            )),
        }
    }

    /// Ranks that own at least one of this rank's ghost nodes.
    pub fn owners(&self) -> impl Iterator<Item = usize> + '_ {
        self.requests.keys().copied()
    }

    /// Ranks that hold a ghost copy of at least one node owned here.
    pub fn requesters(&self) -> impl Iterator<Item = usize> + '_ {
        self.serves.keys().copied()
    }

    fn check_len(&self, values: &NodeVector) -> Result<(), AmrError> {
        if values.num_nodes() < self.num_independent {
            return Err(AmrError::SliceLengthMismatch {
                expected: self.num_independent * values.stride(),
                found: values.as_slice().len(),
            });
        }
        Ok(())
    }

    fn pack(values: &NodeVector, locals: &[usize]) -> Vec<WireScalar> {
        encode_scalars(locals.iter().flat_map(|&l| values.block(l).iter().copied()))
    }

    fn check_payload(
        peer: usize,
        locals: &[usize],
        stride: usize,
        payload: &[WireScalar],
    ) -> Result<(), AmrError> {
        if payload.len() != locals.len() * stride {
            return Err(AmrError::CommError {
                neighbor: peer,
                source: format!(
                    "expected {} nodal values, got {}",
                    locals.len() * stride,
                    payload.len()
                ),
            });
        }
        Ok(())
    }

    /// Add every ghost block into its owner's block and zero the ghost copy.
    pub fn reverse_add<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        values: &mut NodeVector,
    ) -> Result<(), AmrError> {
        self.check_len(values)?;
        let stride = values.stride();
        let mut outgoing = BTreeMap::new();
        for (&owner, locals) in &self.requests {
            outgoing.insert(owner, Self::pack(values, locals));
            for &l in locals {
                values.block_mut(l).fill(0.0);
            }
        }

        let received = exchange(comm, tag, &outgoing, self.serves.keys().copied())?;
        for (peer, payload) in received {
            let locals = &self.serves[&peer];
            Self::check_payload(peer, locals, stride, &payload)?;
            for (&l, chunk) in locals.iter().zip(payload.chunks_exact(stride)) {
                for (dst, v) in values.block_mut(l).iter_mut().zip(chunk) {
                    *dst += v.get();
                }
            }
        }
        Ok(())
    }

    /// Overwrite every ghost block with its owner's value.
    pub fn forward<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        values: &mut NodeVector,
    ) -> Result<(), AmrError> {
        self.check_len(values)?;
        let stride = values.stride();
        let outgoing: BTreeMap<usize, Vec<WireScalar>> = self
            .serves
            .iter()
            .map(|(&peer, locals)| (peer, Self::pack(values, locals)))
            .collect();

        let received = exchange(comm, tag, &outgoing, self.requests.keys().copied())?;
        for (peer, payload) in received {
            let locals = &self.requests[&peer];
            Self::check_payload(peer, locals, stride, &payload)?;
            for (&l, chunk) in locals.iter().zip(payload.chunks_exact(stride)) {
                for (dst, v) in values.block_mut(l).iter_mut().zip(chunk) {
                    *dst = v.get();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};
    use crate::topology::ownership::OwnershipEntry;

    const TAG: CommTag = CommTag::new(0x0800);

    fn e(global: u64, owner: usize) -> OwnershipEntry {
        OwnershipEntry { global, owner }
    }

    // Two ranks share global nodes 1 and 2; rank 0 owns both.
    fn ownership(rank: usize) -> NodeOwnership {
        let entries = if rank == 0 {
            vec![e(0, 0), e(1, 0), e(2, 0)]
        } else {
            vec![e(2, 0), e(1, 0), e(3, 1)]
        };
        NodeOwnership::new(rank, entries).unwrap()
    }

    #[test]
    fn reverse_add_then_forward_makes_copies_consistent() {
        let out = ThreadComm::run(2, |comm| {
            let own = ownership(comm.rank());
            let plan = NodeDistribute::new(&comm, &own, TAG).unwrap();
            let mut v = NodeVector::from_values(1, vec![1.0; 3]).unwrap();
            plan.reverse_add(&comm, TAG.offset(8), &mut v).unwrap();
            let after_add = v.as_slice().to_vec();
            plan.forward(&comm, TAG.offset(10), &mut v).unwrap();
            (after_add, v.as_slice().to_vec())
        });
        assert_eq!(out[0].0, vec![1.0, 2.0, 2.0]);
        assert_eq!(out[1].0, vec![0.0, 0.0, 1.0]);
        // rank 1 holds global 2 at local 0 and global 1 at local 1
        assert_eq!(out[1].1, vec![2.0, 2.0, 1.0]);
    }

    #[test]
    fn serial_plan_is_a_no_op() {
        let own = NodeOwnership::new(0, vec![e(0, 0), e(1, 0)]).unwrap();
        let plan = NodeDistribute::new(&NoComm, &own, TAG).unwrap();
        let mut v = NodeVector::from_values(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        plan.reverse_add(&NoComm, TAG, &mut v).unwrap();
        plan.forward(&NoComm, TAG, &mut v).unwrap();
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(plan.owners().count(), 0);
    }

    #[test]
    fn unknown_request_fails_on_every_rank() {
        let out = ThreadComm::run(2, |comm| {
            // rank 1 believes rank 0 owns global 9, which rank 0 never heard of
            let own = if comm.rank() == 0 {
                NodeOwnership::new(0, vec![e(0, 0)]).unwrap()
            } else {
                NodeOwnership::new(1, vec![e(9, 0)]).unwrap()
            };
            NodeDistribute::new(&comm, &own, TAG).err()
        });
        assert!(matches!(
            out[0],
            Some(AmrError::UnknownGlobalNode { rank: 0, node: 9 })
        ));
        assert!(out[1].is_some());
    }
}
