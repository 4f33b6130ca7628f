//! Rooted collectives built on the point-to-point [`Communicator`] interface.
//!
//! Each collective occupies a small block of consecutive tags starting at the
//! tag it is given (`gather`/`broadcast`/`exchange`: 2, all-reductions: 4). Every rank
//! must call the same collectives in the same order with the same tags.
//! Reductions are summed on the root in rank order and broadcast back, so all
//! ranks observe bitwise-identical totals.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{
    WireCount, WireScalar, WireU64, cast_slice, cast_slice_mut, decode_records,
};
use crate::mesh_error::AmrError;
use bytemuck::Pod;
use std::collections::BTreeMap;

fn comm_error(neighbor: usize, source: impl Into<String>) -> AmrError {
    AmrError::CommError {
        neighbor,
        source: source.into(),
    }
}

fn recv_records<T: Pod, C: Communicator>(
    comm: &C,
    peer: usize,
    tag: CommTag,
) -> Result<Vec<T>, AmrError> {
    let mut header = WireCount::new(0);
    let data = comm
        .irecv(
            peer,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut header)),
        )
        .wait()
        .ok_or_else(|| comm_error(peer, "no record count received"))?;
    let counts: Vec<WireCount> = decode_records(&data).map_err(|e| comm_error(peer, e))?;
    let count = match counts.as_slice() {
        [c] => c.get(),
        _ => return Err(comm_error(peer, "malformed record count header")),
    };

    let mut buf = vec![0u8; count * std::mem::size_of::<T>()];
    let data = comm
        .irecv(peer, tag.offset(1).as_u16(), &mut buf)
        .wait()
        .ok_or_else(|| comm_error(peer, "no records received"))?;
    let records = decode_records(&data).map_err(|e| comm_error(peer, e))?;
    if records.len() != count {
        return Err(comm_error(
            peer,
            format!("expected {count} records, got {}", records.len()),
        ));
    }
    Ok(records)
}

/// Post the count header and the records of one message pair.
fn send_records<T: Pod, C: Communicator>(
    comm: &C,
    peer: usize,
    tag: CommTag,
    records: &[T],
) -> [C::SendHandle; 2] {
    let header = [WireCount::new(records.len())];
    [
        comm.isend(peer, tag.as_u16(), cast_slice(&header)),
        comm.isend(peer, tag.offset(1).as_u16(), cast_slice(records)),
    ]
}

/// Gather every rank's records to `root`.
///
/// Returns `Some(per_rank)` (indexed by rank) on the root and `None` elsewhere.
pub fn gather<T: Pod, C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    local: &[T],
) -> Result<Option<Vec<Vec<T>>>, AmrError> {
    let (rank, size) = (comm.rank(), comm.size());
    if rank != root {
        for handle in send_records(comm, root, tag, local) {
            let _ = handle.wait();
        }
        return Ok(None);
    }

    let mut per_rank = Vec::with_capacity(size);
    let mut maybe_err = None;
    for peer in 0..size {
        if peer == root {
            per_rank.push(local.to_vec());
            continue;
        }
        // keep draining on error so every peer's messages are consumed
        match recv_records(comm, peer, tag) {
            Ok(records) => per_rank.push(records),
            Err(e) => {
                per_rank.push(Vec::new());
                maybe_err.get_or_insert(e);
            }
        }
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(Some(per_rank)),
    }
}

/// Broadcast the root's records to every rank. `data` is ignored off the root.
pub fn broadcast<T: Pod, C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    data: &[T],
) -> Result<Vec<T>, AmrError> {
    let (rank, size) = (comm.rank(), comm.size());
    if rank == root {
        let mut pending = Vec::with_capacity(2 * size);
        for peer in (0..size).filter(|&p| p != root) {
            pending.extend(send_records(comm, peer, tag, data));
        }
        for handle in pending {
            let _ = handle.wait();
        }
        Ok(data.to_vec())
    } else {
        recv_records(comm, root, tag)
    }
}

/// Neighbor exchange: send `outgoing[peer]` to each listed peer and receive one
/// record list from every rank in `incoming_from`.
///
/// All sends are posted before any receive is waited on. Every receive and send
/// handle is drained before returning, even if an error occurs; the first error
/// wins.
pub fn exchange<T: Pod, C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<T>>,
    incoming_from: impl IntoIterator<Item = usize>,
) -> Result<BTreeMap<usize, Vec<T>>, AmrError> {
    let mut pending = Vec::with_capacity(2 * outgoing.len());
    for (&peer, records) in outgoing {
        pending.extend(send_records(comm, peer, tag, records));
    }

    let mut received = BTreeMap::new();
    let mut maybe_err = None;
    for peer in incoming_from {
        match recv_records(comm, peer, tag) {
            Ok(records) => {
                received.insert(peer, records);
            }
            Err(e) => {
                maybe_err.get_or_insert(e);
            }
        }
    }

    for handle in pending {
        let _ = handle.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}

/// On a failed gather the root broadcasts an empty result, which every other
/// rank reports as an error instead of waiting for a sum that never comes.
fn release_on_failure<T: Pod, C: Communicator>(
    comm: &C,
    tag: CommTag,
    gathered: Result<Option<Vec<Vec<T>>>, AmrError>,
) -> Result<Option<Vec<Vec<T>>>, AmrError> {
    gathered.inspect_err(|_| {
        let _ = broadcast::<T, C>(comm, 0, tag.offset(2), &[]);
    })
}

/// Sum of `value` over all ranks, identical on every rank.
pub fn allreduce_sum_f64<C: Communicator>(
    comm: &C,
    tag: CommTag,
    value: f64,
) -> Result<f64, AmrError> {
    if comm.size() == 1 {
        return Ok(value);
    }
    let gathered = gather(comm, 0, tag, &[WireScalar::of(value)]);
    let total = release_on_failure(comm, tag, gathered)?.map(|per_rank| {
        per_rank
            .iter()
            .flatten()
            .map(WireScalar::get)
            .sum::<f64>()
    });
    let sum = [WireScalar::of(total.unwrap_or_default())];
    let out = broadcast(comm, 0, tag.offset(2), &sum)?;
    out.first()
        .map(WireScalar::get)
        .ok_or_else(|| comm_error(0, "empty reduction result"))
}

/// Sum of `value` over all ranks, identical on every rank.
pub fn allreduce_sum_usize<C: Communicator>(
    comm: &C,
    tag: CommTag,
    value: usize,
) -> Result<usize, AmrError> {
    if comm.size() == 1 {
        return Ok(value);
    }
    let gathered = gather(comm, 0, tag, &[WireU64::of(value as u64)]);
    let total = release_on_failure(comm, tag, gathered)?
        .map(|per_rank| per_rank.iter().flatten().map(WireU64::get).sum::<u64>());
    let sum = [WireU64::of(total.unwrap_or_default())];
    let out = broadcast(comm, 0, tag.offset(2), &sum)?;
    out.first()
        .map(|v| v.get() as usize)
        .ok_or_else(|| comm_error(0, "empty reduction result"))
}

/// `true` on every rank iff `ok` holds on every rank.
pub fn all_agree<C: Communicator>(comm: &C, tag: CommTag, ok: bool) -> Result<bool, AmrError> {
    Ok(allreduce_sum_usize(comm, tag, usize::from(!ok))? == 0)
}
