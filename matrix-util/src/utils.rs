/// Generate minibatch intervals
/// * `ntot` - number of total samples
/// * `batch_size` - the size of each batch
pub fn generate_minibatch_intervals(ntot: usize, batch_size: usize) -> Vec<(usize, usize)> {
    let batch_size = batch_size.max(1);
    let num_batches = ntot.div_ceil(batch_size);
    (0..num_batches)
        .map(|b| {
            let lb: usize = b * batch_size;
            let ub: usize = ((b + 1) * batch_size).min(ntot);
            (lb, ub)
        })
        .collect::<Vec<_>>()
}

/// Split `ntot` items into at most `nparts` contiguous intervals of
/// nearly equal size
pub fn generate_partition_intervals(ntot: usize, nparts: usize) -> Vec<(usize, usize)> {
    if ntot == 0 {
        return vec![];
    }
    let nparts = nparts.clamp(1, ntot);
    generate_minibatch_intervals(ntot, ntot.div_ceil(nparts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_everything() {
        let parts = generate_partition_intervals(10, 3);
        assert_eq!(parts, vec![(0, 4), (4, 8), (8, 10)]);
        assert_eq!(generate_partition_intervals(2, 8), vec![(0, 1), (1, 2)]);
        assert!(generate_partition_intervals(0, 3).is_empty());
    }
}
