//! Byte-range partition math shared by the stream and datagram clients.

/// One contiguous byte interval of a file, downloaded independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeTask {
    /// Position in the reassembly order (never the arrival order).
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

/// Splits `[0, total)` into `workers` contiguous near-equal ranges.
///
/// The first `total % workers` ranges are one byte longer, so the lengths
/// always sum to `total` with no gaps and no overlaps: a 10-byte file over
/// 4 workers splits as 3/3/2/2. A worker count of 0 is treated as 1.
pub fn partition(total: u64, workers: usize) -> Vec<RangeTask> {
    let workers = workers.max(1);
    let base = total / workers as u64;
    let remainder = total % workers as u64;

    let mut tasks = Vec::with_capacity(workers);
    let mut offset = 0;
    for index in 0..workers {
        let length = base + u64::from((index as u64) < remainder);
        tasks.push(RangeTask {
            index,
            offset,
            length,
        });
        offset += length;
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(total: u64, workers: usize) {
        let tasks = partition(total, workers);
        assert_eq!(tasks.len(), workers.max(1));

        let mut expected_offset = 0;
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.index, i);
            // Contiguous: each range starts where the previous one ended.
            assert_eq!(task.offset, expected_offset);
            expected_offset += task.length;
        }
        assert_eq!(expected_offset, total, "lengths must sum to the file size");
    }

    #[test]
    fn ten_bytes_over_four_workers() {
        let lengths: Vec<u64> = partition(10, 4).iter().map(|t| t.length).collect();
        assert_eq!(lengths, vec![3, 3, 2, 2]);
    }

    #[test]
    fn exact_cover_over_a_grid() {
        for total in [0u64, 1, 2, 3, 9, 10, 11, 4096, 4097, 1_000_003] {
            for workers in [1usize, 2, 3, 4, 5, 7, 16] {
                assert_exact_cover(total, workers);
            }
        }
    }

    #[test]
    fn more_workers_than_bytes() {
        let tasks = partition(3, 5);
        let lengths: Vec<u64> = tasks.iter().map(|t| t.length).collect();
        assert_eq!(lengths, vec![1, 1, 1, 0, 0]);
        assert_exact_cover(3, 5);
    }

    #[test]
    fn zero_workers_degrades_to_one() {
        let tasks = partition(10, 0);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].length, 10);
    }
}
