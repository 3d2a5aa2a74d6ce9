//! EvenSplit - 默认分区策略
//!
//! 前 `threads - 1` 个 Worker 各分到 `floor(height / threads)` 行，
//! 最后一个 Worker 承担剩余的 `height - floor(height / threads) * (threads - 1)` 行。

use gol_protocol::RowRange;

use super::PartitionPolicy;

#[derive(Debug, Clone, Copy, Default)]
pub struct EvenSplit;

impl PartitionPolicy for EvenSplit {
    fn partition(&self, height: usize, threads: usize) -> Vec<RowRange> {
        if threads == 0 {
            return Vec::new();
        }

        let rows = height / threads;
        let mut ranges = Vec::with_capacity(threads);
        for i in 0..threads - 1 {
            ranges.push(RowRange::new(i * rows, (i + 1) * rows));
        }
        ranges.push(RowRange::new((threads - 1) * rows, height));
        ranges
    }

    fn name(&self) -> &'static str {
        "even"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remainder_goes_to_last() {
        let ranges = EvenSplit.partition(10, 4);
        assert_eq!(
            ranges,
            vec![
                RowRange::new(0, 2),
                RowRange::new(2, 4),
                RowRange::new(4, 6),
                RowRange::new(6, 10),
            ]
        );
    }

    #[test]
    fn test_lengths_follow_floor_rule() {
        for height in 1..=64 {
            for threads in 1..=height.min(16) {
                let ranges = EvenSplit.partition(height, threads);
                let floor = height / threads;
                for range in &ranges[..threads - 1] {
                    assert_eq!(range.len(), floor);
                }
                assert_eq!(ranges[threads - 1].len(), height - floor * (threads - 1));
            }
        }
    }

    #[test]
    fn test_single_thread_takes_everything() {
        assert_eq!(EvenSplit.partition(16, 1), vec![RowRange::new(0, 16)]);
    }
}
