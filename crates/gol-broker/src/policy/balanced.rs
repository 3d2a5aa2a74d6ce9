//! Balanced - 余数均摊的分区策略
//!
//! 每个 Worker 至少 `floor(height / threads)` 行，余数逐行分给前面的 Worker，
//! 任意两个区间的长度差不超过 1。

use gol_protocol::RowRange;

use super::PartitionPolicy;

#[derive(Debug, Clone, Copy, Default)]
pub struct Balanced;

impl PartitionPolicy for Balanced {
    fn partition(&self, height: usize, threads: usize) -> Vec<RowRange> {
        if threads == 0 {
            return Vec::new();
        }

        let base = height / threads;
        let extra = height % threads;

        let mut start = 0;
        (0..threads)
            .map(|i| {
                let len = base + usize::from(i < extra);
                let range = RowRange::new(start, start + len);
                start += len;
                range
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "balanced"
    }
}
