use std::path::PathBuf;

use crate::errors::TransferError;

/// Representation of a part of the file to download. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// Ordinal of the part, used for artifact naming and merge order.
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={start}-{end}", start = self.start, end = self.end)
    }
}

/// A temporary file holding exactly the bytes of one range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentArtifact {
    pub range: ByteRange,
    pub path: PathBuf,
}

/// Splits `[0, total_size)` into contiguous ranges, one per worker.
///
/// Every range spans `total_size / n` bytes except the last one, which absorbs the
/// remainder. When the file is smaller than the requested concurrency only
/// `total_size` one-byte ranges are produced.
pub fn plan_segments(total_size: u64, concurrency: u32) -> Result<Vec<ByteRange>, TransferError> {
    if total_size == 0 {
        return Err(TransferError::InvalidInput(
            "cannot plan segments for an empty file".to_string(),
        ));
    }
    if concurrency == 0 {
        return Err(TransferError::InvalidInput(
            "concurrency must be at least 1".to_string(),
        ));
    }

    let count = u64::from(concurrency).min(total_size);
    let part_size = total_size / count;

    let ranges = (0..count)
        .map(|i| {
            let start = i * part_size;
            ByteRange {
                index: i as usize,
                start,
                end: if i + 1 != count {
                    start + part_size - 1
                } else {
                    total_size - 1
                },
            }
        })
        .collect();

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(ranges: &[ByteRange], total_size: u64) {
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(total_size - 1));
        for (i, pair) in ranges.windows(2).enumerate() {
            assert_eq!(pair[0].index, i);
            assert_eq!(pair[1].start, pair[0].end + 1);
        }
        assert_eq!(ranges.iter().map(ByteRange::len).sum::<u64>(), total_size);
    }

    #[test]
    fn test_plan_even_split() {
        let ranges = plan_segments(1000, 4).unwrap();

        let bounds: Vec<(u64, u64)> = ranges.iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(bounds, vec![(0, 249), (250, 499), (500, 749), (750, 999)]);
    }

    #[test]
    fn test_plan_single_thread() {
        let ranges = plan_segments(500, 1).unwrap();

        assert_eq!(
            ranges,
            vec![ByteRange {
                index: 0,
                start: 0,
                end: 499
            }]
        );
    }

    #[test]
    fn test_plan_last_range_absorbs_remainder() {
        let ranges = plan_segments(1009, 4).unwrap();

        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[3].len(), 1009 - 252 * 3);
        assert_partition(&ranges, 1009);
    }

    #[test]
    fn test_plan_small_file_caps_range_count() {
        let ranges = plan_segments(3, 8).unwrap();

        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.len() == 1));
        assert_partition(&ranges, 3);
    }

    #[test]
    fn test_plan_partitions_many_sizes() {
        for total_size in [1u64, 2, 7, 15, 16, 17, 4096, 141_748_419] {
            for concurrency in 1..=16 {
                let ranges = plan_segments(total_size, concurrency).unwrap();
                assert_partition(&ranges, total_size);
            }
        }
    }

    #[test]
    fn test_plan_rejects_zero_inputs() {
        assert!(matches!(
            plan_segments(0, 4),
            Err(TransferError::InvalidInput(_))
        ));
        assert!(matches!(
            plan_segments(100, 0),
            Err(TransferError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_range_header_value() {
        let range = ByteRange {
            index: 1,
            start: 250,
            end: 499,
        };
        assert_eq!(range.header_value(), "bytes=250-499");
        assert_eq!(range.len(), 250);
    }
}
