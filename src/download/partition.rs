use std::fmt;

/// Inclusive byte interval `[start, end]` of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "empty byte range {start}-{end}");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Same range with the first `offset` bytes dropped, `None` if nothing is left.
    pub fn skip(&self, offset: u64) -> Option<ByteRange> {
        let start = self.start.checked_add(offset)?;
        (start <= self.end).then_some(ByteRange { start, end: self.end })
    }

    /// Value of the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split `[0, size-1]` into `workers` contiguous ranges.
///
/// Every range holds `size / workers` bytes, the last one also takes the
/// remainder. `workers` is clamped to `1..=size`; an empty resource yields
/// no range at all.
pub fn partition(size: u64, workers: usize) -> Vec<ByteRange> {
    if size == 0 {
        return Vec::new();
    }
    let count = (workers.max(1) as u64).min(size);
    let chunk = size / count;
    (0..count)
        .map(|i| {
            let start = i * chunk;
            let end = if i == count - 1 { size - 1 } else { start + chunk - 1 };
            ByteRange::new(start, end)
        })
        .collect()
}
