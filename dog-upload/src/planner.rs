use crate::{ByteRange, PartDescriptor, TransferMode};

/// Ordered part layout for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    pub mode: TransferMode,
    pub total_size: u64,
    pub chunk_size: u64,
    /// Empty for single-part transfers
    pub parts: Vec<PartDescriptor>,
}

impl PartPlan {
    pub fn part_count(&self) -> u32 {
        self.parts.len() as u32
    }

    pub fn part_numbers(&self) -> Vec<u32> {
        self.parts.iter().map(|p| p.part_number).collect()
    }
}

/// Splits a file into fixed-size parts
#[derive(Debug, Clone, Copy)]
pub struct PartPlanner {
    chunk_size: u64,
}

impl PartPlanner {
    pub fn new(chunk_size: u64) -> Self {
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Decide the transfer mode for a file of `total_size` bytes.
    pub fn mode_for(&self, total_size: u64) -> TransferMode {
        if self.chunk_size == 0 || total_size < self.chunk_size {
            TransferMode::SinglePart
        } else {
            TransferMode::Multipart
        }
    }

    /// Lay out the parts of a file of `total_size` bytes.
    ///
    /// Files smaller than one chunk (including empty files) are a single
    /// write with no parts. Otherwise parts are numbered from 1 and cover
    /// `[0, total_size)` exactly; only the last one may be short.
    pub fn plan(&self, total_size: u64) -> PartPlan {
        let mode = self.mode_for(total_size);
        let parts = match mode {
            TransferMode::SinglePart => Vec::new(),
            TransferMode::Multipart => {
                let count = total_size.div_ceil(self.chunk_size);
                (1..=count)
                    .map(|n| PartDescriptor {
                        part_number: n as u32,
                        range: ByteRange::new(
                            (n - 1) * self.chunk_size,
                            total_size.min(n * self.chunk_size),
                        ),
                    })
                    .collect()
            }
        };

        PartPlan {
            mode,
            total_size,
            chunk_size: self.chunk_size,
            parts,
        }
    }
}

/// Shorthand for `PartPlanner::new(chunk_size).plan(total_size)`
pub fn plan(total_size: u64, chunk_size: u64) -> PartPlan {
    PartPlanner::new(chunk_size).plan(total_size)
}
