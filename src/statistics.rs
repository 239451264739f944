//! Collection statistics.

/// Byte count rendered with an IEC unit suffix in log lines and the
/// `Display` impls below.
pub(crate) struct ByteSize(pub usize);

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
        if self.0 < 1024 {
            return write!(f, "{}B", self.0);
        }
        let mut value = self.0 as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit + 1 < UNITS.len() {
            value /= 1024.0;
            unit += 1;
        }
        write!(f, "{:.2}{}", value, UNITS[unit])
    }
}

/// Per-heaplet counters, updated in collection slow paths only.
#[derive(Clone, Debug, Default)]
pub struct HeapletStatistics {
    pub minor_collections: usize,
    pub major_collections: usize,
    pub global_collections: usize,
    pub shares: usize,
    pub ssb_flushes: usize,
    pub bytes_allocated: usize,
    pub bytes_copied: usize,
    pub bytes_promoted: usize,
    pub finalisers_run: usize,
    pub remembered_set_peak: usize,
    pub last_survival_ratio: f64,
}

impl std::fmt::Display for HeapletStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Heaplet statistics:")?;
        writeln!(
            f,
            "  Collections: {} minor, {} major, {} global, {} shares",
            self.minor_collections, self.major_collections, self.global_collections, self.shares
        )?;
        writeln!(f, "  Bytes allocated: {}", ByteSize(self.bytes_allocated))?;
        writeln!(f, "  Bytes copied: {}", ByteSize(self.bytes_copied))?;
        writeln!(f, "  Bytes promoted: {}", ByteSize(self.bytes_promoted))?;
        writeln!(f, "  SSB flushes: {}", self.ssb_flushes)?;
        writeln!(f, "  Finalisers run: {}", self.finalisers_run)?;
        writeln!(f, "  Remembered set peak: {}", self.remembered_set_peak)?;
        writeln!(
            f,
            "  Last survival ratio: {:.4}",
            self.last_survival_ratio
        )?;
        Ok(())
    }
}

/// Process-wide view over the heap's block economy.
#[derive(Clone, Debug, Default)]
pub struct HeapStatistics {
    pub heaplets_attached: usize,
    pub blocks_total: usize,
    pub blocks_available: usize,
    pub shared_blocks: usize,
    pub pooled_blocks: usize,
}

impl std::fmt::Display for HeapStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Heap statistics:")?;
        writeln!(f, "  Heaplets attached: {}", self.heaplets_attached)?;
        writeln!(
            f,
            "  Blocks: {} total, {} available, {} pooled, {} shared",
            self.blocks_total, self.blocks_available, self.pooled_blocks, self.shared_blocks
        )?;
        Ok(())
    }
}
