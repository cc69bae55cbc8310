//! Per-tag memory accounting.

use std::fmt::Write as _;

use quarry_core::MemoryTag;

const KIB: usize = 1024;
const MIB: usize = KIB * 1024;
const GIB: usize = MIB * 1024;

/// Running totals of live memory, broken down by [`MemoryTag`].
///
/// Byte totals include memory reported through
/// [`MemorySystem::track_external_allocation`](crate::MemorySystem::track_external_allocation),
/// which is also kept separately so it can be told apart from memory the
/// facade handed out itself. Live counts only cover facade allocations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    total: usize,
    bytes: [usize; MemoryTag::COUNT],
    counts: [usize; MemoryTag::COUNT],
    external: [usize; MemoryTag::COUNT],
}

impl MemoryStats {
    /// Live bytes across all tags.
    pub fn total_allocated(&self) -> usize {
        self.total
    }

    /// Live bytes for one tag, external memory included.
    pub fn tag_bytes(&self, tag: MemoryTag) -> usize {
        self.bytes[tag.index()]
    }

    /// Live facade allocations for one tag.
    pub fn tag_count(&self, tag: MemoryTag) -> usize {
        self.counts[tag.index()]
    }

    /// Externally reported bytes for one tag.
    pub fn external_bytes(&self, tag: MemoryTag) -> usize {
        self.external[tag.index()]
    }

    /// Tags with live bytes, with their byte totals.
    pub fn iter(&self) -> impl Iterator<Item = (MemoryTag, usize)> + '_ {
        MemoryTag::ALL
            .into_iter()
            .map(|tag| (tag, self.tag_bytes(tag)))
            .filter(|&(_, bytes)| bytes > 0)
    }

    /// Human-readable table of every tag's usage.
    pub fn usage_report(&self) -> String {
        let mut out = String::from("System memory use (tagged):\n");
        for tag in MemoryTag::ALL {
            let (amount, unit) = scaled(self.tag_bytes(tag));
            // Writing to a String cannot fail.
            let _ = writeln!(out, "  {:<12}: {amount:.2}{unit}", tag.name());
        }
        let (amount, unit) = scaled(self.total);
        let _ = writeln!(out, "  {:<12}: {amount:.2}{unit}", "TOTAL");
        out
    }

    pub(crate) fn record_allocation(&mut self, tag: MemoryTag, size: usize) {
        self.add(tag, size);
        self.counts[tag.index()] += 1;
    }

    pub(crate) fn record_free(&mut self, tag: MemoryTag, size: usize) {
        self.sub(tag, size);
        self.counts[tag.index()] = self.counts[tag.index()].saturating_sub(1);
    }

    pub(crate) fn record_resize(&mut self, tag: MemoryTag, old_size: usize, new_size: usize) {
        self.sub(tag, old_size);
        self.add(tag, new_size);
    }

    pub(crate) fn record_external_allocation(&mut self, tag: MemoryTag, size: usize) {
        self.add(tag, size);
        self.external[tag.index()] += size;
    }

    /// Returns `false` if more was freed than was reported; the totals
    /// are clamped at zero in that case.
    pub(crate) fn record_external_free(&mut self, tag: MemoryTag, size: usize) -> bool {
        let external = &mut self.external[tag.index()];
        let balanced = *external >= size;
        *external = external.saturating_sub(size);
        self.sub(tag, size);
        balanced
    }

    fn add(&mut self, tag: MemoryTag, size: usize) {
        self.total += size;
        self.bytes[tag.index()] += size;
    }

    fn sub(&mut self, tag: MemoryTag, size: usize) {
        self.total = self.total.saturating_sub(size);
        let bytes = &mut self.bytes[tag.index()];
        *bytes = bytes.saturating_sub(size);
    }
}

/// Scale a byte count to the largest binary unit it reaches.
fn scaled(bytes: usize) -> (f64, &'static str) {
    if bytes >= GIB {
        (bytes as f64 / GIB as f64, "GiB")
    } else if bytes >= MIB {
        (bytes as f64 / MIB as f64, "MiB")
    } else if bytes >= KIB {
        (bytes as f64 / KIB as f64, "KiB")
    } else {
        (bytes as f64, "B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_tag_sums_match_total() {
        let mut stats = MemoryStats::default();
        stats.record_allocation(MemoryTag::Texture, 100);
        stats.record_allocation(MemoryTag::Texture, 50);
        stats.record_allocation(MemoryTag::Job, 10);
        stats.record_external_allocation(MemoryTag::GpuLocal, 4096);
        let sum: usize = stats.iter().map(|(_, b)| b).sum();
        assert_eq!(sum, stats.total_allocated());
        assert_eq!(stats.tag_count(MemoryTag::Texture), 2);
        assert_eq!(stats.tag_count(MemoryTag::GpuLocal), 0);
        assert_eq!(stats.external_bytes(MemoryTag::GpuLocal), 4096);

        stats.record_free(MemoryTag::Texture, 100);
        stats.record_resize(MemoryTag::Job, 10, 30);
        assert_eq!(stats.tag_bytes(MemoryTag::Texture), 50);
        assert_eq!(stats.tag_bytes(MemoryTag::Job), 30);
        assert_eq!(stats.total_allocated(), 50 + 30 + 4096);
    }

    #[test]
    fn unbalanced_external_free_clamps() {
        let mut stats = MemoryStats::default();
        stats.record_external_allocation(MemoryTag::Vulkan, 10);
        assert!(!stats.record_external_free(MemoryTag::Vulkan, 20));
        assert_eq!(stats.tag_bytes(MemoryTag::Vulkan), 0);
        assert_eq!(stats.total_allocated(), 0);
    }

    #[test]
    fn units_scale() {
        assert_eq!(scaled(512), (512.0, "B"));
        assert_eq!(scaled(1536), (1.5, "KiB"));
        assert_eq!(scaled(3 * MIB), (3.0, "MiB"));
        assert_eq!(scaled(2 * GIB), (2.0, "GiB"));
    }

    #[test]
    fn report_lists_every_tag() {
        let mut stats = MemoryStats::default();
        stats.record_allocation(MemoryTag::Scene, 2048);
        let report = stats.usage_report();
        assert_eq!(report.lines().count(), 1 + MemoryTag::COUNT + 1);
        assert!(report.contains("  SCENE       : 2.00KiB"));
        assert!(report.contains("  UNKNOWN     : 0.00B"));
        assert!(report.ends_with("  TOTAL       : 2.00KiB\n"));
    }
}
