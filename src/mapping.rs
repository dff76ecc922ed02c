use crate::{address, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub base: address,
    pub size: u64,
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
}

fn default_cacheable() -> bool {
    true
}

impl Segment {
    #[must_use]
    pub fn new(name: impl Into<String>, base: address, size: u64, cacheable: bool) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            cacheable,
        }
    }

    #[must_use]
    pub fn end(&self) -> address {
        self.base + self.size
    }

    #[must_use]
    pub fn contains(&self, addr: address) -> bool {
        (self.base..self.end()).contains(&addr)
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{:#010x}..{:#010x}]{}",
            self.name,
            self.base,
            self.end(),
            if self.cacheable { "" } else { " (uncached)" }
        )
    }
}

/// Address space decoding for cacheability and target checks.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    segments: indexmap::IndexMap<String, Segment>,
    ranges: rangemap::RangeMap<address, usize>,
}

impl MappingTable {
    pub fn new(segments: impl IntoIterator<Item = Segment>) -> Result<Self, Error> {
        let mut table = Self::default();
        for segment in segments {
            table.insert(segment)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, segment: Segment) -> Result<(), Error> {
        if segment.size == 0 {
            return Err(Error::InvalidConfig(format!(
                "segment {:?} is empty",
                segment.name
            )));
        }
        if self.segments.contains_key(&segment.name) {
            return Err(Error::InvalidConfig(format!(
                "duplicate segment {:?}",
                segment.name
            )));
        }
        let range = segment.base..segment.end();
        if let Some((_, &other)) = self.ranges.overlapping(&range).next() {
            return Err(Error::OverlappingSegments {
                first: self.segments[other].name.clone(),
                second: segment.name,
            });
        }
        self.ranges.insert(range, self.segments.len());
        self.segments.insert(segment.name.clone(), segment);
        Ok(())
    }

    #[must_use]
    pub fn segment(&self, addr: address) -> Option<&Segment> {
        self.ranges.get(&addr).map(|&idx| &self.segments[idx])
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Segment> {
        self.segments.get(name)
    }

    #[must_use]
    pub fn contains(&self, addr: address) -> bool {
        self.ranges.contains_key(&addr)
    }

    /// Unmapped addresses are never cacheable.
    #[must_use]
    pub fn is_cacheable(&self, addr: address) -> bool {
        self.segment(addr).is_some_and(|seg| seg.cacheable)
    }

    pub fn iter(&self) -> indexmap::map::Values<'_, String, Segment> {
        self.segments.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{MappingTable, Segment};
    use crate::Error;
    use color_eyre::eyre;

    #[test]
    fn test_cacheability() -> eyre::Result<()> {
        let table = MappingTable::new([
            Segment::new("ram", 0x0000, 0x1000, true),
            Segment::new("shared", 0x1000, 0x1000, false),
        ])?;
        assert!(table.is_cacheable(0x0ffc));
        assert!(!table.is_cacheable(0x1000));
        assert!(!table.is_cacheable(0x2000));
        assert!(!table.contains(0x2000));
        assert_eq!(table.segment(0x1004).map(|s| s.name.as_str()), Some("shared"));
        Ok(())
    }

    #[test]
    fn test_overlapping_segments_are_rejected() {
        let err = MappingTable::new([
            Segment::new("ram", 0x0000, 0x1000, true),
            Segment::new("rom", 0x0800, 0x1000, true),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::OverlappingSegments { ref first, ref second } if first == "ram" && second == "rom"
        ));
    }

    #[test]
    fn test_segments_keep_insertion_order() -> eyre::Result<()> {
        let table = MappingTable::new([
            Segment::new("shared", 0x1000, 0x1000, false),
            Segment::new("ram", 0x0000, 0x1000, true),
        ])?;
        let names: Vec<_> = table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["shared", "ram"]);
        assert_eq!(table.get("ram").map(Segment::end), Some(0x1000));
        assert!(MappingTable::new([
            Segment::new("ram", 0x0000, 0x1000, true),
            Segment::new("ram", 0x2000, 0x1000, true),
        ])
        .is_err());
        Ok(())
    }
}
