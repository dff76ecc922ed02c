use crate::{address, mapping, Error};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MAX_WAYS: usize = 16;
pub const MAX_SETS: usize = 1024;
pub const MAX_WORDS: usize = 64;

/// Maximum number of processors that fit into a copy bitmask.
pub const MAX_PROCS: usize = 64;

/// Geometry of a set-associative L1 cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub ways: usize,
    pub sets: usize,
    /// Words (32 bit) per cache line
    pub words: usize,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            ways: 4,
            sets: 64,
            words: 8,
        }
    }
}

impl Cache {
    #[inline]
    #[must_use]
    pub fn line_bytes(&self) -> usize {
        self.words * 4
    }

    /// The total size of the cache in bytes.
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.line_bytes() * self.sets * self.ways
    }

    pub fn validate(&self, name: &str) -> Result<(), Error> {
        validate_geometry(name, self.ways, self.sets, self.words)
    }
}

impl std::fmt::Display for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let size = human_bytes::human_bytes(self.total_bytes() as f64);
        write!(
            f,
            "{size} ({} set, {}-way, {} byte line)",
            self.sets,
            self.ways,
            self.line_bytes()
        )
    }
}

fn validate_geometry(name: &str, ways: usize, sets: usize, words: usize) -> Result<(), Error> {
    for (what, value, max) in [
        ("ways", ways, MAX_WAYS),
        ("sets", sets, MAX_SETS),
        ("words", words, MAX_WORDS),
    ] {
        if !value.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "{name}: {what} must be a power of two (got {value})"
            )));
        }
        if value > max {
            return Err(Error::InvalidConfig(format!(
                "{name}: {what} must be at most {max} (got {value})"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBuffer {
    pub lines: usize,
    pub words: usize,
    /// Cycles an open slot waits for more writes before it is locked
    pub timeout: usize,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self {
            lines: 4,
            words: 8,
            timeout: 8,
        }
    }
}

/// Configuration of the L2 coherence directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MemCache {
    pub ways: usize,
    pub sets: usize,
    pub words: usize,
    /// Number of exact copies tracked before switching to counter mode
    pub copies_limit: usize,
    pub trt_lines: usize,
    pub upt_lines: usize,
    pub fifo_depth: usize,
}

impl Default for MemCache {
    fn default() -> Self {
        Self {
            ways: 16,
            sets: 256,
            words: 8,
            copies_limit: 3,
            trt_lines: 4,
            upt_lines: 4,
            fifo_depth: 4,
        }
    }
}

impl MemCache {
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.words * 4 * self.sets * self.ways
    }
}

impl std::fmt::Display for MemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let size = human_bytes::human_bytes(self.total_bytes() as f64);
        write!(
            f,
            "{size} ({} set, {}-way, {} byte line, {} copies)",
            self.sets,
            self.ways,
            self.words * 4,
            self.copies_limit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Xram {
    pub latency: u64,
    /// Size in bytes
    pub size: u64,
}

impl Default for Xram {
    fn default() -> Self {
        Self {
            latency: 10,
            size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_procs: usize,
    pub icache: Cache,
    pub dcache: Cache,
    pub write_buffer: WriteBuffer,
    pub mem_cache: MemCache,
    pub xram: Xram,
    pub mapping: Vec<mapping::Segment>,
    /// Base address of the per-processor coherence segments
    pub coherence_base: address,
    /// Capacity of each network destination
    pub network_buffer: usize,
    /// Cycles without progress before reporting a deadlock
    pub deadlock_threshold: Option<u64>,
    pub log_after_cycle: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_procs: 4,
            icache: Cache::default(),
            dcache: Cache::default(),
            write_buffer: WriteBuffer::default(),
            mem_cache: MemCache::default(),
            xram: Xram::default(),
            mapping: vec![
                mapping::Segment::new("ram", 0x0000_0000, 0x0008_0000, true),
                mapping::Segment::new("shared", 0x0008_0000, 0x0008_0000, false),
            ],
            coherence_base: 0x1000_0000,
            network_buffer: 8,
            deadlock_threshold: Some(10_000),
            log_after_cycle: None,
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file, JSON if the extension says so and YAML otherwise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = utils::fs::read_to_string(path)?;
        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Line width in bytes shared by every cache of the platform.
    #[must_use]
    pub fn line_bytes(&self) -> usize {
        self.mem_cache.words * 4
    }

    /// Base address of the coherence segment of processor `srcid`.
    #[must_use]
    pub fn coherence_segment(&self, srcid: usize) -> address {
        self.coherence_base + srcid as address * 16
    }

    pub fn mapping_table(&self) -> Result<mapping::MappingTable, Error> {
        mapping::MappingTable::new(self.mapping.iter().cloned())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.num_procs == 0 || self.num_procs > MAX_PROCS {
            return Err(Error::InvalidConfig(format!(
                "number of processors must be within 1..={MAX_PROCS} (got {})",
                self.num_procs
            )));
        }
        self.icache.validate("icache")?;
        self.dcache.validate("dcache")?;
        validate_geometry(
            "mem_cache",
            self.mem_cache.ways,
            self.mem_cache.sets,
            self.mem_cache.words,
        )?;
        if self.mem_cache.words > 16 {
            return Err(Error::InvalidConfig(format!(
                "mem_cache: lines are at most 16 words (got {})",
                self.mem_cache.words
            )));
        }
        let words = [
            ("icache", self.icache.words),
            ("dcache", self.dcache.words),
            ("write_buffer", self.write_buffer.words),
        ];
        if let Some((name, other)) = words
            .iter()
            .find(|(_, words)| *words != self.mem_cache.words)
        {
            return Err(Error::InvalidConfig(format!(
                "{name}: line width of {other} words differs from mem_cache line width of {} words",
                self.mem_cache.words
            )));
        }
        if self.write_buffer.lines == 0 || self.write_buffer.timeout == 0 {
            return Err(Error::InvalidConfig(
                "write_buffer: lines and timeout must be non-zero".to_string(),
            ));
        }
        if self.mem_cache.copies_limit == 0 {
            return Err(Error::InvalidConfig(
                "mem_cache: copies limit must be non-zero".to_string(),
            ));
        }
        if self.mem_cache.trt_lines == 0
            || self.mem_cache.upt_lines == 0
            || self.mem_cache.fifo_depth == 0
        {
            return Err(Error::InvalidConfig(
                "mem_cache: table and fifo sizes must be non-zero".to_string(),
            ));
        }
        if self.network_buffer == 0 {
            return Err(Error::InvalidConfig(
                "network buffer must be non-zero".to_string(),
            ));
        }

        let table = self.mapping_table()?;
        if table.is_empty() {
            return Err(Error::InvalidConfig("empty mapping table".to_string()));
        }
        let coherence_end = self.coherence_segment(self.num_procs);
        if let Some(segment) = table
            .iter()
            .find(|seg| seg.base < coherence_end && self.coherence_base < seg.end())
        {
            return Err(Error::OverlappingSegments {
                first: segment.name.clone(),
                second: "coherence".to_string(),
            });
        }
        if let Some(segment) = table.iter().find(|seg| seg.end() > self.xram.size) {
            return Err(Error::InvalidConfig(format!(
                "segment {segment} exceeds external memory of {}",
                human_bytes::human_bytes(self.xram.size as f64)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::Error;
    use color_eyre::eyre;
    use pretty_assertions_sorted as diff;

    #[test]
    fn test_default_config_is_valid() -> eyre::Result<()> {
        let config = Config::default();
        config.validate()?;
        assert_eq!(config.line_bytes(), 32);
        assert_eq!(config.dcache.total_bytes(), 8 * 1024);
        assert!(config
            .dcache
            .to_string()
            .ends_with("(64 set, 4-way, 32 byte line)"));
        Ok(())
    }

    #[test]
    fn test_yaml_overrides_defaults() -> eyre::Result<()> {
        let yaml = r#"
num_procs: 2
dcache:
  ways: 2
  sets: 4
mem_cache:
  copies_limit: 2
"#;
        let config = Config::from_yaml(yaml)?;
        assert_eq!(config.num_procs, 2);
        assert_eq!(config.dcache.ways, 2);
        assert_eq!(config.dcache.sets, 4);
        assert_eq!(config.dcache.words, 8);
        assert_eq!(config.mem_cache.copies_limit, 2);
        diff::assert_eq!(config.icache, super::Cache::default());
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_geometry() {
        let mut config = Config::default();
        config.dcache.ways = 3;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.icache.sets = 2048;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.write_buffer.words = 4;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.num_procs = 65;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_coherence_overlap() {
        let config = Config {
            coherence_base: 0x100,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::OverlappingSegments { .. })
        ));
    }
}
