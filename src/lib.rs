#![allow(
    clippy::upper_case_acronyms,
    non_camel_case_types,
    clippy::too_many_arguments,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::module_name_repetitions
)]

pub mod config;
pub mod deadlock;
pub mod error;
pub mod fifo;
pub mod generic_cache;
pub mod interconn;
pub mod iss;
pub mod lfsr;
pub mod mapping;
pub mod mem_cache;
pub mod platform;
pub mod sync;
pub mod trace;
pub mod vci;
pub mod write_buffer;
pub mod xcache;
pub mod xram;

#[cfg(test)]
pub mod testing;

pub use error::Error;
pub use platform::Platform;

use color_eyre::eyre;
use std::path::Path;

pub type address = u64;

/// Base-2 logarithm of a power of two.
#[must_use]
pub fn logb2(value: usize) -> u32 {
    debug_assert!(value.is_power_of_two());
    value.trailing_zeros()
}

/// Enables `env_logger` with a plain message format.
///
/// Used when logging should only start after some cycle to keep
/// the output of long runs manageable.
pub fn init_late_logging() {
    use std::io::Write;
    let mut log_builder = env_logger::Builder::new();
    log_builder.format(|buf, record| writeln!(buf, "{}", record.args()));
    log_builder.parse_default_env();
    // a logger may already be installed by the binary
    log_builder.try_init().ok();
}

pub fn save_stats_to_file(stats: &stats::Stats, path: &Path) -> eyre::Result<()> {
    use serde::Serialize;

    let path = path.with_extension("json");
    let output_file = utils::fs::open_writable(&path)?;
    let mut json_serializer = serde_json::Serializer::with_formatter(
        output_file,
        serde_json::ser::PrettyFormatter::with_indent(b"    "),
    );
    stats.serialize(&mut json_serializer)?;
    Ok(())
}

pub fn save_stats_to_csv(stats: &stats::Stats, path: &Path) -> eyre::Result<()> {
    let path = path.with_extension("csv");
    let output_file = utils::fs::open_writable(&path)?;
    let mut writer = csv::WriterBuilder::new()
        .flexible(false)
        .from_writer(output_file);
    for row in stats.clone().flatten() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre;

    #[test]
    fn test_logb2() -> eyre::Result<()> {
        assert_eq!(super::logb2(1), 0);
        assert_eq!(super::logb2(8), 3);
        assert_eq!(super::logb2(1024), 10);
        Ok(())
    }
}
