use std::path::Path;

use crate::Options;

/// Default options rooted at `dir`.
pub fn opts(dir: &Path) -> Options {
    Options::new(dir)
}

/// Options with a tiny segment size to force rollover quickly, and no merge
/// gating so tests can compact at will.
pub fn small_segment_opts(dir: &Path, segment_size: u64) -> Options {
    Options {
        segment_size,
        merge_ratio: 0.0,
        ..Options::new(dir)
    }
}

/// Number of `*.data` segment files in `dir`.
pub fn count_segments(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".data"))
        .count()
}
