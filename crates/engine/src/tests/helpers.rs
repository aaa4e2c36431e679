use config::EngineConfig;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}

/// Config whose compaction timer is long enough that only flush kicks and
/// explicit `compact_now` calls drive merging during a test.
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig::new(dir).with_compaction_interval(Duration::from_secs(3600))
}
