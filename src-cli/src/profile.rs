//! CPU profiling session for `--cpuprofile`
//!
//! The profile is written in pprof protobuf format when the session is
//! finished.

use std::fs::File;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Sampling frequency in Hz
pub const SAMPLE_FREQUENCY: i32 = 100;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Could not create profile file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write profile file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Profiler error: {0}")]
    Profiler(String),

    #[error("CPU profiling is not supported on this platform")]
    #[cfg(not(unix))]
    Unsupported,
}

/// Running CPU profile, flushed to its file by [`CpuProfile::finish`]
pub struct CpuProfile {
    path: PathBuf,
    file: File,
    #[cfg(unix)]
    guard: pprof::ProfilerGuard<'static>,
}

impl CpuProfile {
    /// Create the output file and start sampling.
    #[cfg(unix)]
    pub fn start(path: &Path) -> Result<Self, ProfileError> {
        let file = File::create(path).map_err(|source| ProfileError::Create {
            path: path.to_path_buf(),
            source,
        })?;

        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(SAMPLE_FREQUENCY)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()
            .map_err(|e| ProfileError::Profiler(e.to_string()))?;

        tracing::debug!(path = %path.display(), "CPU profiling started");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            guard,
        })
    }

    #[cfg(not(unix))]
    pub fn start(_path: &Path) -> Result<Self, ProfileError> {
        Err(ProfileError::Unsupported)
    }

    /// Stop sampling and write the collected profile.
    #[cfg(unix)]
    pub fn finish(self) -> Result<(), ProfileError> {
        use std::io::Write;

        use pprof::protos::Message;

        let Self {
            path,
            mut file,
            guard,
        } = self;

        let report = guard
            .report()
            .build()
            .map_err(|e| ProfileError::Profiler(e.to_string()))?;
        drop(guard);

        let profile = report
            .pprof()
            .map_err(|e| ProfileError::Profiler(e.to_string()))?;
        let mut content = Vec::new();
        profile
            .write_to_vec(&mut content)
            .map_err(|e| ProfileError::Profiler(e.to_string()))?;

        file.write_all(&content)
            .and_then(|()| file.flush())
            .map_err(|source| ProfileError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "CPU profile written");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn finish(self) -> Result<(), ProfileError> {
        Err(ProfileError::Unsupported)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn profile_is_written_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu.pprof");

        let profile = CpuProfile::start(&path).unwrap();
        assert_eq!(profile.path(), path.as_path());
        let mut acc = 0u64;
        for i in 0..1_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        assert_ne!(acc, 1);
        profile.finish().unwrap();

        assert!(path.exists());
    }

    #[test]
    fn unwritable_path_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("cpu.pprof");
        assert!(matches!(
            CpuProfile::start(&path),
            Err(ProfileError::Create { .. })
        ));
    }
}
