use crate::program::Program;
use crate::registry::TypeRegistry;
use crate::sig::{parse_sig_file, records_of, render_sig_file, validate_records};
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Version of the on-disk layout and program encoding. Bumped when either
/// changes; a mismatching directory is cleared wholesale.
pub(crate) const CACHE_VERSION: u32 = 1;

const VERSION_FILE: &str = "cacheVersion";

/// The signature-based persistent artifact cache (C8).
///
/// Layout under the configured directory:
/// `cacheVersion` — ASCII `<globalVersion>.<userToken>`;
/// `<unit>/<unit>.prog` — the serialized program;
/// `<unit>/<unit>.scex` — the generated source, retained for diagnostics;
/// `<unit>/<unit>.sig` — the recorded signatures of every referenced symbol.
pub(crate) struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Opens (creating if needed) the cache directory, reconciling the
    /// version file. A version mismatch clears every cached unit.
    pub(crate) fn open(dir: &Path, compat_token: &str) -> io::Result<DiskCache> {
        fs::create_dir_all(dir)?;
        let version = format!("{}.{}", CACHE_VERSION, compat_token);
        let version_file = dir.join(VERSION_FILE);
        let current = fs::read_to_string(&version_file).unwrap_or_default();
        if current.trim() != version {
            debug!(
                "classfile cache version mismatch (found '{}', want '{}'), clearing {}",
                current.trim(),
                version,
                dir.display()
            );
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }
            }
            fs::write(&version_file, &version)?;
        }
        Ok(DiskCache { dir: dir.to_path_buf() })
    }

    fn unit_dir(&self, unit: &str) -> PathBuf {
        self.dir.join(unit)
    }

    /// Attempts to reuse a persisted artifact: present, parseable, and with
    /// every recorded signature still resolving identically. Any failure is
    /// a miss and the unit compiles fresh.
    pub(crate) fn load(&self, unit: &str, reg: &TypeRegistry) -> Option<Program> {
        let dir = self.unit_dir(unit);
        let sig_text = fs::read_to_string(dir.join(format!("{}.sig", unit))).ok()?;
        let records = match parse_sig_file(&sig_text) {
            Some(r) => r,
            None => {
                debug!("malformed signature file for {}, recompiling", unit);
                return None;
            }
        };
        if let Err(symbol) = validate_records(&records, reg) {
            debug!("signature of `{}` changed, recompiling {}", symbol, unit);
            return None;
        }
        let prog_text = fs::read(dir.join(format!("{}.prog", unit))).ok()?;
        match serde_json::from_slice::<Program>(&prog_text) {
            Ok(program) => {
                debug!("reusing persisted artifact for {}", unit);
                Some(program)
            }
            Err(e) => {
                debug!("corrupt artifact for {} ({}), recompiling", unit, e);
                None
            }
        }
    }

    /// Persists one compiled unit: program, generated source, and signature
    /// file. Unit directories tolerate concurrent creation by other
    /// processes pointed at the same cache.
    pub(crate) fn store(&self, unit: &str, source: &str, program: &Program) -> io::Result<()> {
        let dir = self.unit_dir(unit);
        fs::create_dir_all(&dir)?;
        let encoded = serde_json::to_vec(program)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(dir.join(format!("{}.prog", unit)), encoded)?;
        fs::write(dir.join(format!("{}.scex", unit)), source)?;
        let records = records_of(program);
        fs::write(dir.join(format!("{}.sig", unit)), render_sig_file(&records))?;
        Ok(())
    }
}
