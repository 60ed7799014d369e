//! Small filesystem helpers.

use std::fs;
use std::io;
use std::path::Path;

/// Total size in bytes of every file under `dir`, recursively.
pub fn dir_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_dir_size_counts_nested_files() {
        let temp = TempDir::new().unwrap();
        let mut f = File::create(temp.path().join("a")).unwrap();
        f.write_all(&[0u8; 100]).unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        let mut g = File::create(temp.path().join("sub").join("b")).unwrap();
        g.write_all(&[0u8; 50]).unwrap();

        assert_eq!(dir_size(temp.path()).unwrap(), 150);
    }

    #[test]
    fn test_dir_size_empty_directory() {
        let temp = TempDir::new().unwrap();
        assert_eq!(dir_size(temp.path()).unwrap(), 0);
    }
}
