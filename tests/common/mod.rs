use std::io::Write;
use tempfile::NamedTempFile;

/// Writes `lines` to a fresh temporary CSV file.
pub fn csv_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}
