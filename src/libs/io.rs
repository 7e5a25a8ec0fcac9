use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// ```
/// use std::io::BufRead;
/// let reader = gcmerge::reader("tests/merge/sub_1.fa");
/// assert_eq!(reader.lines().collect::<Vec<_>>().len(), 6);
/// ```
pub fn reader(input: &str) -> Box<dyn BufRead> {
    let reader: Box<dyn BufRead> = if input == "stdin" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let path = std::path::Path::new(input);
        let file = match std::fs::File::open(path) {
            Err(why) => panic!("could not open {}: {}", path.display(), why),
            Ok(file) => file,
        };

        if path.extension() == Some(std::ffi::OsStr::new("gz")) {
            Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        }
    };

    reader
}

pub fn writer(output: &str) -> Box<dyn Write> {
    let writer: Box<dyn Write> = if output == "stdout" {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        Box::new(BufWriter::new(std::fs::File::create(output).unwrap()))
    };

    writer
}

pub fn appender(output: &str) -> Box<dyn Write> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .unwrap();
    Box::new(BufWriter::new(file))
}

/// The file name without its extension, for deriving intermediate names.
pub fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Writes to `temp_<name>` in the same directory, then renames into place.
/// A crash mid-write never leaves a truncated artifact behind.
pub fn atomic_write<F>(path: &str, body: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut dyn Write) -> anyhow::Result<()>,
{
    let path = Path::new(path);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().unwrap().to_string_lossy();
    let temp_path = dir.join(format!("temp_{}", name));

    {
        let mut w: Box<dyn Write> =
            Box::new(BufWriter::new(std::fs::File::create(&temp_path)?));
        body(&mut w)?;
        w.flush()?;
    }
    std::fs::rename(&temp_path, path)?;

    Ok(())
}
