use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Lines of a text file split into words, plus an optional header
pub struct ReadLinesOut<T: Send> {
    pub lines: Vec<Vec<T>>,
    pub header: Vec<Box<str>>,
}

fn is_gz(file: &str) -> bool {
    Path::new(file).extension().and_then(|x| x.to_str()) == Some("gz")
}

fn is_comment_or_blank(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('%') || line.trim().is_empty()
}

fn split_words(line: &str) -> Vec<Box<str>> {
    line.split_whitespace().map(Box::from).collect()
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    if is_gz(input_file) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

///
/// Open a file for writing, and return a buffered writer.
/// `stdout` and `stderr` name the standard streams.
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }
    if output_file.eq_ignore_ascii_case("stderr") {
        return Ok(Box::new(BufWriter::new(std::io::stderr())));
    }

    let file = File::create(output_file)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", output_file, e))?;
    if is_gz(output_file) {
        let encoder = GzEncoder::new(file, Compression::default());
        Ok(Box::new(BufWriter::new(encoder)))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Every line of a (possibly gzipped) text file
pub fn read_lines(input_file: &str) -> anyhow::Result<Vec<Box<str>>> {
    open_buf_reader(input_file)?
        .lines()
        .map(|line| Ok(line?.into_boxed_str()))
        .collect()
}

///
/// Write one item per line
///
/// * `lines` - anything we can display
/// * `output_file` - file name--either gzipped or not
///
/// A closed pipe downstream ends the output quietly.
///
pub fn write_lines<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        match writeln!(buf, "{}", line) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(anyhow::anyhow!("writing {}: {}", output_file, e)),
        }
    }
    buf.flush()?;
    Ok(())
}

///
/// Read lines, skipping comments (`#` or `%`) and blank lines, and
/// split them into whitespace-separated words.
///
/// * `input_file` - file name--either gzipped or not
/// * `hdr_line` - index of the header among the kept lines (-1 = none)
///
pub fn read_lines_of_words(
    input_file: &str,
    hdr_line: i64,
) -> anyhow::Result<ReadLinesOut<Box<str>>> {
    let kept: Vec<Box<str>> = read_lines(input_file)?
        .into_iter()
        .filter(|line| !is_comment_or_blank(line))
        .collect();

    let (header, body) = match usize::try_from(hdr_line) {
        Ok(h) => {
            let hdr = kept
                .get(h)
                .ok_or(anyhow::anyhow!("no header line {} in {}", h, input_file))?;
            (split_words(hdr), &kept[(h + 1)..])
        }
        Err(_) => (vec![], &kept[..]),
    };

    // order of lines is kept
    let lines = body.par_iter().map(|s| split_words(s)).collect();

    Ok(ReadLinesOut { lines, header })
}

///
/// Write a file by way of a temporary sibling and a rename, so readers
/// either see the previous content or the complete new one.
///
/// * `output_file` - final file name--either gzipped or not
/// * `write_fn` - fills in the temporary file (same extension)
///
pub fn write_atomically<F>(output_file: &str, write_fn: F) -> anyhow::Result<()>
where
    F: FnOnce(&str) -> anyhow::Result<()>,
{
    let target = Path::new(output_file);
    let file_name = target
        .file_name()
        .and_then(|x| x.to_str())
        .ok_or(anyhow::anyhow!("no file name: {}", output_file))?;

    let temp_path = target.with_file_name(format!(".tmp-{}", file_name));
    let temp_file = temp_path
        .to_str()
        .ok_or(anyhow::anyhow!("non-utf8 path: {:?}", temp_path))?;

    if let Err(e) = write_fn(temp_file) {
        remove_file(temp_file)?;
        return Err(e);
    }

    std::fs::rename(&temp_path, target)?;
    Ok(())
}

/// Create the parent directory of `file` if needed
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    match Path::new(file).parent() {
        Some(dir) => Ok(std::fs::create_dir_all(dir)?),
        None => Err(anyhow::anyhow!("no parent directory: {}", file)),
    }
}

/// Remove a file if it exists
pub fn remove_file(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    if path.is_file() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
