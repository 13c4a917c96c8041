// src/io/fasta.rs
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Result, Write};

use flate2::read::MultiGzDecoder;

use crate::io::sequence::Sequence;

/// Open a FASTA file for reading, handles gzipped files automatically.
pub fn open_fasta(path: &str) -> std::io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.ends_with(".gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Stream FASTA records without loading the whole file.
///
/// Multi-line records are concatenated; header text after the first
/// whitespace is dropped from the name.
pub fn stream_fasta_records<R: BufRead>(reader: R) -> impl Iterator<Item = Sequence> {
    FastaStreamParser {
        lines: reader.lines(),
        pending_header: None,
        next_id: 0,
    }
}

struct FastaStreamParser<I>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    lines: I,
    pending_header: Option<String>,
    next_id: u32,
}

impl<I> Iterator for FastaStreamParser<I>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    type Item = Sequence;

    fn next(&mut self) -> Option<Self::Item> {
        let header = match self.pending_header.take() {
            Some(header) => header,
            None => loop {
                match self.lines.next() {
                    Some(Ok(line)) if line.starts_with('>') => break line,
                    Some(Ok(_)) => continue,
                    _ => return None,
                }
            },
        };

        let mut data = String::new();
        loop {
            match self.lines.next() {
                Some(Ok(line)) if line.starts_with('>') => {
                    self.pending_header = Some(line);
                    break;
                }
                Some(Ok(line)) => data.push_str(line.trim_end()),
                _ => break,
            }
        }

        let name = header[1..]
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();

        let id = self.next_id;
        self.next_id += 1;
        Some(Sequence::new(id, name, data))
    }
}

pub struct FastaWriter {
    writer: BufWriter<File>,
}

impl FastaWriter {
    pub fn new(path: &str) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_record(&mut self, name: &str, data: &str) -> Result<()> {
        writeln!(self.writer, ">{}", name)?;
        writeln!(self.writer, "{}", data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_stream_fasta_records() {
        let input = ">read0 extra comment\nACGT\nACGT\n>read1\nTTTT\n";
        let records: Vec<_> = stream_fasta_records(Cursor::new(input)).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "read0");
        assert_eq!(records[0].data, "ACGTACGT");
        assert_eq!(records[1].id, 1);
        assert_eq!(records[1].data, "TTTT");
    }

    #[test]
    fn test_stream_fasta_empty() {
        let records: Vec<_> = stream_fasta_records(Cursor::new("")).collect();
        assert!(records.is_empty());
    }
}
