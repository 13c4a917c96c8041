// src/io/fastq.rs
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use flate2::read::MultiGzDecoder;

use crate::io::sequence::Sequence;

/// Open a FASTQ file for reading, handles gzipped files automatically.
pub fn open_fastq(path: &str) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.ends_with(".gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Stream FASTQ records for memory-efficient processing.
pub fn stream_fastq_records<R: BufRead>(reader: R) -> impl Iterator<Item = Sequence> {
    FastqStreamParser {
        lines: reader.lines(),
        next_id: 0,
    }
}

struct FastqStreamParser<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    lines: I,
    next_id: u32,
}

impl<I> Iterator for FastqStreamParser<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = Sequence;

    fn next(&mut self) -> Option<Self::Item> {
        let header = match self.lines.next() {
            Some(Ok(line)) => line,
            _ => return None,
        };
        let data = match self.lines.next() {
            Some(Ok(line)) => line,
            _ => return None,
        };
        // separator line
        match self.lines.next() {
            Some(Ok(_)) => {}
            _ => return None,
        }
        let quality = match self.lines.next() {
            Some(Ok(line)) => line,
            _ => return None,
        };

        let name = header
            .trim_start_matches('@')
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();

        let id = self.next_id;
        self.next_id += 1;
        Some(Sequence::with_quality(id, name, data, quality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_stream_fastq_records() {
        let input = "@read0\nACGT\n+\n!!!!\n@read1 desc\nTT\n+\n##\n";
        let records: Vec<_> = stream_fastq_records(Cursor::new(input)).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "read0");
        assert_eq!(records[0].quality, "!!!!");
        assert_eq!(records[1].name, "read1");
        assert_eq!(records[1].data, "TT");
    }

    #[test]
    fn test_stream_fastq_truncated() {
        let input = "@read0\nACGT\n+\n";
        let records: Vec<_> = stream_fastq_records(Cursor::new(input)).collect();
        assert!(records.is_empty());
    }
}
