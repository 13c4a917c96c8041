use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "talon",
    version,
    about = "Long-read de novo genome assembler",
    long_about = None
)]
pub struct Cli {
    /// Input file in FASTA/FASTQ format (can be compressed with gzip)
    pub sequences: String,

    /// Use larger (k, w) when assembling highly accurate sequences
    #[arg(long)]
    pub weaken: bool,

    /// Number of times the consensus polisher is invoked
    #[arg(short = 'p', long = "polishing-rounds", default_value_t = 2)]
    pub polishing_rounds: i32,

    /// Score for matching bases
    #[arg(short = 'm', long = "match", default_value_t = 3, allow_negative_numbers = true)]
    pub match_score: i8,

    /// Score for mismatching bases
    #[arg(short = 'n', long = "mismatch", default_value_t = -5, allow_negative_numbers = true)]
    pub mismatch: i8,

    /// Gap penalty (must be negative)
    #[arg(short = 'g', long = "gap", default_value_t = -4, allow_negative_numbers = true)]
    pub gap: i8,

    /// Print the assembly graph in GFA format to this path
    #[arg(long = "graphical-fragment-assembly")]
    pub gfa_path: Option<String>,

    /// Reuse non-chimeric regions in combination with unitigs
    #[arg(long = "second-run")]
    pub second_run: bool,

    /// Resume previous run from last checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Number of threads
    #[arg(short = 't', long, default_value_t = 1)]
    pub threads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["talon", "reads.fastq"]);
        assert_eq!(cli.sequences, "reads.fastq");
        assert_eq!(cli.polishing_rounds, 2);
        assert_eq!(cli.match_score, 3);
        assert_eq!(cli.mismatch, -5);
        assert_eq!(cli.gap, -4);
        assert_eq!(cli.threads, 1);
        assert!(!cli.weaken && !cli.second_run && !cli.resume);
        assert!(cli.gfa_path.is_none());
    }

    #[test]
    fn test_negative_scores() {
        let cli = Cli::parse_from(["talon", "-n", "-7", "-g", "-2", "reads.fa"]);
        assert_eq!(cli.mismatch, -7);
        assert_eq!(cli.gap, -2);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "talon",
            "--weaken",
            "--second-run",
            "--resume",
            "--graphical-fragment-assembly",
            "out.gfa",
            "-t",
            "8",
            "reads.fq.gz",
        ]);
        assert!(cli.weaken && cli.second_run && cli.resume);
        assert_eq!(cli.gfa_path.as_deref(), Some("out.gfa"));
        assert_eq!(cli.threads, 8);
    }
}
