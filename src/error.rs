use thiserror::Error;

/// Failures surfaced by the assembly pipeline.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(
        "file {0} has unsupported format extension \
         (valid: .fasta, .fasta.gz, .fa, .fa.gz, .fastq, .fastq.gz, .fq, .fq.gz)"
    )]
    InputFormat(String),

    #[error("empty sequence set")]
    EmptyInput,

    #[error("checkpoint archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AssemblyError>;
