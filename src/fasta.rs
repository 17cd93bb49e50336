use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::SchemeError;

static ALLELE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+[_-])?([0-9]+(\.[0-9]+)?)$").expect("allele name pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub id: String,
    pub sequence: String,
}

pub fn parse_fasta(input: &str) -> Vec<FastaRecord> {
    let mut records: Vec<FastaRecord> = Vec::new();
    for line in input.lines() {
        if let Some(header) = line.strip_prefix('>') {
            let id = header.split_whitespace().next().unwrap_or_default();
            records.push(FastaRecord {
                id: id.to_string(),
                sequence: String::new(),
            });
        } else if let Some(record) = records.last_mut() {
            record
                .sequence
                .extend(line.chars().filter(|ch| !ch.is_whitespace()));
        }
    }
    records
}

pub fn canonical_allele_id(name: &str) -> Option<&str> {
    ALLELE_NAME
        .captures(name)
        .and_then(|captures| captures.get(2))
        .map(|id| id.as_str())
}

fn is_nucleotide_sequence(sequence: &str) -> bool {
    !sequence.is_empty() && sequence.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T'))
}

pub fn normalize_fasta<W: Write>(input: &str, output: &mut W) -> Result<Vec<String>, SchemeError> {
    let mut contig_names = Vec::new();

    for record in parse_fasta(input) {
        let Some(id) = canonical_allele_id(&record.id) else {
            warn!(allele = %record.id, "skipping badly formatted allele");
            continue;
        };

        let sequence = record.sequence.to_ascii_uppercase();
        if !is_nucleotide_sequence(&sequence) {
            debug!(allele = %record.id, "skipping allele with empty or non-ACGT sequence");
            continue;
        }

        writeln!(output, ">{id}\n{sequence}")
            .map_err(|err| SchemeError::Filesystem(err.to_string()))?;
        contig_names.push(id.to_string());
    }

    if contig_names.is_empty() {
        return Err(SchemeError::NoContigs);
    }
    Ok(contig_names)
}
