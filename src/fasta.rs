/*!
Thin FASTA helpers over `noodles-fasta`, used for target references, per-target consensus fragments,
alignments, and every consensus that gets written out.
*/

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use noodles_fasta::io::{Reader as FastaReader, Writer as FastaWriter};
use noodles_fasta::record::{Definition, Record, Sequence};

/// A single named sequence
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamedSequence {
    /// Record name, without the leading '>'
    pub name: String,
    /// Raw sequence bytes
    pub sequence: Vec<u8>
}

impl NamedSequence {
    /// Constructor
    pub fn new(name: impl Into<String>, sequence: Vec<u8>) -> NamedSequence {
        NamedSequence {
            name: name.into(),
            sequence
        }
    }
}

/// Loads every record of a FASTA file, in file order.
/// # Arguments
/// * `path` - the FASTA file to read
/// # Errors
/// * if the file cannot be opened or a record is malformed
pub fn read_fasta(path: &Path) -> Result<Vec<NamedSequence>, Box<dyn std::error::Error>> {
    let mut reader = FastaReader::new(BufReader::new(File::open(path)?));
    let mut ret = vec![];
    for result in reader.records() {
        let record = result?;
        let name = String::from_utf8(record.name().to_vec())?;
        ret.push(NamedSequence::new(name, record.sequence().as_ref().to_vec()));
    }
    Ok(ret)
}

/// Writes a set of records to a FASTA file, replacing anything already there.
/// # Arguments
/// * `path` - the output file
/// * `records` - the records to write, in order
/// # Errors
/// * if the file cannot be created or written
pub fn write_fasta(path: &Path, records: &[NamedSequence]) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = FastaWriter::new(BufWriter::new(File::create(path)?));
    for r in records.iter() {
        let record = Record::new(
            Definition::new(r.name.as_str(), None),
            Sequence::from(r.sequence.clone())
        );
        writer.write_record(&record)?;
    }
    writer.get_mut().flush()?;
    Ok(())
}

/// Writes a single sequence to a FASTA file.
pub fn write_single(path: &Path, name: &str, sequence: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    write_fasta(path, &[NamedSequence::new(name, sequence.to_vec())])
}

/// Strips a leading '>' if a caller passes a raw header line.
pub fn strip_header_marker(name: &str) -> &str {
    name.strip_prefix('>').unwrap_or(name)
}
