use anyhow::Context;
use indexmap::IndexMap;
use std::io::Write;

/// A dictionary-style alignment: taxon name -> row, in file order.
pub type Alignment = IndexMap<String, String>;

pub fn read_fasta(input: &str, remove_dashes: bool) -> anyhow::Result<Alignment> {
    let reader = crate::reader(input);
    let mut fa_in = noodles_fasta::io::Reader::new(reader);

    let mut alignment = Alignment::new();
    for result in fa_in.records() {
        let record = result.with_context(|| format!("malformed FASTA record in {}", input))?;
        let name = String::from_utf8(record.name().into())?;
        let mut seq = String::from_utf8(record.sequence().get(..).unwrap().to_vec())?;
        if remove_dashes {
            seq.retain(|c| c != '-');
        }
        alignment.insert(name, seq);
    }

    log::info!("Read {} sequences from {}", alignment.len(), input);
    Ok(alignment)
}

pub fn write_fasta(alignment: &Alignment, output: &str, append: bool) -> anyhow::Result<()> {
    let mut writer = if append {
        crate::libs::io::appender(output)
    } else {
        crate::writer(output)
    };
    for (name, seq) in alignment {
        writer.write_fmt(format_args!(">{}\n{}\n", name, seq))?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes only the named taxa, in the given order.
pub fn write_fasta_taxa(
    alignment: &Alignment,
    taxa: &[String],
    output: &str,
) -> anyhow::Result<()> {
    let mut writer = crate::writer(output);
    for name in taxa {
        if let Some(seq) = alignment.get(name) {
            writer.write_fmt(format_args!(">{}\n{}\n", name, seq))?;
        }
    }
    writer.flush()?;

    Ok(())
}

/// Reads a Stockholm profile alignment (hmmalign output).
///
/// Match columns are uppercase letters and `-`; insertion states are
/// lowercase letters and `.`. With `include_insertions` the insertion
/// characters are kept, otherwise only match columns survive.
pub fn read_stockholm(input: &str, include_insertions: bool) -> anyhow::Result<Alignment> {
    let reader = crate::reader(input);

    let mut alignment = Alignment::new();
    for line in std::io::BufRead::lines(reader) {
        let line = line?;
        let line = line.trim();
        if line == "//" {
            break;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (key, seq) = match (parts.next(), parts.next()) {
            (Some(k), Some(s)) => (k, s),
            _ => anyhow::bail!("malformed Stockholm line in {}: {}", input, line),
        };

        let entry = alignment.entry(key.to_string()).or_default();
        for c in seq.chars() {
            if include_insertions || (c.is_uppercase() || c == '-') {
                entry.push(c);
            }
        }
    }

    Ok(alignment)
}

pub fn alignment_length(alignment: &Alignment) -> usize {
    alignment.values().next().map_or(0, |seq| seq.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stockholm_match_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aln.sto");
        std::fs::write(
            &path,
            "# STOCKHOLM 1.0\n\nseq1 AC.gT-\nseq2 A-ag.C\n//\n",
        )
        .unwrap();
        let path = path.to_str().unwrap().to_string();

        let matches = read_stockholm(&path, false).unwrap();
        assert_eq!(matches["seq1"], "ACT-");
        assert_eq!(matches["seq2"], "A-C");

        let full = read_stockholm(&path, true).unwrap();
        assert_eq!(full["seq1"], "AC.gT-");
        assert_eq!(full["seq2"], "A-ag.C");
    }

    #[test]
    fn fasta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aln.fa");
        let path = path.to_str().unwrap().to_string();

        let mut alignment = Alignment::new();
        alignment.insert("tax_a".to_string(), "AC-GT".to_string());
        alignment.insert("tax_b".to_string(), "ACCGT".to_string());
        write_fasta(&alignment, &path, false).unwrap();

        let back = read_fasta(&path, false).unwrap();
        assert_eq!(back, alignment);

        let unaligned = read_fasta(&path, true).unwrap();
        assert_eq!(unaligned["tax_a"], "ACGT");
    }
}
