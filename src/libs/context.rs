use crate::libs::fasta::{self, Alignment};
use fxhash::FxHashMap;

/// Everything the merge pipeline knows about its input subalignments.
///
/// Subalignments are loaded once; each taxon's aligned row and its
/// gap-stripped sequence are kept for backbone-to-node mapping.
pub struct MergeContext {
    pub subalignment_paths: Vec<String>,
    pub subalignments: Vec<Alignment>,
    pub subalignment_lengths: Vec<usize>,
    pub taxon_subalignment: FxHashMap<String, usize>,
    /// taxon -> its row within its subalignment (gaps included)
    pub aligned_rows: FxHashMap<String, String>,
    /// taxon -> its raw sequence (gaps stripped)
    pub unaligned: FxHashMap<String, String>,
}

impl MergeContext {
    pub fn load(subalignment_paths: &[String]) -> anyhow::Result<Self> {
        let mut subalignments = Vec::with_capacity(subalignment_paths.len());
        let mut taxon_subalignment = FxHashMap::default();
        let mut aligned_rows = FxHashMap::default();
        let mut unaligned = FxHashMap::default();

        for (i, path) in subalignment_paths.iter().enumerate() {
            let subalignment = fasta::read_fasta(path, false)?;
            if subalignment.is_empty() {
                anyhow::bail!("subalignment {} contains no sequences", path);
            }
            let length = fasta::alignment_length(&subalignment);
            for (taxon, row) in &subalignment {
                if row.len() != length {
                    anyhow::bail!("ragged subalignment {}: taxon {}", path, taxon);
                }
                if taxon_subalignment.insert(taxon.clone(), i).is_some() {
                    anyhow::bail!("taxon {} appears in more than one subalignment", taxon);
                }
                aligned_rows.insert(taxon.clone(), row.clone());
                unaligned.insert(taxon.clone(), row.replace('-', ""));
            }
            subalignments.push(subalignment);
        }

        let subalignment_lengths = subalignments
            .iter()
            .map(fasta::alignment_length)
            .collect::<Vec<_>>();

        Ok(Self {
            subalignment_paths: subalignment_paths.to_vec(),
            subalignments,
            subalignment_lengths,
            taxon_subalignment,
            aligned_rows,
            unaligned,
        })
    }

    pub fn total_sequences(&self) -> usize {
        self.taxon_subalignment.len()
    }
}
