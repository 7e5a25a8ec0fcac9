use anyhow::Context;
use cmd_lib::run_cmd;
use std::path::Path;

/// Wrappers around the external collaborators: MAFFT for backbone
/// alignments, MCL for graph clustering, HMMER for profile extension.
/// Every wrapper writes to a temp file and renames on success, so an
/// artifact only exists once it is complete. Non-zero exits are fatal.

fn find_tool(name: &str) -> anyhow::Result<String> {
    let path = which::which(name)
        .with_context(|| format!("external tool `{}` not found in PATH", name))?;
    Ok(path.to_string_lossy().to_string())
}

fn temp_name(output: &str) -> String {
    let path = Path::new(output);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().unwrap().to_string_lossy();
    dir.join(format!("temp_{}", name)).to_string_lossy().to_string()
}

pub fn run_mafft(unaligned: &str, output: &str, threads: usize) -> anyhow::Result<()> {
    let mafft = find_tool("mafft")?;
    let temp = temp_name(output);
    log::info!("Running MAFFT on {} -> {}", unaligned, output);
    run_cmd!(
        ${mafft} --localpair --maxiterate 1000 --ep 0.123 --quiet
            --thread ${threads} --anysymbol ${unaligned} > ${temp}
    )
    .with_context(|| format!("MAFFT failed on {}", unaligned))?;
    std::fs::rename(&temp, output)?;

    Ok(())
}

pub fn run_mcl(graph_file: &str, inflation: f64, output: &str) -> anyhow::Result<()> {
    let mcl = find_tool("mcl")?;
    let temp = temp_name(output);
    log::info!("Running MCL on {} with inflation {}", graph_file, inflation);
    run_cmd!(
        ${mcl} ${graph_file} --abc -o ${temp} -I ${inflation}
    )
    .with_context(|| format!("MCL failed on {}", graph_file))?;
    std::fs::rename(&temp, output)?;

    Ok(())
}

pub fn run_hmmbuild(alignment: &str, output: &str) -> anyhow::Result<()> {
    let hmmbuild = find_tool("hmmbuild")?;
    let temp = temp_name(output);
    log::info!("Building HMM over {}", alignment);
    run_cmd!(
        ${hmmbuild} --ere 0.59 --cpu 1 --symfrac 0.0 --informat afa
            ${temp} ${alignment} > /dev/null
    )
    .with_context(|| format!("hmmbuild failed on {}", alignment))?;
    std::fs::rename(&temp, output)?;

    Ok(())
}

pub fn run_hmmalign(hmm_model: &str, queries: &str, output: &str) -> anyhow::Result<()> {
    let hmmalign = find_tool("hmmalign")?;
    let temp = temp_name(output);
    log::info!("Aligning {} against profile {}", queries, hmm_model);
    run_cmd!(
        ${hmmalign} -o ${temp} ${hmm_model} ${queries}
    )
    .with_context(|| format!("hmmalign failed on {}", queries))?;
    std::fs::rename(&temp, output)?;

    Ok(())
}
