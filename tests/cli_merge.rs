use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn read_fasta(path: &std::path::Path) -> anyhow::Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for block in content.split('>').filter(|b| !b.trim().is_empty()) {
        let (name, seq) = block.split_once('\n').unwrap();
        records.push((name.trim().to_string(), seq.replace('\n', "")));
    }
    Ok(records)
}

#[test]
fn command_merge_rg_trace() -> anyhow::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let outfile = tempdir.path().join("merged.fa");

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("merge")
        .arg("tests/merge/sub_1.fa")
        .arg("tests/merge/sub_2.fa")
        .arg("--backbones")
        .arg("tests/merge/bb.fa")
        .arg("--cluster")
        .arg("none")
        .arg("--trace")
        .arg("rg")
        .arg("-d")
        .arg(tempdir.path().join("work").to_str().unwrap())
        .arg("-o")
        .arg(outfile.to_str().unwrap())
        .assert()
        .success();

    let merged = read_fasta(&outfile)?;
    assert_eq!(merged.len(), 5);
    for (name, seq) in &merged {
        assert_eq!(seq.len(), 4, "ragged row {}", name);
    }
    let rows: std::collections::HashMap<_, _> = merged.into_iter().collect();
    assert_eq!(rows["a"], "ACGT");
    assert_eq!(rows["b"], "AC-T");
    assert_eq!(rows["e"], "ACG-");
    assert_eq!(rows["c"], "ACGT");
    assert_eq!(rows["d"], "A-GT");

    Ok(())
}

#[test]
fn command_merge_naive_trace() -> anyhow::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let outfile = tempdir.path().join("merged.fa");

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("merge")
        .arg("tests/merge/sub_1.fa")
        .arg("tests/merge/sub_2.fa")
        .arg("--backbones")
        .arg("tests/merge/bb.fa")
        .arg("--cluster")
        .arg("none")
        .arg("--trace")
        .arg("naive")
        .arg("-d")
        .arg(tempdir.path().join("work").to_str().unwrap())
        .arg("-o")
        .arg(outfile.to_str().unwrap())
        .assert()
        .success();

    let merged = read_fasta(&outfile)?;
    let rows: std::collections::HashMap<_, _> = merged.into_iter().collect();
    assert_eq!(rows["a"], "ACGT");
    assert_eq!(rows["d"], "A-GT");

    Ok(())
}

#[test]
fn command_merge_single_subalignment() -> anyhow::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let outfile = tempdir.path().join("merged.fa");

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("merge")
        .arg("tests/merge/sub_2.fa")
        .arg("--backbones")
        .arg("tests/merge/bb_cd.fa")
        .arg("--cluster")
        .arg("none")
        .arg("--trace")
        .arg("rg")
        .arg("-d")
        .arg(tempdir.path().join("work").to_str().unwrap())
        .arg("-o")
        .arg(outfile.to_str().unwrap())
        .assert()
        .success();

    // one input: the merge must reproduce it untouched
    let merged = read_fasta(&outfile)?;
    assert_eq!(merged.len(), 2);
    let rows: std::collections::HashMap<_, _> = merged.into_iter().collect();
    assert_eq!(rows["c"], "ACGT");
    assert_eq!(rows["d"], "A-GT");

    Ok(())
}

#[test]
fn command_merge_minclusters_trace() -> anyhow::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let outfile = tempdir.path().join("merged.fa");

    // a pre-seeded clustering stands in for the MCL stage; the first two
    // clusters cross, so the search has to break one of them apart and
    // the optimizer can then rebuild the diagonal
    let work = tempdir.path().join("work");
    std::fs::create_dir_all(&work)?;
    std::fs::write(work.join("clusters.txt"), "0 5\n1 4\n2 6\n3 7\n")?;

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("merge")
        .arg("tests/merge/sub_1.fa")
        .arg("tests/merge/sub_2.fa")
        .arg("--backbones")
        .arg("tests/merge/bb.fa")
        .arg("--trace")
        .arg("minclusters")
        .arg("--optimize")
        .arg("-d")
        .arg(work.to_str().unwrap())
        .arg("-o")
        .arg(outfile.to_str().unwrap())
        .assert()
        .success();

    let merged = read_fasta(&outfile)?;
    assert_eq!(merged.len(), 5);
    for (name, seq) in &merged {
        assert_eq!(seq.len(), 4, "ragged row {}", name);
    }
    let rows: std::collections::HashMap<_, _> = merged.into_iter().collect();
    assert_eq!(rows["a"], "ACGT");
    assert_eq!(rows["c"], "ACGT");
    assert_eq!(rows["d"], "A-GT");

    Ok(())
}

#[test]
fn command_merge_resumes_from_cached_stages() -> anyhow::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let work = tempdir.path().join("work");
    let outfile = tempdir.path().join("merged.fa");

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("graph")
        .arg("tests/merge/sub_1.fa")
        .arg("tests/merge/sub_2.fa")
        .arg("--backbones")
        .arg("tests/merge/bb.fa")
        .arg("-d")
        .arg(work.to_str().unwrap())
        .assert()
        .success();
    assert!(work.join("graph.txt").exists());

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("trace")
        .arg("tests/merge/sub_1.fa")
        .arg("tests/merge/sub_2.fa")
        .arg("--backbones")
        .arg("tests/merge/bb.fa")
        .arg("--cluster")
        .arg("none")
        .arg("--trace")
        .arg("rg")
        .arg("-d")
        .arg(work.to_str().unwrap())
        .assert()
        .success();
    assert!(work.join("trace.txt").exists());

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("write")
        .arg("tests/merge/sub_1.fa")
        .arg("tests/merge/sub_2.fa")
        .arg("--backbones")
        .arg("tests/merge/bb.fa")
        .arg("--cluster")
        .arg("none")
        .arg("--trace")
        .arg("rg")
        .arg("-d")
        .arg(work.to_str().unwrap())
        .arg("-o")
        .arg(outfile.to_str().unwrap())
        .assert()
        .success();

    let merged = read_fasta(&outfile)?;
    assert_eq!(merged.len(), 5);

    Ok(())
}

#[test]
fn command_merge_rejects_duplicate_taxa() -> anyhow::Result<()> {
    let tempdir = tempfile::tempdir()?;

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("merge")
        .arg("tests/merge/sub_1.fa")
        .arg("tests/merge/sub_1.fa")
        .arg("--backbones")
        .arg("tests/merge/bb.fa")
        .arg("-d")
        .arg(tempdir.path().join("work").to_str().unwrap())
        .assert()
        .failure()
        .stderr(predicate::str::contains("more than one subalignment"));

    Ok(())
}
