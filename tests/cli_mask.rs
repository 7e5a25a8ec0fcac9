use assert_cmd::prelude::*;
use std::process::Command;

#[test]
fn command_mask() -> anyhow::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let infile = tempdir.path().join("aln.fa");
    std::fs::write(&infile, ">a\nA--C\n>b\nA--G\n>c\nA--T\n")?;
    let outfile = tempdir.path().join("trimmed.fa");
    let mask_file = tempdir.path().join("alignment_mask.txt");

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("mask")
        .arg(infile.to_str().unwrap())
        .arg("-o")
        .arg(outfile.to_str().unwrap())
        .arg("--mask-file")
        .arg(mask_file.to_str().unwrap())
        .assert()
        .success();

    let mask = std::fs::read_to_string(&mask_file)?;
    assert_eq!(mask.trim(), "1001");

    let trimmed = std::fs::read_to_string(&outfile)?;
    assert!(trimmed.contains(">a\nAC\n"));
    assert!(trimmed.contains(">c\nAT\n"));

    Ok(())
}

#[test]
fn command_mask_portion() -> anyhow::Result<()> {
    let tempdir = tempfile::tempdir()?;
    let infile = tempdir.path().join("aln.fa");
    // middle column is half gaps
    std::fs::write(&infile, ">a\nA-C\n>b\nAGG\n")?;
    let outfile = tempdir.path().join("trimmed.fa");
    let mask_file = tempdir.path().join("alignment_mask.txt");

    let mut cmd = Command::cargo_bin("gcmerge")?;
    cmd.arg("mask")
        .arg(infile.to_str().unwrap())
        .arg("-o")
        .arg(outfile.to_str().unwrap())
        .arg("--mask-file")
        .arg(mask_file.to_str().unwrap())
        .arg("--portion")
        .arg("0.4")
        .assert()
        .success();

    let mask = std::fs::read_to_string(&mask_file)?;
    assert_eq!(mask.trim(), "101");

    Ok(())
}
