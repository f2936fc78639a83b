use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn runs_script_with_compound_variables() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let script_path = dir.path().join("rows.vp");
    fs::write(
        &script_path,
        r#"
            # rows keyed by index
            set i 1
            set ROW.i "first"
            set i 2
            set ROW.i "second"
            get ROW.1
            get ROW.2
            get ROW.3
            stem ROW. none
            get ROW.1
        "#,
    )?;

    let mut cmd = Command::cargo_bin("varpool")?;
    cmd.args(["run", script_path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::diff("first\nsecond\n<unset>\nnone\n"));

    Ok(())
}

#[test]
fn saves_and_loads_images() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let image_path = dir.path().join("pool.json");
    let save_path = dir.path().join("save.vp");
    fs::write(
        &save_path,
        format!("set greeting hello\nset N.a 1\nsave {}\n", image_path.display()),
    )?;
    let load_path = dir.path().join("load.vp");
    fs::write(
        &load_path,
        format!("load {}\nget greeting\nget N.a\n", image_path.display()),
    )?;

    Command::cargo_bin("varpool")?
        .args(["run", save_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("saved 2 variables"));
    assert!(image_path.exists());

    Command::cargo_bin("varpool")?
        .args(["run", load_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("loaded 2 variables").and(predicate::str::ends_with("hello\n1\n")));

    Ok(())
}

#[test]
fn reports_failing_line() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let script_path = dir.path().join("bad.vp");
    fs::write(&script_path, "set x 1\nfrobnicate x\n")?;

    let mut cmd = Command::cargo_bin("varpool")?;
    cmd.args(["run", script_path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("line 2").and(predicate::str::contains("unknown command 'frobnicate'")));

    Ok(())
}

#[test]
fn config_file_sets_table_size() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let config_path = dir.path().join("pool.toml");
    fs::write(&config_path, "dictionary_size = 5\n")?;
    let script_path = dir.path().join("stats.vp");
    fs::write(&script_path, "stats\n")?;

    let mut cmd = Command::cargo_bin("varpool")?;
    cmd.env_remove("VARPOOL_DICT_SIZE")
        .args(["--config", config_path.to_str().unwrap(), "run", script_path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("primary_size=5 capacity=10 entries=0"));

    Ok(())
}
