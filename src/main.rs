use std::{
    fs,
    io::{self, BufRead, Write},
};

use anyhow::{bail, Context};
use clap::{App, Arg};
use kaleido::{
    driver::{Driver, Outcome},
    parser::Parser,
    Error,
};

/// Prints each outcome and returns how many entities failed.
fn report(outcomes: Vec<Result<Outcome, Error>>) -> usize {
    let mut failures = 0;
    for outcome in outcomes {
        match outcome {
            Ok(outcome) => println!("{}", outcome),
            Err(err) => {
                failures += 1;
                eprintln!("error: {}", err);
            }
        }
    }
    failures
}

/// Line based read-eval loop; an entity has to fit on a single line.
fn repl(driver: &mut Driver) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stderr = io::stderr();

    write!(stderr, "ready> ")?;
    stderr.flush()?;
    for line in stdin.lock().lines() {
        let line = line.context("failed to read from stdin")?;
        report(driver.feed(&line));
        if !driver.is_pending() {
            write!(stderr, "ready> ")?;
            stderr.flush()?;
        }
    }
    writeln!(stderr)?;
    report(driver.finish());

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("kaleido")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("file")
                .short("f")
                .long("file")
                .value_name("FILE")
                .takes_value(true)
                .help("Reads the program from FILE"),
        )
        .arg(
            Arg::with_name("no-eval")
                .long("no-eval")
                .help("Only prints the ir of top-level expressions"),
        )
        .arg(
            Arg::with_name("dump-module")
                .long("dump-module")
                .help("Prints the whole module once input is exhausted"),
        )
        .arg(
            Arg::with_name("SOURCE")
                .multiple(true)
                .conflicts_with("file")
                .help("Program text, joined with spaces"),
        )
        .get_matches();

    let mut driver = Driver::new(Parser::default(), !matches.is_present("no-eval"));

    let failures = if let Some(path) = matches.value_of("file") {
        let source =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
        report(driver.run(&source))
    } else if let Some(values) = matches.values_of("SOURCE") {
        let source = values.collect::<Vec<_>>().join(" ");
        report(driver.run(&source))
    } else {
        repl(&mut driver)?;
        0
    };

    if matches.is_present("dump-module") {
        print!("{}", driver.module().print_to_string());
    }

    if failures > 0 {
        bail!("{} top-level entities failed", failures);
    }

    Ok(())
}
