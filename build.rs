//! Renders the `peerwire(1)` man page from the clap definition in `src/cli.rs`.

use std::{error::Error, fs, path::Path};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
#[allow(dead_code)]
mod cli;

const MAN_DIR: &str = "target/generated-man";

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-changed=build.rs");

    let page = render_man(cli::Cli::command())?;
    let dir = Path::new(MAN_DIR);
    fs::create_dir_all(dir)?;
    fs::write(dir.join("peerwire.1"), page)?;
    Ok(())
}

fn render_man(cmd: clap::Command) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut page = Vec::new();
    Man::new(cmd).render(&mut page)?;
    Ok(page)
}
