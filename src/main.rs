#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use c3r3s_loader::protocol::{block_count, block_length, checksum, DEFAULT_BAUD};
use c3r3s_loader::{Error, Options, Uploader};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    port: String,

    /// Kernel image to upload
    #[structopt(parse(from_os_str))]
    image: std::path::PathBuf,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = run(o) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(o: Args) -> anyhow::Result<()> {
    let image = std::fs::read(&o.image)
        .map_err(|e| Error::<std::io::ErrorKind>::ImageUnreadable(e.kind()))
        .with_context(|| format!("reading {}", o.image.display()))?;

    info!(
        "Loaded {} ({}, {} blocks of {} bytes, crc32 {})",
        o.image.display(),
        bytefmt::format(image.len() as u64),
        block_count(image.len()),
        block_length(image.len()),
        hex::encode(checksum(&image).to_be_bytes()),
    );

    if o.baud != DEFAULT_BAUD {
        warn!("c3r3s expects {} baud, using {}", DEFAULT_BAUD, o.baud);
    }

    info!("Connecting to serial port");

    let uploader = Uploader::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("connecting to {}", o.port))?;

    info!("Waiting for c3r3s bootloader (reset the device if nothing happens)");

    let bar = ProgressBar::new(block_count(image.len()) as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40} {pos}/{len} blocks {msg}")
            .progress_chars("#>-"),
    );

    let res = uploader.upload(&image, |p| {
        bar.set_position(p.block as u64 + 1);
        bar.set_message(&bytefmt::format(p.acknowledged as u64));
    });

    match res {
        Ok(()) => {
            bar.finish();
            info!("Upload complete, checksum OK");
            Ok(())
        }
        Err(e) => {
            bar.abandon();
            Err(e).context("uploading image")
        }
    }
}
