//! mzgzip: compress to, decompress from, and list MZGF (.mgz) containers.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail};
use chrono::{Local, TimeZone};
use clap::Parser;

use mzgf::{MzgfReader, MzgfWriter, VirtualOffset, UBLOCK_SIZE};

const MGZ_SUFFIX: &str = ".mgz";

#[derive(Parser)]
#[command(
    name = "mzgzip",
    version,
    about = "Compress or decompress blocked seekable gzip (.mgz) files"
)]
struct Cli {
    /// Write to standard output, keep original files unchanged
    #[arg(short = 'c')]
    stdout: bool,

    /// Overwrite files without asking
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Decompress
    #[arg(short = 'd', long = "decompress")]
    decompress: bool,

    /// List compressed file contents
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Decompress starting at virtual file pointer INT
    #[arg(short = 'v', long = "voffset", value_name = "INT")]
    voffset: Option<i64>,

    /// Decompress starting at INT bytes into the uncompressed file
    #[arg(short = 'u', long = "uoffset", value_name = "INT")]
    uoffset: Option<u64>,

    /// Decompress up to INT bytes
    #[arg(short = 's', long = "size", value_name = "INT")]
    size: Option<u64>,

    /// File to operate on
    file: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = if cli.list {
        list(&cli)
    } else if cli.decompress || cli.voffset.is_some() || cli.uoffset.is_some() || cli.size.is_some()
    {
        decompress(&cli)
    } else {
        compress(&cli)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mzgzip: {}: {}", cli.file.display(), err);
            ExitCode::FAILURE
        }
    }
}

fn compress(cli: &Cli) -> anyhow::Result<()> {
    let name = cli.file.to_string_lossy().into_owned();
    let mut src = File::open(&cli.file)?;
    let mut writer = MzgfWriter::new();
    if cli.stdout {
        let stdout = io::stdout();
        let mut dst = stdout.lock();
        writer.deflate(&mut src, &mut dst)?;
        dst.flush()?;
    } else {
        if name.ends_with(MGZ_SUFFIX) {
            bail!("already has {MGZ_SUFFIX} suffix -- unchanged");
        }
        let out = PathBuf::from(format!("{name}{MGZ_SUFFIX}"));
        confirm_overwrite(&out, cli.force)?;
        let mut dst = File::create(&out)?;
        writer.deflate(&mut src, &mut dst)?;
    }
    Ok(())
}

fn decompress(cli: &Cli) -> anyhow::Result<()> {
    let name = cli.file.to_string_lossy().into_owned();
    let stem = name
        .strip_suffix(MGZ_SUFFIX)
        .ok_or_else(|| anyhow!("unknown suffix -- ignored"))?;

    let mut reader = MzgfReader::open(&cli.file)?;

    if let Some(voffset) = cli.voffset {
        reader.vseek(VirtualOffset::from_raw(voffset))?;
    } else if let Some(uoffset) = cli.uoffset {
        reader.useek(uoffset)?;
    }

    let mut dst: Box<dyn Write> = if cli.stdout {
        Box::new(io::stdout().lock())
    } else {
        let out = PathBuf::from(stem);
        confirm_overwrite(&out, cli.force)?;
        Box::new(File::create(&out)?)
    };

    let mut remaining = cli.size.unwrap_or(u64::MAX);
    let mut buffer = vec![0u8; UBLOCK_SIZE];
    while remaining > 0 && !reader.eof() {
        let want = (buffer.len() as u64).min(remaining) as usize;
        let have = reader.read(&mut buffer[..want])?;
        if have == 0 {
            break;
        }
        dst.write_all(&buffer[..have])?;
        remaining -= have as u64;
    }
    dst.flush()?;
    Ok(())
}

fn list(cli: &Cli) -> anyhow::Result<()> {
    if !cli.file.to_string_lossy().ends_with(MGZ_SUFFIX) {
        bail!("unknown suffix -- ignored");
    }
    let reader = MzgfReader::open(&cli.file)?;

    let mtime = Local
        .timestamp_opt(i64::from(reader.mtime()), 0)
        .single()
        .map(|t| t.to_rfc2822())
        .unwrap_or_else(|| reader.mtime().to_string());

    println!("MZGF Version: {}", reader.version());
    println!("MZGF Date Time: {mtime}");
    println!("MZGF Uncompressed size: {}", reader.ufilesize());
    println!("MZGF Virtual/Uncompressed Offsets:");
    for entry in reader.bindex() {
        println!("{:>14} {:>12}", (entry.zoffset as i64) << 16, entry.uoffset);
    }
    Ok(())
}

fn confirm_overwrite(path: &Path, force: bool) -> anyhow::Result<()> {
    if force || !path.exists() {
        return Ok(());
    }
    print!(
        "mzgzip: {} already exists; do you wish to overwrite (y or n)? ",
        path.display()
    );
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    if !matches!(answer.trim(), "y" | "Y") {
        bail!("not overwritten");
    }
    Ok(())
}
