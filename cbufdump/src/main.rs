use cbufdump::{clean, find_cursor, render_entries, reorder_at, split_entries};
use clap::Parser;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Decode a saved SPL debug buffer")]
struct Args {
    /// Saved buffer (cbuf.txt) or raw memory image
    input: PathBuf,

    /// Input is an unordered ring image (.writemem / ZFSin.txt)
    #[arg(short, long)]
    raw: bool,

    /// Write the decoded text here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Group lines into per-thread entries
    #[arg(short, long)]
    entries: bool,

    /// Only keep entries written by this thread (hex, with or without 0x)
    #[arg(short, long, requires = "entries")]
    thread: Option<String>,
}

fn parse_thread(arg: &str) -> io::Result<u64> {
    let digits = arg.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("bad thread id {:?}", arg),
        )
    })
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let image = fs::read(&args.input)?;

    let ordered = if args.raw {
        let cursor = find_cursor(&image).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{:?}: no end marker, not a ring image", args.input),
            )
        })?;
        if cursor.ambiguous {
            eprintln!(
                "warning: several end markers could be the newest, using offset {}",
                cursor.offset
            );
        }
        reorder_at(&image, cursor.offset)
    } else {
        image
    };

    let text = String::from_utf8_lossy(&clean(&ordered)).into_owned();
    let rendered = if args.entries {
        let filter = args.thread.as_deref().map(parse_thread).transpose()?;
        let entries = split_entries(&text);
        let total = entries.len();
        let kept: Vec<_> = entries
            .iter()
            .filter(|entry| filter.is_none() || entry.thread == filter)
            .collect();
        eprintln!("{} of {} entries", kept.len(), total);
        render_entries(kept)
    } else {
        text
    };

    match &args.output {
        Some(path) => {
            fs::write(path, rendered.as_bytes())?;
            eprintln!("Wrote {:?} ({} bytes)", path, rendered.len());
        }
        None => io::stdout().lock().write_all(rendered.as_bytes())?,
    }
    Ok(())
}
