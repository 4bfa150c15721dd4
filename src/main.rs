use c3dio::{AnalogMode, ConversionMode, ReadOptions, ReadStatus, Reader};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "c3d", about = "Inspect and rewrite C3D motion-capture files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields, frame geometry and events
    Info {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// List every parameter group and parameter
    Params {
        input: PathBuf,
        /// Dump the dictionary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print point and analog rows frame by frame
    Frames {
        input: PathBuf,
        /// Print stored analog words instead of scaled values
        #[arg(long)]
        raw_analog: bool,
        /// Stop after this many frames
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Read a file and write it back out
    Rewrite {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Append the frames a second time
        #[arg(long = "loop")]
        repeat: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            for path in &input {
                let reader = Reader::open_path(path)?;
                let m = reader.manager();
                println!("── {} ─────────────────────────────────────────", path.display());
                println!("{}", reader.header());
                println!("  Frames         {} ({}..={})", reader.frame_count(), m.first_frame(), m.last_frame());
                println!("  Point rate     {} Hz", m.point_rate());
                println!("  Points         {} ({})", m.point_used(),
                         if m.point_encoding().is_float() { "float" } else { "integer" });
                println!("  Analog         {} channels × {} samples at {} Hz ({:?})",
                         m.analog_used(), m.analog_per_frame(), m.analog_rate(), m.analog_format());
                println!("  Groups         {}", reader.dictionary().groups().len());
                for (time, label) in reader.header().events() {
                    println!("  Event          {:>8.3}s  {}", time, label);
                }
            }
        }

        // ── Params ───────────────────────────────────────────────────────────
        Commands::Params { input, json } => {
            let reader = Reader::open_path(&input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(reader.dictionary())?);
            } else {
                for group in reader.dictionary().groups() {
                    println!("{} (id {}){}  {}", group.name, group.id,
                             if group.locked { " locked" } else { "" }, group.desc);
                    for p in group.params() {
                        println!("  {:<20} {:?} {:?} = {}", p.name, p.data_type, p.dimensions, p.display_value());
                    }
                }
            }
        }

        // ── Frames ───────────────────────────────────────────────────────────
        Commands::Frames { input, raw_analog, limit } => {
            let mut reader = Reader::open_path(&input)?;
            let options = ReadOptions {
                analog: if raw_analog { AnalogMode::Raw } else { AnalogMode::Transformed },
            };
            let labels = reader.point_labels();
            let mut iter = reader.read_frames(options)?;
            for (number, frame) in iter.by_ref().take(limit.unwrap_or(usize::MAX)) {
                println!("frame {}", number);
                for (i, row) in frame.point_rows().iter().enumerate() {
                    let label = labels.get(i).map(String::as_str).unwrap_or("");
                    println!("  {:<10} {:>10.3} {:>10.3} {:>10.3} {:>8.3} {:>4}",
                             label, row[0], row[1], row[2], row[3], row[4]);
                }
                for s in 0..frame.analog.sub_samples() {
                    if let Some(values) = frame.analog.row(s) {
                        println!("  analog[{}] {:?}", s, values);
                    }
                }
            }
            if let ReadStatus::Truncated { expected, read } = iter.status() {
                eprintln!("file ended after {} of {} frames", read, expected);
            }
        }

        // ── Rewrite ──────────────────────────────────────────────────────────
        Commands::Rewrite { input, output, repeat } => {
            let mut reader = Reader::open_path(&input)?;
            let mut writer = reader.to_writer(ConversionMode::Copy)?;
            if repeat {
                let frames = writer.frames().to_vec();
                writer.add_frames(frames, None)?;
            }
            writer.write_path(&output)?;
            println!("Wrote {} frames → {}", writer.frame_count(), output.display());
        }
    }

    Ok(())
}
