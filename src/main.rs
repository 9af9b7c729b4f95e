//! Command-line front-end: replay a trace file and dump the heap.

use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::process::ExitCode;

use tagheap::{write_snapshot, Config, Driver, Heap};

const OUTPUT_FILE: &str = "output.txt";

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        let program = args.first().map_or("tagheap", String::as_str);
        eprintln!("Usage: {program} <input_file> <free_list_type> <allocation_strategy>");
        return ExitCode::from(1);
    }

    let free_collection = match args[2].parse() {
        Ok(kind) => kind,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::from(1);
        }
    };
    let placement = match args[3].parse() {
        Ok(placement) => placement,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::from(1);
        }
    };

    let input = match File::open(&args[1]) {
        Ok(file) => file,
        Err(error) => {
            eprintln!("Error opening file: {error}");
            return ExitCode::from(1);
        }
    };

    let mut heap = Heap::new(Config {
        free_collection,
        placement,
        ..Config::default()
    });
    let mut driver = Driver::new();
    if let Err(error) = driver.replay(&mut heap, BufReader::new(input)) {
        eprintln!("Error reading trace: {error}");
        return ExitCode::from(1);
    }

    // dump even a corrupt heap, the snapshot is the evidence
    let corrupted = heap.verify().is_err();
    let written = File::create(OUTPUT_FILE).and_then(|file| {
        let mut output = BufWriter::new(file);
        write_snapshot(&heap, &mut output)?;
        output.flush()
    });
    if let Err(error) = written {
        eprintln!("Error writing {OUTPUT_FILE}: {error}");
        return ExitCode::from(1);
    }

    if corrupted {
        eprintln!("Fatal: heap invariants violated after replay, see {OUTPUT_FILE}");
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
