//! FerroKV CLI Client
//!
//! Command-line interface for interacting with FerroKV.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use ferrokv::protocol::{read_response, write_command, Command, Status};

/// FerroKV CLI
#[derive(Parser, Debug)]
#[command(name = "ferrokv-cli")]
#[command(about = "CLI for FerroKV key-value store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Put multiple key-value pairs atomically (alternating key value pairs)
    BatchSet {
        /// Alternating key value arguments, e.g. `k1 v1 k2 v2`
        pairs: Vec<String>,
    },

    /// Ascending range scan, inclusive on both ends
    Range {
        /// Inclusive lower bound
        lo: String,
        /// Inclusive upper bound
        hi: String,
    },

    /// Ping the server
    Ping,
}

fn build_command(command: Commands) -> Result<Command, String> {
    match command {
        Commands::Get { key } => Ok(Command::Get { key: key.into_bytes() }),
        Commands::Set { key, value } => Ok(Command::Put {
            key: key.into_bytes(),
            value: value.into_bytes(),
        }),
        Commands::Del { key } => Ok(Command::Delete { key: key.into_bytes() }),
        Commands::Ping => Ok(Command::Ping),
        Commands::BatchSet { pairs } => {
            if pairs.len() % 2 != 0 {
                return Err("batch-set requires an even number of key/value arguments".to_string());
            }
            let mut keys = Vec::with_capacity(pairs.len() / 2);
            let mut values = Vec::with_capacity(pairs.len() / 2);
            for chunk in pairs.chunks_exact(2) {
                keys.push(chunk[0].clone().into_bytes());
                values.push(chunk[1].clone().into_bytes());
            }
            Ok(Command::BatchPut { keys, values })
        }
        Commands::Range { lo, hi } => Ok(Command::Range {
            lo: lo.into_bytes(),
            hi: hi.into_bytes(),
        }),
    }
}

/// Decode a RANGE response payload: `[count: u32 BE]` then `count`
/// repetitions of `[key_len: u32 BE][key][val_len: u32 BE][value]`.
fn decode_range_payload(payload: &[u8]) -> Option<Vec<(Vec<u8>, Vec<u8>)>> {
    if payload.len() < 4 {
        return None;
    }
    let count = u32::from_be_bytes(payload[0..4].try_into().ok()?) as usize;
    let mut rest = &payload[4..];
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        if rest.len() < 4 {
            return None;
        }
        let key_len = u32::from_be_bytes(rest[0..4].try_into().ok()?) as usize;
        rest = &rest[4..];
        if rest.len() < key_len {
            return None;
        }
        let key = rest[..key_len].to_vec();
        rest = &rest[key_len..];

        if rest.len() < 4 {
            return None;
        }
        let val_len = u32::from_be_bytes(rest[0..4].try_into().ok()?) as usize;
        rest = &rest[4..];
        if rest.len() < val_len {
            return None;
        }
        let value = rest[..val_len].to_vec();
        rest = &rest[val_len..];

        pairs.push((key, value));
    }
    Some(pairs)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let is_range = matches!(args.command, Commands::Range { .. });

    let command = match build_command(args.command) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("error: {}", message);
            return ExitCode::FAILURE;
        }
    };

    let stream = match TcpStream::connect(&args.server) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("error: failed to connect to {}: {}", args.server, e);
            return ExitCode::FAILURE;
        }
    };

    let mut reader = BufReader::new(stream.try_clone().expect("failed to clone stream"));
    let mut writer = BufWriter::new(stream);

    if let Err(e) = write_command(&mut writer, &command) {
        eprintln!("error: failed to send command: {}", e);
        return ExitCode::FAILURE;
    }
    use std::io::Write;
    if let Err(e) = writer.flush() {
        eprintln!("error: failed to flush command: {}", e);
        return ExitCode::FAILURE;
    }

    let response = match read_response(&mut reader) {
        Ok(response) => response,
        Err(e) => {
            eprintln!("error: failed to read response: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match response.status {
        Status::Ok => {
            match response.payload {
                Some(payload) if is_range => match decode_range_payload(&payload) {
                    Some(pairs) => {
                        for (key, value) in pairs {
                            println!("{}\t{}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
                        }
                    }
                    None => eprintln!("error: malformed range response"),
                },
                Some(payload) => println!("{}", String::from_utf8_lossy(&payload)),
                None => println!("OK"),
            }
            ExitCode::SUCCESS
        }
        Status::NotFound => {
            println!("(not found)");
            ExitCode::SUCCESS
        }
        Status::Error => {
            let message = response
                .payload
                .map(|p| String::from_utf8_lossy(&p).to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}
