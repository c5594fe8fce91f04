//! Versioned Store Inspection Binary
//!
//! Reads and maintains an LMDB store directory from the command line.
//!
//! Usage:
//!   papl_store <dir> get <key>
//!   papl_store <dir> save <key> <value> <version> <stamp>
//!   papl_store <dir> delete <key>
//!   papl_store <dir> history <key>
//!   papl_store <dir> keys-le <stamp> [page size]
//!   papl_store <dir> keys-be <stamp> [page size]
//!   papl_store <dir> evict-le <stamp>
//!   papl_store <dir> evict-be <stamp>
//!
//! The map size comes from `PAPL_LMDB_MAP_SIZE_MB` (default 64). Log output is
//! controlled by `RUST_LOG`.

use papl_core::{PaplConfig, Stamp, StoreConfig};
use papl_storage::{open_store, VersionedStore};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: papl_store <dir> <get|save|delete|history|keys-le|keys-be|evict-le|evict-be> [args...]";

fn main() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("papl_storage=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(message) = run(&args) {
        eprintln!("{}", message);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<(), String> {
    let (dir, command, rest) = match args {
        [dir, command, rest @ ..] => (dir, command.as_str(), rest),
        _ => return Err(USAGE.to_string()),
    };

    let config = PaplConfig::default()
        .with_env_overrides()
        .map_err(|e| e.to_string())?;
    let store_config = StoreConfig::lmdb(dir).with_map_size_mb(config.store.map_size_mb);
    let store = open_store(&store_config).map_err(|e| e.to_string())?;

    let outcome = dispatch(store.as_ref(), command, rest);
    store.close();
    outcome
}

fn dispatch(store: &dyn VersionedStore, command: &str, args: &[String]) -> Result<(), String> {
    match (command, args) {
        ("get", [key]) => {
            match store.version_value(key) {
                Some(vv) => println!("{}\t{}", vv.version, vv.value),
                None => return Err(format!("key not found: {}", key)),
            }
        }
        ("save", [key, value, version, stamp]) => {
            let status = store.save(key, value, version, parse_stamp(stamp)?);
            if !status.is_success() {
                return Err(format!("save failed with status {}", status));
            }
        }
        ("delete", [key]) => {
            if !store.delete(key) {
                return Err(format!("key not found: {}", key));
            }
        }
        ("history", [key]) => {
            for record in store.history(key) {
                println!("{}\t{}\t{}", record.stamp, record.version, record.value);
            }
        }
        ("keys-le", [stamp]) => print_keys(store.all_keys_le(parse_stamp(stamp)?)),
        ("keys-be", [stamp]) => print_keys(store.all_keys_be(parse_stamp(stamp)?)),
        ("keys-le", [stamp, page, size]) => print_keys(store.all_keys_le_paged(
            parse_stamp(stamp)?,
            parse_usize(page)?,
            parse_usize(size)?,
        )),
        ("keys-be", [stamp, page, size]) => print_keys(store.all_keys_be_paged(
            parse_stamp(stamp)?,
            parse_usize(page)?,
            parse_usize(size)?,
        )),
        ("evict-le", [stamp]) => println!("{}", store.evict_le(parse_stamp(stamp)?)),
        ("evict-be", [stamp]) => println!("{}", store.evict_be(parse_stamp(stamp)?)),
        _ => return Err(USAGE.to_string()),
    }
    Ok(())
}

fn print_keys(keys: Vec<String>) {
    for key in keys {
        println!("{}", key);
    }
}

fn parse_stamp(raw: &str) -> Result<Stamp, String> {
    raw.parse()
        .map_err(|e| format!("invalid stamp '{}': {}", raw, e))
}

fn parse_usize(raw: &str) -> Result<usize, String> {
    raw.parse()
        .map_err(|e| format!("invalid number '{}': {}", raw, e))
}
